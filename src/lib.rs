pub mod config;
pub mod contract;
pub mod db;
pub mod handlers;
pub mod indexer;
pub mod metrics;
pub mod records;
pub mod sink;
pub mod tokens;
