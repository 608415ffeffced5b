pub mod chain;
pub mod decoder;
pub mod types;
