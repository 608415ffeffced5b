//! Event handlers for the bound token and the ports they run against.

pub mod binding;
pub mod context;
pub mod error;
pub mod supply;
pub mod transfer;
