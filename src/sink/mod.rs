//! Event sink implementations.

pub mod log;
#[cfg(test)]
pub mod memory;
pub mod postgres;

use serde::Deserialize;

/// Which sink the runtime hands records to.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Postgres,
    Log,
}
