pub mod amount;
pub mod exclusion;
