//! Error types for core value types.

use thiserror::Error;

/// Errors raised when constructing core types from caller input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("Invalid currency code: {0:?}")]
    InvalidCurrency(String),
}
