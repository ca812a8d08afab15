use thiserror::Error;

/// Shared lightweight error type for core primitive operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AckpubError {
    /// Invalid caller input or malformed primitive value.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// Flag expression that does not parse into known publish flags.
    #[error("invalid publish flags: {0}")]
    InvalidFlags(String),
}
