//! Error taxonomy for the evolutionary core.

/// All fallible operations in this crate return this error type.
#[derive(thiserror::Error, miette::Diagnostic, Debug)]
pub enum NeatError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("malformed persisted packet: {0}")]
    Packet(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to encode/decode packet bytes: {0}")]
    Codec(String),
}

pub type Result<T> = std::result::Result<T, NeatError>;
