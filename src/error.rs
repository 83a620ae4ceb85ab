use thiserror::Error;

pub use color_eyre::eyre::eyre;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid or reserved head byte: 0x{0:02x}")]
    InvalidByte(u8),

    #[error("parse stack exceeded its capacity of {capacity} frames")]
    StackTooDeep { capacity: usize },

    #[error("expected {expected}, found {found}")]
    UnexpectedType {
        expected: &'static str,
        found: &'static str,
    },

    #[error("no registered target for extension typecode {0}")]
    UnknownExtType(i8),

    #[error("packing of type {0} is disallowed by the registry")]
    TypeRefused(String),

    #[error("range error: {0}")]
    RangeError(String),

    #[error("extension handler protocol violation: {0}")]
    HandlerProtocolViolation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("a bug in msgpack-codec: {0}")]
    Internal(color_eyre::Report),
}

impl Error {
    pub fn from_debug(err: impl std::fmt::Debug) -> Self {
        Self::Internal(color_eyre::eyre::eyre!(format!("{:#?}", err)))
    }
}
