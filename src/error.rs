// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

use std::backtrace::Backtrace;

use thiserror::Error;

/// Wraps [`Backtrace`] so thiserror's automatic backtrace-field detection
/// (keyed on the literal type name `Backtrace`, which requires the nightly
/// `error_generic_member_access` feature) does not apply to this field.
pub struct Trace(Backtrace);

impl Default for Trace {
    fn default() -> Self {
        Trace(Backtrace::capture())
    }
}

impl std::fmt::Display for Trace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable error taxonomy of the tablet format.
#[derive(Error, Debug)]
pub enum NimbleError {
    #[error("corrupt format: {0}")]
    CorruptFormat(String),
    #[error("unsupported version {major}.{minor}, reader supports {supported_major}.{supported_minor}")]
    UnsupportedVersion {
        major: u16,
        minor: u16,
        supported_major: u16,
        supported_minor: u16,
    },
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),
    #[error("out of range: {0}")]
    OutOfRange(String),
    #[error("IO error: {0}")]
    Io(#[from] Box<std::io::Error>),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for TracedNimbleError {
    #[inline]
    fn from(e: std::io::Error) -> TracedNimbleError {
        NimbleError::Io(e.into()).into()
    }
}

impl From<prost::DecodeError> for TracedNimbleError {
    #[inline]
    fn from(e: prost::DecodeError) -> TracedNimbleError {
        NimbleError::CorruptFormat(format!("footer decode: {e}")).into()
    }
}

impl From<prost::EncodeError> for TracedNimbleError {
    #[inline]
    fn from(e: prost::EncodeError) -> TracedNimbleError {
        NimbleError::Internal(format!("footer encode: {e}")).into()
    }
}

/// [`NimbleError`] with backtrace.
#[derive(Error)]
#[error("{source:?}\n{trace}")]
pub struct TracedNimbleError {
    source: NimbleError,
    trace: Trace,
}

impl From<NimbleError> for TracedNimbleError {
    #[inline]
    fn from(source: NimbleError) -> TracedNimbleError {
        TracedNimbleError {
            source,
            trace: Trace::default(),
        }
    }
}

impl std::fmt::Debug for TracedNimbleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl TracedNimbleError {
    pub fn kind(&self) -> &NimbleError {
        &self.source
    }

    pub fn corrupt(message: impl ToString) -> Self {
        NimbleError::CorruptFormat(message.to_string()).into()
    }

    /// Corruption pinned to a specific stream within a stripe.
    pub fn corrupt_at(stripe: u32, stream: u32, message: impl ToString) -> Self {
        NimbleError::CorruptFormat(format!(
            "stripe {stripe} stream {stream}: {}",
            message.to_string()
        ))
        .into()
    }

    pub fn unsupported(message: impl ToString) -> Self {
        NimbleError::UnsupportedEncoding(message.to_string()).into()
    }

    pub fn schema_mismatch(message: impl ToString) -> Self {
        NimbleError::SchemaMismatch(message.to_string()).into()
    }

    pub fn out_of_range(message: impl ToString) -> Self {
        NimbleError::OutOfRange(message.to_string()).into()
    }

    pub fn invalid_argument(message: impl ToString) -> Self {
        NimbleError::InvalidArgument(message.to_string()).into()
    }

    pub fn internal(message: impl ToString) -> Self {
        NimbleError::Internal(message.to_string()).into()
    }
}

pub type NimbleResult<T> = std::result::Result<T, TracedNimbleError>;
