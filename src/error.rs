//! Error types for the divecomputer crate.

use std::fmt;

use crate::common::Status;

/// The main error type for this crate.
#[derive(Debug, thiserror::Error)]
pub enum DcError {
    /// A status error, optionally with context
    #[error("divecomputer: {1:?}: {0:?}")]
    Status(Status, Option<String>),

    /// Invalid arguments provided
    #[error("invalid argument: {0}")]
    InvalidArguments(String),

    /// Device not found or not accessible
    #[error("device error: {0}")]
    DeviceError(String),

    /// Parse error when reading dive data
    #[error("parse error: {0}")]
    ParseError(String),

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Parse error when reading dive data
    #[error("parse error: {0}")]
    ParseInt(#[from] std::num::ParseIntError),

    /// UTF-8 conversion error
    #[error(transparent)]
    Utf8(#[from] std::str::Utf8Error),

    /// Jiff error
    #[error(transparent)]
    Jiff(#[from] jiff::Error),

    /// Generic error with message
    #[error("unknown error: {0}")]
    Other(String),

    #[error("cancelled")]
    Cancelled,

    #[error("unknown error")]
    Unknown,
}

impl DcError {
    pub fn status<T>(rc: T) -> Self
    where
        T: TryInto<Status>,
        <T as TryInto<Status>>::Error: fmt::Debug,
    {
        Self::Status(rc.try_into().unwrap(), None)
    }

    pub fn status_with_context<T>(rc: T, context: impl ToString) -> Self
    where
        T: TryInto<Status>,
        <T as TryInto<Status>>::Error: fmt::Debug,
    {
        Self::Status(rc.try_into().unwrap(), Some(context.to_string()))
    }

    /// The status this error maps onto in the closed taxonomy.
    pub fn to_status(&self) -> Status {
        match self {
            Self::Status(status, _) => *status,
            Self::InvalidArguments(_) => Status::InvalidArgs,
            Self::DeviceError(_) => Status::NoDevice,
            Self::ParseError(_) => Status::DataFormat,
            Self::Io(err) if err.kind() == std::io::ErrorKind::TimedOut => Status::Timeout,
            Self::Io(err) if err.kind() == std::io::ErrorKind::PermissionDenied => Status::NoAccess,
            Self::Io(_) => Status::Io,
            Self::ParseInt(_) => Status::InvalidArgs,
            Self::Utf8(_) => Status::DataFormat,
            Self::Jiff(_) => Status::DataFormat,
            Self::Cancelled => Status::Cancelled,
            Self::Other(_) | Self::Unknown => Status::Io,
        }
    }
}

impl From<Status> for DcError {
    fn from(status: Status) -> Self {
        Self::Status(status, None)
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, DcError>;
