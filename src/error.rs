//! LEVEE - Error Types
//! Defines the error hierarchy for the binding layer and the storage engine
//! underneath it.

use thiserror::Error;

/// Result type for host-facing operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for calls into the storage engine.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Errors surfaced to host code.
///
/// A missing key is never an error: point lookups report it as `Ok(None)`.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed call inputs, reported before any work is scheduled.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation attempted on a closed handle, closed iterator,
    /// released snapshot or unpositioned cursor.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// A second operation was started on an iterator that is mid-operation.
    #[error("Concurrent operations not supported")]
    ConcurrentAccess,

    /// The operation exists but is not implemented.
    #[error("Method not implemented: {0}")]
    NotImplemented(&'static str),

    /// The storage engine reported a failure.
    #[error("Engine error: {0}")]
    Engine(EngineError),

    /// A host callback panicked while a result was being delivered.
    #[error("Uncaught exception in callback: {0}")]
    Uncaught(String),

    /// The exec phase of an operation panicked on a worker thread.
    #[error("Operation aborted before producing a result")]
    Aborted,
}

impl Error {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    pub(crate) fn illegal(message: impl Into<String>) -> Self {
        Error::IllegalState(message.into())
    }

    /// True for errors that indicate a closed or exhausted resource.
    pub fn is_illegal_state(&self) -> bool {
        matches!(self, Error::IllegalState(_))
    }
}

impl From<EngineError> for Error {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Closed => Error::illegal("database closed"),
            other => Error::Engine(other),
        }
    }
}

/// Errors reported by the storage engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// I/O errors from file operations (WAL, IDENTITY).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Data corruption detected (CRC mismatch, torn frame).
    #[error("Corruption: {0}")]
    Corruption(String),

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The engine rejected its inputs (missing database, comparator mismatch).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The engine instance has been closed.
    #[error("Engine closed")]
    Closed,
}

impl From<bincode::Error> for EngineError {
    fn from(err: bincode::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_engine_maps_to_illegal_state() {
        let err: Error = EngineError::Closed.into();
        assert!(err.is_illegal_state());
    }

    #[test]
    fn test_engine_failures_stay_engine_errors() {
        let err: Error = EngineError::Corruption("bad crc".into()).into();
        assert!(matches!(err, Error::Engine(EngineError::Corruption(_))));
        assert_eq!(err.to_string(), "Engine error: Corruption: bad crc");
    }

    #[test]
    fn test_concurrent_access_message() {
        assert_eq!(
            Error::ConcurrentAccess.to_string(),
            "Concurrent operations not supported"
        );
    }
}
