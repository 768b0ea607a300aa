//! LEVEE - Status Taxonomy
//! Normalizes the three outcomes of a native call (ok, not found, error)
//! into one shape that both delivery styles consume.
//!
//! Callback delivery receives `Result<Option<T>>`:
//! - `Ok`       → `Ok(Some(value))`
//! - `NotFound` → `Ok(None)`, never an error
//! - `Error`    → `Err(error)`
//!
//! Synchronous delivery returns the same `Result<Option<T>>` in place, so
//! callers tell "key absent" apart from "operation failed" by type, not by
//! message text.

use crate::error::{EngineResult, Error, Result};

/// Outcome of a single native engine call.
#[derive(Debug)]
pub enum Status<T> {
    /// The call succeeded, optionally carrying a value.
    Ok(T),
    /// A point lookup found no entry. Not an error.
    NotFound,
    /// The call failed.
    Error(Error),
}

impl<T> Status<T> {
    /// Classify an engine lookup result.
    pub fn from_lookup(result: EngineResult<Option<T>>) -> Self {
        match result {
            Ok(Some(value)) => Status::Ok(value),
            Ok(None) => Status::NotFound,
            Err(err) => Status::Error(err.into()),
        }
    }

    /// Classify an engine call that always yields a value on success.
    pub fn from_engine(result: EngineResult<T>) -> Self {
        match result {
            Ok(value) => Status::Ok(value),
            Err(err) => Status::Error(err.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Status::NotFound)
    }

    /// Transform the carried value, leaving the other outcomes intact.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Status<U> {
        match self {
            Status::Ok(value) => Status::Ok(f(value)),
            Status::NotFound => Status::NotFound,
            Status::Error(err) => Status::Error(err),
        }
    }

    /// Collapse into the delivery shape shared by sync returns and callbacks.
    pub fn into_result(self) -> Result<Option<T>> {
        match self {
            Status::Ok(value) => Ok(Some(value)),
            Status::NotFound => Ok(None),
            Status::Error(err) => Err(err),
        }
    }
}

impl<T> From<Result<T>> for Status<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Status::Ok(value),
            Err(err) => Status::Error(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[test]
    fn test_lookup_classification() {
        assert!(Status::from_lookup(Ok(Some(1))).is_ok());
        assert!(Status::<u8>::from_lookup(Ok(None)).is_not_found());
        let failed = Status::<u8>::from_lookup(Err(EngineError::Corruption("x".into())));
        assert!(matches!(failed, Status::Error(Error::Engine(_))));
    }

    #[test]
    fn test_not_found_is_not_an_error() {
        let delivered = Status::<Vec<u8>>::NotFound.into_result();
        assert!(matches!(delivered, Ok(None)));
    }

    #[test]
    fn test_closed_engine_becomes_illegal_state() {
        let delivered = Status::<()>::from_engine(Err(EngineError::Closed)).into_result();
        assert!(delivered.unwrap_err().is_illegal_state());
    }

    #[test]
    fn test_map_keeps_outcome() {
        assert!(matches!(Status::Ok(2).map(|v| v * 2), Status::Ok(4)));
        assert!(Status::<i32>::NotFound.map(|v| v * 2).is_not_found());
    }
}
