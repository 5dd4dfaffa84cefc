//! Error type shared by every public operation.

use thiserror::Error;

/// Failures reported by the interpreter front-end.
///
/// Guest-side failures carry the exception `repr` for diagnostics only; callers
/// should treat them as opaque "it failed" markers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("interpreter failed to start: {0}")]
    Startup(String),
    #[error("failed to create execution context: {0}")]
    ContextCreation(String),
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("evaluation failed: {0}")]
    Evaluation(String),
    #[error("result could not be converted to a string: {0}")]
    Conversion(String),
    #[error("interpreter is not running")]
    NotRunning,
    #[error("unknown execution context {0}")]
    UnknownContext(u64),
}

impl Error {
    /// Whether the interpreter can keep serving tasks after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Execution(_) | Error::Evaluation(_) | Error::Conversion(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(Error::Execution("ZeroDivisionError".into()).is_recoverable());
        assert!(Error::Conversion("bad __str__".into()).is_recoverable());
        assert!(!Error::Startup("boom".into()).is_recoverable());
        assert!(!Error::NotRunning.is_recoverable());
    }

    #[test]
    fn test_display_keeps_guest_detail() {
        let err = Error::Evaluation("NameError(\"name 'x' is not defined\")".into());
        assert_eq!(
            err.to_string(),
            "evaluation failed: NameError(\"name 'x' is not defined\")"
        );
    }
}
