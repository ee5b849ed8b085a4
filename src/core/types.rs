use serde::{Deserialize, Serialize};

/// Error category enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    SyntaxError,
    SchemaError,
    UnresolvedVarError,
    DependencyError,
    PopulateError,
    ValidationError,
    RunError,
    TimeoutError,
    CleanupError,
    CanceledError,
    IoError,
    ApiError,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
