use crate::core::types::ErrorCategory;
use std::fmt;

/// Engine error carrying a category and the exact user-visible message.
///
/// `Display` yields the bare message: several messages are part of the
/// engine's contract (step wrapping, timeouts, unresolved variables) and
/// callers compare them verbatim.
#[derive(Debug, Clone)]
pub struct WfError {
    pub category: ErrorCategory,
    message: String,
}

impl WfError {
    pub fn new<T: Into<String>>(category: ErrorCategory, message: T) -> Self {
        WfError {
            category,
            message: message.into(),
        }
    }

    pub fn io<T: Into<String>>(message: T) -> Self {
        WfError::new(ErrorCategory::IoError, message)
    }

    pub fn api<T: Into<String>>(message: T) -> Self {
        WfError::new(ErrorCategory::ApiError, message)
    }

    pub fn validation<T: Into<String>>(message: T) -> Self {
        WfError::new(ErrorCategory::ValidationError, message)
    }

    pub fn canceled<T: Into<String>>(message: T) -> Self {
        WfError::new(ErrorCategory::CanceledError, message)
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Prepend a context prefix, keeping the category.
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.message = format!("{}: {}", prefix, self.message);
        self
    }

    /// Wrap a step error as `step "<name>": <err>`, keeping the inner
    /// category. Wrapping an error already carrying the same step tag is
    /// a no-op.
    pub fn wrap_step(step_name: &str, err: WfError) -> Self {
        let tag = format!("step \"{}\":", step_name);
        if err.message.starts_with(&tag) {
            return err;
        }
        WfError {
            category: err.category,
            message: format!("{} {}", tag, err.message),
        }
    }
}

impl fmt::Display for WfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for WfError {}
