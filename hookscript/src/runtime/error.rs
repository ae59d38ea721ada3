use thiserror::Error;

use super::values::Value;

/// Errors raised while evaluating a program. Each variant corresponds to a
/// guest exception type so `try/except` can match on it.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("NameError: {0}")]
    NameError(String),

    #[error("TypeError: {0}")]
    TypeError(String),

    #[error("TypeError: {function}() takes {expected} positional arguments but {actual} were given")]
    ArityMismatch {
        function: String,
        expected: String,
        actual: usize,
    },

    #[error("AttributeError: {0}")]
    AttributeError(String),

    #[error("KeyError: {0}")]
    KeyError(String),

    #[error("IndexError: {0}")]
    IndexError(String),

    #[error("ValueError: {0}")]
    ValueError(String),

    #[error("ZeroDivisionError: {0}")]
    ZeroDivisionError(String),

    #[error("OverflowError: {0}")]
    OverflowError(String),

    #[error("MemoryError: {0}")]
    MemoryError(String),

    #[error("ImportError: {0}")]
    ImportError(String),

    #[error("NotImplementedError: {0}")]
    NotImplementedError(String),

    #[error("RecursionError: {0}")]
    RecursionError(String),

    #[error("AssertionError: {0}")]
    AssertionError(String),

    #[error("StopIteration")]
    StopIteration,

    #[error("RuntimeError: {0}")]
    Generic(String),

    /// An exception instance raised by guest code.
    #[error("{type_name}: {message}")]
    Raised {
        type_name: String,
        message: String,
        value: Value,
    },
}

impl RuntimeError {
    /// Guest-visible exception class name.
    pub fn exception_name(&self) -> &str {
        match self {
            RuntimeError::NameError(_) => "NameError",
            RuntimeError::TypeError(_) | RuntimeError::ArityMismatch { .. } => "TypeError",
            RuntimeError::AttributeError(_) => "AttributeError",
            RuntimeError::KeyError(_) => "KeyError",
            RuntimeError::IndexError(_) => "IndexError",
            RuntimeError::ValueError(_) => "ValueError",
            RuntimeError::ZeroDivisionError(_) => "ZeroDivisionError",
            RuntimeError::OverflowError(_) => "OverflowError",
            RuntimeError::MemoryError(_) => "MemoryError",
            RuntimeError::ImportError(_) => "ImportError",
            RuntimeError::NotImplementedError(_) => "NotImplementedError",
            RuntimeError::RecursionError(_) => "RecursionError",
            RuntimeError::AssertionError(_) => "AssertionError",
            RuntimeError::StopIteration => "StopIteration",
            RuntimeError::Generic(_) => "RuntimeError",
            RuntimeError::Raised { type_name, .. } => type_name,
        }
    }

    /// The message without the exception name prefix.
    pub fn message(&self) -> String {
        match self {
            RuntimeError::NameError(m)
            | RuntimeError::TypeError(m)
            | RuntimeError::AttributeError(m)
            | RuntimeError::KeyError(m)
            | RuntimeError::IndexError(m)
            | RuntimeError::ValueError(m)
            | RuntimeError::ZeroDivisionError(m)
            | RuntimeError::OverflowError(m)
            | RuntimeError::MemoryError(m)
            | RuntimeError::ImportError(m)
            | RuntimeError::NotImplementedError(m)
            | RuntimeError::RecursionError(m)
            | RuntimeError::AssertionError(m)
            | RuntimeError::Generic(m) => m.clone(),
            RuntimeError::ArityMismatch {
                function,
                expected,
                actual,
            } => format!(
                "{}() takes {} positional arguments but {} were given",
                function, expected, actual
            ),
            RuntimeError::StopIteration => String::new(),
            RuntimeError::Raised { message, .. } => message.clone(),
        }
    }

    pub fn name_not_defined(name: &str) -> Self {
        RuntimeError::NameError(format!("name '{}' is not defined", name))
    }

    pub fn no_attribute(type_name: &str, attr: &str) -> Self {
        RuntimeError::AttributeError(format!(
            "'{}' object has no attribute '{}'",
            type_name, attr
        ))
    }

    pub fn not_callable(type_name: &str) -> Self {
        RuntimeError::TypeError(format!("'{}' object is not callable", type_name))
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_exception_name() {
        let err = RuntimeError::name_not_defined("client");
        assert_eq!(err.to_string(), "NameError: name 'client' is not defined");
        assert_eq!(err.exception_name(), "NameError");
        assert_eq!(err.message(), "name 'client' is not defined");
    }

    #[test]
    fn test_arity_mismatch_is_a_type_error() {
        let err = RuntimeError::ArityMismatch {
            function: "len".into(),
            expected: "1".into(),
            actual: 2,
        };
        assert_eq!(err.exception_name(), "TypeError");
        assert!(err.to_string().starts_with("TypeError: len()"));
    }
}
