//! Error types for provider construction and chat dispatch

use hookscript::{ParseError, RuntimeError};
use thiserror::Error;

use crate::hooks::HookName;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Submitted source failed to parse or used a forbidden construct.
    #[error("Code validation failed: {0}")]
    Validation(String),

    /// Submitted source raised while it was first executed.
    #[error("Provider code execution failed: {source}")]
    Execution {
        #[source]
        source: RuntimeError,
    },

    #[error(
        "{hook} not implemented in provider code. Please define the following functions in your code: {}. Use a code template to get the correct function structure.",
        HookName::required_signatures()
    )]
    HookMissing { hook: HookName },

    /// Classes were defined but none could be instantiated or yielded hooks.
    #[error("No usable implementation found: could not instantiate any of [{}]", .classes.join(", "))]
    InstantiationExhausted { classes: Vec<String> },

    #[error("{hook} failed: {source}")]
    HookFailed {
        hook: HookName,
        #[source]
        source: RuntimeError,
    },

    #[error("{hook} returned an invalid response: {message}")]
    InvalidResponse { hook: HookName, message: String },

    #[error("Invalid provider definition: {0}")]
    InvalidDefinition(String),

    #[error("Provider '{name}' not found. Available providers: {}", .available.join(", "))]
    NotFound { name: String, available: Vec<String> },

    #[error("Provider '{0}' is inactive")]
    Inactive(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Hook task failed to complete: {0}")]
    TaskJoin(String),
}

impl From<ParseError> for ProviderError {
    fn from(err: ParseError) -> Self {
        ProviderError::Validation(format!("Syntax error: {}", err))
    }
}

impl From<tokio::task::JoinError> for ProviderError {
    fn from(err: tokio::task::JoinError) -> Self {
        ProviderError::TaskJoin(err.to_string())
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
