//! Error types for template rendering

use thiserror::Error;

/// Result type for template operations
pub type TemplateResult<T> = Result<T, TemplateError>;

/// Errors that can occur while compiling or evaluating an expression
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Failed to render template
    #[error("failed to render template: {message}")]
    RenderError { message: String },

    /// Invalid template syntax
    #[error("invalid template syntax: {message}")]
    SyntaxError { message: String },

    /// Undefined variable or function in template
    #[error("undefined variable: {name}")]
    UndefinedVariable { name: String },

    /// Invalid argument to function
    #[error("invalid argument to {function}: {message}")]
    InvalidArgument { function: String, message: String },

    /// A time of day that is neither an hour nor `HH:MM[:SS]`
    #[error("invalid time of day '{value}'")]
    InvalidTime { value: String },
}

impl From<minijinja::Error> for TemplateError {
    fn from(err: minijinja::Error) -> Self {
        match err.kind() {
            minijinja::ErrorKind::SyntaxError => TemplateError::SyntaxError {
                message: err.to_string(),
            },
            minijinja::ErrorKind::UndefinedError | minijinja::ErrorKind::UnknownFunction => {
                TemplateError::UndefinedVariable {
                    name: err.to_string(),
                }
            }
            _ => TemplateError::RenderError {
                message: err.to_string(),
            },
        }
    }
}
