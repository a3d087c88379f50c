//! Error types for program execution.

use thiserror::Error;

/// Errors raised while parsing or executing a compiled program.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The compiled program text is malformed (unterminated directive,
    /// unbalanced block, unknown keyword).
    #[error("malformed program: {0}")]
    Program(String),

    /// An expression failed to parse or evaluate.
    #[error("expression error: {0}")]
    Expr(String),

    /// A call named a function that is not registered.
    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    /// A constant lookup named an unregistered constant.
    #[error("unknown constant '{0}'")]
    UnknownConstant(String),

    /// A custom tag fragment named a handler that is not registered.
    #[error("unknown tag handler '{0}'")]
    UnknownTag(String),

    /// An include could not be loaded.
    #[error("include failed for '{path}': {message}")]
    Include { path: String, message: String },

    /// Includes recursed past the depth limit.
    #[error("include depth limit ({0}) exceeded")]
    IncludeDepth(usize),
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RenderError>;
