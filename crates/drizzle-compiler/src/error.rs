//! Error types for the compiler crate.

use thiserror::Error;

use crate::hooks::HookPhase;

/// Errors produced while configuring or running a [`Compiler`](crate::Compiler).
///
/// Every variant is fatal to the single `compile()` call that raised it;
/// the compiler never returns partial output.
#[derive(Debug, Error)]
pub enum CompileError {
    /// A loop, conditional, autoescape or noparse region was still open at
    /// the end of the token stream.
    #[error("unclosed {{{construct}}} (opened near line {line})")]
    Unclosed { construct: &'static str, line: usize },

    /// A closing tag appeared with no matching open construct.
    #[error("unmatched {{{tag}}} at line {line}")]
    UnmatchedClose { tag: &'static str, line: usize },

    /// Autoescape regions cannot nest.
    #[error("nested {{autoescape}} region at line {line} is not supported")]
    NestedAutoescape { line: usize },

    /// A blacklisted capability was referenced in a condition, call or
    /// modifier expression.
    #[error("sandbox violation: forbidden capability '{rule}' in \"{expr}\" at line {line}")]
    SandboxViolation {
        rule: String,
        expr: String,
        line: usize,
    },

    /// A tag with this name is already registered.
    #[error("tag '{0}' is already registered")]
    DuplicateTag(String),

    /// A plugin with this name is already registered.
    #[error("plugin '{0}' is already registered")]
    DuplicatePlugin(String),

    /// A tag split or match pattern failed to compile.
    #[error("invalid pattern for tag '{name}'")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    /// A static include target could not be resolved to a path inside the
    /// configured search roots.
    #[error("cannot resolve include '{path}': {reason}")]
    IncludeResolution { path: String, reason: String },

    /// A plugin handler returned an error.
    #[error("plugin '{plugin}' failed during {phase}: {message}")]
    Hook {
        plugin: String,
        phase: HookPhase,
        message: String,
    },
}

/// Result type for compiler operations.
pub type Result<T> = std::result::Result<T, CompileError>;
