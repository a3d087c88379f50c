//! # Drizzle - Lightweight Template Markup
//!
//! Drizzle compiles curly-tag template markup into a small textual
//! program and executes it against JSON data. It provides:
//!
//! - Interpolation with dot subscripts and pipe modifiers (`{$user.name|upper}`)
//! - Conditionals, loops with per-level bindings, break/continue
//! - Autoescaping by default, with `{autoescape="off"}` regions
//! - `{noparse}` raw regions and `{ignore}` dropped regions
//! - Static and data-driven `{include}` with path containment
//! - A capability blacklist applied to conditions, loop subjects and calls
//! - Custom tag grammars and compile-phase plugins
//!
//! ## Quick Start
//!
//! ```rust
//! use drizzle::Engine;
//! use serde_json::json;
//!
//! let engine = Engine::new().unwrap();
//! let out = engine
//!     .render("Hello {$name}!", &json!({"name": "<Sam>"}))
//!     .unwrap();
//! assert_eq!(out, "Hello &lt;Sam&gt;!");
//! ```
//!
//! The two halves are usable on their own: [`Compiler`] turns markup into
//! a fragment program, [`Renderer`] executes one. [`Engine`] wires them
//! together for the common case.

mod engine;

pub mod prelude;

pub use engine::{Engine, EngineError};

// Compile side.
pub use drizzle_compiler::{
    CompileError, Compiler, Config, HookContext, HookPhase, Plugin, TemplateIdentity,
    DEFAULT_BLACKLIST,
};

// Render side.
pub use drizzle_runtime::{
    IncludeLoader, RenderError, Renderer, RuntimeFn, TagHandler,
};
