//! Executor for drizzle compiled template programs.
//!
//! The compiler turns template markup into a flat textual program of
//! `<?r ... ?>` directives. This crate parses that program into a node
//! tree ([`program`]), evaluates the embedded expressions against a
//! `serde_json::Value` data root ([`eval`]) and walks the tree to
//! produce output ([`Renderer`]).
//!
//! ```
//! use drizzle_runtime::Renderer;
//! use serde_json::json;
//!
//! let renderer = Renderer::new();
//! let out = renderer
//!     .render("Hello <?r print escape($name) ?>!", &json!({"name": "Sam"}))
//!     .unwrap();
//! assert_eq!(out, "Hello Sam!");
//! ```

pub mod builtins;
pub mod eval;
pub mod program;
pub mod value;

mod error;
mod render;

pub use error::{RenderError, Result};
pub use eval::{Env, RuntimeFn};
pub use program::{parse_program, Node};
pub use render::{IncludeLoader, Renderer, TagHandler};
