//! Prelude for convenient imports.
//!
//! Re-exports the types most hosts touch, so one line covers the common
//! setup:
//!
//! ```rust,ignore
//! use drizzle::prelude::*;
//!
//! let engine = Engine::new()?;
//! let out = engine.render("Hello {$name}!", &data)?;
//! ```

pub use crate::{Engine, EngineError};

pub use crate::{CompileError, Compiler, Config, Plugin, TemplateIdentity};

pub use crate::{RenderError, Renderer};
