//! Template-markup compiler.
//!
//! This crate translates template source — literal text interleaved with
//! `{...}` tag directives — into a textual program of executable fragments.
//! It is a genuine small compiler: tokenization against a registry of tag
//! grammars, a single-pass state machine tracking nested control flow,
//! expression rewriting into safe subscript form, a blacklist sandbox over
//! every condition and call, and a two-point plugin hook pipeline.
//!
//! # Pipeline
//!
//! ```text
//! source text
//!   → comment stripping (optional)
//!   → BEFORE-PARSE HOOKS ← (source-level rewriting)
//!   → tokenizer (tag registry)
//!   → compile state machine
//!       ├─ expression rewriter (subscripts, modifiers, escaping)
//!       ├─ security sandbox (deny-list over conditions and calls)
//!       └─ include resolver (static paths normalized at compile time)
//!   → AFTER-PARSE HOOKS ← (code-level rewriting)
//!   → compiled fragment program
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use drizzle_compiler::{Compiler, Config, TemplateIdentity};
//!
//! let compiler = Compiler::new(Config::default()).unwrap();
//! let compiled = compiler
//!     .compile(
//!         r#"{if="$count > 0"}{$count} items{else}empty{/if}"#,
//!         &TemplateIdentity::inline("listing"),
//!     )
//!     .unwrap();
//! assert!(compiled.starts_with("<?r if $count > 0 ?>"));
//! ```
//!
//! # Concurrency
//!
//! A [`Compiler`] is configured once — tags, plugins, sandbox — and then
//! shared immutably. `compile()` borrows `&self` and owns all per-call
//! state, so concurrent compiles of different templates are safe; complete
//! all registration before the first compile.
//!
//! # What this crate does not do
//!
//! Executing the compiled program and caching it to disk are the host's
//! concerns. The companion `drizzle-runtime` crate provides an executor;
//! the compiler itself keeps no reference to anything it returns.

mod compiler;
mod config;
mod error;
mod include;

pub mod hooks;
pub mod registry;
pub mod rewrite;
pub mod sandbox;
pub mod tokenizer;

pub use compiler::Compiler;
pub use config::{Config, TemplateIdentity, DEFAULT_BLACKLIST};
pub use error::{CompileError, Result};
pub use hooks::{HookContext, HookFn, HookPhase, Plugin};
pub use include::resolve_include;
pub use registry::{TagDefinition, TagRegistry};
pub use sandbox::Sandbox;
pub use tokenizer::{TagKind, TagToken, Token};
