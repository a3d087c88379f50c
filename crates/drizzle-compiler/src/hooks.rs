//! Plugin hook pipeline.
//!
//! Plugins register handlers for two checkpoints that bracket a compile:
//! `before_parse` sees the raw template source, `after_parse` sees the
//! fully compiled output. Handlers for a phase run in registration order,
//! each receiving the same mutable [`HookContext`]; the compiler re-reads
//! `code` after every phase rather than caching it, so a handler's rewrite
//! is always observed.

use std::fmt;
use std::path::PathBuf;

use crate::config::Config;
use crate::error::{CompileError, Result};

/// The checkpoint at which a hook runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    /// Raw source, before tokenization.
    BeforeParse,
    /// Compiled output, before it is handed to the caller.
    AfterParse,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPhase::BeforeParse => write!(f, "before_parse"),
            HookPhase::AfterParse => write!(f, "after_parse"),
        }
    }
}

/// Mutable context handed to every hook handler.
///
/// `code` is the template source in `before_parse` and the compiled
/// program in `after_parse`; handlers may rewrite it in place.
#[derive(Debug, Clone)]
pub struct HookContext {
    /// Source or compiled text, depending on phase.
    pub code: String,
    /// Base directory of the template being compiled.
    pub base_dir: PathBuf,
    /// Path of the template file being compiled.
    pub file_path: PathBuf,
    /// The compiler's active configuration, so handlers can adapt to
    /// autoescape, sandbox, charset and search-root settings.
    pub config: Config,
}

/// Handler signature shared by both phases.
///
/// Errors are plain messages; the pipeline wraps them with the plugin name
/// and phase.
pub type HookFn = Box<dyn Fn(&mut HookContext) -> std::result::Result<(), String> + Send + Sync>;

/// One plugin: a named pair of optional phase handlers.
///
/// # Example
///
/// ```rust
/// use drizzle_compiler::Plugin;
///
/// let plugin = Plugin::new().before_parse(|ctx| {
///     ctx.code = ctx.code.replace("{brand}", "Drizzle");
///     Ok(())
/// });
/// ```
#[derive(Default)]
pub struct Plugin {
    before_parse: Option<HookFn>,
    after_parse: Option<HookFn>,
}

impl Plugin {
    /// Creates a plugin with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the `before_parse` handler.
    pub fn before_parse<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut HookContext) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.before_parse = Some(Box::new(f));
        self
    }

    /// Sets the `after_parse` handler.
    pub fn after_parse<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut HookContext) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.after_parse = Some(Box::new(f));
        self
    }

    fn handler(&self, phase: HookPhase) -> Option<&HookFn> {
        match phase {
            HookPhase::BeforeParse => self.before_parse.as_ref(),
            HookPhase::AfterParse => self.after_parse.as_ref(),
        }
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("before_parse", &self.before_parse.is_some())
            .field("after_parse", &self.after_parse.is_some())
            .finish()
    }
}

/// Registration-ordered plugin list.
#[derive(Debug, Default)]
pub struct PluginSet {
    plugins: Vec<(String, Plugin)>,
}

impl PluginSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plugin under a unique name.
    pub fn register(&mut self, name: &str, plugin: Plugin) -> Result<()> {
        if self.plugins.iter().any(|(n, _)| n == name) {
            return Err(CompileError::DuplicatePlugin(name.to_string()));
        }
        self.plugins.push((name.to_string(), plugin));
        Ok(())
    }

    /// Runs every handler registered for `phase`, in registration order,
    /// against the same context. Sequential composition: later handlers see
    /// earlier handlers' rewrites.
    pub fn run(&self, phase: HookPhase, ctx: &mut HookContext) -> Result<()> {
        for (name, plugin) in &self.plugins {
            if let Some(handler) = plugin.handler(phase) {
                handler(ctx).map_err(|message| CompileError::Hook {
                    plugin: name.clone(),
                    phase,
                    message,
                })?;
            }
        }
        Ok(())
    }

    /// True if no plugins are registered.
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(code: &str) -> HookContext {
        HookContext {
            code: code.to_string(),
            base_dir: PathBuf::from("."),
            file_path: PathBuf::from("test.html"),
            config: Config::default(),
        }
    }

    #[test]
    fn duplicate_plugin_name_rejected() {
        let mut set = PluginSet::new();
        set.register("markdown", Plugin::new()).unwrap();
        let err = set.register("markdown", Plugin::new()).unwrap_err();
        assert!(matches!(err, CompileError::DuplicatePlugin(name) if name == "markdown"));
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let mut set = PluginSet::new();
        set.register(
            "first",
            Plugin::new().before_parse(|ctx| {
                ctx.code.push('a');
                Ok(())
            }),
        )
        .unwrap();
        set.register(
            "second",
            Plugin::new().before_parse(|ctx| {
                ctx.code.push('b');
                Ok(())
            }),
        )
        .unwrap();

        let mut ctx = ctx("x");
        set.run(HookPhase::BeforeParse, &mut ctx).unwrap();
        assert_eq!(ctx.code, "xab");
    }

    #[test]
    fn phases_are_independent() {
        let mut set = PluginSet::new();
        set.register(
            "post",
            Plugin::new().after_parse(|ctx| {
                ctx.code = ctx.code.to_uppercase();
                Ok(())
            }),
        )
        .unwrap();

        let mut before = ctx("abc");
        set.run(HookPhase::BeforeParse, &mut before).unwrap();
        assert_eq!(before.code, "abc");

        let mut after = ctx("abc");
        set.run(HookPhase::AfterParse, &mut after).unwrap();
        assert_eq!(after.code, "ABC");
    }

    #[test]
    fn handler_error_names_plugin_and_phase() {
        let mut set = PluginSet::new();
        set.register(
            "broken",
            Plugin::new().before_parse(|_| Err("boom".to_string())),
        )
        .unwrap();

        let err = set.run(HookPhase::BeforeParse, &mut ctx("x")).unwrap_err();
        match err {
            CompileError::Hook {
                plugin,
                phase,
                message,
            } => {
                assert_eq!(plugin, "broken");
                assert_eq!(phase, HookPhase::BeforeParse);
                assert_eq!(message, "boom");
            }
            other => panic!("expected hook error, got {:?}", other),
        }
    }

    #[test]
    fn error_aborts_remaining_handlers() {
        let mut set = PluginSet::new();
        set.register(
            "fails",
            Plugin::new().before_parse(|_| Err("stop".to_string())),
        )
        .unwrap();
        set.register(
            "never",
            Plugin::new().before_parse(|ctx| {
                ctx.code.push('!');
                Ok(())
            }),
        )
        .unwrap();

        let mut ctx = ctx("x");
        assert!(set.run(HookPhase::BeforeParse, &mut ctx).is_err());
        assert_eq!(ctx.code, "x");
    }
}
