//! One-stop compile-and-render engine.

use std::fs;
use std::path::Path;

use serde_json::Value;
use thiserror::Error;

use drizzle_compiler::{
    CompileError, Compiler, Config, Plugin, TemplateIdentity,
};
use drizzle_runtime::{IncludeLoader, RenderError, Renderer, RuntimeFn, TagHandler};

/// Anything that can go wrong between template source and final output.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("template io: {0}")]
    Io(#[from] std::io::Error),
}

/// Compiler and renderer wired together behind one configuration.
///
/// The engine compiles template source on every call; hosts that render
/// the same template repeatedly can compile once with [`Compiler`] and
/// feed the program to [`Renderer`] directly.
pub struct Engine {
    compiler: Compiler,
    renderer: Renderer,
}

impl Engine {
    /// An engine with default configuration: autoescape on, sandbox on.
    pub fn new() -> Result<Self, EngineError> {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Result<Self, EngineError> {
        Ok(Engine {
            compiler: Compiler::new(config)?,
            renderer: Renderer::new(),
        })
    }

    pub fn config(&self) -> &Config {
        self.compiler.config()
    }

    /// Registers a custom tag: its grammar on the compiler side and its
    /// handler on the renderer side, under the same name.
    pub fn register_tag(
        &mut self,
        name: &str,
        split: &str,
        matches: &str,
        handler: TagHandler,
    ) -> Result<(), EngineError> {
        self.compiler.register_tag(name, split, matches)?;
        self.renderer.register_tag(name, handler);
        Ok(())
    }

    /// Registers a render-time function, callable as a modifier.
    pub fn register_function(&mut self, name: impl Into<String>, f: RuntimeFn) {
        self.renderer.register_function(name, f);
    }

    /// Registers a constant resolvable through `{#NAME#}`.
    pub fn register_constant(&mut self, name: impl Into<String>, value: Value) {
        self.renderer.register_constant(name, value);
    }

    /// Registers a compile-phase plugin under a unique name.
    pub fn register_plugin(&mut self, name: &str, plugin: Plugin) -> Result<(), EngineError> {
        self.compiler.register_plugin(name, plugin)?;
        Ok(())
    }

    /// Compiles and renders inline template source.
    pub fn render(&self, source: &str, data: &Value) -> Result<String, EngineError> {
        let identity = TemplateIdentity::inline("inline");
        let program = self.compiler.compile(source, &identity)?;
        let loader = EngineLoader { compiler: &self.compiler };
        Ok(self.renderer.render_with_includes(&program, data, &loader)?)
    }

    /// Compiles and renders a template file; includes resolve relative to
    /// its directory first.
    pub fn render_file(&self, path: impl AsRef<Path>, data: &Value) -> Result<String, EngineError> {
        let path = path.as_ref();
        let source = fs::read_to_string(path)?;
        let identity = TemplateIdentity::from_path(path);
        let program = self.compiler.compile(&source, &identity)?;
        let loader = EngineLoader { compiler: &self.compiler };
        Ok(self.renderer.render_with_includes(&program, data, &loader)?)
    }
}

/// Loads include targets by compiling the file at the path the parent
/// compilation resolved.
struct EngineLoader<'a> {
    compiler: &'a Compiler,
}

impl IncludeLoader for EngineLoader<'_> {
    fn load_compiled(&self, path: &str) -> drizzle_runtime::Result<String> {
        let source = fs::read_to_string(path).map_err(|e| RenderError::Include {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        let identity = TemplateIdentity::from_path(path);
        self.compiler
            .compile(&source, &identity)
            .map_err(|e| RenderError::Include {
                path: path.to_string(),
                message: e.to_string(),
            })
    }
}
