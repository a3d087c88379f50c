//! Compiler configuration and template identity.

use std::path::{Path, PathBuf};

/// Capability names forbidden by default.
///
/// These guard the shell-execution and filesystem-mutation functions a
/// sandboxed template must never reach. The set can be replaced wholesale
/// through [`Config::blacklist`].
pub const DEFAULT_BLACKLIST: &[&str] = &[
    "exec",
    "shell_exec",
    "system",
    "passthru",
    "popen",
    "proc_open",
    "eval",
    "unlink",
    "rmdir",
    "symlink",
];

/// Configuration for a [`Compiler`](crate::Compiler) instance.
///
/// Built once at startup; every `compile()` call reads it immutably.
///
/// # Example
///
/// ```rust
/// use drizzle_compiler::Config;
///
/// let config = Config {
///     autoescape: false,
///     remove_comments: true,
///     ..Config::default()
/// };
/// assert!(config.sandbox);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether variable output is HTML-escaped unless a template region
    /// turns escaping off. Defaults to `true`.
    pub autoescape: bool,
    /// Character set recorded in compiled output metadata and passed to
    /// plugin hooks. Defaults to `"UTF-8"`.
    pub charset: String,
    /// Whether the security blacklist is enforced. Disabling skips all
    /// sandbox checks. Defaults to `true`.
    pub sandbox: bool,
    /// Whether HTML comments (`<!-- -->`) are stripped before tokenizing.
    /// Defaults to `false`.
    pub remove_comments: bool,
    /// Directories searched, in order, when a static include target is not
    /// found relative to the including template.
    pub search_roots: Vec<PathBuf>,
    /// File extension appended to extension-less include targets.
    /// Defaults to `"html"`.
    pub extension: String,
    /// Forbidden capability names. Defaults to [`DEFAULT_BLACKLIST`].
    pub blacklist: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            autoescape: true,
            charset: "UTF-8".to_string(),
            sandbox: true,
            remove_comments: false,
            search_roots: Vec::new(),
            extension: "html".to_string(),
            blacklist: DEFAULT_BLACKLIST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Name and origin of the template being compiled.
///
/// Used for diagnostics and as the anchor for relative include resolution.
/// One identity describes one template; it carries no compile state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateIdentity {
    /// Display name for error messages (e.g. `"user/profile"`).
    pub name: String,
    /// Directory the template's relative includes resolve against.
    pub base_dir: PathBuf,
    /// Path of the template file itself, where one exists.
    pub file_path: PathBuf,
}

impl TemplateIdentity {
    /// Identity for a template loaded from `path`.
    ///
    /// The base directory is the file's parent, or `"."` for bare names.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            name,
            base_dir,
            file_path: path.to_path_buf(),
        }
    }

    /// Identity for an in-memory template with no backing file.
    pub fn inline(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            file_path: PathBuf::from(&name),
            base_dir: PathBuf::from("."),
            name,
        }
    }
}
