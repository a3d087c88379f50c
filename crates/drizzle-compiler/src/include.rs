//! Include resolution for static `{include="..."}` targets.
//!
//! Static targets are resolved at compile time: first against the
//! including template's directory, then against each configured search
//! root in order. `./` and `../` segments are normalized lexically; a
//! target that climbs out of every candidate base cannot be resolved.
//! Dynamic (`$`-expression) targets are left for render time and never
//! pass through here.

use std::path::{Component, Path, PathBuf};

use crate::config::Config;
use crate::error::{CompileError, Result};
use crate::TemplateIdentity;

/// Resolves a static include target to a normalized path.
///
/// The first candidate base whose joined path exists wins; if none exists
/// on disk, the path under the template's own directory is returned so the
/// render-time loader reports the miss. Extension-less targets get the
/// configured template extension.
pub fn resolve_include(
    target: &str,
    identity: &TemplateIdentity,
    config: &Config,
) -> Result<PathBuf> {
    // An absolute target would replace the base in `join` and sidestep
    // containment entirely.
    if Path::new(target).is_absolute() {
        return Err(CompileError::IncludeResolution {
            path: target.to_string(),
            reason: "absolute include targets are not allowed".to_string(),
        });
    }
    let mut relative = PathBuf::from(target);
    if relative.extension().is_none() && !config.extension.is_empty() {
        relative = PathBuf::from(format!("{}.{}", target, config.extension));
    }

    let mut bases: Vec<&Path> = vec![identity.base_dir.as_path()];
    bases.extend(config.search_roots.iter().map(PathBuf::as_path));

    let mut first: Option<PathBuf> = None;
    for base in bases {
        let candidate = normalize(&base.join(&relative), target)?;
        if candidate.is_file() {
            return Ok(candidate);
        }
        if first.is_none() {
            first = Some(candidate);
        }
    }
    first.ok_or_else(|| CompileError::IncludeResolution {
        path: target.to_string(),
        reason: "no base directory configured".to_string(),
    })
}

/// Lexical normalization: resolves `.` and `..` without touching the
/// filesystem. `..` that would climb past the path's start is an error.
fn normalize(path: &Path, target: &str) -> Result<PathBuf> {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                _ => {
                    return Err(CompileError::IncludeResolution {
                        path: target.to_string(),
                        reason: "path escapes the template search roots".to_string(),
                    });
                }
            },
            other => parts.push(other),
        }
    }
    Ok(parts.iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn identity_in(dir: &Path) -> TemplateIdentity {
        TemplateIdentity {
            name: "page".to_string(),
            base_dir: dir.to_path_buf(),
            file_path: dir.join("page.html"),
        }
    }

    #[test]
    fn sibling_include_resolves_under_base_dir() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("header.html"), "x").unwrap();

        let path = resolve_include("header", &identity_in(tmp.path()), &Config::default()).unwrap();
        assert_eq!(path, tmp.path().join("header.html"));
    }

    #[test]
    fn extension_is_appended_when_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let path = resolve_include("partial", &identity_in(tmp.path()), &Config::default()).unwrap();
        assert!(path.to_string_lossy().ends_with("partial.html"));
    }

    #[test]
    fn explicit_extension_is_kept() {
        let tmp = tempfile::tempdir().unwrap();
        let path =
            resolve_include("partial.tpl", &identity_in(tmp.path()), &Config::default()).unwrap();
        assert!(path.to_string_lossy().ends_with("partial.tpl"));
    }

    #[test]
    fn search_root_used_when_base_dir_misses() {
        let tmp = tempfile::tempdir().unwrap();
        let shared = tmp.path().join("shared");
        fs::create_dir(&shared).unwrap();
        fs::write(shared.join("footer.html"), "x").unwrap();

        let pages = tmp.path().join("pages");
        fs::create_dir(&pages).unwrap();

        let config = Config {
            search_roots: vec![shared.clone()],
            ..Config::default()
        };
        let path = resolve_include("footer", &identity_in(&pages), &config).unwrap();
        assert_eq!(path, shared.join("footer.html"));
    }

    #[test]
    fn dot_segments_normalize() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(tmp.path().join("top.html"), "x").unwrap();

        let path = resolve_include("../top", &identity_in(&sub), &Config::default()).unwrap();
        assert_eq!(path, tmp.path().join("top.html"));
        assert!(!path.to_string_lossy().contains(".."));
    }

    #[test]
    fn absolute_target_is_rejected() {
        let secrets = tempfile::tempdir().unwrap();
        let secret = secrets.path().join("secret.html");
        fs::write(&secret, "x").unwrap();

        let templates = tempfile::tempdir().unwrap();
        let err = resolve_include(
            &secret.to_string_lossy(),
            &identity_in(templates.path()),
            &Config::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::IncludeResolution { .. }));
    }

    #[test]
    fn climbing_past_root_is_an_error() {
        let identity = TemplateIdentity {
            name: "page".to_string(),
            base_dir: PathBuf::from("views"),
            file_path: PathBuf::from("views/page.html"),
        };
        let err =
            resolve_include("../../etc/passwd", &identity, &Config::default()).unwrap_err();
        assert!(matches!(err, CompileError::IncludeResolution { .. }));
    }

    #[test]
    fn missing_file_still_resolves_deterministically() {
        let tmp = tempfile::tempdir().unwrap();
        let path = resolve_include("ghost", &identity_in(tmp.path()), &Config::default()).unwrap();
        assert_eq!(path, tmp.path().join("ghost.html"));
    }
}
