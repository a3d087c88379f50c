//! Security sandbox: the deny-list check on template expressions.
//!
//! The check is a single case-insensitive, word-boundary alternation built
//! once from the configured blacklist and run over the *whole* expression
//! text of loop subjects, conditions, function calls and modifier chains.
//! A hit anywhere fails the entire construct and aborts the compile.
//!
//! The check is deliberately coarse: a forbidden word inside a string
//! literal still matches. That mirrors the security model this subsystem
//! reproduces; tightening it would change observable behavior.

use regex::Regex;

use crate::config::Config;
use crate::error::{CompileError, Result};

/// Compiled deny-list rule.
///
/// Built from a [`Config`] at compiler construction; immutable afterwards.
/// A disabled sandbox (or an empty blacklist) checks nothing.
#[derive(Debug, Clone)]
pub struct Sandbox {
    rule: Option<Regex>,
}

impl Sandbox {
    /// Builds the rule regex from the config's blacklist.
    pub fn from_config(config: &Config) -> Result<Self> {
        if !config.sandbox || config.blacklist.is_empty() {
            return Ok(Self { rule: None });
        }
        let alternation = config
            .blacklist
            .iter()
            .map(|name| regex::escape(name))
            .collect::<Vec<_>>()
            .join("|");
        let rule = Regex::new(&format!(r"(?i)\b(?:{})\b", alternation)).map_err(|source| {
            CompileError::InvalidPattern {
                name: "blacklist".to_string(),
                source,
            }
        })?;
        Ok(Self { rule: Some(rule) })
    }

    /// Checks one expression; `line` feeds the error location.
    pub fn check(&self, expr: &str, line: usize) -> Result<()> {
        if let Some(rule) = &self.rule {
            if let Some(m) = rule.find(expr) {
                return Err(CompileError::SandboxViolation {
                    rule: m.as_str().to_string(),
                    expr: expr.to_string(),
                    line,
                });
            }
        }
        Ok(())
    }

    /// True when the sandbox actually enforces a rule.
    pub fn enabled(&self) -> bool {
        self.rule.is_some()
    }
}
