//! Tag registry: the grammar table the tokenizer is built from.
//!
//! Every tag the compiler understands is described by a [`TagDefinition`]:
//! a *split pattern* used to carve tags out of literal text, and a *match
//! pattern* with named captures used to extract the tag's operands.
//!
//! Built-in tags are registered first, in a fixed order that matters:
//! the ternary and function patterns must be tried before the plain
//! variable pattern, otherwise `{$a ? "y" : "n"}` would be classified as a
//! bare variable. Caller-registered custom tags append after the built-ins
//! and may not reuse an existing name.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{CompileError, Result};

/// A registered tag grammar.
///
/// Identity is the name; names are unique within a registry.
#[derive(Debug, Clone)]
pub struct TagDefinition {
    name: String,
    split: String,
    matcher: Regex,
}

impl TagDefinition {
    fn new(name: &str, split: &str, matches: &str) -> Result<Self> {
        // Validate the split pattern on its own before it ever reaches the
        // combined tokenizer regex.
        Regex::new(split).map_err(|source| CompileError::InvalidPattern {
            name: name.to_string(),
            source,
        })?;
        let matcher = Regex::new(&format!(r"\A(?s:{})\z", matches)).map_err(|source| {
            CompileError::InvalidPattern {
                name: name.to_string(),
                source,
            }
        })?;
        Ok(Self {
            name: name.to_string(),
            split: split.to_string(),
            matcher,
        })
    }

    /// Tag name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw split pattern, as fed to the combined tokenizer regex.
    pub fn split_pattern(&self) -> &str {
        &self.split
    }
}

/// Built-in tag grammars, in classification order.
///
/// Match patterns are anchored when compiled, so they describe the entire
/// tag text. Split patterns carry no capture groups; captures live in the
/// match patterns only.
static BUILTIN_TAGS: &[(&str, &str, &str)] = &[
    (
        "loop",
        r#"\{(?:loop|foreach)="[^"]+"(?:\s+as\s+\$[A-Za-z_]\w*(?:\s*=>\s*\$[A-Za-z_]\w*)?)?\s*\}"#,
        r#"\{(?:loop|foreach)="(?P<subject>[^"]+)"(?:\s+as\s+\$(?P<key>[A-Za-z_]\w*)(?:\s*=>\s*\$(?P<value>[A-Za-z_]\w*))?)?\s*\}"#,
    ),
    ("loop_close", r"\{/(?:loop|foreach)\}", r"\{/(?:loop|foreach)\}"),
    ("break", r"\{break\}", r"\{break\}"),
    ("continue", r"\{continue\}", r"\{continue\}"),
    (
        "if",
        r#"\{if="[^"]*"\}"#,
        r#"\{if="(?P<cond>[^"]*)"\}"#,
    ),
    (
        "elseif",
        r#"\{elseif="[^"]*"\}"#,
        r#"\{elseif="(?P<cond>[^"]*)"\}"#,
    ),
    ("else", r"\{else\}", r"\{else\}"),
    ("if_close", r"\{/if\}", r"\{/if\}"),
    (
        "autoescape",
        r#"\{autoescape="(?:on|off)"\}"#,
        r#"\{autoescape="(?P<mode>on|off)"\}"#,
    ),
    ("autoescape_close", r"\{/autoescape\}", r"\{/autoescape\}"),
    ("noparse", r"\{noparse\}", r"\{noparse\}"),
    ("noparse_close", r"\{/noparse\}", r"\{/noparse\}"),
    ("ignore", r"\{ignore\}", r"\{ignore\}"),
    ("ignore_close", r"\{/ignore\}", r"\{/ignore\}"),
    (
        "include",
        r#"\{include="[^"]+"\}"#,
        r#"\{include="(?P<target>[^"]+)"\}"#,
    ),
    (
        "function",
        r#"\{function="[^"]+"\}"#,
        r#"\{function="(?P<call>[^"]+)"\}"#,
    ),
    // Ternary must appear before the plain variable pattern.
    (
        "ternary",
        r"\{\$[^{}?]+\?[^{}:]+:[^{}]+\}",
        r"\{(?P<cond>\$[^{}?]+)\?(?P<then>[^{}:]+):(?P<otherwise>[^{}]+)\}",
    ),
    (
        "variable",
        r"\{\$[^{}]+\}",
        r"\{(?P<expr>\$[^{}]+)\}",
    ),
    (
        "constant",
        r"\{#[^{}#]+#?\}",
        r"\{#(?P<expr>[^{}#]+)#?\}",
    ),
];

static BUILTINS: Lazy<Vec<TagDefinition>> = Lazy::new(|| {
    BUILTIN_TAGS
        .iter()
        .map(|(name, split, matches)| {
            TagDefinition::new(name, split, matches).expect("built-in tag pattern")
        })
        .collect()
});

/// Ordered table of tag grammars.
#[derive(Debug, Clone)]
pub struct TagRegistry {
    tags: Vec<TagDefinition>,
}

impl TagRegistry {
    /// A registry pre-populated with the built-in tags.
    pub fn with_builtins() -> Self {
        Self {
            tags: BUILTINS.clone(),
        }
    }

    /// Registers a custom tag.
    ///
    /// The match pattern is anchored automatically; its capture groups are
    /// handed verbatim to the tag's render-time handler. Returns
    /// [`CompileError::DuplicateTag`] if the name is taken (built-ins
    /// included) and [`CompileError::InvalidPattern`] if either pattern
    /// does not compile.
    pub fn register(&mut self, name: &str, split: &str, matches: &str) -> Result<()> {
        if self.tags.iter().any(|t| t.name == name) {
            return Err(CompileError::DuplicateTag(name.to_string()));
        }
        self.tags.push(TagDefinition::new(name, split, matches)?);
        Ok(())
    }

    /// Split patterns in registration order, for the combined tokenizer
    /// regex.
    pub fn split_patterns(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(|t| t.split.as_str())
    }

    /// Finds the first tag whose match pattern covers `text` entirely.
    pub fn classify<'t>(&self, text: &'t str) -> Option<(&TagDefinition, regex::Captures<'t>)> {
        self.tags
            .iter()
            .find_map(|tag| tag.matcher.captures(text).map(|caps| (tag, caps)))
    }

    /// Number of registered tags.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// True if no tags are registered.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

impl Default for TagRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_present() {
        let registry = TagRegistry::with_builtins();
        assert_eq!(registry.len(), BUILTIN_TAGS.len());
    }

    #[test]
    fn duplicate_builtin_name_rejected() {
        let mut registry = TagRegistry::with_builtins();
        let err = registry.register("loop", r"\{x\}", r"\{x\}").unwrap_err();
        assert!(matches!(err, CompileError::DuplicateTag(name) if name == "loop"));
    }

    #[test]
    fn duplicate_custom_name_rejected() {
        let mut registry = TagRegistry::with_builtins();
        registry.register("hello", r"\{hello\}", r"\{hello\}").unwrap();
        let err = registry
            .register("hello", r"\{hello2\}", r"\{hello2\}")
            .unwrap_err();
        assert!(matches!(err, CompileError::DuplicateTag(_)));
    }

    #[test]
    fn invalid_pattern_rejected() {
        let mut registry = TagRegistry::with_builtins();
        let err = registry.register("bad", r"\{bad(\}", r"\{bad\}").unwrap_err();
        assert!(matches!(err, CompileError::InvalidPattern { name, .. } if name == "bad"));
    }

    mod classification {
        use super::*;

        fn classify_name(text: &str) -> Option<String> {
            let registry = TagRegistry::with_builtins();
            registry
                .classify(text)
                .map(|(tag, _)| tag.name().to_string())
        }

        #[test]
        fn loop_with_key_value() {
            let registry = TagRegistry::with_builtins();
            let (tag, caps) = registry
                .classify(r#"{loop="$items" as $k => $v}"#)
                .unwrap();
            assert_eq!(tag.name(), "loop");
            assert_eq!(&caps["subject"], "$items");
            assert_eq!(&caps["key"], "k");
            assert_eq!(&caps["value"], "v");
        }

        #[test]
        fn foreach_is_a_loop() {
            assert_eq!(
                classify_name(r#"{foreach="$rows"}"#),
                Some("loop".to_string())
            );
            assert_eq!(classify_name("{/foreach}"), Some("loop_close".to_string()));
        }

        #[test]
        fn ternary_wins_over_variable() {
            assert_eq!(
                classify_name(r#"{$ok ? "yes" : "no"}"#),
                Some("ternary".to_string())
            );
            assert_eq!(classify_name("{$name}"), Some("variable".to_string()));
        }

        #[test]
        fn variable_with_modifier_stays_a_variable() {
            assert_eq!(
                classify_name(r#"{$title|upper}"#),
                Some("variable".to_string())
            );
        }

        #[test]
        fn constant_with_trailing_hash() {
            let registry = TagRegistry::with_builtins();
            let (tag, caps) = registry.classify("{#VERSION#}").unwrap();
            assert_eq!(tag.name(), "constant");
            assert_eq!(&caps["expr"], "VERSION");
        }

        #[test]
        fn unknown_text_classifies_as_nothing() {
            assert_eq!(classify_name("{not a tag}"), None);
        }

        #[test]
        fn custom_tag_classifies_after_builtins() {
            let mut registry = TagRegistry::with_builtins();
            registry
                .register("hello", r"\{hello [a-z]+\}", r"\{hello (?P<who>[a-z]+)\}")
                .unwrap();
            let (tag, caps) = registry.classify("{hello world}").unwrap();
            assert_eq!(tag.name(), "hello");
            assert_eq!(&caps["who"], "world");
        }
    }
}
