//! Tokenizer: splits template source into literal text and tag tokens.
//!
//! A single combined regex built from the registry's split patterns drives
//! one linear pass over the source. Text between matches becomes
//! [`Token::Literal`]; each match is classified back through the registry's
//! match patterns into a [`TagKind`]. Anything brace-like that fits no
//! registered pattern stays literal, so arbitrary `{...}` content passes
//! through untouched.
//!
//! Tokenization is lossless: concatenating every literal segment and every
//! tag's raw text reproduces the input.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{CompileError, Result};
use crate::registry::TagRegistry;

/// One segment of tokenized source.
#[derive(Debug, Clone, PartialEq)]
pub enum Token<'a> {
    /// Literal output text, emitted as-is.
    Literal(&'a str),
    /// A recognized tag directive.
    Tag(TagToken<'a>),
}

/// A recognized tag with its raw text and byte offset.
#[derive(Debug, Clone, PartialEq)]
pub struct TagToken<'a> {
    /// The tag text exactly as written.
    pub raw: &'a str,
    /// Byte offset of the tag in the tokenized source.
    pub offset: usize,
    /// Classified directive.
    pub kind: TagKind,
}

/// Closed set of directives the compile state machine consumes.
///
/// Custom tags carry their full regex capture set; everything else is
/// decomposed into its operands here so the state machine can match
/// exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum TagKind {
    LoopOpen {
        subject: String,
        key: Option<String>,
        value: Option<String>,
    },
    LoopClose,
    Break,
    Continue,
    If { cond: String },
    ElseIf { cond: String },
    Else,
    IfClose,
    Autoescape { on: bool },
    AutoescapeClose,
    Noparse,
    NoparseClose,
    Ignore,
    IgnoreClose,
    Include { target: String },
    Function { call: String },
    Ternary {
        cond: String,
        then: String,
        otherwise: String,
    },
    Variable { expr: String },
    Constant { expr: String },
    Custom { name: String, captures: Vec<String> },
}

/// Strips `{* ... *}` template comments and, when `remove_html` is set,
/// `<!-- ... -->` HTML comments.
///
/// Runs before tokenization, so comment syntax is removed even inside
/// `{noparse}` regions; the raw passthrough starts only once the region
/// is tokenized.
pub fn strip_comments(source: &str, remove_html: bool) -> String {
    static TPL_COMMENT: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?s)\{\*.*?\*\}").expect("comment pattern"));
    static HTML_COMMENT: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("comment pattern"));

    let stripped = TPL_COMMENT.replace_all(source, "");
    if remove_html {
        HTML_COMMENT.replace_all(&stripped, "").into_owned()
    } else {
        stripped.into_owned()
    }
}

/// Builds the combined split regex from a registry's patterns.
///
/// Each pattern becomes one alternation branch, in registration order; the
/// regex crate's leftmost-first alternation preserves the registry's
/// precedence (ternary before variable, built-ins before custom tags).
pub fn build_split_regex(registry: &TagRegistry) -> Result<Regex> {
    let combined = registry
        .split_patterns()
        .map(|p| format!("(?:{})", p))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!("(?s){}", combined)).map_err(|source| CompileError::InvalidPattern {
        name: "combined".to_string(),
        source,
    })
}

/// Tokenizes `source` against `registry` using a pre-built split regex.
pub fn tokenize<'a>(
    source: &'a str,
    registry: &TagRegistry,
    split_re: &Regex,
) -> Vec<Token<'a>> {
    let mut tokens = Vec::new();
    let mut cursor = 0;

    for m in split_re.find_iter(source) {
        if m.start() > cursor {
            tokens.push(Token::Literal(&source[cursor..m.start()]));
        }
        match classify(registry, m.as_str()) {
            Some(kind) => tokens.push(Token::Tag(TagToken {
                raw: m.as_str(),
                offset: m.start(),
                kind,
            })),
            // A split pattern matched but no match pattern covers the text.
            // Forward-compatible fallback: keep it literal.
            None => tokens.push(Token::Literal(m.as_str())),
        }
        cursor = m.end();
    }
    if cursor < source.len() {
        tokens.push(Token::Literal(&source[cursor..]));
    }
    tokens
}

fn classify(registry: &TagRegistry, text: &str) -> Option<TagKind> {
    let (tag, caps) = registry.classify(text)?;
    let owned = |name: &str| caps.name(name).map(|m| m.as_str().trim().to_string());

    let kind = match tag.name() {
        "loop" => TagKind::LoopOpen {
            subject: owned("subject").unwrap_or_default(),
            key: owned("key"),
            value: owned("value"),
        },
        "loop_close" => TagKind::LoopClose,
        "break" => TagKind::Break,
        "continue" => TagKind::Continue,
        "if" => TagKind::If {
            cond: owned("cond").unwrap_or_default(),
        },
        "elseif" => TagKind::ElseIf {
            cond: owned("cond").unwrap_or_default(),
        },
        "else" => TagKind::Else,
        "if_close" => TagKind::IfClose,
        "autoescape" => TagKind::Autoescape {
            on: owned("mode").as_deref() == Some("on"),
        },
        "autoescape_close" => TagKind::AutoescapeClose,
        "noparse" => TagKind::Noparse,
        "noparse_close" => TagKind::NoparseClose,
        "ignore" => TagKind::Ignore,
        "ignore_close" => TagKind::IgnoreClose,
        "include" => TagKind::Include {
            target: owned("target").unwrap_or_default(),
        },
        "function" => TagKind::Function {
            call: owned("call").unwrap_or_default(),
        },
        "ternary" => TagKind::Ternary {
            cond: owned("cond").unwrap_or_default(),
            then: owned("then").unwrap_or_default(),
            otherwise: owned("otherwise").unwrap_or_default(),
        },
        "variable" => TagKind::Variable {
            expr: owned("expr").unwrap_or_default(),
        },
        "constant" => TagKind::Constant {
            expr: owned("expr").unwrap_or_default(),
        },
        name => TagKind::Custom {
            name: name.to_string(),
            captures: (0..caps.len())
                .map(|i| caps.get(i).map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect(),
        },
    };
    Some(kind)
}

/// 1-based source line of a byte offset.
pub fn line_at(source: &str, offset: usize) -> usize {
    let end = offset.min(source.len());
    source[..end].bytes().filter(|&b| b == b'\n').count() + 1
}
