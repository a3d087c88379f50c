//! Compiled program parsing.
//!
//! A compiled template is literal text interleaved with `<?r ... ?>`
//! directives. This module parses that text into a block-structured node
//! tree: `if`/`elseif`/`else` arms and loop bodies are matched here, so
//! execution is a plain tree walk with no jump bookkeeping.

use crate::error::{RenderError, Result};

/// One node of a parsed program.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Literal output text.
    Text(String),
    /// Evaluate and print an expression.
    Print(String),
    /// Assign an expression into the render scope.
    Set { target: String, expr: String },
    /// Conditional chain; at most one trailing arm has no condition.
    If { arms: Vec<IfArm> },
    /// Guarded iteration.
    Loop(LoopNode),
    /// Leave the innermost loop.
    Break,
    /// Skip to the innermost loop's next iteration.
    Continue,
    /// Include a template by compile-time resolved path.
    IncludeStatic(String),
    /// Include a template by render-time evaluated path expression.
    IncludeDynamic(String),
    /// Invoke a registered custom tag handler with its captures.
    TagCall { name: String, args: Vec<String> },
}

/// One arm of a conditional chain. `cond: None` is the `else` arm.
#[derive(Debug, Clone, PartialEq)]
pub struct IfArm {
    pub cond: Option<String>,
    pub body: Vec<Node>,
}

/// A loop block with its per-level variable names.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopNode {
    pub subject: String,
    pub key: String,
    pub value: String,
    pub counter: String,
    pub body: Vec<Node>,
}

const OPEN: &str = "<?r";
const CLOSE: &str = "?>";

enum RawItem<'a> {
    Text(&'a str),
    Dir(&'a str),
}

fn scan(code: &str) -> Result<Vec<RawItem<'_>>> {
    let mut items = Vec::new();
    let mut cursor = 0;
    while let Some(start) = code[cursor..].find(OPEN) {
        let abs = cursor + start;
        if abs > cursor {
            items.push(RawItem::Text(&code[cursor..abs]));
        }
        let body_start = abs + OPEN.len();
        let end = code[body_start..]
            .find(CLOSE)
            .ok_or_else(|| RenderError::Program("unterminated directive".to_string()))?;
        items.push(RawItem::Dir(code[body_start..body_start + end].trim()));
        cursor = body_start + end + CLOSE.len();
    }
    if cursor < code.len() {
        items.push(RawItem::Text(&code[cursor..]));
    }
    Ok(items)
}

/// Parses compiled program text into a node tree.
pub fn parse_program(code: &str) -> Result<Vec<Node>> {
    let items = scan(code)?;
    let mut pos = 0;
    let (nodes, terminator) = build(&items, &mut pos, &[])?;
    if let Some(t) = terminator {
        return Err(RenderError::Program(format!("unexpected '{}'", t)));
    }
    Ok(nodes)
}

/// Builds nodes until one of `stops` (a directive keyword) or end of input.
/// Returns the stopping keyword's directive text, if any.
fn build<'a>(
    items: &[RawItem<'a>],
    pos: &mut usize,
    stops: &[&str],
) -> Result<(Vec<Node>, Option<&'a str>)> {
    let mut nodes = Vec::new();

    while *pos < items.len() {
        match &items[*pos] {
            RawItem::Text(text) => {
                nodes.push(Node::Text((*text).to_string()));
                *pos += 1;
            }
            RawItem::Dir(dir) => {
                let keyword = dir.split_whitespace().next().unwrap_or("");
                if stops.contains(&keyword) {
                    let dir = *dir;
                    *pos += 1;
                    return Ok((nodes, Some(dir)));
                }
                *pos += 1;
                nodes.push(parse_directive(dir, items, pos)?);
            }
        }
    }
    if stops.is_empty() {
        Ok((nodes, None))
    } else {
        Err(RenderError::Program(format!(
            "missing closing directive (expected one of {:?})",
            stops
        )))
    }
}

fn parse_directive(dir: &str, items: &[RawItem<'_>], pos: &mut usize) -> Result<Node> {
    if let Some(expr) = dir.strip_prefix("print ") {
        return Ok(Node::Print(expr.trim().to_string()));
    }
    if let Some(rest) = dir.strip_prefix("set ") {
        let eq = top_level_assign(rest).ok_or_else(|| {
            RenderError::Program(format!("malformed set directive: {}", rest))
        })?;
        return Ok(Node::Set {
            target: rest[..eq].trim().to_string(),
            expr: rest[eq + 1..].trim().to_string(),
        });
    }
    if let Some(cond) = dir.strip_prefix("if ") {
        return parse_if(cond.trim().to_string(), items, pos);
    }
    if let Some(rest) = dir.strip_prefix("loop ") {
        return parse_loop(rest, items, pos);
    }
    if dir == "break" {
        return Ok(Node::Break);
    }
    if dir == "continue" {
        return Ok(Node::Continue);
    }
    if let Some(rest) = dir.strip_prefix("include ") {
        let rest = rest.trim();
        return if rest.starts_with('"') {
            let (path, _) = parse_quoted(rest)?;
            Ok(Node::IncludeStatic(path))
        } else {
            Ok(Node::IncludeDynamic(rest.to_string()))
        };
    }
    if let Some(rest) = dir.strip_prefix("tag ") {
        let mut words = rest.trim().splitn(2, char::is_whitespace);
        let name = words
            .next()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| RenderError::Program("tag directive without name".to_string()))?
            .to_string();
        let mut args = Vec::new();
        let mut remaining = words.next().unwrap_or("").trim();
        while !remaining.is_empty() {
            let (arg, rest) = parse_quoted(remaining)?;
            args.push(arg);
            remaining = rest.trim_start();
        }
        return Ok(Node::TagCall { name, args });
    }
    Err(RenderError::Program(format!("unknown directive: {}", dir)))
}

fn parse_if(first_cond: String, items: &[RawItem<'_>], pos: &mut usize) -> Result<Node> {
    let mut arms = Vec::new();
    let mut cond = Some(first_cond);
    loop {
        let (body, terminator) = build(items, pos, &["elseif", "else", "endif"])?;
        let terminator =
            terminator.ok_or_else(|| RenderError::Program("unclosed if block".to_string()))?;
        arms.push(IfArm {
            cond: cond.take(),
            body,
        });
        if let Some(next) = terminator.strip_prefix("elseif ") {
            cond = Some(next.trim().to_string());
        } else if terminator == "else" {
            let (body, terminator) = build(items, pos, &["endif"])?;
            if terminator.is_none() {
                return Err(RenderError::Program("unclosed else block".to_string()));
            }
            arms.push(IfArm { cond: None, body });
            return Ok(Node::If { arms });
        } else {
            return Ok(Node::If { arms });
        }
    }
}

fn parse_loop(rest: &str, items: &[RawItem<'_>], pos: &mut usize) -> Result<Node> {
    // loop key $k value $v counter $c in SUBJECT
    let malformed = || RenderError::Program(format!("malformed loop directive: {}", rest));
    let rest = rest.trim();
    let rest = rest.strip_prefix("key ").ok_or_else(malformed)?;
    let (key, rest) = take_var(rest).ok_or_else(malformed)?;
    let rest = rest.trim_start().strip_prefix("value ").ok_or_else(malformed)?;
    let (value, rest) = take_var(rest).ok_or_else(malformed)?;
    let rest = rest
        .trim_start()
        .strip_prefix("counter ")
        .ok_or_else(malformed)?;
    let (counter, rest) = take_var(rest).ok_or_else(malformed)?;
    let subject = rest.trim_start().strip_prefix("in ").ok_or_else(malformed)?;

    let (body, terminator) = build(items, pos, &["endloop"])?;
    if terminator.is_none() {
        return Err(RenderError::Program("unclosed loop block".to_string()));
    }
    Ok(Node::Loop(LoopNode {
        subject: subject.trim().to_string(),
        key,
        value,
        counter,
        body,
    }))
}

/// Reads a `$name` variable; returns the bare name and the remainder.
fn take_var(s: &str) -> Option<(String, &str)> {
    let rest = s.strip_prefix('$')?;
    let end = rest
        .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .unwrap_or(rest.len());
    if end == 0 {
        return None;
    }
    Some((rest[..end].to_string(), &rest[end..]))
}

/// Parses one double-quoted string with backslash escapes; returns the
/// unescaped content and the remainder.
fn parse_quoted(s: &str) -> Result<(String, &str)> {
    let inner = s
        .strip_prefix('"')
        .ok_or_else(|| RenderError::Program(format!("expected quoted string at: {}", s)))?;
    let mut out = String::new();
    let mut chars = inner.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                if let Some((_, next)) = chars.next() {
                    out.push(next);
                }
            }
            '"' => return Ok((out, &inner[i + 1..])),
            _ => out.push(c),
        }
    }
    Err(RenderError::Program("unterminated quoted string".to_string()))
}

/// Position of the assignment `=` in a set directive body, skipping `==`
/// and quoted strings.
fn top_level_assign(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'\'' | b'"' => quote = Some(b),
                b'=' if bytes.get(i + 1) != Some(&b'=')
                    && i.checked_sub(1).map(|p| bytes[p]) != Some(b'=')
                    && i.checked_sub(1).map(|p| bytes[p]) != Some(b'!')
                    && i.checked_sub(1).map(|p| bytes[p]) != Some(b'<')
                    && i.checked_sub(1).map(|p| bytes[p]) != Some(b'>') =>
                {
                    return Some(i);
                }
                _ => {}
            },
        }
        i += 1;
    }
    None
}
