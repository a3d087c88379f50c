//! Builtin render-time functions.
//!
//! These back the modifier syntax (`{$x|upper}` compiles to a call to
//! `upper`) plus `escape`, which the compiler inserts for autoescaped
//! output. Hosts extend the table through [`Renderer::register_function`].
//!
//! [`Renderer::register_function`]: crate::Renderer::register_function

use std::collections::HashMap;

use serde_json::Value;

use crate::error::Result;
use crate::eval::RuntimeFn;
use crate::value::{as_number, format_value, number, truthy};

/// Builds the default function table.
pub fn default_functions() -> HashMap<String, RuntimeFn> {
    let mut table: HashMap<String, RuntimeFn> = HashMap::new();
    table.insert("escape".to_string(), Box::new(escape));
    table.insert("upper".to_string(), Box::new(upper));
    table.insert("lower".to_string(), Box::new(lower));
    table.insert("length".to_string(), Box::new(length));
    table.insert("trim".to_string(), Box::new(trim));
    table.insert("default".to_string(), Box::new(default_fn));
    table.insert("replace".to_string(), Box::new(replace));
    table.insert("truncate".to_string(), Box::new(truncate));
    table
}

/// HTML-escapes the rendered form of the first argument.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Null)
}

fn escape(args: &[Value]) -> Result<Value> {
    Ok(Value::String(escape_html(&format_value(&arg(args, 0)))))
}

fn upper(args: &[Value]) -> Result<Value> {
    Ok(Value::String(format_value(&arg(args, 0)).to_uppercase()))
}

fn lower(args: &[Value]) -> Result<Value> {
    Ok(Value::String(format_value(&arg(args, 0)).to_lowercase()))
}

fn length(args: &[Value]) -> Result<Value> {
    let n = match &arg(args, 0) {
        Value::String(s) => s.chars().count(),
        Value::Array(a) => a.len(),
        Value::Object(o) => o.len(),
        Value::Null => 0,
        other => format_value(other).chars().count(),
    };
    Ok(number(n as f64))
}

fn trim(args: &[Value]) -> Result<Value> {
    Ok(Value::String(format_value(&arg(args, 0)).trim().to_string()))
}

/// Falls back to the second argument when the first is empty or null.
fn default_fn(args: &[Value]) -> Result<Value> {
    let value = arg(args, 0);
    if truthy(&value) {
        Ok(value)
    } else {
        Ok(arg(args, 1))
    }
}

fn replace(args: &[Value]) -> Result<Value> {
    let subject = format_value(&arg(args, 0));
    let from = format_value(&arg(args, 1));
    let to = format_value(&arg(args, 2));
    if from.is_empty() {
        return Ok(Value::String(subject));
    }
    Ok(Value::String(subject.replace(&from, &to)))
}

fn truncate(args: &[Value]) -> Result<Value> {
    let subject = format_value(&arg(args, 0));
    let limit = as_number(&arg(args, 1)).unwrap_or(0.0).max(0.0) as usize;
    if subject.chars().count() <= limit {
        return Ok(Value::String(subject));
    }
    let cut: String = subject.chars().take(limit).collect();
    Ok(Value::String(format!("{}...", cut)))
}
