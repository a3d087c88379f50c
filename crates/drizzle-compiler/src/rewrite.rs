//! Expression rewriter.
//!
//! Three rewrites are applied to template expressions before they are
//! emitted into the compiled program:
//!
//! 1. Dotted variable paths become uniform subscripts, so `$user.name` and
//!    `$user["name"]` are equivalent downstream.
//! 2. Pipe modifier chains expand into nested calls, left to right:
//!    `$x|mod_a:1|mod_b` becomes `mod_b(mod_a($x,1))`. A doubled pipe
//!    (`||`) is never treated as a modifier separator, so logical-or in
//!    conditions survives untouched.
//! 3. When escaping is enabled for the current scope and the expression is
//!    not an assignment, the result is wrapped in an explicit `escape(...)`
//!    call. Routing escaping through this one function keeps the security
//!    boundary auditable.

/// Rewrites `$var.prop` / `$var.0` chains into subscript form.
///
/// Existing bracket subscripts are preserved; their contents are rewritten
/// recursively so `$rows[$i.idx]` also normalizes. Dots inside string
/// literals and bare decimal numbers are untouched.
pub fn subscript_paths(expr: &str) -> String {
    let mut out = String::with_capacity(expr.len());
    let chars: Vec<char> = expr.chars().collect();
    let mut i = 0;
    let mut chain_active = false;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                chain_active = false;
                let quote = c;
                out.push(c);
                i += 1;
                while i < chars.len() {
                    out.push(chars[i]);
                    if chars[i] == '\\' && i + 1 < chars.len() {
                        i += 1;
                        out.push(chars[i]);
                    } else if chars[i] == quote {
                        i += 1;
                        break;
                    }
                    i += 1;
                }
            }
            '$' if i + 1 < chars.len() && is_ident_start(chars[i + 1]) => {
                out.push('$');
                i += 1;
                while i < chars.len() && is_ident_char(chars[i]) {
                    out.push(chars[i]);
                    i += 1;
                }
                chain_active = true;
            }
            '.' if chain_active
                && i + 1 < chars.len()
                && (is_ident_char(chars[i + 1])) =>
            {
                let mut segment = String::new();
                i += 1;
                while i < chars.len() && is_ident_char(chars[i]) {
                    segment.push(chars[i]);
                    i += 1;
                }
                if segment.chars().all(|c| c.is_ascii_digit()) {
                    out.push_str(&format!("[{}]", segment));
                } else {
                    out.push_str(&format!("[\"{}\"]", segment));
                }
            }
            '[' if chain_active => {
                // Copy the bracket group, rewriting its interior.
                let mut depth = 1;
                let mut inner = String::new();
                i += 1;
                while i < chars.len() && depth > 0 {
                    match chars[i] {
                        '[' => depth += 1,
                        ']' => depth -= 1,
                        _ => {}
                    }
                    if depth > 0 {
                        inner.push(chars[i]);
                    }
                    i += 1;
                }
                out.push('[');
                out.push_str(&subscript_paths(&inner));
                out.push(']');
            }
            _ => {
                chain_active = false;
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Splits `expr` on top-level single pipes, skipping `||`, quoted strings
/// and bracketed groups. The first element is the base expression, the rest
/// are modifier applications.
pub fn split_modifiers(expr: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut cur = String::new();
    let chars: Vec<char> = expr.chars().collect();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match quote {
            Some(q) => {
                cur.push(c);
                if c == '\\' && i + 1 < chars.len() {
                    i += 1;
                    cur.push(chars[i]);
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    cur.push(c);
                }
                '(' | '[' => {
                    depth += 1;
                    cur.push(c);
                }
                ')' | ']' => {
                    depth -= 1;
                    cur.push(c);
                }
                '|' if depth == 0 => {
                    if chars.get(i + 1) == Some(&'|') {
                        cur.push_str("||");
                        i += 1;
                    } else {
                        parts.push(cur.trim().to_string());
                        cur = String::new();
                    }
                }
                _ => cur.push(c),
            },
        }
        i += 1;
    }
    parts.push(cur.trim().to_string());
    parts
}

/// Expands a pipe modifier chain into nested calls.
///
/// `expr` should already be in subscript form. Each modifier is
/// `name:arg1,arg2`; the accumulated expression becomes the first argument.
pub fn expand_modifiers(expr: &str) -> String {
    let parts = split_modifiers(expr);
    let mut acc = parts[0].clone();
    for modifier in &parts[1..] {
        let (name, args) = match modifier.split_once(':') {
            Some((name, args)) => (name.trim(), args.trim()),
            None => (modifier.as_str(), ""),
        };
        acc = if args.is_empty() {
            format!("{}({})", name, acc)
        } else {
            format!("{}({},{})", name, acc, args)
        };
    }
    acc
}

/// True if `expr` carries at least one modifier pipe.
pub fn has_modifiers(expr: &str) -> bool {
    split_modifiers(expr).len() > 1
}

/// Finds the position of a top-level assignment `=` in `expr`, if any.
///
/// Comparison (`==`, `!=`, `>=`, `<=`) and arrow (`=>`) forms do not count.
pub fn assignment_position(expr: &str) -> Option<usize> {
    let bytes = expr.as_bytes();
    let mut depth = 0i32;
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
                b'(' | b'[' => depth += 1,
                b')' | b']' => depth -= 1,
                b'=' if depth == 0 => {
                    let prev = i.checked_sub(1).map(|p| bytes[p]);
                    let next = bytes.get(i + 1).copied();
                    let comparison = matches!(prev, Some(b'=') | Some(b'!') | Some(b'<') | Some(b'>'))
                        || next == Some(b'=')
                        || next == Some(b'>');
                    if !comparison {
                        return Some(i);
                    }
                }
                _ => {}
            },
        }
        i += 1;
    }
    None
}

/// Full value rewrite: subscripts, then modifiers, then optional escaping.
///
/// Assignments are never escaped; conditions call this with
/// `escaping = false`.
pub fn rewrite_value(expr: &str, escaping: bool) -> String {
    let rewritten = expand_modifiers(&subscript_paths(expr));
    wrap_escape(&rewritten, escaping)
}

/// Wraps an already-rewritten expression in `escape(...)` when enabled.
pub fn wrap_escape(rewritten: &str, escaping: bool) -> String {
    if escaping {
        format!("escape({})", rewritten)
    } else {
        rewritten.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod subscripts {
        use super::*;

        #[test]
        fn dotted_path_becomes_subscripts() {
            assert_eq!(subscript_paths("$user.name"), r#"$user["name"]"#);
            assert_eq!(
                subscript_paths("$a.b.c"),
                r#"$a["b"]["c"]"#
            );
        }

        #[test]
        fn numeric_segment_becomes_index() {
            assert_eq!(subscript_paths("$items.0"), "$items[0]");
            assert_eq!(subscript_paths("$items.0.name"), r#"$items[0]["name"]"#);
        }

        #[test]
        fn bracket_form_is_preserved() {
            assert_eq!(subscript_paths(r#"$a["b"]"#), r#"$a["b"]"#);
        }

        #[test]
        fn mixed_bracket_then_dot() {
            assert_eq!(subscript_paths("$a[0].b"), r#"$a[0]["b"]"#);
        }

        #[test]
        fn nested_variable_in_subscript_rewritten() {
            assert_eq!(subscript_paths("$rows[$i.idx]"), r#"$rows[$i["idx"]]"#);
        }

        #[test]
        fn decimal_numbers_untouched() {
            assert_eq!(subscript_paths("$x > 1.5"), "$x > 1.5");
        }

        #[test]
        fn dots_inside_strings_untouched() {
            assert_eq!(
                subscript_paths(r#"$x == "a.b.c""#),
                r#"$x == "a.b.c""#
            );
        }
    }

    mod modifiers {
        use super::*;

        #[test]
        fn single_modifier() {
            assert_eq!(expand_modifiers("$x|upper"), "upper($x)");
        }

        #[test]
        fn modifier_with_args() {
            assert_eq!(
                expand_modifiers(r#"$x|truncate:10,"...""#),
                r#"truncate($x,10,"...")"#
            );
        }

        #[test]
        fn chain_nests_left_to_right() {
            assert_eq!(
                expand_modifiers("$x|lower|trim"),
                "trim(lower($x))"
            );
        }

        #[test]
        fn double_pipe_is_not_a_separator() {
            assert_eq!(expand_modifiers("$a || $b"), "$a || $b");
            assert!(!has_modifiers("$a || $b"));
        }

        #[test]
        fn pipe_inside_string_ignored() {
            assert_eq!(expand_modifiers(r#""a|b""#), r#""a|b""#);
        }

        #[test]
        fn pipe_after_logical_or_still_splits() {
            assert!(has_modifiers("$a || $b|upper"));
        }
    }

    mod assignment {
        use super::*;

        #[test]
        fn plain_assignment_found() {
            assert_eq!(assignment_position("$x = 1"), Some(3));
        }

        #[test]
        fn comparisons_are_not_assignments() {
            assert_eq!(assignment_position("$x == 1"), None);
            assert_eq!(assignment_position("$x != 1"), None);
            assert_eq!(assignment_position("$x >= 1"), None);
            assert_eq!(assignment_position("$x <= 1"), None);
        }

        #[test]
        fn arrow_is_not_assignment() {
            assert_eq!(assignment_position("$k => $v"), None);
        }

        #[test]
        fn equals_in_string_ignored() {
            assert_eq!(assignment_position(r#"$x == "a=b""#), None);
        }
    }

    mod escaping {
        use super::*;

        #[test]
        fn wraps_when_enabled() {
            assert_eq!(rewrite_value("$x", true), "escape($x)");
        }

        #[test]
        fn raw_when_disabled() {
            assert_eq!(rewrite_value("$x", false), "$x");
        }

        #[test]
        fn modifiers_expand_inside_escape() {
            assert_eq!(
                rewrite_value("$user.name|upper", true),
                r#"escape(upper($user["name"]))"#
            );
        }
    }
}
