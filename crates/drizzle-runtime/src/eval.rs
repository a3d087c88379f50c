//! Expression evaluation.
//!
//! The compiler normalizes every template expression before emission, so
//! the grammar here is small: literals, `$var` lookups, subscripts,
//! arithmetic, comparisons, boolean operators, the ternary and function
//! calls against a registered function table. A hand-rolled lexer feeds a
//! precedence-climbing parser that evaluates as it goes; expressions are
//! short enough that no separate AST pays for itself.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{RenderError, Result};
use crate::value::{as_number, number, truthy};

/// Signature for registered render-time functions (modifiers, `escape`,
/// user functions).
pub type RuntimeFn = Box<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// Evaluation environment: the data root, loop/assignment locals and the
/// registered function and constant tables.
pub struct Env<'a> {
    pub data: &'a Value,
    pub locals: HashMap<String, Value>,
    pub functions: &'a HashMap<String, RuntimeFn>,
    pub constants: &'a HashMap<String, Value>,
}

impl Env<'_> {
    /// Resolves `$name`: locals shadow the data root; unknown names are
    /// null, never an error.
    pub fn lookup_var(&self, name: &str) -> Value {
        if let Some(v) = self.locals.get(name) {
            return v.clone();
        }
        self.data.get(name).cloned().unwrap_or(Value::Null)
    }
}

/// Evaluates one expression against an environment.
pub fn eval(expr: &str, env: &Env<'_>) -> Result<Value> {
    let tokens = lex(expr)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        env,
        src: expr,
    };
    let value = parser.ternary()?;
    if parser.pos != parser.tokens.len() {
        return Err(RenderError::Expr(format!(
            "trailing input in expression: {}",
            expr
        )));
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Var(String),
    Ident(String),
    Num(f64),
    Str(String),
    True,
    False,
    Null,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Question,
    Colon,
    EqEq,
    NotEq,
    Ge,
    Le,
    Gt,
    Lt,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    AndAnd,
    OrOr,
    Not,
}

fn lex(expr: &str) -> Result<Vec<Tok>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = expr.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '$' => {
                i += 1;
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                if start == i {
                    return Err(RenderError::Expr(format!("bare '$' in: {}", expr)));
                }
                tokens.push(Tok::Var(chars[start..i].iter().collect()));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Tok::True,
                    "false" => Tok::False,
                    "null" => Tok::Null,
                    _ => Tok::Ident(word),
                });
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse()
                    .map_err(|_| RenderError::Expr(format!("bad number '{}'", text)))?;
                tokens.push(Tok::Num(n));
            }
            '\'' | '"' => {
                let quote = c;
                i += 1;
                let mut s = String::new();
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(RenderError::Expr(format!(
                                "unterminated string in: {}",
                                expr
                            )))
                        }
                        Some('\\') => {
                            if let Some(&next) = chars.get(i + 1) {
                                s.push(next);
                                i += 2;
                            } else {
                                i += 1;
                            }
                        }
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Tok::Str(s));
            }
            '(' => {
                tokens.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Tok::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Tok::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Tok::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Tok::Comma);
                i += 1;
            }
            '?' => {
                tokens.push(Tok::Question);
                i += 1;
            }
            ':' => {
                tokens.push(Tok::Colon);
                i += 1;
            }
            '+' => {
                tokens.push(Tok::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Tok::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Tok::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Tok::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Tok::Percent);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Tok::EqEq);
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Tok::NotEq);
                i += 2;
            }
            '!' => {
                tokens.push(Tok::Not);
                i += 1;
            }
            '>' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Tok::Ge);
                i += 2;
            }
            '<' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Tok::Le);
                i += 2;
            }
            '>' => {
                tokens.push(Tok::Gt);
                i += 1;
            }
            '<' => {
                tokens.push(Tok::Lt);
                i += 1;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Tok::AndAnd);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Tok::OrOr);
                i += 2;
            }
            other => {
                return Err(RenderError::Expr(format!(
                    "unexpected character '{}' in: {}",
                    other, expr
                )))
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a, 'e> {
    tokens: Vec<Tok>,
    pos: usize,
    env: &'a Env<'e>,
    src: &'a str,
}

impl Parser<'_, '_> {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Tok> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Tok) -> Result<()> {
        if self.eat(&tok) {
            Ok(())
        } else {
            Err(RenderError::Expr(format!(
                "expected {:?} in: {}",
                tok, self.src
            )))
        }
    }

    fn ternary(&mut self) -> Result<Value> {
        let cond = self.or()?;
        if self.eat(&Tok::Question) {
            let then = self.ternary()?;
            self.expect(Tok::Colon)?;
            let otherwise = self.ternary()?;
            return Ok(if truthy(&cond) { then } else { otherwise });
        }
        Ok(cond)
    }

    fn or(&mut self) -> Result<Value> {
        let mut left = self.and()?;
        while self.eat(&Tok::OrOr) {
            let right = self.and()?;
            left = Value::Bool(truthy(&left) || truthy(&right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Value> {
        let mut left = self.equality()?;
        while self.eat(&Tok::AndAnd) {
            let right = self.equality()?;
            left = Value::Bool(truthy(&left) && truthy(&right));
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Value> {
        let mut left = self.comparison()?;
        loop {
            if self.eat(&Tok::EqEq) {
                let right = self.comparison()?;
                left = Value::Bool(values_equal(&left, &right));
            } else if self.eat(&Tok::NotEq) {
                let right = self.comparison()?;
                left = Value::Bool(!values_equal(&left, &right));
            } else {
                return Ok(left);
            }
        }
    }

    fn comparison(&mut self) -> Result<Value> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Gt) => ">",
                Some(Tok::Lt) => "<",
                Some(Tok::Ge) => ">=",
                Some(Tok::Le) => "<=",
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.additive()?;
            left = Value::Bool(compare(&left, &right, op));
        }
    }

    fn additive(&mut self) -> Result<Value> {
        let mut left = self.multiplicative()?;
        loop {
            if self.eat(&Tok::Plus) {
                let right = self.multiplicative()?;
                left = add(&left, &right);
            } else if self.eat(&Tok::Minus) {
                let right = self.multiplicative()?;
                left = arith(&left, &right, |a, b| a - b);
            } else {
                return Ok(left);
            }
        }
    }

    fn multiplicative(&mut self) -> Result<Value> {
        let mut left = self.unary()?;
        loop {
            if self.eat(&Tok::Star) {
                let right = self.unary()?;
                left = arith(&left, &right, |a, b| a * b);
            } else if self.eat(&Tok::Slash) {
                let right = self.unary()?;
                left = arith(&left, &right, |a, b| a / b);
            } else if self.eat(&Tok::Percent) {
                let right = self.unary()?;
                left = arith(&left, &right, |a, b| a % b);
            } else {
                return Ok(left);
            }
        }
    }

    fn unary(&mut self) -> Result<Value> {
        if self.eat(&Tok::Not) {
            let v = self.unary()?;
            return Ok(Value::Bool(!truthy(&v)));
        }
        if self.eat(&Tok::Minus) {
            let v = self.unary()?;
            let n = as_number(&v).unwrap_or(0.0);
            return Ok(number(-n));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Value> {
        let mut value = self.primary()?;
        while self.eat(&Tok::LBracket) {
            let index = self.ternary()?;
            self.expect(Tok::RBracket)?;
            value = subscript(&value, &index);
        }
        Ok(value)
    }

    fn primary(&mut self) -> Result<Value> {
        match self.bump() {
            Some(Tok::Num(n)) => Ok(number(n)),
            Some(Tok::Str(s)) => Ok(Value::String(s)),
            Some(Tok::True) => Ok(Value::Bool(true)),
            Some(Tok::False) => Ok(Value::Bool(false)),
            Some(Tok::Null) => Ok(Value::Null),
            Some(Tok::Var(name)) => Ok(self.env.lookup_var(&name)),
            Some(Tok::Ident(name)) => {
                self.expect(Tok::LParen)?;
                let mut args = Vec::new();
                if !self.eat(&Tok::RParen) {
                    loop {
                        args.push(self.ternary()?);
                        if !self.eat(&Tok::Comma) {
                            break;
                        }
                    }
                    self.expect(Tok::RParen)?;
                }
                self.call(&name, &args)
            }
            Some(Tok::LParen) => {
                let v = self.ternary()?;
                self.expect(Tok::RParen)?;
                Ok(v)
            }
            other => Err(RenderError::Expr(format!(
                "unexpected token {:?} in: {}",
                other, self.src
            ))),
        }
    }

    fn call(&mut self, name: &str, args: &[Value]) -> Result<Value> {
        // Constant lookup compiles to a `const("NAME")` call.
        if name == "const" {
            let key = match args.first() {
                Some(Value::String(s)) => s.clone(),
                _ => return Err(RenderError::Expr("const() expects a name".to_string())),
            };
            return self
                .env
                .constants
                .get(&key)
                .cloned()
                .ok_or(RenderError::UnknownConstant(key));
        }
        let f = self
            .env
            .functions
            .get(name)
            .ok_or_else(|| RenderError::UnknownFunction(name.to_string()))?;
        f(args)
    }
}

fn subscript(value: &Value, index: &Value) -> Value {
    match (value, index) {
        (Value::Object(map), Value::String(key)) => map.get(key).cloned().unwrap_or(Value::Null),
        (Value::Object(map), other) => {
            let key = crate::value::format_value(other);
            map.get(&key).cloned().unwrap_or(Value::Null)
        }
        (Value::Array(arr), idx) => as_number(idx)
            .and_then(|n| arr.get(n as usize))
            .cloned()
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x == y;
    }
    a == b
}

fn compare(a: &Value, b: &Value, op: &str) -> bool {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return match op {
            ">" => x > y,
            "<" => x < y,
            ">=" => x >= y,
            _ => x <= y,
        };
    }
    let (x, y) = (crate::value::format_value(a), crate::value::format_value(b));
    match op {
        ">" => x > y,
        "<" => x < y,
        ">=" => x >= y,
        _ => x <= y,
    }
}

/// `+` adds numbers and concatenates anything else.
fn add(a: &Value, b: &Value) -> Value {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return number(x + y);
    }
    Value::String(format!(
        "{}{}",
        crate::value::format_value(a),
        crate::value::format_value(b)
    ))
}

fn arith(a: &Value, b: &Value, f: impl Fn(f64, f64) -> f64) -> Value {
    let x = as_number(a).unwrap_or(0.0);
    let y = as_number(b).unwrap_or(0.0);
    number(f(x, y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env_with(data: Value) -> (Value, HashMap<String, RuntimeFn>, HashMap<String, Value>) {
        (data, crate::builtins::default_functions(), HashMap::new())
    }

    fn eval_on(expr: &str, data: Value) -> Result<Value> {
        let (data, functions, constants) = env_with(data);
        let env = Env {
            data: &data,
            locals: HashMap::new(),
            functions: &functions,
            constants: &constants,
        };
        eval(expr, &env)
    }

    #[test]
    fn literals() {
        assert_eq!(eval_on("42", json!({})).unwrap(), json!(42));
        assert_eq!(eval_on("1.5", json!({})).unwrap(), json!(1.5));
        assert_eq!(eval_on(r#""hi""#, json!({})).unwrap(), json!("hi"));
        assert_eq!(eval_on("'hi'", json!({})).unwrap(), json!("hi"));
        assert_eq!(eval_on("true", json!({})).unwrap(), json!(true));
        assert_eq!(eval_on("null", json!({})).unwrap(), Value::Null);
    }

    #[test]
    fn variable_lookup() {
        assert_eq!(eval_on("$x", json!({"x": 7})).unwrap(), json!(7));
        assert_eq!(eval_on("$missing", json!({})).unwrap(), Value::Null);
    }

    #[test]
    fn subscripts_on_objects_and_arrays() {
        let data = json!({"user": {"name": "Ada"}, "items": [10, 20]});
        assert_eq!(
            eval_on(r#"$user["name"]"#, data.clone()).unwrap(),
            json!("Ada")
        );
        assert_eq!(eval_on("$items[1]", data).unwrap(), json!(20));
    }

    #[test]
    fn dynamic_subscript() {
        let data = json!({"map": {"a": 1}, "k": "a"});
        assert_eq!(eval_on("$map[$k]", data).unwrap(), json!(1));
    }

    #[test]
    fn arithmetic_and_precedence() {
        assert_eq!(eval_on("1 + 2 * 3", json!({})).unwrap(), json!(7));
        assert_eq!(eval_on("(1 + 2) * 3", json!({})).unwrap(), json!(9));
        assert_eq!(eval_on("10 % 3", json!({})).unwrap(), json!(1));
    }

    #[test]
    fn plus_concatenates_strings() {
        assert_eq!(
            eval_on(r#""a" + "b""#, json!({})).unwrap(),
            json!("ab")
        );
    }

    #[test]
    fn comparisons() {
        assert_eq!(eval_on("$a > 1", json!({"a": 2})).unwrap(), json!(true));
        assert_eq!(eval_on("$a > 1", json!({"a": 0})).unwrap(), json!(false));
        assert_eq!(eval_on("2 >= 2", json!({})).unwrap(), json!(true));
        assert_eq!(eval_on(r#"$s == "x""#, json!({"s": "x"})).unwrap(), json!(true));
        assert_eq!(eval_on("1 == 1.0", json!({})).unwrap(), json!(true));
    }

    #[test]
    fn boolean_operators() {
        assert_eq!(
            eval_on("$a && $b", json!({"a": 1, "b": 0})).unwrap(),
            json!(false)
        );
        assert_eq!(
            eval_on("$a || $b", json!({"a": 0, "b": 1})).unwrap(),
            json!(true)
        );
        assert_eq!(eval_on("!$a", json!({"a": 0})).unwrap(), json!(true));
    }

    #[test]
    fn ternary_selects_branch() {
        assert_eq!(
            eval_on(r#"$ok ? "y" : "n""#, json!({"ok": true})).unwrap(),
            json!("y")
        );
        assert_eq!(
            eval_on(r#"$ok ? "y" : "n""#, json!({"ok": false})).unwrap(),
            json!("n")
        );
    }

    #[test]
    fn function_calls() {
        assert_eq!(
            eval_on("upper($name)", json!({"name": "sam"})).unwrap(),
            json!("SAM")
        );
        assert_eq!(
            eval_on("trim(lower($x))", json!({"x": "  AB  "})).unwrap(),
            json!("ab")
        );
    }

    #[test]
    fn unknown_function_errors() {
        assert!(matches!(
            eval_on("nope($x)", json!({})).unwrap_err(),
            RenderError::UnknownFunction(name) if name == "nope"
        ));
    }

    #[test]
    fn constant_lookup() {
        let functions = crate::builtins::default_functions();
        let mut constants = HashMap::new();
        constants.insert("VERSION".to_string(), json!("1.0"));
        let data = json!({});
        let env = Env {
            data: &data,
            locals: HashMap::new(),
            functions: &functions,
            constants: &constants,
        };
        assert_eq!(eval(r#"const("VERSION")"#, &env).unwrap(), json!("1.0"));
        assert!(matches!(
            eval(r#"const("NOPE")"#, &env).unwrap_err(),
            RenderError::UnknownConstant(_)
        ));
    }

    #[test]
    fn locals_shadow_data() {
        let functions = crate::builtins::default_functions();
        let constants = HashMap::new();
        let data = json!({"x": "outer"});
        let mut locals = HashMap::new();
        locals.insert("x".to_string(), json!("inner"));
        let env = Env {
            data: &data,
            locals,
            functions: &functions,
            constants: &constants,
        };
        assert_eq!(eval("$x", &env).unwrap(), json!("inner"));
    }

    #[test]
    fn trailing_garbage_rejected() {
        assert!(eval_on("1 2", json!({})).is_err());
    }
}
