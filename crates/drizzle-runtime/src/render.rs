//! Program execution.
//!
//! [`Renderer`] holds the registered function, constant and tag-handler
//! tables and walks a parsed program against a `serde_json::Value` data
//! root. Loop and assignment bindings live in a locals map layered over
//! the data root; includes run in the caller's scope.

use std::collections::HashMap;

use serde_json::Value;

use crate::builtins::default_functions;
use crate::error::{RenderError, Result};
use crate::eval::{eval, Env, RuntimeFn};
use crate::program::{parse_program, IfArm, LoopNode, Node};
use crate::value::{as_number, format_value, number};

/// Signature for custom tag handlers. Receives the evaluated capture
/// arguments and returns the text to emit.
pub type TagHandler = Box<dyn Fn(&[Value]) -> Result<String> + Send + Sync>;

/// Supplies compiled program text for include statements.
pub trait IncludeLoader {
    fn load_compiled(&self, path: &str) -> Result<String>;
}

/// Includes deeper than this abort the render; a cycle between compiled
/// templates is otherwise unbounded.
const MAX_INCLUDE_DEPTH: usize = 64;

/// Control-flow signal bubbled up from a statement list.
enum Flow {
    Normal,
    Break,
    Continue,
}

/// Executes compiled programs.
pub struct Renderer {
    functions: HashMap<String, RuntimeFn>,
    constants: HashMap<String, Value>,
    tags: HashMap<String, TagHandler>,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    /// A renderer preloaded with the builtin function table.
    pub fn new() -> Self {
        Renderer {
            functions: default_functions(),
            constants: HashMap::new(),
            tags: HashMap::new(),
        }
    }

    /// Registers (or replaces) a render-time function.
    pub fn register_function(&mut self, name: impl Into<String>, f: RuntimeFn) {
        self.functions.insert(name.into(), f);
    }

    /// Registers a constant resolvable through `{#NAME#}`.
    pub fn register_constant(&mut self, name: impl Into<String>, value: Value) {
        self.constants.insert(name.into(), value);
    }

    /// Registers a handler for a custom tag.
    pub fn register_tag(&mut self, name: impl Into<String>, handler: TagHandler) {
        self.tags.insert(name.into(), handler);
    }

    /// Renders a compiled program without include support.
    pub fn render(&self, program: &str, data: &Value) -> Result<String> {
        self.run_program(program, data, None)
    }

    /// Renders a compiled program, resolving includes through `loader`.
    pub fn render_with_includes(
        &self,
        program: &str,
        data: &Value,
        loader: &dyn IncludeLoader,
    ) -> Result<String> {
        self.run_program(program, data, Some(loader))
    }

    fn run_program(
        &self,
        program: &str,
        data: &Value,
        loader: Option<&dyn IncludeLoader>,
    ) -> Result<String> {
        let nodes = parse_program(program)?;
        let mut env = Env {
            data,
            locals: HashMap::new(),
            functions: &self.functions,
            constants: &self.constants,
        };
        let mut exec = Exec {
            tags: &self.tags,
            loader,
            depth: 0,
        };
        let mut out = String::new();
        // Break or continue outside any loop just stops the template.
        exec.run(&nodes, &mut env, &mut out)?;
        Ok(out)
    }
}

struct Exec<'r> {
    tags: &'r HashMap<String, TagHandler>,
    loader: Option<&'r dyn IncludeLoader>,
    depth: usize,
}

impl Exec<'_> {
    fn run(&mut self, nodes: &[Node], env: &mut Env<'_>, out: &mut String) -> Result<Flow> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Print(expr) => {
                    let value = eval(expr, env)?;
                    out.push_str(&format_value(&value));
                }
                Node::Set { target, expr } => {
                    let value = eval(expr, env)?;
                    assign(env, target, value)?;
                }
                Node::If { arms } => match self.run_if(arms, env, out)? {
                    Flow::Normal => {}
                    flow => return Ok(flow),
                },
                Node::Loop(node) => self.run_loop(node, env, out)?,
                Node::Break => return Ok(Flow::Break),
                Node::Continue => return Ok(Flow::Continue),
                Node::IncludeStatic(path) => self.include(path, env, out)?,
                Node::IncludeDynamic(expr) => {
                    let path = format_value(&eval(expr, env)?);
                    self.include(&path, env, out)?;
                }
                Node::TagCall { name, args } => {
                    let handler = self
                        .tags
                        .get(name)
                        .ok_or_else(|| RenderError::UnknownTag(name.clone()))?;
                    let values: Vec<Value> =
                        args.iter().map(|a| Value::String(a.clone())).collect();
                    out.push_str(&handler(&values)?);
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn run_if(&mut self, arms: &[IfArm], env: &mut Env<'_>, out: &mut String) -> Result<Flow> {
        for arm in arms {
            let taken = match &arm.cond {
                Some(cond) => crate::value::truthy(&eval(cond, env)?),
                None => true,
            };
            if taken {
                return self.run(&arm.body, env, out);
            }
        }
        Ok(Flow::Normal)
    }

    fn run_loop(&mut self, node: &LoopNode, env: &mut Env<'_>, out: &mut String) -> Result<()> {
        let subject = eval(&node.subject, env)?;
        let entries: Vec<(Value, Value)> = match subject {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (number(i as f64), v))
                .collect(),
            Value::Object(map) => map
                .into_iter()
                .map(|(k, v)| (Value::String(k), v))
                .collect(),
            // Scalars and null iterate zero times rather than erroring.
            _ => Vec::new(),
        };

        for (counter, (key, value)) in entries.into_iter().enumerate() {
            env.locals.insert(node.key.clone(), key);
            env.locals.insert(node.value.clone(), value);
            env.locals
                .insert(node.counter.clone(), number(counter as f64));
            match self.run(&node.body, env, out)? {
                Flow::Break => break,
                Flow::Continue | Flow::Normal => {}
            }
        }
        Ok(())
    }

    fn include(&mut self, path: &str, env: &mut Env<'_>, out: &mut String) -> Result<()> {
        let loader = self.loader.ok_or_else(|| RenderError::Include {
            path: path.to_string(),
            message: "no include loader configured".to_string(),
        })?;
        if self.depth >= MAX_INCLUDE_DEPTH {
            return Err(RenderError::IncludeDepth(MAX_INCLUDE_DEPTH));
        }
        let program = loader.load_compiled(path)?;
        let nodes = parse_program(&program)?;
        self.depth += 1;
        let flow = self.run(&nodes, env, out);
        self.depth -= 1;
        flow.map(|_| ())
    }
}

/// Parses `$name` followed by zero or more bracketed index expressions.
fn parse_target(target: &str) -> Result<(String, Vec<String>)> {
    let rest = target
        .strip_prefix('$')
        .ok_or_else(|| RenderError::Program(format!("bad assignment target '{}'", target)))?;
    let name_len = rest
        .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .unwrap_or(rest.len());
    if name_len == 0 {
        return Err(RenderError::Program(format!(
            "bad assignment target '{}'",
            target
        )));
    }
    let name = rest[..name_len].to_string();
    let mut indexes = Vec::new();
    let mut tail = &rest[name_len..];
    while let Some(inner) = tail.strip_prefix('[') {
        let mut depth = 1usize;
        let mut quote: Option<char> = None;
        let mut end = None;
        for (i, c) in inner.char_indices() {
            match quote {
                Some(q) if c == q => quote = None,
                Some(_) => {}
                None => match c {
                    '\'' | '"' => quote = Some(c),
                    '[' => depth += 1,
                    ']' => {
                        depth -= 1;
                        if depth == 0 {
                            end = Some(i);
                            break;
                        }
                    }
                    _ => {}
                },
            }
        }
        let end = end.ok_or_else(|| {
            RenderError::Program(format!("unbalanced subscript in target '{}'", target))
        })?;
        indexes.push(inner[..end].to_string());
        tail = &inner[end + 1..];
    }
    if !tail.is_empty() {
        return Err(RenderError::Program(format!(
            "bad assignment target '{}'",
            target
        )));
    }
    Ok((name, indexes))
}

/// Writes `value` into the locals map at `target`, copying the current
/// binding from the data root first so subscript writes layer over it.
fn assign(env: &mut Env<'_>, target: &str, value: Value) -> Result<()> {
    let (name, index_exprs) = parse_target(target)?;
    let mut keys = Vec::with_capacity(index_exprs.len());
    for expr in &index_exprs {
        keys.push(eval(expr, env)?);
    }
    let mut root = env
        .locals
        .get(&name)
        .cloned()
        .or_else(|| env.data.get(&name).cloned())
        .unwrap_or(Value::Null);
    set_path(&mut root, &keys, value);
    env.locals.insert(name, root);
    Ok(())
}

fn set_path(slot: &mut Value, keys: &[Value], value: Value) {
    let Some((key, rest)) = keys.split_first() else {
        *slot = value;
        return;
    };
    if let Value::Array(items) = slot {
        if let Some(n) = as_number(key) {
            let idx = n as usize;
            while items.len() <= idx {
                items.push(Value::Null);
            }
            set_path(&mut items[idx], rest, value);
            return;
        }
    }
    if !slot.is_object() {
        *slot = Value::Object(serde_json::Map::new());
    }
    let map = slot.as_object_mut().unwrap();
    let entry = map.entry(format_value(key)).or_insert(Value::Null);
    set_path(entry, rest, value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(program: &str, data: Value) -> Result<String> {
        Renderer::new().render(program, &data)
    }

    #[test]
    fn text_and_print() {
        assert_eq!(
            render("Hello <?r print escape($name) ?>!", json!({"name": "Sam"})).unwrap(),
            "Hello Sam!"
        );
    }

    #[test]
    fn print_escapes_when_wrapped() {
        assert_eq!(
            render("<?r print escape($name) ?>", json!({"name": "<Sam>"})).unwrap(),
            "&lt;Sam&gt;"
        );
        assert_eq!(
            render("<?r print $name ?>", json!({"name": "<Sam>"})).unwrap(),
            "<Sam>"
        );
    }

    #[test]
    fn set_then_print() {
        assert_eq!(
            render("<?r set $x = 2 + 3 ?><?r print $x ?>", json!({})).unwrap(),
            "5"
        );
    }

    #[test]
    fn set_subscript_layers_over_data() {
        let program = r#"<?r set $user["name"] = "Ada" ?><?r print $user["name"] ?>/<?r print $user["id"] ?>"#;
        assert_eq!(
            render(program, json!({"user": {"id": 7, "name": "old"}})).unwrap(),
            "Ada/7"
        );
    }

    #[test]
    fn set_builds_missing_containers() {
        let program = r#"<?r set $a["b"][0] = "x" ?><?r print $a["b"][0] ?>"#;
        assert_eq!(render(program, json!({})).unwrap(), "x");
    }

    #[test]
    fn conditional_arms() {
        let program = "<?r if $a > 1 ?>yes<?r else ?>no<?r endif ?>";
        assert_eq!(render(program, json!({"a": 2})).unwrap(), "yes");
        assert_eq!(render(program, json!({"a": 0})).unwrap(), "no");
    }

    #[test]
    fn elseif_chain_takes_first_true_arm() {
        let program =
            "<?r if $n == 1 ?>one<?r elseif $n == 2 ?>two<?r else ?>many<?r endif ?>";
        assert_eq!(render(program, json!({"n": 1})).unwrap(), "one");
        assert_eq!(render(program, json!({"n": 2})).unwrap(), "two");
        assert_eq!(render(program, json!({"n": 9})).unwrap(), "many");
    }

    #[test]
    fn loop_over_array_binds_key_value_counter() {
        let program = "<?r loop key $key0 value $value0 counter $counter0 in $items ?>\
                       [<?r print $counter0 ?>:<?r print $key0 ?>=<?r print $value0 ?>]\
                       <?r endloop ?>";
        assert_eq!(
            render(program, json!({"items": ["a", "b"]})).unwrap(),
            "[0:0=a][1:1=b]"
        );
    }

    #[test]
    fn loop_over_object_preserves_order() {
        let program = "<?r loop key $key0 value $value0 counter $counter0 in $map ?>\
                       <?r print $key0 ?>=<?r print $value0 ?>;<?r endloop ?>";
        assert_eq!(
            render(program, json!({"map": {"x": 1, "y": 2}})).unwrap(),
            "x=1;y=2;"
        );
    }

    #[test]
    fn loop_over_scalar_and_null_is_empty() {
        let program =
            "<?r loop key $key0 value $value0 counter $counter0 in $x ?>body<?r endloop ?>";
        assert_eq!(render(program, json!({"x": 3})).unwrap(), "");
        assert_eq!(render(program, json!({})).unwrap(), "");
        assert_eq!(render(program, json!({"x": []})).unwrap(), "");
    }

    #[test]
    fn break_stops_the_innermost_loop() {
        let program = "<?r loop key $key0 value $value0 counter $counter0 in $items ?>\
                       <?r if $value0 == 2 ?><?r break ?><?r endif ?>\
                       <?r print $value0 ?><?r endloop ?>";
        assert_eq!(render(program, json!({"items": [1, 2, 3]})).unwrap(), "1");
    }

    #[test]
    fn continue_skips_an_iteration() {
        let program = "<?r loop key $key0 value $value0 counter $counter0 in $items ?>\
                       <?r if $value0 == 2 ?><?r continue ?><?r endif ?>\
                       <?r print $value0 ?><?r endloop ?>";
        assert_eq!(render(program, json!({"items": [1, 2, 3]})).unwrap(), "13");
    }

    #[test]
    fn nested_loops_use_distinct_bindings() {
        let program = "<?r loop key $key0 value $value0 counter $counter0 in $rows ?>\
                       <?r loop key $key1 value $value1 counter $counter1 in $value0 ?>\
                       <?r print $value1 ?><?r endloop ?>|<?r endloop ?>";
        assert_eq!(
            render(program, json!({"rows": [[1, 2], [3]]})).unwrap(),
            "12|3|"
        );
    }

    #[test]
    fn top_level_break_just_stops() {
        assert_eq!(render("a<?r break ?>b", json!({})).unwrap(), "a");
    }

    struct MapLoader(HashMap<String, String>);

    impl IncludeLoader for MapLoader {
        fn load_compiled(&self, path: &str) -> Result<String> {
            self.0
                .get(path)
                .cloned()
                .ok_or_else(|| RenderError::Include {
                    path: path.to_string(),
                    message: "not found".to_string(),
                })
        }
    }

    #[test]
    fn static_include_shares_scope() {
        let mut templates = HashMap::new();
        templates.insert(
            "header".to_string(),
            "<?r print $title ?>".to_string(),
        );
        let loader = MapLoader(templates);
        let out = Renderer::new()
            .render_with_includes(
                r#"[<?r include "header" ?>]"#,
                &json!({"title": "Home"}),
                &loader,
            )
            .unwrap();
        assert_eq!(out, "[Home]");
    }

    #[test]
    fn dynamic_include_evaluates_the_path() {
        let mut templates = HashMap::new();
        templates.insert("partial-a".to_string(), "A".to_string());
        let loader = MapLoader(templates);
        let out = Renderer::new()
            .render_with_includes(
                r#"<?r include "partial-" + $which ?>"#,
                &json!({"which": "a"}),
                &loader,
            )
            .unwrap();
        assert_eq!(out, "A");
    }

    #[test]
    fn include_without_loader_errors() {
        let err = render(r#"<?r include "x" ?>"#, json!({})).unwrap_err();
        assert!(matches!(err, RenderError::Include { .. }));
    }

    #[test]
    fn self_include_hits_the_depth_limit() {
        let mut templates = HashMap::new();
        templates.insert("loop".to_string(), r#"<?r include "loop" ?>"#.to_string());
        let loader = MapLoader(templates);
        let err = Renderer::new()
            .render_with_includes(r#"<?r include "loop" ?>"#, &json!({}), &loader)
            .unwrap_err();
        assert!(matches!(err, RenderError::IncludeDepth(_)));
    }

    #[test]
    fn custom_tag_handler_receives_captures() {
        let mut renderer = Renderer::new();
        renderer.register_tag(
            "shout",
            Box::new(|args| {
                Ok(format!("{}!", format_value(&args[0]).to_uppercase()))
            }),
        );
        let out = renderer
            .render(r#"<?r tag shout "hey" ?>"#, &json!({}))
            .unwrap();
        assert_eq!(out, "HEY!");
    }

    #[test]
    fn unregistered_tag_errors() {
        let err = render(r#"<?r tag nope "x" ?>"#, json!({})).unwrap_err();
        assert!(matches!(err, RenderError::UnknownTag(name) if name == "nope"));
    }

    #[test]
    fn constants_resolve_through_const_calls() {
        let mut renderer = Renderer::new();
        renderer.register_constant("VERSION", json!("0.4.1"));
        assert_eq!(
            renderer
                .render(r#"v<?r print const("VERSION") ?>"#, &json!({}))
                .unwrap(),
            "v0.4.1"
        );
    }

    #[test]
    fn aggregates_print_as_json() {
        assert_eq!(
            render("<?r print $xs ?>", json!({"xs": [1, 2]})).unwrap(),
            "[1,2]"
        );
    }
}
