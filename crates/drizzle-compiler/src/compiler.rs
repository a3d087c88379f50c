//! The compiler: token walk, state tracking and fragment emission.
//!
//! [`Compiler`] owns its tag registry, plugin list, sandbox and
//! configuration. Construct one at startup, register tags and plugins,
//! then call [`Compiler::compile`] as many times as needed; a compile is a
//! pure function of the source text and the compiler's setup, so `&self`
//! calls may run concurrently for different templates.
//!
//! The compiled output is a textual fragment program: literal text
//! interleaved with `<?r ... ?>` directives. Expressions inside directives
//! are already normalized (subscript form, modifiers expanded, escaping
//! explicit), so the executing host needs no knowledge of the template
//! grammar.

use regex::Regex;

use crate::config::{Config, TemplateIdentity};
use crate::error::{CompileError, Result};
use crate::hooks::{HookContext, HookPhase, Plugin, PluginSet};
use crate::include::resolve_include;
use crate::registry::TagRegistry;
use crate::rewrite;
use crate::sandbox::Sandbox;
use crate::tokenizer::{self, TagKind, TagToken, Token};

/// Per-compile mutable state. Created fresh for every `compile()` call and
/// discarded afterwards; loop and conditional counters are never reused
/// across templates.
struct CompileState {
    out: String,
    /// Source lines of currently open loops, innermost last. Depth is the
    /// loop level.
    open_loops: Vec<usize>,
    /// Source lines of currently open conditionals, innermost last.
    open_ifs: Vec<usize>,
    /// (line, override) of an open autoescape region, if any. Depth 1 only.
    autoescape: Option<(usize, bool)>,
    /// Line of an open noparse region, if any.
    noparse_open: Option<usize>,
    /// Line of an open ignore region, if any.
    ignore_open: Option<usize>,
}

impl CompileState {
    fn new(capacity: usize) -> Self {
        Self {
            out: String::with_capacity(capacity + capacity / 4),
            open_loops: Vec::new(),
            open_ifs: Vec::new(),
            autoescape: None,
            noparse_open: None,
            ignore_open: None,
        }
    }

    fn loop_level(&self) -> usize {
        self.open_loops.len()
    }
}

/// The template-markup compiler.
///
/// # Example
///
/// ```rust
/// use drizzle_compiler::{Compiler, Config, TemplateIdentity};
///
/// let compiler = Compiler::new(Config::default()).unwrap();
/// let compiled = compiler
///     .compile("Hello {$name}!", &TemplateIdentity::inline("greeting"))
///     .unwrap();
/// assert_eq!(compiled, "Hello <?r print escape($name) ?>!");
/// ```
pub struct Compiler {
    config: Config,
    registry: TagRegistry,
    sandbox: Sandbox,
    plugins: PluginSet,
    split_re: Regex,
}

impl Compiler {
    /// Creates a compiler with the built-in tags and the given config.
    pub fn new(config: Config) -> Result<Self> {
        let registry = TagRegistry::with_builtins();
        let sandbox = Sandbox::from_config(&config)?;
        let split_re = tokenizer::build_split_regex(&registry)?;
        Ok(Self {
            config,
            registry,
            sandbox,
            plugins: PluginSet::new(),
            split_re,
        })
    }

    /// The active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registers a custom tag grammar.
    ///
    /// The match pattern's captures are handed to the tag's render-time
    /// handler via a `tag` fragment. Call during setup, before compiling.
    pub fn register_tag(&mut self, name: &str, split: &str, matches: &str) -> Result<()> {
        self.registry.register(name, split, matches)?;
        self.split_re = tokenizer::build_split_regex(&self.registry)?;
        Ok(())
    }

    /// Registers a plugin under a unique name. Call during setup.
    pub fn register_plugin(&mut self, name: &str, plugin: Plugin) -> Result<()> {
        self.plugins.register(name, plugin)
    }

    /// Compiles template source into a fragment program.
    ///
    /// All-or-nothing: any structural imbalance, sandbox violation, include
    /// failure or plugin error aborts the call with no partial output.
    pub fn compile(&self, source: &str, identity: &TemplateIdentity) -> Result<String> {
        let stripped = tokenizer::strip_comments(source, self.config.remove_comments);
        let source = self.run_hooks(HookPhase::BeforeParse, stripped, identity)?;

        let tokens = tokenizer::tokenize(&source, &self.registry, &self.split_re);
        let mut state = CompileState::new(source.len());
        for token in &tokens {
            self.consume(token, &source, identity, &mut state)?;
        }
        self.check_balanced(&state)?;

        self.run_hooks(HookPhase::AfterParse, state.out, identity)
    }

    fn run_hooks(
        &self,
        phase: HookPhase,
        code: String,
        identity: &TemplateIdentity,
    ) -> Result<String> {
        if self.plugins.is_empty() {
            return Ok(code);
        }
        let mut ctx = HookContext {
            code,
            base_dir: identity.base_dir.clone(),
            file_path: identity.file_path.clone(),
            config: self.config.clone(),
        };
        self.plugins.run(phase, &mut ctx)?;
        Ok(ctx.code)
    }

    fn check_balanced(&self, state: &CompileState) -> Result<()> {
        if let Some(&line) = state.open_loops.last() {
            return Err(CompileError::Unclosed {
                construct: "loop",
                line,
            });
        }
        if let Some(&line) = state.open_ifs.last() {
            return Err(CompileError::Unclosed {
                construct: "if",
                line,
            });
        }
        if let Some((line, _)) = state.autoescape {
            return Err(CompileError::Unclosed {
                construct: "autoescape",
                line,
            });
        }
        if let Some(line) = state.noparse_open {
            return Err(CompileError::Unclosed {
                construct: "noparse",
                line,
            });
        }
        if let Some(line) = state.ignore_open {
            return Err(CompileError::Unclosed {
                construct: "ignore",
                line,
            });
        }
        Ok(())
    }

    /// Effective escaping default for the current scope.
    fn escaping(&self, state: &CompileState) -> bool {
        state
            .autoescape
            .map(|(_, on)| on)
            .unwrap_or(self.config.autoescape)
    }

    fn consume(
        &self,
        token: &Token<'_>,
        source: &str,
        identity: &TemplateIdentity,
        state: &mut CompileState,
    ) -> Result<()> {
        // Open ignore/noparse regions swallow everything except their own
        // close tag. Only one of the two can be open at a time.
        if state.ignore_open.is_some() {
            if let Token::Tag(TagToken {
                kind: TagKind::IgnoreClose,
                ..
            }) = token
            {
                state.ignore_open = None;
            }
            return Ok(());
        }
        if state.noparse_open.is_some() {
            match token {
                Token::Tag(TagToken {
                    kind: TagKind::NoparseClose,
                    ..
                }) => state.noparse_open = None,
                Token::Tag(tag) => emit_literal(&mut state.out, tag.raw),
                Token::Literal(text) => emit_literal(&mut state.out, text),
            }
            return Ok(());
        }

        let tag = match token {
            Token::Literal(text) => {
                emit_literal(&mut state.out, text);
                return Ok(());
            }
            Token::Tag(tag) => tag,
        };
        let line = tokenizer::line_at(source, tag.offset);

        match &tag.kind {
            TagKind::LoopOpen {
                subject,
                key,
                value,
            } => {
                let subject = rewrite::rewrite_value(subject, false);
                self.sandbox.check(&subject, line)?;
                state.open_loops.push(line);
                let level = state.loop_level();
                // `as $item` binds the value position; the key keeps its
                // per-level default.
                let (key_name, value_name) = match (key, value) {
                    (Some(k), Some(v)) => (k.clone(), v.clone()),
                    (Some(k), None) => (format!("key{}", level), k.clone()),
                    _ => (format!("key{}", level), format!("value{}", level)),
                };
                state.out.push_str(&format!(
                    "<?r loop key ${} value ${} counter $counter{} in {} ?>",
                    key_name, value_name, level, subject
                ));
            }
            TagKind::LoopClose => {
                if state.open_loops.pop().is_none() {
                    return Err(CompileError::UnmatchedClose { tag: "/loop", line });
                }
                state.out.push_str("<?r endloop ?>");
            }
            TagKind::Break => state.out.push_str("<?r break ?>"),
            TagKind::Continue => state.out.push_str("<?r continue ?>"),
            TagKind::If { cond } => {
                let cond = self.rewrite_condition(cond, line)?;
                state.open_ifs.push(line);
                state.out.push_str(&format!("<?r if {} ?>", cond));
            }
            TagKind::ElseIf { cond } => {
                if state.open_ifs.is_empty() {
                    return Err(CompileError::UnmatchedClose {
                        tag: "elseif",
                        line,
                    });
                }
                let cond = self.rewrite_condition(cond, line)?;
                state.out.push_str(&format!("<?r elseif {} ?>", cond));
            }
            TagKind::Else => {
                if state.open_ifs.is_empty() {
                    return Err(CompileError::UnmatchedClose { tag: "else", line });
                }
                state.out.push_str("<?r else ?>");
            }
            TagKind::IfClose => {
                if state.open_ifs.pop().is_none() {
                    return Err(CompileError::UnmatchedClose { tag: "/if", line });
                }
                state.out.push_str("<?r endif ?>");
            }
            TagKind::Autoescape { on } => {
                if state.autoescape.is_some() {
                    return Err(CompileError::NestedAutoescape { line });
                }
                state.autoescape = Some((line, *on));
            }
            TagKind::AutoescapeClose => {
                if state.autoescape.take().is_none() {
                    return Err(CompileError::UnmatchedClose {
                        tag: "/autoescape",
                        line,
                    });
                }
            }
            TagKind::Noparse => state.noparse_open = Some(line),
            TagKind::NoparseClose => {
                return Err(CompileError::UnmatchedClose {
                    tag: "/noparse",
                    line,
                });
            }
            TagKind::Ignore => state.ignore_open = Some(line),
            TagKind::IgnoreClose => {
                return Err(CompileError::UnmatchedClose {
                    tag: "/ignore",
                    line,
                });
            }
            TagKind::Include { target } => {
                if target.contains('$') {
                    // Data-driven target: resolution deferred to render
                    // time, expression normalized like any other value.
                    let expr = rewrite::rewrite_value(target, false);
                    state.out.push_str(&format!("<?r include {} ?>", expr));
                } else {
                    let path = resolve_include(target, identity, &self.config)?;
                    state.out.push_str(&format!(
                        "<?r include \"{}\" ?>",
                        quote_escape(&path.to_string_lossy())
                    ));
                }
            }
            TagKind::Function { call } => {
                self.sandbox.check(call, line)?;
                let emitted = self.rewrite_function_call(call);
                state.out.push_str(&format!("<?r print {} ?>", emitted));
            }
            TagKind::Ternary {
                cond,
                then,
                otherwise,
            } => {
                let escaping = self.escaping(state);
                for part in [cond, then, otherwise] {
                    if rewrite::has_modifiers(part) {
                        self.sandbox.check(part, line)?;
                    }
                }
                // The condition keeps its runtime type; escaping it would
                // stringify booleans and break falsiness.
                state.out.push_str(&format!(
                    "<?r print {} ? {} : {} ?>",
                    rewrite::rewrite_value(cond, false),
                    rewrite::rewrite_value(then, escaping),
                    rewrite::rewrite_value(otherwise, escaping)
                ));
            }
            TagKind::Variable { expr } => self.emit_variable(expr, line, state)?,
            TagKind::Constant { expr } => {
                if rewrite::has_modifiers(expr) {
                    self.sandbox.check(expr, line)?;
                }
                let parts = rewrite::split_modifiers(expr);
                let base = format!("const(\"{}\")", quote_escape(parts[0].trim()));
                let chained = if parts.len() > 1 {
                    rewrite::expand_modifiers(&format!("{}|{}", base, parts[1..].join("|")))
                } else {
                    base
                };
                // Constants bypass variable-escaping rules.
                state.out.push_str(&format!("<?r print {} ?>", chained));
            }
            TagKind::Custom { name, captures } => {
                let args = captures
                    .iter()
                    .map(|c| format!("\"{}\"", quote_escape(c)))
                    .collect::<Vec<_>>()
                    .join(" ");
                state.out.push_str(&format!("<?r tag {} {} ?>", name, args));
            }
        }
        Ok(())
    }

    /// Conditions are rewritten without escaping and always sandbox-checked.
    fn rewrite_condition(&self, cond: &str, line: usize) -> Result<String> {
        self.sandbox.check(cond, line)?;
        Ok(rewrite::rewrite_value(cond, false))
    }

    fn emit_variable(&self, expr: &str, line: usize, state: &mut CompileState) -> Result<()> {
        if let Some(pos) = rewrite::assignment_position(expr) {
            let (lhs, rhs) = expr.split_at(pos);
            let rhs = &rhs[1..];
            if rewrite::has_modifiers(rhs) {
                self.sandbox.check(rhs, line)?;
            }
            // Assignments are never escaped.
            state.out.push_str(&format!(
                "<?r set {} = {} ?>",
                rewrite::subscript_paths(lhs.trim()),
                rewrite::rewrite_value(rhs.trim(), false)
            ));
            return Ok(());
        }
        // Plain interpolation skips the sandbox unless modifiers are
        // involved.
        if rewrite::has_modifiers(expr) {
            self.sandbox.check(expr, line)?;
        }
        let value = rewrite::rewrite_value(expr, self.escaping(state));
        state.out.push_str(&format!("<?r print {} ?>", value));
        Ok(())
    }

    fn rewrite_function_call(&self, call: &str) -> String {
        match call.split_once('(') {
            Some((name, rest)) => {
                let args = rest.strip_suffix(')').unwrap_or(rest);
                if args.trim().is_empty() {
                    format!("{}()", name.trim())
                } else {
                    let rewritten = split_top_commas(args)
                        .iter()
                        .map(|a| rewrite::expand_modifiers(&rewrite::subscript_paths(a)))
                        .collect::<Vec<_>>()
                        .join(",");
                    format!("{}({})", name.trim(), rewritten)
                }
            }
            None => format!("{}()", call.trim()),
        }
    }
}

/// Emits literal text into the compiled program.
///
/// Any occurrence of the directive marker is routed through a `print`
/// directive, so template text can never forge a runtime directive and
/// bypass the sandbox.
fn emit_literal(out: &mut String, text: &str) {
    let mut rest = text;
    while let Some(i) = rest.find("<?r") {
        out.push_str(&rest[..i]);
        out.push_str(r#"<?r print "<?r" ?>"#);
        rest = &rest[i + 3..];
    }
    out.push_str(rest);
}

/// Splits an argument list on top-level commas, honoring quotes and
/// nesting.
fn split_top_commas(args: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut cur = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut chars = args.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                cur.push(c);
                if c == '\\' {
                    if let Some(&next) = chars.peek() {
                        cur.push(next);
                        chars.next();
                    }
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
                ',' if depth == 0 => {
                    parts.push(cur.trim().to_string());
                    cur = String::new();
                }
                _ => cur.push(c),
            },
        }
    }
    parts.push(cur.trim().to_string());
    parts
}

fn quote_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
