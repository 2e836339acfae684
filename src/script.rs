//! Schedule scripts.
//!
//! One step per line, written as a call:
//!
//! ```text
//! # blocking for the 6x16 micro-kernel
//! split("j", 8, ["jo", "ji"], perfect = true)
//! reorder("ji", "k")
//! lift_alloc("C_reg:_", n_lifts = 3)
//! set_memory("C_reg", AVX2)
//! replace_all(mm256_loadu_ps)
//! ```
//!
//! Arguments are positional or `name = value`. Strings take single or
//! double quotes; template names and memory spaces may be bare words.
//! Lines starting with `#` and blank lines are ignored.

use std::ops::Range;

use loopcraft_ir::parser::{ident, string_lit, ws};
use loopcraft_ir::{MemorySpace, ParseError};
use winnow::combinator::{alt, delimited, opt, separated, terminated};
use winnow::prelude::*;
use winnow::token::{one_of, take_till, take_while};

use crate::pipeline::{Schedule, Step};

/// A parsed script, with the byte range of each step's line.
#[derive(Clone, Debug, PartialEq)]
pub struct Script {
    pub schedule: Schedule,
    pub spans: Vec<Range<usize>>,
}

impl Script {
    /// Source range of step `index`, if there is one.
    pub fn span(&self, index: usize) -> Option<Range<usize>> {
        self.spans.get(index).cloned()
    }
}

/// Parse a schedule script.
pub fn parse_script(text: &str) -> Result<Script, ParseError> {
    let mut steps = Vec::new();
    let mut spans = Vec::new();
    let mut line_start = 0;
    for line in text.split_inclusive('\n') {
        let start = line_start;
        line_start += line.len();
        let content = line.trim_end();
        let trimmed = content.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let lead = content.len() - trimmed.len();
        let call = parse_call(trimmed).map_err(|e| ParseError {
            message: e.message,
            offset: start + lead + e.offset,
        })?;
        let step = bind(&call).map_err(|message| ParseError {
            message,
            offset: start + lead,
        })?;
        steps.push(step);
        spans.push(start + lead..start + content.len());
    }
    Ok(Script {
        schedule: Schedule::from_steps(steps),
        spans,
    })
}

impl std::str::FromStr for Schedule {
    type Err = ParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        parse_script(text).map(|script| script.schedule)
    }
}

// ============================================================================
// Syntax
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
    Word(String),
    List(Vec<Value>),
}

impl Value {
    fn describe(&self) -> &'static str {
        match self {
            Value::Str(_) => "a string",
            Value::Int(_) => "an integer",
            Value::Bool(_) => "a boolean",
            Value::Word(_) => "a bare word",
            Value::List(_) => "a list",
        }
    }
}

#[derive(Debug)]
struct Call {
    op: String,
    args: Vec<(Option<String>, Value)>,
}

fn quoted(input: &mut &str) -> ModalResult<String> {
    alt((
        string_lit,
        delimited('\'', take_till(0.., '\''), '\'').map(str::to_owned),
    ))
    .parse_next(input)
}

fn integer(input: &mut &str) -> ModalResult<i64> {
    (opt('-'), take_while(1.., |c: char| c.is_ascii_digit()))
        .take()
        .try_map(str::parse::<i64>)
        .parse_next(input)
}

fn value(input: &mut &str) -> ModalResult<Value> {
    alt((
        quoted.map(Value::Str),
        integer.map(Value::Int),
        delimited(
            ('[', ws),
            separated(0.., terminated(value, ws), (',', ws)),
            ']',
        )
        .map(Value::List),
        ident.map(|word| match word {
            "true" | "True" => Value::Bool(true),
            "false" | "False" => Value::Bool(false),
            _ => Value::Word(word.to_owned()),
        }),
    ))
    .parse_next(input)
}

fn arg(input: &mut &str) -> ModalResult<(Option<String>, Value)> {
    let name = opt(terminated(ident, (ws, one_of('='), ws))).parse_next(input)?;
    let value = value.parse_next(input)?;
    Ok((name.map(str::to_owned), value))
}

fn call(input: &mut &str) -> ModalResult<Call> {
    let op = ident.parse_next(input)?;
    ws.parse_next(input)?;
    let args = delimited(
        ('(', ws),
        separated(0.., terminated(arg, ws), (',', ws)),
        ')',
    )
    .parse_next(input)?;
    Ok(Call {
        op: op.to_owned(),
        args,
    })
}

fn parse_call(line: &str) -> Result<Call, ParseError> {
    let mut remaining = line;
    let offset = |rest: &str| line.len() - rest.len();
    let parsed = call.parse_next(&mut remaining).map_err(|e| ParseError {
        message: format!("expected a step like `split(\"i\", 8, [\"io\", \"ii\"])`: {e}"),
        offset: offset(remaining),
    })?;
    let rest = remaining.trim_start();
    if !(rest.is_empty() || rest.starts_with('#')) {
        return Err(ParseError {
            message: "trailing input after step".into(),
            offset: offset(rest),
        });
    }
    Ok(parsed)
}

// ============================================================================
// Binding arguments to steps
// ============================================================================

/// Arguments of one call, matched against a parameter list.
struct Bound<'c> {
    op: &'c str,
    values: Vec<(&'static str, Option<&'c Value>)>,
}

impl<'c> Bound<'c> {
    fn new(call: &'c Call, params: &[&'static str]) -> Result<Self, String> {
        let op = call.op.as_str();
        let mut values: Vec<(&'static str, Option<&Value>)> = params.iter().map(|&p| (p, None)).collect();
        let mut position = 0;
        for (name, value) in &call.args {
            let slot = match name {
                None => {
                    if position >= values.len() {
                        return Err(format!("`{op}` takes at most {} arguments", params.len()));
                    }
                    position += 1;
                    position - 1
                }
                Some(name) => values
                    .iter()
                    .position(|(p, _)| p == name)
                    .ok_or_else(|| format!("`{op}` has no parameter `{name}`"))?,
            };
            if values[slot].1.is_some() {
                return Err(format!("`{op}` got `{}` twice", values[slot].0));
            }
            values[slot].1 = Some(value);
        }
        Ok(Bound { op, values })
    }

    fn get(&self, name: &str) -> Option<&'c Value> {
        self.values.iter().find(|(p, _)| *p == name).and_then(|(_, v)| *v)
    }

    fn required(&self, name: &str) -> Result<&'c Value, String> {
        self.get(name)
            .ok_or_else(|| format!("`{}` is missing argument `{name}`", self.op))
    }

    fn mismatch(&self, name: &str, expected: &str, found: &Value) -> String {
        format!(
            "`{}` expects {expected} for `{name}`, found {}",
            self.op,
            found.describe()
        )
    }

    fn string(&self, name: &str) -> Result<String, String> {
        match self.required(name)? {
            Value::Str(s) => Ok(s.clone()),
            other => Err(self.mismatch(name, "a string", other)),
        }
    }

    /// A string or a bare word, for template names and memory spaces.
    fn word(&self, name: &str) -> Result<String, String> {
        match self.required(name)? {
            Value::Str(s) | Value::Word(s) => Ok(s.clone()),
            other => Err(self.mismatch(name, "a name", other)),
        }
    }

    fn int(&self, name: &str) -> Result<i64, String> {
        match self.required(name)? {
            Value::Int(n) => Ok(*n),
            other => Err(self.mismatch(name, "an integer", other)),
        }
    }

    fn count_or(&self, name: &str, default: usize) -> Result<usize, String> {
        match self.get(name) {
            None => Ok(default),
            Some(Value::Int(n)) => {
                usize::try_from(*n).map_err(|_| format!("`{}` needs a non-negative `{name}`", self.op))
            }
            Some(other) => Err(self.mismatch(name, "an integer", other)),
        }
    }

    fn flag_or(&self, name: &str, default: bool) -> Result<bool, String> {
        match self.get(name) {
            None => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(other) => Err(self.mismatch(name, "true or false", other)),
        }
    }

    fn name_pair(&self, name: &str) -> Result<(String, String), String> {
        match self.required(name)? {
            Value::List(items) => match items.as_slice() {
                [Value::Str(a), Value::Str(b)] => Ok((a.clone(), b.clone())),
                _ => Err(format!("`{}` expects two strings for `{name}`", self.op)),
            },
            other => Err(self.mismatch(name, "a list of two names", other)),
        }
    }
}

fn bind(call: &Call) -> Result<Step, String> {
    let step = match call.op.as_str() {
        "rename" => {
            let b = Bound::new(call, &["name"])?;
            Step::Rename { name: b.word("name")? }
        }
        "split" => {
            let b = Bound::new(call, &["loop", "factor", "names", "perfect"])?;
            let (outer, inner) = b.name_pair("names")?;
            Step::Split {
                loop_sel: b.string("loop")?,
                factor: b.int("factor")?,
                outer,
                inner,
                perfect: b.flag_or("perfect", false)?,
            }
        }
        "reorder" => {
            let b = Bound::new(call, &["outer", "inner"])?;
            Step::Reorder {
                outer: b.string("outer")?,
                inner: b.string("inner")?,
            }
        }
        "fission_after" => {
            let b = Bound::new(call, &["stmt", "n_lifts"])?;
            Step::FissionAfter {
                stmt: b.string("stmt")?,
                n_lifts: b.count_or("n_lifts", 1)?,
            }
        }
        "lift_alloc" => {
            let b = Bound::new(call, &["alloc", "n_lifts", "keep_dims"])?;
            Step::LiftAlloc {
                alloc: b.string("alloc")?,
                n_lifts: b.count_or("n_lifts", 1)?,
                keep_dims: b.flag_or("keep_dims", false)?,
            }
        }
        "stage_assn" => {
            let b = Bound::new(call, &["name", "reduce"])?;
            Step::StageAssn {
                name: b.string("name")?,
                reduce: b.string("reduce")?,
            }
        }
        "bind_expr" => {
            let b = Bound::new(call, &["name", "expr"])?;
            Step::BindExpr {
                name: b.string("name")?,
                expr: b.string("expr")?,
            }
        }
        "set_memory" => {
            let b = Bound::new(call, &["buffer", "space"])?;
            let space = b.word("space")?;
            Step::SetMemory {
                buffer: b.string("buffer")?,
                space: MemorySpace::from_name(&space).ok_or_else(|| format!("unknown memory space `{space}`"))?,
            }
        }
        "par_to_seq" => {
            let b = Bound::new(call, &["loop"])?;
            Step::ParToSeq {
                loop_sel: b.string("loop")?,
            }
        }
        "replace" => {
            let b = Bound::new(call, &["template", "selector"])?;
            Step::Replace {
                template: b.word("template")?,
                selector: b.string("selector")?,
            }
        }
        "replace_all" => {
            let b = Bound::new(call, &["template"])?;
            Step::ReplaceAll {
                template: b.word("template")?,
            }
        }
        "unroll" => {
            let b = Bound::new(call, &["loop"])?;
            Step::Unroll {
                loop_sel: b.string("loop")?,
            }
        }
        "unroll_buffer" => {
            let b = Bound::new(call, &["alloc", "dim"])?;
            Step::UnrollBuffer {
                alloc: b.string("alloc")?,
                dim: b.count_or("dim", 0)?,
            }
        }
        "simplify" => {
            Bound::new(call, &[])?;
            Step::Simplify
        }
        other => return Err(format!("unknown step `{other}`")),
    };
    Ok(step)
}

// ============================================================================
// Printing
// ============================================================================

struct Quoted<'a>(&'a str);

impl std::fmt::Display for Quoted<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("\"")?;
        for c in self.0.chars() {
            match c {
                '"' => f.write_str("\\\"")?,
                '\\' => f.write_str("\\\\")?,
                '\n' => f.write_str("\\n")?,
                '\t' => f.write_str("\\t")?,
                c => write!(f, "{c}")?,
            }
        }
        f.write_str("\"")
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = self.op();
        match self {
            Step::Rename { name } => write!(f, "{op}({})", Quoted(name)),
            Step::Split {
                loop_sel,
                factor,
                outer,
                inner,
                perfect,
            } => write!(
                f,
                "{op}({}, {factor}, [{}, {}], perfect = {perfect})",
                Quoted(loop_sel),
                Quoted(outer),
                Quoted(inner)
            ),
            Step::Reorder { outer, inner } => write!(f, "{op}({}, {})", Quoted(outer), Quoted(inner)),
            Step::FissionAfter { stmt, n_lifts } => {
                write!(f, "{op}({}, n_lifts = {n_lifts})", Quoted(stmt))
            }
            Step::LiftAlloc {
                alloc,
                n_lifts,
                keep_dims,
            } => write!(
                f,
                "{op}({}, n_lifts = {n_lifts}, keep_dims = {keep_dims})",
                Quoted(alloc)
            ),
            Step::StageAssn { name, reduce } => write!(f, "{op}({}, {})", Quoted(name), Quoted(reduce)),
            Step::BindExpr { name, expr } => write!(f, "{op}({}, {})", Quoted(name), Quoted(expr)),
            Step::SetMemory { buffer, space } => write!(f, "{op}({}, {space})", Quoted(buffer)),
            Step::ParToSeq { loop_sel } | Step::Unroll { loop_sel } => {
                write!(f, "{op}({})", Quoted(loop_sel))
            }
            Step::Replace { template, selector } => write!(f, "{op}({template}, {})", Quoted(selector)),
            Step::ReplaceAll { template } => write!(f, "{op}({template})"),
            Step::UnrollBuffer { alloc, dim } => write!(f, "{op}({}, {dim})", Quoted(alloc)),
            Step::Simplify => write!(f, "{op}()"),
        }
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for step in self.steps() {
            writeln!(f, "{step}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;

    #[test]
    fn test_parse_positional_and_keywords() {
        let script = parse_script(
            "# micro-kernel\n\
             split('j', 8, ['jo', 'ji'], perfect = True)\n\
             \n\
             lift_alloc(\"C_reg:_\", n_lifts = 3)\n\
             set_memory(\"C_reg\", AVX2)\n\
             replace(mm256_loadu_ps, \"for ji in _:_ #0\")  # first load\n",
        )
        .unwrap();
        assert_eq!(
            script.schedule,
            Schedule::new()
                .split("j", 8, ["jo", "ji"], true)
                .lift_alloc("C_reg:_", 3, false)
                .set_memory("C_reg", MemorySpace::Avx2)
                .replace("mm256_loadu_ps", "for ji in _:_ #0")
        );
        assert_eq!(script.spans.len(), 4);
        assert_eq!(
            &"# micro-kernel\nsplit('j', 8, ['jo', 'ji'], perfect = True)"[script.spans[0].clone()],
            "split('j', 8, ['jo', 'ji'], perfect = True)"
        );
    }

    #[test]
    fn test_display_round_trips() {
        let schedule = Schedule::new()
            .rename("sgemm_avx2")
            .split("j", 8, ["jo", "ji"], true)
            .fission_after("C_reg = _ #0", 3)
            .stage_assn("C_reg", "C[_] += _")
            .bind_expr("a_vec", "A[i, k]")
            .par_to_seq("for i in _:_")
            .replace_all("mm256_storeu_ps")
            .unroll("jo #0")
            .unroll_buffer("C_reg", 1)
            .simplify();
        let text = schedule.to_string();
        assert_snapshot!(text, @r#"
        rename("sgemm_avx2")
        split("j", 8, ["jo", "ji"], perfect = true)
        fission_after("C_reg = _ #0", n_lifts = 3)
        stage_assn("C_reg", "C[_] += _")
        bind_expr("a_vec", "A[i, k]")
        par_to_seq("for i in _:_")
        replace_all(mm256_storeu_ps)
        unroll("jo #0")
        unroll_buffer("C_reg", 1)
        simplify()
        "#);
        assert_eq!(text.parse::<Schedule>().unwrap(), schedule);
    }

    #[test]
    fn test_unknown_step_points_at_line() {
        let text = "reorder(\"j\", \"k\")\n  tile(\"i\", 4)\n";
        let err = parse_script(text).unwrap_err();
        assert_eq!(err.offset, text.find("tile").unwrap());
        assert_eq!(err.message, "unknown step `tile`");
    }

    #[test]
    fn test_argument_errors() {
        let err = parse_script("split(\"j\", \"8\", [\"jo\", \"ji\"])").unwrap_err();
        assert_eq!(err.message, "`split` expects an integer for `factor`, found a string");

        let err = parse_script("unroll(\"i\", depth = 2)").unwrap_err();
        assert_eq!(err.message, "`unroll` has no parameter `depth`");

        let err = parse_script("reorder(\"j\")").unwrap_err();
        assert_eq!(err.message, "`reorder` is missing argument `inner`");

        let err = parse_script("set_memory(\"C_reg\", SRAM)").unwrap_err();
        assert_eq!(err.message, "unknown memory space `SRAM`");
    }

    #[test]
    fn test_syntax_error_offset() {
        let text = "simplify()\nsplit(\"j\" 8)\n";
        let err = parse_script(text).unwrap_err();
        assert!(err.offset >= text.find("split").unwrap());
        assert!(err.offset <= text.len());
    }
}
