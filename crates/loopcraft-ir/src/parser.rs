//! Parser for the kernel text format.
//!
//! The grammar mirrors what [`crate::printer`] emits:
//!
//! ```text
//! file   := proc*
//! proc   := ('@instr' '(' string ')')? 'proc' ident '(' param,* ')' block
//! param  := ident ':' ('size' | type)
//! type   := scalar ('[' expr,+ ']')? ('@' space)?
//! block  := '{' stmt* '}'
//! stmt   := 'for' ident 'in' ('par'|'seq') '(' expr ')' block
//!         | 'if' expr block
//!         | ident ':' type ';'
//!         | ident '(' window,* ')' ';'
//!         | ident ('[' expr,+ ']')? ('=' | '+=') expr ';'
//! window := ident ('[' (expr (':' expr)?),+ ']')?
//! ```
//!
//! `//` starts a comment that runs to the end of the line.

use std::collections::BTreeSet;

use winnow::combinator::{alt, delimited, opt, separated};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::{any, one_of, take_while};

use crate::ast::{
    Assign, BinOp, Block, BufferDecl, Call, Expr, If, Loop, LoopMode, MemorySpace, Param, Proc,
    ScalarType, Stmt, Window, WindowDim,
};

// ============================================================================
// Error type
// ============================================================================

/// Parse error for the kernel text format.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "parse error at offset {}: {}", self.offset, self.message)
    }
}

impl std::error::Error for ParseError {}

fn backtrack() -> ErrMode<ContextError> {
    ErrMode::Backtrack(ContextError::new())
}

// ============================================================================
// Lexical helpers
// ============================================================================

/// Skip whitespace and `//` comments.
pub fn ws(input: &mut &str) -> ModalResult<()> {
    loop {
        take_while(0.., |c: char| c.is_ascii_whitespace())
            .void()
            .parse_next(input)?;
        if input.starts_with("//") {
            take_while(0.., |c: char| c != '\n')
                .void()
                .parse_next(input)?;
        } else {
            return Ok(());
        }
    }
}

/// Parse an identifier: [a-zA-Z_][a-zA-Z0-9_]*
pub fn ident<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    (
        one_of(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
    )
        .take()
        .parse_next(input)
}

/// Match `kw` when it is not the prefix of a longer identifier.
pub fn keyword(input: &mut &str, kw: &str) -> ModalResult<()> {
    let rest = input.strip_prefix(kw).ok_or_else(backtrack)?;
    if rest.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_') {
        return Err(backtrack());
    }
    *input = rest;
    Ok(())
}

/// Parse a string literal: "content"
pub fn string_lit(input: &mut &str) -> ModalResult<String> {
    '"'.parse_next(input)?;
    let mut result = String::new();
    loop {
        let c = any.parse_next(input)?;
        match c {
            '"' => break,
            '\\' => {
                let escaped = any.parse_next(input)?;
                match escaped {
                    '"' => result.push('"'),
                    '\\' => result.push('\\'),
                    'n' => result.push('\n'),
                    't' => result.push('\t'),
                    _ => {
                        result.push('\\');
                        result.push(escaped);
                    }
                }
            }
            _ => result.push(c),
        }
    }
    Ok(result)
}

/// Parse an unsigned integer or float literal. Floats need a `.` or an
/// exponent; `42` is always an integer.
pub fn number(input: &mut &str) -> ModalResult<Expr> {
    let text = (
        take_while(1.., |c: char| c.is_ascii_digit()),
        opt(('.', take_while(0.., |c: char| c.is_ascii_digit()))),
        opt((
            one_of(['e', 'E']),
            opt(one_of(['+', '-'])),
            take_while(1.., |c: char| c.is_ascii_digit()),
        )),
    )
        .take()
        .parse_next(input)?;
    if text.contains(['.', 'e', 'E']) {
        text.parse::<f64>().map(Expr::Float).map_err(|_| backtrack())
    } else {
        text.parse::<i64>().map(Expr::Int).map_err(|_| backtrack())
    }
}

fn comma_list<'a, O>(
    item: impl Parser<&'a str, O, ErrMode<ContextError>>,
) -> impl Parser<&'a str, Vec<O>, ErrMode<ContextError>> {
    separated(1.., delimited(ws, item, ws), ',')
}

// ============================================================================
// Expressions
// ============================================================================

/// Parse an expression (lowest precedence: `and`).
pub fn expr(input: &mut &str) -> ModalResult<Expr> {
    let mut lhs = comparison.parse_next(input)?;
    loop {
        let checkpoint = *input;
        ws.parse_next(input)?;
        if keyword(input, "and").is_err() {
            *input = checkpoint;
            return Ok(lhs);
        }
        ws.parse_next(input)?;
        let rhs = comparison.parse_next(input)?;
        lhs = Expr::binary(BinOp::And, lhs, rhs);
    }
}

fn comparison(input: &mut &str) -> ModalResult<Expr> {
    let lhs = additive.parse_next(input)?;
    let checkpoint = *input;
    ws.parse_next(input)?;
    let op = if input.starts_with("<=") {
        Some((BinOp::Le, 2))
    } else if input.starts_with(">=") {
        Some((BinOp::Ge, 2))
    } else if input.starts_with("==") {
        Some((BinOp::Eq, 2))
    } else if input.starts_with('<') {
        Some((BinOp::Lt, 1))
    } else if input.starts_with('>') {
        Some((BinOp::Gt, 1))
    } else {
        None
    };
    let Some((op, len)) = op else {
        *input = checkpoint;
        return Ok(lhs);
    };
    *input = &input[len..];
    ws.parse_next(input)?;
    let rhs = additive.parse_next(input)?;
    Ok(Expr::binary(op, lhs, rhs))
}

fn additive(input: &mut &str) -> ModalResult<Expr> {
    let mut lhs = multiplicative.parse_next(input)?;
    loop {
        let checkpoint = *input;
        ws.parse_next(input)?;
        let op = if input.starts_with('+') && !input.starts_with("+=") {
            BinOp::Add
        } else if input.starts_with('-') {
            BinOp::Sub
        } else {
            *input = checkpoint;
            return Ok(lhs);
        };
        *input = &input[1..];
        ws.parse_next(input)?;
        let rhs = multiplicative.parse_next(input)?;
        lhs = Expr::binary(op, lhs, rhs);
    }
}

fn multiplicative(input: &mut &str) -> ModalResult<Expr> {
    let mut lhs = unary.parse_next(input)?;
    loop {
        let checkpoint = *input;
        ws.parse_next(input)?;
        let op = match input.chars().next() {
            Some('*') => BinOp::Mul,
            Some('/') if !input.starts_with("//") => BinOp::Div,
            Some('%') => BinOp::Mod,
            _ => {
                *input = checkpoint;
                return Ok(lhs);
            }
        };
        *input = &input[1..];
        ws.parse_next(input)?;
        let rhs = unary.parse_next(input)?;
        lhs = Expr::binary(op, lhs, rhs);
    }
}

fn unary(input: &mut &str) -> ModalResult<Expr> {
    if opt('-').parse_next(input)?.is_none() {
        return atom.parse_next(input);
    }
    // `-3` is a literal; `-x` and `--3` are negations.
    if input.starts_with(|c: char| c.is_ascii_digit()) {
        return match number.parse_next(input)? {
            Expr::Int(v) => Ok(Expr::Int(-v)),
            Expr::Float(v) => Ok(Expr::Float(-v)),
            other => Ok(-other),
        };
    }
    ws.parse_next(input)?;
    let operand = unary.parse_next(input)?;
    Ok(-operand)
}

fn atom(input: &mut &str) -> ModalResult<Expr> {
    alt((
        number,
        delimited(('(', ws), expr, (ws, ')')),
        access,
    ))
    .parse_next(input)
}

/// `name` or `name[i, j]`.
fn access(input: &mut &str) -> ModalResult<Expr> {
    let name = ident.parse_next(input)?;
    let checkpoint = *input;
    ws.parse_next(input)?;
    if input.starts_with('[') {
        let idx = delimited('[', comma_list(expr), ']').parse_next(input)?;
        Ok(Expr::read(name, idx))
    } else {
        *input = checkpoint;
        Ok(Expr::var(name))
    }
}

// ============================================================================
// Declarations
// ============================================================================

fn scalar_type(input: &mut &str) -> ModalResult<ScalarType> {
    let name = ident.parse_next(input)?;
    ScalarType::from_name(name).ok_or_else(backtrack)
}

fn memory_space(input: &mut &str) -> ModalResult<MemorySpace> {
    let name = ident.parse_next(input)?;
    MemorySpace::from_name(name).ok_or_else(backtrack)
}

/// `f32[6, K] @ DRAM`; shape and space are optional.
fn buffer_type(input: &mut &str) -> ModalResult<(ScalarType, Vec<Expr>, MemorySpace)> {
    let ty = scalar_type.parse_next(input)?;
    let checkpoint = *input;
    ws.parse_next(input)?;
    let shape = if input.starts_with('[') {
        delimited('[', comma_list(expr), ']').parse_next(input)?
    } else {
        *input = checkpoint;
        vec![]
    };
    let checkpoint = *input;
    ws.parse_next(input)?;
    let mem = if opt('@').parse_next(input)?.is_some() {
        ws.parse_next(input)?;
        memory_space.parse_next(input)?
    } else {
        *input = checkpoint;
        MemorySpace::Dram
    };
    Ok((ty, shape, mem))
}

fn param(input: &mut &str) -> ModalResult<Param> {
    let name = ident.parse_next(input)?;
    (ws, ':', ws).parse_next(input)?;
    if keyword(input, "size").is_ok() {
        return Ok(Param::Size(name.to_owned()));
    }
    let (ty, shape, mem) = buffer_type.parse_next(input)?;
    Ok(Param::Buffer(BufferDecl::new(name, ty, shape, mem)))
}

// ============================================================================
// Statements
// ============================================================================

pub fn block(input: &mut &str) -> ModalResult<Block> {
    ('{', ws).parse_next(input)?;
    let mut stmts = Vec::new();
    while !input.starts_with('}') {
        stmts.push(stmt.parse_next(input)?);
        ws.parse_next(input)?;
    }
    '}'.parse_next(input)?;
    Ok(Block::new(stmts))
}

pub fn stmt(input: &mut &str) -> ModalResult<Stmt> {
    alt((for_stmt, if_stmt, simple_stmt)).parse_next(input)
}

fn for_stmt(input: &mut &str) -> ModalResult<Stmt> {
    keyword(input, "for")?;
    ws.parse_next(input)?;
    let var = ident.parse_next(input)?;
    ws.parse_next(input)?;
    keyword(input, "in")?;
    ws.parse_next(input)?;
    let mode = if keyword(input, "par").is_ok() {
        LoopMode::Par
    } else {
        keyword(input, "seq")?;
        LoopMode::Seq
    };
    let bound = delimited((ws, '(', ws), expr, (ws, ')')).parse_next(input)?;
    ws.parse_next(input)?;
    let body = block.parse_next(input)?;
    Ok(Stmt::Loop(Loop {
        var: var.to_owned(),
        bound,
        mode,
        body,
    }))
}

fn if_stmt(input: &mut &str) -> ModalResult<Stmt> {
    keyword(input, "if")?;
    ws.parse_next(input)?;
    let cond = expr.parse_next(input)?;
    ws.parse_next(input)?;
    let body = block.parse_next(input)?;
    Ok(Stmt::If(If { cond, body }))
}

/// Allocation, call or assignment; all start with an identifier.
fn simple_stmt(input: &mut &str) -> ModalResult<Stmt> {
    let name = ident.parse_next(input)?;
    ws.parse_next(input)?;
    let stmt = if opt(':').parse_next(input)?.is_some() {
        ws.parse_next(input)?;
        let (ty, shape, mem) = buffer_type.parse_next(input)?;
        Stmt::Alloc(BufferDecl::new(name, ty, shape, mem))
    } else if input.starts_with('(') {
        let args = delimited(
            ('(', ws),
            separated(0.., delimited(ws, window, ws), ','),
            (ws, ')'),
        )
        .parse_next(input)?;
        Stmt::Call(Call {
            template: name.to_owned(),
            args,
        })
    } else {
        let idx = if input.starts_with('[') {
            delimited('[', comma_list(expr), ']').parse_next(input)?
        } else {
            vec![]
        };
        ws.parse_next(input)?;
        let reduce = alt(("+=".value(true), "=".value(false))).parse_next(input)?;
        ws.parse_next(input)?;
        let rhs = expr.parse_next(input)?;
        let assign = Assign {
            buf: name.to_owned(),
            idx,
            rhs,
        };
        if reduce {
            Stmt::Reduce(assign)
        } else {
            Stmt::Assign(assign)
        }
    };
    (ws, ';').parse_next(input)?;
    Ok(stmt)
}

fn window(input: &mut &str) -> ModalResult<Window> {
    let buf = ident.parse_next(input)?;
    let checkpoint = *input;
    ws.parse_next(input)?;
    let dims = if input.starts_with('[') {
        delimited('[', comma_list(window_dim), ']').parse_next(input)?
    } else {
        *input = checkpoint;
        vec![]
    };
    Ok(Window {
        buf: buf.to_owned(),
        dims,
    })
}

fn window_dim(input: &mut &str) -> ModalResult<WindowDim> {
    let lo = expr.parse_next(input)?;
    let checkpoint = *input;
    ws.parse_next(input)?;
    if opt(':').parse_next(input)?.is_some() {
        ws.parse_next(input)?;
        let hi = expr.parse_next(input)?;
        Ok(WindowDim::Interval(lo, hi))
    } else {
        *input = checkpoint;
        Ok(WindowDim::Point(lo))
    }
}

fn proc_def(input: &mut &str) -> ModalResult<Proc> {
    let instr = if opt("@instr").parse_next(input)?.is_some() {
        let s = delimited((ws, '(', ws), string_lit, (ws, ')')).parse_next(input)?;
        ws.parse_next(input)?;
        Some(s)
    } else {
        None
    };
    keyword(input, "proc")?;
    ws.parse_next(input)?;
    let name = ident.parse_next(input)?;
    ws.parse_next(input)?;
    let params = delimited(
        ('(', ws),
        separated(0.., delimited(ws, param, ws), ','),
        (ws, ')'),
    )
    .parse_next(input)?;
    ws.parse_next(input)?;
    let body = block.parse_next(input)?;
    let mut proc = Proc::new(name, params, body);
    proc.instr = instr;
    resolve_scalar_reads(&mut proc);
    Ok(proc)
}

// ============================================================================
// Scalar buffer resolution
// ============================================================================

/// A bare name in an expression parses as a variable. Where that name is a
/// buffer in scope it is really a scalar read; rewrite it as one.
fn resolve_scalar_reads(proc: &mut Proc) {
    let buffers: BTreeSet<String> = proc.buffer_params().map(|d| d.name.clone()).collect();
    resolve_block(&mut proc.body, &buffers);
}

fn resolve_block(block: &mut Block, outer: &BTreeSet<String>) {
    let mut scope = outer.clone();
    for stmt in &mut block.stmts {
        if let Stmt::Alloc(decl) = stmt {
            scope.insert(decl.name.clone());
        }
        for e in stmt.exprs_mut() {
            resolve_expr(e, &scope);
        }
        if let Some(body) = stmt.body_mut() {
            resolve_block(body, &scope);
        }
    }
}

fn resolve_expr(expr: &mut Expr, buffers: &BTreeSet<String>) {
    if let Expr::Var(name) = expr
        && buffers.contains(name.as_str())
    {
        *expr = Expr::read(name.clone(), vec![]);
        return;
    }
    for child in expr.children_mut() {
        resolve_expr(child, buffers);
    }
}

// ============================================================================
// Entry points
// ============================================================================

fn run<'a, O>(
    text: &'a str,
    mut parser: impl Parser<&'a str, O, ErrMode<ContextError>>,
    what: &str,
) -> Result<O, ParseError> {
    let mut remaining = text;
    let offset = |rest: &str| text.len() - rest.len();
    ws.parse_next(&mut remaining).map_err(|e| ParseError {
        message: format!("lexer error: {}", e),
        offset: offset(remaining),
    })?;
    let value = parser.parse_next(&mut remaining).map_err(|e| ParseError {
        message: format!("expected {what}: {e}"),
        offset: offset(remaining),
    })?;
    ws.parse_next(&mut remaining).map_err(|e| ParseError {
        message: format!("lexer error: {}", e),
        offset: offset(remaining),
    })?;
    if !remaining.is_empty() {
        return Err(ParseError {
            message: format!("trailing input after {what}"),
            offset: offset(remaining),
        });
    }
    Ok(value)
}

/// Parse every procedure in a file.
pub fn parse_procs(text: &str) -> Result<Vec<Proc>, ParseError> {
    let mut remaining = text;
    let mut procs = Vec::new();
    loop {
        ws.parse_next(&mut remaining).map_err(|e| ParseError {
            message: format!("lexer error: {}", e),
            offset: text.len() - remaining.len(),
        })?;
        if remaining.is_empty() {
            return Ok(procs);
        }
        let proc = proc_def.parse_next(&mut remaining).map_err(|e| ParseError {
            message: format!("expected procedure: {e}"),
            offset: text.len() - remaining.len(),
        })?;
        procs.push(proc);
    }
}

/// Parse exactly one procedure.
pub fn parse_proc(text: &str) -> Result<Proc, ParseError> {
    run(text, proc_def, "procedure")
}

/// Parse a standalone expression.
pub fn parse_expr(text: &str) -> Result<Expr, ParseError> {
    run(text, expr, "expression")
}

/// Parse a standalone statement.
pub fn parse_stmt(text: &str) -> Result<Stmt, ParseError> {
    run(text, stmt, "statement")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SGEMM: &str = r#"
        // reference kernel
        proc sgemm(K: size, A: f32[6, K] @ DRAM, B: f32[K, 16] @ DRAM, C: f32[6, 16] @ DRAM) {
          for i in par(6) {
            for j in par(16) {
              for k in par(K) {
                C[i, j] += A[i, k] * B[k, j];
              }
            }
          }
        }
    "#;

    #[test]
    fn test_parse_sgemm() {
        let proc = parse_proc(SGEMM).unwrap();
        assert_eq!(proc.name, "sgemm");
        assert_eq!(proc.params.len(), 4);
        assert!(matches!(&proc.params[0], Param::Size(n) if n == "K"));
        let c = proc.buffer_param("C").unwrap();
        assert_eq!(c.shape, vec![Expr::int(6), Expr::int(16)]);
        assert_eq!(c.mem, MemorySpace::Dram);
        let Stmt::Loop(i) = &proc.body.stmts[0] else {
            panic!("expected loop");
        };
        assert_eq!(i.var, "i");
        assert_eq!(i.mode, LoopMode::Par);
    }

    #[test]
    fn test_round_trip() {
        let proc = parse_proc(SGEMM).unwrap();
        let printed = proc.to_string();
        assert_eq!(parse_proc(&printed).unwrap(), proc);
    }

    #[test]
    fn test_round_trip_all_forms() {
        let text = r#"
            @instr("{dst} = _mm256_loadu_ps(&{src});")
            proc t(N: size, x: f32[N, 8] @ DRAM) {
              acc: f32[2, 8] @ AVX2;
              s: f32 @ DRAM;
              s = 0.0;
              for io in seq((N + 7) / 8) {
                if 8 * io + 3 < N and io >= 1 {
                  s += -x[8 * io, 0] * 2.5 - -1.0;
                }
                mm256_loadu_ps(acc[0, 0:8], x[io, 0:8]);
              }
              x[0, 0] = s % 3.0;
            }
        "#;
        let proc = parse_proc(text).unwrap();
        assert_eq!(proc.instr.as_deref(), Some("{dst} = _mm256_loadu_ps(&{src});"));
        let again = parse_proc(&proc.to_string()).unwrap();
        assert_eq!(again, proc);
    }

    #[test]
    fn test_scalar_reads_resolve_to_buffers() {
        let proc = parse_proc(
            "proc f(N: size, y: f32[N] @ DRAM) { t: f32; for i in seq(N) { t = y[i]; y[i] = t * N; } }",
        )
        .unwrap();
        let Stmt::Loop(l) = &proc.body.stmts[1] else {
            panic!("expected loop");
        };
        let Stmt::Assign(a) = &l.body.stmts[1] else {
            panic!("expected assign");
        };
        assert_eq!(a.rhs, Expr::read("t", vec![]) * Expr::var("N"));
    }

    #[test]
    fn test_negative_literals() {
        assert_eq!(parse_expr("-3").unwrap(), Expr::int(-3));
        assert_eq!(parse_expr("- x").unwrap(), -Expr::var("x"));
        assert_eq!(parse_expr("--3").unwrap(), -Expr::int(-3));
        assert_eq!(parse_expr("a - -3").unwrap(), Expr::var("a") - Expr::int(-3));
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            parse_expr("a + b * c").unwrap(),
            Expr::var("a") + Expr::var("b") * Expr::var("c")
        );
        assert_eq!(
            parse_expr("a - b - c").unwrap(),
            (Expr::var("a") - Expr::var("b")) - Expr::var("c")
        );
        assert_eq!(
            parse_expr("8 * jo + ji < N").unwrap(),
            Expr::binary(
                BinOp::Lt,
                Expr::int(8) * Expr::var("jo") + Expr::var("ji"),
                Expr::var("N")
            )
        );
    }

    #[test]
    fn test_keywords_are_not_prefixes() {
        let s = parse_stmt("format = index;").unwrap();
        assert!(matches!(s, Stmt::Assign(Assign { ref buf, .. }) if buf == "format"));
        let s = parse_stmt("iffy[0] += 1.0;").unwrap();
        assert!(matches!(s, Stmt::Reduce(_)));
    }

    #[test]
    fn test_parse_multiple_procs() {
        let procs = parse_procs(&format!("{SGEMM}\n{SGEMM}")).unwrap();
        assert_eq!(procs.len(), 2);
        assert!(parse_procs("").unwrap().is_empty());
    }

    #[test]
    fn test_trailing_input_is_rejected() {
        let err = parse_proc("proc f() { } extra").unwrap_err();
        assert!(err.message.contains("trailing"));
        assert_eq!(err.offset, 13);
    }

    #[test]
    fn test_bad_memory_space() {
        assert!(parse_proc("proc f(x: f32[4] @ SRAM) { }").is_err());
    }

    mod proptest_fuzz {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(500))]

            /// Random strings must not panic the parser.
            #[test]
            fn parser_handles_random_strings(input in "\\PC{0,200}") {
                let _ = parse_procs(&input);
                let _ = parse_expr(&input);
            }
        }
    }
}
