//! Kernel text format printer.
//!
//! The output is accepted by [`crate::parser`] and parses back to an equal
//! [`Proc`]. Expressions print with the minimum parentheses their
//! precedence requires.
//!
//! # Example output
//!
//! ```text
//! proc sgemm(K: size, A: f32[6, K] @ DRAM, B: f32[K, 16] @ DRAM, C: f32[6, 16] @ DRAM) {
//!   for i in par(6) {
//!     for j in par(16) {
//!       for k in par(K) {
//!         C[i, j] += A[i, k] * B[k, j];
//!       }
//!     }
//!   }
//! }
//! ```

use std::fmt::{self, Write};

use crate::ast::{Block, BufferDecl, Expr, Param, Proc, Stmt, Window, WindowDim};

/// Printer state: output buffer plus current indentation.
pub struct PrintState {
    pub output: String,
    /// Current indentation level (in spaces, 2-space indent)
    pub indent: usize,
}

impl PrintState {
    pub fn new() -> Self {
        Self {
            output: String::new(),
            indent: 0,
        }
    }

    pub fn finish(self) -> String {
        self.output
    }

    pub fn write_indent(&mut self) {
        for _ in 0..self.indent {
            self.output.push(' ');
        }
    }
}

impl Default for PrintState {
    fn default() -> Self {
        Self::new()
    }
}

/// Print a procedure, with its `@instr` line when it is a template.
pub fn print_proc(state: &mut PrintState, proc: &Proc) -> fmt::Result {
    if let Some(instr) = &proc.instr {
        state.output.push_str("@instr(");
        print_string(state, instr);
        state.output.push_str(")\n");
    }
    write!(state.output, "proc {}(", proc.name)?;
    for (i, param) in proc.params.iter().enumerate() {
        if i > 0 {
            state.output.push_str(", ");
        }
        match param {
            Param::Size(name) => write!(state.output, "{name}: size")?,
            Param::Buffer(decl) => print_decl(state, decl)?,
        }
    }
    state.output.push_str(") ");
    print_block(state, &proc.body)
}

fn print_string(state: &mut PrintState, s: &str) {
    state.output.push('"');
    for c in s.chars() {
        match c {
            '"' => state.output.push_str("\\\""),
            '\\' => state.output.push_str("\\\\"),
            '\n' => state.output.push_str("\\n"),
            '\t' => state.output.push_str("\\t"),
            _ => state.output.push(c),
        }
    }
    state.output.push('"');
}

fn print_decl(state: &mut PrintState, decl: &BufferDecl) -> fmt::Result {
    write!(state.output, "{}: {}", decl.name, decl.ty)?;
    if !decl.shape.is_empty() {
        state.output.push('[');
        print_expr_list(state, &decl.shape)?;
        state.output.push(']');
    }
    write!(state.output, " @ {}", decl.mem)
}

/// Print `{`, the statements one per line, then `}` at the current indent.
pub fn print_block(state: &mut PrintState, block: &Block) -> fmt::Result {
    state.output.push_str("{\n");
    state.indent += 2;
    for stmt in block {
        print_stmt(state, stmt)?;
    }
    state.indent -= 2;
    state.write_indent();
    state.output.push('}');
    Ok(())
}

pub fn print_stmt(state: &mut PrintState, stmt: &Stmt) -> fmt::Result {
    state.write_indent();
    match stmt {
        Stmt::Loop(l) => {
            write!(state.output, "for {} in {}(", l.var, l.mode.keyword())?;
            print_expr(state, &l.bound)?;
            state.output.push_str(") ");
            print_block(state, &l.body)?;
        }
        Stmt::If(i) => {
            state.output.push_str("if ");
            print_expr(state, &i.cond)?;
            state.output.push(' ');
            print_block(state, &i.body)?;
        }
        Stmt::Assign(a) | Stmt::Reduce(a) => {
            state.output.push_str(&a.buf);
            if !a.idx.is_empty() {
                state.output.push('[');
                print_expr_list(state, &a.idx)?;
                state.output.push(']');
            }
            let op = if matches!(stmt, Stmt::Reduce(_)) { "+=" } else { "=" };
            write!(state.output, " {op} ")?;
            print_expr(state, &a.rhs)?;
            state.output.push(';');
        }
        Stmt::Alloc(decl) => {
            print_decl(state, decl)?;
            state.output.push(';');
        }
        Stmt::Call(c) => {
            write!(state.output, "{}(", c.template)?;
            for (i, w) in c.args.iter().enumerate() {
                if i > 0 {
                    state.output.push_str(", ");
                }
                print_window(state, w)?;
            }
            state.output.push_str(");");
        }
    }
    state.output.push('\n');
    Ok(())
}

fn print_window(state: &mut PrintState, w: &Window) -> fmt::Result {
    state.output.push_str(&w.buf);
    if w.dims.is_empty() {
        return Ok(());
    }
    state.output.push('[');
    for (i, d) in w.dims.iter().enumerate() {
        if i > 0 {
            state.output.push_str(", ");
        }
        match d {
            WindowDim::Point(e) => print_expr(state, e)?,
            WindowDim::Interval(lo, hi) => {
                print_expr(state, lo)?;
                state.output.push(':');
                print_expr(state, hi)?;
            }
        }
    }
    state.output.push(']');
    Ok(())
}

fn print_expr_list(state: &mut PrintState, exprs: &[Expr]) -> fmt::Result {
    for (i, e) in exprs.iter().enumerate() {
        if i > 0 {
            state.output.push_str(", ");
        }
        print_expr(state, e)?;
    }
    Ok(())
}

pub fn print_expr(state: &mut PrintState, expr: &Expr) -> fmt::Result {
    match expr {
        Expr::Var(v) => state.output.push_str(v),
        Expr::Int(n) => write!(state.output, "{n}")?,
        Expr::Float(f) => {
            if f.fract() == 0.0 && f.is_finite() {
                write!(state.output, "{:.1}", f)?;
            } else {
                write!(state.output, "{}", f)?;
            }
        }
        Expr::Read(buf, idx) => {
            state.output.push_str(buf);
            if !idx.is_empty() {
                state.output.push('[');
                print_expr_list(state, idx)?;
                state.output.push(']');
            }
        }
        Expr::Binary(op, l, r) => {
            let prec = op.precedence();
            // Comparisons do not chain, so both sides need strictly tighter operands.
            let left_min = if op.is_comparison() { prec + 1 } else { prec };
            print_operand(state, l, left_min)?;
            write!(state.output, " {} ", op.symbol())?;
            print_operand(state, r, prec + 1)?;
        }
        Expr::Neg(e) => {
            state.output.push('-');
            print_operand(state, e, 5)?;
        }
    }
    Ok(())
}

fn print_operand(state: &mut PrintState, expr: &Expr, min_prec: u8) -> fmt::Result {
    if expr.precedence() < min_prec {
        state.output.push('(');
        print_expr(state, expr)?;
        state.output.push(')');
        Ok(())
    } else {
        print_expr(state, expr)
    }
}

impl fmt::Display for Proc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut state = PrintState::new();
        print_proc(&mut state, self)?;
        f.write_str(&state.finish())
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut state = PrintState::new();
        print_stmt(&mut state, self)?;
        f.write_str(state.finish().trim_end())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut state = PrintState::new();
        print_expr(&mut state, self)?;
        f.write_str(&state.finish())
    }
}
