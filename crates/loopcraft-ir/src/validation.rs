//! Well-formedness checks for kernels.
//!
//! A kernel is well formed when every name resolves to a declaration in
//! scope, no declaration shadows a visible name, index positions hold
//! integer expressions only, buffer accesses match the declared rank, every
//! buffer's memory space admits its element type, and every template call
//! agrees with the template's parameter contracts.

use std::collections::BTreeSet;
use std::fmt;

use crate::affine::Affine;
use crate::ast::{Block, BufferDecl, Call, Expr, Param, Proc, Stmt, StmtPath, WindowDim};

/// Signature lookup for template calls.
pub trait TemplateLookup {
    fn template(&self, name: &str) -> Option<&Proc>;
}

/// Category of a well-formedness violation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationKind {
    /// Unknown or shadowed name.
    Scope,
    /// Index count differs from the declared rank.
    Rank,
    /// Data where an index is required, or the reverse.
    Type,
    /// Element type or placement not allowed in the memory space.
    Memory,
    /// Call does not fit the template's parameter contracts.
    Template,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ValidationError {
    pub kind: ValidationKind,
    pub message: String,
    /// Offending statement, when the problem is inside the body.
    pub at: Option<StmtPath>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.at {
            Some(at) => write!(f, "{} (at {})", self.message, at),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Result of kernel validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// The first violation, if any.
    pub fn into_result(self) -> Result<(), ValidationError> {
        match self.errors.into_iter().next() {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            write!(f, "validation passed")
        } else {
            writeln!(f, "{} problem(s) found:", self.errors.len())?;
            for err in &self.errors {
                writeln!(f, "  - {}", err)?;
            }
            Ok(())
        }
    }
}

/// Check `proc`. Call signatures are checked only when `templates` is given.
pub fn validate_proc(proc: &Proc, templates: Option<&dyn TemplateLookup>) -> ValidationResult {
    let mut v = Validator {
        templates,
        is_template: proc.is_template(),
        sizes: BTreeSet::new(),
        vars: Vec::new(),
        buffers: Vec::new(),
        errors: Vec::new(),
        at: None,
    };
    v.params(&proc.params);
    v.block(&proc.body, &[]);
    ValidationResult { errors: v.errors }
}

/// Shorthand for `validate_proc(..).into_result()`.
pub fn validate(proc: &Proc, templates: Option<&dyn TemplateLookup>) -> Result<(), ValidationError> {
    validate_proc(proc, templates).into_result()
}

struct Validator<'a> {
    templates: Option<&'a dyn TemplateLookup>,
    is_template: bool,
    sizes: BTreeSet<String>,
    vars: Vec<String>,
    buffers: Vec<BufferDecl>,
    errors: Vec<ValidationError>,
    at: Option<StmtPath>,
}

impl Validator<'_> {
    fn error(&mut self, kind: ValidationKind, message: String) {
        self.errors.push(ValidationError {
            kind,
            message,
            at: self.at.clone(),
        });
    }

    fn is_visible(&self, name: &str) -> bool {
        self.sizes.contains(name)
            || self.vars.iter().any(|v| v == name)
            || self.buffers.iter().any(|b| b.name == name)
    }

    fn buffer(&self, name: &str) -> Option<&BufferDecl> {
        self.buffers.iter().rev().find(|b| b.name == name)
    }

    fn params(&mut self, params: &[Param]) {
        for p in params {
            if self.is_visible(p.name()) {
                self.error(ValidationKind::Scope, format!("duplicate parameter `{}`", p.name()));
            }
            match p {
                Param::Size(n) => {
                    self.sizes.insert(n.clone());
                }
                Param::Buffer(d) => {
                    if d.mem.is_register() && !self.is_template {
                        self.error(
                            ValidationKind::Memory,
                            format!("parameter `{}` cannot live in {}", d.name, d.mem),
                        );
                    }
                    self.decl(d);
                }
            }
        }
    }

    fn decl(&mut self, d: &BufferDecl) {
        if !d.mem.supports(d.ty) {
            self.error(
                ValidationKind::Memory,
                format!("{} cannot hold {} buffer `{}`", d.mem, d.ty, d.name),
            );
        }
        for e in &d.shape {
            self.index(e);
        }
        self.buffers.push(d.clone());
    }

    fn block(&mut self, block: &Block, prefix: &[usize]) {
        let saved = self.buffers.len();
        for (i, stmt) in block.iter().enumerate() {
            let mut path = prefix.to_vec();
            path.push(i);
            self.at = Some(StmtPath(path.clone()));
            self.stmt(stmt, &path);
        }
        self.buffers.truncate(saved);
    }

    fn stmt(&mut self, stmt: &Stmt, path: &[usize]) {
        match stmt {
            Stmt::Loop(l) => {
                self.index(&l.bound);
                if self.is_visible(&l.var) {
                    self.error(ValidationKind::Scope, format!("loop variable `{}` shadows a visible name", l.var));
                }
                self.vars.push(l.var.clone());
                self.block(&l.body, path);
                self.vars.pop();
            }
            Stmt::If(i) => {
                self.cond(&i.cond);
                self.block(&i.body, path);
            }
            Stmt::Alloc(d) => {
                if self.is_visible(&d.name) {
                    self.error(ValidationKind::Scope, format!("allocation `{}` shadows a visible name", d.name));
                }
                self.decl(d);
            }
            Stmt::Assign(a) | Stmt::Reduce(a) => {
                self.access(&a.buf, &a.idx);
                self.data(&a.rhs);
            }
            Stmt::Call(c) => self.call(c),
        }
    }

    fn access(&mut self, buf: &str, idx: &[Expr]) {
        match self.buffer(buf).map(|d| d.rank()) {
            None => self.error(ValidationKind::Scope, format!("unknown buffer `{buf}`")),
            Some(rank) if rank != idx.len() => self.error(
                ValidationKind::Rank,
                format!("`{buf}` has rank {rank} but is accessed with {} indices", idx.len()),
            ),
            Some(_) => {}
        }
        for e in idx {
            self.index(e);
        }
    }

    fn index(&mut self, e: &Expr) {
        match e {
            Expr::Var(v) => {
                if self.buffer(v).is_some() {
                    self.error(ValidationKind::Type, format!("buffer `{v}` used as an index"));
                } else if !self.sizes.contains(v) && !self.vars.contains(v) {
                    self.error(ValidationKind::Scope, format!("unknown variable `{v}`"));
                }
            }
            Expr::Int(_) => {}
            Expr::Float(_) => self.error(ValidationKind::Type, format!("float `{e}` in index position")),
            Expr::Read(b, _) => self.error(ValidationKind::Type, format!("read of `{b}` in index position")),
            Expr::Binary(op, l, r) if op.is_arithmetic() => {
                self.index(l);
                self.index(r);
            }
            Expr::Binary(..) => self.error(ValidationKind::Type, format!("`{e}` is not an index expression")),
            Expr::Neg(x) => self.index(x),
        }
    }

    fn data(&mut self, e: &Expr) {
        match e {
            Expr::Var(v) => {
                if !self.sizes.contains(v) && !self.vars.contains(v) {
                    self.error(ValidationKind::Scope, format!("unknown variable `{v}`"));
                }
            }
            Expr::Int(_) | Expr::Float(_) => {}
            Expr::Read(b, idx) => self.access(b, idx),
            Expr::Binary(op, l, r) if op.is_arithmetic() => {
                self.data(l);
                self.data(r);
            }
            Expr::Binary(..) => self.error(ValidationKind::Type, format!("`{e}` is not a data expression")),
            Expr::Neg(x) => self.data(x),
        }
    }

    fn cond(&mut self, e: &Expr) {
        match e {
            Expr::Binary(crate::ast::BinOp::And, l, r) => {
                self.cond(l);
                self.cond(r);
            }
            Expr::Binary(op, l, r) if op.is_comparison() => {
                self.index(l);
                self.index(r);
            }
            _ => self.error(ValidationKind::Type, format!("`{e}` is not a condition")),
        }
    }

    fn call(&mut self, call: &Call) {
        for w in &call.args {
            let rank = self.buffer(&w.buf).map(|d| d.rank());
            match rank {
                None => self.error(ValidationKind::Scope, format!("unknown buffer `{}`", w.buf)),
                Some(r) if r != w.dims.len() => self.error(
                    ValidationKind::Rank,
                    format!("window on `{}` has {} dimensions, buffer has {r}", w.buf, w.dims.len()),
                ),
                Some(_) => {}
            }
            for e in w.exprs() {
                self.index(e);
            }
        }

        let Some(templates) = self.templates else {
            return;
        };
        let Some(template) = templates.template(&call.template) else {
            self.error(ValidationKind::Template, format!("unknown template `{}`", call.template));
            return;
        };
        if template.params.len() != call.args.len() {
            self.error(
                ValidationKind::Template,
                format!(
                    "`{}` takes {} arguments, got {}",
                    call.template,
                    template.params.len(),
                    call.args.len()
                ),
            );
            return;
        }
        let mut problems = Vec::new();
        for (w, p) in call.args.iter().zip(&template.params) {
            let Param::Buffer(formal) = p else {
                problems.push(format!("parameter `{}` of `{}` is not a buffer", p.name(), call.template));
                continue;
            };
            let Some(actual) = self.buffer(&w.buf) else {
                continue;
            };
            if actual.ty != formal.ty {
                problems.push(format!(
                    "`{}` is {} but `{}` expects {}",
                    w.buf, actual.ty, formal.name, formal.ty
                ));
            }
            if actual.mem != formal.mem {
                problems.push(format!(
                    "`{}` lives in {} but `{}` expects {}",
                    w.buf, actual.mem, formal.name, formal.mem
                ));
            }
            if w.rank() != formal.rank() {
                problems.push(format!(
                    "window on `{}` has rank {} but `{}` has rank {}",
                    w.buf,
                    w.rank(),
                    formal.name,
                    formal.rank()
                ));
                continue;
            }
            let intervals = w.dims.iter().filter_map(|d| match d {
                WindowDim::Interval(lo, hi) => Some((lo, hi)),
                WindowDim::Point(_) => None,
            });
            for ((lo, hi), extent) in intervals.zip(&formal.shape) {
                let width = Affine::from_expr(hi)
                    .zip(Affine::from_expr(lo))
                    .and_then(|(h, l)| h.sub(&l)?.as_constant());
                match (width, extent.as_int()) {
                    (Some(got), Some(want)) if got == want => {}
                    (Some(got), Some(want)) => problems.push(format!(
                        "window `{lo}:{hi}` has extent {got} but `{}` expects {want}",
                        formal.name
                    )),
                    _ => problems.push(format!("window `{lo}:{hi}` has no constant extent")),
                }
            }
        }
        for p in problems {
            self.error(ValidationKind::Template, p);
        }
    }
}
