//! Memory placement: `set_memory` and `unroll_buffer`.

use loopcraft_ir::select::resolve_stmt;
use loopcraft_ir::{
    BufferDecl, Expr, MemorySpace, Proc, Stmt, TemplateLookup, ValidationKind, WindowDim, validate,
};

use crate::error::{ScheduleError, ScheduleResult};
use crate::util::{const_value, ensure_fresh, finish, parse_selector, splice};

/// Move an allocation to `space`.
///
/// Parameters keep the space of their caller and cannot be retagged.
/// When `templates` is given, every call passing the buffer must still
/// agree with the template's parameter contract.
pub fn set_memory(
    proc: &Proc,
    alloc_sel: &str,
    space: MemorySpace,
    templates: Option<&dyn TemplateLookup>,
) -> ScheduleResult<Proc> {
    if proc.buffer_param(alloc_sel.trim()).is_some() {
        return Err(ScheduleError::memory(format!(
            "`{}` is a parameter; only allocations can be moved",
            alloc_sel.trim()
        )));
    }
    let selector = parse_selector(alloc_sel)?.as_alloc();
    let path = resolve_stmt(proc, &selector)?;
    let Some(Stmt::Alloc(decl)) = proc.stmt(&path) else {
        return Err(ScheduleError::NotFound {
            pattern: selector.source,
        });
    };
    if !space.supports(decl.ty) {
        return Err(ScheduleError::memory(format!(
            "{space} cannot hold {} buffer `{}`",
            decl.ty, decl.name
        )));
    }
    tracing::debug!(buffer = %decl.name, from = %decl.mem, to = %space, "set_memory");

    let mut out = proc.clone();
    if let Some(Stmt::Alloc(d)) = out.stmt_mut(&path) {
        d.mem = space;
    }
    match validate(&out, templates) {
        Ok(()) => Ok(out),
        Err(e) if matches!(e.kind, ValidationKind::Memory | ValidationKind::Template) => {
            Err(ScheduleError::memory(e))
        }
        Err(e) => Err(e.into()),
    }
}

/// Replace a register buffer by one buffer per index of dimension `dim`,
/// named `name_0`, `name_1`, ... Every access must use a constant index
/// in that dimension.
pub fn unroll_buffer(proc: &Proc, alloc_sel: &str, dim: usize) -> ScheduleResult<Proc> {
    let selector = parse_selector(alloc_sel)?.as_alloc();
    let path = resolve_stmt(proc, &selector)?;
    let Some(Stmt::Alloc(decl)) = proc.stmt(&path) else {
        return Err(ScheduleError::NotFound {
            pattern: selector.source,
        });
    };
    if !decl.mem.is_register() {
        return Err(ScheduleError::memory(format!(
            "`{}` lives in {}; only register buffers can be unrolled",
            decl.name, decl.mem
        )));
    }
    let Some(extent) = decl.shape.get(dim) else {
        return Err(ScheduleError::shape(format!(
            "`{}` has rank {}, no dimension {dim}",
            decl.name,
            decl.rank()
        )));
    };
    let n = const_value(extent).ok_or_else(|| ScheduleError::not_constant(format!("{}[{dim}]", decl.name)))?;
    let names: Vec<String> = (0..n).map(|k| format!("{}_{k}", decl.name)).collect();
    for name in &names {
        ensure_fresh(proc, name)?;
    }
    tracing::debug!(buffer = %decl.name, dim, parts = n, "unroll_buffer");

    let mut shape = decl.shape.clone();
    shape.remove(dim);
    let parts: Vec<Stmt> = names
        .iter()
        .map(|name| Stmt::Alloc(BufferDecl::new(name.clone(), decl.ty, shape.clone(), decl.mem)))
        .collect();

    let split = Split {
        name: &decl.name,
        dim,
        names: &names,
    };
    let mut out = proc.clone();
    let index = path.last();
    let block = out
        .container_mut(&path)
        .ok_or_else(|| ScheduleError::state(format!("no statement at {path}")))?;
    for stmt in block.stmts.iter_mut().skip(index + 1) {
        split.stmt(stmt)?;
    }
    splice(&mut out, &path, parts)?;
    finish(out)
}

struct Split<'a> {
    name: &'a str,
    dim: usize,
    names: &'a [String],
}

impl Split<'_> {
    /// Name of the part addressed by `index`, which is removed from the
    /// index list by the caller.
    fn part(&self, index: &Expr) -> ScheduleResult<String> {
        let k = const_value(index)
            .ok_or_else(|| ScheduleError::not_constant(format!("index `{index}` of `{}`", self.name)))?;
        usize::try_from(k)
            .ok()
            .and_then(|k| self.names.get(k))
            .cloned()
            .ok_or_else(|| ScheduleError::shape(format!("index {k} is outside `{}`", self.name)))
    }

    fn indices(&self, buf: &mut String, idx: &mut Vec<Expr>) -> ScheduleResult<()> {
        if buf.as_str() != self.name || self.dim >= idx.len() {
            return Ok(());
        }
        let index = idx.remove(self.dim);
        *buf = self.part(&index)?;
        Ok(())
    }

    fn expr(&self, e: &mut Expr) -> ScheduleResult<()> {
        if let Expr::Read(buf, idx) = e {
            self.indices(buf, idx)?;
        }
        for child in e.children_mut() {
            self.expr(child)?;
        }
        Ok(())
    }

    fn stmt(&self, stmt: &mut Stmt) -> ScheduleResult<()> {
        for e in stmt.exprs_mut() {
            self.expr(e)?;
        }
        match stmt {
            Stmt::Assign(a) | Stmt::Reduce(a) => self.indices(&mut a.buf, &mut a.idx)?,
            Stmt::Call(c) => {
                for w in c.args.iter_mut().filter(|w| w.buf == self.name) {
                    let Some(d) = w.dims.get(self.dim) else {
                        continue;
                    };
                    let WindowDim::Point(index) = d else {
                        return Err(ScheduleError::not_constant(format!(
                            "window over dimension {} of `{}`",
                            self.dim, self.name
                        )));
                    };
                    let part = self.part(index)?;
                    w.dims.remove(self.dim);
                    w.buf = part;
                }
            }
            _ => {}
        }
        if let Some(body) = stmt.body_mut() {
            for s in &mut body.stmts {
                self.stmt(s)?;
            }
        }
        Ok(())
    }
}
