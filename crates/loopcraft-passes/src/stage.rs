//! Staging through temporaries: `stage_assn` and `bind_expr`.

use loopcraft_ir::select::resolve_expr;
use loopcraft_ir::{Assign, BufferDecl, Expr, MemorySpace, Proc, ScalarType, Stmt, StmtPath};

use crate::error::{ScheduleError, ScheduleResult};
use crate::util::{ensure_fresh, finish, insert_before, parse_selector, resolve_any_stmt, splice, visible_decl};

/// Route a reduction through a scalar temporary:
///
/// ```text
/// C[i, j] += e;
/// ```
///
/// becomes
///
/// ```text
/// name: f32 @ DRAM;
/// name = C[i, j];
/// name += e;
/// C[i, j] = name;
/// ```
pub fn stage_assn(proc: &Proc, name: &str, reduce_sel: &str) -> ScheduleResult<Proc> {
    let path = resolve_any_stmt(proc, reduce_sel)?;
    let Some(Stmt::Reduce(a)) = proc.stmt(&path) else {
        return Err(ScheduleError::NotFound {
            pattern: format!("{reduce_sel} (a reduction)"),
        });
    };
    ensure_fresh(proc, name)?;
    let decl = visible_decl(proc, &path, &a.buf)
        .ok_or_else(|| ScheduleError::state(format!("`{}` is not declared", a.buf)))?;
    let ty = decl.ty;
    tracing::debug!(buffer = %a.buf, staged = name, at = %path, "stage_assn");

    let target = Expr::read(a.buf.clone(), a.idx.clone());
    let staged = vec![
        Stmt::Alloc(BufferDecl::new(name, ty, vec![], MemorySpace::Dram)),
        Stmt::Assign(Assign {
            buf: name.to_owned(),
            idx: vec![],
            rhs: target,
        }),
        Stmt::Reduce(Assign {
            buf: name.to_owned(),
            idx: vec![],
            rhs: a.rhs.clone(),
        }),
        Stmt::Assign(Assign {
            buf: a.buf.clone(),
            idx: a.idx.clone(),
            rhs: Expr::read(name, vec![]),
        }),
    ];
    let mut out = proc.clone();
    splice(&mut out, &path, staged)?;
    finish(out)
}

/// Compute the selected data expression into a new scalar `name` right
/// before its statement, and read `name` in its place.
///
/// Only the selected occurrence is replaced. A plain read (or its negation)
/// is held in the element type of the buffer it reads; anything else is
/// held in `f64`, the precision expressions are evaluated in, so the
/// temporary never rounds a value the original statement kept exact.
pub fn bind_expr(proc: &Proc, name: &str, expr_sel: &str) -> ScheduleResult<Proc> {
    let selector = parse_selector(expr_sel)?;
    let target = resolve_expr(proc, &selector)?;
    let stmt = proc
        .stmt(&target.stmt)
        .ok_or_else(|| ScheduleError::state(format!("no statement at {}", target.stmt)))?;
    let (Stmt::Assign(a) | Stmt::Reduce(a)) = stmt else {
        return Err(ScheduleError::shape(format!("`{expr_sel}` is an index expression")));
    };
    if !stmt.is_data_slot(target.slot) || in_index_position(&a.rhs, &target.steps) {
        return Err(ScheduleError::shape(format!("`{expr_sel}` is an index expression")));
    }
    let value = proc
        .expr_at(&target)
        .cloned()
        .ok_or_else(|| ScheduleError::state(format!("`{expr_sel}` does not resolve")))?;
    if !is_data_valued(&value) {
        return Err(ScheduleError::shape(format!("`{value}` is not a data value")));
    }
    ensure_fresh(proc, name)?;
    let ty = value_type(proc, &target.stmt, &value)?;
    tracing::debug!(bound = name, expr = %value, at = %target.stmt, "bind_expr");

    let binding = vec![
        Stmt::Alloc(BufferDecl::new(name, ty, vec![], MemorySpace::Dram)),
        Stmt::Assign(Assign {
            buf: name.to_owned(),
            idx: vec![],
            rhs: value,
        }),
    ];
    let mut out = proc.clone();
    if let Some(slot) = out.expr_at_mut(&target) {
        *slot = Expr::read(name, vec![]);
    }
    insert_before(&mut out, &target.stmt, binding)?;
    finish(out)
}

/// Element type that holds every value of `e` exactly.
fn value_type(proc: &Proc, at: &StmtPath, e: &Expr) -> ScheduleResult<ScalarType> {
    match e {
        Expr::Read(buf, _) => visible_decl(proc, at, buf)
            .map(|d| d.ty)
            .ok_or_else(|| ScheduleError::state(format!("`{buf}` is not declared"))),
        Expr::Neg(x) => value_type(proc, at, x),
        _ => Ok(ScalarType::F64),
    }
}

/// Whether following `steps` from `e` passes through the index list of a
/// buffer read.
fn in_index_position(e: &Expr, steps: &[usize]) -> bool {
    match (e, steps.split_first()) {
        (_, None) => false,
        (Expr::Read(..), Some(_)) => true,
        (_, Some((first, rest))) => e
            .children()
            .get(*first)
            .is_some_and(|child| in_index_position(child, rest)),
    }
}

fn is_data_valued(e: &Expr) -> bool {
    match e {
        Expr::Read(..) | Expr::Float(_) => true,
        _ => e.children().into_iter().any(is_data_valued),
    }
}
