//! Helpers shared by the primitives.

use std::collections::BTreeSet;

use loopcraft_ir::affine::Affine;
use loopcraft_ir::select::{resolve_stmt, Selector};
use loopcraft_ir::walk::for_each_stmt;
use loopcraft_ir::{Block, BufferDecl, Expr, Proc, Stmt, StmtPath, validate};

use crate::error::{ScheduleError, ScheduleResult};

/// Value of an index expression that folds to a constant.
pub(crate) fn const_value(e: &Expr) -> Option<i64> {
    Affine::from_expr(e)?.as_constant()
}

/// Parse a selector, reporting malformed text as a schedule error.
pub(crate) fn parse_selector(text: &str) -> ScheduleResult<Selector> {
    Selector::parse(text).map_err(|e| ScheduleError::InvalidSelector {
        selector: text.to_owned(),
        message: e.message,
    })
}

/// Resolve `text` to a loop statement. A bare name `x` means `for x in _:_`.
pub(crate) fn resolve_loop(proc: &Proc, text: &str) -> ScheduleResult<StmtPath> {
    let selector = parse_selector(text)?.as_loop();
    let path = resolve_stmt(proc, &selector)?;
    match proc.stmt(&path) {
        Some(Stmt::Loop(_)) => Ok(path),
        _ => Err(ScheduleError::NotFound {
            pattern: selector.source,
        }),
    }
}

/// Resolve `text` to any statement.
pub(crate) fn resolve_any_stmt(proc: &Proc, text: &str) -> ScheduleResult<StmtPath> {
    let selector = parse_selector(text)?;
    Ok(resolve_stmt(proc, &selector)?)
}

/// Fail with `NameCollision` if `name` is bound anywhere in `proc`.
pub(crate) fn ensure_fresh(proc: &Proc, name: &str) -> ScheduleResult<()> {
    if proc.bound_names().contains(name) {
        return Err(ScheduleError::collision(name));
    }
    Ok(())
}

/// Structural re-check of a rewritten kernel.
pub(crate) fn finish(proc: Proc) -> ScheduleResult<Proc> {
    validate(&proc, None)?;
    Ok(proc)
}

/// Replace the statement at `path` by `stmts` in its containing block.
pub(crate) fn splice(proc: &mut Proc, path: &StmtPath, stmts: Vec<Stmt>) -> ScheduleResult<()> {
    let index = path.last();
    let block = proc
        .container_mut(path)
        .ok_or_else(|| ScheduleError::state(format!("no statement at {path}")))?;
    if index >= block.stmts.len() {
        return Err(ScheduleError::state(format!("no statement at {path}")));
    }
    block.stmts.splice(index..=index, stmts);
    Ok(())
}

/// Insert `stmts` in front of the statement at `path`.
pub(crate) fn insert_before(proc: &mut Proc, path: &StmtPath, stmts: Vec<Stmt>) -> ScheduleResult<()> {
    let index = path.last();
    let block = proc
        .container_mut(path)
        .ok_or_else(|| ScheduleError::state(format!("no statement at {path}")))?;
    block.stmts.splice(index..index, stmts);
    Ok(())
}

/// The declaration of `name` visible at `path`: a parameter, or an
/// allocation earlier in an enclosing block.
pub(crate) fn visible_decl<'p>(proc: &'p Proc, path: &StmtPath, name: &str) -> Option<&'p BufferDecl> {
    let indices = path.indices();
    let mut found = proc.buffer_param(name);
    let mut block = &proc.body;
    for (depth, &index) in indices.iter().enumerate() {
        for stmt in block.stmts.iter().take(index) {
            if let Stmt::Alloc(d) = stmt
                && d.name == name
            {
                found = Some(d);
            }
        }
        if depth + 1 == indices.len() {
            break;
        }
        block = block.stmts.get(index)?.body()?;
    }
    found
}

/// All allocations in `proc` with the given name.
pub(crate) fn find_allocs(proc: &Proc, name: &str) -> Vec<StmtPath> {
    let mut out = Vec::new();
    for_each_stmt(&proc.body, &mut |path, stmt| {
        if let Stmt::Alloc(d) = stmt
            && d.name == name
        {
            out.push(path.clone());
        }
    });
    out
}

/// Names of buffers allocated anywhere inside `stmts`.
pub(crate) fn allocated_in(stmts: &[Stmt]) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for s in stmts {
        for_each_stmt(&Block::new(vec![s.clone()]), &mut |_, stmt| {
            if let Stmt::Alloc(d) = stmt {
                out.insert(d.name.clone());
            }
        });
    }
    out
}

/// Whether `bound` is provably at least 1, given that sizes are positive.
pub(crate) fn provably_positive(bound: &Expr, sizes: &BTreeSet<String>) -> bool {
    let Some(a) = Affine::from_expr(bound) else {
        return false;
    };
    let coefficients = a.coefficients();
    if !coefficients.keys().all(|v| sizes.contains(*v)) {
        return false;
    }
    match a.range(|_| Some((1, 1))) {
        Some((lo, _)) => coefficients.values().all(|c| *c >= 0) && lo >= 1,
        None => false,
    }
}
