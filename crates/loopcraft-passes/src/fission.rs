//! Loop fission.
//!
//! `fission_after(s, n)` cuts the body of each of the `n` scopes around `s`
//! right after `s` (or after the scope produced by the previous cut), so
//! that the statements up to the cut and the statements after it run in
//! two sibling copies of the scope.
//!
//! A loop can also be cut when one half does not depend on the loop
//! variable and running it once is equivalent to running it on every
//! iteration. That half is then placed outside the loop:
//!
//! - a prefix made of copies `D[e] = S[f]` whose reverse copies
//!   `S[f] = D[e]` appear later in the suffix is a no-op from the second
//!   iteration on, so it runs once before the loop;
//! - a suffix of plain assignments that never read what they write, and
//!   whose targets the prefix never touches, only matters on the last
//!   iteration, so it runs once after the loop.
//!
//! Both need the loop to run at least once.

use std::collections::BTreeSet;

use loopcraft_ir::affine::same_index;
use loopcraft_ir::walk::any_stmt;
use loopcraft_ir::{Assign, Block, Expr, If, Loop, Proc, Stmt};

use crate::dependence::{Access, check_fission, check_private_allocs, collect_accesses, pinned_vars};
use crate::error::{ScheduleError, ScheduleResult};
use crate::util::{const_value, finish, provably_positive, resolve_any_stmt, splice};

pub fn fission_after(proc: &Proc, stmt_sel: &str, n_lifts: usize) -> ScheduleResult<Proc> {
    let mut point = resolve_any_stmt(proc, stmt_sel)?;
    let scopes = point.depth() - 1;
    if scopes < n_lifts {
        return Err(ScheduleError::state(format!(
            "`{stmt_sel}` is inside {scopes} scope(s), cannot fission {n_lifts}"
        )));
    }
    let sizes: BTreeSet<String> = proc.sizes().map(str::to_owned).collect();
    let mut out = proc.clone();

    for _ in 0..n_lifts {
        let parent_path = point
            .parent()
            .ok_or_else(|| ScheduleError::state("no enclosing scope"))?;
        let parent = out
            .stmt(&parent_path)
            .cloned()
            .ok_or_else(|| ScheduleError::state(format!("no statement at {parent_path}")))?;
        let cut = point.last() + 1;
        let Some(body) = parent.body() else {
            return Err(ScheduleError::state(format!("statement at {parent_path} has no body")));
        };
        let (prefix, suffix) = body.stmts.split_at(cut.min(body.len()));
        if suffix.is_empty() {
            point = parent_path;
            continue;
        }
        check_private_allocs(prefix, suffix)?;

        let (replacement, last_prefix) = match &parent {
            Stmt::If(i) => (
                vec![
                    Stmt::If(If {
                        cond: i.cond.clone(),
                        body: Block::new(prefix.to_vec()),
                    }),
                    Stmt::If(If {
                        cond: i.cond.clone(),
                        body: Block::new(suffix.to_vec()),
                    }),
                ],
                0,
            ),
            Stmt::Loop(l) => cut_loop(l, prefix, suffix, &sizes)?,
            _ => return Err(ScheduleError::state(format!("statement at {parent_path} has no body"))),
        };
        tracing::debug!(at = %parent_path, cut, "fission");
        let index = parent_path.last();
        splice(&mut out, &parent_path, replacement)?;
        point = parent_path.sibling(index + last_prefix);
    }
    finish(out)
}

/// Cut loop `l` after `prefix`. Returns the replacement statements and the
/// offset of the last one holding prefix code.
fn cut_loop(
    l: &Loop,
    prefix: &[Stmt],
    suffix: &[Stmt],
    sizes: &BTreeSet<String>,
) -> ScheduleResult<(Vec<Stmt>, usize)> {
    let with_body = |stmts: &[Stmt]| {
        Stmt::Loop(Loop {
            var: l.var.clone(),
            bound: l.bound.clone(),
            mode: l.mode,
            body: Block::new(stmts.to_vec()),
        })
    };
    let error = match check_fission(&l.var, &l.bound, prefix, suffix) {
        Ok(()) => return Ok((vec![with_body(prefix), with_body(suffix)], 0)),
        Err(e) => e,
    };
    if !provably_positive(&l.bound, sizes) {
        return Err(error);
    }
    if hoistable_prefix(&l.var, prefix, suffix) {
        tracing::trace!(loop_var = %l.var, "prefix restored by suffix; hoisting it");
        let mut stmts = prefix.to_vec();
        stmts.push(with_body(suffix));
        return Ok((stmts, prefix.len() - 1));
    }
    if sinkable_suffix(&l.var, prefix, suffix) {
        tracing::trace!(loop_var = %l.var, "suffix only matters on the last iteration; sinking it");
        let mut stmts = vec![with_body(prefix)];
        stmts.extend_from_slice(suffix);
        return Ok((stmts, 0));
    }
    Err(error)
}

/// A perfect loop nest around a single copy `D[e] = S[f]`.
struct CopyNest<'a> {
    loops: Vec<(&'a str, Expr)>,
    copy: &'a Assign,
    src: &'a str,
    src_idx: &'a [Expr],
}

fn copy_nest(stmt: &Stmt) -> Option<CopyNest<'_>> {
    let mut loops = Vec::new();
    let mut cur = stmt;
    loop {
        match cur {
            Stmt::Loop(l) if l.body.len() == 1 => {
                loops.push((l.var.as_str(), l.bound.clone()));
                cur = &l.body.stmts[0];
            }
            Stmt::Assign(a) => {
                let Expr::Read(src, src_idx) = &a.rhs else {
                    return None;
                };
                if *src == a.buf {
                    return None;
                }
                return Some(CopyNest {
                    loops,
                    copy: a,
                    src,
                    src_idx,
                });
            }
            _ => return None,
        }
    }
}

fn same_indices(a: &[Expr], b: &[Expr]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| same_index(x, y))
}

fn hoistable_prefix(var: &str, prefix: &[Stmt], suffix: &[Stmt]) -> bool {
    if prefix.iter().any(|s| s.mentions_var(var)) {
        return false;
    }
    let mut touched = BTreeSet::new();
    for stmt in prefix {
        let Some(copy) = copy_nest(stmt) else {
            return false;
        };
        let reread = prefix
            .iter()
            .any(|s| copy_nest(s).is_some_and(|c| c.src == copy.copy.buf));
        if !touched.insert(copy.copy.buf.as_str()) || reread {
            return false;
        }
        if !restored_later(&copy, suffix) {
            return false;
        }
    }
    true
}

/// Does `suffix` end by copying `copy`'s destination back to its source,
/// over the same iteration space and without overlapping writes?
fn restored_later(copy: &CopyNest<'_>, suffix: &[Stmt]) -> bool {
    let Some(pos) = suffix.iter().position(|s| {
        copy_nest(s).is_some_and(|r| {
            r.loops == copy.loops
                && r.copy.buf == copy.src
                && same_indices(&r.copy.idx, copy.src_idx)
                && r.src == copy.copy.buf
                && same_indices(r.src_idx, &copy.copy.idx)
        })
    }) else {
        return false;
    };

    let loops: Vec<(String, Option<i64>)> = copy
        .loops
        .iter()
        .map(|(v, b)| ((*v).to_owned(), const_value(b)))
        .collect();
    let target = Access {
        buf: copy.src.to_owned(),
        dims: copy.src_idx.iter().cloned().map(Some).collect(),
        write: true,
        loops: loops.clone(),
    };
    let pinned = pinned_vars(&target, &target, &[]);
    if !loops.iter().all(|(v, _)| pinned.contains(v)) {
        return false;
    }

    !collect_accesses(&suffix[pos + 1..])
        .iter()
        .any(|a| a.write && (a.buf == copy.src || a.buf == copy.copy.buf))
}

fn sinkable_suffix(var: &str, prefix: &[Stmt], suffix: &[Stmt]) -> bool {
    if suffix.iter().any(|s| s.mentions_var(var)) {
        return false;
    }
    let block = Block::new(suffix.to_vec());
    if any_stmt(&block, &mut |s| !matches!(s, Stmt::Loop(_) | Stmt::Assign(_))) {
        return false;
    }
    let accesses = collect_accesses(suffix);
    let written: BTreeSet<&str> = accesses.iter().filter(|a| a.write).map(|a| a.buf.as_str()).collect();
    if accesses.iter().any(|a| !a.write && written.contains(a.buf.as_str())) {
        return false;
    }
    !written
        .iter()
        .any(|w| prefix.iter().any(|s| s.uses_buffer(w)))
}
