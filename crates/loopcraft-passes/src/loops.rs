//! Loop mode changes and full unrolling.

use std::collections::BTreeSet;

use loopcraft_ir::{Expr, LoopMode, Proc, Stmt};

use crate::error::{ScheduleError, ScheduleResult};
use crate::util::{allocated_in, const_value, finish, resolve_loop, splice};

/// Demote a parallel loop to a sequential one.
pub fn par_to_seq(proc: &Proc, loop_sel: &str) -> ScheduleResult<Proc> {
    let path = resolve_loop(proc, loop_sel)?;
    let mut out = proc.clone();
    match out.stmt_mut(&path) {
        Some(Stmt::Loop(l)) if l.mode == LoopMode::Par => {
            tracing::debug!(loop_var = %l.var, at = %path, "par_to_seq");
            l.mode = LoopMode::Seq;
        }
        Some(Stmt::Loop(l)) => {
            return Err(ScheduleError::state(format!("`for {}` is already sequential", l.var)));
        }
        _ => {
            return Err(ScheduleError::NotFound {
                pattern: loop_sel.to_owned(),
            });
        }
    }
    finish(out)
}

/// Replace a loop with a constant trip count by one copy of its body per
/// iteration, with the loop variable replaced by the iteration number.
///
/// Allocations inside copy `k` are renamed `name_k` (or the next free
/// name) so that the copies do not collide.
pub fn unroll(proc: &Proc, loop_sel: &str) -> ScheduleResult<Proc> {
    let path = resolve_loop(proc, loop_sel)?;
    let Some(Stmt::Loop(l)) = proc.stmt(&path) else {
        return Err(ScheduleError::NotFound {
            pattern: loop_sel.to_owned(),
        });
    };
    let n = const_value(&l.bound).ok_or_else(|| ScheduleError::not_constant(loop_sel))?;
    tracing::debug!(loop_var = %l.var, trips = n, at = %path, "unroll");

    let allocs = allocated_in(&l.body.stmts);
    let mut taken = proc.bound_names();
    let mut copies = Vec::new();
    for k in 0..n.max(0) {
        let mut body = l.body.clone();
        body.subst_var(&l.var, &Expr::int(k));
        for name in &allocs {
            let renamed = fresh(&mut taken, &format!("{name}_{k}"));
            body.rename_buffer(name, &renamed);
        }
        copies.extend(body.stmts);
    }
    let mut out = proc.clone();
    splice(&mut out, &path, copies)?;
    finish(out)
}

fn fresh(taken: &mut BTreeSet<String>, base: &str) -> String {
    let name = if taken.contains(base) {
        (1..)
            .map(|i| format!("{base}_{i}"))
            .find(|n| !taken.contains(n))
            .unwrap_or_else(|| base.to_owned())
    } else {
        base.to_owned()
    };
    taken.insert(name.clone());
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;
    use loopcraft_ir::parse_proc;

    #[test]
    fn test_par_to_seq() {
        let proc = parse_proc("proc f(x: f32[4] @ DRAM) { for i in par(4) { x[i] = 0.0; } }").unwrap();
        let out = par_to_seq(&proc, "for i in _:_").unwrap();
        assert_eq!(out.body.stmts[0].as_loop().unwrap().mode, LoopMode::Seq);
        assert!(matches!(
            par_to_seq(&out, "i"),
            Err(ScheduleError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_unroll_renames_allocations() {
        let proc = parse_proc(
            "proc f(x: f32[2, 8] @ DRAM) {
                for jo in par(2) { t: f32[8] @ AVX2; for ji in par(8) { t[ji] = x[jo, ji]; x[jo, ji] = t[ji]; } }
            }",
        )
        .unwrap();
        let out = unroll(&proc, "jo").unwrap();
        assert_snapshot!(out.to_string(), @r"
        proc f(x: f32[2, 8] @ DRAM) {
          t_0: f32[8] @ AVX2;
          for ji in par(8) {
            t_0[ji] = x[0, ji];
            x[0, ji] = t_0[ji];
          }
          t_1: f32[8] @ AVX2;
          for ji in par(8) {
            t_1[ji] = x[1, ji];
            x[1, ji] = t_1[ji];
          }
        }
        ");
    }

    #[test]
    fn test_unroll_needs_constant_bound() {
        let proc = parse_proc("proc f(N: size, x: f32[N] @ DRAM) { for i in seq(N) { x[i] = 0.0; } }").unwrap();
        assert_eq!(
            unroll(&proc, "i"),
            Err(ScheduleError::NotConstantBound { what: "i".into() })
        );
    }

    #[test]
    fn test_unroll_zero_trips() {
        let proc = parse_proc("proc f(x: f32[4] @ DRAM) { for i in seq(0) { x[i] = 0.0; } x[0] = 1.0; }").unwrap();
        let out = unroll(&proc, "i").unwrap();
        assert_eq!(out.body.len(), 1);
    }
}
