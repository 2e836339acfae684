//! Loop interchange.

use loopcraft_ir::{Block, Loop, Proc, Stmt};

use crate::dependence::check_reorder;
use crate::error::{ScheduleError, ScheduleResult};
use crate::util::{finish, parse_selector, resolve_loop, splice};

/// Swap `outer` with the loop nested directly inside it, which must match
/// `inner`.
///
/// Loop modes travel with their loops.
pub fn reorder(proc: &Proc, outer: &str, inner: &str) -> ScheduleResult<Proc> {
    let path = resolve_loop(proc, outer)?;
    let Some(Stmt::Loop(o)) = proc.stmt(&path) else {
        return Err(ScheduleError::NotFound {
            pattern: outer.to_owned(),
        });
    };
    let inner_sel = parse_selector(inner)?.as_loop();
    let i = match o.body.stmts.as_slice() {
        [stmt @ Stmt::Loop(i)] if inner_sel.pattern.matches_stmt(stmt) => i,
        _ => {
            return Err(ScheduleError::state(format!(
                "`{inner}` is not the only statement in the body of `{outer}`"
            )));
        }
    };
    check_reorder(o, i)?;
    tracing::debug!(outer = %o.var, inner = %i.var, at = %path, "reorder");

    let swapped = Stmt::Loop(Loop {
        var: i.var.clone(),
        bound: i.bound.clone(),
        mode: i.mode,
        body: Block::new(vec![Stmt::Loop(Loop {
            var: o.var.clone(),
            bound: o.bound.clone(),
            mode: o.mode,
            body: i.body.clone(),
        })]),
    });
    let mut out = proc.clone();
    splice(&mut out, &path, vec![swapped])?;
    finish(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;
    use loopcraft_ir::parse_proc;

    const SPLIT: &str = "proc f(K: size, C: f32[6, 16] @ DRAM, A: f32[6, K] @ DRAM, B: f32[K, 16] @ DRAM) {
        for i in par(6) {
          for jo in par(2) {
            for ji in par(8) {
              for k in seq(K) {
                C[i, 8 * jo + ji] += A[i, k] * B[k, 8 * jo + ji];
              }
            }
          }
        }
    }";

    #[test]
    fn test_reorder_tile_with_reduction_loop() {
        let proc = parse_proc(SPLIT).unwrap();
        let out = reorder(&proc, "ji", "k").unwrap();
        assert_snapshot!(out.to_string(), @r"
        proc f(K: size, C: f32[6, 16] @ DRAM, A: f32[6, K] @ DRAM, B: f32[K, 16] @ DRAM) {
          for i in par(6) {
            for jo in par(2) {
              for k in seq(K) {
                for ji in par(8) {
                  C[i, 8 * jo + ji] += A[i, k] * B[k, 8 * jo + ji];
                }
              }
            }
          }
        }
        ");
    }

    #[test]
    fn test_reorder_requires_direct_nesting() {
        let proc = parse_proc(SPLIT).unwrap();
        assert!(matches!(
            reorder(&proc, "jo", "k"),
            Err(ScheduleError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_reorder_rejects_carried_dependence() {
        let proc = parse_proc(
            "proc f(A: f32[5, 5] @ DRAM) {
                for i in seq(4) { for j in seq(4) { A[i + 1, j] = A[i, j + 1] + 1.0; } }
            }",
        )
        .unwrap();
        assert!(matches!(
            reorder(&proc, "i", "j"),
            Err(ScheduleError::DependencyViolation { .. })
        ));
    }

    #[test]
    fn test_reorder_twice_is_identity() {
        let proc = parse_proc(SPLIT).unwrap();
        let once = reorder(&proc, "ji", "k").unwrap();
        let twice = reorder(&once, "k", "ji").unwrap();
        assert_eq!(twice, proc);
    }
}
