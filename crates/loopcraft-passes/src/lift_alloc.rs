//! Allocation lifting.

use loopcraft_ir::select::resolve_stmt;
use loopcraft_ir::{BufferDecl, Expr, LoopMode, Proc, Stmt, WindowDim};

use crate::error::{ScheduleError, ScheduleResult};
use crate::util::{find_allocs, finish, insert_before, parse_selector};

/// Move an allocation out of `n_lifts` enclosing scopes.
///
/// Every lifted parallel loop (every lifted loop with `keep_dims`) adds a
/// leading dimension of its extent, outermost loop first, and its variable
/// is prepended to every access so that iterations keep separate storage.
/// A lifted sequential loop without `keep_dims` shares one slot across its
/// iterations.
pub fn lift_alloc(proc: &Proc, alloc_sel: &str, n_lifts: usize, keep_dims: bool) -> ScheduleResult<Proc> {
    let selector = parse_selector(alloc_sel)?.as_alloc();
    let path = resolve_stmt(proc, &selector)?;
    let Some(Stmt::Alloc(decl)) = proc.stmt(&path) else {
        return Err(ScheduleError::NotFound {
            pattern: selector.source,
        });
    };
    if n_lifts == 0 {
        return finish(proc.clone());
    }
    let ancestors = proc.ancestors(&path);
    if ancestors.len() < n_lifts {
        return Err(ScheduleError::state(format!(
            "`{}` is inside {} scope(s), cannot lift {n_lifts}",
            decl.name,
            ancestors.len()
        )));
    }
    let lifted = &ancestors[..n_lifts];
    let lifted_vars: Vec<&str> = lifted
        .iter()
        .filter_map(|(_, s)| s.as_loop().map(|l| l.var.as_str()))
        .collect();
    let depends_on_lifted = |e: &Expr| lifted_vars.iter().any(|v| e.mentions_var(v));

    if decl.shape.iter().any(depends_on_lifted) {
        return Err(ScheduleError::shape(format!(
            "shape of `{}` depends on a lifted loop variable",
            decl.name
        )));
    }
    let mut dims = Vec::new();
    for (_, scope) in lifted.iter().rev() {
        let Some(l) = scope.as_loop() else {
            continue;
        };
        if l.mode == LoopMode::Par || keep_dims {
            if depends_on_lifted(&l.bound) {
                return Err(ScheduleError::shape(format!(
                    "extent of `{}` depends on a lifted loop variable",
                    l.var
                )));
            }
            dims.push((l.var.clone(), l.bound.clone()));
        }
    }

    let (outermost, _) = &lifted[n_lifts - 1];
    let target = outermost.parent();
    let clash = find_allocs(proc, &decl.name).into_iter().any(|p| {
        p != path && target.as_ref().is_none_or(|t| t.is_prefix_of(&p))
    });
    if clash {
        return Err(ScheduleError::alias(format!(
            "another allocation of `{}` is visible where it would be lifted to",
            decl.name
        )));
    }
    tracing::debug!(buffer = %decl.name, n_lifts, keep_dims, added = dims.len(), "lift_alloc");

    let vars: Vec<Expr> = dims.iter().map(|(v, _)| Expr::var(v)).collect();
    let mut shape: Vec<Expr> = dims.into_iter().map(|(_, b)| b).collect();
    shape.extend(decl.shape.iter().cloned());
    let lifted_decl = BufferDecl::new(decl.name.clone(), decl.ty, shape, decl.mem);

    let mut out = proc.clone();
    if let Some(block) = out.container_mut(&path) {
        block.stmts.remove(path.last());
    }
    let scope = out
        .stmt_mut(outermost)
        .ok_or_else(|| ScheduleError::state(format!("no statement at {outermost}")))?;
    prefix_accesses(scope, &lifted_decl.name, &vars);
    insert_before(&mut out, outermost, vec![Stmt::Alloc(lifted_decl)])?;
    finish(out)
}

fn prefix_accesses(stmt: &mut Stmt, name: &str, vars: &[Expr]) {
    for e in stmt.exprs_mut() {
        prefix_reads(e, name, vars);
    }
    match stmt {
        Stmt::Assign(a) | Stmt::Reduce(a) if a.buf == name => {
            a.idx.splice(0..0, vars.iter().cloned());
        }
        Stmt::Call(c) => {
            for w in c.args.iter_mut().filter(|w| w.buf == name) {
                w.dims.splice(0..0, vars.iter().cloned().map(WindowDim::Point));
            }
        }
        _ => {}
    }
    if let Some(body) = stmt.body_mut() {
        for s in &mut body.stmts {
            prefix_accesses(s, name, vars);
        }
    }
}

fn prefix_reads(e: &mut Expr, name: &str, vars: &[Expr]) {
    if let Expr::Read(b, idx) = e
        && b == name
    {
        idx.splice(0..0, vars.iter().cloned());
    }
    for child in e.children_mut() {
        prefix_reads(child, name, vars);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;
    use loopcraft_ir::parse_proc;

    const STAGED: &str = "proc f(K: size, C: f32[6, 16] @ DRAM, A: f32[6, K] @ DRAM, B: f32[K, 16] @ DRAM) {
      for k in seq(K) {
        for i in par(6) {
          for jo in par(2) {
            for ji in par(8) {
              C_reg: f32 @ AVX2;
              C_reg = C[i, 8 * jo + ji];
              C_reg += A[i, k] * B[k, 8 * jo + ji];
              C[i, 8 * jo + ji] = C_reg;
            }
          }
        }
      }
    }";

    #[test]
    fn test_lift_through_parallel_loops() {
        let proc = parse_proc(STAGED).unwrap();
        let out = lift_alloc(&proc, "C_reg:_", 3, false).unwrap();
        assert_snapshot!(out.to_string(), @r"
        proc f(K: size, C: f32[6, 16] @ DRAM, A: f32[6, K] @ DRAM, B: f32[K, 16] @ DRAM) {
          for k in seq(K) {
            C_reg: f32[6, 2, 8] @ AVX2;
            for i in par(6) {
              for jo in par(2) {
                for ji in par(8) {
                  C_reg[i, jo, ji] = C[i, 8 * jo + ji];
                  C_reg[i, jo, ji] += A[i, k] * B[k, 8 * jo + ji];
                  C[i, 8 * jo + ji] = C_reg[i, jo, ji];
                }
              }
            }
          }
        }
        ");
    }

    #[test]
    fn test_lift_through_sequential_loop_shares_slot() {
        let proc = parse_proc(STAGED).unwrap();
        let lifted = lift_alloc(&proc, "C_reg", 3, false).unwrap();
        let out = lift_alloc(&lifted, "C_reg", 1, false).unwrap();
        let Stmt::Alloc(d) = &out.body.stmts[0] else {
            panic!("expected the allocation first");
        };
        assert_eq!(d.shape, vec![Expr::int(6), Expr::int(2), Expr::int(8)]);
    }

    #[test]
    fn test_keep_dims_for_sequential_loop() {
        let proc = parse_proc(STAGED).unwrap();
        let out = lift_alloc(&proc, "C_reg", 4, true).unwrap();
        let Stmt::Alloc(d) = &out.body.stmts[0] else {
            panic!("expected the allocation first");
        };
        assert_eq!(d.shape[0], Expr::var("K"));
        assert_eq!(d.rank(), 4);
    }

    #[test]
    fn test_lift_too_far() {
        let proc = parse_proc(STAGED).unwrap();
        assert!(matches!(
            lift_alloc(&proc, "C_reg", 5, false),
            Err(ScheduleError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_lift_rejects_dependent_extent() {
        let proc = parse_proc(
            "proc f(x: f32[4, 4] @ DRAM) {
                for i in par(4) { for j in par(i) { t: f32 @ DRAM; t = x[i, j]; x[i, j] = t; } }
            }",
        )
        .unwrap();
        assert!(matches!(
            lift_alloc(&proc, "t", 2, false),
            Err(ScheduleError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_lift_rejects_captured_name() {
        let proc = parse_proc(
            "proc f(x: f32[4] @ DRAM) {
                for i in par(4) { t: f32 @ DRAM; t = x[i]; x[i] = t; }
                for j in par(4) { t: f32 @ DRAM; t = x[j]; x[j] = t; }
            }",
        )
        .unwrap();
        assert!(matches!(
            lift_alloc(&proc, "t #0", 1, false),
            Err(ScheduleError::AliasViolation { .. })
        ));
    }
}
