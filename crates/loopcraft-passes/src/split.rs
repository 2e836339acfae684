//! Loop splitting (strip-mining).

use loopcraft_ir::affine::Affine;
use loopcraft_ir::{BinOp, Block, Expr, If, Loop, Proc, Stmt};

use crate::error::{ScheduleError, ScheduleResult};
use crate::util::{ensure_fresh, finish, resolve_loop, splice};

/// Split `for v in N` into `for outer in N/f { for inner in f { .. } }`
/// with `v := f * outer + inner`.
///
/// With `perfect`, `N` must be provably divisible by `factor`. Otherwise
/// the outer loop runs `(N + f - 1) / f` times and the body is guarded by
/// `f * outer + inner < N`. Both new loops keep the original mode.
pub fn split(
    proc: &Proc,
    loop_sel: &str,
    factor: i64,
    outer: &str,
    inner: &str,
    perfect: bool,
) -> ScheduleResult<Proc> {
    if factor <= 0 {
        return Err(ScheduleError::shape(format!("split factor must be positive, got {factor}")));
    }
    let path = resolve_loop(proc, loop_sel)?;
    let Some(Stmt::Loop(l)) = proc.stmt(&path) else {
        return Err(ScheduleError::NotFound {
            pattern: loop_sel.to_owned(),
        });
    };
    if outer == inner {
        return Err(ScheduleError::collision(outer));
    }
    ensure_fresh(proc, outer)?;
    ensure_fresh(proc, inner)?;
    tracing::debug!(loop_var = %l.var, factor, perfect, at = %path, "split");

    let index = Expr::int(factor) * Expr::var(outer) + Expr::var(inner);
    let mut body = l.body.clone();
    body.subst_var(&l.var, &index);

    let outer_bound = if perfect {
        exact_quotient(&l.bound, factor).ok_or_else(|| {
            ScheduleError::shape(format!("`{}` is not provably divisible by {factor}", l.bound))
        })?
    } else {
        body = Block::new(vec![Stmt::If(If {
            cond: Expr::binary(BinOp::Lt, index, l.bound.clone()),
            body,
        })]);
        match l.bound.as_int() {
            Some(n) => Expr::int((n + factor - 1).div_euclid(factor)),
            None => (l.bound.clone() + Expr::int(factor - 1)) / Expr::int(factor),
        }
    };

    let split = Stmt::Loop(Loop {
        var: outer.to_owned(),
        bound: outer_bound,
        mode: l.mode,
        body: Block::new(vec![Stmt::Loop(Loop {
            var: inner.to_owned(),
            bound: Expr::int(factor),
            mode: l.mode,
            body,
        })]),
    });
    let mut out = proc.clone();
    splice(&mut out, &path, vec![split])?;
    finish(out)
}

/// `bound / factor` when every coefficient and the constant of `bound`
/// are multiples of `factor`.
fn exact_quotient(bound: &Expr, factor: i64) -> Option<Expr> {
    let a = Affine::from_expr(bound)?;
    if a.constant % factor != 0 {
        return None;
    }
    let mut q = Affine::constant(a.constant / factor);
    for v in a.vars() {
        let c = a.coeff(v);
        if c % factor != 0 {
            return None;
        }
        q = q.add(&Affine::var(v).scale(c / factor)?)?;
    }
    Some(q.to_expr())
}
