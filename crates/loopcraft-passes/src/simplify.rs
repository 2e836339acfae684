//! Algebraic and structural cleanup.
//!
//! - integer constant folding and affine normalization of every index
//!   expression (loop bounds, indices, shapes, window bounds, guards);
//! - guards decided from the ranges of the loop variables around them;
//! - loops that never run are dropped, loops that run once are inlined;
//! - allocations that are never read are dropped with their writes, and
//!   loops or guards left empty disappear.
//!
//! Data expressions are left alone apart from their index lists, so no
//! floating-point operation is reassociated or folded. The rewrite runs to
//! a fixpoint, which makes it idempotent.

use std::collections::BTreeSet;

use loopcraft_ir::affine::Affine;
use loopcraft_ir::{BinOp, Block, Expr, Proc, Stmt};

const MAX_ROUNDS: usize = 32;

pub fn simplify(proc: &Proc) -> Proc {
    let sizes: BTreeSet<String> = proc.sizes().map(str::to_owned).collect();
    let mut out = proc.clone();
    for round in 0..MAX_ROUNDS {
        let mut s = Simplifier {
            sizes: &sizes,
            ranges: Vec::new(),
            changed: false,
        };
        out.body = s.block(std::mem::take(&mut out.body));
        if !s.changed {
            tracing::debug!(rounds = round, "simplify reached a fixpoint");
            break;
        }
    }
    out
}

struct Simplifier<'a> {
    sizes: &'a BTreeSet<String>,
    /// Loop variables in scope with their constant trip counts.
    ranges: Vec<(String, Option<i64>)>,
    changed: bool,
}

impl Simplifier<'_> {
    fn block(&mut self, block: Block) -> Block {
        let mut out = Vec::with_capacity(block.len());
        for stmt in block.stmts {
            self.stmt(stmt, &mut out);
        }
        self.drop_dead_allocs(&mut out);
        Block::new(out)
    }

    fn stmt(&mut self, stmt: Stmt, out: &mut Vec<Stmt>) {
        match stmt {
            Stmt::Loop(mut l) => {
                l.bound = self.index(l.bound);
                match l.bound.as_int() {
                    Some(n) if n <= 0 => {
                        self.changed = true;
                        return;
                    }
                    Some(1) if !has_alloc(&l.body) => {
                        self.changed = true;
                        let mut body = l.body;
                        body.subst_var(&l.var, &Expr::int(0));
                        for s in body.stmts {
                            self.stmt(s, out);
                        }
                        return;
                    }
                    _ => {}
                }
                self.ranges.push((l.var.clone(), l.bound.as_int()));
                l.body = self.block(l.body);
                self.ranges.pop();
                if l.body.is_empty() {
                    self.changed = true;
                    return;
                }
                out.push(Stmt::Loop(l));
            }
            Stmt::If(mut i) => {
                i.cond = self.cond(i.cond);
                match self.decide(&i.cond) {
                    Some(false) => {
                        self.changed = true;
                        return;
                    }
                    Some(true) if !has_alloc(&i.body) => {
                        self.changed = true;
                        for s in i.body.stmts {
                            self.stmt(s, out);
                        }
                        return;
                    }
                    _ => {}
                }
                i.body = self.block(i.body);
                if i.body.is_empty() {
                    self.changed = true;
                    return;
                }
                out.push(Stmt::If(i));
            }
            Stmt::Assign(mut a) => {
                a.idx = a.idx.into_iter().map(|e| self.index(e)).collect();
                a.rhs = self.data(a.rhs);
                out.push(Stmt::Assign(a));
            }
            Stmt::Reduce(mut a) => {
                a.idx = a.idx.into_iter().map(|e| self.index(e)).collect();
                a.rhs = self.data(a.rhs);
                out.push(Stmt::Reduce(a));
            }
            Stmt::Alloc(mut d) => {
                d.shape = d.shape.into_iter().map(|e| self.index(e)).collect();
                out.push(Stmt::Alloc(d));
            }
            Stmt::Call(mut c) => {
                for w in &mut c.args {
                    for e in w.exprs_mut() {
                        *e = self.index(std::mem::replace(e, Expr::Int(0)));
                    }
                }
                out.push(Stmt::Call(c));
            }
        }
    }

    fn index(&mut self, e: Expr) -> Expr {
        let folded = fold(e.clone());
        let norm = match Affine::from_expr(&folded) {
            Some(a) => a.to_expr(),
            None => folded,
        };
        if norm != e {
            self.changed = true;
        }
        norm
    }

    fn data(&mut self, e: Expr) -> Expr {
        match e {
            Expr::Read(b, idx) => Expr::Read(b, idx.into_iter().map(|i| self.index(i)).collect()),
            Expr::Binary(op, l, r) => Expr::binary(op, self.data(*l), self.data(*r)),
            Expr::Neg(x) => -self.data(*x),
            other => other,
        }
    }

    fn cond(&mut self, e: Expr) -> Expr {
        match e {
            Expr::Binary(BinOp::And, l, r) => Expr::binary(BinOp::And, self.cond(*l), self.cond(*r)),
            Expr::Binary(op, l, r) if op.is_comparison() => {
                Expr::binary(op, self.index(*l), self.index(*r))
            }
            other => other,
        }
    }

    /// Value of a guard for every point of the current iteration space, if
    /// it is the same everywhere.
    fn decide(&self, cond: &Expr) -> Option<bool> {
        let Expr::Binary(op, l, r) = cond else {
            return None;
        };
        if *op == BinOp::And {
            return match (self.decide(l), self.decide(r)) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            };
        }
        let diff = Affine::from_expr(l)?.sub(&Affine::from_expr(r)?)?;
        let (lo, hi) = self.bounds(&diff);
        let below = |k: i64| hi.is_some_and(|h| h < k);
        let above = |k: i64| lo.is_some_and(|l| l > k);
        match op {
            BinOp::Lt if below(0) => Some(true),
            BinOp::Lt if above(-1) => Some(false),
            BinOp::Le if below(1) => Some(true),
            BinOp::Le if above(0) => Some(false),
            BinOp::Gt if above(0) => Some(true),
            BinOp::Gt if below(1) => Some(false),
            BinOp::Ge if above(-1) => Some(true),
            BinOp::Ge if below(0) => Some(false),
            BinOp::Eq if lo == Some(0) && hi == Some(0) => Some(true),
            BinOp::Eq if above(0) || below(0) => Some(false),
            _ => None,
        }
    }

    /// Lower and upper bounds of `a`, either of which may be unknown.
    fn bounds(&self, a: &Affine) -> (Option<i64>, Option<i64>) {
        let mut lo = Some(a.constant);
        let mut hi = Some(a.constant);
        for (v, c) in a.coefficients() {
            let (vlo, vhi) = self.var_range(v);
            let (add_lo, add_hi) = if c > 0 { (vlo, vhi) } else { (vhi, vlo) };
            lo = lo.zip(add_lo).and_then(|(x, y)| c.checked_mul(y)?.checked_add(x));
            hi = hi.zip(add_hi).and_then(|(x, y)| c.checked_mul(y)?.checked_add(x));
        }
        (lo, hi)
    }

    fn var_range(&self, v: &str) -> (Option<i64>, Option<i64>) {
        if let Some((_, n)) = self.ranges.iter().rev().find(|(name, _)| name == v) {
            return (Some(0), n.map(|n| n - 1));
        }
        if self.sizes.contains(v) {
            return (Some(1), None);
        }
        (None, None)
    }

    fn drop_dead_allocs(&mut self, stmts: &mut Vec<Stmt>) {
        let mut i = 0;
        while i < stmts.len() {
            let dead = match &stmts[i] {
                Stmt::Alloc(d) => !stmts[i + 1..].iter().any(|s| reads_buffer(s, &d.name)),
                _ => false,
            };
            if !dead {
                i += 1;
                continue;
            }
            if let Stmt::Alloc(d) = stmts.remove(i) {
                tracing::trace!(buffer = %d.name, "dropping unread allocation");
                let mut rest = stmts.split_off(i);
                drop_writes(&mut rest, &d.name);
                stmts.append(&mut rest);
            }
            self.changed = true;
        }
    }
}

fn has_alloc(block: &Block) -> bool {
    block.iter().any(|s| matches!(s, Stmt::Alloc(_)))
}

/// Does `stmt` read `name`, through an expression or a call window?
fn reads_buffer(stmt: &Stmt, name: &str) -> bool {
    let direct = match stmt {
        Stmt::Call(c) => c.args.iter().any(|w| w.buf == name),
        _ => false,
    };
    direct
        || stmt.exprs().iter().any(|e| e.reads_buffer(name))
        || stmt
            .body()
            .is_some_and(|b| b.iter().any(|s| reads_buffer(s, name)))
}

/// Remove every assignment or reduction into `name` from `stmts` and the
/// bodies nested in them.
fn drop_writes(stmts: &mut Vec<Stmt>, name: &str) {
    stmts.retain(|s| !matches!(s, Stmt::Assign(a) | Stmt::Reduce(a) if a.buf == name));
    for s in stmts.iter_mut() {
        if let Some(body) = s.body_mut() {
            drop_writes(&mut body.stmts, name);
        }
    }
}

/// Fold integer constants and trivial identities in an index expression.
fn fold(e: Expr) -> Expr {
    match e {
        Expr::Binary(op, l, r) => {
            let l = fold(*l);
            let r = fold(*r);
            let folded = match (op, l.as_int(), r.as_int()) {
                (BinOp::Add, Some(x), Some(y)) => x.checked_add(y),
                (BinOp::Sub, Some(x), Some(y)) => x.checked_sub(y),
                (BinOp::Mul, Some(x), Some(y)) => x.checked_mul(y),
                (BinOp::Div, Some(x), Some(y)) => x.checked_div_euclid(y),
                (BinOp::Mod, Some(x), Some(y)) => x.checked_rem_euclid(y),
                _ => None,
            };
            if let Some(v) = folded {
                return Expr::int(v);
            }
            match (op, l.as_int(), r.as_int()) {
                (BinOp::Add, Some(0), _) | (BinOp::Mul, Some(1), _) => r,
                (BinOp::Add | BinOp::Sub, _, Some(0)) => l,
                (BinOp::Mul | BinOp::Div, _, Some(1)) => l,
                (BinOp::Mul, Some(0), _) | (BinOp::Mul, _, Some(0)) | (BinOp::Mod, _, Some(1)) => Expr::int(0),
                _ => Expr::binary(op, l, r),
            }
        }
        Expr::Neg(x) => match fold(*x) {
            Expr::Int(v) if v != i64::MIN => Expr::int(-v),
            Expr::Neg(inner) => *inner,
            other => -other,
        },
        other => other,
    }
}
