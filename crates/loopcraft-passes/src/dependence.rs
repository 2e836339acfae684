//! Conservative dependence test for loop reordering and fission.
//!
//! Every buffer access in a region is recorded with its index list and the
//! loops around it. For a pair of accesses to the same buffer, a loop
//! variable is *pinned* when equal locations force equal values of that
//! variable: some dimension has the same affine form in both accesses, and
//! the variable's coefficient is larger than everything the other
//! still-free variables of that dimension can add up to. Pinning is
//! repeated until nothing changes, so `8 * jo + ji` pins `jo` first and then
//! `ji`.
//!
//! A transformation that only reorders iterations of a loop `v` is safe
//! when every conflicting pair pins `v`: conflicting accesses then always
//! come from the same iteration, whose internal order is unchanged.

use std::collections::{BTreeMap, BTreeSet};

use loopcraft_ir::affine::Affine;
use loopcraft_ir::{Expr, Loop, Stmt, WindowDim};

use crate::error::{ScheduleError, ScheduleResult};
use crate::util::{allocated_in, const_value};

/// One read or write of a buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct Access {
    pub buf: String,
    /// Index per dimension; `None` for a window interval, which may touch
    /// any element of that dimension.
    pub dims: Vec<Option<Expr>>,
    pub write: bool,
    /// Loops between the analyzed region and the access, outermost first,
    /// with their constant trip counts.
    pub loops: Vec<(String, Option<i64>)>,
}

/// Record every access in `stmts`.
///
/// Reductions count as writes. Template calls may read or write any of
/// their windows, so every window is recorded as a write.
pub fn collect_accesses(stmts: &[Stmt]) -> Vec<Access> {
    let mut out = Vec::new();
    let mut loops = Vec::new();
    collect(stmts, &mut loops, &mut out);
    out
}

fn collect(stmts: &[Stmt], loops: &mut Vec<(String, Option<i64>)>, out: &mut Vec<Access>) {
    for stmt in stmts {
        match stmt {
            Stmt::Loop(l) => {
                loops.push((l.var.clone(), const_value(&l.bound)));
                collect(&l.body.stmts, loops, out);
                loops.pop();
            }
            Stmt::If(i) => collect(&i.body.stmts, loops, out),
            Stmt::Assign(a) | Stmt::Reduce(a) => {
                reads(&a.rhs, loops, out);
                out.push(Access {
                    buf: a.buf.clone(),
                    dims: a.idx.iter().cloned().map(Some).collect(),
                    write: true,
                    loops: loops.clone(),
                });
            }
            Stmt::Call(c) => {
                for w in &c.args {
                    out.push(Access {
                        buf: w.buf.clone(),
                        dims: w
                            .dims
                            .iter()
                            .map(|d| match d {
                                WindowDim::Point(e) => Some(e.clone()),
                                WindowDim::Interval(..) => None,
                            })
                            .collect(),
                        write: true,
                        loops: loops.clone(),
                    });
                }
            }
            Stmt::Alloc(_) => {}
        }
    }
}

fn reads(e: &Expr, loops: &[(String, Option<i64>)], out: &mut Vec<Access>) {
    if let Expr::Read(buf, idx) = e {
        out.push(Access {
            buf: buf.clone(),
            dims: idx.iter().cloned().map(Some).collect(),
            write: false,
            loops: loops.to_vec(),
        });
    }
    for child in e.children() {
        reads(child, loops, out);
    }
}

/// Whether two accesses may touch the same location with at least one write.
pub fn conflicts(a: &Access, b: &Access) -> bool {
    a.buf == b.buf && (a.write || b.write)
}

/// Variables whose values must agree whenever `a` and `b` touch the same
/// location.
///
/// `region` lists the loops that enclose both accesses inside the analyzed
/// region; together with each access's own loops these are the variables
/// that may differ between the two accesses. Anything else is fixed.
pub fn pinned_vars(a: &Access, b: &Access, region: &[(String, Option<i64>)]) -> BTreeSet<String> {
    let mut bounds: BTreeMap<&str, Option<i64>> = BTreeMap::new();
    for (v, n) in region.iter().chain(&a.loops).chain(&b.loops) {
        let entry = bounds.entry(v.as_str()).or_insert(*n);
        *entry = match (*entry, *n) {
            (Some(x), Some(y)) => Some(x.max(y)),
            _ => None,
        };
    }

    let forms: Vec<Affine> = a
        .dims
        .iter()
        .zip(&b.dims)
        .filter_map(|(x, y)| {
            let x = Affine::from_expr(x.as_ref()?)?;
            let y = Affine::from_expr(y.as_ref()?)?;
            (x == y).then_some(x)
        })
        .collect();

    let mut pinned = BTreeSet::new();
    loop {
        let mut changed = false;
        for form in &forms {
            let coefficients = form.coefficients();
            for (&v, &c) in &coefficients {
                if !bounds.contains_key(v) || pinned.contains(v) {
                    continue;
                }
                let mut spread = Some(0i64);
                for (&u, &d) in &coefficients {
                    if u == v || pinned.contains(u) {
                        continue;
                    }
                    let Some(&bound) = bounds.get(u) else {
                        continue;
                    };
                    spread = match (spread, bound) {
                        (Some(s), Some(n)) => d
                            .checked_abs()
                            .and_then(|d| d.checked_mul(n.saturating_sub(1).max(0)))
                            .and_then(|t| s.checked_add(t)),
                        _ => None,
                    };
                }
                if spread.is_some_and(|s| c.checked_abs().is_some_and(|c| c > s)) {
                    pinned.insert(v.to_owned());
                    changed = true;
                }
            }
        }
        if !changed {
            return pinned;
        }
    }
}

/// Can `outer` and its directly nested `inner` loop be swapped?
pub fn check_reorder(outer: &Loop, inner: &Loop) -> ScheduleResult<()> {
    if inner.bound.mentions_var(&outer.var) {
        return Err(ScheduleError::dependency(format!(
            "bound of `{}` depends on `{}`",
            inner.var, outer.var
        )));
    }
    let local = allocated_in(&inner.body.stmts);
    let accesses: Vec<Access> = collect_accesses(&inner.body.stmts)
        .into_iter()
        .filter(|a| !local.contains(&a.buf))
        .collect();
    let region = [
        (outer.var.clone(), const_value(&outer.bound)),
        (inner.var.clone(), const_value(&inner.bound)),
    ];
    for (i, a) in accesses.iter().enumerate() {
        for b in &accesses[i..] {
            if !conflicts(a, b) {
                continue;
            }
            let pinned = pinned_vars(a, b, &region);
            tracing::trace!(buffer = %a.buf, ?pinned, "reorder dependence pair");
            if !pinned.contains(&outer.var) && !pinned.contains(&inner.var) {
                return Err(ScheduleError::dependency(format!(
                    "accesses to `{}` may carry a dependence across `{}` and `{}`",
                    a.buf, outer.var, inner.var
                )));
            }
        }
    }
    Ok(())
}

/// Splitting a body after `prefix` must not separate an allocation from
/// its uses.
pub fn check_private_allocs(prefix: &[Stmt], suffix: &[Stmt]) -> ScheduleResult<()> {
    for stmt in prefix {
        if let Stmt::Alloc(d) = stmt
            && suffix.iter().any(|s| s.uses_buffer(&d.name))
        {
            return Err(ScheduleError::dependency(format!(
                "`{}` is allocated before the split point and used after it",
                d.name
            )));
        }
    }
    Ok(())
}

/// Can a loop over `var` be split into one loop running `prefix` and a
/// second running `suffix`?
///
/// Buffers allocated inside either half are private to an iteration and
/// ignored, except that an allocation in the prefix must not be used by
/// the suffix.
pub fn check_fission(var: &str, bound: &Expr, prefix: &[Stmt], suffix: &[Stmt]) -> ScheduleResult<()> {
    check_private_allocs(prefix, suffix)?;
    let mut local = allocated_in(prefix);
    local.extend(allocated_in(suffix));
    let region = [(var.to_owned(), const_value(bound))];
    let before = collect_accesses(prefix);
    let after = collect_accesses(suffix);
    for a in after.iter().filter(|a| !local.contains(&a.buf)) {
        for b in before.iter().filter(|b| conflicts(a, b)) {
            let pinned = pinned_vars(a, b, &region);
            tracing::trace!(buffer = %a.buf, ?pinned, "fission dependence pair");
            if !pinned.contains(var) {
                return Err(ScheduleError::dependency(format!(
                    "accesses to `{}` on both sides of the split may depend across iterations of `{var}`",
                    a.buf
                )));
            }
        }
    }
    Ok(())
}
