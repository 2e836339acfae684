//! Affine view of index expressions.
//!
//! `Affine` is `c0 + Σ cᵥ·v` over integer variables. Terms keep the order in
//! which variables first appear so that normalizing `8 * jo + ji` gives back
//! the same text.
//!
//! Arithmetic is checked: an operation that would overflow `i64` yields
//! `None`, and callers treat the expression as non-affine.

use std::collections::BTreeMap;

use crate::ast::{BinOp, Expr};

#[derive(Clone, Debug, Default)]
pub struct Affine {
    terms: Vec<(String, i64)>,
    pub constant: i64,
}

impl PartialEq for Affine {
    fn eq(&self, other: &Self) -> bool {
        self.constant == other.constant && self.coefficients() == other.coefficients()
    }
}

impl Affine {
    pub fn constant(value: i64) -> Self {
        Affine {
            terms: vec![],
            constant: value,
        }
    }

    pub fn var(name: &str) -> Self {
        Affine {
            terms: vec![(name.to_owned(), 1)],
            constant: 0,
        }
    }

    /// Linearize `expr`, or `None` if it is not affine in its variables.
    pub fn from_expr(expr: &Expr) -> Option<Affine> {
        match expr {
            Expr::Var(v) => Some(Affine::var(v)),
            Expr::Int(c) => Some(Affine::constant(*c)),
            Expr::Neg(e) => Affine::from_expr(e)?.scale(-1),
            Expr::Binary(BinOp::Add, l, r) => Affine::from_expr(l)?.add(&Affine::from_expr(r)?),
            Expr::Binary(BinOp::Sub, l, r) => Affine::from_expr(l)?.sub(&Affine::from_expr(r)?),
            Expr::Binary(BinOp::Mul, l, r) => {
                let l = Affine::from_expr(l)?;
                let r = Affine::from_expr(r)?;
                match (l.as_constant(), r.as_constant()) {
                    (Some(c), _) => r.scale(c),
                    (_, Some(c)) => l.scale(c),
                    _ => None,
                }
            }
            Expr::Binary(BinOp::Div | BinOp::Mod, l, r) => {
                let l = Affine::from_expr(l)?.as_constant()?;
                let r = Affine::from_expr(r)?.as_constant()?;
                let value = match expr {
                    Expr::Binary(BinOp::Div, ..) => l.checked_div_euclid(r),
                    _ => l.checked_rem_euclid(r),
                };
                value.map(Affine::constant)
            }
            _ => None,
        }
    }

    pub fn as_constant(&self) -> Option<i64> {
        if self.terms.iter().all(|(_, c)| *c == 0) {
            Some(self.constant)
        } else {
            None
        }
    }

    pub fn coeff(&self, var: &str) -> i64 {
        self.terms
            .iter()
            .filter(|(v, _)| v == var)
            .map(|(_, c)| *c)
            .sum()
    }

    /// Non-zero coefficients keyed by variable.
    pub fn coefficients(&self) -> BTreeMap<&str, i64> {
        let mut out = BTreeMap::new();
        for (v, c) in &self.terms {
            *out.entry(v.as_str()).or_insert(0) += c;
        }
        out.retain(|_, c| *c != 0);
        out
    }

    /// Variables with non-zero coefficients, in first-appearance order.
    pub fn vars(&self) -> Vec<&str> {
        self.terms
            .iter()
            .filter(|(_, c)| *c != 0)
            .map(|(v, _)| v.as_str())
            .collect()
    }

    pub fn mentions(&self, var: &str) -> bool {
        self.coeff(var) != 0
    }

    pub fn scale(mut self, k: i64) -> Option<Affine> {
        for (_, c) in &mut self.terms {
            *c = c.checked_mul(k)?;
        }
        self.constant = self.constant.checked_mul(k)?;
        Some(self.normalized())
    }

    pub fn add(&self, other: &Affine) -> Option<Affine> {
        let mut out = self.clone();
        for (v, c) in &other.terms {
            match out.terms.iter_mut().find(|(w, _)| w == v) {
                Some((_, d)) => *d = d.checked_add(*c)?,
                None => out.terms.push((v.clone(), *c)),
            }
        }
        out.constant = out.constant.checked_add(other.constant)?;
        Some(out.normalized())
    }

    pub fn sub(&self, other: &Affine) -> Option<Affine> {
        self.add(&other.clone().scale(-1)?)
    }

    pub fn add_constant(&self, k: i64) -> Option<Affine> {
        let mut out = self.clone();
        out.constant = out.constant.checked_add(k)?;
        Some(out)
    }

    /// Drop the term for `var`.
    pub fn without(&self, var: &str) -> Affine {
        let mut out = self.clone();
        out.terms.retain(|(v, _)| v != var);
        out
    }

    fn normalized(mut self) -> Affine {
        self.terms.retain(|(_, c)| *c != 0);
        self
    }

    /// Rebuild an expression in canonical form.
    pub fn to_expr(&self) -> Expr {
        let mut acc: Option<Expr> = None;
        for (v, c) in &self.terms {
            if *c == 0 {
                continue;
            }
            let Some(magnitude) = c.checked_abs() else {
                let term = Expr::int(*c) * Expr::var(v);
                acc = Some(match acc {
                    None => term,
                    Some(a) => a + term,
                });
                continue;
            };
            let term = if magnitude == 1 {
                Expr::var(v)
            } else {
                Expr::int(magnitude) * Expr::var(v)
            };
            acc = Some(match acc {
                None if *c < 0 => {
                    if magnitude == 1 {
                        -term
                    } else {
                        Expr::int(*c) * Expr::var(v)
                    }
                }
                None => term,
                Some(a) if *c < 0 => a - term,
                Some(a) => a + term,
            });
        }
        match acc {
            None => Expr::int(self.constant),
            Some(a) if self.constant > 0 => a + Expr::int(self.constant),
            Some(a) if self.constant < 0 => match self.constant.checked_neg() {
                Some(m) => a - Expr::int(m),
                None => a + Expr::int(self.constant),
            },
            Some(a) => a,
        }
    }

    /// Inclusive range of values given inclusive ranges for every variable.
    pub fn range(&self, var_range: impl Fn(&str) -> Option<(i64, i64)>) -> Option<(i64, i64)> {
        let mut lo = self.constant;
        let mut hi = self.constant;
        for (v, c) in self.coefficients() {
            let (vl, vh) = var_range(v)?;
            let (at_lo, at_hi) = if c > 0 { (vl, vh) } else { (vh, vl) };
            lo = lo.checked_add(c.checked_mul(at_lo)?)?;
            hi = hi.checked_add(c.checked_mul(at_hi)?)?;
        }
        Some((lo, hi))
    }
}

/// Structural equality of two index expressions up to affine normalization.
pub fn same_index(a: &Expr, b: &Expr) -> bool {
    match (Affine::from_expr(a), Affine::from_expr(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(n: &str) -> Expr {
        Expr::var(n)
    }

    #[test]
    fn test_linearize() {
        let e = Expr::int(8) * v("jo") + v("ji");
        let a = Affine::from_expr(&e).unwrap();
        assert_eq!(a.coeff("jo"), 8);
        assert_eq!(a.coeff("ji"), 1);
        assert_eq!(a.constant, 0);
        assert_eq!(a.vars(), vec!["jo", "ji"]);
    }

    #[test]
    fn test_non_affine() {
        assert!(Affine::from_expr(&(v("i") * v("j"))).is_none());
        assert!(Affine::from_expr(&(v("i") / Expr::int(2))).is_none());
        assert!(Affine::from_expr(&Expr::read("A", vec![])).is_none());
    }

    #[test]
    fn test_constant_division() {
        let e = (Expr::int(7) + Expr::int(8) - Expr::int(1)) / Expr::int(8);
        assert_eq!(Affine::from_expr(&e).unwrap().as_constant(), Some(1));
    }

    #[test]
    fn test_to_expr_preserves_order() {
        let e = Expr::int(8) * v("jo") + v("ji");
        assert_eq!(Affine::from_expr(&e).unwrap().to_expr(), e);

        let e = Expr::int(8) * Expr::int(0) + v("ji");
        assert_eq!(Affine::from_expr(&e).unwrap().to_expr(), v("ji"));

        let e = v("k") + Expr::int(1) - v("k");
        assert_eq!(Affine::from_expr(&e).unwrap().to_expr(), Expr::int(1));
    }

    #[test]
    fn test_negative_terms() {
        let e = v("i") - Expr::int(2) * v("j") - Expr::int(3);
        let a = Affine::from_expr(&e).unwrap();
        assert_eq!(a.to_expr(), e);
        let b = Affine::from_expr(&a.to_expr()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_equality_ignores_order() {
        let a = Affine::from_expr(&(v("i") + v("j"))).unwrap();
        let b = Affine::from_expr(&(v("j") + v("i"))).unwrap();
        assert_eq!(a, b);
        assert!(same_index(&(v("i") + Expr::int(0)), &v("i")));
    }

    #[test]
    fn test_range() {
        let a = Affine::from_expr(&(Expr::int(8) * v("jo") + v("ji"))).unwrap();
        let r = a.range(|n| match n {
            "jo" => Some((0, 1)),
            "ji" => Some((0, 7)),
            _ => None,
        });
        assert_eq!(r, Some((0, 15)));
        assert_eq!(a.range(|_| None), None);
    }

    #[test]
    fn test_overflow_is_not_affine() {
        let e = Expr::int(i64::MAX) + v("i") + Expr::int(1);
        assert!(Affine::from_expr(&e).is_none());
        assert!(Affine::from_expr(&(Expr::int(i64::MAX) * Expr::int(2))).is_none());
        assert!(Affine::from_expr(&(Expr::int(i64::MIN) / Expr::int(-1))).is_none());

        let big = Affine::from_expr(&(Expr::int(i64::MAX / 2) * v("i"))).unwrap();
        assert_eq!(big.range(|_| Some((0, 3))), None);
    }
}
