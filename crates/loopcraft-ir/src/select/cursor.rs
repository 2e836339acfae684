//! Cursors: stable addresses of statements and expressions.
//!
//! A cursor is valid for the exact [`Proc`] it was resolved against.
//! Primitives resolve their selectors afresh on every input kernel.

use crate::ast::{Expr, Proc, StmtPath};
use crate::walk::for_each_stmt;

use super::pattern::{Pattern, Selector};

/// Address of an expression: owning statement, expression slot of that
/// statement (see [`Stmt::exprs`]), then child steps through
/// [`Expr::children`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExprPath {
    pub stmt: StmtPath,
    pub slot: usize,
    pub steps: Vec<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Cursor {
    Stmt(StmtPath),
    Expr(ExprPath),
}

impl Cursor {
    pub fn stmt_path(&self) -> &StmtPath {
        match self {
            Cursor::Stmt(p) => p,
            Cursor::Expr(e) => &e.stmt,
        }
    }
}

impl Proc {
    pub fn expr_at(&self, path: &ExprPath) -> Option<&Expr> {
        let stmt = self.stmt(&path.stmt)?;
        stmt.exprs().into_iter().nth(path.slot)?.at(&path.steps)
    }

    pub fn expr_at_mut(&mut self, path: &ExprPath) -> Option<&mut Expr> {
        let stmt = self.stmt_mut(&path.stmt)?;
        stmt.exprs_mut().into_iter().nth(path.slot)?.at_mut(&path.steps)
    }
}

/// Why a selector failed to pick exactly one location.
#[derive(Clone, Debug, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum SelectError {
    #[display("no match for `{pattern}`")]
    NotFound { pattern: String },
    #[display("`{pattern}` matches {count} locations; add `#k` to pick one")]
    Ambiguous { pattern: String, count: usize },
}

/// Every statement and expression matching `pattern`, in program order.
///
/// Statements are visited in pre-order. For expression patterns, the
/// expressions of each visited statement are scanned slot by slot, each in
/// pre-order.
pub fn find_all(proc: &Proc, pattern: &Pattern) -> Vec<Cursor> {
    let mut out = Vec::new();
    for_each_stmt(&proc.body, &mut |path, stmt| {
        match pattern {
            Pattern::Expr(p) => {
                for (slot, e) in stmt.exprs().into_iter().enumerate() {
                    let mut steps = Vec::new();
                    visit_expr(e, &mut steps, &mut |steps, sub| {
                        if p.matches(sub) {
                            out.push(Cursor::Expr(ExprPath {
                                stmt: path.clone(),
                                slot,
                                steps: steps.to_vec(),
                            }));
                        }
                    });
                }
            }
            _ => {
                if pattern.matches_stmt(stmt) {
                    out.push(Cursor::Stmt(path.clone()));
                }
            }
        }
    });
    out
}

fn visit_expr(e: &Expr, steps: &mut Vec<usize>, f: &mut dyn FnMut(&[usize], &Expr)) {
    f(steps, e);
    for (i, child) in e.children().into_iter().enumerate() {
        steps.push(i);
        visit_expr(child, steps, f);
        steps.pop();
    }
}

/// Resolve `selector` to exactly one location.
pub fn resolve(proc: &Proc, selector: &Selector) -> Result<Cursor, SelectError> {
    let mut matches = find_all(proc, &selector.pattern);
    let pattern = selector.source.clone();
    match selector.ordinal {
        Some(k) if k < matches.len() => Ok(matches.swap_remove(k)),
        Some(_) => Err(SelectError::NotFound { pattern }),
        None if matches.len() == 1 => Ok(matches.swap_remove(0)),
        None if matches.is_empty() => Err(SelectError::NotFound { pattern }),
        None => Err(SelectError::Ambiguous {
            pattern,
            count: matches.len(),
        }),
    }
}

/// Resolve to a statement. Expression matches count as no match.
pub fn resolve_stmt(proc: &Proc, selector: &Selector) -> Result<StmtPath, SelectError> {
    if !selector.pattern.is_stmt() {
        return Err(SelectError::NotFound {
            pattern: selector.source.clone(),
        });
    }
    resolve(proc, selector).map(|c| c.stmt_path().clone())
}

/// Resolve to an expression.
pub fn resolve_expr(proc: &Proc, selector: &Selector) -> Result<ExprPath, SelectError> {
    match resolve(proc, selector)? {
        Cursor::Expr(p) => Ok(p),
        Cursor::Stmt(_) => Err(SelectError::NotFound {
            pattern: selector.source.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_proc;

    const SPLIT: &str = r#"
        proc f(A: f32[6, 4] @ DRAM, B: f32[4, 16] @ DRAM, C: f32[6, 16] @ DRAM) {
          for i in par(6) {
            for jo in par(2) {
              for k in par(4) {
                for ji in par(8) {
                  C[i, 8 * jo + ji] += A[i, k] * B[k, 8 * jo + ji];
                }
              }
            }
          }
          for i in par(6) {
            C[i, 0] = 0.0;
          }
        }
    "#;

    fn sel(s: &str) -> Selector {
        Selector::parse(s).unwrap()
    }

    #[test]
    fn test_resolve_loop() {
        let proc = parse_proc(SPLIT).unwrap();
        let path = resolve_stmt(&proc, &sel("for k in _:_")).unwrap();
        assert_eq!(path, StmtPath(vec![0, 0, 0]));
    }

    #[test]
    fn test_ambiguous_and_ordinals() {
        let proc = parse_proc(SPLIT).unwrap();
        let err = resolve_stmt(&proc, &sel("for i in _:_")).unwrap_err();
        assert_eq!(
            err,
            SelectError::Ambiguous {
                pattern: "for i in _:_".into(),
                count: 2
            }
        );
        assert_eq!(resolve_stmt(&proc, &sel("for i in _:_ #0")).unwrap(), StmtPath(vec![0]));
        assert_eq!(resolve_stmt(&proc, &sel("for i in _:_ #1")).unwrap(), StmtPath(vec![1]));
        assert!(matches!(
            resolve_stmt(&proc, &sel("for i in _:_ #2")),
            Err(SelectError::NotFound { .. })
        ));
    }

    #[test]
    fn test_not_found() {
        let proc = parse_proc(SPLIT).unwrap();
        let err = resolve_stmt(&proc, &sel("for q in _:_")).unwrap_err();
        assert_eq!(err.to_string(), "no match for `for q in _:_`");
    }

    #[test]
    fn test_resolve_expression() {
        let proc = parse_proc(SPLIT).unwrap();
        let path = resolve_expr(&proc, &sel("A[i, k]")).unwrap();
        assert_eq!(path.stmt, StmtPath(vec![0, 0, 0, 0, 0]));
        // slots: two indices, then the right-hand side; A[i, k] is its left operand
        assert_eq!(path.slot, 2);
        assert_eq!(path.steps, vec![0]);
        assert_eq!(proc.expr_at(&path), Some(&crate::parser::parse_expr("A[i, k]").unwrap()));
    }

    #[test]
    fn test_wildcard_indices() {
        let proc = parse_proc(SPLIT).unwrap();
        assert_eq!(find_all(&proc, &sel("C[_] += _").pattern).len(), 1);
        assert_eq!(find_all(&proc, &sel("C[_] = _").pattern).len(), 1);
        assert_eq!(find_all(&proc, &sel("B[k, _]").pattern).len(), 1);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let proc = parse_proc(SPLIT).unwrap();
        let a = find_all(&proc, &sel("_").pattern);
        let b = find_all(&proc, &sel("_").pattern);
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }
}
