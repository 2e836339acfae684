//! Selector patterns.
//!
//! A selector is a fragment of kernel text where `_` matches anything,
//! optionally followed by `#k` to pick the k-th match in program order:
//!
//! ```text
//! for k in _:_          loop over `k`
//! C_reg:_               allocation of `C_reg`
//! C[_] += _             reduction into `C` at any indices
//! C_reg = _ #0          first assignment to `C_reg`
//! A[i, k]               the expression `A[i, k]`
//! mm256_loadu_ps(_)     call of a template
//! ```
//!
//! Inside brackets, a lone `_` matches the whole index list.

use std::str::FromStr;

use winnow::prelude::*;

use crate::ast::{BinOp, Expr, Stmt};
use crate::parser::{ParseError, expr, ident, keyword, ws};

#[derive(Clone, Debug, PartialEq)]
pub enum ExprPattern {
    /// `_`
    Any,
    /// A variable name, or a scalar buffer read.
    Name(String),
    Int(i64),
    Float(f64),
    /// `buf[...]`; `None` matches any index list.
    Read(String, Option<Vec<ExprPattern>>),
    Binary(BinOp, Box<ExprPattern>, Box<ExprPattern>),
    Neg(Box<ExprPattern>),
}

impl ExprPattern {
    fn from_expr(e: &Expr) -> ExprPattern {
        match e {
            Expr::Var(v) if v == "_" => ExprPattern::Any,
            Expr::Var(v) => ExprPattern::Name(v.clone()),
            Expr::Int(n) => ExprPattern::Int(*n),
            Expr::Float(f) => ExprPattern::Float(*f),
            Expr::Read(b, idx) => ExprPattern::Read(b.clone(), index_pattern(idx)),
            Expr::Binary(op, l, r) => ExprPattern::Binary(
                *op,
                Box::new(ExprPattern::from_expr(l)),
                Box::new(ExprPattern::from_expr(r)),
            ),
            Expr::Neg(x) => ExprPattern::Neg(Box::new(ExprPattern::from_expr(x))),
        }
    }

    pub fn matches(&self, e: &Expr) -> bool {
        match (self, e) {
            (ExprPattern::Any, _) => true,
            (ExprPattern::Name(n), Expr::Var(v)) => n == v,
            (ExprPattern::Name(n), Expr::Read(b, idx)) => n == b && idx.is_empty(),
            (ExprPattern::Int(a), Expr::Int(b)) => a == b,
            (ExprPattern::Float(a), Expr::Float(b)) => a == b,
            (ExprPattern::Read(pb, pidx), Expr::Read(b, idx)) => {
                pb == b && indices_match(pidx.as_deref(), idx)
            }
            (ExprPattern::Binary(pop, pl, pr), Expr::Binary(op, l, r)) => {
                pop == op && pl.matches(l) && pr.matches(r)
            }
            (ExprPattern::Neg(p), Expr::Neg(x)) => p.matches(x),
            _ => false,
        }
    }
}

fn index_pattern(idx: &[Expr]) -> Option<Vec<ExprPattern>> {
    match idx {
        [Expr::Var(v)] if v == "_" => None,
        _ => Some(idx.iter().map(ExprPattern::from_expr).collect()),
    }
}

fn indices_match(pattern: Option<&[ExprPattern]>, idx: &[Expr]) -> bool {
    match pattern {
        None => true,
        Some(ps) => ps.len() == idx.len() && ps.iter().zip(idx).all(|(p, e)| p.matches(e)),
    }
}

/// The statement or expression shape a selector looks for.
#[derive(Clone, Debug, PartialEq)]
pub enum Pattern {
    Loop { var: String, bound: ExprPattern },
    Alloc { name: String },
    Assign {
        buf: String,
        idx: Option<Vec<ExprPattern>>,
        rhs: ExprPattern,
        reduce: bool,
    },
    Call { template: String },
    Expr(ExprPattern),
}

impl Pattern {
    pub fn is_stmt(&self) -> bool {
        !matches!(self, Pattern::Expr(_))
    }

    pub fn matches_stmt(&self, stmt: &Stmt) -> bool {
        match (self, stmt) {
            (Pattern::Loop { var, bound }, Stmt::Loop(l)) => *var == l.var && bound.matches(&l.bound),
            (Pattern::Alloc { name }, Stmt::Alloc(d)) => *name == d.name,
            (
                Pattern::Assign {
                    buf,
                    idx,
                    rhs,
                    reduce,
                },
                Stmt::Assign(a) | Stmt::Reduce(a),
            ) => {
                *reduce == matches!(stmt, Stmt::Reduce(_))
                    && *buf == a.buf
                    && indices_match(idx.as_deref(), &a.idx)
                    && rhs.matches(&a.rhs)
            }
            (Pattern::Call { template }, Stmt::Call(c)) => *template == c.template,
            _ => false,
        }
    }
}

/// A parsed selector: pattern plus optional `#k` ordinal.
#[derive(Clone, Debug, PartialEq)]
pub struct Selector {
    pub pattern: Pattern,
    pub ordinal: Option<usize>,
    /// Text the selector was parsed from, for error messages.
    pub source: String,
}

impl Selector {
    pub fn parse(text: &str) -> Result<Selector, ParseError> {
        let (body, ordinal) = split_ordinal(text)?;
        let pattern = parse_pattern(body)?;
        Ok(Selector {
            pattern,
            ordinal,
            source: text.trim().to_owned(),
        })
    }

    /// Read a bare name `x` as the loop selector `for x in _:_`.
    pub fn as_loop(&self) -> Selector {
        match &self.pattern {
            Pattern::Expr(ExprPattern::Name(var)) => Selector {
                pattern: Pattern::Loop {
                    var: var.clone(),
                    bound: ExprPattern::Any,
                },
                ..self.clone()
            },
            _ => self.clone(),
        }
    }

    /// Read a bare name `x` as the allocation selector `x:_`.
    pub fn as_alloc(&self) -> Selector {
        match &self.pattern {
            Pattern::Expr(ExprPattern::Name(name)) => Selector {
                pattern: Pattern::Alloc { name: name.clone() },
                ..self.clone()
            },
            _ => self.clone(),
        }
    }
}

impl FromStr for Selector {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Selector::parse(s)
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

fn split_ordinal(text: &str) -> Result<(&str, Option<usize>), ParseError> {
    let Some(hash) = text.rfind('#') else {
        return Ok((text, None));
    };
    let digits = text[hash + 1..].trim();
    let ordinal = digits.parse::<usize>().map_err(|_| ParseError {
        message: format!("expected a match index after `#`, found `{digits}`"),
        offset: hash + 1,
    })?;
    Ok((&text[..hash], Some(ordinal)))
}

fn parse_pattern(text: &str) -> Result<Pattern, ParseError> {
    let mut input = text;
    let error = |rest: &str, message: &str| ParseError {
        message: message.to_owned(),
        offset: text.len() - rest.len(),
    };
    ws.parse_next(&mut input).map_err(|_| error(input, "bad selector"))?;

    let pattern = if keyword(&mut input, "for").is_ok() {
        loop_pattern(&mut input).map_err(|_| error(input, "expected `for <var> in <bound>:_`"))?
    } else {
        let checkpoint = input;
        let head = ident.parse_next(&mut input).ok();
        let _ = ws.parse_next(&mut input);
        match head {
            Some(name) if input.starts_with(':') => {
                input = &input[1..];
                wildcard(&mut input).map_err(|_| error(input, "expected `_` after `:`"))?;
                Pattern::Alloc {
                    name: name.to_owned(),
                }
            }
            Some(name) if input.starts_with('(') => {
                input = &input[1..];
                let _ = ws.parse_next(&mut input);
                if let Some(rest) = input.strip_prefix('_') {
                    input = rest;
                }
                let _ = ws.parse_next(&mut input);
                if !input.starts_with(')') {
                    return Err(error(input, "expected `(_)` after template name"));
                }
                input = &input[1..];
                Pattern::Call {
                    template: name.to_owned(),
                }
            }
            _ => {
                input = checkpoint;
                expr_or_assign(&mut input).map_err(|_| error(input, "bad selector"))?
            }
        }
    };

    let _ = ws.parse_next(&mut input);
    if !input.is_empty() {
        return Err(error(input, "trailing input in selector"));
    }
    Ok(pattern)
}

fn wildcard(input: &mut &str) -> ModalResult<()> {
    ws.parse_next(input)?;
    '_'.void().parse_next(input)
}

fn loop_pattern(input: &mut &str) -> ModalResult<Pattern> {
    ws.parse_next(input)?;
    let var = ident.parse_next(input)?;
    ws.parse_next(input)?;
    keyword(input, "in")?;
    ws.parse_next(input)?;
    let bound = expr.parse_next(input)?;
    ws.parse_next(input)?;
    ':'.parse_next(input)?;
    wildcard(input)?;
    Ok(Pattern::Loop {
        var: var.to_owned(),
        bound: ExprPattern::from_expr(&bound),
    })
}

fn expr_or_assign(input: &mut &str) -> ModalResult<Pattern> {
    let lhs = expr.parse_next(input)?;
    ws.parse_next(input)?;
    let reduce = if input.starts_with("+=") {
        *input = &input[2..];
        true
    } else if input.starts_with('=') && !input.starts_with("==") {
        *input = &input[1..];
        false
    } else {
        return Ok(Pattern::Expr(ExprPattern::from_expr(&lhs)));
    };
    ws.parse_next(input)?;
    let rhs = expr.parse_next(input)?;
    let (buf, idx) = match lhs {
        // a bare name matches writes at any indices
        Expr::Var(v) => (v, None),
        Expr::Read(b, idx) => (b, index_pattern(&idx)),
        _ => {
            return Err(winnow::error::ErrMode::Backtrack(
                winnow::error::ContextError::new(),
            ));
        }
    };
    Ok(Pattern::Assign {
        buf,
        idx,
        rhs: ExprPattern::from_expr(&rhs),
        reduce,
    })
}
