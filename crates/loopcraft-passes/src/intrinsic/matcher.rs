//! Structural unification of a template body with a run of statements.
//!
//! Loops match loops with the same constant trip count, and each template
//! loop variable is bound to exactly one code loop variable. Every template
//! buffer access `p[t0, .., tr]` is matched against a code access
//! `b[e0, .., en]` with `n >= r`: the leading `n - r` indices become point
//! dimensions of the window and must not vary with a matched loop, and each
//! trailing index must equal `lo + t` for an offset `lo` that does not
//! either. The window passed for `p` is then `b[.., lo:lo + extent, ..]`,
//! and it has to be the same for every access to `p`.

use std::collections::{BTreeMap, BTreeSet};

use loopcraft_ir::affine::{Affine, same_index};
use loopcraft_ir::{Block, Call, Expr, Proc, Stmt, StmtPath, Window, WindowDim};

use crate::util::{const_value, visible_decl};

/// Try to match `template` against the statements starting at `path`.
///
/// On success, returns the call that replaces them; the run is as long as
/// the template body.
pub(crate) fn match_at(template: &Proc, proc: &Proc, path: &StmtPath) -> Result<Call, String> {
    let block = proc
        .container(path)
        .ok_or_else(|| format!("no statement at {path}"))?;
    let start = path.last();
    let len = template.body.len();
    let run = block
        .stmts
        .get(start..start + len)
        .ok_or_else(|| format!("needs {len} statement(s) at {path}"))?;

    let mut u = Unifier {
        template,
        scope: Vec::new(),
        bound: BTreeSet::new(),
        sites: BTreeMap::new(),
    };
    for (t, c) in template.body.iter().zip(run) {
        u.stmt(t, c)?;
    }

    let mut args = Vec::new();
    for formal in template.buffer_params() {
        let site = u
            .sites
            .remove(&formal.name)
            .ok_or_else(|| format!("`{}` is never accessed", formal.name))?;
        let actual = visible_decl(proc, path, &site.buf)
            .ok_or_else(|| format!("`{}` is not declared", site.buf))?;
        if actual.ty != formal.ty {
            return Err(format!("`{}` is {}, `{}` expects {}", site.buf, actual.ty, formal.name, formal.ty));
        }
        if actual.mem != formal.mem {
            return Err(format!(
                "`{}` lives in {}, `{}` expects {}",
                site.buf, actual.mem, formal.name, formal.mem
            ));
        }
        let mut dims: Vec<WindowDim> = site.lead.into_iter().map(WindowDim::Point).collect();
        for (lo, extent) in site.los.into_iter().zip(&formal.shape) {
            let extent = extent
                .as_int()
                .ok_or_else(|| format!("`{}` has a symbolic shape", formal.name))?;
            let hi = lo
                .add_constant(extent)
                .ok_or_else(|| format!("window of `{}` overflows", site.buf))?;
            dims.push(WindowDim::Interval(lo.to_expr(), hi.to_expr()));
        }
        args.push(Window { buf: site.buf, dims });
    }
    Ok(Call {
        template: template.name.clone(),
        args,
    })
}

/// Where a template parameter points in the code.
struct Site {
    buf: String,
    lead: Vec<Expr>,
    los: Vec<Affine>,
}

impl Site {
    fn same(&self, other: &Site) -> bool {
        self.buf == other.buf
            && self.lead.len() == other.lead.len()
            && self.lead.iter().zip(&other.lead).all(|(a, b)| same_index(a, b))
            && self.los == other.los
    }
}

struct Unifier<'t> {
    template: &'t Proc,
    /// Template loop variable to code loop variable, innermost last.
    scope: Vec<(String, String)>,
    /// Every code loop variable bound so far.
    bound: BTreeSet<String>,
    sites: BTreeMap<String, Site>,
}

impl Unifier<'_> {
    fn block(&mut self, t: &Block, c: &Block) -> Result<(), String> {
        if t.len() != c.len() {
            return Err(format!("expected {} statement(s), found {}", t.len(), c.len()));
        }
        for (t, c) in t.iter().zip(c) {
            self.stmt(t, c)?;
        }
        Ok(())
    }

    fn stmt(&mut self, t: &Stmt, c: &Stmt) -> Result<(), String> {
        match (t, c) {
            (Stmt::Loop(tl), Stmt::Loop(cl)) => {
                let want = tl
                    .bound
                    .as_int()
                    .ok_or_else(|| format!("template loop `{}` has a symbolic bound", tl.var))?;
                if const_value(&cl.bound) != Some(want) {
                    return Err(format!("`for {}` runs `{}` times, expected {want}", cl.var, cl.bound));
                }
                if self.bound.contains(&cl.var) {
                    return Err(format!("`{}` is bound to two template loops", cl.var));
                }
                self.scope.push((tl.var.clone(), cl.var.clone()));
                self.bound.insert(cl.var.clone());
                let result = self.block(&tl.body, &cl.body);
                self.scope.pop();
                result
            }
            (Stmt::If(ti), Stmt::If(ci)) => {
                self.index(&ti.cond, &ci.cond)?;
                self.block(&ti.body, &ci.body)
            }
            (Stmt::Assign(ta), Stmt::Assign(ca)) | (Stmt::Reduce(ta), Stmt::Reduce(ca)) => {
                self.access(&ta.buf, &ta.idx, &ca.buf, &ca.idx)?;
                self.data(&ta.rhs, &ca.rhs)
            }
            _ => Err(format!("expected {}, found {}", kind(t), kind(c))),
        }
    }

    fn data(&mut self, t: &Expr, c: &Expr) -> Result<(), String> {
        match (t, c) {
            (Expr::Read(tb, ti), Expr::Read(cb, ci)) => self.access(tb, ti, cb, ci),
            (Expr::Float(a), Expr::Float(b)) if a == b => Ok(()),
            (Expr::Int(a), Expr::Int(b)) if a == b => Ok(()),
            (Expr::Var(_), _) => self.index(t, c),
            (Expr::Binary(o1, l1, r1), Expr::Binary(o2, l2, r2)) if o1 == o2 => {
                self.data(l1, l2)?;
                self.data(r1, r2)
            }
            (Expr::Neg(a), Expr::Neg(b)) => self.data(a, b),
            _ => Err(format!("`{c}` does not match `{t}`")),
        }
    }

    fn index(&self, t: &Expr, c: &Expr) -> Result<(), String> {
        match (t, c) {
            (Expr::Binary(o1, l1, r1), Expr::Binary(o2, l2, r2)) if o1 == o2 && !o1.is_arithmetic() => {
                self.index(l1, l2)?;
                self.index(r1, r2)
            }
            _ if same_index(&self.translate(t), c) => Ok(()),
            _ => Err(format!("`{c}` does not match `{t}`")),
        }
    }

    fn access(&mut self, tb: &str, tidx: &[Expr], cb: &str, cidx: &[Expr]) -> Result<(), String> {
        let formal = self
            .template
            .buffer_param(tb)
            .ok_or_else(|| format!("`{tb}` is not a template parameter"))?;
        let rank = tidx.len();
        if cidx.len() < rank {
            return Err(format!("`{cb}` has fewer dimensions than `{}`", formal.name));
        }
        let (lead, tail) = cidx.split_at(cidx.len() - rank);
        if let Some(e) = lead.iter().find(|e| self.varies(e)) {
            return Err(format!("index `{e}` of `{cb}` varies inside the matched loops"));
        }
        let mut los = Vec::with_capacity(rank);
        for (t, c) in tidx.iter().zip(tail) {
            let ta = Affine::from_expr(&self.translate(t))
                .ok_or_else(|| format!("template index `{t}` is not affine"))?;
            let ca = Affine::from_expr(c).ok_or_else(|| format!("`{c}` is not affine"))?;
            let lo = ca
                .sub(&ta)
                .ok_or_else(|| format!("`{c}` is too large to align with `{t}`"))?;
            if self.bound.iter().any(|v| lo.mentions(v)) {
                return Err(format!("`{cb}` index `{c}` does not follow `{tb}` index `{t}`"));
            }
            los.push(lo);
        }
        let site = Site {
            buf: cb.to_owned(),
            lead: lead.to_vec(),
            los,
        };
        match self.sites.get(tb) {
            Some(prev) if prev.same(&site) => Ok(()),
            Some(_) => Err(format!("`{tb}` would need two different windows")),
            None if self.sites.values().any(|s| s.buf == cb) => {
                Err(format!("`{cb}` would be passed for two parameters"))
            }
            None => {
                self.sites.insert(tb.to_owned(), site);
                Ok(())
            }
        }
    }

    fn varies(&self, e: &Expr) -> bool {
        self.bound.iter().any(|v| e.mentions_var(v))
    }

    /// Rewrite template loop variables into the code variables bound to them.
    fn translate(&self, t: &Expr) -> Expr {
        match t {
            Expr::Var(v) => match self.scope.iter().rev().find(|(tv, _)| tv == v) {
                Some((_, cv)) => Expr::var(cv),
                None => t.clone(),
            },
            Expr::Read(b, idx) => Expr::read(b.clone(), idx.iter().map(|i| self.translate(i)).collect()),
            Expr::Binary(op, l, r) => Expr::binary(*op, self.translate(l), self.translate(r)),
            Expr::Neg(x) => -self.translate(x),
            Expr::Int(_) | Expr::Float(_) => t.clone(),
        }
    }
}

fn kind(stmt: &Stmt) -> &'static str {
    match stmt {
        Stmt::Loop(_) => "a loop",
        Stmt::If(_) => "a guard",
        Stmt::Assign(_) => "an assignment",
        Stmt::Reduce(_) => "a reduction",
        Stmt::Alloc(_) => "an allocation",
        Stmt::Call(_) => "a call",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopcraft_ir::parse_proc;

    const LOADU: &str = r#"@instr("{dst} = _mm256_loadu_ps(&{src});")
        proc loadu(dst: f32[8] @ AVX2, src: f32[8] @ DRAM) {
            for i in seq(8) { dst[i] = src[i]; }
        }"#;

    const BROADCAST: &str = r#"@instr("{out} = _mm256_broadcast_ss({val});")
        proc broadcast(out: f32[8] @ AVX2, val: f32[1] @ DRAM) {
            for i in seq(8) { out[i] = val[0]; }
        }"#;

    fn call_text(template: &str, kernel: &str, path: &[usize]) -> Result<String, String> {
        let template = parse_proc(template).unwrap();
        let proc = parse_proc(kernel).unwrap();
        match_at(&template, &proc, &StmtPath(path.to_vec())).map(|c| Stmt::Call(c).to_string())
    }

    #[test]
    fn test_match_offset_window() {
        let kernel = "proc f(C: f32[6, 16] @ DRAM) {
            R: f32[6, 2, 8] @ AVX2;
            for i in par(6) { for jo in par(2) { for ji in par(8) { R[i, jo, ji] = C[i, 8 * jo + ji]; } } }
        }";
        assert_eq!(
            call_text(LOADU, kernel, &[1, 0, 0]).unwrap().trim(),
            "loadu(R[i, jo, 0:8], C[i, 8 * jo:8 * jo + 8]);"
        );
    }

    #[test]
    fn test_match_constant_index() {
        let kernel = "proc f(K: size, A: f32[6, K] @ DRAM) {
            for i in par(6) { for k in seq(K) { v: f32[8] @ AVX2; for ji in par(8) { v[ji] = A[i, k]; } } }
        }";
        assert_eq!(
            call_text(BROADCAST, kernel, &[0, 0, 1]).unwrap().trim(),
            "broadcast(v[0:8], A[i, k:k + 1]);"
        );
    }

    #[test]
    fn test_mismatches() {
        let kernel = "proc f(B: f32[4, 16] @ DRAM, X: f32[16] @ DRAM) {
            v: f32[8] @ AVX2;
            for ji in par(8) { v[ji] = B[ji, 0]; }
            for ji in par(4) { v[ji] = X[ji]; }
            for ji in par(8) { v[ji] = X[2 * ji]; }
            for ji in par(8) { X[ji] = 0.0; }
        }";
        // leading index varies with the loop
        assert!(call_text(LOADU, kernel, &[1]).is_err());
        // trip count
        assert!(call_text(LOADU, kernel, &[2]).unwrap_err().contains("expected 8"));
        // stride 2
        assert!(call_text(LOADU, kernel, &[3]).is_err());
        // statement shape
        assert!(call_text(LOADU, kernel, &[4]).is_err());
    }

    #[test]
    fn test_memory_contract() {
        let kernel = "proc f(X: f32[8] @ DRAM) {
            v: f32[8] @ DRAM;
            for ji in par(8) { v[ji] = X[ji]; }
        }";
        assert!(call_text(LOADU, kernel, &[1]).unwrap_err().contains("AVX2"));
    }
}
