//! Template substitution.

use std::ops::ControlFlow;

use loopcraft_ir::walk::{WalkAction, walk_block};
use loopcraft_ir::{Call, Proc, Stmt, StmtPath, ValidationKind, validate};

use crate::error::{ScheduleError, ScheduleResult};
use crate::intrinsic::TemplateCatalog;
use crate::intrinsic::matcher::match_at;
use crate::util::resolve_any_stmt;

/// Replace the statements starting at `selector` with a call to
/// `template`, whose body they must match.
pub fn replace(proc: &Proc, catalog: &TemplateCatalog, template: &str, selector: &str) -> ScheduleResult<Proc> {
    let tpl = catalog.get(template).ok_or_else(|| ScheduleError::UnknownTemplate {
        name: template.to_owned(),
    })?;
    let path = resolve_any_stmt(proc, selector)?;
    let call = match_at(tpl, proc, &path).map_err(|reason| ScheduleError::template(template, reason))?;
    tracing::debug!(template, at = %path, "replace");
    let mut out = proc.clone();
    substitute(&mut out, &path, tpl.body.len(), Stmt::Call(call))?;
    check(out, catalog, template)
}

/// Replace every match of `template`, in program order.
///
/// Finding no match is not an error: the kernel is returned unchanged.
pub fn replace_all(proc: &Proc, catalog: &TemplateCatalog, template: &str) -> ScheduleResult<Proc> {
    let tpl = catalog.get(template).ok_or_else(|| ScheduleError::UnknownTemplate {
        name: template.to_owned(),
    })?;
    let mut out = proc.clone();
    let mut count = 0;
    // Calls never match a template body, so replaced code is not revisited
    // and every round makes progress.
    while let Some((path, call)) = first_match(&out, tpl) {
        tracing::trace!(template, at = %path, "replace_all match");
        substitute(&mut out, &path, tpl.body.len(), Stmt::Call(call))?;
        count += 1;
    }
    if count == 0 {
        tracing::warn!(template, "replace_all found no match");
        return Ok(out);
    }
    tracing::debug!(template, count, "replace_all");
    check(out, catalog, template)
}

fn first_match(proc: &Proc, template: &Proc) -> Option<(StmtPath, Call)> {
    let found = walk_block(&proc.body, &mut |path, stmt| {
        if matches!(stmt, Stmt::Call(_)) {
            return ControlFlow::Continue(WalkAction::Skip);
        }
        match match_at(template, proc, path) {
            Ok(call) => ControlFlow::Break((path.clone(), call)),
            Err(_) => ControlFlow::Continue(WalkAction::Advance),
        }
    });
    match found {
        ControlFlow::Break(hit) => Some(hit),
        ControlFlow::Continue(()) => None,
    }
}

fn substitute(proc: &mut Proc, path: &StmtPath, len: usize, call: Stmt) -> ScheduleResult<()> {
    let start = path.last();
    let block = proc
        .container_mut(path)
        .ok_or_else(|| ScheduleError::state(format!("no statement at {path}")))?;
    if start + len > block.stmts.len() {
        return Err(ScheduleError::state(format!("no statement run of {len} at {path}")));
    }
    block.stmts.splice(start..start + len, [call]);
    Ok(())
}

fn check(out: Proc, catalog: &TemplateCatalog, template: &str) -> ScheduleResult<Proc> {
    match validate(&out, Some(catalog)) {
        Ok(()) => Ok(out),
        Err(e) if e.kind == ValidationKind::Template => Err(ScheduleError::template(template, e)),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;
    use loopcraft_ir::parse_proc;

    fn catalog() -> TemplateCatalog {
        let mut catalog = TemplateCatalog::new();
        for text in [
            r#"@instr("{dst} = _mm256_loadu_ps(&{src});")
            proc loadu(dst: f32[8] @ AVX2, src: f32[8] @ DRAM) {
                for i in seq(8) { dst[i] = src[i]; }
            }"#,
            r#"@instr("_mm256_storeu_ps(&{dst}, {src});")
            proc storeu(dst: f32[8] @ DRAM, src: f32[8] @ AVX2) {
                for i in seq(8) { dst[i] = src[i]; }
            }"#,
            r#"@instr("{dst} = _mm256_setzero_ps();")
            proc set0(dst: f32[8] @ AVX2) {
                for i in seq(8) { dst[i] = 0.0; }
            }"#,
        ] {
            catalog.register(parse_proc(text).unwrap()).unwrap();
        }
        catalog
    }

    const ROUND_TRIP: &str = "proc f(C: f32[2, 16] @ DRAM) {
        R: f32[2, 2, 8] @ AVX2;
        for i in par(2) { for jo in par(2) { for ji in par(8) { R[i, jo, ji] = C[i, 8 * jo + ji]; } } }
        for i in par(2) { for jo in par(2) { for ji in par(8) { C[i, 8 * jo + ji] = R[i, jo, ji]; } } }
    }";

    #[test]
    fn test_replace_selected_loop() {
        let proc = parse_proc(ROUND_TRIP).unwrap();
        let out = replace(&proc, &catalog(), "loadu", "for ji in _:_ #0").unwrap();
        let out = replace(&out, &catalog(), "storeu", "for ji in _:_ #0").unwrap();
        assert_snapshot!(out.to_string(), @r"
        proc f(C: f32[2, 16] @ DRAM) {
          R: f32[2, 2, 8] @ AVX2;
          for i in par(2) {
            for jo in par(2) {
              loadu(R[i, jo, 0:8], C[i, 8 * jo:8 * jo + 8]);
            }
          }
          for i in par(2) {
            for jo in par(2) {
              storeu(C[i, 8 * jo:8 * jo + 8], R[i, jo, 0:8]);
            }
          }
        }
        ");
    }

    #[test]
    fn test_replace_mismatch() {
        let proc = parse_proc(ROUND_TRIP).unwrap();
        assert!(matches!(
            replace(&proc, &catalog(), "storeu", "for ji in _:_ #0"),
            Err(ScheduleError::TemplateMismatch { .. })
        ));
        assert_eq!(
            replace(&proc, &catalog(), "nope", "for ji in _:_ #0"),
            Err(ScheduleError::UnknownTemplate { name: "nope".into() })
        );
    }

    #[test]
    fn test_replace_all() {
        let proc = parse_proc(ROUND_TRIP).unwrap();
        let out = replace_all(&proc, &catalog(), "loadu").unwrap();
        let calls = out.to_string().matches("loadu(").count();
        assert_eq!(calls, 1);
        assert!(!out.to_string().contains("storeu"));
    }

    #[test]
    fn test_replace_all_without_match_is_identity() {
        let proc = parse_proc(ROUND_TRIP).unwrap();
        assert_eq!(replace_all(&proc, &catalog(), "set0").unwrap(), proc);
    }
}
