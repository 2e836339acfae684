//! Scheduling pipeline.
//!
//! A [`Schedule`] is an ordered list of [`Step`]s. Replaying it on a
//! reference kernel threads the kernel through one primitive per step:
//!
//! ```text
//! reference Proc
//!     │
//!     ▼
//! Step 0 ─► Proc (validated)
//!     │
//!     ▼
//!    ...
//!     │
//!     ▼
//! Step n ─► scheduled Proc
//! ```
//!
//! The first failing step stops the replay. The error names the step and
//! carries the last kernel that was produced before it, so a schedule can
//! be debugged one step at a time.

use derive_more::{Display, Error};
use loopcraft_ir::{MemorySpace, Proc, TemplateLookup, validate};
use loopcraft_passes::{self as passes, ScheduleError, ScheduleResult, TemplateCatalog};
use serde::{Deserialize, Serialize};

/// One scheduling primitive with its arguments.
///
/// `Display` renders the step as a schedule-script line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Rename {
        name: String,
    },
    Split {
        #[serde(rename = "loop")]
        loop_sel: String,
        factor: i64,
        outer: String,
        inner: String,
        #[serde(default)]
        perfect: bool,
    },
    Reorder {
        outer: String,
        inner: String,
    },
    FissionAfter {
        stmt: String,
        n_lifts: usize,
    },
    LiftAlloc {
        alloc: String,
        n_lifts: usize,
        #[serde(default)]
        keep_dims: bool,
    },
    StageAssn {
        name: String,
        reduce: String,
    },
    BindExpr {
        name: String,
        expr: String,
    },
    SetMemory {
        buffer: String,
        space: MemorySpace,
    },
    ParToSeq {
        #[serde(rename = "loop")]
        loop_sel: String,
    },
    Replace {
        template: String,
        selector: String,
    },
    ReplaceAll {
        template: String,
    },
    Unroll {
        #[serde(rename = "loop")]
        loop_sel: String,
    },
    UnrollBuffer {
        alloc: String,
        dim: usize,
    },
    Simplify,
}

impl Step {
    /// Name of the primitive, as written in scripts.
    pub fn op(&self) -> &'static str {
        match self {
            Step::Rename { .. } => "rename",
            Step::Split { .. } => "split",
            Step::Reorder { .. } => "reorder",
            Step::FissionAfter { .. } => "fission_after",
            Step::LiftAlloc { .. } => "lift_alloc",
            Step::StageAssn { .. } => "stage_assn",
            Step::BindExpr { .. } => "bind_expr",
            Step::SetMemory { .. } => "set_memory",
            Step::ParToSeq { .. } => "par_to_seq",
            Step::Replace { .. } => "replace",
            Step::ReplaceAll { .. } => "replace_all",
            Step::Unroll { .. } => "unroll",
            Step::UnrollBuffer { .. } => "unroll_buffer",
            Step::Simplify => "simplify",
        }
    }

    /// Apply this step to `proc`.
    pub fn apply(&self, proc: &Proc, catalog: &TemplateCatalog) -> ScheduleResult<Proc> {
        match self {
            Step::Rename { name } => Ok(passes::rename(proc, name)),
            Step::Split {
                loop_sel,
                factor,
                outer,
                inner,
                perfect,
            } => passes::split(proc, loop_sel, *factor, outer, inner, *perfect),
            Step::Reorder { outer, inner } => passes::reorder(proc, outer, inner),
            Step::FissionAfter { stmt, n_lifts } => passes::fission_after(proc, stmt, *n_lifts),
            Step::LiftAlloc {
                alloc,
                n_lifts,
                keep_dims,
            } => passes::lift_alloc(proc, alloc, *n_lifts, *keep_dims),
            Step::StageAssn { name, reduce } => passes::stage_assn(proc, name, reduce),
            Step::BindExpr { name, expr } => passes::bind_expr(proc, name, expr),
            Step::SetMemory { buffer, space } => passes::set_memory(proc, buffer, *space, Some(catalog)),
            Step::ParToSeq { loop_sel } => passes::par_to_seq(proc, loop_sel),
            Step::Replace { template, selector } => passes::replace(proc, catalog, template, selector),
            Step::ReplaceAll { template } => passes::replace_all(proc, catalog, template),
            Step::Unroll { loop_sel } => passes::unroll(proc, loop_sel),
            Step::UnrollBuffer { alloc, dim } => passes::unroll_buffer(proc, alloc, *dim),
            Step::Simplify => {
                let out = passes::simplify(proc);
                validate(&out, Some(catalog as &dyn TemplateLookup))?;
                Ok(out)
            }
        }
    }
}

/// A kernel produced by one step of a replay.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TraceEntry {
    pub step: Step,
    pub kernel: Proc,
}

/// Result of a successful replay.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScheduleOutcome {
    pub reference: Proc,
    pub scheduled: Proc,
    /// The kernel after each step, in order.
    pub trace: Vec<TraceEntry>,
}

/// A step that could not be applied.
#[derive(Clone, Debug, Display, Error)]
#[display("step {step_index} `{step}` failed: {source}")]
pub struct PipelineError {
    pub step_index: usize,
    #[error(not(source))]
    pub step: Step,
    pub source: ScheduleError,
    /// The kernel the failing step was given.
    #[error(not(source))]
    pub last_good: Proc,
}

/// An ordered list of scheduling steps.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schedule {
    steps: Vec<Step>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_steps(steps: Vec<Step>) -> Self {
        Schedule { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn then(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn rename(self, name: &str) -> Self {
        self.then(Step::Rename { name: name.into() })
    }

    pub fn split(self, loop_sel: &str, factor: i64, [outer, inner]: [&str; 2], perfect: bool) -> Self {
        self.then(Step::Split {
            loop_sel: loop_sel.into(),
            factor,
            outer: outer.into(),
            inner: inner.into(),
            perfect,
        })
    }

    pub fn reorder(self, outer: &str, inner: &str) -> Self {
        self.then(Step::Reorder {
            outer: outer.into(),
            inner: inner.into(),
        })
    }

    pub fn fission_after(self, stmt: &str, n_lifts: usize) -> Self {
        self.then(Step::FissionAfter {
            stmt: stmt.into(),
            n_lifts,
        })
    }

    pub fn lift_alloc(self, alloc: &str, n_lifts: usize, keep_dims: bool) -> Self {
        self.then(Step::LiftAlloc {
            alloc: alloc.into(),
            n_lifts,
            keep_dims,
        })
    }

    pub fn stage_assn(self, name: &str, reduce: &str) -> Self {
        self.then(Step::StageAssn {
            name: name.into(),
            reduce: reduce.into(),
        })
    }

    pub fn bind_expr(self, name: &str, expr: &str) -> Self {
        self.then(Step::BindExpr {
            name: name.into(),
            expr: expr.into(),
        })
    }

    pub fn set_memory(self, buffer: &str, space: MemorySpace) -> Self {
        self.then(Step::SetMemory {
            buffer: buffer.into(),
            space,
        })
    }

    pub fn par_to_seq(self, loop_sel: &str) -> Self {
        self.then(Step::ParToSeq {
            loop_sel: loop_sel.into(),
        })
    }

    pub fn replace(self, template: &str, selector: &str) -> Self {
        self.then(Step::Replace {
            template: template.into(),
            selector: selector.into(),
        })
    }

    pub fn replace_all(self, template: &str) -> Self {
        self.then(Step::ReplaceAll {
            template: template.into(),
        })
    }

    pub fn unroll(self, loop_sel: &str) -> Self {
        self.then(Step::Unroll {
            loop_sel: loop_sel.into(),
        })
    }

    pub fn unroll_buffer(self, alloc: &str, dim: usize) -> Self {
        self.then(Step::UnrollBuffer {
            alloc: alloc.into(),
            dim,
        })
    }

    pub fn simplify(self) -> Self {
        self.then(Step::Simplify)
    }

    /// Replay the schedule on `reference`.
    pub fn apply(&self, reference: &Proc, catalog: &TemplateCatalog) -> Result<ScheduleOutcome, PipelineError> {
        let mut current = reference.clone();
        let mut trace = Vec::with_capacity(self.steps.len());
        for (step_index, step) in self.steps.iter().enumerate() {
            tracing::debug!(step_index, %step, "applying step");
            match step.apply(&current, catalog) {
                Ok(next) => {
                    trace.push(TraceEntry {
                        step: step.clone(),
                        kernel: next.clone(),
                    });
                    current = next;
                }
                Err(source) => {
                    tracing::debug!(step_index, error = %source, "step failed");
                    return Err(PipelineError {
                        step_index,
                        step: step.clone(),
                        source,
                        last_good: current,
                    });
                }
            }
        }
        Ok(ScheduleOutcome {
            reference: reference.clone(),
            scheduled: current,
            trace,
        })
    }
}

impl FromIterator<Step> for Schedule {
    fn from_iter<I: IntoIterator<Item = Step>>(iter: I) -> Self {
        Schedule {
            steps: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;
    use loopcraft_ir::parse_proc;

    const MATMUL: &str = "proc rank_k(K: size, C: f32[6, 16] @ DRAM, A: f32[6, K] @ DRAM, B: f32[K, 16] @ DRAM) {
        for i in par(6) { for j in par(16) { for k in par(K) { C[i, j] += A[i, k] * B[k, j]; } } }
    }";

    #[test]
    fn test_apply_records_trace() {
        let proc = parse_proc(MATMUL).unwrap();
        let schedule = Schedule::new()
            .rename("rank_k_scheduled")
            .split("j", 8, ["jo", "ji"], true)
            .reorder("ji", "k");
        let outcome = schedule.apply(&proc, &TemplateCatalog::new()).unwrap();
        assert_eq!(outcome.trace.len(), 3);
        assert_eq!(outcome.reference, proc);
        assert_snapshot!(outcome.scheduled.to_string(), @r"
        proc rank_k_scheduled(K: size, C: f32[6, 16] @ DRAM, A: f32[6, K] @ DRAM, B: f32[K, 16] @ DRAM) {
          for i in par(6) {
            for jo in par(2) {
              for k in par(K) {
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
    fn test_failure_keeps_last_good_kernel() {
        let proc = parse_proc(MATMUL).unwrap();
        let schedule = Schedule::new().split("j", 8, ["jo", "ji"], true).par_to_seq("for q in _:_");
        let err = schedule.apply(&proc, &TemplateCatalog::new()).unwrap_err();
        assert_eq!(err.step_index, 1);
        assert_eq!(err.source.kind_name(), "NotFound");
        assert!(err.last_good.to_string().contains("for jo in par(2)"));
    }

    #[test]
    fn test_simplify_step_drops_dead_allocation_in_loop() {
        let proc = parse_proc(
            "proc f(x: f32[4] @ DRAM) {
              for i in seq(4) { t: f32 @ DRAM; t = x[i]; x[i] = 2.0; }
            }",
        )
        .unwrap();
        let outcome = Schedule::new().simplify().apply(&proc, &TemplateCatalog::new()).unwrap();
        assert!(validate(&outcome.scheduled, None).is_ok());
        assert_snapshot!(outcome.scheduled.to_string(), @r"
        proc f(x: f32[4] @ DRAM) {
          for i in seq(4) {
            x[i] = 2.0;
          }
        }
        ");
    }

    #[test]
    fn test_steps_serialize_with_op_tag() {
        let schedule = Schedule::new()
            .split("j", 8, ["jo", "ji"], true)
            .set_memory("C_reg", MemorySpace::Avx2)
            .simplify();
        let json = serde_json::to_string(&schedule).unwrap();
        assert_eq!(
            json,
            r#"[{"op":"split","loop":"j","factor":8,"outer":"jo","inner":"ji","perfect":true},{"op":"set_memory","buffer":"C_reg","space":"AVX2"},{"op":"simplify"}]"#
        );
        let back: Schedule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, schedule);
    }
}
