//! Differential checking of a scheduled kernel against its reference.
//!
//! Both kernels run on the same random inputs. Every buffer parameter is
//! compared afterwards, since any of them may have been written.

use std::collections::BTreeMap;

use derive_more::{Display, Error};
use loopcraft_eval::{Args, EvalError, Interpreter};
use loopcraft_ir::{BufferDecl, Param, Proc, ScalarType, TemplateLookup};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Inputs for one differential run.
#[derive(Clone, Debug, Default)]
pub struct VerifyOptions {
    pub sizes: BTreeMap<String, i64>,
    pub seed: u64,
    /// Largest tolerated elementwise difference.
    pub tolerance: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BufferDiff {
    pub buffer: String,
    pub max_abs_diff: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VerifyReport {
    pub buffers: Vec<BufferDiff>,
    pub tolerance: f64,
}

impl VerifyReport {
    pub fn max_abs_diff(&self) -> f64 {
        self.buffers.iter().map(|b| b.max_abs_diff).fold(0.0, f64::max)
    }

    pub fn passed(&self) -> bool {
        self.buffers.iter().all(|b| b.max_abs_diff <= self.tolerance)
    }
}

#[derive(Clone, Debug, Display, Error)]
pub enum VerifyError {
    #[display("kernels have different signatures: {reason}")]
    SignatureMismatch {
        #[error(not(source))]
        reason: String,
    },

    #[display("running `{kernel}` failed: {source}")]
    Eval {
        #[error(not(source))]
        kernel: String,
        source: EvalError,
    },
}

/// Compare `scheduled` against `reference` on seeded random inputs.
pub fn verify(
    reference: &Proc,
    scheduled: &Proc,
    templates: &dyn TemplateLookup,
    options: &VerifyOptions,
) -> Result<VerifyReport, VerifyError> {
    check_signatures(reference, scheduled)?;

    let mut rng = StdRng::seed_from_u64(options.seed);
    let inputs = Args::for_proc(reference, &options.sizes, |decl, _| random_value(&mut rng, decl))
        .map_err(|source| VerifyError::Eval {
            kernel: reference.name.clone(),
            source,
        })?;

    let interpreter = Interpreter::with_templates(templates);
    let run = |proc: &Proc| {
        let mut args = inputs.clone();
        interpreter
            .run(proc, &mut args)
            .map(|()| args)
            .map_err(|source| VerifyError::Eval {
                kernel: proc.name.clone(),
                source,
            })
    };
    let expected = run(reference)?;
    let actual = run(scheduled)?;

    let mut buffers = Vec::new();
    for (name, want) in &expected.buffers {
        let diff = actual
            .buffers
            .get(name)
            .and_then(|got| want.max_abs_diff(got))
            .unwrap_or(f64::INFINITY);
        tracing::debug!(buffer = %name, max_abs_diff = diff, "compared buffer");
        buffers.push(BufferDiff {
            buffer: name.clone(),
            max_abs_diff: diff,
        });
    }
    Ok(VerifyReport {
        buffers,
        tolerance: options.tolerance,
    })
}

fn random_value(rng: &mut StdRng, decl: &BufferDecl) -> f64 {
    match decl.ty {
        ScalarType::F32 | ScalarType::F64 => rng.gen_range(-1.0..1.0),
        ScalarType::I32 | ScalarType::I8 => rng.gen_range(-8i32..8) as f64,
    }
}

fn check_signatures(reference: &Proc, scheduled: &Proc) -> Result<(), VerifyError> {
    let describe = |p: &Param| match p {
        Param::Size(name) => format!("{name}: size"),
        Param::Buffer(decl) => format!("{}: {:?}{:?} @ {}", decl.name, decl.ty, decl.shape, decl.mem),
    };
    let want: Vec<String> = reference.params.iter().map(describe).collect();
    let got: Vec<String> = scheduled.params.iter().map(describe).collect();
    if want != got {
        return Err(VerifyError::SignatureMismatch {
            reason: format!("expected ({}), found ({})", want.join(", "), got.join(", ")),
        });
    }
    Ok(())
}
