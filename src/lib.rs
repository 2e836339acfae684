//! loopcraft: a scheduling engine for loop-nest kernels.
//!
//! A reference kernel is rewritten step by step into a tuned kernel that
//! computes the same result. The IR, the rewrite primitives, the template
//! catalogs and the reference interpreter live in the `loopcraft-*`
//! crates; this crate replays schedules on them and drives the CLI.

pub mod diagnostics;
pub mod kernel_file;
pub mod pipeline;
pub mod script;
pub mod verify;

pub use kernel_file::{KernelFile, KernelFileError};
pub use pipeline::{PipelineError, Schedule, ScheduleOutcome, Step, TraceEntry};
pub use script::{Script, parse_script};
pub use verify::{VerifyError, VerifyOptions, VerifyReport, verify};
