//! Scheduling primitives for loopcraft kernels.
//!
//! Every primitive takes a kernel by reference and returns a new kernel that
//! computes the same result, or a [`ScheduleError`] explaining why the
//! rewrite is not allowed. Outputs are re-validated before they are returned.

pub mod dependence;
pub mod error;
mod fission;
pub mod intrinsic;
mod lift_alloc;
mod loops;
mod memory;
mod rename;
mod reorder;
mod replace;
mod simplify;
mod split;
mod stage;
mod util;

pub use error::{ScheduleError, ScheduleResult};
pub use fission::fission_after;
pub use intrinsic::TemplateCatalog;
pub use lift_alloc::lift_alloc;
pub use loops::{par_to_seq, unroll};
pub use memory::{set_memory, unroll_buffer};
pub use rename::rename;
pub use reorder::reorder;
pub use replace::{replace, replace_all};
pub use simplify::simplify;
pub use split::split;
pub use stage::{bind_expr, stage_assn};
