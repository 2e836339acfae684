//! Reference interpreter for loopcraft kernels.
//!
//! Runs a kernel on concrete tensors so that a scheduled kernel can be
//! checked against the kernel it was derived from. Template calls execute
//! the template body on windows of the caller's buffers.

pub mod error;
pub mod machine;
pub mod tensor;

pub use error::{EvalError, EvalResult};
pub use machine::{Args, Interpreter};
pub use tensor::{Tensor, round_to};
