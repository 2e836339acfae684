//! Loopcraft kernel IR.
//!
//! Kernels are small imperative procedures over multi-dimensional buffers:
//! nested `for` loops, guards, scalar assignments and reductions, local
//! allocations, and calls to hardware templates. This crate holds the data
//! model, the text format, well-formedness checks and the selector language
//! that scheduling primitives use to address code.

pub mod affine;
pub mod ast;
pub mod parser;
pub mod printer;
pub mod select;
pub mod validation;
pub mod walk;

pub use ast::{
    Assign, BinOp, Block, BufferDecl, Call, Expr, If, Loop, LoopMode, MemorySpace, Param, Proc,
    ScalarType, Stmt, StmtPath, Window, WindowDim,
};
pub use parser::{ParseError, parse_expr, parse_proc, parse_procs};
pub use select::{Cursor, ExprPath, SelectError, Selector};
pub use validation::{TemplateLookup, ValidationError, ValidationKind, validate};
pub use walk::WalkAction;
