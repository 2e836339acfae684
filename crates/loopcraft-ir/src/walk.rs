//! Recursive statement traversal.
//!
//! # Example
//!
//! ```
//! use std::ops::ControlFlow;
//! use loopcraft_ir::parser::parse_proc;
//! use loopcraft_ir::walk::{WalkAction, walk_block};
//!
//! let proc = parse_proc("proc f(x: f32[4] @ DRAM) { for i in seq(4) { x[i] = 0.0; } }").unwrap();
//!
//! // Count loops, without looking inside them
//! let mut loops = 0;
//! let _ = walk_block::<()>(&proc.body, &mut |_, stmt| {
//!     if stmt.as_loop().is_some() {
//!         loops += 1;
//!         return ControlFlow::Continue(WalkAction::Skip);
//!     }
//!     ControlFlow::Continue(WalkAction::Advance)
//! });
//! assert_eq!(loops, 1);
//! ```

use std::ops::ControlFlow;

use crate::ast::{Block, Stmt, StmtPath};

/// Controls whether to descend into a statement's body during a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkAction {
    /// Continue walking and descend into the body.
    Advance,
    /// Skip the body of the current statement.
    Skip,
}

/// Walk every statement of `block` in pre-order.
///
/// Returns `ControlFlow::Break(b)` if the callback returns `Break(b)`.
pub fn walk_block<B>(
    block: &Block,
    f: &mut dyn FnMut(&StmtPath, &Stmt) -> ControlFlow<B, WalkAction>,
) -> ControlFlow<B, ()> {
    walk_block_at(block, &StmtPath(vec![]), f)
}

/// Like [`walk_block`], with paths prefixed by `prefix`.
pub fn walk_block_at<B>(
    block: &Block,
    prefix: &StmtPath,
    f: &mut dyn FnMut(&StmtPath, &Stmt) -> ControlFlow<B, WalkAction>,
) -> ControlFlow<B, ()> {
    for (i, stmt) in block.iter().enumerate() {
        let path = prefix.child(i);
        match f(&path, stmt) {
            ControlFlow::Break(b) => return ControlFlow::Break(b),
            ControlFlow::Continue(WalkAction::Skip) => continue,
            ControlFlow::Continue(WalkAction::Advance) => {}
        }
        if let Some(body) = stmt.body() {
            walk_block_at(body, &path, f)?;
        }
    }
    ControlFlow::Continue(())
}

/// Visit every statement of `block` in pre-order.
pub fn for_each_stmt(block: &Block, f: &mut dyn FnMut(&StmtPath, &Stmt)) {
    let _ = walk_block::<()>(block, &mut |path, stmt| {
        f(path, stmt);
        ControlFlow::Continue(WalkAction::Advance)
    });
}

/// Does any statement in `block` satisfy `pred`?
pub fn any_stmt(block: &Block, pred: &mut dyn FnMut(&Stmt) -> bool) -> bool {
    walk_block(block, &mut |_, stmt| {
        if pred(stmt) {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(WalkAction::Advance)
        }
    })
    .is_break()
}

/// Rebuild `block` bottom-up: bodies are rewritten first, then `f` maps each
/// statement to its replacement sequence.
pub fn rewrite_block(block: Block, f: &mut dyn FnMut(Stmt) -> Vec<Stmt>) -> Block {
    let mut out = Vec::with_capacity(block.stmts.len());
    for mut stmt in block.stmts {
        if let Some(body) = stmt.body_mut() {
            let inner = std::mem::take(body);
            *body = rewrite_block(inner, f);
        }
        out.extend(f(stmt));
    }
    Block::new(out)
}
