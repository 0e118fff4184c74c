//! cflow: control-flow lowering for computation graphs.
//!
//! Rewrites a source graph that uses rich control flow (dataflow `Switch` /
//! `Merge`, function-valued `If` and `While`, tensor arrays, `Select`,
//! `Range`) into a target form that only has `If` with two nested branches
//! and `Loop` with a single nested body.
//!
//! Pipeline:
//!
//! ```text
//! (Graph, FunctionLibrary) → lower library (callees first)
//!   → sweep main graph (handler per op, chosen by opset)
//!   → topological sort → ValidateTargetPass → lowered Graph
//! ```
//!
//! Lowering routines (in `lower`):
//! 1. `inline`      — parameter binding and subgraph inlining
//! 2. `cond`        — `Switch`, `Merge`, scalar select
//! 3. `select`      — elementwise `Select` (blend, nested loops, `Where`)
//! 4. `if_wiring`   — structured `If`
//! 5. `while_loop`  — `While` to `Loop`, tensor-array classification
//! 6. `tensor_list` — tensor-array reads and pass-throughs
//! 7. `range`       — `Range` materialization
//!
//! `interp` is a reference evaluator used to fold constants and to check
//! lowered graphs end to end.

pub mod codegen;
pub mod config;
pub mod error;
pub mod interp;
pub mod ir;
pub mod lower;
pub mod pass;

pub use config::LowerConfig;
pub use error::Error;
pub use lower::lower_model;

use crate::ir::{FunctionLibrary, Graph};

/// Lowers `main` in place and returns the text dump of the result.
pub fn lower_to_text(main: &mut Graph, library: &FunctionLibrary, config: &LowerConfig) -> Result<String, Error> {
    lower_model(main, library, config)?;
    Ok(codegen::emit_graph_text(main)?)
}
