//! Shared helpers for building source graphs and checking lowered ones.

#![allow(dead_code)]

use cflow::config::LowerConfig;
use cflow::error::{Error, LowerError};
use cflow::interp::run_graph;
use cflow::ir::{Attr, DType, FunctionLibrary, Graph, NameGen, NodeBuilder, Shape, Tensor};
use cflow::lower_model;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Adds an explicitly named node and returns its outputs.
pub fn add(g: &mut Graph, b: NodeBuilder) -> Vec<String> {
    g.make_node(&mut NameGen::new(), b).expect("make_node")
}

/// Adds a named `Const` node and returns its output.
pub fn constant(g: &mut Graph, name: &str, value: Tensor) -> String {
    let dtype = value.dtype();
    let shape = value.shape();
    add(
        g,
        NodeBuilder::new("Const", Vec::<String>::new())
            .named(name)
            .attr("value", Attr::Tensor(value))
            .typed(dtype, Some(shape)),
    )
    .remove(0)
}

pub fn scalar() -> Option<Shape> {
    Some(Shape::scalar())
}

pub fn dims(d: &[i64]) -> Option<Shape> {
    Some(Shape::known(d))
}

/// Lowers with default settings at `opset`, panicking on failure.
pub fn lower_at(main: &mut Graph, library: &FunctionLibrary, opset: u32) -> FunctionLibrary {
    init_logging();
    lower_model(main, library, &LowerConfig::for_opset(opset)).expect("lower_model")
}

/// Lowers at `opset` and returns the error.
pub fn lower_err(main: &mut Graph, library: &FunctionLibrary, opset: u32) -> Error {
    init_logging();
    match lower_model(main, library, &LowerConfig::for_opset(opset)) {
        Ok(_) => panic!("lowering '{}' should have failed", main.name),
        Err(e) => e,
    }
}

/// The routine-level cause of a failed lowering.
pub fn cause(err: &Error) -> &LowerError {
    match err {
        Error::Lower { source, .. } => source,
        Error::Routine(source) => source,
        other => panic!("expected a lowering error, got {other}"),
    }
}

pub fn is_invariant(err: &Error) -> bool {
    matches!(cause(err), LowerError::InvariantViolation { .. })
}

pub fn is_unsupported(err: &Error) -> bool {
    matches!(cause(err), LowerError::UnsupportedConstruct { .. })
}

pub fn run(g: &Graph, feeds: &[(&str, Tensor)]) -> Vec<Tensor> {
    run_graph(g, feeds).expect("run_graph")
}

/// Number of nodes with `op` in `g` and every nested body.
pub fn count_op(g: &Graph, op: &str) -> usize {
    g.nodes()
        .iter()
        .map(|n| (n.op == op) as usize + n.bodies.values().map(|b| count_op(b, op)).sum::<usize>())
        .sum()
}

/// A function definition with formal parameters `params`.
pub fn function(name: &str, params: &[(&str, DType, Option<Shape>)]) -> Graph {
    let mut f = Graph::new(name);
    for (p, dtype, shape) in params {
        f.add_param(p, *dtype, shape.clone()).expect("add_param");
    }
    f
}
