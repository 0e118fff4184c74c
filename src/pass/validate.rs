//! Target-form validation.
//!
//! Checks that a lowered graph only uses what the target understands:
//!
//! 1. No source-only op remains (dataflow conditionals, `While`, tensor
//!    arrays, `Select`, `Range` below version 11, and single-input `Where`).
//! 2. Every node input resolves to a value produced in the graph or in an
//!    enclosing scope, and no reader is left on the poison sentinel.
//! 3. Every `If` has both branches, with one output per node output.
//! 4. Every `Loop` has a body whose inputs are `(iter, cond, carried...)`
//!    and whose outputs are `(cond, carried..., scans...)`.

use std::collections::HashSet;

use crate::error::PassError;
use crate::ir::graph::{Graph, Node, ELSE_BRANCH, LOOP_BODY, POISON, THEN_BRANCH};
use crate::pass::GraphPass;

/// Ops that exist only in source graphs.
const SOURCE_ONLY: &[&str] = &[
    "Switch",
    "Merge",
    "While",
    "StatelessWhile",
    "StatelessIf",
    "Select",
    "SelectV2",
    "TensorListGetItem",
    "TensorListSetItem",
    "TensorListReserve",
    "TensorListResize",
    "TensorListLength",
    "TensorListFromTensor",
    "TensorListStack",
];

/// Version at which `Range` became a target op.
const RANGE_SINCE: u32 = 11;

/// Validates a lowered graph for target version `opset`.
pub struct ValidateTargetPass {
    pub opset: u32,
}

impl GraphPass for ValidateTargetPass {
    fn name(&self) -> &'static str {
        "validate-target"
    }

    fn run(&mut self, graph: &mut Graph) -> Result<(), PassError> {
        validate_target(graph, self.opset)
    }
}

/// Checks that `graph` is in target form for version `opset`.
pub fn validate_target(graph: &Graph, opset: u32) -> Result<(), PassError> {
    let mut scope: Vec<HashSet<String>> = Vec::new();
    check_graph(graph, opset, &mut scope)
}

fn invalid(graph: &Graph, detail: String) -> PassError {
    PassError::Invalid { graph: graph.name.clone(), detail }
}

fn check_graph(graph: &Graph, opset: u32, scope: &mut Vec<HashSet<String>>) -> Result<(), PassError> {
    let defined: HashSet<String> = graph.nodes().iter().flat_map(|n| n.outputs.iter().cloned()).collect();
    scope.push(defined);
    let result = check_nodes(graph, opset, scope);
    scope.pop();
    result
}

fn check_nodes(graph: &Graph, opset: u32, scope: &mut Vec<HashSet<String>>) -> Result<(), PassError> {
    for node in graph.nodes() {
        if SOURCE_ONLY.contains(&node.op.as_str()) || (node.op == "Range" && opset < RANGE_SINCE) {
            return Err(invalid(graph, format!("'{}' is a source-only {} node", node.name, node.op)));
        }
        if node.op == "Where" && node.inputs.len() != 3 {
            return Err(invalid(
                graph,
                format!("Where '{}' takes {} inputs; the target form takes 3", node.name, node.inputs.len()),
            ));
        }
        for input in node.inputs.iter().filter(|i| !i.is_empty()) {
            if input == POISON {
                return Err(invalid(graph, format!("'{}' reads a deleted value", node.name)));
            }
            if !scope.iter().any(|s| s.contains(input)) {
                return Err(invalid(graph, format!("'{}' reads '{}', which nothing produces", node.name, input)));
            }
        }
        match node.op.as_str() {
            "If" => check_if(graph, node)?,
            "Loop" => check_loop(graph, node)?,
            _ => {}
        }
        for body in node.bodies.values() {
            check_graph(body, opset, scope)?;
        }
    }
    for out in graph.outputs() {
        if !scope.iter().any(|s| s.contains(out)) {
            return Err(invalid(graph, format!("output '{}' is not produced", out)));
        }
    }
    Ok(())
}

fn check_if(graph: &Graph, node: &Node) -> Result<(), PassError> {
    if node.inputs.len() != 1 {
        return Err(invalid(graph, format!("If '{}' takes {} inputs, expected 1", node.name, node.inputs.len())));
    }
    for slot in [THEN_BRANCH, ELSE_BRANCH] {
        let branch = node
            .body(slot)
            .ok_or_else(|| invalid(graph, format!("If '{}' has no {}", node.name, slot)))?;
        if branch.outputs().len() != node.outputs.len() {
            return Err(invalid(
                graph,
                format!(
                    "{} of If '{}' returns {} values for {} outputs",
                    slot,
                    node.name,
                    branch.outputs().len(),
                    node.outputs.len()
                ),
            ));
        }
        if !branch.inputs().is_empty() {
            return Err(invalid(graph, format!("{} of If '{}' declares inputs", slot, node.name)));
        }
    }
    Ok(())
}

fn check_loop(graph: &Graph, node: &Node) -> Result<(), PassError> {
    let body = node
        .body(LOOP_BODY)
        .ok_or_else(|| invalid(graph, format!("Loop '{}' has no body", node.name)))?;
    if node.inputs.len() < 2 {
        return Err(invalid(graph, format!("Loop '{}' needs (M, cond) inputs", node.name)));
    }
    let carried = node.inputs.len() - 2;
    if body.inputs().len() != carried + 2 {
        return Err(invalid(
            graph,
            format!("body of Loop '{}' takes {} inputs, expected {}", node.name, body.inputs().len(), carried + 2),
        ));
    }
    if body.outputs().len() < carried + 1 || body.outputs().len() - 1 != node.outputs.len() {
        return Err(invalid(
            graph,
            format!(
                "body of Loop '{}' returns {} values for {} carried and {} outputs",
                node.name,
                body.outputs().len(),
                carried,
                node.outputs.len()
            ),
        ));
    }
    Ok(())
}
