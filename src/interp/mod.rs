//! Reference evaluator for graphs.
//!
//! Executes a `Graph` node by node in dependency order with dense `Tensor`
//! values. Nested bodies run in a fresh frame stacked on their owner's, so a
//! body can read any value of an enclosing graph. `If` and `Loop` follow the
//! target's semantics; a `Loop` stacks each scan output along a new leading
//! axis.
//!
//! The evaluator exists to check lowerings end to end and to fold constant
//! subgraphs (`fold_value`).

mod kernels;

use std::collections::{BTreeSet, HashMap};

use log::trace;

use crate::error::InterpError;
use crate::ir::graph::{Graph, Node, ELSE_BRANCH, LOOP_BODY, THEN_BRANCH};
use crate::ir::tensor::{Tensor, TensorData};
use crate::ir::types::DType;

pub use kernels::{broadcast_dims, cast};

/// Runs `graph` with `feeds` bound to its inputs and returns its outputs.
pub fn run_graph(graph: &Graph, feeds: &[(&str, Tensor)]) -> Result<Vec<Tensor>, InterpError> {
    let bound = feeds.iter().map(|(name, t)| ((*name).to_owned(), t.clone())).collect();
    Interpreter::new().exec_graph(graph, bound)
}

/// Evaluates `value` if it depends on constants only.
///
/// Fails with `UnboundValue` when the value (transitively) reads a graph
/// input or anything produced outside `graph`.
pub fn fold_value(graph: &Graph, value: &str) -> Result<Tensor, InterpError> {
    let mut cone: BTreeSet<String> = BTreeSet::new();
    let mut stack = vec![value.to_owned()];
    while let Some(v) = stack.pop() {
        let node = graph
            .producer(&v)
            .filter(|n| !n.is_graph_input())
            .ok_or_else(|| InterpError::UnboundValue { name: v.clone() })?;
        if cone.insert(node.name.clone()) {
            stack.extend(node.inputs.iter().filter(|i| !i.is_empty()).cloned());
            for body in node.bodies.values() {
                stack.extend(body.free_values());
            }
        }
    }

    let mut interp = Interpreter::new();
    interp.frames.push(Frame { values: HashMap::new() });
    for idx in graph.topo_order()? {
        let node = &graph.nodes()[idx];
        if cone.contains(&node.name) {
            interp.exec_node(node)?;
        }
    }
    interp.lookup(value)
}

// ---------------------------------------------------------------------------
// Interpreter state
// ---------------------------------------------------------------------------

/// Hard cap on loop iterations per `Loop` execution.
const MAX_ITERATIONS: i64 = 10_000_000;

struct Frame {
    values: HashMap<String, Tensor>,
}

struct Interpreter {
    frames: Vec<Frame>,
}

impl Interpreter {
    fn new() -> Self {
        Self { frames: Vec::new() }
    }

    fn exec_graph(&mut self, graph: &Graph, bound: Vec<(String, Tensor)>) -> Result<Vec<Tensor>, InterpError> {
        self.frames.push(Frame { values: bound.into_iter().collect() });
        let result = self.exec_frame(graph);
        self.frames.pop();
        result
    }

    fn exec_frame(&mut self, graph: &Graph) -> Result<Vec<Tensor>, InterpError> {
        for idx in graph.topo_order()? {
            self.exec_node(&graph.nodes()[idx])?;
        }
        graph.outputs().iter().map(|o| self.lookup(o)).collect()
    }

    /// Innermost binding of `name`.
    fn lookup(&self, name: &str) -> Result<Tensor, InterpError> {
        self.frames
            .iter()
            .rev()
            .find_map(|f| f.values.get(name))
            .cloned()
            .ok_or_else(|| InterpError::UnboundValue { name: name.to_owned() })
    }

    fn bind(&mut self, name: &str, value: Tensor) {
        if let Some(frame) = self.frames.last_mut() {
            frame.values.insert(name.to_owned(), value);
        }
    }

    fn bind_all(&mut self, node: &Node, values: Vec<Tensor>) -> Result<(), InterpError> {
        if values.len() != node.outputs.len() {
            return Err(InterpError::ShapeError {
                op: node.op.clone(),
                detail: format!("produced {} values for {} outputs", values.len(), node.outputs.len()),
            });
        }
        for (out, v) in node.outputs.iter().zip(values) {
            self.bind(out, v);
        }
        Ok(())
    }

    fn exec_node(&mut self, node: &Node) -> Result<(), InterpError> {
        trace!("exec {} '{}'", node.op, node.name);
        match node.op.as_str() {
            "Placeholder" => {
                let bound = self.frames.last().map_or(false, |f| node.outputs.iter().all(|o| f.values.contains_key(o)));
                if !bound {
                    return Err(InterpError::UnboundValue { name: node.outputs.join(", ") });
                }
                Ok(())
            }
            "Const" => {
                let value = node
                    .attr_tensor("value")
                    .cloned()
                    .ok_or_else(|| InterpError::TypeError { op: "Const".into(), detail: "missing 'value'".into() })?;
                self.bind_all(node, vec![value])
            }
            "If" => self.exec_if(node),
            "Loop" => self.exec_loop(node),
            _ => {
                let inputs = node.inputs.iter().map(|i| self.lookup(i)).collect::<Result<Vec<_>, _>>()?;
                let outputs = kernels::eval(node, &inputs)?;
                self.bind_all(node, outputs)
            }
        }
    }

    fn exec_if(&mut self, node: &Node) -> Result<(), InterpError> {
        let cond = node
            .inputs
            .first()
            .ok_or_else(|| InterpError::TypeError { op: "If".into(), detail: "missing condition".into() })?;
        let taken = single_bool(&self.lookup(cond)?, "If")?;
        let slot = if taken { THEN_BRANCH } else { ELSE_BRANCH };
        let branch = body_of(node, slot)?;
        let outputs = self.exec_graph(branch, Vec::new())?;
        self.bind_all(node, outputs)
    }

    fn exec_loop(&mut self, node: &Node) -> Result<(), InterpError> {
        let body = body_of(node, LOOP_BODY)?;
        let optional = |i: usize| node.inputs.get(i).filter(|v| !v.is_empty());
        let trip = match optional(0) {
            Some(m) => single_i64(&self.lookup(m)?, "Loop")?,
            None => i64::MAX,
        };
        let mut cond = match optional(1) {
            Some(c) => single_bool(&self.lookup(c)?, "Loop")?,
            None => true,
        };
        let mut carried = node.inputs[2.min(node.inputs.len())..]
            .iter()
            .map(|v| self.lookup(v))
            .collect::<Result<Vec<_>, _>>()?;
        let n_carried = carried.len();
        if body.inputs().len() != n_carried + 2 || body.outputs().len() < n_carried + 1 {
            return Err(InterpError::ShapeError {
                op: "Loop".into(),
                detail: format!(
                    "body takes {} inputs and returns {} values for {} carried values",
                    body.inputs().len(),
                    body.outputs().len(),
                    n_carried
                ),
            });
        }
        let n_scan = body.outputs().len() - 1 - n_carried;
        let mut scans: Vec<Vec<Tensor>> = vec![Vec::new(); n_scan];

        let mut i = 0i64;
        while i < trip && cond {
            if i >= MAX_ITERATIONS {
                return Err(InterpError::Unsupported { op: format!("Loop with more than {} iterations", MAX_ITERATIONS) });
            }
            let mut bound = vec![
                (body.inputs()[0].clone(), Tensor::scalar_i64(i)),
                (body.inputs()[1].clone(), Tensor::scalar_bool(cond)),
            ];
            bound.extend(body.inputs()[2..].iter().cloned().zip(carried.iter().cloned()));
            let mut outs = self.exec_graph(body, bound)?;
            let scanned = outs.split_off(1 + n_carried);
            cond = single_bool(&outs[0], "Loop")?;
            carried = outs.split_off(1);
            for (acc, v) in scans.iter_mut().zip(scanned) {
                acc.push(v);
            }
            i += 1;
        }
        trace!("Loop '{}' ran {} iterations", node.name, i);

        let mut results = carried;
        for (k, items) in scans.into_iter().enumerate() {
            let out = &body.outputs()[1 + n_carried + k];
            results.push(stack(&items, body.dtype(out))?);
        }
        self.bind_all(node, results)
    }
}

fn body_of<'n>(node: &'n Node, slot: &str) -> Result<&'n Graph, InterpError> {
    node.body(slot).ok_or_else(|| InterpError::TypeError {
        op: node.op.clone(),
        detail: format!("missing '{}' body", slot),
    })
}

fn single_bool(t: &Tensor, op: &str) -> Result<bool, InterpError> {
    t.single_bool().ok_or_else(|| InterpError::TypeError {
        op: op.to_owned(),
        detail: format!("expected a single boolean, got {}", t),
    })
}

fn single_i64(t: &Tensor, op: &str) -> Result<i64, InterpError> {
    t.single_i64().ok_or_else(|| InterpError::TypeError {
        op: op.to_owned(),
        detail: format!("expected a single integer, got {}", t),
    })
}

/// Stacks equally shaped tensors along a new leading axis. An empty list
/// yields a `[0]` tensor of `dtype`.
pub fn stack(items: &[Tensor], dtype: DType) -> Result<Tensor, InterpError> {
    let Some(first) = items.first() else {
        let data = TensorData::empty(dtype).ok_or_else(|| InterpError::TypeError {
            op: "Loop".into(),
            detail: "scan output of unknown element type produced no rows".into(),
        })?;
        return Ok(Tensor { dims: vec![0], data });
    };
    let mut data = first.data.clone();
    for item in &items[1..] {
        if item.dims != first.dims {
            return Err(InterpError::ShapeError {
                op: "Loop".into(),
                detail: format!("scan rows of shape {:?} and {:?}", first.dims, item.dims),
            });
        }
        if !data.extend_from(&item.data) {
            return Err(InterpError::TypeError { op: "Loop".into(), detail: "scan rows of different types".into() });
        }
    }
    let mut dims = vec![items.len()];
    dims.extend(first.dims.iter().copied());
    Ok(Tensor { dims, data })
}
