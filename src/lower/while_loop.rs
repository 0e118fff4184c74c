//! Generalized `While` lowering.
//!
//! A source `While(counter, max, v...)` names its `cond` and `body` as
//! function definitions that both take every loop variable positionally.
//! The target `Loop(M, cond, carried...)` instead receives an explicit trip
//! count, an initial condition, and only the values the body really carries:
//!
//! ```text
//! slot 0      iteration counter  ─▶ the Loop's own iteration input
//! slot 1      max iterations     ─▶ trip count M, plus a loop-invariant state
//! slot >= 2   Carried            ─▶ Loop carried dependency
//!             State              ─▶ read-only tensor array, captured from outside
//!             Eliminated         ─▶ tensor array being filled, becomes a scan output
//! ```
//!
//! The condition function is evaluated twice: once at the call site for the
//! first iteration, and once at the end of every body iteration on the
//! updated values.

use std::collections::HashSet;

use log::{debug, trace};

use crate::error::{make_sure, LowerError};
use crate::interp::fold_value;
use crate::ir::graph::{Attr, Graph, NodeBuilder, LOOP_BODY, POISON};
use crate::ir::tensor::Tensor;
use crate::ir::types::{DType, Shape};
use crate::lower::inline::{bind_parameters, copy_and_inline, prefix_graph, separate_locals, Actual};
use crate::lower::{source_node, LowerCtx};

/// Role of one loop variable at slot 2 or above.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// Ordinary value threaded through the loop.
    Carried,
    /// Tensor array that the body only reads.
    State,
    /// Tensor array reserved outside the loop and written by the body.
    Eliminated,
}

/// Ops that allocate the tensor array fed into an eliminated slot.
const RESERVE_OPS: [&str; 2] = ["TensorListReserve", "TensorListResize"];

fn is_element_read(op: &str) -> bool {
    op == "TensorListGetItem" || op == "Gather"
}

/// Classifies the loop variables `slots` (body-side values for slots 2..)
/// of `body`. `reserved[i]` says whether the call-site value of `slots[i]`
/// comes from a reserve op.
///
/// Classification only looks at how the body uses each value, so running it
/// on an already-lowered body reports every remaining slot as `Carried`.
pub fn classify_loop_slots(body: &Graph, slots: &[String], reserved: &[bool]) -> Result<Vec<SlotKind>, LowerError> {
    make_sure(slots.len() == reserved.len(), || {
        format!("{} loop slots but {} reservation flags", slots.len(), reserved.len())
    })?;
    slots.iter().zip(reserved).map(|(slot, &r)| classify_slot(body, slot, r)).collect()
}

fn classify_slot(body: &Graph, value: &str, reserved: bool) -> Result<SlotKind, LowerError> {
    if reserved {
        return Ok(SlotKind::Eliminated);
    }
    let written = body
        .nodes()
        .iter()
        .any(|n| n.op == "TensorListSetItem" && n.inputs.first().map(String::as_str) == Some(value));
    if body.tensor_array_reads().contains(value) {
        let only_reads = body
            .consumers(value)
            .iter()
            .filter_map(|c| body.node(c))
            .all(|n| is_element_read(&n.op));
        let captured = body.nodes().iter().any(|n| n.bodies.values().any(|b| !b.defines(value) && b.has_consumers(value)));
        make_sure(!written && only_reads && !captured, || {
            format!("loop variable '{}' is used both as a read-only tensor array and otherwise", value)
        })?;
        return Ok(SlotKind::State);
    }
    make_sure(!written, || {
        format!("loop variable '{}' is written as a tensor array but was not reserved outside the loop", value)
    })?;
    Ok(SlotKind::Carried)
}

/// Full classification of every slot of one call.
struct SlotPlan {
    kinds: Vec<SlotKind>,
}

impl SlotPlan {
    /// Slot 1 is always loop-invariant state.
    fn kind(&self, slot: usize) -> Option<SlotKind> {
        match slot {
            0 => None,
            1 => Some(SlotKind::State),
            _ => self.kinds.get(slot - 2).copied(),
        }
    }

    fn slots_of(&self, kind: SlotKind, n: usize) -> Vec<usize> {
        (1..n).filter(|&i| self.kind(i) == Some(kind)).collect()
    }
}

pub fn lower_while(ctx: &mut LowerCtx<'_>, g: &mut Graph, name: &str) -> Result<(), LowerError> {
    let node = source_node(g, name)?;
    let n = node.inputs.len();
    make_sure(n >= 2, || format!("While '{}' needs a counter and a maximum, got {} inputs", name, n))?;
    make_sure(node.outputs.len() == n, || {
        format!("While '{}' has {} inputs but {} outputs", name, n, node.outputs.len())
    })?;
    let cond_name = node
        .attr_func("cond")
        .ok_or_else(|| LowerError::invariant(format!("While '{}' has no 'cond' function", name)))?;
    let body_name = node
        .attr_func("body")
        .ok_or_else(|| LowerError::invariant(format!("While '{}' has no 'body' function", name)))?;
    let cond_def = ctx.library.lookup(cond_name)?;
    let body_def = ctx.library.lookup(body_name)?;
    make_sure(body_def.params().len() == n, || {
        format!("body '{}' takes {} parameters, While '{}' passes {}", body_name, body_def.params().len(), name, n)
    })?;
    make_sure(cond_def.params().len() == n, || {
        format!("cond '{}' takes {} parameters, While '{}' passes {}", cond_name, cond_def.params().len(), name, n)
    })?;
    make_sure(body_def.outputs().len() == n, || {
        format!("body '{}' returns {} values, expected {}", body_name, body_def.outputs().len(), n)
    })?;

    // -- Trip count ---------------------------------------------------------
    let max_actual = node.inputs[1].clone();
    let max_value = fold_value(g, &max_actual)
        .ok()
        .and_then(|t| t.single_i64())
        .ok_or_else(|| {
            LowerError::invariant(format!("maximum iterations '{}' of While '{}' is not a constant", max_actual, name))
        })?;
    let trip = if max_value < 0 { ctx.config.unbounded_trip_count } else { max_value };
    let trip_const = g.make_const(ctx.names, "max_trip_count", Tensor::scalar_i64(trip))?;

    // -- Classification -----------------------------------------------------
    let reserved: Vec<bool> = node.inputs[2..]
        .iter()
        .map(|v| g.producer(v).map_or(false, |p| RESERVE_OPS.contains(&p.op.as_str())))
        .collect();
    let plan = SlotPlan { kinds: classify_loop_slots(body_def, &body_def.params()[2..], &reserved)? };
    let carried = plan.slots_of(SlotKind::Carried, n);
    let states = plan.slots_of(SlotKind::State, n);
    let eliminated = plan.slots_of(SlotKind::Eliminated, n);
    debug!(
        "While '{}': trip {}, carried {:?}, state {:?}, eliminated {:?}",
        name, trip, carried, states, eliminated
    );

    // -- Body ---------------------------------------------------------------
    let mut body = body_def.clone();
    let captured: Vec<&str> = states.iter().map(|&i| node.inputs[i].as_str()).collect();
    separate_locals(&mut body, &captured);
    let params = body.params().to_vec();
    let body_outputs = body.outputs().to_vec();

    // Read-only state is captured from the enclosing scope.
    for &i in &states {
        rewire_placeholder(&mut body, &params[i], "Identity", &node.inputs[i], None)?;
    }

    let iter = ctx.names.make("iter");
    body.add_input(&iter, DType::I64, Some(Shape::scalar()))?;
    let counter_dtype = body.dtype(&params[0]);
    if counter_dtype == DType::I64 || counter_dtype == DType::Undefined {
        rewire_placeholder(&mut body, &params[0], "Identity", &iter, None)?;
    } else {
        rewire_placeholder(&mut body, &params[0], "Cast", &iter, Some(counter_dtype))?;
    }
    let cond_in = ctx.names.make("cond");
    body.add_input(&cond_in, DType::Bool, Some(Shape::scalar()))?;

    // Element writes become the value written; the array handle chain dies.
    let mut frontier: Vec<String> = Vec::new();
    let mut written_values: HashSet<String> = HashSet::new();
    for set_item in body.node_names() {
        let Some(setter) = body.node_mut(&set_item) else { continue };
        if setter.op != "TensorListSetItem" {
            continue;
        }
        make_sure(setter.inputs.len() >= 3 && setter.outputs.len() == 1, || {
            format!("TensorListSetItem '{}' needs (handle, index, item) and one output", set_item)
        })?;
        frontier.push(setter.inputs[0].clone());
        let item = setter.inputs[2].clone();
        setter.op = "Identity".to_owned();
        setter.inputs = vec![item.clone()];
        let out = setter.outputs[0].clone();
        if let Some(info) = body.info(&item).cloned() {
            body.set_info(&out, info);
        }
        written_values.insert(out);
    }
    for &i in &eliminated {
        frontier.push(params[i].clone());
    }

    let scans: Vec<usize> = eliminated.iter().copied().filter(|&i| written_values.contains(&body_outputs[i])).collect();
    let mut loop_outputs: Vec<String> = carried.iter().map(|&i| body_outputs[i].clone()).collect();
    loop_outputs.extend(scans.iter().map(|&i| body_outputs[i].clone()));
    body.set_outputs(loop_outputs.clone());

    // Everything the inlined condition will read survives pruning.
    let mut keep: HashSet<String> = carried.iter().map(|&i| params[i].clone()).collect();
    keep.extend(states.iter().map(|&i| params[i].clone()));
    keep.insert(body_outputs[0].clone());
    keep.insert(iter.clone());
    keep.insert(cond_in.clone());
    prune_dead_producers(&mut body, frontier, &keep)?;

    // Condition on the updated values, evaluated at the end of each iteration.
    let cond_binding: Vec<Actual> = (0..n)
        .map(|i| match plan.kind(i) {
            None => Actual::from(&body_outputs[0]),
            Some(SlotKind::State) => Actual::from(&params[i]),
            Some(SlotKind::Carried) => Actual::from(&body_outputs[i]),
            Some(SlotKind::Eliminated) => Actual::Unbound,
        })
        .collect();
    let cond_scope = ctx.names.make(cond_name);
    let cond_outs = copy_and_inline(&mut body, cond_def, &cond_scope, &bind_parameters(cond_def, &cond_binding)?)?;
    make_sure(!cond_outs.is_empty(), || format!("cond '{}' returns nothing", cond_name))?;
    body.set_dtype(&cond_outs[0], DType::Bool);

    let mut outputs = vec![cond_outs[0].clone()];
    outputs.extend(loop_outputs);
    body.set_outputs(outputs);
    let mut inputs = vec![iter.clone(), cond_in.clone()];
    inputs.extend(carried.iter().map(|&i| params[i].clone()));
    body.set_inputs(inputs.clone());
    body.set_params(Vec::new());

    // -- Call site ----------------------------------------------------------
    let init_binding: Vec<Actual> = (0..n)
        .map(|i| match plan.kind(i) {
            Some(SlotKind::Eliminated) => Actual::Unbound,
            _ => Actual::from(&node.inputs[i]),
        })
        .collect();
    let init_scope = ctx.names.make(cond_name);
    let init_outs = copy_and_inline(g, cond_def, &init_scope, &bind_parameters(cond_def, &init_binding)?)?;
    make_sure(!init_outs.is_empty(), || format!("cond '{}' returns nothing", cond_name))?;
    let init_cond = init_outs[0].clone();

    let mut loop_inputs = vec![trip_const, init_cond];
    loop_inputs.extend(carried.iter().map(|&i| node.inputs[i].clone()));

    // Body metadata: inputs from the loop inputs, identities from their source.
    for (k, input) in inputs.iter().enumerate().skip(2) {
        if body.dtype(input) == DType::Undefined {
            body.set_dtype(input, g.dtype(&loop_inputs[k]));
        }
        body.set_shape(input, g.shape(&loop_inputs[k]).cloned());
    }
    inherit_identity_dtypes(&mut body);

    let out_base = ctx.names.make(name);
    let mut new_outputs = Vec::with_capacity(carried.len() + scans.len());
    let mut dtypes = Vec::new();
    let mut shapes = Vec::new();
    for &i in &carried {
        new_outputs.push(format!("{}:{}", out_base, new_outputs.len()));
        let dtype = match g.dtype(&node.outputs[i]) {
            DType::Undefined => body.dtype(&body_outputs[i]),
            d => d,
        };
        dtypes.push(dtype);
        shapes.push(g.shape(&node.outputs[i]).cloned());
    }
    for &i in &scans {
        new_outputs.push(format!("{}:{}", out_base, new_outputs.len()));
        dtypes.push(body.dtype(&body_outputs[i]));
        shapes.push(body.shape(&body_outputs[i]).map(Shape::stacked));
    }

    let body_scope = ctx.names.make(body_name);
    prefix_graph(&mut body, &body_scope);
    body.name = body_scope;

    g.remove_node(name);
    for &i in &eliminated {
        let handle = &node.inputs[i];
        if let Some(reserve) = g.producer(handle).map(|p| p.name.clone()) {
            trace!("While '{}': drop tensor array '{}'", name, reserve);
            g.remove_node(&reserve);
        }
        g.replace_all_inputs(handle, POISON);
    }
    g.make_node(
        ctx.names,
        NodeBuilder::new("Loop", loop_inputs)
            .named(name)
            .outputs(new_outputs.clone())
            .dtypes(dtypes)
            .shapes(shapes),
    )?;
    g.set_body(name, LOOP_BODY, body)?;

    // -- Redirect readers of the old outputs --------------------------------
    for (i, old) in node.outputs.iter().enumerate() {
        let target = match plan.kind(i) {
            None => {
                if g.has_consumers(old) {
                    return Err(LowerError::unsupported(format!(
                        "iteration counter '{}' of While '{}' is read after the loop",
                        old, name
                    )));
                }
                continue;
            }
            Some(SlotKind::State) => node.inputs[i].clone(),
            Some(SlotKind::Carried) => {
                let k = carried.iter().position(|&c| c == i).unwrap_or_default();
                new_outputs[k].clone()
            }
            Some(SlotKind::Eliminated) => match scans.iter().position(|&s| s == i) {
                Some(k) => new_outputs[carried.len() + k].clone(),
                None => POISON.to_owned(),
            },
        };
        trace!("While '{}': {} -> {}", name, old, target);
        g.replace_all_inputs(old, &target);
    }
    debug!("While '{}' -> Loop ({} carried, {} scanned)", name, carried.len(), scans.len());
    Ok(())
}

/// Turns placeholder `value` into `op(source)`, dropping it from the input
/// contract. A `Cast` target type goes in `to`.
fn rewire_placeholder(
    body: &mut Graph,
    value: &str,
    op: &str,
    source: &str,
    to: Option<DType>,
) -> Result<(), LowerError> {
    let node = body
        .node_mut(value)
        .filter(|n| n.is_graph_input())
        .ok_or_else(|| LowerError::invariant(format!("'{}' is not a placeholder", value)))?;
    node.op = op.to_owned();
    node.inputs = vec![source.to_owned()];
    if let Some(dtype) = to {
        node.attrs.insert("to".to_owned(), Attr::DType(dtype));
    }
    let remaining: Vec<String> = body.inputs().iter().filter(|i| *i != value).cloned().collect();
    body.set_inputs(remaining);
    Ok(())
}

/// Deletes producers of `frontier` values, transitively, once none of their
/// outputs is read anymore. Values in `keep` are never deleted. Deleting a
/// placeholder that is still read is an error.
fn prune_dead_producers(body: &mut Graph, mut frontier: Vec<String>, keep: &HashSet<String>) -> Result<(), LowerError> {
    while let Some(value) = frontier.pop() {
        if keep.contains(&value) {
            continue;
        }
        let Some(producer) = body.producer(&value) else { continue };
        let (pname, inputs, outputs, placeholder) =
            (producer.name.clone(), producer.inputs.clone(), producer.outputs.clone(), producer.is_graph_input());
        if outputs.iter().any(|o| body.has_consumers(o)) {
            if placeholder {
                return Err(LowerError::invariant(format!(
                    "tensor array '{}' is deleted but still read in '{}'",
                    value, body.name
                )));
            }
            continue;
        }
        trace!("prune '{}' from '{}'", pname, body.name);
        body.remove_node(&pname);
        frontier.extend(inputs);
    }
    Ok(())
}

/// Gives undefined `Identity` outputs the element type of their source.
fn inherit_identity_dtypes(body: &mut Graph) {
    let pending: Vec<(String, String)> = body
        .nodes()
        .iter()
        .filter(|n| n.op == "Identity" && n.inputs.len() == 1 && n.outputs.len() == 1)
        .map(|n| (n.inputs[0].clone(), n.outputs[0].clone()))
        .collect();
    for (source, out) in pending {
        if body.dtype(&out) == DType::Undefined {
            let dtype = body.dtype(&source);
            if dtype != DType::Undefined {
                body.set_dtype(&out, dtype);
            }
        }
    }
}
