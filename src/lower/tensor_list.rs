//! Tensor-array (`TensorList*`) rewrites.
//!
//! Tensor arrays only exist to shuttle values in and out of `While` loops.
//! Reads become `Gather`s on a plain tensor; writes, reservations and
//! stacking are absorbed by the `While` lowering, so their handlers here
//! either forward a value or leave the node for that rewrite.

use std::collections::BTreeMap;

use log::debug;

use crate::error::{make_sure, LowerError};
use crate::ir::graph::{Attr, Graph};
use crate::lower::{source_node, LowerCtx};

fn axes_zero() -> BTreeMap<String, Attr> {
    BTreeMap::from([("axes".to_owned(), Attr::Ints(vec![0]))])
}

/// `TensorListGetItem(list, index)` -> `Squeeze(Gather(list, Unsqueeze(index)))`.
///
/// The list is recorded as a tensor-array read of the enclosing graph; the
/// `While` lowering uses that to recognise read-only state.
pub fn lower_get_item(ctx: &mut LowerCtx<'_>, g: &mut Graph, name: &str) -> Result<(), LowerError> {
    let node = source_node(g, name)?;
    make_sure(node.inputs.len() >= 2 && node.outputs.len() == 1, || {
        format!("TensorListGetItem '{}' needs (list, index) and one output", name)
    })?;
    let list = node.inputs[0].clone();
    if let Some(n) = g.node_mut(name) {
        n.op = "Gather".to_owned();
        n.inputs.truncate(2);
        n.attrs.clear();
        n.attrs.insert("axis".to_owned(), Attr::Int(0));
    }
    g.mark_tensor_array_read(list);
    g.insert_node_on_input(ctx.names, name, 1, "Unsqueeze", axes_zero())?;
    g.insert_node_on_output(ctx.names, &node.outputs[0], "Squeeze", axes_zero())?;
    Ok(())
}

/// `TensorListFromTensor(t, shape)` feeding a `While` is just `t`.
pub fn lower_from_tensor(_ctx: &mut LowerCtx<'_>, g: &mut Graph, name: &str) -> Result<(), LowerError> {
    let node = source_node(g, name)?;
    make_sure(!node.inputs.is_empty() && node.outputs.len() == 1, || {
        format!("TensorListFromTensor '{}' needs a tensor input and one output", name)
    })?;
    let feeds_while = node
        .outputs
        .iter()
        .flat_map(|o| g.consumers(o))
        .filter_map(|c| g.node(&c))
        .any(|c| c.op == "While" || c.op == "StatelessWhile");
    if !feeds_while {
        return Ok(());
    }
    let source = node.inputs[0].clone();
    let info = g.info(&source).cloned();
    if let Some(n) = g.node_mut(name) {
        n.op = "Identity".to_owned();
        n.inputs = vec![source];
        n.attrs.clear();
    }
    if let Some(info) = info {
        g.set_info(&node.outputs[0], info);
    }
    debug!("TensorListFromTensor '{}' -> Identity", name);
    Ok(())
}

/// `TensorListStack(list)` over a loop's scan output is the scan output itself.
pub fn lower_stack(_ctx: &mut LowerCtx<'_>, g: &mut Graph, name: &str) -> Result<(), LowerError> {
    let node = source_node(g, name)?;
    make_sure(!node.inputs.is_empty() && node.outputs.len() == 1, || {
        format!("TensorListStack '{}' needs a list input and one output", name)
    })?;
    let list = node.inputs[0].clone();
    let from_loop = g
        .producer(&list)
        .map_or(false, |p| matches!(p.op.as_str(), "Loop" | "While" | "StatelessWhile"));
    if !from_loop {
        return Ok(());
    }
    g.remove_node(name);
    g.replace_all_inputs(&node.outputs[0], &list);
    debug!("TensorListStack '{}' folded into '{}'", name, list);
    Ok(())
}
