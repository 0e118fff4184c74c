//! Structured `If` wiring.
//!
//! A source `If(cond, args...)` names its branches as function definitions
//! (`then_branch` / `else_branch` attributes). The target `If` takes only the
//! condition and owns both branches as nested graphs that read outer values
//! directly, so each definition is copied, its parameters are bound to
//! `args`, and the copy is attached to the node.

use log::debug;

use crate::error::{make_sure, LowerError};
use crate::ir::graph::{Graph, NodeBuilder, ELSE_BRANCH, THEN_BRANCH};
use crate::ir::types::{DType, Shape};
use crate::lower::inline::{bind_parameters, prefix_graph, wire_in_place, Actual};
use crate::lower::{source_node, LowerCtx};

pub fn lower_if(ctx: &mut LowerCtx<'_>, g: &mut Graph, name: &str) -> Result<(), LowerError> {
    let node = source_node(g, name)?;
    if !node.bodies.is_empty() {
        // Already in target form.
        return Ok(());
    }
    make_sure(!node.inputs.is_empty(), || format!("If '{}' has no condition input", name))?;
    let cond = node.inputs[0].clone();
    let args: Vec<Actual> = node.inputs[1..].iter().map(Actual::from).collect();
    let dtypes: Vec<DType> = node.outputs.iter().map(|o| g.dtype(o)).collect();
    let shapes: Vec<Option<Shape>> = node.outputs.iter().map(|o| g.shape(o).cloned()).collect();

    let mut branches = Vec::with_capacity(2);
    for (attr, slot) in [("then_branch", THEN_BRANCH), ("else_branch", ELSE_BRANCH)] {
        let func = node
            .attr_func(attr)
            .ok_or_else(|| LowerError::invariant(format!("If '{}' has no '{}' function", name, attr)))?;
        let def = ctx.library.lookup(func)?;
        let scope = ctx.names.make(func);
        let branch = wire_branch(def, &args, &scope, &dtypes, &shapes)?;
        debug!("If '{}': {} <- {} as {}", name, slot, func, scope);
        branches.push((slot, branch));
    }

    g.remove_node(name);
    g.make_node(
        ctx.names,
        NodeBuilder::new("If", [cond]).named(name).outputs(node.outputs.clone()).dtypes(dtypes).shapes(shapes),
    )?;
    for (slot, branch) in branches {
        g.set_body(name, slot, branch)?;
    }
    Ok(())
}

/// Copies `def`, binds its parameters to `args` and renames it under `scope`.
///
/// The call site's output metadata overrides the branch's: shapes always,
/// element types whenever the call site knows them.
fn wire_branch(
    def: &Graph,
    args: &[Actual],
    scope: &str,
    dtypes: &[DType],
    shapes: &[Option<Shape>],
) -> Result<Graph, LowerError> {
    let mut branch = def.clone();
    let binding = bind_parameters(&branch, args)?;
    wire_in_place(&mut branch, &binding)?;
    prefix_graph(&mut branch, scope);
    branch.name = scope.to_owned();

    make_sure(branch.outputs().len() == dtypes.len(), || {
        format!(
            "branch '{}' returns {} values but the If has {} outputs",
            def.name,
            branch.outputs().len(),
            dtypes.len()
        )
    })?;
    let outputs = branch.outputs().to_vec();
    for (i, out) in outputs.iter().enumerate() {
        if dtypes[i] != DType::Undefined {
            branch.set_dtype(out, dtypes[i]);
        }
        branch.set_shape(out, shapes[i].clone());
    }
    Ok(branch)
}
