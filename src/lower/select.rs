//! Elementwise select: `Select(cond, x, y)`.
//!
//! Three renditions, by target version:
//!
//! - since 7: arithmetic blend `cast(cond) * x + y * cast(!cond)`.
//! - since 8: one nested `Loop` per condition axis, ending in a scalar `If`.
//! - since 9: the target's native `Where`.
//!
//! The nested-loop form walks axis 0 of the condition and both values with a
//! loop, recurses on the rows, and stacks the per-row results as the loop's
//! scan output:
//!
//! ```text
//! Loop(trip[0]) { i ->
//!     c = cond[i]; a = x[i]; b = y[i]
//!     Loop(trip[1]) { j -> ... If(c[..]) { a[..] } else { b[..] } }
//! }
//! ```

use log::debug;

use crate::error::{make_sure, LowerError};
use crate::ir::graph::{Attr, Graph, NameGen, NodeBuilder, LOOP_BODY};
use crate::ir::tensor::Tensor;
use crate::ir::types::{DType, Dim, Shape};
use crate::lower::cond::create_if_op;
use crate::lower::{source_node, LowerCtx};

/// Condition and branch values of one select.
#[derive(Debug, Clone)]
pub struct SelectOperands {
    pub cond: String,
    pub on_true: String,
    pub on_false: String,
}

fn operands(g: &Graph, name: &str) -> Result<(SelectOperands, Vec<String>), LowerError> {
    let node = source_node(g, name)?;
    if node.inputs.len() < 3 {
        return Err(LowerError::unsupported(format!(
            "Select '{}' with {} inputs; both branch values are required",
            name,
            node.inputs.len()
        )));
    }
    make_sure(!node.outputs.is_empty(), || format!("Select '{}' has no outputs", name))?;
    let ops = SelectOperands {
        cond: node.inputs[0].clone(),
        on_true: node.inputs[1].clone(),
        on_false: node.inputs[2].clone(),
    };
    Ok((ops, node.outputs))
}

// ---------------------------------------------------------------------------
// Arithmetic blend
// ---------------------------------------------------------------------------

pub fn lower_select_arithmetic(ctx: &mut LowerCtx<'_>, g: &mut Graph, name: &str) -> Result<(), LowerError> {
    let (ops, outputs) = operands(g, name)?;
    let dtype = g.dtype(&outputs[0]);
    let shape = g.shape(&outputs[0]).cloned();
    let names = &mut *ctx.names;

    let pos = g.make_node(names, NodeBuilder::new("Cast", [ops.cond.as_str()]).attr("to", Attr::DType(DType::F32)))?[0].clone();
    let not = g.make_node(names, NodeBuilder::new("Not", [ops.cond.as_str()]))?[0].clone();
    let neg = g.make_node(names, NodeBuilder::new("Cast", [not]).attr("to", Attr::DType(DType::F32)))?[0].clone();
    let lhs = g.make_node(names, NodeBuilder::new("Mul", [pos, ops.on_true.clone()]))?[0].clone();
    let rhs = g.make_node(names, NodeBuilder::new("Mul", [ops.on_false.clone(), neg]))?[0].clone();

    g.remove_node(name);
    g.make_node(names, NodeBuilder::new("Add", [lhs, rhs]).named(name).outputs(outputs).typed(dtype, shape))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Nested loops
// ---------------------------------------------------------------------------

pub fn lower_select_nested(ctx: &mut LowerCtx<'_>, g: &mut Graph, name: &str) -> Result<(), LowerError> {
    let (ops, outputs) = operands(g, name)?;
    let dtype = g.dtype(&ops.on_true);
    make_sure(dtype != DType::Undefined, || format!("element type of '{}' is unknown", ops.on_true))?;
    let true_shape = g
        .shape(&ops.on_true)
        .cloned()
        .ok_or_else(|| LowerError::invariant(format!("shape of '{}' is unknown", ops.on_true)))?;
    let cond_shape = g
        .shape(&ops.cond)
        .cloned()
        .ok_or_else(|| LowerError::invariant(format!("shape of condition '{}' is unknown", ops.cond)))?;
    let out_shape = g.shape(&outputs[0]).cloned().unwrap_or_else(|| true_shape.clone());
    let rank = cond_shape.rank();
    let names = &mut *ctx.names;

    let selected = if rank == 0 {
        create_if_op(names, g, &ops.cond, &ops.on_true, &ops.on_false, dtype, Some(true_shape))?
    } else {
        let dims = g.make_node(
            names,
            NodeBuilder::new("Shape", [ops.cond.as_str()]).typed(DType::I64, Some(Shape::known(&[rank as i64]))),
        )?[0]
            .clone();
        let trip_counts = g.make_node(
            names,
            NodeBuilder::new("Split", [dims])
                .attr("axis", Attr::Int(0))
                .attr("split", Attr::Ints(vec![1; rank]))
                .output_count(rank)
                .dtypes(vec![DType::I64; rank])
                .shapes(vec![Some(Shape::known(&[1])); rank]),
        )?;
        build_select_loop(names, g, &ops, dtype, &true_shape, &trip_counts, rank)?
    };

    g.remove_node(name);
    g.make_node(
        names,
        NodeBuilder::new("Identity", [selected]).named(name).outputs(outputs).typed(dtype, Some(out_shape)),
    )?;
    debug!("Select '{}' -> {} nested loop(s)", name, rank);
    Ok(())
}

/// Emits a `Loop` over axis 0 of the operands, recursing on the rows until
/// `rank` axes are consumed. Returns the loop's stacked result.
///
/// `trip_counts` holds the extent of each remaining axis as a one-element
/// `i64` tensor; its length must equal `rank`.
pub fn build_select_loop(
    names: &mut NameGen,
    g: &mut Graph,
    ops: &SelectOperands,
    dtype: DType,
    shape: &Shape,
    trip_counts: &[String],
    rank: usize,
) -> Result<String, LowerError> {
    make_sure(rank >= 1, || "select loop needs at least one axis".to_owned())?;
    make_sure(trip_counts.len() == rank, || {
        format!("select loop over {} axes given {} trip counts", rank, trip_counts.len())
    })?;
    let row_shape = shape.inner();

    let mut body = Graph::new(names.make("select_body"));
    let iter = names.make("i");
    let cond_in = names.make("cond");
    let fake_in = names.make("fake_var");
    body.add_input(&iter, DType::I64, Some(Shape::scalar()))?;
    body.add_input(&cond_in, DType::Bool, Some(Shape::scalar()))?;
    body.add_input(&fake_in, DType::F32, Some(Shape::scalar()))?;

    let index = body.make_node(
        names,
        NodeBuilder::new("Unsqueeze", [iter.as_str()])
            .attr("axes", Attr::Ints(vec![0]))
            .typed(DType::I64, Some(Shape::known(&[1]))),
    )?[0]
        .clone();
    let rows = SelectOperands {
        cond: take_row(names, &mut body, &ops.cond, &index)?,
        on_true: take_row(names, &mut body, &ops.on_true, &index)?,
        on_false: take_row(names, &mut body, &ops.on_false, &index)?,
    };

    let inner = if rank > 1 {
        build_select_loop(names, &mut body, &rows, dtype, &row_shape, &trip_counts[1..], rank - 1)?
    } else {
        create_if_op(names, &mut body, &rows.cond, &rows.on_true, &rows.on_false, dtype, Some(row_shape.clone()))?
    };

    let cond_out = body.make_node(names, NodeBuilder::new("Identity", [cond_in.as_str()]))?[0].clone();
    let fake_out = body.make_node(names, NodeBuilder::new("Identity", [fake_in.as_str()]))?[0].clone();
    let scan_out = body.make_node(names, NodeBuilder::new("Identity", [inner]))?[0].clone();
    body.add_output(&cond_out, DType::Bool, Some(Shape::scalar()));
    body.add_output(&fake_out, DType::F32, Some(Shape::scalar()));
    body.add_output(&scan_out, dtype, Some(row_shape.vague()));

    let keep_going = g.make_const(names, "cond", Tensor::scalar_bool(true))?;
    let fake = g.make_const(names, "fake_var", Tensor::scalar_f32(0.0))?;
    let loop_name = names.make("Loop");
    let outs = g.make_node(
        names,
        NodeBuilder::new("Loop", [trip_counts[0].clone(), keep_going, fake])
            .named(loop_name.clone())
            .output_count(2)
            .dtypes(vec![DType::F32, dtype])
            .shapes(vec![Some(Shape::scalar()), Some(shape.vague())]),
    )?;
    g.set_body(&loop_name, LOOP_BODY, body)?;
    Ok(outs[1].clone())
}

/// `source[index]` along axis 0, with the indexed axis dropped.
fn take_row(names: &mut NameGen, body: &mut Graph, source: &str, index: &str) -> Result<String, LowerError> {
    let gathered = body.make_node(names, NodeBuilder::new("Gather", [source, index]).attr("axis", Attr::Int(0)))?;
    let squeezed = body.make_node(
        names,
        NodeBuilder::new("Squeeze", [gathered[0].as_str()]).attr("axes", Attr::Ints(vec![0])),
    )?;
    Ok(squeezed[0].clone())
}

// ---------------------------------------------------------------------------
// Native Where
// ---------------------------------------------------------------------------

pub fn lower_select_where(ctx: &mut LowerCtx<'_>, g: &mut Graph, name: &str) -> Result<(), LowerError> {
    let (ops, _) = operands(g, name)?;
    let cond_shape = g
        .shape(&ops.cond)
        .cloned()
        .ok_or_else(|| LowerError::invariant(format!("shape of condition '{}' is unknown", ops.cond)))?;
    let input_shape = g
        .shape(&ops.on_true)
        .or_else(|| g.shape(&ops.on_false))
        .cloned()
        .ok_or_else(|| LowerError::invariant(format!("shapes of both values of '{}' are unknown", name)))?;

    if let Some(node) = g.node_mut(name) {
        node.op = "Where".to_owned();
    }

    // A vector condition picks whole rows; lift it to [n, 1, ..., 1] so that
    // broadcasting lines it up with axis 0.
    if cond_shape.rank() == 1 && input_shape.rank() > 1 {
        let lead = match cond_shape.0[0] {
            Dim::Known(n) => n,
            Dim::Unknown => -1,
        };
        let mut target = vec![1i64; input_shape.rank()];
        target[0] = lead;
        let target_shape = g.make_const(ctx.names, "broadcast_shape", Tensor::vec_i64(target.clone()))?;
        let lifted = g.make_node(
            ctx.names,
            NodeBuilder::new("Reshape", [ops.cond.clone(), target_shape]).typed(DType::Bool, Some(Shape::known(&target))),
        )?[0]
            .clone();
        g.replace_input(name, &ops.cond, &lifted)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Coordinate Where
// ---------------------------------------------------------------------------

/// `Where(cond)` with a single input lists the coordinates of the true
/// elements as `[count, rank]`. The target spells this `NonZero`, which
/// yields `[rank, count]`, so the result is transposed back. The
/// three-input form is already the target's `Where` and is left alone.
pub fn lower_where(ctx: &mut LowerCtx<'_>, g: &mut Graph, name: &str) -> Result<(), LowerError> {
    let node = source_node(g, name)?;
    if node.inputs.len() != 1 {
        return Ok(());
    }
    make_sure(node.outputs.len() == 1, || format!("Where '{}' must have exactly one output", name))?;
    let cond = node.inputs[0].clone();
    let output = node.outputs[0].clone();
    let rank = g.shape(&cond).map(|s| s.rank() as i64).unwrap_or(-1);

    let coords = ctx.names.make("nonzero");
    g.remove_node(name);
    g.make_node(
        ctx.names,
        NodeBuilder::new("NonZero", [cond])
            .named(name)
            .outputs(vec![coords.clone()])
            .typed(DType::I64, Some(Shape::known(&[rank, -1]))),
    )?;
    g.make_node(
        ctx.names,
        NodeBuilder::new("Transpose", [coords])
            .attr("perm", Attr::Ints(vec![1, 0]))
            .outputs(vec![output])
            .typed(DType::I64, Some(Shape::known(&[-1, rank]))),
    )?;
    debug!("Where '{}' -> NonZero + Transpose", name);
    Ok(())
}
