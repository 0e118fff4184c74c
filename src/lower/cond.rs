//! Binary conditional lowering: `Switch`, `Merge` and the scalar ternary select.
//!
//! Dataflow conditionals have no direct target equivalent. Each is rebuilt as
//! an `If` whose two branches are self-contained graphs:
//!
//! ```text
//! Switch(v, p)  ─▶ If(p) { then: (NaN * v, v)   else: (v, NaN * v) }
//! Merge(a, b)   ─▶ If(is_poisoned(a)) { then: (b, 1)   else: (a, 0) }
//! ```
//!
//! The branch not taken by a `Switch` is filled with NaN so that a later
//! `Merge` can tell which arm actually produced a value.

use log::debug;

use crate::error::{make_sure, LowerError};
use crate::ir::graph::{port_name, Attr, Graph, NameGen, NodeBuilder, ELSE_BRANCH, THEN_BRANCH};
use crate::ir::tensor::Tensor;
use crate::ir::types::{DType, Shape};
use crate::lower::{source_node, LowerCtx};

/// What a NaN becomes under a float-to-`i64` cast on the reference target.
/// `Merge` compares against this to detect a poisoned input.
pub const NAN_AS_I64: i64 = i64::MIN;

// ---------------------------------------------------------------------------
// Switch
// ---------------------------------------------------------------------------

/// `Switch(value, pred) -> (output_false, output_true)`, lowered to an `If`
/// on `pred` that yields the real value in the taken slot and a NaN-poisoned
/// value in the other.
pub fn lower_switch(ctx: &mut LowerCtx<'_>, g: &mut Graph, name: &str) -> Result<(), LowerError> {
    let node = source_node(g, name)?;
    make_sure(node.inputs.len() == 2, || format!("Switch '{}' expects 2 inputs, got {}", name, node.inputs.len()))?;
    make_sure(node.outputs.len() == 2, || format!("Switch '{}' expects 2 outputs, got {}", name, node.outputs.len()))?;
    let value = node.inputs[0].clone();
    let pred = node.inputs[1].clone();

    let mut dtypes: Vec<DType> = node.outputs.iter().map(|o| g.dtype(o)).collect();
    let shapes: Vec<Option<Shape>> = node.outputs.iter().map(|o| g.shape(o).cloned()).collect();
    if dtypes[0] == DType::Undefined {
        dtypes[0] = g.dtype(&value);
    }
    make_sure(dtypes[0] != DType::Undefined, || format!("element type of Switch '{}' is unknown", name))?;
    if dtypes[1] == DType::Undefined {
        dtypes[1] = dtypes[0];
    }

    let nan = g.make_const(ctx.names, "nan", Tensor::scalar_f32(f32::NAN))?;
    let poison = g.make_node(
        ctx.names,
        NodeBuilder::new("Cast", [nan]).attr("to", Attr::DType(dtypes[0])).typed(dtypes[0], Some(Shape::scalar())),
    )?[0]
        .clone();

    // The predicate selects output 1 when true.
    let then_branch = switch_branch(ctx.names, &value, &poison, &dtypes, &shapes, 1)?;
    let else_branch = switch_branch(ctx.names, &value, &poison, &dtypes, &shapes, 0)?;

    g.remove_node(name);
    g.make_node(
        ctx.names,
        NodeBuilder::new("If", [pred]).named(name).outputs(node.outputs.clone()).dtypes(dtypes).shapes(shapes),
    )?;
    g.set_body(name, THEN_BRANCH, then_branch)?;
    g.set_body(name, ELSE_BRANCH, else_branch)?;
    debug!("Switch '{}' -> If", name);
    Ok(())
}

/// A `Switch` branch: slot `live` carries `value`, the other slot carries
/// `poison * value` (NaN broadcast to the value's shape).
fn switch_branch(
    names: &mut NameGen,
    value: &str,
    poison: &str,
    dtypes: &[DType],
    shapes: &[Option<Shape>],
    live: usize,
) -> Result<Graph, LowerError> {
    let dead = 1 - live;
    let mut b = Graph::new(names.make("switch_branch"));
    let real = b.make_node(
        names,
        NodeBuilder::new("Identity", [value]).typed(dtypes[live], shapes[live].clone()),
    )?[0]
        .clone();
    let poisoned = b.make_node(
        names,
        NodeBuilder::new("Mul", [poison, real.as_str()]).typed(dtypes[dead], shapes[dead].clone()),
    )?[0]
        .clone();
    let mut slots = [String::new(), String::new()];
    slots[live] = real;
    slots[dead] = poisoned;
    for (i, out) in slots.iter().enumerate() {
        b.add_output(out, dtypes[i], shapes[i].clone());
    }
    Ok(b)
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// `Merge(a, b) -> (output, value_index)`, lowered to an `If` that forwards
/// `b` when `a` is poisoned and `a` otherwise.
///
/// Poison detection: flatten `a`, take the product of its elements (NaN
/// propagates), cast to `i64` and compare with [`NAN_AS_I64`]. Assumes the
/// `Switch` that fed the dead arm filled it with NaN.
pub fn lower_merge(ctx: &mut LowerCtx<'_>, g: &mut Graph, name: &str) -> Result<(), LowerError> {
    let node = source_node(g, name)?;
    if node.inputs.len() != 2 {
        return Err(LowerError::unsupported(format!(
            "Merge '{}' has {} inputs; only two-way merges can be lowered",
            name,
            node.inputs.len()
        )));
    }
    make_sure(!node.outputs.is_empty(), || format!("Merge '{}' has no outputs", name))?;
    let first = node.inputs[0].clone();
    let second = node.inputs[1].clone();

    let mut dtypes: Vec<DType> = node.outputs.iter().map(|o| g.dtype(o)).collect();
    let mut shapes: Vec<Option<Shape>> = node.outputs.iter().map(|o| g.shape(o).cloned()).collect();
    make_sure(dtypes[0] != DType::Undefined, || format!("element type of Merge '{}' is unknown", name))?;
    if dtypes.len() > 1 && dtypes[1] == DType::Undefined {
        dtypes[1] = DType::I32;
    }
    if shapes.len() > 1 && shapes[1].is_none() {
        shapes[1] = Some(Shape::scalar());
    }

    let flat_shape = g.make_const(ctx.names, "flat_shape", Tensor::vec_i64(vec![-1]))?;
    let sentinel = g.make_const(ctx.names, "nan_as_i64", Tensor::vec_i64(vec![NAN_AS_I64]))?;
    let flat = g.make_node(ctx.names, NodeBuilder::new("Reshape", [first.clone(), flat_shape]))?[0].clone();
    let prod = g.make_node(
        ctx.names,
        NodeBuilder::new("ReduceProd", [flat]).attr("keepdims", Attr::Int(1)).typed(dtypes[0], Some(Shape::known(&[1]))),
    )?[0]
        .clone();
    let as_int = g.make_node(
        ctx.names,
        NodeBuilder::new("Cast", [prod]).attr("to", Attr::DType(DType::I64)).typed(DType::I64, Some(Shape::known(&[1]))),
    )?[0]
        .clone();
    let poisoned = g.make_node(
        ctx.names,
        NodeBuilder::new("Equal", [as_int, sentinel]).typed(DType::Bool, Some(Shape::known(&[1]))),
    )?[0]
        .clone();

    let then_branch = merge_branch(ctx.names, &second, 1, &dtypes, &shapes)?;
    let else_branch = merge_branch(ctx.names, &first, 0, &dtypes, &shapes)?;

    g.remove_node(name);
    g.make_node(
        ctx.names,
        NodeBuilder::new("If", [poisoned]).named(name).outputs(node.outputs.clone()).dtypes(dtypes).shapes(shapes),
    )?;
    g.set_body(name, THEN_BRANCH, then_branch)?;
    g.set_body(name, ELSE_BRANCH, else_branch)?;
    debug!("Merge '{}' -> If", name);
    Ok(())
}

/// A `Merge` branch: forwards `value` and, when the node has a second output,
/// the constant index of the arm it came from.
fn merge_branch(
    names: &mut NameGen,
    value: &str,
    index: usize,
    dtypes: &[DType],
    shapes: &[Option<Shape>],
) -> Result<Graph, LowerError> {
    let mut b = Graph::new(names.make("merge_branch"));
    let out = b.make_node(names, NodeBuilder::new("Identity", [value]).typed(dtypes[0], shapes[0].clone()))?[0].clone();
    b.add_output(&out, dtypes[0], shapes[0].clone());
    if dtypes.len() > 1 {
        let literal = Tensor::from_f64(dtypes[1], vec![], &[index as f64])
            .ok_or_else(|| LowerError::invariant("Merge index type has no literal form"))?;
        let idx = b.make_const(names, "value_index", literal)?;
        b.add_output(&idx, dtypes[1], shapes[1].clone());
    }
    Ok(b)
}

// ---------------------------------------------------------------------------
// Scalar select
// ---------------------------------------------------------------------------

/// Emits `If(cond) { on_true } else { on_false }` for rank-0 operands and
/// returns its output.
pub fn create_if_op(
    names: &mut NameGen,
    g: &mut Graph,
    cond: &str,
    on_true: &str,
    on_false: &str,
    dtype: DType,
    shape: Option<Shape>,
) -> Result<String, LowerError> {
    let shape = shape.map(|s| s.vague());
    let if_name = names.make("If");
    let out = port_name(&if_name, 0);

    let mut then_branch = Graph::new(names.make("select_true"));
    let t = then_branch.make_node(names, NodeBuilder::new("Identity", [on_true]).typed(dtype, shape.clone()))?[0].clone();
    then_branch.add_output(&t, dtype, shape.clone());

    let mut else_branch = Graph::new(names.make("select_false"));
    let f = else_branch.make_node(names, NodeBuilder::new("Identity", [on_false]).typed(dtype, shape.clone()))?[0].clone();
    else_branch.add_output(&f, dtype, shape.clone());

    g.make_node(
        names,
        NodeBuilder::new("If", [cond]).named(if_name.clone()).outputs(vec![out.clone()]).typed(dtype, shape),
    )?;
    g.set_body(&if_name, THEN_BRANCH, then_branch)?;
    g.set_body(&if_name, ELSE_BRANCH, else_branch)?;
    Ok(out)
}
