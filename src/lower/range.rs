//! `Range(start, limit, delta)` materialization.
//!
//! Targets before version 11 have no range op. When all three operands fold
//! to constants and the sequence is short enough, it is computed here and
//! emitted as a literal; otherwise it is generated at run time by a `Loop`
//! whose scan output collects the running value:
//!
//! ```text
//! trip = i64(ceil((limit - start) / delta))
//! Loop(trip, true, start) { i, cond, prev -> (cond, prev + delta, prev) }
//! ```

use log::debug;

use crate::error::{make_sure, LowerError};
use crate::interp::fold_value;
use crate::ir::graph::{Attr, Graph, NameGen, NodeBuilder, LOOP_BODY};
use crate::ir::tensor::{Tensor, TensorData};
use crate::ir::types::{DType, Shape};
use crate::lower::{source_node, LowerCtx};

pub fn lower_range(ctx: &mut LowerCtx<'_>, g: &mut Graph, name: &str) -> Result<(), LowerError> {
    let node = source_node(g, name)?;
    make_sure(node.inputs.len() == 3 && node.outputs.len() == 1, || {
        format!("Range '{}' needs (start, limit, delta) and one output", name)
    })?;
    let dtype = node
        .attr_dtype("Tidx")
        .filter(|d| *d != DType::Undefined)
        .ok_or_else(|| LowerError::invariant(format!("Range '{}' has no Tidx element type", name)))?;
    let output = node.outputs[0].clone();
    let shape = g.shape(&output).cloned().or_else(|| Some(Shape::known(&[-1])));

    g.remove_node(name);
    let operands = [node.inputs[0].as_str(), node.inputs[1].as_str(), node.inputs[2].as_str()];
    make_range(ctx.names, g, operands, &output, dtype, shape, ctx.config.max_range_literal)
}

/// Emits the nodes computing `range(start, limit, delta)` into `output`.
///
/// Constant ranges of at most `max_literal` elements become a literal.
pub fn make_range(
    names: &mut NameGen,
    g: &mut Graph,
    [start, limit, delta]: [&str; 3],
    output: &str,
    dtype: DType,
    shape: Option<Shape>,
    max_literal: usize,
) -> Result<(), LowerError> {
    let folded = (fold_value(g, start), fold_value(g, limit), fold_value(g, delta));
    if let (Ok(s), Ok(l), Ok(d)) = folded {
        let count = range_len(&s, &l, &d)?;
        if count > max_literal {
            debug!("range into '{}' has {} elements, generating it at run time", output, count);
            return make_range_loop(names, g, [start, limit, delta], output, dtype, shape);
        }
        let values = arange(dtype, &s, &l, &d)?;
        debug!("range into '{}' folded to {} elements", output, values.len());
        let literal = g.make_const(names, "range", values)?;
        g.make_node(names, NodeBuilder::new("Identity", [literal]).outputs(vec![output.to_owned()]).typed(dtype, shape))?;
        return Ok(());
    }
    make_range_loop(names, g, [start, limit, delta], output, dtype, shape)
}

/// `start, start + delta, ...` up to but excluding `limit`, in `dtype`.
///
/// The element count is `ceil((limit - start) / delta)`, clamped at zero.
pub fn arange(dtype: DType, start: &Tensor, limit: &Tensor, delta: &Tensor) -> Result<Tensor, LowerError> {
    let count = range_len(start, limit, delta)?;
    let (s, d) = (scalar_f64(start, "start")?, scalar_f64(delta, "delta")?);

    let data = if dtype.is_integer() {
        let (s, d) = (as_i64(start)?, as_i64(delta)?);
        let values: Vec<i64> = (0..count as i64).map(|k| s.wrapping_add(k.wrapping_mul(d))).collect();
        match dtype {
            DType::I32 => TensorData::I32(values.into_iter().map(|v| v as i32).collect()),
            _ => TensorData::I64(values),
        }
    } else {
        let values: Vec<f64> = (0..count).map(|k| s + k as f64 * d).collect();
        match dtype {
            DType::F32 => TensorData::F32(values.into_iter().map(|v| v as f32).collect()),
            DType::F64 => TensorData::F64(values),
            other => return Err(LowerError::invariant(format!("range over {} values", other))),
        }
    };
    Tensor::new(vec![count], data).ok_or_else(|| LowerError::invariant("range literal has inconsistent size"))
}

/// Number of elements in `range(start, limit, delta)`.
pub fn range_len(start: &Tensor, limit: &Tensor, delta: &Tensor) -> Result<usize, LowerError> {
    let (s, l, d) = (scalar_f64(start, "start")?, scalar_f64(limit, "limit")?, scalar_f64(delta, "delta")?);
    let count = ((l - s) / d).ceil();
    make_sure(count.is_finite(), || format!("range step {} does not make progress from {} to {}", d, s, l))?;
    Ok(count.max(0.0) as usize)
}

fn scalar_f64(t: &Tensor, what: &str) -> Result<f64, LowerError> {
    t.single_f64()
        .ok_or_else(|| LowerError::invariant(format!("range {} must be a single value, got {}", what, t)))
}

fn as_i64(t: &Tensor) -> Result<i64, LowerError> {
    t.single_i64()
        .or_else(|| t.single_f64().map(|v| v as i64))
        .ok_or_else(|| LowerError::invariant(format!("range operand {} is not a single value", t)))
}

fn cast_to_f32(names: &mut NameGen, g: &mut Graph, value: &str) -> Result<String, LowerError> {
    let outs = g.make_node(
        names,
        NodeBuilder::new("Cast", [value]).attr("to", Attr::DType(DType::F32)).typed(DType::F32, Some(Shape::scalar())),
    )?;
    Ok(outs[0].clone())
}

fn make_range_loop(
    names: &mut NameGen,
    g: &mut Graph,
    [start, limit, delta]: [&str; 3],
    output: &str,
    dtype: DType,
    shape: Option<Shape>,
) -> Result<(), LowerError> {
    let diff = g.make_node(names, NodeBuilder::new("Sub", [limit, start]).typed(dtype, Some(Shape::scalar())))?[0].clone();
    let (num, den) = if dtype.is_integer() {
        (cast_to_f32(names, g, &diff)?, cast_to_f32(names, g, delta)?)
    } else {
        (diff, delta.to_owned())
    };
    let ratio = g.make_node(names, NodeBuilder::new("Div", [num, den]))?[0].clone();
    let ceil = g.make_node(names, NodeBuilder::new("Ceil", [ratio]))?[0].clone();
    let trip = g.make_node(
        names,
        NodeBuilder::new("Cast", [ceil]).attr("to", Attr::DType(DType::I64)).typed(DType::I64, Some(Shape::scalar())),
    )?[0]
        .clone();
    let keep_going = g.make_const(names, "cond", Tensor::scalar_bool(true))?;

    let mut body = Graph::new(names.make("range_body"));
    let i = names.make("i");
    let cond = names.make("cond");
    let prev = names.make("prev");
    body.add_input(&i, DType::I64, Some(Shape::scalar()))?;
    body.add_input(&cond, DType::Bool, Some(Shape::scalar()))?;
    body.add_input(&prev, dtype, Some(Shape::scalar()))?;
    let cond_out = body.make_node(names, NodeBuilder::new("Identity", [cond.as_str()]))?[0].clone();
    let next = body.make_node(names, NodeBuilder::new("Add", [prev.as_str(), delta]))?[0].clone();
    let current = body.make_node(names, NodeBuilder::new("Identity", [prev.as_str()]))?[0].clone();
    body.add_output(&cond_out, DType::Bool, Some(Shape::scalar()));
    body.add_output(&next, dtype, Some(Shape::scalar()));
    body.add_output(&current, dtype, Some(Shape::scalar()));

    let loop_name = names.make("Loop");
    let outs = g.make_node(
        names,
        NodeBuilder::new("Loop", [trip.as_str(), keep_going.as_str(), start])
            .named(loop_name.clone())
            .output_count(2)
            .dtypes(vec![dtype, dtype])
            .shapes(vec![Some(Shape::scalar()), Some(Shape::known(&[-1]))]),
    )?;
    g.set_body(&loop_name, LOOP_BODY, body)?;
    g.make_node(names, NodeBuilder::new("Identity", [outs[1].as_str()]).outputs(vec![output.to_owned()]).typed(dtype, shape))?;
    debug!("range into '{}' via {}", output, loop_name);
    Ok(())
}
