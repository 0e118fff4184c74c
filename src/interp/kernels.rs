//! Element kernels for the reference evaluator.
//!
//! Binary arithmetic and comparisons broadcast numpy-style. Integer
//! arithmetic wraps; integer division by zero is an error. A float that has
//! no integer value (NaN, infinities, out of range) casts to the integer
//! type's minimum, matching the reference target.

use crate::error::InterpError;
use crate::ir::graph::{Attr, Node};
use crate::ir::tensor::{Tensor, TensorData};
use crate::ir::types::DType;

pub(super) fn eval(node: &Node, inputs: &[Tensor]) -> Result<Vec<Tensor>, InterpError> {
    let op = node.op.as_str();
    let arg = |i: usize| {
        inputs.get(i).ok_or_else(|| InterpError::TypeError {
            op: op.to_owned(),
            detail: format!("missing input {}", i),
        })
    };
    let out = match op {
        "Identity" => arg(0)?.clone(),
        "Add" | "Sub" | "Mul" | "Div" => arith(op, arg(0)?, arg(1)?)?,
        "Less" | "Greater" | "Equal" => compare(op, arg(0)?, arg(1)?)?,
        "Not" => match &arg(0)?.data {
            TensorData::Bool(v) => Tensor { dims: arg(0)?.dims.clone(), data: TensorData::Bool(v.iter().map(|b| !b).collect()) },
            _ => return Err(type_error(op, "expects a boolean tensor")),
        },
        "Ceil" => {
            let t = arg(0)?;
            let data = match &t.data {
                TensorData::F32(v) => TensorData::F32(v.iter().map(|x| x.ceil()).collect()),
                TensorData::F64(v) => TensorData::F64(v.iter().map(|x| x.ceil()).collect()),
                _ => return Err(type_error(op, "expects a float tensor")),
            };
            Tensor { dims: t.dims.clone(), data }
        }
        "Cast" => {
            let to = node.attr_dtype("to").ok_or_else(|| type_error(op, "missing 'to'"))?;
            cast(arg(0)?, to)?
        }
        "Reshape" => reshape(arg(0)?, arg(1)?)?,
        "ReduceProd" => reduce_prod(arg(0)?, node.attr_int("keepdims").unwrap_or(1) != 0),
        "Gather" => gather(arg(0)?, arg(1)?, node.attr_int("axis").unwrap_or(0))?,
        "Squeeze" => squeeze(arg(0)?, node.attr_ints("axes"))?,
        "Unsqueeze" => unsqueeze(arg(0)?, node.attr_ints("axes").unwrap_or(&[]))?,
        "Shape" => {
            let t = arg(0)?;
            Tensor::vec_i64(t.dims.iter().map(|&d| d as i64).collect())
        }
        "Split" => return split(node, arg(0)?),
        "Where" => select(arg(0)?, arg(1)?, arg(2)?)?,
        "NonZero" => nonzero(arg(0)?),
        "Transpose" => transpose(arg(0)?, node.attr_ints("perm"))?,
        _ => return Err(InterpError::Unsupported { op: op.to_owned() }),
    };
    Ok(vec![out])
}

fn type_error(op: &str, detail: &str) -> InterpError {
    InterpError::TypeError { op: op.to_owned(), detail: detail.to_owned() }
}

fn shape_error(op: &str, detail: String) -> InterpError {
    InterpError::ShapeError { op: op.to_owned(), detail }
}

// ---------------------------------------------------------------------------
// Broadcasting
// ---------------------------------------------------------------------------

/// Numpy-style broadcast of two shapes.
pub fn broadcast_dims(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let da = if i + a.len() >= rank { a[i + a.len() - rank] } else { 1 };
        let db = if i + b.len() >= rank { b[i + b.len() - rank] } else { 1 };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return None,
        };
    }
    Some(out)
}

/// For each flat index of `out`, the flat index of the broadcast source `dims`.
fn source_offsets(out: &[usize], dims: &[usize]) -> Vec<usize> {
    let total: usize = out.iter().product();
    let shift = out.len() - dims.len();
    let mut strides = vec![0usize; dims.len()];
    let mut acc = 1;
    for i in (0..dims.len()).rev() {
        strides[i] = if dims[i] == 1 { 0 } else { acc };
        acc *= dims[i];
    }
    (0..total)
        .map(|flat| {
            let mut rem = flat;
            let mut offset = 0;
            for axis in (0..out.len()).rev() {
                let coord = rem % out[axis].max(1);
                rem /= out[axis].max(1);
                if axis >= shift {
                    offset += coord * strides[axis - shift];
                }
            }
            offset
        })
        .collect()
}

fn broadcast_pair(op: &str, a: &Tensor, b: &Tensor) -> Result<(Vec<usize>, Vec<usize>, Vec<usize>), InterpError> {
    let dims = broadcast_dims(&a.dims, &b.dims)
        .ok_or_else(|| shape_error(op, format!("cannot broadcast {:?} with {:?}", a.dims, b.dims)))?;
    let ia = source_offsets(&dims, &a.dims);
    let ib = source_offsets(&dims, &b.dims);
    Ok((dims, ia, ib))
}

// ---------------------------------------------------------------------------
// Arithmetic and comparison
// ---------------------------------------------------------------------------

fn arith(op: &str, a: &Tensor, b: &Tensor) -> Result<Tensor, InterpError> {
    let (dims, ia, ib) = broadcast_pair(op, a, b)?;
    let pairs = ia.iter().zip(&ib);
    let data = match (&a.data, &b.data) {
        (TensorData::F32(x), TensorData::F32(y)) => {
            TensorData::F32(pairs.map(|(&i, &j)| float_op(op, x[i] as f64, y[j] as f64) as f32).collect())
        }
        (TensorData::F64(x), TensorData::F64(y)) => {
            TensorData::F64(pairs.map(|(&i, &j)| float_op(op, x[i], y[j])).collect())
        }
        (TensorData::I32(x), TensorData::I32(y)) => TensorData::I32(
            pairs
                .map(|(&i, &j)| int_op(op, x[i] as i64, y[j] as i64).map(|v| v as i32))
                .collect::<Result<_, _>>()?,
        ),
        (TensorData::I64(x), TensorData::I64(y)) => {
            TensorData::I64(pairs.map(|(&i, &j)| int_op(op, x[i], y[j])).collect::<Result<_, _>>()?)
        }
        _ => {
            return Err(type_error(op, &format!("operands of type {} and {}", a.dtype(), b.dtype())));
        }
    };
    Ok(Tensor { dims, data })
}

fn float_op(op: &str, x: f64, y: f64) -> f64 {
    match op {
        "Add" => x + y,
        "Sub" => x - y,
        "Mul" => x * y,
        _ => x / y,
    }
}

fn int_op(op: &str, x: i64, y: i64) -> Result<i64, InterpError> {
    Ok(match op {
        "Add" => x.wrapping_add(y),
        "Sub" => x.wrapping_sub(y),
        "Mul" => x.wrapping_mul(y),
        _ => {
            if y == 0 {
                return Err(InterpError::DivisionByZero { op: op.to_owned() });
            }
            x.wrapping_div(y)
        }
    })
}

fn compare(op: &str, a: &Tensor, b: &Tensor) -> Result<Tensor, InterpError> {
    if a.dtype() != b.dtype() {
        return Err(type_error(op, &format!("operands of type {} and {}", a.dtype(), b.dtype())));
    }
    let (dims, ia, ib) = broadcast_pair(op, a, b)?;
    let result: Vec<bool> = match (&a.data, &b.data) {
        (TensorData::I32(x), TensorData::I32(y)) => ia.iter().zip(&ib).map(|(&i, &j)| ordering(op, x[i].cmp(&y[j]))).collect(),
        (TensorData::I64(x), TensorData::I64(y)) => ia.iter().zip(&ib).map(|(&i, &j)| ordering(op, x[i].cmp(&y[j]))).collect(),
        (TensorData::Bool(x), TensorData::Bool(y)) if op == "Equal" => ia.iter().zip(&ib).map(|(&i, &j)| x[i] == y[j]).collect(),
        (TensorData::Bool(_), _) => return Err(type_error(op, "ordering of booleans")),
        _ => {
            let (x, y) = (a.data.to_f64_vec(), b.data.to_f64_vec());
            ia.iter()
                .zip(&ib)
                .map(|(&i, &j)| match op {
                    "Less" => x[i] < y[j],
                    "Greater" => x[i] > y[j],
                    _ => x[i] == y[j],
                })
                .collect()
        }
    };
    Ok(Tensor { dims, data: TensorData::Bool(result) })
}

fn ordering(op: &str, ord: std::cmp::Ordering) -> bool {
    match op {
        "Less" => ord.is_lt(),
        "Greater" => ord.is_gt(),
        _ => ord.is_eq(),
    }
}

// ---------------------------------------------------------------------------
// Cast
// ---------------------------------------------------------------------------

/// Element-type conversion.
pub fn cast(t: &Tensor, to: DType) -> Result<Tensor, InterpError> {
    let data = match &t.data {
        TensorData::I32(_) | TensorData::I64(_) | TensorData::Bool(_) => {
            let ints: Vec<i64> = match &t.data {
                TensorData::I32(v) => v.iter().map(|&x| x as i64).collect(),
                TensorData::I64(v) => v.clone(),
                TensorData::Bool(v) => v.iter().map(|&b| b as i64).collect(),
                _ => Vec::new(),
            };
            match to {
                DType::Bool => TensorData::Bool(ints.iter().map(|&x| x != 0).collect()),
                DType::I32 => TensorData::I32(ints.iter().map(|&x| x as i32).collect()),
                DType::I64 => TensorData::I64(ints),
                DType::F32 => TensorData::F32(ints.iter().map(|&x| x as f32).collect()),
                DType::F64 => TensorData::F64(ints.iter().map(|&x| x as f64).collect()),
                DType::Undefined => return Err(type_error("Cast", "target type is undefined")),
            }
        }
        TensorData::F32(_) | TensorData::F64(_) => {
            let floats = t.data.to_f64_vec();
            match to {
                DType::Bool => TensorData::Bool(floats.iter().map(|&x| x != 0.0).collect()),
                DType::I32 => TensorData::I32(
                    floats.iter().map(|&x| float_to_int(x, i32::MIN as i64, i32::MAX as i64) as i32).collect(),
                ),
                DType::I64 => TensorData::I64(floats.iter().map(|&x| float_to_int(x, i64::MIN, i64::MAX)).collect()),
                DType::F32 => TensorData::F32(floats.iter().map(|&x| x as f32).collect()),
                DType::F64 => TensorData::F64(floats),
                DType::Undefined => return Err(type_error("Cast", "target type is undefined")),
            }
        }
    };
    Ok(Tensor { dims: t.dims.clone(), data })
}

/// Truncates toward zero; values without an in-range integer map to `min`.
fn float_to_int(x: f64, min: i64, max: i64) -> i64 {
    // For i64, `max as f64 + 1.0` rounds to 2^63, which is already out of range.
    if x.is_finite() && x >= min as f64 && x < max as f64 + 1.0 {
        x.trunc() as i64
    } else {
        min
    }
}

// ---------------------------------------------------------------------------
// Shape manipulation
// ---------------------------------------------------------------------------

fn reshape(t: &Tensor, shape: &Tensor) -> Result<Tensor, InterpError> {
    let spec: Vec<i64> = match &shape.data {
        TensorData::I64(v) => v.clone(),
        TensorData::I32(v) => v.iter().map(|&x| x as i64).collect(),
        _ => return Err(type_error("Reshape", "shape must be an integer tensor")),
    };
    let mut dims = Vec::with_capacity(spec.len());
    let mut infer = None;
    for (i, &d) in spec.iter().enumerate() {
        match d {
            -1 if infer.is_none() => {
                infer = Some(i);
                dims.push(1);
            }
            0 => dims.push(t.dims.get(i).copied().unwrap_or(0)),
            d if d > 0 => dims.push(d as usize),
            _ => return Err(shape_error("Reshape", format!("invalid target shape {:?}", spec))),
        }
    }
    if let Some(i) = infer {
        let known: usize = dims.iter().product();
        if known == 0 || t.len() % known != 0 {
            return Err(shape_error("Reshape", format!("cannot infer {:?} from {} elements", spec, t.len())));
        }
        dims[i] = t.len() / known;
    }
    t.clone()
        .reshaped(dims)
        .ok_or_else(|| shape_error("Reshape", format!("{:?} does not hold {} elements", spec, t.len())))
}

fn reduce_prod(t: &Tensor, keepdims: bool) -> Tensor {
    let data = match &t.data {
        TensorData::F32(v) => TensorData::F32(vec![v.iter().product()]),
        TensorData::F64(v) => TensorData::F64(vec![v.iter().product()]),
        TensorData::I32(v) => TensorData::I32(vec![v.iter().fold(1i32, |a, &b| a.wrapping_mul(b))]),
        TensorData::I64(v) => TensorData::I64(vec![v.iter().fold(1i64, |a, &b| a.wrapping_mul(b))]),
        TensorData::Bool(v) => TensorData::Bool(vec![v.iter().all(|&b| b)]),
    };
    let dims = if keepdims { vec![1; t.rank()] } else { Vec::new() };
    Tensor { dims, data }
}

fn gather(data: &Tensor, indices: &Tensor, axis: i64) -> Result<Tensor, InterpError> {
    if axis != 0 {
        return Err(InterpError::Unsupported { op: format!("Gather on axis {}", axis) });
    }
    let Some(&rows) = data.dims.first() else {
        return Err(shape_error("Gather", "cannot gather from a scalar".to_owned()));
    };
    let idx: Vec<i64> = match &indices.data {
        TensorData::I64(v) => v.clone(),
        TensorData::I32(v) => v.iter().map(|&x| x as i64).collect(),
        _ => return Err(type_error("Gather", "indices must be integers")),
    };
    let row_len: usize = data.dims[1..].iter().product();
    let mut offsets = Vec::with_capacity(idx.len() * row_len);
    for &i in &idx {
        let r = if i < 0 { i + rows as i64 } else { i };
        if r < 0 || r >= rows as i64 {
            return Err(InterpError::IndexOutOfBounds { idx: i, len: rows });
        }
        let start = r as usize * row_len;
        offsets.extend(start..start + row_len);
    }
    let mut dims = indices.dims.clone();
    dims.extend_from_slice(&data.dims[1..]);
    Ok(Tensor { dims, data: data.data.select(&offsets) })
}

fn normalize_axis(op: &str, axis: i64, rank: usize) -> Result<usize, InterpError> {
    let a = if axis < 0 { axis + rank as i64 } else { axis };
    if a < 0 || a >= rank as i64 {
        return Err(shape_error(op, format!("axis {} out of range for rank {}", axis, rank)));
    }
    Ok(a as usize)
}

fn squeeze(t: &Tensor, axes: Option<&[i64]>) -> Result<Tensor, InterpError> {
    let dims = match axes {
        None => t.dims.iter().copied().filter(|&d| d != 1).collect(),
        Some(axes) => {
            let mut drop = Vec::with_capacity(axes.len());
            for &a in axes {
                let a = normalize_axis("Squeeze", a, t.rank())?;
                if t.dims[a] != 1 {
                    return Err(shape_error("Squeeze", format!("axis {} has extent {}", a, t.dims[a])));
                }
                drop.push(a);
            }
            t.dims.iter().enumerate().filter(|(i, _)| !drop.contains(i)).map(|(_, &d)| d).collect()
        }
    };
    Ok(Tensor { dims, data: t.data.clone() })
}

fn unsqueeze(t: &Tensor, axes: &[i64]) -> Result<Tensor, InterpError> {
    let rank = t.rank() + axes.len();
    let mut at = axes.iter().map(|&a| normalize_axis("Unsqueeze", a, rank)).collect::<Result<Vec<_>, _>>()?;
    at.sort_unstable();
    let mut dims = t.dims.clone();
    for a in at {
        dims.insert(a, 1);
    }
    Ok(Tensor { dims, data: t.data.clone() })
}

fn split(node: &Node, t: &Tensor) -> Result<Vec<Tensor>, InterpError> {
    let axis = node.attr_int("axis").unwrap_or(0);
    if axis != 0 {
        return Err(InterpError::Unsupported { op: format!("Split on axis {}", axis) });
    }
    let Some(&extent) = t.dims.first() else {
        return Err(shape_error("Split", "cannot split a scalar".to_owned()));
    };
    let parts: Vec<usize> = match node.attr("split") {
        Some(Attr::Ints(sizes)) => sizes.iter().map(|&s| s.max(0) as usize).collect(),
        _ => {
            let n = node.outputs.len().max(1);
            vec![extent / n; n]
        }
    };
    if parts.iter().sum::<usize>() != extent {
        return Err(shape_error("Split", format!("parts {:?} do not cover extent {}", parts, extent)));
    }
    let row_len: usize = t.dims[1..].iter().product();
    let mut start = 0;
    let mut out = Vec::with_capacity(parts.len());
    for p in parts {
        let offsets: Vec<usize> = (start * row_len..(start + p) * row_len).collect();
        let mut dims = t.dims.clone();
        dims[0] = p;
        out.push(Tensor { dims, data: t.data.select(&offsets) });
        start += p;
    }
    Ok(out)
}

/// Coordinates of the non-zero elements, one row per axis: `[rank, count]`.
fn nonzero(t: &Tensor) -> Tensor {
    let values = t.data.to_f64_vec();
    let hits: Vec<usize> = values.iter().enumerate().filter(|&(_, &v)| v != 0.0).map(|(i, _)| i).collect();
    let rank = t.rank();
    let mut coords = vec![0i64; rank * hits.len()];
    for (k, &flat) in hits.iter().enumerate() {
        let mut rem = flat;
        for axis in (0..rank).rev() {
            coords[axis * hits.len() + k] = (rem % t.dims[axis]) as i64;
            rem /= t.dims[axis];
        }
    }
    Tensor { dims: vec![rank, hits.len()], data: TensorData::I64(coords) }
}

/// Permutes axes; without `perm` the axes are reversed.
fn transpose(t: &Tensor, perm: Option<&[i64]>) -> Result<Tensor, InterpError> {
    let rank = t.rank();
    let perm: Vec<usize> = match perm {
        Some(p) => p.iter().map(|&a| normalize_axis("Transpose", a, rank)).collect::<Result<_, _>>()?,
        None => (0..rank).rev().collect(),
    };
    if perm.len() != rank {
        return Err(shape_error("Transpose", format!("perm {:?} for rank {}", perm, rank)));
    }
    let mut seen = vec![false; rank];
    for &a in &perm {
        if std::mem::replace(&mut seen[a], true) {
            return Err(shape_error("Transpose", format!("perm {:?} repeats axis {}", perm, a)));
        }
    }
    let dims: Vec<usize> = perm.iter().map(|&a| t.dims[a]).collect();
    let mut strides = vec![1usize; rank];
    for axis in (0..rank.saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * t.dims[axis + 1];
    }
    let offsets: Vec<usize> = (0..t.len())
        .map(|flat| {
            let mut rem = flat;
            let mut offset = 0;
            for axis in (0..rank).rev() {
                offset += (rem % dims[axis]) * strides[perm[axis]];
                rem /= dims[axis];
            }
            offset
        })
        .collect();
    Ok(Tensor { dims, data: t.data.select(&offsets) })
}

fn select(cond: &Tensor, x: &Tensor, y: &Tensor) -> Result<Tensor, InterpError> {
    let TensorData::Bool(c) = &cond.data else {
        return Err(type_error("Where", "condition must be boolean"));
    };
    if x.dtype() != y.dtype() {
        return Err(type_error("Where", "branches have different types"));
    }
    let dims = broadcast_dims(&cond.dims, &x.dims)
        .and_then(|d| broadcast_dims(&d, &y.dims))
        .ok_or_else(|| shape_error("Where", format!("cannot broadcast {:?}, {:?}, {:?}", cond.dims, x.dims, y.dims)))?;
    let ic = source_offsets(&dims, &cond.dims);
    let ix = source_offsets(&dims, &x.dims);
    let iy = source_offsets(&dims, &y.dims);
    // Concatenate both branches and pick from the joined buffer.
    let mut joined = x.data.clone();
    joined.extend_from(&y.data);
    let picks: Vec<usize> = (0..ic.len()).map(|k| if c[ic[k]] { ix[k] } else { x.len() + iy[k] }).collect();
    Ok(Tensor { dims, data: joined.select(&picks) })
}
