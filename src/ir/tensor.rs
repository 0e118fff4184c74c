//! Dense tensor literals.
//!
//! Used for `Const` node payloads and as the runtime value of the reference
//! evaluator. Data is stored flat in row-major order.

use std::fmt;

use crate::ir::types::{DType, Shape};

#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Bool(Vec<bool>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::Bool(v) => v.len(),
            TensorData::I32(v) => v.len(),
            TensorData::I64(v) => v.len(),
            TensorData::F32(v) => v.len(),
            TensorData::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> DType {
        match self {
            TensorData::Bool(_) => DType::Bool,
            TensorData::I32(_) => DType::I32,
            TensorData::I64(_) => DType::I64,
            TensorData::F32(_) => DType::F32,
            TensorData::F64(_) => DType::F64,
        }
    }

    /// An empty buffer of the given element type.
    pub fn empty(dtype: DType) -> Option<Self> {
        Some(match dtype {
            DType::Bool => TensorData::Bool(Vec::new()),
            DType::I32 => TensorData::I32(Vec::new()),
            DType::I64 => TensorData::I64(Vec::new()),
            DType::F32 => TensorData::F32(Vec::new()),
            DType::F64 => TensorData::F64(Vec::new()),
            DType::Undefined => return None,
        })
    }

    /// Gathers `indices` (flat offsets) into a new buffer of the same type.
    pub fn select(&self, indices: &[usize]) -> Self {
        match self {
            TensorData::Bool(v) => TensorData::Bool(indices.iter().map(|&i| v[i]).collect()),
            TensorData::I32(v) => TensorData::I32(indices.iter().map(|&i| v[i]).collect()),
            TensorData::I64(v) => TensorData::I64(indices.iter().map(|&i| v[i]).collect()),
            TensorData::F32(v) => TensorData::F32(indices.iter().map(|&i| v[i]).collect()),
            TensorData::F64(v) => TensorData::F64(indices.iter().map(|&i| v[i]).collect()),
        }
    }

    /// Appends `other`; returns `false` when the element types differ.
    pub fn extend_from(&mut self, other: &TensorData) -> bool {
        match (self, other) {
            (TensorData::Bool(a), TensorData::Bool(b)) => a.extend_from_slice(b),
            (TensorData::I32(a), TensorData::I32(b)) => a.extend_from_slice(b),
            (TensorData::I64(a), TensorData::I64(b)) => a.extend_from_slice(b),
            (TensorData::F32(a), TensorData::F32(b)) => a.extend_from_slice(b),
            (TensorData::F64(a), TensorData::F64(b)) => a.extend_from_slice(b),
            _ => return false,
        }
        true
    }

    /// Every element widened to `f64` (booleans as 0/1).
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            TensorData::Bool(v) => v.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect(),
            TensorData::I32(v) => v.iter().map(|&x| x as f64).collect(),
            TensorData::I64(v) => v.iter().map(|&x| x as f64).collect(),
            TensorData::F32(v) => v.iter().map(|&x| x as f64).collect(),
            TensorData::F64(v) => v.clone(),
        }
    }
}

/// A dense tensor value: dimensions plus flat data.
///
/// Invariant: `data.len()` equals the product of `dims` (1 for a scalar).
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub dims: Vec<usize>,
    pub data: TensorData,
}

impl Tensor {
    pub fn new(dims: Vec<usize>, data: TensorData) -> Option<Self> {
        let count: usize = dims.iter().product();
        if count != data.len() {
            return None;
        }
        Some(Self { dims, data })
    }

    pub fn scalar_bool(v: bool) -> Self {
        Self { dims: vec![], data: TensorData::Bool(vec![v]) }
    }

    pub fn scalar_i32(v: i32) -> Self {
        Self { dims: vec![], data: TensorData::I32(vec![v]) }
    }

    pub fn scalar_i64(v: i64) -> Self {
        Self { dims: vec![], data: TensorData::I64(vec![v]) }
    }

    pub fn scalar_f32(v: f32) -> Self {
        Self { dims: vec![], data: TensorData::F32(vec![v]) }
    }

    pub fn scalar_f64(v: f64) -> Self {
        Self { dims: vec![], data: TensorData::F64(vec![v]) }
    }

    pub fn vec_bool(v: Vec<bool>) -> Self {
        Self { dims: vec![v.len()], data: TensorData::Bool(v) }
    }

    pub fn vec_i32(v: Vec<i32>) -> Self {
        Self { dims: vec![v.len()], data: TensorData::I32(v) }
    }

    pub fn vec_i64(v: Vec<i64>) -> Self {
        Self { dims: vec![v.len()], data: TensorData::I64(v) }
    }

    pub fn vec_f32(v: Vec<f32>) -> Self {
        Self { dims: vec![v.len()], data: TensorData::F32(v) }
    }

    pub fn vec_f64(v: Vec<f64>) -> Self {
        Self { dims: vec![v.len()], data: TensorData::F64(v) }
    }

    /// Reshapes in place; returns `None` when the element count differs.
    pub fn reshaped(mut self, dims: Vec<usize>) -> Option<Self> {
        if dims.iter().product::<usize>() != self.data.len() {
            return None;
        }
        self.dims = dims;
        Some(self)
    }

    /// Builds a tensor of `dtype` from `f64` values, truncating toward zero for
    /// integer types.
    pub fn from_f64(dtype: DType, dims: Vec<usize>, values: &[f64]) -> Option<Self> {
        let data = match dtype {
            DType::Bool => TensorData::Bool(values.iter().map(|&v| v != 0.0).collect()),
            DType::I32 => TensorData::I32(values.iter().map(|&v| v as i32).collect()),
            DType::I64 => TensorData::I64(values.iter().map(|&v| v as i64).collect()),
            DType::F32 => TensorData::F32(values.iter().map(|&v| v as f32).collect()),
            DType::F64 => TensorData::F64(values.to_vec()),
            DType::Undefined => return None,
        };
        Self::new(dims, data)
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Static shape of this literal.
    pub fn shape(&self) -> Shape {
        Shape::known(&self.dims.iter().map(|&d| d as i64).collect::<Vec<_>>())
    }

    /// The sole element of a one-element tensor, widened to `f64`.
    pub fn single_f64(&self) -> Option<f64> {
        if self.len() != 1 {
            return None;
        }
        self.data.to_f64_vec().first().copied()
    }

    /// The sole element of a one-element integer tensor.
    pub fn single_i64(&self) -> Option<i64> {
        match &self.data {
            TensorData::I32(v) if v.len() == 1 => Some(v[0] as i64),
            TensorData::I64(v) if v.len() == 1 => Some(v[0]),
            _ => None,
        }
    }

    /// The sole element of a one-element boolean tensor.
    pub fn single_bool(&self) -> Option<bool> {
        match &self.data {
            TensorData::Bool(v) if v.len() == 1 => Some(v[0]),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            TensorData::F32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<&[i32]> {
        match &self.data {
            TensorData::I32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<&[i64]> {
        match &self.data {
            TensorData::I64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<&[bool]> {
        match &self.data {
            TensorData::Bool(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.dims.iter().map(|d| d.to_string()).collect();
        write!(f, "{}<{}>", self.dtype(), dims.join("x"))?;
        if self.len() <= 8 {
            let items: Vec<String> = match &self.data {
                TensorData::Bool(v) => v.iter().map(|x| x.to_string()).collect(),
                TensorData::I32(v) => v.iter().map(|x| x.to_string()).collect(),
                TensorData::I64(v) => v.iter().map(|x| x.to_string()).collect(),
                TensorData::F32(v) => v.iter().map(|x| x.to_string()).collect(),
                TensorData::F64(v) => v.iter().map(|x| x.to_string()).collect(),
            };
            write!(f, " [{}]", items.join(", "))?;
        }
        Ok(())
    }
}
