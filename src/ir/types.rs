//! Element types and static shapes attached to graph values.

use std::fmt;

/// Element type of a tensor value.
///
/// `Undefined` marks a value whose type could not be determined by the
/// graph builder (e.g. variant-typed loop state); lowering may bind it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DType {
    #[default]
    Undefined,
    Bool,
    I32,
    I64,
    F32,
    F64,
}

impl DType {
    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    pub fn is_integer(self) -> bool {
        matches!(self, DType::I32 | DType::I64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::Undefined => "undefined",
            DType::Bool => "bool",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::F32 => "f32",
            DType::F64 => "f64",
        };
        f.write_str(s)
    }
}

/// A single dimension: concrete extent or statically unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim {
    Known(i64),
    Unknown,
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Known(n) => write!(f, "{}", n),
            Dim::Unknown => f.write_str("?"),
        }
    }
}

/// A shape of known rank. An unknown rank is modelled as `Option<Shape>::None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape(pub Vec<Dim>);

impl Shape {
    pub fn scalar() -> Self {
        Shape(Vec::new())
    }

    pub fn known(dims: &[i64]) -> Self {
        Shape(dims.iter().map(|&d| if d < 0 { Dim::Unknown } else { Dim::Known(d) }).collect())
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Same rank, every extent unknown. Loop bodies may change extents
    /// between iterations, so only the rank is promised.
    pub fn vague(&self) -> Self {
        Shape(vec![Dim::Unknown; self.0.len()])
    }

    /// Drops the leading dimension (the axis a loop iterates over).
    pub fn inner(&self) -> Self {
        Shape(self.0.iter().skip(1).copied().collect())
    }

    /// Prepends an unknown leading dimension (the axis a scan output stacks on).
    pub fn stacked(&self) -> Self {
        let mut dims = Vec::with_capacity(self.0.len() + 1);
        dims.push(Dim::Unknown);
        dims.extend(self.0.iter().copied());
        Shape(dims)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

/// Static metadata for one value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValueInfo {
    pub dtype: DType,
    pub shape: Option<Shape>,
}

impl ValueInfo {
    pub fn new(dtype: DType, shape: Option<Shape>) -> Self {
        Self { dtype, shape }
    }
}

impl fmt::Display for ValueInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.shape {
            Some(shape) => write!(f, "{}{}", self.dtype, shape),
            None => write!(f, "{}[*]", self.dtype),
        }
    }
}
