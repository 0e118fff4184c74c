use thiserror::Error;

/// Top-level error type for a lowering sweep.
///
/// A sweep either fully succeeds or fails as a whole; the graph may hold
/// partially committed rewrites after any of these is returned.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{}", format_error_pretty("lowering error", &format!("node '{node}' ({op}): {source}")))]
    Lower {
        node: String,
        op: String,
        #[source]
        source: LowerError,
    },

    #[error("{}", format_error_pretty("lowering error", &format!("{}", _0)))]
    Routine(#[from] LowerError),

    #[error("{}", format_error_pretty("graph error", &format!("{}", _0)))]
    Graph(#[from] GraphError),

    #[error("{}", format_error_pretty("validation error", &format!("{}", _0)))]
    Pass(#[from] PassError),

    #[error("{}", format_error_pretty("codegen error", &format!("{}", _0)))]
    Codegen(#[from] CodegenError),

    #[error("{}", format_error_pretty("evaluation error", &format!("{}", _0)))]
    Interp(#[from] InterpError),
}

fn format_error_pretty(category: &str, msg: &str) -> String {
    format!("[{}] {}", category, msg)
}

// ---------------------------------------------------------------------------
// Lowering errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LowerError {
    #[error("invariant violated: {detail}")]
    InvariantViolation { detail: String },

    #[error("unsupported construct: {detail}. There is no lowering for this combination")]
    UnsupportedConstruct { detail: String },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl LowerError {
    pub fn invariant(detail: impl Into<String>) -> Self {
        LowerError::InvariantViolation { detail: detail.into() }
    }

    pub fn unsupported(detail: impl Into<String>) -> Self {
        LowerError::UnsupportedConstruct { detail: detail.into() }
    }
}

/// Returns `InvariantViolation` with the lazily built message when `cond` is false.
pub fn make_sure(cond: bool, detail: impl FnOnce() -> String) -> Result<(), LowerError> {
    if cond {
        Ok(())
    } else {
        Err(LowerError::invariant(detail()))
    }
}

// ---------------------------------------------------------------------------
// Graph builder errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("value '{name}' already has a producer in graph '{graph}' — each value must be produced exactly once")]
    DuplicateValue { graph: String, name: String },

    #[error("node '{name}' already exists in graph '{graph}'")]
    DuplicateNode { graph: String, name: String },

    #[error("no node named '{name}' in graph '{graph}'")]
    UnknownNode { graph: String, name: String },

    #[error("no producer for value '{name}' in graph '{graph}'")]
    UnknownValue { graph: String, name: String },

    #[error("graph '{graph}' contains a cycle through node '{node}'")]
    Cycle { graph: String, node: String },
}

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PassError {
    #[error("in graph '{graph}': {detail}")]
    Invalid { graph: String, detail: String },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

// ---------------------------------------------------------------------------
// Text emission errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("could not format graph '{graph}' — {detail}")]
    Format { graph: String, detail: String },
}

impl From<std::fmt::Error> for CodegenError {
    fn from(e: std::fmt::Error) -> Self {
        CodegenError::Format { graph: String::new(), detail: e.to_string() }
    }
}

// ---------------------------------------------------------------------------
// Evaluator errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum InterpError {
    #[error("value '{name}' is not bound in any enclosing scope")]
    UnboundValue { name: String },

    #[error("type error in {op} — {detail}")]
    TypeError { op: String, detail: String },

    #[error("shape error in {op} — {detail}")]
    ShapeError { op: String, detail: String },

    #[error("division by zero in integer {op}")]
    DivisionByZero { op: String },

    #[error("index out of bounds — index {idx} into an axis of length {len}")]
    IndexOutOfBounds { idx: i64, len: usize },

    #[error("the evaluator does not support op '{op}'")]
    Unsupported { op: String },

    #[error(transparent)]
    Graph(#[from] GraphError),
}
