//! Lowering configuration.

/// Options for one lowering sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LowerConfig {
    /// Target operator-set version; selects which handler runs per op.
    pub opset: u32,
    /// Run `validate_target` on the lowered graph before returning.
    pub validate: bool,
    /// Trip count substituted for an unbounded (`-1`) maximum-iterations input.
    pub unbounded_trip_count: i64,
    /// Largest constant `Range` emitted as a literal; longer ones run as a `Loop`.
    pub max_range_literal: usize,
}

impl LowerConfig {
    /// Lowest target version at which every control-flow routine is active.
    pub const DEFAULT_OPSET: u32 = 8;

    pub fn for_opset(opset: u32) -> Self {
        Self { opset, ..Self::default() }
    }

    pub fn without_validation(mut self) -> Self {
        self.validate = false;
        self
    }
}

impl Default for LowerConfig {
    fn default() -> Self {
        Self {
            opset: Self::DEFAULT_OPSET,
            validate: true,
            unbounded_trip_count: i64::MAX,
            max_range_literal: 1 << 16,
        }
    }
}
