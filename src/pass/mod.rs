pub mod graph_pass;
pub mod validate;

pub use graph_pass::{GraphPass, GraphPassManager, TopologicalSortPass};
pub use validate::{validate_target, ValidateTargetPass};
