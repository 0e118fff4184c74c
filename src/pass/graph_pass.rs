//! Post-lowering pipeline over a `Graph`.
//!
//! Every lowered graph goes through the same short sequence: nodes appended
//! by the rewrites are put back into dependency order, then (optionally) the
//! result is checked against the target form.

use log::{debug, warn};

use crate::config::LowerConfig;
use crate::error::PassError;
use crate::ir::graph::Graph;
use crate::pass::validate::ValidateTargetPass;

/// A pass that checks or rewrites a `Graph` in place.
pub trait GraphPass {
    fn name(&self) -> &'static str;

    fn run(&mut self, graph: &mut Graph) -> Result<(), PassError>;
}

/// Reorders the nodes of a graph, and of every nested body, so that each
/// producer precedes its readers.
pub struct TopologicalSortPass;

impl GraphPass for TopologicalSortPass {
    fn name(&self) -> &'static str {
        "topological-sort"
    }

    fn run(&mut self, graph: &mut Graph) -> Result<(), PassError> {
        graph.topological_sort()?;
        Ok(())
    }
}

/// Ordered sequence of graph passes.
#[derive(Default)]
pub struct GraphPassManager {
    passes: Vec<Box<dyn GraphPass>>,
}

impl GraphPassManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The pipeline run on a lowered graph: sort, then validate when
    /// `config.validate` is set.
    pub fn for_target(config: &LowerConfig) -> Self {
        let mut pm = Self::new();
        pm.add_pass(TopologicalSortPass);
        if config.validate {
            pm.add_pass(ValidateTargetPass { opset: config.opset });
        }
        pm
    }

    pub fn add_pass(&mut self, pass: impl GraphPass + 'static) {
        self.passes.push(Box::new(pass));
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Runs the passes in order, stopping at the first failure.
    pub fn run(&mut self, graph: &mut Graph) -> Result<(), PassError> {
        for pass in &mut self.passes {
            debug!("pass '{}' on '{}'", pass.name(), graph.name);
            if let Err(e) = pass.run(graph) {
                warn!("pass '{}' failed on '{}': {}", pass.name(), graph.name, e);
                return Err(e);
            }
        }
        Ok(())
    }
}
