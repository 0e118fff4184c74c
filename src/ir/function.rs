use std::collections::BTreeMap;

use crate::error::LowerError;
use crate::ir::graph::Graph;

/// Named, reusable function definitions referenced by call sites.
///
/// Invariant: lowering routines only read definitions. Anything spliced or
/// attached to a call site is a clone; the stored graph is never mutated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionLibrary {
    functions: BTreeMap<String, Graph>,
}

impl FunctionLibrary {
    pub fn new() -> Self {
        Self { functions: BTreeMap::new() }
    }

    /// Registers a definition. Returns `Err` if the name is already taken.
    pub fn insert(&mut self, name: impl Into<String>, graph: Graph) -> Result<(), String> {
        let name = name.into();
        if self.functions.contains_key(&name) {
            return Err(format!("function '{}' already defined", name));
        }
        self.functions.insert(name, graph);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Graph> {
        self.functions.get(name)
    }

    /// Looks up a definition, failing the lowering when it does not exist.
    pub fn lookup(&self, name: &str) -> Result<&Graph, LowerError> {
        self.functions
            .get(name)
            .ok_or_else(|| LowerError::invariant(format!("function definition '{}' not found", name)))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
