//! Subgraph inlining and positional parameter binding.
//!
//! Every higher lowering routine splices function bodies through this module:
//!
//! 1. `bind_parameters` pairs a callee's formal parameters with caller values.
//! 2. `wire_in_place` turns each bound placeholder into an `Identity` of its
//!    actual, and deletes placeholders bound to `Actual::Unbound`.
//! 3. `prefix_graph` renames every internal identifier under a scope tag.
//! 4. `copy_and_inline` runs 2–3 on a deep copy and splices the copy's nodes
//!    into the caller, leaving the definition untouched.

use log::trace;

use crate::error::LowerError;
use crate::ir::graph::{Graph, POISON};

/// Caller-side value bound to one formal parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actual {
    Value(String),
    /// Intentionally unbound: every reader of the formal must already be dead.
    Unbound,
}

impl From<&str> for Actual {
    fn from(s: &str) -> Self {
        if s == POISON {
            Actual::Unbound
        } else {
            Actual::Value(s.to_owned())
        }
    }
}

impl From<String> for Actual {
    fn from(s: String) -> Self {
        Actual::from(s.as_str())
    }
}

impl From<&String> for Actual {
    fn from(s: &String) -> Self {
        Actual::from(s.as_str())
    }
}

/// Positional mapping from formal parameters to actuals.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Binding {
    pairs: Vec<(String, Actual)>,
}

impl Binding {
    pub fn get(&self, formal: &str) -> Option<&Actual> {
        self.pairs.iter().find(|(f, _)| f == formal).map(|(_, a)| a)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Actual)> {
        self.pairs.iter().map(|(f, a)| (f.as_str(), a))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Binds `actuals` to the formal parameters of `callee` by position.
pub fn bind_parameters(callee: &Graph, actuals: &[Actual]) -> Result<Binding, LowerError> {
    if callee.params().len() != actuals.len() {
        return Err(LowerError::invariant(format!(
            "function '{}' takes {} parameters but {} actuals were supplied",
            callee.name,
            callee.params().len(),
            actuals.len()
        )));
    }
    let pairs = callee.params().iter().cloned().zip(actuals.iter().cloned()).collect();
    Ok(Binding { pairs })
}

/// Rewrites the formal-parameter placeholders of `callee` according to `binding`.
///
/// Afterwards the graph has no formal parameters and no input placeholders for
/// them: bound formals read their actual through an `Identity`, unbound ones
/// are gone.
pub fn wire_in_place(callee: &mut Graph, binding: &Binding) -> Result<(), LowerError> {
    if callee.params().len() != binding.len() {
        return Err(LowerError::invariant(format!(
            "binding has {} entries for the {} parameters of '{}'",
            binding.len(),
            callee.params().len(),
            callee.name
        )));
    }
    let actuals: Vec<&str> = binding
        .iter()
        .filter_map(|(_, a)| match a {
            Actual::Value(v) => Some(v.as_str()),
            Actual::Unbound => None,
        })
        .collect();
    separate_locals(callee, &actuals);

    let formals = callee.params().to_vec();
    for (formal, (_, actual)) in formals.iter().zip(binding.iter()) {
        let placeholder = callee
            .producer(formal)
            .filter(|n| n.is_graph_input())
            .map(|n| n.name.clone())
            .ok_or_else(|| {
                LowerError::invariant(format!(
                    "formal parameter '{}' of '{}' has no placeholder",
                    formal, callee.name
                ))
            })?;
        match actual {
            Actual::Value(actual) => {
                trace!("wire '{}': {} <- {}", callee.name, formal, actual);
                if let Some(node) = callee.node_mut(&placeholder) {
                    node.op = "Identity".to_owned();
                    node.inputs = vec![actual.clone()];
                }
            }
            Actual::Unbound => {
                if callee.has_consumers(formal) {
                    return Err(LowerError::invariant(format!(
                        "unbound parameter '{}' of '{}' is still read",
                        formal, callee.name
                    )));
                }
                trace!("wire '{}': drop unbound {}", callee.name, formal);
                callee.remove_node(&placeholder);
            }
        }
    }
    let remaining: Vec<String> = callee.inputs().iter().filter(|i| !formals.contains(i)).cloned().collect();
    callee.set_inputs(remaining);
    callee.set_params(Vec::new());
    Ok(())
}

/// Renames every value of `g` that shares its name with one of `outer`, so
/// that a local read of an outer value is never mistaken for a local value.
///
/// Placeholder nodes follow their value: a renamed input keeps the
/// node-name-equals-value convention.
pub(crate) fn separate_locals(g: &mut Graph, outer: &[&str]) {
    for &name in outer {
        if !g.defines(name) {
            continue;
        }
        let mut k = 1;
        let fresh = loop {
            let candidate = format!("{}#{}", name, k);
            if !g.defines(&candidate) && !outer.contains(&candidate.as_str()) {
                break candidate;
            }
            k += 1;
        };
        trace!("'{}': local {} -> {}", g.name, name, fresh);
        if let Some(node) = g.node_mut(name).filter(|n| n.is_graph_input()) {
            node.name = fresh.clone();
        }
        g.rename_value(name, &fresh);
    }
}

/// Renames every non-placeholder node and its outputs to `scope/<old>`.
///
/// The output contract and all readers follow the rename. Nested bodies are
/// only touched where they close over a renamed value.
pub fn prefix_graph(g: &mut Graph, scope: &str) {
    for name in g.node_names() {
        let outputs = match g.node(&name) {
            Some(node) if !node.is_graph_input() => node.outputs.clone(),
            _ => continue,
        };
        for out in outputs {
            g.rename_value(&out, &format!("{}/{}", scope, out));
        }
        if let Some(node) = g.node_mut(&name) {
            node.name = format!("{}/{}", scope, name);
        }
    }
}

/// Splices a renamed, wired copy of `callee` into `target` and returns the
/// copy's outputs in declared order.
pub fn copy_and_inline(
    target: &mut Graph,
    callee: &Graph,
    scope: &str,
    binding: &Binding,
) -> Result<Vec<String>, LowerError> {
    let mut copy = callee.clone();
    wire_in_place(&mut copy, binding)?;
    prefix_graph(&mut copy, scope);
    let outputs = copy.outputs().to_vec();
    trace!("inline '{}' into '{}' as {} ({} nodes)", callee.name, target.name, scope, copy.nodes().len());
    target.absorb(copy)?;
    Ok(outputs)
}
