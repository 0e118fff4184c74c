//! Control-flow lowering driver.
//!
//! `lower_model` rewrites a source graph in place so that it only uses the
//! target's control-flow primitives: `If` with two self-contained branches and
//! `Loop` with one body that threads an explicit condition and carried values.
//!
//! ```text
//! FunctionLibrary ──(lower reachable definitions, callees first)──┐
//!                                                                 ▼
//! main graph ──(one sweep in node order, dispatch by (op, opset))──▶ lowered graph
//!            ──(topological sort)──▶ (validate_target)──▶ done
//! ```
//!
//! Handlers mutate the graph they are given and may splice function bodies
//! through `inline`. A failed handler aborts the whole sweep; rewrites already
//! applied are not rolled back.

pub mod cond;
pub mod if_wiring;
pub mod inline;
pub mod range;
pub mod registry;
pub mod select;
pub mod tensor_list;
pub mod while_loop;

use log::{debug, info};

use crate::config::LowerConfig;
use crate::error::{Error, LowerError};
use crate::ir::function::FunctionLibrary;
use crate::ir::graph::{Attr, Graph, NameGen, Node};
use crate::pass::GraphPassManager;

pub use registry::{DispatchTable, Handler, Registry};

/// Shared state handed to every lowering routine during one sweep.
pub struct LowerCtx<'a> {
    pub names: &'a mut NameGen,
    /// Already-lowered function definitions. Read-only.
    pub library: &'a FunctionLibrary,
    pub config: &'a LowerConfig,
}

/// Snapshot of the node a handler was dispatched for.
pub(crate) fn source_node(graph: &Graph, name: &str) -> Result<Node, LowerError> {
    graph
        .node(name)
        .cloned()
        .ok_or_else(|| LowerError::invariant(format!("node '{}' vanished before lowering", name)))
}

/// Lowers `main` in place against `library` and returns the lowered copies of
/// the definitions `main` reaches.
pub fn lower_model(
    main: &mut Graph,
    library: &FunctionLibrary,
    config: &LowerConfig,
) -> Result<FunctionLibrary, Error> {
    info!("lowering graph '{}' for opset {}", main.name, config.opset);
    let table = Registry::standard().resolve(config.opset);
    let mut names = NameGen::new();

    let lowered = lower_library(main, library, &table, &mut names, config)?;
    {
        let mut ctx = LowerCtx { names: &mut names, library: &lowered, config };
        sweep(&table, &mut ctx, main)?;
    }
    GraphPassManager::for_target(config).run(main)?;
    info!("lowered graph '{}': {} nodes", main.name, main.nodes().len());
    Ok(lowered)
}

/// Visits every node of `graph` present at entry, once, in order, and runs
/// the handler registered for its op. Bodies already attached to a node are
/// lowered before the node itself.
pub fn sweep(table: &DispatchTable, ctx: &mut LowerCtx<'_>, graph: &mut Graph) -> Result<(), Error> {
    for name in graph.node_names() {
        let Some(node) = graph.node_mut(&name) else {
            // Removed by an earlier rewrite in this sweep.
            continue;
        };
        for body in node.bodies.values_mut() {
            sweep(table, ctx, body)?;
        }
        let op = node.op.clone();
        if let Some(handler) = table.get(&op) {
            debug!("lower {} '{}' in '{}'", op, name, graph.name);
            handler(ctx, graph, &name).map_err(|source| Error::Lower { node: name.clone(), op, source })?;
        }
    }
    Ok(())
}

/// Lowers a copy of every definition reachable from `main`, callees before
/// callers. Definitions nothing references are left out of the result.
fn lower_library(
    main: &Graph,
    library: &FunctionLibrary,
    table: &DispatchTable,
    names: &mut NameGen,
    config: &LowerConfig,
) -> Result<FunctionLibrary, Error> {
    let mut done = FunctionLibrary::new();
    let mut visiting: Vec<String> = Vec::new();
    for name in referenced_functions(main) {
        if library.get(&name).is_some() {
            lower_function(&name, library, table, names, config, &mut done, &mut visiting)?;
        }
    }
    let skipped = library.len() - done.len();
    if skipped > 0 {
        debug!("{} unreferenced function(s) left unlowered", skipped);
    }
    Ok(done)
}

fn lower_function(
    name: &str,
    library: &FunctionLibrary,
    table: &DispatchTable,
    names: &mut NameGen,
    config: &LowerConfig,
    done: &mut FunctionLibrary,
    visiting: &mut Vec<String>,
) -> Result<(), Error> {
    if done.get(name).is_some() {
        return Ok(());
    }
    if visiting.iter().any(|v| v == name) {
        return Err(LowerError::unsupported(format!(
            "recursive function reference through '{}' ({})",
            name,
            visiting.join(" -> ")
        ))
        .into());
    }
    visiting.push(name.to_owned());

    let def = library.lookup(name)?;
    for callee in referenced_functions(def) {
        // A missing callee is reported by the routine that needs it.
        if library.get(&callee).is_some() {
            lower_function(&callee, library, table, names, config, done, visiting)?;
        }
    }

    let mut copy = def.clone();
    {
        let mut ctx = LowerCtx { names: &mut *names, library: &*done, config };
        sweep(table, &mut ctx, &mut copy)?;
    }
    copy.topological_sort()?;
    debug!("lowered function '{}' ({} nodes)", name, copy.nodes().len());

    visiting.pop();
    done.insert(name, copy).map_err(LowerError::invariant)?;
    Ok(())
}

/// Function names referenced by `Func` attributes anywhere in `graph`.
fn referenced_functions(graph: &Graph) -> Vec<String> {
    let mut out = Vec::new();
    for node in graph.nodes() {
        for attr in node.attrs.values() {
            if let Attr::Func(f) = attr {
                if !out.contains(f) {
                    out.push(f.clone());
                }
            }
        }
        for body in node.bodies.values() {
            for f in referenced_functions(body) {
                if !out.contains(&f) {
                    out.push(f);
                }
            }
        }
    }
    out
}
