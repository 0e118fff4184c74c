//! Versioned handler registry.
//!
//! Each source op may have several handlers, each tagged with the lowest
//! target version it applies to. For a requested target version `v` the
//! handler used is the one with the largest `since_version <= v`; ops with no
//! such handler are left alone. The table is resolved once per sweep.

use std::collections::HashMap;

use log::trace;

use crate::error::LowerError;
use crate::ir::graph::Graph;
use crate::lower::{cond, if_wiring, range, select, tensor_list, while_loop, LowerCtx};

/// A lowering routine: rewrites node `name` of the graph in place.
pub type Handler = fn(&mut LowerCtx<'_>, &mut Graph, &str) -> Result<(), LowerError>;

#[derive(Clone)]
struct Entry {
    op: &'static str,
    since_version: u32,
    handler: Handler,
}

/// Every known `(op, since_version, handler)` triple.
#[derive(Clone, Default)]
pub struct Registry {
    entries: Vec<Entry>,
}

impl Registry {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Registers `handler` for each of `ops` from `since_version` on.
    pub fn register(&mut self, ops: &[&'static str], since_version: u32, handler: Handler) {
        for &op in ops {
            self.entries.push(Entry { op, since_version, handler });
        }
    }

    /// The built-in control-flow handlers.
    pub fn standard() -> Self {
        let mut r = Self::new();

        r.register(&["Switch"], 8, cond::lower_switch);
        r.register(&["Merge"], 8, cond::lower_merge);

        r.register(&["Select", "SelectV2"], 7, select::lower_select_arithmetic);
        r.register(&["Select", "SelectV2"], 8, select::lower_select_nested);
        r.register(&["Select", "SelectV2"], 9, select::lower_select_where);
        r.register(&["Where"], 9, select::lower_where);

        r.register(&["If", "StatelessIf"], 1, if_wiring::lower_if);
        r.register(&["While", "StatelessWhile"], 7, while_loop::lower_while);

        r.register(&["TensorListGetItem"], 7, tensor_list::lower_get_item);
        r.register(&["TensorListFromTensor"], 7, tensor_list::lower_from_tensor);
        r.register(&["TensorListStack"], 7, tensor_list::lower_stack);
        r.register(
            &["TensorListSetItem", "TensorListReserve", "TensorListResize", "TensorListLength"],
            7,
            pass_through,
        );

        r.register(&["Range"], 7, range::lower_range);
        r.register(&["Range"], 11, pass_through);

        r.register(&["Loop", "Scan"], 7, pass_through);
        r.register(&["Loop", "Scan"], 11, pass_through);
        r
    }

    /// Picks, per op, the handler with the highest version not above `opset`.
    pub fn resolve(&self, opset: u32) -> DispatchTable {
        let mut best: HashMap<&'static str, &Entry> = HashMap::new();
        for e in self.entries.iter().filter(|e| e.since_version <= opset) {
            match best.get(e.op) {
                Some(cur) if cur.since_version >= e.since_version => {}
                _ => {
                    best.insert(e.op, e);
                }
            }
        }
        for (op, e) in &best {
            trace!("opset {}: {} -> since {}", opset, op, e.since_version);
        }
        DispatchTable {
            opset,
            handlers: best.into_iter().map(|(op, e)| (op.to_owned(), (e.since_version, e.handler))).collect(),
        }
    }
}

/// The registry resolved against one target version.
#[derive(Clone)]
pub struct DispatchTable {
    opset: u32,
    handlers: HashMap<String, (u32, Handler)>,
}

impl DispatchTable {
    pub fn opset(&self) -> u32 {
        self.opset
    }

    pub fn get(&self, op: &str) -> Option<Handler> {
        self.handlers.get(op).map(|&(_, h)| h)
    }

    /// `since_version` of the handler chosen for `op`.
    pub fn version_of(&self, op: &str) -> Option<u32> {
        self.handlers.get(op).map(|&(v, _)| v)
    }
}

/// Handler for ops that are consumed by a neighbouring rewrite, or that the
/// target already understands at this version.
pub fn pass_through(_ctx: &mut LowerCtx<'_>, _graph: &mut Graph, _name: &str) -> Result<(), LowerError> {
    Ok(())
}
