//! Text emission for `Graph`.
//!
//! Output format (deterministic, node order, bodies indented under their
//! owner):
//!
//! ```text
//! graph main {
//!   input x: f32[3]
//!
//!   node Loop__7 = Loop(max_trip_count__4, cond__5/out:0, x) -> (Loop__7:0: f32[3])
//!     body body__6 {
//!       input iter__2: i64[]
//!       ...
//!       output cond__5/Less__3:0
//!     }
//!
//!   output Loop__7:0
//! }
//! ```

use std::fmt::Write;

use crate::error::CodegenError;
use crate::ir::graph::Graph;

pub fn emit_graph_text(graph: &Graph) -> Result<String, CodegenError> {
    let mut out = String::new();
    emit(&mut out, graph, "graph", 0).map_err(|e| CodegenError::Format {
        graph: graph.name.clone(),
        detail: e.to_string(),
    })?;
    Ok(out)
}

fn emit(out: &mut String, graph: &Graph, keyword: &str, depth: usize) -> std::fmt::Result {
    let pad = "  ".repeat(depth);
    writeln!(out, "{}{} {} {{", pad, keyword, graph.name)?;

    for input in graph.inputs() {
        writeln!(out, "{}  input {}: {}", pad, input, info_text(graph, input))?;
    }
    if !graph.params().is_empty() {
        writeln!(out, "{}  params ({})", pad, graph.params().join(", "))?;
    }
    if !graph.inputs().is_empty() {
        writeln!(out)?;
    }

    for node in graph.nodes().iter().filter(|n| !n.is_graph_input()) {
        let outs: Vec<String> = node.outputs.iter().map(|o| format!("{}: {}", o, info_text(graph, o))).collect();
        write!(out, "{}  node {} = {}({})", pad, node.name, node.op, node.inputs.join(", "))?;
        if !node.attrs.is_empty() {
            let attrs: Vec<String> = node.attrs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            write!(out, " {{ {} }}", attrs.join(", "))?;
        }
        writeln!(out, " -> ({})", outs.join(", "))?;
        for (slot, body) in &node.bodies {
            emit(out, body, slot, depth + 2)?;
        }
    }

    if !graph.nodes().is_empty() {
        writeln!(out)?;
    }
    for output in graph.outputs() {
        writeln!(out, "{}  output {}", pad, output)?;
    }
    writeln!(out, "{}}}", pad)
}

fn info_text(graph: &Graph, value: &str) -> String {
    graph.info(value).map_or_else(|| "?".to_owned(), |i| i.to_string())
}
