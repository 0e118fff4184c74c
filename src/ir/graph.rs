//! Computation-graph IR consumed and produced by the lowering routines.
//!
//! A `Graph` is an ordered list of `Node`s. Every node names its inputs and
//! outputs by value identifier (`String`); a value is the sole output slot of
//! exactly one producer. Input placeholders are `Placeholder` nodes listed in
//! `inputs` in a fixed order, which the target's branch and loop contracts
//! depend on.
//!
//! Nested graphs hang off nodes under named body slots (`then_branch`,
//! `else_branch`, `body`). A nested graph may read values of its enclosing
//! graphs (closure access). There is no parent back pointer: code that needs
//! the scope chain walks it explicitly from the root.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use crate::error::GraphError;
use crate::ir::tensor::Tensor;
use crate::ir::types::{DType, Shape, ValueInfo};

pub const THEN_BRANCH: &str = "then_branch";
pub const ELSE_BRANCH: &str = "else_branch";
pub const LOOP_BODY: &str = "body";

/// Op tag of an input placeholder node.
pub const PLACEHOLDER: &str = "Placeholder";

/// Stand-in identifier for a value that has been deliberately deleted.
/// Any remaining reader must already be dead.
pub const POISON: &str = "@@ALLOC";

/// A node attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Attr {
    Int(i64),
    Float(f64),
    Ints(Vec<i64>),
    Str(String),
    DType(DType),
    Tensor(Tensor),
    /// Reference to a named function definition in the `FunctionLibrary`.
    Func(String),
}

impl std::fmt::Display for Attr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Attr::Int(n) => write!(f, "{}", n),
            Attr::Float(v) => write!(f, "{}", v),
            Attr::Ints(v) => write!(f, "{:?}", v),
            Attr::Str(s) => write!(f, "\"{}\"", s),
            Attr::DType(d) => write!(f, "{}", d),
            Attr::Tensor(t) => write!(f, "{}", t),
            Attr::Func(name) => write!(f, "@{}", name),
        }
    }
}

/// A single operation in a graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub op: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub attrs: BTreeMap<String, Attr>,
    /// Nested graphs keyed by body slot.
    pub bodies: BTreeMap<String, Graph>,
}

impl Node {
    pub fn is_graph_input(&self) -> bool {
        self.op == PLACEHOLDER
    }

    pub fn attr(&self, key: &str) -> Option<&Attr> {
        self.attrs.get(key)
    }

    pub fn attr_int(&self, key: &str) -> Option<i64> {
        match self.attrs.get(key) {
            Some(Attr::Int(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn attr_ints(&self, key: &str) -> Option<&[i64]> {
        match self.attrs.get(key) {
            Some(Attr::Ints(v)) => Some(v),
            _ => None,
        }
    }

    pub fn attr_dtype(&self, key: &str) -> Option<DType> {
        match self.attrs.get(key) {
            Some(Attr::DType(d)) => Some(*d),
            _ => None,
        }
    }

    pub fn attr_tensor(&self, key: &str) -> Option<&Tensor> {
        match self.attrs.get(key) {
            Some(Attr::Tensor(t)) => Some(t),
            _ => None,
        }
    }

    /// Name of the function definition referenced by `key`.
    pub fn attr_func(&self, key: &str) -> Option<&str> {
        match self.attrs.get(key) {
            Some(Attr::Func(name)) | Some(Attr::Str(name)) => Some(name),
            _ => None,
        }
    }

    pub fn body(&self, slot: &str) -> Option<&Graph> {
        self.bodies.get(slot)
    }

    fn reads(&self, value: &str) -> bool {
        self.inputs.iter().any(|i| i == value)
    }
}

/// Generates identifiers unique for the lifetime of one lowering sweep.
///
/// Owned by the sweep and threaded explicitly; there is no global counter.
#[derive(Debug, Default)]
pub struct NameGen {
    counter: u64,
}

impl NameGen {
    pub fn new() -> Self {
        Self { counter: 0 }
    }

    pub fn make(&mut self, base: &str) -> String {
        self.counter += 1;
        format!("{}__{}", base, self.counter)
    }
}

/// Conventional identifier for output slot `index` of node `node`.
pub fn port_name(node: &str, index: usize) -> String {
    format!("{}:{}", node, index)
}

/// Describes a node to be created with `Graph::make_node`.
#[derive(Debug, Clone)]
pub struct NodeBuilder {
    op: String,
    inputs: Vec<String>,
    name: Option<String>,
    outputs: Option<Vec<String>>,
    output_count: usize,
    attrs: BTreeMap<String, Attr>,
    dtypes: Vec<DType>,
    shapes: Vec<Option<Shape>>,
}

impl NodeBuilder {
    pub fn new<I, S>(op: &str, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            op: op.to_owned(),
            inputs: inputs.into_iter().map(Into::into).collect(),
            name: None,
            outputs: None,
            output_count: 1,
            attrs: BTreeMap::new(),
            dtypes: Vec::new(),
            shapes: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Explicit output identifiers; overrides `output_count`.
    pub fn outputs(mut self, outputs: Vec<String>) -> Self {
        self.output_count = outputs.len();
        self.outputs = Some(outputs);
        self
    }

    pub fn output_count(mut self, n: usize) -> Self {
        self.output_count = n;
        self
    }

    pub fn attr(mut self, key: &str, value: Attr) -> Self {
        self.attrs.insert(key.to_owned(), value);
        self
    }

    pub fn attrs(mut self, attrs: BTreeMap<String, Attr>) -> Self {
        self.attrs.extend(attrs);
        self
    }

    pub fn dtypes(mut self, dtypes: Vec<DType>) -> Self {
        self.dtypes = dtypes;
        self
    }

    pub fn shapes(mut self, shapes: Vec<Option<Shape>>) -> Self {
        self.shapes = shapes;
        self
    }

    /// Shorthand for a single-output node's metadata.
    pub fn typed(self, dtype: DType, shape: Option<Shape>) -> Self {
        self.dtypes(vec![dtype]).shapes(vec![shape])
    }
}

/// A computation graph: nodes plus ordered input/output contracts.
///
/// Invariants:
/// - Each value identifier has at most one producer in the graph.
/// - `inputs` lists the outputs of `Placeholder` nodes in contract order.
/// - `params` is non-empty only for graphs originating from a function
///   definition; it lists the formal parameters in positional order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Graph {
    pub name: String,
    nodes: Vec<Node>,
    inputs: Vec<String>,
    outputs: Vec<String>,
    value_info: HashMap<String, ValueInfo>,
    params: Vec<String>,
    /// Values consumed by a tensor-array element read.
    tensor_array_reads: BTreeSet<String>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node_names(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.name.clone()).collect()
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.name == name)
    }

    fn node_index(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name == name)
    }

    /// Node producing `value` in this graph (not in enclosing scopes).
    pub fn producer(&self, value: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.outputs.iter().any(|o| o == value))
    }

    pub fn defines(&self, value: &str) -> bool {
        self.producer(value).is_some()
    }

    /// Names of the nodes in this graph that read `value` directly.
    pub fn consumers(&self, value: &str) -> Vec<String> {
        self.nodes.iter().filter(|n| n.reads(value)).map(|n| n.name.clone()).collect()
    }

    /// True if anything still reads `value`: a node of this graph, a graph
    /// output, or a nested body that closes over it.
    pub fn has_consumers(&self, value: &str) -> bool {
        if self.outputs.iter().any(|o| o == value) {
            return true;
        }
        self.nodes.iter().any(|n| {
            n.reads(value) || n.bodies.values().any(|b| !b.defines(value) && b.has_consumers(value))
        })
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn tensor_array_reads(&self) -> &BTreeSet<String> {
        &self.tensor_array_reads
    }

    pub fn mark_tensor_array_read(&mut self, value: impl Into<String>) {
        self.tensor_array_reads.insert(value.into());
    }

    pub fn info(&self, value: &str) -> Option<&ValueInfo> {
        self.value_info.get(value)
    }

    pub fn dtype(&self, value: &str) -> DType {
        self.value_info.get(value).map(|i| i.dtype).unwrap_or(DType::Undefined)
    }

    pub fn shape(&self, value: &str) -> Option<&Shape> {
        self.value_info.get(value).and_then(|i| i.shape.as_ref())
    }

    /// Producer's `Const` payload, if `value` is a literal.
    pub fn const_value(&self, value: &str) -> Option<&Tensor> {
        self.producer(value).filter(|n| n.op == "Const").and_then(|n| n.attr_tensor("value"))
    }

    pub fn is_const(&self, value: &str) -> bool {
        self.const_value(value).is_some()
    }

    // -----------------------------------------------------------------------
    // Metadata mutation
    // -----------------------------------------------------------------------

    pub fn set_dtype(&mut self, value: &str, dtype: DType) {
        self.value_info.entry(value.to_owned()).or_default().dtype = dtype;
    }

    pub fn set_shape(&mut self, value: &str, shape: Option<Shape>) {
        self.value_info.entry(value.to_owned()).or_default().shape = shape;
    }

    pub fn set_info(&mut self, value: &str, info: ValueInfo) {
        self.value_info.insert(value.to_owned(), info);
    }

    pub fn set_outputs(&mut self, outputs: Vec<String>) {
        self.outputs = outputs;
    }

    /// Replaces the ordered input contract. Every entry must name a placeholder.
    pub fn set_inputs(&mut self, inputs: Vec<String>) {
        self.inputs = inputs;
    }

    pub fn set_params(&mut self, params: Vec<String>) {
        self.params = params;
    }

    // -----------------------------------------------------------------------
    // Node creation
    // -----------------------------------------------------------------------

    /// Creates a node and returns its output identifiers.
    pub fn make_node(&mut self, names: &mut NameGen, b: NodeBuilder) -> Result<Vec<String>, GraphError> {
        let name = b.name.unwrap_or_else(|| names.make(&b.op));
        let outputs = b
            .outputs
            .unwrap_or_else(|| (0..b.output_count).map(|i| port_name(&name, i)).collect());
        for (i, out) in outputs.iter().enumerate() {
            let dtype = b.dtypes.get(i).copied().unwrap_or(DType::Undefined);
            let shape = b.shapes.get(i).cloned().flatten();
            if dtype != DType::Undefined || shape.is_some() {
                self.value_info.insert(out.clone(), ValueInfo::new(dtype, shape));
            }
        }
        let node = Node {
            name,
            op: b.op,
            inputs: b.inputs,
            outputs: outputs.clone(),
            attrs: b.attrs,
            bodies: BTreeMap::new(),
        };
        self.add_node(node)?;
        Ok(outputs)
    }

    /// Appends a fully formed node, rejecting duplicate names and producers.
    pub fn add_node(&mut self, node: Node) -> Result<(), GraphError> {
        if self.node(&node.name).is_some() {
            return Err(GraphError::DuplicateNode { graph: self.name.clone(), name: node.name });
        }
        for out in &node.outputs {
            if self.defines(out) {
                return Err(GraphError::DuplicateValue { graph: self.name.clone(), name: out.clone() });
            }
        }
        self.nodes.push(node);
        Ok(())
    }

    /// Creates a `Const` node holding `value` and returns its output.
    pub fn make_const(&mut self, names: &mut NameGen, base: &str, value: Tensor) -> Result<String, GraphError> {
        let dtype = value.dtype();
        let shape = value.shape();
        let name = names.make(base);
        let outs = self.make_node(
            names,
            NodeBuilder::new("Const", Vec::<String>::new())
                .named(name)
                .attr("value", Attr::Tensor(value))
                .typed(dtype, Some(shape)),
        )?;
        Ok(outs[0].clone())
    }

    /// Appends an input placeholder whose output is `value`.
    pub fn add_input(&mut self, value: &str, dtype: DType, shape: Option<Shape>) -> Result<(), GraphError> {
        let node = Node {
            name: value.to_owned(),
            op: PLACEHOLDER.to_owned(),
            inputs: Vec::new(),
            outputs: vec![value.to_owned()],
            attrs: BTreeMap::new(),
            bodies: BTreeMap::new(),
        };
        self.add_node(node)?;
        self.value_info.insert(value.to_owned(), ValueInfo::new(dtype, shape));
        self.inputs.push(value.to_owned());
        Ok(())
    }

    /// Appends a formal parameter (an input placeholder of a function definition).
    pub fn add_param(&mut self, value: &str, dtype: DType, shape: Option<Shape>) -> Result<(), GraphError> {
        self.add_input(value, dtype, shape)?;
        self.params.push(value.to_owned());
        Ok(())
    }

    /// Appends `value` to the output contract, recording its metadata when known.
    pub fn add_output(&mut self, value: &str, dtype: DType, shape: Option<Shape>) {
        if dtype != DType::Undefined {
            self.set_dtype(value, dtype);
        }
        if shape.is_some() {
            self.set_shape(value, shape);
        }
        self.outputs.push(value.to_owned());
    }

    /// Attaches `graph` under `slot` on node `node`.
    pub fn set_body(&mut self, node: &str, slot: &str, graph: Graph) -> Result<(), GraphError> {
        let graph_name = self.name.clone();
        let n = self
            .node_mut(node)
            .ok_or_else(|| GraphError::UnknownNode { graph: graph_name, name: node.to_owned() })?;
        n.bodies.insert(slot.to_owned(), graph);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Surgery
    // -----------------------------------------------------------------------

    /// Removes node `name`; a removed placeholder also leaves the input contract.
    pub fn remove_node(&mut self, name: &str) -> Option<Node> {
        let idx = self.node_index(name)?;
        let node = self.nodes.remove(idx);
        if node.is_graph_input() {
            self.inputs.retain(|i| !node.outputs.contains(i));
        }
        Some(node)
    }

    /// Redirects every read of `old` to `new`: node inputs and graph outputs
    /// here, plus closure reads in nested bodies that do not define `old`
    /// themselves.
    pub fn replace_all_inputs(&mut self, old: &str, new: &str) {
        for node in &mut self.nodes {
            for inp in &mut node.inputs {
                if inp == old {
                    *inp = new.to_owned();
                }
            }
            for body in node.bodies.values_mut() {
                if !body.defines(old) {
                    body.replace_all_inputs(old, new);
                }
            }
        }
        for out in &mut self.outputs {
            if out == old {
                *out = new.to_owned();
            }
        }
    }

    /// Redirects the reads of `old` by node `node` only.
    pub fn replace_input(&mut self, node: &str, old: &str, new: &str) -> Result<(), GraphError> {
        let graph_name = self.name.clone();
        let n = self
            .node_mut(node)
            .ok_or_else(|| GraphError::UnknownNode { graph: graph_name, name: node.to_owned() })?;
        for inp in &mut n.inputs {
            if inp == old {
                *inp = new.to_owned();
            }
        }
        Ok(())
    }

    /// Inserts `op` between input slot `index` of `node` and its producer.
    /// Returns the new node's output.
    pub fn insert_node_on_input(
        &mut self,
        names: &mut NameGen,
        node: &str,
        index: usize,
        op: &str,
        attrs: BTreeMap<String, Attr>,
    ) -> Result<String, GraphError> {
        let source = self
            .node(node)
            .and_then(|n| n.inputs.get(index).cloned())
            .ok_or_else(|| GraphError::UnknownNode { graph: self.name.clone(), name: node.to_owned() })?;
        let outs = self.make_node(names, NodeBuilder::new(op, [source]).attrs(attrs))?;
        if let Some(n) = self.node_mut(node) {
            n.inputs[index] = outs[0].clone();
        }
        Ok(outs[0].clone())
    }

    /// Inserts `op` after `value`: the new node reads `value` and every other
    /// reader (and the output contract) is moved onto the new node's output.
    /// Metadata of `value` is copied to the new output.
    pub fn insert_node_on_output(
        &mut self,
        names: &mut NameGen,
        value: &str,
        op: &str,
        attrs: BTreeMap<String, Attr>,
    ) -> Result<String, GraphError> {
        let info = self.value_info.get(value).cloned();
        let name = names.make(op);
        let new_out = port_name(&name, 0);
        self.replace_all_inputs(value, &new_out);
        self.make_node(
            names,
            NodeBuilder::new(op, [value]).named(name).outputs(vec![new_out.clone()]).attrs(attrs),
        )?;
        if let Some(info) = info {
            self.value_info.insert(new_out.clone(), info);
        }
        Ok(new_out)
    }

    /// Renames a value at its producer and at every reader, moving its metadata.
    pub(crate) fn rename_value(&mut self, old: &str, new: &str) {
        for node in &mut self.nodes {
            for out in &mut node.outputs {
                if out == old {
                    *out = new.to_owned();
                }
            }
        }
        for inp in &mut self.inputs {
            if inp == old {
                *inp = new.to_owned();
            }
        }
        for p in &mut self.params {
            if p == old {
                *p = new.to_owned();
            }
        }
        if self.tensor_array_reads.remove(old) {
            self.tensor_array_reads.insert(new.to_owned());
        }
        if let Some(info) = self.value_info.remove(old) {
            self.value_info.insert(new.to_owned(), info);
        }
        self.replace_all_inputs(old, new);
    }

    /// Moves every node and metadata entry of `other` into `self`.
    pub(crate) fn absorb(&mut self, other: Graph) -> Result<(), GraphError> {
        for (name, info) in other.value_info {
            self.value_info.insert(name, info);
        }
        for node in other.nodes {
            self.add_node(node)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Ordering
    // -----------------------------------------------------------------------

    /// Indices of `nodes` in dependency order. Inputs produced outside this
    /// graph (enclosing scopes) impose no constraint.
    pub fn topo_order(&self) -> Result<Vec<usize>, GraphError> {
        let mut producer_of: HashMap<&str, usize> = HashMap::new();
        for (i, node) in self.nodes.iter().enumerate() {
            for out in &node.outputs {
                producer_of.insert(out.as_str(), i);
            }
        }
        let mut indegree = vec![0usize; self.nodes.len()];
        let mut users: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (i, node) in self.nodes.iter().enumerate() {
            let mut deps: HashSet<usize> = HashSet::new();
            for inp in &node.inputs {
                if let Some(&p) = producer_of.get(inp.as_str()) {
                    deps.insert(p);
                }
            }
            // Closure reads from nested bodies order the owner after the producer.
            for body in node.bodies.values() {
                for v in body.free_values() {
                    if let Some(&p) = producer_of.get(v.as_str()) {
                        deps.insert(p);
                    }
                }
            }
            deps.remove(&i);
            indegree[i] = deps.len();
            for p in deps {
                users[p].push(i);
            }
        }
        let mut queue: VecDeque<usize> = (0..self.nodes.len()).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(i) = queue.pop_front() {
            order.push(i);
            for &u in &users[i] {
                indegree[u] -= 1;
                if indegree[u] == 0 {
                    queue.push_back(u);
                }
            }
        }
        if order.len() != self.nodes.len() {
            let stuck = (0..self.nodes.len()).find(|i| !order.contains(i)).unwrap_or(0);
            return Err(GraphError::Cycle { graph: self.name.clone(), node: self.nodes[stuck].name.clone() });
        }
        Ok(order)
    }

    /// Reorders nodes (and those of every nested body) into dependency order.
    pub fn topological_sort(&mut self) -> Result<(), GraphError> {
        for node in &mut self.nodes {
            for body in node.bodies.values_mut() {
                body.topological_sort()?;
            }
        }
        let order = self.topo_order()?;
        let mut slots: Vec<Option<Node>> = self.nodes.drain(..).map(Some).collect();
        for i in order {
            if let Some(node) = slots[i].take() {
                self.nodes.push(node);
            }
        }
        Ok(())
    }

    /// Values read by this graph (or its nested bodies) but produced nowhere
    /// inside it: its closure reads.
    pub fn free_values(&self) -> BTreeSet<String> {
        let mut free = BTreeSet::new();
        for node in &self.nodes {
            for inp in &node.inputs {
                if !inp.is_empty() && !self.defines(inp) {
                    free.insert(inp.clone());
                }
            }
            for body in node.bodies.values() {
                for v in body.free_values() {
                    if !self.defines(&v) {
                        free.insert(v);
                    }
                }
            }
        }
        for out in &self.outputs {
            if !self.defines(out) {
                free.insert(out.clone());
            }
        }
        free
    }
}
