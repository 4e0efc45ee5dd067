//! The build graph: nodes (file-like artifacts) and edges (rule invocations
//! producing outputs from inputs), plus the rules and pools they reference.

use crate::canon;
use crate::concurrent_linked_list::ConcurrentLinkedList;
use crate::densemap::{self, DenseMap};
use crate::eval::{self, EvalString, Vars};
use crate::fs::MTime;
use crate::smallmap::SmallMap;
use anyhow::bail;
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);
impl densemap::Index for NodeId {
    fn index(&self) -> usize {
        self.0 as usize
    }
}
impl From<usize> for NodeId {
    fn from(u: usize) -> NodeId {
        NodeId(u as u32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(u32);
impl densemap::Index for EdgeId {
    fn index(&self) -> usize {
        self.0 as usize
    }
}
impl From<usize> for EdgeId {
    fn from(u: usize) -> EdgeId {
        EdgeId(u as u32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleId(u32);
impl densemap::Index for RuleId {
    fn index(&self) -> usize {
        self.0 as usize
    }
}
impl From<usize> for RuleId {
    fn from(u: usize) -> RuleId {
        RuleId(u as u32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId(u32);
impl densemap::Index for PoolId {
    fn index(&self) -> usize {
        self.0 as usize
    }
}
impl From<usize> for PoolId {
    fn from(u: usize) -> PoolId {
        PoolId(u as u32)
    }
}

/// A named set of variable bindings shared by the edges that invoke it.
/// Binding values are unexpanded; they are evaluated per edge.
pub struct Rule {
    pub name: String,
    pub bindings: SmallMap<String, EvalString<String>>,
}

/// Visit state used by one dependency scan; reset when the scan finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitMark {
    None,
    InStack,
    Done,
}

/// Per-edge facts needed repeatedly during scanning, computed once from the
/// edge's bindings and then immutable.
#[derive(Debug, Clone, Copy)]
pub struct DepScanInfo {
    pub restat: bool,
    pub generator: bool,
    pub deps: bool,
    pub depfile: bool,
    pub phony_output: bool,
    pub command_hash: u64,
}

/// A file-like artifact tracked by the graph.
pub struct Node {
    path: String,
    slash_bits: u64,
    /// On-disk state; None until stat'ed (then cached for the process).
    pub mtime: Option<MTime>,
    /// Scan-scoped stat cache filled by the parallel pre-stat phase.
    pub precomputed_mtime: Option<MTime>,
    pub dirty: bool,
    /// Scan-scoped flag marking the node as collected for precomputation.
    pub precomputed_dirtiness: bool,
    in_edge: Option<EdgeId>,
    /// Edges consuming this node, from the manifest.  May be appended
    /// concurrently; readers snapshot via `get_out_edges`.
    out_edges: ConcurrentLinkedList<EdgeId>,
    /// Extra consumers discovered via depfiles and the deps log.
    pub dep_scan_out_edges: Vec<EdgeId>,
}

impl Node {
    fn new(path: String, slash_bits: u64) -> Self {
        Node {
            path,
            slash_bits,
            mtime: None,
            precomputed_mtime: None,
            dirty: false,
            precomputed_dirtiness: false,
            in_edge: None,
            out_edges: ConcurrentLinkedList::default(),
            dep_scan_out_edges: Vec::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The path as spelled in the manifest, backslashes restored.
    pub fn path_decanonicalized(&self) -> String {
        canon::decanonicalize_path(&self.path, self.slash_bits)
    }

    pub fn in_edge(&self) -> Option<EdgeId> {
        self.in_edge
    }

    /// Whether the file exists on disk.  Only meaningful once the node has
    /// been stat'ed.
    pub fn exists(&self) -> bool {
        matches!(self.mtime, Some(MTime::Stamp(_)))
    }

    pub fn add_out_edge(&self, edge: EdgeId) {
        self.out_edges.prepend(edge);
    }

    /// Snapshot of all consuming edges: manifest out-edges in id order,
    /// then dep-scan-discovered ones in discovery order.
    pub fn get_out_edges(&self) -> Vec<EdgeId> {
        let mut result: Vec<EdgeId> = self.out_edges.iter().copied().collect();
        result.sort();
        result.extend(self.dep_scan_out_edges.iter().copied());
        result
    }
}

/// One rule invocation: a set of inputs producing a set of outputs.
pub struct Edge {
    pub rule: RuleId,
    pub pool: PoolId,
    /// Inputs, in three contiguous regions: explicit, implicit, order-only.
    pub ins: Vec<NodeId>,
    pub implicit_ins: usize,
    pub order_only_ins: usize,
    /// Outputs: explicit then implicit.
    pub outs: Vec<NodeId>,
    pub implicit_outs: usize,
    /// Edge-local bindings; the last binding for a name wins.
    pub bindings: SmallMap<String, EvalString<String>>,
    pub mark: VisitMark,
    /// Scan-scoped flag marking the edge as collected for precomputation.
    pub precomputed_dirtiness: bool,
    pub outputs_ready: bool,
    pub deps_missing: bool,
    pub dep_scan_info: Option<DepScanInfo>,
}

impl Edge {
    fn new(rule: RuleId, pool: PoolId) -> Self {
        Edge {
            rule,
            pool,
            ins: Vec::new(),
            implicit_ins: 0,
            order_only_ins: 0,
            outs: Vec::new(),
            implicit_outs: 0,
            bindings: SmallMap::new(),
            mark: VisitMark::None,
            precomputed_dirtiness: false,
            outputs_ready: false,
            deps_missing: false,
            dep_scan_info: None,
        }
    }

    /// The explicit-region inputs, as expanded by `$in`.
    pub fn explicit_ins(&self) -> &[NodeId] {
        &self.ins[..self.ins.len() - self.implicit_ins - self.order_only_ins]
    }

    /// All inputs whose mtimes influence dirtiness.
    pub fn non_order_only_ins(&self) -> &[NodeId] {
        &self.ins[..self.ins.len() - self.order_only_ins]
    }

    /// The explicit-region outputs, as expanded by `$out`.
    pub fn explicit_outs(&self) -> &[NodeId] {
        &self.outs[..self.outs.len() - self.implicit_outs]
    }

    pub fn is_order_only(&self, input_index: usize) -> bool {
        input_index >= self.ins.len() - self.order_only_ins
    }
}

/// A named concurrency bucket limiting how many of its edges run at once.
/// Depth 0 means unbounded.
pub struct Pool {
    name: String,
    depth: usize,
    current_use: usize,
    delayed: VecDeque<EdgeId>,
}

impl Pool {
    fn new(name: String, depth: usize) -> Self {
        Pool {
            name,
            depth,
            current_use: 0,
            delayed: VecDeque::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn should_delay_edge(&self) -> bool {
        self.depth != 0 && self.current_use >= self.depth
    }

    pub fn delay_edge(&mut self, edge: EdgeId) {
        self.delayed.push_back(edge);
    }

    pub fn edge_scheduled(&mut self) {
        if self.depth != 0 {
            self.current_use += 1;
        }
    }

    pub fn edge_finished(&mut self) {
        if self.depth != 0 {
            self.current_use = self.current_use.saturating_sub(1);
        }
    }

    /// Move delayed edges into the ready set while capacity allows.
    pub fn retrieve_ready_edges(&mut self, ready: &mut HashSet<EdgeId>) {
        while let Some(&edge) = self.delayed.front() {
            if self.should_delay_edge() {
                break;
            }
            self.delayed.pop_front();
            ready.insert(edge);
            self.edge_scheduled();
        }
    }
}

/// The build graph, owning every node, edge, rule, and pool.
pub struct Graph {
    nodes: DenseMap<NodeId, Node>,
    edges: DenseMap<EdgeId, Edge>,
    rules: DenseMap<RuleId, Rule>,
    pools: DenseMap<PoolId, Pool>,
    paths: HashMap<String, NodeId>,
    phony_rule: RuleId,
    default_pool: PoolId,
    console_pool: PoolId,
    /// Manifest-level variable bindings visible to edge evaluation.
    pub scope: Vars,
}

impl Default for Graph {
    fn default() -> Self {
        Graph::new()
    }
}

impl Graph {
    pub fn new() -> Graph {
        let mut rules = DenseMap::new();
        let phony_rule = rules.push(Rule {
            name: "phony".to_string(),
            bindings: SmallMap::new(),
        });
        let mut pools = DenseMap::new();
        let default_pool = pools.push(Pool::new(String::new(), 0));
        let console_pool = pools.push(Pool::new("console".to_string(), 1));
        Graph {
            nodes: DenseMap::new(),
            edges: DenseMap::new(),
            rules,
            pools,
            paths: HashMap::new(),
            phony_rule,
            default_pool,
            console_pool,
            scope: Vars::default(),
        }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes.get(id)
    }
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes.get_mut(id)
    }
    pub fn edge(&self, id: EdgeId) -> &Edge {
        self.edges.get(id)
    }
    pub fn edge_mut(&mut self, id: EdgeId) -> &mut Edge {
        self.edges.get_mut(id)
    }
    pub fn rule(&self, id: RuleId) -> &Rule {
        self.rules.get(id)
    }
    pub fn pool(&self, id: PoolId) -> &Pool {
        self.pools.get(id)
    }
    pub fn pool_mut(&mut self, id: PoolId) -> &mut Pool {
        self.pools.get_mut(id)
    }

    pub fn phony_rule(&self) -> RuleId {
        self.phony_rule
    }
    pub fn default_pool(&self) -> PoolId {
        self.default_pool
    }
    pub fn console_pool(&self) -> PoolId {
        self.console_pool
    }

    pub fn add_rule(&mut self, rule: Rule) -> RuleId {
        self.rules.push(rule)
    }

    pub fn add_pool(&mut self, name: impl Into<String>, depth: usize) -> PoolId {
        self.pools.push(Pool::new(name.into(), depth))
    }

    /// Intern a path, canonicalizing it first.
    pub fn node_id(&mut self, path: impl AsRef<str>) -> NodeId {
        let (path, slash_bits) = canon::canon_path_with_slash_bits(path.as_ref());
        match self.paths.get(&path) {
            Some(&id) => id,
            None => {
                let id = self.nodes.push(Node::new(path.clone(), slash_bits));
                self.paths.insert(path, id);
                id
            }
        }
    }

    /// Look up an already-interned path.
    pub fn lookup(&self, path: &str) -> Option<NodeId> {
        self.paths.get(&canon::canon_path(path)).copied()
    }

    pub fn add_edge(&mut self, rule: RuleId, pool: PoolId) -> EdgeId {
        self.edges.push(Edge::new(rule, pool))
    }

    pub fn add_edge_inputs(
        &mut self,
        edge: EdgeId,
        explicit: &[NodeId],
        implicit: &[NodeId],
        order_only: &[NodeId],
    ) {
        for &id in explicit.iter().chain(implicit).chain(order_only) {
            self.nodes.get(id).add_out_edge(edge);
        }
        let e = self.edges.get_mut(edge);
        e.ins.extend_from_slice(explicit);
        e.ins.extend_from_slice(implicit);
        e.ins.extend_from_slice(order_only);
        e.implicit_ins += implicit.len();
        e.order_only_ins += order_only.len();
    }

    pub fn add_edge_outputs(
        &mut self,
        edge: EdgeId,
        explicit: &[NodeId],
        implicit: &[NodeId],
    ) -> anyhow::Result<()> {
        for &id in explicit.iter().chain(implicit) {
            let node = self.nodes.get_mut(id);
            if node.in_edge.is_some() {
                bail!("multiple rules generate {}", node.path);
            }
            node.in_edge = Some(edge);
        }
        let e = self.edges.get_mut(edge);
        e.outs.extend_from_slice(explicit);
        e.outs.extend_from_slice(implicit);
        e.implicit_outs += implicit.len();
        Ok(())
    }

    /// Give a producer-less node a phony in-edge so downstream logic can
    /// treat all inputs uniformly.  The scan may never visit this edge, so
    /// its outputs are marked ready at creation.
    pub fn add_phony_producer(&mut self, node: NodeId) -> EdgeId {
        let edge = self.add_edge(self.phony_rule, self.default_pool);
        let e = self.edges.get_mut(edge);
        e.outs.push(node);
        e.outputs_ready = true;
        self.nodes.get_mut(node).in_edge = Some(edge);
        edge
    }

    pub fn is_phony(&self, edge: EdgeId) -> bool {
        self.edges.get(edge).rule == self.phony_rule
    }

    pub fn use_console(&self, edge: EdgeId) -> bool {
        self.edges.get(edge).pool == self.console_pool
    }

    /// CMake 2.8.12.x and 3.0.x produced self-referencing phony edges of
    /// the form "build a: phony ... a ...".  Restrict the phony-cycle
    /// diagnostic to the shape they used.
    pub fn maybe_phonycycle_diagnostic(&self, edge: EdgeId) -> bool {
        let e = self.edges.get(edge);
        self.is_phony(edge)
            && e.outs.len() == 1
            && e.implicit_outs == 0
            && e.implicit_ins == 0
            && e.order_only_ins == 0
    }

    pub fn all_inputs_ready(&self, edge: EdgeId) -> bool {
        self.edges.get(edge).ins.iter().all(|&input| {
            match self.nodes.get(input).in_edge {
                Some(in_edge) => self.edges.get(in_edge).outputs_ready,
                None => true,
            }
        })
    }

    /// Cached per-edge scan facts, computing them on first use.
    pub fn dep_scan_info(&mut self, edge: EdgeId) -> anyhow::Result<DepScanInfo> {
        if let Some(info) = self.edges.get(edge).dep_scan_info {
            return Ok(info);
        }
        let info = eval::compute_dep_scan_info(self, edge)?;
        self.edges.get_mut(edge).dep_scan_info = Some(info);
        Ok(info)
    }

    /// Reset the scan-scoped state (visit marks, precompute flags, stat
    /// cache) so a subsequent scan starts fresh.
    pub fn clear_scan_state(&mut self) {
        for node in self.nodes.values_mut() {
            node.precomputed_mtime = None;
            node.precomputed_dirtiness = false;
        }
        for edge in self.edges.values_mut() {
            edge.precomputed_dirtiness = false;
            edge.mark = VisitMark::None;
        }
    }
}
