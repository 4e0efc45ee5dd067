//! The dependency scan: computes, for every node reachable from a set of
//! targets, whether it is dirty, by comparing on-disk mtimes, build-log
//! entries, and command hashes.  Also loads implicit dependencies from
//! depfiles and the deps log as it walks.
//!
//! The scan runs in three phases: collect the transitive closure, pre-stat
//! it in parallel when the disk allows, then a sequential recursive pass
//! that settles dirtiness in topological post-order.

use crate::db::{self, BuildLog, DepsLog};
use crate::depfile;
use crate::eval;
use crate::fs::{DiskInterface, MTime, ReadFile};
use crate::graph::{DepScanInfo, EdgeId, Graph, NodeId, VisitMark};
use crate::scanner::Scanner;
use crate::thread_pool;
use anyhow::{anyhow, bail};
use std::path::Path;
use tracing::debug;

pub struct DependencyScan<'a> {
    pub graph: &'a mut Graph,
    disk: &'a dyn DiskInterface,
    build_log: Option<&'a dyn BuildLog>,
    deps_log: Option<&'a dyn DepsLog>,
}

impl<'a> DependencyScan<'a> {
    pub fn new(
        graph: &'a mut Graph,
        disk: &'a dyn DiskInterface,
        build_log: Option<&'a dyn BuildLog>,
        deps_log: Option<&'a dyn DepsLog>,
    ) -> Self {
        DependencyScan {
            graph,
            disk,
            build_log,
            deps_log,
        }
    }

    /// Mark the dirty state of every node reachable from `initial_nodes`.
    /// Fails on I/O errors, depfile parse errors, and dependency cycles.
    pub fn recompute_nodes_dirty(&mut self, initial_nodes: &[NodeId]) -> anyhow::Result<()> {
        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        for &node in initial_nodes {
            self.collect_precompute_lists(node, &mut nodes, &mut edges);
        }

        let result = self
            .precompute_nodes_dirty(&nodes, &edges)
            .and_then(|()| {
                let mut stack = Vec::new();
                for &node in initial_nodes {
                    stack.clear();
                    self.recompute_node_dirty(node, &mut stack)?;
                }
                Ok(())
            });

        // Visit marks and the pre-stat cache are scoped to this scan; make
        // sure a later scan cannot consume them.
        self.graph.clear_scan_state();

        result
    }

    /// Phase A: gather the transitive closure of nodes and edges, following
    /// manifest inputs and deps-log entries.  Depfiles are not read here;
    /// that would mean parsing them twice.
    fn collect_precompute_lists(
        &mut self,
        node: NodeId,
        nodes: &mut Vec<NodeId>,
        edges: &mut Vec<EdgeId>,
    ) {
        let mut pending = vec![node];
        while let Some(id) = pending.pop() {
            {
                let n = self.graph.node_mut(id);
                if n.precomputed_dirtiness {
                    continue;
                }
                n.precomputed_dirtiness = true;
            }
            nodes.push(id);

            if let Some(edge) = self.graph.node(id).in_edge() {
                if !self.graph.edge(edge).precomputed_dirtiness {
                    self.graph.edge_mut(edge).precomputed_dirtiness = true;
                    edges.push(edge);
                    pending.extend_from_slice(&self.graph.edge(edge).ins);
                }
            }

            if let Some(deps_log) = self.deps_log {
                if let Some(deps) = deps_log.get_deps(id) {
                    pending.extend_from_slice(&deps.nodes);
                }
            }
        }
    }

    /// Phase B: optimize the "null build" case by stat'ing every collected
    /// node and computing every edge's scan info from worker threads.
    /// Workers only read; results are applied here, so each entity is still
    /// written exactly once.
    fn precompute_nodes_dirty(&mut self, nodes: &[NodeId], edges: &[EdgeId]) -> anyhow::Result<()> {
        let workers = std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(1);
        if !self.disk.is_stat_thread_safe() || workers <= 1 {
            return Ok(());
        }

        let graph: &Graph = self.graph;
        let disk = self.disk;
        let stats = thread_pool::parallel_map(workers, nodes, |&id| {
            let node = graph.node(id);
            // Symlinks that name generated outputs must not be dereferenced.
            if node.in_edge().is_some() {
                disk.lstat(node.path()).map(|(mtime, _)| mtime)
            } else {
                disk.stat(node.path())
            }
        });
        let infos = thread_pool::parallel_map(workers, edges, |&id| {
            eval::compute_dep_scan_info(graph, id)
        });

        let mut first_err = None;
        for (&id, stat) in nodes.iter().zip(stats) {
            match stat {
                Ok(mtime) => self.graph.node_mut(id).precomputed_mtime = Some(mtime),
                Err(err) => {
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
            }
        }
        for (&id, info) in edges.iter().zip(infos) {
            match info {
                Ok(info) => self.graph.edge_mut(id).dep_scan_info = Some(info),
                Err(err) => {
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Phase C: the main recursive pass over one node and (transitively)
    /// everything its producing edge consumes.
    fn recompute_node_dirty(
        &mut self,
        node: NodeId,
        stack: &mut Vec<NodeId>,
    ) -> anyhow::Result<()> {
        let edge = match self.graph.node(node).in_edge() {
            None => {
                // If we already visited this leaf node then we are done.
                if self.graph.node(node).mtime.is_some() {
                    return Ok(());
                }
                // This node has no in-edge; it is dirty if it is missing.
                self.stat_if_necessary(node)?;
                let exists = self.graph.node(node).exists();
                if !exists {
                    debug!("{} has no in-edge and is missing", self.graph.node(node).path());
                }
                self.graph.node_mut(node).dirty = !exists;
                return Ok(());
            }
            Some(edge) => edge,
        };

        // If we already finished this edge then we are done.
        if self.graph.edge(edge).mark == VisitMark::Done {
            return Ok(());
        }

        // If we encountered this edge earlier in the call stack we have a
        // cycle.
        self.verify_dag(node, stack)?;

        // Mark the edge temporarily while in the call stack.
        self.graph.edge_mut(edge).mark = VisitMark::InStack;
        stack.push(node);

        let mut dirty = false;
        {
            let e = self.graph.edge_mut(edge);
            e.outputs_ready = true;
            e.deps_missing = false;
        }

        // Load output mtimes so we can compare them to the most recent
        // input below.
        for output in self.graph.edge(edge).outs.clone() {
            self.stat_if_necessary(output)?;
        }

        if !self.load_deps(edge)? {
            // Failed to load dependency info: rebuild to regenerate it.
            dirty = true;
            self.graph.edge_mut(edge).deps_missing = true;
        }

        // Visit all inputs (including just-discovered implicit deps); we're
        // dirty if any of the inputs are dirty.
        let mut most_recent_input: Option<NodeId> = None;
        let ins = self.graph.edge(edge).ins.clone();
        for (index, &input) in ins.iter().enumerate() {
            self.recompute_node_dirty(input, stack)?;

            // If an input is not ready, neither are our outputs.
            if let Some(in_edge) = self.graph.node(input).in_edge() {
                if !self.graph.edge(in_edge).outputs_ready {
                    self.graph.edge_mut(edge).outputs_ready = false;
                }
            }

            if !self.graph.edge(edge).is_order_only(index) {
                // If a regular input is dirty (or missing), we're dirty.
                // Otherwise consider mtime.
                if self.graph.node(input).dirty {
                    debug!("{} is dirty", self.graph.node(input).path());
                    dirty = true;
                } else {
                    let newer = match most_recent_input {
                        None => true,
                        Some(prev) => self.node_mtime(input) > self.node_mtime(prev),
                    };
                    if newer {
                        most_recent_input = Some(input);
                    }
                }
            }
        }

        // We may also be dirty due to output state: missing outputs, out of
        // date outputs, etc.
        if !dirty {
            dirty = self.recompute_outputs_dirty(edge, most_recent_input)?;
        }

        // Settle the dirty state of each output.
        for output in self.graph.edge(edge).outs.clone() {
            self.graph.node_mut(output).dirty = dirty;
        }

        // If an edge is dirty, its outputs are normally not ready.  (It's
        // possible to be clean but still not be ready in the presence of
        // order-only inputs.)  But phony edges with no inputs have nothing
        // to do, so are always ready.
        if dirty && !(self.graph.is_phony(edge) && self.graph.edge(edge).ins.is_empty()) {
            self.graph.edge_mut(edge).outputs_ready = false;
        }

        // Mark the edge as finished during this walk now that it will no
        // longer be in the call stack.
        self.graph.edge_mut(edge).mark = VisitMark::Done;
        debug_assert_eq!(stack.last(), Some(&node));
        stack.pop();

        Ok(())
    }

    /// Report a dependency cycle found when `node`'s producing edge is
    /// already on the visit stack.
    fn verify_dag(&mut self, node: NodeId, stack: &mut [NodeId]) -> anyhow::Result<()> {
        let edge = self
            .graph
            .node(node)
            .in_edge()
            .expect("verify_dag requires a produced node");

        // No temporary mark on the edge means no cycle yet.
        if self.graph.edge(edge).mark != VisitMark::InStack {
            return Ok(());
        }

        // We have this edge earlier in the call stack.  Find it.
        let start = stack
            .iter()
            .position(|&n| self.graph.node(n).in_edge() == Some(edge))
            .expect("edge marked in-stack but not found on stack");

        // Make the cycle clear by reporting its start as the node at its
        // end instead of some other output of the starting edge.  For
        // example, a cycle entered at `b` of "build a b: cat c / build c:
        // cat a" should report a -> c -> a instead of b -> c -> a.
        stack[start] = node;

        let mut err = "dependency cycle: ".to_string();
        for &n in &stack[start..] {
            err.push_str(self.graph.node(n).path());
            err.push_str(" -> ");
        }
        err.push_str(self.graph.node(stack[start]).path());

        if start + 1 == stack.len() && self.graph.maybe_phonycycle_diagnostic(edge) {
            // The manifest parser would have filtered out the
            // self-referencing input if it were not configured to allow it.
            err.push_str(" [-w phonycycle=err]");
        }

        bail!(err);
    }

    /// Decide whether any output of `edge` is out of date with respect to
    /// `most_recent_input`, the build log, and the command hash.
    pub fn recompute_outputs_dirty(
        &mut self,
        edge: EdgeId,
        most_recent_input: Option<NodeId>,
    ) -> anyhow::Result<bool> {
        let info = self.graph.dep_scan_info(edge)?;
        for index in 0..self.graph.edge(edge).outs.len() {
            let output = self.graph.edge(edge).outs[index];
            if self.recompute_output_dirty(edge, most_recent_input, info, output) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn recompute_output_dirty(
        &self,
        edge: EdgeId,
        most_recent_input: Option<NodeId>,
        info: DepScanInfo,
        output: NodeId,
    ) -> bool {
        let out_path = self.graph.node(output).path();

        if self.graph.is_phony(edge) {
            // Phony edges don't write any output.  Outputs are only dirty
            // if there are no inputs and we're missing the output.
            if self.graph.edge(edge).ins.is_empty() && !self.graph.node(output).exists() {
                debug!("output {} of phony edge with no inputs doesn't exist", out_path);
                return true;
            }
            return false;
        }

        // Dirty if we're missing the output.
        if !self.graph.node(output).exists() {
            debug!("output {} doesn't exist", out_path);
            return true;
        }

        let mut entry = None;

        // Dirty if the output is older than the input.
        if let Some(input) = most_recent_input {
            let input_mtime = self.node_mtime(input);
            let mut output_mtime = self.node_mtime(output);
            if output_mtime < input_mtime {
                // If this is a restat rule, we may have cleaned the output
                // in a previous run and stored the most recent input mtime
                // in the build log.  Use that mtime instead, so that the
                // output is only considered dirty if an input was modified
                // since the previous run.
                let mut used_restat = false;
                if info.restat {
                    if let Some(log) = self.build_log {
                        if let Some(log_entry) = log.lookup(db::hash_path(out_path)) {
                            output_mtime = log_entry.mtime;
                            used_restat = true;
                            entry = Some(*log_entry);
                        }
                    }
                }
                if output_mtime < input_mtime {
                    debug!(
                        "{}output {} older than most recent input {} ({:?} vs {:?})",
                        if used_restat { "restat of " } else { "" },
                        out_path,
                        self.graph.node(input).path(),
                        output_mtime,
                        input_mtime
                    );
                    return true;
                }
            }
        }

        if let Some(log) = self.build_log {
            if entry.is_none() {
                entry = log.lookup(db::hash_path(out_path)).copied();
            }
            if let Some(log_entry) = entry {
                if !info.generator && info.command_hash != log_entry.command_hash {
                    // May also be dirty due to the command changing since
                    // the last build.  But for generator rules the command
                    // changing does not make us dirty.
                    debug!("command line changed for {}", out_path);
                    return true;
                }
                if let Some(input) = most_recent_input {
                    if log_entry.mtime < self.node_mtime(input) {
                        // The recorded mtime can be older than the on-disk
                        // mtime if a previous run wrote the output but was
                        // interrupted before recording success.
                        debug!(
                            "recorded mtime of {} older than most recent input {}",
                            out_path,
                            self.graph.node(input).path()
                        );
                        return true;
                    }
                }
            } else if !info.generator {
                debug!("command line not found in log for {}", out_path);
                return true;
            }
        }

        false
    }

    /// Augment the edge's input list with implicit dependencies from its
    /// depfile or the deps log.  `Ok(false)` means the info is missing and
    /// the edge must rebuild; real errors surface as `Err`.
    fn load_deps(&mut self, edge: EdgeId) -> anyhow::Result<bool> {
        let info = self.graph.dep_scan_info(edge)?;
        if info.deps {
            return self.load_deps_from_log(edge);
        }
        if info.depfile {
            let path = eval::get_unescaped_binding(self.graph, edge, "depfile")?;
            return self.load_depfile(edge, &path);
        }
        // No deps to load.
        Ok(true)
    }

    fn load_deps_from_log(&mut self, edge: EdgeId) -> anyhow::Result<bool> {
        // Deps are only supported for single-target edges.
        let output = self.graph.edge(edge).outs[0];
        let deps = match self.deps_log.and_then(|log| log.get_deps(output)) {
            Some(deps) => deps,
            None => {
                debug!("deps for '{}' are missing", self.graph.node(output).path());
                return Ok(false);
            }
        };

        // Deps are invalid if the output is newer than the deps.
        if self.node_mtime(output) > deps.mtime {
            debug!(
                "stored deps info out of date for '{}'",
                self.graph.node(output).path()
            );
            return Ok(false);
        }

        self.insert_implicit_deps(edge, &deps.nodes);
        Ok(true)
    }

    fn load_depfile(&mut self, edge: EdgeId, path: &str) -> anyhow::Result<bool> {
        let mut content = match self.disk.read_file(path) {
            ReadFile::Okay(content) => content,
            ReadFile::NotFound => {
                debug!("depfile '{}' is missing", path);
                return Ok(false);
            }
            ReadFile::Err(err) => return Err(err.context(format!("loading '{}'", path))),
        };
        if content.is_empty() {
            debug!("depfile '{}' is missing", path);
            return Ok(false);
        }
        content.push(0);

        let mut scanner = Scanner::new(&content);
        let parsed = depfile::parse(&mut scanner)
            .map_err(|err| anyhow!(scanner.format_parse_error(Path::new(path), err)))?;

        // The depfile must name the edge's first output; anything else is
        // treated as missing deps so the edge rebuilds.
        let target = crate::canon::canon_path(parsed.target);
        let first_output = self.graph.edge(edge).outs[0];
        if self.graph.node(first_output).path() != target {
            debug!(
                "expected depfile '{}' to mention '{}', got '{}'",
                path,
                self.graph.node(first_output).path(),
                target
            );
            return Ok(false);
        }

        let nodes: Vec<NodeId> = parsed
            .deps
            .iter()
            .map(|dep| self.graph.node_id(dep))
            .collect();
        self.insert_implicit_deps(edge, &nodes);
        Ok(true)
    }

    /// Splice discovered dependencies in before the order-only region,
    /// register the edge for future scans, and synthesize phony producers
    /// for discovered leaves.
    fn insert_implicit_deps(&mut self, edge: EdgeId, nodes: &[NodeId]) {
        {
            let e = self.graph.edge_mut(edge);
            let at = e.ins.len() - e.order_only_ins;
            e.ins.splice(at..at, nodes.iter().copied());
            e.implicit_ins += nodes.len();
        }
        for &node in nodes {
            self.graph.node_mut(node).dep_scan_out_edges.push(edge);
            if self.graph.node(node).in_edge().is_none() {
                self.graph.add_phony_producer(node);
            }
        }
    }

    /// Ensure the node's mtime is known, preferring the parallel pre-stat
    /// result when one exists.
    fn stat_if_necessary(&mut self, node: NodeId) -> anyhow::Result<()> {
        if self.graph.node(node).mtime.is_some() {
            return Ok(());
        }
        let mtime = match self.graph.node(node).precomputed_mtime {
            Some(mtime) => mtime,
            None => {
                let n = self.graph.node(node);
                if n.in_edge().is_some() {
                    self.disk.lstat(n.path())?.0
                } else {
                    self.disk.stat(n.path())?
                }
            }
        };
        self.graph.node_mut(node).mtime = Some(mtime);
        Ok(())
    }

    fn node_mtime(&self, node: NodeId) -> MTime {
        self.graph.node(node).mtime.unwrap_or(MTime::Missing)
    }
}
