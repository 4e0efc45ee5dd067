//! Build runner: tracks which edges are wanted and ready (`Plan`), then
//! drives ready edges through a `CommandRunner` to completion (`Builder`),
//! reconciling restat rules, recording logs, and honoring the failure
//! budget.

use crate::clparser;
use crate::db::{self, BuildLog, DepsLog};
use crate::depfile;
use crate::eval;
use crate::fs::{DiskInterface, MTime, ReadFile};
use crate::graph::{EdgeId, Graph, NodeId};
use crate::scan::DependencyScan;
use crate::scanner::Scanner;
use anyhow::{anyhow, bail};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use tracing::warn;

/// Tunables for a build, mirroring what the embedder's front end exposes.
pub struct BuildConfig {
    /// Number of command failures tolerated before the build stops
    /// starting new work.
    pub failures_allowed: usize,
    /// Pretend to run commands; skips the post-command stat phase entirely,
    /// so restat demotion never happens in a dry run.
    pub dry_run: bool,
    /// Delete existing outputs before running a (non-restat) edge.
    pub pre_remove_output_files: bool,
    /// The manifest declares phony outputs explicitly; enables strictness
    /// warnings about outputs that commands did not actually write.
    pub uses_phony_outputs: bool,
    pub missing_output_file_should_err: bool,
    pub old_output_should_err: bool,
    pub output_directory_should_err: bool,
    pub missing_depfile_should_err: bool,
    /// Keep rspfiles / depfiles around after successful runs (debugging).
    pub keep_rspfile: bool,
    pub keep_depfile: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            failures_allowed: 1,
            dry_run: false,
            pre_remove_output_files: false,
            uses_phony_outputs: false,
            missing_output_file_should_err: false,
            old_output_should_err: false,
            output_directory_should_err: false,
            missing_depfile_should_err: false,
            keep_rspfile: false,
            keep_depfile: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Failure,
    Interrupted,
}

/// The result of running one command, as reported by the runner.
pub struct CommandResult {
    pub edge: EdgeId,
    pub status: ExitStatus,
    /// Captured stdout+stderr.
    pub output: Vec<u8>,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.status == ExitStatus::Success
    }
}

/// Interface to subprocess execution.  The builder hands over the fully
/// expanded command line; spawning, output capture, and console handling
/// are the runner's business.
pub trait CommandRunner {
    fn can_run_more(&self) -> bool;
    fn start_command(&mut self, edge: EdgeId, cmdline: String) -> bool;
    /// Block until any started command finishes.  None means the wait was
    /// interrupted.
    fn wait_for_command(&mut self) -> Option<CommandResult>;
    fn active_edges(&self) -> Vec<EdgeId>;
    fn abort(&mut self);
}

/// A CommandRunner that doesn't actually run the commands.
#[derive(Default)]
pub struct DryRunCommandRunner {
    finished: VecDeque<EdgeId>,
}

impl CommandRunner for DryRunCommandRunner {
    fn can_run_more(&self) -> bool {
        true
    }

    fn start_command(&mut self, edge: EdgeId, _cmdline: String) -> bool {
        self.finished.push_back(edge);
        true
    }

    fn wait_for_command(&mut self) -> Option<CommandResult> {
        let edge = self.finished.pop_front()?;
        Some(CommandResult {
            edge,
            status: ExitStatus::Success,
            output: Vec::new(),
        })
    }

    fn active_edges(&self) -> Vec<EdgeId> {
        Vec::new()
    }

    fn abort(&mut self) {}
}

/// How much of an edge the plan wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Want {
    /// Reachable but clean; tracked only so dependents can be found.
    Nothing,
    /// Dirty but not yet ready to run.
    ToStart,
    /// Enqueued in the ready set or running.
    ToFinish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeResult {
    Failed,
    Succeeded,
}

/// Plan tracks the wanted and ready sets as the build advances, enforcing
/// pool capacities as edges are scheduled.
pub struct Plan {
    want: HashMap<EdgeId, Want>,
    ready: HashSet<EdgeId>,
    wanted_edges: usize,
    command_edges: usize,
}

impl Default for Plan {
    fn default() -> Self {
        Plan::new()
    }
}

impl Plan {
    pub fn new() -> Self {
        Plan {
            want: HashMap::new(),
            ready: HashSet::new(),
            wanted_edges: 0,
            command_edges: 0,
        }
    }

    /// Pull `node` and everything it transitively needs into the plan.
    /// Ok(false) means the target was already up to date.
    pub fn add_target(&mut self, graph: &mut Graph, node: NodeId) -> anyhow::Result<bool> {
        self.add_sub_target(graph, node, None)
    }

    fn add_sub_target(
        &mut self,
        graph: &mut Graph,
        node: NodeId,
        dependent: Option<NodeId>,
    ) -> anyhow::Result<bool> {
        let edge = match graph.node(node).in_edge() {
            None => {
                // Leaf node: a dirty leaf has no way to get built.
                if graph.node(node).dirty {
                    let referenced = match dependent {
                        Some(d) => format!(", needed by '{}',", graph.node(d).path()),
                        None => String::new(),
                    };
                    bail!(
                        "'{}'{} missing and no known rule to make it",
                        graph.node(node).path(),
                        referenced
                    );
                }
                return Ok(false);
            }
            Some(edge) => edge,
        };

        if graph.edge(edge).outputs_ready {
            return Ok(false); // Don't need to do anything.
        }

        // Track the edge even when we don't want to run it, so completion
        // of its inputs can propagate through it.
        let first_visit = !self.want.contains_key(&edge);
        if first_visit {
            self.want.insert(edge, Want::Nothing);
        }

        if graph.node(node).dirty && self.want[&edge] == Want::Nothing {
            self.want.insert(edge, Want::ToStart);
            self.wanted_edges += 1;
            if graph.all_inputs_ready(edge) {
                self.schedule_work(graph, edge);
            }
            if !graph.is_phony(edge) {
                self.command_edges += 1;
            }
        }

        if !first_visit {
            return Ok(true); // We've already processed the inputs.
        }

        for input in graph.edge(edge).ins.clone() {
            self.add_sub_target(graph, input, Some(node))?;
        }
        Ok(true)
    }

    /// Any edge from the ready set; callers must not assume an order.
    pub fn find_work(&mut self) -> Option<EdgeId> {
        let &edge = self.ready.iter().next()?;
        self.ready.remove(&edge);
        Some(edge)
    }

    pub fn more_to_do(&self) -> bool {
        self.wanted_edges > 0 && self.command_edges > 0
    }

    pub fn wanted_edges(&self) -> usize {
        self.wanted_edges
    }

    pub fn command_edges(&self) -> usize {
        self.command_edges
    }

    fn schedule_work(&mut self, graph: &mut Graph, edge: EdgeId) {
        let want = self
            .want
            .get_mut(&edge)
            .expect("scheduling an edge the plan does not want");
        if *want == Want::ToFinish {
            // This edge was already scheduled.  We can get here again if an
            // edge and one of its dependencies share an order-only input,
            // or if a node duplicates an out edge.
            return;
        }
        debug_assert_eq!(*want, Want::ToStart);
        *want = Want::ToFinish;

        let pool_id = graph.edge(edge).pool;
        let pool = graph.pool_mut(pool_id);
        if pool.should_delay_edge() {
            pool.delay_edge(edge);
            pool.retrieve_ready_edges(&mut self.ready);
        } else {
            pool.edge_scheduled();
            self.ready.insert(edge);
        }
    }

    /// Record completion of an edge, releasing its pool slot and, on
    /// success, propagating readiness to dependents.
    pub fn edge_finished(&mut self, graph: &mut Graph, edge: EdgeId, result: EdgeResult) {
        let want = *self
            .want
            .get(&edge)
            .expect("finished an edge the plan does not know");
        let directly_wanted = want != Want::Nothing;

        // See if this job frees up any delayed jobs.
        let pool_id = graph.edge(edge).pool;
        let pool = graph.pool_mut(pool_id);
        if directly_wanted {
            pool.edge_finished();
        }
        pool.retrieve_ready_edges(&mut self.ready);

        // The rest only applies to successful commands.
        if result != EdgeResult::Succeeded {
            return;
        }

        if directly_wanted {
            self.wanted_edges -= 1;
        }
        self.want.remove(&edge);
        graph.edge_mut(edge).outputs_ready = true;

        // Check off any nodes we were waiting for with this edge.
        for output in graph.edge(edge).outs.clone() {
            self.node_finished(graph, output);
        }
    }

    fn node_finished(&mut self, graph: &mut Graph, node: NodeId) {
        // See if we want any edges from this node.
        for out_edge in graph.node(node).get_out_edges() {
            let want = match self.want.get(&out_edge) {
                Some(&want) => want,
                None => continue,
            };
            if !graph.all_inputs_ready(out_edge) {
                continue;
            }
            if want != Want::Nothing {
                self.schedule_work(graph, out_edge);
            } else {
                // We do not need to build this edge, but we might need to
                // build one of its dependents.
                self.edge_finished(graph, out_edge, EdgeResult::Succeeded);
            }
        }
    }

    /// A restat rule left `node` unchanged: propagate the clean state
    /// through the graph, demoting edges whose only dirtiness came from it.
    pub fn clean_node(&mut self, scan: &mut DependencyScan, node: NodeId) -> anyhow::Result<()> {
        scan.graph.node_mut(node).dirty = false;

        for out_edge in scan.graph.node(node).get_out_edges() {
            // Don't process edges we don't actually want.
            match self.want.get(&out_edge) {
                Some(&want) if want != Want::Nothing => {}
                _ => continue,
            }

            // Don't attempt to clean an edge if it failed to load deps.
            if scan.graph.edge(out_edge).deps_missing {
                continue;
            }

            // No need to clean a phony-output edge; it's always dirty.
            if scan.graph.dep_scan_info(out_edge)?.phony_output {
                continue;
            }

            // If all non-order-only inputs for this edge are now clean, we
            // might have changed the dirty state of the outputs.
            let inputs = scan.graph.edge(out_edge).non_order_only_ins().to_vec();
            if inputs.iter().any(|&input| scan.graph.node(input).dirty) {
                continue;
            }

            // Recompute most_recent_input.
            let mut most_recent_input: Option<NodeId> = None;
            for &input in &inputs {
                let newer = match most_recent_input {
                    None => true,
                    Some(prev) => {
                        scan.graph.node(input).mtime.unwrap_or(MTime::Missing)
                            > scan.graph.node(prev).mtime.unwrap_or(MTime::Missing)
                    }
                };
                if newer {
                    most_recent_input = Some(input);
                }
            }

            // If the edge isn't dirty, clean the outputs and mark the edge
            // as not wanted.
            if !scan.recompute_outputs_dirty(out_edge, most_recent_input)? {
                for output in scan.graph.edge(out_edge).outs.clone() {
                    self.clean_node(scan, output)?;
                }
                self.want.insert(out_edge, Want::Nothing);
                self.wanted_edges -= 1;
                if !scan.graph.is_phony(out_edge) {
                    self.command_edges -= 1;
                }
            }
        }
        Ok(())
    }
}

/// Drives the build: populates the plan from targets, then interleaves
/// "start as many edges as allowed" with "wait for one to finish".
pub struct Builder<'a> {
    graph: &'a mut Graph,
    disk: &'a dyn DiskInterface,
    build_log: Option<&'a mut dyn BuildLog>,
    deps_log: Option<&'a mut dyn DepsLog>,
    config: BuildConfig,
    plan: Plan,
}

impl<'a> Builder<'a> {
    pub fn new(
        graph: &'a mut Graph,
        disk: &'a dyn DiskInterface,
        build_log: Option<&'a mut dyn BuildLog>,
        deps_log: Option<&'a mut dyn DepsLog>,
        config: BuildConfig,
    ) -> Self {
        Builder {
            graph,
            disk,
            build_log,
            deps_log,
            config,
            plan: Plan::new(),
        }
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Scan the targets' closure for dirtiness, then populate the plan.
    pub fn add_targets(&mut self, nodes: &[NodeId]) -> anyhow::Result<()> {
        {
            let mut scan = DependencyScan::new(
                self.graph,
                self.disk,
                self.build_log.as_deref(),
                self.deps_log.as_deref(),
            );
            scan.recompute_nodes_dirty(nodes)?;
        }
        for &node in nodes {
            // Ok(false) here means the target is already up to date.
            self.plan.add_target(self.graph, node)?;
        }
        Ok(())
    }

    pub fn already_up_to_date(&self) -> bool {
        !self.plan.more_to_do()
    }

    /// Run the build until done or stuck.  Returns the number of commands
    /// handed to the runner.
    pub fn build(&mut self, runner: &mut dyn CommandRunner) -> anyhow::Result<usize> {
        let mut pending_commands = 0usize;
        let mut failures_allowed = self.config.failures_allowed;
        let mut commands_ran = 0usize;

        while self.plan.more_to_do() {
            // See if we can start any more commands.
            if failures_allowed > 0 && runner.can_run_more() {
                if let Some(edge) = self.plan.find_work() {
                    if let Err(err) = self.start_edge(edge, runner) {
                        self.cleanup(runner);
                        return Err(err);
                    }
                    if self.graph.is_phony(edge) {
                        self.plan
                            .edge_finished(self.graph, edge, EdgeResult::Succeeded);
                    } else {
                        pending_commands += 1;
                        commands_ran += 1;
                    }
                    // We made some progress; go back to the main loop.
                    continue;
                }
            }

            // See if we can reap any finished commands.
            if pending_commands > 0 {
                let mut result = match runner.wait_for_command() {
                    None => {
                        self.cleanup(runner);
                        bail!("interrupted by user");
                    }
                    Some(result) if result.status == ExitStatus::Interrupted => {
                        self.cleanup(runner);
                        bail!("interrupted by user");
                    }
                    Some(result) => result,
                };

                pending_commands -= 1;
                if let Err(err) = self.finish_command(&mut result) {
                    self.cleanup(runner);
                    return Err(err);
                }

                if !result.success() && failures_allowed > 0 {
                    failures_allowed -= 1;
                }

                // We made some progress; start the main loop over.
                continue;
            }

            // If we get here, we cannot make any more progress.
            if failures_allowed == 0 {
                if self.config.failures_allowed > 1 {
                    bail!("subcommands failed");
                }
                bail!("subcommand failed");
            } else if failures_allowed < self.config.failures_allowed {
                bail!("cannot make progress due to previous errors");
            } else {
                bail!("stuck [this is a bug]");
            }
        }

        Ok(commands_ran)
    }

    fn start_edge(&mut self, edge: EdgeId, runner: &mut dyn CommandRunner) -> anyhow::Result<()> {
        if self.graph.is_phony(edge) {
            return Ok(());
        }

        let info = self.graph.dep_scan_info(edge)?;
        if !info.phony_output {
            for output in self.graph.edge(edge).outs.clone() {
                // Create directories necessary for outputs.
                let path = self.graph.node(output).path().to_string();
                self.disk.make_dirs(&path)?;

                if !self.graph.node(output).exists() {
                    continue;
                }
                // Remove existing outputs for non-restat rules.
                if self.config.pre_remove_output_files && !info.restat && !self.config.dry_run {
                    self.disk.remove_file(&path)?;
                }
            }
        }

        // Create the response file, if needed.
        let rspfile = eval::get_unescaped_binding(self.graph, edge, "rspfile")?;
        if !rspfile.is_empty() {
            let content = eval::get_binding(self.graph, edge, "rspfile_content")?;
            self.disk.write_file(&rspfile, content.as_bytes())?;
        }

        let cmdline = eval::evaluate_command(self.graph, edge, false)?;
        if !runner.start_command(edge, cmdline.clone()) {
            bail!("command '{}' failed.", cmdline);
        }
        Ok(())
    }

    /// Reconcile a finished command with the graph: extract deps, restat
    /// outputs, propagate restat cleanliness, inform the plan, and record
    /// the logs.
    fn finish_command(&mut self, result: &mut CommandResult) -> anyhow::Result<()> {
        let edge = result.edge;
        let info = self.graph.dep_scan_info(edge)?;
        let phony_output = info.phony_output;
        let deps_type = eval::get_binding(self.graph, edge, "deps")?;

        // Extract dependencies from the result first: it filters the
        // command output (we want /showIncludes lines gone even on compile
        // failure) and extraction failure fails an otherwise-successful
        // command.
        let mut deps_nodes = Vec::new();
        if !phony_output && !deps_type.is_empty() {
            match self.extract_deps(result, &deps_type) {
                Ok(nodes) => deps_nodes = nodes,
                Err(err) => {
                    if result.success() {
                        if !result.output.is_empty() {
                            result.output.push(b'\n');
                        }
                        result.output.extend_from_slice(err.to_string().as_bytes());
                        result.status = ExitStatus::Failure;
                    }
                }
            }
        }

        // Restat the edge outputs.
        let mut record_mtime = MTime::Missing;
        if result.success() && !self.config.dry_run && !phony_output {
            let restat = info.restat;
            let mut nodes_cleaned = Vec::new();

            let mut newest_input = MTime::Missing;
            let mut newest_input_node = None;
            for &input in self.graph.edge(edge).non_order_only_ins() {
                let input_mtime = self.graph.node(input).mtime.unwrap_or(MTime::Missing);
                if input_mtime > newest_input {
                    newest_input = input_mtime;
                    newest_input_node = Some(input);
                }
            }

            for output in self.graph.edge(edge).outs.clone() {
                let old_mtime = self.graph.node(output).mtime.unwrap_or(MTime::Missing);
                let path = self.graph.node(output).path().to_string();
                let (new_mtime, is_dir) = self.disk.lstat(&path)?;
                self.graph.node_mut(output).mtime = Some(new_mtime);

                if self.config.uses_phony_outputs {
                    if new_mtime == MTime::Missing {
                        append_output_line(
                            result,
                            &format!("output file missing after successful execution: {}", path),
                        );
                        if self.config.missing_output_file_should_err {
                            result.status = ExitStatus::Failure;
                        }
                    } else if !restat && new_mtime < newest_input {
                        let input_path = newest_input_node
                            .map(|n| self.graph.node(n).path().to_string())
                            .unwrap_or_default();
                        append_output_line(
                            result,
                            &format!(
                                "missing `restat`? an output file is older than the most recent input:\n output: {}\n  input: {}",
                                path, input_path
                            ),
                        );
                        if self.config.old_output_should_err {
                            result.status = ExitStatus::Failure;
                        }
                    }
                    if is_dir {
                        append_output_line(
                            result,
                            &format!("outputs should be files, not directories: {}", path),
                        );
                        if self.config.output_directory_should_err {
                            result.status = ExitStatus::Failure;
                        }
                    }
                }

                if new_mtime > record_mtime {
                    record_mtime = new_mtime;
                }
                if old_mtime == new_mtime && restat {
                    // The command did not change this output; its dirtiness
                    // can be re-examined.  (This also covers outputs that
                    // are still nonexistent.)
                    nodes_cleaned.push(output);
                }
            }

            if result.success() && !nodes_cleaned.is_empty() {
                {
                    let mut scan = DependencyScan::new(
                        self.graph,
                        self.disk,
                        self.build_log.as_deref(),
                        self.deps_log.as_deref(),
                    );
                    for &output in &nodes_cleaned {
                        self.plan.clean_node(&mut scan, output)?;
                    }
                }

                // Record the most recent input mtime (or the depfile's,
                // when a depfile is used without the deps log) so the next
                // scan compares inputs against the moment we validated the
                // outputs.
                let mut restat_mtime = newest_input;
                let depfile = eval::get_unescaped_binding(self.graph, edge, "depfile")?;
                if restat_mtime != MTime::Missing && deps_type.is_empty() && !depfile.is_empty() {
                    let depfile_mtime = self.disk.stat(&depfile)?;
                    if depfile_mtime > restat_mtime {
                        restat_mtime = depfile_mtime;
                    }
                }
                record_mtime = restat_mtime;
            }
        }

        self.plan.edge_finished(
            self.graph,
            edge,
            if result.success() {
                EdgeResult::Succeeded
            } else {
                EdgeResult::Failed
            },
        );

        // The rest of this function only applies to successful commands.
        if !result.success() {
            return Ok(());
        }

        // Delete any leftover response file.
        let rspfile = eval::get_unescaped_binding(self.graph, edge, "rspfile")?;
        if !rspfile.is_empty() && !self.config.keep_rspfile {
            let _ = self.disk.remove_file(&rspfile);
        }

        if !phony_output {
            if let Some(log) = &mut self.build_log {
                for &output in &self.graph.edge(edge).outs {
                    let path_hash = db::hash_path(self.graph.node(output).path());
                    log.record(path_hash, info.command_hash, record_mtime);
                }
            }
        }

        if !deps_type.is_empty() && !self.config.dry_run && !phony_output {
            let output = self.graph.edge(edge).outs[0];
            let path = self.graph.node(output).path().to_string();
            let (deps_mtime, _) = self.disk.lstat(&path)?;
            if let Some(log) = &mut self.deps_log {
                log.record_deps(output, deps_mtime, deps_nodes);
            }
        }

        Ok(())
    }

    /// Pull implicit dependencies out of a finished command: the filtered
    /// /showIncludes output for msvc, or the written depfile for gcc.
    fn extract_deps(
        &mut self,
        result: &mut CommandResult,
        deps_type: &str,
    ) -> anyhow::Result<Vec<NodeId>> {
        match deps_type {
            "msvc" => {
                let prefix = eval::get_binding(self.graph, result.edge, "msvc_deps_prefix")?;
                let (filtered, includes) = clparser::parse(&result.output, &prefix);
                result.output = filtered;
                Ok(includes
                    .iter()
                    .map(|path| self.graph.node_id(path))
                    .collect())
            }
            "gcc" => {
                let depfile = eval::get_unescaped_binding(self.graph, result.edge, "depfile")?;
                if depfile.is_empty() {
                    bail!("edge with deps=gcc but no depfile makes no sense");
                }

                let mut content = match self.disk.read_file(&depfile) {
                    ReadFile::Okay(content) => content,
                    ReadFile::NotFound => {
                        // Only interesting when the tool claimed success.
                        if !self.config.dry_run && result.status == ExitStatus::Success {
                            if self.config.missing_depfile_should_err {
                                bail!("depfile is missing");
                            }
                            let output = self.graph.edge(result.edge).outs[0];
                            warn!(
                                "depfile is missing ({} for {})",
                                depfile,
                                self.graph.node(output).path()
                            );
                        }
                        return Ok(Vec::new());
                    }
                    ReadFile::Err(err) => return Err(err),
                };
                if content.is_empty() {
                    return Ok(Vec::new());
                }
                content.push(0);

                let mut scanner = Scanner::new(&content);
                let parsed = depfile::parse(&mut scanner)
                    .map_err(|err| anyhow!(scanner.format_parse_error(Path::new(&depfile), err)))?;
                let nodes = parsed
                    .deps
                    .iter()
                    .map(|dep| self.graph.node_id(dep))
                    .collect();

                if !self.config.keep_depfile {
                    self.disk
                        .remove_file(&depfile)
                        .map_err(|err| anyhow!("deleting depfile: {}", err))?;
                }
                Ok(nodes)
            }
            _ => bail!("unknown deps type '{}'", deps_type),
        }
    }

    /// Abort active work and delete outputs a killed command may have
    /// half-written: anything whose mtime changed, or unconditionally when
    /// the edge declares a depfile (the compiler may have touched the
    /// depfile but not the output yet).
    fn cleanup(&mut self, runner: &mut dyn CommandRunner) {
        let active = runner.active_edges();
        runner.abort();

        for edge in active {
            if matches!(self.graph.edge(edge).dep_scan_info, Some(info) if info.phony_output) {
                continue;
            }
            let depfile =
                eval::get_unescaped_binding(self.graph, edge, "depfile").unwrap_or_default();
            for output in self.graph.edge(edge).outs.clone() {
                let path = self.graph.node(output).path().to_string();
                match self.disk.lstat(&path) {
                    Err(err) => {
                        // Log and skip deletion; better to leave a suspect
                        // output than to delete on bad information.
                        warn!("{}", err);
                    }
                    Ok((new_mtime, is_dir)) => {
                        let old_mtime = self.graph.node(output).mtime.unwrap_or(MTime::Missing);
                        if !is_dir && (!depfile.is_empty() || old_mtime != new_mtime) {
                            let _ = self.disk.remove_file(&path);
                        }
                    }
                }
            }
            if !depfile.is_empty() {
                let _ = self.disk.remove_file(&depfile);
            }
        }
    }
}

fn append_output_line(result: &mut CommandResult, line: &str) {
    if !result.output.is_empty() {
        result.output.push(b'\n');
    }
    result.output.extend_from_slice(line.as_bytes());
}
