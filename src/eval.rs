//! Represents strings with embedded variable references, e.g.
//! `c++ $in -o $out`, and the machinery for expanding them in the context of
//! an edge: special `$in`/`$out` names, edge-local bindings, rule bindings
//! (with recursion-cycle detection), and the enclosing scope.

use crate::db;
use crate::graph::{DepScanInfo, Edge, EdgeId, Graph, NodeId};
use anyhow::bail;
use std::borrow::Cow;
use std::collections::HashMap;

/// An environment providing a mapping of variable name to variable value.
pub trait Env {
    fn get_var(&self, var: &str) -> Option<Cow<str>>;
}

/// One token within an EvalString, either literal text or a variable
/// reference.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalPart<T: AsRef<str>> {
    Literal(T),
    VarRef(T),
}

/// A parsed but unexpanded variable-reference string, e.g. "cc $in -o $out".
#[derive(Debug, Clone, PartialEq)]
pub struct EvalString<T: AsRef<str>>(Vec<EvalPart<T>>);

impl<T: AsRef<str>> EvalString<T> {
    pub fn new(parts: Vec<EvalPart<T>>) -> Self {
        EvalString(parts)
    }

    pub fn parts(&self) -> &[EvalPart<T>] {
        &self.0
    }

    /// Expand with the first environment that knows each variable; unknown
    /// variables expand to nothing.
    pub fn evaluate(&self, envs: &[&dyn Env]) -> String {
        let mut val = String::new();
        for part in &self.0 {
            match part {
                EvalPart::Literal(s) => val.push_str(s.as_ref()),
                EvalPart::VarRef(v) => {
                    for env in envs {
                        if let Some(v) = env.get_var(v.as_ref()) {
                            val.push_str(&v);
                            break;
                        }
                    }
                }
            }
        }
        val
    }
}

impl EvalString<String> {
    /// Parse template text into parts: `$name`, `${name}`, and the escapes
    /// `$$`, `$ `, `$:`, `$<newline>`.
    pub fn parse(text: &str) -> anyhow::Result<EvalString<String>> {
        let mut parts: Vec<EvalPart<String>> = Vec::new();
        let mut literal = String::new();
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '$' {
                literal.push(c);
                continue;
            }
            match chars.next() {
                Some(c @ ('$' | ' ' | ':')) => literal.push(c),
                Some('\n') => {
                    while chars.peek() == Some(&' ') {
                        chars.next();
                    }
                }
                Some('{') => {
                    if !literal.is_empty() {
                        parts.push(EvalPart::Literal(std::mem::take(&mut literal)));
                    }
                    let mut var = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => var.push(c),
                            None => bail!("unterminated ${{ in {:?}", text),
                        }
                    }
                    parts.push(EvalPart::VarRef(var));
                }
                Some(c) if c.is_ascii_alphanumeric() || c == '_' || c == '-' => {
                    if !literal.is_empty() {
                        parts.push(EvalPart::Literal(std::mem::take(&mut literal)));
                    }
                    let mut var = String::new();
                    var.push(c);
                    while let Some(&c) = chars.peek() {
                        if !(c.is_ascii_alphanumeric() || c == '_' || c == '-') {
                            break;
                        }
                        var.push(c);
                        chars.next();
                    }
                    parts.push(EvalPart::VarRef(var));
                }
                Some(c) => bail!("bad $-escape {:?} in {:?}", c, text),
                None => bail!("unexpected $ at end of {:?}", text),
            }
        }
        if !literal.is_empty() {
            parts.push(EvalPart::Literal(literal));
        }
        Ok(EvalString(parts))
    }
}

/// A single scope's worth of variable definitions.
#[derive(Debug, Default)]
pub struct Vars(HashMap<String, String>);

impl Vars {
    pub fn insert(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.0.insert(key.into(), val.into());
    }
    pub fn get(&self, key: &str) -> Option<&String> {
        self.0.get(key)
    }
}

impl Env for Vars {
    fn get_var(&self, var: &str) -> Option<Cow<str>> {
        self.0.get(var).map(|s| Cow::Borrowed(s.as_str()))
    }
}

/// Whether expanded paths should be quoted for the shell.  Operational
/// strings (`command`) want escaping; raw paths (`depfile`, `rspfile`) must
/// not be escaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeKind {
    ShellEscape,
    DoNotEscape,
}

/// Total budget of rule-variable expansions per top-level evaluation; a
/// manifest nesting deeper than this is assumed to be cyclic.
const EVAL_RECURSION_LIMIT: usize = 16;

/// Expansion of variables in the context of one edge.  Rule-binding
/// references recurse through the full resolution order, with a ring of
/// visited names to reject cycles.
pub struct EdgeEval<'a> {
    graph: &'a Graph,
    edge: &'a Edge,
    escape: EscapeKind,
    recursion_vars: [&'a str; EVAL_RECURSION_LIMIT],
    recursion_count: usize,
}

impl<'a> EdgeEval<'a> {
    pub fn new(graph: &'a Graph, edge: EdgeId, escape: EscapeKind) -> Self {
        EdgeEval {
            graph,
            edge: graph.edge(edge),
            escape,
            recursion_vars: [""; EVAL_RECURSION_LIMIT],
            recursion_count: 0,
        }
    }

    /// Resolve one variable and append its expansion to `out`.  Unknown
    /// variables expand to nothing, matching manifest semantics.
    pub fn evaluate_variable(&mut self, out: &mut String, var: &'a str) -> anyhow::Result<()> {
        if var == "in" || var == "in_newline" {
            let sep = if var == "in" { ' ' } else { '\n' };
            self.append_path_list(out, self.edge.explicit_ins(), sep);
            return Ok(());
        }
        if var == "out" {
            self.append_path_list(out, self.edge.explicit_outs(), ' ');
            return Ok(());
        }

        // Edge-local bindings shadow the rule; they are evaluated against
        // the enclosing scope only, so they cannot recurse.
        if let Some(binding) = self.edge.bindings.get(var) {
            out.push_str(&binding.evaluate(&[&self.graph.scope]));
            return Ok(());
        }

        if let Some(binding) = self.graph.rule(self.edge.rule).bindings.get(var) {
            if self.recursion_count == EVAL_RECURSION_LIMIT {
                let mut cycle = self.recursion_vars[0].to_string();
                for i in 1..EVAL_RECURSION_LIMIT {
                    cycle.push_str(" -> ");
                    cycle.push_str(self.recursion_vars[i]);
                    if self.recursion_vars[i] == self.recursion_vars[0] {
                        break;
                    }
                }
                bail!("cycle in rule variables: {}", cycle);
            }
            self.recursion_vars[self.recursion_count] = var;
            self.recursion_count += 1;

            for part in binding.parts() {
                match part {
                    EvalPart::Literal(s) => out.push_str(s.as_ref()),
                    EvalPart::VarRef(v) => self.evaluate_variable(out, v.as_str())?,
                }
            }
            return Ok(());
        }

        // Fall back to the edge's enclosing scope.
        if let Some(value) = self.graph.scope.get(var) {
            out.push_str(value);
        }
        Ok(())
    }

    fn append_path_list(&self, out: &mut String, ids: &[NodeId], sep: char) {
        for (i, &id) in ids.iter().enumerate() {
            if i > 0 {
                out.push(sep);
            }
            let path = self.graph.node(id).path_decanonicalized();
            match self.escape {
                EscapeKind::ShellEscape => append_escaped(out, &path),
                EscapeKind::DoNotEscape => out.push_str(&path),
            }
        }
    }
}

fn append_escaped(out: &mut String, path: &str) {
    if cfg!(windows) {
        get_win32_escaped(path, out);
    } else {
        get_shell_escaped(path, out);
    }
}

fn get_shell_escaped(input: &str, out: &mut String) {
    fn safe(c: char) -> bool {
        c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-' | '.' | '/')
    }
    if input.chars().all(safe) {
        out.push_str(input);
        return;
    }
    out.push('\'');
    for c in input.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
}

fn get_win32_escaped(input: &str, out: &mut String) {
    if !input.contains(' ') && !input.contains('"') {
        out.push_str(input);
        return;
    }
    out.push('"');
    let mut backslashes = 0;
    for c in input.chars() {
        match c {
            '\\' => {
                backslashes += 1;
                out.push(c);
            }
            '"' => {
                // Backslashes before a quote must be doubled, and the quote
                // itself escaped.
                out.extend(std::iter::repeat('\\').take(backslashes + 1));
                out.push('"');
                backslashes = 0;
            }
            _ => {
                backslashes = 0;
                out.push(c);
            }
        }
    }
    out.extend(std::iter::repeat('\\').take(backslashes));
    out.push('"');
}

/// Expand one binding in the context of an edge, shell-escaping paths.
pub fn get_binding<'a>(graph: &'a Graph, edge: EdgeId, var: &'a str) -> anyhow::Result<String> {
    let mut value = String::new();
    EdgeEval::new(graph, edge, EscapeKind::ShellEscape).evaluate_variable(&mut value, var)?;
    Ok(value)
}

/// Expand one binding without escaping, for values used as raw paths
/// (depfile and rspfile names).
pub fn get_unescaped_binding<'a>(
    graph: &'a Graph,
    edge: EdgeId,
    var: &'a str,
) -> anyhow::Result<String> {
    let mut value = String::new();
    EdgeEval::new(graph, edge, EscapeKind::DoNotEscape).evaluate_variable(&mut value, var)?;
    Ok(value)
}

/// Expand the edge's command line.  With `incl_rsp_file`, non-empty rspfile
/// content is appended behind a `;rspfile=` marker so that rspfile changes
/// invalidate the command hash too.
pub fn evaluate_command(graph: &Graph, edge: EdgeId, incl_rsp_file: bool) -> anyhow::Result<String> {
    let mut command = String::new();
    EdgeEval::new(graph, edge, EscapeKind::ShellEscape).evaluate_variable(&mut command, "command")?;
    if incl_rsp_file {
        let mut rspfile_content = String::new();
        EdgeEval::new(graph, edge, EscapeKind::ShellEscape)
            .evaluate_variable(&mut rspfile_content, "rspfile_content")?;
        if !rspfile_content.is_empty() {
            command.push_str(";rspfile=");
            command.push_str(&rspfile_content);
        }
    }
    Ok(command)
}

/// Evaluate the boolean bindings and command hash the scanner needs per
/// edge.  The result is cached on the edge and immutable from then on.
pub fn compute_dep_scan_info(graph: &Graph, edge: EdgeId) -> anyhow::Result<DepScanInfo> {
    let bool_binding = |var: &'static str, escape: EscapeKind| -> anyhow::Result<bool> {
        let mut value = String::new();
        EdgeEval::new(graph, edge, escape).evaluate_variable(&mut value, var)?;
        Ok(!value.is_empty())
    };
    Ok(DepScanInfo {
        restat: bool_binding("restat", EscapeKind::ShellEscape)?,
        generator: bool_binding("generator", EscapeKind::ShellEscape)?,
        deps: bool_binding("deps", EscapeKind::ShellEscape)?,
        depfile: bool_binding("depfile", EscapeKind::DoNotEscape)?,
        phony_output: bool_binding("phony_output", EscapeKind::ShellEscape)?,
        command_hash: db::hash_command(&evaluate_command(graph, edge, true)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Rule;
    use crate::smallmap::SmallMap;

    fn graph_with_rule(bindings: &[(&str, &str)]) -> (Graph, EdgeId) {
        let mut g = Graph::new();
        let mut rule_bindings = SmallMap::new();
        for (k, v) in bindings {
            rule_bindings.insert(k.to_string(), EvalString::parse(v).unwrap());
        }
        let rule = g.add_rule(Rule {
            name: "cc".to_string(),
            bindings: rule_bindings,
        });
        let pool = g.default_pool();
        let edge = g.add_edge(rule, pool);
        let src = g.node_id("src.c");
        let hdr = g.node_id("src.h");
        let out = g.node_id("src.o");
        g.add_edge_inputs(edge, &[src], &[hdr], &[]);
        g.add_edge_outputs(edge, &[out], &[]).unwrap();
        (g, edge)
    }

    #[test]
    fn parse_template() {
        let es = EvalString::parse("cc $in -o ${out}$:x$$y").unwrap();
        assert_eq!(
            es.parts(),
            &[
                EvalPart::Literal("cc ".to_string()),
                EvalPart::VarRef("in".to_string()),
                EvalPart::Literal(" -o ".to_string()),
                EvalPart::VarRef("out".to_string()),
                EvalPart::Literal(":x$y".to_string()),
            ]
        );
        assert!(EvalString::parse("bad $(x)").is_err());
        assert!(EvalString::parse("trailing $").is_err());
    }

    #[test]
    fn expands_in_and_out() {
        let (g, edge) = graph_with_rule(&[("command", "cc $in -o $out")]);
        // $in covers only the explicit region; src.h is implicit.
        assert_eq!(evaluate_command(&g, edge, false).unwrap(), "cc src.c -o src.o");
    }

    #[test]
    fn in_newline_separator() {
        let mut g = Graph::new();
        let rule = g.add_rule(Rule {
            name: "cat".to_string(),
            bindings: SmallMap::from([(
                "command".to_string(),
                EvalString::parse("cat $in_newline").unwrap(),
            )]),
        });
        let pool = g.default_pool();
        let edge = g.add_edge(rule, pool);
        let a = g.node_id("a.txt");
        let b = g.node_id("b.txt");
        let out = g.node_id("out.txt");
        g.add_edge_inputs(edge, &[a, b], &[], &[]);
        g.add_edge_outputs(edge, &[out], &[]).unwrap();
        assert_eq!(evaluate_command(&g, edge, false).unwrap(), "cat a.txt\nb.txt");
    }

    #[test]
    fn edge_binding_shadows_rule_and_uses_scope() {
        let (mut g, edge) = graph_with_rule(&[("command", "cc $flags $in -o $out"), ("flags", "-O0")]);
        g.scope.insert("warn", "-Wall");
        g.edge_mut(edge)
            .bindings
            .insert("flags".to_string(), EvalString::parse("$warn -O2").unwrap());
        assert_eq!(
            evaluate_command(&g, edge, false).unwrap(),
            "cc -Wall -O2 src.c -o src.o"
        );
    }

    #[test]
    fn scope_fallback() {
        let (mut g, edge) = graph_with_rule(&[("command", "cc $cflags $in")]);
        g.scope.insert("cflags", "-g");
        assert_eq!(evaluate_command(&g, edge, false).unwrap(), "cc -g src.c");
    }

    #[test]
    fn rspfile_content_in_command_hash() {
        let (mut g, edge) = graph_with_rule(&[("command", "link @rsp"), ("rspfile_content", "$in")]);
        assert_eq!(
            evaluate_command(&g, edge, true).unwrap(),
            "link @rsp;rspfile=src.c"
        );
        // Without rsp content the marker is omitted.
        let rule2 = g.add_rule(Rule {
            name: "link".to_string(),
            bindings: SmallMap::from([(
                "command".to_string(),
                EvalString::parse("link @rsp").unwrap(),
            )]),
        });
        let pool = g.default_pool();
        let e2 = g.add_edge(rule2, pool);
        assert_eq!(evaluate_command(&g, e2, true).unwrap(), "link @rsp");
    }

    #[test]
    fn rule_variable_cycle() {
        let (g, edge) = graph_with_rule(&[("command", "$a"), ("a", "$b"), ("b", "$a")]);
        let err = evaluate_command(&g, edge, false).unwrap_err().to_string();
        assert!(
            err.starts_with("cycle in rule variables: command -> a -> b -> a"),
            "got {:?}",
            err
        );
    }

    #[test]
    fn shell_escaping() {
        let mut out = String::new();
        get_shell_escaped("no_escape+needed-1.0/x", &mut out);
        assert_eq!(out, "no_escape+needed-1.0/x");

        let mut out = String::new();
        get_shell_escaped("space file", &mut out);
        assert_eq!(out, "'space file'");

        let mut out = String::new();
        get_shell_escaped("it's", &mut out);
        assert_eq!(out, "'it'\\''s'");
    }

    #[test]
    fn win32_escaping() {
        let mut out = String::new();
        get_win32_escaped("plain\\path", &mut out);
        assert_eq!(out, "plain\\path");

        let mut out = String::new();
        get_win32_escaped("space file", &mut out);
        assert_eq!(out, "\"space file\"");

        let mut out = String::new();
        get_win32_escaped("a\\ \"b\"", &mut out);
        assert_eq!(out, "\"a\\ \\\"b\\\"\"");
    }
}
