//! The workflow dependency graph.
//!
//! Every declaration, call, and section of a typechecked workflow gets a
//! stable node id (`decl-x`, `call-t`, `scatter-2`, prefixed by enclosing
//! section ids). Each section synthesizes one gather node per inner binding,
//! exposing it to outer scopes under its lifted type; references from outside
//! a section collapse onto the gather. The workflow output block is an
//! implicit final section of ordinary declaration nodes.

use crate::ast::{Call, Decl, Expr, Workflow, WorkflowElement};
use crate::env::Bindings;
use crate::error::{Error, SourceLoc, TypeIssue};
use indexmap::IndexMap;
use std::collections::BTreeSet;

/// How a gather lifts its inner value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatherLift {
    /// Scatter: `T` becomes `Array[T]` (index-ordered).
    Array,
    /// Conditional: `T` becomes `T?`.
    Optional,
}

/// One resolved reference from a node to a dependency.
#[derive(Debug, Clone)]
pub struct NodeRef {
    /// The dotted name as written in the expression (`t.n`, `x`).
    pub name: String,
    /// The node satisfying it (a decl, call, gather, or scatter section).
    pub node: String,
    /// Member path to project after unwrapping `lifts` (e.g. `["n"]` when a
    /// call output is reached through its call or gather node).
    pub member_path: Vec<String>,
    /// Lift layers applied by the gathers between referee and reference.
    pub lifts: Vec<GatherLift>,
    /// The dependency is a scatter variable (its per-element value lives one
    /// path component deeper than the section node).
    pub scatter_var: bool,
}

/// Node payload.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Decl(Decl),
    Call(Call),
    Scatter {
        variable: String,
        collection: Expr,
        body: Vec<String>,
    },
    Conditional {
        condition: Expr,
        body: Vec<String>,
    },
    Gather {
        section: String,
        inner: String,
        lift: GatherLift,
    },
    /// A workflow output declaration (implicit final section).
    Output(Decl),
}

/// A graph node.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    pub refs: Vec<NodeRef>,
    pub deps: BTreeSet<String>,
    /// Immediately enclosing section id.
    pub section: Option<String>,
    /// Number of enclosing scatter sections.
    pub scatter_depth: u32,
    /// Document order, for deterministic scheduling.
    pub order: u32,
}

/// The dependency graph of one workflow.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: IndexMap<String, Node>,
    /// Top-level visible bindings after the whole body (name -> node id).
    pub bindings: Vec<(String, String)>,
    /// Whether the workflow has an explicit output block.
    pub has_output_block: bool,
}

impl Graph {
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn dependencies(&self, id: &str) -> BTreeSet<String> {
        self.nodes
            .get(id)
            .map(|n| n.deps.clone())
            .unwrap_or_default()
    }

    pub fn section_of(&self, id: &str) -> Option<&str> {
        self.nodes.get(id).and_then(|n| n.section.as_deref())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Verify acyclicity (data-flow plus `after` edges).
    pub fn check_acyclic(&self, loc: &SourceLoc) -> Result<(), Error> {
        // Kahn's algorithm: repeatedly retire nodes whose dependencies are
        // all retired.
        let mut remaining: IndexMap<&str, BTreeSet<&str>> = IndexMap::new();
        for node in self.nodes.values() {
            remaining.insert(
                node.id.as_str(),
                node.deps
                    .iter()
                    .filter(|d| self.nodes.contains_key(*d))
                    .map(String::as_str)
                    .collect(),
            );
        }
        loop {
            let ready: Vec<&str> = remaining
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(id, _)| *id)
                .collect();
            if ready.is_empty() {
                break;
            }
            for id in ready {
                remaining.shift_remove(id);
                for deps in remaining.values_mut() {
                    deps.remove(id);
                }
            }
        }
        if remaining.is_empty() {
            Ok(())
        } else {
            let stuck = remaining.keys().next().copied().unwrap_or("<unknown>");
            Err(Error::static_issue(
                loc.clone(),
                TypeIssue::CircularDefinition,
                format!("circular dependencies involving {}", stuck),
            ))
        }
    }
}

/// A binding visible during graph construction.
#[derive(Debug, Clone)]
struct Visible {
    node: String,
    /// Lift layers between the binding's definition and this scope.
    lifts: Vec<GatherLift>,
    scatter_var: bool,
    /// The binding is a call namespace (member access reaches outputs).
    is_call: bool,
}

struct Builder {
    nodes: IndexMap<String, Node>,
    order: u32,
}

/// Build the dependency graph of a typechecked workflow.
pub fn build(workflow: &Workflow) -> Result<Graph, Error> {
    let mut builder = Builder {
        nodes: IndexMap::new(),
        order: 0,
    };

    let mut env: Bindings<Visible> = Bindings::new();

    // Workflow inputs are top-level declaration nodes.
    for decl in &workflow.inputs {
        let id = format!("decl-{}", decl.name);
        let refs = builder.resolve_refs(decl_refs(decl), &env);
        builder.insert(
            id.clone(),
            NodeKind::Decl(decl.clone()),
            refs,
            None,
            0,
            &[],
        );
        env = env.bind(
            decl.name.clone(),
            Visible {
                node: id,
                lifts: vec![],
                scatter_var: false,
                is_call: false,
            },
        );
    }

    builder.walk(&workflow.body, &mut env, "", None, 0, &[])?;

    // Implicit final section: the output block.
    if let Some(outputs) = &workflow.outputs {
        for decl in outputs {
            let id = format!("output-{}", decl.name);
            let refs = builder.resolve_refs(decl_refs(decl), &env);
            builder.insert(
                id,
                NodeKind::Output(decl.clone()),
                refs,
                None,
                0,
                &[],
            );
        }
    }

    let bindings = env
        .iter()
        .map(|b| (b.name().to_string(), b.value().node.clone()))
        .collect();

    let graph = Graph {
        nodes: builder.nodes,
        bindings,
        has_output_block: workflow.outputs.is_some(),
    };
    graph.check_acyclic(&workflow.loc)?;
    Ok(graph)
}

fn decl_refs(decl: &Decl) -> Vec<String> {
    let mut refs = Vec::new();
    if let Some(expr) = &decl.expr {
        expr.references(&mut refs);
    }
    refs
}

impl Builder {
    fn insert(
        &mut self,
        id: String,
        kind: NodeKind,
        refs: Vec<NodeRef>,
        section: Option<&str>,
        scatter_depth: u32,
        extra_deps: &[String],
    ) {
        let mut deps: BTreeSet<String> = refs.iter().map(|r| r.node.clone()).collect();
        deps.extend(extra_deps.iter().cloned());
        let node = Node {
            id: id.clone(),
            kind,
            refs,
            deps,
            section: section.map(str::to_string),
            scatter_depth,
            order: self.order,
        };
        self.order += 1;
        self.nodes.insert(id, node);
    }

    /// Resolve dotted references against the visible bindings.
    fn resolve_refs(&self, names: Vec<String>, env: &Bindings<Visible>) -> Vec<NodeRef> {
        let mut out: Vec<NodeRef> = Vec::new();
        for name in names {
            let parts: Vec<&str> = name.split('.').collect();
            let first = parts[0];
            if let Some(visible) = env.resolve(first) {
                let member_path: Vec<String> = if visible.is_call {
                    parts[1..].iter().map(|s| s.to_string()).collect()
                } else {
                    // Member access into structs/pairs needs no graph-level
                    // projection; the whole value is the dependency.
                    vec![]
                };
                let reference = NodeRef {
                    name: if visible.is_call {
                        name.clone()
                    } else {
                        first.to_string()
                    },
                    node: visible.node.clone(),
                    member_path,
                    lifts: visible.lifts.clone(),
                    scatter_var: visible.scatter_var,
                };
                if !out
                    .iter()
                    .any(|r| r.name == reference.name && r.node == reference.node)
                {
                    out.push(reference);
                }
            }
        }
        out
    }

    /// Walk one body scope. New visible bindings are added to `env`.
    #[allow(clippy::too_many_arguments)]
    fn walk(
        &mut self,
        body: &[WorkflowElement],
        env: &mut Bindings<Visible>,
        prefix: &str,
        section: Option<&str>,
        depth: u32,
        gate: &[String],
    ) -> Result<Vec<String>, Error> {
        // Hoist call namespaces so forward references resolve.
        let mut hoist_env = env.clone();
        self.hoist(body, prefix, &mut hoist_env, &[]);

        let mut body_ids = Vec::new();

        for (index, element) in body.iter().enumerate() {
            match element {
                WorkflowElement::Decl(decl) => {
                    let id = format!("{}decl-{}", prefix, decl.name);
                    let refs = self.resolve_refs(decl_refs(decl), &hoist_env);
                    self.insert(id.clone(), NodeKind::Decl(decl.clone()), refs, section, depth, gate);
                    let visible = Visible {
                        node: id.clone(),
                        lifts: vec![],
                        scatter_var: false,
                        is_call: false,
                    };
                    hoist_env = hoist_env.bind(decl.name.clone(), visible.clone());
                    *env = env.bind(decl.name.clone(), visible);
                    body_ids.push(id);
                }
                WorkflowElement::Call(call) => {
                    let id = format!("{}call-{}", prefix, call.name());
                    let mut names = Vec::new();
                    for (_, expr) in &call.inputs {
                        expr.references(&mut names);
                    }
                    names.extend(call.afters.iter().cloned());
                    let refs = self.resolve_refs(names, &hoist_env);
                    self.insert(id.clone(), NodeKind::Call(call.clone()), refs, section, depth, gate);
                    let visible = Visible {
                        node: id.clone(),
                        lifts: vec![],
                        scatter_var: false,
                        is_call: true,
                    };
                    hoist_env = hoist_env.bind(call.name().to_string(), visible.clone());
                    *env = env.bind(call.name().to_string(), visible);
                    body_ids.push(id);
                }
                WorkflowElement::Scatter(scatter) => {
                    let sid = format!("{}scatter-{}", prefix, index);
                    let mut names = Vec::new();
                    scatter.collection.references(&mut names);
                    let refs = self.resolve_refs(names, &hoist_env);
                    self.insert(
                        sid.clone(),
                        NodeKind::Scatter {
                            variable: scatter.variable.clone(),
                            collection: scatter.collection.clone(),
                            body: vec![],
                        },
                        refs,
                        section,
                        depth,
                        gate,
                    );

                    let mut inner_env = hoist_env.bind(
                        scatter.variable.clone(),
                        Visible {
                            node: sid.clone(),
                            lifts: vec![],
                            scatter_var: true,
                            is_call: false,
                        },
                    );
                    let inner_prefix = format!("{}/", sid);
                    let inner_gate = vec![sid.clone()];
                    let inner_ids = self.walk(
                        &scatter.body,
                        &mut inner_env,
                        &inner_prefix,
                        Some(&sid),
                        depth + 1,
                        &inner_gate,
                    )?;

                    if let Some(NodeKind::Scatter { body, .. }) =
                        self.nodes.get_mut(&sid).map(|n| &mut n.kind)
                    {
                        *body = inner_ids.clone();
                    }

                    self.emit_gathers(
                        &sid,
                        GatherLift::Array,
                        &inner_env,
                        &hoist_env,
                        env,
                        section,
                        depth,
                    );
                    hoist_env = refresh_hoist(&hoist_env, env);
                    body_ids.push(sid);
                }
                WorkflowElement::Conditional(cond) => {
                    let cid = format!("{}if-{}", prefix, index);
                    let mut names = Vec::new();
                    cond.condition.references(&mut names);
                    let refs = self.resolve_refs(names, &hoist_env);
                    self.insert(
                        cid.clone(),
                        NodeKind::Conditional {
                            condition: cond.condition.clone(),
                            body: vec![],
                        },
                        refs,
                        section,
                        depth,
                        gate,
                    );

                    let mut inner_env = hoist_env.clone();
                    let inner_prefix = format!("{}/", cid);
                    let inner_gate = vec![cid.clone()];
                    let inner_ids = self.walk(
                        &cond.body,
                        &mut inner_env,
                        &inner_prefix,
                        Some(&cid),
                        depth,
                        &inner_gate,
                    )?;

                    if let Some(NodeKind::Conditional { body, .. }) =
                        self.nodes.get_mut(&cid).map(|n| &mut n.kind)
                    {
                        *body = inner_ids.clone();
                    }

                    self.emit_gathers(
                        &cid,
                        GatherLift::Optional,
                        &inner_env,
                        &hoist_env,
                        env,
                        section,
                        depth,
                    );
                    hoist_env = refresh_hoist(&hoist_env, env);
                    body_ids.push(cid);
                }
            }
        }
        Ok(body_ids)
    }

    /// For each binding the section body added, synthesize a gather node in
    /// the enclosing scope and rebind the name onto it.
    #[allow(clippy::too_many_arguments)]
    fn emit_gathers(
        &mut self,
        section_id: &str,
        lift: GatherLift,
        inner_env: &Bindings<Visible>,
        outer_before: &Bindings<Visible>,
        outer: &mut Bindings<Visible>,
        outer_section: Option<&str>,
        outer_depth: u32,
    ) {
        let mut new_bindings: Vec<(String, Visible)> = Vec::new();
        for binding in inner_env.iter() {
            let name = binding.name();
            let candidate = binding.value();
            // Bindings the inner scope added (not visible before, or
            // rebound onto a different node).
            let pre = outer_before.resolve(name);
            let added = match pre {
                None => true,
                Some(v) => v.node != candidate.node,
            };
            if !added || candidate.scatter_var {
                continue;
            }
            let gather_id = format!("gather-{}", candidate.node);
            if !self.nodes.contains_key(&gather_id) {
                self.insert(
                    gather_id.clone(),
                    NodeKind::Gather {
                        section: section_id.to_string(),
                        inner: candidate.node.clone(),
                        lift,
                    },
                    vec![],
                    outer_section,
                    outer_depth,
                    &[candidate.node.clone(), section_id.to_string()],
                );
            }
            let mut lifts = candidate.lifts.clone();
            lifts.push(lift);
            new_bindings.push((
                name.to_string(),
                Visible {
                    node: gather_id,
                    lifts,
                    scatter_var: false,
                    is_call: candidate.is_call,
                },
            ));
        }
        // Preserve inner declaration order for determinism.
        for (name, visible) in new_bindings.into_iter().rev() {
            *outer = outer.bind(name, visible);
        }
    }

    /// Prepass binding call namespaces (with lift chains) for forward
    /// references. Node ids must match the main pass.
    fn hoist(
        &self,
        body: &[WorkflowElement],
        prefix: &str,
        env: &mut Bindings<Visible>,
        lifts: &[GatherLift],
    ) {
        for (index, element) in body.iter().enumerate() {
            match element {
                WorkflowElement::Call(call) => {
                    // Reached through N sections, the reference collapses to
                    // the N-fold gather around the call node.
                    let mut node = format!("{}call-{}", prefix, call.name());
                    for _ in 0..lifts.len() {
                        node = format!("gather-{}", node);
                    }
                    *env = env.bind(
                        call.name().to_string(),
                        Visible {
                            node,
                            lifts: lifts.to_vec(),
                            scatter_var: false,
                            is_call: true,
                        },
                    );
                }
                WorkflowElement::Scatter(s) => {
                    let sid = format!("{}scatter-{}", prefix, index);
                    // Deeper sections are more-inner lifts: prepend, so the
                    // chain stays innermost-first like `Visible.lifts`.
                    let mut inner = vec![GatherLift::Array];
                    inner.extend_from_slice(lifts);
                    self.hoist(&s.body, &format!("{}/", sid), env, &inner);
                }
                WorkflowElement::Conditional(c) => {
                    let cid = format!("{}if-{}", prefix, index);
                    let mut inner = vec![GatherLift::Optional];
                    inner.extend_from_slice(lifts);
                    self.hoist(&c.body, &format!("{}/", cid), env, &inner);
                }
                WorkflowElement::Decl(_) => {}
            }
        }
    }
}

/// Rebuild a hoist environment on top of refreshed outer bindings.
fn refresh_hoist(hoist: &Bindings<Visible>, outer: &Bindings<Visible>) -> Bindings<Visible> {
    // Outer bindings (including fresh gathers) take precedence over stale
    // hoisted entries of the same name.
    hoist.extend(outer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::typecheck::{check_document, CheckOptions};
    use crate::ast::LanguageVersion;
    use crate::eval::stdlib::StdLib;
    use crate::syntax::parse_document;

    fn graph_of(source: &str) -> Graph {
        let mut doc = parse_document(source, "t.wdl", "/tmp/t.wdl").unwrap();
        let stdlib = StdLib::for_version(LanguageVersion::V1_1);
        check_document(&mut doc, &stdlib, &CheckOptions::default()).unwrap();
        build(doc.workflow.as_ref().unwrap()).unwrap()
    }

    #[test]
    fn flat_decl_chain() {
        let g = graph_of(
            r#"version 1.1
            workflow wf {
                input { Int a = 1 }
                Int b = a + 1
                Int c = b * 2
            }"#,
        );
        assert!(g.get("decl-a").is_some());
        assert_eq!(
            g.dependencies("decl-b"),
            ["decl-a"].iter().map(|s| s.to_string()).collect()
        );
        assert_eq!(
            g.dependencies("decl-c"),
            ["decl-b"].iter().map(|s| s.to_string()).collect()
        );
    }

    #[test]
    fn scatter_nodes_and_gather() {
        let g = graph_of(
            r#"version 1.1
            workflow squares {
                input { Int n = 4 }
                scatter (i in range(n)) {
                    Int sq = (i + 1) * (i + 1)
                }
                output { Array[Int] out = sq }
            }"#,
        );
        let sid = "scatter-0";
        assert!(g.get(sid).is_some());
        let inner = g.get("scatter-0/decl-sq").unwrap();
        assert_eq!(inner.section.as_deref(), Some(sid));
        assert_eq!(inner.scatter_depth, 1);
        // Inner decl depends on the scatter section (variable + gate).
        assert!(inner.deps.contains(sid));

        let gather = g.get("gather-scatter-0/decl-sq").unwrap();
        assert!(matches!(
            gather.kind,
            NodeKind::Gather {
                lift: GatherLift::Array,
                ..
            }
        ));
        assert!(gather.deps.contains("scatter-0/decl-sq"));

        // The output node depends on the gather, not the inner decl.
        let out = g.get("output-out").unwrap();
        assert!(out.deps.contains("gather-scatter-0/decl-sq"));
        assert!(!out.deps.contains("scatter-0/decl-sq"));
    }

    #[test]
    fn conditional_gather_lifts_optional() {
        let g = graph_of(
            r#"version 1.1
            workflow wf {
                input { Boolean p }
                if (p) {
                    Int x = 1
                }
                output { Int? out = x }
            }"#,
        );
        let gather = g.get("gather-if-0/decl-x").unwrap();
        assert!(matches!(
            gather.kind,
            NodeKind::Gather {
                lift: GatherLift::Optional,
                ..
            }
        ));
        let out = g.get("output-out").unwrap();
        assert!(out.deps.contains("gather-if-0/decl-x"));
    }

    #[test]
    fn nested_sections_compose_gathers() {
        let g = graph_of(
            r#"version 1.1
            workflow wf {
                input { Boolean p }
                if (p) {
                    scatter (i in [1, 2]) {
                        Int x = i
                    }
                }
                output { Array[Int]? out = x }
            }"#,
        );
        // Inner gather at the scatter boundary, outer gather at the
        // conditional boundary.
        assert!(g.get("gather-if-0/scatter-0/decl-x").is_some());
        let outer = g.get("gather-gather-if-0/scatter-0/decl-x").unwrap();
        assert!(matches!(
            outer.kind,
            NodeKind::Gather {
                lift: GatherLift::Optional,
                ..
            }
        ));
        let out = g.get("output-out").unwrap();
        assert!(out.deps.contains("gather-gather-if-0/scatter-0/decl-x"));
    }

    #[test]
    fn call_refs_project_members() {
        let g = graph_of(
            r#"version 1.1
            task t {
                input { Int n }
                command <<< echo ~{n} >>>
                output { Int m = n }
            }
            workflow wf {
                input { Int n = 1 }
                call t { input: n = n }
                Int doubled = t.m * 2
            }"#,
        );
        let doubled = g.get("decl-doubled").unwrap();
        assert!(doubled.deps.contains("call-t"));
        let r = doubled.refs.iter().find(|r| r.name == "t.m").unwrap();
        assert_eq!(r.member_path, vec!["m".to_string()]);
    }

    #[test]
    fn after_edges_augment_dataflow() {
        let g = graph_of(
            r#"version 1.1
            task t {
                input { Int n = 0 }
                command <<< echo ~{n} >>>
                output { Int m = 1 }
            }
            workflow wf {
                call t as first
                call t as second after first
            }"#,
        );
        let second = g.get("call-second").unwrap();
        assert!(second.deps.contains("call-first"));
    }

    #[test]
    fn graph_is_acyclic_and_ordered() {
        let g = graph_of(
            r#"version 1.1
            workflow wf {
                input { Int a = 1 }
                Int b = a + 1
                scatter (i in range(b)) {
                    Int c = i + a
                }
            }"#,
        );
        let orders: Vec<u32> = g.nodes().map(|n| n.order).collect();
        let mut sorted = orders.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), orders.len());
        assert!(g.check_acyclic(&SourceLoc::unknown()).is_ok());
    }
}
