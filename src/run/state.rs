//! The workflow state machine.
//!
//! A pure data structure advanced by the run director: `step` evaluates
//! every node instance whose dependencies are satisfied and returns the
//! call jobs that became ready; `complete`/`fail` feed back task results.
//! Instances are `(node id, scatter indices path)` pairs; scatter sections
//! expand into per-element instance families when their collection value
//! arrives, and gather instances aggregate inner results under the lifted
//! type. Nothing here performs I/O beyond what expression evaluation does.

use crate::ast::graph::{GatherLift, Graph, Node, NodeKind, NodeRef};
use crate::ast::{Decl, Workflow};
use crate::env::Bindings;
use crate::error::{Error, SourceLoc};
use crate::eval::stdlib::StdLib;
use crate::types::Type;
use crate::value::Value;
use indexmap::IndexMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Identity of one node instance: the graph node plus the indices of every
/// enclosing scatter iteration.
pub type InstanceKey = (String, Vec<usize>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Pending,
    Running,
    Succeeded,
    /// Vacuously satisfied (inside a false conditional); value is `None`.
    Skipped,
    Failed,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Succeeded | Status::Skipped | Status::Failed)
    }
}

/// A ready call emitted by `step`.
#[derive(Debug, Clone)]
pub struct Job {
    pub key: InstanceKey,
    /// The call's binding name in its scope.
    pub call_name: String,
    /// Dotted callee, resolvable via `Document::resolve_callee`.
    pub callee: String,
    pub inputs: Bindings<Value>,
}

#[derive(Debug)]
pub struct StateMachine {
    graph: Arc<Graph>,
    statuses: BTreeMap<InstanceKey, Status>,
    values: HashMap<InstanceKey, Value>,
    scatter_widths: HashMap<InstanceKey, usize>,
    conditional_truth: HashMap<InstanceKey, bool>,
    cancelled: bool,
    failures: Vec<Error>,
    /// Inputs supplied at run level under `workflow.call.input` keys.
    call_input_overrides: HashMap<String, Vec<(String, Value)>>,
}

impl StateMachine {
    /// Seed a new state machine with the workflow's run inputs.
    pub fn new(
        graph: Arc<Graph>,
        workflow: &Workflow,
        inputs: &Bindings<Value>,
        call_input_overrides: HashMap<String, Vec<(String, Value)>>,
    ) -> Result<Self, Error> {
        let mut machine = Self {
            graph,
            statuses: BTreeMap::new(),
            values: HashMap::new(),
            scatter_widths: HashMap::new(),
            conditional_truth: HashMap::new(),
            cancelled: false,
            failures: Vec::new(),
            call_input_overrides,
        };

        // Every depth-zero node exists from the start; scatter families are
        // created on expansion.
        let top_ids: Vec<String> = machine
            .graph
            .nodes()
            .filter(|n| n.scatter_depth == 0)
            .map(|n| n.id.clone())
            .collect();
        for id in top_ids {
            machine.statuses.insert((id, vec![]), Status::Pending);
        }

        for decl in &workflow.inputs {
            let key = (format!("decl-{}", decl.name), vec![]);
            match inputs.resolve(&decl.name) {
                Some(v) => {
                    let coerced = v.coerce(&decl.ty).map_err(|e| {
                        Error::input(format!("input {}: {}", decl.name, e))
                    })?;
                    machine.finish(key, coerced);
                }
                None if decl.expr.is_some() => {} // default evaluates in step
                None if decl.ty.is_optional() => {
                    machine.finish(key, Value::Null);
                }
                None => {
                    return Err(Error::input(format!(
                        "missing required input {}.{}",
                        workflow.name, decl.name
                    )))
                }
            }
        }
        Ok(machine)
    }

    fn finish(&mut self, key: InstanceKey, value: Value) {
        self.values.insert(key.clone(), value);
        self.statuses.insert(key, Status::Succeeded);
    }

    /// Refuse further job emission; pending instances stay pending.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Instances currently running (emitted jobs not yet completed).
    pub fn running(&self) -> Vec<InstanceKey> {
        self.statuses
            .iter()
            .filter(|(_, s)| **s == Status::Running)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// The run is finished when nothing is running and either the run is
    /// draining (failure/cancel) or every instance reached a terminal state.
    pub fn is_done(&self) -> bool {
        let any_running = self.statuses.values().any(|s| *s == Status::Running);
        if any_running {
            return false;
        }
        if self.cancelled || !self.failures.is_empty() {
            return true;
        }
        self.statuses.values().all(|s| s.is_terminal())
    }

    /// Record a completed call.
    pub fn complete(&mut self, key: &InstanceKey, outputs: Bindings<Value>) {
        let mut members = IndexMap::new();
        let mut entries: Vec<(String, Value)> = outputs
            .iter()
            .map(|b| (b.name().to_string(), b.value().clone()))
            .collect();
        entries.reverse();
        for (name, value) in entries {
            members.insert(name, value);
        }
        self.finish(key.clone(), Value::object(members));
    }

    /// Record a failed call.
    pub fn fail(&mut self, key: &InstanceKey, error: Error) {
        self.statuses.insert(key.clone(), Status::Failed);
        self.failures.push(error);
    }

    /// Record a run-level failure not tied to a single instance (e.g. an
    /// expression evaluation error inside `step`).
    pub fn abort(&mut self, error: Error) {
        self.failures.push(error);
    }

    /// Consume the machine, producing the workflow's output bindings.
    pub fn outcome(mut self) -> Result<Bindings<Value>, Error> {
        if let Some(first) = self.failures.drain(..).next() {
            return Err(first);
        }
        if self.cancelled {
            return Err(Error::Interrupted);
        }
        let mut out = Bindings::new();
        if self.graph.has_output_block {
            let mut entries: Vec<(String, Value)> = Vec::new();
            for node in self.graph.nodes() {
                if let NodeKind::Output(decl) = &node.kind {
                    let value = self
                        .values
                        .get(&(node.id.clone(), vec![]))
                        .cloned()
                        .unwrap_or(Value::Null);
                    entries.push((decl.name.clone(), value));
                }
            }
            for (name, value) in entries.into_iter().rev() {
                out = out.bind(name, value);
            }
        } else {
            // Without an output block, every call's outputs are exposed
            // under dotted names.
            let mut entries: Vec<(String, Value)> = Vec::new();
            for (name, node_id) in &self.graph.bindings {
                let node = match self.graph.get(node_id) {
                    Some(n) => n,
                    None => continue,
                };
                let is_call_like = matches!(node.kind, NodeKind::Call(_))
                    || matches!(&node.kind, NodeKind::Gather { inner, .. }
                        if matches!(self.graph.get(inner).map(|n| &n.kind), Some(NodeKind::Call(_)) | Some(NodeKind::Gather { .. })));
                if !is_call_like {
                    continue;
                }
                if let Some(value) = self.values.get(&(node_id.clone(), vec![])) {
                    if let Some(members) = value.as_struct() {
                        for (m, v) in members {
                            entries.push((format!("{}.{}", name, m), v.clone()));
                        }
                    } else {
                        entries.push((name.clone(), value.clone()));
                    }
                }
            }
            for (name, value) in entries.into_iter().rev() {
                out = out.bind(name, value);
            }
        }
        Ok(out)
    }

    /// Advance every instance that can make progress; returns newly ready
    /// call jobs in deterministic `(depth, document order, indices)` order.
    pub fn step(&mut self, stdlib: &StdLib) -> Result<Vec<Job>, Error> {
        let mut jobs = Vec::new();
        loop {
            let mut progressed = false;

            let mut pending: Vec<InstanceKey> = self
                .statuses
                .iter()
                .filter(|(_, s)| **s == Status::Pending)
                .map(|(k, _)| k.clone())
                .collect();
            pending.sort_by_key(|(id, path)| {
                let node = self.graph.get(id);
                (
                    node.map(|n| n.scatter_depth).unwrap_or(0),
                    node.map(|n| n.order).unwrap_or(u32::MAX),
                    path.clone(),
                )
            });

            for key in pending {
                if self.cancelled || !self.failures.is_empty() {
                    return Ok(jobs);
                }
                if self.statuses.get(&key) != Some(&Status::Pending) {
                    continue;
                }
                let node = match self.graph.get(&key.0) {
                    Some(n) => n.clone(),
                    None => continue,
                };
                // A skipped enclosing section vacuously satisfies everything
                // inside it.
                if let Some(section) = node.section.clone() {
                    let gate = self.dep_key(&node, &key.1, &section);
                    if self.statuses.get(&gate) == Some(&Status::Skipped) {
                        self.values.insert(key.clone(), Value::Null);
                        self.statuses.insert(key.clone(), Status::Skipped);
                        progressed = true;
                        continue;
                    }
                }
                if !self.deps_satisfied(&node, &key.1) {
                    continue;
                }
                progressed = true;
                self.advance(&node, &key, stdlib, &mut jobs)?;
            }

            if !progressed {
                break;
            }
        }
        Ok(jobs)
    }

    fn dep_key(&self, node: &Node, path: &[usize], dep_id: &str) -> InstanceKey {
        let dep_depth = self
            .graph
            .get(dep_id)
            .map(|d| d.scatter_depth as usize)
            .unwrap_or(0);
        let trunc = dep_depth.min(path.len()).min(node.scatter_depth as usize);
        (dep_id.to_string(), path[..trunc].to_vec())
    }

    fn deps_satisfied(&self, node: &Node, path: &[usize]) -> bool {
        if let NodeKind::Gather { section, inner, .. } = &node.kind {
            return self.gather_ready(node, path, section, inner);
        }
        node.deps.iter().all(|dep| {
            let key = self.dep_key(node, path, dep);
            matches!(
                self.statuses.get(&key),
                Some(Status::Succeeded) | Some(Status::Skipped)
            )
        })
    }

    fn gather_ready(&self, node: &Node, path: &[usize], section: &str, inner: &str) -> bool {
        let section_key = self.dep_key(node, path, section);
        match self.statuses.get(&section_key) {
            Some(Status::Skipped) => return true,
            Some(Status::Succeeded) => {}
            _ => return false,
        }
        match self
            .graph
            .get(section)
            .map(|n| &n.kind)
        {
            Some(NodeKind::Scatter { .. }) => {
                let width = match self.scatter_widths.get(&section_key) {
                    Some(w) => *w,
                    None => return false,
                };
                (0..width).all(|k| {
                    let mut inner_path = section_key.1.clone();
                    inner_path.push(k);
                    matches!(
                        self.statuses.get(&(inner.to_string(), inner_path)),
                        Some(Status::Succeeded) | Some(Status::Skipped)
                    )
                })
            }
            Some(NodeKind::Conditional { .. }) => {
                match self.conditional_truth.get(&section_key) {
                    Some(false) => true,
                    Some(true) => matches!(
                        self.statuses
                            .get(&(inner.to_string(), section_key.1.clone())),
                        Some(Status::Succeeded) | Some(Status::Skipped)
                    ),
                    None => false,
                }
            }
            _ => false,
        }
    }

    fn advance(
        &mut self,
        node: &Node,
        key: &InstanceKey,
        stdlib: &StdLib,
        jobs: &mut Vec<Job>,
    ) -> Result<(), Error> {
        match &node.kind {
            NodeKind::Decl(decl) | NodeKind::Output(decl) => {
                let value = self.evaluate_decl(node, key, decl, stdlib)?;
                self.finish(key.clone(), value);
            }
            NodeKind::Call(call) => {
                let env = self.build_env(node, &key.1)?;
                let mut inputs = Bindings::new();
                for (name, expr) in &call.inputs {
                    inputs = inputs.bind(name.clone(), expr.eval(&env, stdlib)?);
                }
                if let Some(overrides) = self.call_input_overrides.get(call.name()) {
                    for (name, value) in overrides {
                        if !inputs.has_binding(name) {
                            inputs = inputs.bind(name.clone(), value.clone());
                        }
                    }
                }
                self.statuses.insert(key.clone(), Status::Running);
                debug!(target: "wdlrun::state", call = call.name(), ?key, "job ready");
                jobs.push(Job {
                    key: key.clone(),
                    call_name: call.name().to_string(),
                    callee: call.callee.clone(),
                    inputs,
                });
            }
            NodeKind::Scatter { collection, .. } => {
                let env = self.build_env(node, &key.1)?;
                let value = collection.eval(&env, stdlib)?;
                let items = value
                    .as_array()
                    .ok_or_else(|| {
                        Error::eval(
                            SourceLoc::unknown(),
                            "scatter collection did not evaluate to an Array",
                        )
                    })?
                    .to_vec();
                self.expand_scatter(&node.id, key, &items);
                self.scatter_widths.insert(key.clone(), items.len());
                self.finish(key.clone(), value);
            }
            NodeKind::Conditional { condition, .. } => {
                let env = self.build_env(node, &key.1)?;
                let value = condition.eval(&env, stdlib)?;
                let truth = value.as_bool().ok_or_else(|| {
                    Error::eval(
                        SourceLoc::unknown(),
                        "conditional predicate did not evaluate to Boolean",
                    )
                })?;
                self.conditional_truth.insert(key.clone(), truth);
                self.expand_conditional(&node.id, key, truth);
                self.finish(key.clone(), Value::boolean(truth));
            }
            NodeKind::Gather {
                section,
                inner,
                lift,
            } => {
                let value = self.gather_value(node, key, section, inner, *lift);
                self.finish(key.clone(), value);
            }
        }
        Ok(())
    }

    fn evaluate_decl(
        &self,
        node: &Node,
        key: &InstanceKey,
        decl: &Decl,
        stdlib: &StdLib,
    ) -> Result<Value, Error> {
        match &decl.expr {
            Some(expr) => {
                let env = self.build_env(node, &key.1)?;
                let value = expr.eval(&env, stdlib)?;
                value
                    .coerce(&decl.ty)
                    .map_err(|e| crate::error::Error::eval(decl.loc.clone(), e.to_string()))
            }
            None if decl.ty.is_optional() => Ok(Value::Null),
            None => Err(Error::input(format!(
                "declaration {} has no value",
                decl.name
            ))),
        }
    }

    /// Instantiate one scatter family: every node in the section (including
    /// its gathers toward inner sections) per element, plus the per-element
    /// scatter variable values.
    fn expand_scatter(&mut self, section_id: &str, key: &InstanceKey, items: &[Value]) {
        let member_ids: Vec<String> = self
            .graph
            .nodes()
            .filter(|n| n.section.as_deref() == Some(section_id))
            .map(|n| n.id.clone())
            .collect();
        for (index, item) in items.iter().enumerate() {
            let mut element_path = key.1.clone();
            element_path.push(index);
            self.values
                .insert((section_id.to_string(), element_path.clone()), item.clone());
            for id in &member_ids {
                self.statuses
                    .insert((id.clone(), element_path.clone()), Status::Pending);
            }
        }
    }

    /// Instantiate a conditional body at the same path; a false predicate
    /// skips everything transitively inside.
    fn expand_conditional(&mut self, section_id: &str, key: &InstanceKey, truth: bool) {
        let member_ids: Vec<String> = self
            .graph
            .nodes()
            .filter(|n| n.section.as_deref() == Some(section_id))
            .map(|n| n.id.clone())
            .collect();
        for id in &member_ids {
            let inner_key = (id.clone(), key.1.clone());
            if truth {
                self.statuses.insert(inner_key, Status::Pending);
            } else {
                self.values.insert(inner_key.clone(), Value::Null);
                self.statuses.insert(inner_key, Status::Skipped);
            }
        }
    }

    fn gather_value(
        &self,
        node: &Node,
        key: &InstanceKey,
        section: &str,
        inner: &str,
        lift: GatherLift,
    ) -> Value {
        let section_key = self.dep_key(node, &key.1, section);
        match lift {
            GatherLift::Array => {
                let width = self.scatter_widths.get(&section_key).copied().unwrap_or(0);
                let mut items = Vec::with_capacity(width);
                for k in 0..width {
                    let mut inner_path = section_key.1.clone();
                    inner_path.push(k);
                    items.push(
                        self.values
                            .get(&(inner.to_string(), inner_path))
                            .cloned()
                            .unwrap_or(Value::Null),
                    );
                }
                let item_ty = items
                    .first()
                    .map(|v| v.ty().clone())
                    .unwrap_or_else(Type::any);
                Value::array(item_ty, items)
            }
            GatherLift::Optional => {
                let truth = self
                    .conditional_truth
                    .get(&section_key)
                    .copied()
                    .unwrap_or(false);
                if !truth {
                    return Value::Null;
                }
                self.values
                    .get(&(inner.to_string(), section_key.1.clone()))
                    .cloned()
                    .unwrap_or(Value::Null)
            }
        }
    }

    /// Build the value environment a node instance's expressions see.
    fn build_env(&self, node: &Node, path: &[usize]) -> Result<Bindings<Value>, Error> {
        let mut env = Bindings::new();
        for reference in &node.refs {
            let value = self.reference_value(node, path, reference)?;
            env = env.bind(reference.name.clone(), value);
        }
        Ok(env)
    }

    fn reference_value(
        &self,
        node: &Node,
        path: &[usize],
        reference: &NodeRef,
    ) -> Result<Value, Error> {
        let dep_depth = if reference.scatter_var {
            self.graph
                .get(&reference.node)
                .map(|d| d.scatter_depth as usize + 1)
                .unwrap_or(0)
        } else {
            self.graph
                .get(&reference.node)
                .map(|d| d.scatter_depth as usize)
                .unwrap_or(0)
        };
        let trunc = dep_depth.min(path.len());
        let dep_key = (reference.node.clone(), path[..trunc].to_vec());
        let value = match self.values.get(&dep_key) {
            Some(v) => v.clone(),
            None => match self.statuses.get(&dep_key) {
                Some(Status::Skipped) => Value::Null,
                _ => {
                    return Err(Error::runtime(format!(
                        "value of {} not available for {}",
                        reference.node, node.id
                    )))
                }
            },
        };
        project(&value, &reference.lifts, &reference.member_path)
    }
}

/// Unwrap gather lift layers (outermost last in the chain) and then walk the
/// member path.
fn project(value: &Value, lifts: &[GatherLift], member_path: &[String]) -> Result<Value, Error> {
    match lifts.split_last() {
        Some((outermost, rest)) => match outermost {
            GatherLift::Array => {
                let items = value.as_array().ok_or_else(|| {
                    Error::runtime("lifted value is not an array".to_string())
                })?;
                let projected: Result<Vec<Value>, Error> =
                    items.iter().map(|v| project(v, rest, member_path)).collect();
                let projected = projected?;
                let item_ty = projected
                    .first()
                    .map(|v| v.ty().clone())
                    .unwrap_or_else(Type::any);
                Ok(Value::array(item_ty, projected))
            }
            GatherLift::Optional => {
                if value.is_null() {
                    Ok(Value::Null)
                } else {
                    project(value, rest, member_path)
                }
            }
        },
        None => {
            let mut current = value.clone();
            for member in member_path {
                current = match current.as_struct() {
                    Some(members) => members.get(member).cloned().ok_or_else(|| {
                        Error::runtime(format!("no member {} in call outputs", member))
                    })?,
                    None if current.is_null() => Value::Null,
                    None => {
                        return Err(Error::runtime(format!(
                            "cannot project member {} out of {}",
                            member,
                            current.ty()
                        )))
                    }
                };
            }
            Ok(current)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::typecheck::{check_document, CheckOptions};
    use crate::ast::LanguageVersion;
    use crate::syntax::parse_document;

    fn machine_for(
        source: &str,
        inputs: Bindings<Value>,
    ) -> (StateMachine, StdLib) {
        let mut doc = parse_document(source, "t.wdl", "/tmp/t.wdl").unwrap();
        let stdlib = StdLib::for_version(LanguageVersion::V1_1);
        check_document(&mut doc, &stdlib, &CheckOptions::default()).unwrap();
        let wf = doc.workflow.as_ref().unwrap();
        let graph = Arc::new(crate::ast::graph::build(wf).unwrap());
        let machine = StateMachine::new(graph, wf, &inputs, HashMap::new()).unwrap();
        (machine, stdlib)
    }

    fn run_to_completion(machine: &mut StateMachine, stdlib: &StdLib) {
        loop {
            let jobs = machine.step(stdlib).unwrap();
            assert!(jobs.is_empty(), "no-call workflows should emit no jobs");
            if machine.is_done() {
                break;
            }
        }
    }

    #[test]
    fn scatter_arithmetic_squares() {
        let (mut machine, stdlib) = machine_for(
            r#"version 1.1
            workflow squares {
                input { Int n = 4 }
                scatter (i in range(n)) {
                    Int sq = (i + 1) * (i + 1)
                }
                output { Array[Int] out = sq }
            }"#,
            Bindings::new(),
        );
        run_to_completion(&mut machine, &stdlib);
        let outputs = machine.outcome().unwrap();
        let out = outputs.resolve("out").unwrap();
        let values: Vec<i64> = out
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_int().unwrap())
            .collect();
        assert_eq!(values, vec![1, 4, 9, 16]);
    }

    #[test]
    fn scatter_of_zero_elements() {
        let (mut machine, stdlib) = machine_for(
            r#"version 1.1
            workflow wf {
                input { Int n = 0 }
                scatter (i in range(n)) {
                    Int x = i
                }
                output { Array[Int] out = x }
            }"#,
            Bindings::new(),
        );
        run_to_completion(&mut machine, &stdlib);
        let outputs = machine.outcome().unwrap();
        assert_eq!(outputs.resolve("out").unwrap().as_array().unwrap().len(), 0);
    }

    #[test]
    fn false_conditional_yields_none() {
        let (mut machine, stdlib) = machine_for(
            r#"version 1.1
            workflow wf {
                input { Boolean p = false }
                if (p) {
                    Int x = 1
                }
                output { Int? out = x }
            }"#,
            Bindings::new(),
        );
        run_to_completion(&mut machine, &stdlib);
        let outputs = machine.outcome().unwrap();
        assert!(outputs.resolve("out").unwrap().is_null());
    }

    #[test]
    fn true_conditional_yields_value() {
        let (mut machine, stdlib) = machine_for(
            r#"version 1.1
            workflow wf {
                input { Boolean p = true }
                if (p) {
                    Int x = 41 + 1
                }
                output { Int? out = x }
            }"#,
            Bindings::new(),
        );
        run_to_completion(&mut machine, &stdlib);
        let outputs = machine.outcome().unwrap();
        assert_eq!(outputs.resolve("out").unwrap().as_int(), Some(42));
    }

    #[test]
    fn nested_scatter_in_conditional() {
        let (mut machine, stdlib) = machine_for(
            r#"version 1.1
            workflow wf {
                input { Boolean p = true }
                if (p) {
                    scatter (i in [1, 2, 3]) {
                        Int x = i * 10
                    }
                }
                output { Array[Int]? out = x }
            }"#,
            Bindings::new(),
        );
        run_to_completion(&mut machine, &stdlib);
        let outputs = machine.outcome().unwrap();
        let out = outputs.resolve("out").unwrap();
        let values: Vec<i64> = out
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_int().unwrap())
            .collect();
        assert_eq!(values, vec![10, 20, 30]);
    }

    #[test]
    fn missing_required_input_rejected() {
        let source = r#"version 1.1
        workflow wf {
            input { Int n }
            output { Int out = n }
        }"#;
        let mut doc = parse_document(source, "t.wdl", "/tmp/t.wdl").unwrap();
        let stdlib = StdLib::for_version(LanguageVersion::V1_1);
        check_document(&mut doc, &stdlib, &CheckOptions::default()).unwrap();
        let wf = doc.workflow.as_ref().unwrap();
        let graph = Arc::new(crate::ast::graph::build(wf).unwrap());
        let err = StateMachine::new(graph, wf, &Bindings::new(), HashMap::new()).unwrap_err();
        assert_eq!(err.kind(), "InputError");
    }

    #[test]
    fn call_job_emission_and_completion() {
        let source = r#"version 1.1
        task double {
            input { Int n }
            command <<< echo ~{n} >>>
            output { Int out = n * 2 }
        }
        workflow wf {
            input { Int n = 21 }
            call double { input: n = n }
            output { Int result = double.out }
        }"#;
        let (mut machine, stdlib) = machine_for(source, Bindings::new());
        let jobs = machine.step(&stdlib).unwrap();
        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert_eq!(job.call_name, "double");
        assert_eq!(job.callee, "double");
        assert_eq!(job.inputs.resolve("n").unwrap().as_int(), Some(21));
        assert!(!machine.is_done());

        let outputs = Bindings::new().bind("out".to_string(), Value::int(42));
        machine.complete(&job.key, outputs);
        let more = machine.step(&stdlib).unwrap();
        assert!(more.is_empty());
        assert!(machine.is_done());
        let outcome = machine.outcome().unwrap();
        assert_eq!(outcome.resolve("result").unwrap().as_int(), Some(42));
    }

    #[test]
    fn scattered_calls_emit_in_index_order() {
        let source = r#"version 1.1
        task t {
            input { Int n }
            command <<< echo ~{n} >>>
            output { Int out = n }
        }
        workflow wf {
            scatter (i in [5, 6, 7]) {
                call t { input: n = i }
            }
            output { Array[Int] outs = t.out }
        }"#;
        let (mut machine, stdlib) = machine_for(source, Bindings::new());
        let jobs = machine.step(&stdlib).unwrap();
        assert_eq!(jobs.len(), 3);
        let indices: Vec<Vec<usize>> = jobs.iter().map(|j| j.key.1.clone()).collect();
        assert_eq!(indices, vec![vec![0], vec![1], vec![2]]);
        let inputs: Vec<i64> = jobs
            .iter()
            .map(|j| j.inputs.resolve("n").unwrap().as_int().unwrap())
            .collect();
        assert_eq!(inputs, vec![5, 6, 7]);

        for (i, job) in jobs.iter().enumerate() {
            let outputs =
                Bindings::new().bind("out".to_string(), Value::int(100 + i as i64));
            machine.complete(&job.key, outputs);
        }
        machine.step(&stdlib).unwrap();
        assert!(machine.is_done());
        let outcome = machine.outcome().unwrap();
        let outs: Vec<i64> = outcome
            .resolve("outs")
            .unwrap()
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_int().unwrap())
            .collect();
        assert_eq!(outs, vec![100, 101, 102]);
    }

    #[test]
    fn failure_drains_without_new_jobs() {
        let source = r#"version 1.1
        task t {
            input { Int n }
            command <<< echo ~{n} >>>
            output { Int out = n }
        }
        workflow wf {
            call t as first { input: n = 1 }
            call t as second { input: n = first.out }
        }"#;
        let (mut machine, stdlib) = machine_for(source, Bindings::new());
        let jobs = machine.step(&stdlib).unwrap();
        assert_eq!(jobs.len(), 1);
        machine.fail(
            &jobs[0].key,
            Error::TaskFailure {
                exit_status: 1,
                stderr_path: "/dev/null".into(),
                attempt: 1,
            },
        );
        let more = machine.step(&stdlib).unwrap();
        assert!(more.is_empty());
        assert!(machine.is_done());
        assert_eq!(machine.outcome().unwrap_err().kind(), "TaskFailure");
    }

    #[test]
    fn cancellation_blocks_emission() {
        let source = r#"version 1.1
        task t {
            command <<< echo hi >>>
            output { Int out = 1 }
        }
        workflow wf {
            call t
        }"#;
        let (mut machine, stdlib) = machine_for(source, Bindings::new());
        machine.cancel();
        let jobs = machine.step(&stdlib).unwrap();
        assert!(jobs.is_empty());
        assert!(machine.is_done());
        assert_eq!(machine.outcome().unwrap_err().kind(), "Interrupted");
    }

    #[test]
    fn optional_threading_select_first() {
        let source = r#"version 1.1
        task t {
            input { Int n }
            command <<< echo ~{n} >>>
            output { Int out = n }
        }
        workflow wf {
            input { Int? x }
            call t { input: n = select_first([x, 42]) }
            output { Int got = t.out }
        }"#;
        // No x: the default wins.
        let (mut machine, stdlib) = machine_for(source, Bindings::new());
        let jobs = machine.step(&stdlib).unwrap();
        assert_eq!(jobs[0].inputs.resolve("n").unwrap().as_int(), Some(42));

        // x = 7 flows through.
        let (mut machine, stdlib) =
            machine_for(source, Bindings::new().bind("x".to_string(), Value::int(7)));
        let jobs = machine.step(&stdlib).unwrap();
        assert_eq!(jobs[0].inputs.resolve("n").unwrap().as_int(), Some(7));
    }

    #[test]
    fn call_input_overrides_fill_unset() {
        let source = r#"version 1.1
        task t {
            input {
                Int n
                String tag = "x"
            }
            command <<< echo ~{n} >>>
            output { Int out = n }
        }
        workflow wf {
            call t { input: n = 1 }
        }"#;
        let mut doc = parse_document(source, "t.wdl", "/tmp/t.wdl").unwrap();
        let stdlib = StdLib::for_version(LanguageVersion::V1_1);
        check_document(&mut doc, &stdlib, &CheckOptions::default()).unwrap();
        let wf = doc.workflow.as_ref().unwrap();
        let graph = Arc::new(crate::ast::graph::build(wf).unwrap());
        let mut overrides = HashMap::new();
        overrides.insert(
            "t".to_string(),
            vec![
                ("tag".to_string(), Value::string("patched")),
                ("n".to_string(), Value::int(999)),
            ],
        );
        let mut machine = StateMachine::new(graph, wf, &Bindings::new(), overrides).unwrap();
        let jobs = machine.step(&stdlib).unwrap();
        // Bound call inputs win; unset ones take the override.
        assert_eq!(jobs[0].inputs.resolve("n").unwrap().as_int(), Some(1));
        assert_eq!(
            jobs[0].inputs.resolve("tag").unwrap().as_str(),
            Some("patched")
        );
    }
}
