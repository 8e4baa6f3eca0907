//! Static checking: struct installation and cycle detection, task checking,
//! and the two-pass workflow scope check.
//!
//! Pass one hoists call outputs (so later calls' outputs may be referenced
//! early); pass two walks left-to-right adding declarations, so a forward
//! reference to a declaration is reported as such. Leaving a scatter or
//! conditional section lifts its inner bindings (`Array[T]` / `T?`) into the
//! enclosing scope.

use crate::ast::expr::TypeContext;
use crate::ast::{
    Call, Conditional, Decl, Document, Scatter, StringPart, Task, Workflow, WorkflowElement,
};
use crate::env::Bindings;
use crate::error::{Error, SourceLoc, TypeIssue};
use crate::eval::stdlib::StdLib;
use crate::types::Type;
use indexmap::IndexMap;
use std::collections::HashSet;

/// Options controlling static checking.
#[derive(Debug, Clone)]
pub struct CheckOptions {
    /// Enforce the optional quantifier (`T? -/-> T`). Relaxed by
    /// `--no-quant-check`.
    pub check_quant: bool,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self { check_quant: true }
    }
}

/// Input/output signature of a callable task or workflow.
#[derive(Debug, Clone)]
pub struct CallSignature {
    pub inputs: IndexMap<String, Type>,
    pub required: Vec<String>,
    pub outputs: IndexMap<String, Type>,
}

/// Typecheck a document in place. Imports must already be resolved.
pub fn check_document(
    doc: &mut Document,
    stdlib: &StdLib,
    opts: &CheckOptions,
) -> Result<(), Error> {
    install_imported_structs(doc)?;
    check_struct_cycles(doc)?;
    resolve_struct_typedefs(doc)?;

    let typedefs = doc.struct_table();
    let mut doc_names: HashSet<String> = doc.tasks.iter().map(|t| t.name.clone()).collect();
    if let Some(wf) = &doc.workflow {
        if doc_names.contains(&wf.name) {
            return Err(Error::static_issue(
                wf.loc.clone(),
                TypeIssue::NameCollision,
                format!("workflow name {} collides with a task", wf.name),
            ));
        }
        doc_names.insert(wf.name.clone());
    }

    let signatures = collect_signatures(doc);

    let checker = Checker {
        typedefs,
        doc_names,
        signatures,
        stdlib,
        opts,
    };

    for task in doc.tasks.iter_mut() {
        checker.check_task(task)?;
    }
    if let Some(wf) = doc.workflow.as_mut() {
        checker.check_workflow(wf)?;
    }
    Ok(())
}

/// Copy struct typedefs from resolved imports, applying `alias` clauses.
/// Identical re-definitions are tolerated; conflicting ones are fatal.
fn install_imported_structs(doc: &mut Document) -> Result<(), Error> {
    let mut incoming: Vec<crate::ast::StructTypeDef> = Vec::new();
    for import in &doc.imports {
        let imported = match import.document.as_deref() {
            Some(d) => d,
            None => continue,
        };
        for def in &imported.struct_typedefs {
            let name = import
                .aliases
                .iter()
                .find(|(from, _)| *from == def.name)
                .map(|(_, to)| to.clone())
                .unwrap_or_else(|| def.name.clone());
            incoming.push(crate::ast::StructTypeDef {
                loc: import.loc.clone(),
                name,
                members: def.members.clone(),
            });
        }
    }
    for def in incoming {
        match doc.struct_typedefs.iter().find(|s| s.name == def.name) {
            Some(existing) => {
                if crate::types::struct_type_id(&existing.members)
                    != crate::types::struct_type_id(&def.members)
                {
                    return Err(Error::static_issue(
                        def.loc.clone(),
                        TypeIssue::NameCollision,
                        format!("conflicting definitions of struct {}", def.name),
                    ));
                }
            }
            None => doc.struct_typedefs.push(def),
        }
    }
    Ok(())
}

/// Reject mutually-recursive struct definitions.
fn check_struct_cycles(doc: &Document) -> Result<(), Error> {
    fn referenced(ty: &Type, out: &mut Vec<String>) {
        match ty {
            Type::StructInstance { name, .. } => out.push(name.clone()),
            _ => {
                for p in ty.parameters() {
                    referenced(p, out);
                }
            }
        }
    }

    let table = doc.struct_table();
    for root in table.keys() {
        let mut stack = vec![root.clone()];
        let mut path: Vec<String> = Vec::new();
        // DFS with an explicit path; cycles show up as a revisit of an
        // in-path name.
        fn visit(
            name: &str,
            table: &IndexMap<String, IndexMap<String, Type>>,
            path: &mut Vec<String>,
            loc: &SourceLoc,
        ) -> Result<(), Error> {
            if path.iter().any(|n| n == name) {
                return Err(Error::static_issue(
                    loc.clone(),
                    TypeIssue::CircularDefinition,
                    format!("circular struct definitions involving {}", name),
                ));
            }
            let members = match table.get(name) {
                Some(m) => m,
                None => return Ok(()),
            };
            path.push(name.to_string());
            for ty in members.values() {
                let mut refs = Vec::new();
                referenced(ty, &mut refs);
                for r in refs {
                    visit(&r, table, path, loc)?;
                }
            }
            path.pop();
            Ok(())
        }
        let loc = doc
            .struct_typedefs
            .iter()
            .find(|s| &s.name == root)
            .map(|s| s.loc.clone())
            .unwrap_or_default();
        while let Some(name) = stack.pop() {
            visit(&name, &table, &mut path, &loc)?;
        }
    }
    Ok(())
}

/// Embed member tables into nested struct references within the typedefs.
fn resolve_struct_typedefs(doc: &mut Document) -> Result<(), Error> {
    let table = doc.struct_table();
    for def in doc.struct_typedefs.iter_mut() {
        let mut resolved = IndexMap::new();
        for (k, v) in &def.members {
            resolved.insert(
                k.clone(),
                v.resolve_structs(&table)
                    .map_err(|e| relocate(e, &def.loc))?,
            );
        }
        def.members = resolved;
    }
    Ok(())
}

/// Call signatures of everything callable from this document.
fn collect_signatures(doc: &Document) -> IndexMap<String, CallSignature> {
    let mut out = IndexMap::new();
    collect_signatures_inner(doc, "", &mut out);
    out
}

fn collect_signatures_inner(
    doc: &Document,
    prefix: &str,
    out: &mut IndexMap<String, CallSignature>,
) {
    let typedefs = doc.struct_table();
    let resolve = |ty: &Type| ty.resolve_structs(&typedefs).unwrap_or_else(|_| ty.clone());
    for task in &doc.tasks {
        let sig = CallSignature {
            inputs: task
                .inputs
                .iter()
                .map(|d| (d.name.clone(), resolve(&d.ty)))
                .collect(),
            required: task
                .required_inputs()
                .map(|d| d.name.clone())
                .collect(),
            outputs: task
                .outputs
                .iter()
                .map(|d| (d.name.clone(), resolve(&d.ty)))
                .collect(),
        };
        out.insert(format!("{}{}", prefix, task.name), sig);
    }
    if let Some(wf) = &doc.workflow {
        let sig = CallSignature {
            inputs: wf
                .inputs
                .iter()
                .map(|d| (d.name.clone(), resolve(&d.ty)))
                .collect(),
            required: wf.required_inputs().map(|d| d.name.clone()).collect(),
            outputs: wf
                .outputs
                .as_ref()
                .map(|outs| {
                    outs.iter()
                        .map(|d| (d.name.clone(), resolve(&d.ty)))
                        .collect()
                })
                .unwrap_or_default(),
        };
        out.insert(format!("{}{}", prefix, wf.name), sig);
    }
    for import in &doc.imports {
        if let Some(imported) = import.document.as_deref() {
            collect_signatures_inner(
                imported,
                &format!("{}{}.", prefix, import.namespace),
                out,
            );
        }
    }
}

fn relocate(e: Error, loc: &SourceLoc) -> Error {
    match e {
        Error::Static { issue, message, .. } => Error::Static {
            loc: loc.clone(),
            issue,
            message,
        },
        Error::Eval { message, .. } => Error::Eval {
            loc: loc.clone(),
            message,
        },
        other => other,
    }
}

struct Checker<'a> {
    typedefs: IndexMap<String, IndexMap<String, Type>>,
    doc_names: HashSet<String>,
    signatures: IndexMap<String, CallSignature>,
    stdlib: &'a StdLib,
    opts: &'a CheckOptions,
}

impl<'a> Checker<'a> {
    fn ctx<'b>(&'b self, env: &'b Bindings<Type>) -> TypeContext<'b> {
        TypeContext {
            env,
            stdlib: self.stdlib,
            struct_typedefs: &self.typedefs,
            check_quant: self.opts.check_quant,
        }
    }

    /// Check one declaration, binding it into `env`. Collisions are judged
    /// against `collision_env` (real bindings only, so hoisted call outputs
    /// do not produce spurious conflicts).
    fn check_decl(
        &self,
        decl: &mut Decl,
        env: &mut Bindings<Type>,
        collision_env: &Bindings<Type>,
    ) -> Result<(), Error> {
        decl.ty = decl
            .ty
            .resolve_structs(&self.typedefs)
            .map_err(|e| relocate(e, &decl.loc))?;
        if collision_env.has_binding(&decl.name) || collision_env.has_namespace(&decl.name) {
            return Err(Error::static_issue(
                decl.loc.clone(),
                TypeIssue::NameCollision,
                format!("multiple definitions of {}", decl.name),
            ));
        }
        if self.doc_names.contains(&decl.name) {
            return Err(Error::static_issue(
                decl.loc.clone(),
                TypeIssue::NameCollision,
                format!("{} collides with a task or workflow name", decl.name),
            ));
        }
        if let Some(expr) = decl.expr.as_mut() {
            let inferred = expr.infer_type(&self.ctx(env))?;
            inferred
                .coerce_to(&decl.ty, self.opts.check_quant)
                .map_err(|e| relocate(e, &decl.loc))?;
        }
        *env = env.bind(decl.name.clone(), decl.ty.clone());
        Ok(())
    }

    fn check_task(&self, task: &mut Task) -> Result<(), Error> {
        let mut env = Bindings::new();
        for decl in task.inputs.iter_mut().chain(task.postinputs.iter_mut()) {
            let visible = env.clone();
            self.check_decl(decl, &mut env, &visible)?;
        }

        for part in task.command.iter_mut() {
            if let StringPart::Placeholder { expr, .. } = part {
                let ty = expr.infer_type(&self.ctx(&env))?;
                let loc = expr.loc().clone();
                if !ty
                    .clone()
                    .with_optional(false)
                    .coerces(&Type::string(false), false)
                {
                    return Err(Error::type_mismatch(loc, "String", &ty.to_string()));
                }
            }
        }

        for (_key, expr) in task.runtime.iter_mut().chain(task.hints.iter_mut()) {
            expr.infer_type(&self.ctx(&env))?;
        }

        let mut out_env = env.clone();
        for decl in task.outputs.iter_mut() {
            let visible = out_env.clone();
            self.check_decl(decl, &mut out_env, &visible)?;
        }
        Ok(())
    }

    fn check_workflow(&self, wf: &mut Workflow) -> Result<(), Error> {
        let mut env = Bindings::new();
        for decl in wf.inputs.iter_mut() {
            let visible = env.clone();
            self.check_decl(decl, &mut env, &visible)?;
        }

        let mut all_decls = HashSet::new();
        collect_decl_names(&wf.body, &mut all_decls);

        let mut scope_env = env.clone();
        self.walk_body(&mut wf.body, &mut scope_env, &Bindings::new(), &all_decls)?;

        if let Some(outputs) = wf.outputs.as_mut() {
            // The output block is an implicit final section.
            for decl in outputs.iter_mut() {
                let visible = scope_env.clone();
                self.check_decl(decl, &mut scope_env, &visible)
                    .map_err(|e| self.annotate_forward(e, &all_decls))?;
            }
        }
        Ok(())
    }

    /// Two-pass walk of one body scope. `env` holds only real bindings
    /// (used for collision checks); `outer_hoist` carries hoisted call
    /// outputs inherited from enclosing scopes. New binding names are
    /// returned for section lifting.
    fn walk_body(
        &self,
        body: &mut [WorkflowElement],
        env: &mut Bindings<Type>,
        outer_hoist: &Bindings<Type>,
        all_decls: &HashSet<String>,
    ) -> Result<Vec<String>, Error> {
        let mut added: Vec<String> = Vec::new();

        // Sibling-collision prepass: declarations and calls in one scope may
        // not share a name with each other or with anything already visible.
        // (A call naturally shares its callee task's name; that is fine.)
        let mut scope_names: HashSet<String> = HashSet::new();
        for element in body.iter() {
            let (loc, name) = match element {
                WorkflowElement::Decl(d) => (&d.loc, d.name.clone()),
                WorkflowElement::Call(c) => (&c.loc, c.name().to_string()),
                _ => continue,
            };
            if !scope_names.insert(name.clone())
                || env.has_binding(&name)
                || env.has_namespace(&name)
            {
                return Err(Error::static_issue(
                    loc.clone(),
                    TypeIssue::NameCollision,
                    format!("multiple definitions of {}", name),
                ));
            }
        }

        // Pass one: hoist call outputs of this scope (and, lifted, of nested
        // sections) so forward references to outputs typecheck. Real
        // bindings shadow inherited hoisted ones.
        let mut hoisted: Vec<(String, Type)> = Vec::new();
        self.hoist_outputs(body, &mut hoisted, &[])?;
        let mut hoist_env = outer_hoist.extend(env);
        for (name, ty) in &hoisted {
            hoist_env = hoist_env.bind(name.clone(), ty.clone());
        }

        // Pass two: left-to-right.
        for element in body.iter_mut() {
            match element {
                WorkflowElement::Decl(decl) => {
                    let mut check_env = hoist_env.clone();
                    let collision_env = env.clone();
                    self.check_decl(decl, &mut check_env, &collision_env)
                        .map_err(|e| self.annotate_forward(e, all_decls))?;
                    hoist_env = check_env;
                    *env = env.bind(decl.name.clone(), decl.ty.clone());
                    added.push(decl.name.clone());
                }
                WorkflowElement::Call(call) => {
                    let outputs = self.check_call(call, &hoist_env)?;
                    for (out_name, out_ty) in outputs {
                        let binding = format!("{}.{}", call.name(), out_name);
                        hoist_env = hoist_env.bind(binding.clone(), out_ty.clone());
                        *env = env.bind(binding.clone(), out_ty);
                        added.push(binding);
                    }
                }
                WorkflowElement::Scatter(scatter) => {
                    let names = self.check_scatter(scatter, env, &hoist_env, all_decls)?;
                    for name in names {
                        if let Some(ty) = env.resolve(&name) {
                            hoist_env = hoist_env.bind(name.clone(), ty.clone());
                        }
                        added.push(name);
                    }
                }
                WorkflowElement::Conditional(cond) => {
                    let names = self.check_conditional(cond, env, &hoist_env, all_decls)?;
                    for name in names {
                        if let Some(ty) = env.resolve(&name) {
                            hoist_env = hoist_env.bind(name.clone(), ty.clone());
                        }
                        added.push(name);
                    }
                }
            }
        }
        Ok(added)
    }

    /// Collect lifted call-output types for hoisting. `lifts` records the
    /// section nesting between the current scope and the element.
    fn hoist_outputs(
        &self,
        body: &[WorkflowElement],
        out: &mut Vec<(String, Type)>,
        lifts: &[Lift],
    ) -> Result<(), Error> {
        for element in body {
            match element {
                WorkflowElement::Call(call) => {
                    if let Some(sig) = self.signatures.get(&call.callee) {
                        for (out_name, out_ty) in &sig.outputs {
                            let mut ty = out_ty.clone();
                            for lift in lifts.iter().rev() {
                                ty = lift.apply(ty);
                            }
                            out.push((format!("{}.{}", call.name(), out_name), ty));
                        }
                    }
                }
                WorkflowElement::Scatter(s) => {
                    let mut inner = lifts.to_vec();
                    inner.push(Lift::Array { nonempty: false });
                    self.hoist_outputs(&s.body, out, &inner)?;
                }
                WorkflowElement::Conditional(c) => {
                    let mut inner = lifts.to_vec();
                    inner.push(Lift::Optional);
                    self.hoist_outputs(&c.body, out, &inner)?;
                }
                WorkflowElement::Decl(_) => {}
            }
        }
        Ok(())
    }

    /// Check a call's inputs against the callee signature; returns the
    /// callee's output types.
    fn check_call(
        &self,
        call: &mut Call,
        env: &Bindings<Type>,
    ) -> Result<Vec<(String, Type)>, Error> {
        let sig = self.signatures.get(&call.callee).ok_or_else(|| {
            Error::static_issue(
                call.loc.clone(),
                TypeIssue::NoSuchName,
                format!("no such task or workflow: {}", call.callee),
            )
        })?;
        for (input_name, expr) in call.inputs.iter_mut() {
            let declared = sig.inputs.get(input_name).ok_or_else(|| {
                Error::static_issue(
                    expr.loc().clone(),
                    TypeIssue::NoSuchName,
                    format!("no such input {} of {}", input_name, call.callee),
                )
            })?;
            let inferred = expr.infer_type(&self.ctx(env))?;
            inferred
                .coerce_to(declared, self.opts.check_quant)
                .map_err(|e| relocate(e, expr.loc()))?;
        }
        for after in &call.afters {
            if !env.has_namespace(after) {
                return Err(Error::static_issue(
                    call.loc.clone(),
                    TypeIssue::NoSuchName,
                    format!("'after {}' does not name a call in scope", after),
                ));
            }
        }
        Ok(sig
            .outputs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn check_scatter(
        &self,
        scatter: &mut Scatter,
        env: &mut Bindings<Type>,
        hoist_env: &Bindings<Type>,
        all_decls: &HashSet<String>,
    ) -> Result<Vec<String>, Error> {
        let collection_ty = scatter
            .collection
            .infer_type(&self.ctx(hoist_env))
            .map_err(|e| self.annotate_forward(e, all_decls))?;
        let (item_ty, nonempty) = match &collection_ty {
            Type::Array { item, nonempty, .. } => ((**item).clone(), *nonempty),
            other => {
                return Err(Error::static_issue(
                    scatter.loc.clone(),
                    TypeIssue::StaticTypeMismatch,
                    format!("scatter collection must be an Array, not {}", other),
                ))
            }
        };
        if env.has_binding(&scatter.variable) || env.has_namespace(&scatter.variable) {
            return Err(Error::static_issue(
                scatter.loc.clone(),
                TypeIssue::NameCollision,
                format!("scatter variable {} shadows an existing name", scatter.variable),
            ));
        }

        let mut inner_env = env.bind(scatter.variable.clone(), item_ty);
        let added = self.walk_body(&mut scatter.body, &mut inner_env, hoist_env, all_decls)?;

        // Lift inner bindings into the enclosing scope; the nonempty flag
        // mirrors the collection's.
        for name in &added {
            if let Some(ty) = inner_env.resolve(name) {
                *env = env.bind(name.clone(), Type::array(ty.clone(), false, nonempty));
            }
        }
        Ok(added)
    }

    fn check_conditional(
        &self,
        cond: &mut Conditional,
        env: &mut Bindings<Type>,
        hoist_env: &Bindings<Type>,
        all_decls: &HashSet<String>,
    ) -> Result<Vec<String>, Error> {
        let cond_ty = cond
            .condition
            .infer_type(&self.ctx(hoist_env))
            .map_err(|e| self.annotate_forward(e, all_decls))?;
        if !cond_ty.coerces(&Type::boolean(false), self.opts.check_quant) {
            return Err(Error::type_mismatch(
                cond.loc.clone(),
                "Boolean",
                &cond_ty.to_string(),
            ));
        }

        let mut inner_env = env.clone();
        let added = self.walk_body(&mut cond.body, &mut inner_env, hoist_env, all_decls)?;

        for name in &added {
            if let Some(ty) = inner_env.resolve(name) {
                *env = env.bind(name.clone(), ty.clone().with_optional(true));
            }
        }
        Ok(added)
    }

    /// Turn an unknown-identifier error into a forward-reference report when
    /// the name is declared later in the workflow.
    fn annotate_forward(&self, e: Error, all_decls: &HashSet<String>) -> Error {
        if let Error::Static {
            loc,
            issue: TypeIssue::NoSuchName,
            message,
        } = &e
        {
            if let Some(name) = message
                .strip_prefix("unknown identifier ")
                .map(|n| n.split('.').next().unwrap_or(n))
            {
                if all_decls.contains(name) {
                    return Error::static_issue(
                        loc.clone(),
                        TypeIssue::ForwardReference,
                        format!("forward reference to {}", name),
                    );
                }
            }
        }
        e
    }
}

fn collect_decl_names(body: &[WorkflowElement], out: &mut HashSet<String>) {
    for element in body {
        match element {
            WorkflowElement::Decl(d) => {
                out.insert(d.name.clone());
            }
            WorkflowElement::Scatter(s) => {
                out.insert(s.variable.clone());
                collect_decl_names(&s.body, out);
            }
            WorkflowElement::Conditional(c) => collect_decl_names(&c.body, out),
            WorkflowElement::Call(_) => {}
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Lift {
    Array { nonempty: bool },
    Optional,
}

impl Lift {
    fn apply(&self, ty: Type) -> Type {
        match self {
            Lift::Array { nonempty } => Type::array(ty, false, *nonempty),
            Lift::Optional => ty.with_optional(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::LanguageVersion;
    use crate::syntax::parse_document;

    fn check(source: &str) -> Result<Document, Error> {
        let mut doc = parse_document(source, "t.wdl", "/tmp/t.wdl")?;
        let stdlib = StdLib::for_version(LanguageVersion::V1_1);
        check_document(&mut doc, &stdlib, &CheckOptions::default())?;
        Ok(doc)
    }

    #[test]
    fn scatter_arithmetic_checks() {
        let doc = check(
            r#"version 1.1
            workflow squares {
                input { Int n = 4 }
                scatter (i in range(n)) {
                    Int sq = (i + 1) * (i + 1)
                }
                output { Array[Int] out = sq }
            }"#,
        )
        .unwrap();
        let wf = doc.workflow.unwrap();
        let out = &wf.outputs.unwrap()[0];
        assert_eq!(out.ty.to_string(), "Array[Int]");
    }

    #[test]
    fn conditional_lifts_optional() {
        let doc = check(
            r#"version 1.1
            workflow wf {
                input { Boolean p }
                if (p) {
                    Int x = 1
                }
                output { Int? maybe = x }
            }"#,
        )
        .unwrap();
        let wf = doc.workflow.unwrap();
        assert_eq!(wf.outputs.unwrap()[0].ty.to_string(), "Int?");
    }

    #[test]
    fn nested_sections_compose_lifts() {
        let doc = check(
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
        )
        .unwrap();
        let wf = doc.workflow.unwrap();
        assert_eq!(wf.outputs.unwrap()[0].ty.to_string(), "Array[Int]?");
    }

    #[test]
    fn quant_violation_reported() {
        let err = check(
            r#"version 1.1
            workflow wf {
                input { Int? x }
                Int y = x
            }"#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "QuantityCoercion");
    }

    #[test]
    fn optional_threading_with_select_first() {
        check(
            r#"version 1.1
            workflow wf {
                input { Int? x }
                Int y = select_first([x, 42])
            }"#,
        )
        .unwrap();
    }

    #[test]
    fn type_mismatch_reported() {
        let err = check(
            r#"version 1.1
            workflow wf {
                Int n = "not a number" + (1, 2)
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err.kind(), "IncompatibleOperand" | "StaticTypeMismatch"));
    }

    #[test]
    fn forward_reference_to_decl_rejected() {
        let err = check(
            r#"version 1.1
            workflow wf {
                Int y = x + 1
                Int x = 2
            }"#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "ForwardReference");
    }

    #[test]
    fn forward_reference_to_call_output_allowed() {
        check(
            r#"version 1.1
            task t {
                command <<< echo 1 >>>
                output { Int n = 1 }
            }
            workflow wf {
                Int doubled = t.n * 2
                call t
                output { Int out = doubled }
            }"#,
        )
        .unwrap();
    }

    #[test]
    fn name_collision_with_task() {
        let err = check(
            r#"version 1.1
            task t {
                command <<< echo 1 >>>
            }
            workflow wf {
                Int t = 3
            }"#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "NameCollision");
    }

    #[test]
    fn scatter_variable_shadowing_rejected() {
        let err = check(
            r#"version 1.1
            workflow wf {
                Int i = 1
                scatter (i in [1, 2]) {
                    Int x = i
                }
            }"#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "NameCollision");
    }

    #[test]
    fn call_with_unknown_input_rejected() {
        let err = check(
            r#"version 1.1
            task t {
                input { Int n }
                command <<< echo ~{n} >>>
            }
            workflow wf {
                call t { input: zzz = 1 }
            }"#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "NoSuchName");
    }

    #[test]
    fn call_input_type_checked() {
        let err = check(
            r#"version 1.1
            task t {
                input { Int n }
                command <<< echo ~{n} >>>
            }
            workflow wf {
                call t { input: n = (1, 2) }
            }"#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "StaticTypeMismatch");
    }

    #[test]
    fn struct_cycle_rejected() {
        let err = check(
            r#"version 1.1
            struct A { B b }
            struct B { A a }
            workflow wf {}
        "#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "CircularDefinition");
    }

    #[test]
    fn struct_decl_and_member_access() {
        check(
            r#"version 1.1
            struct Person {
                String name
                Int age
            }
            workflow wf {
                Person p = Person { name: "x", age: 3 }
                String n = p.name
            }"#,
        )
        .unwrap();
    }

    #[test]
    fn command_placeholder_must_stringify() {
        let err = check(
            r#"version 1.1
            task t {
                input { Pair[Int, Pair[Int, Int]] p }
                command <<< echo ~{p} >>>
            }"#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "StaticTypeMismatch");
    }
}
