//! The typed abstract syntax tree.
//!
//! Documents are immutable once the typechecker has run; the runtime only
//! reads them. Node families follow the grammar: a document holds struct
//! typedefs, tasks, and at most one workflow; workflow bodies are trees of
//! declarations, calls, and scatter/conditional sections.

pub mod expr;
pub mod graph;
pub mod imports;
pub mod typecheck;

pub use expr::{BinOp, Expr, StringPart, UnOp};

use crate::error::SourceLoc;
use crate::types::Type;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Supported grammar versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LanguageVersion {
    Draft2,
    V1_0,
    V1_1,
    Development,
}

impl LanguageVersion {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "draft-2" => Some(LanguageVersion::Draft2),
            "1.0" => Some(LanguageVersion::V1_0),
            "1.1" | "1.2" => Some(LanguageVersion::V1_1),
            "development" => Some(LanguageVersion::Development),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LanguageVersion::Draft2 => "draft-2",
            LanguageVersion::V1_0 => "1.0",
            LanguageVersion::V1_1 => "1.1",
            LanguageVersion::Development => "development",
        }
    }

    /// Whether `${...}` placeholders are accepted outside command blocks.
    pub fn allows_dollar_placeholders(&self) -> bool {
        matches!(self, LanguageVersion::Draft2)
    }

    /// Whether `after` clauses and struct literals are available.
    pub fn has_after_clauses(&self) -> bool {
        *self >= LanguageVersion::V1_1
    }

    /// Whether the `Directory` type is available.
    pub fn has_directory_type(&self) -> bool {
        *self >= LanguageVersion::V1_1
    }
}

/// A value declaration (workflow or task scope).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decl {
    pub loc: SourceLoc,
    pub name: String,
    pub ty: Type,
    pub expr: Option<Expr>,
    /// Declared with the `env` modifier: exported into the task container
    /// environment.
    pub env_export: bool,
}

impl Decl {
    pub fn new(loc: SourceLoc, name: impl Into<String>, ty: Type, expr: Option<Expr>) -> Self {
        Self {
            loc,
            name: name.into(),
            ty,
            expr,
            env_export: false,
        }
    }

    /// A required input: declared without a default and non-optional.
    pub fn is_required_input(&self) -> bool {
        self.expr.is_none() && !self.ty.is_optional()
    }
}

/// A call to a task or (sub-)workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub loc: SourceLoc,
    /// Possibly dotted callee (`ns.task_name`).
    pub callee: String,
    pub alias: Option<String>,
    pub inputs: Vec<(String, Expr)>,
    pub afters: Vec<String>,
}

impl Call {
    /// The name this call binds in its scope.
    pub fn name(&self) -> &str {
        match &self.alias {
            Some(alias) => alias,
            None => self
                .callee
                .rsplit('.')
                .next()
                .unwrap_or(self.callee.as_str()),
        }
    }
}

/// `scatter (x in xs) { ... }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scatter {
    pub loc: SourceLoc,
    pub variable: String,
    pub collection: Expr,
    pub body: Vec<WorkflowElement>,
}

/// `if (p) { ... }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conditional {
    pub loc: SourceLoc,
    pub condition: Expr,
    pub body: Vec<WorkflowElement>,
}

/// One element of a workflow body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkflowElement {
    Decl(Decl),
    Call(Call),
    Scatter(Scatter),
    Conditional(Conditional),
}

impl WorkflowElement {
    pub fn loc(&self) -> &SourceLoc {
        match self {
            WorkflowElement::Decl(d) => &d.loc,
            WorkflowElement::Call(c) => &c.loc,
            WorkflowElement::Scatter(s) => &s.loc,
            WorkflowElement::Conditional(c) => &c.loc,
        }
    }
}

/// A task: typed inputs, a command template, typed outputs, and a runtime
/// attribute map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub loc: SourceLoc,
    pub name: String,
    pub inputs: Vec<Decl>,
    /// Bound declarations after the input section (not overridable).
    pub postinputs: Vec<Decl>,
    pub command: Vec<StringPart>,
    pub outputs: Vec<Decl>,
    pub runtime: IndexMap<String, Expr>,
    pub meta: IndexMap<String, JsonValue>,
    pub parameter_meta: IndexMap<String, JsonValue>,
    pub hints: IndexMap<String, Expr>,
}

impl Task {
    /// Input declarations that a caller must supply.
    pub fn required_inputs(&self) -> impl Iterator<Item = &Decl> {
        self.inputs.iter().filter(|d| d.is_required_input())
    }
}

/// A workflow: inputs, a body of elements, and an optional output block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub loc: SourceLoc,
    pub name: String,
    pub inputs: Vec<Decl>,
    pub body: Vec<WorkflowElement>,
    pub outputs: Option<Vec<Decl>>,
    pub meta: IndexMap<String, JsonValue>,
    pub parameter_meta: IndexMap<String, JsonValue>,
}

impl Workflow {
    pub fn required_inputs(&self) -> impl Iterator<Item = &Decl> {
        self.inputs.iter().filter(|d| d.is_required_input())
    }
}

/// `import "uri" as ns [alias A as B]*`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Import {
    pub loc: SourceLoc,
    pub uri: String,
    pub namespace: String,
    pub aliases: Vec<(String, String)>,
    /// Filled by import resolution.
    #[serde(skip)]
    pub document: Option<Arc<Document>>,
}

/// A named struct typedef.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructTypeDef {
    pub loc: SourceLoc,
    pub name: String,
    pub members: IndexMap<String, Type>,
}

/// A parsed (and, after `typecheck`, type-annotated) WDL document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub loc: SourceLoc,
    pub version: LanguageVersion,
    /// `None` when the version clause was absent (defaulted to draft-2).
    pub declared_version: Option<String>,
    pub uri: String,
    pub abspath: String,
    pub source_text: String,
    pub imports: Vec<Import>,
    pub struct_typedefs: Vec<StructTypeDef>,
    pub tasks: Vec<Task>,
    pub workflow: Option<Workflow>,
}

/// What a call resolves to.
pub enum Callee<'a> {
    Task(&'a Task),
    Workflow(&'a Document, &'a Workflow),
}

impl Document {
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Resolve a possibly-dotted callee name against this document and its
    /// imports.
    pub fn resolve_callee(&self, callee: &str) -> Option<Callee<'_>> {
        match callee.split_once('.') {
            None => {
                if let Some(task) = self.task(callee) {
                    return Some(Callee::Task(task));
                }
                if let Some(wf) = &self.workflow {
                    if wf.name == callee {
                        return Some(Callee::Workflow(self, wf));
                    }
                }
                None
            }
            Some((ns, rest)) => {
                let import = self.imports.iter().find(|i| i.namespace == ns)?;
                let doc = import.document.as_deref()?;
                doc.resolve_callee(rest)
            }
        }
    }

    /// Struct typedefs as a name-to-members table.
    pub fn struct_table(&self) -> IndexMap<String, IndexMap<String, Type>> {
        self.struct_typedefs
            .iter()
            .map(|s| (s.name.clone(), s.members.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_parsing() {
        assert_eq!(LanguageVersion::parse("1.0"), Some(LanguageVersion::V1_0));
        assert_eq!(
            LanguageVersion::parse("draft-2"),
            Some(LanguageVersion::Draft2)
        );
        assert_eq!(LanguageVersion::parse("2.0"), None);
        assert!(LanguageVersion::V1_1 > LanguageVersion::V1_0);
    }

    #[test]
    fn version_gates() {
        assert!(LanguageVersion::Draft2.allows_dollar_placeholders());
        assert!(!LanguageVersion::V1_0.allows_dollar_placeholders());
        assert!(LanguageVersion::V1_1.has_after_clauses());
        assert!(!LanguageVersion::V1_0.has_directory_type());
    }

    #[test]
    fn call_binding_name() {
        let call = Call {
            loc: SourceLoc::unknown(),
            callee: "lib.align".into(),
            alias: None,
            inputs: vec![],
            afters: vec![],
        };
        assert_eq!(call.name(), "align");

        let aliased = Call {
            alias: Some("first_align".into()),
            ..call
        };
        assert_eq!(aliased.name(), "first_align");
    }

    #[test]
    fn required_input_detection() {
        let required = Decl::new(SourceLoc::unknown(), "x", Type::int(false), None);
        assert!(required.is_required_input());

        let optional = Decl::new(SourceLoc::unknown(), "y", Type::int(true), None);
        assert!(!optional.is_required_input());

        let defaulted = Decl::new(
            SourceLoc::unknown(),
            "z",
            Type::int(false),
            Some(Expr::IntLit {
                loc: SourceLoc::unknown(),
                value: 1,
            }),
        );
        assert!(!defaulted.is_required_input());
    }
}
