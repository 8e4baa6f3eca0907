//! Document-level grammar: version clause, imports, struct typedefs, and
//! assembly of the [`Document`] node.

use super::expr::string_literal;
use super::stmt::{type_expr, workflow};
use super::task::task;
use super::Cursor;
use crate::ast::{Document, Import, StringPart, StructTypeDef};
use crate::error::Error;
use indexmap::IndexMap;

/// Parse a whole document; the cursor starts at the beginning of the source.
pub fn document(cur: &mut Cursor, declared_version: Option<String>) -> Result<Document, Error> {
    let start = cur.loc();

    // Consume the version clause scanned earlier.
    if cur.peek_keyword("version") {
        cur.expect_keyword("version")?;
        cur.skip_trivia();
        let rest = cur.rest();
        let end = rest
            .find(|c: char| c.is_whitespace())
            .unwrap_or(rest.len());
        cur.advance(end);
    }

    let mut imports = Vec::new();
    let mut struct_typedefs: Vec<StructTypeDef> = Vec::new();
    let mut tasks = Vec::new();
    let mut wf = None;

    while !cur.at_end() {
        if cur.peek_keyword("import") {
            imports.push(import_clause(cur)?);
        } else if cur.peek_keyword("struct") {
            let def = struct_typedef(cur)?;
            if struct_typedefs.iter().any(|s| s.name == def.name) {
                return Err(Error::syntax(
                    def.loc.clone(),
                    format!("duplicate struct definition {}", def.name),
                ));
            }
            struct_typedefs.push(def);
        } else if cur.peek_keyword("task") {
            tasks.push(task(cur)?);
        } else if cur.peek_keyword("workflow") {
            if wf.is_some() {
                return Err(cur.error("a document may define at most one workflow"));
            }
            wf = Some(workflow(cur)?);
        } else {
            return Err(cur.error("expected import, struct, task, or workflow"));
        }
    }

    let mut loc = cur.span_from(&start);
    loc.uri = start.uri.clone();
    Ok(Document {
        loc,
        version: cur.version(),
        declared_version,
        uri: start.uri,
        abspath: start.abspath,
        source_text: String::new(),
        imports,
        struct_typedefs,
        tasks,
        workflow: wf,
    })
}

/// `import "uri" [as ns] [alias A as B]*`
fn import_clause(cur: &mut Cursor) -> Result<Import, Error> {
    cur.skip_trivia();
    let start = cur.loc();
    cur.expect_keyword("import")?;
    cur.skip_trivia();
    let uri_parts = string_literal(cur)?;
    let uri = match uri_parts.as_slice() {
        [StringPart::Text(t)] => t.clone(),
        _ => return Err(cur.error("import URI must be a plain string")),
    };
    let namespace = if cur.try_keyword("as") {
        cur.ident()?
    } else {
        // Default namespace: basename without the .wdl extension.
        let base = uri
            .rsplit('/')
            .next()
            .unwrap_or(uri.as_str())
            .trim_end_matches(".wdl");
        if base.is_empty() {
            return Err(cur.error(format!("cannot infer namespace for import {}", uri)));
        }
        base.to_string()
    };
    let mut aliases = Vec::new();
    while cur.try_keyword("alias") {
        let from = cur.ident()?;
        cur.expect_keyword("as")?;
        let to = cur.ident()?;
        aliases.push((from, to));
    }
    Ok(Import {
        loc: cur.span_from(&start),
        uri,
        namespace,
        aliases,
        document: None,
    })
}

/// `struct Name { Type member ... }`
fn struct_typedef(cur: &mut Cursor) -> Result<StructTypeDef, Error> {
    cur.skip_trivia();
    let start = cur.loc();
    cur.expect_keyword("struct")?;
    let name = cur.ident()?;
    cur.expect_sym("{")?;
    let mut members = IndexMap::new();
    while !cur.peek_sym("}") {
        let member_loc = cur.loc();
        let ty = type_expr(cur)?;
        let member = cur.ident()?;
        if members.insert(member.clone(), ty).is_some() {
            return Err(Error::syntax(
                member_loc,
                format!("duplicate member {} in struct {}", member, name),
            ));
        }
    }
    cur.expect_sym("}")?;
    Ok(StructTypeDef {
        loc: cur.span_from(&start),
        name,
        members,
    })
}

#[cfg(test)]
mod tests {
    use crate::ast::LanguageVersion;
    use crate::syntax::parse_document;

    #[test]
    fn minimal_document() {
        let source = r#"version 1.1
        task hello {
            input { String who }
            command <<< echo "Hello, ~{who}!" >>>
            output { String out = "x" }
        }"#;
        let doc = parse_document(source, "hello.wdl", "/tmp/hello.wdl").unwrap();
        assert_eq!(doc.version, LanguageVersion::V1_1);
        assert_eq!(doc.declared_version.as_deref(), Some("1.1"));
        assert_eq!(doc.tasks.len(), 1);
        assert!(doc.workflow.is_none());
    }

    #[test]
    fn document_with_workflow_and_imports() {
        let source = r#"version 1.1
        import "lib/tools.wdl" as tools
        import "util.wdl" alias Sample as Specimen

        struct Sample {
            String name
            File reads
        }

        workflow wf {
            input { Int n }
            call tools.align { input: n = n }
            output { Int m = n }
        }"#;
        let doc = parse_document(source, "wf.wdl", "/tmp/wf.wdl").unwrap();
        assert_eq!(doc.imports.len(), 2);
        assert_eq!(doc.imports[0].namespace, "tools");
        assert_eq!(doc.imports[1].namespace, "util");
        assert_eq!(
            doc.imports[1].aliases,
            vec![("Sample".to_string(), "Specimen".to_string())]
        );
        assert_eq!(doc.struct_typedefs.len(), 1);
        assert!(doc.workflow.is_some());
    }

    #[test]
    fn missing_version_defaults_draft2() {
        let source = r#"task t {
            String who
            command { echo ${who} }
        }"#;
        let doc = parse_document(source, "t.wdl", "/tmp/t.wdl").unwrap();
        assert_eq!(doc.version, LanguageVersion::Draft2);
        assert!(doc.declared_version.is_none());
        assert_eq!(doc.tasks[0].inputs.len(), 1);
    }

    #[test]
    fn duplicate_workflow_rejected() {
        let source = "version 1.0\nworkflow a {}\nworkflow b {}";
        assert!(parse_document(source, "t.wdl", "/tmp/t.wdl").is_err());
    }

    #[test]
    fn duplicate_struct_rejected() {
        let source = "version 1.0\nstruct S { Int a }\nstruct S { Int b }";
        assert!(parse_document(source, "t.wdl", "/tmp/t.wdl").is_err());
    }

    #[test]
    fn syntax_error_carries_position() {
        let source = "version 1.0\ntask t {\n  command { echo }\n  output { Int = 3 }\n}";
        let err = parse_document(source, "t.wdl", "/tmp/t.wdl").unwrap_err();
        assert_eq!(err.kind(), "SyntaxError");
        assert!(err.loc().unwrap().line >= 3);
    }
}
