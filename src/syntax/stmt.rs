//! Statement-level grammar: type expressions, declarations, calls,
//! scatter/conditional sections, and workflow bodies.

use super::expr::expression;
use super::task::meta_block;
use super::Cursor;
use crate::ast::{Call, Conditional, Decl, Scatter, Workflow, WorkflowElement};
use crate::error::Error;
use crate::types::Type;

/// Parse a type expression (`Array[Pair[Int,String]]+?`, `Person?`, ...).
pub fn type_expr(cur: &mut Cursor) -> Result<Type, Error> {
    cur.skip_trivia();
    let loc = cur.loc();
    let word = cur.word()?;
    let mut ty = match word.as_str() {
        "Boolean" => Type::boolean(false),
        "Int" => Type::int(false),
        "Float" => Type::float(false),
        "String" => Type::string(false),
        "File" => Type::file(false),
        "Directory" => {
            if !cur.version().has_directory_type() {
                return Err(Error::syntax(
                    loc,
                    format!(
                        "Directory type requires WDL 1.1+ (document is {})",
                        cur.version().as_str()
                    ),
                ));
            }
            Type::directory(false)
        }
        "Object" => Type::object(indexmap::IndexMap::new()),
        "Array" => {
            cur.expect_sym("[")?;
            let item = type_expr(cur)?;
            cur.expect_sym("]")?;
            let nonempty = cur.try_sym("+");
            Type::array(item, false, nonempty)
        }
        "Map" => {
            cur.expect_sym("[")?;
            let key = type_expr(cur)?;
            cur.expect_sym(",")?;
            let value = type_expr(cur)?;
            cur.expect_sym("]")?;
            Type::map(key, value, false)
        }
        "Pair" => {
            cur.expect_sym("[")?;
            let left = type_expr(cur)?;
            cur.expect_sym(",")?;
            let right = type_expr(cur)?;
            cur.expect_sym("]")?;
            Type::pair(left, right, false)
        }
        other => {
            if super::is_reserved(other) {
                return Err(Error::syntax(loc, format!("expected type, found '{}'", other)));
            }
            Type::struct_instance(other, false)
        }
    };
    if cur.rest().starts_with('?') {
        cur.advance(1);
        ty = ty.with_optional(true);
    }
    Ok(ty)
}

/// Whether the upcoming token opens a declaration (a type name).
pub fn at_type(cur: &mut Cursor) -> bool {
    for builtin in [
        "Boolean",
        "Int",
        "Float",
        "String",
        "File",
        "Directory",
        "Object",
        "Array",
        "Map",
        "Pair",
        "env",
    ] {
        if cur.peek_keyword(builtin) {
            return true;
        }
    }
    // A struct-typed declaration: identifier followed by another identifier.
    cur.skip_trivia();
    let rest = cur.rest();
    let word_end = rest
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
        .map(|(i, _)| i)
        .unwrap_or(rest.len());
    if word_end == 0 || !rest.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return false;
    }
    if super::is_reserved(&rest[..word_end]) {
        return false;
    }
    let mut after = rest[word_end..].trim_start();
    if after.starts_with('?') {
        after = after[1..].trim_start();
    }
    after.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
}

/// Parse a declaration: `[env] Type name [= expr]`.
pub fn declaration(cur: &mut Cursor) -> Result<Decl, Error> {
    cur.skip_trivia();
    let start = cur.loc();
    let env_export = cur.try_keyword("env");
    let ty = type_expr(cur)?;
    let name = cur.ident()?;
    let expr = if cur.try_sym("=") {
        Some(expression(cur)?)
    } else {
        None
    };
    Ok(Decl {
        loc: cur.span_from(&start),
        name,
        ty,
        expr,
        env_export,
    })
}

/// Parse `call callee [as alias] [after name]* [{ [input:] k = v, ... }]`.
pub fn call(cur: &mut Cursor) -> Result<Call, Error> {
    cur.skip_trivia();
    let start = cur.loc();
    cur.expect_keyword("call")?;
    let callee = cur.dotted_name()?;
    let alias = if cur.try_keyword("as") {
        Some(cur.ident()?)
    } else {
        None
    };
    let mut afters = Vec::new();
    while cur.peek_keyword("after") {
        if !cur.version().has_after_clauses() {
            return Err(cur.error(format!(
                "'after' clauses require WDL 1.1+ (document is {})",
                cur.version().as_str()
            )));
        }
        cur.expect_keyword("after")?;
        afters.push(cur.ident()?);
    }
    let mut inputs = Vec::new();
    if cur.try_sym("{") {
        // `input:` prefix is required through 1.0, optional from 1.1.
        if cur.peek_keyword("input") {
            cur.expect_keyword("input")?;
            cur.expect_sym(":")?;
        }
        while !cur.peek_sym("}") {
            let name = cur.ident()?;
            let value = if cur.peek_sym("=") && !cur.peek_sym("==") {
                cur.expect_sym("=")?;
                expression(cur)?
            } else {
                // Shorthand `x` for `x = x`.
                crate::ast::Expr::Ident {
                    loc: cur.loc(),
                    parts: vec![name.clone()],
                    ty: None,
                }
            };
            inputs.push((name, value));
            if !cur.try_sym(",") && !cur.peek_sym("}") {
                return Err(cur.error("expected ',' or '}' in call inputs"));
            }
        }
        cur.expect_sym("}")?;
    }
    Ok(Call {
        loc: cur.span_from(&start),
        callee,
        alias,
        inputs,
        afters,
    })
}

/// Parse `scatter (x in expr) { body }`.
pub fn scatter(cur: &mut Cursor) -> Result<Scatter, Error> {
    cur.skip_trivia();
    let start = cur.loc();
    cur.expect_keyword("scatter")?;
    cur.expect_sym("(")?;
    let variable = cur.ident()?;
    cur.expect_keyword("in")?;
    let collection = expression(cur)?;
    cur.expect_sym(")")?;
    let body = element_block(cur)?;
    Ok(Scatter {
        loc: cur.span_from(&start),
        variable,
        collection,
        body,
    })
}

/// Parse `if (expr) { body }`.
pub fn conditional(cur: &mut Cursor) -> Result<Conditional, Error> {
    cur.skip_trivia();
    let start = cur.loc();
    cur.expect_keyword("if")?;
    cur.expect_sym("(")?;
    let condition = expression(cur)?;
    cur.expect_sym(")")?;
    let body = element_block(cur)?;
    Ok(Conditional {
        loc: cur.span_from(&start),
        condition,
        body,
    })
}

fn element_block(cur: &mut Cursor) -> Result<Vec<WorkflowElement>, Error> {
    cur.expect_sym("{")?;
    let mut body = Vec::new();
    while !cur.peek_sym("}") {
        body.push(workflow_element(cur)?);
    }
    cur.expect_sym("}")?;
    Ok(body)
}

/// Parse one element of a workflow or section body.
pub fn workflow_element(cur: &mut Cursor) -> Result<WorkflowElement, Error> {
    if cur.peek_keyword("call") {
        return Ok(WorkflowElement::Call(call(cur)?));
    }
    if cur.peek_keyword("scatter") {
        return Ok(WorkflowElement::Scatter(scatter(cur)?));
    }
    if cur.peek_keyword("if") {
        return Ok(WorkflowElement::Conditional(conditional(cur)?));
    }
    if at_type(cur) {
        return Ok(WorkflowElement::Decl(declaration(cur)?));
    }
    Err(cur.error("expected declaration, call, scatter, or if"))
}

/// Parse a workflow definition.
pub fn workflow(cur: &mut Cursor) -> Result<Workflow, Error> {
    cur.skip_trivia();
    let start = cur.loc();
    cur.expect_keyword("workflow")?;
    let name = cur.ident()?;
    cur.expect_sym("{")?;

    let mut inputs: Vec<Decl> = Vec::new();
    let mut body: Vec<WorkflowElement> = Vec::new();
    let mut outputs: Option<Vec<Decl>> = None;
    let mut meta = indexmap::IndexMap::new();
    let mut parameter_meta = indexmap::IndexMap::new();

    while !cur.peek_sym("}") {
        if cur.peek_keyword("input") {
            cur.expect_keyword("input")?;
            cur.expect_sym("{")?;
            while !cur.peek_sym("}") {
                inputs.push(declaration(cur)?);
            }
            cur.expect_sym("}")?;
        } else if cur.peek_keyword("output") {
            cur.expect_keyword("output")?;
            cur.expect_sym("{")?;
            let mut decls = Vec::new();
            while !cur.peek_sym("}") {
                decls.push(declaration(cur)?);
            }
            cur.expect_sym("}")?;
            outputs = Some(decls);
        } else if cur.peek_keyword("meta") {
            cur.expect_keyword("meta")?;
            meta = meta_block(cur)?;
        } else if cur.peek_keyword("parameter_meta") {
            cur.expect_keyword("parameter_meta")?;
            parameter_meta = meta_block(cur)?;
        } else {
            body.push(workflow_element(cur)?);
        }
    }
    cur.expect_sym("}")?;

    // draft-2 has no input section: unbound top-level declarations are the
    // workflow's inputs.
    if cur.version() == crate::ast::LanguageVersion::Draft2 {
        let mut kept = Vec::new();
        for element in body.drain(..) {
            match element {
                WorkflowElement::Decl(d) if d.expr.is_none() => inputs.push(d),
                other => kept.push(other),
            }
        }
        body = kept;
    }

    Ok(Workflow {
        loc: cur.span_from(&start),
        name,
        inputs,
        body,
        outputs,
        meta,
        parameter_meta,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::LanguageVersion;

    fn cursor(source: &str) -> Cursor {
        Cursor::new(source, "t.wdl", "t.wdl", LanguageVersion::V1_1)
    }

    #[test]
    fn type_forms() {
        assert_eq!(type_expr(&mut cursor("Int")).unwrap(), Type::int(false));
        assert_eq!(type_expr(&mut cursor("Int?")).unwrap(), Type::int(true));
        assert_eq!(
            type_expr(&mut cursor("Array[String]+")).unwrap(),
            Type::array(Type::string(false), false, true)
        );
        assert_eq!(
            type_expr(&mut cursor("Map[String, Int]")).unwrap(),
            Type::map(Type::string(false), Type::int(false), false)
        );
        assert_eq!(
            type_expr(&mut cursor("Pair[Int, Float]?")).unwrap(),
            Type::pair(Type::int(false), Type::float(false), true)
        );
        assert!(matches!(
            type_expr(&mut cursor("Person")).unwrap(),
            Type::StructInstance { .. }
        ));
    }

    #[test]
    fn directory_gated_by_version() {
        let mut cur = Cursor::new("Directory", "t.wdl", "t.wdl", LanguageVersion::V1_0);
        assert!(type_expr(&mut cur).is_err());
        assert!(type_expr(&mut cursor("Directory")).is_ok());
    }

    #[test]
    fn declaration_with_default() {
        let d = declaration(&mut cursor("Int n = 3 + 4")).unwrap();
        assert_eq!(d.name, "n");
        assert!(d.expr.is_some());
        assert!(!d.is_required_input());
    }

    #[test]
    fn env_modifier() {
        let d = declaration(&mut cursor("env String token")).unwrap();
        assert!(d.env_export);
    }

    #[test]
    fn call_with_inputs() {
        let c = call(&mut cursor("call t { input: n = 1, who = who }")).unwrap();
        assert_eq!(c.callee, "t");
        assert_eq!(c.inputs.len(), 2);
    }

    #[test]
    fn call_shorthand_input() {
        let c = call(&mut cursor("call t { input: who }")).unwrap();
        assert_eq!(c.inputs.len(), 1);
        assert_eq!(c.inputs[0].0, "who");
    }

    #[test]
    fn call_alias_and_after() {
        let c = call(&mut cursor("call lib.align as a2 after a1 { input: n = 1 }")).unwrap();
        assert_eq!(c.callee, "lib.align");
        assert_eq!(c.alias.as_deref(), Some("a2"));
        assert_eq!(c.afters, vec!["a1"]);
        assert_eq!(c.name(), "a2");
    }

    #[test]
    fn scatter_body() {
        let s = scatter(&mut cursor("scatter (i in range(4)) { Int sq = (i+1)*(i+1) }")).unwrap();
        assert_eq!(s.variable, "i");
        assert_eq!(s.body.len(), 1);
    }

    #[test]
    fn conditional_body() {
        let c = conditional(&mut cursor("if (defined(x)) { call t }")).unwrap();
        assert_eq!(c.body.len(), 1);
    }

    #[test]
    fn workflow_with_sections() {
        let source = r#"workflow wf {
            input {
                Int n = 1
            }
            scatter (i in range(n)) {
                Int sq = i * i
            }
            output {
                Array[Int] squares = sq
            }
        }"#;
        let wf = workflow(&mut cursor(source)).unwrap();
        assert_eq!(wf.name, "wf");
        assert_eq!(wf.inputs.len(), 1);
        assert_eq!(wf.body.len(), 1);
        assert_eq!(wf.outputs.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn draft2_bare_inputs_are_hoisted() {
        let source = "workflow wf { String who Int n = 3 call t }";
        let mut cur = Cursor::new(source, "t.wdl", "t.wdl", LanguageVersion::Draft2);
        let wf = workflow(&mut cur).unwrap();
        assert_eq!(wf.inputs.len(), 1);
        assert_eq!(wf.inputs[0].name, "who");
        assert_eq!(wf.body.len(), 2);
    }
}
