//! Task-level grammar: the task sections, command templates (brace and
//! heredoc forms), runtime/hints maps, and meta blocks.

use super::expr::{expression, heredoc_parts, placeholder, string_literal};
use super::stmt::declaration;
use super::{dedent_parts, Cursor, NumberLit};
use crate::ast::{StringPart, Task};
use crate::error::Error;
use indexmap::IndexMap;
use serde_json::{json, Value as JsonValue};

/// Parse a task definition.
pub fn task(cur: &mut Cursor) -> Result<Task, Error> {
    cur.skip_trivia();
    let start = cur.loc();
    cur.expect_keyword("task")?;
    let name = cur.ident()?;
    cur.expect_sym("{")?;

    let mut inputs = Vec::new();
    let mut postinputs = Vec::new();
    let mut command: Option<Vec<StringPart>> = None;
    let mut outputs = Vec::new();
    let mut runtime = IndexMap::new();
    let mut meta = IndexMap::new();
    let mut parameter_meta = IndexMap::new();
    let mut hints = IndexMap::new();

    while !cur.peek_sym("}") {
        if cur.peek_keyword("input") {
            cur.expect_keyword("input")?;
            cur.expect_sym("{")?;
            while !cur.peek_sym("}") {
                inputs.push(declaration(cur)?);
            }
            cur.expect_sym("}")?;
        } else if cur.peek_keyword("command") {
            if command.is_some() {
                return Err(cur.error("duplicate command section"));
            }
            cur.expect_keyword("command")?;
            command = Some(command_template(cur)?);
        } else if cur.peek_keyword("output") {
            cur.expect_keyword("output")?;
            cur.expect_sym("{")?;
            while !cur.peek_sym("}") {
                outputs.push(declaration(cur)?);
            }
            cur.expect_sym("}")?;
        } else if cur.peek_keyword("runtime") {
            cur.expect_keyword("runtime")?;
            runtime = expr_block(cur)?;
        } else if cur.peek_keyword("hints") {
            cur.expect_keyword("hints")?;
            hints = expr_block(cur)?;
        } else if cur.peek_keyword("meta") {
            cur.expect_keyword("meta")?;
            meta = meta_block(cur)?;
        } else if cur.peek_keyword("parameter_meta") {
            cur.expect_keyword("parameter_meta")?;
            parameter_meta = meta_block(cur)?;
        } else if super::stmt::at_type(cur) {
            postinputs.push(declaration(cur)?);
        } else {
            return Err(cur.error("expected task section or declaration"));
        }
    }
    cur.expect_sym("}")?;

    let command = command.ok_or_else(|| {
        Error::syntax(start.clone(), format!("task {} has no command section", name))
    })?;

    // draft-2: unbound declarations outside an input block are the task's
    // inputs.
    if cur.version() == crate::ast::LanguageVersion::Draft2 {
        let mut kept = Vec::new();
        for d in postinputs.drain(..) {
            if d.expr.is_none() {
                inputs.push(d);
            } else {
                kept.push(d);
            }
        }
        postinputs = kept;
    }

    Ok(Task {
        loc: cur.span_from(&start),
        name,
        inputs,
        postinputs,
        command,
        outputs,
        runtime,
        meta,
        parameter_meta,
        hints,
    })
}

/// Parse the command body in either `{ ... }` or `<<< ... >>>` form,
/// applying un-indent normalization.
pub fn command_template(cur: &mut Cursor) -> Result<Vec<StringPart>, Error> {
    cur.skip_trivia();
    let mut parts = if cur.rest().starts_with("<<<") {
        cur.advance(3);
        heredoc_parts(cur)?
    } else if cur.rest().starts_with('{') {
        cur.advance(1);
        brace_command_parts(cur)?
    } else {
        return Err(cur.error("expected '{' or '<<<' to open command"));
    };
    dedent_parts(&mut parts, false);
    Ok(parts)
}

/// Scan a brace-form command. Both `~{...}` and `${...}` interpolate; bare
/// braces nest (shell syntax) and the first unbalanced `}` closes the
/// command.
fn brace_command_parts(cur: &mut Cursor) -> Result<Vec<StringPart>, Error> {
    let mut parts: Vec<StringPart> = Vec::new();
    let mut text = String::new();
    let mut depth: u32 = 0;
    loop {
        let rest = cur.rest();
        if rest.is_empty() {
            return Err(cur.error("unterminated command block"));
        }
        if rest.starts_with("~{") || rest.starts_with("${") {
            if !text.is_empty() {
                parts.push(StringPart::Text(std::mem::take(&mut text)));
            }
            cur.advance(2);
            parts.push(placeholder(cur)?);
            continue;
        }
        let c = rest.chars().next().unwrap_or('\0');
        match c {
            '{' => {
                depth += 1;
                text.push(c);
            }
            '}' => {
                if depth == 0 {
                    cur.advance(1);
                    break;
                }
                depth -= 1;
                text.push(c);
            }
            _ => text.push(c),
        }
        cur.advance(c.len_utf8());
    }
    if !text.is_empty() || parts.is_empty() {
        parts.push(StringPart::Text(text));
    }
    Ok(parts)
}

/// Parse `{ key: expr, ... }` (runtime and hints sections).
pub fn expr_block(cur: &mut Cursor) -> Result<IndexMap<String, crate::ast::Expr>, Error> {
    cur.expect_sym("{")?;
    let mut entries = IndexMap::new();
    while !cur.peek_sym("}") {
        let key = cur.word()?;
        cur.expect_sym(":")?;
        let value = expression(cur)?;
        if entries.insert(key.clone(), value).is_some() {
            return Err(cur.error(format!("duplicate runtime key {}", key)));
        }
        cur.try_sym(",");
    }
    cur.expect_sym("}")?;
    Ok(entries)
}

/// Parse `{ key: metavalue, ... }` (meta and parameter_meta sections).
/// Meta values are a JSON-like literal subset with no expressions.
pub fn meta_block(cur: &mut Cursor) -> Result<IndexMap<String, JsonValue>, Error> {
    cur.expect_sym("{")?;
    let mut entries = IndexMap::new();
    while !cur.peek_sym("}") {
        let key = cur.word()?;
        cur.expect_sym(":")?;
        let value = meta_value(cur)?;
        entries.insert(key, value);
        cur.try_sym(",");
    }
    cur.expect_sym("}")?;
    Ok(entries)
}

fn meta_value(cur: &mut Cursor) -> Result<JsonValue, Error> {
    cur.skip_trivia();
    if cur.peek_keyword("true") {
        cur.expect_keyword("true")?;
        return Ok(json!(true));
    }
    if cur.peek_keyword("false") {
        cur.expect_keyword("false")?;
        return Ok(json!(false));
    }
    if cur.peek_keyword("null") || cur.peek_keyword("None") {
        let _ = cur.word()?;
        return Ok(JsonValue::Null);
    }
    match cur.peek_char() {
        Some('"') | Some('\'') => {
            let parts = string_literal(cur)?;
            match parts.as_slice() {
                [StringPart::Text(t)] => Ok(json!(t)),
                [] => Ok(json!("")),
                _ => Err(cur.error("meta strings cannot contain placeholders")),
            }
        }
        Some('[') => {
            cur.advance(1);
            let mut items = Vec::new();
            while !cur.peek_sym("]") {
                items.push(meta_value(cur)?);
                cur.try_sym(",");
            }
            cur.expect_sym("]")?;
            Ok(JsonValue::Array(items))
        }
        Some('{') => {
            cur.advance(1);
            let mut obj = serde_json::Map::new();
            while !cur.peek_sym("}") {
                let key = cur.word()?;
                cur.expect_sym(":")?;
                obj.insert(key, meta_value(cur)?);
                cur.try_sym(",");
            }
            cur.expect_sym("}")?;
            Ok(JsonValue::Object(obj))
        }
        Some('-') => {
            cur.advance(1);
            match cur.number()? {
                NumberLit::Int(i) => Ok(json!(-i)),
                NumberLit::Float(f) => Ok(json!(-f)),
            }
        }
        Some(c) if c.is_ascii_digit() => match cur.number()? {
            NumberLit::Int(i) => Ok(json!(i)),
            NumberLit::Float(f) => Ok(json!(f)),
        },
        _ => Err(cur.error("expected meta value")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::LanguageVersion;

    fn cursor(source: &str) -> Cursor {
        Cursor::new(source, "t.wdl", "t.wdl", LanguageVersion::V1_1)
    }

    #[test]
    fn hello_task() {
        let source = r#"task hello {
            input {
                String who
            }
            command <<<
                echo "Hello, ~{who}!" > m.txt
            >>>
            output {
                File m = "m.txt"
            }
            runtime {
                docker: "ubuntu:22.04"
            }
        }"#;
        let t = task(&mut cursor(source)).unwrap();
        assert_eq!(t.name, "hello");
        assert_eq!(t.inputs.len(), 1);
        assert_eq!(t.outputs.len(), 1);
        assert!(t.runtime.contains_key("docker"));
        // Command dedented to column zero with the placeholder intact.
        match &t.command[0] {
            StringPart::Text(text) => assert_eq!(text, "echo \"Hello, "),
            other => panic!("unexpected part {:?}", other),
        }
        assert!(matches!(t.command[1], StringPart::Placeholder { .. }));
    }

    #[test]
    fn brace_command_nests_shell_braces() {
        let source = r#"task t {
            command {
                if [ -f x ]; then { echo a; } fi
                echo ${y}
            }
        }"#;
        let t = task(&mut cursor(source)).unwrap();
        let text: String = t
            .command
            .iter()
            .map(|p| match p {
                StringPart::Text(t) => t.clone(),
                StringPart::Placeholder { .. } => "<P>".to_string(),
            })
            .collect();
        assert!(text.contains("{ echo a; }"));
        assert!(text.contains("echo <P>"));
    }

    #[test]
    fn postinput_declarations() {
        let source = r#"task t {
            input { Int n }
            Int doubled = n * 2
            command <<< echo ~{doubled} >>>
        }"#;
        let t = task(&mut cursor(source)).unwrap();
        assert_eq!(t.postinputs.len(), 1);
        assert_eq!(t.postinputs[0].name, "doubled");
    }

    #[test]
    fn missing_command_is_error() {
        let source = "task t { input { Int n } }";
        assert!(task(&mut cursor(source)).is_err());
    }

    #[test]
    fn meta_values() {
        let source = r#"{ author: "x", flag: true, n: 3, tags: ["a", "b"], nested: { k: 1.5 } }"#;
        let m = meta_block(&mut cursor(source)).unwrap();
        assert_eq!(m["author"], json!("x"));
        assert_eq!(m["flag"], json!(true));
        assert_eq!(m["n"], json!(3));
        assert_eq!(m["tags"], json!(["a", "b"]));
        assert_eq!(m["nested"]["k"], json!(1.5));
    }

    #[test]
    fn runtime_entries_are_expressions() {
        let source = r#"{ cpu: n * 2, memory: "~{gb}G" }"#;
        let block = expr_block(&mut cursor(source)).unwrap();
        assert_eq!(block.len(), 2);
    }

    #[test]
    fn draft2_task_inputs_hoisted() {
        let source = r#"task t {
            String who
            Int n = 3
            command { echo ${who} }
        }"#;
        let mut cur = Cursor::new(source, "t.wdl", "t.wdl", LanguageVersion::Draft2);
        let t = task(&mut cur).unwrap();
        assert_eq!(t.inputs.len(), 1);
        assert_eq!(t.inputs[0].name, "who");
        assert_eq!(t.postinputs.len(), 1);
    }
}
