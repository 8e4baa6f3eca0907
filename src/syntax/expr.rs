//! Expression parsing: a Pratt-style precedence climber over the cursor,
//! plus the string-literal scanner shared with command templates.

use super::{Cursor, NumberLit};
use crate::ast::{BinOp, Expr, StringPart, UnOp};
use crate::error::Error;

/// Parse a full expression.
pub fn expression(cur: &mut Cursor) -> Result<Expr, Error> {
    if cur.peek_keyword("if") {
        let start = cur.loc();
        cur.expect_keyword("if")?;
        let condition = Box::new(expression(cur)?);
        cur.expect_keyword("then")?;
        let then_expr = Box::new(expression(cur)?);
        cur.expect_keyword("else")?;
        let else_expr = Box::new(expression(cur)?);
        return Ok(Expr::IfThenElse {
            loc: cur.span_from(&start),
            condition,
            then_expr,
            else_expr,
            ty: None,
        });
    }
    or_expr(cur)
}

fn or_expr(cur: &mut Cursor) -> Result<Expr, Error> {
    let mut lhs = and_expr(cur)?;
    while cur.peek_sym("||") {
        let start = lhs.loc().clone();
        cur.expect_sym("||")?;
        let rhs = and_expr(cur)?;
        lhs = binary(cur, start, BinOp::Or, lhs, rhs);
    }
    Ok(lhs)
}

fn and_expr(cur: &mut Cursor) -> Result<Expr, Error> {
    let mut lhs = eq_expr(cur)?;
    while cur.peek_sym("&&") {
        let start = lhs.loc().clone();
        cur.expect_sym("&&")?;
        let rhs = eq_expr(cur)?;
        lhs = binary(cur, start, BinOp::And, lhs, rhs);
    }
    Ok(lhs)
}

fn eq_expr(cur: &mut Cursor) -> Result<Expr, Error> {
    let mut lhs = cmp_expr(cur)?;
    loop {
        let op = if cur.peek_sym("==") {
            cur.expect_sym("==")?;
            BinOp::Eq
        } else if cur.peek_sym("!=") {
            cur.expect_sym("!=")?;
            BinOp::Neq
        } else {
            break;
        };
        let start = lhs.loc().clone();
        let rhs = cmp_expr(cur)?;
        lhs = binary(cur, start, op, lhs, rhs);
    }
    Ok(lhs)
}

fn cmp_expr(cur: &mut Cursor) -> Result<Expr, Error> {
    let mut lhs = add_expr(cur)?;
    loop {
        let op = if cur.peek_sym("<=") {
            cur.expect_sym("<=")?;
            BinOp::Lte
        } else if cur.peek_sym(">=") {
            cur.expect_sym(">=")?;
            BinOp::Gte
        } else if cur.peek_sym("<") {
            cur.expect_sym("<")?;
            BinOp::Lt
        } else if cur.peek_sym(">") {
            cur.expect_sym(">")?;
            BinOp::Gt
        } else {
            break;
        };
        let start = lhs.loc().clone();
        let rhs = add_expr(cur)?;
        lhs = binary(cur, start, op, lhs, rhs);
    }
    Ok(lhs)
}

fn add_expr(cur: &mut Cursor) -> Result<Expr, Error> {
    let mut lhs = mul_expr(cur)?;
    loop {
        let op = if cur.peek_sym("+") {
            cur.expect_sym("+")?;
            BinOp::Add
        } else if cur.peek_sym("-") {
            cur.expect_sym("-")?;
            BinOp::Sub
        } else {
            break;
        };
        let start = lhs.loc().clone();
        let rhs = mul_expr(cur)?;
        lhs = binary(cur, start, op, lhs, rhs);
    }
    Ok(lhs)
}

fn mul_expr(cur: &mut Cursor) -> Result<Expr, Error> {
    let mut lhs = unary_expr(cur)?;
    loop {
        let op = if cur.peek_sym("*") {
            cur.expect_sym("*")?;
            BinOp::Mul
        } else if cur.peek_sym("//") {
            // Not an operator; leave for the caller (comments are consumed
            // by trivia, so this is never reached in practice).
            break;
        } else if cur.peek_sym("/") {
            cur.expect_sym("/")?;
            BinOp::Div
        } else if cur.peek_sym("%") {
            cur.expect_sym("%")?;
            BinOp::Rem
        } else {
            break;
        };
        let start = lhs.loc().clone();
        let rhs = unary_expr(cur)?;
        lhs = binary(cur, start, op, lhs, rhs);
    }
    Ok(lhs)
}

fn unary_expr(cur: &mut Cursor) -> Result<Expr, Error> {
    if cur.peek_sym("!") {
        let start = cur.loc();
        cur.expect_sym("!")?;
        let operand = Box::new(unary_expr(cur)?);
        return Ok(Expr::Unary {
            loc: cur.span_from(&start),
            op: UnOp::Not,
            operand,
            ty: None,
        });
    }
    if cur.peek_sym("-") {
        let start = cur.loc();
        cur.expect_sym("-")?;
        let operand = Box::new(unary_expr(cur)?);
        return Ok(Expr::Unary {
            loc: cur.span_from(&start),
            op: UnOp::Neg,
            operand,
            ty: None,
        });
    }
    postfix_expr(cur)
}

fn postfix_expr(cur: &mut Cursor) -> Result<Expr, Error> {
    let mut expr = primary_expr(cur)?;
    loop {
        // Postfix binds tightly: no trivia skip before `[` or `.` so that a
        // newline separates statements rather than continuing one.
        if cur.rest().starts_with('[') {
            let start = expr.loc().clone();
            cur.expect_sym("[")?;
            let index = Box::new(expression(cur)?);
            cur.expect_sym("]")?;
            expr = Expr::At {
                loc: cur.span_from(&start),
                base: Box::new(expr),
                index,
                ty: None,
            };
        } else if cur.rest().starts_with('.')
            && cur.rest()[1..].starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        {
            let start = expr.loc().clone();
            cur.advance(1);
            let member = cur.word()?;
            expr = match expr {
                // Fold dotted identifiers so `call.output` resolves against
                // the environment's namespaced bindings.
                Expr::Ident { loc, mut parts, ty } => {
                    parts.push(member);
                    let _ = loc;
                    Expr::Ident {
                        loc: cur.span_from(&start),
                        parts,
                        ty,
                    }
                }
                other => Expr::Member {
                    loc: cur.span_from(&start),
                    base: Box::new(other),
                    member,
                    ty: None,
                },
            };
        } else {
            break;
        }
    }
    Ok(expr)
}

fn primary_expr(cur: &mut Cursor) -> Result<Expr, Error> {
    cur.skip_trivia();
    let start = cur.loc();

    if cur.rest().starts_with("<<<") && cur.version().has_after_clauses() {
        cur.advance(3);
        let mut parts = heredoc_parts(cur)?;
        super::dedent_parts(&mut parts, true);
        return Ok(Expr::StringLit {
            loc: cur.span_from(&start),
            parts,
            ty: None,
        });
    }

    match cur.peek_char() {
        Some('"') | Some('\'') => {
            let parts = string_literal(cur)?;
            return Ok(Expr::StringLit {
                loc: cur.span_from(&start),
                parts,
                ty: None,
            });
        }
        Some('(') => {
            cur.expect_sym("(")?;
            let first = expression(cur)?;
            if cur.try_sym(",") {
                let second = expression(cur)?;
                cur.expect_sym(")")?;
                return Ok(Expr::PairLit {
                    loc: cur.span_from(&start),
                    left: Box::new(first),
                    right: Box::new(second),
                    ty: None,
                });
            }
            cur.expect_sym(")")?;
            return Ok(first);
        }
        Some('[') => {
            cur.expect_sym("[")?;
            let mut items = Vec::new();
            if !cur.peek_sym("]") {
                loop {
                    items.push(expression(cur)?);
                    if !cur.try_sym(",") {
                        break;
                    }
                    if cur.peek_sym("]") {
                        break;
                    }
                }
            }
            cur.expect_sym("]")?;
            return Ok(Expr::ArrayLit {
                loc: cur.span_from(&start),
                items,
                ty: None,
            });
        }
        Some('{') => {
            cur.expect_sym("{")?;
            let mut entries = Vec::new();
            if !cur.peek_sym("}") {
                loop {
                    let key = expression(cur)?;
                    cur.expect_sym(":")?;
                    let value = expression(cur)?;
                    entries.push((key, value));
                    if !cur.try_sym(",") {
                        break;
                    }
                    if cur.peek_sym("}") {
                        break;
                    }
                }
            }
            cur.expect_sym("}")?;
            return Ok(Expr::MapLit {
                loc: cur.span_from(&start),
                entries,
                ty: None,
            });
        }
        Some(c) if c.is_ascii_digit() => {
            let loc = cur.loc();
            return Ok(match cur.number()? {
                NumberLit::Int(value) => Expr::IntLit { loc, value },
                NumberLit::Float(value) => Expr::FloatLit { loc, value },
            });
        }
        _ => {}
    }

    if cur.peek_keyword("true") {
        cur.expect_keyword("true")?;
        return Ok(Expr::BooleanLit { loc: start, value: true });
    }
    if cur.peek_keyword("false") {
        cur.expect_keyword("false")?;
        return Ok(Expr::BooleanLit {
            loc: start,
            value: false,
        });
    }
    if cur.peek_keyword("None") {
        cur.expect_keyword("None")?;
        return Ok(Expr::NoneLit { loc: start });
    }
    if cur.peek_keyword("object") {
        cur.expect_keyword("object")?;
        let members = struct_members(cur)?;
        return Ok(Expr::StructLit {
            loc: cur.span_from(&start),
            name: None,
            members,
            ty: None,
        });
    }

    let name = cur.ident()?;

    // Function application.
    if cur.rest().starts_with('(') {
        cur.expect_sym("(")?;
        let mut args = Vec::new();
        if !cur.peek_sym(")") {
            loop {
                args.push(expression(cur)?);
                if !cur.try_sym(",") {
                    break;
                }
            }
        }
        cur.expect_sym(")")?;
        return Ok(Expr::Apply {
            loc: cur.span_from(&start),
            function: name,
            args,
            ty: None,
        });
    }

    // Struct literal `Name { a: 1, b: 2 }` (1.1+).
    if cur.version().has_after_clauses() && cur.peek_sym("{") {
        let members = struct_members(cur)?;
        return Ok(Expr::StructLit {
            loc: cur.span_from(&start),
            name: Some(name),
            members,
            ty: None,
        });
    }

    Ok(Expr::Ident {
        loc: cur.span_from(&start),
        parts: vec![name],
        ty: None,
    })
}

fn struct_members(cur: &mut Cursor) -> Result<Vec<(String, Expr)>, Error> {
    cur.expect_sym("{")?;
    let mut members = Vec::new();
    if !cur.peek_sym("}") {
        loop {
            let key = cur.ident()?;
            cur.expect_sym(":")?;
            let value = expression(cur)?;
            members.push((key, value));
            if !cur.try_sym(",") {
                break;
            }
            if cur.peek_sym("}") {
                break;
            }
        }
    }
    cur.expect_sym("}")?;
    Ok(members)
}

fn binary(cur: &Cursor, start: crate::error::SourceLoc, op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        loc: cur.span_from(&start),
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
        ty: None,
    }
}

/// Scan a quoted string literal (cursor positioned at the quote), returning
/// its interpolation parts.
pub fn string_literal(cur: &mut Cursor) -> Result<Vec<StringPart>, Error> {
    let quote = match cur.peek_char() {
        Some(c @ ('"' | '\'')) => c,
        _ => return Err(cur.error("expected string literal")),
    };
    cur.advance(1);

    let allow_dollar = cur.version().allows_dollar_placeholders();
    let mut parts: Vec<StringPart> = Vec::new();
    let mut text = String::new();

    loop {
        let rest = cur.rest();
        let mut chars = rest.chars();
        let c = match chars.next() {
            Some(c) => c,
            None => return Err(cur.error("unterminated string literal")),
        };
        if c == quote {
            cur.advance(c.len_utf8());
            break;
        }
        if c == '\n' {
            return Err(cur.error("newline in string literal"));
        }
        if c == '\\' {
            let escaped = chars
                .next()
                .ok_or_else(|| cur.error("unterminated escape sequence"))?;
            let replacement = match escaped {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                '\\' => '\\',
                '\'' => '\'',
                '"' => '"',
                '~' => '~',
                '$' => '$',
                other => {
                    return Err(cur.error(format!("unsupported escape \\{}", other)));
                }
            };
            text.push(replacement);
            cur.advance(1 + escaped.len_utf8());
            continue;
        }
        if (c == '~' || (c == '$' && allow_dollar)) && rest[c.len_utf8()..].starts_with('{') {
            if !text.is_empty() {
                parts.push(StringPart::Text(std::mem::take(&mut text)));
            }
            cur.advance(c.len_utf8() + 1);
            parts.push(placeholder(cur)?);
            continue;
        }
        text.push(c);
        cur.advance(c.len_utf8());
    }

    if !text.is_empty() || parts.is_empty() {
        parts.push(StringPart::Text(text));
    }
    Ok(parts)
}

/// Scan heredoc (`<<< ... >>>`) contents after the opening delimiter. Only
/// `~{...}` placeholders are special; text is otherwise raw. Used for both
/// multi-line strings and heredoc command templates.
pub fn heredoc_parts(cur: &mut Cursor) -> Result<Vec<StringPart>, Error> {
    let mut parts: Vec<StringPart> = Vec::new();
    let mut text = String::new();
    loop {
        let rest = cur.rest();
        if rest.is_empty() {
            return Err(cur.error("unterminated <<< ... >>> block"));
        }
        if rest.starts_with(">>>") {
            cur.advance(3);
            break;
        }
        if rest.starts_with("~{") {
            if !text.is_empty() {
                parts.push(StringPart::Text(std::mem::take(&mut text)));
            }
            cur.advance(2);
            parts.push(placeholder(cur)?);
            continue;
        }
        // `\~{` escapes interpolation.
        if rest.starts_with("\\~{") {
            text.push_str("~{");
            cur.advance(3);
            continue;
        }
        let c = rest.chars().next().unwrap_or('\0');
        text.push(c);
        cur.advance(c.len_utf8());
    }
    if !text.is_empty() || parts.is_empty() {
        parts.push(StringPart::Text(text));
    }
    Ok(parts)
}

/// Parse placeholder contents after the opening `~{`/`${`, through `}`.
pub fn placeholder(cur: &mut Cursor) -> Result<StringPart, Error> {
    let mut options = Vec::new();
    loop {
        cur.skip_trivia();
        let checkpoint = cur.rest();
        let is_option = ["sep", "default", "true", "false"].iter().any(|opt| {
            checkpoint
                .strip_prefix(opt)
                .map(|after| {
                    after
                        .trim_start()
                        .starts_with('=')
                })
                .unwrap_or(false)
        });
        if !is_option {
            break;
        }
        let key = cur.word()?;
        cur.expect_sym("=")?;
        cur.skip_trivia();
        let value_parts = string_literal(cur)?;
        let value = match value_parts.as_slice() {
            [] => String::new(),
            [StringPart::Text(t)] => t.clone(),
            _ => {
                return Err(cur.error("placeholder option value must be a plain string"));
            }
        };
        options.push((key, value));
    }
    let expr = Box::new(expression(cur)?);
    cur.expect_sym("}")?;
    Ok(StringPart::Placeholder { expr, options })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::LanguageVersion;

    fn parse(source: &str) -> Expr {
        let mut cur = Cursor::new(source, "t.wdl", "t.wdl", LanguageVersion::V1_1);
        let e = expression(&mut cur).unwrap();
        assert!(cur.at_end(), "leftover input: {:?}", cur.rest());
        e
    }

    #[test]
    fn precedence_mul_over_add() {
        let e = parse("1 + 2 * 3");
        assert_eq!(e.to_string(), "(1 + (2 * 3))");
    }

    #[test]
    fn precedence_cmp_over_and() {
        let e = parse("a < b && c >= d");
        assert_eq!(e.to_string(), "((a < b) && (c >= d))");
    }

    #[test]
    fn ternary_form() {
        let e = parse("if x then 1 else 2");
        assert!(matches!(e, Expr::IfThenElse { .. }));
    }

    #[test]
    fn dotted_ident_folds() {
        let e = parse("t.n");
        match e {
            Expr::Ident { parts, .. } => assert_eq!(parts, vec!["t", "n"]),
            other => panic!("expected ident, got {}", other),
        }
    }

    #[test]
    fn member_on_indexed_base() {
        let e = parse("xs[0].left");
        assert!(matches!(e, Expr::Member { .. }));
    }

    #[test]
    fn apply_and_array() {
        let e = parse("select_first([x, 42])");
        match &e {
            Expr::Apply { function, args, .. } => {
                assert_eq!(function, "select_first");
                assert_eq!(args.len(), 1);
                assert!(matches!(args[0], Expr::ArrayLit { .. }));
            }
            other => panic!("expected apply, got {}", other),
        }
    }

    #[test]
    fn pair_and_group() {
        assert!(matches!(parse("(1, \"a\")"), Expr::PairLit { .. }));
        assert_eq!(parse("(1 + 2) * 3").to_string(), "((1 + 2) * 3)");
    }

    #[test]
    fn map_literal() {
        let e = parse("{\"a\": 1, \"b\": 2}");
        match e {
            Expr::MapLit { entries, .. } => assert_eq!(entries.len(), 2),
            other => panic!("expected map, got {}", other),
        }
    }

    #[test]
    fn string_with_placeholder() {
        let e = parse("\"Hello, ~{who}!\"");
        match e {
            Expr::StringLit { parts, .. } => {
                assert_eq!(parts.len(), 3);
                assert!(matches!(parts[0], StringPart::Text(ref t) if t == "Hello, "));
                assert!(matches!(parts[1], StringPart::Placeholder { .. }));
                assert!(matches!(parts[2], StringPart::Text(ref t) if t == "!"));
            }
            other => panic!("expected string, got {}", other),
        }
    }

    #[test]
    fn placeholder_with_sep_option() {
        let e = parse("\"~{sep=\", \" xs}\"");
        match e {
            Expr::StringLit { parts, .. } => match &parts[0] {
                StringPart::Placeholder { options, .. } => {
                    assert_eq!(options[0], ("sep".to_string(), ", ".to_string()));
                }
                other => panic!("expected placeholder, got {:?}", other),
            },
            other => panic!("expected string, got {}", other),
        }
    }

    #[test]
    fn escapes() {
        let e = parse("\"a\\tb\\\"c\\\"\"");
        match e {
            Expr::StringLit { parts, .. } => {
                assert!(matches!(parts[0], StringPart::Text(ref t) if t == "a\tb\"c\""));
            }
            other => panic!("expected string, got {}", other),
        }
    }

    #[test]
    fn struct_literal_gated_by_version() {
        let e = parse("Person { name: \"x\" }");
        assert!(matches!(e, Expr::StructLit { name: Some(_), .. }));

        let mut cur = Cursor::new(
            "Person { name: \"x\" }",
            "t.wdl",
            "t.wdl",
            LanguageVersion::V1_0,
        );
        let e = expression(&mut cur).unwrap();
        // 1.0 parses just the identifier; the brace belongs to the caller.
        assert!(matches!(e, Expr::Ident { .. }));
    }

    #[test]
    fn object_literal() {
        let e = parse("object { a: 1, b: \"x\" }");
        assert!(matches!(e, Expr::StructLit { name: None, .. }));
    }

    #[test]
    fn unary_forms() {
        assert!(matches!(parse("!x"), Expr::Unary { op: UnOp::Not, .. }));
        assert!(matches!(parse("-3"), Expr::Unary { op: UnOp::Neg, .. }));
    }

    #[test]
    fn unterminated_string_is_error() {
        let mut cur = Cursor::new("\"abc", "t.wdl", "t.wdl", LanguageVersion::V1_0);
        assert!(expression(&mut cur).is_err());
    }
}
