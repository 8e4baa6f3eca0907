//! Expression evaluation against a value environment.
//!
//! Evaluation is pure except for the filesystem functions in the standard
//! library, which act through the library's path mapping. Static checking is
//! assumed to have run; residual type errors here surface as `EvalError`.

pub mod fsio;
pub mod stdlib;

use crate::ast::{BinOp, Expr, StringPart, UnOp};
use crate::env::Bindings;
use crate::error::{Error, SourceLoc};
use crate::value::Value;
use self::stdlib::StdLib;

impl Expr {
    /// Evaluate this expression.
    pub fn eval(&self, env: &Bindings<Value>, lib: &StdLib) -> Result<Value, Error> {
        match self {
            Expr::BooleanLit { value, .. } => Ok(Value::boolean(*value)),
            Expr::IntLit { value, .. } => Ok(Value::int(*value)),
            Expr::FloatLit { value, .. } => Ok(Value::float(*value)),
            Expr::NoneLit { .. } => Ok(Value::Null),

            Expr::StringLit { parts, .. } => {
                Ok(Value::string(render_parts(parts, env, lib)?))
            }

            Expr::ArrayLit { items, ty, .. } => {
                let values: Result<Vec<Value>, Error> =
                    items.iter().map(|e| e.eval(env, lib)).collect();
                let mut values = values?;
                let item_ty = match ty {
                    Some(crate::types::Type::Array { item, .. }) => (**item).clone(),
                    _ => values
                        .first()
                        .map(|v| v.ty().clone())
                        .unwrap_or_else(crate::types::Type::any),
                };
                for v in values.iter_mut() {
                    *v = v.coerce(&item_ty)?;
                }
                Ok(Value::array(item_ty, values))
            }

            Expr::PairLit { left, right, .. } => {
                Ok(Value::pair(left.eval(env, lib)?, right.eval(env, lib)?))
            }

            Expr::MapLit { entries, .. } => {
                let mut pairs = Vec::new();
                for (k, v) in entries {
                    pairs.push((k.eval(env, lib)?, v.eval(env, lib)?));
                }
                let key_ty = pairs
                    .first()
                    .map(|(k, _)| k.ty().clone())
                    .unwrap_or_else(crate::types::Type::any);
                let value_ty = pairs
                    .first()
                    .map(|(_, v)| v.ty().clone())
                    .unwrap_or_else(crate::types::Type::any);
                Ok(Value::map(key_ty, value_ty, pairs))
            }

            Expr::StructLit { members, ty, .. } => {
                let mut out = indexmap::IndexMap::new();
                for (k, v) in members {
                    out.insert(k.clone(), v.eval(env, lib)?);
                }
                match ty {
                    Some(declared @ crate::types::Type::StructInstance { .. }) => {
                        Value::struct_value(declared.clone(), out)
                    }
                    _ => Ok(Value::object(out)),
                }
            }

            Expr::Ident { loc, parts, .. } => resolve_ident_value(loc, parts, env),

            Expr::At {
                loc, base, index, ..
            } => {
                let base_v = base.eval(env, lib)?;
                let index_v = index.eval(env, lib)?;
                match &base_v {
                    Value::Array { items, .. } => {
                        let i = index_v.coerce(&crate::types::Type::int(false))?;
                        let i = i.as_int().unwrap_or(0);
                        if i < 0 || (i as usize) >= items.len() {
                            return Err(Error::eval(
                                loc.clone(),
                                format!("array index {} out of bounds (length {})", i, items.len()),
                            ));
                        }
                        Ok(items[i as usize].clone())
                    }
                    Value::Map { entries, .. } => {
                        for (k, v) in entries {
                            if k.equals(&index_v).unwrap_or(false) {
                                return Ok(v.clone());
                            }
                        }
                        Err(Error::eval(
                            loc.clone(),
                            format!("map key not found: {}", index_v),
                        ))
                    }
                    other => Err(Error::eval(
                        loc.clone(),
                        format!("cannot index into {}", other.ty()),
                    )),
                }
            }

            Expr::Member {
                loc, base, member, ..
            } => {
                let base_v = base.eval(env, lib)?;
                member_value(loc, &base_v, member)
            }

            Expr::IfThenElse {
                loc,
                condition,
                then_expr,
                else_expr,
                ..
            } => {
                let cond = condition.eval(env, lib)?;
                match cond.as_bool() {
                    Some(true) => then_expr.eval(env, lib),
                    Some(false) => else_expr.eval(env, lib),
                    None => Err(Error::eval(
                        loc.clone(),
                        "if condition did not evaluate to Boolean",
                    )),
                }
            }

            Expr::Apply {
                loc,
                function,
                args,
                ..
            } => {
                let f = lib.function(function).ok_or_else(|| {
                    Error::eval(loc.clone(), format!("no such function: {}", function))
                })?;
                let values: Result<Vec<Value>, Error> =
                    args.iter().map(|a| a.eval(env, lib)).collect();
                f.call(loc, &values?, lib)
            }

            Expr::Binary {
                loc, op, lhs, rhs, ..
            } => eval_binary(loc, *op, lhs, rhs, env, lib),

            Expr::Unary {
                loc, op, operand, ..
            } => {
                let v = operand.eval(env, lib)?;
                match op {
                    UnOp::Not => match v.as_bool() {
                        Some(b) => Ok(Value::boolean(!b)),
                        None => Err(Error::eval(loc.clone(), "'!' operand is not Boolean")),
                    },
                    UnOp::Neg => match &v {
                        Value::Int { value, .. } => Ok(Value::int(-value)),
                        Value::Float { value, .. } => Ok(Value::float(-value)),
                        other => Err(Error::eval(
                            loc.clone(),
                            format!("cannot negate {}", other.ty()),
                        )),
                    },
                }
            }
        }
    }
}

/// Resolve a dotted identifier to a value: longest environment binding, then
/// member access into the resulting value.
fn resolve_ident_value(
    loc: &SourceLoc,
    parts: &[String],
    env: &Bindings<Value>,
) -> Result<Value, Error> {
    for split in (1..=parts.len()).rev() {
        let prefix = parts[..split].join(".");
        if let Some(found) = env.resolve(&prefix) {
            let mut current = found.clone();
            for member in &parts[split..] {
                current = member_value(loc, &current, member)?;
            }
            return Ok(current);
        }
    }
    Err(Error::eval(
        loc.clone(),
        format!("unbound identifier {}", parts.join(".")),
    ))
}

fn member_value(loc: &SourceLoc, base: &Value, member: &str) -> Result<Value, Error> {
    match base {
        Value::Pair { left, right, .. } => match member {
            "left" => Ok((**left).clone()),
            "right" => Ok((**right).clone()),
            _ => Err(Error::eval(
                loc.clone(),
                format!("no such member '{}' of Pair", member),
            )),
        },
        Value::Struct { members, .. } => members.get(member).cloned().ok_or_else(|| {
            Error::eval(loc.clone(), format!("no such member '{}'", member))
        }),
        other => Err(Error::eval(
            loc.clone(),
            format!("no such member '{}' of {}", member, other.ty()),
        )),
    }
}

/// Render interpolation parts into the final string, applying placeholder
/// options (`sep`, `true`/`false`, `default`).
pub fn render_parts(
    parts: &[StringPart],
    env: &Bindings<Value>,
    lib: &StdLib,
) -> Result<String, Error> {
    let mut out = String::new();
    for part in parts {
        match part {
            StringPart::Text(text) => out.push_str(text),
            StringPart::Placeholder { expr, options } => {
                let value = expr.eval(env, lib)?;
                out.push_str(&render_placeholder(expr.loc(), &value, options)?);
            }
        }
    }
    Ok(out)
}

fn render_placeholder(
    loc: &SourceLoc,
    value: &Value,
    options: &[(String, String)],
) -> Result<String, Error> {
    let option = |key: &str| options.iter().find(|(k, _)| k == key).map(|(_, v)| v);

    if value.is_null() {
        if let Some(default) = option("default") {
            return Ok(default.clone());
        }
        return Ok(String::new());
    }
    if let Some(sep) = option("sep") {
        let items = value.as_array().ok_or_else(|| {
            Error::eval(loc.clone(), "'sep' placeholder requires an Array value")
        })?;
        return Ok(items
            .iter()
            .map(|v| v.to_display_string())
            .collect::<Vec<_>>()
            .join(sep));
    }
    if let Some(b) = value.as_bool() {
        if option("true").is_some() || option("false").is_some() {
            let chosen = if b { option("true") } else { option("false") };
            return Ok(chosen.cloned().unwrap_or_default());
        }
    }
    Ok(value.to_display_string())
}

fn eval_binary(
    loc: &SourceLoc,
    op: BinOp,
    lhs: &Expr,
    rhs: &Expr,
    env: &Bindings<Value>,
    lib: &StdLib,
) -> Result<Value, Error> {
    // Short-circuit logical operators.
    if matches!(op, BinOp::And | BinOp::Or) {
        let l = lhs.eval(env, lib)?;
        let l = l
            .as_bool()
            .ok_or_else(|| Error::eval(loc.clone(), "logical operand is not Boolean"))?;
        return match (op, l) {
            (BinOp::And, false) => Ok(Value::boolean(false)),
            (BinOp::Or, true) => Ok(Value::boolean(true)),
            _ => {
                let r = rhs.eval(env, lib)?;
                r.as_bool().map(Value::boolean).ok_or_else(|| {
                    Error::eval(loc.clone(), "logical operand is not Boolean")
                })
            }
        };
    }

    let l = lhs.eval(env, lib)?;
    let r = rhs.eval(env, lib)?;

    match op {
        BinOp::Eq => Ok(Value::boolean(l.equals(&r).map_err(|e| relocate(e, loc))?)),
        BinOp::Neq => Ok(Value::boolean(!l.equals(&r).map_err(|e| relocate(e, loc))?)),
        BinOp::Lt | BinOp::Lte | BinOp::Gt | BinOp::Gte => compare(loc, op, &l, &r),
        BinOp::Add => {
            let stringy = |v: &Value| {
                matches!(
                    v,
                    Value::String { .. } | Value::File { .. } | Value::Directory { .. }
                )
            };
            if stringy(&l) || stringy(&r) {
                return Ok(Value::string(format!(
                    "{}{}",
                    l.to_display_string(),
                    r.to_display_string()
                )));
            }
            arithmetic(loc, op, &l, &r)
        }
        BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => arithmetic(loc, op, &l, &r),
        BinOp::And | BinOp::Or => unreachable!("handled above"),
    }
}

fn arithmetic(loc: &SourceLoc, op: BinOp, l: &Value, r: &Value) -> Result<Value, Error> {
    match (l, r) {
        (Value::Int { value: a, .. }, Value::Int { value: b, .. }) => {
            let (a, b) = (*a, *b);
            let out = match op {
                BinOp::Add => a.checked_add(b),
                BinOp::Sub => a.checked_sub(b),
                BinOp::Mul => a.checked_mul(b),
                BinOp::Div => {
                    if b == 0 {
                        return Err(Error::eval(loc.clone(), "division by zero"));
                    }
                    a.checked_div(b)
                }
                BinOp::Rem => {
                    if b == 0 {
                        return Err(Error::eval(loc.clone(), "division by zero"));
                    }
                    a.checked_rem(b)
                }
                _ => unreachable!(),
            };
            out.map(Value::int)
                .ok_or_else(|| Error::eval(loc.clone(), "integer overflow"))
        }
        _ => {
            let a = l.as_float().ok_or_else(|| {
                Error::eval(loc.clone(), format!("non-numeric operand {}", l.ty()))
            })?;
            let b = r.as_float().ok_or_else(|| {
                Error::eval(loc.clone(), format!("non-numeric operand {}", r.ty()))
            })?;
            let out = match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => {
                    if b == 0.0 {
                        return Err(Error::eval(loc.clone(), "division by zero"));
                    }
                    a / b
                }
                BinOp::Rem => {
                    if b == 0.0 {
                        return Err(Error::eval(loc.clone(), "division by zero"));
                    }
                    a % b
                }
                _ => unreachable!(),
            };
            Ok(Value::float(out))
        }
    }
}

fn compare(loc: &SourceLoc, op: BinOp, l: &Value, r: &Value) -> Result<Value, Error> {
    use std::cmp::Ordering;
    let ordering = match (l, r) {
        (Value::Int { value: a, .. }, Value::Int { value: b, .. }) => a.cmp(b),
        (Value::String { value: a, .. }, Value::String { value: b, .. }) => a.cmp(b),
        (Value::Boolean { value: a, .. }, Value::Boolean { value: b, .. }) => a.cmp(b),
        _ => {
            let a = l.as_float().ok_or_else(|| {
                Error::eval(loc.clone(), format!("cannot order {}", l.ty()))
            })?;
            let b = r.as_float().ok_or_else(|| {
                Error::eval(loc.clone(), format!("cannot order {}", r.ty()))
            })?;
            a.partial_cmp(&b)
                .ok_or_else(|| Error::eval(loc.clone(), "NaN comparison"))?
        }
    };
    Ok(Value::boolean(match op {
        BinOp::Lt => ordering == Ordering::Less,
        BinOp::Lte => ordering != Ordering::Greater,
        BinOp::Gt => ordering == Ordering::Greater,
        BinOp::Gte => ordering != Ordering::Less,
        _ => unreachable!(),
    }))
}

fn relocate(e: Error, loc: &SourceLoc) -> Error {
    match e {
        Error::Eval { message, .. } => Error::Eval {
            loc: loc.clone(),
            message,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::LanguageVersion;
    use crate::syntax::{expr::expression, Cursor};
    use crate::types::Type;

    fn eval_str(source: &str, env: &Bindings<Value>) -> Result<Value, Error> {
        let mut cur = Cursor::new(source, "t.wdl", "t.wdl", LanguageVersion::V1_1);
        let e = expression(&mut cur).unwrap();
        let lib = StdLib::for_version(LanguageVersion::V1_1);
        e.eval(env, &lib)
    }

    #[test]
    fn arithmetic_and_precedence() {
        let env = Bindings::new();
        assert_eq!(eval_str("1 + 2 * 3", &env).unwrap().as_int(), Some(7));
        assert_eq!(eval_str("7 % 4", &env).unwrap().as_int(), Some(3));
        assert_eq!(eval_str("1 / 2", &env).unwrap().as_int(), Some(0));
    }

    #[test]
    fn mixed_numeric_promotes() {
        let env = Bindings::new();
        let v = eval_str("1 + 2.5", &env).unwrap();
        assert_eq!(v.as_float(), Some(3.5));
        assert!(matches!(v, Value::Float { .. }));
    }

    #[test]
    fn division_by_zero_is_eval_error() {
        let env = Bindings::new();
        let err = eval_str("1 / 0", &env).unwrap_err();
        assert_eq!(err.kind(), "EvalError");
        assert!(eval_str("1.5 / 0.0", &env).is_err());
    }

    #[test]
    fn string_concat_via_plus() {
        let env = Bindings::new();
        assert_eq!(
            eval_str("\"a\" + 1", &env).unwrap().as_str(),
            Some("a1")
        );
    }

    #[test]
    fn comparisons() {
        let env = Bindings::new();
        assert_eq!(eval_str("1 < 2", &env).unwrap().as_bool(), Some(true));
        assert_eq!(eval_str("2.5 >= 3", &env).unwrap().as_bool(), Some(false));
        assert_eq!(eval_str("\"a\" < \"b\"", &env).unwrap().as_bool(), Some(true));
        assert_eq!(eval_str("1 == 1.0", &env).unwrap().as_bool(), Some(true));
    }

    #[test]
    fn short_circuit_avoids_rhs() {
        let env = Bindings::new();
        // The RHS would divide by zero if evaluated.
        assert_eq!(
            eval_str("false && 1 / 0 == 1", &env).unwrap().as_bool(),
            Some(false)
        );
        assert_eq!(
            eval_str("true || 1 / 0 == 1", &env).unwrap().as_bool(),
            Some(true)
        );
    }

    #[test]
    fn identifiers_and_namespaces() {
        let env = Bindings::new()
            .bind("x".into(), Value::int(5))
            .bind("t.n".into(), Value::int(42));
        assert_eq!(eval_str("x + 1", &env).unwrap().as_int(), Some(6));
        assert_eq!(eval_str("t.n", &env).unwrap().as_int(), Some(42));
    }

    #[test]
    fn unbound_identifier_is_eval_error() {
        let env = Bindings::new();
        assert_eq!(eval_str("nope", &env).unwrap_err().kind(), "EvalError");
    }

    #[test]
    fn indexing_and_bounds() {
        let env = Bindings::new().bind(
            "xs".into(),
            Value::array(Type::int(false), vec![Value::int(10), Value::int(20)]),
        );
        assert_eq!(eval_str("xs[1]", &env).unwrap().as_int(), Some(20));
        assert!(eval_str("xs[2]", &env).is_err());
    }

    #[test]
    fn pair_member_access() {
        let env = Bindings::new().bind(
            "p".into(),
            Value::pair(Value::int(1), Value::string("x")),
        );
        assert_eq!(eval_str("p.left", &env).unwrap().as_int(), Some(1));
        assert_eq!(eval_str("p.right", &env).unwrap().as_str(), Some("x"));
    }

    #[test]
    fn ternary() {
        let env = Bindings::new().bind("b".into(), Value::boolean(false));
        assert_eq!(eval_str("if b then 1 else 2", &env).unwrap().as_int(), Some(2));
    }

    #[test]
    fn interpolation_with_options() {
        let env = Bindings::new()
            .bind("who".into(), Value::string("Alyssa"))
            .bind(
                "xs".into(),
                Value::array(Type::int(false), vec![Value::int(1), Value::int(2)]),
            )
            .bind("flag".into(), Value::boolean(true))
            .bind("missing".into(), Value::Null);
        assert_eq!(
            eval_str("\"Hello, ~{who}!\"", &env).unwrap().as_str(),
            Some("Hello, Alyssa!")
        );
        assert_eq!(
            eval_str("\"~{sep=\",\" xs}\"", &env).unwrap().as_str(),
            Some("1,2")
        );
        assert_eq!(
            eval_str("\"~{true=\"yes\" false=\"no\" flag}\"", &env)
                .unwrap()
                .as_str(),
            Some("yes")
        );
        assert_eq!(
            eval_str("\"~{default=\"42\" missing}\"", &env).unwrap().as_str(),
            Some("42")
        );
    }

    #[test]
    fn map_lookup() {
        let env = Bindings::new().bind(
            "m".into(),
            Value::map(
                Type::string(false),
                Type::int(false),
                vec![(Value::string("a"), Value::int(1))],
            ),
        );
        assert_eq!(eval_str("m[\"a\"]", &env).unwrap().as_int(), Some(1));
        assert!(eval_str("m[\"b\"]", &env).is_err());
    }
}
