//! Expression nodes and static type inference.
//!
//! Expressions form a closed enum; the parser fills `ty` with `None` and the
//! typechecker records each node's inferred type in place, bottom-up.

use crate::env::Bindings;
use crate::error::{Error, SourceLoc, TypeIssue};
use crate::types::{unify, Type};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One segment of an interpolated string or command template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StringPart {
    Text(String),
    Placeholder {
        expr: Box<Expr>,
        options: Vec<(String, String)>,
    },
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Eq => "==",
            BinOp::Neq => "!=",
            BinOp::Lt => "<",
            BinOp::Lte => "<=",
            BinOp::Gt => ">",
            BinOp::Gte => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Not,
    Neg,
}

/// A WDL expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    BooleanLit {
        loc: SourceLoc,
        value: bool,
    },
    IntLit {
        loc: SourceLoc,
        value: i64,
    },
    FloatLit {
        loc: SourceLoc,
        value: f64,
    },
    NoneLit {
        loc: SourceLoc,
    },
    /// Interpolated string literal.
    StringLit {
        loc: SourceLoc,
        parts: Vec<StringPart>,
        ty: Option<Type>,
    },
    ArrayLit {
        loc: SourceLoc,
        items: Vec<Expr>,
        ty: Option<Type>,
    },
    PairLit {
        loc: SourceLoc,
        left: Box<Expr>,
        right: Box<Expr>,
        ty: Option<Type>,
    },
    MapLit {
        loc: SourceLoc,
        entries: Vec<(Expr, Expr)>,
        ty: Option<Type>,
    },
    /// `object { ... }` or `StructName { ... }` literal.
    StructLit {
        loc: SourceLoc,
        name: Option<String>,
        members: Vec<(String, Expr)>,
        ty: Option<Type>,
    },
    /// Possibly-dotted identifier (`x`, `call.out`, `pair.left`).
    Ident {
        loc: SourceLoc,
        parts: Vec<String>,
        ty: Option<Type>,
    },
    /// Subscript `base[index]`.
    At {
        loc: SourceLoc,
        base: Box<Expr>,
        index: Box<Expr>,
        ty: Option<Type>,
    },
    /// Member access `base.member` on a non-identifier base.
    Member {
        loc: SourceLoc,
        base: Box<Expr>,
        member: String,
        ty: Option<Type>,
    },
    IfThenElse {
        loc: SourceLoc,
        condition: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
        ty: Option<Type>,
    },
    Apply {
        loc: SourceLoc,
        function: String,
        args: Vec<Expr>,
        ty: Option<Type>,
    },
    Binary {
        loc: SourceLoc,
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        ty: Option<Type>,
    },
    Unary {
        loc: SourceLoc,
        op: UnOp,
        operand: Box<Expr>,
        ty: Option<Type>,
    },
}

/// Static typing context threaded through inference.
pub struct TypeContext<'a> {
    pub env: &'a Bindings<Type>,
    pub stdlib: &'a crate::eval::stdlib::StdLib,
    pub struct_typedefs: &'a indexmap::IndexMap<String, indexmap::IndexMap<String, Type>>,
    pub check_quant: bool,
}

impl Expr {
    pub fn loc(&self) -> &SourceLoc {
        match self {
            Expr::BooleanLit { loc, .. }
            | Expr::IntLit { loc, .. }
            | Expr::FloatLit { loc, .. }
            | Expr::NoneLit { loc }
            | Expr::StringLit { loc, .. }
            | Expr::ArrayLit { loc, .. }
            | Expr::PairLit { loc, .. }
            | Expr::MapLit { loc, .. }
            | Expr::StructLit { loc, .. }
            | Expr::Ident { loc, .. }
            | Expr::At { loc, .. }
            | Expr::Member { loc, .. }
            | Expr::IfThenElse { loc, .. }
            | Expr::Apply { loc, .. }
            | Expr::Binary { loc, .. }
            | Expr::Unary { loc, .. } => loc,
        }
    }

    /// The type recorded by the last `infer_type` pass.
    pub fn ty(&self) -> Type {
        match self {
            Expr::BooleanLit { .. } => Type::boolean(false),
            Expr::IntLit { .. } => Type::int(false),
            Expr::FloatLit { .. } => Type::float(false),
            Expr::NoneLit { .. } => Type::none(),
            Expr::StringLit { ty, .. }
            | Expr::ArrayLit { ty, .. }
            | Expr::PairLit { ty, .. }
            | Expr::MapLit { ty, .. }
            | Expr::StructLit { ty, .. }
            | Expr::Ident { ty, .. }
            | Expr::At { ty, .. }
            | Expr::Member { ty, .. }
            | Expr::IfThenElse { ty, .. }
            | Expr::Apply { ty, .. }
            | Expr::Binary { ty, .. }
            | Expr::Unary { ty, .. } => ty.clone().unwrap_or_else(Type::any),
        }
    }

    /// Infer and record this expression's type.
    pub fn infer_type(&mut self, ctx: &TypeContext) -> Result<Type, Error> {
        let inferred = match self {
            Expr::BooleanLit { .. } => Type::boolean(false),
            Expr::IntLit { .. } => Type::int(false),
            Expr::FloatLit { .. } => Type::float(false),
            Expr::NoneLit { .. } => Type::none(),

            Expr::StringLit { loc, parts, ty } => {
                for part in parts.iter_mut() {
                    if let StringPart::Placeholder { expr, .. } = part {
                        let placeholder_ty = expr.infer_type(ctx)?;
                        // Placeholders admit optionals (rendered empty) but
                        // must stringify.
                        if !placeholder_ty
                            .clone()
                            .with_optional(false)
                            .coerces(&Type::string(false), false)
                        {
                            return Err(Error::type_mismatch(
                                loc.clone(),
                                "String",
                                &placeholder_ty.to_string(),
                            ));
                        }
                    }
                }
                let result = Type::string(false);
                *ty = Some(result.clone());
                return Ok(result);
            }

            Expr::ArrayLit { loc, items, ty } => {
                let mut item_types = Vec::new();
                for item in items.iter_mut() {
                    item_types.push(item.infer_type(ctx)?);
                }
                let refs: Vec<&Type> = item_types.iter().collect();
                let item_ty = if refs.is_empty() {
                    Type::any()
                } else {
                    let unified = unify(&refs, ctx.check_quant);
                    if matches!(unified, Type::Any { .. })
                        && !refs.iter().all(|t| matches!(t, Type::Any { .. }))
                    {
                        return Err(Error::static_issue(
                            loc.clone(),
                            TypeIssue::StaticTypeMismatch,
                            "array literal items have no common type",
                        ));
                    }
                    unified
                };
                let result = Type::array(item_ty, false, !items.is_empty());
                *ty = Some(result.clone());
                return Ok(result);
            }

            Expr::PairLit {
                left, right, ty, ..
            } => {
                let lt = left.infer_type(ctx)?;
                let rt = right.infer_type(ctx)?;
                let result = Type::pair(lt, rt, false);
                *ty = Some(result.clone());
                return Ok(result);
            }

            Expr::MapLit { entries, ty, .. } => {
                let mut key_types = Vec::new();
                let mut value_types = Vec::new();
                for (k, v) in entries.iter_mut() {
                    key_types.push(k.infer_type(ctx)?);
                    value_types.push(v.infer_type(ctx)?);
                }
                let key_refs: Vec<&Type> = key_types.iter().collect();
                let value_refs: Vec<&Type> = value_types.iter().collect();
                let result = Type::map(
                    if key_refs.is_empty() {
                        Type::any()
                    } else {
                        unify(&key_refs, ctx.check_quant)
                    },
                    if value_refs.is_empty() {
                        Type::any()
                    } else {
                        unify(&value_refs, ctx.check_quant)
                    },
                    false,
                );
                *ty = Some(result.clone());
                return Ok(result);
            }

            Expr::StructLit {
                loc,
                name,
                members,
                ty,
            } => {
                let mut member_types = indexmap::IndexMap::new();
                for (k, v) in members.iter_mut() {
                    member_types.insert(k.clone(), v.infer_type(ctx)?);
                }
                let result = match name {
                    Some(struct_name) => {
                        let declared = Type::struct_instance(struct_name.clone(), false)
                            .resolve_structs(ctx.struct_typedefs)
                            .map_err(|_| {
                                Error::static_issue(
                                    loc.clone(),
                                    TypeIssue::NoSuchName,
                                    format!("unknown struct type {}", struct_name),
                                )
                            })?;
                        Type::object(member_types)
                            .coerce_to(&declared, ctx.check_quant)
                            .map_err(|e| {
                                let anchored =
                                    e.loc().map(|l| l.line != 0).unwrap_or(false);
                                if anchored {
                                    e
                                } else {
                                    Error::static_issue(
                                        loc.clone(),
                                        TypeIssue::StaticTypeMismatch,
                                        format!(
                                            "literal does not match struct {}: {}",
                                            struct_name, e
                                        ),
                                    )
                                }
                            })?;
                        declared
                    }
                    None => Type::object(member_types),
                };
                *ty = Some(result.clone());
                return Ok(result);
            }

            Expr::Ident { loc, parts, ty } => {
                let result = resolve_ident(loc, parts, ctx)?;
                *ty = Some(result.clone());
                return Ok(result);
            }

            Expr::At {
                loc,
                base,
                index,
                ty,
            } => {
                let base_ty = base.infer_type(ctx)?;
                let index_ty = index.infer_type(ctx)?;
                let result = match &base_ty {
                    Type::Array { item, .. } => {
                        if !index_ty.coerces(&Type::int(false), ctx.check_quant) {
                            return Err(Error::type_mismatch(
                                loc.clone(),
                                "Int",
                                &index_ty.to_string(),
                            ));
                        }
                        (**item).clone()
                    }
                    Type::Map { key, value, .. } => {
                        if !index_ty.coerces(key, ctx.check_quant) {
                            return Err(Error::type_mismatch(
                                loc.clone(),
                                &key.to_string(),
                                &index_ty.to_string(),
                            ));
                        }
                        (**value).clone()
                    }
                    other => {
                        return Err(Error::static_issue(
                            loc.clone(),
                            TypeIssue::IncompatibleOperand,
                            format!("cannot index into {}", other),
                        ))
                    }
                };
                *ty = Some(result.clone());
                return Ok(result);
            }

            Expr::Member {
                loc,
                base,
                member,
                ty,
            } => {
                let base_ty = base.infer_type(ctx)?;
                let result = member_type(loc, &base_ty, member)?;
                *ty = Some(result.clone());
                return Ok(result);
            }

            Expr::IfThenElse {
                loc,
                condition,
                then_expr,
                else_expr,
                ty,
            } => {
                let cond_ty = condition.infer_type(ctx)?;
                if !cond_ty.coerces(&Type::boolean(false), ctx.check_quant) {
                    return Err(Error::type_mismatch(
                        loc.clone(),
                        "Boolean",
                        &cond_ty.to_string(),
                    ));
                }
                let tt = then_expr.infer_type(ctx)?;
                let et = else_expr.infer_type(ctx)?;
                let unified = unify(&[&tt, &et], ctx.check_quant);
                if matches!(unified, Type::Any { .. })
                    && !(matches!(tt, Type::Any { .. }) || matches!(et, Type::Any { .. }))
                {
                    return Err(Error::static_issue(
                        loc.clone(),
                        TypeIssue::StaticTypeMismatch,
                        format!("if/else branches have incompatible types {} and {}", tt, et),
                    ));
                }
                *ty = Some(unified.clone());
                return Ok(unified);
            }

            Expr::Apply {
                loc,
                function,
                args,
                ty,
            } => {
                let result = match ctx.stdlib.function(function) {
                    Some(f) => f.infer_type(loc, args, ctx)?,
                    None => {
                        return Err(Error::static_issue(
                            loc.clone(),
                            TypeIssue::NoSuchFunction,
                            format!("no such function: {}", function),
                        ))
                    }
                };
                *ty = Some(result.clone());
                return Ok(result);
            }

            Expr::Binary {
                loc,
                op,
                lhs,
                rhs,
                ty,
            } => {
                let lt = lhs.infer_type(ctx)?;
                let rt = rhs.infer_type(ctx)?;
                let result = infer_binary(loc, *op, &lt, &rt, ctx.check_quant)?;
                *ty = Some(result.clone());
                return Ok(result);
            }

            Expr::Unary {
                loc,
                op,
                operand,
                ty,
            } => {
                let ot = operand.infer_type(ctx)?;
                let result = match op {
                    UnOp::Not => {
                        if !ot.coerces(&Type::boolean(false), ctx.check_quant) {
                            return Err(Error::type_mismatch(
                                loc.clone(),
                                "Boolean",
                                &ot.to_string(),
                            ));
                        }
                        Type::boolean(false)
                    }
                    UnOp::Neg => match ot {
                        Type::Int { .. } => Type::int(false),
                        Type::Float { .. } => Type::float(false),
                        other => {
                            return Err(Error::static_issue(
                                loc.clone(),
                                TypeIssue::IncompatibleOperand,
                                format!("cannot negate {}", other),
                            ))
                        }
                    },
                };
                *ty = Some(result.clone());
                return Ok(result);
            }
        };
        Ok(inferred)
    }

    /// Dotted names this expression references (for dependency analysis).
    pub fn references(&self, out: &mut Vec<String>) {
        match self {
            Expr::Ident { parts, .. } => out.push(parts.join(".")),
            Expr::StringLit { parts, .. } => {
                for part in parts {
                    if let StringPart::Placeholder { expr, .. } = part {
                        expr.references(out);
                    }
                }
            }
            Expr::ArrayLit { items, .. } => {
                for item in items {
                    item.references(out);
                }
            }
            Expr::PairLit { left, right, .. } => {
                left.references(out);
                right.references(out);
            }
            Expr::MapLit { entries, .. } => {
                for (k, v) in entries {
                    k.references(out);
                    v.references(out);
                }
            }
            Expr::StructLit { members, .. } => {
                for (_, v) in members {
                    v.references(out);
                }
            }
            Expr::At { base, index, .. } => {
                base.references(out);
                index.references(out);
            }
            Expr::Member { base, .. } => base.references(out),
            Expr::IfThenElse {
                condition,
                then_expr,
                else_expr,
                ..
            } => {
                condition.references(out);
                then_expr.references(out);
                else_expr.references(out);
            }
            Expr::Apply { args, .. } => {
                for arg in args {
                    arg.references(out);
                }
            }
            Expr::Binary { lhs, rhs, .. } => {
                lhs.references(out);
                rhs.references(out);
            }
            Expr::Unary { operand, .. } => operand.references(out),
            _ => {}
        }
    }

    /// Literal constant value, when the expression is one.
    pub fn literal(&self) -> Option<crate::value::Value> {
        use crate::value::Value;
        match self {
            Expr::BooleanLit { value, .. } => Some(Value::boolean(*value)),
            Expr::IntLit { value, .. } => Some(Value::int(*value)),
            Expr::FloatLit { value, .. } => Some(Value::float(*value)),
            Expr::NoneLit { .. } => Some(Value::Null),
            Expr::StringLit { parts, .. } => match parts.as_slice() {
                [] => Some(Value::string("")),
                [StringPart::Text(t)] => Some(Value::string(t.clone())),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Resolve a dotted identifier against the type environment, walking
/// namespaces then pair/struct member access.
fn resolve_ident(loc: &SourceLoc, parts: &[String], ctx: &TypeContext) -> Result<Type, Error> {
    debug_assert!(!parts.is_empty());
    // Longest dotted prefix bound directly in the environment wins
    // (call outputs are bound as `call.output`).
    for split in (1..=parts.len()).rev() {
        let prefix = parts[..split].join(".");
        if let Some(found) = ctx.env.resolve(&prefix) {
            let mut current = found.clone();
            for member in &parts[split..] {
                current = member_type(loc, &current, member)?;
            }
            return Ok(current);
        }
    }
    if ctx.env.has_namespace(&parts.join(".")) {
        return Err(Error::static_issue(
            loc.clone(),
            TypeIssue::NoSuchName,
            format!("{} names a namespace, not a value", parts.join(".")),
        ));
    }
    Err(Error::static_issue(
        loc.clone(),
        TypeIssue::NoSuchName,
        format!("unknown identifier {}", parts.join(".")),
    ))
}

fn member_type(loc: &SourceLoc, base: &Type, member: &str) -> Result<Type, Error> {
    match base {
        Type::Pair { left, right, .. } => match member {
            "left" => Ok((**left).clone()),
            "right" => Ok((**right).clone()),
            _ => Err(Error::static_issue(
                loc.clone(),
                TypeIssue::NoSuchMember,
                format!("no such member '{}' on {}", member, base),
            )),
        },
        Type::StructInstance {
            members: Some(members),
            ..
        } => members.get(member).cloned().ok_or_else(|| {
            Error::static_issue(
                loc.clone(),
                TypeIssue::NoSuchMember,
                format!("no such member '{}' on {}", member, base),
            )
        }),
        Type::Object { members } => members.get(member).cloned().ok_or_else(|| {
            Error::static_issue(
                loc.clone(),
                TypeIssue::NoSuchMember,
                format!("no such member '{}'", member),
            )
        }),
        Type::Any { .. } => Ok(Type::any()),
        _ => Err(Error::static_issue(
            loc.clone(),
            TypeIssue::NoSuchMember,
            format!("no such member '{}' on {}", member, base),
        )),
    }
}

fn infer_binary(
    loc: &SourceLoc,
    op: BinOp,
    lt: &Type,
    rt: &Type,
    check_quant: bool,
) -> Result<Type, Error> {
    match op {
        BinOp::Add => {
            // String concatenation when either side is a string.
            let stringy = |t: &Type| {
                matches!(
                    t,
                    Type::String { .. } | Type::File { .. } | Type::Directory { .. }
                )
            };
            if stringy(lt) || stringy(rt) {
                let other = if stringy(lt) { rt } else { lt };
                if other
                    .clone()
                    .with_optional(false)
                    .coerces(&Type::string(false), false)
                {
                    return Ok(Type::string(false));
                }
                return Err(Error::static_issue(
                    loc.clone(),
                    TypeIssue::IncompatibleOperand,
                    format!("cannot concatenate {} and {}", lt, rt),
                ));
            }
            numeric_result(loc, op, lt, rt, check_quant)
        }
        BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => {
            numeric_result(loc, op, lt, rt, check_quant)
        }
        BinOp::Eq | BinOp::Neq => {
            if !lt.equatable(rt) {
                return Err(Error::static_issue(
                    loc.clone(),
                    TypeIssue::IncompatibleOperand,
                    format!("cannot test equality of {} and {}", lt, rt),
                ));
            }
            Ok(Type::boolean(false))
        }
        BinOp::Lt | BinOp::Lte | BinOp::Gt | BinOp::Gte => {
            if !lt.comparable(rt, check_quant) {
                return Err(Error::static_issue(
                    loc.clone(),
                    TypeIssue::IncompatibleOperand,
                    format!("cannot compare {} and {}", lt, rt),
                ));
            }
            Ok(Type::boolean(false))
        }
        BinOp::And | BinOp::Or => {
            for t in [lt, rt] {
                if !t.coerces(&Type::boolean(false), check_quant) {
                    return Err(Error::static_issue(
                        loc.clone(),
                        TypeIssue::IncompatibleOperand,
                        format!("{} operand must be Boolean, not {}", op.symbol(), t),
                    ));
                }
            }
            Ok(Type::boolean(false))
        }
    }
}

fn numeric_result(
    loc: &SourceLoc,
    op: BinOp,
    lt: &Type,
    rt: &Type,
    check_quant: bool,
) -> Result<Type, Error> {
    let int_t = Type::int(false);
    let float_t = Type::float(false);
    let l_int = lt.coerces(&int_t, check_quant) && !matches!(lt, Type::Float { .. });
    let r_int = rt.coerces(&int_t, check_quant) && !matches!(rt, Type::Float { .. });
    let l_num = l_int || lt.coerces(&float_t, check_quant);
    let r_num = r_int || rt.coerces(&float_t, check_quant);
    if !l_num || !r_num {
        return Err(Error::static_issue(
            loc.clone(),
            TypeIssue::IncompatibleOperand,
            format!("non-numeric operand to {}: {} / {}", op.symbol(), lt, rt),
        ));
    }
    if l_int && r_int {
        Ok(int_t)
    } else {
        Ok(float_t)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::BooleanLit { value, .. } => write!(f, "{}", value),
            Expr::IntLit { value, .. } => write!(f, "{}", value),
            Expr::FloatLit { value, .. } => write!(f, "{}", value),
            Expr::NoneLit { .. } => write!(f, "None"),
            Expr::StringLit { parts, .. } => {
                write!(f, "\"")?;
                for part in parts {
                    match part {
                        StringPart::Text(t) => write!(f, "{}", t)?,
                        StringPart::Placeholder { expr, .. } => write!(f, "~{{{}}}", expr)?,
                    }
                }
                write!(f, "\"")
            }
            Expr::ArrayLit { items, .. } => {
                let parts: Vec<String> = items.iter().map(|e| e.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Expr::PairLit { left, right, .. } => write!(f, "({}, {})", left, right),
            Expr::MapLit { entries, .. } => {
                let parts: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v))
                    .collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            Expr::StructLit { name, members, .. } => {
                let parts: Vec<String> = members
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v))
                    .collect();
                write!(
                    f,
                    "{} {{{}}}",
                    name.as_deref().unwrap_or("object"),
                    parts.join(", ")
                )
            }
            Expr::Ident { parts, .. } => write!(f, "{}", parts.join(".")),
            Expr::At { base, index, .. } => write!(f, "{}[{}]", base, index),
            Expr::Member { base, member, .. } => write!(f, "{}.{}", base, member),
            Expr::IfThenElse {
                condition,
                then_expr,
                else_expr,
                ..
            } => write!(f, "if {} then {} else {}", condition, then_expr, else_expr),
            Expr::Apply { function, args, .. } => {
                let parts: Vec<String> = args.iter().map(|e| e.to_string()).collect();
                write!(f, "{}({})", function, parts.join(", "))
            }
            Expr::Binary { op, lhs, rhs, .. } => write!(f, "({} {} {})", lhs, op.symbol(), rhs),
            Expr::Unary { op, operand, .. } => match op {
                UnOp::Not => write!(f, "!{}", operand),
                UnOp::Neg => write!(f, "-{}", operand),
            },
        }
    }
}
