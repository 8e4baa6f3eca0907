//! The WDL static type system.
//!
//! Atomic types (`Int`, `Boolean`, ...) and parametric containers
//! (`Array[T]`, `Map[K,V]`, `Pair[L,R]`, structs) are immutable enum values.
//! Any type may carry the optional quantifier (`T?`); arrays may carry the
//! nonempty quantifier (`Array[T]+`).
//!
//! Coercion between types yields a three-way verdict: allowed silently,
//! allowed with an advisory warning, or rejected. The notable warned cases
//! are stringification (`Int -> String`), path adoption
//! (`String -> File`), and passing an empty array literal to an
//! `Array[T]+` slot.

use crate::error::{Error, SourceLoc, TypeIssue};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Advisory warning attached to a legal-but-lossy coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoercionWarning {
    /// Non-string primitive flowing into a `String` slot.
    StringCoercion,
    /// `String` flowing into a `File` or `Directory` slot.
    FileCoercion,
    /// Possibly-empty array flowing into an `Array[T]+` slot.
    EmptyNonempty,
}

/// Verdict of [`Type::coerce_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    /// The types are identical (up to optionality widening).
    Identical,
    /// Coercion is allowed silently.
    Ok,
    /// Coercion is allowed but advisory.
    Warn(CoercionWarning),
}

impl Coercion {
    fn join(self, other: Coercion) -> Coercion {
        match (self, other) {
            (Coercion::Warn(w), _) | (_, Coercion::Warn(w)) => Coercion::Warn(w),
            (Coercion::Ok, _) | (_, Coercion::Ok) => Coercion::Ok,
            _ => Coercion::Identical,
        }
    }
}

/// A WDL type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Type {
    /// Inference placeholder; unifies with anything. `Any?` is the type of
    /// the `None` literal.
    Any { optional: bool },
    Boolean { optional: bool },
    Int { optional: bool },
    Float { optional: bool },
    String { optional: bool },
    File { optional: bool },
    Directory { optional: bool },
    Array {
        item: Box<Type>,
        optional: bool,
        nonempty: bool,
    },
    Map {
        key: Box<Type>,
        value: Box<Type>,
        optional: bool,
    },
    Pair {
        left: Box<Type>,
        right: Box<Type>,
        optional: bool,
    },
    /// Named struct; `members` is `None` until resolved against the
    /// document's typedefs.
    StructInstance {
        name: String,
        members: Option<IndexMap<String, Type>>,
        optional: bool,
    },
    /// Legacy record type, tolerated only for struct initialization and
    /// `Map[String,String]` flows.
    Object { members: IndexMap<String, Type> },
}

impl Type {
    pub fn any() -> Self {
        Type::Any { optional: false }
    }

    /// The type of the `None` literal.
    pub fn none() -> Self {
        Type::Any { optional: true }
    }

    pub fn boolean(optional: bool) -> Self {
        Type::Boolean { optional }
    }

    pub fn int(optional: bool) -> Self {
        Type::Int { optional }
    }

    pub fn float(optional: bool) -> Self {
        Type::Float { optional }
    }

    pub fn string(optional: bool) -> Self {
        Type::String { optional }
    }

    pub fn file(optional: bool) -> Self {
        Type::File { optional }
    }

    pub fn directory(optional: bool) -> Self {
        Type::Directory { optional }
    }

    pub fn array(item: Type, optional: bool, nonempty: bool) -> Self {
        Type::Array {
            item: Box::new(item),
            optional,
            nonempty,
        }
    }

    pub fn map(key: Type, value: Type, optional: bool) -> Self {
        Type::Map {
            key: Box::new(key),
            value: Box::new(value),
            optional,
        }
    }

    pub fn pair(left: Type, right: Type, optional: bool) -> Self {
        Type::Pair {
            left: Box::new(left),
            right: Box::new(right),
            optional,
        }
    }

    pub fn struct_instance(name: impl Into<String>, optional: bool) -> Self {
        Type::StructInstance {
            name: name.into(),
            members: None,
            optional,
        }
    }

    pub fn object(members: IndexMap<String, Type>) -> Self {
        Type::Object { members }
    }

    pub fn is_optional(&self) -> bool {
        match self {
            Type::Any { optional }
            | Type::Boolean { optional }
            | Type::Int { optional }
            | Type::Float { optional }
            | Type::String { optional }
            | Type::File { optional }
            | Type::Directory { optional }
            | Type::Array { optional, .. }
            | Type::Map { optional, .. }
            | Type::Pair { optional, .. }
            | Type::StructInstance { optional, .. } => *optional,
            Type::Object { .. } => false,
        }
    }

    pub fn is_nonempty(&self) -> bool {
        matches!(self, Type::Array { nonempty: true, .. })
    }

    pub fn with_optional(mut self, value: bool) -> Self {
        match &mut self {
            Type::Any { optional }
            | Type::Boolean { optional }
            | Type::Int { optional }
            | Type::Float { optional }
            | Type::String { optional }
            | Type::File { optional }
            | Type::Directory { optional }
            | Type::Array { optional, .. }
            | Type::Map { optional, .. }
            | Type::Pair { optional, .. }
            | Type::StructInstance { optional, .. } => *optional = value,
            Type::Object { .. } => {}
        }
        self
    }

    pub fn with_nonempty(mut self, value: bool) -> Self {
        if let Type::Array { nonempty, .. } = &mut self {
            *nonempty = value;
        }
        self
    }

    /// Inner parameter types of a container type.
    pub fn parameters(&self) -> Vec<&Type> {
        match self {
            Type::Array { item, .. } => vec![item],
            Type::Map { key, value, .. } => vec![key, value],
            Type::Pair { left, right, .. } => vec![left, right],
            Type::StructInstance {
                members: Some(m), ..
            } => m.values().collect(),
            Type::Object { members } => members.values().collect(),
            _ => vec![],
        }
    }

    /// Whether a value of `self` may flow into a slot of `target`.
    pub fn coerces(&self, target: &Type, check_quant: bool) -> bool {
        self.coerce_to(target, check_quant).is_ok()
    }

    /// Decide coercion from `self` into a slot of type `target`.
    ///
    /// With `check_quant` set, `T? -> T` is rejected as a
    /// [`TypeIssue::QuantityCoercion`]; relaxing it also admits the
    /// `T -> Array[T]` promotion that draft-2 documents rely on.
    pub fn coerce_to(&self, target: &Type, check_quant: bool) -> Result<Coercion, Error> {
        if self == target {
            return Ok(Coercion::Identical);
        }

        // Any bridges both directions; only quantifiers are checked.
        if matches!(self, Type::Any { .. }) || matches!(target, Type::Any { .. }) {
            self.check_quantifier(target, check_quant)?;
            return Ok(Coercion::Ok);
        }

        if !check_quant {
            if let Type::Array { item, .. } = target {
                if self.coerces(item, check_quant) {
                    return Ok(Coercion::Ok);
                }
            }
        }

        let verdict = match (self, target) {
            (Type::Boolean { .. }, Type::Boolean { .. })
            | (Type::Int { .. }, Type::Int { .. })
            | (Type::Float { .. }, Type::Float { .. })
            | (Type::String { .. }, Type::String { .. })
            | (Type::File { .. }, Type::File { .. })
            | (Type::Directory { .. }, Type::Directory { .. }) => Coercion::Ok,

            // Numeric widening.
            (Type::Int { .. }, Type::Float { .. }) => Coercion::Ok,

            // Stringification of primitives, with advisory warning.
            (
                Type::Boolean { .. } | Type::Int { .. } | Type::Float { .. },
                Type::String { .. },
            ) => Coercion::Warn(CoercionWarning::StringCoercion),
            (Type::File { .. } | Type::Directory { .. }, Type::String { .. }) => {
                Coercion::Warn(CoercionWarning::StringCoercion)
            }

            // Path adoption at slot boundaries.
            (Type::String { .. }, Type::File { .. } | Type::Directory { .. }) => {
                Coercion::Warn(CoercionWarning::FileCoercion)
            }
            (Type::String { .. }, Type::Int { .. } | Type::Float { .. }) => Coercion::Ok,

            (
                Type::Array {
                    item: from_item,
                    nonempty: from_nonempty,
                    ..
                },
                Type::Array {
                    item: to_item,
                    nonempty: to_nonempty,
                    ..
                },
            ) => {
                let inner = from_item.coerce_to(to_item, check_quant)?;
                if *to_nonempty && !*from_nonempty {
                    inner.join(Coercion::Warn(CoercionWarning::EmptyNonempty))
                } else {
                    inner.join(Coercion::Ok)
                }
            }

            // Array stringifies when its items do.
            (Type::Array { item, .. }, Type::String { .. }) => {
                item.coerce_to(&Type::string(false), check_quant)?;
                Coercion::Warn(CoercionWarning::StringCoercion)
            }

            (
                Type::Map {
                    key: fk, value: fv, ..
                },
                Type::Map {
                    key: tk, value: tv, ..
                },
            ) => {
                let a = fk.coerce_to(tk, check_quant)?;
                let b = fv.coerce_to(tv, check_quant)?;
                a.join(b).join(Coercion::Ok)
            }

            (
                Type::Pair {
                    left: fl,
                    right: fr,
                    ..
                },
                Type::Pair {
                    left: tl,
                    right: tr,
                    ..
                },
            ) => {
                let a = fl.coerce_to(tl, check_quant)?;
                let b = fr.coerce_to(tr, check_quant)?;
                a.join(b).join(Coercion::Ok)
            }

            (
                Type::Map { key, value, .. },
                Type::StructInstance {
                    members: Some(to_members),
                    ..
                },
            ) => {
                // Map keys must be strings naming struct members; values
                // must fit every member type. Precise key matching happens
                // on the value side at runtime.
                key.coerce_to(&Type::string(false), check_quant)?;
                for member in to_members.values() {
                    value.coerce_to(member, check_quant)?;
                }
                Coercion::Ok
            }

            (
                Type::StructInstance {
                    name: from_name,
                    members: from_members,
                    ..
                },
                Type::StructInstance {
                    name: to_name,
                    members: to_members,
                    ..
                },
            ) => {
                if let (Some(f), Some(t)) = (from_members, to_members) {
                    if struct_type_id(f) != struct_type_id(t) {
                        return Err(Error::type_mismatch(
                            SourceLoc::unknown(),
                            to_name,
                            from_name,
                        ));
                    }
                } else if from_name != to_name {
                    return Err(Error::type_mismatch(
                        SourceLoc::unknown(),
                        to_name,
                        from_name,
                    ));
                }
                Coercion::Ok
            }

            (
                Type::Object { members },
                Type::StructInstance {
                    members: Some(to_members),
                    ..
                },
            ) => {
                for (name, member_ty) in to_members {
                    match members.get(name) {
                        Some(have) => {
                            have.coerce_to(member_ty, check_quant)?;
                        }
                        None if member_ty.is_optional() => {}
                        None => {
                            return Err(Error::static_issue(
                                SourceLoc::unknown(),
                                TypeIssue::StaticTypeMismatch,
                                format!("missing non-optional struct member {}", name),
                            ))
                        }
                    }
                }
                Coercion::Ok
            }

            (Type::Object { members }, Type::Map { key, value, .. }) => {
                Type::string(false).coerce_to(key, check_quant)?;
                for member in members.values() {
                    member.coerce_to(value, check_quant)?;
                }
                Coercion::Ok
            }

            (Type::Object { .. }, Type::Object { .. }) => Coercion::Ok,

            _ => {
                return Err(Error::type_mismatch(
                    SourceLoc::unknown(),
                    &target.to_string(),
                    &self.to_string(),
                ))
            }
        };

        self.check_quantifier(target, check_quant)?;
        Ok(verdict)
    }

    /// Reject `T? -> T` under strict quantifier checking.
    pub fn check_quantifier(&self, target: &Type, check_quant: bool) -> Result<(), Error> {
        if check_quant
            && self.is_optional()
            && !target.is_optional()
            && !matches!(target, Type::Any { .. })
        {
            return Err(Error::static_issue(
                SourceLoc::unknown(),
                TypeIssue::QuantityCoercion,
                format!("Cannot coerce {} to {}", self, target),
            ));
        }
        Ok(())
    }

    /// Whether `==`/`!=` is defined between the types.
    pub fn equatable(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Any { .. }, _) | (_, Type::Any { .. }) => true,
            (Type::Object { .. }, _) | (_, Type::Object { .. }) => false,
            (Type::Int { .. }, Type::Float { .. }) | (Type::Float { .. }, Type::Int { .. }) => true,
            (Type::File { .. }, Type::String { .. }) | (Type::String { .. }, Type::File { .. }) => {
                true
            }
            (Type::Boolean { .. }, Type::Boolean { .. })
            | (Type::Int { .. }, Type::Int { .. })
            | (Type::Float { .. }, Type::Float { .. })
            | (Type::String { .. }, Type::String { .. })
            | (Type::File { .. }, Type::File { .. })
            | (Type::Directory { .. }, Type::Directory { .. }) => true,
            (Type::Array { item: a, .. }, Type::Array { item: b, .. }) => a.equatable(b),
            (
                Type::Map {
                    key: ak, value: av, ..
                },
                Type::Map {
                    key: bk, value: bv, ..
                },
            ) => ak.equatable(bk) && av.equatable(bv),
            (
                Type::Pair {
                    left: al,
                    right: ar,
                    ..
                },
                Type::Pair {
                    left: bl,
                    right: br,
                    ..
                },
            ) => al.equatable(bl) && ar.equatable(br),
            (
                Type::StructInstance {
                    members: Some(a), ..
                },
                Type::StructInstance {
                    members: Some(b), ..
                },
            ) => struct_type_id(a) == struct_type_id(b),
            _ => false,
        }
    }

    /// Whether `<`/`<=`/`>`/`>=` is defined between the types.
    pub fn comparable(&self, other: &Type, check_quant: bool) -> bool {
        if check_quant && (self.is_optional() || other.is_optional()) {
            return false;
        }
        matches!(
            (self, other),
            (Type::Int { .. }, Type::Int { .. })
                | (Type::Int { .. }, Type::Float { .. })
                | (Type::Float { .. }, Type::Int { .. })
                | (Type::Float { .. }, Type::Float { .. })
                | (Type::String { .. }, Type::String { .. })
                | (Type::Boolean { .. }, Type::Boolean { .. })
        )
    }

    /// Resolve named struct references against the document typedefs.
    pub fn resolve_structs(&self, typedefs: &IndexMap<String, IndexMap<String, Type>>) -> Result<Type, Error> {
        match self {
            Type::StructInstance {
                name,
                members: None,
                optional,
            } => match typedefs.get(name) {
                Some(members) => {
                    let mut resolved = IndexMap::new();
                    for (k, v) in members {
                        resolved.insert(k.clone(), v.resolve_structs(typedefs)?);
                    }
                    Ok(Type::StructInstance {
                        name: name.clone(),
                        members: Some(resolved),
                        optional: *optional,
                    })
                }
                None => Err(Error::static_issue(
                    SourceLoc::unknown(),
                    TypeIssue::NoSuchName,
                    format!("unknown struct type {}", name),
                )),
            },
            Type::Array {
                item,
                optional,
                nonempty,
            } => Ok(Type::Array {
                item: Box::new(item.resolve_structs(typedefs)?),
                optional: *optional,
                nonempty: *nonempty,
            }),
            Type::Map {
                key,
                value,
                optional,
            } => Ok(Type::Map {
                key: Box::new(key.resolve_structs(typedefs)?),
                value: Box::new(value.resolve_structs(typedefs)?),
                optional: *optional,
            }),
            Type::Pair {
                left,
                right,
                optional,
            } => Ok(Type::Pair {
                left: Box::new(left.resolve_structs(typedefs)?),
                right: Box::new(right.resolve_structs(typedefs)?),
                optional: *optional,
            }),
            other => Ok(other.clone()),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = match self {
            Type::Any { optional: true } => "None".to_string(),
            Type::Any { .. } => "Any".to_string(),
            Type::Boolean { .. } => "Boolean".to_string(),
            Type::Int { .. } => "Int".to_string(),
            Type::Float { .. } => "Float".to_string(),
            Type::String { .. } => "String".to_string(),
            Type::File { .. } => "File".to_string(),
            Type::Directory { .. } => "Directory".to_string(),
            Type::Array { item, nonempty, .. } => {
                format!("Array[{}]{}", item, if *nonempty { "+" } else { "" })
            }
            Type::Map { key, value, .. } => format!("Map[{},{}]", key, value),
            Type::Pair { left, right, .. } => format!("Pair[{},{}]", left, right),
            Type::StructInstance { name, .. } => name.clone(),
            Type::Object { .. } => "Object".to_string(),
        };
        let quant = if self.is_optional() && !matches!(self, Type::Any { optional: true }) {
            "?"
        } else {
            ""
        };
        write!(f, "{}{}", base, quant)
    }
}

/// Canonical identity of a struct type: members under aliasing, order-free.
pub fn struct_type_id(members: &IndexMap<String, Type>) -> String {
    let mut parts: Vec<String> = members
        .iter()
        .map(|(name, ty)| {
            let inner = if let Type::StructInstance {
                members: Some(nested),
                ..
            } = ty
            {
                format!(
                    "{}{}",
                    struct_type_id(nested),
                    if ty.is_optional() { "?" } else { "" }
                )
            } else {
                ty.to_string()
            };
            format!("{}:{}", name, inner)
        })
        .collect();
    parts.sort();
    format!("struct({})", parts.join(","))
}

/// Least upper bound of a list of types; `Any` when none exists (the caller
/// turns that into an error for container literals).
pub fn unify(types: &[&Type], check_quant: bool) -> Type {
    if types.is_empty() {
        return Type::any();
    }

    // Seed with the first informative type.
    let mut unified = (*types
        .iter()
        .find(|t| !matches!(t, Type::String { .. } | Type::Any { .. }))
        .unwrap_or(&types[0]))
    .clone();

    let mut optional = false;
    let mut all_nonempty = true;

    for ty in types {
        if ty.is_optional() {
            optional = true;
        }
        if !ty.is_nonempty() {
            all_nonempty = false;
        }
        if matches!((&unified, ty), (Type::Int { .. }, Type::Float { .. })) {
            unified = Type::float(false);
        }
        if matches!(ty, Type::String { .. })
            && !matches!(
                &unified,
                Type::Array { .. } | Type::Pair { .. } | Type::Map { .. }
            )
        {
            unified = Type::string(false);
        }
    }

    if matches!(&unified, Type::Array { .. }) {
        unified = unified.with_nonempty(all_nonempty);
    }
    unified = unified.with_optional(optional);

    for ty in types {
        if !ty.coerces(&unified, check_quant) {
            return Type::any();
        }
    }
    unified
}
