//! Runtime values.
//!
//! Each value carries its own [`Type`] tag, so an `Int` stored in a `Float?`
//! slot remembers that it has been promoted and made optional. `File` and
//! `Directory` wrap an opaque virtualized path string which the task runtime
//! maps between host and container views.

use crate::error::{Error, SourceLoc};
use crate::types::Type;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use std::fmt;

/// A WDL runtime value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absent optional (`None`).
    Null,
    Boolean { value: bool, ty: Type },
    Int { value: i64, ty: Type },
    Float { value: f64, ty: Type },
    String { value: String, ty: Type },
    File { path: String, ty: Type },
    Directory { path: String, ty: Type },
    Array { items: Vec<Value>, ty: Type },
    Map {
        entries: Vec<(Value, Value)>,
        ty: Type,
    },
    Pair {
        left: Box<Value>,
        right: Box<Value>,
        ty: Type,
    },
    Struct {
        members: IndexMap<String, Value>,
        ty: Type,
    },
}

static NULL_TYPE: once_cell::sync::Lazy<Type> = once_cell::sync::Lazy::new(Type::none);

impl Value {
    pub fn null() -> Self {
        Value::Null
    }

    pub fn boolean(value: bool) -> Self {
        Value::Boolean {
            value,
            ty: Type::boolean(false),
        }
    }

    pub fn int(value: i64) -> Self {
        Value::Int {
            value,
            ty: Type::int(false),
        }
    }

    pub fn float(value: f64) -> Self {
        Value::Float {
            value,
            ty: Type::float(false),
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Value::String {
            value: value.into(),
            ty: Type::string(false),
        }
    }

    pub fn file(path: impl Into<String>) -> Result<Self, Error> {
        let path = path.into();
        if path.len() > 1 && path.ends_with('/') {
            return Err(Error::input(format!("invalid File path: {}", path)));
        }
        Ok(Value::File {
            path,
            ty: Type::file(false),
        })
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Value::Directory {
            path: path.into(),
            ty: Type::directory(false),
        }
    }

    pub fn array(item_ty: Type, items: Vec<Value>) -> Self {
        let nonempty = !items.is_empty();
        Value::Array {
            items,
            ty: Type::array(item_ty, false, nonempty),
        }
    }

    pub fn map(key_ty: Type, value_ty: Type, entries: Vec<(Value, Value)>) -> Self {
        Value::Map {
            entries,
            ty: Type::map(key_ty, value_ty, false),
        }
    }

    pub fn pair(left: Value, right: Value) -> Self {
        let ty = Type::pair(left.ty().clone(), right.ty().clone(), false);
        Value::Pair {
            left: Box::new(left),
            right: Box::new(right),
            ty,
        }
    }

    /// Build a struct value, filling omitted optional members with `None`
    /// and rejecting omitted required ones.
    pub fn struct_value(ty: Type, mut members: IndexMap<String, Value>) -> Result<Self, Error> {
        if let Type::StructInstance {
            members: Some(member_types),
            ..
        } = &ty
        {
            for (name, member_ty) in member_types {
                if !members.contains_key(name) {
                    if member_ty.is_optional() {
                        members.insert(name.clone(), Value::Null);
                    } else {
                        return Err(Error::input(format!(
                            "missing required struct member {}",
                            name
                        )));
                    }
                }
            }
        }
        Ok(Value::Struct { members, ty })
    }

    /// An `Object` value for a bag of members with no declared struct type.
    pub fn object(members: IndexMap<String, Value>) -> Self {
        let member_types = members
            .iter()
            .map(|(k, v)| (k.clone(), v.ty().clone()))
            .collect();
        Value::Struct {
            members,
            ty: Type::object(member_types),
        }
    }

    pub fn ty(&self) -> &Type {
        match self {
            Value::Null => &NULL_TYPE,
            Value::Boolean { ty, .. }
            | Value::Int { ty, .. }
            | Value::Float { ty, .. }
            | Value::String { ty, .. }
            | Value::File { ty, .. }
            | Value::Directory { ty, .. }
            | Value::Array { ty, .. }
            | Value::Map { ty, .. }
            | Value::Pair { ty, .. }
            | Value::Struct { ty, .. } => ty,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float { value, .. } => Some(*value),
            Value::Int { value, .. } => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String { value, .. } => Some(value),
            Value::File { path, .. } | Value::Directory { path, .. } => Some(path),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array { items, .. } => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map { entries, .. } => Some(entries),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Struct { members, .. } => Some(members),
            _ => None,
        }
    }

    /// Every `File`/`Directory` path reachable from this value.
    pub fn collect_paths(&self, out: &mut Vec<String>) {
        match self {
            Value::File { path, .. } | Value::Directory { path, .. } => out.push(path.clone()),
            Value::Array { items, .. } => {
                for item in items {
                    item.collect_paths(out);
                }
            }
            Value::Map { entries, .. } => {
                for (k, v) in entries {
                    k.collect_paths(out);
                    v.collect_paths(out);
                }
            }
            Value::Pair { left, right, .. } => {
                left.collect_paths(out);
                right.collect_paths(out);
            }
            Value::Struct { members, .. } => {
                for v in members.values() {
                    v.collect_paths(out);
                }
            }
            _ => {}
        }
    }

    /// Rewrite every `File`/`Directory` path through `f`.
    pub fn map_paths<F>(&self, f: &mut F) -> Result<Value, Error>
    where
        F: FnMut(&str, bool) -> Result<String, Error>,
    {
        Ok(match self {
            Value::File { path, ty } => Value::File {
                path: f(path, false)?,
                ty: ty.clone(),
            },
            Value::Directory { path, ty } => Value::Directory {
                path: f(path, true)?,
                ty: ty.clone(),
            },
            Value::Array { items, ty } => Value::Array {
                items: items
                    .iter()
                    .map(|v| v.map_paths(f))
                    .collect::<Result<_, _>>()?,
                ty: ty.clone(),
            },
            Value::Map { entries, ty } => Value::Map {
                entries: entries
                    .iter()
                    .map(|(k, v)| Ok((k.map_paths(f)?, v.map_paths(f)?)))
                    .collect::<Result<_, Error>>()?,
                ty: ty.clone(),
            },
            Value::Pair { left, right, ty } => Value::Pair {
                left: Box::new(left.map_paths(f)?),
                right: Box::new(right.map_paths(f)?),
                ty: ty.clone(),
            },
            Value::Struct { members, ty } => Value::Struct {
                members: members
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), v.map_paths(f)?)))
                    .collect::<Result<_, Error>>()?,
                ty: ty.clone(),
            },
            other => other.clone(),
        })
    }

    /// JSON wire form (spec inputs/outputs formats).
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Boolean { value, .. } => json!(value),
            Value::Int { value, .. } => json!(value),
            Value::Float { value, .. } => {
                JsonValue::Number(serde_json::Number::from_f64(*value).unwrap_or_else(|| 0.into()))
            }
            Value::String { value, .. } => json!(value),
            Value::File { path, .. } | Value::Directory { path, .. } => json!(path),
            Value::Array { items, .. } => {
                JsonValue::Array(items.iter().map(|v| v.to_json()).collect())
            }
            Value::Map { entries, .. } => {
                let mut obj = JsonMap::new();
                for (k, v) in entries {
                    obj.insert(k.to_display_string(), v.to_json());
                }
                JsonValue::Object(obj)
            }
            Value::Pair { left, right, .. } => json!({
                "left": left.to_json(),
                "right": right.to_json(),
            }),
            Value::Struct { members, .. } => {
                let obj: JsonMap<String, JsonValue> = members
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect();
                JsonValue::Object(obj)
            }
        }
    }

    /// Untyped JSON intake; containers infer item types from contents.
    pub fn from_json(json: JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::boolean(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::int(i)
                } else {
                    Value::float(n.as_f64().unwrap_or(0.0))
                }
            }
            JsonValue::String(s) => Value::string(s),
            JsonValue::Array(items) => {
                let values: Vec<Value> = items.into_iter().map(Value::from_json).collect();
                let item_ty = values
                    .first()
                    .map(|v| v.ty().clone())
                    .unwrap_or_else(Type::any);
                Value::array(item_ty, values)
            }
            JsonValue::Object(obj) => {
                let members: IndexMap<String, Value> = obj
                    .into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect();
                Value::object(members)
            }
        }
    }

    /// Typed JSON intake: parse then coerce into the declared type.
    pub fn from_json_typed(ty: &Type, json: JsonValue) -> Result<Value, Error> {
        Value::from_json(json).coerce(ty)
    }

    /// Coerce this value into `target`, materializing promotions.
    pub fn coerce(&self, target: &Type) -> Result<Value, Error> {
        if self.ty() == target {
            return Ok(self.clone());
        }
        match self {
            Value::Null => {
                if target.is_optional() || matches!(target, Type::Any { .. }) {
                    Ok(Value::Null)
                } else {
                    Err(Error::eval(
                        SourceLoc::unknown(),
                        format!("cannot use None as non-optional {}", target),
                    ))
                }
            }
            Value::Array { items, .. } => match target {
                Type::Array {
                    item: item_ty,
                    nonempty,
                    ..
                } => {
                    if *nonempty && items.is_empty() {
                        return Err(Error::eval(
                            SourceLoc::unknown(),
                            "empty array for Array+ slot",
                        ));
                    }
                    let coerced: Result<Vec<Value>, Error> =
                        items.iter().map(|v| v.coerce(item_ty)).collect();
                    Ok(Value::Array {
                        items: coerced?,
                        ty: target.clone(),
                    })
                }
                Type::String { .. } => Ok(Value::string(self.to_display_string())),
                Type::Any { .. } => Ok(self.clone()),
                _ => Err(self.coerce_error(target)),
            },
            Value::Map { entries, .. } => match target {
                Type::Map {
                    key: key_ty,
                    value: value_ty,
                    ..
                } => {
                    let coerced: Result<Vec<(Value, Value)>, Error> = entries
                        .iter()
                        .map(|(k, v)| Ok((k.coerce(key_ty)?, v.coerce(value_ty)?)))
                        .collect();
                    Ok(Value::Map {
                        entries: coerced?,
                        ty: target.clone(),
                    })
                }
                Type::StructInstance {
                    members: Some(member_types),
                    ..
                } => {
                    let mut members = IndexMap::new();
                    for (k, v) in entries {
                        let key = k
                            .as_str()
                            .map(str::to_string)
                            .unwrap_or_else(|| k.to_display_string());
                        match member_types.get(&key) {
                            Some(member_ty) => {
                                members.insert(key, v.coerce(member_ty)?);
                            }
                            None => {
                                return Err(Error::eval(
                                    SourceLoc::unknown(),
                                    format!("map key {} is not a member of {}", key, target),
                                ))
                            }
                        }
                    }
                    Value::struct_value(target.clone(), members)
                }
                Type::Object { .. } => {
                    let mut members = IndexMap::new();
                    for (k, v) in entries {
                        let key = k
                            .as_str()
                            .map(str::to_string)
                            .unwrap_or_else(|| k.to_display_string());
                        members.insert(key, v.clone());
                    }
                    Ok(Value::object(members))
                }
                Type::Any { .. } => Ok(self.clone()),
                _ => Err(self.coerce_error(target)),
            },
            Value::Pair { left, right, .. } => match target {
                Type::Pair {
                    left: lt,
                    right: rt,
                    ..
                } => Ok(Value::Pair {
                    left: Box::new(left.coerce(lt)?),
                    right: Box::new(right.coerce(rt)?),
                    ty: target.clone(),
                }),
                Type::Any { .. } => Ok(self.clone()),
                _ => Err(self.coerce_error(target)),
            },
            Value::Struct { members, .. } => match target {
                Type::StructInstance {
                    members: Some(member_types),
                    ..
                } => {
                    let mut out = IndexMap::new();
                    for (name, member_ty) in member_types {
                        match members.get(name) {
                            Some(v) => {
                                out.insert(name.clone(), v.coerce(member_ty)?);
                            }
                            None if member_ty.is_optional() => {
                                out.insert(name.clone(), Value::Null);
                            }
                            None => {
                                return Err(Error::eval(
                                    SourceLoc::unknown(),
                                    format!("missing required struct member {}", name),
                                ))
                            }
                        }
                    }
                    Ok(Value::Struct {
                        members: out,
                        ty: target.clone(),
                    })
                }
                Type::Map {
                    key: key_ty,
                    value: value_ty,
                    ..
                } => {
                    let entries: Result<Vec<(Value, Value)>, Error> = members
                        .iter()
                        .map(|(k, v)| {
                            Ok((
                                Value::string(k.clone()).coerce(key_ty)?,
                                v.coerce(value_ty)?,
                            ))
                        })
                        .collect();
                    Ok(Value::Map {
                        entries: entries?,
                        ty: target.clone(),
                    })
                }
                Type::Object { .. } | Type::Any { .. } => Ok(self.clone()),
                _ => Err(self.coerce_error(target)),
            },
            primitive => primitive.coerce_primitive(target),
        }
    }

    fn coerce_primitive(&self, target: &Type) -> Result<Value, Error> {
        match target {
            Type::Any { .. } => return Ok(self.clone()),
            Type::String { .. } => return Ok(Value::string(self.to_display_string())),
            Type::Array { item, .. } => {
                // T -> Array[T] promotion for relaxed-quantifier documents.
                let coerced = self.coerce(item)?;
                return Ok(Value::array(item.as_ref().clone(), vec![coerced]));
            }
            _ => {}
        }
        match (self, target) {
            (Value::Boolean { value, .. }, Type::Boolean { .. }) => {
                Ok(Value::Boolean {
                    value: *value,
                    ty: target.clone(),
                })
            }
            (Value::Int { value, .. }, Type::Int { .. }) => Ok(Value::Int {
                value: *value,
                ty: target.clone(),
            }),
            (Value::Int { value, .. }, Type::Float { .. }) => Ok(Value::Float {
                value: *value as f64,
                ty: target.clone(),
            }),
            (Value::Float { value, .. }, Type::Float { .. }) => Ok(Value::Float {
                value: *value,
                ty: target.clone(),
            }),
            (Value::String { value, .. }, Type::File { .. }) => Ok(Value::File {
                path: value.clone(),
                ty: target.clone(),
            }),
            (Value::String { value, .. }, Type::Directory { .. }) => Ok(Value::Directory {
                path: value.clone(),
                ty: target.clone(),
            }),
            (Value::String { value, .. }, Type::Int { .. }) => {
                value.trim().parse::<i64>().map(Value::int).map_err(|_| {
                    Error::eval(
                        SourceLoc::unknown(),
                        format!("cannot coerce \"{}\" to Int", value),
                    )
                })
            }
            (Value::String { value, .. }, Type::Float { .. }) => {
                value.trim().parse::<f64>().map(Value::float).map_err(|_| {
                    Error::eval(
                        SourceLoc::unknown(),
                        format!("cannot coerce \"{}\" to Float", value),
                    )
                })
            }
            (Value::File { path, .. }, Type::File { .. }) => Ok(Value::File {
                path: path.clone(),
                ty: target.clone(),
            }),
            (Value::File { path, .. }, Type::String { .. }) => Ok(Value::string(path.clone())),
            (Value::Directory { path, .. }, Type::Directory { .. }) => Ok(Value::Directory {
                path: path.clone(),
                ty: target.clone(),
            }),
            _ => Err(self.coerce_error(target)),
        }
    }

    fn coerce_error(&self, target: &Type) -> Error {
        Error::eval(
            SourceLoc::unknown(),
            format!("cannot coerce {} to {}", self.ty(), target),
        )
    }

    /// The string produced by placeholder interpolation (no quotes).
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Boolean { value, .. } => value.to_string(),
            Value::Int { value, .. } => value.to_string(),
            Value::Float { value, .. } => format!("{:.6}", value),
            Value::String { value, .. } => value.clone(),
            Value::File { path, .. } | Value::Directory { path, .. } => path.clone(),
            Value::Array { items, .. } => {
                let parts: Vec<String> = items.iter().map(|v| v.to_display_string()).collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Map { entries, .. } => {
                let parts: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.to_display_string(), v.to_display_string()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Value::Pair { left, right, .. } => {
                format!("({}, {})", left.to_display_string(), right.to_display_string())
            }
            Value::Struct { members, .. } => {
                let parts: Vec<String> = members
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.to_display_string()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
        }
    }

    /// Structural equality with numeric promotion; errors when the types are
    /// not equatable at all.
    pub fn equals(&self, other: &Value) -> Result<bool, Error> {
        if !self.ty().equatable(other.ty()) && !self.is_null() && !other.is_null() {
            return Err(Error::eval(
                SourceLoc::unknown(),
                format!("cannot compare {} with {}", self.ty(), other.ty()),
            ));
        }
        Ok(match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Boolean { value: a, .. }, Value::Boolean { value: b, .. }) => a == b,
            (Value::Int { value: a, .. }, Value::Int { value: b, .. }) => a == b,
            (Value::Float { value: a, .. }, Value::Float { value: b, .. }) => a == b,
            (Value::Int { value: a, .. }, Value::Float { value: b, .. }) => (*a as f64) == *b,
            (Value::Float { value: a, .. }, Value::Int { value: b, .. }) => *a == (*b as f64),
            (a, b)
                if a.as_str().is_some() && b.as_str().is_some() =>
            {
                a.as_str() == b.as_str()
            }
            (Value::Array { items: a, .. }, Value::Array { items: b, .. }) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|(x, y)| x.equals(y).unwrap_or(false))
            }
            (Value::Pair { left: al, right: ar, .. }, Value::Pair { left: bl, right: br, .. }) => {
                al.equals(bl).unwrap_or(false) && ar.equals(br).unwrap_or(false)
            }
            (Value::Map { entries: a, .. }, Value::Map { entries: b, .. }) => {
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|((ak, av), (bk, bv))| {
                        ak.equals(bk).unwrap_or(false) && av.equals(bv).unwrap_or(false)
                    })
            }
            (Value::Struct { members: a, .. }, Value::Struct { members: b, .. }) => {
                a.len() == b.len()
                    && a.iter().all(|(k, av)| {
                        b.get(k).map(|bv| av.equals(bv).unwrap_or(false)) == Some(true)
                    })
            }
            _ => false,
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "None"),
            Value::String { value, .. } => write!(f, "\"{}\"", value),
            Value::File { path, .. } | Value::Directory { path, .. } => write!(f, "\"{}\"", path),
            other => write!(f, "{}", other.to_display_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn constructors_and_accessors() {
        assert_eq!(Value::int(3).as_int(), Some(3));
        assert_eq!(Value::boolean(true).as_bool(), Some(true));
        assert_eq!(Value::string("hi").as_str(), Some("hi"));
        assert_eq!(Value::int(3).as_float(), Some(3.0));
    }

    #[test]
    fn file_path_validation() {
        assert!(Value::file("a/b.txt").is_ok());
        assert!(Value::file("a/b/").is_err());
    }

    #[test]
    fn json_round_trip_simple() {
        let v = Value::array(
            Type::int(false),
            vec![Value::int(1), Value::int(2), Value::int(3)],
        );
        assert_eq!(v.to_json(), json!([1, 2, 3]));
        let back = Value::from_json_typed(&Type::array(Type::int(false), false, false), json!([1, 2, 3]))
            .unwrap();
        assert!(v.equals(&back).unwrap());
    }

    #[test]
    fn null_only_fits_optional() {
        assert!(Value::Null.coerce(&Type::int(true)).is_ok());
        assert!(Value::Null.coerce(&Type::int(false)).is_err());
    }

    #[test]
    fn int_promotes_to_float_slot() {
        let v = Value::int(2).coerce(&Type::float(false)).unwrap();
        assert!(matches!(v, Value::Float { .. }));
        assert_eq!(v.as_float(), Some(2.0));
    }

    #[test]
    fn string_parses_to_numeric() {
        assert_eq!(
            Value::string("14").coerce(&Type::int(false)).unwrap().as_int(),
            Some(14)
        );
        assert!(Value::string("x").coerce(&Type::int(false)).is_err());
    }

    #[test]
    fn map_to_struct_by_name() {
        let mut member_types = IndexMap::new();
        member_types.insert("a".to_string(), Type::int(false));
        member_types.insert("b".to_string(), Type::int(true));
        let target = Type::StructInstance {
            name: "S".into(),
            members: Some(member_types),
            optional: false,
        };
        let m = Value::map(
            Type::string(false),
            Type::int(false),
            vec![(Value::string("a"), Value::int(5))],
        );
        let s = m.coerce(&target).unwrap();
        let members = s.as_struct().unwrap();
        assert_eq!(members.get("a").unwrap().as_int(), Some(5));
        assert!(members.get("b").unwrap().is_null());
    }

    #[test]
    fn map_with_unknown_key_rejected() {
        let mut member_types = IndexMap::new();
        member_types.insert("a".to_string(), Type::int(false));
        let target = Type::StructInstance {
            name: "S".into(),
            members: Some(member_types),
            optional: false,
        };
        let m = Value::map(
            Type::string(false),
            Type::int(false),
            vec![(Value::string("zzz"), Value::int(5))],
        );
        assert!(m.coerce(&target).is_err());
    }

    #[test]
    fn empty_array_rejected_by_nonempty_slot() {
        let v = Value::array(Type::int(false), vec![]);
        assert!(v.coerce(&Type::array(Type::int(false), false, true)).is_err());
    }

    #[test]
    fn display_strings() {
        assert_eq!(Value::int(7).to_display_string(), "7");
        assert_eq!(Value::float(1.5).to_display_string(), "1.500000");
        assert_eq!(Value::Null.to_display_string(), "");
        assert_eq!(
            Value::array(Type::int(false), vec![Value::int(1), Value::int(2)])
                .to_display_string(),
            "[1, 2]"
        );
    }

    #[test]
    fn numeric_equality_promotes() {
        assert!(Value::int(2).equals(&Value::float(2.0)).unwrap());
        assert!(!Value::int(2).equals(&Value::float(2.5)).unwrap());
    }

    #[test]
    fn file_and_string_equatable() {
        let f = Value::file("x.txt").unwrap();
        assert!(f.equals(&Value::string("x.txt")).unwrap());
    }

    #[test]
    fn collect_and_map_paths() {
        let v = Value::pair(
            Value::file("a.txt").unwrap(),
            Value::array(
                Type::file(false),
                vec![Value::file("b.txt").unwrap()],
            ),
        );
        let mut paths = Vec::new();
        v.collect_paths(&mut paths);
        assert_eq!(paths, vec!["a.txt".to_string(), "b.txt".to_string()]);

        let mapped = v
            .map_paths(&mut |p, _is_dir| Ok(format!("/mnt/{}", p)))
            .unwrap();
        let mut mapped_paths = Vec::new();
        mapped.collect_paths(&mut mapped_paths);
        assert_eq!(
            mapped_paths,
            vec!["/mnt/a.txt".to_string(), "/mnt/b.txt".to_string()]
        );
    }

    #[test]
    fn object_intake_from_json() {
        let v = Value::from_json(json!({"name": "x", "n": 3}));
        let members = v.as_struct().unwrap();
        assert_eq!(members.get("name").unwrap().as_str(), Some("x"));
        assert_eq!(members.get("n").unwrap().as_int(), Some(3));
    }
}
