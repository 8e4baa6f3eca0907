//! The standard library: a registry of named functions available to WDL
//! expressions.
//!
//! Static functions carry a fixed signature; polymorphic functions implement
//! custom type inference over their argument expressions. Filesystem
//! functions (`read_*`, `write_*`, `size`, `glob`, `stdout`, `stderr`) are
//! registered by [`crate::eval::fsio`] and act through the library's
//! [`PathMap`] and spool directory.

use crate::ast::expr::TypeContext;
use crate::ast::{Expr, LanguageVersion};
use crate::error::{Error, SourceLoc, TypeIssue};
use crate::types::Type;
use crate::value::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Maps between virtualized WDL path strings and host filesystem paths.
pub trait PathMap: Send + Sync {
    fn to_host(&self, virtualized: &str) -> Result<PathBuf, Error>;
    fn to_virtual(&self, host: &Path) -> Result<String, Error>;
}

/// No-op mapping: virtualized paths are host paths.
pub struct IdentityPathMap;

impl PathMap for IdentityPathMap {
    fn to_host(&self, virtualized: &str) -> Result<PathBuf, Error> {
        Ok(PathBuf::from(virtualized))
    }

    fn to_virtual(&self, host: &Path) -> Result<String, Error> {
        host.to_str().map(str::to_string).ok_or_else(|| {
            Error::filesystem(
                format!("non-UTF-8 path {}", host.display()),
                Some(host.to_path_buf()),
            )
        })
    }
}

/// Paths relative to a task working directory, as the in-container view.
pub struct WorkdirPathMap {
    workdir: PathBuf,
}

impl WorkdirPathMap {
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }
}

impl PathMap for WorkdirPathMap {
    fn to_host(&self, virtualized: &str) -> Result<PathBuf, Error> {
        let p = Path::new(virtualized);
        if p.is_absolute() {
            Ok(p.to_path_buf())
        } else {
            Ok(self.workdir.join(p))
        }
    }

    fn to_virtual(&self, host: &Path) -> Result<String, Error> {
        let p = host.strip_prefix(&self.workdir).unwrap_or(host);
        p.to_str().map(str::to_string).ok_or_else(|| {
            Error::filesystem(
                format!("non-UTF-8 path {}", host.display()),
                Some(host.to_path_buf()),
            )
        })
    }
}

/// A standard-library function.
pub trait Function: Send + Sync {
    fn infer_type(&self, loc: &SourceLoc, args: &mut [Expr], ctx: &TypeContext)
        -> Result<Type, Error>;
    fn call(&self, loc: &SourceLoc, args: &[Value], lib: &StdLib) -> Result<Value, Error>;
}

type InferFn =
    Box<dyn Fn(&SourceLoc, &mut [Expr], &TypeContext) -> Result<Type, Error> + Send + Sync>;
type CallFn = Box<dyn Fn(&SourceLoc, &[Value], &StdLib) -> Result<Value, Error> + Send + Sync>;

struct FnDef {
    infer: InferFn,
    call: CallFn,
}

impl Function for FnDef {
    fn infer_type(
        &self,
        loc: &SourceLoc,
        args: &mut [Expr],
        ctx: &TypeContext,
    ) -> Result<Type, Error> {
        (self.infer)(loc, args, ctx)
    }

    fn call(&self, loc: &SourceLoc, args: &[Value], lib: &StdLib) -> Result<Value, Error> {
        (self.call)(loc, args, lib)
    }
}

/// The function registry plus the I/O context filesystem functions use.
pub struct StdLib {
    version: LanguageVersion,
    functions: HashMap<String, FnDef>,
    path_map: Arc<dyn PathMap>,
    /// Spool directory for `write_*` outputs.
    write_dir: Option<PathBuf>,
    /// Task working directory, set during output collection.
    task_dir: Option<PathBuf>,
    stdout_file: Option<PathBuf>,
    stderr_file: Option<PathBuf>,
}

impl StdLib {
    /// A library suitable for static checking: full registry, no I/O
    /// context (filesystem calls fail at evaluation).
    pub fn for_version(version: LanguageVersion) -> Self {
        let mut lib = Self {
            version,
            functions: HashMap::new(),
            path_map: Arc::new(IdentityPathMap),
            write_dir: None,
            task_dir: None,
            stdout_file: None,
            stderr_file: None,
        };
        register_pure(&mut lib);
        crate::eval::fsio::register(&mut lib);
        lib
    }

    pub fn with_path_map(mut self, path_map: Arc<dyn PathMap>) -> Self {
        self.path_map = path_map;
        self
    }

    pub fn with_write_dir(mut self, dir: PathBuf) -> Self {
        self.write_dir = Some(dir);
        self
    }

    /// Enable the post-execution functions (`stdout`, `stderr`, `glob`
    /// rooted at the work directory).
    pub fn with_task_context(mut self, task_dir: PathBuf, stdout: PathBuf, stderr: PathBuf) -> Self {
        self.task_dir = Some(task_dir);
        self.stdout_file = Some(stdout);
        self.stderr_file = Some(stderr);
        self
    }

    pub fn version(&self) -> LanguageVersion {
        self.version
    }

    pub fn function(&self, name: &str) -> Option<&dyn Function> {
        self.functions.get(name).map(|f| f as &dyn Function)
    }

    pub fn path_map(&self) -> &dyn PathMap {
        self.path_map.as_ref()
    }

    pub fn write_dir(&self) -> Option<&Path> {
        self.write_dir.as_deref()
    }

    pub fn task_dir(&self) -> Option<&Path> {
        self.task_dir.as_deref()
    }

    pub fn stdout_file(&self) -> Option<&Path> {
        self.stdout_file.as_deref()
    }

    pub fn stderr_file(&self) -> Option<&Path> {
        self.stderr_file.as_deref()
    }

    pub(crate) fn register(&mut self, name: &str, infer: InferFn, call: CallFn) {
        self.functions
            .insert(name.to_string(), FnDef { infer, call });
    }
}

fn arity_error(loc: &SourceLoc, name: &str, expected: usize) -> Error {
    Error::static_issue(
        loc.clone(),
        TypeIssue::StaticTypeMismatch,
        format!("{} expects {} argument(s)", name, expected),
    )
}

/// An inference closure for a fixed signature.
fn fixed_sig(name: &'static str, params: Vec<Type>, ret: Type) -> InferFn {
    Box::new(move |loc, args, ctx| {
        if args.len() != params.len() {
            return Err(arity_error(loc, name, params.len()));
        }
        for (arg, param) in args.iter_mut().zip(params.iter()) {
            let t = arg.infer_type(ctx)?;
            t.coerce_to(param, ctx.check_quant)
                .map_err(|_| Error::type_mismatch(loc.clone(), &param.to_string(), &t.to_string()))?;
        }
        Ok(ret.clone())
    })
}

/// Infer all argument types (shared by polymorphic inference closures).
fn infer_all(args: &mut [Expr], ctx: &TypeContext) -> Result<Vec<Type>, Error> {
    args.iter_mut().map(|a| a.infer_type(ctx)).collect()
}

fn expect_array(loc: &SourceLoc, name: &str, t: &Type) -> Result<Type, Error> {
    match t {
        Type::Array { item, .. } => Ok((**item).clone()),
        other => Err(Error::static_issue(
            loc.clone(),
            TypeIssue::StaticTypeMismatch,
            format!("{} expects an Array, not {}", name, other),
        )),
    }
}

fn value_items<'v>(loc: &SourceLoc, name: &str, v: &'v Value) -> Result<&'v [Value], Error> {
    v.as_array()
        .ok_or_else(|| Error::eval(loc.clone(), format!("{} expects an Array", name)))
}

fn item_type_of(values: &[Value]) -> Type {
    values
        .first()
        .map(|v| v.ty().clone())
        .unwrap_or_else(Type::any)
}

fn register_pure(lib: &mut StdLib) {
    // floor / ceil / round
    for (name, f) in [
        ("floor", f64::floor as fn(f64) -> f64),
        ("ceil", f64::ceil as fn(f64) -> f64),
        ("round", f64::round as fn(f64) -> f64),
    ] {
        lib.register(
            name,
            fixed_sig(name, vec![Type::float(false)], Type::int(false)),
            Box::new(move |loc, args, _| {
                let x = args[0]
                    .as_float()
                    .ok_or_else(|| Error::eval(loc.clone(), "expected numeric argument"))?;
                Ok(Value::int(f(x) as i64))
            }),
        );
    }

    // min / max: Int when both are Int, Float otherwise.
    for (name, pick_left) in [("min", true), ("max", false)] {
        lib.register(
            name,
            Box::new(move |loc, args: &mut [Expr], ctx: &TypeContext| {
                if args.len() != 2 {
                    return Err(arity_error(loc, name, 2));
                }
                let ts = infer_all(args, ctx)?;
                let both_int = ts.iter().all(|t| matches!(t, Type::Int { .. }));
                for t in &ts {
                    if !matches!(t, Type::Int { .. } | Type::Float { .. } | Type::Any { .. }) {
                        return Err(Error::type_mismatch(loc.clone(), "Float", &t.to_string()));
                    }
                }
                Ok(if both_int {
                    Type::int(false)
                } else {
                    Type::float(false)
                })
            }),
            Box::new(move |loc, args, _| {
                match (&args[0], &args[1]) {
                    (Value::Int { value: a, .. }, Value::Int { value: b, .. }) => {
                        let lesser = *a.min(b);
                        let greater = *a.max(b);
                        Ok(Value::int(if pick_left { lesser } else { greater }))
                    }
                    _ => {
                        let a = args[0].as_float().ok_or_else(|| {
                            Error::eval(loc.clone(), "expected numeric argument")
                        })?;
                        let b = args[1].as_float().ok_or_else(|| {
                            Error::eval(loc.clone(), "expected numeric argument")
                        })?;
                        Ok(Value::float(if pick_left { a.min(b) } else { a.max(b) }))
                    }
                }
            }),
        );
    }

    // sub(input, pattern, replacement)
    lib.register(
        "sub",
        fixed_sig(
            "sub",
            vec![Type::string(false), Type::string(false), Type::string(false)],
            Type::string(false),
        ),
        Box::new(|loc, args, _| {
            let input = args[0].to_display_string();
            let pattern = args[1].to_display_string();
            let replacement = args[2].to_display_string();
            let re = regex::Regex::new(&pattern).map_err(|e| {
                Error::eval(loc.clone(), format!("invalid sub() pattern: {}", e))
            })?;
            Ok(Value::string(re.replace_all(&input, replacement.as_str()).into_owned()))
        }),
    );

    // basename(path[, suffix])
    lib.register(
        "basename",
        Box::new(|loc, args: &mut [Expr], ctx: &TypeContext| {
            if args.is_empty() || args.len() > 2 {
                return Err(arity_error(loc, "basename", 1));
            }
            for arg in args.iter_mut() {
                let t = arg.infer_type(ctx)?;
                if !t.coerces(&Type::string(false), ctx.check_quant) {
                    return Err(Error::type_mismatch(loc.clone(), "String", &t.to_string()));
                }
            }
            Ok(Type::string(false))
        }),
        Box::new(|_loc, args, _| {
            let path = args[0].to_display_string();
            let mut base = path.rsplit('/').next().unwrap_or(&path).to_string();
            if let Some(suffix) = args.get(1) {
                let suffix = suffix.to_display_string();
                if let Some(stripped) = base.strip_suffix(&suffix) {
                    base = stripped.to_string();
                }
            }
            Ok(Value::string(base))
        }),
    );

    // defined(x)
    lib.register(
        "defined",
        Box::new(|loc, args: &mut [Expr], ctx: &TypeContext| {
            if args.len() != 1 {
                return Err(arity_error(loc, "defined", 1));
            }
            args[0].infer_type(ctx)?;
            Ok(Type::boolean(false))
        }),
        Box::new(|_loc, args, _| Ok(Value::boolean(!args[0].is_null()))),
    );

    // length(Array|Map|String)
    lib.register(
        "length",
        Box::new(|loc, args: &mut [Expr], ctx: &TypeContext| {
            if args.len() != 1 {
                return Err(arity_error(loc, "length", 1));
            }
            let t = args[0].infer_type(ctx)?;
            match t {
                Type::Array { .. } | Type::Map { .. } | Type::String { .. } | Type::Any { .. } => {
                    Ok(Type::int(false))
                }
                other => Err(Error::static_issue(
                    loc.clone(),
                    TypeIssue::StaticTypeMismatch,
                    format!("length() is not defined for {}", other),
                )),
            }
        }),
        Box::new(|loc, args, _| match &args[0] {
            Value::Array { items, .. } => Ok(Value::int(items.len() as i64)),
            Value::Map { entries, .. } => Ok(Value::int(entries.len() as i64)),
            Value::String { value, .. } => Ok(Value::int(value.chars().count() as i64)),
            other => Err(Error::eval(
                loc.clone(),
                format!("length() is not defined for {}", other.ty()),
            )),
        }),
    );

    // range(n)
    lib.register(
        "range",
        fixed_sig(
            "range",
            vec![Type::int(false)],
            Type::array(Type::int(false), false, false),
        ),
        Box::new(|loc, args, _| {
            let n = args[0]
                .as_int()
                .ok_or_else(|| Error::eval(loc.clone(), "range() expects an Int"))?;
            if n < 0 {
                return Err(Error::eval(loc.clone(), "range() expects a non-negative Int"));
            }
            Ok(Value::array(
                Type::int(false),
                (0..n).map(Value::int).collect(),
            ))
        }),
    );

    // sep(separator, array)
    lib.register(
        "sep",
        fixed_sig(
            "sep",
            vec![
                Type::string(false),
                Type::array(Type::string(false), false, false),
            ],
            Type::string(false),
        ),
        Box::new(|loc, args, _| {
            let separator = args[0].to_display_string();
            let items = value_items(loc, "sep", &args[1])?;
            Ok(Value::string(
                items
                    .iter()
                    .map(|v| v.to_display_string())
                    .collect::<Vec<_>>()
                    .join(&separator),
            ))
        }),
    );

    // prefix / suffix / quote / squote over Array[P]
    for name in ["prefix", "suffix", "quote", "squote"] {
        let takes_string = matches!(name, "prefix" | "suffix");
        lib.register(
            name,
            Box::new(move |loc, args: &mut [Expr], ctx: &TypeContext| {
                let expected = if takes_string { 2 } else { 1 };
                if args.len() != expected {
                    return Err(arity_error(loc, name, expected));
                }
                let ts = infer_all(args, ctx)?;
                let array_t = &ts[expected - 1];
                let item = expect_array(loc, name, array_t)?;
                if !item.coerces(&Type::string(false), ctx.check_quant) {
                    return Err(Error::type_mismatch(loc.clone(), "String", &item.to_string()));
                }
                Ok(Type::array(Type::string(false), false, array_t.is_nonempty()))
            }),
            Box::new(move |loc, args, _| {
                let (affix, array) = if takes_string {
                    (args[0].to_display_string(), &args[1])
                } else {
                    (String::new(), &args[0])
                };
                let items = value_items(loc, name, array)?;
                let mapped: Vec<Value> = items
                    .iter()
                    .map(|v| {
                        let s = v.to_display_string();
                        Value::string(match name {
                            "prefix" => format!("{}{}", affix, s),
                            "suffix" => format!("{}{}", s, affix),
                            "quote" => format!("\"{}\"", s),
                            _ => format!("'{}'", s),
                        })
                    })
                    .collect();
                Ok(Value::array(Type::string(false), mapped))
            }),
        );
    }

    // select_first(Array[X?])
    lib.register(
        "select_first",
        Box::new(|loc, args: &mut [Expr], ctx: &TypeContext| {
            if args.len() != 1 {
                return Err(arity_error(loc, "select_first", 1));
            }
            let t = args[0].infer_type(ctx)?;
            let item = expect_array(loc, "select_first", &t)?;
            Ok(item.with_optional(false))
        }),
        Box::new(|loc, args, _| {
            let items = value_items(loc, "select_first", &args[0])?;
            items
                .iter()
                .find(|v| !v.is_null())
                .cloned()
                .ok_or_else(|| {
                    Error::eval(loc.clone(), "select_first: no non-None value in array")
                })
        }),
    );

    // select_all(Array[X?])
    lib.register(
        "select_all",
        Box::new(|loc, args: &mut [Expr], ctx: &TypeContext| {
            if args.len() != 1 {
                return Err(arity_error(loc, "select_all", 1));
            }
            let t = args[0].infer_type(ctx)?;
            let item = expect_array(loc, "select_all", &t)?;
            Ok(Type::array(item.with_optional(false), false, false))
        }),
        Box::new(|loc, args, _| {
            let items = value_items(loc, "select_all", &args[0])?;
            let kept: Vec<Value> = items.iter().filter(|v| !v.is_null()).cloned().collect();
            Ok(Value::array(item_type_of(&kept), kept))
        }),
    );

    // flatten(Array[Array[X]])
    lib.register(
        "flatten",
        Box::new(|loc, args: &mut [Expr], ctx: &TypeContext| {
            if args.len() != 1 {
                return Err(arity_error(loc, "flatten", 1));
            }
            let t = args[0].infer_type(ctx)?;
            let outer = expect_array(loc, "flatten", &t)?;
            let inner = expect_array(loc, "flatten", &outer)?;
            Ok(Type::array(inner, false, false))
        }),
        Box::new(|loc, args, _| {
            let rows = value_items(loc, "flatten", &args[0])?;
            let mut out = Vec::new();
            for row in rows {
                out.extend(value_items(loc, "flatten", row)?.iter().cloned());
            }
            Ok(Value::array(item_type_of(&out), out))
        }),
    );

    // zip / cross
    for name in ["zip", "cross"] {
        lib.register(
            name,
            Box::new(move |loc, args: &mut [Expr], ctx: &TypeContext| {
                if args.len() != 2 {
                    return Err(arity_error(loc, name, 2));
                }
                let ts = infer_all(args, ctx)?;
                let left = expect_array(loc, name, &ts[0])?;
                let right = expect_array(loc, name, &ts[1])?;
                Ok(Type::array(Type::pair(left, right, false), false, false))
            }),
            Box::new(move |loc, args, _| {
                let xs = value_items(loc, name, &args[0])?;
                let ys = value_items(loc, name, &args[1])?;
                let mut out = Vec::new();
                if name == "zip" {
                    if xs.len() != ys.len() {
                        return Err(Error::eval(
                            loc.clone(),
                            format!("zip: arrays have different lengths ({} vs {})", xs.len(), ys.len()),
                        ));
                    }
                    for (x, y) in xs.iter().zip(ys.iter()) {
                        out.push(Value::pair(x.clone(), y.clone()));
                    }
                } else {
                    for x in xs {
                        for y in ys {
                            out.push(Value::pair(x.clone(), y.clone()));
                        }
                    }
                }
                Ok(Value::array(item_type_of(&out), out))
            }),
        );
    }

    // unzip(Array[Pair[X,Y]])
    lib.register(
        "unzip",
        Box::new(|loc, args: &mut [Expr], ctx: &TypeContext| {
            if args.len() != 1 {
                return Err(arity_error(loc, "unzip", 1));
            }
            let t = args[0].infer_type(ctx)?;
            let item = expect_array(loc, "unzip", &t)?;
            match item {
                Type::Pair { left, right, .. } => Ok(Type::pair(
                    Type::array((*left).clone(), false, false),
                    Type::array((*right).clone(), false, false),
                    false,
                )),
                other => Err(Error::static_issue(
                    loc.clone(),
                    TypeIssue::StaticTypeMismatch,
                    format!("unzip expects Array[Pair], not Array[{}]", other),
                )),
            }
        }),
        Box::new(|loc, args, _| {
            let pairs = value_items(loc, "unzip", &args[0])?;
            let mut lefts = Vec::new();
            let mut rights = Vec::new();
            for p in pairs {
                match p {
                    Value::Pair { left, right, .. } => {
                        lefts.push((**left).clone());
                        rights.push((**right).clone());
                    }
                    other => {
                        return Err(Error::eval(
                            loc.clone(),
                            format!("unzip expects pairs, found {}", other.ty()),
                        ))
                    }
                }
            }
            Ok(Value::pair(
                Value::array(item_type_of(&lefts), lefts),
                Value::array(item_type_of(&rights), rights),
            ))
        }),
    );

    // transpose(Array[Array[X]])
    lib.register(
        "transpose",
        Box::new(|loc, args: &mut [Expr], ctx: &TypeContext| {
            if args.len() != 1 {
                return Err(arity_error(loc, "transpose", 1));
            }
            let t = args[0].infer_type(ctx)?;
            let outer = expect_array(loc, "transpose", &t)?;
            expect_array(loc, "transpose", &outer)?;
            Ok(t.clone().with_optional(false))
        }),
        Box::new(|loc, args, _| {
            let rows = value_items(loc, "transpose", &args[0])?;
            let mut grid: Vec<&[Value]> = Vec::new();
            for row in rows {
                grid.push(value_items(loc, "transpose", row)?);
            }
            let width = grid.first().map(|r| r.len()).unwrap_or(0);
            if grid.iter().any(|r| r.len() != width) {
                return Err(Error::eval(loc.clone(), "transpose: ragged array"));
            }
            let mut out = Vec::new();
            for col in 0..width {
                let column: Vec<Value> = grid.iter().map(|row| row[col].clone()).collect();
                out.push(Value::array(item_type_of(&column), column));
            }
            Ok(Value::array(item_type_of(&out), out))
        }),
    );

    // keys / as_pairs / as_map / collect_by_key
    lib.register(
        "keys",
        Box::new(|loc, args: &mut [Expr], ctx: &TypeContext| {
            if args.len() != 1 {
                return Err(arity_error(loc, "keys", 1));
            }
            match args[0].infer_type(ctx)? {
                Type::Map { key, .. } => Ok(Type::array((*key).clone(), false, false)),
                other => Err(Error::static_issue(
                    loc.clone(),
                    TypeIssue::StaticTypeMismatch,
                    format!("keys expects a Map, not {}", other),
                )),
            }
        }),
        Box::new(|loc, args, _| match &args[0] {
            Value::Map { entries, .. } => {
                let ks: Vec<Value> = entries.iter().map(|(k, _)| k.clone()).collect();
                Ok(Value::array(item_type_of(&ks), ks))
            }
            other => Err(Error::eval(
                loc.clone(),
                format!("keys expects a Map, not {}", other.ty()),
            )),
        }),
    );

    lib.register(
        "as_pairs",
        Box::new(|loc, args: &mut [Expr], ctx: &TypeContext| {
            if args.len() != 1 {
                return Err(arity_error(loc, "as_pairs", 1));
            }
            match args[0].infer_type(ctx)? {
                Type::Map { key, value, .. } => Ok(Type::array(
                    Type::pair((*key).clone(), (*value).clone(), false),
                    false,
                    false,
                )),
                other => Err(Error::static_issue(
                    loc.clone(),
                    TypeIssue::StaticTypeMismatch,
                    format!("as_pairs expects a Map, not {}", other),
                )),
            }
        }),
        Box::new(|loc, args, _| match &args[0] {
            Value::Map { entries, .. } => {
                let ps: Vec<Value> = entries
                    .iter()
                    .map(|(k, v)| Value::pair(k.clone(), v.clone()))
                    .collect();
                Ok(Value::array(item_type_of(&ps), ps))
            }
            other => Err(Error::eval(
                loc.clone(),
                format!("as_pairs expects a Map, not {}", other.ty()),
            )),
        }),
    );

    lib.register(
        "as_map",
        Box::new(|loc, args: &mut [Expr], ctx: &TypeContext| {
            if args.len() != 1 {
                return Err(arity_error(loc, "as_map", 1));
            }
            let t = args[0].infer_type(ctx)?;
            let item = expect_array(loc, "as_map", &t)?;
            match item {
                Type::Pair { left, right, .. } => {
                    Ok(Type::map((*left).clone(), (*right).clone(), false))
                }
                other => Err(Error::static_issue(
                    loc.clone(),
                    TypeIssue::StaticTypeMismatch,
                    format!("as_map expects Array[Pair], not Array[{}]", other),
                )),
            }
        }),
        Box::new(|loc, args, _| {
            let pairs = value_items(loc, "as_map", &args[0])?;
            let mut entries: Vec<(Value, Value)> = Vec::new();
            for p in pairs {
                match p {
                    Value::Pair { left, right, .. } => {
                        for (k, _) in &entries {
                            if k.equals(left).unwrap_or(false) {
                                return Err(Error::eval(
                                    loc.clone(),
                                    format!("as_map: duplicate key {}", left),
                                ));
                            }
                        }
                        entries.push(((**left).clone(), (**right).clone()));
                    }
                    other => {
                        return Err(Error::eval(
                            loc.clone(),
                            format!("as_map expects pairs, found {}", other.ty()),
                        ))
                    }
                }
            }
            let key_ty = entries
                .first()
                .map(|(k, _)| k.ty().clone())
                .unwrap_or_else(Type::any);
            let value_ty = entries
                .first()
                .map(|(_, v)| v.ty().clone())
                .unwrap_or_else(Type::any);
            Ok(Value::map(key_ty, value_ty, entries))
        }),
    );

    lib.register(
        "collect_by_key",
        Box::new(|loc, args: &mut [Expr], ctx: &TypeContext| {
            if args.len() != 1 {
                return Err(arity_error(loc, "collect_by_key", 1));
            }
            let t = args[0].infer_type(ctx)?;
            let item = expect_array(loc, "collect_by_key", &t)?;
            match item {
                Type::Pair { left, right, .. } => Ok(Type::map(
                    (*left).clone(),
                    Type::array((*right).clone(), false, false),
                    false,
                )),
                other => Err(Error::static_issue(
                    loc.clone(),
                    TypeIssue::StaticTypeMismatch,
                    format!("collect_by_key expects Array[Pair], not Array[{}]", other),
                )),
            }
        }),
        Box::new(|loc, args, _| {
            let pairs = value_items(loc, "collect_by_key", &args[0])?;
            let mut keys: Vec<Value> = Vec::new();
            let mut groups: Vec<Vec<Value>> = Vec::new();
            for p in pairs {
                match p {
                    Value::Pair { left, right, .. } => {
                        let found = keys
                            .iter()
                            .position(|k| k.equals(left).unwrap_or(false));
                        match found {
                            Some(i) => groups[i].push((**right).clone()),
                            None => {
                                keys.push((**left).clone());
                                groups.push(vec![(**right).clone()]);
                            }
                        }
                    }
                    other => {
                        return Err(Error::eval(
                            loc.clone(),
                            format!("collect_by_key expects pairs, found {}", other.ty()),
                        ))
                    }
                }
            }
            let value_ty = groups
                .first()
                .and_then(|g| g.first())
                .map(|v| v.ty().clone())
                .unwrap_or_else(Type::any);
            let key_ty = keys
                .first()
                .map(|k| k.ty().clone())
                .unwrap_or_else(Type::any);
            let entries: Vec<(Value, Value)> = keys
                .into_iter()
                .zip(groups.into_iter())
                .map(|(k, g)| (k, Value::array(value_ty.clone(), g)))
                .collect();
            Ok(Value::map(
                key_ty,
                Type::array(value_ty, false, false),
                entries,
            ))
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Bindings;
    use crate::syntax::{expr::expression, Cursor};

    fn eval_str(source: &str) -> Result<Value, Error> {
        let mut cur = Cursor::new(source, "t.wdl", "t.wdl", LanguageVersion::V1_1);
        let e = expression(&mut cur).unwrap();
        let lib = StdLib::for_version(LanguageVersion::V1_1);
        e.eval(&Bindings::new(), &lib)
    }

    fn ints(v: &Value) -> Vec<i64> {
        v.as_array()
            .unwrap()
            .iter()
            .map(|x| x.as_int().unwrap())
            .collect()
    }

    #[test]
    fn numeric_functions() {
        assert_eq!(eval_str("floor(2.7)").unwrap().as_int(), Some(2));
        assert_eq!(eval_str("ceil(2.1)").unwrap().as_int(), Some(3));
        assert_eq!(eval_str("round(2.5)").unwrap().as_int(), Some(3));
        assert_eq!(eval_str("min(3, 5)").unwrap().as_int(), Some(3));
        assert_eq!(eval_str("max(3, 5.5)").unwrap().as_float(), Some(5.5));
    }

    #[test]
    fn range_and_length() {
        assert_eq!(ints(&eval_str("range(4)").unwrap()), vec![0, 1, 2, 3]);
        assert_eq!(eval_str("length([1, 2, 3])").unwrap().as_int(), Some(3));
        assert_eq!(eval_str("length(\"abc\")").unwrap().as_int(), Some(3));
        assert!(eval_str("range(-1)").is_err());
    }

    #[test]
    fn string_functions() {
        assert_eq!(
            eval_str("sub(\"a-b-c\", \"-\", \"_\")").unwrap().as_str(),
            Some("a_b_c")
        );
        assert_eq!(
            eval_str("basename(\"/x/y/z.txt\")").unwrap().as_str(),
            Some("z.txt")
        );
        assert_eq!(
            eval_str("basename(\"/x/y/z.txt\", \".txt\")").unwrap().as_str(),
            Some("z")
        );
        assert_eq!(
            eval_str("sep(\",\", [\"a\", \"b\"])").unwrap().as_str(),
            Some("a,b")
        );
    }

    #[test]
    fn affix_functions() {
        let v = eval_str("prefix(\"-i \", [\"a\", \"b\"])").unwrap();
        let out: Vec<&str> = v.as_array().unwrap().iter().map(|x| x.as_str().unwrap()).collect();
        assert_eq!(out, vec!["-i a", "-i b"]);

        let v = eval_str("quote([1, 2])").unwrap();
        let out: Vec<&str> = v.as_array().unwrap().iter().map(|x| x.as_str().unwrap()).collect();
        assert_eq!(out, vec!["\"1\"", "\"2\""]);
    }

    #[test]
    fn selection_functions() {
        assert_eq!(
            eval_str("select_first([None, 42, 7])").unwrap().as_int(),
            Some(42)
        );
        assert!(eval_str("select_first([None])").is_err());
        assert_eq!(ints(&eval_str("select_all([None, 1, None, 2])").unwrap()), vec![1, 2]);
        assert_eq!(eval_str("defined(None)").unwrap().as_bool(), Some(false));
        assert_eq!(eval_str("defined(3)").unwrap().as_bool(), Some(true));
    }

    #[test]
    fn array_functions() {
        assert_eq!(
            ints(&eval_str("flatten([[1, 2], [3]])").unwrap()),
            vec![1, 2, 3]
        );
        let v = eval_str("zip([1, 2], [\"a\", \"b\"])").unwrap();
        assert_eq!(v.as_array().unwrap().len(), 2);
        assert!(eval_str("zip([1], [1, 2])").is_err());

        let v = eval_str("cross([1, 2], [\"a\"])").unwrap();
        assert_eq!(v.as_array().unwrap().len(), 2);

        let v = eval_str("unzip([(1, \"a\"), (2, \"b\")])").unwrap();
        match v {
            Value::Pair { left, .. } => assert_eq!(ints(&left), vec![1, 2]),
            other => panic!("expected pair, got {}", other),
        }

        let v = eval_str("transpose([[1, 2], [3, 4]])").unwrap();
        assert_eq!(ints(&v.as_array().unwrap()[0]), vec![1, 3]);
        assert!(eval_str("transpose([[1, 2], [3]])").is_err());
    }

    #[test]
    fn map_functions() {
        let v = eval_str("keys({\"a\": 1, \"b\": 2})").unwrap();
        let out: Vec<&str> = v.as_array().unwrap().iter().map(|x| x.as_str().unwrap()).collect();
        assert_eq!(out, vec!["a", "b"]);

        let v = eval_str("as_map([(\"a\", 1), (\"b\", 2)])").unwrap();
        assert_eq!(v.as_map().unwrap().len(), 2);
        assert!(eval_str("as_map([(\"a\", 1), (\"a\", 2)])").is_err());

        let v = eval_str("collect_by_key([(\"a\", 1), (\"b\", 2), (\"a\", 3)])").unwrap();
        let entries = v.as_map().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(ints(&entries[0].1), vec![1, 3]);
    }

    #[test]
    fn unknown_function_is_static_error() {
        use crate::ast::expr::TypeContext;
        let mut cur = Cursor::new("nope(1)", "t.wdl", "t.wdl", LanguageVersion::V1_1);
        let mut e = expression(&mut cur).unwrap();
        let lib = StdLib::for_version(LanguageVersion::V1_1);
        let env = Bindings::new();
        let typedefs = indexmap::IndexMap::new();
        let ctx = TypeContext {
            env: &env,
            stdlib: &lib,
            struct_typedefs: &typedefs,
            check_quant: true,
        };
        assert_eq!(e.infer_type(&ctx).unwrap_err().kind(), "NoSuchFunction");
    }
}
