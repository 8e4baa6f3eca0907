//! Filesystem standard-library functions.
//!
//! `read_*` resolve virtualized paths through the library's [`PathMap`] and
//! read staged files; `write_*` spool new files into the run's `write_/`
//! directory; `stdout`, `stderr`, and `glob` are available only during task
//! output collection.

use super::stdlib::{Function, StdLib};
use crate::ast::expr::TypeContext;
use crate::ast::Expr;
use crate::error::{Error, SourceLoc, TypeIssue};
use crate::types::Type;
use crate::value::Value;
use indexmap::IndexMap;
use std::fs;
use std::path::{Path, PathBuf};

pub(crate) fn register(lib: &mut StdLib) {
    register_size(lib);
    register_streams(lib);
    register_glob(lib);
    register_readers(lib);
    register_writers(lib);
}

fn read_to_string(loc: &SourceLoc, lib: &StdLib, value: &Value) -> Result<String, Error> {
    let virtualized = value
        .as_str()
        .ok_or_else(|| Error::eval(loc.clone(), "expected a File argument"))?;
    let host = lib.path_map().to_host(virtualized)?;
    fs::read_to_string(&host).map_err(|e| {
        Error::filesystem(
            format!("cannot read {}: {}", host.display(), e),
            Some(host.clone()),
        )
    })
}

/// Spool `contents` into the write directory and return it as a `File`.
fn spool(loc: &SourceLoc, lib: &StdLib, stem: &str, contents: &str) -> Result<Value, Error> {
    let dir = lib
        .write_dir()
        .ok_or_else(|| Error::eval(loc.clone(), format!("{}() is unavailable in this context", stem)))?;
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}_{}.txt", stem, uuid::Uuid::new_v4().simple()));
    fs::write(&path, contents).map_err(|e| {
        Error::filesystem(
            format!("cannot write {}: {}", path.display(), e),
            Some(path.clone()),
        )
    })?;
    let virtualized = lib.path_map().to_virtual(&path)?;
    Value::file(virtualized)
}

fn arity(loc: &SourceLoc, name: &str, args: &[Expr], expected: usize) -> Result<(), Error> {
    if args.len() != expected {
        return Err(Error::static_issue(
            loc.clone(),
            TypeIssue::StaticTypeMismatch,
            format!("{} expects {} argument(s)", name, expected),
        ));
    }
    Ok(())
}

fn register_size(lib: &mut StdLib) {
    lib.register(
        "size",
        Box::new(|loc, args: &mut [Expr], ctx: &TypeContext| {
            if args.is_empty() || args.len() > 2 {
                return Err(Error::static_issue(
                    loc.clone(),
                    TypeIssue::StaticTypeMismatch,
                    "size expects 1 or 2 argument(s)".to_string(),
                ));
            }
            args[0].infer_type(ctx)?;
            if let Some(unit) = args.get_mut(1) {
                let t = unit.infer_type(ctx)?;
                if !t.coerces(&Type::string(false), ctx.check_quant) {
                    return Err(Error::type_mismatch(loc.clone(), "String", &t.to_string()));
                }
            }
            Ok(Type::float(false))
        }),
        Box::new(|loc, args, lib| {
            let divisor = match args.get(1).map(|u| u.to_display_string()) {
                None => 1.0,
                Some(unit) => match unit.to_ascii_uppercase().as_str() {
                    "B" => 1.0,
                    "K" | "KB" => 1e3,
                    "M" | "MB" => 1e6,
                    "G" | "GB" => 1e9,
                    "T" | "TB" => 1e12,
                    "KI" | "KIB" => 1024.0,
                    "MI" | "MIB" => 1024.0_f64.powi(2),
                    "GI" | "GIB" => 1024.0_f64.powi(3),
                    "TI" | "TIB" => 1024.0_f64.powi(4),
                    other => {
                        return Err(Error::eval(
                            loc.clone(),
                            format!("size: unknown unit {}", other),
                        ))
                    }
                },
            };
            let mut paths = Vec::new();
            args[0].collect_paths(&mut paths);
            // A bare String argument also denotes a file path.
            if paths.is_empty() {
                if let Some(s) = args[0].as_str() {
                    paths.push(s.to_string());
                }
            }
            let mut total: u64 = 0;
            for p in paths {
                let host = lib.path_map().to_host(&p)?;
                total += path_size(&host)?;
            }
            Ok(Value::float(total as f64 / divisor))
        }),
    );
}

fn path_size(path: &Path) -> Result<u64, Error> {
    let meta = fs::metadata(path).map_err(|e| {
        Error::filesystem(
            format!("size: cannot stat {}: {}", path.display(), e),
            Some(path.to_path_buf()),
        )
    })?;
    if meta.is_dir() {
        let mut total = 0;
        for entry in fs::read_dir(path)? {
            total += path_size(&entry?.path())?;
        }
        Ok(total)
    } else {
        Ok(meta.len())
    }
}

fn register_streams(lib: &mut StdLib) {
    for name in ["stdout", "stderr"] {
        lib.register(
            name,
            Box::new(move |loc, args: &mut [Expr], _ctx: &TypeContext| {
                arity(loc, name, args, 0)?;
                Ok(Type::file(false))
            }),
            Box::new(move |loc, _args, lib| {
                let path = if name == "stdout" {
                    lib.stdout_file()
                } else {
                    lib.stderr_file()
                };
                match path {
                    Some(p) => Value::file(p.display().to_string()),
                    None => Err(Error::eval(
                        loc.clone(),
                        format!("{}() is only available in task outputs", name),
                    )),
                }
            }),
        );
    }
}

fn register_glob(lib: &mut StdLib) {
    lib.register(
        "glob",
        Box::new(|loc, args: &mut [Expr], ctx: &TypeContext| {
            arity(loc, "glob", args, 1)?;
            let t = args[0].infer_type(ctx)?;
            if !t.coerces(&Type::string(false), ctx.check_quant) {
                return Err(Error::type_mismatch(loc.clone(), "String", &t.to_string()));
            }
            Ok(Type::array(Type::file(false), false, false))
        }),
        Box::new(|loc, args, lib| {
            let pattern = args[0].to_display_string();
            let root = lib.task_dir().ok_or_else(|| {
                Error::eval(loc.clone(), "glob() is only available in task outputs")
            })?;
            let regex = glob_to_regex(loc, &pattern)?;
            let mut matches = Vec::new();
            walk_matches(root, root, &regex, &mut matches)?;
            matches.sort();
            let files: Result<Vec<Value>, Error> = matches
                .into_iter()
                .map(|p| Value::file(p.display().to_string()))
                .collect();
            Ok(Value::array(Type::file(false), files?))
        }),
    );
}

/// Translate a shell glob into an anchored regex over workdir-relative
/// paths. `*` and `?` do not cross `/` boundaries.
fn glob_to_regex(loc: &SourceLoc, pattern: &str) -> Result<regex::Regex, Error> {
    let mut out = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    regex::Regex::new(&out)
        .map_err(|e| Error::eval(loc.clone(), format!("invalid glob pattern: {}", e)))
}

fn walk_matches(
    root: &Path,
    dir: &Path,
    regex: &regex::Regex,
    out: &mut Vec<PathBuf>,
) -> Result<(), Error> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return Ok(()),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk_matches(root, &path, regex, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            if let Some(rel) = rel.to_str() {
                if regex.is_match(rel) {
                    out.push(path.clone());
                }
            }
        }
    }
    Ok(())
}

fn file_param(name: &'static str) -> impl Fn(&SourceLoc, &mut [Expr], &TypeContext) -> Result<(), Error>
{
    move |loc, args, ctx| {
        arity(loc, name, args, 1)?;
        let t = args[0].infer_type(ctx)?;
        if !t.coerces(&Type::file(false), ctx.check_quant) {
            return Err(Error::type_mismatch(loc.clone(), "File", &t.to_string()));
        }
        Ok(())
    }
}

fn register_readers(lib: &mut StdLib) {
    // read_string strips one trailing newline, matching write-side behavior.
    lib.register(
        "read_string",
        {
            let check = file_param("read_string");
            Box::new(move |loc, args: &mut [Expr], ctx: &TypeContext| {
                check(loc, args, ctx)?;
                Ok(Type::string(false))
            })
        },
        Box::new(|loc, args, lib| {
            let mut s = read_to_string(loc, lib, &args[0])?;
            if s.ends_with('\n') {
                s.pop();
                if s.ends_with('\r') {
                    s.pop();
                }
            }
            Ok(Value::string(s))
        }),
    );

    lib.register(
        "read_lines",
        {
            let check = file_param("read_lines");
            Box::new(move |loc, args: &mut [Expr], ctx: &TypeContext| {
                check(loc, args, ctx)?;
                Ok(Type::array(Type::string(false), false, false))
            })
        },
        Box::new(|loc, args, lib| {
            let s = read_to_string(loc, lib, &args[0])?;
            let mut lines: Vec<&str> = s.split('\n').collect();
            if lines.last() == Some(&"") {
                lines.pop();
            }
            Ok(Value::array(
                Type::string(false),
                lines
                    .into_iter()
                    .map(|l| Value::string(l.trim_end_matches('\r')))
                    .collect(),
            ))
        }),
    );

    for (name, ret) in [
        ("read_int", Type::int(false)),
        ("read_float", Type::float(false)),
        ("read_boolean", Type::boolean(false)),
    ] {
        let ret_for_infer = ret.clone();
        lib.register(
            name,
            {
                let check = file_param("read_scalar");
                Box::new(move |loc, args: &mut [Expr], ctx: &TypeContext| {
                    check(loc, args, ctx)?;
                    Ok(ret_for_infer.clone())
                })
            },
            Box::new(move |loc, args, lib| {
                let s = read_to_string(loc, lib, &args[0])?;
                let trimmed = s.trim();
                match &ret {
                    Type::Int { .. } => trimmed.parse::<i64>().map(Value::int).map_err(|_| {
                        Error::eval(loc.clone(), format!("read_int: not an integer: {:?}", trimmed))
                    }),
                    Type::Float { .. } => trimmed.parse::<f64>().map(Value::float).map_err(|_| {
                        Error::eval(loc.clone(), format!("read_float: not a number: {:?}", trimmed))
                    }),
                    _ => match trimmed.to_ascii_lowercase().as_str() {
                        "true" => Ok(Value::boolean(true)),
                        "false" => Ok(Value::boolean(false)),
                        _ => Err(Error::eval(
                            loc.clone(),
                            format!("read_boolean: not a boolean: {:?}", trimmed),
                        )),
                    },
                }
            }),
        );
    }

    lib.register(
        "read_json",
        {
            let check = file_param("read_json");
            Box::new(move |loc, args: &mut [Expr], ctx: &TypeContext| {
                check(loc, args, ctx)?;
                Ok(Type::any())
            })
        },
        Box::new(|loc, args, lib| {
            let s = read_to_string(loc, lib, &args[0])?;
            let json: serde_json::Value = serde_json::from_str(&s)
                .map_err(|e| Error::eval(loc.clone(), format!("read_json: {}", e)))?;
            Ok(Value::from_json(json))
        }),
    );

    lib.register(
        "read_tsv",
        {
            let check = file_param("read_tsv");
            Box::new(move |loc, args: &mut [Expr], ctx: &TypeContext| {
                check(loc, args, ctx)?;
                Ok(Type::array(
                    Type::array(Type::string(false), false, false),
                    false,
                    false,
                ))
            })
        },
        Box::new(|loc, args, lib| {
            let s = read_to_string(loc, lib, &args[0])?;
            let rows: Vec<Value> = tsv_rows(&s)
                .into_iter()
                .map(|fields| {
                    Value::array(
                        Type::string(false),
                        fields.into_iter().map(Value::string).collect(),
                    )
                })
                .collect();
            Ok(Value::array(
                Type::array(Type::string(false), false, false),
                rows,
            ))
        }),
    );

    lib.register(
        "read_map",
        {
            let check = file_param("read_map");
            Box::new(move |loc, args: &mut [Expr], ctx: &TypeContext| {
                check(loc, args, ctx)?;
                Ok(Type::map(Type::string(false), Type::string(false), false))
            })
        },
        Box::new(|loc, args, lib| {
            let s = read_to_string(loc, lib, &args[0])?;
            let mut entries = Vec::new();
            for fields in tsv_rows(&s) {
                if fields.len() != 2 {
                    return Err(Error::eval(
                        loc.clone(),
                        format!("read_map: expected 2 columns, found {}", fields.len()),
                    ));
                }
                let mut it = fields.into_iter();
                let key = it.next().unwrap_or_default();
                let value = it.next().unwrap_or_default();
                if entries.iter().any(|(k, _): &(String, String)| *k == key) {
                    return Err(Error::eval(
                        loc.clone(),
                        format!("read_map: duplicate key {}", key),
                    ));
                }
                entries.push((key, value));
            }
            Ok(Value::map(
                Type::string(false),
                Type::string(false),
                entries
                    .into_iter()
                    .map(|(k, v)| (Value::string(k), Value::string(v)))
                    .collect(),
            ))
        }),
    );

    // read_object / read_objects: header row then value row(s).
    for name in ["read_object", "read_objects"] {
        let many = name == "read_objects";
        lib.register(
            name,
            {
                let check = file_param("read_object");
                Box::new(move |loc, args: &mut [Expr], ctx: &TypeContext| {
                    check(loc, args, ctx)?;
                    let obj = Type::object(IndexMap::new());
                    Ok(if many {
                        Type::array(obj, false, false)
                    } else {
                        obj
                    })
                })
            },
            Box::new(move |loc, args, lib| {
                let s = read_to_string(loc, lib, &args[0])?;
                let rows = tsv_rows(&s);
                let header = rows.first().ok_or_else(|| {
                    Error::eval(loc.clone(), "read_object: empty file")
                })?;
                let mut objects = Vec::new();
                for row in &rows[1..] {
                    if row.len() != header.len() {
                        return Err(Error::eval(
                            loc.clone(),
                            "read_object: row width differs from header",
                        ));
                    }
                    let members: IndexMap<String, Value> = header
                        .iter()
                        .cloned()
                        .zip(row.iter().map(|v| Value::string(v.clone())))
                        .collect();
                    objects.push(Value::object(members));
                }
                if many {
                    let item_ty = objects
                        .first()
                        .map(|v| v.ty().clone())
                        .unwrap_or_else(Type::any);
                    Ok(Value::array(item_ty, objects))
                } else {
                    match objects.len() {
                        1 => Ok(objects.remove(0)),
                        n => Err(Error::eval(
                            loc.clone(),
                            format!("read_object: expected exactly 1 row, found {}", n),
                        )),
                    }
                }
            }),
        );
    }
}

fn tsv_rows(s: &str) -> Vec<Vec<String>> {
    let mut lines: Vec<&str> = s.split('\n').collect();
    if lines.last() == Some(&"") {
        lines.pop();
    }
    lines
        .into_iter()
        .map(|l| {
            l.trim_end_matches('\r')
                .split('\t')
                .map(str::to_string)
                .collect()
        })
        .collect()
}

fn register_writers(lib: &mut StdLib) {
    lib.register(
        "write_lines",
        Box::new(|loc, args: &mut [Expr], ctx: &TypeContext| {
            arity(loc, "write_lines", args, 1)?;
            let t = args[0].infer_type(ctx)?;
            let target = Type::array(Type::string(false), false, false);
            if !t.coerces(&target, ctx.check_quant) {
                return Err(Error::type_mismatch(
                    loc.clone(),
                    "Array[String]",
                    &t.to_string(),
                ));
            }
            Ok(Type::file(false))
        }),
        Box::new(|loc, args, lib| {
            let items = args[0]
                .as_array()
                .ok_or_else(|| Error::eval(loc.clone(), "write_lines expects an Array"))?;
            let mut contents = String::new();
            for item in items {
                contents.push_str(&item.to_display_string());
                contents.push('\n');
            }
            spool(loc, lib, "write_lines", &contents)
        }),
    );

    lib.register(
        "write_json",
        Box::new(|loc, args: &mut [Expr], ctx: &TypeContext| {
            arity(loc, "write_json", args, 1)?;
            args[0].infer_type(ctx)?;
            Ok(Type::file(false))
        }),
        Box::new(|loc, args, lib| {
            let contents = serde_json::to_string(&args[0].to_json())
                .map_err(|e| Error::eval(loc.clone(), format!("write_json: {}", e)))?;
            spool(loc, lib, "write_json", &contents)
        }),
    );

    lib.register(
        "write_tsv",
        Box::new(|loc, args: &mut [Expr], ctx: &TypeContext| {
            arity(loc, "write_tsv", args, 1)?;
            let t = args[0].infer_type(ctx)?;
            let target = Type::array(
                Type::array(Type::string(false), false, false),
                false,
                false,
            );
            if !t.coerces(&target, ctx.check_quant) {
                return Err(Error::type_mismatch(
                    loc.clone(),
                    "Array[Array[String]]",
                    &t.to_string(),
                ));
            }
            Ok(Type::file(false))
        }),
        Box::new(|loc, args, lib| {
            let rows = args[0]
                .as_array()
                .ok_or_else(|| Error::eval(loc.clone(), "write_tsv expects an Array"))?;
            let mut width: Option<usize> = None;
            let mut contents = String::new();
            for row in rows {
                let fields = row
                    .as_array()
                    .ok_or_else(|| Error::eval(loc.clone(), "write_tsv expects rows"))?;
                match width {
                    Some(w) if w != fields.len() => {
                        return Err(Error::eval(loc.clone(), "write_tsv: ragged rows"))
                    }
                    None => width = Some(fields.len()),
                    _ => {}
                }
                contents.push_str(
                    &fields
                        .iter()
                        .map(|f| f.to_display_string())
                        .collect::<Vec<_>>()
                        .join("\t"),
                );
                contents.push('\n');
            }
            spool(loc, lib, "write_tsv", &contents)
        }),
    );

    lib.register(
        "write_map",
        Box::new(|loc, args: &mut [Expr], ctx: &TypeContext| {
            arity(loc, "write_map", args, 1)?;
            let t = args[0].infer_type(ctx)?;
            let target = Type::map(Type::string(false), Type::string(false), false);
            if !t.coerces(&target, ctx.check_quant) {
                return Err(Error::type_mismatch(
                    loc.clone(),
                    "Map[String,String]",
                    &t.to_string(),
                ));
            }
            Ok(Type::file(false))
        }),
        Box::new(|loc, args, lib| {
            let entries = args[0]
                .as_map()
                .ok_or_else(|| Error::eval(loc.clone(), "write_map expects a Map"))?;
            let mut contents = String::new();
            for (k, v) in entries {
                contents.push_str(&k.to_display_string());
                contents.push('\t');
                contents.push_str(&v.to_display_string());
                contents.push('\n');
            }
            spool(loc, lib, "write_map", &contents)
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::LanguageVersion;
    use crate::env::Bindings;
    use crate::syntax::{expr::expression, Cursor};
    use std::sync::Arc;

    fn lib_with_io(dir: &Path) -> StdLib {
        StdLib::for_version(LanguageVersion::V1_1)
            .with_path_map(Arc::new(super::super::stdlib::IdentityPathMap))
            .with_write_dir(dir.to_path_buf())
    }

    fn eval_with(lib: &StdLib, source: &str, env: &Bindings<Value>) -> Result<Value, Error> {
        let mut cur = Cursor::new(source, "t.wdl", "t.wdl", LanguageVersion::V1_1);
        let e = expression(&mut cur).unwrap();
        e.eval(env, lib)
    }

    #[test]
    fn lines_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let lib = lib_with_io(tmp.path());
        let env = Bindings::new();
        let written = eval_with(&lib, "write_lines([\"a\", \"b\", \"c\"])", &env).unwrap();
        let env = env.bind("f".into(), written);
        let back = eval_with(&lib, "read_lines(f)", &env).unwrap();
        let lines: Vec<&str> = back
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(lines, vec!["a", "b", "c"]);
    }

    #[test]
    fn json_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let lib = lib_with_io(tmp.path());
        let env = Bindings::new();
        let written = eval_with(&lib, "write_json({\"a\": 1, \"b\": [2, 3]})", &env).unwrap();
        let env = env.bind("f".into(), written);
        let back = eval_with(&lib, "read_json(f)", &env).unwrap();
        let members = back.as_struct().unwrap();
        assert_eq!(members.get("a").unwrap().as_int(), Some(1));
    }

    #[test]
    fn tsv_round_trip_rectangular() {
        let tmp = tempfile::tempdir().unwrap();
        let lib = lib_with_io(tmp.path());
        let env = Bindings::new();
        let written = eval_with(
            &lib,
            "write_tsv([[\"a\", \"b\"], [\"c\", \"d\"]])",
            &env,
        )
        .unwrap();
        let env = env.bind("f".into(), written);
        let back = eval_with(&lib, "read_tsv(f)", &env).unwrap();
        assert_eq!(back.as_array().unwrap().len(), 2);

        // Ragged input is rejected on the write side.
        assert!(eval_with(&lib, "write_tsv([[\"a\", \"b\"], [\"c\"]])", &env).is_err());
    }

    #[test]
    fn map_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let lib = lib_with_io(tmp.path());
        let env = Bindings::new();
        let written = eval_with(&lib, "write_map({\"k1\": \"v1\", \"k2\": \"v2\"})", &env).unwrap();
        let env = env.bind("f".into(), written);
        let back = eval_with(&lib, "read_map(f)", &env).unwrap();
        assert_eq!(back.as_map().unwrap().len(), 2);
    }

    #[test]
    fn read_string_strips_one_newline() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("x.txt");
        fs::write(&path, "hello\n").unwrap();
        let lib = lib_with_io(tmp.path());
        let env = Bindings::new().bind(
            "f".into(),
            Value::file(path.display().to_string()).unwrap(),
        );
        assert_eq!(
            eval_with(&lib, "read_string(f)", &env).unwrap().as_str(),
            Some("hello")
        );
    }

    #[test]
    fn read_scalars() {
        let tmp = tempfile::tempdir().unwrap();
        let lib = lib_with_io(tmp.path());
        for (contents, expr, check) in [
            ("42\n", "read_int(f)", Value::int(42)),
            ("2.5\n", "read_float(f)", Value::float(2.5)),
            ("true\n", "read_boolean(f)", Value::boolean(true)),
        ] {
            let path = tmp.path().join("scalar.txt");
            fs::write(&path, contents).unwrap();
            let env = Bindings::new().bind(
                "f".into(),
                Value::file(path.display().to_string()).unwrap(),
            );
            let got = eval_with(&lib, expr, &env).unwrap();
            assert!(got.equals(&check).unwrap());
        }
    }

    #[test]
    fn size_in_units() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("x.bin");
        fs::write(&path, vec![0u8; 2048]).unwrap();
        let lib = lib_with_io(tmp.path());
        let env = Bindings::new().bind(
            "f".into(),
            Value::file(path.display().to_string()).unwrap(),
        );
        assert_eq!(
            eval_with(&lib, "size(f)", &env).unwrap().as_float(),
            Some(2048.0)
        );
        assert_eq!(
            eval_with(&lib, "size(f, \"KiB\")", &env).unwrap().as_float(),
            Some(2.0)
        );
        assert!(eval_with(&lib, "size(f, \"XB\")", &env).is_err());
    }

    #[test]
    fn glob_matches_relative_paths() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.txt"), "").unwrap();
        fs::write(tmp.path().join("b.txt"), "").unwrap();
        fs::write(tmp.path().join("c.log"), "").unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub/d.txt"), "").unwrap();

        let lib = StdLib::for_version(LanguageVersion::V1_1).with_task_context(
            tmp.path().to_path_buf(),
            tmp.path().join("stdout.txt"),
            tmp.path().join("stderr.txt"),
        );
        let env = Bindings::new();
        let v = eval_with(&lib, "glob(\"*.txt\")", &env).unwrap();
        let names: Vec<String> = v
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f.as_str().unwrap().rsplit('/').next().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);

        let v = eval_with(&lib, "glob(\"sub/*.txt\")", &env).unwrap();
        assert_eq!(v.as_array().unwrap().len(), 1);
    }

    #[test]
    fn stdout_requires_task_context() {
        let tmp = tempfile::tempdir().unwrap();
        let lib = lib_with_io(tmp.path());
        let env = Bindings::new();
        assert!(eval_with(&lib, "stdout()", &env).is_err());

        let lib = StdLib::for_version(LanguageVersion::V1_1).with_task_context(
            tmp.path().to_path_buf(),
            tmp.path().join("stdout.txt"),
            tmp.path().join("stderr.txt"),
        );
        let v = eval_with(&lib, "stdout()", &env).unwrap();
        assert!(v.as_str().unwrap().ends_with("stdout.txt"));
    }

    #[test]
    fn read_objects_header_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("obj.tsv");
        fs::write(&path, "name\tage\nalice\t30\nbob\t40\n").unwrap();
        let lib = lib_with_io(tmp.path());
        let env = Bindings::new().bind(
            "f".into(),
            Value::file(path.display().to_string()).unwrap(),
        );
        let v = eval_with(&lib, "read_objects(f)", &env).unwrap();
        let objs = v.as_array().unwrap();
        assert_eq!(objs.len(), 2);
        assert_eq!(
            objs[0].as_struct().unwrap().get("name").unwrap().as_str(),
            Some("alice")
        );
        assert!(eval_with(&lib, "read_object(f)", &env).is_err());
    }
}
