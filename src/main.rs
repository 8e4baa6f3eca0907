//! wdlrun CLI.

use clap::{Parser, Subcommand};
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use wdlrun::ast::imports::{load_document_file, FileImportResolver};
use wdlrun::ast::typecheck::CheckOptions;
use wdlrun::error::Error;
use wdlrun::run::director::{run_document, RunOptions};
use wdlrun::run::Config;

#[derive(Parser)]
#[command(
    name = "wdlrun",
    version,
    about = "Run Workflow Description Language (WDL) workflows locally in containers"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase logging verbosity.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (JSON).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a workflow (or a single task with --task).
    Run {
        /// WDL source file.
        source: PathBuf,
        /// Inputs as NAME=VALUE (repeat a name to build an array).
        #[arg(value_name = "NAME=VALUE")]
        inputs: Vec<String>,
        /// Inputs JSON file.
        #[arg(short = 'i', long = "input")]
        input_file: Option<PathBuf>,
        /// Run directory (append /. to use exactly).
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Run this task instead of the workflow.
        #[arg(long)]
        task: Option<String>,
        /// Copy input files into the work directory instead of mounting.
        #[arg(long)]
        copy_input_files: bool,
        /// Disable the call cache for this run.
        #[arg(long)]
        no_cache: bool,
        /// Force NAME to an empty array.
        #[arg(long = "empty", value_name = "NAME")]
        empty: Vec<String>,
        /// Force optional NAME to be absent.
        #[arg(long = "none", value_name = "NAME")]
        none: Vec<String>,
        /// Extra container environment (K or K=V), repeatable.
        #[arg(long = "env", value_name = "K[=V]")]
        env: Vec<String>,
    },
    /// Parse and typecheck without running.
    Check {
        /// WDL source files.
        #[arg(required = true)]
        sources: Vec<PathBuf>,
        /// Additional import search roots.
        #[arg(short = 'p', long = "path")]
        paths: Vec<PathBuf>,
        /// Exit non-zero on warnings too.
        #[arg(long)]
        strict: bool,
        /// Warning categories to suppress (comma-separated).
        #[arg(long, value_delimiter = ',')]
        suppress: Vec<String>,
        /// Disable all suppression.
        #[arg(long)]
        no_suppress: bool,
        /// Relax the optional-quantifier check.
        #[arg(long)]
        no_quant_check: bool,
    },
    /// Print a JSON skeleton of the required inputs.
    InputTemplate {
        source: PathBuf,
    },
    /// Pre-populate the download cache from an inputs file.
    Localize {
        source: PathBuf,
        inputs: PathBuf,
    },
    /// Execute a canned trivial workflow end to end.
    RunSelfTest,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = dispatch(cli).await;
    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string_pretty(&e.to_error_json()).unwrap_or_else(|_| e.to_string())
            );
            exit_code_for(&e)
        }
    }
}

fn exit_code_for(e: &Error) -> ExitCode {
    match e {
        Error::TaskFailure { exit_status, .. } => {
            let code = (*exit_status).clamp(1, 255) as u8;
            ExitCode::from(code)
        }
        Error::Lexical { .. }
        | Error::Syntax { .. }
        | Error::Import { .. }
        | Error::Static { .. }
        | Error::Input { .. }
        | Error::Configuration { .. } => ExitCode::from(2),
        Error::Interrupted => ExitCode::from(130),
        _ => ExitCode::from(1),
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode, Error> {
    match cli.command {
        Command::Run {
            source,
            inputs,
            input_file,
            dir,
            task,
            copy_input_files,
            no_cache,
            empty,
            none,
            env,
        } => {
            let mut config = Config::load(cli.config.as_deref())?;
            if copy_input_files {
                config.task.copy_input_files = true;
            }
            if no_cache {
                config.call_cache.get = false;
                config.call_cache.put = false;
            }
            if cli.verbose {
                config.task.verbose_stdout = true;
            }
            config.task.env.extend(env);

            let opts = CheckOptions {
                check_quant: !config.type_check.relax_quant,
            };
            let document = Arc::new(load_source(&source, &config, &opts)?);
            let inputs_json = gather_inputs(input_file.as_deref(), &inputs, &empty, &none)?;

            let outcome = run_document(
                Arc::new(config),
                document,
                inputs_json,
                RunOptions { dir, task },
            )
            .await?;

            let mut qualified = JsonMap::new();
            let mut entries: Vec<(String, JsonValue)> = outcome
                .outputs
                .iter()
                .map(|b| {
                    (
                        format!("{}.{}", outcome.namespace, b.name()),
                        b.value().to_json(),
                    )
                })
                .collect();
            entries.reverse();
            for (k, v) in entries {
                qualified.insert(k, v);
            }
            let payload = json!({
                "outputs": JsonValue::Object(qualified),
                "dir": outcome.dir.display().to_string(),
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).unwrap_or_default()
            );
            Ok(ExitCode::SUCCESS)
        }

        Command::Check {
            sources,
            paths,
            strict,
            suppress,
            no_suppress,
            no_quant_check,
        } => {
            // The lint walker is an external collaborator; its suppression
            // flags are accepted but inert here.
            let _ = (suppress, no_suppress);
            let mut config = Config::load(cli.config.as_deref())?;
            config.import.search_paths.extend(paths);
            if no_quant_check {
                config.type_check.relax_quant = true;
            }
            let opts = CheckOptions {
                check_quant: !config.type_check.relax_quant,
            };
            let mut warnings = 0usize;
            for source in &sources {
                let doc = load_source(source, &config, &opts)?;
                if doc.declared_version.is_none() {
                    warnings += 1;
                    eprintln!(
                        "{}: no version declaration (defaulted to draft-2)",
                        source.display()
                    );
                }
                println!("{}: OK", source.display());
            }
            if strict && warnings > 0 {
                return Ok(ExitCode::from(2));
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::InputTemplate { source } => {
            let config = Config::load(cli.config.as_deref())?;
            let opts = CheckOptions::default();
            let doc = load_source(&source, &config, &opts)?;
            let mut template = JsonMap::new();
            if let Some(wf) = &doc.workflow {
                for decl in wf.required_inputs() {
                    template.insert(
                        format!("{}.{}", wf.name, decl.name),
                        type_placeholder(&decl.ty),
                    );
                }
            } else {
                for t in &doc.tasks {
                    for decl in t.required_inputs() {
                        template.insert(
                            format!("{}.{}", t.name, decl.name),
                            type_placeholder(&decl.ty),
                        );
                    }
                }
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&JsonValue::Object(template)).unwrap_or_default()
            );
            Ok(ExitCode::SUCCESS)
        }

        Command::Localize { source, inputs } => {
            let mut config = Config::load(cli.config.as_deref())?;
            config.download_cache.enabled = true;
            let opts = CheckOptions::default();
            let _doc = load_source(&source, &config, &opts)?;
            let text = std::fs::read_to_string(&inputs)?;
            let parsed: JsonValue = serde_json::from_str(&text)?;
            let uris: Vec<String> = match &parsed {
                JsonValue::Object(map) => map
                    .values()
                    .filter_map(|v| v.as_str())
                    .filter(|s| wdlrun::run::download::is_uri(s))
                    .map(str::to_string)
                    .collect(),
                _ => Vec::new(),
            };
            if uris.is_empty() {
                println!("no URI inputs to localize");
                return Ok(ExitCode::SUCCESS);
            }
            let tmp = tempfile::tempdir()?;
            let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
            let executor = wdlrun::run::TaskExecutor {
                backend: wdlrun::run::backend::create_backend(&config)?,
                admission: Arc::new(wdlrun::run::Admission::new(&config.scheduler)),
                cache: Arc::new(wdlrun::run::CallCache::new(&config.call_cache)),
                cancel: cancel_rx,
                cancel_tx,
                config: Arc::new(config.clone()),
            };
            let cache =
                wdlrun::run::download::DownloadCache::new(config.download_cache.clone());
            let mut bindings = wdlrun::Bindings::new();
            for (i, uri) in uris.iter().enumerate() {
                bindings = bindings.bind(
                    format!("uri{}", i),
                    wdlrun::Value::file(uri.clone()).map_err(|e| Error::input(e.to_string()))?,
                );
            }
            wdlrun::run::download::localize_inputs(&executor, &cache, &bindings, tmp.path())
                .await?;
            println!("localized {} URI(s)", uris.len());
            Ok(ExitCode::SUCCESS)
        }

        Command::RunSelfTest => {
            let config = Config::load(cli.config.as_deref())?;
            let source = r#"version 1.1
task hello {
    input {
        String who
    }
    command <<<
        echo "Hello, ~{who}!" > message.txt
    >>>
    output {
        File message = "message.txt"
        String line = read_string("message.txt")
    }
}
workflow self_test {
    input {
        String who = "wdlrun"
    }
    call hello { input: who = who }
    output {
        String greeting = hello.line
    }
}"#;
            let tmp = tempfile::tempdir()?;
            let path = tmp.path().join("self_test.wdl");
            std::fs::write(&path, source)?;
            let opts = CheckOptions::default();
            let doc = Arc::new(load_source(&path, &config, &opts)?);
            let outcome = run_document(
                Arc::new(config),
                doc,
                json!({}),
                RunOptions {
                    dir: Some(tmp.path().to_path_buf()),
                    task: None,
                },
            )
            .await?;
            let greeting = outcome
                .outputs
                .resolve("greeting")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            if greeting == "Hello, wdlrun!" {
                println!("self test passed: {}", greeting);
                Ok(ExitCode::SUCCESS)
            } else {
                Err(Error::runtime(format!(
                    "self test produced unexpected output: {:?}",
                    greeting
                )))
            }
        }
    }
}

fn load_source(
    source: &Path,
    config: &Config,
    opts: &CheckOptions,
) -> Result<wdlrun::Document, Error> {
    let root = source.parent().unwrap_or_else(|| Path::new("."));
    let resolver = FileImportResolver::new(root, config.import.allow_outside)
        .with_search_paths(config.import.search_paths.clone());
    load_document_file(source, &resolver, opts)
}

/// Merge `-i FILE.json` with positional `NAME=VALUE` forms. Positionals win:
/// the first positional for a name replaces any file-supplied value outright;
/// only a name repeated across positionals builds an array.
fn gather_inputs(
    input_file: Option<&Path>,
    positional: &[String],
    empty: &[String],
    none: &[String],
) -> Result<JsonValue, Error> {
    let mut map = match input_file {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            match serde_json::from_str::<JsonValue>(&text)? {
                JsonValue::Object(o) => o,
                _ => return Err(Error::input("inputs file must hold a JSON object")),
            }
        }
        None => JsonMap::new(),
    };

    let mut from_positional: HashSet<String> = HashSet::new();
    for pair in positional {
        let (name, raw) = pair.split_once('=').ok_or_else(|| {
            Error::input(format!("positional input {:?} is not NAME=VALUE", pair))
        })?;
        let value = scan_value(raw);
        if from_positional.contains(name) {
            // A repeat of an earlier positional accumulates into an array.
            match map.get_mut(name) {
                Some(JsonValue::Array(items)) => items.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = JsonValue::Array(vec![first, value]);
                }
                None => {
                    map.insert(name.to_string(), value);
                }
            }
        } else {
            map.insert(name.to_string(), value);
            from_positional.insert(name.to_string());
        }
    }
    for name in empty {
        map.insert(name.clone(), JsonValue::Array(vec![]));
    }
    for name in none {
        map.insert(name.clone(), JsonValue::Null);
    }
    Ok(JsonValue::Object(map))
}

/// Typed scan of a positional value: boolean, integer, float, else string.
fn scan_value(raw: &str) -> JsonValue {
    match raw {
        "true" => return json!(true),
        "false" => return json!(false),
        _ => {}
    }
    if let Ok(i) = raw.parse::<i64>() {
        return json!(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if raw.contains('.') || raw.contains('e') || raw.contains('E') {
            return json!(f);
        }
    }
    json!(raw)
}

fn type_placeholder(ty: &wdlrun::Type) -> JsonValue {
    use wdlrun::Type;
    match ty {
        Type::Boolean { .. } => json!(false),
        Type::Int { .. } => json!(0),
        Type::Float { .. } => json!(0.0),
        Type::String { .. } => json!("String"),
        Type::File { .. } => json!("/path/to/file"),
        Type::Directory { .. } => json!("/path/to/directory"),
        Type::Array { item, .. } => json!([type_placeholder(item)]),
        Type::Map { .. } => json!({}),
        Type::Pair { left, right, .. } => json!({
            "left": type_placeholder(left),
            "right": type_placeholder(right),
        }),
        Type::StructInstance {
            members: Some(members),
            ..
        } => {
            let obj: JsonMap<String, JsonValue> = members
                .iter()
                .map(|(k, v)| (k.clone(), type_placeholder(v)))
                .collect();
            JsonValue::Object(obj)
        }
        _ => JsonValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_value_forms() {
        assert_eq!(scan_value("true"), json!(true));
        assert_eq!(scan_value("42"), json!(42));
        assert_eq!(scan_value("2.5"), json!(2.5));
        assert_eq!(scan_value("hello"), json!("hello"));
        assert_eq!(scan_value("007"), json!(7));
        assert_eq!(scan_value("1e3"), json!(1000.0));
    }

    #[test]
    fn repeated_names_become_arrays() {
        let inputs = gather_inputs(
            None,
            &[
                "wf.x=1".to_string(),
                "wf.x=2".to_string(),
                "wf.y=solo".to_string(),
            ],
            &[],
            &[],
        )
        .unwrap();
        assert_eq!(inputs["wf.x"], json!([1, 2]));
        assert_eq!(inputs["wf.y"], json!("solo"));
    }

    #[test]
    fn positional_replaces_file_value() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("inputs.json");
        std::fs::write(&path, r#"{"wf.x": 1, "wf.y": "keep"}"#).unwrap();

        // One positional for a file-supplied scalar overrides it; it must
        // not merge into a two-element array.
        let inputs =
            gather_inputs(Some(&path), &["wf.x=2".to_string()], &[], &[]).unwrap();
        assert_eq!(inputs["wf.x"], json!(2));
        assert_eq!(inputs["wf.y"], json!("keep"));

        // Repeats across positionals still accumulate, starting fresh from
        // the first positional rather than the file value.
        let inputs = gather_inputs(
            Some(&path),
            &["wf.x=2".to_string(), "wf.x=3".to_string()],
            &[],
            &[],
        )
        .unwrap();
        assert_eq!(inputs["wf.x"], json!([2, 3]));
    }

    #[test]
    fn empty_and_none_flags() {
        let inputs = gather_inputs(
            None,
            &[],
            &["wf.xs".to_string()],
            &["wf.opt".to_string()],
        )
        .unwrap();
        assert_eq!(inputs["wf.xs"], json!([]));
        assert_eq!(inputs["wf.opt"], JsonValue::Null);
    }

    #[test]
    fn malformed_positional_rejected() {
        let err = gather_inputs(None, &["oops".to_string()], &[], &[]).unwrap_err();
        assert_eq!(err.kind(), "InputError");
    }

    #[test]
    fn placeholders_cover_types() {
        use wdlrun::Type;
        assert_eq!(type_placeholder(&Type::int(false)), json!(0));
        assert_eq!(
            type_placeholder(&Type::array(Type::string(false), false, true)),
            json!(["String"])
        );
    }
}
