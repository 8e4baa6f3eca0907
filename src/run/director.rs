//! The run director: owns one top-level invocation.
//!
//! Creates the run directory layout, parses namespaced JSON inputs,
//! localizes URI inputs, drives the workflow state machine over a task
//! completion channel, translates signals into cooperative cancellation,
//! and writes `outputs.json`/`error.json` plus the `out/` link tree and the
//! `rerun` script.

use crate::ast::{Callee, Document, Task, Workflow};
use crate::env::Bindings;
use crate::error::Error;
use crate::eval::stdlib::StdLib;
use crate::run::admission::Admission;
use crate::run::backend::create_backend;
use crate::run::cache::CallCache;
use crate::run::config::Config;
use crate::run::download::{localize_inputs, DownloadCache};
use crate::run::state::{InstanceKey, StateMachine};
use crate::run::task::{run_task, shell_escape, TaskExecutor};
use crate::value::Value;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// Options of one `run` invocation.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Run directory; a trailing `/.` means "use exactly this directory".
    pub dir: Option<PathBuf>,
    /// Run a single task instead of the workflow.
    pub task: Option<String>,
}

/// A finished run.
pub struct RunOutcome {
    pub outputs: Bindings<Value>,
    pub dir: PathBuf,
    /// Qualified name prefix of the outputs (`workflow_name` or task name).
    pub namespace: String,
}

/// Execute a loaded document end to end.
pub async fn run_document(
    config: Arc<Config>,
    document: Arc<Document>,
    inputs_json: JsonValue,
    options: RunOptions,
) -> Result<RunOutcome, Error> {
    config.validate()?;

    let target = select_target(&document, options.task.as_deref())?;
    let target_name = match &target {
        Target::Workflow(wf) => wf.name.clone(),
        Target::Task(t) => t.name.clone(),
    };

    let run_dir = provision_run_dir(options.dir.as_deref(), &target_name)?;
    fs::create_dir_all(run_dir.join("write_"))?;
    copy_sources(&document, &run_dir.join("wdl"))?;
    fs::write(
        run_dir.join("inputs.json"),
        serde_json::to_string_pretty(&inputs_json).unwrap_or_default(),
    )?;
    write_rerun_script(&run_dir, &document.abspath)?;
    update_last_symlink(&run_dir);

    let log_name = match &target {
        Target::Workflow(_) => "workflow.log",
        Target::Task(_) => "task.log",
    };
    let log = RunLog::open(&run_dir.join(log_name))?;
    log.line(&format!("run started: {}", target_name));

    let (cancel_tx, cancel_rx) = watch::channel(false);
    spawn_signal_handler(cancel_tx.clone());

    let executor = TaskExecutor {
        backend: create_backend(&config)?,
        admission: Arc::new(Admission::new(&config.scheduler)),
        cache: Arc::new(CallCache::new(&config.call_cache)),
        cancel: cancel_rx,
        cancel_tx,
        config: Arc::clone(&config),
    };
    let download_cache = Arc::new(DownloadCache::new(config.download_cache.clone()));

    let result = match &target {
        Target::Task(task) => {
            run_one_task(
                &executor,
                &download_cache,
                &document,
                task,
                &inputs_json,
                &run_dir,
            )
            .await
        }
        Target::Workflow(wf) => {
            run_top_workflow(
                &executor,
                &download_cache,
                &document,
                wf,
                &inputs_json,
                &run_dir,
            )
            .await
        }
    };

    match result {
        Ok(outputs) => {
            let qualified = qualified_outputs(&target_name, &outputs);
            let payload = json!({
                "outputs": qualified,
                "dir": run_dir.display().to_string(),
            });
            fs::write(
                run_dir.join("outputs.json"),
                serde_json::to_string_pretty(&payload).unwrap_or_default(),
            )?;
            build_out_tree(&run_dir.join("out"), &target_name, &outputs, &config)?;
            log.line("run succeeded");
            Ok(RunOutcome {
                outputs,
                dir: run_dir,
                namespace: target_name,
            })
        }
        Err(e) => {
            // `outputs.json` is never present on failure.
            let _ = fs::remove_file(run_dir.join("outputs.json"));
            fs::write(
                run_dir.join("error.json"),
                serde_json::to_string_pretty(&e.to_error_json()).unwrap_or_default(),
            )?;
            log.line(&format!("run failed: {}", e));
            error!(target: "wdlrun::director", error = %e, "run failed");
            Err(e)
        }
    }
}

enum Target<'a> {
    Workflow(&'a Workflow),
    Task(&'a Task),
}

fn select_target<'a>(document: &'a Document, task: Option<&str>) -> Result<Target<'a>, Error> {
    if let Some(name) = task {
        return document
            .task(name)
            .map(Target::Task)
            .ok_or_else(|| Error::input(format!("no task named {} in document", name)));
    }
    if let Some(wf) = &document.workflow {
        return Ok(Target::Workflow(wf));
    }
    match document.tasks.as_slice() {
        [single] => Ok(Target::Task(single)),
        [] => Err(Error::input("document contains no workflow or task")),
        _ => Err(Error::input(
            "document has multiple tasks and no workflow; select one with --task",
        )),
    }
}

/// Timestamp-prefixed directory unless the caller pinned one with `dir/.`.
fn provision_run_dir(dir: Option<&Path>, name: &str) -> Result<PathBuf, Error> {
    if let Some(given) = dir {
        let text = given.display().to_string();
        if text.ends_with("/.") {
            let exact = PathBuf::from(text.trim_end_matches("/."));
            fs::create_dir_all(&exact)?;
            return Ok(exact);
        }
    }
    let base = dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let stamp = timestamp();
    for attempt in 0.. {
        let candidate = if attempt == 0 {
            base.join(format!("{}_{}", stamp, name))
        } else {
            base.join(format!("{}_{}_{}", stamp, name, attempt + 1))
        };
        match fs::create_dir_all(candidate.parent().unwrap_or(&base))
            .and_then(|_| fs::create_dir(&candidate))
        {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    unreachable!()
}

fn timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = now.as_secs();
    let days = secs / 86_400;
    let (y, m, d) = civil_date(days as i64);
    let tod = secs % 86_400;
    format!(
        "{:04}{:02}{:02}_{:02}{:02}{:02}",
        y,
        m,
        d,
        tod / 3600,
        (tod % 3600) / 60,
        tod % 60
    )
}

/// Days-since-epoch to (year, month, day), proleptic Gregorian.
fn civil_date(mut days: i64) -> (i64, u32, u32) {
    days += 719_468;
    let era = days.div_euclid(146_097);
    let doe = days.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let year = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    (if month <= 2 { year + 1 } else { year }, month, day)
}

/// Copy the executed source and its imports under `wdl/`.
fn copy_sources(document: &Document, dest: &Path) -> Result<(), Error> {
    fs::create_dir_all(dest)?;
    let mut docs: Vec<(String, String)> = Vec::new();
    collect_doc_sources(document, &mut docs);
    for (abspath, text) in docs {
        let name = Path::new(&abspath)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "main.wdl".to_string());
        let mut target = dest.join(&name);
        let mut n = 1;
        while target.exists() {
            n += 1;
            target = dest.join(format!("{}.{}", name, n));
        }
        fs::write(target, text)?;
    }
    Ok(())
}

fn collect_doc_sources(document: &Document, out: &mut Vec<(String, String)>) {
    if out.iter().any(|(p, _)| *p == document.abspath) {
        return;
    }
    out.push((document.abspath.clone(), document.source_text.clone()));
    for import in &document.imports {
        if let Some(imported) = import.document.as_deref() {
            collect_doc_sources(imported, out);
        }
    }
}

fn write_rerun_script(run_dir: &Path, source: &str) -> Result<(), Error> {
    let script = format!(
        "#!/bin/sh\n# Re-invoke this run with identical inputs.\nexec wdlrun run {} -i {} \"$@\"\n",
        shell_escape(source),
        shell_escape(&run_dir.join("inputs.json").display().to_string()),
    );
    let path = run_dir.join("rerun");
    fs::write(&path, script)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&path)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms)?;
    }
    Ok(())
}

fn update_last_symlink(run_dir: &Path) {
    if let Some(parent) = run_dir.parent() {
        let link = parent.join("_LAST");
        let _ = fs::remove_file(&link);
        #[cfg(unix)]
        let _ = std::os::unix::fs::symlink(run_dir, &link);
    }
}

/// The advisory-locked run log; external observers detect liveness by
/// probing the lock.
struct RunLog {
    file: fs::File,
}

impl RunLog {
    fn open(path: &Path) -> Result<Self, Error> {
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        file.try_lock()
            .map_err(|_| Error::runtime(format!("run log {} is locked by another process", path.display())))?;
        Ok(Self { file })
    }

    fn line(&self, message: &str) {
        let now = SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let mut file = &self.file;
        let _ = writeln!(file, "[{}] {}", now, message);
        let _ = file.flush();
    }
}

impl Drop for RunLog {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn spawn_signal_handler(cancel: watch::Sender<bool>) {
    tokio::spawn(async move {
        let mut signals_seen = 0u32;
        loop {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                let mut term = match tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate(),
                ) {
                    Ok(s) => s,
                    Err(_) => return,
                };
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = ctrl_c.await;
            }
            signals_seen += 1;
            if signals_seen == 1 {
                warn!(target: "wdlrun::director", "interrupt received; cancelling run");
                let _ = cancel.send(true);
            } else {
                warn!(target: "wdlrun::director", "second interrupt; exiting immediately");
                std::process::exit(130);
            }
        }
    });
}

/// Split namespaced JSON inputs into workflow inputs and per-call overrides.
fn partition_inputs(
    target_name: &str,
    inputs_json: &JsonValue,
    target_input_names: &[String],
) -> Result<(JsonValue, HashMap<String, Vec<(String, JsonValue)>>), Error> {
    let mut direct = serde_json::Map::new();
    let mut overrides: HashMap<String, Vec<(String, JsonValue)>> = HashMap::new();
    let object = match inputs_json {
        JsonValue::Null => return Ok((JsonValue::Object(direct), overrides)),
        JsonValue::Object(o) => o,
        _ => return Err(Error::input("inputs JSON must be an object")),
    };
    for (key, value) in object {
        let stripped = key
            .strip_prefix(&format!("{}.", target_name))
            .unwrap_or(key.as_str());
        match stripped.split_once('.') {
            None => {
                if !target_input_names.iter().any(|n| n == stripped) {
                    return Err(Error::input(format!("unknown input key {}", key)));
                }
                direct.insert(stripped.to_string(), value.clone());
            }
            Some((call, input)) => {
                overrides
                    .entry(call.to_string())
                    .or_default()
                    .push((input.to_string(), value.clone()));
            }
        }
    }
    Ok((JsonValue::Object(direct), overrides))
}

/// Typed intake of the direct workflow/task inputs.
fn typed_inputs(decls: &[crate::ast::Decl], direct: &JsonValue) -> Result<Bindings<Value>, Error> {
    let mut out = Bindings::new();
    if let JsonValue::Object(map) = direct {
        let mut entries: Vec<(String, Value)> = Vec::new();
        for decl in decls {
            match map.get(&decl.name) {
                None | Some(JsonValue::Null) => {}
                Some(v) => {
                    let value =
                        Value::from_json_typed(&decl.ty, v.clone()).map_err(|e| {
                            Error::input(format!("input {}: {}", decl.name, e))
                        })?;
                    entries.push((decl.name.clone(), value));
                }
            }
        }
        for (name, value) in entries.into_iter().rev() {
            out = out.bind(name, value);
        }
    }
    Ok(out)
}

async fn run_one_task(
    executor: &TaskExecutor,
    download_cache: &Arc<DownloadCache>,
    document: &Arc<Document>,
    task: &Task,
    inputs_json: &JsonValue,
    run_dir: &Path,
) -> Result<Bindings<Value>, Error> {
    let input_names: Vec<String> = task.inputs.iter().map(|d| d.name.clone()).collect();
    let (direct, _overrides) = partition_inputs(&task.name, inputs_json, &input_names)?;
    let inputs = typed_inputs(&task.inputs, &direct)?;
    let inputs = localize_inputs(executor, download_cache, &inputs, run_dir).await?;
    run_task(executor, task, document, &inputs, run_dir, &task.name).await
}

async fn run_top_workflow(
    executor: &TaskExecutor,
    download_cache: &Arc<DownloadCache>,
    document: &Arc<Document>,
    workflow: &Workflow,
    inputs_json: &JsonValue,
    run_dir: &Path,
) -> Result<Bindings<Value>, Error> {
    let input_names: Vec<String> = workflow.inputs.iter().map(|d| d.name.clone()).collect();
    let (direct, override_json) = partition_inputs(&workflow.name, inputs_json, &input_names)?;
    let inputs = typed_inputs(&workflow.inputs, &direct)?;
    let inputs = localize_inputs(executor, download_cache, &inputs, run_dir).await?;

    let mut overrides: HashMap<String, Vec<(String, Value)>> = HashMap::new();
    for (call, entries) in override_json {
        overrides.insert(
            call,
            entries
                .into_iter()
                .map(|(k, v)| (k, Value::from_json(v)))
                .collect(),
        );
    }

    execute_workflow(
        executor.clone(),
        Arc::clone(document),
        inputs,
        overrides,
        run_dir.to_path_buf(),
    )
    .await
}

/// Owned resolution of a call target (for spawning).
enum OwnedCallee {
    Task(Arc<Document>, Task),
    Workflow(Arc<Document>),
}

fn resolve_owned(document: &Arc<Document>, callee: &str) -> Option<OwnedCallee> {
    match callee.split_once('.') {
        None => match document.resolve_callee(callee)? {
            Callee::Task(t) => Some(OwnedCallee::Task(Arc::clone(document), t.clone())),
            Callee::Workflow(_, _) => Some(OwnedCallee::Workflow(Arc::clone(document))),
        },
        Some((ns, rest)) => {
            let import = document.imports.iter().find(|i| i.namespace == ns)?;
            let inner = import.document.clone()?;
            resolve_owned(&inner, rest)
        }
    }
}

/// Drive one workflow (or sub-workflow) to completion.
fn execute_workflow(
    executor: TaskExecutor,
    document: Arc<Document>,
    inputs: Bindings<Value>,
    overrides: HashMap<String, Vec<(String, Value)>>,
    dir: PathBuf,
) -> Pin<Box<dyn Future<Output = Result<Bindings<Value>, Error>> + Send>> {
    Box::pin(async move {
        let workflow = document
            .workflow
            .as_ref()
            .ok_or_else(|| Error::runtime("document has no workflow"))?;
        let graph = Arc::new(crate::ast::graph::build(workflow)?);
        let mut machine = StateMachine::new(Arc::clone(&graph), workflow, &inputs, overrides)?;

        let stdlib = StdLib::for_version(document.version).with_write_dir(dir.join("write_"));
        let (tx, mut rx) = mpsc::unbounded_channel::<(InstanceKey, Result<Bindings<Value>, Error>)>();
        let mut in_flight: usize = 0;
        let mut cancel = executor.cancel.clone();
        let fail_slow = executor.config.scheduler.fail_slow;

        loop {
            if *cancel.borrow() {
                machine.cancel();
            }

            let jobs = match machine.step(&stdlib) {
                Ok(jobs) => jobs,
                Err(e) => {
                    machine.abort(e);
                    Vec::new()
                }
            };

            for job in jobs {
                let call_dir = dir.join(call_dir_name(&job.call_name, &job.key.1));
                let target = match resolve_owned(&document, &job.callee) {
                    Some(t) => t,
                    None => {
                        machine.fail(
                            &job.key,
                            Error::runtime(format!("cannot resolve callee {}", job.callee)),
                        );
                        continue;
                    }
                };
                info!(
                    target: "wdlrun::director",
                    call = job.call_name.as_str(),
                    dir = %call_dir.display(),
                    "starting call"
                );
                let tx = tx.clone();
                let executor_clone = executor.clone();
                let key = job.key.clone();
                let inputs = job.inputs.clone();
                in_flight += 1;
                match target {
                    OwnedCallee::Task(defining, task) => {
                        let run_name = call_dir_name(&job.call_name, &job.key.1);
                        tokio::spawn(async move {
                            let result = run_task(
                                &executor_clone,
                                &task,
                                &defining,
                                &inputs,
                                &call_dir,
                                &run_name,
                            )
                            .await;
                            let _ = tx.send((key, result));
                        });
                    }
                    OwnedCallee::Workflow(defining) => {
                        tokio::spawn(async move {
                            let result = execute_workflow(
                                executor_clone,
                                defining,
                                inputs,
                                HashMap::new(),
                                call_dir,
                            )
                            .await;
                            let _ = tx.send((key, result));
                        });
                    }
                }
            }

            if machine.is_done() && in_flight == 0 {
                break;
            }

            tokio::select! {
                received = rx.recv() => {
                    if let Some((key, result)) = received {
                        in_flight -= 1;
                        match result {
                            Ok(outputs) => machine.complete(&key, outputs),
                            Err(e) => {
                                machine.fail(&key, e);
                                if !fail_slow && !machine.is_cancelled() {
                                    // Fail-fast: stop running siblings; the
                                    // recorded failure still wins over the
                                    // induced interrupts.
                                    let _ = executor.cancel_tx.send(true);
                                }
                            }
                        }
                    }
                }
                _ = cancel.changed() => {
                    machine.cancel();
                }
            }
        }

        machine.outcome()
    })
}

/// `call-NAME` with scatter indices appended (`call-NAME-3-0`).
fn call_dir_name(call_name: &str, path: &[usize]) -> String {
    let mut name = format!("call-{}", call_name);
    for index in path {
        name.push_str(&format!("-{}", index));
    }
    name
}

fn qualified_outputs(namespace: &str, outputs: &Bindings<Value>) -> JsonValue {
    let mut map = serde_json::Map::new();
    let mut entries: Vec<(String, JsonValue)> = outputs
        .iter()
        .map(|b| (format!("{}.{}", namespace, b.name()), b.value().to_json()))
        .collect();
    entries.reverse();
    for (k, v) in entries {
        map.insert(k, v);
    }
    JsonValue::Object(map)
}

/// Symlink (or hardlink) tree of `File`/`Directory` outputs by qualified
/// output name.
fn build_out_tree(
    out_dir: &Path,
    namespace: &str,
    outputs: &Bindings<Value>,
    config: &Config,
) -> Result<(), Error> {
    let _ = namespace;
    for binding in outputs.iter() {
        let mut paths = Vec::new();
        binding.value().collect_paths(&mut paths);
        if paths.is_empty() {
            continue;
        }
        let subdir = out_dir.join(binding.name());
        fs::create_dir_all(&subdir)?;
        for (i, p) in paths.iter().enumerate() {
            let source = Path::new(p);
            let base = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("output-{}", i));
            let mut link = subdir.join(&base);
            if link.exists() {
                link = subdir.join(format!("{}-{}", i, base));
            }
            #[cfg(unix)]
            {
                if config.file_io.output_hardlinks && source.is_file() {
                    if fs::hard_link(source, &link).is_err() {
                        let _ = fs::copy(source, &link);
                    }
                } else {
                    let _ = std::os::unix::fs::symlink(source, &link);
                }
            }
            #[cfg(not(unix))]
            {
                let _ = fs::copy(source, &link);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_dir_names_carry_indices() {
        assert_eq!(call_dir_name("hello", &[]), "call-hello");
        assert_eq!(call_dir_name("align", &[3]), "call-align-3");
        assert_eq!(call_dir_name("align", &[3, 0]), "call-align-3-0");
    }

    #[test]
    fn partition_inputs_namespaced_forms() {
        let inputs = json!({
            "wf.who": "x",
            "wf.t.n": 3,
            "direct": true,
        });
        let (direct, overrides) = partition_inputs(
            "wf",
            &inputs,
            &["who".to_string(), "direct".to_string()],
        )
        .unwrap();
        assert_eq!(direct["who"], json!("x"));
        assert_eq!(direct["direct"], json!(true));
        assert_eq!(overrides["t"], vec![("n".to_string(), json!(3))]);
    }

    #[test]
    fn unknown_input_key_rejected() {
        let inputs = json!({"wf.nope": 1});
        let err = partition_inputs("wf", &inputs, &["who".to_string()]).unwrap_err();
        assert_eq!(err.kind(), "InputError");
    }

    #[test]
    fn null_means_absent_optional() {
        use crate::ast::Decl;
        use crate::error::SourceLoc;
        use crate::types::Type;
        let decls = vec![Decl::new(SourceLoc::unknown(), "x", Type::int(true), None)];
        let inputs = typed_inputs(&decls, &json!({"x": null})).unwrap();
        assert!(inputs.resolve("x").is_none(), "null stays unset");
    }

    #[test]
    fn typed_input_mismatch_is_input_error() {
        use crate::ast::Decl;
        use crate::error::SourceLoc;
        use crate::types::Type;
        let decls = vec![Decl::new(SourceLoc::unknown(), "x", Type::int(false), None)];
        let err = typed_inputs(&decls, &json!({"x": [1, 2]})).unwrap_err();
        assert_eq!(err.kind(), "InputError");
    }

    #[test]
    fn qualified_output_names() {
        let outputs = Bindings::new()
            .bind("m".to_string(), Value::int(1))
            .bind("n".to_string(), Value::string("x"));
        let q = qualified_outputs("hello", &outputs);
        assert_eq!(q["hello.m"], json!(1));
        assert_eq!(q["hello.n"], json!("x"));
    }

    #[test]
    fn run_dir_provisioning() {
        let tmp = tempfile::tempdir().unwrap();
        let d1 = provision_run_dir(Some(tmp.path()), "wf").unwrap();
        assert!(d1.exists());
        assert!(d1
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("_wf"));

        // Pinned directory form.
        let pinned = tmp.path().join("exact");
        let spec = PathBuf::from(format!("{}/.", pinned.display()));
        let d2 = provision_run_dir(Some(&spec), "wf").unwrap();
        assert_eq!(d2, pinned);
    }

    #[test]
    fn civil_date_known_values() {
        // 2000-03-01 is day 11017 since the epoch.
        assert_eq!(civil_date(11017), (2000, 3, 1));
        assert_eq!(civil_date(0), (1970, 1, 1));
    }

    #[test]
    fn select_target_rules() {
        let mut doc = crate::syntax::parse_document(
            "version 1.1\ntask a { command <<< echo >>> }\ntask b { command <<< echo >>> }",
            "t.wdl",
            "/tmp/t.wdl",
        )
        .unwrap();
        doc.workflow = None;
        assert!(select_target(&doc, Some("a")).is_ok());
        assert!(select_target(&doc, Some("zzz")).is_err());
        // Two tasks, no workflow, no selection: ambiguous.
        assert!(select_target(&doc, None).is_err());
    }
}
