//! The per-call task runtime.
//!
//! One invocation covers up to `runtime.maxRetries + 1` attempts. Each
//! attempt stages inputs (read-only mounts, or copies under
//! `copy_input_files`), interpolates the command template against the
//! container's view of the filesystem, runs the container through the
//! backend under admission control, and collects typed outputs from the
//! work directory. `File` outputs escaping the work directory are rejected.

use crate::ast::{Document, LanguageVersion, StringPart, Task};
use crate::env::Bindings;
use crate::error::Error;
use crate::eval::stdlib::{StdLib, WorkdirPathMap};
use crate::run::admission::Admission;
use crate::run::backend::{ContainerBackend, ContainerSpec, ContainerStatus, Mount};
use crate::run::cache::{self, CallCache};
use crate::run::config::Config;
use crate::value::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Shared context for running tasks within one workflow run.
#[derive(Clone)]
pub struct TaskExecutor {
    pub config: Arc<Config>,
    pub backend: Arc<dyn ContainerBackend>,
    pub admission: Arc<Admission>,
    pub cache: Arc<CallCache>,
    /// Flips to `true` when the run is cancelled.
    pub cancel: watch::Receiver<bool>,
    /// Used by the director to cancel siblings under fail-fast.
    pub cancel_tx: watch::Sender<bool>,
}

/// Evaluated runtime attributes of one task invocation.
#[derive(Debug, Clone)]
pub struct RuntimeAttributes {
    pub image: String,
    pub cpu: u32,
    pub memory: u64,
    pub max_retries: u32,
    pub accepted_codes: AcceptedCodes,
    pub privileged: bool,
}

/// The task's `returnCodes` declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum AcceptedCodes {
    Only(Vec<i64>),
    Any,
}

impl AcceptedCodes {
    pub fn accepts(&self, code: i64) -> bool {
        match self {
            AcceptedCodes::Only(codes) => codes.contains(&code),
            AcceptedCodes::Any => true,
        }
    }
}

/// Parse runtime attributes from the evaluated runtime map.
pub fn runtime_attributes(
    evaluated: &[(String, Value)],
    config: &Config,
) -> Result<RuntimeAttributes, Error> {
    let find = |key: &str| evaluated.iter().find(|(k, _)| k == key).map(|(_, v)| v);

    let image = find("docker")
        .or_else(|| find("container"))
        .map(|v| v.to_display_string())
        .unwrap_or_else(|| config.container.default_image.clone());

    let cpu = match find("cpu") {
        Some(v) => v
            .as_float()
            .map(|f| f.ceil() as u32)
            .ok_or_else(|| Error::input("runtime.cpu must be numeric"))?,
        None => 1,
    };

    let memory = match find("memory") {
        Some(v) => parse_memory(v)?,
        None => 2 << 30,
    };

    let max_retries = match find("maxRetries").or_else(|| find("max_retries")) {
        Some(v) => v
            .as_int()
            .ok_or_else(|| Error::input("runtime.maxRetries must be an Int"))?
            .max(0) as u32,
        None => 0,
    };

    let accepted_codes = match find("returnCodes").or_else(|| find("continueOnReturnCode")) {
        None => AcceptedCodes::Only(vec![0]),
        Some(Value::String { value, .. }) if value == "*" => AcceptedCodes::Any,
        Some(Value::Boolean { value: true, .. }) => AcceptedCodes::Any,
        Some(Value::Boolean { value: false, .. }) => AcceptedCodes::Only(vec![0]),
        Some(v) => match (v.as_int(), v.as_array()) {
            (Some(code), _) => AcceptedCodes::Only(vec![code]),
            (None, Some(items)) => {
                let codes: Option<Vec<i64>> = items.iter().map(|i| i.as_int()).collect();
                AcceptedCodes::Only(codes.ok_or_else(|| {
                    Error::input("runtime.returnCodes must be Int, Array[Int], or \"*\"")
                })?)
            }
            _ => {
                return Err(Error::input(
                    "runtime.returnCodes must be Int, Array[Int], or \"*\"",
                ))
            }
        },
    };

    let privileged = matches!(find("privileged"), Some(Value::Boolean { value: true, .. }));

    Ok(RuntimeAttributes {
        image,
        cpu,
        memory,
        max_retries,
        accepted_codes,
        privileged,
    })
}

/// Parse `runtime.memory`: an Int byte count or a string like `4G`/`2GiB`.
pub fn parse_memory(value: &Value) -> Result<u64, Error> {
    if let Some(i) = value.as_int() {
        return Ok(i.max(0) as u64);
    }
    let text = value.to_display_string();
    let trimmed = text.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);
    let quantity: f64 = digits
        .parse()
        .map_err(|_| Error::input(format!("cannot parse runtime.memory: {:?}", text)))?;
    let factor: u64 = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" => 1000,
        "M" | "MB" => 1000 * 1000,
        "G" | "GB" => 1000 * 1000 * 1000,
        "T" | "TB" => 1000u64.pow(4),
        "KI" | "KIB" => 1 << 10,
        "MI" | "MIB" => 1 << 20,
        "GI" | "GIB" => 1 << 30,
        "TI" | "TIB" => 1 << 40,
        other => {
            return Err(Error::input(format!(
                "unknown memory unit {:?} in runtime.memory",
                other
            )))
        }
    };
    Ok((quantity * factor as f64) as u64)
}

/// Where a staged input appears inside the container.
#[derive(Debug, Clone)]
pub struct StagedInput {
    pub host: PathBuf,
    pub container: PathBuf,
}

/// Assign container paths to every `File`/`Directory` input outside the
/// call directory. Inputs sharing a basename land in distinct slots.
pub fn plan_staging(paths: &[String], call_dir: &Path) -> Vec<StagedInput> {
    let mut staged: Vec<StagedInput> = Vec::new();
    for path in paths {
        let host = PathBuf::from(path);
        if host.starts_with(call_dir) {
            continue;
        }
        if staged.iter().any(|s| s.host == host) {
            continue;
        }
        let base = host
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input".to_string());
        let container = PathBuf::from(format!("/mnt/inputs/{}/{}", staged.len(), base));
        staged.push(StagedInput { host, container });
    }
    staged
}

/// Render the command template with the guard regex applied to every
/// interpolated value.
pub fn render_command(
    parts: &[StringPart],
    env: &Bindings<Value>,
    stdlib: &StdLib,
    guard: Option<&regex::Regex>,
) -> Result<String, Error> {
    let mut out = String::new();
    for part in parts {
        match part {
            StringPart::Text(text) => out.push_str(text),
            StringPart::Placeholder { expr, options } => {
                let single = vec![StringPart::Placeholder {
                    expr: expr.clone(),
                    options: options.clone(),
                }];
                let rendered = crate::eval::render_parts(&single, env, stdlib)?;
                if let Some(re) = guard {
                    if !re.is_match(&rendered) {
                        return Err(Error::Command {
                            loc: expr.loc().clone(),
                            message: format!(
                                "placeholder value {:?} rejected by placeholder_regex",
                                rendered
                            ),
                        });
                    }
                }
                out.push_str(&rendered);
            }
        }
    }
    Ok(out)
}

/// Single-quote a string for the shell.
pub fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Validate a collected `File`/`Directory` output and absolutize it.
/// Anything outside the work directory (stdout/stderr excepted) is refused.
pub fn validate_output_path(
    virtualized: &str,
    work_dir: &Path,
    call_dir: &Path,
) -> Result<String, Error> {
    let joined = if Path::new(virtualized).is_absolute() {
        PathBuf::from(virtualized)
    } else {
        work_dir.join(virtualized)
    };
    let resolved = joined.canonicalize().map_err(|_| {
        Error::filesystem(
            format!("task output file not found: {}", joined.display()),
            Some(joined.clone()),
        )
    })?;
    let work_canon = work_dir
        .canonicalize()
        .unwrap_or_else(|_| work_dir.to_path_buf());
    let call_canon = call_dir
        .canonicalize()
        .unwrap_or_else(|_| call_dir.to_path_buf());
    let in_work = resolved.starts_with(&work_canon);
    let is_stream = resolved == call_canon.join("stdout.txt")
        || resolved == call_canon.join("stderr.txt");
    if !in_work && !is_stream {
        return Err(Error::filesystem(
            format!(
                "task output {} resolves outside the working directory",
                resolved.display()
            ),
            Some(resolved),
        ));
    }
    Ok(resolved.display().to_string())
}

/// Execute one task call, consulting the call cache and retrying on
/// failure per `runtime.maxRetries`.
pub async fn run_task(
    executor: &TaskExecutor,
    task: &Task,
    document: &Document,
    supplied: &Bindings<Value>,
    call_dir: &Path,
    run_name: &str,
) -> Result<Bindings<Value>, Error> {
    fs::create_dir_all(call_dir)?;
    let write_dir = call_dir.join("write_");

    // Bind inputs and post-input declarations in order.
    let setup_lib = StdLib::for_version(document.version).with_write_dir(write_dir.clone());
    let mut env = Bindings::new();
    for decl in task.inputs.iter().chain(task.postinputs.iter()) {
        let value = match supplied.resolve(&decl.name) {
            Some(v) => v.coerce(&decl.ty).map_err(|e| {
                Error::input(format!("task input {}: {}", decl.name, e))
            })?,
            None => match &decl.expr {
                Some(expr) => expr.eval(&env, &setup_lib)?.coerce(&decl.ty)?,
                None if decl.ty.is_optional() => Value::Null,
                None => {
                    return Err(Error::input(format!(
                        "missing required input {}.{}",
                        task.name, decl.name
                    )))
                }
            },
        };
        env = env.bind(decl.name.clone(), value);
    }

    let mut runtime_values = Vec::new();
    for (key, expr) in &task.runtime {
        runtime_values.push((key.clone(), expr.eval(&env, &setup_lib)?));
    }
    let attrs = runtime_attributes(&runtime_values, &executor.config)?;

    // Call cache lookup before any container work.
    let source_digest = cache::source_digest(document, &task.name);
    let input_digest = cache::input_digest(&env);
    let key = CallCache::key(&source_digest, &input_digest);
    if let Some(cached) = executor.cache.get(&key) {
        info!(target: "wdlrun::task", task = task.name.as_str(), "call cache hit");
        let mut outputs = Bindings::new();
        if let Some(map) = cached.as_object() {
            let mut entries: Vec<(String, Value)> = Vec::new();
            for decl in &task.outputs {
                let json = map.get(&decl.name).cloned().unwrap_or(serde_json::Value::Null);
                entries.push((decl.name.clone(), Value::from_json_typed(&decl.ty, json)?));
            }
            for (name, value) in entries.into_iter().rev() {
                outputs = outputs.bind(name, value);
            }
        }
        write_outputs_json(call_dir, task, &outputs)?;
        return Ok(outputs);
    }

    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let work_dir = if attempt == 1 {
            call_dir.join("work")
        } else {
            call_dir.join(format!("work{}", attempt))
        };
        match run_attempt(
            executor,
            task,
            document.version,
            &env,
            &attrs,
            call_dir,
            &work_dir,
            run_name,
            attempt,
        )
        .await
        {
            Ok(outputs) => {
                write_outputs_json(call_dir, task, &outputs)?;
                let mut referenced: Vec<String> = Vec::new();
                for binding in env.iter().chain(outputs.iter()) {
                    binding.value().collect_paths(&mut referenced);
                }
                executor
                    .cache
                    .put(&key, &outputs_to_json(task, &outputs), &referenced)?;
                return Ok(outputs);
            }
            Err(e @ Error::Interrupted) => return Err(e),
            Err(e) if attempt <= attrs.max_retries => {
                warn!(
                    target: "wdlrun::task",
                    task = task.name.as_str(),
                    attempt,
                    error = %e,
                    "task attempt failed; retrying"
                );
            }
            Err(e) => {
                let error_path = call_dir.join("error.json");
                fs::write(
                    &error_path,
                    serde_json::to_string_pretty(&e.to_error_json()).unwrap_or_default(),
                )?;
                return Err(e);
            }
        }
    }
}

fn outputs_to_json(task: &Task, outputs: &Bindings<Value>) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for decl in &task.outputs {
        if let Some(v) = outputs.resolve(&decl.name) {
            map.insert(decl.name.clone(), v.to_json());
        }
    }
    serde_json::Value::Object(map)
}

fn write_outputs_json(
    call_dir: &Path,
    task: &Task,
    outputs: &Bindings<Value>,
) -> Result<(), Error> {
    let path = call_dir.join("outputs.json");
    fs::write(
        &path,
        serde_json::to_string_pretty(&outputs_to_json(task, outputs)).unwrap_or_default(),
    )?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_attempt(
    executor: &TaskExecutor,
    task: &Task,
    version: LanguageVersion,
    env: &Bindings<Value>,
    attrs: &RuntimeAttributes,
    call_dir: &Path,
    work_dir: &Path,
    run_name: &str,
    attempt: u32,
) -> Result<Bindings<Value>, Error> {
    fs::create_dir_all(work_dir)?;
    let stdout_path = call_dir.join("stdout.txt");
    let stderr_path = call_dir.join("stderr.txt");

    // Staging: inputs outside the call directory get an in-container mount
    // point (or a copy under copy_input_files).
    let mut input_paths = Vec::new();
    for binding in env.iter() {
        binding.value().collect_paths(&mut input_paths);
    }
    let staged = plan_staging(&input_paths, call_dir);
    let copy_inputs = executor.config.task.copy_input_files;

    let mut mounts = vec![Mount {
        host: call_dir.to_path_buf(),
        container: call_dir.to_path_buf(),
        read_only: false,
    }];
    let mut rewrites: Vec<(String, String)> = Vec::new();
    if copy_inputs {
        let inputs_dir = work_dir.join("_inputs");
        for (i, s) in staged.iter().enumerate() {
            let slot = inputs_dir.join(i.to_string());
            fs::create_dir_all(&slot)?;
            let base = s
                .host
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "input".to_string());
            let dest = slot.join(&base);
            copy_recursive(&s.host, &dest)?;
            rewrites.push((
                s.host.display().to_string(),
                dest.display().to_string(),
            ));
        }
    } else {
        for s in &staged {
            mounts.push(Mount {
                host: s.host.clone(),
                container: s.container.clone(),
                read_only: true,
            });
            rewrites.push((
                s.host.display().to_string(),
                s.container.display().to_string(),
            ));
        }
    }

    // The command sees the container view of every staged path.
    let container_env = remap_env_paths(env, &rewrites)?;

    let guard = match &executor.config.task.placeholder_regex {
        Some(pattern) => Some(
            regex::Regex::new(pattern)
                .map_err(|e| Error::config(format!("invalid placeholder_regex: {}", e)))?,
        ),
        None => None,
    };
    let command_lib = StdLib::for_version(version).with_write_dir(call_dir.join("write_"));
    let script = render_command(&task.command, &container_env, &command_lib, guard.as_ref())?;
    let command_path = call_dir.join("command");
    fs::write(&command_path, &script)?;

    // Environment-variable inputs, plus configured pass-through entries.
    let mut container_vars: Vec<(String, String)> = Vec::new();
    for decl in task.inputs.iter().chain(task.postinputs.iter()) {
        if decl.env_export {
            if let Some(v) = container_env.resolve(&decl.name) {
                container_vars.push((decl.name.clone(), v.to_display_string()));
            }
        }
    }
    for entry in &executor.config.task.env {
        match entry.split_once('=') {
            Some((k, v)) => container_vars.push((k.to_string(), v.to_string())),
            None => {
                if let Ok(v) = std::env::var(entry) {
                    container_vars.push((entry.clone(), v));
                }
            }
        }
    }

    // Image first (pulls can be slow), admission second, container third.
    let image = executor.backend.prepare_image(&attrs.image).await?;
    let permit = executor.admission.acquire(attrs.cpu, attrs.memory).await;
    debug!(
        target: "wdlrun::task",
        task = task.name.as_str(),
        attempt,
        cpu = permit.cpu,
        memory = permit.memory,
        "admitted"
    );

    let shell_line = format!(
        "bash {} > {} 2> {}",
        shell_escape(&command_path.display().to_string()),
        shell_escape(&stdout_path.display().to_string()),
        shell_escape(&stderr_path.display().to_string()),
    );
    let spec = ContainerSpec {
        name: sanitize_name(&format!("wdlrun-{}-{}-{}", run_name, task.name, attempt)),
        image,
        workdir: work_dir.to_path_buf(),
        mounts,
        env: container_vars,
        command: vec!["/bin/bash".to_string(), "-c".to_string(), shell_line],
        cpu: permit.cpu,
        memory: permit.memory,
        privileged: attrs.privileged,
    };

    let handle = executor.backend.run(&spec).await?;
    let poll_interval = Duration::from_millis(executor.config.scheduler.poll_interval_ms.max(50));
    let mut cancel = executor.cancel.clone();

    let exit_code = loop {
        match executor.backend.poll(&handle).await? {
            ContainerStatus::Exited(code) => break code,
            ContainerStatus::Running => {
                if *cancel.borrow() {
                    let _ = executor.backend.kill(&handle).await;
                    let grace =
                        Duration::from_secs(executor.config.container.kill_grace_seconds);
                    let deadline = tokio::time::Instant::now() + grace;
                    loop {
                        if let ContainerStatus::Exited(_) = executor.backend.poll(&handle).await? {
                            break;
                        }
                        if tokio::time::Instant::now() >= deadline {
                            let _ = executor.backend.kill(&handle).await;
                            break;
                        }
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                    return Err(Error::Interrupted);
                }
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = cancel.changed() => {}
                }
            }
        }
    };
    drop(permit);

    if executor.config.task.verbose_stdout {
        if let Ok(text) = fs::read_to_string(&stdout_path) {
            for line in text.lines().take(32) {
                info!(target: "wdlrun::task", task = task.name.as_str(), line, "stdout");
            }
        }
    }

    if !attrs.accepted_codes.accepts(exit_code) {
        return Err(Error::TaskFailure {
            exit_status: exit_code,
            stderr_path: stderr_path.clone(),
            attempt,
        });
    }

    collect_outputs(task, version, env, call_dir, work_dir, &stdout_path, &stderr_path)
}

/// Evaluate output declarations against the post-execution filesystem.
#[allow(clippy::too_many_arguments)]
fn collect_outputs(
    task: &Task,
    version: LanguageVersion,
    env: &Bindings<Value>,
    call_dir: &Path,
    work_dir: &Path,
    stdout_path: &Path,
    stderr_path: &Path,
) -> Result<Bindings<Value>, Error> {
    let output_lib = StdLib::for_version(version)
        .with_path_map(Arc::new(WorkdirPathMap::new(work_dir.to_path_buf())))
        .with_write_dir(call_dir.join("write_"))
        .with_task_context(
            work_dir.to_path_buf(),
            stdout_path.to_path_buf(),
            stderr_path.to_path_buf(),
        );

    let mut out_env = env.clone();
    let mut outputs = Bindings::new();
    for decl in &task.outputs {
        let expr = decl.expr.as_ref().ok_or_else(|| {
            Error::input(format!("task output {} has no expression", decl.name))
        })?;
        let value = expr.eval(&out_env, &output_lib)?.coerce(&decl.ty)?;
        let validated = value.map_paths(&mut |p, _is_dir| {
            validate_output_path(p, work_dir, call_dir)
        })?;
        out_env = out_env.bind(decl.name.clone(), validated.clone());
        outputs = outputs.bind(decl.name.clone(), validated);
    }
    Ok(outputs)
}

/// Rewrite host paths in the environment to their container locations.
fn remap_env_paths(
    env: &Bindings<Value>,
    rewrites: &[(String, String)],
) -> Result<Bindings<Value>, Error> {
    let mut entries: Vec<(String, Value)> = Vec::new();
    for binding in env.iter() {
        let value = binding.value().map_paths(&mut |p, _| {
            for (host, container) in rewrites {
                if p == host {
                    return Ok(container.clone());
                }
                if let Some(rest) = p.strip_prefix(&format!("{}/", host)) {
                    return Ok(format!("{}/{}", container, rest));
                }
            }
            Ok(p.to_string())
        })?;
        entries.push((binding.name().to_string(), value));
    }
    let mut out = Bindings::new();
    for (name, value) in entries.into_iter().rev() {
        out = out.bind(name, value);
    }
    Ok(out)
}

fn copy_recursive(from: &Path, to: &Path) -> Result<(), Error> {
    let meta = fs::metadata(from)?;
    if meta.is_dir() {
        fs::create_dir_all(to)?;
        for entry in fs::read_dir(from)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &to.join(entry.file_name()))?;
        }
    } else {
        fs::copy(from, to)?;
    }
    Ok(())
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect()
}
