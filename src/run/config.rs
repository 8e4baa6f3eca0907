//! Runner configuration.
//!
//! A hierarchical tree of dotted sections with three overlay layers:
//! installed defaults, then the first-found JSON config file, then
//! `WDLRUN__SECTION__KEY` environment variables (JSON accepted for
//! structured values), then whatever the CLI sets directly on the struct.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub container: ContainerConfig,
    pub task: TaskConfig,
    pub call_cache: CallCacheConfig,
    pub download_cache: DownloadCacheConfig,
    pub file_io: FileIoConfig,
    pub import: ImportConfig,
    pub type_check: TypeCheckConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Total CPUs running tasks may reserve; `None` means all host CPUs.
    pub cpu_budget: Option<u32>,
    /// Total memory running tasks may reserve, bytes; `None` means all host
    /// memory.
    pub memory_budget: Option<u64>,
    /// Allow running sibling tasks to finish after a failure instead of
    /// draining immediately.
    pub fail_slow: bool,
    /// Container poll interval, milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cpu_budget: None,
            memory_budget: None,
            fail_slow: false,
            poll_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// One of `docker`, `podman`, `singularity`, `udocker`.
    pub backend: String,
    /// Image used when a task declares no `runtime.docker`.
    pub default_image: String,
    /// Seconds to wait between SIGTERM and SIGKILL on cancellation.
    pub kill_grace_seconds: u64,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            backend: "docker".to_string(),
            default_image: "ubuntu:22.04".to_string(),
            kill_grace_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Copy input files into the work directory instead of read-only mounts.
    pub copy_input_files: bool,
    /// Guard regex every interpolated placeholder value must match.
    pub placeholder_regex: Option<String>,
    /// Echo stdout lines to the console.
    pub verbose_stdout: bool,
    /// Extra container environment entries: `K=V`, or bare `K` to pass the
    /// host's value through.
    pub env: Vec<String>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            copy_input_files: false,
            placeholder_regex: None,
            verbose_stdout: false,
            env: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallCacheConfig {
    /// Read cached outputs.
    pub get: bool,
    /// Write new outputs to the cache.
    pub put: bool,
    pub dir: PathBuf,
}

impl Default for CallCacheConfig {
    fn default() -> Self {
        Self {
            get: false,
            put: false,
            dir: default_cache_root().join("calls"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadCacheConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    /// URI patterns eligible for caching (all, when empty).
    pub allow_patterns: Vec<String>,
    pub deny_patterns: Vec<String>,
}

impl Default for DownloadCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: default_cache_root().join("downloads"),
            allow_patterns: Vec::new(),
            deny_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileIoConfig {
    /// Hardlink instead of symlink when building the `out/` tree.
    pub output_hardlinks: bool,
}

impl Default for FileIoConfig {
    fn default() -> Self {
        Self {
            output_hardlinks: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Permit imports outside the main document's directory tree.
    pub allow_outside: bool,
    /// Fallback directories for resolving imports (`--path`); each is also
    /// a permitted root.
    pub search_paths: Vec<PathBuf>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            allow_outside: false,
            search_paths: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeCheckConfig {
    /// Relax the optional quantifier check (`T? -> T`).
    pub relax_quant: bool,
}

impl Default for TypeCheckConfig {
    fn default() -> Self {
        Self { relax_quant: false }
    }
}

fn default_cache_root() -> PathBuf {
    std::env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".cache")))
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("wdlrun")
}

/// Environment variable prefix for overlays.
const ENV_PREFIX: &str = "WDLRUN__";

impl Config {
    /// Load with the standard overlay order: defaults, then `file` (or the
    /// first-found user config), then environment variables.
    pub fn load(file: Option<&Path>) -> Result<Self, Error> {
        let mut tree = serde_json::to_value(Config::default())
            .map_err(|e| Error::config(format!("internal default serialization: {}", e)))?;

        let file = file.map(Path::to_path_buf).or_else(user_config_file);
        if let Some(path) = file {
            if path.exists() {
                let text = std::fs::read_to_string(&path).map_err(|e| {
                    Error::config(format!("cannot read config {}: {}", path.display(), e))
                })?;
                let overlay: JsonValue = serde_json::from_str(&text).map_err(|e| {
                    Error::config(format!("malformed config {}: {}", path.display(), e))
                })?;
                merge(&mut tree, overlay);
            }
        }

        for (key, value) in std::env::vars() {
            if let Some(rest) = key.strip_prefix(ENV_PREFIX) {
                let mut parts = rest.splitn(2, "__");
                let (section, entry) = match (parts.next(), parts.next()) {
                    (Some(s), Some(k)) if !s.is_empty() && !k.is_empty() => (s, k),
                    _ => continue,
                };
                let section = section.to_ascii_lowercase();
                let entry = entry.to_ascii_lowercase();
                // JSON values are accepted for structured entries; anything
                // unparseable is a plain string.
                let parsed: JsonValue = serde_json::from_str(&value)
                    .unwrap_or(JsonValue::String(value.clone()));
                if let Some(obj) = tree.get_mut(&section).and_then(JsonValue::as_object_mut) {
                    obj.insert(entry, parsed);
                }
            }
        }

        serde_json::from_value(tree)
            .map_err(|e| Error::config(format!("invalid configuration: {}", e)))
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), Error> {
        match self.container.backend.as_str() {
            "docker" | "docker_swarm" | "podman" | "singularity" | "udocker" => {}
            other => {
                return Err(Error::config(format!(
                    "unsupported container backend: {}",
                    other
                )))
            }
        }
        if let Some(pattern) = &self.task.placeholder_regex {
            regex::Regex::new(pattern)
                .map_err(|e| Error::config(format!("invalid placeholder_regex: {}", e)))?;
        }
        if self.scheduler.cpu_budget == Some(0) {
            return Err(Error::config("scheduler.cpu_budget must be positive"));
        }
        Ok(())
    }
}

fn user_config_file() -> Option<PathBuf> {
    let candidates = [
        std::env::var_os("XDG_CONFIG_HOME")
            .map(|d| PathBuf::from(d).join("wdlrun/config.json")),
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config/wdlrun/config.json")),
    ];
    candidates.into_iter().flatten().find(|p| p.exists())
}

/// Deep-merge `overlay` into `base` (objects merge; anything else replaces).
fn merge(base: &mut JsonValue, overlay: JsonValue) {
    match (base, overlay) {
        (JsonValue::Object(b), JsonValue::Object(o)) => {
            for (k, v) in o {
                match b.get_mut(&k) {
                    Some(slot) => merge(slot, v),
                    None => {
                        b.insert(k, v);
                    }
                }
            }
        }
        (slot, v) => *slot = v,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = Config::default();
        assert_eq!(c.container.backend, "docker");
        assert!(!c.call_cache.get);
        assert!(!c.scheduler.fail_slow);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn file_overlay_merges_deeply() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"container": {"backend": "podman"}, "call_cache": {"get": true}}"#,
        )
        .unwrap();
        let c = Config::load(Some(&path)).unwrap();
        assert_eq!(c.container.backend, "podman");
        assert!(c.call_cache.get);
        // Untouched defaults survive the overlay.
        assert_eq!(c.container.kill_grace_seconds, 10);
    }

    #[test]
    fn malformed_file_is_configuration_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, "{nope").unwrap();
        let err = Config::load(Some(&path)).unwrap_err();
        assert_eq!(err.kind(), "ConfigurationError");
    }

    #[test]
    fn unsupported_backend_rejected() {
        let mut c = Config::default();
        c.container.backend = "hyperviz".to_string();
        assert_eq!(c.validate().unwrap_err().kind(), "ConfigurationError");
    }

    #[test]
    fn bad_placeholder_regex_rejected() {
        let mut c = Config::default();
        c.task.placeholder_regex = Some("(".to_string());
        assert!(c.validate().is_err());
    }

    #[test]
    fn merge_replaces_scalars() {
        let mut base = serde_json::json!({"a": {"b": 1, "c": 2}});
        merge(&mut base, serde_json::json!({"a": {"b": 9}}));
        assert_eq!(base["a"]["b"], 9);
        assert_eq!(base["a"]["c"], 2);
    }
}
