//! URI input download orchestration.
//!
//! `File`/`Directory` inputs whose values carry a URI scheme are
//! materialized before the workflow starts by synthesizing a download task
//! per URI and running it through the ordinary task runtime with a
//! scheme-specific helper image. Downloads may be shared across runs via
//! the download cache, keyed by URI alone; cached entries are held under a
//! shared file lock while in use so an external eviction tool (taking
//! exclusive locks) cannot pull them out from under a live run.

use crate::ast::{Decl, Document, LanguageVersion, StringPart, Task};
use crate::env::Bindings;
use crate::error::{Error, SourceLoc};
use crate::run::config::DownloadCacheConfig;
use crate::run::task::{run_task, TaskExecutor};
use crate::types::Type;
use crate::value::Value;
use indexmap::IndexMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;
use url::Url;

const SCHEMES: &[&str] = &["http", "https", "ftp", "s3", "gs"];

/// Whether a `File`/`Directory` value is URI-addressed.
pub fn is_uri(value: &str) -> bool {
    if !value.contains("://") {
        return false;
    }
    match Url::parse(value) {
        Ok(url) => SCHEMES.contains(&url.scheme()),
        Err(_) => false,
    }
}

/// The helper image and fetch command for a scheme.
fn helper(url: &Url, filename: &str) -> Result<(String, String), Error> {
    let fetch = match url.scheme() {
        "http" | "https" | "ftp" => (
            "docker.io/curlimages/curl:8.7.1".to_string(),
            format!("curl -fsSL --retry 3 -o '{}' '{}'", filename, url),
        ),
        "s3" => (
            "docker.io/amazon/aws-cli:2.15.30".to_string(),
            format!("aws s3 cp '{}' '{}'", url, filename),
        ),
        "gs" => (
            "gcr.io/google.com/cloudsdktool/google-cloud-cli:slim".to_string(),
            format!("gsutil cp '{}' '{}'", url, filename),
        ),
        other => {
            return Err(Error::input(format!(
                "unsupported download scheme {}://",
                other
            )))
        }
    };
    Ok(fetch)
}

fn uri_filename(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut s| s.next_back())
        .filter(|s| !s.is_empty())
        .unwrap_or("download")
        .to_string()
}

/// Synthesize the download task for one URI.
pub fn downloader_task(uri: &str) -> Result<(Task, Document), Error> {
    let url =
        Url::parse(uri).map_err(|e| Error::input(format!("malformed URI {}: {}", uri, e)))?;
    let filename = uri_filename(&url);
    let (image, command) = helper(&url, &filename)?;

    let loc = SourceLoc::unknown();
    let mut runtime = IndexMap::new();
    runtime.insert(
        "docker".to_string(),
        crate::ast::Expr::StringLit {
            loc: loc.clone(),
            parts: vec![StringPart::Text(image)],
            ty: None,
        },
    );
    let task = Task {
        loc: loc.clone(),
        name: "download".to_string(),
        inputs: vec![],
        postinputs: vec![],
        command: vec![StringPart::Text(command)],
        outputs: vec![Decl::new(
            loc.clone(),
            "file",
            Type::file(false),
            Some(crate::ast::Expr::StringLit {
                loc: loc.clone(),
                parts: vec![StringPart::Text(filename)],
                ty: None,
            }),
        )],
        runtime,
        meta: IndexMap::new(),
        parameter_meta: IndexMap::new(),
        hints: IndexMap::new(),
    };
    let document = Document {
        loc: loc.clone(),
        version: LanguageVersion::V1_1,
        declared_version: Some("1.1".to_string()),
        uri: format!("download:{}", uri),
        abspath: format!("download:{}", uri),
        source_text: format!("download {}", uri),
        imports: vec![],
        struct_typedefs: vec![],
        tasks: vec![],
        workflow: None,
    };
    Ok((task, document))
}

/// Cross-run download cache; holds shared locks on entries in use.
pub struct DownloadCache {
    config: DownloadCacheConfig,
    held_locks: Mutex<Vec<fs::File>>,
}

impl DownloadCache {
    pub fn new(config: DownloadCacheConfig) -> Self {
        Self {
            config,
            held_locks: Mutex::new(Vec::new()),
        }
    }

    /// Whether this URI participates in the cache.
    pub fn eligible(&self, uri: &str) -> bool {
        if !self.config.enabled {
            return false;
        }
        let matches = |patterns: &[String]| {
            patterns.iter().any(|p| pattern_matches(p, uri))
        };
        if matches(&self.config.deny_patterns) {
            return false;
        }
        self.config.allow_patterns.is_empty() || matches(&self.config.allow_patterns)
    }

    fn entry_dir(&self, uri: &str) -> PathBuf {
        self.config
            .dir
            .join(blake3::hash(uri.as_bytes()).to_hex().to_string())
    }

    /// Look up a cached download; takes a shared lock held for the run's
    /// lifetime on hit.
    pub fn get(&self, uri: &str) -> Option<PathBuf> {
        if !self.eligible(uri) {
            return None;
        }
        let dir = self.entry_dir(uri);
        let lock_path = dir.join(".lock");
        let lock = fs::File::open(&lock_path).ok()?;
        lock.try_lock_shared().ok()?;
        let entry = fs::read_dir(&dir)
            .ok()?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .find(|p| p.file_name().map(|n| n != ".lock").unwrap_or(false))?;
        self.held_locks.lock().ok()?.push(lock);
        info!(target: "wdlrun::download", uri, "download cache hit");
        Some(entry)
    }

    /// Move a fresh download into the cache, returning its cached path.
    pub fn put(&self, uri: &str, downloaded: &Path) -> Result<PathBuf, Error> {
        if !self.eligible(uri) {
            return Ok(downloaded.to_path_buf());
        }
        let dir = self.entry_dir(uri);
        fs::create_dir_all(&dir)?;
        let lock_path = dir.join(".lock");
        let lock = fs::File::create(&lock_path)?;
        lock.lock()
            .map_err(|e| Error::runtime(format!("cannot lock download cache entry: {}", e)))?;
        let dest = dir.join(
            downloaded
                .file_name()
                .ok_or_else(|| Error::runtime("downloaded file has no name"))?,
        );
        if fs::rename(downloaded, &dest).is_err() {
            fs::copy(downloaded, &dest)?;
        }
        lock.unlock()
            .map_err(|e| Error::runtime(format!("cannot unlock download cache entry: {}", e)))?;
        // Downgrade to the shared in-use lock.
        let shared = fs::File::open(&lock_path)?;
        let _ = shared.try_lock_shared();
        if let Ok(mut held) = self.held_locks.lock() {
            held.push(shared);
        }
        Ok(dest)
    }
}

/// `*`-wildcard URI pattern match.
fn pattern_matches(pattern: &str, uri: &str) -> bool {
    let mut regex = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => regex.push_str(".*"),
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');
    regex::Regex::new(&regex)
        .map(|r| r.is_match(uri))
        .unwrap_or(false)
}

/// Materialize every URI-valued `File`/`Directory` in the inputs, running
/// download tasks through the ordinary task runtime.
pub async fn localize_inputs(
    executor: &TaskExecutor,
    cache: &DownloadCache,
    inputs: &Bindings<Value>,
    run_dir: &Path,
) -> Result<Bindings<Value>, Error> {
    // Collect distinct URIs first (map_paths is synchronous).
    let mut uris = Vec::new();
    for binding in inputs.iter() {
        let mut paths = Vec::new();
        binding.value().collect_paths(&mut paths);
        for p in paths {
            if is_uri(&p) && !uris.contains(&p) {
                uris.push(p);
            }
        }
    }

    let mut resolved: Vec<(String, String)> = Vec::new();
    for (index, uri) in uris.iter().enumerate() {
        let local = fetch_one(executor, cache, uri, run_dir, index).await?;
        resolved.push((uri.clone(), local.display().to_string()));
    }

    let mut out = Bindings::new();
    let mut entries: Vec<(String, Value)> = Vec::new();
    for binding in inputs.iter() {
        let value = binding.value().map_paths(&mut |p, _| {
            Ok(resolved
                .iter()
                .find(|(uri, _)| uri == p)
                .map(|(_, local)| local.clone())
                .unwrap_or_else(|| p.to_string()))
        })?;
        entries.push((binding.name().to_string(), value));
    }
    for (name, value) in entries.into_iter().rev() {
        out = out.bind(name, value);
    }
    Ok(out)
}

async fn fetch_one(
    executor: &TaskExecutor,
    cache: &DownloadCache,
    uri: &str,
    run_dir: &Path,
    index: usize,
) -> Result<PathBuf, Error> {
    if let Some(cached) = cache.get(uri) {
        return Ok(cached);
    }
    info!(target: "wdlrun::download", uri, "downloading");
    let (task, document) = downloader_task(uri)?;
    let call_dir = run_dir.join("download").join(index.to_string());
    let outputs = run_task(
        executor,
        &task,
        &document,
        &Bindings::new(),
        &call_dir,
        &format!("download-{}", index),
    )
    .await?;
    let file = outputs
        .resolve("file")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::runtime(format!("download of {} produced no file", uri)))?;
    cache.put(uri, Path::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_detection() {
        assert!(is_uri("https://example.com/ref.fa"));
        assert!(is_uri("s3://bucket/key.bam"));
        assert!(is_uri("gs://bucket/obj"));
        assert!(is_uri("ftp://host/file"));
        assert!(!is_uri("/local/path.txt"));
        assert!(!is_uri("relative/path.txt"));
        assert!(!is_uri("mailto:x@example.com"));
    }

    #[test]
    fn downloader_task_shapes() {
        let (task, _doc) = downloader_task("https://example.com/data/ref.fa").unwrap();
        assert_eq!(task.outputs.len(), 1);
        let command: String = task
            .command
            .iter()
            .map(|p| match p {
                StringPart::Text(t) => t.clone(),
                _ => String::new(),
            })
            .collect();
        assert!(command.contains("curl"));
        assert!(command.contains("ref.fa"));

        let (task, _) = downloader_task("s3://bucket/key.bam").unwrap();
        let command: String = task
            .command
            .iter()
            .map(|p| match p {
                StringPart::Text(t) => t.clone(),
                _ => String::new(),
            })
            .collect();
        assert!(command.contains("aws s3 cp"));
    }

    #[test]
    fn cache_eligibility_patterns() {
        let cache = DownloadCache::new(DownloadCacheConfig {
            enabled: true,
            dir: PathBuf::from("/tmp/x"),
            allow_patterns: vec!["https://good.example/*".to_string()],
            deny_patterns: vec!["*secret*".to_string()],
        });
        assert!(cache.eligible("https://good.example/ref.fa"));
        assert!(!cache.eligible("https://other.example/ref.fa"));
        assert!(!cache.eligible("https://good.example/secret/key"));

        let disabled = DownloadCache::new(DownloadCacheConfig {
            enabled: false,
            ..Default::default()
        });
        assert!(!disabled.eligible("https://good.example/ref.fa"));
    }

    #[test]
    fn cache_put_then_get() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = DownloadCache::new(DownloadCacheConfig {
            enabled: true,
            dir: tmp.path().join("cache"),
            allow_patterns: vec![],
            deny_patterns: vec![],
        });
        let downloaded = tmp.path().join("ref.fa");
        fs::write(&downloaded, "ACGT").unwrap();
        let cached = cache.put("https://example.com/ref.fa", &downloaded).unwrap();
        assert!(cached.exists());

        let hit = cache.get("https://example.com/ref.fa").unwrap();
        assert_eq!(hit, cached);
        assert_eq!(fs::read_to_string(hit).unwrap(), "ACGT");
        assert!(cache.get("https://example.com/other.fa").is_none());
    }

    #[test]
    fn filename_extraction() {
        let url = Url::parse("https://h/a/b/c.txt?x=1").unwrap();
        assert_eq!(uri_filename(&url), "c.txt");
        let url = Url::parse("https://h/").unwrap();
        assert_eq!(uri_filename(&url), "download");
    }
}
