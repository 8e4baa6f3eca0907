//! The inter-run call cache.
//!
//! Successful task outputs are stored as JSON files keyed by
//! `blake3(source_digest || input_digest)`. The source digest covers the
//! normalized WDL text (comments stripped, whitespace collapsed outside
//! strings) of the defining document plus every transitively imported
//! document; the input digest covers a canonical encoding of the inputs
//! with `File`/`Directory` handles replaced by their `(mtime, size)` stamp.
//! An entry is invalidated when any recorded local file changed since the
//! entry was written. A cache miss is ordinary control flow, not an error.

use crate::ast::Document;
use crate::env::Bindings;
use crate::error::Error;
use crate::run::config::CallCacheConfig;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Stamp of a local file used for invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStamp {
    pub mtime_nanos: u128,
    pub size: u64,
}

pub fn stamp(path: &Path) -> Option<FileStamp> {
    let meta = fs::metadata(path).ok()?;
    let mtime = meta
        .modified()
        .ok()?
        .duration_since(std::time::UNIX_EPOCH)
        .ok()?;
    Some(FileStamp {
        mtime_nanos: mtime.as_nanos(),
        size: meta.len(),
    })
}

/// Normalize WDL source for digesting: drop `#` comments, collapse
/// whitespace runs to one space outside string literals.
pub fn normalize_source(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut in_string: Option<char> = None;
    let mut pending_space = false;
    while let Some(c) = chars.next() {
        match in_string {
            Some(quote) => {
                out.push(c);
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                } else if c == quote {
                    in_string = None;
                }
            }
            None => match c {
                '#' => {
                    for next in chars.by_ref() {
                        if next == '\n' {
                            break;
                        }
                    }
                    pending_space = true;
                }
                c if c.is_whitespace() => pending_space = true,
                c => {
                    if pending_space && !out.is_empty() {
                        out.push(' ');
                    }
                    pending_space = false;
                    if c == '"' || c == '\'' {
                        in_string = Some(c);
                    }
                    out.push(c);
                }
            },
        }
    }
    out
}

/// Digest of the WDL source that defines `callee`, covering every
/// transitively imported document.
pub fn source_digest(doc: &Document, callee: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(callee.as_bytes());
    hasher.update(&[0]);
    let mut sources: Vec<(String, String)> = Vec::new();
    collect_sources(doc, &mut sources);
    sources.sort();
    for (uri, text) in sources {
        hasher.update(uri.as_bytes());
        hasher.update(&[0]);
        hasher.update(normalize_source(&text).as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize().to_hex().to_string()
}

fn collect_sources(doc: &Document, out: &mut Vec<(String, String)>) {
    if out.iter().any(|(uri, _)| *uri == doc.abspath) {
        return;
    }
    out.push((doc.abspath.clone(), doc.source_text.clone()));
    for import in &doc.imports {
        if let Some(imported) = import.document.as_deref() {
            collect_sources(imported, out);
        }
    }
}

/// Digest of the call's inputs under a canonical encoding.
pub fn input_digest(inputs: &Bindings<Value>) -> String {
    let mut entries: BTreeMap<String, JsonValue> = BTreeMap::new();
    for binding in inputs.iter() {
        entries.insert(
            binding.name().to_string(),
            canonical_value(binding.value()),
        );
    }
    let canonical = serde_json::to_string(&entries).unwrap_or_default();
    blake3::hash(canonical.as_bytes()).to_hex().to_string()
}

/// File handles hash as their stamp rather than their (possibly relocated)
/// path contents.
fn canonical_value(value: &Value) -> JsonValue {
    match value {
        Value::File { path, .. } | Value::Directory { path, .. } => match stamp(Path::new(path)) {
            Some(s) => json!({
                "@file": path,
                "mtime": s.mtime_nanos.to_string(),
                "size": s.size,
            }),
            None => json!({ "@file": path }),
        },
        Value::Array { items, .. } => {
            JsonValue::Array(items.iter().map(canonical_value).collect())
        }
        Value::Map { entries, .. } => {
            let mut obj = serde_json::Map::new();
            for (k, v) in entries {
                obj.insert(k.to_display_string(), canonical_value(v));
            }
            JsonValue::Object(obj)
        }
        Value::Pair { left, right, .. } => json!({
            "left": canonical_value(left),
            "right": canonical_value(right),
        }),
        Value::Struct { members, .. } => {
            let mut obj = serde_json::Map::new();
            for (k, v) in members {
                obj.insert(k.clone(), canonical_value(v));
            }
            JsonValue::Object(obj)
        }
        other => other.to_json(),
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    outputs: JsonValue,
    /// Local files the entry depends on, with their stamps at write time.
    files: BTreeMap<String, FileStamp>,
}

/// The content-addressed store.
pub struct CallCache {
    get_enabled: bool,
    put_enabled: bool,
    dir: PathBuf,
}

impl CallCache {
    pub fn new(config: &CallCacheConfig) -> Self {
        Self {
            get_enabled: config.get,
            put_enabled: config.put,
            dir: config.dir.clone(),
        }
    }

    /// The combined cache key.
    pub fn key(source_digest: &str, input_digest: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(source_digest.as_bytes());
        hasher.update(input_digest.as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Look up cached outputs; verifies no recorded file changed. Returns
    /// `None` on any miss (including a held write lock).
    pub fn get(&self, key: &str) -> Option<JsonValue> {
        if !self.get_enabled {
            return None;
        }
        let path = self.entry_path(key);
        let file = fs::File::open(&path).ok()?;
        // A held exclusive lock means a writer is mid-flight.
        match file.try_lock_shared() {
            Ok(()) => {
                let _ = file.unlock();
            }
            Err(_) => return None,
        }
        let text = fs::read_to_string(&path).ok()?;
        let entry: CacheEntry = serde_json::from_str(&text).ok()?;
        for (recorded_path, recorded_stamp) in &entry.files {
            match stamp(Path::new(recorded_path)) {
                Some(current) if current == *recorded_stamp => {}
                _ => {
                    info!(
                        target: "wdlrun::cache",
                        key,
                        file = recorded_path.as_str(),
                        "cache entry invalidated by modified file"
                    );
                    let _ = fs::remove_file(&path);
                    return None;
                }
            }
        }
        debug!(target: "wdlrun::cache", key, "cache hit");
        Some(entry.outputs)
    }

    /// Store outputs, recording stamps for every referenced local file.
    pub fn put(
        &self,
        key: &str,
        outputs: &JsonValue,
        referenced_paths: &[String],
    ) -> Result<(), Error> {
        if !self.put_enabled {
            return Ok(());
        }
        fs::create_dir_all(&self.dir)?;
        let mut files = BTreeMap::new();
        for p in referenced_paths {
            if let Some(s) = stamp(Path::new(p)) {
                files.insert(p.clone(), s);
            }
        }
        let entry = CacheEntry {
            outputs: outputs.clone(),
            files,
        };
        let path = self.entry_path(key);
        let file = fs::File::create(&path)?;
        file.lock()
            .map_err(|e| Error::runtime(format!("cannot lock cache entry: {}", e)))?;
        serde_json::to_writer_pretty(&file, &entry)
            .map_err(|e| Error::runtime(format!("cannot write cache entry: {}", e)))?;
        file.unlock()
            .map_err(|e| Error::runtime(format!("cannot unlock cache entry: {}", e)))?;
        debug!(target: "wdlrun::cache", key, "cache entry written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type;

    #[test]
    fn normalization_strips_comments_and_whitespace() {
        let source = "task t {   # trailing comment\n\n  command {\n    echo \"a  b # not a comment\"\n  }\n}";
        let normalized = normalize_source(source);
        assert_eq!(
            normalized,
            "task t { command { echo \"a  b # not a comment\" } }"
        );
    }

    #[test]
    fn normalization_is_stable_fixture() {
        // Conformance fixture: whitespace and comment layout must not
        // affect the digest.
        let a = "version 1.1\ntask t {\n  command { echo hi }\n}";
        let b = "version 1.1   # v\ntask t { command { echo hi } }";
        assert_eq!(normalize_source(a), normalize_source(b));
    }

    #[test]
    fn input_digest_is_order_insensitive() {
        let a = Bindings::new()
            .bind("x".to_string(), Value::int(1))
            .bind("y".to_string(), Value::string("s"));
        let b = Bindings::new()
            .bind("y".to_string(), Value::string("s"))
            .bind("x".to_string(), Value::int(1));
        assert_eq!(input_digest(&a), input_digest(&b));
    }

    #[test]
    fn input_digest_differs_on_value_change() {
        let a = Bindings::new().bind("x".to_string(), Value::int(1));
        let b = Bindings::new().bind("x".to_string(), Value::int(2));
        assert_ne!(input_digest(&a), input_digest(&b));
    }

    #[test]
    fn file_inputs_hash_their_stamp() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("data.txt");
        fs::write(&path, "one").unwrap();
        let file_value = Value::file(path.display().to_string()).unwrap();
        let inputs = Bindings::new().bind("f".to_string(), file_value);
        let before = input_digest(&inputs);

        // Rewriting with different content changes size, hence the digest.
        fs::write(&path, "different content").unwrap();
        let after = input_digest(&inputs);
        assert_ne!(before, after);
    }

    fn cache(dir: &Path) -> CallCache {
        CallCache::new(&CallCacheConfig {
            get: true,
            put: true,
            dir: dir.to_path_buf(),
        })
    }

    #[test]
    fn round_trip_hit() {
        let tmp = tempfile::tempdir().unwrap();
        let c = cache(tmp.path());
        let outputs = json!({"t.out": 42});
        c.put("k1", &outputs, &[]).unwrap();
        assert_eq!(c.get("k1"), Some(outputs));
        assert_eq!(c.get("k2"), None);
    }

    #[test]
    fn disabled_flags_are_honored() {
        let tmp = tempfile::tempdir().unwrap();
        let disabled = CallCache::new(&CallCacheConfig {
            get: false,
            put: false,
            dir: tmp.path().to_path_buf(),
        });
        disabled.put("k", &json!({}), &[]).unwrap();
        assert!(fs::read_dir(tmp.path()).map(|d| d.count() == 0).unwrap_or(true));

        let writer = cache(tmp.path());
        writer.put("k", &json!({"a": 1}), &[]).unwrap();
        assert_eq!(disabled.get("k"), None);
    }

    #[test]
    fn modified_file_invalidates_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let data = tmp.path().join("input.txt");
        fs::write(&data, "v1").unwrap();
        let c = cache(tmp.path());
        c.put(
            "k",
            &json!({"out": "x"}),
            &[data.display().to_string()],
        )
        .unwrap();
        assert!(c.get("k").is_some());

        fs::write(&data, "v2 with longer body").unwrap();
        assert_eq!(c.get("k"), None, "stale entry must miss");
        // The invalid entry is also removed.
        assert!(!tmp.path().join("k.json").exists());
    }

    #[test]
    fn combined_key_depends_on_both_digests() {
        let k1 = CallCache::key("s1", "i1");
        let k2 = CallCache::key("s1", "i2");
        let k3 = CallCache::key("s2", "i1");
        assert_ne!(k1, k2);
        assert_ne!(k1, k3);
    }
}
