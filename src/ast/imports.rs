//! Import resolution.
//!
//! Documents are loaded through an [`ImportResolver`] capability so the
//! loader stays independent of where sources live. The default resolver
//! reads the local filesystem, with a deny-by-default policy for imports
//! that escape the main document's directory tree.

use crate::ast::typecheck::{check_document, CheckOptions};
use crate::ast::{Document, LanguageVersion};
use crate::error::{Error, SourceLoc};
use crate::eval::stdlib::StdLib;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Resolves an import URI against the importing document's location.
pub trait ImportResolver: Send + Sync {
    /// Returns the resolved absolute identity and the source text.
    fn resolve(&self, importer_abspath: &str, uri: &str) -> Result<(String, String), Error>;
}

/// Filesystem resolver. Relative URIs resolve against the importer's
/// directory first, then against each configured search path (`--path`),
/// in order.
pub struct FileImportResolver {
    /// Directory imports may not escape (unless `allow_outside`); search
    /// paths are additional permitted roots.
    root: PathBuf,
    allow_outside: bool,
    search_paths: Vec<PathBuf>,
}

impl FileImportResolver {
    pub fn new(root: impl Into<PathBuf>, allow_outside: bool) -> Self {
        Self {
            root: root.into(),
            allow_outside,
            search_paths: Vec::new(),
        }
    }

    /// Fallback directories tried when an importer-relative URI does not
    /// exist.
    pub fn with_search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.search_paths = paths;
        self
    }
}

impl ImportResolver for FileImportResolver {
    fn resolve(&self, importer_abspath: &str, uri: &str) -> Result<(String, String), Error> {
        if uri.contains("://") {
            return Err(Error::import(
                SourceLoc::unknown(),
                uri,
                "remote imports are not supported by the file resolver",
            ));
        }
        let base = Path::new(importer_abspath)
            .parent()
            .unwrap_or_else(|| Path::new("."));
        let mut candidates = vec![base.join(uri)];
        for dir in &self.search_paths {
            candidates.push(dir.join(uri));
        }
        let joined = candidates
            .iter()
            .find(|p| p.exists())
            .unwrap_or(&candidates[0])
            .clone();
        let resolved = joined.canonicalize().map_err(|e| {
            Error::import(
                SourceLoc::unknown(),
                uri,
                format!("cannot resolve {}: {}", joined.display(), e),
            )
        })?;
        if !self.allow_outside {
            let permitted = std::iter::once(&self.root)
                .chain(self.search_paths.iter())
                .any(|r| {
                    let canon = r.canonicalize().unwrap_or_else(|_| r.clone());
                    resolved.starts_with(&canon)
                });
            if !permitted {
                return Err(Error::import(
                    SourceLoc::unknown(),
                    uri,
                    format!(
                        "import {} escapes the source tree {} (enable import.allow_outside to permit)",
                        resolved.display(),
                        self.root.display()
                    ),
                ));
            }
        }
        let text = std::fs::read_to_string(&resolved).map_err(|e| {
            Error::import(
                SourceLoc::unknown(),
                uri,
                format!("cannot read {}: {}", resolved.display(), e),
            )
        })?;
        Ok((resolved.display().to_string(), text))
    }
}

/// Parse, resolve imports, and typecheck a document from source text.
pub fn load_document_source(
    source: &str,
    uri: &str,
    abspath: &str,
    resolver: &dyn ImportResolver,
    opts: &CheckOptions,
) -> Result<Document, Error> {
    let mut in_flight = HashSet::new();
    load_inner(source, uri, abspath, resolver, opts, &mut in_flight)
}

/// Load the main document from a local file path.
pub fn load_document_file(
    path: &Path,
    resolver: &dyn ImportResolver,
    opts: &CheckOptions,
) -> Result<Document, Error> {
    let abspath = path
        .canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string();
    let source = std::fs::read_to_string(path).map_err(|e| {
        Error::filesystem(
            format!("cannot read {}: {}", path.display(), e),
            Some(path.to_path_buf()),
        )
    })?;
    load_document_source(&source, &path.display().to_string(), &abspath, resolver, opts)
}

fn load_inner(
    source: &str,
    uri: &str,
    abspath: &str,
    resolver: &dyn ImportResolver,
    opts: &CheckOptions,
    in_flight: &mut HashSet<String>,
) -> Result<Document, Error> {
    if !in_flight.insert(abspath.to_string()) {
        return Err(Error::import(
            SourceLoc::unknown(),
            uri,
            "circular imports",
        ));
    }

    let mut doc = crate::syntax::parse_document(source, uri, abspath)?;

    for import in doc.imports.iter_mut() {
        let (imported_abspath, imported_source) = resolver
            .resolve(abspath, &import.uri)
            .map_err(|e| relocate_import(e, &import.loc))?;
        let imported = load_inner(
            &imported_source,
            &import.uri,
            &imported_abspath,
            resolver,
            opts,
            in_flight,
        )
        .map_err(|e| match e {
            already @ Error::Import { .. } => already,
            other => Error::import(import.loc.clone(), &import.uri, other.to_string()),
        })?;
        import.document = Some(Arc::new(imported));
    }

    in_flight.remove(abspath);

    let stdlib = StdLib::for_version(doc.version);
    check_document(&mut doc, &stdlib, opts)?;
    Ok(doc)
}

fn relocate_import(e: Error, loc: &SourceLoc) -> Error {
    match e {
        Error::Import { uri, message, .. } => Error::Import {
            loc: loc.clone(),
            uri,
            message,
        },
        other => other,
    }
}

/// The language version a loaded tree runs under: the main document's.
pub fn effective_version(doc: &Document) -> LanguageVersion {
    doc.version
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let p = dir.join(name);
        fs::write(&p, contents).unwrap();
        p
    }

    #[test]
    fn import_resolves_and_namespaces() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "lib.wdl",
            r#"version 1.1
            task greet {
                input { String who }
                command <<< echo "hi ~{who}" >>>
                output { Int n = 1 }
            }"#,
        );
        let main = write(
            tmp.path(),
            "main.wdl",
            r#"version 1.1
            import "lib.wdl" as lib
            workflow wf {
                call lib.greet { input: who = "x" }
                output { Int n = greet.n }
            }"#,
        );
        let resolver = FileImportResolver::new(tmp.path(), false);
        let doc = load_document_file(&main, &resolver, &CheckOptions::default()).unwrap();
        assert_eq!(doc.imports.len(), 1);
        assert!(doc.imports[0].document.is_some());
        assert!(doc.resolve_callee("lib.greet").is_some());
    }

    #[test]
    fn import_cycle_detected() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "a.wdl",
            "version 1.1\nimport \"b.wdl\" as b\n",
        );
        let main = write(
            tmp.path(),
            "b.wdl",
            "version 1.1\nimport \"a.wdl\" as a\n",
        );
        let resolver = FileImportResolver::new(tmp.path(), false);
        let err = load_document_file(&main, &resolver, &CheckOptions::default()).unwrap_err();
        assert_eq!(err.kind(), "ImportError");
        assert!(err.to_string().contains("circular"));
    }

    #[test]
    fn outside_import_denied() {
        let tmp = tempfile::tempdir().unwrap();
        let inner = tmp.path().join("project");
        fs::create_dir(&inner).unwrap();
        write(tmp.path(), "outside.wdl", "version 1.1\n");
        let main = write(
            &inner,
            "main.wdl",
            "version 1.1\nimport \"../outside.wdl\" as o\n",
        );
        let resolver = FileImportResolver::new(&inner, false);
        let err = load_document_file(&main, &resolver, &CheckOptions::default()).unwrap_err();
        assert_eq!(err.kind(), "ImportError");

        let permissive = FileImportResolver::new(&inner, true);
        assert!(load_document_file(&main, &permissive, &CheckOptions::default()).is_ok());
    }

    #[test]
    fn search_paths_resolve_missing_relative_imports() {
        let tmp = tempfile::tempdir().unwrap();
        let project = tmp.path().join("project");
        let library = tmp.path().join("library");
        fs::create_dir(&project).unwrap();
        fs::create_dir(&library).unwrap();
        write(
            &library,
            "tools.wdl",
            r#"version 1.1
            task probe {
                command <<< echo hi >>>
                output { Int n = 1 }
            }"#,
        );
        let main = write(
            &project,
            "main.wdl",
            r#"version 1.1
            import "tools.wdl" as tools
            workflow wf {
                call tools.probe
            }"#,
        );

        // Without the search path the import cannot resolve.
        let bare = FileImportResolver::new(&project, false);
        assert!(load_document_file(&main, &bare, &CheckOptions::default()).is_err());

        // With it, the fallback directory is consulted and also counts as a
        // permitted root for the outside-tree check.
        let searched = FileImportResolver::new(&project, false)
            .with_search_paths(vec![library.clone()]);
        let doc = load_document_file(&main, &searched, &CheckOptions::default()).unwrap();
        assert!(doc.imports[0].document.is_some());

        // The importer-relative location still wins when both exist.
        write(
            &project,
            "tools.wdl",
            r#"version 1.1
            task probe {
                command <<< echo local >>>
                output { Int n = 2 }
            }"#,
        );
        let doc = load_document_file(&main, &searched, &CheckOptions::default()).unwrap();
        let imported = doc.imports[0].document.as_deref().unwrap();
        assert!(imported.abspath.contains("project"));
    }

    #[test]
    fn missing_import_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let main = write(
            tmp.path(),
            "main.wdl",
            "version 1.1\nimport \"nope.wdl\" as n\n",
        );
        let resolver = FileImportResolver::new(tmp.path(), false);
        let err = load_document_file(&main, &resolver, &CheckOptions::default()).unwrap_err();
        assert_eq!(err.kind(), "ImportError");
    }

    #[test]
    fn imported_struct_alias_installed() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "types.wdl",
            r#"version 1.1
            struct Sample { String name }
            "#,
        );
        let main = write(
            tmp.path(),
            "main.wdl",
            r#"version 1.1
            import "types.wdl" alias Sample as Specimen
            workflow wf {
                input { Specimen s }
                output { String n = s.name }
            }"#,
        );
        let resolver = FileImportResolver::new(tmp.path(), false);
        let doc = load_document_file(&main, &resolver, &CheckOptions::default()).unwrap();
        assert!(doc.struct_typedefs.iter().any(|s| s.name == "Specimen"));
    }
}
