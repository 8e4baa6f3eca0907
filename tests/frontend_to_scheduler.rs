//! End-to-end frontend and scheduler tests: parse, typecheck, graph
//! lowering, and state-machine execution, with task completions injected in
//! place of real containers.

use std::collections::HashMap;
use std::sync::Arc;

use wdlrun::ast::graph;
use wdlrun::ast::typecheck::{check_document, CheckOptions};
use wdlrun::ast::LanguageVersion;
use wdlrun::env::Bindings;
use wdlrun::run::state::StateMachine;
use wdlrun::syntax::parse_document;
use wdlrun::{StdLib, Value};

fn loaded(source: &str) -> (wdlrun::Document, StdLib) {
    let mut doc = parse_document(source, "pipeline.wdl", "/tmp/pipeline.wdl").unwrap();
    let stdlib = StdLib::for_version(LanguageVersion::V1_1);
    check_document(&mut doc, &stdlib, &CheckOptions::default()).unwrap();
    (doc, stdlib)
}

fn machine(doc: &wdlrun::Document, inputs: Bindings<Value>) -> StateMachine {
    let wf = doc.workflow.as_ref().unwrap();
    let g = Arc::new(graph::build(wf).unwrap());
    StateMachine::new(g, wf, &inputs, HashMap::new()).unwrap()
}

const PIPELINE: &str = r#"version 1.1

task count_lines {
    input {
        File text
    }
    command <<<
        wc -l < ~{text}
    >>>
    output {
        Int n = read_int(stdout())
    }
    runtime {
        docker: "ubuntu:22.04"
        cpu: 1
        memory: "1G"
    }
}

task summarize {
    input {
        Array[Int] counts
        String label = "total"
    }
    command <<<
        echo "~{label}: ~{sep="+" counts}"
    >>>
    output {
        String line = read_string(stdout())
    }
}

workflow lines {
    input {
        Array[File] texts
        Boolean do_summary = true
    }
    scatter (t in texts) {
        call count_lines { input: text = t }
    }
    if (do_summary) {
        call summarize { input: counts = count_lines.n }
    }
    output {
        Array[Int] counts = count_lines.n
        String? summary = summarize.line
    }
}
"#;

#[test]
fn pipeline_parses_and_checks() {
    let (doc, _) = loaded(PIPELINE);
    assert_eq!(doc.tasks.len(), 2);
    let wf = doc.workflow.as_ref().unwrap();
    assert_eq!(wf.name, "lines");
    let outputs = wf.outputs.as_ref().unwrap();
    assert_eq!(outputs[0].ty.to_string(), "Array[Int]");
    assert_eq!(outputs[1].ty.to_string(), "String?");
}

#[test]
fn pipeline_graph_has_gathers_for_both_sections() {
    let (doc, _) = loaded(PIPELINE);
    let g = graph::build(doc.workflow.as_ref().unwrap()).unwrap();
    let ids: Vec<&str> = g.ids().collect();
    assert!(ids.iter().any(|i| i.starts_with("scatter-")));
    assert!(ids.iter().any(|i| i.starts_with("if-")));
    assert!(ids.iter().any(|i| i.starts_with("gather-scatter-")));
    assert!(ids.iter().any(|i| i.starts_with("gather-if-")));
    // The summarize call consumes the scatter gather.
    let summarize_id = ids
        .iter()
        .find(|i| i.contains("call-summarize"))
        .copied()
        .unwrap();
    let deps = g.dependencies(summarize_id);
    assert!(deps.iter().any(|d| d.starts_with("gather-scatter-")));
}

#[test]
fn pipeline_executes_with_injected_completions() {
    let (doc, stdlib) = loaded(PIPELINE);
    let inputs = Bindings::new().bind(
        "texts".to_string(),
        Value::array(
            wdlrun::Type::file(false),
            vec![
                Value::file("/data/a.txt").unwrap(),
                Value::file("/data/b.txt").unwrap(),
                Value::file("/data/c.txt").unwrap(),
            ],
        ),
    );
    let mut machine = machine(&doc, inputs);

    // Round 1: the three scattered count_lines calls, in index order.
    let jobs = machine.step(&stdlib).unwrap();
    assert_eq!(jobs.len(), 3);
    for (i, job) in jobs.iter().enumerate() {
        assert_eq!(job.call_name, "count_lines");
        assert_eq!(job.key.1, vec![i]);
        machine.complete(
            &job.key,
            Bindings::new().bind("n".to_string(), Value::int(10 * (i as i64 + 1))),
        );
    }

    // Round 2: the conditional summarize call sees the gathered counts.
    let jobs = machine.step(&stdlib).unwrap();
    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    assert_eq!(job.call_name, "summarize");
    let counts: Vec<i64> = job
        .inputs
        .resolve("counts")
        .unwrap()
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_int().unwrap())
        .collect();
    assert_eq!(counts, vec![10, 20, 30]);
    machine.complete(
        &job.key,
        Bindings::new().bind("line".to_string(), Value::string("total: 60")),
    );

    machine.step(&stdlib).unwrap();
    assert!(machine.is_done());
    let outputs = machine.outcome().unwrap();
    assert_eq!(
        outputs.resolve("summary").unwrap().as_str(),
        Some("total: 60")
    );
    assert_eq!(
        outputs
            .resolve("counts")
            .unwrap()
            .as_array()
            .unwrap()
            .len(),
        3
    );
}

#[test]
fn disabled_summary_skips_the_conditional_call() {
    let (doc, stdlib) = loaded(PIPELINE);
    let inputs = Bindings::new()
        .bind(
            "texts".to_string(),
            Value::array(
                wdlrun::Type::file(false),
                vec![Value::file("/data/a.txt").unwrap()],
            ),
        )
        .bind("do_summary".to_string(), Value::boolean(false));
    let mut machine = machine(&doc, inputs);

    let jobs = machine.step(&stdlib).unwrap();
    assert_eq!(jobs.len(), 1);
    machine.complete(
        &jobs[0].key,
        Bindings::new().bind("n".to_string(), Value::int(5)),
    );

    let jobs = machine.step(&stdlib).unwrap();
    assert!(jobs.is_empty(), "no summarize call when the predicate is false");
    assert!(machine.is_done());
    let outputs = machine.outcome().unwrap();
    assert!(outputs.resolve("summary").unwrap().is_null());
}

#[test]
fn declaration_only_workflow_runs_without_jobs() {
    let (doc, stdlib) = loaded(
        r#"version 1.1
        workflow arithmetic {
            input {
                Int n = 4
            }
            scatter (i in range(n)) {
                Int sq = (i + 1) * (i + 1)
            }
            Int total = sq[0] + sq[1] + sq[2] + sq[3]
            output {
                Array[Int] squares = sq
                Int sum = total
            }
        }"#,
    );
    let mut m = machine(&doc, Bindings::new());
    let jobs = m.step(&stdlib).unwrap();
    assert!(jobs.is_empty());
    assert!(m.is_done());
    let outputs = m.outcome().unwrap();
    let squares: Vec<i64> = outputs
        .resolve("squares")
        .unwrap()
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_int().unwrap())
        .collect();
    assert_eq!(squares, vec![1, 4, 9, 16]);
    assert_eq!(outputs.resolve("sum").unwrap().as_int(), Some(30));
}

#[test]
fn every_node_output_type_matches_its_binding() {
    // Property 1: the type the state machine assigns to each output binding
    // is assignable to the declared output type.
    let (doc, stdlib) = loaded(
        r#"version 1.1
        workflow typed {
            input {
                Int n = 3
            }
            scatter (i in range(n)) {
                Float f = i * 1.5
            }
            if (n > 1) {
                String s = "big"
            }
            output {
                Array[Float] fs = f
                String? label = s
            }
        }"#,
    );
    let wf = doc.workflow.as_ref().unwrap();
    let declared: Vec<(String, wdlrun::Type)> = wf
        .outputs
        .as_ref()
        .unwrap()
        .iter()
        .map(|d| (d.name.clone(), d.ty.clone()))
        .collect();

    let mut m = machine(&doc, Bindings::new());
    m.step(&stdlib).unwrap();
    assert!(m.is_done());
    let outputs = m.outcome().unwrap();
    for (name, ty) in declared {
        let value = outputs.resolve(&name).unwrap();
        assert!(
            value.ty().coerces(&ty, false),
            "output {} has {} which does not fit declared {}",
            name,
            value.ty(),
            ty
        );
    }
}

#[test]
fn quant_check_can_be_relaxed() {
    let source = r#"version 1.1
    workflow wf {
        input { Int? x = 3 }
        Int y = x
    }"#;
    let mut doc = parse_document(source, "t.wdl", "/tmp/t.wdl").unwrap();
    let stdlib = StdLib::for_version(LanguageVersion::V1_1);
    let strict = check_document(&mut doc, &stdlib, &CheckOptions { check_quant: true });
    assert!(strict.is_err());

    let mut doc = parse_document(source, "t.wdl", "/tmp/t.wdl").unwrap();
    check_document(&mut doc, &stdlib, &CheckOptions { check_quant: false }).unwrap();
}

#[test]
fn draft2_document_round_trip() {
    let source = r#"task greet {
    String who
    command {
        echo "hi ${who}"
    }
    output {
        String line = "hi " + who
    }
}
workflow hello {
    String who
    call greet { input: who = who }
    output {
        String out = greet.line
    }
}"#;
    let mut doc = parse_document(source, "d2.wdl", "/tmp/d2.wdl").unwrap();
    assert_eq!(doc.version, LanguageVersion::Draft2);
    assert!(doc.declared_version.is_none());
    let stdlib = StdLib::for_version(LanguageVersion::Draft2);
    check_document(&mut doc, &stdlib, &CheckOptions::default()).unwrap();
    // Bare declarations were hoisted to inputs.
    assert_eq!(doc.workflow.as_ref().unwrap().inputs.len(), 1);
    assert_eq!(doc.tasks[0].inputs.len(), 1);

    let inputs = Bindings::new().bind("who".to_string(), Value::string("ada"));
    let mut m = machine(&doc, inputs);
    let stdlib = StdLib::for_version(LanguageVersion::Draft2);
    let jobs = m.step(&stdlib).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].inputs.resolve("who").unwrap().as_str(), Some("ada"));
}
