//! End-to-end pipeline coverage: parse, analyze, execute, and loop.

use pretty_assertions::assert_eq;
use pysieve::analyzer::Analyzer;
use pysieve::config::{AnalyzerConfig, Policy};
use pysieve::parse::parse;
use pysieve::repl::Repl;
use pysieve::report::ViolationKind;
use pysieve::runner::{Bindings, Session, Value};
use pysieve::run_snippet;
use std::io::Cursor;

fn analyze(source: &str, policy: &Policy) -> pysieve::Analysis {
    let module = parse(source).unwrap();
    Analyzer::new(policy).analyze(&module, source.lines().count())
}

#[test]
fn complexity_score_counts_branching_statements() {
    let source = "\
if a:
    pass
while b:
    pass
for i in xs:
    pass
try:
    pass
except:
    pass
";
    let analysis = analyze(source, &Policy::default());
    assert_eq!(analysis.report.summary.complexity_score, 4);
}

#[test]
fn bindings_thread_between_executions() {
    let policy = Policy::default();
    let session = Session::new();

    let first = analyze("x = 5\n", &policy);
    let first_run = session
        .execute(&first.sanitized, Bindings::new())
        .unwrap();
    assert_eq!(first_run.bindings.get("x"), Some(&Value::Int(5)));

    let second = analyze("x + 1\n", &policy);
    let second_run = session
        .execute(&second.sanitized, first_run.bindings)
        .unwrap();
    assert_eq!(second_run.value, Some(Value::Int(6)));
    assert_eq!(second_run.bindings.get("x"), Some(&Value::Int(5)));
}

#[test]
fn blocked_system_call_emits_only_the_marker() {
    let outcome = run_snippet(
        "import os\nos.system('echo pwned')\n",
        &Policy::default(),
    )
    .unwrap();
    assert_eq!(outcome.execution.captured_output, "inert call intercepted\n");

    let kinds: Vec<ViolationKind> = outcome
        .report
        .violations
        .iter()
        .map(|v| v.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![ViolationKind::BlockedImport, ViolationKind::BlockedCall]
    );
    assert_eq!(outcome.report.violations[1].name, "os.system");
}

#[test]
fn analysis_and_execution_are_deterministic() {
    let source = "\
import os
import json
def f(n):
    if n > 0:
        return n
    return 0
print(f(3))
";
    let policy = Policy::default();
    let first = run_snippet(source, &policy).unwrap();
    let second = run_snippet(source, &policy).unwrap();
    assert_eq!(
        first.report.to_json_pretty().unwrap(),
        second.report.to_json_pretty().unwrap()
    );
    assert_eq!(
        first.execution.captured_output,
        second.execution.captured_output
    );
}

#[test]
fn snippet_without_functions_has_zeroed_function_metrics() {
    let outcome = run_snippet("x = 1\ny = x + 1\n", &Policy::default()).unwrap();
    assert_eq!(outcome.report.metrics.documentation_ratio, 0.0);
    assert_eq!(outcome.report.metrics.average_function_complexity, 0.0);
    assert!(outcome.report.metrics.most_complex_function.is_none());
}

#[test]
fn repl_survives_a_parse_error_and_keeps_state() {
    let script = "x = 41\nthis is not python\nx + 1\nexit\n";
    let input = Cursor::new(script.as_bytes().to_vec());
    let mut output = Vec::new();
    Repl::new(input, &mut output, Policy::default())
        .run()
        .unwrap();
    let output = String::from_utf8(output).unwrap();
    assert!(output.contains("error: syntax error"), "{output}");
    assert!(output.contains("result: 42"), "{output}");
}

#[test]
fn custom_policy_blocks_configured_names() {
    let config = AnalyzerConfig::from_json_str(
        r#"{"blacklist_imports": ["socket"], "blacklist_calls": ["eval"]}"#,
    )
    .unwrap();
    let policy = Policy::new(config);

    let outcome = run_snippet("import socket\nimport os\n", &policy).unwrap();
    assert_eq!(outcome.report.violations.len(), 1);
    assert_eq!(outcome.report.violations[0].name, "socket");
    // 'os' is only blocked by the default document, not this one
    assert_eq!(
        outcome.execution.bindings.get("os"),
        Some(&Value::ModuleProxy("os".to_string()))
    );
}

#[test]
fn sanitization_never_mutates_the_submitted_tree() {
    let source = "import os\nos.system('x')\n";
    let module = parse(source).unwrap();
    let before = module.clone();
    let policy = Policy::default();
    let analysis = Analyzer::new(&policy).analyze(&module, 2);
    assert_eq!(module, before);
    assert_ne!(analysis.sanitized, before);
}
