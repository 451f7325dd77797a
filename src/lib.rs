//! pysieve analyzes snippets of Python-like code against a configurable
//! policy, produces a structured report, and executes a sanitized form of
//! the program inside a restricted runtime.
//!
//! The pipeline has three stages:
//!
//! 1. [`parse`](parse::parse) turns source text into a tree.
//! 2. [`Analyzer`](analyzer::Analyzer) walks the tree, records everything
//!    of interest into a [`Report`](report::Report), and produces a fresh
//!    sanitized tree with every policy violation neutralized in place.
//! 3. [`Session`](runner::Session) executes the sanitized tree with
//!    captured output and caller-threaded variable bindings.
//!
//! The interactive loop in [`repl`] chains the stages turn by turn. For
//! one-shot use, [`run_snippet`] runs the whole pipeline over a single
//! snippet with empty starting bindings.

pub mod analyzer;
pub mod config;
pub mod errors;
pub mod parse;
pub mod repl;
pub mod report;
pub mod runner;
pub mod tree;

pub use analyzer::{Analysis, Analyzer};
pub use config::{AnalyzerConfig, Policy};
pub use errors::{Result, SandboxError};
pub use report::Report;
pub use runner::{Bindings, ExecutionResult, Session, Value};

/// Everything a single pipeline run produces.
#[derive(Debug)]
pub struct SnippetOutcome {
    pub report: Report,
    pub execution: ExecutionResult,
}

/// Parse, analyze, and execute one snippet with empty starting bindings.
pub fn run_snippet(code: &str, policy: &Policy) -> Result<SnippetOutcome> {
    let module = parse::parse(code)?;
    let analysis = Analyzer::new(policy).analyze(&module, code.lines().count());
    let execution = Session::new().execute(&analysis.sanitized, Bindings::new())?;
    Ok(SnippetOutcome {
        report: analysis.report,
        execution,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_snippet_reports_and_executes() {
        let outcome = run_snippet("x = 5\nprint(x * 2)\n", &Policy::default()).unwrap();
        assert_eq!(outcome.execution.captured_output, "10\n");
        assert_eq!(outcome.report.summary.variables, 1);
        assert!(outcome.report.violations.is_empty());
    }

    #[test]
    fn run_snippet_neutralizes_blocked_calls() {
        let outcome =
            run_snippet("import os\nos.system('rm -rf /')\n", &Policy::default()).unwrap();
        assert_eq!(outcome.report.violations.len(), 2);
        assert_eq!(outcome.execution.captured_output, "inert call intercepted\n");
    }
}
