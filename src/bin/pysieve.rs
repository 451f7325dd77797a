use anyhow::{bail, Context, Result};
use clap::Parser;
use pysieve::config::{AnalyzerConfig, Policy};
use pysieve::repl::Repl;
use pysieve::run_snippet;
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Analyze, sanitize, and execute snippets of Python-like code under a
/// configurable policy.
#[derive(Parser, Debug)]
#[command(name = "pysieve", version, about)]
struct Cli {
    /// Snippet to analyze and execute
    #[arg(short, long, conflicts_with = "file")]
    code: Option<String>,

    /// Read the snippet from a file instead
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// JSON policy configuration; defaults apply for absent keys
    #[arg(long)]
    config: Option<PathBuf>,

    /// Start an interactive session
    #[arg(short, long)]
    interactive: bool,

    /// Write the analysis report as pretty JSON to this path
    #[arg(long)]
    report_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AnalyzerConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => AnalyzerConfig::default(),
    };
    let policy = Policy::new(config);

    if cli.interactive {
        let stdin = io::stdin().lock();
        let stdout = io::stdout().lock();
        Repl::new(stdin, stdout, policy).run()?;
        return Ok(());
    }

    let code = match (cli.code, cli.file) {
        (Some(code), _) => code,
        (None, Some(path)) => fs::read_to_string(&path)
            .with_context(|| format!("reading snippet from {}", path.display()))?,
        (None, None) => bail!("nothing to do: pass --code, --file, or --interactive"),
    };

    let outcome = run_snippet(&code, &policy)?;

    for violation in &outcome.report.violations {
        eprintln!(
            "blocked {} '{}' at line {}",
            violation.kind.label(),
            violation.name,
            violation.line
        );
    }
    print!("{}", outcome.execution.captured_output);
    if let Some(value) = outcome.execution.value {
        println!("result: {}", value.repr());
    }

    if let Some(path) = &cli.report_out {
        fs::write(path, outcome.report.to_json_pretty()?)
            .with_context(|| format!("writing report to {}", path.display()))?;
    }

    Ok(())
}
