//! Interactive session loop: prompt, analyze, execute, echo, repeat.
//!
//! Each turn runs the full pipeline over one submitted line. Variable
//! bindings thread forward across turns, but only turns that execute to
//! completion update them; a turn that fails to parse or faults at
//! runtime leaves the carried state untouched and the loop running.

use crate::analyzer::Analyzer;
use crate::config::Policy;
use crate::errors::Result;
use crate::parse::parse;
use crate::runner::{Bindings, Session};
use std::io::{BufRead, Write};
use tracing::debug;

pub const PROMPT: &str = "sandbox$ ";

pub struct Repl<R, W> {
    input: R,
    output: W,
    policy: Policy,
    session: Session,
    bindings: Bindings,
}

impl<R: BufRead, W: Write> Repl<R, W> {
    pub fn new(input: R, output: W, policy: Policy) -> Self {
        Self {
            input,
            output,
            policy,
            session: Session::new(),
            bindings: Bindings::new(),
        }
    }

    /// Runs turns until the input closes or the user asks to leave.
    /// Turn-scoped failures are reported and absorbed; only I/O faults
    /// on the loop's own streams end the session with an error.
    pub fn run(mut self) -> Result<()> {
        while self.turn()? {}
        writeln!(self.output, "bye")?;
        Ok(())
    }

    fn turn(&mut self) -> Result<bool> {
        write!(self.output, "{}", PROMPT)?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(false);
        }
        let source = line.trim();
        if source.is_empty() {
            return Ok(true);
        }
        if source == "exit" || source == "quit" {
            return Ok(false);
        }

        let module = match parse(source) {
            Ok(module) => module,
            Err(err) if err.is_turn_scoped() => {
                writeln!(self.output, "error: {}", err)?;
                return Ok(true);
            }
            Err(err) => return Err(err),
        };

        let analysis = Analyzer::new(&self.policy).analyze(&module, source.lines().count());
        for violation in &analysis.report.violations {
            writeln!(
                self.output,
                "blocked {}: {} (line {})",
                violation.kind.label(),
                violation.name,
                violation.line
            )?;
        }

        match self.session.execute(&analysis.sanitized, self.bindings.clone()) {
            Ok(result) => {
                self.output.write_all(result.captured_output.as_bytes())?;
                self.bindings = result.bindings;
                self.echo_vars()?;
                if let Some(value) = result.value {
                    writeln!(self.output, "result: {}", value.repr())?;
                }
            }
            Err(err) if err.is_turn_scoped() => {
                debug!(%err, "turn failed, bindings unchanged");
                writeln!(self.output, "error: {}", err)?;
            }
            Err(err) => return Err(err),
        }
        Ok(true)
    }

    fn echo_vars(&mut self) -> Result<()> {
        if self.bindings.is_empty() {
            return Ok(());
        }
        let mut names: Vec<&String> = self.bindings.keys().collect();
        names.sort();
        let rendered: Vec<String> = names
            .iter()
            .filter_map(|name| {
                self.bindings
                    .get(*name)
                    .map(|value| format!("{} = {}", name, value.repr()))
            })
            .collect();
        writeln!(self.output, "vars: {}", rendered.join(", "))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn drive(script: &str) -> String {
        let input = Cursor::new(script.as_bytes().to_vec());
        let mut output = Vec::new();
        Repl::new(input, &mut output, Policy::default())
            .run()
            .unwrap();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn bindings_thread_across_turns() {
        let output = drive("x = 5\nx + 1\n");
        assert!(output.contains("vars: x = 5"));
        assert!(output.contains("result: 6"));
    }

    #[test]
    fn prompt_appears_each_turn() {
        let output = drive("x = 1\ny = 2\n");
        assert_eq!(output.matches(PROMPT).count(), 3);
    }

    #[test]
    fn blocked_call_yields_marker_only() {
        let output = drive("import os\nos.system('echo hi')\n");
        assert!(output.contains("blocked import: os (line 1)"));
        assert!(output.contains("blocked call: os.system (line 1)"));
        assert!(output.contains("inert call intercepted"));
        assert!(!output.contains("echo hi"));
    }

    #[test]
    fn parse_error_is_turn_scoped() {
        let output = drive("def (\nprint('still here')\n");
        assert!(output.contains("error: syntax error"));
        assert!(output.contains("still here"));
    }

    #[test]
    fn runtime_fault_preserves_bindings() {
        let output = drive("x = 5\nx + missing\nx + 1\n");
        assert!(output.contains("error: runtime error"));
        assert!(output.contains("result: 6"));
    }

    #[test]
    fn exit_closes_the_session() {
        let output = drive("exit\nx = 1\n");
        assert!(output.contains("bye"));
        assert!(!output.contains("vars: x = 1"));
    }
}
