use crate::alias::AliasTable;
use crate::builtin::{self, Flow};
use crate::config::ShellConfig;
use crate::history::History;
use crate::notifier::ReapGate;
use crate::orchestrator::Orchestrator;
use crate::parser::{self, ParserLimits};
use crate::pipeline::Pipeline;
use std::io::{self, Write};
use tracing::{debug, warn};

/// State owned by one interactive session and threaded through each line.
///
/// Holds everything that would otherwise be process-wide: aliases, history,
/// parser limits, and the orchestrator bound to the session's [`ReapGate`].
#[derive(Debug)]
pub struct Session {
    pub config: ShellConfig,
    pub aliases: AliasTable,
    pub history: History,
    limits: ParserLimits,
    orchestrator: Orchestrator,
}

impl Session {
    pub fn new(config: ShellConfig, history: History, gate: ReapGate) -> Self {
        Self {
            aliases: config.alias_table(),
            limits: config.limits(),
            config,
            history,
            orchestrator: Orchestrator::new(gate),
        }
    }

    /// Run one submitted line against the process's standard streams.
    pub fn execute_line(&mut self, line: &str) -> Flow {
        self.execute_line_with(line, &mut io::stdout(), &mut io::stderr())
    }

    /// Run one submitted line: record it, expand aliases, parse, dispatch.
    ///
    /// Nothing here ends the interpreter except an `exit` builtin.
    pub fn execute_line_with(
        &mut self,
        line: &str,
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> Flow {
        let line = line.trim();
        if line.is_empty() {
            return Flow::Continue;
        }
        self.history.record(line);

        let expanded = self.aliases.expand(line);
        let pipeline = match parser::parse_with(&expanded, self.limits) {
            Ok(Some(pipeline)) => pipeline,
            Ok(None) => return Flow::Continue,
            Err(e) => {
                debug!(line = %expanded, error = %e, "rejected line");
                let _ = writeln!(err, "pipesh: parse error: {e}");
                return Flow::Continue;
            }
        };

        self.dispatch(&pipeline, out, err)
    }

    /// Builtins run in-process; anything else goes to the orchestrator.
    fn dispatch(&self, pipeline: &Pipeline, out: &mut dyn Write, err: &mut dyn Write) -> Flow {
        let has_builtin = pipeline
            .stages()
            .iter()
            .any(|stage| builtin::is_builtin(stage.program()));
        if has_builtin {
            return run_builtins(pipeline, out, err);
        }

        let _ = out.flush();
        if let Err(e) = self.orchestrator.run(pipeline) {
            warn!(error = %e, "pipeline aborted");
            let _ = writeln!(err, "pipesh: {e}");
        }
        Flow::Continue
    }
}

/// Run the builtin stages of a line in order; the first `exit` wins.
///
/// External stages of such a line are not started.
fn run_builtins(pipeline: &Pipeline, out: &mut dyn Write, err: &mut dyn Write) -> Flow {
    for stage in pipeline.stages() {
        if !builtin::is_builtin(stage.program()) {
            let _ = writeln!(
                err,
                "pipesh: {}: not run, builtins cannot be piped",
                stage.program()
            );
            continue;
        }
        if builtin::run_builtin(stage, out, err) == Flow::Exit {
            return Flow::Exit;
        }
    }
    Flow::Continue
}
