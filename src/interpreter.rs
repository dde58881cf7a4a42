use crate::builtin::Flow;
use crate::completion::ShellHelper;
use crate::notifier::{self, CompletionNotifier, ReapGate, StderrPrinter};
use crate::prompt;
use crate::session::Session;
use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::Editor;
use tracing::{debug, warn};

/// The interactive read-eval loop around a [`Session`].
///
/// Example
/// ```no_run
/// use pipesh::{History, Interpreter, ReapGate, Session, ShellConfig};
/// let gate = ReapGate::new();
/// let session = Session::new(ShellConfig::default(), History::new(1000), gate.clone());
/// Interpreter::new(session, gate).unwrap().repl().unwrap();
/// ```
pub struct Interpreter {
    session: Session,
    editor: Editor<ShellHelper, DefaultHistory>,
    _notifier: Option<CompletionNotifier>,
}

impl Interpreter {
    /// Set up the line editor, signal handling and the completion notifier.
    ///
    /// `gate` must be the gate the session's orchestrator was built with.
    pub fn new(session: Session, gate: ReapGate) -> Result<Self> {
        let mut editor = Editor::<ShellHelper, DefaultHistory>::new()
            .context("failed to initialise the line editor")?;
        editor.set_helper(Some(ShellHelper::new()));
        for entry in session.history.entries() {
            let _ = editor.add_history_entry(entry);
        }

        notifier::ignore_interrupts().context("failed to install SIGINT handler")?;

        let notifier = match editor.create_external_printer() {
            Ok(printer) => CompletionNotifier::install(gate, printer),
            Err(e) => {
                debug!(error = %e, "no external printer, reporting children on stderr");
                CompletionNotifier::install(gate, StderrPrinter)
            }
        };
        let notifier = match notifier {
            Ok(notifier) => Some(notifier),
            Err(e) => {
                warn!(error = %e, "child completion reports disabled");
                None
            }
        };

        Ok(Self {
            session,
            editor,
            _notifier: notifier,
        })
    }

    /// Read and run lines until `exit` or end of input, then save history.
    pub fn repl(&mut self) -> Result<()> {
        loop {
            let prompt = prompt::render(&self.session.config);
            match self.editor.readline(&prompt) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        let _ = self.editor.add_history_entry(trimmed);
                    }
                    if self.session.execute_line(&line) == Flow::Exit {
                        break;
                    }
                }
                // Ctrl-C only discards the line being edited.
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => {
                    println!();
                    break;
                }
                Err(err) => {
                    self.save_history();
                    return Err(err).context("failed to read line");
                }
            }
        }
        self.save_history();
        Ok(())
    }

    fn save_history(&self) {
        if let Err(e) = self.session.history.save() {
            warn!(error = %e, "failed to save history");
            eprintln!("pipesh: failed to save history: {e}");
        }
    }
}
