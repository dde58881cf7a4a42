//! A small interactive shell built around a pipeline compiler and a process
//! orchestrator.
//!
//! A line such as `cat < in.txt | sort | uniq -c > out.txt` is parsed by
//! [`parser`] into a [`Pipeline`] of [`Stage`]s. Lines that name a builtin
//! (`cd`, `exit`, `help`, ...) run in-process through [`builtin`]; everything
//! else is handed to the [`Orchestrator`], which starts one child process per
//! stage, connects neighbouring stages with pipes, honours redirections, and
//! waits for all of them. Children that finish outside that wait are reported
//! by the [`notifier`].
//!
//! There is no quoting, escaping, expansion or job control.

pub mod alias;
pub mod builtin;
pub mod completion;
pub mod config;
pub mod errors;
pub mod external;
pub mod history;
mod interpreter;
pub mod logging;
pub mod notifier;
pub mod orchestrator;
pub mod parser;
pub mod pipeline;
pub mod prompt;
mod session;

pub use alias::AliasTable;
pub use builtin::{Flow, is_builtin, run_builtin};
pub use config::ShellConfig;
pub use history::History;
pub use interpreter::Interpreter;
pub use notifier::{CompletionNotifier, ReapGate};
pub use orchestrator::{Orchestrator, OrchestratorError, StageFailure};
pub use parser::{ParseError, ParserLimits, parse, parse_with};
pub use pipeline::{OutputRedirect, Pipeline, Stage, WriteMode};
pub use session::Session;
