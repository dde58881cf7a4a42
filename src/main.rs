use anyhow::Result;
use argh::FromArgs;
use pipesh::config::{self, ShellConfig};
use pipesh::{History, Interpreter, ReapGate, Session, logging};
use std::path::PathBuf;
use tracing::warn;

#[derive(FromArgs)]
/// An interactive shell that runs pipelines of external programs.
struct Args {
    #[argh(option, short = 'c')]
    /// run a single command line and exit
    command: Option<String>,

    #[argh(option)]
    /// configuration file (default: ~/.pipesh.toml)
    config: Option<PathBuf>,

    #[argh(option)]
    /// history file (default: ~/.pipesh_history)
    history_file: Option<PathBuf>,

    #[argh(option)]
    /// log level: error, warn, info, debug or trace
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let args: Args = argh::from_env();
    logging::init_logging(args.log_level.as_deref())?;

    let config_path = args.config.unwrap_or_else(config::default_config_path);
    let config = ShellConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(path = %config_path.display(), error = %e, "using default configuration");
        eprintln!("pipesh: {}: {e}; using defaults", config_path.display());
        ShellConfig::default()
    });
    let gate = ReapGate::new();

    if let Some(line) = args.command {
        let history = History::new(config.history_limit);
        let mut session = Session::new(config, history, gate);
        session.execute_line(&line);
        return Ok(());
    }

    let history_path = args
        .history_file
        .unwrap_or_else(config::default_history_path);
    let history = History::with_file(&history_path, config.history_limit).unwrap_or_else(|e| {
        warn!(path = %history_path.display(), error = %e, "starting with empty history");
        History::new(config.history_limit)
    });

    let session = Session::new(config, history, gate.clone());
    Interpreter::new(session, gate)?.repl()
}
