//! Commands executed inside the interpreter's own process.
//!
//! A builtin has to run in-process because it observes or changes state that
//! belongs to the interpreter: the working directory, or whether the
//! interactive loop keeps going.

use crate::pipeline::Stage;
use anyhow::{Context, Result, anyhow};
use argh::{EarlyExit, FromArgs};
use std::env;
use std::io::Write;
use tracing::debug;

/// What the interactive loop does after a line has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Read the next line.
    Continue,
    /// Stop the loop.
    Exit,
}

type Runner = fn(&Stage, &mut dyn Write, &mut dyn Write) -> Flow;

/// The closed set of builtin names, in the order `help` lists them.
const BUILTINS: &[(&str, Runner)] = &[
    ("cd", dispatch::<Cd>),
    ("exit", exit),
    ("help", dispatch::<Help>),
    ("alias", reserved),
    ("unalias", reserved),
    ("history", reserved),
    ("jobs", reserved),
    ("fg", reserved),
    ("bg", reserved),
];

/// Builtins parsed with [`argh`] and run in-process.
trait BuiltinCommand: Sized + FromArgs {
    /// Executes the command. An error is printed by the caller and never ends
    /// the interactive loop.
    fn execute(self, out: &mut dyn Write) -> Result<Flow>;
}

/// True when `name` must be handled by [`run_builtin`] rather than spawned.
pub fn is_builtin(name: &str) -> bool {
    BUILTINS.iter().any(|(builtin, _)| *builtin == name)
}

/// Names of all builtins.
pub fn names() -> impl Iterator<Item = &'static str> {
    BUILTINS.iter().map(|(name, _)| *name)
}

/// Run a builtin stage. `out` receives regular output, `err` diagnostics.
///
/// A stage whose program is not a builtin is ignored and yields
/// [`Flow::Continue`].
pub fn run_builtin(stage: &Stage, out: &mut dyn Write, err: &mut dyn Write) -> Flow {
    match BUILTINS.iter().find(|(name, _)| *name == stage.program()) {
        Some((_, runner)) => runner(stage, out, err),
        None => Flow::Continue,
    }
}

fn dispatch<T: BuiltinCommand>(stage: &Stage, out: &mut dyn Write, err: &mut dyn Write) -> Flow {
    let args: Vec<&str> = stage.args().iter().map(String::as_str).collect();
    let command = match T::from_args(&[stage.program()], &args) {
        Ok(command) => command,
        Err(EarlyExit { output, status }) => {
            let output = output.trim_end();
            let _ = match status {
                Ok(()) => writeln!(out, "{output}"),
                Err(()) => writeln!(err, "{output}"),
            };
            return Flow::Continue;
        }
    };
    match command.execute(out) {
        Ok(flow) => flow,
        Err(e) => {
            let _ = writeln!(err, "{e:#}");
            Flow::Continue
        }
    }
}

/// `exit` stops the loop whatever follows it.
fn exit(_stage: &Stage, _out: &mut dyn Write, _err: &mut dyn Write) -> Flow {
    Flow::Exit
}

/// Reserved names: routed here so they are never spawned, but they do nothing.
fn reserved(stage: &Stage, _out: &mut dyn Write, _err: &mut dyn Write) -> Flow {
    debug!(builtin = stage.program(), "reserved builtin has no behavior");
    Flow::Continue
}

#[derive(FromArgs)]
/// Change the current working directory of the shell and of every command
/// started after it.
struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory.
    target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn execute(self, _out: &mut dyn Write) -> Result<Flow> {
        let target = self.target.ok_or_else(|| anyhow!("cd: missing argument"))?;
        env::set_current_dir(&target).with_context(|| format!("cd: {target}"))?;
        debug!(dir = %target, "changed working directory");
        Ok(Flow::Continue)
    }
}

#[derive(FromArgs)]
/// Show the builtin commands.
struct Help {}

impl BuiltinCommand for Help {
    fn execute(self, out: &mut dyn Write) -> Result<Flow> {
        writeln!(out, "pipesh builtin commands:")?;
        writeln!(out, "  cd [dir]       Change current directory")?;
        writeln!(out, "  exit           Exit shell")?;
        writeln!(out, "  help           Show this help")?;
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::{Mutex, MutexGuard, OnceLock};

    fn lock_current_dir() -> MutexGuard<'static, ()> {
        static MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
        MUTEX
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn run(argv: &[&str]) -> (Flow, String, String) {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let flow = run_builtin(&Stage::new(argv.iter().copied()), &mut out, &mut err);
        (
            flow,
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[test]
    fn test_is_builtin_closed_set() {
        for name in ["cd", "exit", "help", "alias", "unalias", "history", "jobs", "fg", "bg"] {
            assert!(is_builtin(name), "{name} should be a builtin");
        }
        for name in ["ls", "echo", "pwd", "", "CD", "exit2"] {
            assert!(!is_builtin(name), "{name} should not be a builtin");
        }
        assert_eq!(names().count(), 9);
    }

    #[test]
    fn test_exit_is_unconditional() {
        assert_eq!(run(&["exit"]).0, Flow::Exit);
        assert_eq!(run(&["exit", "3"]).0, Flow::Exit);
        assert_eq!(run(&["exit", "--help"]).0, Flow::Exit);
    }

    #[test]
    fn test_help_prints_usage() {
        let (flow, out, err) = run(&["help"]);
        assert_eq!(flow, Flow::Continue);
        assert!(out.contains("cd [dir]"));
        assert!(out.contains("exit"));
        assert!(err.is_empty());
    }

    #[test]
    fn test_reserved_names_are_silent_noops() {
        for name in ["alias", "unalias", "history", "jobs", "fg", "bg"] {
            let (flow, out, err) = run(&[name, "whatever"]);
            assert_eq!(flow, Flow::Continue);
            assert!(out.is_empty() && err.is_empty());
        }
    }

    #[test]
    fn test_cd_without_argument_reports_usage() {
        let _lock = lock_current_dir();
        let before = env::current_dir().unwrap();

        let (flow, _, err) = run(&["cd"]);

        assert_eq!(flow, Flow::Continue);
        assert_eq!(err, "cd: missing argument\n");
        assert_eq!(env::current_dir().unwrap(), before);
    }

    #[test]
    fn test_cd_nonexistent_keeps_directory() {
        let _lock = lock_current_dir();
        let before = env::current_dir().unwrap();

        let (flow, _, err) = run(&["cd", "/nonexistent/pipesh/dir"]);

        assert_eq!(flow, Flow::Continue);
        assert!(err.starts_with("cd: /nonexistent/pipesh/dir: "), "{err}");
        assert_eq!(env::current_dir().unwrap(), before);
    }

    #[test]
    fn test_cd_changes_process_directory() {
        let _lock = lock_current_dir();
        let before = env::current_dir().unwrap();
        let temp = tempfile::tempdir().unwrap();
        let canonical = fs::canonicalize(temp.path()).unwrap();

        let (flow, _, err) = run(&["cd", canonical.to_str().unwrap()]);
        let after = fs::canonicalize(env::current_dir().unwrap()).unwrap();
        env::set_current_dir(&before).expect("failed to restore cwd");

        assert_eq!(flow, Flow::Continue);
        assert!(err.is_empty(), "{err}");
        assert_eq!(after, canonical);
    }

    #[test]
    fn test_cd_extra_argument_is_rejected_by_argh() {
        let _lock = lock_current_dir();
        let before = env::current_dir().unwrap();

        let (flow, _, err) = run(&["cd", "a", "b"]);

        assert_eq!(flow, Flow::Continue);
        assert!(!err.is_empty());
        assert_eq!(env::current_dir().unwrap(), before);
    }

    #[test]
    fn test_non_builtin_stage_is_ignored() {
        let (flow, out, err) = run(&["ls"]);
        assert_eq!(flow, Flow::Continue);
        assert!(out.is_empty() && err.is_empty());
    }
}
