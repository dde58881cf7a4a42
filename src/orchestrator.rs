//! Runs a [`Pipeline`] as a chain of concurrently running child processes.
//!
//! Stages are spawned left to right. Before stage `i` is spawned, the pipe
//! towards stage `i + 1` is created; the write end becomes stage `i`'s
//! standard output and the read end becomes stage `i + 1`'s standard input.
//! An explicit redirection on either side takes priority over the pipe. The
//! parent's copies of both ends are released as soon as the stage that uses
//! them has been spawned, so end-of-file reaches the next stage once the
//! writer exits. Every spawned child is waited on before control returns.
//!
//! A stage whose program cannot be started (not found, not executable, or a
//! redirection target that cannot be opened) still gets a child process: it
//! prints the reason to standard error and exits non-zero, so every stage of
//! a pipeline is one child that is waited on.

use crate::external::resolve_program;
use crate::notifier::ReapGate;
use crate::pipeline::{Pipeline, Stage};
use nix::errno::Errno;
use nix::libc;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork};
use std::fmt;
use std::fs::File;
use std::io::{self, PipeReader, PipeWriter};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::MutexGuard;
use thiserror::Error;
use tracing::{debug, warn};

/// Failure that stops the remaining, not yet spawned, stages of a pipeline.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("failed to start stage {stage} ({program}): {source}")]
    SpawnFailed {
        stage: usize,
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Which side of a stage a redirection replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Input => "input",
            Direction::Output => "output",
        })
    }
}

/// Failure confined to one stage. Its siblings keep running.
#[derive(Debug, Error)]
pub enum StageFailure {
    /// The program could not be found or executed.
    #[error("exec failed: {program}: {source}")]
    Exec {
        stage: usize,
        program: String,
        #[source]
        source: io::Error,
    },
    /// A redirection target could not be opened.
    #[error("cannot open {direction} file '{}': {source}", path.display())]
    Redirection {
        stage: usize,
        direction: Direction,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StageFailure {
    /// Index of the failing stage.
    pub fn stage(&self) -> usize {
        match self {
            StageFailure::Exec { stage, .. } | StageFailure::Redirection { stage, .. } => *stage,
        }
    }

    /// Exit status of the child standing in for the failed stage: 127 for a
    /// missing program, 126 for one that cannot be executed, 1 for a
    /// redirection.
    pub fn exit_code(&self) -> i32 {
        match self {
            StageFailure::Exec { source, .. } if source.kind() == io::ErrorKind::NotFound => 127,
            StageFailure::Exec { .. } => 126,
            StageFailure::Redirection { .. } => 1,
        }
    }
}

/// A child process owned by one stage.
enum StageProcess {
    /// The stage's own program.
    Program(Child),
    /// A stage that could not start; the child reports why and exits.
    Failed(Pid),
}

impl StageProcess {
    fn id(&self) -> u32 {
        match self {
            StageProcess::Program(child) => child.id(),
            StageProcess::Failed(pid) => pid.as_raw().unsigned_abs(),
        }
    }

    fn wait(&mut self) -> io::Result<ExitStatus> {
        let pid = match self {
            StageProcess::Program(child) => return child.wait(),
            StageProcess::Failed(pid) => *pid,
        };
        loop {
            match waitpid(pid, None) {
                Ok(WaitStatus::Exited(_, code)) => return Ok(ExitStatus::from_raw(code << 8)),
                Ok(WaitStatus::Signaled(_, signal, _)) => {
                    return Ok(ExitStatus::from_raw(signal as i32));
                }
                Ok(_) | Err(Errno::EINTR) => continue,
                Err(errno) => return Err(errno.into()),
            }
        }
    }
}

enum SpawnError {
    Stage(StageFailure),
    Fatal(OrchestratorError),
}

/// What happened to a pipeline once every spawned child has terminated.
#[derive(Debug)]
pub struct PipelineReport {
    /// Exit status of each spawned child, keyed by stage index.
    pub statuses: Vec<(usize, ExitStatus)>,
    /// Stages whose program never started. Each of them still has a status.
    pub failures: Vec<StageFailure>,
}

impl PipelineReport {
    /// Number of children that were waited on.
    pub fn reaped(&self) -> usize {
        self.statuses.len()
    }
}

/// Stages that have been spawned and not yet waited on.
///
/// Holds the [`ReapGate`] until [`SpawnedPipeline::wait`] returns.
pub struct SpawnedPipeline<'a> {
    _reap_guard: MutexGuard<'a, ()>,
    children: Vec<(usize, StageProcess)>,
    failures: Vec<StageFailure>,
    error: Option<OrchestratorError>,
}

impl SpawnedPipeline<'_> {
    /// Number of child processes started.
    pub fn spawned(&self) -> usize {
        self.children.len()
    }

    /// Process ids of the running children, in stage order.
    pub fn pids(&self) -> Vec<u32> {
        self.children.iter().map(|(_, child)| child.id()).collect()
    }

    /// Wait for every spawned child, in whatever order they finish.
    ///
    /// Returns the spawn error, if any, only after all children are reaped.
    pub fn wait(self) -> Result<PipelineReport, OrchestratorError> {
        let SpawnedPipeline {
            _reap_guard,
            children,
            failures,
            error,
        } = self;

        let mut statuses = Vec::with_capacity(children.len());
        for (stage, mut child) in children {
            match child.wait() {
                Ok(status) => {
                    debug!(stage, pid = child.id(), %status, "stage finished");
                    statuses.push((stage, status));
                }
                Err(e) => warn!(stage, pid = child.id(), error = %e, "failed to wait for stage"),
            }
        }
        drop(_reap_guard);

        match error {
            Some(err) => Err(err),
            None => Ok(PipelineReport { statuses, failures }),
        }
    }
}

/// Realizes pipelines as live processes.
#[derive(Debug, Clone, Default)]
pub struct Orchestrator {
    gate: ReapGate,
}

impl Orchestrator {
    /// Reaping is coordinated with any completion notifier sharing `gate`.
    pub fn new(gate: ReapGate) -> Self {
        Self { gate }
    }

    /// Spawn every stage, then block until all of them have terminated.
    ///
    /// Per-stage failures (program not found, redirection target unopenable)
    /// are reported by that stage's child and do not make this fail.
    pub fn run(&self, pipeline: &Pipeline) -> Result<(), OrchestratorError> {
        self.spawn(pipeline).wait().map(|_| ())
    }

    /// Spawn all stages of `pipeline` without waiting for any of them.
    pub fn spawn(&self, pipeline: &Pipeline) -> SpawnedPipeline<'_> {
        let mut spawned = SpawnedPipeline {
            _reap_guard: self.gate.lock(),
            children: Vec::with_capacity(pipeline.stages().len()),
            failures: Vec::new(),
            error: None,
        };

        let mut upstream: Option<PipeReader> = None;
        for (index, stage) in pipeline.stages().iter().enumerate() {
            let (next_upstream, downstream) = if pipeline.next_of(index).is_some() {
                match io::pipe() {
                    Ok((reader, writer)) => (Some(reader), Some(writer)),
                    Err(source) => {
                        spawned.error = Some(OrchestratorError::SpawnFailed {
                            stage: index,
                            program: stage.program().to_string(),
                            source,
                        });
                        break;
                    }
                }
            } else {
                (None, None)
            };

            match spawn_stage(index, stage, upstream.take(), downstream) {
                Ok(child) => {
                    debug!(stage = index, pid = child.id(), program = stage.program(), "spawned stage");
                    spawned.children.push((index, StageProcess::Program(child)));
                }
                Err(SpawnError::Stage(failure)) => {
                    warn!(stage = index, error = %failure, "stage did not start");
                    let reporter = spawn_reporter(&failure);
                    spawned.failures.push(failure);
                    match reporter {
                        Ok(pid) => spawned.children.push((index, StageProcess::Failed(pid))),
                        Err(source) => {
                            spawned.error = Some(OrchestratorError::SpawnFailed {
                                stage: index,
                                program: stage.program().to_string(),
                                source,
                            });
                            break;
                        }
                    }
                }
                Err(SpawnError::Fatal(err)) => {
                    spawned.error = Some(err);
                    break;
                }
            }
            upstream = next_upstream;
        }

        spawned
    }
}

/// Start one stage. Pipe ends that end up unused are dropped on return.
fn spawn_stage(
    index: usize,
    stage: &Stage,
    upstream: Option<PipeReader>,
    downstream: Option<PipeWriter>,
) -> Result<Child, SpawnError> {
    let redirection_failure = |direction, path: &PathBuf, source| {
        SpawnError::Stage(StageFailure::Redirection {
            stage: index,
            direction,
            path: path.clone(),
            source,
        })
    };
    let exec_failure = |source| {
        SpawnError::Stage(StageFailure::Exec {
            stage: index,
            program: stage.program().to_string(),
            source,
        })
    };

    let stdin = match &stage.input {
        Some(path) => File::open(path)
            .map(Stdio::from)
            .map_err(|e| redirection_failure(Direction::Input, path, e))?,
        None => upstream.map_or_else(Stdio::inherit, Stdio::from),
    };
    let stdout = match &stage.output {
        Some(redirect) => redirect
            .open()
            .map(Stdio::from)
            .map_err(|e| redirection_failure(Direction::Output, &redirect.path, e))?,
        None => downstream.map_or_else(Stdio::inherit, Stdio::from),
    };

    let executable = resolve_program(stage.program()).map_err(exec_failure)?;

    Command::new(executable)
        .arg0(stage.program())
        .args(stage.args())
        .stdin(stdin)
        .stdout(stdout)
        .spawn()
        .map_err(|source| {
            if is_exec_failure(&source) {
                exec_failure(source)
            } else {
                SpawnError::Fatal(OrchestratorError::SpawnFailed {
                    stage: index,
                    program: stage.program().to_string(),
                    source,
                })
            }
        })
}

/// Fork a child that prints `failure` to standard error and exits with
/// [`StageFailure::exit_code`].
fn spawn_reporter(failure: &StageFailure) -> io::Result<Pid> {
    let message = format!("pipesh: {failure}\n");
    let code = failure.exit_code();
    // SAFETY: the child only calls write(2) and _exit(2), both
    // async-signal-safe, on a buffer allocated before the fork.
    match unsafe { fork() }.map_err(io::Error::from)? {
        ForkResult::Parent { child } => Ok(child),
        ForkResult::Child => unsafe {
            libc::write(libc::STDERR_FILENO, message.as_ptr().cast(), message.len());
            libc::_exit(code)
        },
    }
}

/// Errors that `execve` reports for this program only, as opposed to the
/// system being unable to create a process at all.
fn is_exec_failure(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
    ) || matches!(
        err.raw_os_error().map(Errno::from_raw),
        Some(Errno::ENOEXEC | Errno::ENOTDIR | Errno::ELOOP | Errno::ETXTBSY)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use std::fs;
    use std::path::Path;

    fn pipeline(line: &str) -> Pipeline {
        parse(line).unwrap().unwrap()
    }

    fn line_in(dir: &Path, template: &str) -> String {
        template.replace("{dir}", dir.to_str().unwrap())
    }

    #[test]
    fn test_spawns_and_reaps_one_child_per_stage() {
        let orchestrator = Orchestrator::default();
        for k in 1..=4 {
            let line = vec!["true"; k].join(" | ");
            let spawned = orchestrator.spawn(&pipeline(&line));
            assert_eq!(spawned.spawned(), k);

            let report = spawned.wait().unwrap();
            assert_eq!(report.reaped(), k);
            assert!(report.failures.is_empty());
            assert!(report.statuses.iter().all(|(_, status)| status.success()));
        }
    }

    #[test]
    fn test_redirect_truncate_then_append() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::default();

        orchestrator
            .run(&pipeline(&line_in(dir.path(), "echo hi > {dir}/out.txt")))
            .unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("out.txt")).unwrap(), "hi\n");

        orchestrator
            .run(&pipeline(&line_in(dir.path(), "echo bye >> {dir}/out.txt")))
            .unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("out.txt")).unwrap(),
            "hi\nbye\n"
        );

        orchestrator
            .run(&pipeline(&line_in(dir.path(), "echo again > {dir}/out.txt")))
            .unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("out.txt")).unwrap(), "again\n");
    }

    #[test]
    fn test_pipe_connects_stages() {
        let dir = tempfile::tempdir().unwrap();
        let line = line_in(dir.path(), r"printf b\na\n | sort > {dir}/sorted.txt");

        Orchestrator::default().run(&pipeline(&line)).unwrap();

        assert_eq!(
            fs::read_to_string(dir.path().join("sorted.txt")).unwrap(),
            "a\nb\n"
        );
    }

    #[test]
    fn test_three_stage_chain_reaches_eof() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("words.txt");
        fs::write(&input, "one\ntwo\nthree\n").unwrap();
        let line = line_in(dir.path(), "cat < {dir}/words.txt | grep o | wc -l > {dir}/count.txt");

        Orchestrator::default().run(&pipeline(&line)).unwrap();

        let count = fs::read_to_string(dir.path().join("count.txt")).unwrap();
        assert_eq!(count.trim(), "2");
    }

    #[test]
    fn test_interior_output_redirect_overrides_pipe() {
        let dir = tempfile::tempdir().unwrap();
        let line = line_in(
            dir.path(),
            "echo middle > {dir}/mid.txt | wc -c > {dir}/count.txt",
        );

        Orchestrator::default().run(&pipeline(&line)).unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("mid.txt")).unwrap(), "middle\n");
        // The next stage sees an immediately closed pipe.
        let count = fs::read_to_string(dir.path().join("count.txt")).unwrap();
        assert_eq!(count.trim(), "0");
    }

    #[test]
    fn test_missing_program_is_confined_to_its_stage() {
        let dir = tempfile::tempdir().unwrap();
        let line = line_in(
            dir.path(),
            "no-such-program-pipesh | echo still-runs > {dir}/out.txt",
        );

        let orchestrator = Orchestrator::default();
        let spawned = orchestrator.spawn(&pipeline(&line));
        assert_eq!(spawned.spawned(), 2);
        let report = spawned.wait().unwrap();

        assert_eq!(report.reaped(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage(), 0);
        assert!(matches!(report.failures[0], StageFailure::Exec { .. }));
        let (stage, status) = report.statuses[0];
        assert_eq!(stage, 0);
        assert_eq!(status.code(), Some(127));
        assert!(report.statuses[1].1.success());
        assert_eq!(
            fs::read_to_string(dir.path().join("out.txt")).unwrap(),
            "still-runs\n"
        );
    }

    #[test]
    fn test_single_missing_program_still_succeeds() {
        let result = Orchestrator::default().run(&pipeline("definitely-not-a-program-pipesh --flag"));
        assert!(result.is_ok());
    }

    #[test]
    fn test_directory_is_not_executable() {
        let dir = tempfile::tempdir().unwrap();
        let report = Orchestrator::default()
            .spawn(&pipeline(dir.path().to_str().unwrap()))
            .wait()
            .unwrap();

        assert_eq!(report.reaped(), 1);
        assert!(matches!(report.failures[..], [StageFailure::Exec { stage: 0, .. }]));
        assert_eq!(report.statuses[0].1.code(), Some(126));
    }

    #[test]
    fn test_unopenable_redirection_is_confined_to_its_stage() {
        let dir = tempfile::tempdir().unwrap();
        let line = line_in(
            dir.path(),
            "echo lost > {dir}/missing/out.txt | echo kept > {dir}/kept.txt",
        );

        let report = Orchestrator::default().spawn(&pipeline(&line)).wait().unwrap();

        assert_eq!(report.reaped(), 2);
        assert_eq!(report.statuses[0], (0, ExitStatus::from_raw(1 << 8)));
        match &report.failures[..] {
            [StageFailure::Redirection { stage, direction, .. }] => {
                assert_eq!(*stage, 0);
                assert_eq!(*direction, Direction::Output);
            }
            other => panic!("unexpected failures: {other:?}"),
        }
        assert_eq!(fs::read_to_string(dir.path().join("kept.txt")).unwrap(), "kept\n");
    }

    #[test]
    fn test_missing_input_file_message() {
        let dir = tempfile::tempdir().unwrap();
        let line = line_in(dir.path(), "cat < {dir}/absent.txt");

        let report = Orchestrator::default().spawn(&pipeline(&line)).wait().unwrap();

        let message = report.failures[0].to_string();
        assert!(message.starts_with("cannot open input file '"), "{message}");
        assert!(message.contains("absent.txt"), "{message}");
    }

    #[test]
    fn test_child_exit_status_is_not_an_error() {
        let report = Orchestrator::default()
            .spawn(&pipeline("false"))
            .wait()
            .unwrap();
        assert_eq!(report.statuses.len(), 1);
        assert_eq!(report.statuses[0].1.code(), Some(1));
        assert!(report.statuses[0].1.signal().is_none());
    }

    #[test]
    fn test_stages_run_concurrently() {
        // `yes` never ends on its own; it only stops when `head` closes the pipe.
        let dir = tempfile::tempdir().unwrap();
        let line = line_in(dir.path(), "yes | head -n 3 > {dir}/head.txt");

        let report = Orchestrator::default().spawn(&pipeline(&line)).wait().unwrap();

        assert_eq!(report.reaped(), 2);
        assert_eq!(
            fs::read_to_string(dir.path().join("head.txt")).unwrap(),
            "y\ny\ny\n"
        );
    }

    #[test]
    fn test_failed_stage_exit_codes() {
        let exec = |kind| StageFailure::Exec {
            stage: 0,
            program: "prog".into(),
            source: io::Error::from(kind),
        };
        assert_eq!(exec(io::ErrorKind::NotFound).exit_code(), 127);
        assert_eq!(exec(io::ErrorKind::PermissionDenied).exit_code(), 126);

        let redirect = StageFailure::Redirection {
            stage: 1,
            direction: Direction::Input,
            path: PathBuf::from("absent"),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert_eq!(redirect.exit_code(), 1);
    }

    #[test]
    fn test_exec_failure_classification() {
        assert!(is_exec_failure(&io::Error::from(io::ErrorKind::NotFound)));
        assert!(is_exec_failure(&io::Error::from_raw_os_error(Errno::ENOEXEC as i32)));
        assert!(!is_exec_failure(&io::Error::from_raw_os_error(Errno::EAGAIN as i32)));
        assert!(!is_exec_failure(&io::Error::from_raw_os_error(Errno::ENOMEM as i32)));
    }
}
