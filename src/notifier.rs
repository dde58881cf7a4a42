//! Reporting children that finish outside the orchestrator's own wait.
//!
//! The `SIGCHLD` handler does nothing but write one byte to a non-blocking
//! self-pipe. A dedicated thread blocks on the read end, reaps every child
//! that can be reaped without blocking, and hands one line per child to a
//! [`rustyline::ExternalPrinter`], which prints above the prompt and redraws
//! it.
//!
//! Reaping happens only while the [`ReapGate`] is held. The orchestrator holds
//! the same gate from its first spawn to its last wait, so a child started by
//! the orchestrator is always reaped by the orchestrator.

use crate::errors::{Result, ShellError};
use nix::errno::Errno;
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::libc;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use rustyline::ExternalPrinter;
use std::fmt;
use std::io::{self, PipeReader, Read};
use std::os::fd::{AsRawFd, IntoRawFd};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use tracing::{debug, info, warn};

/// Write end of the self-pipe, or -1 before installation.
static WAKE_FD: AtomicI32 = AtomicI32::new(-1);

/// Serializes reaping between the orchestrator and the notifier.
#[derive(Debug, Clone, Default)]
pub struct ReapGate(Arc<Mutex<()>>);

impl ReapGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until no one else is reaping.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// How a reaped child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildOutcome {
    Exited(i32),
    Signaled(i32),
}

/// One reaped child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildReport {
    pub pid: i32,
    pub outcome: ChildOutcome,
}

impl fmt::Display for ChildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.outcome {
            ChildOutcome::Exited(code) => {
                write!(f, "[+] Job {} exited with status {}", self.pid, code)
            }
            ChildOutcome::Signaled(signal) => {
                write!(f, "[+] Job {} terminated by signal {}", self.pid, signal)
            }
        }
    }
}

/// Reap every child that has already changed state, without blocking.
///
/// Callers hold the [`ReapGate`].
pub fn reap_available() -> Vec<ChildReport> {
    let mut reports = Vec::new();
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(pid, code)) => reports.push(ChildReport {
                pid: pid.as_raw(),
                outcome: ChildOutcome::Exited(code),
            }),
            Ok(WaitStatus::Signaled(pid, signal, _)) => reports.push(ChildReport {
                pid: pid.as_raw(),
                outcome: ChildOutcome::Signaled(signal as i32),
            }),
            Ok(WaitStatus::StillAlive) => break,
            Ok(other) => debug!(status = ?other, "ignoring child state change"),
            Err(Errno::EINTR) => continue,
            // ECHILD: nothing left to reap.
            Err(_) => break,
        }
    }
    reports
}

extern "C" fn on_sigchld(_signal: libc::c_int) {
    let fd = WAKE_FD.load(Ordering::Relaxed);
    if fd < 0 {
        return;
    }
    let saved = Errno::last_raw();
    let byte = 1u8;
    // SAFETY: write(2) is async-signal-safe; the fd stays open for the life of
    // the process once published. A full pipe already guarantees a wakeup.
    unsafe {
        libc::write(fd, (&byte as *const u8).cast(), 1);
    }
    Errno::set_raw(saved);
}

extern "C" fn on_sigint(_signal: libc::c_int) {}

/// Keep an interrupt from terminating the interpreter itself.
///
/// Children get the default disposition back when they exec.
pub fn ignore_interrupts() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_sigint),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // SAFETY: the handler touches nothing.
    unsafe { sigaction(Signal::SIGINT, &action) }?;
    Ok(())
}

/// Handle to the running notifier thread.
pub struct CompletionNotifier {
    _thread: thread::JoinHandle<()>,
}

impl CompletionNotifier {
    /// Install the `SIGCHLD` handler and start the reporting thread.
    ///
    /// Only one notifier can exist per process.
    pub fn install<P>(gate: ReapGate, printer: P) -> Result<Self>
    where
        P: ExternalPrinter + Send + 'static,
    {
        let (reader, writer) = io::pipe()?;
        fcntl(writer.as_raw_fd(), FcntlArg::F_SETFL(OFlag::O_NONBLOCK))?;

        let raw = writer.into_raw_fd();
        if WAKE_FD
            .compare_exchange(-1, raw, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // SAFETY: `raw` was just released by `into_raw_fd` and never shared.
            unsafe { libc::close(raw) };
            return Err(ShellError::NotifierInstalled);
        }

        let action = SigAction::new(
            SigHandler::Handler(on_sigchld),
            SaFlags::SA_RESTART | SaFlags::SA_NOCLDSTOP,
            SigSet::empty(),
        );
        // SAFETY: the handler only performs an async-signal-safe write.
        unsafe { sigaction(Signal::SIGCHLD, &action) }?;

        let thread = thread::Builder::new()
            .name("completion-notifier".into())
            .spawn(move || report_loop(reader, gate, printer))?;
        debug!("completion notifier installed");

        Ok(Self { _thread: thread })
    }
}

fn report_loop<P: ExternalPrinter>(mut wake: PipeReader, gate: ReapGate, mut printer: P) {
    let mut buf = [0u8; 64];
    loop {
        match wake.read(&mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(error = %e, "completion notifier stopped");
                break;
            }
        }

        let reports = {
            let _gate = gate.lock();
            reap_available()
        };
        for report in reports {
            info!(pid = report.pid, outcome = ?report.outcome, "child finished");
            if let Err(e) = printer.print(report.to_string()) {
                warn!(error = %e, "failed to print child report");
            }
        }
    }
}

/// Prints reports on stderr when no line editor is attached.
#[derive(Debug, Default)]
pub struct StderrPrinter;

impl ExternalPrinter for StderrPrinter {
    fn print(&mut self, msg: String) -> rustyline::Result<()> {
        eprintln!("{msg}");
        Ok(())
    }
}
