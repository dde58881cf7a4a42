//! Structured description of one input line: an ordered chain of stages.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

/// How an output redirection target is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// `>`: create the file or cut it to zero length.
    Truncate,
    /// `>>`: create the file or write after its current end.
    Append,
}

/// Output redirection of a single stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRedirect {
    /// File that replaces the stage's standard output.
    pub path: PathBuf,
    /// Whether existing content is kept.
    pub mode: WriteMode,
}

impl OutputRedirect {
    /// Open the target the way the stage's standard output expects it.
    pub fn open(&self) -> io::Result<File> {
        OpenOptions::new()
            .write(true)
            .create(true)
            .append(self.mode == WriteMode::Append)
            .truncate(self.mode == WriteMode::Truncate)
            .mode(0o644)
            .open(&self.path)
    }
}

/// One program invocation within a pipeline.
///
/// `argv[0]` is the program name; the parser never produces a stage with an
/// empty `argv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    /// Program name followed by its arguments.
    pub argv: Vec<String>,
    /// File that replaces standard input, if any.
    pub input: Option<PathBuf>,
    /// File that replaces standard output, if any.
    pub output: Option<OutputRedirect>,
}

impl Stage {
    /// Build a stage without redirections.
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            input: None,
            output: None,
        }
    }

    /// The program name (`argv[0]`), or an empty string for an empty stage.
    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    /// Everything after the program name.
    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or_default()
    }
}

/// Ordered chain of stages; stage `i` feeds stage `i + 1`.
///
/// Always holds at least one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Returns `None` for an empty stage list.
    pub fn new(stages: Vec<Stage>) -> Option<Self> {
        if stages.is_empty() {
            None
        } else {
            Some(Self { stages })
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// The stage reading from the interpreter's standard input.
    pub fn first(&self) -> &Stage {
        &self.stages[0]
    }

    /// The stage that receives the output of stage `index`, or `None` at the tail.
    pub fn next_of(&self, index: usize) -> Option<&Stage> {
        self.stages.get(index + 1)
    }
}
