//! In-memory command history with optional file persistence.

use crate::errors::Result;
use std::collections::VecDeque;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Submitted lines, oldest first, bounded by a capacity policy that evicts
/// the oldest entry.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<String>,
    capacity: usize,
    path: Option<PathBuf>,
}

impl History {
    /// History kept only in memory.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            path: None,
        }
    }

    /// History backed by `path`. Existing entries are loaded; a missing file
    /// starts an empty history that is created on [`History::save`].
    pub fn with_file(path: impl Into<PathBuf>, capacity: usize) -> Result<Self> {
        let path = path.into();
        let mut history = Self::new(capacity);
        match fs::read_to_string(&path) {
            Ok(contents) => {
                for line in contents.lines() {
                    history.push(line.trim_end_matches('\r'));
                }
                debug!(path = %path.display(), entries = history.len(), "loaded history");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        history.path = Some(path);
        Ok(history)
    }

    /// Record a submitted line.
    ///
    /// Empty lines and a repeat of the most recent entry are ignored.
    pub fn record(&mut self, line: &str) {
        if line.is_empty() || self.entries.back().is_some_and(|last| last == line) {
            return;
        }
        self.push(line);
    }

    fn push(&mut self, line: &str) {
        if line.is_empty() {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(line.to_string());
    }

    /// Write every entry to the backing file, one per line.
    ///
    /// Does nothing for an in-memory history or an empty one.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if self.entries.is_empty() {
            return Ok(());
        }
        let mut file = io::BufWriter::new(fs::File::create(path)?);
        for entry in &self.entries {
            writeln!(file, "{entry}")?;
        }
        file.flush()?;
        debug!(path = %path.display(), entries = self.entries.len(), "saved history");
        Ok(())
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
