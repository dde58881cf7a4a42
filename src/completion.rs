//! Tab completion for the line editor.

use crate::builtin;
use crate::external::is_executable_file;
use rustyline::completion::{Completer, FilenameCompleter, Pair};
use rustyline::{Context, Helper, Highlighter, Hinter, Validator};
use std::collections::BTreeSet;
use std::env;
use std::fs;

/// Completes program names in command position and file names elsewhere.
#[derive(Helper, Hinter, Highlighter, Validator)]
pub struct ShellHelper {
    files: FilenameCompleter,
}

impl ShellHelper {
    pub fn new() -> Self {
        Self {
            files: FilenameCompleter::new(),
        }
    }
}

impl Default for ShellHelper {
    fn default() -> Self {
        Self::new()
    }
}

impl Completer for ShellHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let head = &line[..pos];
        let start = word_start(head);
        if is_command_position(&head[..start]) {
            let candidates = command_candidates(&head[start..])
                .into_iter()
                .map(|name| Pair {
                    display: name.clone(),
                    replacement: name,
                })
                .collect();
            return Ok((start, candidates));
        }
        self.files.complete(line, pos, ctx)
    }
}

/// Byte offset where the word under the cursor begins.
fn word_start(head: &str) -> usize {
    head.char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace() || *c == '|')
        .map_or(0, |(i, c)| i + c.len_utf8())
}

/// True when the text before the current word ends a stage boundary.
fn is_command_position(before: &str) -> bool {
    let before = before.trim_end();
    before.is_empty() || before.ends_with('|')
}

/// Builtins and executables on `PATH` starting with `prefix`, sorted.
pub fn command_candidates(prefix: &str) -> Vec<String> {
    let mut names: BTreeSet<String> = builtin::names()
        .filter(|name| name.starts_with(prefix))
        .map(str::to_string)
        .collect();

    if let Some(paths) = env::var_os("PATH") {
        for dir in env::split_paths(&paths) {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let Ok(name) = entry.file_name().into_string() else {
                    continue;
                };
                if name.starts_with(prefix) && is_executable_file(&entry.path()) {
                    names.insert(name);
                }
            }
        }
    }
    names.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_start() {
        assert_eq!(word_start(""), 0);
        assert_eq!(word_start("ec"), 0);
        assert_eq!(word_start("ls -"), 3);
        assert_eq!(word_start("ls|gr"), 3);
        assert_eq!(word_start("ls | gr"), 5);
    }

    #[test]
    fn test_command_position() {
        assert!(is_command_position(""));
        assert!(is_command_position("ls |"));
        assert!(is_command_position("ls | "));
        assert!(!is_command_position("ls "));
        assert!(!is_command_position("cat < "));
    }

    #[test]
    fn test_builtins_are_candidates() {
        let names = command_candidates("hel");
        assert!(names.contains(&"help".to_string()));
        assert!(names.iter().all(|name| name.starts_with("hel")));
    }

    #[test]
    fn test_path_executables_are_candidates() {
        assert!(command_candidates("s").contains(&"sh".to_string()));
    }
}
