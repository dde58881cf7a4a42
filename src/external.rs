//! Locating the executable behind a stage's program name.

use std::borrow::Cow;
use std::env;
use std::ffi::OsStr;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

/// Resolve `program` against the interpreter's current `PATH`.
///
/// A missing `PATH` behaves like an empty one: only names containing a slash
/// can be found.
pub fn resolve_program(program: &str) -> io::Result<PathBuf> {
    let search_paths = env::var_os("PATH").unwrap_or_default();
    find_command_path(&search_paths, Path::new(program))
        .map(Cow::into_owned)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "command not found"))
}

/// Resolve a program path the way `execvp` does.
///
/// - A name with a slash (`/bin/sh`, `./run`, `bin/tool`) is used as is,
///   relative to the current directory, if it exists.
/// - A bare name is looked up in each directory of `search_paths`, in order;
///   the first executable regular file wins.
/// - An empty name resolves to nothing.
pub fn find_command_path<'a>(search_paths: &OsStr, path: &'a Path) -> Option<Cow<'a, Path>> {
    let mut components = path.components();
    match (components.next(), components.next()) {
        (None, _) => None,
        (Some(Component::Normal(single)), None) => {
            find_in_path(search_paths, single).map(Cow::Owned)
        }
        _ => path.exists().then_some(Cow::Borrowed(path)),
    }
}

fn find_in_path(search_paths: &OsStr, program: &OsStr) -> Option<PathBuf> {
    env::split_paths(search_paths)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable_file(candidate))
}

/// True for a regular file with any execute bit set.
pub(crate) fn is_executable_file(path: &Path) -> bool {
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
