//! Prompt rendering.
//!
//! Escapes: `\u` user name, `\h` host name, `\w` working directory, `\$` `#`
//! for root and `$` otherwise, `\\` a backslash. Any other escape is kept as
//! written.

use crate::config::{ShellConfig, Theme};
use nix::unistd::{Uid, User, gethostname, geteuid};
use std::env;

const RESET: &str = "\x1b[0m";

struct Palette {
    user: &'static str,
    host: &'static str,
    path: &'static str,
}

impl Palette {
    fn for_theme(theme: Theme) -> Self {
        match theme {
            Theme::Light => Palette {
                user: "\x1b[1;32m",
                host: "\x1b[1;34m",
                path: "\x1b[1;35m",
            },
            Theme::Dark => Palette {
                user: "\x1b[0;32m",
                host: "\x1b[0;34m",
                path: "\x1b[0;35m",
            },
        }
    }
}

/// Values substituted into the prompt format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptContext {
    pub user: String,
    pub host: String,
    pub cwd: String,
    pub is_root: bool,
}

impl PromptContext {
    /// Snapshot of the current process.
    pub fn current() -> Self {
        let euid = geteuid();
        let user = User::from_uid(Uid::current())
            .ok()
            .flatten()
            .map(|user| user.name)
            .or_else(|| env::var("USER").ok())
            .unwrap_or_else(|| "user".to_string());
        let host = gethostname()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_default();
        let cwd = env::current_dir()
            .map(|dir| dir.display().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            user,
            host,
            cwd,
            is_root: euid.is_root(),
        }
    }
}

/// Render the configured prompt for the current process.
pub fn render(config: &ShellConfig) -> String {
    render_with(&config.prompt, config.theme, &PromptContext::current())
}

pub fn render_with(format: &str, theme: Theme, ctx: &PromptContext) -> String {
    let palette = Palette::for_theme(theme);
    let mut out = String::with_capacity(format.len() + 32);
    let mut chars = format.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('u') => push_coloured(&mut out, palette.user, &ctx.user),
            Some('h') => push_coloured(&mut out, palette.host, &ctx.host),
            Some('w') => push_coloured(&mut out, palette.path, &ctx.cwd),
            Some('$') => out.push(if ctx.is_root { '#' } else { '$' }),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn push_coloured(out: &mut String, colour: &str, text: &str) {
    out.push_str(colour);
    out.push_str(text);
    out.push_str(RESET);
}
