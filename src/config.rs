//! Shell configuration loaded from a TOML file.
//!
//! ```toml
//! prompt = "\\u@\\h:\\w\\$ "
//! theme = "dark"
//! history_limit = 500
//!
//! [aliases]
//! ll = "ls -l"
//! ```

use crate::alias::AliasTable;
use crate::errors::{Result, ShellError};
use crate::parser::ParserLimits;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const DEFAULT_PROMPT: &str = "\\u@\\h:\\w\\$ ";

/// Colour scheme of the prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShellConfig {
    /// Prompt format; see [`crate::prompt`] for the escapes.
    pub prompt: String,
    pub theme: Theme,
    /// Maximum number of history entries kept.
    pub history_limit: usize,
    pub max_stages: usize,
    pub max_args: usize,
    pub aliases: BTreeMap<String, String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        let limits = ParserLimits::default();
        Self {
            prompt: DEFAULT_PROMPT.to_string(),
            theme: Theme::default(),
            history_limit: 1000,
            max_stages: limits.max_stages,
            max_args: limits.max_args,
            aliases: BTreeMap::new(),
        }
    }
}

impl ShellConfig {
    /// Parse and validate a configuration document.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: ShellConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`; a missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        match fs::read_to_string(path.as_ref()) {
            Ok(contents) => Self::from_toml(&contents),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.history_limit == 0 || self.max_stages == 0 || self.max_args == 0 {
            return Err(ShellError::Config(
                "history_limit, max_stages and max_args must be positive".into(),
            ));
        }
        for name in self.aliases.keys() {
            if name.is_empty() || name.contains(|c: char| c.is_whitespace() || c == '|') {
                return Err(ShellError::Config(format!("invalid alias name '{name}'")));
            }
        }
        Ok(())
    }

    pub fn limits(&self) -> ParserLimits {
        ParserLimits {
            max_stages: self.max_stages,
            max_args: self.max_args,
        }
    }

    pub fn alias_table(&self) -> AliasTable {
        self.aliases.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
    }
}

/// `$HOME/.pipesh.toml`, or `.pipesh.toml` when `HOME` is unset.
pub fn default_config_path() -> PathBuf {
    home_file(".pipesh.toml")
}

/// `$HOME/.pipesh_history`, or `.pipesh_history` when `HOME` is unset.
pub fn default_history_path() -> PathBuf {
    home_file(".pipesh_history")
}

fn home_file(name: &str) -> PathBuf {
    env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(name))
        .unwrap_or_else(|| PathBuf::from(name))
}
