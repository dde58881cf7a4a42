//! Errors of the layers around the pipeline core: configuration, history
//! persistence and signal setup.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShellError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("System call failed: {0}")]
    Sys(#[from] nix::errno::Errno),

    #[error("completion notifier is already installed")]
    NotifierInstalled,
}

pub type Result<T> = std::result::Result<T, ShellError>;
