//! Turns a raw input line into a [`Pipeline`].
//!
//! The grammar is deliberately flat: `|` separates stages, whitespace separates
//! tokens, and `<`, `>`, `>>` each take the following token as a path. There is
//! no quoting, escaping or expansion of any kind.

use crate::pipeline::{OutputRedirect, Pipeline, Stage, WriteMode};
use std::path::PathBuf;
use thiserror::Error;

const PIPE: char = '|';
const REDIRECT_INPUT: &str = "<";
const REDIRECT_OUTPUT: &str = ">";
const REDIRECT_APPEND: &str = ">>";

/// Upper bounds applied while parsing. Exceeding one is an error, never a
/// silent truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserLimits {
    /// Maximum number of stages in one pipeline.
    pub max_stages: usize,
    /// Maximum number of argv tokens in one stage (redirections excluded).
    pub max_args: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            max_stages: 64,
            max_args: 64,
        }
    }
}

/// Errors that can occur while parsing a line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A stage between pipes is blank (`|cmd`, `cmd|`, `a||b`).
    #[error("empty stage at position {position}")]
    EmptyStage { position: usize },
    /// A redirection operator is the last token of its stage.
    #[error("missing target after `{operator}`")]
    MissingRedirectionTarget { operator: &'static str },
    /// A stage holds only redirections.
    #[error("stage {position} has no command")]
    EmptyCommand { position: usize },
    /// A stage has more argv tokens than allowed.
    #[error("too many arguments (limit is {limit})")]
    TooManyTokens { limit: usize },
    /// The line has more stages than allowed.
    #[error("too many pipeline stages (limit is {limit})")]
    TooManyStages { limit: usize },
}

struct StageBuilder<'a> {
    tokens: Vec<&'a str>,
    pos: usize,
    position: usize,
    limits: ParserLimits,
}

impl<'a> StageBuilder<'a> {
    fn new(source: &'a str, position: usize, limits: ParserLimits) -> Self {
        StageBuilder {
            tokens: source.split_whitespace().collect(),
            pos: 0,
            position,
            limits,
        }
    }

    fn consume(&mut self) -> Option<&'a str> {
        let token = self.tokens.get(self.pos).copied();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Parse a stage: (word | redirect)*
    fn build(mut self) -> Result<Stage, ParseError> {
        let mut stage = Stage::new(Vec::<String>::new());

        while let Some(token) = self.consume() {
            match token {
                REDIRECT_INPUT => {
                    stage.input = Some(self.parse_target(REDIRECT_INPUT)?);
                }
                REDIRECT_OUTPUT => {
                    stage.output = Some(OutputRedirect {
                        path: self.parse_target(REDIRECT_OUTPUT)?,
                        mode: WriteMode::Truncate,
                    });
                }
                REDIRECT_APPEND => {
                    stage.output = Some(OutputRedirect {
                        path: self.parse_target(REDIRECT_APPEND)?,
                        mode: WriteMode::Append,
                    });
                }
                word => {
                    if stage.argv.len() == self.limits.max_args {
                        return Err(ParseError::TooManyTokens {
                            limit: self.limits.max_args,
                        });
                    }
                    stage.argv.push(word.to_string());
                }
            }
        }

        if stage.argv.is_empty() {
            return Err(ParseError::EmptyCommand {
                position: self.position,
            });
        }
        Ok(stage)
    }

    /// The path following a redirection operator.
    fn parse_target(&mut self, operator: &'static str) -> Result<PathBuf, ParseError> {
        self.consume()
            .map(PathBuf::from)
            .ok_or(ParseError::MissingRedirectionTarget { operator })
    }
}

/// Parse a line using [`ParserLimits::default`].
///
/// Returns `Ok(None)` for a blank line.
pub fn parse(line: &str) -> Result<Option<Pipeline>, ParseError> {
    parse_with(line, ParserLimits::default())
}

/// Parse a line into a pipeline of stages.
///
/// A line that is empty or whitespace only yields `Ok(None)`: there is nothing
/// to run and nothing to report.
pub fn parse_with(line: &str, limits: ParserLimits) -> Result<Option<Pipeline>, ParseError> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let sources: Vec<&str> = line.split(PIPE).collect();
    if sources.len() > limits.max_stages {
        return Err(ParseError::TooManyStages {
            limit: limits.max_stages,
        });
    }

    let mut stages = Vec::with_capacity(sources.len());
    for (position, source) in sources.into_iter().enumerate() {
        if source.trim().is_empty() {
            return Err(ParseError::EmptyStage { position });
        }
        stages.push(StageBuilder::new(source, position, limits).build()?);
    }

    Ok(Pipeline::new(stages))
}
