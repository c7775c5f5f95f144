//! Splits an assembled argument list into pipeline stages and redirections.

use crate::lexer::Operator;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Program name followed by its arguments, in the order the user typed them.
///
/// Never empty and never holds an empty string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentVector(Vec<String>);

impl ArgumentVector {
    /// Returns `None` when `args` is empty. Empty strings are dropped.
    pub fn new<I, S>(args: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args
            .into_iter()
            .map(Into::into)
            .filter(|arg| !arg.is_empty())
            .collect();
        if args.is_empty() { None } else { Some(Self(args)) }
    }

    pub fn program(&self) -> &str {
        &self.0[0]
    }

    pub fn args(&self) -> &[String] {
        &self.0[1..]
    }
}

impl Deref for ArgumentVector {
    type Target = [String];

    fn deref(&self) -> &[String] {
        &self.0
    }
}

/// Stages connected by pipes, plus the redirections of the outer ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    stages: Vec<ArgumentVector>,
    /// Standard input of the first stage.
    pub input_file: Option<PathBuf>,
    /// Standard output of the last stage.
    pub output_file: Option<PathBuf>,
    /// Open `output_file` for appending instead of truncating it.
    pub append_output: bool,
}

impl Pipeline {
    /// Returns `None` when `stages` is empty.
    pub fn new(stages: Vec<ArgumentVector>) -> Option<Self> {
        if stages.is_empty() {
            return None;
        }
        Some(Self {
            stages,
            input_file: None,
            output_file: None,
            append_output: false,
        })
    }

    pub fn stages(&self) -> &[ArgumentVector] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always false; a pipeline has at least one stage.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn with_input(mut self, path: impl Into<PathBuf>) -> Self {
        self.input_file = Some(path.into());
        self
    }

    pub fn with_output(mut self, path: impl Into<PathBuf>, append: bool) -> Self {
        self.output_file = Some(path.into());
        self.append_output = append;
        self
    }

    pub fn input(&self) -> Option<&Path> {
        self.input_file.as_deref()
    }

    pub fn output(&self) -> Option<&Path> {
        self.output_file.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SplitError {
    #[error("stage {index} of the pipeline has no command")]
    EmptyStage { index: usize },
    #[error("{operator} is missing its filename")]
    DanglingOperator { operator: Operator },
}

struct Splitter {
    stages: Vec<ArgumentVector>,
    current: Vec<String>,
    input_file: Option<PathBuf>,
    output_file: Option<PathBuf>,
    append_output: bool,
}

impl Splitter {
    fn finish_stage(&mut self) -> Result<(), SplitError> {
        let index = self.stages.len();
        let stage = ArgumentVector::new(std::mem::take(&mut self.current))
            .ok_or(SplitError::EmptyStage { index })?;
        self.stages.push(stage);
        Ok(())
    }

    fn set_output(&mut self, target: &str, append: bool) {
        if let Some(previous) = &self.output_file {
            log::warn!(
                "output redirection to {} replaced by {target}",
                previous.display()
            );
        }
        self.output_file = Some(PathBuf::from(target));
        self.append_output = append;
    }

    fn set_input(&mut self, target: &str) {
        if let Some(previous) = &self.input_file {
            log::warn!(
                "input redirection from {} replaced by {target}",
                previous.display()
            );
        }
        self.input_file = Some(PathBuf::from(target));
    }
}

/// Partitions `args` at `|` and pulls out `<`, `>` and `>>` with their filenames.
///
/// Only the operator and its filename leave the argument stream, so
/// `sort > out -r` keeps `-r`. Redirections are recorded for the whole
/// pipeline; the orchestrator applies input to the first stage and output to
/// the last one.
pub fn split(args: &[String]) -> Result<Pipeline, SplitError> {
    let mut splitter = Splitter {
        stages: Vec::new(),
        current: Vec::new(),
        input_file: None,
        output_file: None,
        append_output: false,
    };

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match Operator::from_token(arg) {
            Some(Operator::Pipe) => splitter.finish_stage()?,
            Some(operator) => {
                let target = iter
                    .next()
                    .ok_or(SplitError::DanglingOperator { operator })?;
                if operator == Operator::RedirectIn {
                    splitter.set_input(target);
                } else {
                    splitter.set_output(target, operator == Operator::Append);
                }
            }
            None => splitter.current.push(arg.clone()),
        }
    }
    splitter.finish_stage()?;

    let Splitter {
        stages,
        input_file,
        output_file,
        append_output,
        ..
    } = splitter;
    log::debug!(
        "split into {} stage(s), input {:?}, output {:?} (append: {})",
        stages.len(),
        input_file,
        output_file,
        append_output
    );
    Ok(Pipeline {
        stages,
        input_file,
        output_file,
        append_output,
    })
}
