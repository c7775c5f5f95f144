//! A tiny shell that runs one command line as a pipeline of processes.
//!
//! A line is validated by [`lexer`], turned into arguments by [`assembler`],
//! checked against the builtin table and otherwise cut into stages by
//! [`parser`]. The [`orchestrator`] then wires the stages together with pipes,
//! applies file redirections and waits for the result.
//!
//! The main entry point is [`Interpreter`]; [`ShellConfig`] carries the
//! settings the binary builds from its command line.

pub mod assembler;
pub mod builtin;
pub mod command;
pub mod config;
pub mod env;
mod external;
pub mod interpreter;
pub mod lexer;
pub mod orchestrator;
pub mod parser;

/// Convenient re-exports of the line runner and its settings.
pub use config::ShellConfig;
pub use interpreter::{Execution, Interpreter, ShellError};
