use crate::assembler::{self, FatalParseError};
use crate::builtin::BuiltinTable;
use crate::command::ExitCode;
use crate::config::ShellConfig;
use crate::env::Environment;
use crate::lexer::{self, ValidationError};
use crate::orchestrator::{Orchestrator, OrchestratorError, PipelineOutcome};
use crate::parser::{self, SplitError};
use anyhow::Context;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::{self, BufRead, IsTerminal, Write};
use thiserror::Error;

/// Anything that stops a line from running.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Parse(#[from] FatalParseError),
    #[error(transparent)]
    Split(#[from] SplitError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

impl ShellError {
    /// Unbalanced quoting. A single-shot shell stops on these.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ShellError::Parse(_))
    }
}

/// What a successfully dispatched line turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    Builtin(ExitCode),
    Pipeline(PipelineOutcome),
}

impl Execution {
    /// Exit code, unless the pipeline was left running.
    pub fn status(&self) -> Option<ExitCode> {
        match self {
            Execution::Builtin(code) => Some(*code),
            Execution::Pipeline(outcome) => outcome.status(),
        }
    }
}

/// Reads command lines and runs them as builtins or process pipelines.
///
/// A line goes through validation, argument assembly, builtin lookup,
/// pipeline splitting and finally the [`Orchestrator`].
///
/// Example
/// ```no_run
/// use tinysh::{Interpreter, ShellConfig};
/// let mut sh = Interpreter::new(ShellConfig::default());
/// let run = sh.execute_line("echo hello | wc -c").unwrap();
/// assert_eq!(run.status(), Some(0));
/// ```
pub struct Interpreter {
    env: Environment,
    builtins: BuiltinTable,
    orchestrator: Orchestrator,
    config: ShellConfig,
}

impl Interpreter {
    /// Interpreter over the current process environment with the standard builtins.
    pub fn new(config: ShellConfig) -> Self {
        Self::with_environment(config, Environment::new())
    }

    pub fn with_environment(config: ShellConfig, env: Environment) -> Self {
        let builtins = BuiltinTable::standard(config.builtin_matching);
        Self::with_parts(config, env, builtins)
    }

    /// Interpreter with an injected builtin table.
    pub fn with_parts(config: ShellConfig, env: Environment, builtins: BuiltinTable) -> Self {
        Self {
            env,
            builtins,
            orchestrator: Orchestrator::new(),
            config,
        }
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    pub fn builtins_mut(&mut self) -> &mut BuiltinTable {
        &mut self.builtins
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn orchestrator_mut(&mut self) -> &mut Orchestrator {
        &mut self.orchestrator
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    /// True once `exit` has run.
    pub fn should_exit(&self) -> bool {
        self.env.should_exit
    }

    /// Runs one line; builtin output goes to the process standard output.
    pub fn execute_line(&mut self, line: &str) -> Result<Execution, ShellError> {
        self.execute_line_with_output(line, &mut io::stdout())
    }

    /// Runs one line, sending builtin output to `stdout`.
    ///
    /// Spawned stages always inherit the process streams unless redirected.
    /// A failing builtin prints its diagnostic and yields code 1.
    pub fn execute_line_with_output(
        &mut self,
        line: &str,
        stdout: &mut dyn Write,
    ) -> Result<Execution, ShellError> {
        let line = line.trim_end_matches(['\n', '\r']);
        if line.chars().count() > self.config.max_input {
            return Err(ValidationError::InputTooLong {
                limit: self.config.max_input,
            }
            .into());
        }

        lexer::validate(line)?;
        let args = assembler::assemble(line)?;

        if let Some(result) = self.builtins.dispatch(&args, stdout, &mut self.env) {
            let code = result.unwrap_or_else(|err| {
                eprintln!("tinysh: {}: {err:#}", args[0]);
                1
            });
            return Ok(Execution::Builtin(code));
        }

        let pipeline = parser::split(&args)?;
        let outcome = self
            .orchestrator
            .run(&pipeline, self.config.wait_mode, &self.env)?;
        log::debug!("pipeline finished as {outcome:?}");
        Ok(Execution::Pipeline(outcome))
    }

    /// Runs according to the configuration and returns the shell's exit status.
    pub fn run(&mut self) -> anyhow::Result<ExitCode> {
        if self.config.interactive {
            self.repl()
        } else {
            self.run_once()
        }
    }

    /// Prints the prompt, runs exactly one line and returns.
    ///
    /// Unbalanced quoting is returned as an error; every other failure is
    /// reported on stderr and the shell still succeeds. Pipelines started in
    /// async mode are left running.
    pub fn run_once(&mut self) -> anyhow::Result<ExitCode> {
        let mut input = LineSource::open()?;
        let line = input
            .read_line(&self.config.prompt)
            .context("error in reading input")?;
        match self.execute_line(&line) {
            Ok(_) => {}
            Err(err) if err.is_fatal() => return Err(err.into()),
            Err(err) => report(&err),
        }
        Ok(self.exit_status())
    }

    /// Reads lines until end of input or `exit`.
    ///
    /// Every error, unbalanced quoting included, is reported and the loop
    /// goes on. Finished async stages are reaped before each prompt and all
    /// remaining ones when the loop ends.
    pub fn repl(&mut self) -> anyhow::Result<ExitCode> {
        let mut input = LineSource::open()?;

        while !self.env.should_exit {
            for (pid, status) in self.orchestrator.processes_mut().reap_finished() {
                log::info!("process {pid} exited with status {status}");
            }

            match input.read_line(&self.config.prompt) {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if let Err(err) = self.execute_line(&line) {
                        report(&err);
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(err) => {
                    self.shutdown();
                    return Err(err).context("error in reading input");
                }
            }
        }

        self.shutdown();
        Ok(self.exit_status())
    }

    /// Waits for every process still in the table.
    pub fn shutdown(&mut self) {
        let table = self.orchestrator.processes_mut();
        if !table.is_empty() {
            log::debug!("waiting for {} remaining process(es)", table.len());
        }
        for (pid, status) in table.reap_all() {
            log::info!("process {pid} exited with status {status}");
        }
    }

    fn exit_status(&self) -> ExitCode {
        if self.env.should_exit {
            self.env.exit_code
        } else {
            0
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(ShellConfig::default())
    }
}

/// Where lines come from.
///
/// Line editing only makes sense on a terminal. Piped input is read directly
/// so the prompt is still written to standard output.
enum LineSource {
    Editor(DefaultEditor),
    Piped(io::StdinLock<'static>),
}

impl LineSource {
    fn open() -> anyhow::Result<Self> {
        let stdin = io::stdin();
        if stdin.is_terminal() {
            Ok(LineSource::Editor(DefaultEditor::new()?))
        } else {
            Ok(LineSource::Piped(stdin.lock()))
        }
    }

    /// Prints `prompt` and reads one line without its terminator.
    fn read_line(&mut self, prompt: &str) -> Result<String, ReadlineError> {
        match self {
            LineSource::Editor(editor) => {
                let line = editor.readline(prompt)?;
                if !line.trim().is_empty() {
                    editor.add_history_entry(line.as_str())?;
                }
                Ok(line)
            }
            LineSource::Piped(stdin) => {
                let mut stdout = io::stdout().lock();
                stdout.write_all(prompt.as_bytes())?;
                stdout.flush()?;

                let mut line = String::new();
                if stdin.read_line(&mut line)? == 0 {
                    return Err(ReadlineError::Eof);
                }
                let len = line.trim_end_matches(['\n', '\r']).len();
                line.truncate(len);
                Ok(line)
            }
        }
    }
}

fn report(err: &ShellError) {
    eprintln!("tinysh: {err}");
}
