use crate::builtin::BuiltinMatching;
use crate::orchestrator::WaitMode;
use argh::FromArgs;

/// Prompt printed before a line is read.
pub const DEFAULT_PROMPT: &str = "TinyShell>$ ";

/// Longest accepted line, in characters, after the newline is stripped.
pub const MAX_INPUT: usize = 99;

#[derive(FromArgs, Debug, Default, PartialEq, Eq)]
/// Read a command line, run it as a pipeline of processes and exit.
pub struct Cli {
    #[argh(switch, short = 'i')]
    /// keep reading lines until end of input or `exit`.
    pub interactive: bool,

    #[argh(switch, short = 'a', long = "async")]
    /// do not wait for pipelines to finish.
    pub detach: bool,

    #[argh(switch)]
    /// let any prefix of a builtin name select that builtin.
    pub prefix_builtins: bool,

    #[argh(option)]
    /// prompt printed before each line.
    pub prompt: Option<String>,

    #[argh(option)]
    /// longest accepted line, in characters.
    pub max_input: Option<usize>,
}

/// Settings of one [`Interpreter`](crate::Interpreter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellConfig {
    pub prompt: String,
    pub max_input: usize,
    pub wait_mode: WaitMode,
    pub builtin_matching: BuiltinMatching,
    pub interactive: bool,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT.to_string(),
            max_input: MAX_INPUT,
            wait_mode: WaitMode::Sync,
            builtin_matching: BuiltinMatching::Exact,
            interactive: false,
        }
    }
}

impl From<Cli> for ShellConfig {
    fn from(cli: Cli) -> Self {
        let defaults = ShellConfig::default();
        Self {
            prompt: cli.prompt.unwrap_or(defaults.prompt),
            max_input: cli.max_input.unwrap_or(defaults.max_input),
            wait_mode: if cli.detach {
                WaitMode::Async
            } else {
                WaitMode::Sync
            },
            builtin_matching: if cli.prefix_builtins {
                BuiltinMatching::Prefix
            } else {
                BuiltinMatching::Exact
            },
            interactive: cli.interactive,
        }
    }
}
