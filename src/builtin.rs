use crate::command::ExitCode;
use crate::env::Environment;
use crate::lexer::Operator;
use anyhow::{Result, anyhow};
use argh::{EarlyExit, FromArgs};
use std::io::Write;
use std::marker::PhantomData;
use std::path::Path;

/// Names of the builtins installed by [`BuiltinTable::standard`], in lookup order.
pub const STANDARD_BUILTINS: [&str; 4] = ["exit", "cd", "cwd", "ver"];

/// Object-safe entry of a [`BuiltinTable`].
pub trait BuiltinHandler {
    fn name(&self) -> &str;

    /// Runs the builtin. `args[0]` is the name the user typed; `table` is
    /// the table the builtin was dispatched from.
    fn invoke(
        &self,
        args: &[String],
        stdout: &mut dyn Write,
        env: &mut Environment,
        table: &BuiltinTable,
    ) -> Result<ExitCode>;
}

/// Builtins whose arguments are parsed with [`argh`].
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "cd".
    fn name() -> &'static str;

    fn execute(
        self,
        stdout: &mut dyn Write,
        env: &mut Environment,
        table: &BuiltinTable,
    ) -> Result<ExitCode>;
}

/// Adapts a [`BuiltinCommand`] type into a table entry.
pub(crate) struct Builtin<T> {
    _phantom: PhantomData<T>,
}

impl<T> Default for Builtin<T> {
    fn default() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T: BuiltinCommand> BuiltinHandler for Builtin<T> {
    fn name(&self) -> &str {
        T::name()
    }

    fn invoke(
        &self,
        args: &[String],
        stdout: &mut dyn Write,
        env: &mut Environment,
        table: &BuiltinTable,
    ) -> Result<ExitCode> {
        let rest: Vec<&str> = args.iter().skip(1).map(String::as_str).collect();
        match T::from_args(&[T::name()], &rest) {
            Ok(cmd) => cmd.execute(stdout, env, table),
            Err(EarlyExit {
                output,
                status: Ok(()),
            }) => {
                stdout.write_all(output.as_bytes())?;
                Ok(0)
            }
            Err(EarlyExit {
                output,
                status: Err(()),
            }) => Err(anyhow!("{}", output.trim_end())),
        }
    }
}

type HandlerFn = dyn Fn(&[String], &mut dyn Write, &mut Environment) -> Result<ExitCode>;

/// A builtin backed by a closure.
struct FnBuiltin {
    name: String,
    handler: Box<HandlerFn>,
}

impl BuiltinHandler for FnBuiltin {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(
        &self,
        args: &[String],
        stdout: &mut dyn Write,
        env: &mut Environment,
        _table: &BuiltinTable,
    ) -> Result<ExitCode> {
        (self.handler)(args, stdout, env)
    }
}

/// How a typed command name is compared against builtin names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuiltinMatching {
    #[default]
    Exact,
    /// Compare only the first `min(typed, name)` bytes, so `e` and `exited`
    /// both select `exit`.
    Prefix,
}

impl BuiltinMatching {
    fn matches(self, typed: &str, name: &str) -> bool {
        match self {
            BuiltinMatching::Exact => typed == name,
            BuiltinMatching::Prefix => {
                let len = typed.len().min(name.len());
                typed.as_bytes()[..len] == name.as_bytes()[..len]
            }
        }
    }
}

/// Ordered, name-keyed commands consulted before spawning any process.
pub struct BuiltinTable {
    entries: Vec<Box<dyn BuiltinHandler>>,
    matching: BuiltinMatching,
}

impl BuiltinTable {
    pub fn new(matching: BuiltinMatching) -> Self {
        Self {
            entries: Vec::new(),
            matching,
        }
    }

    /// `exit`, `cd`, `cwd` and `ver`.
    pub fn standard(matching: BuiltinMatching) -> Self {
        let mut table = Self::new(matching);
        table.register(Box::new(Builtin::<Exit>::default()));
        table.register(Box::new(Builtin::<Cd>::default()));
        table.register(Box::new(Builtin::<Cwd>::default()));
        table.register(Box::new(Builtin::<Ver>::default()));
        table
    }

    pub fn register(&mut self, handler: Box<dyn BuiltinHandler>) {
        self.entries.push(handler);
    }

    pub fn register_fn<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&[String], &mut dyn Write, &mut Environment) -> Result<ExitCode> + 'static,
    {
        self.register(Box::new(FnBuiltin {
            name: name.into(),
            handler: Box::new(handler),
        }));
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.name()).collect()
    }

    /// First entry, in registration order, whose name matches `program`.
    pub fn lookup(&self, program: &str) -> Option<&dyn BuiltinHandler> {
        if program.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|entry| self.matching.matches(program, entry.name()))
            .map(|entry| &**entry)
    }

    /// Runs `args` as a builtin if its first element names one.
    ///
    /// Pipes and redirections do not apply to builtins: the handler only sees
    /// the arguments before the first operator. Returns `None` when no builtin
    /// matches and the command should be spawned instead.
    pub fn dispatch(
        &self,
        args: &[String],
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Option<Result<ExitCode>> {
        let handler = self.lookup(args.first()?)?;
        let end = args
            .iter()
            .position(|arg| Operator::from_token(arg).is_some())
            .unwrap_or(args.len());
        if end < args.len() {
            log::debug!("ignoring {:?} after builtin '{}'", &args[end..], handler.name());
        }
        log::debug!("dispatching {:?} to builtin '{}'", &args[..end], handler.name());
        Some(handler.invoke(&args[..end], stdout, env, self))
    }
}

impl Default for BuiltinTable {
    fn default() -> Self {
        Self::standard(BuiltinMatching::default())
    }
}

#[derive(FromArgs)]
/// Leave the shell.
pub struct Exit {
    #[argh(positional)]
    /// status the shell exits with; 0 when omitted.
    pub code: Option<ExitCode>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(
        self,
        _stdout: &mut dyn Write,
        env: &mut Environment,
        _table: &BuiltinTable,
    ) -> Result<ExitCode> {
        let code = self.code.unwrap_or(0);
        env.request_exit(code);
        Ok(code)
    }
}

#[derive(FromArgs)]
/// Change the working directory of the shell and of every later command.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to, absolute or relative to the current directory.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(
        self,
        _stdout: &mut dyn Write,
        env: &mut Environment,
        _table: &BuiltinTable,
    ) -> Result<ExitCode> {
        let target = self
            .target
            .filter(|t| !t.is_empty())
            .ok_or_else(|| anyhow!("missing operand"))?;
        env.change_dir(Path::new(&target))?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Print the current working directory.
pub struct Cwd {
    #[argh(positional, arg_name = "ignored")]
    /// extra words, accepted and ignored.
    pub ignored: Vec<String>,
}

impl BuiltinCommand for Cwd {
    fn name() -> &'static str {
        "cwd"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        env: &mut Environment,
        _table: &BuiltinTable,
    ) -> Result<ExitCode> {
        writeln!(stdout, "{}", env.current_dir.display())?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Print the shell version and the available builtins.
pub struct Ver {
    #[argh(positional, arg_name = "ignored")]
    /// extra words, accepted and ignored.
    pub ignored: Vec<String>,
}

impl BuiltinCommand for Ver {
    fn name() -> &'static str {
        "ver"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        _env: &mut Environment,
        table: &BuiltinTable,
    ) -> Result<ExitCode> {
        writeln!(stdout, "Tiny Shell v{}", env!("CARGO_PKG_VERSION"))?;
        writeln!(stdout, "Available Functions: {}", table.names().join(", "))?;
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::env as stdenv;
    use std::path::PathBuf;
    use std::sync::{Mutex, MutexGuard, OnceLock};

    fn lock_current_dir() -> MutexGuard<'static, ()> {
        static MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
        MUTEX
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn env_at(dir: PathBuf) -> Environment {
        Environment {
            vars: HashMap::new(),
            current_dir: dir,
            should_exit: false,
            exit_code: 0,
        }
    }

    fn argv(line: &str) -> Vec<String> {
        line.split(' ').map(str::to_string).collect()
    }

    fn run(table: &BuiltinTable, line: &str, env: &mut Environment) -> Option<(Result<ExitCode>, String)> {
        let mut out = Vec::new();
        let result = table.dispatch(&argv(line), &mut out, env)?;
        Some((result, String::from_utf8(out).unwrap()))
    }

    #[test]
    fn standard_table_order() {
        let table = BuiltinTable::default();
        assert_eq!(table.names(), STANDARD_BUILTINS.to_vec());
    }

    #[test]
    fn exact_matching_is_default() {
        let table = BuiltinTable::default();
        assert!(table.lookup("exit").is_some());
        assert!(table.lookup("e").is_none());
        assert!(table.lookup("exited").is_none());
        assert!(table.lookup("ls").is_none());
        assert!(table.lookup("").is_none());
    }

    #[test]
    fn prefix_matching_uses_shorter_length() {
        let table = BuiltinTable::standard(BuiltinMatching::Prefix);
        assert_eq!(table.lookup("e").map(|h| h.name()), Some("exit"));
        assert_eq!(table.lookup("exited").map(|h| h.name()), Some("exit"));
        // "c" hits "cd" first because of registration order.
        assert_eq!(table.lookup("c").map(|h| h.name()), Some("cd"));
        assert_eq!(table.lookup("cw").map(|h| h.name()), Some("cwd"));
        assert!(table.lookup("ls").is_none());
    }

    #[test]
    fn unknown_command_falls_through() {
        let mut env = env_at(PathBuf::from("/"));
        assert!(run(&BuiltinTable::default(), "ls -l", &mut env).is_none());
    }

    #[test]
    fn exit_requests_termination() {
        let mut env = env_at(PathBuf::from("/"));
        let (result, _) = run(&BuiltinTable::default(), "exit", &mut env).unwrap();
        assert_eq!(result.unwrap(), 0);
        assert!(env.should_exit);

        let mut env = env_at(PathBuf::from("/"));
        let (result, _) = run(&BuiltinTable::default(), "exit 4", &mut env).unwrap();
        assert_eq!(result.unwrap(), 4);
        assert_eq!(env.exit_code, 4);
    }

    #[test]
    fn exit_rejects_non_numeric_code() {
        let mut env = env_at(PathBuf::from("/"));
        let (result, _) = run(&BuiltinTable::default(), "exit soon", &mut env).unwrap();
        assert!(result.is_err());
        assert!(!env.should_exit);
    }

    #[test]
    fn cwd_prints_current_dir() {
        let mut env = env_at(PathBuf::from("/some/where"));
        let (result, out) = run(&BuiltinTable::default(), "cwd", &mut env).unwrap();
        assert_eq!(result.unwrap(), 0);
        assert_eq!(out, "/some/where\n");
    }

    #[test]
    fn ver_lists_builtins() {
        let mut env = env_at(PathBuf::from("/"));
        let (result, out) = run(&BuiltinTable::default(), "ver", &mut env).unwrap();
        assert_eq!(result.unwrap(), 0);
        assert!(out.starts_with("Tiny Shell v"));
        assert!(out.contains("exit, cd, cwd, ver"));
    }

    #[test]
    fn ver_reports_registered_builtins() {
        let mut table = BuiltinTable::default();
        table.register_fn("hist", |_args, _out, _env| Ok(0));
        let mut env = env_at(PathBuf::from("/"));
        let (result, out) = run(&table, "ver", &mut env).unwrap();
        assert_eq!(result.unwrap(), 0);
        assert!(out.ends_with("Available Functions: exit, cd, cwd, ver, hist\n"));
    }

    #[test]
    fn operators_are_cut_before_invocation() {
        let mut env = env_at(PathBuf::from("/some/where"));
        let table = BuiltinTable::default();

        let (result, out) = run(&table, "cwd > out.txt", &mut env).unwrap();
        assert_eq!(result.unwrap(), 0);
        assert_eq!(out, "/some/where\n");

        let (result, out) = run(&table, "ver | wc -l", &mut env).unwrap();
        assert_eq!(result.unwrap(), 0);
        assert!(out.starts_with("Tiny Shell v"));

        let (result, _) = run(&table, "exit 3 >> log", &mut env).unwrap();
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn closures_see_arguments_before_operators() {
        let mut table = BuiltinTable::new(BuiltinMatching::Exact);
        table.register_fn("count", |args, out, _env| {
            write!(out, "{}", args.len())?;
            Ok(0)
        });
        let mut env = env_at(PathBuf::from("/"));
        let (_, out) = run(&table, "count a b < in | sort", &mut env).unwrap();
        assert_eq!(out, "3");
    }

    #[test]
    fn cwd_and_ver_ignore_extra_words() {
        let mut env = env_at(PathBuf::from("/some/where"));
        let table = BuiltinTable::default();

        let (result, out) = run(&table, "cwd extra words", &mut env).unwrap();
        assert_eq!(result.unwrap(), 0);
        assert_eq!(out, "/some/where\n");

        let (result, _) = run(&table, "ver please", &mut env).unwrap();
        assert_eq!(result.unwrap(), 0);
    }

    #[test]
    fn cd_without_operand_fails() {
        let mut env = env_at(PathBuf::from("/"));
        let (result, _) = run(&BuiltinTable::default(), "cd", &mut env).unwrap();
        let err = result.unwrap_err();
        assert!(err.to_string().contains("missing operand"));
        assert_eq!(env.current_dir, PathBuf::from("/"));
    }

    #[test]
    fn cd_changes_directory() {
        let _lock = lock_current_dir();
        let before = stdenv::current_dir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("inner")).unwrap();
        let mut env = env_at(dir.path().to_path_buf());

        let (result, _) = run(&BuiltinTable::default(), "cd inner", &mut env).unwrap();
        let after = stdenv::current_dir().unwrap();
        stdenv::set_current_dir(&before).unwrap();

        assert_eq!(result.unwrap(), 0);
        let expected = dir.path().join("inner").canonicalize().unwrap();
        assert_eq!(env.current_dir, expected);
        assert_eq!(after, expected);
        assert_eq!(env.get_var("PWD"), Some(expected.to_string_lossy().into_owned()));
    }

    #[test]
    fn cd_to_missing_directory_fails() {
        let _lock = lock_current_dir();
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_at(dir.path().to_path_buf());

        let (result, _) = run(&BuiltinTable::default(), "cd nowhere", &mut env).unwrap();
        assert!(result.is_err());
        assert_eq!(env.current_dir, dir.path().to_path_buf());
    }

    #[test]
    fn closures_can_be_registered() {
        let mut table = BuiltinTable::new(BuiltinMatching::Exact);
        table.register_fn("greet", |args, out, _env| {
            writeln!(out, "hello {}", args[1..].join(" "))?;
            Ok(7)
        });
        let mut env = env_at(PathBuf::from("/"));
        let (result, out) = run(&table, "greet big world", &mut env).unwrap();
        assert_eq!(result.unwrap(), 7);
        assert_eq!(out, "hello big world\n");
    }

    #[test]
    fn help_is_printed_without_error() {
        let mut env = env_at(PathBuf::from("/"));
        let (result, out) = run(&BuiltinTable::default(), "cd --help", &mut env).unwrap();
        assert_eq!(result.unwrap(), 0);
        assert!(out.contains("Usage: cd"));
    }
}
