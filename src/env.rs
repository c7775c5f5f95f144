use crate::command::ExitCode;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::env as stdenv;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

/// The interpreter's view of the process environment.
///
/// Child stages get `vars` as their environment and `current_dir` as their
/// working directory. Builtins mutate it in place.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Variables exported to every spawned stage.
    pub vars: HashMap<String, String>,
    /// Working directory for spawned stages and relative redirections.
    pub current_dir: PathBuf,
    /// Set by `exit`; the read loop stops once it sees this.
    pub should_exit: bool,
    /// Status the shell reports when it stops because of `exit`.
    pub exit_code: ExitCode,
}

impl Environment {
    /// Snapshot of the current process variables and working directory.
    pub fn new() -> Self {
        let vars = stdenv::vars().collect();
        let current_dir = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            vars,
            current_dir,
            should_exit: false,
            exit_code: 0,
        }
    }

    pub fn get_var(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .cloned()
            .or_else(|| stdenv::var(key).ok())
    }

    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.vars.insert(key.into(), val.into());
    }

    /// The `PATH` list used to resolve program names; empty when unset.
    pub fn search_path(&self) -> OsString {
        self.get_var("PATH").map(OsString::from).unwrap_or_default()
    }

    /// Anchors a relative `path` at `current_dir`.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.current_dir.join(path)
        }
    }

    /// Moves the shell (and future stages) into `target`.
    ///
    /// Updates the process working directory, `current_dir` and `PWD`.
    pub fn change_dir(&mut self, target: &Path) -> Result<&Path> {
        let new_dir = self.resolve(target);
        let canonical = fs::canonicalize(&new_dir)
            .with_context(|| format!("can't resolve {}", new_dir.display()))?;
        stdenv::set_current_dir(&canonical)
            .with_context(|| format!("can't change directory to {}", canonical.display()))?;
        self.set_var("PWD", canonical.to_string_lossy());
        self.current_dir = canonical;
        Ok(&self.current_dir)
    }

    pub fn request_exit(&mut self, code: ExitCode) {
        self.should_exit = true;
        self.exit_code = code;
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}
