//! Runs a [`Pipeline`] as a chain of child processes.
//!
//! All `N - 1` pipes are created before the first stage starts. Every pipe
//! end is an [`OwnedFd`] with close-on-exec set: the end handed to a stage
//! moves into that stage's [`Command`] and is closed in the parent when the
//! command is dropped right after the spawn. Children only ever see the ends
//! duplicated onto their standard input and output.

use crate::command::{ExitCode, ProcessId, exit_code};
use crate::env::Environment;
use crate::external::{find_program, is_exec_failure};
use crate::parser::{ArgumentVector, Pipeline};
use nix::unistd;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use thiserror::Error;

/// Whether [`Orchestrator::run`] waits for the pipeline to finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitMode {
    /// Block until the last stage exits.
    #[default]
    Sync,
    /// Return once the last stage is spawned. Stages stay in the process
    /// table until reaped.
    Async,
}

/// Result of a pipeline whose stages were all spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed { pid: ProcessId, status: ExitCode },
    Detached { pid: ProcessId },
}

impl PipelineOutcome {
    /// Process identifier of the last stage.
    pub fn pid(&self) -> ProcessId {
        match *self {
            PipelineOutcome::Completed { pid, .. } | PipelineOutcome::Detached { pid } => pid,
        }
    }

    /// Exit code of the last stage, if it was waited for.
    pub fn status(&self) -> Option<ExitCode> {
        match *self {
            PipelineOutcome::Completed { status, .. } => Some(status),
            PipelineOutcome::Detached { .. } => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("cannot create pipe {index}: {source}")]
    PipeCreateFailed {
        index: usize,
        #[source]
        source: nix::Error,
    },
    #[error("unable to create a process for stage {stage} ('{program}'): {source}")]
    SpawnFailed {
        stage: usize,
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("unable to execute '{program}' (stage {stage}): {source}")]
    ExecFailed {
        stage: usize,
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("unable to redirect stage {stage} to {}: {source}", path.display())]
    RedirectFailed {
        stage: usize,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to wait for process {pid}: {source}")]
    WaitFailed {
        pid: ProcessId,
        #[source]
        source: io::Error,
    },
}

/// Both ends of one inter-stage pipe. An end becomes `None` once a stage owns it.
struct PipeEnds {
    read: Option<OwnedFd>,
    write: Option<OwnedFd>,
}

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd"
))]
fn cloexec_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
    unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd"
)))]
fn cloexec_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
    use nix::fcntl::{FcntlArg, FdFlag, fcntl};
    use std::os::fd::AsRawFd;

    let (read, write) = unistd::pipe()?;
    for fd in [&read, &write] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    }
    Ok((read, write))
}

/// Creates `count` pipes, failing on the first one that cannot be made.
///
/// On failure the pipes created so far are closed as they drop.
fn create_pipes(count: usize) -> Result<Vec<PipeEnds>, OrchestratorError> {
    (0..count)
        .map(|index| {
            let (read, write) =
                cloexec_pipe().map_err(|source| OrchestratorError::PipeCreateFailed { index, source })?;
            Ok(PipeEnds {
                read: Some(read),
                write: Some(write),
            })
        })
        .collect()
}

fn open_input(stage: usize, path: PathBuf) -> Result<File, OrchestratorError> {
    File::open(&path).map_err(|source| OrchestratorError::RedirectFailed {
        stage,
        path,
        source,
    })
}

fn open_output(stage: usize, path: PathBuf, append: bool) -> Result<File, OrchestratorError> {
    let mut options = OpenOptions::new();
    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    options
        .create(true)
        .open(&path)
        .map_err(|source| OrchestratorError::RedirectFailed {
            stage,
            path,
            source,
        })
}

/// Every child spawned by an [`Orchestrator`] that has not been reaped yet.
#[derive(Debug, Default)]
pub struct ProcessTable {
    children: Vec<Child>,
}

impl ProcessTable {
    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn pids(&self) -> Vec<ProcessId> {
        self.children.iter().map(Child::id).collect()
    }

    pub fn contains(&self, pid: ProcessId) -> bool {
        self.children.iter().any(|child| child.id() == pid)
    }

    fn track(&mut self, child: Child) {
        self.children.push(child);
    }

    fn take(&mut self, pid: ProcessId) -> Option<Child> {
        let position = self.children.iter().position(|child| child.id() == pid)?;
        Some(self.children.remove(position))
    }

    /// Blocks until `pid` exits and removes it from the table.
    ///
    /// A pid the table does not know is reported as `WaitFailed`.
    pub fn wait(&mut self, pid: ProcessId) -> Result<ExitCode, OrchestratorError> {
        let mut child = self.take(pid).ok_or_else(|| OrchestratorError::WaitFailed {
            pid,
            source: io::Error::new(io::ErrorKind::NotFound, "not a tracked process"),
        })?;
        let status = child
            .wait()
            .map_err(|source| OrchestratorError::WaitFailed { pid, source })?;
        log::debug!("reaped {pid} with {status}");
        Ok(exit_code(status))
    }

    /// Reaps the children that have already exited, without blocking.
    pub fn reap_finished(&mut self) -> Vec<(ProcessId, ExitCode)> {
        let mut reaped = Vec::new();
        let mut running = Vec::with_capacity(self.children.len());
        for mut child in self.children.drain(..) {
            let pid = child.id();
            match child.try_wait() {
                Ok(Some(status)) => {
                    log::debug!("reaped {pid} with {status}");
                    reaped.push((pid, exit_code(status)));
                }
                Ok(None) => running.push(child),
                Err(err) => log::warn!("dropping process {pid}, cannot poll it: {err}"),
            }
        }
        self.children = running;
        reaped
    }

    /// Blocks until every tracked child has exited.
    pub fn reap_all(&mut self) -> Vec<(ProcessId, ExitCode)> {
        let mut reaped = Vec::with_capacity(self.children.len());
        for mut child in self.children.drain(..) {
            let pid = child.id();
            match child.wait() {
                Ok(status) => {
                    log::debug!("reaped {pid} with {status}");
                    reaped.push((pid, exit_code(status)));
                }
                Err(err) => log::warn!("failed to wait for process {pid}: {err}"),
            }
        }
        reaped
    }

    /// Kills and reaps `pids`. Used to tear down a partially spawned pipeline.
    fn terminate(&mut self, pids: &[ProcessId]) {
        for &pid in pids {
            let Some(mut child) = self.take(pid) else {
                continue;
            };
            if let Err(err) = child.kill() {
                log::debug!("kill {pid}: {err}");
            }
            if let Err(err) = child.wait() {
                log::warn!("failed to reap torn down process {pid}: {err}");
            }
        }
    }
}

/// Spawns pipelines and keeps track of their processes.
#[derive(Debug, Default)]
pub struct Orchestrator {
    table: ProcessTable,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.table
    }

    pub fn processes_mut(&mut self) -> &mut ProcessTable {
        &mut self.table
    }

    /// Spawns every stage of `pipeline` left to right, connected by pipes.
    ///
    /// The first stage reads from `pipeline.input_file` when set and the last
    /// one writes to `pipeline.output_file`; relative paths are resolved
    /// against `env.current_dir`. If any stage cannot be started, no later
    /// stage is spawned, the stages started by this call are killed and
    /// reaped, and the stage's error is returned.
    pub fn run(
        &mut self,
        pipeline: &Pipeline,
        mode: WaitMode,
        env: &Environment,
    ) -> Result<PipelineOutcome, OrchestratorError> {
        let stage_count = pipeline.len();
        let mut pipes = create_pipes(stage_count.saturating_sub(1))?;
        let mut spawned = Vec::with_capacity(stage_count);

        for (index, argv) in pipeline.stages().iter().enumerate() {
            match self.start_stage(pipeline, index, argv, &mut pipes, env) {
                Ok(pid) => spawned.push(pid),
                Err(err) => {
                    if !spawned.is_empty() {
                        log::warn!("tearing down {} already spawned stage(s)", spawned.len());
                    }
                    self.table.terminate(&spawned);
                    return Err(err);
                }
            }
        }

        let (&pid, upstream) = spawned
            .split_last()
            .expect("a pipeline always has at least one stage");

        match mode {
            WaitMode::Async => Ok(PipelineOutcome::Detached { pid }),
            WaitMode::Sync => {
                let status = self.table.wait(pid)?;
                for &stage_pid in upstream {
                    self.table.wait(stage_pid)?;
                }
                Ok(PipelineOutcome::Completed { pid, status })
            }
        }
    }

    fn start_stage(
        &mut self,
        pipeline: &Pipeline,
        index: usize,
        argv: &ArgumentVector,
        pipes: &mut [PipeEnds],
        env: &Environment,
    ) -> Result<ProcessId, OrchestratorError> {
        let is_last = index + 1 == pipeline.len();

        let stdin = if index == 0 {
            match pipeline.input() {
                Some(path) => Stdio::from(open_input(index, env.resolve(path))?),
                None => Stdio::inherit(),
            }
        } else {
            pipes[index - 1]
                .read
                .take()
                .map_or_else(Stdio::inherit, Stdio::from)
        };

        let stdout = if is_last {
            match pipeline.output() {
                Some(path) => Stdio::from(open_output(
                    index,
                    env.resolve(path),
                    pipeline.append_output,
                )?),
                None => Stdio::inherit(),
            }
        } else {
            pipes[index]
                .write
                .take()
                .map_or_else(Stdio::inherit, Stdio::from)
        };

        let child = spawn(index, argv, stdin, stdout, env)?;
        let pid = child.id();
        log::debug!("stage {index} '{}' running as {pid}", argv.program());
        self.table.track(child);
        Ok(pid)
    }
}

fn spawn(
    stage: usize,
    argv: &ArgumentVector,
    stdin: Stdio,
    stdout: Stdio,
    env: &Environment,
) -> Result<Child, OrchestratorError> {
    let program = argv.program();
    let executable = find_program(&env.search_path(), &env.current_dir, program).ok_or_else(|| {
        OrchestratorError::ExecFailed {
            stage,
            program: program.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "command not found"),
        }
    })?;

    let mut command = Command::new(&executable);
    command
        .arg0(program)
        .args(argv.args())
        .stdin(stdin)
        .stdout(stdout)
        .envs(env.vars.iter())
        .current_dir(&env.current_dir);

    let spawned = command.spawn();
    // The parent's copies of this stage's pipe ends close here, before the
    // next stage is spawned.
    drop(command);

    spawned.map_err(|source| {
        let program = program.to_string();
        if is_exec_failure(&source) {
            OrchestratorError::ExecFailed {
                stage,
                program,
                source,
            }
        } else {
            OrchestratorError::SpawnFailed {
                stage,
                program,
                source,
            }
        }
    })
}
