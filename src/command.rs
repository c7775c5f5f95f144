use std::process::ExitStatus;

/// Conventional process exit code: 0 for success, anything else for failure.
pub type ExitCode = i32;

/// Operating-system identifier of a spawned stage.
pub type ProcessId = u32;

/// Folds an [`ExitStatus`] into a shell-style code.
///
/// A stage killed by a signal reports `128 + signal`.
pub fn exit_code(status: ExitStatus) -> ExitCode {
    match status.code() {
        Some(code) => code,
        None => terminated_by_signal(status),
    }
}

#[cfg(unix)]
fn terminated_by_signal(status: ExitStatus) -> ExitCode {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = status.signal() {
        128 + signal
    } else if status.core_dumped() {
        255
    } else {
        -1
    }
}

#[cfg(not(unix))]
fn terminated_by_signal(_status: ExitStatus) -> ExitCode {
    -1
}
