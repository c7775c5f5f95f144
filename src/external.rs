use nix::errno::Errno;
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};

/// Locates the executable for `program` the way `execvp` would.
///
/// - A name containing a path separator is taken as a path, relative names
///   being anchored at `cwd`.
/// - A bare name is looked up in each directory of `search_paths` in order;
///   an empty entry stands for `cwd`.
/// - Only regular files with an execute bit qualify.
pub fn find_program(search_paths: &OsStr, cwd: &Path, program: &str) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }

    let path = Path::new(program);
    if program.contains('/') {
        let candidate = if path.is_absolute() {
            path.to_path_buf()
        } else {
            cwd.join(path)
        };
        return is_executable(&candidate).then_some(candidate);
    }

    std::env::split_paths(search_paths)
        .map(|dir| {
            if dir.as_os_str().is_empty() {
                cwd.join(path)
            } else {
                dir.join(path)
            }
        })
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match path.metadata() {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// True when a spawn error came from replacing the child's image rather than
/// from creating the child.
///
/// The standard library reports the child's `exec` errno back through the
/// spawn result, so both failure kinds arrive as an [`io::Error`].
pub fn is_exec_failure(err: &io::Error) -> bool {
    match err.raw_os_error().map(Errno::from_raw) {
        Some(
            Errno::ENOENT
            | Errno::EACCES
            | Errno::ENOEXEC
            | Errno::ENOTDIR
            | Errno::ETXTBSY
            | Errno::E2BIG
            | Errno::ELOOP
            | Errno::ENAMETOOLONG
            | Errno::EISDIR,
        ) => true,
        Some(_) => false,
        None => matches!(
            err.kind(),
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
        ),
    }
}
