//! PID file guard.
//!
//! One enforcer per host is assumed; the PID file turns a second instance
//! into a startup error instead of two agents rewriting the same chains.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;

/// Removes its PID file when dropped.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Write the current PID to `path`.
    ///
    /// A leftover file whose process no longer exists is replaced. A file
    /// owned by a live process is an error.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        match write_pid_file(&path) {
            Ok(()) => {}
            Err(e) if is_stale(&path) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "replacing stale PID file"
                );
                fs::remove_file(&path)?;
                write_pid_file(&path)?;
            }
            Err(e) => return Err(e),
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        remove_pid_file(&self.path);
    }
}

/// Write the current process PID to a file.
///
/// # Security
///
/// - `create_new(true)` makes creation atomic
/// - the created file must be a regular file
/// - the parent directory is created with mode 0o700, the file with 0o600
pub fn write_pid_file(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            let mut builder = fs::DirBuilder::new();
            builder.mode(0o700).recursive(true);
            builder.create(parent)?;
        }
        #[cfg(not(unix))]
        {
            fs::create_dir_all(parent)?;
        }
    }

    let pid = std::process::id();

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing_pid = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_owned());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing_pid.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    if !file.metadata()?.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file",
            path.display()
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    writeln!(file, "{}", pid)?;

    tracing::info!(pid = pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file. Failures are logged, never returned.
pub fn remove_pid_file(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        tracing::warn!(
            path = %path.display(),
            error = %e,
            "failed to remove PID file"
        );
    }
}

/// Read the PID stored in `path`, if it parses.
pub fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn is_stale(path: &Path) -> bool {
    match read_pid(path) {
        Some(pid) => pid != std::process::id() && !is_process_alive(pid),
        None => false,
    }
}

/// Check if a process with the given PID is alive.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }

    // SAFETY: kill(2) with signal 0 performs only the existence and permission check
    let result = unsafe { libc::kill(pid, 0) };
    if result == 0 {
        true
    } else {
        // EPERM: the process exists but belongs to someone else
        std::io::Error::last_os_error().kind() == ErrorKind::PermissionDenied
    }
}

#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    true
}
