//! Process daemonization
//!
//! Must run before any thread is started (logging, signal handling and the
//! async runtime all come later), since only the forking thread survives in
//! the child.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::io::AsRawFd;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonizeError {
    #[error("fork failed: {0}")]
    Fork(#[source] io::Error),
    #[error("setsid failed: {0}")]
    Setsid(#[source] io::Error),
    #[error("failed to change directory to /: {0}")]
    Chdir(#[source] io::Error),
    #[error("failed to redirect standard streams: {0}")]
    Redirect(#[source] io::Error),
}

/// Which side of the fork this process is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkOutcome {
    /// Original process; should report the child pid and exit
    Parent { child: i32 },
    /// Detached daemon process; carries on with startup
    Child,
}

/// Detach from the controlling terminal.
///
/// The child starts a new session, moves to `/`, clears the umask, ignores
/// SIGCHLD and points stdin, stdout and stderr at `/dev/null`.
pub fn daemonize() -> Result<ForkOutcome, DaemonizeError> {
    // SAFETY: called while the process is still single-threaded
    let pid = unsafe { libc::fork() };
    if pid == -1 {
        return Err(DaemonizeError::Fork(io::Error::last_os_error()));
    }
    if pid != 0 {
        return Ok(ForkOutcome::Parent { child: pid });
    }

    // SAFETY: plain syscalls with no pointer arguments
    if unsafe { libc::setsid() } == -1 {
        return Err(DaemonizeError::Setsid(io::Error::last_os_error()));
    }
    std::env::set_current_dir("/").map_err(DaemonizeError::Chdir)?;
    unsafe {
        libc::umask(0);
        libc::signal(libc::SIGCHLD, libc::SIG_IGN);
    }
    redirect_standard_streams().map_err(DaemonizeError::Redirect)?;

    Ok(ForkOutcome::Child)
}

/// Point fds 0-2 at /dev/null so later sockets never reuse them
fn redirect_standard_streams() -> io::Result<()> {
    let null = OpenOptions::new().read(true).write(true).open("/dev/null")?;
    for fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        // SAFETY: both descriptors are valid for the duration of the call
        if unsafe { libc::dup2(null.as_raw_fd(), fd) } == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = DaemonizeError::Fork(io::Error::from_raw_os_error(libc::EAGAIN));
        assert!(error.to_string().starts_with("fork failed"));
    }

    #[test]
    fn test_fork_outcome_equality() {
        assert_eq!(
            ForkOutcome::Parent { child: 42 },
            ForkOutcome::Parent { child: 42 }
        );
        assert_ne!(ForkOutcome::Parent { child: 42 }, ForkOutcome::Child);
    }
}
