//! Daemon-level errors and process exit codes
//!
//! Every startup failure and every loop termination reason maps to exactly
//! one [`ExitStatus`]. A signal-requested shutdown exits with success.

use crate::config::ConfigError;
use crate::daemon::DaemonizeError;
use crate::session::TerminationReason;
use crate::sink::SinkError;
use crate::transport::{ConnectError, SubscribeError};
use thiserror::Error;

/// Fatal errors that stop the daemon before or instead of the receive loop
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Daemonization failed: {0}")]
    Daemonize(#[from] DaemonizeError),

    #[error("Failed to install signal handlers: {0}")]
    SignalSetup(#[source] std::io::Error),

    #[error("Failed to open log file: {0}")]
    LoggerOpen(#[source] std::io::Error),

    #[error("Failed to open message output: {0}")]
    OutputOpen(#[source] SinkError),

    #[error("Connect failed: {0}")]
    Connect(#[from] ConnectError),

    #[error("Subscribe failed: {0}")]
    Subscribe(#[from] SubscribeError),

    #[error("Failed to start async runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

impl DaemonError {
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            DaemonError::Config(_) => ExitStatus::ArgumentParseFailed,
            DaemonError::Daemonize(_) => ExitStatus::ForkFailed,
            DaemonError::SignalSetup(_) => ExitStatus::SignalSetupFailed,
            DaemonError::LoggerOpen(_) | DaemonError::OutputOpen(_) => {
                ExitStatus::LoggerOpenFailed
            }
            DaemonError::Connect(_) | DaemonError::Subscribe(_) => ExitStatus::ConnectFailed,
            DaemonError::Runtime(_) => ExitStatus::RuntimeFailed,
        }
    }
}

/// Process exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Succeeded,
    ArgumentParseFailed,
    ForkFailed,
    SignalSetupFailed,
    LoggerOpenFailed,
    ConnectFailed,
    ConnectionLost,
    RuntimeFailed,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Succeeded => 0,
            ExitStatus::ArgumentParseFailed => 1,
            ExitStatus::ForkFailed => 2,
            ExitStatus::SignalSetupFailed => 3,
            ExitStatus::LoggerOpenFailed => 4,
            ExitStatus::ConnectFailed => 5,
            ExitStatus::ConnectionLost => 6,
            ExitStatus::RuntimeFailed => 7,
        }
    }

    /// Exit status for the way the receive loop ended
    pub fn for_termination(reason: &TerminationReason) -> Self {
        match reason {
            TerminationReason::SignalRequested => ExitStatus::Succeeded,
            TerminationReason::TransportFailure(_) | TerminationReason::KeepaliveFailure(_) => {
                ExitStatus::ConnectionLost
            }
        }
    }
}

/// Result type for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;
