//! Shutdown latch set from signal delivery
//!
//! The latch is a single atomic boolean. The signal handler installed by
//! [`ShutdownLatch::install_signal_handlers`] only performs an atomic store,
//! which is async-signal-safe; the receive loop reads it once per iteration.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Process-wide shutdown request flag. Once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct ShutdownLatch {
    flag: Arc<AtomicBool>,
}

impl ShutdownLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Idempotent; performs no allocation or blocking.
    pub fn request_shutdown(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Route SIGINT and SIGTERM to this latch
    pub fn install_signal_handlers(&self) -> io::Result<()> {
        for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
            signal_hook::flag::register(signal, Arc::clone(&self.flag))?;
        }
        debug!("signal handlers installed for SIGINT and SIGTERM");
        Ok(())
    }
}
