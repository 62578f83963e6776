//! Steady-state receive loop
//!
//! Each iteration runs, in this order and exactly once each:
//!
//! 1. shutdown check (exit before any further work)
//! 2. one bounded poll for an inbound message
//! 3. one keepalive scheduler tick, sending a keepalive when due
//!
//! Whatever ends the loop, the session is torn down before `run` returns.

use super::{DisconnectOutcome, KeepaliveScheduler, Session};
use crate::signal::ShutdownLatch;
use crate::sink::MessageSink;
use crate::transport::{BrokerLink, TransportError};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Why the receive loop stopped
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationReason {
    /// Operator requested shutdown; not an error
    SignalRequested,
    /// Poll reported a fatal transport failure
    TransportFailure(TransportError),
    /// Keepalive could not be sent; the connection is not trusted any more
    KeepaliveFailure(TransportError),
}

impl TerminationReason {
    pub fn is_error(&self) -> bool {
        !matches!(self, TerminationReason::SignalRequested)
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::SignalRequested => write!(f, "shutdown requested"),
            TerminationReason::TransportFailure(e) => write!(f, "transport failure: {e}"),
            TerminationReason::KeepaliveFailure(e) => write!(f, "keepalive failure: {e}"),
        }
    }
}

/// Summary of one loop run
#[derive(Debug, Clone, PartialEq)]
pub struct LoopReport {
    pub reason: TerminationReason,
    /// Iterations that got past the shutdown check
    pub iterations: u64,
    pub messages: u64,
    pub keepalives: u64,
    pub disconnect: DisconnectOutcome,
}

/// Drives a subscribed session until shutdown or a fatal error
#[derive(Debug, Clone)]
pub struct ReceiveLoop {
    poll_timeout: Duration,
}

impl ReceiveLoop {
    /// `poll_timeout` bounds each poll and therefore the shutdown latency
    pub fn new(poll_timeout: Duration) -> Self {
        Self { poll_timeout }
    }

    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    pub async fn run<L: BrokerLink>(
        &self,
        session: &mut Session<L>,
        scheduler: &mut KeepaliveScheduler,
        shutdown: &ShutdownLatch,
        sink: &mut dyn MessageSink,
    ) -> LoopReport {
        let mut iterations = 0u64;
        let mut messages = 0u64;
        let mut keepalives = 0u64;

        let reason = loop {
            if shutdown.is_requested() {
                break TerminationReason::SignalRequested;
            }
            iterations += 1;

            match session.poll(self.poll_timeout).await {
                Ok(Some(message)) => {
                    messages += 1;
                    if let Err(e) = sink.deliver(&message) {
                        warn!(topic = %message.topic, error = %e, "message sink failed");
                    }
                }
                Ok(None) => {}
                Err(e) => break TerminationReason::TransportFailure(e),
            }

            if scheduler.tick() {
                let sent = session.send_keepalive().await;
                scheduler.reset();
                match sent {
                    Ok(()) => keepalives += 1,
                    Err(e) => break TerminationReason::KeepaliveFailure(e),
                }
            }
        };

        if reason.is_error() {
            error!(reason = %reason, iterations, "receive loop terminated");
        } else {
            info!(reason = %reason, iterations, "receive loop stopped");
        }

        let disconnect = session.teardown().await;
        debug!(messages, keepalives, "session torn down");

        LoopReport {
            reason,
            iterations,
            messages,
            keepalives,
            disconnect,
        }
    }
}
