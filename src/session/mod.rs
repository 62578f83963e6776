//! Broker session lifecycle
//!
//! A [`Session`] owns one broker link for its whole lifetime and moves
//! through an explicit state machine:
//!
//! ```text
//! Disconnected --connect--> Connected --subscribe--> Subscribed
//!      ^                                                  |
//!      +------(release)------ Terminating <--disconnect---+
//! ```
//!
//! Any fatal transport error moves the session straight to `Terminating`.
//! Every exit path ends in [`Session::teardown`].

use crate::config::QosLevel;
use crate::transport::{
    BrokerLink, ConnectError, InboundMessage, SubscribeError, SubscriptionAck, TransportError,
};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub mod keepalive;
pub mod receive_loop;

pub use keepalive::{KeepaliveCadence, KeepaliveScheduler};
pub use receive_loop::{LoopReport, ReceiveLoop, TerminationReason};

/// Exactly one of these holds for a session at any time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    Subscribed,
    Terminating,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connected => "connected",
            SessionState::Subscribed => "subscribed",
            SessionState::Terminating => "terminating",
        };
        f.write_str(name)
    }
}

/// Inputs to the session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// CONNACK accepted
    Opened,
    /// SUBACK accepted
    SubscriptionAcked,
    /// Teardown started
    DisconnectRequested,
    /// Transport reported an unrecoverable failure
    FatalError,
    /// Transport handle dropped
    Released,
}

impl SessionState {
    /// Total transition function (pure)
    ///
    /// Events that do not apply to the current state leave it unchanged.
    pub fn next(self, event: SessionEvent) -> SessionState {
        use SessionEvent as E;
        use SessionState as S;

        match (self, event) {
            (S::Disconnected, E::Opened) => S::Connected,
            (S::Connected, E::SubscriptionAcked) => S::Subscribed,
            (S::Disconnected, E::DisconnectRequested | E::FatalError) => S::Disconnected,
            (_, E::DisconnectRequested | E::FatalError) => S::Terminating,
            (_, E::Released) => S::Disconnected,
            (state, E::Opened | E::SubscriptionAcked) => state,
        }
    }
}

/// What teardown achieved, reported to the logging collaborator
#[derive(Debug, Clone, PartialEq)]
pub enum DisconnectOutcome {
    /// DISCONNECT frame reached the transport
    Graceful,
    /// Transport was no longer writable, frame skipped
    FrameSkipped,
    /// Frame send failed; resources were released regardless
    FrameFailed(TransportError),
    /// Session had already been released
    AlreadyDisconnected,
}

/// One broker session over an exclusively owned link
pub struct Session<L: BrokerLink> {
    link: L,
    state: SessionState,
    keepalive_interval: Duration,
    /// When CONNECT went out; the broker's keepalive window starts here
    opened_at: Instant,
    topic_filter: Option<String>,
    writable: bool,
    disconnect_sent: bool,
}

impl<L: BrokerLink> Session<L> {
    /// Open the link and complete the protocol handshake.
    ///
    /// No retries happen here; on failure the link is released and the
    /// error returned to the caller.
    pub async fn connect(mut link: L, keepalive_interval: Duration) -> Result<Self, ConnectError> {
        let opened_at = Instant::now();
        match link.open().await {
            Ok(()) => {
                info!(
                    keepalive_secs = keepalive_interval.as_secs(),
                    "connected to broker"
                );
                Ok(Self {
                    link,
                    state: SessionState::Disconnected.next(SessionEvent::Opened),
                    keepalive_interval,
                    opened_at,
                    topic_filter: None,
                    writable: true,
                    disconnect_sent: false,
                })
            }
            Err(e) => {
                error!(error = %e, "broker connection failed");
                link.release();
                Err(e)
            }
        }
    }

    /// Subscribe to the topic filter. Valid exactly once, from `Connected`.
    pub async fn establish_subscription(
        &mut self,
        topic_filter: &str,
        qos: QosLevel,
    ) -> Result<SubscriptionAck, SubscribeError> {
        if self.state != SessionState::Connected {
            return Err(SubscribeError::InvalidState(self.state));
        }

        match self.link.subscribe(topic_filter, qos).await {
            Ok(ack) => {
                self.transition(SessionEvent::SubscriptionAcked);
                self.topic_filter = Some(ack.topic_filter.clone());
                info!(
                    topic = %ack.topic_filter,
                    requested_qos = %qos,
                    granted_qos = %ack.granted_qos,
                    "subscription established"
                );
                Ok(ack)
            }
            Err(e) => {
                error!(topic = %topic_filter, error = %e, "subscription failed");
                if matches!(e, SubscribeError::Transport(_) | SubscribeError::Timeout(_)) {
                    self.writable = false;
                }
                self.transition(SessionEvent::FatalError);
                Err(e)
            }
        }
    }

    /// Wait a bounded time for one inbound message
    pub async fn poll(&mut self, wait: Duration) -> Result<Option<InboundMessage>, TransportError> {
        if self.state != SessionState::Subscribed {
            return Err(TransportError::NotWritable(self.state));
        }
        let result = self.link.poll(wait).await;
        if result.is_err() {
            self.mark_failed();
        }
        result
    }

    /// Send one keepalive frame
    pub async fn send_keepalive(&mut self) -> Result<(), TransportError> {
        if !self.writable || self.state == SessionState::Disconnected {
            return Err(TransportError::NotWritable(self.state));
        }
        match self.link.send_keepalive().await {
            Ok(()) => {
                debug!("keepalive sent");
                Ok(())
            }
            Err(e) => {
                self.mark_failed();
                Err(e)
            }
        }
    }

    /// Best-effort protocol disconnect notice over the still-open link
    pub async fn finalize(&mut self) {
        if self.state == SessionState::Disconnected || !self.writable || self.disconnect_sent {
            return;
        }
        match self.link.send_disconnect().await {
            Ok(()) => {
                self.disconnect_sent = true;
                debug!("disconnect notice sent");
            }
            Err(e) => {
                warn!(error = %e, "failed to send disconnect notice");
            }
        }
        self.writable = false;
    }

    /// Send a disconnect frame if still possible, then release the link.
    ///
    /// Idempotent: a second call reports `AlreadyDisconnected` and releases nothing.
    pub async fn disconnect(&mut self) -> DisconnectOutcome {
        if self.state == SessionState::Disconnected {
            return DisconnectOutcome::AlreadyDisconnected;
        }
        self.transition(SessionEvent::DisconnectRequested);

        let outcome = if self.disconnect_sent {
            DisconnectOutcome::Graceful
        } else if !self.writable {
            DisconnectOutcome::FrameSkipped
        } else {
            match self.link.send_disconnect().await {
                Ok(()) => {
                    self.disconnect_sent = true;
                    DisconnectOutcome::Graceful
                }
                Err(e) => {
                    warn!(error = %e, "disconnect frame not sent");
                    DisconnectOutcome::FrameFailed(e)
                }
            }
        };

        self.writable = false;
        self.link.release();
        self.transition(SessionEvent::Released);
        info!(outcome = ?outcome, "disconnected from broker");
        outcome
    }

    /// The single teardown routine every exit path goes through
    pub async fn teardown(&mut self) -> DisconnectOutcome {
        self.finalize().await;
        self.disconnect().await
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn keepalive_interval(&self) -> Duration {
        self.keepalive_interval
    }

    /// Start of the first keepalive interval
    pub fn keepalive_epoch(&self) -> Instant {
        self.opened_at
    }

    /// Topic filter acknowledged by the broker, once subscribed
    pub fn topic_filter(&self) -> Option<&str> {
        self.topic_filter.as_deref()
    }

    /// Get the underlying link for testing
    pub fn link(&self) -> &L {
        &self.link
    }

    fn mark_failed(&mut self) {
        self.writable = false;
        self.transition(SessionEvent::FatalError);
    }

    fn transition(&mut self, event: SessionEvent) {
        let next = self.state.next(event);
        if next != self.state {
            debug!(from = %self.state, to = %next, event = ?event, "session state change");
        }
        self.state = next;
    }
}

impl<L: BrokerLink> Drop for Session<L> {
    fn drop(&mut self) {
        // No async teardown in Drop; just make sure the transport is not leaked
        if self.state != SessionState::Disconnected {
            self.link.release();
        }
    }
}
