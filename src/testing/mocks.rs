//! Mock implementations for testing
//!
//! [`MockLink`] replays a script of poll results and records every call made
//! through the [`BrokerLink`] seam in a shared [`CallLog`].

use crate::config::QosLevel;
use crate::signal::ShutdownLatch;
use crate::sink::{MessageSink, SinkError};
use crate::transport::{
    BrokerLink, ConnectError, InboundMessage, SubscribeError, SubscriptionAck, TransportError,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// One call made through the link seam
#[derive(Debug, Clone, PartialEq)]
pub enum LinkCall {
    Open,
    Subscribe(String, QosLevel),
    Poll,
    Keepalive,
    Disconnect,
    Release,
}

/// Scripted result of one poll
#[derive(Debug, Clone)]
pub enum PollStep {
    Message(InboundMessage),
    Idle,
    Fail(TransportError),
}

/// Shared, ordered record of link calls; survives the link being moved or dropped
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<LinkCall>>>,
}

impl CallLog {
    fn lock(&self) -> MutexGuard<'_, Vec<LinkCall>> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: LinkCall) {
        self.lock().push(call);
    }

    pub fn snapshot(&self) -> Vec<LinkCall> {
        self.lock().clone()
    }

    pub fn count(&self, call: &LinkCall) -> usize {
        self.lock().iter().filter(|c| *c == call).count()
    }

    /// For each keepalive, how many polls had happened before it
    pub fn keepalive_after_polls(&self) -> Vec<usize> {
        let mut polls = 0;
        let mut result = Vec::new();
        for call in self.lock().iter() {
            match call {
                LinkCall::Poll => polls += 1,
                LinkCall::Keepalive => result.push(polls),
                _ => {}
            }
        }
        result
    }
}

/// Scripted broker link
#[derive(Debug, Default)]
pub struct MockLink {
    calls: CallLog,
    script: VecDeque<PollStep>,
    fail_connect: bool,
    reject_subscribe: bool,
    fail_disconnect: bool,
    fail_poll_at: Option<(usize, TransportError)>,
    fail_keepalive_at: Option<usize>,
    shutdown_after: Option<(usize, ShutdownLatch)>,
    sleep_on_idle: bool,
    polls: usize,
    keepalives: usize,
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the call record, usable after the link moves into a session
    pub fn call_log(&self) -> CallLog {
        self.calls.clone()
    }

    /// Poll results in order; once exhausted every poll is idle
    pub fn with_script(mut self, steps: impl IntoIterator<Item = PollStep>) -> Self {
        self.script.extend(steps);
        self
    }

    pub fn with_connect_failure(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn with_subscribe_rejection(mut self) -> Self {
        self.reject_subscribe = true;
        self
    }

    pub fn with_disconnect_failure(mut self) -> Self {
        self.fail_disconnect = true;
        self
    }

    /// Fail the `n`th poll (1-based)
    pub fn fail_poll_at(mut self, n: usize, error: TransportError) -> Self {
        self.fail_poll_at = Some((n, error));
        self
    }

    /// Fail the `n`th keepalive attempt (1-based)
    pub fn fail_keepalive_at(mut self, n: usize) -> Self {
        self.fail_keepalive_at = Some(n);
        self
    }

    /// Set the latch once the `n`th poll has returned, as a signal arriving mid-poll would
    pub fn shutdown_after_polls(mut self, n: usize, latch: ShutdownLatch) -> Self {
        self.shutdown_after = Some((n, latch));
        self
    }

    /// Idle polls wait for the full bound instead of returning at once
    pub fn sleep_on_idle(mut self) -> Self {
        self.sleep_on_idle = true;
        self
    }
}

#[async_trait]
impl BrokerLink for MockLink {
    async fn open(&mut self) -> Result<(), ConnectError> {
        self.calls.record(LinkCall::Open);
        if self.fail_connect {
            Err(ConnectError::Rejected("mock: bad credentials".to_string()))
        } else {
            Ok(())
        }
    }

    async fn subscribe(
        &mut self,
        topic_filter: &str,
        qos: QosLevel,
    ) -> Result<SubscriptionAck, SubscribeError> {
        self.calls
            .record(LinkCall::Subscribe(topic_filter.to_string(), qos));
        if self.reject_subscribe {
            return Err(SubscribeError::Rejected(topic_filter.to_string()));
        }
        Ok(SubscriptionAck {
            topic_filter: topic_filter.to_string(),
            granted_qos: qos,
        })
    }

    async fn poll(&mut self, wait: Duration) -> Result<Option<InboundMessage>, TransportError> {
        self.calls.record(LinkCall::Poll);
        self.polls += 1;

        let step = match &self.fail_poll_at {
            Some((n, error)) if *n == self.polls => PollStep::Fail(error.clone()),
            _ => self.script.pop_front().unwrap_or(PollStep::Idle),
        };

        let result = match step {
            PollStep::Message(message) => Ok(Some(message)),
            PollStep::Idle => {
                if self.sleep_on_idle {
                    tokio::time::sleep(wait).await;
                }
                Ok(None)
            }
            PollStep::Fail(error) => Err(error),
        };

        if let Some((n, latch)) = &self.shutdown_after {
            if *n == self.polls {
                latch.request_shutdown();
            }
        }
        result
    }

    async fn send_keepalive(&mut self) -> Result<(), TransportError> {
        self.calls.record(LinkCall::Keepalive);
        self.keepalives += 1;
        if self.fail_keepalive_at == Some(self.keepalives) {
            Err(TransportError::Protocol("mock: awaiting ping response".to_string()))
        } else {
            Ok(())
        }
    }

    async fn send_disconnect(&mut self) -> Result<(), TransportError> {
        self.calls.record(LinkCall::Disconnect);
        if self.fail_disconnect {
            Err(TransportError::Io("mock: broken pipe".to_string()))
        } else {
            Ok(())
        }
    }

    fn release(&mut self) {
        self.calls.record(LinkCall::Release);
    }
}

/// Sink that keeps what it was given, optionally failing every delivery
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub delivered: Vec<InboundMessage>,
    fail: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            delivered: Vec::new(),
            fail: true,
        }
    }

    pub fn topics(&self) -> Vec<String> {
        self.delivered.iter().map(|m| m.topic.clone()).collect()
    }
}

impl MessageSink for RecordingSink {
    fn deliver(&mut self, message: &InboundMessage) -> Result<(), SinkError> {
        self.delivered.push(message.clone());
        if self.fail {
            Err(SinkError::Io(std::io::Error::other("mock: disk full")))
        } else {
            Ok(())
        }
    }
}
