//! Transport layer for the broker session
//!
//! This module defines the boundary to the underlying protocol client
//! library. [`BrokerLink`] is the seam the session state machine drives;
//! [`mqtt::MqttLink`] is the production implementation over `rumqttc`.

use crate::config::QosLevel;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

pub mod mqtt;

/// One received publish event.
///
/// Owned by whoever polled it and dropped by the end of the loop iteration
/// that received it.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: Option<QosLevel>,
    pub retain: bool,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: None,
            retain: false,
        }
    }

    pub fn with_qos(mut self, qos: QosLevel) -> Self {
        self.qos = Some(qos);
        self
    }
}

/// Broker acknowledgement of a subscription request
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionAck {
    /// Topic filter the broker accepted
    pub topic_filter: String,
    /// QoS level granted by the broker (may be lower than requested)
    pub granted_qos: QosLevel,
}

/// Failure to establish the broker session
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Invalid broker address: {0}")]
    InvalidAddress(String),
    #[error("Network failure while connecting: {0}")]
    Network(String),
    #[error("Broker rejected connection: {0}")]
    Rejected(String),
    #[error("No CONNACK received within {0:?}")]
    Timeout(Duration),
    #[error("Session already connected")]
    AlreadyConnected,
}

/// Failure to establish the topic subscription
#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("Broker rejected topic filter '{0}'")]
    Rejected(String),
    #[error("Transport dropped during subscribe handshake: {0}")]
    Transport(String),
    #[error("No SUBACK received within {0:?}")]
    Timeout(Duration),
    #[error("Cannot subscribe in state {0}")]
    InvalidState(crate::session::SessionState),
}

/// Fatal transport failure on an established session
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("Connection closed by broker")]
    ClosedByBroker,
    #[error("Transport I/O failure: {0}")]
    Io(String),
    #[error("Protocol state failure: {0}")]
    Protocol(String),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Transport not available in state {0}")]
    NotWritable(crate::session::SessionState),
}

/// Boundary to the protocol client library.
///
/// Every method is driven from the single session thread; implementations
/// never spawn background tasks of their own.
#[async_trait::async_trait]
pub trait BrokerLink: Send {
    /// Open the transport and complete the CONNECT/CONNACK handshake
    async fn open(&mut self) -> Result<(), ConnectError>;

    /// Subscribe to a topic filter and wait for the broker's acknowledgement
    async fn subscribe(
        &mut self,
        topic_filter: &str,
        qos: QosLevel,
    ) -> Result<SubscriptionAck, SubscribeError>;

    /// Wait at most `wait` for one inbound publish.
    ///
    /// `Ok(None)` means the wait elapsed without a message and is not an error.
    async fn poll(&mut self, wait: Duration) -> Result<Option<InboundMessage>, TransportError>;

    /// Keep the broker's keepalive window satisfied.
    ///
    /// Links that emit PINGREQ themselves send one frame here. A link whose
    /// client library already pings on the negotiated interval must not add
    /// a second PINGREQ source; it reports whether that exchange is healthy.
    async fn send_keepalive(&mut self) -> Result<(), TransportError>;

    /// Send the protocol DISCONNECT frame
    async fn send_disconnect(&mut self) -> Result<(), TransportError>;

    /// Drop the underlying transport. Must be safe to call more than once.
    fn release(&mut self);
}
