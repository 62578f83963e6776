//! Pure connection configuration and event routing for the MQTT link
//!
//! This module contains pure functions: option construction from the daemon
//! configuration, QoS conversion, and classification of `rumqttc` events and
//! errors into what the session cares about.

use crate::config::{DaemonConfig, QosLevel};
use crate::transport::{ConnectError, InboundMessage, TransportError};
use rumqttc::{ConnectionError, Event, MqttOptions, Outgoing, Packet, QoS, SubscribeReasonCode};
use std::time::Duration;
use tokio::time::Instant;

/// Build `rumqttc` options from the daemon configuration
pub fn configure_mqtt_options(config: &DaemonConfig) -> Result<MqttOptions, ConnectError> {
    let host = config.broker.host.trim();
    if host.is_empty() || host.contains(char::is_whitespace) {
        return Err(ConnectError::InvalidAddress(config.broker.host.clone()));
    }
    if config.broker.port == 0 {
        return Err(ConnectError::InvalidAddress(format!("{host}:0")));
    }

    let mut options = MqttOptions::new(config.client_id(), host, config.broker.port);
    // rumqttc pings on this interval regardless of traffic; it is the only PINGREQ source
    options.set_keep_alive(config.keepalive_interval());
    options.set_clean_session(true);

    if let Some(username) = &config.broker.username {
        let password = config.broker.password.clone().unwrap_or_default();
        options.set_credentials(username, password);
    }

    Ok(options)
}

pub fn to_rumqttc_qos(qos: QosLevel) -> QoS {
    match qos {
        QosLevel::AtMostOnce => QoS::AtMostOnce,
        QosLevel::AtLeastOnce => QoS::AtLeastOnce,
        QosLevel::ExactlyOnce => QoS::ExactlyOnce,
    }
}

pub fn from_rumqttc_qos(qos: QoS) -> QosLevel {
    match qos {
        QoS::AtMostOnce => QosLevel::AtMostOnce,
        QoS::AtLeastOnce => QosLevel::AtLeastOnce,
        QoS::ExactlyOnce => QosLevel::ExactlyOnce,
    }
}

/// What one event loop event means to the link
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    ConnectionAcknowledged,
    Message(InboundMessage),
    /// Granted QoS per filter; `None` marks a rejected filter
    SubscriptionAcknowledged(Vec<Option<QosLevel>>),
    KeepaliveSent,
    KeepaliveAcknowledged,
    DisconnectSent,
    Other,
}

/// Route an event loop event (pure routing decision)
pub fn route_event(event: Event) -> LinkEvent {
    match event {
        Event::Incoming(Packet::ConnAck(_)) => LinkEvent::ConnectionAcknowledged,
        Event::Incoming(Packet::Publish(publish)) => LinkEvent::Message(InboundMessage {
            topic: publish.topic,
            payload: publish.payload,
            qos: Some(from_rumqttc_qos(publish.qos)),
            retain: publish.retain,
        }),
        Event::Incoming(Packet::SubAck(suback)) => LinkEvent::SubscriptionAcknowledged(
            suback
                .return_codes
                .iter()
                .map(|code| match code {
                    SubscribeReasonCode::Success(qos) => Some(from_rumqttc_qos(*qos)),
                    SubscribeReasonCode::Failure => None,
                })
                .collect(),
        ),
        Event::Incoming(Packet::PingResp { .. }) => LinkEvent::KeepaliveAcknowledged,
        Event::Outgoing(Outgoing::PingReq) => LinkEvent::KeepaliveSent,
        Event::Outgoing(Outgoing::Disconnect) => LinkEvent::DisconnectSent,
        _ => LinkEvent::Other,
    }
}

/// Outstanding PINGREQ bookkeeping, fed from observed link events
#[derive(Debug, Default, Clone)]
pub struct PingTracker {
    outstanding_since: Option<Instant>,
    sent: u64,
    acknowledged: u64,
}

impl PingTracker {
    pub fn observe(&mut self, event: &LinkEvent, now: Instant) {
        match event {
            LinkEvent::KeepaliveSent => {
                self.sent += 1;
                self.outstanding_since.get_or_insert(now);
            }
            LinkEvent::KeepaliveAcknowledged => {
                self.acknowledged += 1;
                self.outstanding_since = None;
            }
            _ => {}
        }
    }

    /// Fails once a PINGREQ has gone unanswered for longer than `window`
    pub fn check(&self, now: Instant, window: Duration) -> Result<(), TransportError> {
        match self.outstanding_since {
            Some(since) if now.saturating_duration_since(since) > window => {
                Err(TransportError::Protocol(format!(
                    "PINGREQ unanswered for {:?}",
                    now.saturating_duration_since(since)
                )))
            }
            _ => Ok(()),
        }
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn acknowledged(&self) -> u64 {
        self.acknowledged
    }
}

/// Classify an event loop error raised while connecting
pub fn connect_error(error: &ConnectionError) -> ConnectError {
    match error {
        ConnectionError::ConnectionRefused(code) => ConnectError::Rejected(format!("{code:?}")),
        other => ConnectError::Network(other.to_string()),
    }
}

/// Classify an event loop error raised on an established session
pub fn transport_error(error: &ConnectionError) -> TransportError {
    match error {
        ConnectionError::MqttState(state) => TransportError::Protocol(state.to_string()),
        other => TransportError::Io(other.to_string()),
    }
}
