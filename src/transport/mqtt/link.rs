//! Impure I/O for the MQTT link
//!
//! Drives the `rumqttc` event loop directly from the session thread. No
//! background task is spawned: every call polls the event loop under its
//! own bounded wait and returns once the awaited event is seen.
//!
//! PINGREQ frames come only from `rumqttc`'s keepalive timer, which fires
//! while the loop is being polled. `rumqttc` fails the connection if a
//! second ping goes out before the first is answered, so `send_keepalive`
//! never injects one; it checks the observed PINGREQ/PINGRESP exchange.

use super::connection::{
    configure_mqtt_options, connect_error, route_event, to_rumqttc_qos, transport_error,
    LinkEvent, PingTracker,
};
use crate::config::{DaemonConfig, QosLevel};
use crate::transport::{
    BrokerLink, ConnectError, InboundMessage, SubscribeError, SubscriptionAck, TransportError,
};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, EventLoop};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Capacity of the client request channel
const REQUEST_CAPACITY: usize = 10;

/// Why driving the event loop stopped without the awaited event
enum DriveError {
    Released,
    Connection(ConnectionError),
}

/// `rumqttc`-backed broker link
pub struct MqttLink {
    client: Option<AsyncClient>,
    event_loop: Option<EventLoop>,
    /// Publishes that arrived while waiting for some other event
    buffered: VecDeque<InboundMessage>,
    /// Bound for CONNACK, SUBACK and the DISCONNECT flush
    handshake_timeout: Duration,
    keepalive_interval: Duration,
    pings: PingTracker,
}

impl MqttLink {
    pub fn new(config: &DaemonConfig) -> Result<Self, ConnectError> {
        let options = configure_mqtt_options(config)?;
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);

        Ok(Self {
            client: Some(client),
            event_loop: Some(event_loop),
            buffered: VecDeque::new(),
            handshake_timeout: config.connect_timeout(),
            keepalive_interval: config.keepalive_interval(),
            pings: PingTracker::default(),
        })
    }

    /// Poll the event loop until `accept` returns a value or `wait` elapses.
    ///
    /// Publishes seen on the way are buffered for later `poll` calls.
    async fn drive<T, F>(&mut self, wait: Duration, mut accept: F) -> Result<Option<T>, DriveError>
    where
        F: FnMut(&LinkEvent) -> Option<T> + Send,
        T: Send,
    {
        let event_loop = self.event_loop.as_mut().ok_or(DriveError::Released)?;
        let buffered = &mut self.buffered;
        let pings = &mut self.pings;

        let driven = tokio::time::timeout(wait, async {
            loop {
                let event = route_event(event_loop.poll().await?);
                trace!(target: "mqtt_transport", event = ?event, "event loop event");
                pings.observe(&event, Instant::now());
                let accepted = accept(&event);
                if let LinkEvent::Message(message) = event {
                    buffered.push_back(message);
                }
                if let Some(value) = accepted {
                    return Ok::<T, ConnectionError>(value);
                }
            }
        })
        .await;

        match driven {
            Ok(Ok(value)) => Ok(Some(value)),
            Ok(Err(e)) => Err(DriveError::Connection(e)),
            Err(_elapsed) => Ok(None),
        }
    }

    fn released_error() -> TransportError {
        TransportError::NotWritable(crate::session::SessionState::Disconnected)
    }
}

#[async_trait]
impl BrokerLink for MqttLink {
    async fn open(&mut self) -> Result<(), ConnectError> {
        let wait = self.handshake_timeout;
        match self
            .drive(wait, |event| {
                matches!(event, LinkEvent::ConnectionAcknowledged).then_some(())
            })
            .await
        {
            Ok(Some(())) => Ok(()),
            Ok(None) => Err(ConnectError::Timeout(wait)),
            Err(DriveError::Released) => Err(ConnectError::Network(
                "link already released".to_string(),
            )),
            Err(DriveError::Connection(e)) => Err(connect_error(&e)),
        }
    }

    async fn subscribe(
        &mut self,
        topic_filter: &str,
        qos: QosLevel,
    ) -> Result<SubscriptionAck, SubscribeError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| SubscribeError::Transport("link already released".to_string()))?;
        client
            .subscribe(topic_filter, to_rumqttc_qos(qos))
            .await
            .map_err(|e| SubscribeError::Transport(e.to_string()))?;

        let wait = self.handshake_timeout;
        let codes = match self
            .drive(wait, |event| match event {
                LinkEvent::SubscriptionAcknowledged(codes) => Some(codes.clone()),
                _ => None,
            })
            .await
        {
            Ok(Some(codes)) => codes,
            Ok(None) => return Err(SubscribeError::Timeout(wait)),
            Err(DriveError::Released) => {
                return Err(SubscribeError::Transport("link already released".to_string()))
            }
            Err(DriveError::Connection(e)) => {
                return Err(SubscribeError::Transport(e.to_string()))
            }
        };

        match codes.first() {
            Some(Some(granted_qos)) => Ok(SubscriptionAck {
                topic_filter: topic_filter.to_string(),
                granted_qos: *granted_qos,
            }),
            _ => Err(SubscribeError::Rejected(topic_filter.to_string())),
        }
    }

    async fn poll(&mut self, wait: Duration) -> Result<Option<InboundMessage>, TransportError> {
        if let Some(message) = self.buffered.pop_front() {
            return Ok(Some(message));
        }

        match self
            .drive(wait, |event| {
                matches!(event, LinkEvent::Message(_)).then_some(())
            })
            .await
        {
            Ok(Some(())) => Ok(self.buffered.pop_front()),
            Ok(None) => Ok(None),
            Err(DriveError::Released) => Err(Self::released_error()),
            Err(DriveError::Connection(e)) => Err(transport_error(&e)),
        }
    }

    async fn send_keepalive(&mut self) -> Result<(), TransportError> {
        if self.event_loop.is_none() {
            return Err(Self::released_error());
        }
        self.pings.check(Instant::now(), self.keepalive_interval)?;
        debug!(
            target: "mqtt_transport",
            pings_sent = self.pings.sent(),
            pings_acknowledged = self.pings.acknowledged(),
            "keepalive exchange current"
        );
        Ok(())
    }

    async fn send_disconnect(&mut self) -> Result<(), TransportError> {
        let client = self.client.as_ref().ok_or_else(Self::released_error)?;
        client
            .disconnect()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;

        let wait = self.handshake_timeout;
        match self
            .drive(wait, |event| {
                matches!(event, LinkEvent::DisconnectSent).then_some(())
            })
            .await
        {
            Ok(Some(())) => Ok(()),
            Ok(None) => Err(TransportError::Timeout(wait)),
            Err(DriveError::Released) => Err(Self::released_error()),
            Err(DriveError::Connection(e)) => Err(transport_error(&e)),
        }
    }

    fn release(&mut self) {
        // Dropping the event loop closes the socket
        self.client = None;
        self.event_loop = None;
        self.buffered.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mqtt::test_broker::{self, BrokerScript, DISCONNECT, PINGREQ};

    fn broker_config(port: u16) -> DaemonConfig {
        let mut config = DaemonConfig::default();
        config.broker.host = "127.0.0.1".to_string();
        config.broker.port = port;
        config.broker.client_id = Some("mqttcd-link-test".to_string());
        config.broker.connect_timeout_secs = 2;
        config.subscription.topic = "test/#".to_string();
        config.keepalive.interval_secs = 1;
        config.keepalive.poll_timeout_ms = 200;
        config
    }

    async fn open_link(script: BrokerScript) -> (MqttLink, test_broker::Received) {
        let (port, received) = test_broker::spawn(script).await.unwrap();
        let mut link = MqttLink::new(&broker_config(port)).unwrap();
        link.open().await.unwrap();
        (link, received)
    }

    fn test_config() -> DaemonConfig {
        let mut config = DaemonConfig::default();
        // Nothing listens on port 1 locally
        config.broker.port = 1;
        config.broker.connect_timeout_secs = 2;
        config.subscription.topic = "test/#".to_string();
        config
    }

    #[tokio::test]
    async fn test_link_creation() {
        let link = MqttLink::new(&test_config());
        assert!(link.is_ok());
    }

    #[tokio::test]
    async fn test_open_without_broker_fails() {
        let mut link = MqttLink::new(&test_config()).unwrap();
        let result = link.open().await;
        assert!(matches!(
            result,
            Err(ConnectError::Network(_)) | Err(ConnectError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_released_link_refuses_io() {
        let mut link = MqttLink::new(&test_config()).unwrap();
        link.release();
        link.release();

        assert!(link.poll(Duration::from_millis(10)).await.is_err());
        assert!(link.send_keepalive().await.is_err());
        assert!(link.send_disconnect().await.is_err());
        assert!(matches!(
            link.subscribe("a", QosLevel::AtMostOnce).await,
            Err(SubscribeError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_rejected_connack_is_rejection() {
        let (port, _received) = test_broker::spawn(BrokerScript {
            connack_code: 5,
            ..Default::default()
        })
        .await
        .unwrap();
        let mut link = MqttLink::new(&broker_config(port)).unwrap();

        assert!(matches!(link.open().await, Err(ConnectError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_subscribe_granted() {
        let (mut link, _received) = open_link(BrokerScript {
            suback_code: 1,
            ..Default::default()
        })
        .await;

        let ack = link
            .subscribe("test/#", QosLevel::AtLeastOnce)
            .await
            .unwrap();
        assert_eq!(ack.topic_filter, "test/#");
        assert_eq!(ack.granted_qos, QosLevel::AtLeastOnce);
    }

    #[tokio::test]
    async fn test_suback_failure_code_is_rejection() {
        let (mut link, _received) = open_link(BrokerScript {
            suback_code: 0x80,
            ..Default::default()
        })
        .await;

        assert!(matches!(
            link.subscribe("test/#", QosLevel::AtMostOnce).await,
            Err(SubscribeError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_publish_during_subscribe_is_buffered() {
        let (mut link, _received) = open_link(BrokerScript {
            publish_before_suback: Some(("test/early".to_string(), b"first".to_vec())),
            ..Default::default()
        })
        .await;

        link.subscribe("test/#", QosLevel::AtMostOnce)
            .await
            .unwrap();

        let message = link
            .poll(Duration::from_millis(200))
            .await
            .unwrap()
            .expect("buffered publish returned");
        assert_eq!(message.topic, "test/early");
        assert_eq!(&message.payload[..], b"first");
    }

    #[tokio::test]
    async fn test_idle_poll_returns_none() {
        let (mut link, _received) = open_link(BrokerScript::default()).await;
        link.subscribe("test/#", QosLevel::AtMostOnce)
            .await
            .unwrap();

        assert_eq!(link.poll(Duration::from_millis(100)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_keepalive_check_emits_nothing_and_returns_at_once() {
        let (mut link, received) = open_link(BrokerScript::default()).await;
        link.subscribe("test/#", QosLevel::AtMostOnce)
            .await
            .unwrap();

        let checked = tokio::time::timeout(Duration::from_millis(50), link.send_keepalive()).await;

        assert!(matches!(checked, Ok(Ok(()))));
        assert_eq!(received.count(PINGREQ), 0);
    }

    #[tokio::test]
    async fn test_unanswered_ping_ends_session() {
        let (mut link, received) = open_link(BrokerScript {
            pingresp_delay: None,
            ..Default::default()
        })
        .await;
        link.subscribe("test/#", QosLevel::AtMostOnce)
            .await
            .unwrap();

        // rumqttc pings after 1 s; nothing answers it
        let deadline = Instant::now() + Duration::from_secs(4);
        let mut failed = false;
        while Instant::now() < deadline {
            let polled = link.poll(Duration::from_millis(200)).await;
            let checked = link.send_keepalive().await;
            if polled.is_err() || checked.is_err() {
                failed = true;
                break;
            }
        }

        assert!(failed);
        assert!(received.count(PINGREQ) >= 1);
    }

    #[tokio::test]
    async fn test_disconnect_reaches_broker() {
        let (mut link, received) = open_link(BrokerScript::default()).await;
        link.subscribe("test/#", QosLevel::AtMostOnce)
            .await
            .unwrap();

        link.send_disconnect().await.unwrap();
        link.release();

        assert!(received.wait_for(DISCONNECT, Duration::from_secs(1)).await);
    }
}
