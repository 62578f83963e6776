//! MQTT 3.1.1 broker link over `rumqttc`
//!
//! The module is split into two focused sub-modules:
//!
//! - [`connection`] - Pure option construction and event/error classification
//! - [`link`] - Impure event loop driving behind the [`BrokerLink`](crate::transport::BrokerLink) seam
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqttcd::config::DaemonConfig;
//! use mqttcd::session::Session;
//! use mqttcd::transport::mqtt::MqttLink;
//!
//! # tokio_test::block_on(async {
//! let mut config = DaemonConfig::default();
//! config.subscription.topic = "sensors/#".to_string();
//!
//! let link = MqttLink::new(&config)?;
//! let mut session = Session::connect(link, config.keepalive_interval()).await?;
//! session
//!     .establish_subscription(&config.subscription.topic, config.subscription.qos)
//!     .await?;
//! session.teardown().await;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod connection;
pub mod link;
#[cfg(test)]
pub(crate) mod test_broker;

pub use connection::{configure_mqtt_options, route_event, LinkEvent, PingTracker};
pub use link::MqttLink;
