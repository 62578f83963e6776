//! mqttcd - MQTT subscriber daemon
//!
//! Maintains one persistent subscription to an MQTT broker: connect once,
//! subscribe once, then receive messages and send keepalives until an
//! operator asks it to stop, finishing with an orderly disconnect.
//!
//! # Overview
//!
//! - [`session`] - the session state machine, keepalive scheduler and receive loop
//! - [`transport`] - the broker link seam and its `rumqttc` implementation
//! - [`signal`] - the shutdown latch set from SIGINT/SIGTERM
//! - [`lifecycle`] - connect → subscribe → receive → teardown orchestration
//! - [`config`], [`daemon`], [`observability`], [`sink`] - process plumbing
//!
//! # Quick Start
//!
//! ```rust
//! use mqttcd::config::QosLevel;
//! use mqttcd::session::{KeepaliveCadence, KeepaliveScheduler, ReceiveLoop, Session};
//! use mqttcd::signal::ShutdownLatch;
//! use mqttcd::sink::DiscardSink;
//! use mqttcd::testing::MockLink;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let mut session = Session::connect(MockLink::new(), Duration::from_secs(60)).await?;
//! session.establish_subscription("sensors/#", QosLevel::AtLeastOnce).await?;
//!
//! let shutdown = ShutdownLatch::new();
//! shutdown.request_shutdown();
//!
//! let mut scheduler = KeepaliveScheduler::new(KeepaliveCadence::Iterations(31));
//! let report = ReceiveLoop::new(Duration::from_secs(1))
//!     .run(&mut session, &mut scheduler, &shutdown, &mut DiscardSink)
//!     .await;
//! assert_eq!(report.iterations, 0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod config;
pub mod daemon;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod session;
pub mod signal;
pub mod sink;
pub mod testing;
pub mod transport;

pub use config::{DaemonConfig, QosLevel};
pub use error::{DaemonError, DaemonResult, ExitStatus};
pub use session::{
    DisconnectOutcome, KeepaliveCadence, KeepaliveScheduler, LoopReport, ReceiveLoop, Session,
    SessionState, TerminationReason,
};
pub use signal::ShutdownLatch;
pub use transport::mqtt::MqttLink;
pub use transport::{BrokerLink, InboundMessage};
