//! Daemon lifecycle: connect, subscribe, receive, tear down
//!
//! [`run_session`] is generic over the broker link so the whole sequence can
//! be driven against a mock; [`run_daemon`] wires in the real MQTT link and
//! the configured message sink.

use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};
use crate::session::{KeepaliveScheduler, LoopReport, ReceiveLoop, Session};
use crate::signal::ShutdownLatch;
use crate::sink::{FileSink, MessageSink, TracingSink};
use crate::transport::mqtt::MqttLink;
use crate::transport::BrokerLink;
use crate::{lifecycle_span, session_span};
use tracing::{info, Instrument};

/// Run one broker session to completion.
///
/// Connect failure returns before any session exists. Subscribe failure
/// and every loop exit go through the session's single teardown routine.
pub async fn run_session<L: BrokerLink>(
    link: L,
    config: &DaemonConfig,
    shutdown: &ShutdownLatch,
    sink: &mut dyn MessageSink,
) -> DaemonResult<LoopReport> {
    let span = session_span!(
        host = %config.broker.host,
        port = config.broker.port,
        topic = %config.subscription.topic
    );
    drive_session(link, config, shutdown, sink)
        .instrument(span)
        .await
}

async fn drive_session<L: BrokerLink>(
    link: L,
    config: &DaemonConfig,
    shutdown: &ShutdownLatch,
    sink: &mut dyn MessageSink,
) -> DaemonResult<LoopReport> {
    let mut session = Session::connect(link, config.keepalive_interval()).await?;

    if let Err(e) = session
        .establish_subscription(&config.subscription.topic, config.subscription.qos)
        .await
    {
        session.teardown().await;
        return Err(DaemonError::Subscribe(e));
    }

    let mut scheduler = KeepaliveScheduler::new(config.keepalive_cadence())
        .with_lead(config.poll_timeout())
        .since(session.keepalive_epoch());
    let report = ReceiveLoop::new(config.poll_timeout())
        .run(&mut session, &mut scheduler, shutdown, sink)
        .await;

    info!(
        reason = %report.reason,
        iterations = report.iterations,
        messages = report.messages,
        keepalives = report.keepalives,
        disconnect = ?report.disconnect,
        "session finished"
    );
    Ok(report)
}

/// Build the sink the configuration asks for
pub fn open_sink(config: &DaemonConfig) -> DaemonResult<Box<dyn MessageSink>> {
    match &config.daemon.output_file {
        Some(path) => {
            let sink = FileSink::open(path).map_err(DaemonError::OutputOpen)?;
            Ok(Box::new(sink))
        }
        None => Ok(Box::new(TracingSink)),
    }
}

/// Run the daemon against the configured MQTT broker
pub async fn run_daemon(
    config: &DaemonConfig,
    shutdown: &ShutdownLatch,
) -> DaemonResult<LoopReport> {
    let mut sink = open_sink(config)?;
    let link = MqttLink::new(config)?;
    run_session(link, config, shutdown, sink.as_mut())
        .instrument(lifecycle_span!(phase = "run", client_id = %config.client_id()))
        .await
}
