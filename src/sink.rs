//! Destinations for received message payloads
//!
//! A sink borrows each message for the duration of one loop iteration and
//! must not keep it. Sink failures are logged by the loop and never end it.

use crate::transport::InboundMessage;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to write message: {0}")]
    Io(#[from] io::Error),
}

/// Consumer of received messages
pub trait MessageSink: Send {
    fn deliver(&mut self, message: &InboundMessage) -> Result<(), SinkError>;
}

/// Drops every payload unread
#[derive(Debug, Default)]
pub struct DiscardSink;

impl MessageSink for DiscardSink {
    fn deliver(&mut self, _message: &InboundMessage) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Reports each message as a structured log event
#[derive(Debug, Default)]
pub struct TracingSink;

impl MessageSink for TracingSink {
    fn deliver(&mut self, message: &InboundMessage) -> Result<(), SinkError> {
        info!(
            target: "mqttcd::message",
            topic = %message.topic,
            qos = ?message.qos,
            retain = message.retain,
            bytes = message.payload.len(),
            "message received"
        );
        debug!(
            target: "mqttcd::message",
            payload = %String::from_utf8_lossy(&message.payload),
            "message payload"
        );
        Ok(())
    }
}

/// Appends `timestamp<TAB>topic<TAB>payload` lines to a file
#[derive(Debug)]
pub struct FileSink {
    file: File,
}

impl FileSink {
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }
}

impl MessageSink for FileSink {
    fn deliver(&mut self, message: &InboundMessage) -> Result<(), SinkError> {
        let line = format_line(
            &chrono::Utc::now().to_rfc3339(),
            &message.topic,
            &message.payload,
        );
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        Ok(())
    }
}

/// One output line; newlines in the payload are escaped to keep one message per line
fn format_line(timestamp: &str, topic: &str, payload: &[u8]) -> String {
    let text = String::from_utf8_lossy(payload)
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('\r', "\\r");
    format!("{timestamp}\t{topic}\t{text}\n")
}
