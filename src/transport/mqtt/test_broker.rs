//! Scripted MQTT 3.1.1 broker on a local TCP socket
//!
//! Accepts one client, answers CONNECT, SUBSCRIBE and PINGREQ according to
//! a [`BrokerScript`] and records the type of every packet it receives.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::Instant;

pub const CONNECT: u8 = 0x10;
pub const SUBSCRIBE: u8 = 0x80;
pub const PINGREQ: u8 = 0xC0;
pub const DISCONNECT: u8 = 0xE0;

/// How the broker answers
#[derive(Debug, Clone)]
pub struct BrokerScript {
    /// CONNACK return code; non-zero closes the connection after sending it
    pub connack_code: u8,
    /// SUBACK return code; 0x80 rejects the filter
    pub suback_code: u8,
    /// Publish sent between receiving SUBSCRIBE and sending SUBACK
    pub publish_before_suback: Option<(String, Vec<u8>)>,
    /// Steady publish stream started after CONNACK
    pub publish_every: Option<(Duration, String)>,
    /// PINGRESP delay; `None` never answers
    pub pingresp_delay: Option<Duration>,
}

impl Default for BrokerScript {
    fn default() -> Self {
        Self {
            connack_code: 0,
            suback_code: 0,
            publish_before_suback: None,
            publish_every: None,
            pingresp_delay: Some(Duration::ZERO),
        }
    }
}

/// Packet types the broker has received, in order
#[derive(Debug, Clone, Default)]
pub struct Received {
    packets: Arc<Mutex<Vec<u8>>>,
}

impl Received {
    fn push(&self, packet_type: u8) {
        self.packets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(packet_type);
    }

    pub fn count(&self, packet_type: u8) -> usize {
        self.packets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|p| **p == packet_type)
            .count()
    }

    /// Wait until at least one packet of this type has arrived
    pub async fn wait_for(&self, packet_type: u8, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            if self.count(packet_type) > 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.count(packet_type) > 0
    }
}

/// Bind on an ephemeral port and serve one client in the background
pub async fn spawn(script: BrokerScript) -> std::io::Result<(u16, Received)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let received = Received::default();
    let record = received.clone();

    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            let _ = serve(stream, script, record).await;
        }
    });
    Ok((port, received))
}

async fn serve(stream: TcpStream, script: BrokerScript, record: Received) -> std::io::Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if writer.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    loop {
        let header = reader.read_u8().await?;
        let body = read_body(&mut reader).await?;
        let packet_type = header & 0xF0;
        record.push(packet_type);

        match packet_type {
            CONNECT => {
                let _ = tx.send(vec![0x20, 0x02, 0x00, script.connack_code]);
                if script.connack_code != 0 {
                    return Ok(());
                }
                if let Some((every, topic)) = script.publish_every.clone() {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let mut ticker = tokio::time::interval(every);
                        loop {
                            ticker.tick().await;
                            if tx.send(publish(&topic, b"tick")).is_err() {
                                break;
                            }
                        }
                    });
                }
            }
            SUBSCRIBE => {
                if let Some((topic, payload)) = &script.publish_before_suback {
                    let _ = tx.send(publish(topic, payload));
                }
                let (id_hi, id_lo) = (body[0], body[1]);
                let _ = tx.send(vec![0x90, 0x03, id_hi, id_lo, script.suback_code]);
            }
            PINGREQ => {
                if let Some(delay) = script.pingresp_delay {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(vec![0xD0, 0x00]);
                    });
                }
            }
            DISCONNECT => return Ok(()),
            _ => {}
        }
    }
}

async fn read_body<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut remaining = 0usize;
    let mut shift = 0;
    loop {
        let byte = reader.read_u8().await?;
        remaining |= ((byte & 0x7F) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0; remaining];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

/// QoS 0 PUBLISH frame
pub fn publish(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(2 + topic.len() + payload.len());
    body.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    body.extend_from_slice(topic.as_bytes());
    body.extend_from_slice(payload);

    let mut frame = vec![0x30];
    let mut remaining = body.len();
    loop {
        let mut byte = (remaining % 128) as u8;
        remaining /= 128;
        if remaining > 0 {
            byte |= 0x80;
        }
        frame.push(byte);
        if remaining == 0 {
            break;
        }
    }
    frame.extend_from_slice(&body);
    frame
}
