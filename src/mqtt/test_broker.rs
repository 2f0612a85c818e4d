//! Scripted single-connection MQTT 3.1.1 broker for tests

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::MqttConfig;

pub(crate) const CONNECT: u8 = 1;
pub(crate) const PUBLISH: u8 = 3;
pub(crate) const SUBSCRIBE: u8 = 8;
pub(crate) const PINGREQ: u8 = 12;
pub(crate) const DISCONNECT: u8 = 14;

/// How the broker answers
#[derive(Default)]
pub(crate) struct BrokerScript {
    /// CONNACK return code (0 = accepted)
    pub connack_code: u8,
    /// SUBACK return code (0x80 = failure)
    pub suback_code: u8,
    /// `(topic, payload)` sent right after a successful SUBACK
    pub publishes: Vec<(String, Vec<u8>)>,
    /// Fired once SUBACK has been written
    pub subscribed: Option<oneshot::Sender<()>>,
}

/// A packet received from the client: packet type and body
#[derive(Debug, Clone)]
pub(crate) struct Received {
    pub kind: u8,
    pub body: Vec<u8>,
}

impl Received {
    /// Topic and payload of a QoS 0 PUBLISH
    pub fn publish(&self) -> (String, String) {
        let len = u16::from_be_bytes([self.body[0], self.body[1]]) as usize;
        let topic = String::from_utf8_lossy(&self.body[2..2 + len]).into_owned();
        let payload = String::from_utf8_lossy(&self.body[2 + len..]).into_owned();
        (topic, payload)
    }
}

/// Bind on an ephemeral port and serve one connection with `script`
///
/// The handle resolves to every packet the client sent, up to DISCONNECT or EOF.
pub(crate) async fn spawn(script: BrokerScript) -> (u16, JoinHandle<Vec<Received>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        serve(stream, script).await
    });
    (port, handle)
}

/// Client configuration pointing at a broker spawned by `spawn`
pub(crate) fn client_config(port: u16, client_id: &str) -> MqttConfig {
    MqttConfig {
        host: "127.0.0.1".to_string(),
        port,
        client_id: client_id.to_string(),
        user: None,
        password: None,
        keep_alive: Duration::from_secs(60),
        tls: None,
    }
}

/// Publish packet bytes, QoS 0
pub(crate) fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    body.extend_from_slice(topic.as_bytes());
    body.extend_from_slice(payload);
    frame(0x30, &body)
}

fn frame(header: u8, body: &[u8]) -> Vec<u8> {
    let mut packet = vec![header];
    let mut len = body.len();
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        packet.push(byte);
        if len == 0 {
            break;
        }
    }
    packet.extend_from_slice(body);
    packet
}

async fn read_packet(stream: &mut TcpStream) -> Option<Received> {
    let header = stream.read_u8().await.ok()?;
    let mut len = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await.ok()?;
        len |= ((byte & 0x7f) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0; len];
    stream.read_exact(&mut body).await.ok()?;
    Some(Received {
        kind: header >> 4,
        body,
    })
}

async fn serve(mut stream: TcpStream, mut script: BrokerScript) -> Vec<Received> {
    let mut received = Vec::new();

    match read_packet(&mut stream).await {
        Some(packet) if packet.kind == CONNECT => received.push(packet),
        _ => return received,
    }
    stream
        .write_all(&[0x20, 0x02, 0x00, script.connack_code])
        .await
        .unwrap();

    while let Some(packet) = read_packet(&mut stream).await {
        let kind = packet.kind;
        match kind {
            SUBSCRIBE => {
                let suback = [0x90, 0x03, packet.body[0], packet.body[1], script.suback_code];
                let _ = stream.write_all(&suback).await;
                if script.suback_code < 0x80 {
                    for (topic, payload) in &script.publishes {
                        let _ = stream.write_all(&publish_packet(topic, payload)).await;
                    }
                }
                if let Some(tx) = script.subscribed.take() {
                    let _ = tx.send(());
                }
            }
            PINGREQ => {
                let _ = stream.write_all(&[0xd0, 0x00]).await;
            }
            _ => {}
        }
        received.push(packet);
        if kind == DISCONNECT {
            break;
        }
    }

    received
}

pub(crate) fn kinds(received: &[Received]) -> Vec<u8> {
    received.iter().map(|packet| packet.kind).collect()
}
