//! MQTT subscriber session
//!
//! Subscribes on connect, prints every message and disconnects once the
//! configured message limit is reached. The event loop is polled on the
//! calling task, so message handling is never concurrent.

use std::fmt;
use std::future::Future;

use rumqttc::{Event, EventLoop, Outgoing, Packet, Publish, SubscribeReasonCode};
use tracing::{debug, info, warn};

use crate::error::MqttError;

use super::client::{drain_until_disconnected, MqttClient};

/// A decoded inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub topic: String,
    pub payload: String,
    /// Set on the message that reaches the limit
    pub limit_reached: bool,
}

impl fmt::Display for ReceivedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.topic, self.payload)
    }
}

/// How a subscriber run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// `--max-messages` messages were received and the client disconnected
    LimitReached,
    /// A shutdown signal arrived
    Interrupted,
}

/// Per-connection subscriber state
#[derive(Debug)]
pub struct SubscriberSession {
    filter: String,
    max_messages: u64,
    received: u64,
    connected: bool,
}

impl SubscriberSession {
    /// `max_messages == 0` never stops on message count
    pub fn new(filter: impl Into<String>, max_messages: u64) -> Self {
        Self {
            filter: filter.into(),
            max_messages,
            received: 0,
            connected: false,
        }
    }

    /// Record the connection and return the filter to subscribe to
    pub fn on_connected(&mut self) -> &str {
        self.connected = true;
        &self.filter
    }

    /// Count and decode an inbound message
    ///
    /// Returns `None` for messages that arrive after the limit was reached.
    pub fn on_message(&mut self, publish: &Publish) -> Option<ReceivedMessage> {
        if self.limit_reached() {
            return None;
        }
        self.received += 1;
        Some(ReceivedMessage {
            topic: publish.topic.clone(),
            payload: String::from_utf8_lossy(&publish.payload).into_owned(),
            limit_reached: self.limit_reached(),
        })
    }

    /// Messages counted so far
    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn limit_reached(&self) -> bool {
        self.max_messages != 0 && self.received >= self.max_messages
    }
}

/// Drive the event loop until the message limit is reached or `shutdown`
/// resolves
///
/// There is a single connection attempt: any event loop error before the
/// limit is reached ends the run with an error.
pub async fn run_subscriber<F>(
    client: &MqttClient,
    eventloop: &mut EventLoop,
    session: &mut SubscriberSession,
    shutdown: F,
) -> Result<SubscribeOutcome, MqttError>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut disconnecting = false;

    loop {
        let event = tokio::select! {
            biased;
            _ = &mut shutdown => {
                println!("Stopping subscriber…");
                if session.is_connected() && !disconnecting {
                    client.disconnect().await?;
                    drain_until_disconnected(eventloop).await;
                }
                return Ok(SubscribeOutcome::Interrupted);
            }
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                let filter = session.on_connected();
                println!("Connected. Subscribing to '{}'", filter);
                client.subscribe(filter).await?;
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                if ack.return_codes.contains(&SubscribeReasonCode::Failure) {
                    return Err(MqttError::SubscribeFailed(format!(
                        "broker rejected subscription to '{}'",
                        session.filter()
                    )));
                }
                debug!("Subscription acknowledged: {:?}", ack.return_codes);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let Some(message) = session.on_message(&publish) else {
                    debug!("Ignoring message on {} after limit", publish.topic);
                    continue;
                };
                println!("{}", message);
                if message.limit_reached {
                    println!("Reached message limit. Disconnecting…");
                    client.disconnect().await?;
                    disconnecting = true;
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                return Err(MqttError::ConnectionLost(
                    "broker closed the session".to_string(),
                ));
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("Disconnected after {} messages", session.received());
                return Ok(SubscribeOutcome::LimitReached);
            }
            Ok(_) => {}
            Err(e) if disconnecting => {
                warn!("Event loop closed while disconnecting: {}", e);
                return Ok(SubscribeOutcome::LimitReached);
            }
            Err(e) if session.is_connected() => {
                return Err(MqttError::ConnectionLost(e.to_string()));
            }
            Err(e) => return Err(MqttError::ConnectionFailed(e.to_string())),
        }
    }
}
