//! MQTT publisher loop
//!
//! Renders the message template for each message number, publishes it and
//! waits for the send confirmation before sleeping until the next one.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::error::MqttError;
use crate::template::MessageTemplate;

use super::client::{MqttClient, SessionEvent, DISCONNECT_TIMEOUT};

/// What to publish and how often
#[derive(Debug, Clone)]
pub struct PublishSettings {
    /// Topic to publish to
    pub topic: String,
    /// Payload template
    pub template: MessageTemplate,
    /// Number of messages; 0 publishes until interrupted
    pub count: u64,
    /// Pause between two messages
    pub delay: Duration,
}

impl PublishSettings {
    /// Whether `sent` messages complete the run
    pub fn is_complete(&self, sent: u64) -> bool {
        self.count != 0 && sent >= self.count
    }
}

/// How a publishing run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishSummary {
    /// Messages confirmed as sent
    pub sent: u64,
    /// Whether the run was cut short by a shutdown signal
    pub interrupted: bool,
}

/// Destination for rendered payloads
pub trait PayloadSink {
    /// Publish one payload and resolve once it has been sent
    fn publish(
        &mut self,
        topic: &str,
        payload: &str,
    ) -> impl Future<Output = Result<(), MqttError>>;
}

/// Publishes through the broker connection, one confirmed message at a time
pub struct BrokerSink {
    client: MqttClient,
    events_rx: mpsc::Receiver<SessionEvent>,
}

impl BrokerSink {
    /// `events_rx` must be fed by `run_event_loop` for the same client
    pub fn new(client: MqttClient, events_rx: mpsc::Receiver<SessionEvent>) -> Self {
        Self { client, events_rx }
    }

    /// Send DISCONNECT and wait (bounded) for it to go out
    pub async fn disconnect(mut self) -> Result<(), MqttError> {
        self.client.disconnect().await?;

        let flushed = timeout(DISCONNECT_TIMEOUT, async {
            while let Some(event) = self.events_rx.recv().await {
                if matches!(event, SessionEvent::Disconnected | SessionEvent::Failed(_)) {
                    break;
                }
            }
        })
        .await;

        if flushed.is_err() {
            warn!(
                "DISCONNECT not confirmed within {}s",
                DISCONNECT_TIMEOUT.as_secs()
            );
        }
        Ok(())
    }
}

impl PayloadSink for BrokerSink {
    async fn publish(&mut self, topic: &str, payload: &str) -> Result<(), MqttError> {
        self.client.publish(topic, payload).await?;
        wait_for_publish(&mut self.events_rx).await
    }
}

/// Block until the event loop reports the pending publish as sent
pub async fn wait_for_publish(
    events_rx: &mut mpsc::Receiver<SessionEvent>,
) -> Result<(), MqttError> {
    loop {
        match events_rx.recv().await {
            Some(SessionEvent::Published) => return Ok(()),
            Some(SessionEvent::Connected) => continue,
            Some(SessionEvent::Disconnected) => {
                return Err(MqttError::ConnectionLost(
                    "disconnected before publish completed".to_string(),
                ))
            }
            Some(SessionEvent::Failed(reason)) => return Err(MqttError::PublishFailed(reason)),
            None => return Err(MqttError::ConnectionLost("event loop stopped".to_string())),
        }
    }
}

/// Publish messages numbered from 1 until `settings.count` is reached or
/// `shutdown` resolves
///
/// No delay follows the last message. A shutdown while waiting for a send
/// confirmation or while sleeping ends the run without publishing again.
pub async fn run_publish_loop<S, F>(
    sink: &mut S,
    settings: &PublishSettings,
    shutdown: F,
) -> Result<PublishSummary, MqttError>
where
    S: PayloadSink,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut sent = 0u64;

    let interrupted = loop {
        if settings.is_complete(sent) {
            break false;
        }

        let payload = settings.template.render(sent + 1);
        tokio::select! {
            biased;
            _ = &mut shutdown => break true,
            result = sink.publish(&settings.topic, &payload) => result?,
        }
        println!("Published '{}' to topic '{}'", payload, settings.topic);
        sent += 1;

        if settings.is_complete(sent) {
            break false;
        }

        debug!("Sleeping {:?} before message {}", settings.delay, sent + 1);
        tokio::select! {
            biased;
            _ = &mut shutdown => break true,
            _ = sleep(settings.delay) => {}
        }
    };

    if interrupted {
        println!("Publishing interrupted by user.");
    }

    Ok(PublishSummary { sent, interrupted })
}
