//! MQTT module - client, publisher, and subscriber

mod client;
mod publisher;
mod subscriber;
#[cfg(test)]
mod test_broker;

pub use client::{
    drain_until_disconnected, run_event_loop, wait_for_connection, MqttClient, SessionEvent,
};
pub use publisher::{
    run_publish_loop, wait_for_publish, BrokerSink, PayloadSink, PublishSettings, PublishSummary,
};
pub use subscriber::{run_subscriber, ReceivedMessage, SubscribeOutcome, SubscriberSession};
