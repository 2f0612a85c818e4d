//! mqtt-pubsub-tools - minimal MQTT command-line clients
//!
//! Shared code for the two binaries:
//! - `mqtt-publisher`: publishes a numbered message template N times (or until interrupted)
//! - `mqtt-subscriber`: prints messages on a topic filter until a limit or interrupt
//!
//! The MQTT protocol itself is handled by `rumqttc`.

pub mod config;
pub mod error;
pub mod logging;
pub mod mqtt;
pub mod shutdown;
pub mod template;

pub use error::{Error, MqttError, Result};
