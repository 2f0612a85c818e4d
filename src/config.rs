//! Configuration module for mqtt-pubsub-tools
//!
//! Command-line options (with environment fallbacks) for both tools, and the
//! strongly-typed connection configuration they are turned into.

use std::path::PathBuf;
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{Args, Parser};
use uuid::Uuid;

use crate::mqtt::PublishSettings;
use crate::template::MessageTemplate;

/// Topic used by both tools when none is given
pub const DEFAULT_TOPIC: &str = "demo/test";

/// Payload template used by the publisher when none is given
pub const DEFAULT_MESSAGE: &str = "Hello from Codex!";

/// Keep-alive interval sent in CONNECT
pub const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Options for `mqtt-publisher`
#[derive(Parser, Debug, Clone)]
#[command(name = "mqtt-publisher", version, about = "Simple MQTT publisher", long_about = None)]
pub struct PublisherArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Topic to publish to
    #[arg(long, default_value = DEFAULT_TOPIC)]
    pub topic: String,

    /// Message payload. Use {n} to include the message number when publishing multiple messages
    #[arg(long, default_value = DEFAULT_MESSAGE)]
    pub message: String,

    /// Number of messages to publish (0 keeps publishing until interrupted)
    #[arg(long, default_value_t = 1)]
    pub count: u64,

    /// Delay in seconds between messages
    #[arg(long, default_value = "1.0", value_parser = parse_delay)]
    pub delay: Duration,

    /// Enable verbose logging
    #[arg(long, env = "DEBUG", value_parser = BoolishValueParser::new())]
    pub debug: bool,
}

/// Options for `mqtt-subscriber`
#[derive(Parser, Debug, Clone)]
#[command(name = "mqtt-subscriber", version, about = "Simple MQTT subscriber", long_about = None)]
pub struct SubscriberArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Topic filter to subscribe to
    #[arg(long, default_value = DEFAULT_TOPIC)]
    pub topic: String,

    /// Stop after receiving this many messages (0 keeps looping)
    #[arg(long, default_value_t = 0)]
    pub max_messages: u64,

    /// Enable verbose logging
    #[arg(long, env = "DEBUG", value_parser = BoolishValueParser::new())]
    pub debug: bool,
}

/// Broker connection options shared by both tools
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// MQTT broker host
    #[arg(long, env = "MQTT_HOST", default_value = "localhost")]
    pub host: String,

    /// MQTT broker port
    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    pub port: u16,

    /// Optional MQTT client id (random if omitted)
    #[arg(long)]
    pub client_id: Option<String>,

    /// Username (anonymous if omitted)
    #[arg(long, env = "MQTT_USER")]
    pub username: Option<String>,

    /// Password
    #[arg(long, env = "MQTT_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Connect over TLS
    #[arg(long, env = "MQTT_TLS", value_parser = BoolishValueParser::new())]
    pub tls: bool,

    /// CA certificate file (PEM)
    #[arg(long, env = "MQTT_CAFILE")]
    pub cafile: Option<PathBuf>,

    /// Directory of CA certificates (*.crt, *.pem)
    #[arg(long, env = "MQTT_CAPATH")]
    pub capath: Option<PathBuf>,

    /// Client certificate file (PEM)
    #[arg(long, env = "MQTT_CERTFILE")]
    pub certfile: Option<PathBuf>,

    /// Client private key file (PEM)
    #[arg(long, env = "MQTT_KEYFILE")]
    pub keyfile: Option<PathBuf>,
}

/// MQTT-specific configuration
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Broker hostname/IP
    pub host: String,
    /// Broker TCP port
    pub port: u16,
    /// Client identifier sent in CONNECT
    pub client_id: String,
    /// Username (None = anonymous)
    pub user: Option<String>,
    /// Password
    pub password: Option<String>,
    /// Keep-alive interval
    pub keep_alive: Duration,
    /// TLS configuration
    pub tls: Option<TlsConfig>,
}

/// TLS configuration for MQTT
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// CA certificate file path
    pub ca_file: Option<PathBuf>,
    /// CA certificate directory path
    pub ca_path: Option<PathBuf>,
    /// Client certificate path
    pub cert_file: Option<PathBuf>,
    /// Private key path
    pub key_file: Option<PathBuf>,
}

/// Which tool a connection belongs to; decides the generated client id prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    Publisher,
    Subscriber,
}

impl ClientRole {
    fn client_id_prefix(self) -> &'static str {
        match self {
            ClientRole::Publisher => "mqtt-publisher",
            ClientRole::Subscriber => "mqtt-subscriber",
        }
    }
}

/// Configuration error type
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),

    #[error("TLS configuration error: {0}")]
    Tls(String),
}

impl ConnectionArgs {
    /// Build the connection configuration, generating a client id if needed
    pub fn mqtt_config(&self, role: ClientRole) -> Result<MqttConfig, ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidValue("--host", self.host.clone()));
        }

        let client_id = match self.client_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => generate_client_id(role),
        };

        let user = self.username.clone().filter(|s| !s.is_empty());
        let password = self.password.clone().filter(|s| !s.is_empty());
        if password.is_some() && user.is_none() {
            return Err(ConfigError::InvalidValue(
                "--password",
                "a password requires --username".to_string(),
            ));
        }

        let tls = if self.tls {
            if self.certfile.is_some() != self.keyfile.is_some() {
                return Err(ConfigError::Tls(
                    "--certfile and --keyfile must be given together".to_string(),
                ));
            }
            Some(TlsConfig {
                ca_file: self.cafile.clone(),
                ca_path: self.capath.clone(),
                cert_file: self.certfile.clone(),
                key_file: self.keyfile.clone(),
            })
        } else {
            None
        };

        Ok(MqttConfig {
            host: self.host.clone(),
            port: self.port,
            client_id,
            user,
            password,
            keep_alive: KEEP_ALIVE,
            tls,
        })
    }

    /// Whether any TLS-only option was given without `--tls`
    pub fn has_unused_tls_options(&self) -> bool {
        !self.tls
            && (self.cafile.is_some()
                || self.capath.is_some()
                || self.certfile.is_some()
                || self.keyfile.is_some())
    }
}

impl PublisherArgs {
    /// Validate the publishing options
    pub fn publish_settings(&self) -> crate::error::Result<PublishSettings> {
        if !rumqttc::valid_topic(&self.topic) {
            return Err(ConfigError::InvalidValue("--topic", self.topic.clone()).into());
        }

        Ok(PublishSettings {
            topic: self.topic.clone(),
            template: MessageTemplate::parse(&self.message)?,
            count: self.count,
            delay: self.delay,
        })
    }
}

impl SubscriberArgs {
    /// Validate the topic filter
    pub fn topic_filter(&self) -> Result<String, ConfigError> {
        if !rumqttc::valid_filter(&self.topic) {
            return Err(ConfigError::InvalidValue("--topic", self.topic.clone()));
        }
        Ok(self.topic.clone())
    }
}

/// Generate a random client id: `<role prefix>-<8 hex digits>`
pub fn generate_client_id(role: ClientRole) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}-{}", role.client_id_prefix(), &hex[..8])
}

fn parse_delay(value: &str) -> Result<Duration, String> {
    let secs: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a number of seconds", value))?;
    Duration::try_from_secs_f64(secs)
        .map_err(|_| format!("'{}' must be a finite, non-negative number of seconds", value))
}
