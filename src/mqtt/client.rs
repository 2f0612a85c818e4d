//! MQTT client wrapper for rumqttc
//!
//! Builds the connection options (credentials, keep-alive, TLS) and runs the
//! event loop used by the publisher.

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, Transport};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::ClientConfig;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::{MqttConfig, TlsConfig};
use crate::error::MqttError;

/// Capacity of the request channel between `AsyncClient` and `EventLoop`
const REQUEST_CAPACITY: usize = 10;

/// Upper bound on waiting for DISCONNECT to be flushed
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection-level events forwarded from the background event loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Broker accepted the connection
    Connected,
    /// A PUBLISH has been written to the network
    Published,
    /// DISCONNECT has been sent
    Disconnected,
    /// The event loop failed; it is not restarted
    Failed(String),
}

/// MQTT client wrapper
#[derive(Clone)]
pub struct MqttClient {
    client: AsyncClient,
    broker: String,
}

impl MqttClient {
    /// Create a new MQTT client from configuration
    ///
    /// Nothing is sent until the returned event loop is polled.
    pub fn new(config: &MqttConfig) -> Result<(Self, EventLoop), MqttError> {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(config.keep_alive);
        options.set_clean_session(true);

        if let Some(user) = &config.user {
            options.set_credentials(user, config.password.as_deref().unwrap_or_default());
        }

        if let Some(tls_config) = &config.tls {
            let transport = build_tls_transport(&config.host, tls_config)?;
            options.set_transport(transport);
            info!("MQTT TLS enabled");
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        debug!(
            "MQTT client {} configured for {}:{}",
            config.client_id, config.host, config.port
        );

        Ok((
            Self {
                client,
                broker: format!("{}:{}", config.host, config.port),
            },
            eventloop,
        ))
    }

    /// `host:port` of the broker
    pub fn broker(&self) -> &str {
        &self.broker
    }

    /// Queue a QoS 0, non-retained publish
    pub async fn publish(&self, topic: &str, payload: &str) -> Result<(), MqttError> {
        debug!("Publishing to {}: {}", topic, payload);
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .await
            .map_err(|e| MqttError::PublishFailed(e.to_string()))
    }

    /// Queue a QoS 0 subscription
    pub async fn subscribe(&self, filter: &str) -> Result<(), MqttError> {
        debug!("Subscribing to {}", filter);
        self.client
            .subscribe(filter, QoS::AtMostOnce)
            .await
            .map_err(|e| MqttError::SubscribeFailed(e.to_string()))
    }

    /// Ask the event loop to send DISCONNECT
    pub async fn disconnect(&self) -> Result<(), MqttError> {
        debug!("Disconnecting from {}", self.broker);
        self.client.disconnect().await?;
        Ok(())
    }
}

/// Build TLS transport configuration
fn build_tls_transport(host: &str, config: &TlsConfig) -> Result<Transport, MqttError> {
    // rumqttc derives SNI from the host, so reject names rustls cannot use up front
    ServerName::try_from(host.to_string())
        .map_err(|_| MqttError::ConnectionFailed(format!("Invalid server name: {}", host)))?;

    // ring (via rumqttc) and aws-lc-rs may both be enabled; builder() needs one installed
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let roots = load_root_store(config)?;
    let builder = ClientConfig::builder().with_root_certificates(roots);

    let tls_config = match (&config.cert_file, &config.key_file) {
        (Some(cert_file), Some(key_file)) => builder
            .with_client_auth_cert(load_certs(cert_file)?, load_private_key(key_file)?)
            .map_err(|e| {
                MqttError::ConnectionFailed(format!("Failed to set client cert: {}", e))
            })?,
        _ => builder.with_no_client_auth(),
    };

    Ok(Transport::tls_with_config(rumqttc::TlsConfiguration::Rustls(
        Arc::new(tls_config),
    )))
}

/// CA file, else every *.crt/*.pem in the CA directory, else the webpki roots
fn load_root_store(config: &TlsConfig) -> Result<rustls::RootCertStore, MqttError> {
    let mut store = rustls::RootCertStore::empty();

    if let Some(ca_file) = &config.ca_file {
        for cert in load_certs(ca_file)? {
            store
                .add(cert)
                .map_err(|e| MqttError::ConnectionFailed(format!("Failed to add CA cert: {}", e)))?;
        }
    } else if let Some(ca_path) = &config.ca_path {
        let entries = std::fs::read_dir(ca_path).map_err(|e| {
            MqttError::ConnectionFailed(format!("Failed to read {}: {}", ca_path.display(), e))
        })?;
        let pem_files = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "crt" || ext == "pem"));
        for path in pem_files {
            match load_certs(&path) {
                Ok(certs) => {
                    let (added, ignored) = store.add_parsable_certificates(certs);
                    debug!("{}: {} CA certs added, {} ignored", path.display(), added, ignored);
                }
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }
        if store.is_empty() {
            return Err(MqttError::ConnectionFailed(format!(
                "No CA certificates found in {}",
                ca_path.display()
            )));
        }
    } else {
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    Ok(store)
}

/// Load certificates from a PEM file
fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, MqttError> {
    let file = File::open(path)
        .map_err(|e| MqttError::ConnectionFailed(format!("Failed to open cert file: {}", e)))?;
    rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| MqttError::ConnectionFailed(format!("Failed to parse certs: {}", e)))
}

/// Load the first PKCS#1, PKCS#8 or SEC1 private key from a PEM file
fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, MqttError> {
    let file = File::open(path)
        .map_err(|e| MqttError::ConnectionFailed(format!("Failed to open key file: {}", e)))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| MqttError::ConnectionFailed(format!("Failed to parse private key: {}", e)))?
        .ok_or_else(|| MqttError::ConnectionFailed("No private key found in file".to_string()))
}

/// Map a polled event to the session event the publisher cares about
fn session_event(event: &Event) -> Option<SessionEvent> {
    match event {
        Event::Incoming(Packet::ConnAck(_)) => Some(SessionEvent::Connected),
        Event::Incoming(Packet::Disconnect) => {
            Some(SessionEvent::Failed("broker closed the session".to_string()))
        }
        Event::Outgoing(Outgoing::Publish(_)) => Some(SessionEvent::Published),
        Event::Outgoing(Outgoing::Disconnect) => Some(SessionEvent::Disconnected),
        _ => None,
    }
}

/// Run the MQTT event loop in the background and forward session events
///
/// Returns after DISCONNECT is sent or on the first error. The event loop is
/// never polled again after an error, so rumqttc does not reconnect.
pub async fn run_event_loop(mut eventloop: EventLoop, events_tx: mpsc::Sender<SessionEvent>) {
    loop {
        let event = match eventloop.poll().await {
            Ok(event) => {
                if let Event::Incoming(Packet::ConnAck(ack)) = &event {
                    info!("Connected to MQTT broker (code {:?})", ack.code);
                }
                match session_event(&event) {
                    Some(event) => event,
                    None => continue,
                }
            }
            Err(e) => {
                debug!("MQTT event loop error: {}", e);
                SessionEvent::Failed(e.to_string())
            }
        };

        let done = matches!(event, SessionEvent::Disconnected | SessionEvent::Failed(_));
        if events_tx.send(event).await.is_err() {
            debug!("Session event receiver dropped, stopping event loop");
            return;
        }
        if done {
            return;
        }
    }
}

/// Poll a foreground event loop until DISCONNECT has gone out
///
/// Gives up after `DISCONNECT_TIMEOUT` or on the first error.
pub async fn drain_until_disconnected(eventloop: &mut EventLoop) {
    let drained = timeout(DISCONNECT_TIMEOUT, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("Event loop closed while disconnecting: {}", e);
                    break;
                }
            }
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            "DISCONNECT not confirmed within {}s",
            DISCONNECT_TIMEOUT.as_secs()
        );
    }
}

/// Wait until the broker acknowledges the connection
pub async fn wait_for_connection(
    events_rx: &mut mpsc::Receiver<SessionEvent>,
) -> Result<(), MqttError> {
    match events_rx.recv().await {
        Some(SessionEvent::Connected) => Ok(()),
        Some(SessionEvent::Failed(reason)) => Err(MqttError::ConnectionFailed(reason)),
        Some(other) => Err(MqttError::ConnectionFailed(format!(
            "unexpected event before connection: {:?}",
            other
        ))),
        None => Err(MqttError::ConnectionFailed(
            "event loop stopped".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, ConnectReturnCode, Publish};

    fn test_config() -> MqttConfig {
        MqttConfig {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "test-client".to_string(),
            user: None,
            password: None,
            keep_alive: Duration::from_secs(60),
            tls: None,
        }
    }

    #[tokio::test]
    async fn test_new_client_reports_broker() {
        let (client, _eventloop) = MqttClient::new(&test_config()).unwrap();
        assert_eq!(client.broker(), "localhost:1883");
    }

    #[tokio::test]
    async fn test_missing_ca_file_is_error() {
        let mut config = test_config();
        config.tls = Some(TlsConfig {
            ca_file: Some("/nonexistent/ca.pem".into()),
            ..TlsConfig::default()
        });
        assert!(matches!(
            MqttClient::new(&config),
            Err(MqttError::ConnectionFailed(_))
        ));
    }

    #[test]
    fn test_session_event_mapping() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::Success,
            false,
        )));
        assert_eq!(session_event(&connack), Some(SessionEvent::Connected));
        assert_eq!(
            session_event(&Event::Outgoing(Outgoing::Publish(0))),
            Some(SessionEvent::Published)
        );
        assert_eq!(
            session_event(&Event::Outgoing(Outgoing::Disconnect)),
            Some(SessionEvent::Disconnected)
        );
        assert_eq!(session_event(&Event::Outgoing(Outgoing::PingReq)), None);

        let publish = Publish::new("demo/test", QoS::AtMostOnce, "hi");
        assert_eq!(session_event(&Event::Incoming(Packet::Publish(publish))), None);
    }

    #[tokio::test]
    async fn test_wait_for_connection_success() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(SessionEvent::Connected).await.unwrap();
        assert!(wait_for_connection(&mut rx).await.is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_connection_failure() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(SessionEvent::Failed("connection refused".to_string()))
            .await
            .unwrap();
        let err = wait_for_connection(&mut rx).await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_wait_for_connection_closed_channel() {
        let (tx, mut rx) = mpsc::channel::<SessionEvent>(4);
        drop(tx);
        assert!(matches!(
            wait_for_connection(&mut rx).await,
            Err(MqttError::ConnectionFailed(_))
        ));
    }
}
