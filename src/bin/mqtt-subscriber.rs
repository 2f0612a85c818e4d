//! mqtt-subscriber - print messages published on an MQTT topic filter
//!
//! Connects once, subscribes on connect and prints `[topic] payload` for each
//! message until `--max-messages` is reached or the process is interrupted.

use clap::Parser;
use tracing::{error, info, warn};

use mqtt_pubsub_tools::config::{ClientRole, SubscriberArgs};
use mqtt_pubsub_tools::error::Result;
use mqtt_pubsub_tools::logging;
use mqtt_pubsub_tools::mqtt::{run_subscriber, MqttClient, SubscriberSession};
use mqtt_pubsub_tools::shutdown::shutdown_signal;

#[tokio::main]
async fn main() {
    let args = SubscriberArgs::parse();
    logging::init(args.debug);

    if let Err(e) = run(args).await {
        error!("Fatal error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: SubscriberArgs) -> Result<()> {
    let filter = args.topic_filter()?;
    let config = args.connection.mqtt_config(ClientRole::Subscriber)?;
    if args.connection.has_unused_tls_options() {
        warn!("TLS options given without --tls; connecting over plain TCP");
    }

    let (client, mut eventloop) = MqttClient::new(&config)?;
    let mut session = SubscriberSession::new(filter, args.max_messages);

    info!("Connecting to {} as {}", client.broker(), config.client_id);
    let outcome =
        run_subscriber(&client, &mut eventloop, &mut session, shutdown_signal()).await?;
    info!(
        "Subscriber finished ({:?}) after {} message(s)",
        outcome,
        session.received()
    );

    Ok(())
}
