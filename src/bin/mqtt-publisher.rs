//! mqtt-publisher - publish a (numbered) message to an MQTT topic
//!
//! Connects once, publishes `--count` messages `--delay` seconds apart (or
//! forever with `--count 0`), then disconnects.

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use mqtt_pubsub_tools::config::{ClientRole, PublisherArgs};
use mqtt_pubsub_tools::error::Result;
use mqtt_pubsub_tools::logging;
use mqtt_pubsub_tools::mqtt::{
    run_event_loop, run_publish_loop, wait_for_connection, BrokerSink, MqttClient,
};
use mqtt_pubsub_tools::shutdown::shutdown_signal;

/// Session events buffered between the network task and the publish loop
const EVENT_CAPACITY: usize = 16;

#[tokio::main]
async fn main() {
    let args = PublisherArgs::parse();
    logging::init(args.debug);

    if let Err(e) = run(args).await {
        error!("Fatal error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: PublisherArgs) -> Result<()> {
    let settings = args.publish_settings()?;
    let config = args.connection.mqtt_config(ClientRole::Publisher)?;
    if args.connection.has_unused_tls_options() {
        warn!("TLS options given without --tls; connecting over plain TCP");
    }
    if settings.count != 1 && !settings.template.is_numbered() {
        info!("Message has no {{n}} placeholder, every payload will be identical");
    }

    let (client, eventloop) = MqttClient::new(&config)?;
    let (events_tx, mut events_rx) = mpsc::channel(EVENT_CAPACITY);
    let eventloop_handle = tokio::spawn(run_event_loop(eventloop, events_tx));

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    info!("Connecting to {} as {}", client.broker(), config.client_id);
    tokio::select! {
        biased;
        _ = &mut shutdown => {
            println!("Publishing interrupted by user.");
            eventloop_handle.abort();
            return Ok(());
        }
        result = wait_for_connection(&mut events_rx) => result?,
    }

    let mut sink = BrokerSink::new(client, events_rx);
    let summary = run_publish_loop(&mut sink, &settings, &mut shutdown).await?;
    info!(
        "Published {} message(s){}",
        summary.sent,
        if summary.interrupted { " before interrupt" } else { "" }
    );

    if let Err(e) = sink.disconnect().await {
        warn!("Disconnect failed: {}", e);
    }
    eventloop_handle.abort();

    Ok(())
}
