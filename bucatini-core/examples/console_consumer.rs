//! Console Consumer Example
//!
//! Tails a capped collection and prints every event, with a durable
//! checkpoint so restarts resume where the previous run left off.
//!
//! # Prerequisites
//!
//! Start MongoDB and create the capped collection:
//! ```bash
//! docker run -d --name mongodb -p 27017:27017 mongo:7.0
//!
//! docker exec mongodb mongosh eventsystemdb --eval '
//!   db.createCollection("events", {capped: true, size: 1048576})
//! '
//! ```
//!
//! # Running the Example
//!
//! ```bash
//! cargo run --example console_consumer
//! ```
//!
//! # Generate Test Data
//!
//! In another terminal:
//! ```bash
//! docker exec mongodb mongosh eventsystemdb --eval '
//!   db.events.insertOne({type: "user-created", name: "Alice"})
//! '
//! ```

use bucatini_core::config::{TailConfig, TrackingConfig};
use bucatini_core::consumer::Consumer;
use bucatini_core::event::Event;
use bucatini_core::sink::{DocumentSink, SinkError};
use bucatini_core::tracker::TrackingStore;
use bucatini_stores::mongo::MongoTrackingStore;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Sink that prints every event to the console.
struct ConsoleSink {
    event_count: usize,
}

#[async_trait::async_trait]
impl DocumentSink for ConsoleSink {
    async fn handle(&mut self, event: Event) -> Result<(), SinkError> {
        self.event_count += 1;
        info!(
            count = self.event_count,
            event_id = %event.id(),
            published_at = %event.published_at(),
            document = ?event.body(),
            "event received"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let client = mongodb::Client::with_uri_str("mongodb://localhost:27017").await?;

    let config = TailConfig::builder()
        .client(client.clone())
        .database("eventsystemdb")
        .collection("events")
        .tracking(
            TrackingConfig::builder()
                .consumer_id("console-consumer")
                .cursor_regeneration_delay(Duration::from_millis(1000))
                .build()?,
        )
        .build()?;

    let store: Arc<dyn TrackingStore> = Arc::new(MongoTrackingStore::for_config(&config));
    let mut consumer = Consumer::new(config, Some(store), ConsoleSink { event_count: 0 })?;

    consumer.start().await?;
    info!("consumer started, press Ctrl-C to stop");

    signal::ctrl_c().await?;
    info!("stopping consumer");
    consumer.stop().await;

    info!(state = ?consumer.state().await, "consumer stopped");
    Ok(())
}
