// Copyright 2025 Bucatini Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![cfg(feature = "mongo-store")]

//! Integration tests against a real MongoDB, covering the tracking store
//! and the full tailing round trip over a capped collection.

use bson::{doc, oid::ObjectId, Document};
use bucatini_core::config::{TailConfig, TrackingConfig};
use bucatini_core::consumer::{Consumer, ConsumerState};
use bucatini_core::sink::MemorySink;
use bucatini_core::tailer::TailError;
use bucatini_core::tracker::{TrackingStore, CONSUMER_ID_FIELD};
use bucatini_stores::mongo::MongoTrackingStore;
use futures::TryStreamExt;
use mongodb::{Client, Database};
use std::sync::Arc;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::mongo::Mongo;
use tokio::time::{sleep, timeout};

const EVENTS: &str = "events";
const CONSUMER_ID: &str = "integration-consumer";

/// Starts a MongoDB container. Keep the container binding alive for the
/// duration of the test, or the database goes away with it.
async fn mongo() -> (ContainerAsync<Mongo>, Client, Database) {
    let container = Mongo::default()
        .start()
        .await
        .expect("failed to start MongoDB container");
    let port = container
        .get_host_port_ipv4(27017)
        .await
        .expect("failed to get mapped port");

    let client = Client::with_uri_str(format!("mongodb://127.0.0.1:{port}"))
        .await
        .expect("failed to build client");
    let database = client.database("eventsystemdb");

    (container, client, database)
}

async fn create_capped_events_collection(database: &Database) {
    database
        .create_collection(EVENTS)
        .capped(true)
        .size(1_048_576)
        .await
        .expect("failed to create capped collection");
}

async fn insert_events(database: &Database, count: usize) {
    let docs: Vec<Document> = (0..count).map(|n| doc! { "seq": n as i64 }).collect();
    database
        .collection::<Document>(EVENTS)
        .insert_many(docs)
        .await
        .expect("failed to insert events");
}

fn tracked_config(client: Client, delay: Duration) -> TailConfig {
    TailConfig::builder()
        .client(client)
        .database("eventsystemdb")
        .collection(EVENTS)
        .tracking(
            TrackingConfig::builder()
                .consumer_id(CONSUMER_ID)
                .cursor_regeneration_delay(delay)
                .build()
                .unwrap(),
        )
        .build()
        .unwrap()
}

async fn wait_for_deliveries(sink: &MemorySink, count: usize) {
    timeout(Duration::from_secs(30), async {
        while sink.delivered().await.len() < count {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("sink never reached the expected delivery count");
}

#[tokio::test]
#[ignore] // Requires Docker
async fn fetch_returns_none_without_a_checkpoint() {
    let (_container, _client, database) = mongo().await;
    let store = MongoTrackingStore::new(database);

    store.ensure_ready().await.unwrap();
    assert_eq!(store.fetch_last_tracked_id(CONSUMER_ID).await.unwrap(), None);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn persist_upserts_one_record_per_consumer() {
    let (_container, _client, database) = mongo().await;
    let store = MongoTrackingStore::new(database.clone());
    store.ensure_ready().await.unwrap();

    let (first, second, other) = (ObjectId::new(), ObjectId::new(), ObjectId::new());

    // Same identity twice overwrites rather than duplicates.
    store.persist_last_tracked_id("worker-a", first).await.unwrap();
    store.persist_last_tracked_id("worker-a", second).await.unwrap();
    // A different identity never collides.
    store.persist_last_tracked_id("worker-b", other).await.unwrap();

    assert_eq!(
        store.fetch_last_tracked_id("worker-a").await.unwrap(),
        Some(second)
    );
    assert_eq!(
        store.fetch_last_tracked_id("worker-b").await.unwrap(),
        Some(other)
    );

    let records = database
        .collection::<Document>("tracker")
        .count_documents(doc! {})
        .await
        .unwrap();
    assert_eq!(records, 2);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn ensure_ready_builds_the_unique_index_once() {
    let (_container, _client, database) = mongo().await;
    let store = MongoTrackingStore::new(database.clone());

    store.ensure_ready().await.unwrap();
    store.ensure_ready().await.unwrap();

    let mut unique = false;
    let mut indexes = database
        .collection::<Document>("tracker")
        .list_indexes()
        .await
        .unwrap();
    while let Some(index) = indexes.try_next().await.unwrap() {
        if index.keys.contains_key(CONSUMER_ID_FIELD) {
            unique = index.options.and_then(|o| o.unique).unwrap_or(false);
        }
    }
    assert!(unique, "expected a unique index on {CONSUMER_ID_FIELD}");
}

#[tokio::test]
#[ignore] // Requires Docker
async fn tails_preinserted_events_in_insertion_order() {
    let (_container, client, database) = mongo().await;
    create_capped_events_collection(&database).await;
    insert_events(&database, 5).await;

    let store = Arc::new(MongoTrackingStore::new(database));
    let sink = MemorySink::new();
    let mut consumer = Consumer::new(
        tracked_config(client, Duration::from_millis(100)),
        Some(store.clone() as Arc<dyn TrackingStore>),
        sink.clone(),
    )
    .unwrap();

    consumer.start().await.unwrap();
    wait_for_deliveries(&sink, 5).await;
    consumer.stop().await;

    let ids = sink.delivered_ids().await;
    assert_eq!(ids.len(), 5);
    assert!(
        ids.windows(2).all(|w| w[0].bytes() < w[1].bytes()),
        "events must arrive in strictly increasing identifier order"
    );
    assert_eq!(
        store.fetch_last_tracked_id(CONSUMER_ID).await.unwrap(),
        Some(*ids.last().unwrap())
    );
}

#[tokio::test]
#[ignore] // Requires Docker
async fn restart_resumes_from_the_checkpoint() {
    let (_container, client, database) = mongo().await;
    create_capped_events_collection(&database).await;
    insert_events(&database, 3).await;

    let store = Arc::new(MongoTrackingStore::new(database.clone()));
    let config = tracked_config(client, Duration::from_millis(100));

    let first_sink = MemorySink::new();
    let mut consumer = Consumer::new(
        config.clone(),
        Some(store.clone() as Arc<dyn TrackingStore>),
        first_sink.clone(),
    )
    .unwrap();
    consumer.start().await.unwrap();
    wait_for_deliveries(&first_sink, 3).await;
    consumer.stop().await;

    insert_events(&database, 2).await;

    let second_sink = MemorySink::new();
    let mut consumer = Consumer::new(
        config,
        Some(store as Arc<dyn TrackingStore>),
        second_sink.clone(),
    )
    .unwrap();
    consumer.start().await.unwrap();
    wait_for_deliveries(&second_sink, 2).await;
    consumer.stop().await;

    // Only the two post-restart events; nothing re-delivered.
    let replayed = second_sink.delivered_ids().await;
    assert_eq!(replayed.len(), 2);
    let old = first_sink.delivered_ids().await;
    assert!(replayed.iter().all(|id| !old.contains(id)));
}

#[tokio::test]
#[ignore] // Requires Docker
async fn non_capped_collection_fails_the_consumer() {
    let (_container, client, database) = mongo().await;
    database
        .create_collection(EVENTS)
        .await
        .expect("failed to create plain collection");

    let store = Arc::new(MongoTrackingStore::new(database));
    let sink = MemorySink::new();
    let mut consumer = Consumer::new(
        tracked_config(client, Duration::from_millis(100)),
        Some(store as Arc<dyn TrackingStore>),
        sink,
    )
    .unwrap();

    consumer.start().await.unwrap();
    timeout(Duration::from_secs(30), async {
        while consumer.state().await != ConsumerState::Failed {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("consumer never failed");

    let err = consumer.last_error().await.expect("error must be retrievable");
    assert!(matches!(
        err.as_ref(),
        TailError::CappedCollectionRequired { .. }
    ));
}
