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

//! MongoDB-backed tracking store.
//!
//! Checkpoints live in a small auxiliary collection (default `tracker`) in
//! the same database as the event collection, one record per consumer
//! identity:
//!
//! ```text
//! { "consumer-task-id": "billing-consumer", "last-tracked-id": ObjectId(...) }
//! ```
//!
//! The unique index on `consumer-task-id`, together with the atomic upsert,
//! is the only correctness mechanism: there is no in-process locking, and
//! two engine instances sharing one consumer identity will race on
//! checkpoints. [`MongoTrackingStore::ensure_ready`] verifies the index and
//! creates it when absent, so it is safe to call on every startup.

use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Document};
use bucatini_core::config::TailConfig;
use bucatini_core::tracker::{
    TrackingError, TrackingStore, CONSUMER_ID_FIELD, LAST_TRACKED_ID_FIELD,
    TRACKER_COLLECTION_NAME,
};
use futures::TryStreamExt;
use mongodb::{options::IndexOptions, Collection, Database, IndexModel};
use tracing::{debug, info};

/// Tracking store over a MongoDB collection.
#[derive(Clone)]
pub struct MongoTrackingStore {
    collection: Collection<Document>,
}

impl MongoTrackingStore {
    /// Creates a store over the default `tracker` collection of `database`.
    #[must_use]
    pub fn new(database: Database) -> Self {
        Self::with_collection(database, TRACKER_COLLECTION_NAME)
    }

    /// Creates a store over a named collection of `database`.
    #[must_use]
    pub fn with_collection(database: Database, collection: &str) -> Self {
        Self {
            collection: database.collection(collection),
        }
    }

    /// Creates the store a [`TailConfig`] describes: same client and
    /// database as the event collection, tracker collection name taken from
    /// the tracking block when present.
    #[must_use]
    pub fn for_config(config: &TailConfig) -> Self {
        let name = config
            .tracking()
            .map_or(TRACKER_COLLECTION_NAME, |t| t.tracker_collection());
        Self::with_collection(config.client().database(config.database()), name)
    }
}

#[async_trait]
impl TrackingStore for MongoTrackingStore {
    async fn ensure_ready(&self) -> Result<(), TrackingError> {
        let mut indexes = self
            .collection
            .list_indexes()
            .await
            .map_err(TrackingError::index)?;

        while let Some(index) = indexes.try_next().await.map_err(TrackingError::index)? {
            if index.keys.contains_key(CONSUMER_ID_FIELD) {
                debug!("unique index on {CONSUMER_ID_FIELD} already exists");
                return Ok(());
            }
        }

        let model = IndexModel::builder()
            .keys(doc! { CONSUMER_ID_FIELD: 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();

        self.collection
            .create_index(model)
            .await
            .map_err(TrackingError::index)?;

        info!("created unique index on {CONSUMER_ID_FIELD}");
        Ok(())
    }

    async fn fetch_last_tracked_id(
        &self,
        consumer_id: &str,
    ) -> Result<Option<ObjectId>, TrackingError> {
        let record = self
            .collection
            .find_one(doc! { CONSUMER_ID_FIELD: consumer_id })
            .await
            .map_err(TrackingError::lookup)?;

        match record {
            None => Ok(None),
            Some(record) => match record.get_object_id(LAST_TRACKED_ID_FIELD) {
                Ok(id) => Ok(Some(id)),
                Err(err) => Err(TrackingError::MalformedRecord {
                    consumer_id: consumer_id.to_string(),
                    message: err.to_string(),
                }),
            },
        }
    }

    async fn persist_last_tracked_id(
        &self,
        consumer_id: &str,
        id: ObjectId,
    ) -> Result<(), TrackingError> {
        self.collection
            .update_one(
                doc! { CONSUMER_ID_FIELD: consumer_id },
                doc! { "$set": { LAST_TRACKED_ID_FIELD: id } },
            )
            .upsert(true)
            .await
            .map_err(TrackingError::write_failure)?;

        debug!(consumer_id, last_tracked_id = %id, "checkpoint persisted");
        Ok(())
    }
}
