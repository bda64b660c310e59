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

//! Persistent tracking of the last processed event per consumer.
//!
//! The [`TrackingStore`] trait is the checkpointing seam of the system: a
//! durable mapping from consumer identity to the identifier of the last
//! event that consumer processed. The tailing engine persists through this
//! trait opportunistically (whenever a drain runs dry) and on cursor loss or
//! shutdown; it never writes checkpoint records itself.
//!
//! One record exists per consumer identity, guarded by a unique index and
//! written with an atomic upsert. Two engine instances sharing one consumer
//! identity will race on checkpoints; that is an operator misconfiguration
//! the store does not defend against.
//!
//! Backends live in the `bucatini-stores` crate. The MongoDB backend keeps
//! records in the `tracker` collection with the layout
//! `{ "consumer-task-id": <string>, "last-tracked-id": <ObjectId> }`.

use async_trait::async_trait;
use bson::oid::ObjectId;
use thiserror::Error;

/// Default name of the tracking collection.
pub const TRACKER_COLLECTION_NAME: &str = "tracker";

/// Record field holding the consumer identity. Unique-indexed.
pub const CONSUMER_ID_FIELD: &str = "consumer-task-id";

/// Record field holding the identifier of the last tracked event.
pub const LAST_TRACKED_ID_FIELD: &str = "last-tracked-id";

/// Durable checkpoint storage for tailing consumers.
///
/// A non-empty consumer identity is a configuration precondition validated
/// before the engine starts; implementations may assume it.
#[async_trait]
pub trait TrackingStore: Send + Sync {
    /// Verifies the store is usable, creating the unique index on the
    /// consumer identity field when it does not exist yet. Idempotent.
    async fn ensure_ready(&self) -> Result<(), TrackingError>;

    /// Point lookup of the last tracked identifier for `consumer_id`.
    ///
    /// `Ok(None)` means no checkpoint exists yet; the caller starts from the
    /// oldest retained event.
    async fn fetch_last_tracked_id(
        &self,
        consumer_id: &str,
    ) -> Result<Option<ObjectId>, TrackingError>;

    /// Upserts the checkpoint for `consumer_id`: inserted on the first
    /// write, overwritten on every later one.
    ///
    /// # Errors
    ///
    /// [`TrackingError::WriteFailure`] when the write cannot be
    /// acknowledged. Callers treat this as non-fatal and retry at the next
    /// checkpoint opportunity; the in-memory position is not lost.
    async fn persist_last_tracked_id(
        &self,
        consumer_id: &str,
        id: ObjectId,
    ) -> Result<(), TrackingError>;
}

/// Errors raised by tracking store operations.
#[derive(Debug, Error)]
pub enum TrackingError {
    /// A checkpoint write could not be acknowledged.
    #[error("checkpoint write failed: {message}")]
    WriteFailure {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A checkpoint lookup failed.
    #[error("checkpoint lookup failed: {message}")]
    Lookup {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The unique index on the consumer identity field could not be
    /// verified or created.
    #[error("tracker index error: {message}")]
    Index {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A stored record exists but does not have the expected layout.
    #[error("malformed tracker record for consumer {consumer_id}: {message}")]
    MalformedRecord {
        consumer_id: String,
        message: String,
    },
}

impl TrackingError {
    /// Builds a [`TrackingError::WriteFailure`] from any error.
    #[must_use]
    pub fn write_failure(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::WriteFailure {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Builds a [`TrackingError::Lookup`] from any error.
    #[must_use]
    pub fn lookup(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Lookup {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Builds a [`TrackingError::Index`] from any error.
    #[must_use]
    pub fn index(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Index {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }
}
