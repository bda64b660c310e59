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

//! In-memory tracking store.
//!
//! A thread-safe, process-local implementation of
//! [`TrackingStore`]. Suitable for tests, examples and single-run tools;
//! checkpoints do not survive the process, so production consumers should
//! use the MongoDB store instead.
//!
//! Clones share storage, which lets a test keep a handle on the store while
//! a consumer owns another.
//!
//! ```rust
//! use bucatini_core::tracker::TrackingStore;
//! use bucatini_stores::memory::MemoryTrackingStore;
//! use bson::oid::ObjectId;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryTrackingStore::new();
//! let id = ObjectId::new();
//!
//! store.persist_last_tracked_id("worker-1", id).await?;
//! assert_eq!(store.fetch_last_tracked_id("worker-1").await?, Some(id));
//! assert_eq!(store.fetch_last_tracked_id("worker-2").await?, None);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use bson::oid::ObjectId;
use bucatini_core::tracker::{TrackingError, TrackingStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory checkpoint map keyed by consumer identity.
#[derive(Debug, Clone, Default)]
pub struct MemoryTrackingStore {
    checkpoints: Arc<RwLock<HashMap<String, ObjectId>>>,
    fail_persists: Arc<AtomicBool>,
}

impl MemoryTrackingStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        debug!("creating in-memory tracking store");
        Self::default()
    }

    /// Makes every subsequent persist fail with a write failure (or succeed
    /// again with `false`). Lets tests exercise the non-fatal checkpoint
    /// path.
    pub fn set_fail_persists(&self, fail: bool) {
        self.fail_persists.store(fail, Ordering::SeqCst);
    }

    /// Number of tracked consumer identities.
    pub async fn len(&self) -> usize {
        self.checkpoints.read().await.len()
    }

    /// True when no checkpoint has been persisted yet.
    pub async fn is_empty(&self) -> bool {
        self.checkpoints.read().await.is_empty()
    }

    /// Removes all checkpoints.
    pub async fn clear(&self) {
        self.checkpoints.write().await.clear();
    }
}

#[async_trait]
impl TrackingStore for MemoryTrackingStore {
    async fn ensure_ready(&self) -> Result<(), TrackingError> {
        // The map key is the uniqueness constraint here.
        Ok(())
    }

    async fn fetch_last_tracked_id(
        &self,
        consumer_id: &str,
    ) -> Result<Option<ObjectId>, TrackingError> {
        Ok(self.checkpoints.read().await.get(consumer_id).copied())
    }

    async fn persist_last_tracked_id(
        &self,
        consumer_id: &str,
        id: ObjectId,
    ) -> Result<(), TrackingError> {
        if self.fail_persists.load(Ordering::SeqCst) {
            return Err(TrackingError::WriteFailure {
                message: "injected write failure".to_string(),
                source: None,
            });
        }

        self.checkpoints
            .write()
            .await
            .insert(consumer_id.to_string(), id);
        debug!(consumer_id, last_tracked_id = %id, "checkpoint stored");
        Ok(())
    }
}
