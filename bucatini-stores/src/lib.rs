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

//! Tracking store backends for Bucatini consumers.
//!
//! Implementations of the
//! [`TrackingStore`](bucatini_core::tracker::TrackingStore) trait, the
//! durable mapping from consumer identity to the last processed event
//! identifier.
//!
//! # Available Stores
//!
//! - **MongoDB** (`mongo-store` feature, default): checkpoints live in a
//!   small auxiliary collection next to the event collection, guarded by a
//!   unique index on the consumer identity field. This is the production
//!   backend.
//! - **Memory** (`memory` feature, default): process-local map for tests
//!   and single-run tools. No durability; checkpoints die with the process.
//!
//! # Example: MongoDB Store
//!
//! ```rust,no_run
//! use bucatini_core::tracker::TrackingStore;
//! use bucatini_stores::mongo::MongoTrackingStore;
//! use bson::oid::ObjectId;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = mongodb::Client::with_uri_str("mongodb://localhost:27017").await?;
//! let store = MongoTrackingStore::new(client.database("eventsystemdb"));
//!
//! store.ensure_ready().await?;
//! store.persist_last_tracked_id("billing-consumer", ObjectId::new()).await?;
//!
//! let resumed = store.fetch_last_tracked_id("billing-consumer").await?;
//! assert!(resumed.is_some());
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "mongo-store")]
pub mod mongo;
