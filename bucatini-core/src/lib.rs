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

//! Bucatini Core - capped-collection tailing for MongoDB-backed event buses.
//!
//! Bucatini turns a capped, append-only MongoDB collection into an ordered
//! event stream that independent consumers can tail, each with an optional
//! durable checkpoint so it resumes where it left off after a restart.
//! Delivery is at-least-once: within one run there are no duplicates, and a
//! restart re-delivers at most the events forwarded after the last
//! checkpoint landed.
//!
//! # Key Components
//!
//! - **Events**: [`event`] wraps the opaque documents published to the bus
//! - **Cursors**: [`cursor`] opens live tailable cursors and classifies
//!   their failures
//! - **Engine**: [`tailer`] runs the drain/checkpoint/regenerate loop
//! - **Lifecycle**: [`consumer`] exposes start/stop/pause/resume
//! - **Tracking**: [`tracker`] defines the checkpoint store seam (backends
//!   live in `bucatini-stores`)
//!
//! # Example
//!
//! ```rust,no_run
//! use bucatini_core::config::{TailConfig, TrackingConfig};
//! use bucatini_core::consumer::Consumer;
//! use bucatini_core::sink::MemorySink;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = mongodb::Client::with_uri_str("mongodb://localhost:27017").await?;
//!
//! let config = TailConfig::builder()
//!     .client(client)
//!     .database("eventsystemdb")
//!     .collection("events")
//!     .build()?;
//!
//! let mut consumer = Consumer::new(config, None, MemorySink::new())?;
//! consumer.start().await?;
//! // ... later ...
//! consumer.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod consumer;
pub mod cursor;
pub mod event;
pub mod metrics;
pub mod sink;
pub mod tailer;
pub mod tracker;

pub use config::{TailConfig, TrackingConfig};
pub use consumer::{Consumer, ConsumerState};
pub use event::Event;
pub use sink::DocumentSink;
pub use tailer::{TailError, TailingEngine};
pub use tracker::TrackingStore;
