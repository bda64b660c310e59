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

//! Document sink: where tailed events are delivered.
//!
//! A sink accepts one document at a time, in the strict insertion order of
//! the event collection. A failing sink does not stop the tailing loop: the
//! failure is recorded against that delivery (logged with the event id and
//! counted) and the engine moves on. Every event is handed to the sink at
//! most once per engine lifetime; redelivery only happens across restarts,
//! from the last persisted checkpoint.
//!
//! # Implementing a sink
//!
//! ```rust
//! use bucatini_core::event::Event;
//! use bucatini_core::sink::{DocumentSink, SinkError};
//! use async_trait::async_trait;
//!
//! struct PrintSink;
//!
//! #[async_trait]
//! impl DocumentSink for PrintSink {
//!     async fn handle(&mut self, event: Event) -> Result<(), SinkError> {
//!         println!("event {}: {:?}", event.id(), event.body());
//!         Ok(())
//!     }
//! }
//! ```

use crate::event::Event;
use async_trait::async_trait;
use bson::oid::ObjectId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Failure produced while a sink handled one document.
///
/// Sink failures never propagate into the tailing loop; they are attached to
/// the delivery they belong to.
#[derive(Debug, Error)]
#[error("sink failed to handle event: {message}")]
pub struct SinkError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SinkError {
    /// Creates a sink error from a message.
    #[must_use]
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a sink error wrapping an underlying error.
    #[must_use]
    pub fn from_err(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }
}

/// Receives tailed events, one at a time.
#[async_trait]
pub trait DocumentSink: Send {
    /// Accepts one document.
    ///
    /// # Errors
    ///
    /// An error marks this delivery as failed. The engine records it and
    /// keeps draining; it does not retry the document.
    async fn handle(&mut self, event: Event) -> Result<(), SinkError>;
}

/// In-memory sink for tests and examples.
///
/// Clones share storage, so a test can keep a handle while the sink itself
/// is owned by a running consumer.
///
/// ```rust
/// # use bucatini_core::sink::{DocumentSink, MemorySink};
/// # use bucatini_core::event::Event;
/// # use bson::{doc, oid::ObjectId};
/// # async fn example() {
/// let sink = MemorySink::new();
/// let probe = sink.clone();
///
/// // hand `sink` to a consumer ...
///
/// assert_eq!(probe.delivered().await.len(), 0);
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    delivered: Arc<Mutex<Vec<Event>>>,
    failed: Arc<Mutex<Vec<ObjectId>>>,
    fail_all: Arc<AtomicBool>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent delivery fail (or succeed again with `false`).
    pub fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Events handled so far, in delivery order. Includes failed deliveries;
    /// a failure does not un-deliver an event.
    pub async fn delivered(&self) -> Vec<Event> {
        self.delivered.lock().await.clone()
    }

    /// Identifiers of the deliveries whose handling failed.
    pub async fn failures(&self) -> Vec<ObjectId> {
        self.failed.lock().await.clone()
    }

    /// Identifiers of all deliveries, in order.
    pub async fn delivered_ids(&self) -> Vec<ObjectId> {
        self.delivered.lock().await.iter().map(Event::id).collect()
    }
}

#[async_trait]
impl DocumentSink for MemorySink {
    async fn handle(&mut self, event: Event) -> Result<(), SinkError> {
        let id = event.id();
        self.delivered.lock().await.push(event);

        if self.fail_all.load(Ordering::SeqCst) {
            self.failed.lock().await.push(id);
            return Err(SinkError::msg(format!("injected failure for event {id}")));
        }
        Ok(())
    }
}
