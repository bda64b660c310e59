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

//! The tailing engine: the loop that turns a capped collection into an
//! ordered event stream.
//!
//! One engine run owns exactly one logical pass over the collection:
//!
//! ```text
//!        ┌──────────────────────────────────────────────────────┐
//!        │                                                      ▼
//! Positioning ──► CursorOpen ──► Draining ⇄ AwaitingData ──► Checkpointing
//!        ▲                          │                           │
//!        │        inter-attempt     │ run signal cleared /      │ cursor dead
//!        └────────── delay ◄────────┘ fatal failure             │ or lost
//!                                   ▼                           │
//!                              Terminated ◄─────────────────────┘
//! ```
//!
//! - **Positioning** resolves where the next cursor starts: the persisted
//!   checkpoint on the first pass (when tracking is enabled), the in-memory
//!   position afterwards. Once an event has been forwarded, the position is
//!   advanced before any cursor is rebuilt, so a rebuilt cursor never
//!   re-delivers an event already forwarded in this engine lifetime.
//! - **Draining** hands each document to the sink, in insertion order. A
//!   sink failure belongs to that delivery alone; it is logged, counted and
//!   the loop keeps going.
//! - **Checkpointing** is opportunistic: whenever the drain runs dry and at
//!   least one event was seen since the last persist. A failed checkpoint
//!   write is retried at the next opportunity, never escalated.
//! - Cursor loss is classified by [`CursorError::is_recoverable`]:
//!   recoverable losses regenerate the cursor after the configured delay,
//!   connectivity failures terminate the run and surface the error.
//! - The run signal is observed on every iteration, and both suspension
//!   points (awaiting data, the inter-attempt delay) race against it, so a
//!   stop request is honored promptly without anyone closing the cursor
//!   from outside.
//!
//! Delivery is at-least-once across restarts: the checkpoint persisted at
//! any instant is at most the identifier of the most recently forwarded
//! event, so a crash between forward and persist re-delivers that tail on
//! the next run. Within a single run there are no duplicates.

use crate::cursor::{CursorError, CursorFactory, LiveCursor, Position};
use crate::event::{Event, EventError};
use crate::metrics;
use crate::sink::DocumentSink;
use crate::tracker::{TrackingError, TrackingStore};
use bson::oid::ObjectId;
use bson::Document;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Terminal failures of an engine run.
///
/// A run that ends because the run signal cleared is not an error; `run`
/// returns `Ok(())` for it.
#[derive(Debug, Error)]
pub enum TailError {
    /// The event collection is not capped. Raised before the loop starts;
    /// no cursor is ever opened.
    #[error(
        "tailable cursors are only compatible with capped collections, \
         and collection {collection} is not capped"
    )]
    CappedCollectionRequired {
        /// Name of the offending collection
        collection: String,
    },

    /// A fatal cursor failure (connectivity or an unclassified driver
    /// error). Recoverable losses are absorbed internally.
    #[error(transparent)]
    Cursor(CursorError),

    /// Persistent tracking could not be prepared at startup (index
    /// verification or the initial checkpoint fetch).
    #[error("failed to prepare persistent tracking: {0}")]
    Tracking(#[from] TrackingError),

    /// A tailed document does not satisfy the event contract.
    #[error(transparent)]
    MalformedEvent(#[from] EventError),
}

/// Binds a tracking store to the consumer identity it checkpoints for.
#[derive(Clone)]
pub struct TrackerBinding {
    store: Arc<dyn TrackingStore>,
    consumer_id: String,
}

impl TrackerBinding {
    /// Creates a binding. The consumer identity has already been validated
    /// as non-empty by configuration.
    #[must_use]
    pub fn new(store: Arc<dyn TrackingStore>, consumer_id: impl Into<String>) -> Self {
        Self {
            store,
            consumer_id: consumer_id.into(),
        }
    }

    /// The bound consumer identity.
    #[must_use]
    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }
}

/// How one drain pass over a cursor ended.
enum DrainEnd {
    /// The cursor died without error; regenerate and keep going.
    CursorDead,
    /// The cursor failed in a recoverable way; regenerate and keep going.
    Recoverable(CursorError),
    /// The run signal cleared; terminate cleanly.
    Stopped,
    /// A fatal failure; terminate and surface it.
    Fatal(TailError),
}

/// The tailing run loop over one capped collection.
///
/// Generic over the cursor factory so the loop can be driven by any store
/// honoring the [`LiveCursor`] contract, and over the sink receiving the
/// events. Construct one engine per run; `run` consumes it.
pub struct TailingEngine<F, K> {
    factory: Arc<F>,
    tracker: Option<TrackerBinding>,
    sink: Arc<Mutex<K>>,
    run_signal: watch::Receiver<bool>,
    regeneration_delay: Duration,
    collection: String,
    position: Position,
    /// Last forwarded identifier not yet persisted as a checkpoint.
    unpersisted: Option<ObjectId>,
}

impl<F, K> TailingEngine<F, K>
where
    F: CursorFactory,
    K: DocumentSink,
{
    /// Creates an engine.
    ///
    /// `run_signal` is owned by the consumer lifecycle adapter; the engine
    /// only reads it. `regeneration_delay` is the resolved inter-attempt
    /// delay (zero disables the pause entirely).
    #[must_use]
    pub fn new(
        factory: Arc<F>,
        tracker: Option<TrackerBinding>,
        sink: Arc<Mutex<K>>,
        run_signal: watch::Receiver<bool>,
        regeneration_delay: Duration,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            factory,
            tracker,
            sink,
            run_signal,
            regeneration_delay,
            collection: collection.into(),
            position: Position::Oldest,
            unpersisted: None,
        }
    }

    /// Runs the loop to completion.
    ///
    /// Returns `Ok(())` when the run signal cleared, `Err` on a fatal
    /// failure. Either way a best-effort checkpoint for the last forwarded
    /// event has been attempted before returning.
    ///
    /// # Errors
    ///
    /// See [`TailError`].
    #[instrument(skip(self), fields(collection = %self.collection))]
    pub async fn run(mut self) -> Result<(), TailError> {
        self.factory.check_capped().await.map_err(|err| match err {
            CursorError::NotCapped { collection } => {
                TailError::CappedCollectionRequired { collection }
            }
            other => TailError::Cursor(other),
        })?;

        self.load_position().await?;

        let mut first_attempt = true;
        loop {
            if !self.is_running() {
                return self.terminate_cleanly().await;
            }

            if first_attempt {
                first_attempt = false;
            } else {
                metrics::increment_cursor_regenerations(&self.collection);
                if !self.regeneration_pause().await {
                    return self.terminate_cleanly().await;
                }
            }

            let mut cursor = match self.factory.open(&self.position).await {
                Ok(cursor) => cursor,
                Err(err) if err.is_recoverable() => {
                    warn!(error = %err, "failed to open cursor, retrying");
                    continue;
                }
                Err(err) => {
                    self.checkpoint_best_effort().await;
                    error!(error = %err, "fatal failure while opening cursor");
                    return Err(TailError::Cursor(err));
                }
            };

            let end = self.drain(cursor.as_mut()).await;
            cursor.release().await;
            self.checkpoint_best_effort().await;

            match end {
                DrainEnd::CursorDead => {
                    debug!("cursor exhausted its data availability, regenerating");
                }
                DrainEnd::Recoverable(err) => {
                    warn!(error = %err, "recoverable cursor failure, regenerating");
                }
                DrainEnd::Stopped => {
                    info!("run signal cleared, tailing stopped");
                    return Ok(());
                }
                DrainEnd::Fatal(err) => {
                    error!(error = %err, "fatal failure, tailing stopped");
                    return Err(err);
                }
            }
        }
    }

    /// Resolves the starting position from the tracking store.
    async fn load_position(&mut self) -> Result<(), TailError> {
        let Some(tracker) = &self.tracker else {
            return Ok(());
        };

        tracker.store.ensure_ready().await?;

        match tracker
            .store
            .fetch_last_tracked_id(&tracker.consumer_id)
            .await?
        {
            Some(id) => {
                info!(
                    consumer_id = %tracker.consumer_id,
                    last_tracked_id = %id,
                    "resuming from persisted checkpoint"
                );
                self.position = Position::After(id);
            }
            None => {
                info!(
                    consumer_id = %tracker.consumer_id,
                    "no checkpoint found, starting from the oldest retained event"
                );
            }
        }
        Ok(())
    }

    /// Drains one cursor until it runs out of data, fails, or the run
    /// signal clears.
    async fn drain(&mut self, cursor: &mut dyn LiveCursor) -> DrainEnd {
        loop {
            if !self.is_running() {
                return DrainEnd::Stopped;
            }

            match cursor.try_next().await {
                Ok(Some(doc)) => {
                    if let Err(err) = self.forward(doc).await {
                        return DrainEnd::Fatal(err);
                    }
                }
                Ok(None) => {
                    // The drain ran dry: checkpoint opportunity before we
                    // block waiting for new data.
                    self.checkpoint_best_effort().await;

                    let awaited = tokio::select! {
                        res = cursor.await_data() => Some(res),
                        () = Self::signal_cleared(&mut self.run_signal) => None,
                    };

                    match awaited {
                        None => return DrainEnd::Stopped,
                        Some(Ok(true)) => {}
                        Some(Ok(false)) => return DrainEnd::CursorDead,
                        Some(Err(err)) if err.is_recoverable() => {
                            return DrainEnd::Recoverable(err)
                        }
                        Some(Err(err)) => return DrainEnd::Fatal(TailError::Cursor(err)),
                    }
                }
                Err(err) if err.is_recoverable() => return DrainEnd::Recoverable(err),
                Err(err) => return DrainEnd::Fatal(TailError::Cursor(err)),
            }
        }
    }

    /// Forwards one document to the sink and advances the position.
    ///
    /// The position advances regardless of the sink outcome: each document
    /// is forwarded at most once per engine lifetime, and a sink failure
    /// stays attached to its own delivery.
    async fn forward(&mut self, doc: Document) -> Result<(), TailError> {
        let event = Event::from_document(doc)?;
        let id = event.id();

        let started = Instant::now();
        let outcome = self.sink.lock().await.handle(event).await;
        metrics::record_sink_handle_duration(started.elapsed().as_secs_f64(), &self.collection);

        if let Err(err) = outcome {
            warn!(event_id = %id, error = %err, "sink failed to handle event, continuing");
            metrics::increment_sink_failures(&self.collection);
        }

        metrics::increment_events_forwarded(&self.collection);
        self.position = Position::After(id);
        self.unpersisted = Some(id);
        Ok(())
    }

    /// Persists the last forwarded identifier when tracking is enabled and
    /// something new was forwarded since the previous persist. Failures are
    /// logged and deferred; the in-memory position is unaffected.
    async fn checkpoint_best_effort(&mut self) {
        let Some(tracker) = &self.tracker else {
            return;
        };
        let Some(id) = self.unpersisted else {
            return;
        };

        match tracker
            .store
            .persist_last_tracked_id(&tracker.consumer_id, id)
            .await
        {
            Ok(()) => {
                debug!(
                    consumer_id = %tracker.consumer_id,
                    last_tracked_id = %id,
                    "checkpoint persisted"
                );
                metrics::increment_checkpoints_persisted(&tracker.consumer_id);
                self.unpersisted = None;
            }
            Err(err) => {
                warn!(
                    consumer_id = %tracker.consumer_id,
                    error = %err,
                    "checkpoint write failed, will retry at the next opportunity"
                );
                metrics::increment_checkpoint_write_failures(&tracker.consumer_id);
            }
        }
    }

    /// Sleeps the inter-attempt delay, racing the run signal. Returns
    /// `false` when the signal cleared during the pause.
    async fn regeneration_pause(&mut self) -> bool {
        if self.regeneration_delay.is_zero() {
            return true;
        }

        debug!(
            delay_ms = self.regeneration_delay.as_millis() as u64,
            "pausing before cursor regeneration"
        );

        tokio::select! {
            () = sleep(self.regeneration_delay) => true,
            () = Self::signal_cleared(&mut self.run_signal) => false,
        }
    }

    async fn terminate_cleanly(&mut self) -> Result<(), TailError> {
        self.checkpoint_best_effort().await;
        info!("run signal cleared, tailing stopped");
        Ok(())
    }

    /// Current value of the run signal. A dropped sender counts as a stop
    /// request.
    fn is_running(&self) -> bool {
        self.run_signal.has_changed().is_ok() && *self.run_signal.borrow()
    }

    /// Resolves once the run signal clears (or its owner goes away).
    async fn signal_cleared(run_signal: &mut watch::Receiver<bool>) {
        while *run_signal.borrow_and_update() {
            if run_signal.changed().await.is_err() {
                return;
            }
        }
    }
}
