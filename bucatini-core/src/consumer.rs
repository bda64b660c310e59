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

//! Consumer lifecycle: start, stop, pause and resume around the tailing
//! engine.
//!
//! A [`Consumer`] owns the run signal and a dedicated tokio task executing
//! one [`TailingEngine`] run. Stopping is cooperative: `stop` flips the run
//! signal and waits for the task's own clean exit; it never aborts the
//! task. Pause and resume are stop and start that keep the configuration:
//! resume re-fetches the persisted position, so a pause/resume cycle has
//! exactly the delivery guarantees of a stop/start cycle.
//!
//! The lifecycle is a first-class state machine:
//!
//! ```text
//! Idle ──start──► Running ──stop──► Stopping ──► Terminated ──start──► Running
//!                    │                                 ▲
//!                    └── fatal engine failure ──► Failed (error retrievable)
//! ```
//!
//! A fatal engine failure leaves the consumer observably stopped
//! ([`ConsumerState::Failed`]) with the triggering error available through
//! [`Consumer::last_error`], never silently idle.

use crate::config::{ConfigError, TailConfig};
use crate::cursor::{CursorFactory, TailCursorFactory};
use crate::metrics;
use crate::sink::DocumentSink;
use crate::tailer::{TailError, TailingEngine, TrackerBinding};
use crate::tracker::TrackingStore;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

/// Lifecycle states of a [`Consumer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// Constructed, never started.
    Idle,
    /// The tailing task is running.
    Running,
    /// A stop was requested; waiting for the tailing task to exit.
    Stopping,
    /// The tailing task exited cleanly.
    Terminated,
    /// The tailing task exited with a fatal error.
    Failed,
}

impl ConsumerState {
    /// Numeric code published on the status gauge.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::Stopping => 2,
            Self::Terminated => 3,
            Self::Failed => 4,
        }
    }
}

/// Errors raised by lifecycle operations.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// `start` was called while the consumer is running or stopping.
    #[error("consumer is already running")]
    AlreadyRunning,

    /// The consumer was wired inconsistently with its configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A tailing consumer over one capped collection.
///
/// Generic over the cursor factory (MongoDB in production, scripted in
/// tests) and the document sink.
pub struct Consumer<F, K> {
    config: TailConfig,
    factory: Arc<F>,
    tracker: Option<Arc<dyn TrackingStore>>,
    sink: Arc<Mutex<K>>,
    run_signal: Option<watch::Sender<bool>>,
    worker: Option<JoinHandle<()>>,
    state: Arc<RwLock<ConsumerState>>,
    last_error: Arc<RwLock<Option<Arc<TailError>>>>,
}

impl<K> Consumer<TailCursorFactory, K>
where
    K: DocumentSink + 'static,
{
    /// Creates a MongoDB-backed consumer from its configuration.
    ///
    /// `tracker` must be supplied exactly when the configuration enables
    /// persistent tracking.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingTrackingStore`] or
    /// [`ConfigError::TrackingNotConfigured`] when `tracker` and the
    /// configuration disagree.
    pub fn new(
        config: TailConfig,
        tracker: Option<Arc<dyn TrackingStore>>,
        sink: K,
    ) -> Result<Self, ConfigError> {
        let database = config.client().database(config.database());
        let factory = TailCursorFactory::new(database, config.collection());
        Self::with_factory(config, factory, tracker, sink)
    }
}

impl<F, K> Consumer<F, K>
where
    F: CursorFactory + 'static,
    K: DocumentSink + 'static,
{
    /// Creates a consumer around an explicit cursor factory.
    ///
    /// # Errors
    ///
    /// Same wiring validation as [`Consumer::new`].
    pub fn with_factory(
        config: TailConfig,
        factory: F,
        tracker: Option<Arc<dyn TrackingStore>>,
        sink: K,
    ) -> Result<Self, ConfigError> {
        match (config.tracking(), &tracker) {
            (Some(_), None) => return Err(ConfigError::MissingTrackingStore),
            (None, Some(_)) => return Err(ConfigError::TrackingNotConfigured),
            _ => {}
        }

        Ok(Self {
            config,
            factory: Arc::new(factory),
            tracker,
            sink: Arc::new(Mutex::new(sink)),
            run_signal: None,
            worker: None,
            state: Arc::new(RwLock::new(ConsumerState::Idle)),
            last_error: Arc::new(RwLock::new(None)),
        })
    }

    /// Starts the tailing task.
    ///
    /// The persisted position is loaded inside the task, then the engine
    /// loop runs until a stop request or a fatal failure.
    ///
    /// # Errors
    ///
    /// [`ConsumerError::AlreadyRunning`] when the consumer is running or
    /// still stopping.
    #[instrument(skip(self), fields(collection = %self.config.collection()))]
    pub async fn start(&mut self) -> Result<(), ConsumerError> {
        {
            let state = self.state.read().await;
            if matches!(*state, ConsumerState::Running | ConsumerState::Stopping) {
                return Err(ConsumerError::AlreadyRunning);
            }
        }

        // Reap a previous, already-exited run.
        self.run_signal = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }

        info!(
            database = %self.config.database(),
            tracking = self.config.is_tracking_enabled(),
            "starting consumer"
        );

        let (signal_tx, signal_rx) = watch::channel(true);

        let binding = match (self.config.tracking(), &self.tracker) {
            (Some(tracking), Some(store)) => Some(TrackerBinding::new(
                Arc::clone(store),
                tracking.consumer_id(),
            )),
            _ => None,
        };

        let engine = TailingEngine::new(
            Arc::clone(&self.factory),
            binding,
            Arc::clone(&self.sink),
            signal_rx,
            self.config.cursor_regeneration_delay(),
            self.config.collection(),
        );

        *self.state.write().await = ConsumerState::Running;
        *self.last_error.write().await = None;
        metrics::set_consumer_status(self.config.collection(), ConsumerState::Running.code());

        let state = Arc::clone(&self.state);
        let last_error = Arc::clone(&self.last_error);
        let collection = self.config.collection().to_string();

        self.worker = Some(tokio::spawn(async move {
            match engine.run().await {
                Ok(()) => {
                    *state.write().await = ConsumerState::Terminated;
                    metrics::set_consumer_status(&collection, ConsumerState::Terminated.code());
                }
                Err(err) => {
                    error!(error = %err, "consumer failed");
                    *last_error.write().await = Some(Arc::new(err));
                    *state.write().await = ConsumerState::Failed;
                    metrics::set_consumer_status(&collection, ConsumerState::Failed.code());
                }
            }
        }));
        self.run_signal = Some(signal_tx);

        Ok(())
    }

    /// Requests a stop and waits for the tailing task to exit.
    ///
    /// Cooperative only: the task observes the run signal at every loop
    /// iteration and at both suspension points, persists a best-effort
    /// checkpoint and exits on its own. Safe to call repeatedly, or before
    /// `start` (a no-op then).
    #[instrument(skip(self), fields(collection = %self.config.collection()))]
    pub async fn stop(&mut self) {
        let Some(signal) = self.run_signal.take() else {
            debug!("stop requested but consumer is not running");
            return;
        };

        {
            let mut state = self.state.write().await;
            if *state == ConsumerState::Running {
                *state = ConsumerState::Stopping;
                metrics::set_consumer_status(
                    self.config.collection(),
                    ConsumerState::Stopping.code(),
                );
            }
        }

        info!("stopping consumer");
        let _ = signal.send(false);

        if let Some(worker) = self.worker.take() {
            if let Err(err) = worker.await {
                error!(error = %err, "tailing task panicked");
                *self.state.write().await = ConsumerState::Failed;
                metrics::set_consumer_status(
                    self.config.collection(),
                    ConsumerState::Failed.code(),
                );
            }
        }
    }

    /// Stops the consumer while keeping its configuration, ready to resume.
    pub async fn pause(&mut self) {
        info!("pausing consumer");
        self.stop().await;
    }

    /// Starts again after a pause. The persisted position is re-fetched, so
    /// pause/resume behaves exactly like stop/start with respect to
    /// delivery guarantees.
    ///
    /// # Errors
    ///
    /// Same as [`Consumer::start`].
    pub async fn resume(&mut self) -> Result<(), ConsumerError> {
        info!("resuming consumer");
        self.start().await
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ConsumerState {
        *self.state.read().await
    }

    /// True while the tailing task is running.
    pub async fn is_started(&self) -> bool {
        matches!(self.state().await, ConsumerState::Running)
    }

    /// The fatal error of the last run, when the consumer is
    /// [`ConsumerState::Failed`].
    pub async fn last_error(&self) -> Option<Arc<TailError>> {
        self.last_error.read().await.clone()
    }

    /// The consumer configuration.
    #[must_use]
    pub fn config(&self) -> &TailConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_codes_match_the_gauge_contract() {
        assert_eq!(ConsumerState::Idle.code(), 0);
        assert_eq!(ConsumerState::Running.code(), 1);
        assert_eq!(ConsumerState::Stopping.code(), 2);
        assert_eq!(ConsumerState::Terminated.code(), 3);
        assert_eq!(ConsumerState::Failed.code(), 4);
    }
}
