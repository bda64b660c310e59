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

//! Consumer configuration and validation.
//!
//! [`TailConfig`] resolves everything a consumer needs before it starts: a
//! MongoDB client, the effective database and collection names, and the
//! optional persistent tracking block. All validation happens in the
//! builders, so a constructed config is known-good and the engine never has
//! to re-validate at runtime.
//!
//! Persistent tracking is enabled by supplying a [`TrackingConfig`]. Without
//! one, the consumer starts from the oldest retained event on every run and
//! applies no inter-attempt delay when regenerating cursors.
//!
//! ```rust,no_run
//! use bucatini_core::config::{TailConfig, TrackingConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = mongodb::Client::with_uri_str("mongodb://localhost:27017").await?;
//!
//! let tracking = TrackingConfig::builder()
//!     .consumer_id("billing-consumer")
//!     .cursor_regeneration_delay(Duration::from_millis(2000))
//!     .build()?;
//!
//! let config = TailConfig::builder()
//!     .client(client)
//!     .database("eventsystemdb")
//!     .collection("events")
//!     .tracking(tracking)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use crate::tracker::TRACKER_COLLECTION_NAME;
use mongodb::Client;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Database used when none is configured.
pub const DEFAULT_DATABASE: &str = "eventsystemdb";

/// Event collection used when none is configured.
pub const DEFAULT_COLLECTION: &str = "events";

/// Inter-attempt delay used when none is configured, or when an explicit
/// zero is supplied.
pub const DEFAULT_CURSOR_REGENERATION_DELAY: Duration = Duration::from_millis(1000);

/// Configuration errors, raised before a consumer starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No MongoDB client was supplied.
    #[error("invalid configuration: a mongodb::Client must be supplied")]
    MissingClient,

    /// A tracking block was supplied without a usable consumer identity.
    #[error("invalid configuration: persistent tracking requires a non-empty consumer id")]
    EmptyConsumerId,

    /// The config enables persistent tracking but no tracking store was
    /// wired into the consumer.
    #[error("invalid configuration: tracking is enabled but no tracking store was supplied")]
    MissingTrackingStore,

    /// A tracking store was wired in, but the config has no tracking block
    /// to bind it to.
    #[error("invalid configuration: a tracking store was supplied but tracking is not configured")]
    TrackingNotConfigured,
}

/// Persistent tracking settings for one consumer.
#[derive(Clone)]
pub struct TrackingConfig {
    consumer_id: String,
    cursor_regeneration_delay: Duration,
    tracker_collection: String,
}

impl TrackingConfig {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> TrackingConfigBuilder {
        TrackingConfigBuilder::default()
    }

    /// The consumer identity this checkpoint belongs to. Non-empty.
    #[must_use]
    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    /// Delay applied before a lost cursor is rebuilt.
    #[must_use]
    pub fn cursor_regeneration_delay(&self) -> Duration {
        self.cursor_regeneration_delay
    }

    /// Name of the tracking collection.
    #[must_use]
    pub fn tracker_collection(&self) -> &str {
        &self.tracker_collection
    }
}

impl fmt::Debug for TrackingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingConfig")
            .field("consumer_id", &self.consumer_id)
            .field("cursor_regeneration_delay", &self.cursor_regeneration_delay)
            .field("tracker_collection", &self.tracker_collection)
            .finish()
    }
}

/// Builder for [`TrackingConfig`].
#[derive(Debug, Default)]
pub struct TrackingConfigBuilder {
    consumer_id: Option<String>,
    cursor_regeneration_delay: Option<Duration>,
    tracker_collection: Option<String>,
}

impl TrackingConfigBuilder {
    /// Sets the consumer identity. Required and non-empty.
    #[must_use]
    pub fn consumer_id(mut self, id: impl Into<String>) -> Self {
        self.consumer_id = Some(id.into());
        self
    }

    /// Sets the delay applied before rebuilding a lost cursor.
    ///
    /// Default: 1000 ms. An explicit zero also resolves to the default.
    #[must_use]
    pub fn cursor_regeneration_delay(mut self, delay: Duration) -> Self {
        self.cursor_regeneration_delay = Some(delay);
        self
    }

    /// Overrides the tracking collection name. Default: `"tracker"`.
    #[must_use]
    pub fn tracker_collection(mut self, name: impl Into<String>) -> Self {
        self.tracker_collection = Some(name.into());
        self
    }

    /// Builds the tracking configuration.
    ///
    /// # Errors
    ///
    /// [`ConfigError::EmptyConsumerId`] when no consumer id was supplied, or
    /// the supplied one is empty.
    pub fn build(self) -> Result<TrackingConfig, ConfigError> {
        let consumer_id = self
            .consumer_id
            .filter(|id| !id.is_empty())
            .ok_or(ConfigError::EmptyConsumerId)?;

        let delay = match self.cursor_regeneration_delay {
            None => DEFAULT_CURSOR_REGENERATION_DELAY,
            Some(d) if d.is_zero() => DEFAULT_CURSOR_REGENERATION_DELAY,
            Some(d) => d,
        };

        Ok(TrackingConfig {
            consumer_id,
            cursor_regeneration_delay: delay,
            tracker_collection: self
                .tracker_collection
                .unwrap_or_else(|| TRACKER_COLLECTION_NAME.to_string()),
        })
    }
}

/// Resolved consumer configuration.
#[derive(Clone)]
pub struct TailConfig {
    client: Client,
    database: String,
    collection: String,
    tracking: Option<TrackingConfig>,
}

impl TailConfig {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> TailConfigBuilder {
        TailConfigBuilder::default()
    }

    /// The supplied MongoDB client.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Effective database name.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Effective event collection name.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The tracking block, when persistent tracking is enabled.
    #[must_use]
    pub fn tracking(&self) -> Option<&TrackingConfig> {
        self.tracking.as_ref()
    }

    /// True when persistent tracking is enabled.
    #[must_use]
    pub fn is_tracking_enabled(&self) -> bool {
        self.tracking.is_some()
    }

    /// The delay to apply before rebuilding a lost cursor. Zero when
    /// tracking is disabled.
    #[must_use]
    pub fn cursor_regeneration_delay(&self) -> Duration {
        self.tracking
            .as_ref()
            .map_or(Duration::ZERO, TrackingConfig::cursor_regeneration_delay)
    }
}

impl fmt::Debug for TailConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TailConfig")
            .field("database", &self.database)
            .field("collection", &self.collection)
            .field("tracking", &self.tracking)
            .finish_non_exhaustive()
    }
}

/// Builder for [`TailConfig`].
#[derive(Default)]
pub struct TailConfigBuilder {
    client: Option<Client>,
    database: Option<String>,
    collection: Option<String>,
    tracking: Option<TrackingConfig>,
}

impl TailConfigBuilder {
    /// Sets the MongoDB client. Required.
    #[must_use]
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Sets the database name. Default: `"eventsystemdb"`.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Sets the event collection name. Default: `"events"`.
    #[must_use]
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Enables persistent tracking.
    #[must_use]
    pub fn tracking(mut self, tracking: TrackingConfig) -> Self {
        self.tracking = Some(tracking);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingClient`] when no client was supplied.
    pub fn build(self) -> Result<TailConfig, ConfigError> {
        let client = self.client.ok_or(ConfigError::MissingClient)?;

        Ok(TailConfig {
            client,
            database: self
                .database
                .unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            collection: self
                .collection
                .unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
            tracking: self.tracking,
        })
    }
}

impl fmt::Debug for TailConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TailConfigBuilder")
            .field("database", &self.database)
            .field("collection", &self.collection)
            .field("tracking", &self.tracking)
            .finish_non_exhaustive()
    }
}
