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

//! Live tailable cursors over the capped event collection.
//!
//! The tailing engine never talks to the MongoDB driver directly. It depends
//! on two small capabilities defined here:
//!
//! - [`CursorFactory`]: "given a tailing position, open a live cursor over
//!   the event collection, ordered by insertion order", plus the one-time
//!   capped-collection precondition check.
//! - [`LiveCursor`]: the opened cursor itself, split into a non-blocking
//!   probe ([`LiveCursor::try_next`]) and a blocking wait
//!   ([`LiveCursor::await_data`]), with an idempotent [`LiveCursor::release`].
//!
//! [`TailCursorFactory`] is the MongoDB implementation: a `$natural`-ordered
//! find with `CursorType::TailableAwait`, filtered to `_id > P` once a
//! position is known.
//!
//! # Failure classification
//!
//! Tailable cursors can be invalidated by the server at any time. The engine
//! needs to tell "the cursor died, build another one" apart from "the
//! deployment is unreachable, stop the consumer". [`CursorError`] encodes
//! that boundary:
//!
//! - `CursorNotFound` (43), `CappedPositionLost` (136), `QueryPlanKilled`
//!   (175) and `CursorKilled` (237) become [`CursorError::Lost`], the only
//!   recoverable classification.
//! - I/O, server selection, DNS and pool-cleared failures become
//!   [`CursorError::Connectivity`], which is fatal.
//! - Every other command error becomes [`CursorError::Other`], also fatal.

use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Document};
use futures::TryStreamExt;
use mongodb::{
    error::{Error as DriverError, ErrorKind},
    options::{CursorType, ReadPreference, SelectionCriteria},
    Collection, Cursor, Database,
};
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info};

/// How long [`MongoLiveCursor::try_next`] polls the driver before reporting
/// "nothing buffered right now".
const TRY_NEXT_WINDOW: Duration = Duration::from_millis(10);

/// Server error codes that indicate the cursor itself is gone while the
/// deployment is still healthy. These are worth a cursor rebuild.
const CURSOR_GONE_CODES: [i32; 4] = [
    43,  // CursorNotFound
    136, // CappedPositionLost
    175, // QueryPlanKilled
    237, // CursorKilled
];

/// Where a new cursor should start reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Start from the oldest event the capped collection still retains.
    Oldest,

    /// Start strictly after the event with this identifier.
    After(ObjectId),
}

impl Position {
    /// The find filter implementing this position.
    #[must_use]
    pub fn filter(&self) -> Document {
        match self {
            Self::Oldest => doc! {},
            Self::After(id) => doc! { "_id": { "$gt": id } },
        }
    }

    /// Returns the identifier this position sits after, if any.
    #[must_use]
    pub fn last_id(&self) -> Option<ObjectId> {
        match self {
            Self::Oldest => None,
            Self::After(id) => Some(*id),
        }
    }
}

/// Errors surfaced by cursor construction and iteration.
#[derive(Debug, Error)]
pub enum CursorError {
    /// The target collection exists but is not capped. Tailable cursors
    /// require capped collections, so this is fatal and raised before the
    /// tailing loop starts.
    #[error(
        "tailable cursors are only compatible with capped collections, \
         and collection {collection} is not capped"
    )]
    NotCapped {
        /// Name of the offending collection
        collection: String,
    },

    /// The cursor was invalidated server-side (killed, expired, or its
    /// capped position was overwritten). Recoverable by rebuilding the
    /// cursor from the current position.
    #[error("tailable cursor lost: {message}")]
    Lost {
        message: String,
        /// Server error code when one was reported
        code: Option<i32>,
    },

    /// The deployment could not be reached. Fatal: the consumer terminates
    /// and surfaces the error to its owner.
    #[error("connectivity failure: {message}")]
    Connectivity {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Any other driver failure. Treated as fatal.
    #[error("driver error: {message}")]
    Other {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl CursorError {
    /// Classifies a driver error into the recoverable/fatal boundary the
    /// tailing engine relies on.
    #[must_use]
    pub fn from_driver(err: DriverError) -> Self {
        match err.kind.as_ref() {
            ErrorKind::Command(cmd) if CURSOR_GONE_CODES.contains(&cmd.code) => Self::Lost {
                message: err.to_string(),
                code: Some(cmd.code),
            },
            ErrorKind::Io(_)
            | ErrorKind::ServerSelection { .. }
            | ErrorKind::DnsResolve { .. }
            | ErrorKind::ConnectionPoolCleared { .. } => Self::Connectivity {
                message: err.to_string(),
                source: Some(Box::new(err)),
            },
            _ => Self::Other {
                message: err.to_string(),
                source: Some(Box::new(err)),
            },
        }
    }

    /// True when rebuilding the cursor is worth attempting.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Lost { .. })
    }

    /// Short error category for metrics and logging labels.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::NotCapped { .. } => "not_capped",
            Self::Lost { .. } => "lost",
            Self::Connectivity { .. } => "connectivity",
            Self::Other { .. } => "driver",
        }
    }
}

/// A live, insertion-ordered cursor over the event collection.
///
/// Implementations must make server-side invalidation observable as a
/// [`CursorError`], never as silent exhaustion.
#[async_trait]
pub trait LiveCursor: Send {
    /// Returns the next document if one is available without blocking
    /// indefinitely. `Ok(None)` means nothing is buffered right now; the
    /// cursor may still produce data later.
    async fn try_next(&mut self) -> Result<Option<Document>, CursorError>;

    /// Blocks until more data exists. Returns `Ok(false)` when the cursor
    /// has died and cannot produce further documents; a subsequent
    /// [`LiveCursor::try_next`] on the factory's replacement cursor picks up
    /// from the caller's position.
    async fn await_data(&mut self) -> Result<bool, CursorError>;

    /// Releases the cursor. Idempotent and safe regardless of content state.
    async fn release(&mut self);
}

/// Opens [`LiveCursor`]s for the tailing engine.
#[async_trait]
pub trait CursorFactory: Send + Sync {
    /// Verifies the event collection is capped. Called once per engine run,
    /// before the first cursor is opened.
    async fn check_capped(&self) -> Result<(), CursorError>;

    /// Opens a live cursor starting at `position`.
    async fn open(&self, position: &Position) -> Result<Box<dyn LiveCursor>, CursorError>;
}

/// MongoDB-backed cursor factory over a named capped collection.
#[derive(Clone)]
pub struct TailCursorFactory {
    database: Database,
    collection: Collection<Document>,
    collection_name: String,
}

impl TailCursorFactory {
    /// Creates a factory for `collection` within `database`.
    #[must_use]
    pub fn new(database: Database, collection: &str) -> Self {
        Self {
            collection: database.collection(collection),
            collection_name: collection.to_string(),
            database,
        }
    }

    /// Name of the tailed collection.
    #[must_use]
    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }
}

#[async_trait]
impl CursorFactory for TailCursorFactory {
    async fn check_capped(&self) -> Result<(), CursorError> {
        let stats = self
            .database
            .run_command(doc! { "collStats": &self.collection_name })
            .selection_criteria(SelectionCriteria::ReadPreference(ReadPreference::Primary))
            .await
            .map_err(CursorError::from_driver)?;

        if stats.get_bool("capped").unwrap_or(false) {
            debug!(collection = %self.collection_name, "capped collection precondition satisfied");
            Ok(())
        } else {
            Err(CursorError::NotCapped {
                collection: self.collection_name.clone(),
            })
        }
    }

    async fn open(&self, position: &Position) -> Result<Box<dyn LiveCursor>, CursorError> {
        info!(
            collection = %self.collection_name,
            after = ?position.last_id(),
            "opening tailable cursor"
        );

        let cursor = self
            .collection
            .find(position.filter())
            .sort(doc! { "$natural": 1 })
            .cursor_type(CursorType::TailableAwait)
            .await
            .map_err(CursorError::from_driver)?;

        Ok(Box::new(MongoLiveCursor::new(cursor)))
    }
}

/// [`LiveCursor`] over a driver cursor in `TailableAwait` mode.
pub struct MongoLiveCursor {
    inner: Option<Cursor<Document>>,
    /// Document produced by `await_data` and not yet handed out.
    pending: Option<Document>,
}

impl MongoLiveCursor {
    fn new(cursor: Cursor<Document>) -> Self {
        Self {
            inner: Some(cursor),
            pending: None,
        }
    }
}

#[async_trait]
impl LiveCursor for MongoLiveCursor {
    async fn try_next(&mut self) -> Result<Option<Document>, CursorError> {
        if let Some(doc) = self.pending.take() {
            return Ok(Some(doc));
        }

        let Some(cursor) = self.inner.as_mut() else {
            return Ok(None);
        };

        // Bounded probe. The driver cursor keeps its in-flight getMore as
        // internal state across polls, so a timed-out probe loses nothing.
        match timeout(TRY_NEXT_WINDOW, cursor.try_next()).await {
            Ok(Ok(Some(doc))) => Ok(Some(doc)),
            Ok(Ok(None)) => {
                // Stream exhaustion on a tailable cursor means the cursor
                // is dead (empty collection at open time, or invalidated).
                self.inner = None;
                Ok(None)
            }
            Ok(Err(err)) => {
                self.inner = None;
                Err(CursorError::from_driver(err))
            }
            Err(_elapsed) => Ok(None),
        }
    }

    async fn await_data(&mut self) -> Result<bool, CursorError> {
        if self.pending.is_some() {
            return Ok(true);
        }

        let Some(cursor) = self.inner.as_mut() else {
            return Ok(false);
        };

        match cursor.try_next().await {
            Ok(Some(doc)) => {
                self.pending = Some(doc);
                Ok(true)
            }
            Ok(None) => {
                self.inner = None;
                Ok(false)
            }
            Err(err) => {
                self.inner = None;
                Err(CursorError::from_driver(err))
            }
        }
    }

    async fn release(&mut self) {
        if self.inner.take().is_some() {
            debug!("released tailable cursor");
        }
        self.pending = None;
    }
}
