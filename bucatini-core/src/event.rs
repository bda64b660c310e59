//! Event representation for documents tailed from the capped collection.
//!
//! Events are opaque BSON documents published by external systems. The only
//! field Bucatini interprets is `_id`: an [`ObjectId`] whose generation order
//! matches the insertion order of the capped collection, which is what makes
//! position-based tailing possible.
//!
//! # Examples
//!
//! ```rust
//! use bucatini_core::event::Event;
//! use bson::{doc, oid::ObjectId};
//!
//! let id = ObjectId::new();
//! let event = Event::from_document(doc! {
//!     "_id": id,
//!     "type": "order-created",
//!     "payload": { "order": 42 },
//! }).unwrap();
//!
//! assert_eq!(event.id(), id);
//! assert_eq!(event.body().get_str("type").unwrap(), "order-created");
//! ```

use bson::{oid::ObjectId, Bson, Document};
use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors raised when a tailed document does not satisfy the event contract.
#[derive(Debug, Clone, Error)]
pub enum EventError {
    /// The document carries no `_id` field at all.
    #[error("event document has no _id field")]
    MissingId,

    /// The `_id` field is present but is not an `ObjectId`.
    #[error("event _id is not an ObjectId (found {found})")]
    InvalidId {
        /// BSON element type name of the offending value
        found: &'static str,
    },
}

/// A single document fetched from the event collection.
///
/// The body is kept schema-free. Bucatini never mutates events; the capped
/// collection's size-based eviction is the only thing that removes them.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Monotonically increasing identifier assigned at publish time.
    id: ObjectId,

    /// The full document as stored in the collection, `_id` included.
    body: Document,
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.body.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let body = Document::deserialize(deserializer)?;
        Self::from_document(body).map_err(de::Error::custom)
    }
}

impl Event {
    /// Builds an event from a raw collection document.
    ///
    /// # Errors
    ///
    /// Returns [`EventError`] when the document has no `_id` or the `_id` is
    /// not an `ObjectId`.
    pub fn from_document(body: Document) -> Result<Self, EventError> {
        let id = match body.get("_id") {
            Some(Bson::ObjectId(id)) => *id,
            Some(other) => {
                return Err(EventError::InvalidId {
                    found: bson_type_name(other),
                })
            }
            None => return Err(EventError::MissingId),
        };
        Ok(Self { id, body })
    }

    /// The event identifier.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Borrow the underlying document.
    #[inline]
    #[must_use]
    pub fn body(&self) -> &Document {
        &self.body
    }

    /// Consume the event and return the underlying document.
    #[must_use]
    pub fn into_body(self) -> Document {
        self.body
    }

    /// Approximate publish time, derived from the `ObjectId` timestamp.
    ///
    /// `ObjectId` timestamps have one-second resolution, so this is suitable
    /// for lag observation rather than precise ordering (ordering comes from
    /// the identifier itself).
    #[must_use]
    pub fn published_at(&self) -> DateTime<Utc> {
        self.id.timestamp().to_chrono()
    }
}

fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Array(_) => "array",
        Bson::Document(_) => "document",
        Bson::Boolean(_) => "bool",
        Bson::Null => "null",
        Bson::Int32(_) => "int32",
        Bson::Int64(_) => "int64",
        Bson::Timestamp(_) => "timestamp",
        Bson::Binary(_) => "binary",
        Bson::ObjectId(_) => "objectId",
        Bson::DateTime(_) => "date",
        _ => "other",
    }
}
