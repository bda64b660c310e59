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

//! Scripted test doubles for driving the tailing engine without MongoDB.

#![allow(dead_code)]

use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Document};
use bucatini_core::cursor::{CursorError, CursorFactory, LiveCursor, Position};
use bucatini_core::tracker::{TrackingError, TrackingStore};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Deterministic, ordered identifier: byte `n` in the last position.
pub fn oid(n: u8) -> ObjectId {
    let mut bytes = [0_u8; 12];
    bytes[11] = n;
    ObjectId::from_bytes(bytes)
}

/// Event document carrying identifier `n`.
pub fn event_doc(n: u8) -> Document {
    doc! { "_id": oid(n), "seq": i32::from(n) }
}

/// One scripted behavior of a [`ScriptedCursor`].
#[derive(Debug, Clone)]
pub enum Step {
    /// `try_next` yields this document.
    Event(Document),
    /// `try_next` reports nothing buffered; the following `await_data`
    /// succeeds and draining continues.
    Dry,
    /// The cursor dies: `try_next` reports nothing, `await_data` returns
    /// `false`.
    Die,
    /// The cursor blocks forever awaiting data (until the engine is
    /// stopped from outside).
    Park,
    /// A recoverable, server-side cursor loss.
    FailLost,
    /// A fatal connectivity failure.
    FailConnectivity,
}

fn lost() -> CursorError {
    CursorError::Lost {
        message: "cursor id not found (scripted)".into(),
        code: Some(43),
    }
}

fn connectivity() -> CursorError {
    CursorError::Connectivity {
        message: "connection reset (scripted)".into(),
        source: None,
    }
}

/// A [`LiveCursor`] that replays a script.
pub struct ScriptedCursor {
    steps: VecDeque<Step>,
    released: bool,
}

impl ScriptedCursor {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
            released: false,
        }
    }
}

#[async_trait]
impl LiveCursor for ScriptedCursor {
    async fn try_next(&mut self) -> Result<Option<Document>, CursorError> {
        if self.released {
            return Ok(None);
        }
        match self.steps.front() {
            Some(Step::Event(_)) => {
                let Some(Step::Event(doc)) = self.steps.pop_front() else {
                    unreachable!()
                };
                Ok(Some(doc))
            }
            Some(Step::FailLost) => {
                self.steps.pop_front();
                Err(lost())
            }
            Some(Step::FailConnectivity) => {
                self.steps.pop_front();
                Err(connectivity())
            }
            // Dry, Die and Park stay queued for `await_data` to resolve.
            Some(Step::Dry | Step::Die | Step::Park) | None => Ok(None),
        }
    }

    async fn await_data(&mut self) -> Result<bool, CursorError> {
        if self.released {
            return Ok(false);
        }
        match self.steps.front() {
            Some(Step::Event(_)) => Ok(true),
            Some(Step::Dry) => {
                self.steps.pop_front();
                Ok(true)
            }
            Some(Step::Die) | None => {
                self.steps.pop_front();
                Ok(false)
            }
            Some(Step::Park) => {
                futures::future::pending::<()>().await;
                unreachable!()
            }
            Some(Step::FailLost) => {
                self.steps.pop_front();
                Err(lost())
            }
            Some(Step::FailConnectivity) => {
                self.steps.pop_front();
                Err(connectivity())
            }
        }
    }

    async fn release(&mut self) {
        self.released = true;
    }
}

/// A [`CursorFactory`] handing out scripted cursors, one script per open,
/// recording every open call. Clones share state, so a test can keep a
/// handle while a consumer owns another.
#[derive(Clone)]
pub struct ScriptedFactory {
    capped: bool,
    scripts: Arc<Mutex<VecDeque<Vec<Step>>>>,
    opens: Arc<Mutex<Vec<(Position, Instant)>>>,
}

impl ScriptedFactory {
    pub fn new(scripts: Vec<Vec<Step>>) -> Self {
        Self {
            capped: true,
            scripts: Arc::new(Mutex::new(scripts.into())),
            opens: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn not_capped() -> Self {
        Self {
            capped: false,
            scripts: Arc::new(Mutex::new(VecDeque::new())),
            opens: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queues a script for a later open (e.g. after a pause).
    pub fn push_script(&self, steps: Vec<Step>) {
        self.scripts.lock().unwrap().push_back(steps);
    }

    /// Positions the engine opened cursors at, in order.
    pub fn open_positions(&self) -> Vec<Position> {
        self.opens.lock().unwrap().iter().map(|(p, _)| *p).collect()
    }

    /// Gap between two recorded opens.
    pub fn gap_between_opens(&self, first: usize, second: usize) -> Duration {
        let opens = self.opens.lock().unwrap();
        opens[second].1.duration_since(opens[first].1)
    }

    pub fn open_count(&self) -> usize {
        self.opens.lock().unwrap().len()
    }
}

#[async_trait]
impl CursorFactory for ScriptedFactory {
    async fn check_capped(&self) -> Result<(), CursorError> {
        if self.capped {
            Ok(())
        } else {
            Err(CursorError::NotCapped {
                collection: "events".into(),
            })
        }
    }

    async fn open(&self, position: &Position) -> Result<Box<dyn LiveCursor>, CursorError> {
        self.opens.lock().unwrap().push((*position, Instant::now()));
        let steps = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        Ok(Box::new(ScriptedCursor::new(steps)))
    }
}

/// In-test tracking store recording every persist in order.
#[derive(Default)]
pub struct RecordingStore {
    checkpoints: Mutex<HashMap<String, ObjectId>>,
    history: Mutex<Vec<ObjectId>>,
    /// Persists beyond this count fail; `None` disables the injection.
    fail_after: Mutex<Option<usize>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a checkpoint as if a previous run had persisted it.
    pub fn seed(&self, consumer_id: &str, id: ObjectId) {
        self.checkpoints
            .lock()
            .unwrap()
            .insert(consumer_id.to_string(), id);
    }

    /// Lets the first `n` persists succeed and fails the rest.
    pub fn fail_after(&self, n: usize) {
        *self.fail_after.lock().unwrap() = Some(n);
    }

    /// Clears any injected failure.
    pub fn heal(&self) {
        *self.fail_after.lock().unwrap() = None;
    }

    pub fn persisted(&self, consumer_id: &str) -> Option<ObjectId> {
        self.checkpoints.lock().unwrap().get(consumer_id).copied()
    }

    /// Successful persists, in order.
    pub fn history(&self) -> Vec<ObjectId> {
        self.history.lock().unwrap().clone()
    }
}

#[async_trait]
impl TrackingStore for RecordingStore {
    async fn ensure_ready(&self) -> Result<(), TrackingError> {
        Ok(())
    }

    async fn fetch_last_tracked_id(
        &self,
        consumer_id: &str,
    ) -> Result<Option<ObjectId>, TrackingError> {
        Ok(self.checkpoints.lock().unwrap().get(consumer_id).copied())
    }

    async fn persist_last_tracked_id(
        &self,
        consumer_id: &str,
        id: ObjectId,
    ) -> Result<(), TrackingError> {
        if let Some(limit) = *self.fail_after.lock().unwrap() {
            if self.history.lock().unwrap().len() >= limit {
                return Err(TrackingError::WriteFailure {
                    message: "write not acknowledged (scripted)".into(),
                    source: None,
                });
            }
        }

        self.checkpoints
            .lock()
            .unwrap()
            .insert(consumer_id.to_string(), id);
        self.history.lock().unwrap().push(id);
        Ok(())
    }
}
