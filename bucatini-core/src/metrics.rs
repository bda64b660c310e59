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

//! Metrics instrumentation for tailing consumers.
//!
//! Uses the `metrics` crate facade, so any exporter (Prometheus, StatsD,
//! ...) installed by the embedding application picks these up. Names follow
//! Prometheus conventions: `bucatini_` prefix, `_total` suffix on counters.
//!
//! Labels are kept low-cardinality on purpose: `collection` and
//! `consumer_id` only. Never label with event identifiers.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Total events forwarded to the document sink.
///
/// Type: Counter. Labels: collection.
const EVENTS_FORWARDED_TOTAL: &str = "bucatini_events_forwarded_total";

/// Total deliveries whose sink handling failed.
///
/// Type: Counter. Labels: collection.
const SINK_FAILURES_TOTAL: &str = "bucatini_sink_failures_total";

/// Total checkpoints successfully persisted.
///
/// Type: Counter. Labels: consumer_id.
const CHECKPOINTS_PERSISTED_TOTAL: &str = "bucatini_checkpoints_persisted_total";

/// Total checkpoint writes that failed and were deferred to the next
/// opportunity.
///
/// Type: Counter. Labels: consumer_id.
const CHECKPOINT_WRITE_FAILURES_TOTAL: &str = "bucatini_checkpoint_write_failures_total";

/// Total tailable cursors rebuilt after loss or exhaustion.
///
/// Type: Counter. Labels: collection.
const CURSOR_REGENERATIONS_TOTAL: &str = "bucatini_cursor_regenerations_total";

/// Current consumer status (0=idle, 1=running, 2=stopping, 3=terminated,
/// 4=failed).
///
/// Type: Gauge. Labels: collection.
const CONSUMER_STATUS: &str = "bucatini_consumer_status";

/// Time the sink took to handle one document.
///
/// Type: Histogram. Labels: collection. Unit: seconds.
const SINK_HANDLE_DURATION_SECONDS: &str = "bucatini_sink_handle_duration_seconds";

/// Registers descriptions for all Bucatini metrics.
///
/// Call once at application startup, before any consumer runs.
pub fn init_metrics() {
    describe_counter!(
        EVENTS_FORWARDED_TOTAL,
        "Total events forwarded to the document sink"
    );
    describe_counter!(
        SINK_FAILURES_TOTAL,
        "Total deliveries whose sink handling failed"
    );
    describe_counter!(
        CHECKPOINTS_PERSISTED_TOTAL,
        "Total checkpoints successfully persisted"
    );
    describe_counter!(
        CHECKPOINT_WRITE_FAILURES_TOTAL,
        "Total checkpoint writes that failed and were deferred"
    );
    describe_counter!(
        CURSOR_REGENERATIONS_TOTAL,
        "Total tailable cursors rebuilt after loss or exhaustion"
    );
    describe_gauge!(
        CONSUMER_STATUS,
        "Consumer status: 0=idle, 1=running, 2=stopping, 3=terminated, 4=failed"
    );
    describe_histogram!(
        SINK_HANDLE_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Time the sink took to handle one document"
    );
}

/// Records one forwarded event.
pub fn increment_events_forwarded(collection: &str) {
    counter!(EVENTS_FORWARDED_TOTAL, "collection" => collection.to_string()).increment(1);
}

/// Records one failed sink delivery.
pub fn increment_sink_failures(collection: &str) {
    counter!(SINK_FAILURES_TOTAL, "collection" => collection.to_string()).increment(1);
}

/// Records one persisted checkpoint.
pub fn increment_checkpoints_persisted(consumer_id: &str) {
    counter!(CHECKPOINTS_PERSISTED_TOTAL, "consumer_id" => consumer_id.to_string()).increment(1);
}

/// Records one failed checkpoint write.
pub fn increment_checkpoint_write_failures(consumer_id: &str) {
    counter!(CHECKPOINT_WRITE_FAILURES_TOTAL, "consumer_id" => consumer_id.to_string())
        .increment(1);
}

/// Records one cursor regeneration.
pub fn increment_cursor_regenerations(collection: &str) {
    counter!(CURSOR_REGENERATIONS_TOTAL, "collection" => collection.to_string()).increment(1);
}

/// Publishes the consumer status gauge.
pub fn set_consumer_status(collection: &str, status: u8) {
    gauge!(CONSUMER_STATUS, "collection" => collection.to_string()).set(f64::from(status));
}

/// Records the time one sink delivery took.
pub fn record_sink_handle_duration(seconds: f64, collection: &str) {
    histogram!(SINK_HANDLE_DURATION_SECONDS, "collection" => collection.to_string())
        .record(seconds);
}
