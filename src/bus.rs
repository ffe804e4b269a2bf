// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 The streambus authors
//
// This file is part of streambus.
//
// streambus is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// streambus is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with streambus. If not, see <https://www.gnu.org/licenses/>.

//! StreamBus trait, payload and error types

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// Name of the single payload field stored on every stream entry.
pub const DATA_FIELD: &str = "data";

/// Errors that can occur during stream bus operations
#[derive(Error, Debug)]
pub enum StreamBusError {
    /// Null or empty payload passed to publish
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Payload could not be serialized to JSON
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Transport failure talking to the stream store
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Malformed or unexpected store response
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Result type for stream bus operations
pub type StreamBusResult<T> = Result<T, StreamBusError>;

/// Payload published to a stream
///
/// ## Purpose
/// A published value is stored in a single `"data"` field on the entry:
/// text goes in verbatim, any other value is serialized to JSON at publish
/// time. Consumers always receive the stored string.
///
/// ## Examples
/// ```rust
/// use streambus::Payload;
///
/// let raw = Payload::from("already a string");
/// let json = Payload::json(&serde_json::json!({"title": "x"})).unwrap();
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Raw string, stored verbatim
    Text(String),
    /// JSON value, serialized at publish time
    Json(serde_json::Value),
}

impl Payload {
    /// Build a JSON payload from any serializable value
    ///
    /// ## Errors
    /// - [`StreamBusError::Encoding`]: the value has no JSON representation
    pub fn json<T: Serialize>(value: &T) -> StreamBusResult<Self> {
        let value = serde_json::to_value(value)
            .map_err(|e| StreamBusError::Encoding(format!("unable to convert value to json: {}", e)))?;
        Ok(Payload::Json(value))
    }

    /// Encode into the string stored in the entry's `"data"` field
    ///
    /// ## Errors
    /// - [`StreamBusError::InvalidArgument`]: null JSON or empty text
    /// - [`StreamBusError::Encoding`]: JSON serialization failed, names the stream
    pub(crate) fn encode(&self, stream: &str) -> StreamBusResult<String> {
        match self {
            Payload::Text(text) if text.is_empty() => Err(StreamBusError::InvalidArgument(
                format!("cannot publish empty data, stream is {}", stream),
            )),
            Payload::Text(text) => Ok(text.clone()),
            Payload::Json(serde_json::Value::Null) => Err(StreamBusError::InvalidArgument(
                format!("cannot publish empty data, stream is {}", stream),
            )),
            Payload::Json(value) => serde_json::to_string(value).map_err(|_| {
                StreamBusError::Encoding(format!("unable to convert data into json, stream: {}", stream))
            }),
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }
}

/// Core trait for stream-based messaging over an append-only log store
///
/// ## Purpose
/// Defines the four operations of the messaging core — publish, group
/// provisioning, the consume loop and length inspection — so callers can
/// swap the Redis Streams backend for the in-memory one without touching
/// producer or consumer code.
///
/// ## Invariants
/// - Every published entry receives a store-assigned monotonic ID
/// - A stream never holds more than the configured cap; oldest entries are
///   trimmed first, exactly (non-approximate)
/// - An acknowledged entry is never redelivered to the same group
/// - Distinct groups on one stream each see every entry (fan-out once per
///   group); within a group an entry goes to at most one consumer
#[async_trait]
pub trait StreamBus: Send + Sync {
    /// Append a payload to a stream as a single-field entry
    ///
    /// Auto-creates the stream and enforces the retention cap with exact
    /// trimming. Returns the store-assigned entry ID.
    ///
    /// ## Errors
    /// - [`StreamBusError::InvalidArgument`]: null or empty payload
    /// - [`StreamBusError::Encoding`]: payload not serializable
    /// - [`StreamBusError::Connectivity`]: store unreachable
    async fn publish(&self, payload: Payload, stream: &str) -> StreamBusResult<String>;

    /// Ensure a named consumer group exists on a stream
    ///
    /// Enumerates existing groups and verifies membership by name; if the
    /// group is absent it is created. When the stream itself does not exist
    /// yet, stream and group are created together with the group's cursor at
    /// the beginning of the stream (replay-all, not only-new). Idempotent:
    /// repeated calls never error and never create duplicates.
    async fn ensure_consumer_group(&self, stream: &str, group: &str) -> StreamBusResult<()>;

    /// Pull undelivered entries for a group and forward them to a channel
    ///
    /// Runs until cancelled or a store error turns fatal. Each iteration
    /// checks `cancel` first, then issues a blocking group read for entries
    /// not yet delivered to this group. Every entry read is sent on `out`
    /// (a full channel stalls the loop — this is the backpressure contract)
    /// and acknowledged immediately after the send succeeds.
    ///
    /// The loop owns `out` and drops it on every exit path, so this writer's
    /// side of the channel closes exactly once. A dropped `cancel` sender or
    /// a dropped downstream receiver both end the loop without error.
    ///
    /// ## Errors
    /// - [`StreamBusError::Connectivity`]: read or ack failed; no local
    ///   retry — the caller owns restart policy, typically with a fresh call
    ///   (and therefore a fresh consumer identity)
    /// - [`StreamBusError::Protocol`]: the group does not exist or the store
    ///   reply was malformed
    async fn consume(
        &self,
        stream: &str,
        group: &str,
        out: mpsc::Sender<String>,
        cancel: watch::Receiver<bool>,
    ) -> StreamBusResult<()>;

    /// Current total entry count of a stream
    ///
    /// Counts all retained entries, not the pending/unacked subset. Zero for
    /// an absent stream. Side-effect-free; intended for observability.
    async fn len(&self, stream: &str) -> StreamBusResult<u64>;
}

/// Generate a fresh consumer identity scoped to a stream
///
/// Identities follow `<stream>:consumer:<8-hex>`, are generated per consume
/// invocation and never persisted; a restarted loop is indistinguishable
/// from a brand-new consumer.
pub(crate) fn consumer_identity(stream: &str) -> String {
    format!("{}:consumer:{:08x}", stream, rand::random::<u32>())
}
