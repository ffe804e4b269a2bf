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

//! In-memory stream bus
//!
//! ## Purpose
//! Process-local implementation of the stream store contract: monotonic
//! `ms-seq` entry IDs, exact cap trimming, replay-all group cursors and
//! per-group pending tracking. Behaves like the Redis backend from the
//! caller's side, so consumer and producer code can be exercised without a
//! server.
//!
//! ## Design Decisions
//! - All state hangs off the bus object behind one `RwLock`-guarded map;
//!   there is no process-global registry.
//! - Blocked group reads wait on a per-stream [`Notify`] with a bounded
//!   re-poll, mirroring the bounded `BLOCK` window of the Redis backend.

use crate::observability::{record_consume_stopped, record_delivery, record_publish, record_stream_error};
use crate::{consumer_identity, Payload, StreamBus, StreamBusConfig, StreamBusError, StreamBusResult};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify, RwLock};
use tracing::{debug, info};

const BACKEND: &str = "in_memory";

/// Store-assigned entry ID: `<millis>-<seq>`, strictly increasing per stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct EntryId {
    ms: u64,
    seq: u64,
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

struct StoredEntry {
    id: EntryId,
    data: String,
}

#[derive(Default)]
struct GroupState {
    /// Cursor: last entry handed to any member of this group
    last_delivered: Option<EntryId>,
    /// Delivered but not yet acknowledged, by entry ID
    pending: HashMap<String, String>,
}

struct StreamState {
    entries: VecDeque<StoredEntry>,
    last_id: Option<EntryId>,
    groups: HashMap<String, GroupState>,
    appended: Arc<Notify>,
}

impl StreamState {
    fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            last_id: None,
            groups: HashMap::new(),
            appended: Arc::new(Notify::new()),
        }
    }

    /// Next ID: wall-clock millis, with the sequence bumped instead when the
    /// clock has not advanced (or moved backwards), keeping IDs monotonic.
    fn next_id(&mut self) -> EntryId {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let id = match self.last_id {
            Some(last) if now <= last.ms => EntryId {
                ms: last.ms,
                seq: last.seq + 1,
            },
            _ => EntryId { ms: now, seq: 0 },
        };
        self.last_id = Some(id);
        id
    }
}

/// Process-local stream bus with Redis Streams semantics
///
/// ## Examples
/// ```rust
/// use streambus::{InMemoryStreamBus, Payload, StreamBus, StreamBusConfig};
///
/// # async fn example() -> streambus::StreamBusResult<()> {
/// let bus = InMemoryStreamBus::new(StreamBusConfig::default());
/// bus.publish(Payload::from("hello"), "s1").await?;
/// assert_eq!(bus.len("s1").await?, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryStreamBus {
    config: StreamBusConfig,
    streams: Arc<RwLock<HashMap<String, StreamState>>>,
}

impl InMemoryStreamBus {
    /// Create an empty in-memory stream bus
    pub fn new(config: StreamBusConfig) -> Self {
        Self {
            config,
            streams: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of delivered-but-unacknowledged entries for a group
    ///
    /// Observability counterpart of the store's pending-entries query; the
    /// backpressure contract is visible here (a stalled handoff leaves its
    /// entry pending).
    pub async fn pending_len(&self, stream: &str, group: &str) -> u64 {
        let streams = self.streams.read().await;
        streams
            .get(stream)
            .and_then(|state| state.groups.get(group))
            .map(|group_state| group_state.pending.len() as u64)
            .unwrap_or(0)
    }

    /// Claim the next undelivered batch for `group`, marking it pending
    ///
    /// Returns the batch plus the stream's append signal to wait on when the
    /// batch is empty.
    async fn next_batch(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> StreamBusResult<(Vec<(String, String)>, Arc<Notify>)> {
        let missing_group = || {
            StreamBusError::Protocol(format!(
                "no such consumer group '{}' on stream '{}'",
                group, stream
            ))
        };

        let mut streams = self.streams.write().await;
        let state = streams.get_mut(stream).ok_or_else(missing_group)?;
        let StreamState {
            entries,
            groups,
            appended,
            ..
        } = state;
        let appended = appended.clone();
        let group_state = groups.get_mut(group).ok_or_else(missing_group)?;

        let mut batch = Vec::new();
        for entry in entries.iter() {
            let undelivered = group_state
                .last_delivered
                .map_or(true, |last| entry.id > last);
            if !undelivered {
                continue;
            }
            group_state.last_delivered = Some(entry.id);
            group_state
                .pending
                .insert(entry.id.to_string(), consumer.to_string());
            batch.push((entry.id.to_string(), entry.data.clone()));
            if batch.len() as u32 >= self.config.read_count.max(1) {
                break;
            }
        }
        Ok((batch, appended))
    }

    async fn ack(&self, stream: &str, group: &str, entry_id: &str) {
        let mut streams = self.streams.write().await;
        if let Some(group_state) = streams
            .get_mut(stream)
            .and_then(|state| state.groups.get_mut(group))
        {
            group_state.pending.remove(entry_id);
        }
    }

    async fn consume_loop(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        out: &mpsc::Sender<String>,
        cancel: &mut watch::Receiver<bool>,
    ) -> StreamBusResult<()> {
        // Fallback re-poll window; the append signal wakes the loop sooner.
        let poll = Duration::from_millis(self.config.block_ms.clamp(10, 5_000));
        loop {
            if *cancel.borrow() {
                record_consume_stopped(stream, group, "cancelled", BACKEND);
                return Ok(());
            }

            let (batch, appended) = self.next_batch(stream, group, consumer).await?;
            if batch.is_empty() {
                tokio::select! {
                    changed = cancel.changed() => {
                        if changed.is_err() {
                            record_consume_stopped(stream, group, "cancel sender dropped", BACKEND);
                            return Ok(());
                        }
                    }
                    _ = appended.notified() => {}
                    _ = tokio::time::sleep(poll) => {}
                }
                continue;
            }

            for (entry_id, data) in batch {
                if out.send(data).await.is_err() {
                    record_consume_stopped(stream, group, "receiver dropped", BACKEND);
                    return Ok(());
                }
                record_delivery(stream, group, &entry_id, BACKEND);
                self.ack(stream, group, &entry_id).await;
            }
        }
    }
}

#[async_trait]
impl StreamBus for InMemoryStreamBus {
    async fn publish(&self, payload: Payload, stream: &str) -> StreamBusResult<String> {
        let data = payload.encode(stream)?;

        let mut streams = self.streams.write().await;
        let state = streams
            .entry(stream.to_string())
            .or_insert_with(StreamState::new);
        let id = state.next_id();
        state.entries.push_back(StoredEntry { id, data });
        // Exact trimming, oldest first.
        while state.entries.len() as u64 > self.config.max_len {
            state.entries.pop_front();
        }
        state.appended.notify_waiters();

        let entry_id = id.to_string();
        record_publish(stream, &entry_id, BACKEND);
        Ok(entry_id)
    }

    async fn ensure_consumer_group(&self, stream: &str, group: &str) -> StreamBusResult<()> {
        let mut streams = self.streams.write().await;
        let state = streams
            .entry(stream.to_string())
            .or_insert_with(StreamState::new);
        // Default cursor (None) replays all existing entries, like a group
        // created at "0".
        state.groups.entry(group.to_string()).or_default();
        Ok(())
    }

    async fn consume(
        &self,
        stream: &str,
        group: &str,
        out: mpsc::Sender<String>,
        mut cancel: watch::Receiver<bool>,
    ) -> StreamBusResult<()> {
        let consumer = consumer_identity(stream);
        debug!(
            stream = %stream,
            group = %group,
            consumer = %consumer,
            "Starting consume loop"
        );

        let result = self
            .consume_loop(stream, group, &consumer, &out, &mut cancel)
            .await;
        match &result {
            Ok(()) => info!(stream = %stream, group = %group, "Consume loop closing output channel"),
            Err(e) => record_stream_error(stream, "consume", &e.to_string(), BACKEND),
        }
        // `out` drops here on every path, closing this writer's side of the
        // channel exactly once.
        result
    }

    async fn len(&self, stream: &str) -> StreamBusResult<u64> {
        let streams = self.streams.read().await;
        Ok(streams
            .get(stream)
            .map(|state| state.entries.len() as u64)
            .unwrap_or(0))
    }
}
