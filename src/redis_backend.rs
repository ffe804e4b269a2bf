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

//! Redis Streams backend
//!
//! ## Purpose
//! Binds the stream bus to Redis Streams: `XADD` with an exact `MAXLEN` cap
//! for publish, `XGROUP CREATE ... 0 MKSTREAM` for group provisioning,
//! `XREADGROUP`/`XACK` for the consume loop and `XLEN` for inspection.
//!
//! ## Design Decisions
//! - **Handle in, lifecycle out**: the backend takes a [`redis::Client`] and
//!   opens connections from it; pooling, auth and reconnect policy belong to
//!   whoever provisioned the client.
//! - **Bounded block, re-polled**: group reads block for `block_ms` and the
//!   loop re-polls, so cancellation is observed at least once per window
//!   even without new data; the read future additionally races the
//!   cancellation signal.
//! - **No local retries**: the first store error ends the operation; the
//!   consume loop treats any read or ack failure as terminal and leaves
//!   restart policy to the caller.

use crate::observability::{record_consume_stopped, record_delivery, record_publish, record_stream_error};
use crate::{consumer_identity, Payload, StreamBus, StreamBusConfig, StreamBusError, StreamBusResult, DATA_FIELD};
use async_trait::async_trait;
use redis::aio::Connection;
use redis::{Client, RedisError, Value};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

const BACKEND: &str = "redis";

/// Stream bus over Redis Streams with consumer groups
///
/// ## Invariants
/// - Entries carry a single `"data"` field; IDs are Redis-generated
///   (timestamp-sequence, monotonic per stream)
/// - Streams are capped at `max_len` entries with exact trimming
/// - New groups start at cursor `"0"` and replay existing entries
/// - Consumer identities are fresh per consume invocation, never persisted
#[derive(Clone)]
pub struct RedisStreamBus {
    client: Client,
    config: StreamBusConfig,
}

impl RedisStreamBus {
    /// Create a stream bus over an already-provisioned Redis client
    pub fn new(client: Client, config: StreamBusConfig) -> Self {
        Self { client, config }
    }

    async fn connection(&self) -> StreamBusResult<Connection> {
        self.client
            .get_async_connection()
            .await
            .map_err(connectivity)
    }

    async fn consume_loop(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        out: &mpsc::Sender<String>,
        cancel: &mut watch::Receiver<bool>,
    ) -> StreamBusResult<()> {
        let mut conn = self.connection().await?;
        loop {
            if *cancel.borrow() {
                record_consume_stopped(stream, group, "cancelled", BACKEND);
                return Ok(());
            }

            let read = tokio::select! {
                changed = cancel.changed() => {
                    // A dropped cancellation sender counts as cancellation.
                    if changed.is_err() || *cancel.borrow() {
                        record_consume_stopped(stream, group, "cancelled", BACKEND);
                        return Ok(());
                    }
                    // Aborting the in-flight read leaves its reply pending on
                    // the socket; start over on a clean connection.
                    conn = self.connection().await?;
                    continue;
                }
                read = Self::read_group(&mut conn, stream, group, consumer, &self.config) => read?,
            };

            for (entry_id, data) in read {
                if out.send(data).await.is_err() {
                    record_consume_stopped(stream, group, "receiver dropped", BACKEND);
                    return Ok(());
                }
                record_delivery(stream, group, &entry_id, BACKEND);
                // Ack right after the handoff, before downstream processing;
                // an entry lost past this point is the accepted
                // ack-on-dequeue trade-off.
                Self::ack(&mut conn, stream, group, &entry_id).await?;
            }
        }
    }

    /// Read the next batch of entries not yet delivered to this group
    async fn read_group(
        conn: &mut Connection,
        stream: &str,
        group: &str,
        consumer: &str,
        config: &StreamBusConfig,
    ) -> StreamBusResult<Vec<(String, String)>> {
        let reply: Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(config.read_count.max(1))
            .arg("BLOCK")
            .arg(config.block_ms)
            .arg("STREAMS")
            .arg(stream)
            .arg(">") // entries not yet delivered to this group
            .query_async(conn)
            .await
            .map_err(|e| {
                if e.code() == Some("NOGROUP") {
                    StreamBusError::Protocol(format!(
                        "no such consumer group '{}' on stream '{}'",
                        group, stream
                    ))
                } else {
                    connectivity(e)
                }
            })?;
        parse_read_reply(reply)
    }

    async fn ack(
        conn: &mut Connection,
        stream: &str,
        group: &str,
        entry_id: &str,
    ) -> StreamBusResult<()> {
        let _: i64 = redis::cmd("XACK")
            .arg(stream)
            .arg(group)
            .arg(entry_id)
            .query_async(conn)
            .await
            .map_err(connectivity)?;
        Ok(())
    }

    async fn create_group(&self, conn: &mut Connection, stream: &str, group: &str) -> StreamBusResult<()> {
        // MKSTREAM creates stream and group together when the stream is
        // absent; cursor "0" replays all existing entries.
        let created: Result<Value, RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(conn)
            .await;
        match created {
            Ok(_) => Ok(()),
            // Lost a creation race; the group exists, which is all we need.
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(connectivity(e)),
        }
    }
}

#[async_trait]
impl StreamBus for RedisStreamBus {
    async fn publish(&self, payload: Payload, stream: &str) -> StreamBusResult<String> {
        let data = payload.encode(stream)?;
        let mut conn = self.connection().await?;

        // MAXLEN without "~" keeps the cap exact; oldest entries go first.
        let entry_id: String = redis::cmd("XADD")
            .arg(stream)
            .arg("MAXLEN")
            .arg(self.config.max_len)
            .arg("*") // store-generated ID
            .arg(DATA_FIELD)
            .arg(&data)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                let err = connectivity(e);
                record_stream_error(stream, "publish", &err.to_string(), BACKEND);
                err
            })?;

        record_publish(stream, &entry_id, BACKEND);
        Ok(entry_id)
    }

    async fn ensure_consumer_group(&self, stream: &str, group: &str) -> StreamBusResult<()> {
        let mut conn = self.connection().await?;

        // Enumeration failing normally means the stream does not exist yet;
        // either way the create below settles it.
        let known: Result<Value, RedisError> = redis::cmd("XINFO")
            .arg("GROUPS")
            .arg(stream)
            .query_async(&mut conn)
            .await;

        if let Ok(reply) = known {
            // Listing success does not imply the target group exists;
            // membership is verified by name.
            if parse_group_names(reply)?.iter().any(|name| name == group) {
                return Ok(());
            }
        }

        self.create_group(&mut conn, stream, group).await
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
        let mut conn = self.connection().await?;
        redis::cmd("XLEN")
            .arg(stream)
            .query_async(&mut conn)
            .await
            .map_err(connectivity)
    }
}

fn connectivity(e: RedisError) -> StreamBusError {
    StreamBusError::Connectivity(format!("redis: {}", e))
}

fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::Data(bytes) => Some(String::from_utf8_lossy(bytes).to_string()),
        Value::Status(status) => Some(status.clone()),
        _ => None,
    }
}

fn expect_bulk(value: Value, what: &str) -> StreamBusResult<Vec<Value>> {
    match value {
        Value::Bulk(items) => Ok(items),
        other => Err(StreamBusError::Protocol(format!(
            "unexpected {} in stream reply: {:?}",
            what, other
        ))),
    }
}

/// Extract group names from an `XINFO GROUPS` reply
///
/// Reply shape: an array of groups, each a flat key-value array containing
/// a `name` key among others.
fn parse_group_names(reply: Value) -> StreamBusResult<Vec<String>> {
    let groups = expect_bulk(reply, "group list")?;
    let mut names = Vec::with_capacity(groups.len());
    for group in groups {
        let fields = expect_bulk(group, "group record")?;
        let name = fields
            .chunks(2)
            .filter(|pair| pair.len() == 2)
            .find(|pair| as_string(&pair[0]).as_deref() == Some("name"))
            .and_then(|pair| as_string(&pair[1]))
            .ok_or_else(|| StreamBusError::Protocol("group record missing name".to_string()))?;
        names.push(name);
    }
    Ok(names)
}

/// Parse an `XREADGROUP` reply into `(entry_id, data)` pairs
///
/// Reply shape: `[[stream, [[id, [field, value, ...]], ...]], ...]`, or Nil
/// when the blocking window elapsed without new entries.
fn parse_read_reply(reply: Value) -> StreamBusResult<Vec<(String, String)>> {
    let streams = match reply {
        Value::Nil => return Ok(Vec::new()),
        other => expect_bulk(other, "read reply")?,
    };

    let mut entries = Vec::new();
    for stream_reply in streams {
        let items = expect_bulk(stream_reply, "stream block")?
            .into_iter()
            .nth(1)
            .ok_or_else(|| StreamBusError::Protocol("stream block missing entry list".to_string()))?;
        for item in expect_bulk(items, "entry list")? {
            let mut parts = expect_bulk(item, "entry")?.into_iter();
            let entry_id = parts
                .next()
                .as_ref()
                .and_then(as_string)
                .ok_or_else(|| StreamBusError::Protocol("entry missing id".to_string()))?;
            let fields = parts
                .next()
                .ok_or_else(|| StreamBusError::Protocol("entry missing field list".to_string()))?;

            let data = expect_bulk(fields, "field list")?
                .chunks(2)
                .filter(|pair| pair.len() == 2)
                .find(|pair| as_string(&pair[0]).as_deref() == Some(DATA_FIELD))
                .and_then(|pair| as_string(&pair[1]))
                .ok_or_else(|| {
                    StreamBusError::Protocol(format!(
                        "entry {} missing '{}' field",
                        entry_id, DATA_FIELD
                    ))
                })?;
            entries.push((entry_id, data));
        }
    }
    Ok(entries)
}
