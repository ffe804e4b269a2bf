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

//! Redis Streams integration tests
//!
//! ## Purpose
//! Verifies the stream bus contract against a real Redis instance: capped
//! publish, group provisioning, the consume/ack loop, cancellation and
//! length inspection.
//!
//! ## Running Tests
//! ```bash
//! # Start Redis (or set REDIS_URL)
//! docker run --rm -p 6379:6379 redis:7
//!
//! cargo test --test redis_integration_test
//! ```

#![cfg(feature = "redis-backend")]

use std::time::Duration;
use streambus::{Payload, RedisStreamBus, StreamBus, StreamBusConfig, StreamBusError};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

// Helper to check if Redis is available
fn is_redis_available() -> bool {
    redis::Client::open(redis_url().as_str())
        .and_then(|client| {
            let mut conn = client.get_connection()?;
            redis::cmd("PING").query::<String>(&mut conn)
        })
        .is_ok()
}

fn test_bus(config: StreamBusConfig) -> RedisStreamBus {
    let client = redis::Client::open(redis_url().as_str()).expect("redis client");
    RedisStreamBus::new(client, config)
}

fn fast_config() -> StreamBusConfig {
    StreamBusConfig {
        max_len: 10_000,
        block_ms: 200,
        read_count: 1,
    }
}

// Helper to cleanup Redis streams between runs
fn cleanup_stream(stream: &str) {
    if let Ok(client) = redis::Client::open(redis_url().as_str()) {
        if let Ok(mut conn) = client.get_connection() {
            let _: Result<(), redis::RedisError> =
                redis::cmd("DEL").arg(stream).query(&mut conn);
        }
    }
}

#[tokio::test]
async fn test_publish_ensure_consume_end_to_end() {
    if !is_redis_available() {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let stream = "streambus-test-e2e";
    cleanup_stream(stream);

    let bus = test_bus(fast_config());
    bus.publish(
        Payload::json(&serde_json::json!({"title": "x"})).unwrap(),
        stream,
    )
    .await
    .expect("publish");
    bus.ensure_consumer_group(stream, "g1")
        .await
        .expect("ensure group");

    let (tx, mut rx) = mpsc::channel(16);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let worker = {
        let bus = bus.clone();
        tokio::spawn(async move { bus.consume(stream, "g1", tx, cancel_rx).await })
    };

    let delivered = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("delivery within bound")
        .expect("entry");
    assert_eq!(delivered, r#"{"title":"x"}"#);

    cancel_tx.send(true).expect("signal cancellation");
    let result = timeout(Duration::from_secs(5), worker)
        .await
        .expect("loop stops")
        .expect("join");
    assert!(result.is_ok());
    assert!(rx.recv().await.is_none(), "loop closes the channel");

    cleanup_stream(stream);
}

#[tokio::test]
async fn test_acknowledged_entry_not_redelivered_to_same_group() {
    if !is_redis_available() {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let stream = "streambus-test-ack";
    cleanup_stream(stream);

    let bus = test_bus(fast_config());
    bus.ensure_consumer_group(stream, "g1").await.unwrap();
    bus.publish(Payload::from("only-once"), stream).await.unwrap();

    for round in 0..2 {
        let (tx, mut rx) = mpsc::channel(4);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let worker = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.consume(stream, "g1", tx, cancel_rx).await })
        };

        if round == 0 {
            let delivered = timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("first round delivers")
                .expect("entry");
            assert_eq!(delivered, "only-once");
        } else {
            // Acked in round one; a fresh loop must see nothing.
            let redelivered = timeout(Duration::from_millis(700), rx.recv()).await;
            assert!(redelivered.is_err(), "acked entry was redelivered");
        }

        cancel_tx.send(true).unwrap();
        timeout(Duration::from_secs(5), worker)
            .await
            .expect("stops")
            .expect("join")
            .expect("clean exit");
    }

    cleanup_stream(stream);
}

#[tokio::test]
async fn test_ensure_consumer_group_idempotent() {
    if !is_redis_available() {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let stream = "streambus-test-idempotent";
    cleanup_stream(stream);

    let bus = test_bus(fast_config());
    bus.ensure_consumer_group(stream, "g1").await.expect("first call");
    bus.ensure_consumer_group(stream, "g1").await.expect("second call");

    // Exactly one group of that name exists.
    let client = redis::Client::open(redis_url().as_str()).unwrap();
    let mut conn = client.get_connection().unwrap();
    let reply: redis::Value = redis::cmd("XINFO")
        .arg("GROUPS")
        .arg(stream)
        .query(&mut conn)
        .unwrap();
    match reply {
        redis::Value::Bulk(groups) => assert_eq!(groups.len(), 1),
        other => panic!("unexpected XINFO GROUPS reply: {:?}", other),
    }

    cleanup_stream(stream);
}

#[tokio::test]
async fn test_ensure_consumer_group_adds_group_to_existing_stream() {
    if !is_redis_available() {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let stream = "streambus-test-second-group";
    cleanup_stream(stream);

    let bus = test_bus(fast_config());
    bus.ensure_consumer_group(stream, "g1").await.unwrap();
    // Group enumeration now succeeds; g2 must still be created.
    bus.ensure_consumer_group(stream, "g2").await.unwrap();

    let client = redis::Client::open(redis_url().as_str()).unwrap();
    let mut conn = client.get_connection().unwrap();
    let reply: redis::Value = redis::cmd("XINFO")
        .arg("GROUPS")
        .arg(stream)
        .query(&mut conn)
        .unwrap();
    match reply {
        redis::Value::Bulk(groups) => assert_eq!(groups.len(), 2),
        other => panic!("unexpected XINFO GROUPS reply: {:?}", other),
    }

    cleanup_stream(stream);
}

#[tokio::test]
async fn test_group_created_before_entries_replays_them() {
    if !is_redis_available() {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let stream = "streambus-test-replay";
    cleanup_stream(stream);

    let bus = test_bus(fast_config());
    // Entry exists before the group: cursor "0" must replay it.
    bus.publish(Payload::from("pre-existing"), stream).await.unwrap();
    bus.ensure_consumer_group(stream, "g1").await.unwrap();

    let (tx, mut rx) = mpsc::channel(4);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let worker = {
        let bus = bus.clone();
        tokio::spawn(async move { bus.consume(stream, "g1", tx, cancel_rx).await })
    };

    let delivered = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("replayed entry delivered")
        .expect("entry");
    assert_eq!(delivered, "pre-existing");

    cancel_tx.send(true).unwrap();
    timeout(Duration::from_secs(5), worker)
        .await
        .expect("stops")
        .expect("join")
        .expect("clean exit");

    cleanup_stream(stream);
}

#[tokio::test]
async fn test_cancellation_before_any_entry_exists() {
    if !is_redis_available() {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let stream = "streambus-test-cancel";
    cleanup_stream(stream);

    let bus = test_bus(fast_config());
    bus.ensure_consumer_group(stream, "g1").await.unwrap();

    let (tx, mut rx) = mpsc::channel(1);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let worker = {
        let bus = bus.clone();
        tokio::spawn(async move { bus.consume(stream, "g1", tx, cancel_rx).await })
    };

    cancel_tx.send(true).expect("signal cancellation");
    let result = timeout(Duration::from_secs(5), worker)
        .await
        .expect("returns without unbounded hang")
        .expect("join");
    assert!(result.is_ok(), "cancellation is not an error");
    assert!(rx.recv().await.is_none(), "channel closed exactly once");

    cleanup_stream(stream);
}

#[tokio::test]
async fn test_consume_against_missing_group_is_terminal() {
    if !is_redis_available() {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let stream = "streambus-test-nogroup";
    cleanup_stream(stream);

    let bus = test_bus(fast_config());
    bus.publish(Payload::from("m"), stream).await.unwrap();

    let (tx, mut rx) = mpsc::channel(1);
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let result = bus.consume(stream, "never-created", tx, cancel_rx).await;
    assert!(matches!(result, Err(StreamBusError::Protocol(_))));
    assert!(rx.recv().await.is_none(), "channel closed on the error path");

    cleanup_stream(stream);
}

#[tokio::test]
async fn test_len_reports_entry_count() {
    if !is_redis_available() {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let stream = "streambus-test-len";
    cleanup_stream(stream);

    let bus = test_bus(fast_config());
    assert_eq!(bus.len(stream).await.unwrap(), 0);
    for i in 0..5 {
        bus.publish(Payload::from(format!("m{}", i)), stream)
            .await
            .unwrap();
    }
    assert_eq!(bus.len(stream).await.unwrap(), 5);

    cleanup_stream(stream);
}

#[tokio::test]
async fn test_retention_cap_is_exact() {
    if !is_redis_available() {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let stream = "streambus-test-retention";
    cleanup_stream(stream);

    // Small cap keeps the test quick; the trimming path is the same.
    let bus = test_bus(StreamBusConfig {
        max_len: 100,
        ..StreamBusConfig::default()
    });
    for i in 0..101u32 {
        bus.publish(Payload::from(format!("m{}", i)), stream)
            .await
            .unwrap();
    }
    assert_eq!(bus.len(stream).await.unwrap(), 100, "trimming is exact");

    cleanup_stream(stream);
}

#[tokio::test]
async fn test_publish_null_rejected_and_nothing_appended() {
    if !is_redis_available() {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let stream = "streambus-test-null";
    cleanup_stream(stream);

    let bus = test_bus(fast_config());
    let result = bus
        .publish(Payload::Json(serde_json::Value::Null), stream)
        .await;
    assert!(matches!(result, Err(StreamBusError::InvalidArgument(_))));
    assert_eq!(bus.len(stream).await.unwrap(), 0);

    cleanup_stream(stream);
}
