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

//! # streambus
//!
//! ## Purpose
//! Stream-based messaging core: a producer/consumer-group layer over an
//! append-only log store (Redis Streams) with fan-out delivery to
//! independent consumer groups, at-least-once handoff into an in-process
//! bounded channel, automatic group provisioning and capped retention.
//!
//! ## Key Components
//! - [`StreamBus`]: the four core operations — [`StreamBus::publish`],
//!   [`StreamBus::ensure_consumer_group`], [`StreamBus::consume`],
//!   [`StreamBus::len`]
//! - [`RedisStreamBus`]: Redis Streams backend (feature `redis-backend`,
//!   enabled by default)
//! - [`InMemoryStreamBus`]: process-local backend with the same semantics,
//!   for single-node use and for tests without a server
//! - [`Payload`]: text stored verbatim or a value serialized to JSON
//! - [`StreamBusConfig`]: retention cap and consume-loop read parameters
//!
//! ## Delivery contract
//! Each entry is delivered to at most one consumer per group and to every
//! group on the stream. The consume loop acknowledges an entry immediately
//! after handing it to the output channel — before downstream processing —
//! trading strict at-least-once-on-crash delivery for simplicity. The
//! bounded output channel is the sole flow-control mechanism: a full channel
//! stalls the loop, which stops pulling from the store.
//!
//! What stays outside this crate: store connection lifecycle (pooling, auth,
//! reconnect) — callers hand in a live `redis::Client` — and restart
//! policy for a failed consume loop.
//!
//! ## Examples
//! ```rust
//! use streambus::{InMemoryStreamBus, Payload, StreamBus, StreamBusConfig};
//! use tokio::sync::{mpsc, watch};
//!
//! # async fn example() -> streambus::StreamBusResult<()> {
//! let bus = InMemoryStreamBus::new(StreamBusConfig::default());
//!
//! bus.publish(Payload::json(&serde_json::json!({"title": "x"}))?, "s1").await?;
//! bus.ensure_consumer_group("s1", "g1").await?;
//!
//! let (tx, mut rx) = mpsc::channel(16);
//! let (cancel_tx, cancel_rx) = watch::channel(false);
//! let worker = {
//!     let bus = bus.clone();
//!     tokio::spawn(async move { bus.consume("s1", "g1", tx, cancel_rx).await })
//! };
//!
//! let delivered = rx.recv().await.expect("delivery");
//! assert_eq!(delivered, r#"{"title":"x"}"#);
//!
//! cancel_tx.send(true).ok();
//! worker.await.expect("join")?;
//! assert!(rx.recv().await.is_none()); // channel closed by the loop
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod bus;
mod config;
mod in_memory;
pub mod observability;

#[cfg(feature = "redis-backend")]
mod redis_backend;

pub use bus::*;
pub use config::*;
pub use in_memory::*;

#[cfg(feature = "redis-backend")]
pub use redis_backend::*;
