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

//! Stream bus observability helpers
//!
//! ## Purpose
//! Shared structured-logging helpers for publish, delivery and consume-loop
//! lifecycle events, used by every backend so log fields stay uniform.

use tracing::{debug, error, info, trace};

/// Record a successfully appended entry
///
/// ## Arguments
/// * `stream` - Stream the entry was appended to
/// * `entry_id` - Store-assigned entry ID
/// * `backend` - Backend type (for filtering)
pub fn record_publish(stream: &str, entry_id: &str, backend: &str) {
    trace!(
        stream = %stream,
        entry_id = %entry_id,
        backend = %backend,
        "Entry appended to stream"
    );
}

/// Record an entry handed to the output channel and acknowledged
///
/// ## Arguments
/// * `stream` - Stream the entry came from
/// * `group` - Consumer group it was delivered under
/// * `entry_id` - Store-assigned entry ID
/// * `backend` - Backend type (for filtering)
pub fn record_delivery(stream: &str, group: &str, entry_id: &str, backend: &str) {
    debug!(
        stream = %stream,
        group = %group,
        entry_id = %entry_id,
        backend = %backend,
        "Entry delivered to output channel"
    );
}

/// Record a consume loop stopping on a non-error path
///
/// ## Arguments
/// * `stream` - Stream the loop was reading
/// * `group` - Consumer group the loop belonged to
/// * `reason` - Why the loop stopped (e.g. "cancelled", "receiver dropped")
/// * `backend` - Backend type (for filtering)
pub fn record_consume_stopped(stream: &str, group: &str, reason: &str, backend: &str) {
    info!(
        stream = %stream,
        group = %group,
        reason = %reason,
        backend = %backend,
        "Consume loop stopped"
    );
}

/// Record a failed stream operation
///
/// ## Arguments
/// * `stream` - Stream the operation targeted
/// * `operation` - Operation that failed (e.g. "publish", "consume", "len")
/// * `error` - Error message
/// * `backend` - Backend type (for filtering)
pub fn record_stream_error(stream: &str, operation: &str, error: &str, backend: &str) {
    error!(
        stream = %stream,
        operation = %operation,
        error = %error,
        backend = %backend,
        "Stream operation failed"
    );
}
