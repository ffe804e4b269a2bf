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

//! Stream bus tuning configuration

use serde::Deserialize;

/// Tuning knobs shared by all stream bus backends
///
/// ## Purpose
/// Carries the retention cap and consume-loop read parameters. Every field
/// has a default so the struct deserializes from an empty config section.
///
/// Connection parameters (address, auth, pool sizing, timeouts) are owned by
/// whoever provisions the store handle and deliberately do not appear here.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamBusConfig {
    /// Maximum entries retained per stream; trimming is exact, oldest first
    #[serde(default = "default_max_len")]
    pub max_len: u64,

    /// Blocking-read window per consume iteration, in milliseconds
    ///
    /// Bounds how long one group read waits for new entries before the loop
    /// re-polls (and re-checks cancellation). `0` asks the store for an
    /// indefinite block; cancellation still interrupts the wait.
    #[serde(default = "default_block_ms")]
    pub block_ms: u64,

    /// Entries requested per group read; the loop handles any batch size
    #[serde(default = "default_read_count")]
    pub read_count: u32,
}

fn default_max_len() -> u64 {
    10_000
}

fn default_block_ms() -> u64 {
    5_000
}

fn default_read_count() -> u32 {
    1
}

impl Default for StreamBusConfig {
    fn default() -> Self {
        Self {
            max_len: default_max_len(),
            block_ms: default_block_ms(),
            read_count: default_read_count(),
        }
    }
}
