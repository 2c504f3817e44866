/*
 * config.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Corriere.
 *
 * Corriere is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Corriere is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Corriere.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Default tunables. Everything here is overridable per Server/Client instance.

use std::time::Duration;

/// Idle wait for the next request on a kept-alive connection.
pub const DEFAULT_KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Requests served per connection before it is closed.
pub const DEFAULT_KEEP_ALIVE_MAX_REQUESTS: usize = 5;

/// Timeout for reads inside an in-progress message.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Client connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(300);

/// Request targets longer than this are answered with 414.
pub const DEFAULT_MAX_TARGET_LENGTH: usize = 8192;

/// Declared body lengths above this fail with 413.
pub const DEFAULT_MAX_PAYLOAD_LENGTH: usize = usize::MAX;

/// Read granularity for length-bounded and until-close body transfers.
pub const RECV_BUFFER_SIZE: usize = 4096;

/// Fixed line buffer for request/status/header lines.
pub const LINE_BUFFER_SIZE: usize = 2048;

/// Fixed line buffer for chunk-size lines.
pub const CHUNK_LINE_BUFFER_SIZE: usize = 16;

/// How often the accept loop wakes to check the stop flag.
pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Read timeout while draining leftover input from a closing connection.
pub const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Most bytes discarded while draining a closing connection.
pub const CLOSE_DRAIN_LIMIT: usize = 1 << 20;

/// Default worker count for the server pool.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(8)
}
