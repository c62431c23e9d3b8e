// Copyright 2024-2026 The Varve Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Lexicographically sortable timestamps.
//!
//! A hextime is a 16-character, zero-padded, lowercase hex rendering of a
//! microsecond Unix timestamp. Because the encoding is fixed-width and
//! big-endian, byte order equals time order, which lets revision filenames
//! and soft-delete suffixes be compared as plain strings.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Number of hex digits in an encoded hextime.
pub const HEXTIME_LEN: usize = 16;

// Last value handed out by `now()`. Within one process, `now()` never repeats
// or goes backwards, even if the wall clock does.
static LAST: AtomicU64 = AtomicU64::new(0);

fn wall_clock_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_micros() as u64
}

/// Returns a strictly monotonic hextime for the current instant.
pub fn now() -> String {
    let wall = wall_clock_micros();
    let mut prev = LAST.load(Ordering::Relaxed);
    loop {
        let next = wall.max(prev + 1);
        match LAST.compare_exchange_weak(prev, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return encode(next),
            Err(actual) => prev = actual,
        }
    }
}

/// Encodes a microsecond timestamp.
pub fn encode(micros: u64) -> String {
    format!("{micros:016x}")
}

/// Decodes an encoded hextime back to microseconds.
pub fn decode(hextime: &str) -> Option<u64> {
    if hextime.len() < HEXTIME_LEN {
        return None;
    }
    u64::from_str_radix(hextime, 16).ok()
}

/// Hextime for "`timeout` ago", used as the soft-delete deadline by GC.
/// Derived from the same monotonic source as [`now`], so with a zero timeout
/// every previously issued hextime is already past the deadline.
pub fn deadline(timeout: Duration) -> String {
    let micros = decode(&now()).unwrap_or(u64::MAX);
    encode(micros.saturating_sub(timeout.as_micros() as u64))
}
