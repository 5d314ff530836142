// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Duration parsing for Go-style duration strings.
//!
//! Pipeline logic attaches requeue hints to messages as duration strings in Go format
//! (e.g. "30s", "1m30s", "1.5h"). This module parses them into `std::time::Duration`.

use anyhow::{bail, Context, Result};
use std::time::Duration;

const NANOS_PER_MICRO: f64 = 1e3;
const NANOS_PER_MILLI: f64 = 1e6;
const NANOS_PER_SECOND: f64 = 1e9;
const NANOS_PER_MINUTE: f64 = 60.0 * NANOS_PER_SECOND;
const NANOS_PER_HOUR: f64 = 60.0 * NANOS_PER_MINUTE;

/// Parse a Go-style duration string into a Rust `Duration`.
///
/// A duration string is a sequence of decimal numbers, each with an optional fraction
/// and a unit suffix. Supported units:
/// - `ns` (nanoseconds)
/// - `us` / `µs` (microseconds)
/// - `ms` (milliseconds)
/// - `s` (seconds)
/// - `m` (minutes)
/// - `h` (hours)
///
/// A bare `0` is accepted as the zero duration.
///
/// # Examples
///
/// ```
/// use kubepipe::duration::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
/// assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
/// assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5400));
/// assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
///
/// assert!(parse_duration("").is_err());
/// assert!(parse_duration("10").is_err());  // Missing unit
/// assert!(parse_duration("abc").is_err());
/// ```
///
/// # Errors
///
/// Returns an error if:
/// - The string is empty or negative
/// - A number is missing its unit, or a unit is unknown
/// - A number is malformed
pub fn parse_duration(duration_str: &str) -> Result<Duration> {
    let input = duration_str.trim();
    if input.is_empty() {
        bail!("Duration string cannot be empty");
    }

    if input.starts_with('-') {
        bail!("Duration '{duration_str}' must not be negative");
    }
    let mut rest = input.strip_prefix('+').unwrap_or(input);

    if rest == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total_nanos = 0.0_f64;
    while !rest.is_empty() {
        // Leading number, including an optional fraction
        let number_len = rest
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
            .map_or(rest.len(), |(i, _)| i);
        if number_len == 0 {
            bail!("Duration '{duration_str}' has a unit without a value");
        }
        let (number_str, after_number) = rest.split_at(number_len);
        let value: f64 = number_str
            .parse()
            .with_context(|| format!("Invalid number '{number_str}' in duration '{duration_str}'"))?;

        // Unit runs until the next digit
        let unit_len = after_number
            .char_indices()
            .find(|(_, c)| c.is_ascii_digit() || *c == '.')
            .map_or(after_number.len(), |(i, _)| i);
        if unit_len == 0 {
            bail!("Duration '{duration_str}' is missing a unit (ns, us, ms, s, m, h)");
        }
        let (unit, after_unit) = after_number.split_at(unit_len);

        let scale = match unit {
            "ns" => 1.0,
            "us" | "µs" | "μs" => NANOS_PER_MICRO,
            "ms" => NANOS_PER_MILLI,
            "s" => NANOS_PER_SECOND,
            "m" => NANOS_PER_MINUTE,
            "h" => NANOS_PER_HOUR,
            _ => bail!(
                "Unsupported duration unit '{unit}'. Use 'ns', 'us', 'ms', 's', 'm' or 'h'"
            ),
        };

        total_nanos += value * scale;
        rest = after_unit;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        bail!("Duration '{duration_str}' is too large");
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

#[cfg(test)]
#[path = "duration_tests.rs"]
mod duration_tests;
