//! SQLite helper utilities for type conversion and SQL fragments
//!
//! SQLite has no native timestamp type. Timestamps are stored as RFC 3339 UTC
//! text with a fixed microsecond width so that text comparison matches
//! chronological order.

use anyhow::{Result, anyhow};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, SubsecRound, Utc};

// ============================================================================
// Timestamp Helpers
// ============================================================================

/// Naive formats accepted on input; they are read as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

/// Current UTC time at storage precision
#[inline]
pub fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Convert a chrono DateTime to its stored text form
#[inline]
pub fn datetime_to_str(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 string, or a naive datetime taken as UTC
pub fn str_to_datetime(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
        .map(|ndt| ndt.and_utc())
        .ok_or_else(|| anyhow!("Invalid datetime '{}'", s))
}

// ============================================================================
// Query Building Helpers
// ============================================================================

/// `?, ?, ?` for `count` bound parameters
pub fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// Set-membership fragment. An empty list matches nothing (or everything
/// when negated).
pub fn in_list_sql(column: &str, placeholder_count: usize, negated: bool) -> String {
    if placeholder_count == 0 {
        return if negated { "1=1" } else { "1=0" }.to_string();
    }

    format!(
        "{} {}IN ({})",
        column,
        if negated { "NOT " } else { "" },
        placeholders(placeholder_count)
    )
}

/// Membership test against a JSON array bound as a single parameter, which
/// keeps key lookups clear of SQLite's bound-parameter limit.
pub fn in_json_array_sql(column: &str) -> String {
    format!("{} IN (SELECT value FROM json_each(?))", column)
}
