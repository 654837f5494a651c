//! Event definitions shared by the spin collector and the event tracker
//!
//! Events are immutable once created. Spins are produced by the collector's
//! polling source, tracked events by instrumentation call sites.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Highest number on a single-zero wheel
pub const MAX_NUMBER: u8 = 36;

/// Red pockets of a single-zero wheel
pub const RED_NUMBERS: [u8; 18] = [
    1, 3, 5, 7, 9, 12, 14, 16, 18, 19, 21, 23, 25, 27, 30, 32, 34, 36,
];

/// Pocket color, derived from the number through the fixed partition table
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Red,
    Black,
    Green,
}

impl Color {
    /// Classify a pocket number
    ///
    /// Returns `None` for numbers outside `0..=36`.
    pub fn of(number: u8) -> Option<Self> {
        match number {
            0 => Some(Color::Green),
            n if n > MAX_NUMBER => None,
            n if RED_NUMBERS.contains(&n) => Some(Color::Red),
            _ => Some(Color::Black),
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Color::Red => "red",
            Color::Black => "black",
            Color::Green => "green",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Color {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "red" => Ok(Color::Red),
            "black" => Ok(Color::Black),
            "green" => Ok(Color::Green),
            _ => anyhow::bail!("Invalid color: {}", s),
        }
    }
}

/// One observed roulette outcome
///
/// This is also the persisted record layout: the mirror stores a JSON array
/// of these, newest first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Spin {
    /// Pocket number (0..=36)
    pub number: u8,
    /// Color derived from `number`
    pub color: Color,
    /// When the spin was observed
    pub timestamp: DateTime<Utc>,
    /// Casino the table belongs to
    pub casino: String,
    /// Table the spin was observed on
    pub table: String,
}

impl Spin {
    /// Create a spin observed at `timestamp`
    ///
    /// Returns `None` when `number` is not a valid pocket.
    pub fn new(number: u8, timestamp: DateTime<Utc>, casino: &str, table: &str) -> Option<Self> {
        let color = Color::of(number)?;
        Some(Self {
            number,
            color,
            timestamp,
            casino: casino.to_string(),
            table: table.to_string(),
        })
    }
}

/// Severity of a tracked event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    #[default]
    Info,
    Warning,
    Error,
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventLevel::Info => "info",
            EventLevel::Warning => "warning",
            EventLevel::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Instrumentation event recorded by the event tracker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedEvent {
    /// Unique event identifier
    pub id: String,
    /// Event type (click, js_error, network_request, ...)
    #[serde(rename = "type")]
    pub event_type: String,
    /// Severity
    pub level: EventLevel,
    /// When the event was recorded
    pub timestamp: DateTime<Utc>,
    /// Session the event belongs to
    pub session_id: String,
    /// User the event belongs to
    pub user_id: String,
    /// Free-form event details
    pub details: serde_json::Value,
    /// Milliseconds since the tracker started
    pub time_on_page_ms: u64,
}

impl TrackedEvent {
    /// Create a new tracked event stamped with the current time
    pub fn new(
        event_type: &str,
        level: EventLevel,
        session_id: &str,
        user_id: &str,
        details: serde_json::Value,
        time_on_page_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.to_string(),
            level,
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            details,
            time_on_page_ms,
        }
    }
}
