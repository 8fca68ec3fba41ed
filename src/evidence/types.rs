//! Demonstration trace data types.
//!
//! These types represent the trace.json schema produced by the external
//! recorder. A trace is immutable once captured; the compiler only reads it.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of a recorded interaction event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MouseClick,
    KeyDown,
    KeyUp,
    /// A run of typed characters
    Text,
    /// Foreground window title changed
    WindowTitle,
    /// Out-of-band annotation inserted by the recorder
    Marker,
}

/// One timestamped event in a trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    /// Seconds from trace start
    pub t: f64,

    pub kind: EventKind,

    /// Event-specific payload (e.g. `{"title": ...}` for window_title)
    #[serde(default)]
    pub data: Value,
}

/// A timed span of narration transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSpan {
    pub t0: f64,
    pub t1: f64,
    pub text: String,
}

/// A recorded demonstration: ordered events plus optional media references
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoTrace {
    pub name: String,

    pub started_at: DateTime<Utc>,

    /// Screen size [width, height]
    pub screen_size: [u32; 2],

    pub events: Vec<RawEvent>,

    /// Path to the screen recording, if one was captured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_path: Option<String>,

    /// Narration transcript, if audio was captured and transcribed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<Vec<TranscriptSpan>>,

    /// Path to a plain-text transcript file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_file: Option<String>,
}

impl DemoTrace {
    /// Load a trace from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read trace file: {}", path.display()))?;
        serde_json::from_str(&content).context("Failed to parse trace JSON")
    }

    /// Duration in seconds, taken from the last event
    pub fn duration_seconds(&self) -> f64 {
        self.events.last().map(|e| e.t).unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_trace_parsing() {
        let raw = json!({
            "name": "demo1",
            "started_at": "2026-01-10T12:00:00Z",
            "screen_size": [1920, 1080],
            "events": [
                {"t": 0.5, "kind": "window_title", "data": {"title": "Safari"}},
                {"t": 2.0, "kind": "text", "data": {"text": "pizza near me"}}
            ]
        });
        let trace: DemoTrace = serde_json::from_value(raw).unwrap();
        assert_eq!(trace.events.len(), 2);
        assert_eq!(trace.events[0].kind, EventKind::WindowTitle);
        assert_eq!(trace.duration_seconds(), 2.0);
    }
}
