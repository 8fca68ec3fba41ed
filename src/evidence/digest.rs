//! Trace digesting for generation prompts.
//!
//! The generation capability cannot be handed a raw trace (it is large and
//! mostly noise), so compilation starts from a compact digest: window-title
//! timeline, typed-text runs, transcript text, and summary counts. The
//! digest carries no executor knowledge.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::types::{DemoTrace, EventKind};

/// Adjacent text events closer than this are merged into one run
const TEXT_MERGE_GAP_SECONDS: f64 = 1.8;

/// A timestamped excerpt from the trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimedText {
    pub t: f64,
    pub text: String,
}

/// Compact summary of a trace, fed into segmentation and compilation prompts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceDigest {
    pub name: String,
    pub duration_seconds: f64,
    pub event_count: usize,
    pub screen_size: [u32; 2],

    /// Foreground window titles in order of appearance
    pub window_titles: Vec<TimedText>,

    /// Merged runs of typed text
    pub typed_text: Vec<TimedText>,

    /// Narration transcript, flattened to plain text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_text: Option<String>,
}

impl TraceDigest {
    /// Build a digest from a trace.
    ///
    /// Reads the transcript file referenced by the trace (or a marker
    /// event) best-effort; a missing file just leaves the transcript out.
    pub fn from_trace(trace: &DemoTrace) -> Self {
        let mut window_titles = Vec::new();
        let mut typed_text: Vec<TimedText> = Vec::new();

        for event in &trace.events {
            match event.kind {
                EventKind::WindowTitle => {
                    if let Some(title) = event.data.get("title").and_then(|v| v.as_str()) {
                        // Skip consecutive duplicates
                        if window_titles
                            .last()
                            .map(|last: &TimedText| last.text != title)
                            .unwrap_or(true)
                        {
                            window_titles.push(TimedText {
                                t: event.t,
                                text: title.to_string(),
                            });
                        }
                    }
                }
                EventKind::Text => {
                    if let Some(text) = event.data.get("text").and_then(|v| v.as_str()) {
                        match typed_text.last_mut() {
                            Some(run) if event.t - run.t <= TEXT_MERGE_GAP_SECONDS => {
                                run.text.push_str(text);
                            }
                            _ => typed_text.push(TimedText {
                                t: event.t,
                                text: text.to_string(),
                            }),
                        }
                    }
                }
                _ => {}
            }
        }

        Self {
            name: trace.name.clone(),
            duration_seconds: trace.duration_seconds(),
            event_count: trace.events.len(),
            screen_size: trace.screen_size,
            window_titles,
            typed_text,
            transcript_text: transcript_text(trace),
        }
    }
}

/// Flatten the trace transcript to plain text.
///
/// Order of preference: inline transcript spans, the trace-level transcript
/// file, then a marker event carrying a `transcript_file` path.
fn transcript_text(trace: &DemoTrace) -> Option<String> {
    if let Some(spans) = &trace.transcript {
        let text: Vec<&str> = spans
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect();
        if !text.is_empty() {
            return Some(text.join("\n"));
        }
    }

    let marker_file = trace.events.iter().find_map(|e| {
        (e.kind == EventKind::Marker)
            .then(|| e.data.get("transcript_file").and_then(|v| v.as_str()))
            .flatten()
    });

    let path = trace.transcript_file.as_deref().or(marker_file)?;
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Content digest of a trace, recorded into the compiled workflow so it
/// can be traced back to its source without depending on it
pub fn trace_sha256(trace: &DemoTrace) -> String {
    let mut hasher = Sha256::new();
    // Serialization of an immutable trace is stable for our purposes
    if let Ok(bytes) = serde_json::to_vec(trace) {
        hasher.update(&bytes);
    }
    hex::encode(hasher.finalize())
}
