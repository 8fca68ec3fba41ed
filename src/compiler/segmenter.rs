//! Two-phase trace segmentation.
//!
//! Phase 1 partitions the trace into intent segments from evidence alone,
//! with no knowledge of what automation can do. Phase 2 aligns and merges
//! those segments against the executor catalog. Keeping the phases apart
//! stops one generation pass from being overloaded with both concerns.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::adapters::{
    call_structured, Catalog, GenerationError, GenerationRequest, Generator, StructuredCallConfig,
};
use crate::domain::StepKind;
use crate::evidence::TraceDigest;

const SYSTEM_VISUAL: &str = "\
You segment a recorded demonstration into high-level task chunks.

You will be given a digest of the recording: window titles, typed text, \
transcript, and optional operator annotation text.

Phase 1 goals:
- Identify where the user's intent changes or the interaction surface changes.
- DO NOT think about automation executors.
- DO NOT over-segment into micro-actions.
- Prefer 4-12 segments for a ~3 minute demonstration.

Return ONLY JSON matching the provided schema. No markdown. No extra keys.";

const SYSTEM_ALIGN: &str = "\
You align and merge intent segments into executor-sized segments for automation.

You will receive:
- Intent segments (t_start, t_end, summary, key_timestamps)
- Optional operator annotation text
- Executor catalog (source of truth)

Goals:
- Assign each final segment a surface: WEB | DESKTOP | WAIT | APP_ACTION | AUTO
- Merge adjacent segments when a single executor can run them as ONE bounded task.
- Prefer fewer segments (typically 4-10) for ~3 minutes.
- Avoid long browsing sessions; prefer short bounded web tasks.

Return ONLY JSON matching the provided schema. No markdown. No extra keys.";

/// A contiguous single-intent sub-range of the trace (phase-1 output)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualSegment {
    pub id: String,
    pub t_start: f64,
    pub t_end: f64,
    pub summary: String,
    #[serde(default)]
    pub key_timestamps: Vec<f64>,
}

/// Surface an aligned segment targets. `Auto` defers the choice to
/// workflow synthesis; it never appears as a step kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Surface {
    Web,
    Desktop,
    Wait,
    AppAction,
    Auto,
}

impl Surface {
    pub fn step_kind(self) -> Option<StepKind> {
        match self {
            Surface::Web => Some(StepKind::Web),
            Surface::Desktop => Some(StepKind::Desktop),
            Surface::Wait => Some(StepKind::Wait),
            Surface::AppAction => Some(StepKind::AppAction),
            Surface::Auto => None,
        }
    }
}

/// An executor-sized segment (phase-2 output)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignedSegment {
    pub id: String,
    pub t_start: f64,
    pub t_end: f64,
    pub surface: Surface,
    pub summary: String,
    #[serde(default)]
    pub key_timestamps: Vec<f64>,
    /// Phase-1 segment ids merged into this one
    pub merge_of: Vec<String>,
}

fn visual_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["segments"],
        "properties": {
            "segments": {
                "type": "array",
                "minItems": 1,
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["id", "t_start", "t_end", "summary", "key_timestamps"],
                    "properties": {
                        "id": {"type": "string"},
                        "t_start": {"type": "number"},
                        "t_end": {"type": "number"},
                        "summary": {"type": "string"},
                        "key_timestamps": {"type": "array", "items": {"type": "number"}},
                    },
                },
            }
        },
    })
}

fn aligned_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["segments"],
        "properties": {
            "segments": {
                "type": "array",
                "minItems": 1,
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["id", "t_start", "t_end", "surface", "summary", "key_timestamps", "merge_of"],
                    "properties": {
                        "id": {"type": "string"},
                        "t_start": {"type": "number"},
                        "t_end": {"type": "number"},
                        "surface": {"type": "string", "enum": ["WEB", "DESKTOP", "WAIT", "APP_ACTION", "AUTO"]},
                        "summary": {"type": "string"},
                        "key_timestamps": {"type": "array", "items": {"type": "number"}},
                        "merge_of": {"type": "array", "items": {"type": "string"}},
                    },
                },
            }
        },
    })
}

fn validate_visual(raw: Value) -> anyhow::Result<Vec<VisualSegment>> {
    let segments: Vec<VisualSegment> = serde_json::from_value(
        raw.get("segments")
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("missing 'segments'"))?,
    )?;
    if segments.is_empty() {
        anyhow::bail!("segments must be a non-empty list");
    }
    for segment in &segments {
        if !segment.t_start.is_finite() || !segment.t_end.is_finite() {
            anyhow::bail!("segment '{}': t_start/t_end must be finite", segment.id);
        }
        if segment.t_start > segment.t_end {
            anyhow::bail!("segment '{}': t_start exceeds t_end", segment.id);
        }
    }
    Ok(segments)
}

fn validate_aligned(raw: Value) -> anyhow::Result<Vec<AlignedSegment>> {
    let segments: Vec<AlignedSegment> = serde_json::from_value(
        raw.get("segments")
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("missing 'segments'"))?,
    )?;
    if segments.is_empty() {
        anyhow::bail!("segments must be a non-empty list");
    }
    for segment in &segments {
        if segment.merge_of.is_empty() {
            anyhow::bail!("segment '{}': merge_of must be non-empty", segment.id);
        }
    }
    Ok(segments)
}

/// Phase 1: partition the trace digest into intent segments
pub async fn segment_visual(
    generator: &dyn Generator,
    cfg: &StructuredCallConfig,
    digest: &TraceDigest,
    annotation: Option<&str>,
) -> Result<Vec<VisualSegment>, GenerationError> {
    let request = GenerationRequest {
        system: SYSTEM_VISUAL.to_string(),
        payload: json!({
            "annotation": annotation,
            "target_min_segments": 4,
            "target_max_segments": 12,
            "trace_digest": digest,
        }),
        schema_name: "VisualSegments".to_string(),
        schema: visual_schema(),
    };
    call_structured(generator, cfg, &request, validate_visual).await
}

/// Phase 2: align intent segments to executor surfaces
pub async fn align_to_executors(
    generator: &dyn Generator,
    cfg: &StructuredCallConfig,
    visual: &[VisualSegment],
    catalog: &Catalog,
    annotation: Option<&str>,
) -> Result<Vec<AlignedSegment>, GenerationError> {
    let request = GenerationRequest {
        system: SYSTEM_ALIGN.to_string(),
        payload: json!({
            "annotation": annotation,
            "executor_catalog_text": catalog.text(),
            "visual_segments": visual,
        }),
        schema_name: "AlignedSegments".to_string(),
        schema: aligned_schema(),
    };
    call_structured(generator, cfg, &request, validate_aligned).await
}
