//! Executor capability catalog.
//!
//! Machine-readable descriptions of what each executor can do. The
//! compiler is conditioned on this catalog: phase 2 aligns segments to
//! these surfaces, and workflow synthesis may only emit step kinds listed
//! here. Keep it in sync with the executors actually deployed.

use std::collections::BTreeMap;
use std::fmt::Write;

use serde_json::{json, Value};

use crate::domain::{StepKind, ValueType};

/// Description of one executor's contract
#[derive(Debug, Clone)]
pub struct ExecutorSpec {
    pub kind: StepKind,

    /// Required input names and types
    pub inputs_required: BTreeMap<&'static str, ValueType>,

    /// Optional input names and types
    pub inputs_optional: BTreeMap<&'static str, ValueType>,

    /// Guidance for the compiler
    pub inputs_notes: Vec<&'static str>,

    pub outputs_notes: Vec<&'static str>,

    /// Suggested planning limits (not enforced automatically)
    pub max_actions_hint: u32,
    pub max_seconds_hint: u32,

    /// Short examples the compiler can imitate
    pub examples: Vec<Value>,
}

/// The set of executor capabilities a compile targets
#[derive(Debug, Clone)]
pub struct Catalog {
    specs: Vec<ExecutorSpec>,
}

impl Catalog {
    pub fn new(specs: Vec<ExecutorSpec>) -> Self {
        Self { specs }
    }

    pub fn specs(&self) -> &[ExecutorSpec] {
        &self.specs
    }

    /// Whether a step kind has a capability in this catalog
    pub fn supports(&self, kind: StepKind) -> bool {
        self.specs.iter().any(|s| s.kind == kind)
    }

    /// Render the catalog as prompt text for the compiler/segmenter
    pub fn text(&self) -> String {
        let mut out = String::new();
        for spec in &self.specs {
            let _ = writeln!(out, "Executor for step type {}:", spec.kind);
            let _ = writeln!(out, "  Required inputs: {:?}", spec.inputs_required);
            if !spec.inputs_optional.is_empty() {
                let _ = writeln!(out, "  Optional inputs: {:?}", spec.inputs_optional);
            }
            for note in &spec.inputs_notes {
                let _ = writeln!(out, "  Note: {}", note);
            }
            for note in &spec.outputs_notes {
                let _ = writeln!(out, "  Output note: {}", note);
            }
            let _ = writeln!(
                out,
                "  Suggested limits: max_actions<={}, max_seconds<={}",
                spec.max_actions_hint, spec.max_seconds_hint
            );
            if !spec.examples.is_empty() {
                let _ = writeln!(out, "  Examples:");
                for example in spec.examples.iter().take(2) {
                    let _ = writeln!(out, "    {}", example);
                }
            }
            out.push('\n');
        }
        out.trim_end().to_string()
    }
}

/// Default capability catalog matching the built-in and helper executors
pub fn default_catalog() -> Catalog {
    Catalog::new(vec![
        ExecutorSpec {
            kind: StepKind::Web,
            inputs_required: [("task", ValueType::String)].into_iter().collect(),
            inputs_optional: BTreeMap::new(),
            inputs_notes: vec![
                "Executes in a browser using a browsing agent; best for navigation plus extraction.",
                "Better suited for short, bounded tasks. Avoid long browsing sessions navigating dozens of pages.",
                "Prefer combining adjacent web micro-actions (search, open result, extract) into ONE bounded WEB step when feasible.",
            ],
            outputs_notes: vec![
                "Can reliably return structured fields extracted from the page.",
                "Prefer simple, flat output schemas. Do not invent data.",
            ],
            max_actions_hint: 15,
            max_seconds_hint: 90,
            examples: vec![
                json!({
                    "kind": "WEB",
                    "inputs": {"task": "Search for {{ user_text }}, open the most relevant result, extract the required fields."},
                    "output_schema": {"opened_url": "string", "page_title": "string"},
                }),
                json!({
                    "kind": "WEB",
                    "inputs": {"task": "Find latitude and longitude for {{ user_text }} from a reliable source."},
                    "output_schema": {"lat": "number", "lng": "number"},
                }),
            ],
        },
        ExecutorSpec {
            kind: StepKind::Desktop,
            inputs_required: [("task", ValueType::String)].into_iter().collect(),
            inputs_optional: [("app", ValueType::String)].into_iter().collect(),
            inputs_notes: vec![
                "Executes desktop UI actions: launching apps, keyboard-driven actions, pasting text blocks.",
                "Prefer combining adjacent desktop micro-actions (open app, create document, paste, save) into ONE DESKTOP step when feasible.",
            ],
            outputs_notes: vec![
                "Only declare output fields that are realistically observable (e.g. front window title).",
                "Do not require postconditions on unobservable UI state.",
            ],
            max_actions_hint: 12,
            max_seconds_hint: 75,
            examples: vec![json!({
                "kind": "DESKTOP",
                "inputs": {"task": "Open the notes app and create a new note, then paste a formatted block."},
                "output_schema": {"front_app": "string"},
            })],
        },
        ExecutorSpec {
            kind: StepKind::Wait,
            inputs_required: [("seconds", ValueType::Number)].into_iter().collect(),
            inputs_optional: BTreeMap::new(),
            inputs_notes: vec![
                "Pauses execution for a fixed duration.",
                "Used to absorb UI latency (page loads, app launch, animations). Use sparingly.",
            ],
            outputs_notes: vec!["Can only report how long it waited; no UI or web state is observed."],
            max_actions_hint: 1,
            max_seconds_hint: 30,
            examples: vec![json!({
                "kind": "WAIT",
                "inputs": {"seconds": 1.5},
                "output_schema": {"waited_seconds": "number"},
            })],
        },
        ExecutorSpec {
            kind: StepKind::AppAction,
            inputs_required: [("task", ValueType::String), ("app", ValueType::String)]
                .into_iter()
                .collect(),
            inputs_optional: BTreeMap::new(),
            inputs_notes: vec![
                "Executes an integration-specific action inside one application (e.g. save a note).",
                "Use when a dedicated integration exists for the target app; otherwise use DESKTOP.",
            ],
            outputs_notes: vec!["Returns whatever the integration reports, typically an identifier or title."],
            max_actions_hint: 5,
            max_seconds_hint: 45,
            examples: vec![json!({
                "kind": "APP_ACTION",
                "inputs": {"app": "notes", "task": "Create a note titled {{ steps.step_02.page_title }}"},
                "output_schema": {"note_title": "string"},
            })],
        },
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_covers_all_kinds() {
        let catalog = default_catalog();
        for kind in [
            StepKind::Web,
            StepKind::Desktop,
            StepKind::Wait,
            StepKind::AppAction,
        ] {
            assert!(catalog.supports(kind), "missing {kind}");
        }
    }

    #[test]
    fn test_catalog_text_mentions_limits() {
        let text = default_catalog().text();
        assert!(text.contains("WEB"));
        assert!(text.contains("max_seconds<=90"));
    }
}
