//! Workflow compiler: evidence trace to validated Workflow.
//!
//! Three generation calls behind one seam: segment (phase 1), align
//! (phase 2), synthesize. Each call carries its own JSON schema and a
//! deterministic validator; failures are retried a bounded number of
//! times with repair context before compilation fails. No partial
//! workflow ever leaves this module.

pub mod segmenter;
pub mod synthesis;

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::adapters::{Catalog, GenerationError, Generator, StructuredCallConfig};
use crate::evidence::{trace_sha256, DemoTrace, TraceDigest};

pub use segmenter::{AlignedSegment, Surface, VisualSegment};
pub use synthesis::SynthesisContext;

use crate::domain::Workflow;

/// Compilation failure. Fatal: nothing is persisted.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("trace has no events to compile")]
    EmptyTrace,

    #[error("generation failed during {stage}: {source}")]
    Generation {
        stage: &'static str,
        #[source]
        source: GenerationError,
    },
}

/// Compiler options beyond the trace itself
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Workflow name (trace name when unset)
    pub workflow_name: Option<String>,

    /// Operator-provided narration/intent text
    pub annotation: Option<String>,
}

/// Transforms traces into workflows against a fixed executor catalog
pub struct Compiler<'a> {
    generator: &'a dyn Generator,
    catalog: Catalog,
    call_config: StructuredCallConfig,
}

impl<'a> Compiler<'a> {
    pub fn new(
        generator: &'a dyn Generator,
        catalog: Catalog,
        call_config: StructuredCallConfig,
    ) -> Self {
        Self {
            generator,
            catalog,
            call_config,
        }
    }

    /// Compile a trace into a validated, re-executable workflow
    #[instrument(skip(self, trace, options), fields(trace = %trace.name))]
    pub async fn compile(
        &self,
        trace: &DemoTrace,
        options: &CompileOptions,
    ) -> Result<Workflow, CompileError> {
        if trace.events.is_empty() {
            return Err(CompileError::EmptyTrace);
        }

        let digest = TraceDigest::from_trace(trace);
        let annotation = options.annotation.as_deref();

        info!(
            events = digest.event_count,
            duration = digest.duration_seconds,
            "Segmenting trace"
        );
        let visual = segmenter::segment_visual(self.generator, &self.call_config, &digest, annotation)
            .await
            .map_err(|source| CompileError::Generation {
                stage: "segmentation",
                source,
            })?;

        info!(segments = visual.len(), "Aligning segments to executors");
        let aligned = segmenter::align_to_executors(
            self.generator,
            &self.call_config,
            &visual,
            &self.catalog,
            annotation,
        )
        .await
        .map_err(|source| CompileError::Generation {
            stage: "alignment",
            source,
        })?;

        let auto_count = aligned
            .iter()
            .filter(|s| s.surface == Surface::Auto)
            .count();
        if auto_count > 0 {
            warn!(
                auto_count,
                "Alignment left segments on AUTO; synthesis must pick concrete kinds"
            );
        }

        let workflow_name = options
            .workflow_name
            .clone()
            .unwrap_or_else(|| trace.name.clone());

        info!(segments = aligned.len(), %workflow_name, "Synthesizing workflow");
        let workflow = synthesis::synthesize(
            self.generator,
            &self.call_config,
            &aligned,
            &self.catalog,
            &digest,
            SynthesisContext {
                workflow_name: &workflow_name,
                trace_sha256: Some(trace_sha256(trace)),
                annotation,
            },
        )
        .await
        .map_err(|source| CompileError::Generation {
            stage: "synthesis",
            source,
        })?;

        info!(
            steps = workflow.steps.len(),
            params = workflow.params.len(),
            "Compilation complete"
        );
        Ok(workflow)
    }
}
