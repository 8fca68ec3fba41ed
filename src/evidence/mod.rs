//! Evidence model: recorded demonstration traces.
//!
//! Traces are produced by an external recorder and consumed read-only by
//! the compiler. The digest submodule condenses a trace for generation
//! prompts.

pub mod digest;
pub mod types;

pub use digest::{trace_sha256, TimedText, TraceDigest};
pub use types::{DemoTrace, EventKind, RawEvent, TranscriptSpan};
