//! Inbound pipeline: bytes → candidates → validate → dedup.
//!
//! What comes out is raw text that is a single JSON object and has not been
//! seen before. Turning it into an [`Envelope`](super::Envelope) is the
//! dispatcher's job.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

use super::dedup::DedupCache;
use super::frame::{is_json_object, split_sticky, FrameAssembler, STICKY_MARKER};
use crate::metrics::SyncMetrics;
use crate::NetworkError;

/// Per-connection receive pipeline
///
/// The frame assembler belongs to one connection; the dedup cache is shared
/// with every connection of the same client.
pub struct InboundPipeline {
    assembler: FrameAssembler,
    dedup: Arc<Mutex<DedupCache>>,
    metrics: SyncMetrics,
}

impl InboundPipeline {
    pub fn new(
        assembler: FrameAssembler,
        dedup: Arc<Mutex<DedupCache>>,
        metrics: SyncMetrics,
    ) -> Self {
        Self {
            assembler,
            dedup,
            metrics,
        }
    }

    /// Feed one read; returns admitted messages in wire order
    pub fn ingest(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        for candidate in self.assembler.push(bytes) {
            self.process(candidate, true, &mut out);
        }
        out
    }

    fn process(&mut self, candidate: String, allow_split: bool, out: &mut Vec<String>) {
        if !is_json_object(&candidate) {
            if allow_split && candidate.contains(STICKY_MARKER) {
                let spans = split_sticky(&candidate);
                debug!(spans = spans.len(), "Splitting sticky packet");
                if spans.is_empty() {
                    self.reject(
                        &candidate,
                        NetworkError::protocol("Sticky packet yielded no objects"),
                    );
                }
                // spans are never split again, so a bad span cannot recurse
                for span in spans {
                    self.process(span, false, out);
                }
            } else {
                self.reject(
                    &candidate,
                    NetworkError::protocol("Candidate is not a single JSON object"),
                );
            }
            return;
        }

        if !self.dedup.lock().admit(candidate.as_bytes()) {
            self.metrics.record_duplicate();
            return;
        }

        out.push(candidate);
    }

    fn reject(&self, candidate: &str, error: NetworkError) {
        self.metrics.record_protocol_error();
        warn!(
            error = %error,
            preview = %preview(candidate),
            "Dropping inbound message"
        );
    }
}

/// First 120 characters, for log lines
pub(crate) fn preview(text: &str) -> &str {
    match text.char_indices().nth(120) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}
