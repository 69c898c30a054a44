//! Trace capture
//!
//! Actors write messages and images into a [`TraceRecorder`] while a test row
//! executes. The coordinator opens a capture window before the row and drains
//! it afterwards, so every result carries exactly the traces of its own
//! execution.

use crate::types::{TraceKind, TraceRecord};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Image captured during one execution window
#[derive(Debug, Clone)]
pub struct TraceImage {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Everything captured during one execution window
#[derive(Debug, Default)]
pub struct CapturedTrace {
    /// Records in capture order; image records hold the image name
    pub records: Vec<TraceRecord>,
    pub images: Vec<TraceImage>,
}

#[derive(Debug, Default)]
struct Buffer {
    active: bool,
    captured: CapturedTrace,
}

/// Shared trace sink handed to actors
#[derive(Debug, Clone, Default)]
pub struct TraceRecorder {
    inner: Arc<Mutex<Buffer>>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a capture window, dropping anything left from an earlier one
    pub fn begin(&self) {
        let mut buffer = self.inner.lock();
        buffer.active = true;
        buffer.captured = CapturedTrace::default();
    }

    /// Close the capture window and hand back its contents
    pub fn drain(&self) -> CapturedTrace {
        let mut buffer = self.inner.lock();
        buffer.active = false;
        let captured = std::mem::take(&mut buffer.captured);
        debug!(
            "Drained {} trace record(s), {} image(s)",
            captured.records.len(),
            captured.images.len()
        );
        captured
    }

    pub fn is_capturing(&self) -> bool {
        self.inner.lock().active
    }

    pub fn message(&self, text: impl Into<String>) {
        let mut buffer = self.inner.lock();
        if !buffer.active {
            return;
        }
        buffer.captured.records.push(TraceRecord {
            kind: TraceKind::Message,
            recorded_at: Utc::now(),
            content: text.into(),
        });
    }

    pub fn image(&self, name: impl Into<String>, bytes: Vec<u8>) {
        let mut buffer = self.inner.lock();
        if !buffer.active {
            return;
        }
        let name = name.into();
        buffer.captured.records.push(TraceRecord {
            kind: TraceKind::Image,
            recorded_at: Utc::now(),
            content: name.clone(),
        });
        buffer.captured.images.push(TraceImage { name, bytes });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_window() {
        let recorder = TraceRecorder::new();
        recorder.message("before window");
        assert!(!recorder.is_capturing());

        recorder.begin();
        recorder.message("first");
        recorder.image("screen.png", vec![1, 2, 3]);
        recorder.message("second");
        let captured = recorder.drain();

        let kinds: Vec<_> = captured.records.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![TraceKind::Message, TraceKind::Image, TraceKind::Message]);
        assert_eq!(captured.records[1].content, "screen.png");
        assert_eq!(captured.images[0].bytes, vec![1, 2, 3]);

        recorder.message("after window");
        assert!(recorder.drain().records.is_empty());
    }

    #[test]
    fn test_begin_resets_previous_window() {
        let recorder = TraceRecorder::new();
        recorder.begin();
        recorder.message("stale");
        recorder.begin();
        recorder.message("fresh");
        let captured = recorder.drain();
        assert_eq!(captured.records.len(), 1);
        assert_eq!(captured.records[0].content, "fresh");
    }
}
