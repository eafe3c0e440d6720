//! Per-scene execution traces.
//!
//! Every replayed scene produces an [`ExecutionTrace`]: one span per action
//! plus spans for setup, authentication, and teardown. The trace is
//! archived as `trace.json` inside a zip written through the storage seam.

use std::collections::BTreeMap;
use std::io::{Cursor, Write};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::result::{GrabarError, GrabarResult};
use crate::storage::Storage;

/// File name of the trace document inside the archive.
pub const TRACE_ENTRY: &str = "trace.json";

/// Lifecycle state of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    /// Started, not yet finished
    Running,
    /// Finished successfully
    Ok,
    /// Finished with an error
    Error,
}

/// One timed unit of work inside a scene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracedSpan {
    /// Span identifier
    pub id: Uuid,
    /// What the span covers (`action:click ...`, `setup`, `auth`)
    pub name: String,
    /// Start timestamp
    pub started_at: DateTime<Utc>,
    /// End timestamp, set on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Outcome
    pub status: SpanStatus,
    /// Error message when `status` is `Error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Free-form key/value context (target, url, strategy)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl TracedSpan {
    fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            started_at: Utc::now(),
            ended_at: None,
            status: SpanStatus::Running,
            error: None,
            attributes: BTreeMap::new(),
        }
    }

    /// Span duration in milliseconds, when finished.
    #[must_use]
    pub fn duration_ms(&self) -> Option<u64> {
        self.ended_at.map(|end| {
            u64::try_from((end - self.started_at).num_milliseconds().max(0)).unwrap_or(u64::MAX)
        })
    }
}

/// Index of a span inside its trace, handed back by [`ExecutionTrace::begin_span`].
pub type SpanHandle = usize;

/// The full record of one scene execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTrace {
    /// Trace identifier
    pub trace_id: Uuid,
    /// Scene this trace belongs to
    pub scene_id: String,
    /// Scene start
    pub started_at: DateTime<Utc>,
    /// Scene end, set by [`ExecutionTrace::finish`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Spans in execution order
    pub spans: Vec<TracedSpan>,
}

impl ExecutionTrace {
    /// Fresh trace for a scene.
    #[must_use]
    pub fn new(scene_id: impl Into<String>) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            scene_id: scene_id.into(),
            started_at: Utc::now(),
            ended_at: None,
            spans: Vec::new(),
        }
    }

    /// Open a span and return its handle.
    pub fn begin_span(&mut self, name: impl Into<String>) -> SpanHandle {
        self.spans.push(TracedSpan::new(name));
        self.spans.len() - 1
    }

    /// Close a span successfully.
    pub fn end_span(&mut self, handle: SpanHandle) {
        if let Some(span) = self.spans.get_mut(handle) {
            span.ended_at = Some(Utc::now());
            span.status = SpanStatus::Ok;
        }
    }

    /// Close a span with an error.
    pub fn fail_span(&mut self, handle: SpanHandle, error: impl Into<String>) {
        if let Some(span) = self.spans.get_mut(handle) {
            span.ended_at = Some(Utc::now());
            span.status = SpanStatus::Error;
            span.error = Some(error.into());
        }
    }

    /// Attach a key/value attribute to a span.
    pub fn set_attr(
        &mut self,
        handle: SpanHandle,
        key: impl Into<String>,
        value: impl Into<String>,
    ) {
        if let Some(span) = self.spans.get_mut(handle) {
            span.attributes.insert(key.into(), value.into());
        }
    }

    /// Mark the trace complete.
    pub fn finish(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    /// Whether any span ended in error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.spans.iter().any(|s| s.status == SpanStatus::Error)
    }

    /// Serialize the trace document.
    pub fn to_json(&self) -> GrabarResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Build the archive bytes: a zip holding a single `trace.json` entry.
    pub fn to_zip(&self) -> GrabarResult<Vec<u8>> {
        let json = self.to_json()?;
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        writer
            .start_file(TRACE_ENTRY, options)
            .map_err(|e| GrabarError::TraceCapture {
                message: e.to_string(),
            })?;
        writer.write_all(&json).map_err(|e| GrabarError::TraceCapture {
            message: e.to_string(),
        })?;
        let cursor = writer.finish().map_err(|e| GrabarError::TraceCapture {
            message: e.to_string(),
        })?;
        Ok(cursor.into_inner())
    }

    /// Archive the trace at `path` through the storage seam.
    pub async fn write_zip(&self, storage: &dyn Storage, path: &str) -> GrabarResult<()> {
        let bytes = self.to_zip()?;
        storage.write_file(path, &bytes).await
    }
}
