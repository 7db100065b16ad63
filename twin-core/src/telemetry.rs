//! Trace recorder - batches one trace per model call and ships them to the sink
//!
//! Each logical operation opens a trace (input/output/metadata/tags) and may
//! append spans, scores and evaluation requests to it while it sits in the
//! recorder's pending batch. [`TelemetryRecorder::flush`] posts the whole batch
//! to the ingestion sink in one request.
//!
//! Everything stored here has been through [`crate::privacy`] first. Telemetry
//! never fails the caller: a recorder built without a credential hands out no
//! handles, and sink failures are logged and leave the batch in place.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{env_credential, TelemetryConfig, OPIK_KEY_VAR};
use crate::privacy::{
    sanitize_telemetry_value, summarize_for_telemetry, summarize_with_limit, MAX_STRING_LENGTH,
};
use crate::store::{self, SessionStore, RUN_ID_KEY};

/// Path on the sink that accepts `{ traces: [...] }`.
pub const INGEST_PATH: &str = "/api/opik/ingest";

/// Liveness probe path on the sink.
pub const HEALTH_PATH: &str = "/api/opik/health";

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Trace sink returned {code}: {body}")]
    Status { code: u16, body: String },
}

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub span_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl SpanRecord {
    pub fn new(name: impl Into<String>, span_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            span_type: span_type.into(),
            input: None,
            output: None,
            metadata: None,
        }
    }

    pub fn llm(name: impl Into<String>) -> Self {
        Self::new(name, "llm")
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub name: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ScoreRecord {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Asks the sink to score an input/output pair asynchronously.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalRequest {
    pub label_prefix: String,
    pub input: String,
    pub output: String,
}

impl EvalRequest {
    pub fn new(
        label_prefix: impl Into<String>,
        input: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            label_prefix: label_prefix.into(),
            input: input.into(),
            output: output.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub id: String,
    pub name: String,
    pub input: Value,
    pub output: Value,
    pub metadata: Value,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub spans: Vec<SpanRecord>,
    #[serde(default)]
    pub scores: Vec<ScoreRecord>,
    #[serde(default)]
    pub evals: Vec<EvalRequest>,
    #[serde(default)]
    pub ended: bool,
}

/// Parameters for [`TelemetryRecorder::create_trace`].
#[derive(Debug, Clone, Default)]
pub struct NewTrace {
    pub name: String,
    pub input: Value,
    pub output: Option<Value>,
    pub metadata: Option<Value>,
    pub tags: Vec<String>,
}

impl NewTrace {
    pub fn new(name: impl Into<String>, input: Value) -> Self {
        Self {
            name: name.into(),
            input,
            ..Self::default()
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

// ============================================================================
// Run id
// ============================================================================

/// Identifies every trace from one device/session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reuse the persisted id, or create and persist one. Storage failures
    /// fall back to an id that lives only for this process.
    pub async fn load_or_create(store: &dyn SessionStore) -> Self {
        match store::load::<String>(store, RUN_ID_KEY).await {
            Ok(Some(existing)) if !existing.is_empty() => return Self(existing),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Could not read run id"),
        }

        let fresh = Self::generate();
        if let Err(e) = store::save(store, RUN_ID_KEY, fresh.as_str()).await {
            tracing::warn!(error = %e, "Could not persist run id");
        }
        fresh
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Sink
// ============================================================================

/// Sink reply. Only the HTTP status decides whether a batch was delivered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestAck {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub traces: Option<usize>,
    #[serde(default)]
    pub error: Option<String>,
}

#[async_trait]
pub trait TraceSink: Send + Sync {
    async fn ingest(&self, traces: &[TraceRecord]) -> Result<IngestAck, TelemetryError>;

    fn name(&self) -> &str;
}

#[derive(Serialize)]
struct IngestBody<'a> {
    traces: &'a [TraceRecord],
}

/// Posts batches to `{base_url}/api/opik/ingest`.
#[derive(Debug, Clone)]
pub struct HttpTraceSink {
    client: Client,
    base_url: String,
}

impl HttpTraceSink {
    pub fn new(base_url: impl Into<String>) -> Result<Self, TelemetryError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub async fn health(&self) -> Result<bool, TelemetryError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, HEALTH_PATH))
            .send()
            .await?;
        Ok(response.status().is_success())
    }
}

#[async_trait]
impl TraceSink for HttpTraceSink {
    async fn ingest(&self, traces: &[TraceRecord]) -> Result<IngestAck, TelemetryError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, INGEST_PATH))
            .json(&IngestBody { traces })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TelemetryError::Status {
                code: status.as_u16(),
                body,
            });
        }

        let body = response.text().await.unwrap_or_default();
        Ok(serde_json::from_str(&body).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Trace sink reply was not an ack object");
            IngestAck {
                ok: true,
                ..IngestAck::default()
            }
        }))
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Sink for a recorder that never records.
#[derive(Debug, Default)]
pub struct NullTraceSink;

#[async_trait]
impl TraceSink for NullTraceSink {
    async fn ingest(&self, traces: &[TraceRecord]) -> Result<IngestAck, TelemetryError> {
        Ok(IngestAck {
            ok: true,
            traces: Some(traces.len()),
            error: None,
        })
    }

    fn name(&self) -> &str {
        "null"
    }
}

// ============================================================================
// Pending batch
// ============================================================================

#[derive(Debug, Default)]
struct BatchState {
    pending: Vec<TraceRecord>,
    /// Batches handed to the sink, by ticket, until their send settles.
    in_flight: BTreeMap<u64, Vec<TraceRecord>>,
    next_ticket: u64,
}

#[derive(Debug, Default)]
struct PendingBatch {
    state: Mutex<BatchState>,
}

impl PendingBatch {
    fn lock(&self) -> MutexGuard<'_, BatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, trace: TraceRecord) {
        self.lock().pending.push(trace);
    }

    /// Apply `f` to a trace that is pending or mid-send. Returns false once
    /// it has been delivered.
    fn with_trace<F: FnOnce(&mut TraceRecord)>(&self, id: &str, f: F) -> bool {
        let mut state = self.lock();
        let BatchState {
            pending, in_flight, ..
        } = &mut *state;
        match pending
            .iter_mut()
            .chain(in_flight.values_mut().flatten())
            .find(|t| t.id == id)
        {
            Some(trace) => {
                f(trace);
                true
            }
            None => false,
        }
    }

    /// Move everything pending in flight. Returns its ticket and a copy to send.
    fn take(&self) -> Option<(u64, Vec<TraceRecord>)> {
        let mut state = self.lock();
        if state.pending.is_empty() {
            return None;
        }
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        let batch = std::mem::take(&mut state.pending);
        let copy = batch.clone();
        state.in_flight.insert(ticket, batch);
        Some((ticket, copy))
    }

    fn complete(&self, ticket: u64) {
        self.lock().in_flight.remove(&ticket);
    }

    /// Put an unsent batch, including changes made during the send, back
    /// ahead of anything recorded since it was taken.
    fn restore(&self, ticket: u64) {
        let mut state = self.lock();
        if let Some(mut batch) = state.in_flight.remove(&ticket) {
            batch.append(&mut state.pending);
            state.pending = batch;
        }
    }

    fn snapshot(&self) -> Vec<TraceRecord> {
        let state = self.lock();
        state
            .pending
            .iter()
            .chain(state.in_flight.values().flatten())
            .cloned()
            .collect()
    }

    fn len(&self) -> usize {
        let state = self.lock();
        state.pending.len() + state.in_flight.values().map(Vec::len).sum::<usize>()
    }
}

/// Settles a taken batch on drop, so a cancelled flush restores it.
struct InFlight<'a> {
    batch: &'a PendingBatch,
    ticket: u64,
    delivered: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.delivered {
            self.batch.complete(self.ticket);
        } else {
            self.batch.restore(self.ticket);
        }
    }
}

// ============================================================================
// TraceHandle
// ============================================================================

/// Handle to an open trace. Operations after the trace was delivered are no-ops.
#[derive(Debug, Clone)]
pub struct TraceHandle {
    id: String,
    pending: Arc<PendingBatch>,
}

/// Returned by [`TraceHandle::span`]; spans travel with their trace.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpanGuard;

impl SpanGuard {
    pub fn end(self) {}
}

impl TraceHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Replace the trace output.
    pub fn update(&self, output: Value) {
        let output = sanitize_telemetry_value(&output);
        self.pending.with_trace(&self.id, |t| t.output = output);
    }

    pub fn span(&self, span: SpanRecord) -> SpanGuard {
        let span = SpanRecord {
            name: clean_label(&span.name),
            span_type: clean_label(&span.span_type),
            input: span.input.as_ref().map(sanitize_telemetry_value),
            output: span.output.as_ref().map(sanitize_telemetry_value),
            metadata: span.metadata.as_ref().map(sanitize_telemetry_value),
        };
        self.pending.with_trace(&self.id, |t| t.spans.push(span));
        SpanGuard
    }

    pub fn end(&self) -> &Self {
        self.pending.with_trace(&self.id, |t| t.ended = true);
        self
    }

    pub fn score(&self, score: ScoreRecord) {
        let score = ScoreRecord {
            name: clean_label(&score.name),
            value: score.value,
            reason: score.reason.as_deref().map(summarize_for_telemetry),
        };
        self.pending.with_trace(&self.id, |t| t.scores.push(score));
    }
}

pub fn log_trace_scores(trace: Option<&TraceHandle>, scores: &[ScoreRecord]) {
    let Some(trace) = trace else {
        return;
    };
    for score in scores {
        trace.score(score.clone());
    }
}

fn clean_label(label: &str) -> String {
    summarize_with_limit(label, MAX_STRING_LENGTH)
}

// ============================================================================
// TelemetryRecorder
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was pending.
    Empty,
    /// The batch was delivered and removed.
    Sent(usize),
    /// Delivery failed; the batch is pending again.
    Retained(usize),
}

#[derive(Clone)]
pub struct TelemetryRecorder {
    enabled: bool,
    run_id: RunId,
    app: String,
    pending: Arc<PendingBatch>,
    sink: Arc<dyn TraceSink>,
}

impl fmt::Debug for TelemetryRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryRecorder")
            .field("enabled", &self.enabled)
            .field("run_id", &self.run_id)
            .field("app", &self.app)
            .field("sink", &self.sink.name())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl TelemetryRecorder {
    pub fn new(sink: Arc<dyn TraceSink>, run_id: RunId, app: impl Into<String>) -> Self {
        Self {
            enabled: true,
            run_id,
            app: app.into(),
            pending: Arc::new(PendingBatch::default()),
            sink,
        }
    }

    /// A recorder that hands out no trace handles.
    pub fn disabled(run_id: RunId) -> Self {
        Self {
            enabled: false,
            ..Self::new(Arc::new(NullTraceSink), run_id, "mirror-twin")
        }
    }

    /// Enabled only when `OPIK_API_KEY` is set.
    pub fn from_config(config: &TelemetryConfig, run_id: RunId) -> Self {
        if env_credential(&[OPIK_KEY_VAR]).is_none() {
            tracing::info!("Telemetry disabled: {} not set", OPIK_KEY_VAR);
            return Self::disabled(run_id);
        }
        match HttpTraceSink::new(config.ingest_url.clone()) {
            Ok(sink) => Self::new(Arc::new(sink), run_id, config.project_name.clone()),
            Err(e) => {
                tracing::warn!(error = %e, "Telemetry disabled: could not build sink client");
                Self::disabled(run_id)
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Open a trace, or `None` when telemetry is disabled.
    pub fn create_trace(&self, params: NewTrace) -> Option<TraceHandle> {
        if !self.enabled {
            return None;
        }

        let id = Uuid::new_v4().to_string();

        let mut metadata = match params.metadata.as_ref().map(sanitize_telemetry_value) {
            Some(Value::Object(map)) => map,
            Some(other) => {
                let mut map = Map::new();
                map.insert("extra".to_string(), other);
                map
            }
            None => Map::new(),
        };
        // System-generated identifiers go in after sanitization so redaction
        // rules never rewrite them.
        metadata.insert("runId".to_string(), json!(self.run_id.as_str()));
        metadata.insert("app".to_string(), json!(self.app));

        let mut tags: Vec<String> = Vec::with_capacity(params.tags.len());
        for tag in params.tags.iter().map(|t| clean_label(t)) {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }

        let trace = TraceRecord {
            id: id.clone(),
            name: clean_label(&params.name),
            input: sanitize_telemetry_value(&params.input),
            output: sanitize_telemetry_value(&params.output.unwrap_or_else(|| json!({}))),
            metadata: Value::Object(metadata),
            tags,
            spans: Vec::new(),
            scores: Vec::new(),
            evals: Vec::new(),
            ended: false,
        };

        self.pending.insert(trace);

        Some(TraceHandle {
            id,
            pending: Arc::clone(&self.pending),
        })
    }

    /// Queue an evaluation against a trace that has not been delivered yet.
    pub fn queue_evaluation(&self, trace: Option<&TraceHandle>, eval: EvalRequest) {
        let Some(trace) = trace else {
            return;
        };
        let eval = EvalRequest {
            label_prefix: clean_label(&eval.label_prefix),
            input: summarize_for_telemetry(&eval.input),
            output: summarize_for_telemetry(&eval.output),
        };
        if !self.pending.with_trace(trace.id(), |t| t.evals.push(eval)) {
            tracing::debug!(trace_id = trace.id(), "Evaluation dropped: trace already delivered");
        }
    }

    /// Send the whole pending batch in one request.
    ///
    /// Traces stay reachable by their handles while the request is in flight.
    /// A failed send puts the batch back with whatever was added to it
    /// meanwhile; after a successful send, late changes are dropped.
    pub async fn flush(&self) -> FlushOutcome {
        let Some((ticket, batch)) = self.pending.take() else {
            return FlushOutcome::Empty;
        };
        let count = batch.len();
        let mut in_flight = InFlight {
            batch: &self.pending,
            ticket,
            delivered: false,
        };

        match self.sink.ingest(&batch).await {
            Ok(ack) => {
                in_flight.delivered = true;
                if !ack.ok {
                    tracing::warn!(
                        sink = self.sink.name(),
                        error = ack.error.as_deref().unwrap_or("unknown"),
                        "Trace sink accepted batch but reported a problem"
                    );
                }
                tracing::debug!(sink = self.sink.name(), count, "Flushed traces");
                FlushOutcome::Sent(count)
            }
            Err(e) => {
                tracing::warn!(sink = self.sink.name(), count, error = %e, "Trace ingest failed, keeping batch");
                FlushOutcome::Retained(count)
            }
        }
    }

    /// Flush on a background task; the caller does not wait on the sink.
    pub fn spawn_flush(&self) -> tokio::task::JoinHandle<FlushOutcome> {
        let recorder = self.clone();
        tokio::spawn(async move { recorder.flush().await })
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_traces(&self) -> Vec<TraceRecord> {
        self.pending.snapshot()
    }

    pub fn pending_trace(&self, id: &str) -> Option<TraceRecord> {
        self.pending.snapshot().into_iter().find(|t| t.id == id)
    }
}

// ============================================================================
// TESTS
// ============================================================================
