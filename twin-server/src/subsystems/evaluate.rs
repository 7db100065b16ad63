//! Daily progress evaluation: score today's journal against the resolution.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Instant;
use twin_core::guard::{is_unsafe_content, SAFE_FALLBACK};
use twin_core::llm::{GeminiClient, GenerationConfig, JsonRequest, RetryConfig};
use twin_core::models::{JournalEntry, MirrorTwinUser};
use twin_core::privacy::summarize_for_telemetry;
use twin_core::telemetry::{log_trace_scores, NewTrace, ScoreRecord, TelemetryRecorder};

use super::{record_call, CallRecord};

/// Largest delta one day of journaling can earn.
pub const MAX_DELTA: u8 = 7;

pub const EVALUATION_FALLBACK_REASON: &str = "Could not evaluate progress right now.";

/// Model output. The delta is untrusted until clamped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvaluation {
    pub progress_delta: f64,
    pub reason: String,
}

impl ProgressEvaluation {
    pub fn fallback() -> Self {
        Self {
            progress_delta: 0.0,
            reason: EVALUATION_FALLBACK_REASON.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationOutcome {
    pub delta: u8,
    pub reason: String,
}

/// Round into `0..=MAX_DELTA`. Non-finite values count as zero.
pub fn clamp_delta(raw: f64) -> u8 {
    if !raw.is_finite() {
        return 0;
    }
    raw.round().clamp(0.0, f64::from(MAX_DELTA)) as u8
}

pub fn build_evaluation_prompt(entry: &str, resolution: &str) -> String {
    format!(
        "Act as a precise data evaluator.\n\
         Resolution: \"{}\"\n\
         User Entry: \"{}\"\n\n\
         Task: Assign a progressDelta (0-7) based on effort.\n\
         Scoring: 0=none, 1-2=small, 3-4=moderate, 5-6=strong, 7=exceptional.\n\n\
         Output must be a single JSON object. Do not include any conversational text or explanations.",
        resolution, entry
    )
}

pub fn evaluation_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "progressDelta": { "type": "number" },
            "reason": { "type": "string" }
        },
        "required": ["progressDelta", "reason"]
    })
}

pub async fn evaluate_progress(
    client: &GeminiClient,
    telemetry: &TelemetryRecorder,
    retry: RetryConfig,
    entry: &str,
    resolution: &str,
) -> EvaluationOutcome {
    if is_unsafe_content(entry) {
        tracing::info!("Journal text refused by safety filter, no progress awarded");
        return EvaluationOutcome {
            delta: 0,
            reason: SAFE_FALLBACK.to_string(),
        };
    }

    let prompt = build_evaluation_prompt(entry, resolution);

    let trace = telemetry.create_trace(
        NewTrace::new(
            "progress_evaluation",
            json!({
                "entry": summarize_for_telemetry(entry),
                "resolution": summarize_for_telemetry(resolution),
            }),
        )
        .with_metadata(json!({ "model": client.model() }))
        .with_tags(["progress", "evaluation"]),
    );

    let started = Instant::now();
    let evaluation: ProgressEvaluation = client
        .request_json(JsonRequest {
            prompt: prompt.clone(),
            generation_config: GenerationConfig::with_temperature(0.0),
            response_schema: Some(evaluation_schema()),
            guardrails: None,
            fallback: ProgressEvaluation::fallback(),
            retry,
        })
        .await;
    let latency_ms = started.elapsed().as_millis() as u64;

    let outcome = EvaluationOutcome {
        delta: clamp_delta(evaluation.progress_delta),
        reason: evaluation.reason,
    };

    log_trace_scores(
        trace.as_ref(),
        &[ScoreRecord::new("progress_delta", f64::from(outcome.delta))
            .with_reason(outcome.reason.clone())],
    );

    let response = json!({
        "progressDelta": evaluation.progress_delta,
        "reason": outcome.reason,
    })
    .to_string();

    record_call(
        telemetry,
        trace.as_ref(),
        CallRecord {
            span_name: "gemini_progress_evaluation",
            model: client.model(),
            prompt: &prompt,
            response: &response,
            latency_ms,
            eval_prefix: "progress",
            eval_input: entry,
        },
    );

    outcome
}

/// Raise the user's level and stamp every entry from `today`. Returns the new level.
pub fn apply_evaluation(
    user: &mut MirrorTwinUser,
    journal: &mut [JournalEntry],
    today: NaiveDate,
    outcome: &EvaluationOutcome,
) -> u8 {
    let level = user.apply_progress(outcome.delta);
    for entry in journal.iter_mut().filter(|e| e.date == today) {
        entry.progress_delta = Some(outcome.delta);
        entry.ai_reason = Some(outcome.reason.clone());
    }
    level
}
