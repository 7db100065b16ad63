//! Daily agents: observer, motivation summary and strategy suggestion.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Instant;
use twin_core::evolution::{twin_evolution, Consistency, EvolutionStage};
use twin_core::guard::{is_unsafe_content, SAFE_FALLBACK};
use twin_core::llm::{GeminiClient, GenerationConfig, JsonRequest, RetryConfig};
use twin_core::models::{DailyMotivation, JournalEntry, MirrorTwinUser};
use twin_core::privacy::{redact_sensitive_text, summarize_for_telemetry};
use twin_core::telemetry::{NewTrace, TelemetryRecorder};

use super::{record_call, CallRecord};

pub const MOTIVATION_FALLBACK: &str =
    "Show up for one small step today. That is how we get there.";

/// What the observer sees in the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub total_entries: usize,
    pub recent_count: usize,
    pub consistency: Consistency,
    pub evolution_stage: EvolutionStage,
}

/// Count entries from the past week and bucket them.
pub fn observe(user: &MirrorTwinUser, journal: &[JournalEntry], today: NaiveDate) -> Observation {
    let week_ago = today.checked_sub_days(Days::new(7)).unwrap_or(today);
    let recent_count = journal.iter().filter(|e| e.date >= week_ago).count();

    Observation {
        total_entries: journal.len(),
        recent_count,
        consistency: Consistency::from_days_logged(recent_count),
        evolution_stage: twin_evolution(user.progress_level).stage,
    }
}

pub fn suggest_strategy(observation: &Observation) -> &'static str {
    match observation.consistency {
        Consistency::High => "You're on a great streak. Today, keep it easy to win: just show up and do the smallest version of your habit.",
        Consistency::Medium => "You're making progress, but it's a bit uneven. Choose one tiny, non-negotiable action for today and commit to it.",
        Consistency::Low => "It's okay that things have been patchy. For today, aim for a 2-minute version of your habit so it's almost impossible to skip.",
    }
}

pub fn build_motivation_prompt(resolution: &str, stage: EvolutionStage) -> String {
    format!(
        "Write a short message to your past self.\n\
         Resolution: \"{}\"\n\
         Stage: \"{}\"\n\n\
         Guidelines:\n\
         - Use 2-3 sentences max.\n\
         - Speak in a natural, grounded, and slightly casual tone.\n\
         - Avoid \"AI-speak\" and buzzwords (e.g., avoid \"embrace,\" \"journey,\" \"tapestry,\" \"unfolding,\" \"testament\").\n\
         - Be specific about the friction they are feeling today.\n\
         - No emojis and no cliches.",
        resolution, stage
    )
}

pub fn motivation_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "summary": { "type": "string" }
        },
        "required": ["summary"]
    })
}

#[derive(Debug, Clone, Deserialize)]
struct MotivationPayload {
    summary: String,
}

pub async fn generate_daily_motivation(
    client: &GeminiClient,
    telemetry: &TelemetryRecorder,
    retry: RetryConfig,
    resolution: &str,
    stage: EvolutionStage,
) -> String {
    if is_unsafe_content(resolution) {
        tracing::info!("Resolution refused by safety filter");
        return SAFE_FALLBACK.to_string();
    }

    let prompt = build_motivation_prompt(resolution, stage);

    let trace = telemetry.create_trace(
        NewTrace::new(
            "daily_motivation",
            json!({
                "resolution": summarize_for_telemetry(resolution),
                "stage": stage.as_str(),
            }),
        )
        .with_metadata(json!({ "model": client.model() }))
        .with_tags(["motivation"]),
    );

    let started = Instant::now();
    let payload: Option<MotivationPayload> = client
        .request_json(JsonRequest {
            prompt: prompt.clone(),
            generation_config: GenerationConfig::with_temperature(0.7),
            response_schema: Some(motivation_schema()),
            guardrails: None,
            fallback: None,
            retry,
        })
        .await;
    let latency_ms = started.elapsed().as_millis() as u64;

    let summary = match payload.map(|p| p.summary.trim().to_string()) {
        Some(s) if s.is_empty() => MOTIVATION_FALLBACK.to_string(),
        Some(s) if is_unsafe_content(&s) => SAFE_FALLBACK.to_string(),
        Some(s) => redact_sensitive_text(&s),
        None => MOTIVATION_FALLBACK.to_string(),
    };

    record_call(
        telemetry,
        trace.as_ref(),
        CallRecord {
            span_name: "gemini_daily_motivation",
            model: client.model(),
            prompt: &prompt,
            response: &summary,
            latency_ms,
            eval_prefix: "motivation",
            eval_input: resolution,
        },
    );

    summary
}

/// Observer, motivation and strategy for `today`.
pub async fn run_daily_agents(
    client: &GeminiClient,
    telemetry: &TelemetryRecorder,
    retry: RetryConfig,
    user: &MirrorTwinUser,
    journal: &[JournalEntry],
    today: NaiveDate,
) -> DailyMotivation {
    let observation = observe(user, journal, today);
    tracing::debug!(
        recent = observation.recent_count,
        consistency = ?observation.consistency,
        stage = %observation.evolution_stage,
        "Observer ran"
    );

    let summary = generate_daily_motivation(
        client,
        telemetry,
        retry,
        &user.resolution,
        observation.evolution_stage,
    )
    .await;

    DailyMotivation {
        date: today,
        summary,
        strategy_suggestion: Some(suggest_strategy(&observation).to_string()),
    }
}
