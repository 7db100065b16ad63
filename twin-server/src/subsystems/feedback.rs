use serde::{Deserialize, Serialize};
use serde_json::json;
use twin_core::privacy::summarize_for_telemetry;
use twin_core::telemetry::{log_trace_scores, NewTrace, ScoreRecord, TelemetryRecorder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackRating {
    Happy,
    Neutral,
    Sad,
}

impl FeedbackRating {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackRating::Happy => "happy",
            FeedbackRating::Neutral => "neutral",
            FeedbackRating::Sad => "sad",
        }
    }

    pub fn score(&self) -> f64 {
        match self {
            FeedbackRating::Happy => 1.0,
            FeedbackRating::Neutral => 0.5,
            FeedbackRating::Sad => 0.0,
        }
    }
}

/// Record a rating of today's strategy suggestion. Returns whether a trace was recorded;
/// delivery happens in the background.
pub fn record_strategy_feedback(
    telemetry: &TelemetryRecorder,
    rating: FeedbackRating,
    suggestion: Option<&str>,
) -> bool {
    let Some(trace) = telemetry.create_trace(
        NewTrace::new(
            "strategy_feedback",
            json!({
                "rating": rating.as_str(),
                "suggestion": suggestion.map(summarize_for_telemetry),
            }),
        )
        .with_tags(["feedback"]),
    ) else {
        return false;
    };

    log_trace_scores(
        Some(&trace),
        &[ScoreRecord::new("strategy_helpfulness", rating.score()).with_reason(rating.as_str())],
    );
    trace.end();
    telemetry.spawn_flush();
    true
}
