//! Mirror-twin chat reply.

use serde_json::json;
use std::time::Instant;
use twin_core::guard::{is_unsafe_content, Guardrails, ResponseShape, SAFE_FALLBACK};
use twin_core::llm::{GeminiClient, GenerationConfig, RetryConfig, TextRequest};
use twin_core::models::{ChatMessage, JournalEntry, MirrorTwinUser, Role};
use twin_core::privacy::summarize_for_telemetry;
use twin_core::telemetry::{NewTrace, TelemetryRecorder};

use super::{record_call, CallRecord};

pub const CHAT_FALLBACK: &str = "Sorry, I didn't get a response from the LLM.";

const RECENT_JOURNAL: usize = 3;
const RECENT_MESSAGES: usize = 8;

pub struct ChatContext<'a> {
    pub user: &'a MirrorTwinUser,
    pub journal: &'a [JournalEntry],
    /// Conversation so far, not including the new message.
    pub history: &'a [ChatMessage],
}

pub fn build_chat_prompt(ctx: &ChatContext<'_>, message: &str) -> String {
    let recent_journal = ctx.journal[ctx.journal.len().saturating_sub(RECENT_JOURNAL)..]
        .iter()
        .map(|e| e.entry.as_str())
        .collect::<Vec<_>>()
        .join("; ");

    let conversation = ctx.history[ctx.history.len().saturating_sub(RECENT_MESSAGES)..]
        .iter()
        .map(|m| {
            let speaker = match m.role {
                Role::User => "Them",
                Role::Assistant => "You",
            };
            format!("{}: {}", speaker, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are {name}'s mirror twin, the future version of them who has already achieved:\n\
         \"{resolution}\"\n\n\
         Your personality:\n\
         - Casual, warm, and encouraging like a close friend\n\
         - Speak as if you've already achieved the goal\n\
         - Reference concrete wins related to their resolution\n\
         - Remember their struggles: {struggles}\n\
         - Be empathetic and optimistic\n\n\
         Current progress: {progress}%\n\
         Recent journal entries: {journal}\n\n\
         Conversation so far:\n{conversation}\n\n\
         They just said: \"{message}\"\n\n\
         Guidelines:\n\
         - Keep replies under 3 sentences\n\
         - Use \"we\" language\n\
         - Be encouraging, not preachy",
        name = ctx.user.user_name,
        resolution = ctx.user.resolution,
        struggles = ctx.user.struggles,
        progress = ctx.user.progress_level,
        journal = recent_journal,
        conversation = conversation,
        message = message,
    )
}

pub fn chat_request(prompt: String, retry: RetryConfig) -> TextRequest {
    TextRequest {
        prompt,
        generation_config: GenerationConfig {
            candidate_count: Some(1),
            max_output_tokens: Some(500),
            ..GenerationConfig::with_temperature(0.7)
        },
        guardrails: Some(Guardrails::supportive().with_shape(ResponseShape {
            max_sentences: Some(3),
            max_chars: Some(480),
            strip_emoji: true,
        })),
        response_shape: None,
        fallback_text: CHAT_FALLBACK.to_string(),
        retry,
    }
}

/// Reply to `message`. Unsafe input is refused without calling the model.
pub async fn chat_reply(
    client: &GeminiClient,
    telemetry: &TelemetryRecorder,
    retry: RetryConfig,
    ctx: &ChatContext<'_>,
    message: &str,
) -> String {
    if is_unsafe_content(message) {
        tracing::info!("Chat message refused by safety filter");
        return SAFE_FALLBACK.to_string();
    }

    let prompt = build_chat_prompt(ctx, message);

    let trace = telemetry.create_trace(
        NewTrace::new(
            "mirror_twin_chat",
            json!({
                "message": summarize_for_telemetry(message),
                "progress_level": ctx.user.progress_level,
                "history_len": ctx.history.len(),
            }),
        )
        .with_metadata(json!({ "model": client.model() }))
        .with_tags(["chat"]),
    );

    let started = Instant::now();
    let reply = client.request_text(&chat_request(prompt.clone(), retry)).await;
    let latency_ms = started.elapsed().as_millis() as u64;

    record_call(
        telemetry,
        trace.as_ref(),
        CallRecord {
            span_name: "gemini_chat",
            model: client.model(),
            prompt: &prompt,
            response: &reply,
            latency_ms,
            eval_prefix: "chat",
            eval_input: message,
        },
    );

    reply
}
