pub mod chat;
pub mod evaluate;
pub mod feedback;
pub mod motivation;

use serde_json::json;
use twin_core::privacy::summarize_for_telemetry;
use twin_core::telemetry::{EvalRequest, SpanRecord, TelemetryRecorder, TraceHandle};

/// What a call site hands back to telemetry once the model call returns.
pub struct CallRecord<'a> {
    pub span_name: &'a str,
    pub model: &'a str,
    pub prompt: &'a str,
    pub response: &'a str,
    pub latency_ms: u64,
    pub eval_prefix: &'a str,
    pub eval_input: &'a str,
}

/// Span, trace output, evaluation request, end, then a background flush.
/// Never fails or delays the caller.
pub fn record_call(
    telemetry: &TelemetryRecorder,
    trace: Option<&TraceHandle>,
    call: CallRecord<'_>,
) {
    let Some(trace) = trace else {
        return;
    };

    let response = summarize_for_telemetry(call.response);

    trace
        .span(
            SpanRecord::llm(call.span_name)
                .with_input(json!({ "prompt": summarize_for_telemetry(call.prompt) }))
                .with_output(json!({ "text": response }))
                .with_metadata(json!({
                    "model": call.model,
                    "latency_ms": call.latency_ms,
                })),
        )
        .end();
    trace.update(json!({ "response": response }));

    telemetry.queue_evaluation(
        Some(trace),
        EvalRequest::new(call.eval_prefix, call.eval_input, call.response),
    );
    trace.end();

    telemetry.spawn_flush();
}
