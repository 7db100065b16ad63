pub mod config;
pub mod error;
pub mod evolution;
pub mod guard;
pub mod llm;
pub mod models;
pub mod privacy;
pub mod store;
pub mod telemetry;

pub use config::TwinConfig;
pub use error::TwinError;
pub use evolution::{streak_insights, twin_evolution, Consistency, EvolutionStage, StreakInsights};
pub use guard::{Guardrails, ResponseShape, Tone, SAFE_FALLBACK};
pub use llm::{
    GeminiClient, GeminiConfig, GenerationConfig, JsonRequest, LlmError, RetryConfig, TextRequest,
};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore, StoreError};
pub use telemetry::{
    EvalRequest, NewTrace, RunId, ScoreRecord, SpanRecord, TelemetryRecorder, TraceHandle,
    TraceRecord, TraceSink,
};
