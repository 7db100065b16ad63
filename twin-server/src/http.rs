//! Mirror Twin HTTP API
//!
//! Axum server exposing the journaling flows and the trace-ingestion sink.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to an
//! inner function returning `(StatusCode, serde_json::Value)`. Inner functions
//! take the date explicitly so day-boundary behaviour is testable.
//!
//! Endpoints:
//! - GET  /health            - liveness plus LLM/telemetry configuration
//! - GET  /version           - server version info
//! - POST /setup             - create the user profile
//! - POST /journal           - append a journal entry for today
//! - POST /chat              - mirror-twin chat reply
//! - POST /progress          - evaluate today's entries (once per day)
//! - GET  /motivation        - daily motivation + strategy (cached per day)
//! - GET  /insights          - evolution stage and streaks
//! - POST /feedback          - rate today's strategy suggestion
//! - GET  /api/opik/health   - sink liveness
//! - POST /api/opik/ingest   - sink: accept a batch of traces

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};
use twin_core::evolution::{streak_insights, twin_evolution};
use twin_core::llm::{GeminiClient, RetryConfig};
use twin_core::models::{ChatMessage, DailyMotivation, JournalEntry, MirrorTwinUser};
use twin_core::store::{self, SessionStore, MOTIVATION_KEY};
use twin_core::telemetry::{TelemetryRecorder, TraceRecord, HEALTH_PATH, INGEST_PATH};
use twin_core::{TwinConfig, TwinError};

use crate::session::{welcome_message, Session};
use crate::subsystems::chat::{chat_reply, ChatContext};
use crate::subsystems::evaluate::{apply_evaluation, evaluate_progress};
use crate::subsystems::feedback::{record_strategy_feedback, FeedbackRating};
use crate::subsystems::motivation::run_daily_agents;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub config: TwinConfig,
    /// `None` when no Gemini key is configured; LLM endpoints answer 503.
    pub llm: Option<GeminiClient>,
    pub store: Arc<dyn SessionStore>,
    pub telemetry: Arc<TelemetryRecorder>,
    /// Whether this server accepts traces on the ingest path.
    pub sink_enabled: bool,
    session_lock: Arc<Mutex<()>>,
    progress_lock: Arc<Mutex<()>>,
}

impl HttpState {
    pub fn new(
        config: TwinConfig,
        llm: Option<GeminiClient>,
        store: Arc<dyn SessionStore>,
        telemetry: Arc<TelemetryRecorder>,
        sink_enabled: bool,
    ) -> Self {
        Self {
            config,
            llm,
            store,
            telemetry,
            sink_enabled,
            session_lock: Arc::new(Mutex::new(())),
            progress_lock: Arc::new(Mutex::new(())),
        }
    }

    fn retry(&self) -> RetryConfig {
        RetryConfig::from(&self.config.llm)
    }
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/setup", post(setup_handler))
        .route("/journal", post(journal_handler))
        .route("/chat", post(chat_handler))
        .route("/progress", post(progress_handler))
        .route("/motivation", get(motivation_handler))
        .route("/insights", get(insights_handler))
        .route("/feedback", post(feedback_handler))
        .route(HEALTH_PATH, get(sink_health_handler))
        .route(INGEST_PATH, post(ingest_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<HttpState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);
    let telemetry = Arc::clone(&state.telemetry);

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Mirror Twin HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    // Traces that failed to send earlier get one more attempt.
    telemetry.flush().await;
    Ok(())
}

pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupRequest {
    pub user_name: Option<String>,
    pub resolution: Option<String>,
    #[serde(default)]
    pub struggles: String,
}

#[derive(Debug, Deserialize)]
pub struct JournalRequest {
    pub entry: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct MotivationQuery {
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub rating: FeedbackRating,
}

#[derive(Debug, Deserialize)]
pub struct IngestPayload {
    pub traces: Vec<TraceRecord>,
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

pub fn health_inner(state: &HttpState) -> (StatusCode, Value) {
    (
        StatusCode::OK,
        json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "llm_configured": state.llm.is_some(),
            "model": state.llm.as_ref().map(|c| c.model()),
            "telemetry_enabled": state.telemetry.is_enabled(),
            "pending_traces": state.telemetry.pending_len(),
        }),
    )
}

/// Inner version - returns version info (pure, no IO).
pub fn version_inner() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "mirror-twin/1",
    })
}

pub async fn setup_inner(state: &HttpState, req: SetupRequest) -> (StatusCode, Value) {
    let user_name = non_blank(req.user_name);
    let resolution = non_blank(req.resolution);
    let (Some(user_name), Some(resolution)) = (user_name, resolution) else {
        return error_body(StatusCode::BAD_REQUEST, "userName and resolution are required");
    };

    let user = MirrorTwinUser::new(user_name, resolution, req.struggles.trim());
    let history = vec![welcome_message(&user.user_name)];

    let _guard = state.session_lock.lock().await;
    let saved = async {
        store::save(state.store.as_ref(), store::USER_KEY, &user).await?;
        store::save(state.store.as_ref(), store::HISTORY_KEY, &history).await
    }
    .await;
    if let Err(e) = saved {
        return store_failure(e);
    }

    tracing::info!(user = %user.user_name, "User profile created");
    (StatusCode::OK, json!({ "user": user, "history": history }))
}

pub async fn journal_inner(
    state: &HttpState,
    req: JournalRequest,
    today: NaiveDate,
) -> (StatusCode, Value) {
    let Some(text) = non_blank(req.entry) else {
        return error_body(StatusCode::BAD_REQUEST, "entry field is required");
    };

    let _guard = state.session_lock.lock().await;
    let mut session = match Session::load(state.store.as_ref(), today).await {
        Ok(s) => s,
        Err(e) => return store_failure(e),
    };
    let Some(user) = session.user.as_ref() else {
        return no_user();
    };

    let entry = JournalEntry::new(today, text, user.progress_level);
    session.journal.push(entry.clone());
    session.daily.log_count += 1;

    let saved = async {
        session.save_journal(state.store.as_ref()).await?;
        session.save_daily(state.store.as_ref()).await
    }
    .await;
    if let Err(e) = saved {
        return store_failure(e);
    }

    (
        StatusCode::OK,
        json!({
            "entry": entry,
            "logCount": session.daily.log_count,
            "totalEntries": session.journal.len(),
        }),
    )
}

pub async fn chat_inner(
    state: &HttpState,
    req: ChatRequest,
    today: NaiveDate,
) -> (StatusCode, Value) {
    let Some(client) = state.llm.as_ref() else {
        return llm_unavailable();
    };
    let Some(message) = non_blank(req.message) else {
        return error_body(StatusCode::BAD_REQUEST, "message field is required");
    };

    let session = match Session::load(state.store.as_ref(), today).await {
        Ok(s) => s,
        Err(e) => return store_failure(e),
    };
    let Some(user) = session.user.as_ref() else {
        return no_user();
    };

    let ctx = ChatContext {
        user,
        journal: &session.journal,
        history: &session.history,
    };
    let reply = chat_reply(client, &state.telemetry, state.retry(), &ctx, &message).await;

    // Reload: other requests may have written history while the model ran.
    let _guard = state.session_lock.lock().await;
    let mut session = match Session::load(state.store.as_ref(), today).await {
        Ok(s) => s,
        Err(e) => return store_failure(e),
    };
    session.history.push(ChatMessage::user(message));
    session.history.push(ChatMessage::assistant(reply.clone()));
    if let Err(e) = session.save_history(state.store.as_ref()).await {
        return store_failure(e);
    }

    (
        StatusCode::OK,
        json!({
            "reply": reply,
            "historyLength": session.history.len(),
        }),
    )
}

pub async fn progress_inner(state: &HttpState, today: NaiveDate) -> (StatusCode, Value) {
    let Some(client) = state.llm.as_ref() else {
        return llm_unavailable();
    };

    let _progress = state.progress_lock.lock().await;

    let session = match Session::load(state.store.as_ref(), today).await {
        Ok(s) => s,
        Err(e) => return store_failure(e),
    };
    let Some(user) = session.user.as_ref() else {
        return no_user();
    };
    if session.daily.progress_logged {
        return error_body(StatusCode::CONFLICT, "progress already logged today");
    }
    let entries = session.todays_entries(today);
    if entries.is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "no journal entries today");
    }
    let text = entries
        .iter()
        .map(|e| e.entry.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let outcome =
        evaluate_progress(client, &state.telemetry, state.retry(), &text, &user.resolution).await;

    let _guard = state.session_lock.lock().await;
    let mut session = match Session::load(state.store.as_ref(), today).await {
        Ok(s) => s,
        Err(e) => return store_failure(e),
    };
    let Some(mut user) = session.user.take() else {
        return no_user();
    };
    let level = apply_evaluation(&mut user, &mut session.journal, today, &outcome);
    session.user = Some(user);
    session.daily.progress_logged = true;

    let saved = async {
        session.save_user(state.store.as_ref()).await?;
        session.save_journal(state.store.as_ref()).await?;
        session.save_daily(state.store.as_ref()).await
    }
    .await;
    if let Err(e) = saved {
        return store_failure(e);
    }

    tracing::info!(delta = outcome.delta, level, "Progress logged");

    (
        StatusCode::OK,
        json!({
            "progressDelta": outcome.delta,
            "reason": outcome.reason,
            "progressLevel": level,
            "evolution": twin_evolution(level),
        }),
    )
}

pub async fn motivation_inner(
    state: &HttpState,
    today: NaiveDate,
    query: MotivationQuery,
) -> (StatusCode, Value) {
    if !query.refresh {
        match store::load::<DailyMotivation>(state.store.as_ref(), MOTIVATION_KEY).await {
            Ok(Some(cached)) if cached.date == today => {
                return (StatusCode::OK, json!({ "motivation": cached, "cached": true }));
            }
            Ok(_) => {}
            Err(e) => return store_failure(e),
        }
    }

    let Some(client) = state.llm.as_ref() else {
        return llm_unavailable();
    };
    let session = match Session::load(state.store.as_ref(), today).await {
        Ok(s) => s,
        Err(e) => return store_failure(e),
    };
    let Some(user) = session.user.as_ref() else {
        return no_user();
    };

    let motivation = run_daily_agents(
        client,
        &state.telemetry,
        state.retry(),
        user,
        &session.journal,
        today,
    )
    .await;

    if let Err(e) = store::save(state.store.as_ref(), MOTIVATION_KEY, &motivation).await {
        tracing::warn!(error = %e, "Could not cache daily motivation");
    }

    (StatusCode::OK, json!({ "motivation": motivation, "cached": false }))
}

pub async fn insights_inner(state: &HttpState, today: NaiveDate) -> (StatusCode, Value) {
    let session = match Session::load(state.store.as_ref(), today).await {
        Ok(s) => s,
        Err(e) => return store_failure(e),
    };
    let Some(user) = session.user.as_ref() else {
        return no_user();
    };

    let insights = streak_insights(&session.journal, today);
    (
        StatusCode::OK,
        json!({
            "userName": user.user_name,
            "resolution": user.resolution,
            "progressLevel": user.progress_level,
            "evolution": twin_evolution(user.progress_level),
            "currentStreak": insights.current_streak,
            "longestStreak": insights.longest_streak,
            "last7Days": insights.last_7_days,
            "consistency": insights.consistency,
            "series": insights.series,
            "totalEntries": session.journal.len(),
            "today": {
                "logCount": session.daily.log_count,
                "progressLogged": session.daily.progress_logged,
            },
        }),
    )
}

pub async fn feedback_inner(
    state: &HttpState,
    req: FeedbackRequest,
    today: NaiveDate,
) -> (StatusCode, Value) {
    let suggestion = match store::load::<DailyMotivation>(state.store.as_ref(), MOTIVATION_KEY).await
    {
        Ok(Some(m)) if m.date == today => m.strategy_suggestion,
        Ok(_) => None,
        Err(e) => return store_failure(e),
    };

    let recorded =
        record_strategy_feedback(&state.telemetry, req.rating, suggestion.as_deref());
    (
        StatusCode::OK,
        json!({ "rating": req.rating, "recorded": recorded }),
    )
}

/// Inner ingest - validates the batch and logs each trace.
pub fn ingest_inner(sink_enabled: bool, body: &str) -> (StatusCode, Value) {
    if !sink_enabled {
        return (
            StatusCode::OK,
            json!({ "ok": false, "error": "OPIK_API_KEY is missing" }),
        );
    }

    let payload: IngestPayload = match serde_json::from_str(body) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected trace batch");
            return (
                StatusCode::BAD_REQUEST,
                json!({ "ok": false, "error": "Invalid JSON" }),
            );
        }
    };

    for trace in &payload.traces {
        tracing::info!(
            trace_id = %trace.id,
            name = %trace.name,
            spans = trace.spans.len(),
            scores = trace.scores.len(),
            evals = trace.evals.len(),
            ended = trace.ended,
            "Trace received"
        );
    }

    (
        StatusCode::OK,
        json!({ "ok": true, "traces": payload.traces.len() }),
    )
}

// ============================================================================
// Axum handler wrappers (thin - delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state);
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn setup_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<SetupRequest>,
) -> impl IntoResponse {
    let (status, body) = setup_inner(&state, req).await;
    (status, Json(body))
}

pub async fn journal_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<JournalRequest>,
) -> impl IntoResponse {
    let (status, body) = journal_inner(&state, req, today()).await;
    (status, Json(body))
}

pub async fn chat_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<ChatRequest>,
) -> impl IntoResponse {
    let (status, body) = chat_inner(&state, req, today()).await;
    (status, Json(body))
}

pub async fn progress_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = progress_inner(&state, today()).await;
    (status, Json(body))
}

pub async fn motivation_handler(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<MotivationQuery>,
) -> impl IntoResponse {
    let (status, body) = motivation_inner(&state, today(), query).await;
    (status, Json(body))
}

pub async fn insights_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = insights_inner(&state, today()).await;
    (status, Json(body))
}

pub async fn feedback_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<FeedbackRequest>,
) -> impl IntoResponse {
    let (status, body) = feedback_inner(&state, req, today()).await;
    (status, Json(body))
}

pub async fn sink_health_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn ingest_handler(State(state): State<Arc<HttpState>>, body: String) -> impl IntoResponse {
    let (status, body) = ingest_inner(state.sink_enabled, &body);
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn error_body(status: StatusCode, message: &str) -> (StatusCode, Value) {
    (status, json!({ "error": message, "status": "error" }))
}

fn no_user() -> (StatusCode, Value) {
    error_body(StatusCode::NOT_FOUND, "no user profile, run setup first")
}

fn llm_unavailable() -> (StatusCode, Value) {
    error_body(
        StatusCode::SERVICE_UNAVAILABLE,
        "LLM is not configured: set GEMINI_API_KEY",
    )
}

fn store_failure(e: impl Into<TwinError>) -> (StatusCode, Value) {
    let e = e.into();
    tracing::error!(error = %e, "Session store failure");
    error_body(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
}

// ============================================================================
// Unit Tests - call inner functions directly
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use twin_core::store::MemorySessionStore;
    use twin_core::telemetry::RunId;

    fn state() -> HttpState {
        HttpState::new(
            TwinConfig::default(),
            None,
            Arc::new(MemorySessionStore::new()),
            Arc::new(TelemetryRecorder::disabled(RunId::generate())),
            true,
        )
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, d).unwrap()
    }

    async fn setup(state: &HttpState) {
        let (status, _) = setup_inner(
            state,
            SetupRequest {
                user_name: Some("Ada".to_string()),
                resolution: Some("write every day".to_string()),
                struggles: "mornings".to_string(),
            },
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[test]
    fn test_version_inner_pure() {
        let v = version_inner();
        assert!(v["version"].is_string());
        assert_eq!(v["protocol"], "mirror-twin/1");
    }

    #[test]
    fn test_health_reports_configuration() {
        let (status, body) = health_inner(&state());
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["llm_configured"], false);
        assert_eq!(body["telemetry_enabled"], false);
    }

    #[tokio::test]
    async fn test_setup_requires_name_and_resolution() {
        let (status, _) = setup_inner(
            &state(),
            SetupRequest {
                user_name: Some("  ".to_string()),
                resolution: Some("x".to_string()),
                struggles: String::new(),
            },
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_setup_seeds_welcome_message() {
        let state = state();
        setup(&state).await;
        let session = Session::load(state.store.as_ref(), day(1)).await.unwrap();
        assert_eq!(session.user.unwrap().progress_level, 0);
        assert_eq!(session.history.len(), 1);
        assert!(session.history[0].content.starts_with("Hey Ada!"));
    }

    #[tokio::test]
    async fn test_journal_needs_user_and_text() {
        let state = state();
        let (status, _) = journal_inner(
            &state,
            JournalRequest {
                entry: Some("ran".to_string()),
            },
            day(1),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        setup(&state).await;
        let (status, _) = journal_inner(&state, JournalRequest { entry: None }, day(1)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_journal_counts_reset_per_day() {
        let state = state();
        setup(&state).await;
        for _ in 0..2 {
            journal_inner(
                &state,
                JournalRequest {
                    entry: Some("wrote".to_string()),
                },
                day(1),
            )
            .await;
        }
        let (_, body) = journal_inner(
            &state,
            JournalRequest {
                entry: Some("wrote again".to_string()),
            },
            day(2),
        )
        .await;
        assert_eq!(body["logCount"], 1);
        assert_eq!(body["totalEntries"], 3);
        assert_eq!(body["entry"]["progressBefore"], 0);
    }

    #[tokio::test]
    async fn test_llm_endpoints_unavailable_without_key() {
        let state = state();
        setup(&state).await;
        let (status, _) = chat_inner(
            &state,
            ChatRequest {
                message: Some("hi".to_string()),
            },
            day(1),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let (status, _) = progress_inner(&state, day(1)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_cached_motivation_served_without_llm() {
        let state = state();
        let cached = DailyMotivation {
            date: day(3),
            summary: "keep going".to_string(),
            strategy_suggestion: None,
        };
        store::save(state.store.as_ref(), MOTIVATION_KEY, &cached)
            .await
            .unwrap();

        let (status, body) = motivation_inner(&state, day(3), MotivationQuery::default()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cached"], true);
        assert_eq!(body["motivation"]["summary"], "keep going");

        let (status, _) = motivation_inner(&state, day(4), MotivationQuery::default()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_insights_shape() {
        let state = state();
        setup(&state).await;
        journal_inner(
            &state,
            JournalRequest {
                entry: Some("a".to_string()),
            },
            day(9),
        )
        .await;
        journal_inner(
            &state,
            JournalRequest {
                entry: Some("b".to_string()),
            },
            day(10),
        )
        .await;

        let (status, body) = insights_inner(&state, day(10)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["currentStreak"], 2);
        assert_eq!(body["last7Days"], 2);
        assert_eq!(body["consistency"], "Medium");
        assert_eq!(body["evolution"]["stage"], "Emerging");
        assert_eq!(body["series"], json!([0, 0, 0, 0, 0, 1, 1]));
    }

    #[test]
    fn test_ingest_without_key() {
        let (status, body) = ingest_inner(false, "{\"traces\": []}");
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"], "OPIK_API_KEY is missing");
    }

    #[test]
    fn test_ingest_rejects_bad_json() {
        let (status, body) = ingest_inner(true, "{not json");
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["ok"], false);
    }

    #[test]
    fn test_ingest_counts_traces() {
        let body = json!({
            "traces": [{
                "id": "t1",
                "name": "chat",
                "input": {},
                "output": {},
                "metadata": {"runId": "r"},
                "tags": ["chat"],
                "spans": [],
                "scores": [{"name": "x", "value": 1.0}],
                "evals": [],
                "ended": true
            }]
        });
        let (status, body) = ingest_inner(true, &body.to_string());
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true, "traces": 1}));
    }
}
