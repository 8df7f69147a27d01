//! Staffroom Ingest - turns free-form staffroom notes into reviewed records.

mod commit;
mod config;
mod error;
mod fingerprint;
mod gemini;
mod keywords;
mod normalizer;
mod notify;
mod parser;
mod payload;
mod pipeline;
mod response;
mod retry;
mod review;
mod review_store;
mod schema;
mod store;
mod tagging;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, patch, post, put},
    Router,
};
use chrono::{Local, NaiveDate};
use commit::{CommitGate, CommitReport};
use config::{AppConfig, ConfigStore, ModeInfo};
use error::ReviewError;
use gemini::{GeminiClient, GenerativeModel};
use notify::{Notice, NoticeBuffer};
use parser::ParseOutcome;
use pipeline::{source_hash, IngestionPipeline};
use retry::TokioSleeper;
use review::{ReviewSession, TaskEdit};
use review_store::ReviewStore;
use schema::{
    CorrectionRecord, ProposedCalendarEvent, ProposedStaffInsight, ProposedStrategyNote,
    ProposedWellbeingLog, RecordKind,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError};
use store::{DocumentStore, MemoryStore, SupabaseStore};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SAVE_FAILED: &str = "Could not save the reviewed items — please try again";

/// Open reviews older than this are dropped.
const REVIEW_TTL_HOURS: i64 = 24;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    reviews: ReviewStore,
    model: Arc<dyn GenerativeModel>,
    store: Arc<dyn DocumentStore>,
    configs: Arc<ConfigStore>,
    recent_fetch_limit: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "staffroom_ingest=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    let configs = ConfigStore::load_or_builtin(&config.prompt_config_dir)?;
    let modes: Vec<String> = configs.list().into_iter().map(|m| m.name).collect();
    info!("Loaded {} ingestion modes: {:?}", modes.len(), modes);

    let model = GeminiClient::new(&config.gemini_api_key)
        .with_model(&config.gemini_model)
        .with_base_url(&config.gemini_base_url)
        .with_retry(config.retry.clone(), Arc::new(TokioSleeper));
    info!("Gemini client initialized: {}", config.gemini_model);

    let store: Arc<dyn DocumentStore> = match &config.supabase {
        Some(supabase) => {
            info!("Using Supabase store at {}", supabase.url);
            Arc::new(SupabaseStore::new(&supabase.url, &supabase.service_role_key))
        }
        None => {
            warn!("SUPABASE_URL / SUPABASE_SERVICE_ROLE_KEY not set; records are kept in memory only");
            Arc::new(memory_store(&config)?)
        }
    };

    let state = AppState {
        reviews: ReviewStore::new(),
        model: Arc::new(model),
        store,
        configs: Arc::new(configs),
        recent_fetch_limit: config.recent_fetch_limit,
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/configs", get(list_configs))
        .route("/ingest", post(ingest))
        .route("/reviews/:id", get(get_review).delete(close_review))
        .route("/reviews/:id/tasks/:index", patch(edit_task))
        .route("/reviews/:id/events/:index", put(replace_event))
        .route("/reviews/:id/insights/:index", put(replace_insight))
        .route("/reviews/:id/notes/:index", put(replace_note))
        .route("/reviews/:id/wellbeing", put(replace_wellbeing))
        .route("/reviews/:id/ignore", post(set_ignored))
        .route("/reviews/:id/approve", post(approve_review))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Server listening on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn memory_store(config: &AppConfig) -> anyhow::Result<MemoryStore> {
    let store = MemoryStore::new();
    if let Some(path) = &config.staff_seed_file {
        let seed = config::load_staff_seed(path)?;
        for (account, members) in seed {
            info!("Seeded {} staff for account {}", members.len(), account);
            for member in members {
                store.add_staff(&account, member);
            }
        }
    }
    Ok(store)
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

// ============================================================================
// Handlers
// ============================================================================

type ApiError = (StatusCode, String);

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// List ingestion modes.
async fn list_configs(State(state): State<AppState>) -> Json<Vec<ModeInfo>> {
    Json(state.configs.list())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngestBody {
    text: String,
    mode: Option<String>,
    account_id: String,
    user_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestResponse {
    review: ReviewSession,
    used_fallback: bool,
    primary_parse: Option<ParseOutcome>,
    notices: Vec<Notice>,
}

/// Run the extraction pipeline and open a review session for the result.
async fn ingest(
    State(state): State<AppState>,
    Json(body): Json<IngestBody>,
) -> Result<Json<IngestResponse>, ApiError> {
    if body.account_id.trim().is_empty() || body.user_id.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "accountId and userId are required".to_string(),
        ));
    }

    let config = match body.mode.as_deref() {
        Some(name) => state.configs.get(name).ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                format!("Unknown mode: {}. Available: {:?}", name, state.configs.list()
                    .into_iter().map(|m| m.name).collect::<Vec<_>>()),
            )
        })?,
        None => state.configs.default_config().ok_or_else(|| {
            (StatusCode::INTERNAL_SERVER_ERROR, "No ingestion modes loaded".to_string())
        })?,
    };

    state
        .reviews
        .prune(chrono::Duration::hours(REVIEW_TTL_HOURS));

    info!(
        "Ingesting {} chars for account {} with mode {}",
        body.text.chars().count(),
        body.account_id,
        config.name
    );

    let notices = NoticeBuffer::new();
    let pipeline = IngestionPipeline::new(state.model.clone(), Arc::new(notices.clone()));
    let outcome = pipeline.ingest(&body.text, &config, today()).await;

    let mut session = ReviewSession::new(
        uuid::Uuid::new_v4().to_string(),
        body.account_id,
        body.user_id,
    );
    session
        .populate(outcome.batch, config.name, source_hash(&body.text))
        .map_err(review_error)?;
    let review = session.clone();
    state.reviews.insert(session);

    info!(
        "Opened review {} ({} open)",
        review.id,
        state.reviews.count()
    );
    Ok(Json(IngestResponse {
        review,
        used_fallback: outcome.used_fallback,
        primary_parse: outcome.primary_parse,
        notices: notices.take(),
    }))
}

/// Get a review session snapshot.
async fn get_review(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReviewSession>, ApiError> {
    with_session(&state, &id, |_| Ok(()))
}

async fn edit_task(
    State(state): State<AppState>,
    Path((id, index)): Path<(String, usize)>,
    Json(edit): Json<TaskEdit>,
) -> Result<Json<ReviewSession>, ApiError> {
    with_session(&state, &id, |s| s.edit_task(index, edit))
}

async fn replace_event(
    State(state): State<AppState>,
    Path((id, index)): Path<(String, usize)>,
    Json(event): Json<ProposedCalendarEvent>,
) -> Result<Json<ReviewSession>, ApiError> {
    with_session(&state, &id, |s| s.replace_event(index, event))
}

async fn replace_insight(
    State(state): State<AppState>,
    Path((id, index)): Path<(String, usize)>,
    Json(insight): Json<ProposedStaffInsight>,
) -> Result<Json<ReviewSession>, ApiError> {
    with_session(&state, &id, |s| s.replace_insight(index, insight))
}

async fn replace_note(
    State(state): State<AppState>,
    Path((id, index)): Path<(String, usize)>,
    Json(note): Json<ProposedStrategyNote>,
) -> Result<Json<ReviewSession>, ApiError> {
    with_session(&state, &id, |s| s.replace_note(index, note))
}

async fn replace_wellbeing(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(log): Json<ProposedWellbeingLog>,
) -> Result<Json<ReviewSession>, ApiError> {
    with_session(&state, &id, |s| s.replace_wellbeing(log))
}

#[derive(Deserialize)]
struct IgnoreBody {
    kind: RecordKind,
    #[serde(default)]
    index: usize,
    ignored: bool,
}

async fn set_ignored(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<IgnoreBody>,
) -> Result<Json<ReviewSession>, ApiError> {
    with_session(&state, &id, |s| s.set_ignored(body.kind, body.index, body.ignored))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApproveResponse {
    review: ReviewSession,
    report: CommitReport,
    corrections: Vec<CorrectionRecord>,
    notices: Vec<Notice>,
}

/// Approve a review and commit its net-new records.
async fn approve_review(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApproveResponse>, ApiError> {
    let shared = state.reviews.get(&id).ok_or_else(|| not_found(&id))?;

    let notices = NoticeBuffer::new();
    let gate = CommitGate::new(
        state.store.clone(),
        Arc::new(notices.clone()),
        state.recent_fetch_limit,
    );

    let approval = review::approve(&shared, &gate, today())
        .await
        .map_err(review_error)?;

    let review = shared.lock().unwrap_or_else(PoisonError::into_inner).clone();
    info!(
        "Review {} {}: {} records added",
        id,
        review.state().as_str(),
        approval.report.total_added()
    );
    Ok(Json(ApproveResponse {
        review,
        report: approval.report,
        corrections: approval.corrections,
        notices: notices.take(),
    }))
}

/// Close a review without committing anything.
async fn close_review(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    with_session(&state, &id, |s| s.close())?;
    state.reviews.remove(&id);
    info!("Review {} closed", id);
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Helper functions
// ============================================================================

/// Apply `f` under the session lock and return the resulting snapshot.
fn with_session(
    state: &AppState,
    id: &str,
    f: impl FnOnce(&mut ReviewSession) -> Result<(), ReviewError>,
) -> Result<Json<ReviewSession>, ApiError> {
    let shared = state.reviews.get(id).ok_or_else(|| not_found(id))?;
    let mut session = shared.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut session).map_err(review_error)?;
    Ok(Json(session.clone()))
}

fn not_found(id: &str) -> ApiError {
    (StatusCode::NOT_FOUND, format!("Unknown review: {}", id))
}

fn review_error(e: ReviewError) -> ApiError {
    match e {
        ReviewError::AlreadySaving | ReviewError::InvalidState { .. } => {
            (StatusCode::CONFLICT, e.to_string())
        }
        ReviewError::UnknownItem { .. } => (StatusCode::NOT_FOUND, e.to_string()),
        ReviewError::Commit(ref source) => {
            error!("Commit failed: {}", source);
            (StatusCode::BAD_GATEWAY, SAVE_FAILED.to_string())
        }
    }
}
