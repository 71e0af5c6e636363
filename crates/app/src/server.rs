use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use pdf_answer_core::{Answer, AnswerError, AnswerOrchestrator, ChunkPreview, IndexSource};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const DEFAULT_LISTING: usize = 10;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<AnswerOrchestrator>,
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    #[serde(default)]
    pub question: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListingParams {
    #[serde(default)]
    pub top: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SimParams {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub top: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct StatusBody {
    pub ready: bool,
    pub chunks: usize,
    pub embed_store: String,
    pub pdf_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded_from: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct InspectBody {
    pub chunks: Vec<ChunkPreview>,
}

#[derive(Debug, Serialize)]
pub struct SimBody {
    pub top: Vec<ChunkPreview>,
}

type ApiError = (StatusCode, Json<ErrorBody>);

pub fn router(state: AppState, frontend_origin: &str) -> anyhow::Result<Router> {
    let origin = frontend_origin
        .parse::<HeaderValue>()
        .with_context(|| format!("invalid frontend origin {frontend_origin}"))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION]);

    Ok(Router::new()
        .route("/ping", get(ping))
        .route("/ask", post(ask))
        .route("/admin/status", get(status))
        .route("/admin/inspect", get(inspect))
        .route("/admin/sim", get(sim))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

pub async fn serve(state: AppState, bind: &str, frontend_origin: &str) -> anyhow::Result<()> {
    let app = router(state, frontend_origin)?;
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address {bind}"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(%addr, "server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                warn!(%error, "failed to listen for shutdown signal");
            }
        })
        .await
        .context("server shutdown")?;
    Ok(())
}

pub async fn ping() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn ask(
    State(state): State<AppState>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<Answer>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("Invalid request body: {}", rejection.body_text()),
        )
    })?;
    let question = request.question.unwrap_or_default();
    if question.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "No question provided"));
    }

    match state.orchestrator.ask(&question).await {
        Ok(answer) => Ok(Json(answer)),
        Err(AnswerError::Validation(message)) => Err(api_error(StatusCode::BAD_REQUEST, message)),
        Err(AnswerError::NotReady) => Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "knowledge base is not ready yet",
        )),
        Err(AnswerError::Provider(provider_error)) => {
            error!(error = %provider_error, "failed to answer question");
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to get an answer: {provider_error}"),
            ))
        }
    }
}

pub async fn status(State(state): State<AppState>) -> Json<StatusBody> {
    let knowledge = state.orchestrator.knowledge();
    let options = knowledge.options();

    Json(StatusBody {
        ready: knowledge.is_ready(),
        chunks: knowledge.index().map_or(0, |index| index.len()),
        embed_store: options.store_path.display().to_string(),
        pdf_path: options.pdf_path.display().to_string(),
        loaded_from: knowledge.source().map(|source| match source {
            IndexSource::Store => "store",
            IndexSource::Rebuilt => "rebuilt",
        }),
    })
}

pub async fn inspect(
    State(state): State<AppState>,
    Query(params): Query<ListingParams>,
) -> Json<InspectBody> {
    let top = params.top.unwrap_or(DEFAULT_LISTING);
    Json(InspectBody {
        chunks: state.orchestrator.knowledge().preview(top),
    })
}

pub async fn sim(
    State(state): State<AppState>,
    Query(params): Query<SimParams>,
) -> Result<Json<SimBody>, ApiError> {
    let query = params.query.unwrap_or_default();
    if query.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "query param required"));
    }

    let top = params.top.unwrap_or(DEFAULT_LISTING);
    state
        .orchestrator
        .knowledge()
        .similarity(&query, top)
        .await
        .map(|top| Json(SimBody { top }))
        .map_err(|error| api_error(StatusCode::INTERNAL_SERVER_ERROR, error.to_string()))
}

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}
