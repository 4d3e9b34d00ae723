use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::chat::ChatService;
use crate::citations::{
    CitationError, FilePathIndex, NavigationError, NavigationState, OrganizedSources,
    PageNavigator,
};
use crate::config::AppConfig;
use crate::db::Database;
use crate::ingest::{IngestResult, Ingestor};
use crate::models::{
    ChatAnswer, ChatRequest, Chunk, IngestRequest, IngestResponse, IngestStatus, NavigateRequest,
    RenderedPage, SessionRequest, SessionResponse, ViewerDocument, ViewerResponse,
};
use crate::render::render_page_png;

/// The sources of a session's last answer that carried citations, and where
/// the session is looking in them.
#[derive(Debug, Clone, Default)]
struct SourceView {
    sources: OrganizedSources,
    paths: Option<FilePathIndex>,
    state: Option<NavigationState>,
}

type Viewers = Arc<Mutex<HashMap<String, SourceView>>>;

#[derive(Clone)]
struct AppState {
    config: AppConfig,
    db: Database,
    chat: ChatService,
    ingestor: Ingestor,
    jobs: Arc<Mutex<HashMap<String, IngestStatus>>>,
    viewers: Viewers,
}

pub async fn run_server(
    config: AppConfig,
    db: Database,
    chat_service: ChatService,
    ingestor: Ingestor,
) -> Result<()> {
    tokio::fs::create_dir_all(&config.data_dir).await?;

    let addr: SocketAddr = config.bind_addr.parse()?;
    let state = AppState {
        config,
        db,
        chat: chat_service,
        ingestor,
        jobs: Arc::new(Mutex::new(HashMap::new())),
        viewers: Arc::new(Mutex::new(HashMap::new())),
    };

    let app = Router::new()
        .route("/api/session", post(create_session))
        .route("/api/ingest", post(start_ingest))
        .route("/api/ingest/:job_id", get(get_ingest_status))
        .route("/api/chat", post(chat_handler))
        .route("/api/chunks/:chunk_id", get(get_chunk))
        .route("/api/viewer/:session_id", get(open_viewer))
        .route("/api/viewer/:session_id/navigate", post(navigate))
        .route("/api/viewer/:session_id/page", get(render_current_page))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn start_ingest(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, ApiError> {
    let job_id = Uuid::new_v4().to_string();
    let now = Utc::now();

    let initial = IngestStatus {
        job_id: job_id.clone(),
        status: "started".to_string(),
        stage: "queued".to_string(),
        message: None,
        chunk_count: 0,
        document_count: 0,
        started_at: now,
        updated_at: now,
    };

    lock(&state.jobs)?.insert(job_id.clone(), initial.clone());
    state.db.upsert_ingest_status(&initial).await?;

    let state_for_task = state.clone();
    let job_id_for_task = job_id.clone();
    tokio::spawn(async move {
        let jobs = state_for_task.jobs.clone();

        let callback = |status: IngestStatus| {
            if let Ok(mut guard) = jobs.lock() {
                guard.insert(status.job_id.clone(), status);
            }
        };

        let result: Result<IngestResult> = state_for_task
            .ingestor
            .ingest(&job_id_for_task, request, callback)
            .await;

        match result {
            Ok(done) => tracing::info!(
                "ingest job {} finished: skipped={} documents={} chunks={}",
                job_id_for_task,
                done.skipped,
                done.document_count,
                done.chunk_count
            ),
            Err(err) => {
                let failed_status = IngestStatus {
                    job_id: job_id_for_task.clone(),
                    status: "failed".to_string(),
                    stage: "error".to_string(),
                    message: Some(format!("{err:#}")),
                    chunk_count: 0,
                    document_count: 0,
                    started_at: now,
                    updated_at: Utc::now(),
                };

                if let Ok(mut guard) = state_for_task.jobs.lock() {
                    guard.insert(job_id_for_task.clone(), failed_status.clone());
                }
                if let Err(db_err) = state_for_task.db.upsert_ingest_status(&failed_status).await {
                    tracing::warn!("could not persist failed ingest status: {db_err:#}");
                }
                tracing::error!("ingest job {} failed: {err:#}", job_id_for_task);
            }
        }
    });

    Ok(Json(IngestResponse {
        job_id,
        status: "started".to_string(),
    }))
}

async fn get_ingest_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<IngestStatus>, ApiError> {
    if let Some(status) = lock(&state.jobs)?.get(&job_id).cloned() {
        return Ok(Json(status));
    }

    match state.db.get_ingest_status(&job_id).await? {
        Some(status) => Ok(Json(status)),
        None => Err(ApiError::not_found(format!("ingest job not found: {job_id}"))),
    }
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatAnswer>, ApiError> {
    let session_id = request.session_id.clone();
    let answer = state.chat.answer(request).await?;

    if answer.sources_attached {
        lock(&state.viewers)?.insert(
            session_id,
            SourceView {
                sources: answer.documents.clone(),
                ..SourceView::default()
            },
        );
    }

    Ok(Json(answer))
}

async fn get_chunk(
    State(state): State<AppState>,
    Path(chunk_id): Path<String>,
) -> Result<Json<Chunk>, ApiError> {
    match state.db.get_chunk(&chunk_id).await? {
        Some(chunk) => Ok(Json(chunk)),
        None => Err(ApiError::not_found(format!("chunk not found: {chunk_id}"))),
    }
}

async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<SessionRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    if request.reset.unwrap_or(false) {
        if let Some(session_id) = request.session_id {
            state.db.ensure_session(&session_id).await?;
            state.db.delete_session_messages(&session_id).await?;
            lock(&state.viewers)?.remove(&session_id);
            return Ok(Json(SessionResponse { session_id }));
        }
    }

    let session_id = state.db.create_session().await?;
    Ok(Json(SessionResponse { session_id }))
}

/// Resolves the cited documents against the course folder and restarts
/// browsing at the first cited page of the first document.
async fn open_viewer(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ViewerResponse>, ApiError> {
    let sources = current_view(&state.viewers, &session_id)?.sources;

    let folder = state.config.pdf_dir.clone();
    let lookup = sources.clone();
    let paths = tokio::task::spawn_blocking(move || lookup.resolve_paths(&folder))
        .await
        .map_err(|err| ApiError::from(anyhow::anyhow!("path resolution task panicked: {err}")))??;

    let start = PageNavigator::new(&sources).start()?;
    let view = SourceView {
        sources,
        paths: Some(paths),
        state: Some(start),
    };
    let response = viewer_response(&view)?;
    lock(&state.viewers)?.insert(session_id, view);

    Ok(Json(response))
}

async fn navigate(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(action): Json<NavigateRequest>,
) -> Result<Json<ViewerResponse>, ApiError> {
    let mut viewers = lock(&state.viewers)?;
    let view = viewers
        .get_mut(&session_id)
        .ok_or_else(|| no_sources(&session_id))?;

    let next = apply_navigation(&view.sources, view.state.clone(), action)?;
    view.state = Some(next);

    Ok(Json(viewer_response(view)?))
}

async fn render_current_page(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<RenderedPage>, ApiError> {
    let view = current_view(&state.viewers, &session_id)?;
    let Some(NavigationState { document, page }) = view.state else {
        return Err(ApiError::not_found(format!(
            "viewer not opened for session {session_id}"
        )));
    };
    let page = page.ok_or_else(|| NavigationError::NoPagesAvailable(document.clone()))?;

    let path = view
        .paths
        .as_ref()
        .and_then(|paths| paths.get(&document))
        .ok_or_else(|| {
            ApiError::not_found(format!("{document} is not in the course folder"))
        })?
        .to_path_buf();

    let png = render_page_png(&path, page).await?;
    Ok(Json(RenderedPage {
        document,
        page,
        png_base64: BASE64.encode(png),
    }))
}

fn apply_navigation(
    sources: &OrganizedSources,
    state: Option<NavigationState>,
    action: NavigateRequest,
) -> Result<NavigationState, NavigationError> {
    let navigator = PageNavigator::new(sources);
    let state = match state {
        Some(state) => state,
        None => navigator.start()?,
    };

    match action {
        NavigateRequest::SelectDocument { document } => {
            Ok(navigator.select_document(state, &document))
        }
        NavigateRequest::Next => navigator.next_page(state),
        NavigateRequest::Previous => navigator.previous_page(state),
        NavigateRequest::Jump { page } => navigator.jump_to_page(state, page),
    }
}

fn viewer_response(view: &SourceView) -> Result<ViewerResponse, NavigationError> {
    let navigator = PageNavigator::new(&view.sources);
    let state = match &view.state {
        Some(state) => state.clone(),
        None => navigator.start()?,
    };
    let bounds = navigator.bounds(&state.document);

    let documents = view
        .sources
        .iter()
        .map(|doc| ViewerDocument {
            document: doc.document().to_string(),
            ranges: doc.ranges().iter().map(ToString::to_string).collect(),
            available: view
                .paths
                .as_ref()
                .is_some_and(|paths| paths.get(doc.document()).is_some()),
        })
        .collect();

    Ok(ViewerResponse {
        documents,
        state,
        min_page: bounds.map(|(min, _)| min),
        max_page: bounds.map(|(_, max)| max),
    })
}

fn current_view(viewers: &Viewers, session_id: &str) -> Result<SourceView, ApiError> {
    lock(viewers)?
        .get(session_id)
        .cloned()
        .ok_or_else(|| no_sources(session_id))
}

fn no_sources(session_id: &str) -> ApiError {
    ApiError::not_found(format!("no cited sources for session {session_id}"))
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, ApiError> {
    mutex
        .lock()
        .map_err(|_| ApiError::from(anyhow::anyhow!("lock poisoned")))
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: String) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message,
        }
    }
}

impl From<CitationError> for ApiError {
    fn from(value: CitationError) -> Self {
        Self {
            status: citation_status(&value),
            message: value.to_string(),
        }
    }
}

impl From<NavigationError> for ApiError {
    fn from(value: NavigationError) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: value.to_string(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        // Typed citation errors keep their status even when wrapped in context.
        let status = value
            .chain()
            .find_map(|e| e.downcast_ref::<CitationError>())
            .map_or(StatusCode::INTERNAL_SERVER_ERROR, citation_status);

        Self {
            status,
            message: format!("{value:#}"),
        }
    }
}

fn citation_status(err: &CitationError) -> StatusCode {
    match err {
        CitationError::Similarity(_) => StatusCode::SERVICE_UNAVAILABLE,
        CitationError::EmptyPageSet | CitationError::Filesystem { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}
