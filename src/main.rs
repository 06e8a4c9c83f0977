mod auth;
mod comic;
mod commands;
mod config;
mod error;
mod image_processing;
mod palette;
mod prefetch;
mod protocol;
mod quotes;
mod schedule;
mod settings;
mod store;
mod sync;
mod text;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use clap::Parser;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::{OpenApi, ToSchema};
use utoipa_scalar::{Scalar, Servable};

use crate::auth::AllowList;
use crate::comic::{ComicSource, XkcdClient};
use crate::commands::{Commands, Status};
use crate::config::Config;
use crate::error::AppError;
use crate::prefetch::ComicPrefetch;
use crate::quotes::{QuoteCards, QuoteFile};
use crate::settings::{Mode, SettingsStore};
use crate::store::RasterStore;
use crate::sync::SyncHandler;

/// Largest accepted photo upload
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Application state shared across HTTP handlers
#[derive(Clone)]
struct AppState {
    store: Arc<RasterStore>,
    commands: Arc<Commands>,
    allow_list: Arc<AllowList>,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Paper Frame API",
        description = "Image origin and command API for the e-paper frame",
        version = "0.1.0"
    ),
    tags(
        (name = "Frame", description = "Image served to the device"),
        (name = "Commands", description = "Mode, interval and content uploads")
    ),
    paths(health, get_image, get_status, put_mode, put_interval, post_photo, post_text),
    components(schemas(Mode, Status, ModeRequest, IntervalRequest))
)]
struct ApiDoc;

/// Mode switch request
#[derive(Debug, Deserialize, ToSchema)]
struct ModeRequest {
    mode: Mode,
}

/// Interval change request
#[derive(Debug, Deserialize, ToSchema)]
struct IntervalRequest {
    /// Daytime poll interval in minutes
    minutes: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::parse();
    std::fs::create_dir_all(&config.data_dir)?;

    let settings = Arc::new(SettingsStore::load(config.settings_path()));
    let store = Arc::new(RasterStore::new(&config.data_dir));

    let font = match text::load_font(&config.font_path) {
        Ok(font) => Some(font),
        Err(e) => {
            tracing::warn!("{}; quote cards and text messages are disabled", e);
            None
        }
    };

    let comics: Arc<dyn ComicSource> =
        Arc::new(XkcdClient::new(Client::new(), config.comic_base_url.clone()));
    let prefetch = ComicPrefetch::new(comics, store.clone());
    let quotes = Arc::new(QuoteCards::new(
        Arc::new(QuoteFile::new(&config.quotes_file)),
        font.clone(),
        store.clone(),
    ));

    let sync_handler = Arc::new(SyncHandler::new(
        settings.clone(),
        store.clone(),
        prefetch.clone(),
        quotes.clone(),
        config.night_window(),
        config.image_url(),
    ));

    let commands = Arc::new(Commands::new(
        settings.clone(),
        store.clone(),
        prefetch.clone(),
        quotes,
        font,
    ));

    // Resume comic mode with a comic already staged
    if settings.snapshot().await.mode == Mode::Comic {
        prefetch.refill();
    }

    let allow_list = Arc::new(AllowList::new(config.allowed_clients.iter().copied()));
    if allow_list.is_empty() {
        tracing::warn!("No allowed clients configured; the command API will reject every request");
    }

    let state = AppState {
        store,
        commands,
        allow_list,
    };

    // Image origin + command API
    let http_app = Router::new()
        .route("/health", get(health))
        .route("/image.png", get(get_image))
        .route("/api/status", get(get_status))
        .route("/api/mode", put(put_mode))
        .route("/api/interval", put(put_interval))
        .route("/api/photo", post(post_photo))
        .route("/api/text", post(post_text))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .route("/openapi.json", get(openapi_json))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Device sync socket, accepted on any path
    let ws_app = Router::new()
        .fallback(sync::ws_handler)
        .with_state(sync_handler);

    let http_addr = format!("0.0.0.0:{}", config.http_port);
    let ws_addr = format!("0.0.0.0:{}", config.ws_port);

    let http_listener = tokio::net::TcpListener::bind(&http_addr).await?;
    tracing::info!("HTTP server on {}, serving /image.png", http_addr);
    let ws_listener = tokio::net::TcpListener::bind(&ws_addr).await?;
    tracing::info!("WebSocket server on {}", ws_addr);

    tokio::try_join!(
        async { axum::serve(http_listener, http_app).await },
        async { axum::serve(ws_listener, ws_app).await },
    )?;

    Ok(())
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = String)
    )
)]
async fn health() -> &'static str {
    "ok"
}

/// Get OpenAPI JSON specification
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Get the current display image
///
/// Returns whatever raster is published at request time.
#[utoipa::path(
    get,
    path = "/image.png",
    tag = "Frame",
    responses(
        (status = 200, description = "Current raster", content_type = "image/png"),
        (status = 404, description = "No image has been produced yet")
    )
)]
async fn get_image(State(state): State<AppState>) -> Result<Response, AppError> {
    let png_data = state.store.read_live().await?;
    tracing::info!("Serving image.png ({} bytes)", png_data.len());

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        png_data,
    )
        .into_response())
}

/// Get frame status
#[utoipa::path(
    get,
    path = "/api/status",
    tag = "Commands",
    params(("x-client-id" = i64, Header, description = "Allowed client id")),
    responses(
        (status = 200, description = "Current status", body = Status),
        (status = 401, description = "Client not allowed")
    )
)]
async fn get_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Status>, AppError> {
    state.allow_list.authorize(&headers)?;
    Ok(Json(state.commands.status().await))
}

/// Switch the content mode
///
/// Quote and comic modes produce their first image immediately.
#[utoipa::path(
    put,
    path = "/api/mode",
    tag = "Commands",
    params(("x-client-id" = i64, Header, description = "Allowed client id")),
    request_body = ModeRequest,
    responses(
        (status = 200, description = "Mode switched", body = Status),
        (status = 401, description = "Client not allowed"),
        (status = 502, description = "Content source unavailable")
    )
)]
async fn put_mode(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ModeRequest>,
) -> Result<Json<Status>, AppError> {
    state.allow_list.authorize(&headers)?;
    state.commands.set_mode(request.mode).await?;
    Ok(Json(state.commands.status().await))
}

/// Set the daytime poll interval
#[utoipa::path(
    put,
    path = "/api/interval",
    tag = "Commands",
    params(("x-client-id" = i64, Header, description = "Allowed client id")),
    request_body = IntervalRequest,
    responses(
        (status = 200, description = "Interval updated", body = Status),
        (status = 400, description = "Interval must be positive"),
        (status = 401, description = "Client not allowed")
    )
)]
async fn put_interval(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<IntervalRequest>,
) -> Result<Json<Status>, AppError> {
    state.allow_list.authorize(&headers)?;
    state.commands.set_daytime_interval(request.minutes).await?;
    Ok(Json(state.commands.status().await))
}

/// Upload a photo
///
/// The raw request body is any supported image format.
#[utoipa::path(
    post,
    path = "/api/photo",
    tag = "Commands",
    params(("x-client-id" = i64, Header, description = "Allowed client id")),
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    responses(
        (status = 200, description = "Photo processed"),
        (status = 400, description = "Empty body"),
        (status = 401, description = "Client not allowed"),
        (status = 500, description = "Image could not be processed")
    )
)]
async fn post_photo(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str, AppError> {
    state.allow_list.authorize(&headers)?;
    state.commands.submit_photo(body.to_vec()).await?;
    Ok("Photo processed -> image.png")
}

/// Render a text message
#[utoipa::path(
    post,
    path = "/api/text",
    tag = "Commands",
    params(("x-client-id" = i64, Header, description = "Allowed client id")),
    request_body(content = String, content_type = "text/plain"),
    responses(
        (status = 200, description = "Text rendered"),
        (status = 400, description = "Empty message"),
        (status = 401, description = "Client not allowed"),
        (status = 500, description = "Text could not be rendered")
    )
)]
async fn post_text(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<&'static str, AppError> {
    state.allow_list.authorize(&headers)?;
    state.commands.submit_text(body).await?;
    Ok("Text rendered -> image.png")
}
