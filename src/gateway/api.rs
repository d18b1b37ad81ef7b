use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use anyhow::{Context, Result};
use linkwall_core::FilterSettings;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::feed::{Feed, FeedView, FetchStatus, SettingsPatch};

#[derive(Debug, Clone)]
pub struct ApiServer {
    bind_address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollRequest {
    pub last_visible_index: usize,
}

#[derive(Debug, Deserialize)]
pub struct TermsRequest {
    #[serde(default)]
    pub terms: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ViewportRequest {
    pub width: u32,
}

#[derive(Debug, Serialize)]
pub struct ViewportResponse {
    pub columns: usize,
}

#[derive(Debug, Deserialize)]
pub struct UserRequest {
    pub platform: String,
    pub nick: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MuteRequest {
    pub platform: String,
    pub nick: String,
    #[serde(default = "default_mute_secs")]
    pub duration_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct LinkRequest {
    pub url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    pub message_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardRequest {
    pub card_id: String,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub time: i64,
}

fn default_mute_secs() -> u64 {
    600
}

impl ActionResponse {
    fn ok() -> Json<Self> {
        Json(Self {
            success: true,
            error: None,
        })
    }

    fn rejected(status: StatusCode, error: &str) -> (StatusCode, Json<Self>) {
        (
            status,
            Json(Self {
                success: false,
                error: Some(error.to_string()),
            }),
        )
    }
}

type ActionResult = Result<Json<ActionResponse>, (StatusCode, Json<ActionResponse>)>;

impl ApiServer {
    pub fn new(bind_address: String) -> Self {
        Self { bind_address }
    }

    pub async fn start(&self, feed: Arc<Feed>) -> Result<()> {
        let app = router(feed);

        let listener = TcpListener::bind(&self.bind_address)
            .await
            .with_context(|| format!("Failed to bind to {}", self.bind_address))?;

        info!("API server listening on {}", self.bind_address);

        axum::serve(listener, app).await.context("API server error")?;

        Ok(())
    }
}

pub fn router(feed: Arc<Feed>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/feed", get(handle_feed))
        .route("/feed/load-more", post(handle_load_more))
        .route("/feed/refresh", post(handle_refresh))
        .route("/feed/scroll", post(handle_scroll))
        .route("/feed/terms", put(handle_terms))
        .route("/feed/viewport", put(handle_viewport))
        .route("/actions/ban-user", post(handle_ban_user))
        .route("/actions/trust-user", post(handle_trust_user))
        .route("/actions/mute-user", post(handle_mute_user))
        .route("/actions/ban-link", post(handle_ban_link))
        .route("/actions/ban-message", post(handle_ban_message))
        .route("/actions/reload-card", post(handle_reload_card))
        .route("/settings", get(handle_settings))
        .route("/settings/toggles", put(handle_toggles))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(feed)
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        time: chrono::Utc::now().timestamp(),
    })
}

async fn handle_feed(State(feed): State<Arc<Feed>>) -> Json<FeedView> {
    Json(feed.view())
}

async fn handle_load_more(State(feed): State<Arc<Feed>>) -> Json<FetchStatus> {
    Json(feed.load_more().await)
}

async fn handle_refresh(State(feed): State<Arc<Feed>>) -> Json<FetchStatus> {
    Json(feed.refresh().await)
}

async fn handle_scroll(
    State(feed): State<Arc<Feed>>,
    Json(request): Json<ScrollRequest>,
) -> Json<FetchStatus> {
    Json(feed.on_scroll(request.last_visible_index).await)
}

async fn handle_terms(
    State(feed): State<Arc<Feed>>,
    Json(request): Json<TermsRequest>,
) -> Json<FetchStatus> {
    debug!("Terms request: {:?}", request);
    Json(feed.set_terms(&request.terms).await)
}

async fn handle_viewport(
    State(feed): State<Arc<Feed>>,
    Json(request): Json<ViewportRequest>,
) -> Json<ViewportResponse> {
    Json(ViewportResponse {
        columns: feed.set_viewport(request.width),
    })
}

fn validate_user(request: &UserRequest) -> Result<(), (StatusCode, Json<ActionResponse>)> {
    if request.platform.trim().is_empty() || request.nick.trim().is_empty() {
        return Err(ActionResponse::rejected(
            StatusCode::BAD_REQUEST,
            "platform and nick are required",
        ));
    }
    Ok(())
}

async fn handle_ban_user(
    State(feed): State<Arc<Feed>>,
    Json(request): Json<UserRequest>,
) -> ActionResult {
    validate_user(&request)?;
    feed.ban_user(&request.platform, &request.nick);
    Ok(ActionResponse::ok())
}

async fn handle_trust_user(
    State(feed): State<Arc<Feed>>,
    Json(request): Json<UserRequest>,
) -> ActionResult {
    validate_user(&request)?;
    feed.trust_user(&request.platform, &request.nick);
    Ok(ActionResponse::ok())
}

async fn handle_mute_user(
    State(feed): State<Arc<Feed>>,
    Json(request): Json<MuteRequest>,
) -> ActionResult {
    let user = UserRequest {
        platform: request.platform,
        nick: request.nick,
    };
    validate_user(&user)?;
    if request.duration_secs == 0 {
        return Err(ActionResponse::rejected(
            StatusCode::BAD_REQUEST,
            "durationSecs must be positive",
        ));
    }
    feed.mute_user(&user.platform, &user.nick, Duration::from_secs(request.duration_secs));
    Ok(ActionResponse::ok())
}

async fn handle_ban_link(
    State(feed): State<Arc<Feed>>,
    Json(request): Json<LinkRequest>,
) -> ActionResult {
    if request.url.trim().is_empty() {
        return Err(ActionResponse::rejected(StatusCode::BAD_REQUEST, "url is required"));
    }
    feed.ban_link(&request.url);
    Ok(ActionResponse::ok())
}

async fn handle_ban_message(
    State(feed): State<Arc<Feed>>,
    Json(request): Json<MessageRequest>,
) -> ActionResult {
    if request.message_id.is_empty() {
        return Err(ActionResponse::rejected(
            StatusCode::BAD_REQUEST,
            "messageId is required",
        ));
    }
    feed.ban_message(&request.message_id);
    Ok(ActionResponse::ok())
}

async fn handle_reload_card(
    State(feed): State<Arc<Feed>>,
    Json(request): Json<CardRequest>,
) -> ActionResult {
    if !feed.reload_card(&request.card_id) {
        return Err(ActionResponse::rejected(StatusCode::NOT_FOUND, "unknown card"));
    }
    Ok(ActionResponse::ok())
}

async fn handle_settings(State(feed): State<Arc<Feed>>) -> Json<FilterSettings> {
    Json(feed.settings())
}

async fn handle_toggles(
    State(feed): State<Arc<Feed>>,
    Json(patch): Json<SettingsPatch>,
) -> Json<ActionResponse> {
    debug!("Settings patch: {:?}", patch);
    feed.update_settings(patch);
    ActionResponse::ok()
}
