use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use ecobites_shared::{ItemId, ItemKind, ThreadId, UserId, ValidationError};
use ecobites_store::{Database, ItemRecord, MessageView, Thread, ThreadSummary, UserRecord};

use crate::auth::{verify_service_token, AuthUser, TokenVerifier};
use crate::chat::{ChatService, NewThread};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::presence::PresenceRegistry;
use crate::router::DeliveryRouter;
use crate::suggestions::{
    CompletionBackend, DonationSuggestions, GeminiClient, SmartRecommendations, SuggestionService,
};
use crate::ws::ws_handler;

#[derive(Clone)]
pub struct AppState {
    pub chat: ChatService,
    pub presence: PresenceRegistry,
    pub router: DeliveryRouter,
    pub suggestions: Arc<SuggestionService>,
    pub tokens: Arc<TokenVerifier>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(db: Database, config: ServerConfig) -> Result<Self, ServerError> {
        let chat = ChatService::new(db);
        let presence = PresenceRegistry::new();
        let router = DeliveryRouter::new(chat.clone(), presence.clone());
        let tokens = Arc::new(TokenVerifier::new(config.auth_secret.as_bytes())?);

        let backend: Option<Arc<dyn CompletionBackend>> = match &config.gemini_api_key {
            Some(key) => match GeminiClient::new(key.clone(), config.gemini_model.clone()) {
                Ok(client) => Some(Arc::new(client)),
                Err(e) => {
                    warn!(error = %e, "Gemini client unavailable, suggestions use defaults");
                    None
                }
            },
            None => {
                info!("GEMINI_API_KEY not set, suggestions use defaults");
                None
            }
        };
        let suggestions = Arc::new(SuggestionService::new(backend, config.suggestion_timeout));

        Ok(Self {
            chat,
            presence,
            router,
            suggestions,
            tokens,
            config: Arc::new(config),
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let origin = match state.config.client_url.as_deref() {
        Some(url) => match HeaderValue::from_str(url) {
            Ok(value) => AllowOrigin::exact(value),
            Err(_) => {
                warn!(value = %url, "Invalid CLIENT_URL, allowing any origin");
                AllowOrigin::any()
            }
        },
        None => AllowOrigin::any(),
    };
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any);

    let api = Router::new()
        .route("/chat/initialize", post(initialize_chat))
        .route(
            "/chat/:thread_id/messages",
            post(send_message).get(list_messages),
        )
        .route("/chat/user/:user_id", get(list_user_threads))
        .route("/ai/suggestions", post(ai_suggestions))
        .route("/ai/recommendations", post(ai_recommendations))
        .route("/directory/users/:id", put(put_user))
        .route("/directory/items/:id", put(put_item));

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .nest("/api", api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    online_users: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeRequest {
    donor_id: Option<String>,
    requester_id: Option<String>,
    item_id: Option<String>,
    item_kind: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest {
    sender_id: Option<String>,
    content: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SuggestionsRequest {
    donation_type: Option<String>,
    user_stats: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecommendationsRequest {
    donation_history: Option<Value>,
    community_needs: Option<Value>,
}

#[derive(Deserialize)]
struct PutUserRequest {
    username: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutItemRequest {
    kind: Option<String>,
    donor_id: Option<String>,
    title: Option<String>,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        online_users: state.presence.online_count(),
    })
}

async fn initialize_chat(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Json(req): Json<InitializeRequest>,
) -> Result<(StatusCode, Json<Thread>), ServerError> {
    let new = NewThread::parse(
        req.donor_id.as_deref(),
        req.requester_id.as_deref(),
        req.item_id.as_deref(),
        req.item_kind.as_deref(),
    )?;
    if caller != new.donor_id && caller != new.requester_id {
        return Err(ServerError::Forbidden(
            "caller must be the donor or the requester".into(),
        ));
    }

    let (thread, created) = state.chat.get_or_create_thread(new).await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(thread)))
}

async fn send_message(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(thread_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<Thread>, ServerError> {
    let thread_id: ThreadId = thread_id.parse()?;
    let sender = UserId::require("senderId", req.sender_id.as_deref())?;
    if sender != caller {
        return Err(ServerError::Forbidden(
            "senderId must match the authenticated user".into(),
        ));
    }
    let content = req.content.ok_or(ValidationError::EmptyContent)?;

    let appended = state.router.send(thread_id, sender, content).await?;
    Ok(Json(appended.thread))
}

async fn list_messages(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(thread_id): Path<String>,
) -> Result<Json<Vec<MessageView>>, ServerError> {
    let thread_id: ThreadId = thread_id.parse()?;
    let participants = state.chat.participants(thread_id).await?;
    if !participants.contains(&caller) {
        return Err(ServerError::Forbidden(
            "only participants can read this thread".into(),
        ));
    }
    Ok(Json(state.chat.list_message_views(thread_id).await?))
}

async fn list_user_threads(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<ThreadSummary>>, ServerError> {
    let user = UserId::parse("userId", &user_id)?;
    if user != caller {
        return Err(ServerError::Forbidden(
            "threads can only be listed for yourself".into(),
        ));
    }
    Ok(Json(state.chat.list_threads_for_user(user).await?))
}

async fn ai_suggestions(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Json(req): Json<SuggestionsRequest>,
) -> Result<Json<DonationSuggestions>, ServerError> {
    let user_stats = req
        .user_stats
        .ok_or(ValidationError::MissingField("userStats"))?;
    let suggestions = state
        .suggestions
        .donation_suggestions(req.donation_type.as_deref(), &user_stats)
        .await;
    Ok(Json(suggestions))
}

async fn ai_recommendations(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Json(req): Json<RecommendationsRequest>,
) -> Result<Json<SmartRecommendations>, ServerError> {
    let history = req
        .donation_history
        .ok_or(ValidationError::MissingField("donationHistory"))?;
    let needs = req
        .community_needs
        .ok_or(ValidationError::MissingField("communityNeeds"))?;
    let recommendations = state
        .suggestions
        .smart_recommendations(&history, &needs)
        .await;
    Ok(Json(recommendations))
}

async fn put_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<PutUserRequest>,
) -> Result<Json<UserRecord>, ServerError> {
    verify_service_token(&headers, &state.config)?;
    let id = UserId::parse("id", &id)?;
    let username = required_text("username", req.username)?;

    let record = state.chat.upsert_user(id, username).await?;
    info!(user = %record.id, "directory user updated");
    Ok(Json(record))
}

async fn put_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<PutItemRequest>,
) -> Result<Json<ItemRecord>, ServerError> {
    verify_service_token(&headers, &state.config)?;
    let id = ItemId::parse("id", &id)?;
    let kind: ItemKind = required_text("kind", req.kind)?.parse()?;
    let donor = UserId::require("donorId", req.donor_id.as_deref())?;
    let title = required_text("title", req.title)?;

    let record = state.chat.upsert_item(id, kind, donor, title).await?;
    info!(item = %record.id, kind = %record.kind, "directory item updated");
    Ok(Json(record))
}

fn required_text(field: &'static str, value: Option<String>) -> Result<String, ValidationError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ValidationError::MissingField(field))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
