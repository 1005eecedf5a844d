// ====================================================================================
// src/routes.rs - HTTP路由处理
// ====================================================================================
use crate::{
    config::Config,
    connection::{self, ConnectionGuard},
    db,
    error::AppError,
    models::{MemberCountResponse, RoomSummary},
    state::AppState,
};
use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use http::{header, HeaderMap, HeaderValue};
use serde::Deserialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use uuid::Uuid;

pub fn router(state: Arc<AppState>) -> Router {
    // 定义CORS策略
    let allow_origin = if state.config.allowed_origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(
            state
                .config
                .allowed_origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok()),
        )
    };
    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/management/health", get(health_check))
        .route("/management/rooms", get(list_rooms))
        .route("/management/rooms/:room_id", delete(delete_room))
        .route("/management/rooms/:room_id/members", get(room_members))
        .route("/ws/rooms/:room_id", get(ws_handler))
        .with_state(state)
        .layer(cors)
}

// 健康检查
pub async fn health_check() -> impl IntoResponse {
    "OK"
}

// WebSocket处理器
#[derive(Deserialize)]
pub struct WsConnectQuery {
    user_id: i64,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<Uuid>,
    Query(query): Query<WsConnectQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    // 负载保护检查
    if state.total_connections.load(Ordering::Relaxed) >= state.config.max_connections {
        return Err(AppError::ServiceUnavailable("服务器连接数已达上限".to_string()));
    }
    check_origin(&headers, &state.config)?;

    // 升级前确认用户和房间都存在
    let user = state.hub.store().load_user(query.user_id).await?;
    state.hub.store().load_room(room_id).await?;

    let keepalive = state.keepalive();
    Ok(ws
        .max_message_size(state.config.max_message_bytes)
        .on_upgrade(move |socket| async move {
            let _guard = ConnectionGuard::new(state.total_connections.clone());
            let connection = match state.hub.register_client(user.id, room_id).await {
                Ok(connection) => connection,
                Err(e) => {
                    tracing::warn!("用户 {} 无法加入房间 {}: {}", user.id, room_id, e);
                    return;
                }
            };
            connection::handle_socket(socket, Arc::clone(&state.hub), connection, keepalive).await;
        }))
}

// 查询所有活跃房间
pub async fn list_rooms(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<RoomSummary>>, AppError> {
    check_auth(&headers, &state.config)?;
    Ok(Json(state.hub.room_summaries().await))
}

pub async fn room_members(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(room_id): Path<Uuid>,
) -> Result<Json<MemberCountResponse>, AppError> {
    check_auth(&headers, &state.config)?;
    let user_count = state.hub.count_members(room_id).await;
    Ok(Json(MemberCountResponse { room_id, user_count }))
}

// 删除房间：仍有连接时拒绝
pub async fn delete_room(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(room_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    check_auth(&headers, &state.config)?;

    state.hub.close_room(room_id).await?;
    if !db::delete_room(&state.db_pool, room_id).await? {
        return Err(AppError::NotFound(format!("Room {} not found", room_id)));
    }
    tracing::info!("房间 {} 已删除", room_id);
    Ok(StatusCode::NO_CONTENT)
}

// 认证辅助函数
fn check_auth(headers: &HeaderMap, config: &Config) -> Result<(), AppError> {
    match headers.get("X-Api-Key") {
        Some(key) if key.as_bytes() == config.admin_api_key.as_bytes() => Ok(()),
        _ => Err(AppError::Unauthorized),
    }
}

// 未配置白名单时接受任意来源；没有 Origin 头的非浏览器客户端直接放行
fn check_origin(headers: &HeaderMap, config: &Config) -> Result<(), AppError> {
    if config.allowed_origins.is_empty() {
        return Ok(());
    }
    let Some(origin) = headers.get(header::ORIGIN) else {
        return Ok(());
    };
    if config
        .allowed_origins
        .iter()
        .any(|allowed| allowed.as_bytes() == origin.as_bytes())
    {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!("Origin {:?} is not allowed", origin)))
    }
}
