// ====================================================================================
// src/main.rs - 应用入口
// ====================================================================================
use sqlx::sqlite::SqlitePoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod connection;
mod db;
mod error;
mod handler;
mod hub;
mod models;
mod room;
mod routes;
mod services;
mod spotify;
mod state;
#[cfg(test)]
mod testing;

use config::Config;
use db::SqliteRoomStore;
use hub::Hub;
use spotify::SpotifyClient;
use state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志记录
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "houseparty_server=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env()?;

    // 连接数据库并运行迁移
    tracing::info!("正在连接数据库: {}", config.database_url);
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    tracing::info!("数据库连接成功，正在运行迁移...");
    db::migrate(&pool).await?;
    tracing::info!("数据库迁移完成");

    // 房间中心：房间元数据来自数据库，播放令牌与曲库来自 Spotify
    let hub = Hub::new(
        Arc::new(SqliteRoomStore::new(pool.clone())),
        Arc::new(SpotifyClient::new(&config, pool.clone())),
        config.hub_settings(),
    );
    let app_state = Arc::new(AppState::new(pool, hub, config.clone()));

    let app = routes::router(app_state);

    // 启动服务器
    let addr: SocketAddr = config.bind_address.parse()?;
    tracing::debug!("服务器正在监听于 {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
