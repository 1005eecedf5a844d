// ====================================================================================
// src/state.rs - 共享应用状态
// ====================================================================================
use crate::{config::Config, connection::KeepAlive, hub::Hub};
use sqlx::SqlitePool;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

pub struct AppState {
    pub db_pool: SqlitePool,
    pub hub: Arc<Hub>,
    pub total_connections: Arc<AtomicU32>,
    pub config: Config,
}

impl AppState {
    pub fn new(db_pool: SqlitePool, hub: Hub, config: Config) -> Self {
        Self {
            db_pool,
            hub: Arc::new(hub),
            total_connections: Arc::new(AtomicU32::new(0)),
            config,
        }
    }

    pub fn keepalive(&self) -> KeepAlive {
        KeepAlive {
            pong_wait: self.config.pong_wait(),
            ping_interval: self.config.ping_interval(),
        }
    }
}
