// ====================================================================================
// src/config.rs - 配置管理
// ====================================================================================
use crate::{error::AppError, hub::HubSettings};
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub admin_api_key: String,
    pub max_connections: u32,
    pub allowed_origins: Vec<String>,

    // WebSocket 连接参数
    pub pong_wait_seconds: u64,
    pub max_message_bytes: usize,
    pub outbound_queue_capacity: usize,

    // 最后一个用户离开后是否保留房间内存状态
    pub retain_empty_rooms: bool,

    // Spotify 配置
    pub spotify_client_id: String,
    pub spotify_client_secret: String,
    pub spotify_api_url: String,
    pub spotify_accounts_url: String,
    pub spotify_search_limit: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        // 尝试加载 .env 文件，如果失败则忽略（可能文件不存在）
        if let Err(e) = dotenvy::dotenv() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }

        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:houseparty.db?mode=rwc".to_string()),
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            admin_api_key: std::env::var("ADMIN_API_KEY")
                .map_err(|_| AppError::Config("ADMIN_API_KEY must be set".to_string()))?,
            max_connections: parse_var("MAX_CONNECTIONS", 10_000)?,
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .map(|raw| parse_origins(&raw))
                .unwrap_or_default(),

            pong_wait_seconds: parse_var("PONG_WAIT_SECONDS", 60)?,
            max_message_bytes: parse_var("MAX_MESSAGE_BYTES", 4096)?,
            outbound_queue_capacity: parse_var("OUTBOUND_QUEUE_CAPACITY", 64)?,

            retain_empty_rooms: parse_var("RETAIN_EMPTY_ROOMS", false)?,

            spotify_client_id: std::env::var("SPOTIFY_CLIENT_ID").unwrap_or_default(),
            spotify_client_secret: std::env::var("SPOTIFY_CLIENT_SECRET").unwrap_or_default(),
            spotify_api_url: std::env::var("SPOTIFY_API_URL")
                .unwrap_or_else(|_| "https://api.spotify.com/v1".to_string()),
            spotify_accounts_url: std::env::var("SPOTIFY_ACCOUNTS_URL")
                .unwrap_or_else(|_| "https://accounts.spotify.com/api/token".to_string()),
            spotify_search_limit: parse_var("SPOTIFY_SEARCH_LIMIT", 5)?,
        }
        .validate()
    }

    // 零值会让 ping 定时器和发送队列在运行时 panic
    fn validate(self) -> Result<Self, AppError> {
        if self.pong_wait_seconds == 0 {
            return Err(AppError::Config("PONG_WAIT_SECONDS must be greater than 0".to_string()));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(AppError::Config("OUTBOUND_QUEUE_CAPACITY must be greater than 0".to_string()));
        }
        Ok(self)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_seconds)
    }

    // ping 间隔为读超时的 9/10，保证 pong 能在超时前到达
    pub fn ping_interval(&self) -> Duration {
        self.pong_wait() * 9 / 10
    }

    pub fn hub_settings(&self) -> HubSettings {
        HubSettings {
            outbound_queue_capacity: self.outbound_queue_capacity,
            retain_empty_rooms: self.retain_empty_rooms,
        }
    }
}

fn parse_var<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{} must be a valid value, got {:?}", key, raw))),
        Err(_) => Ok(default),
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
impl Config {
    pub fn for_tests() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            bind_address: "127.0.0.1:0".to_string(),
            admin_api_key: "test-key".to_string(),
            max_connections: 100,
            allowed_origins: Vec::new(),
            pong_wait_seconds: 60,
            max_message_bytes: 4096,
            outbound_queue_capacity: 16,
            retain_empty_rooms: false,
            spotify_client_id: String::new(),
            spotify_client_secret: String::new(),
            spotify_api_url: "http://127.0.0.1:9".to_string(),
            spotify_accounts_url: "http://127.0.0.1:9/token".to_string(),
            spotify_search_limit: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_interval_is_nine_tenths_of_pong_wait() {
        let config = Config::for_tests();
        assert_eq!(config.ping_interval(), Duration::from_secs(54));
    }

    #[test]
    fn zero_pong_wait_is_rejected() {
        let mut config = Config::for_tests();
        config.pong_wait_seconds = 0;
        assert!(matches!(config.validate(), Err(AppError::Config(msg)) if msg.contains("PONG_WAIT_SECONDS")));
    }

    #[test]
    fn zero_queue_capacity_is_rejected() {
        let mut config = Config::for_tests();
        config.outbound_queue_capacity = 0;
        assert!(matches!(config.validate(), Err(AppError::Config(msg)) if msg.contains("OUTBOUND_QUEUE_CAPACITY")));
    }

    #[test]
    fn test_defaults_pass_validation() {
        assert!(Config::for_tests().validate().is_ok());
    }

    #[test]
    fn origins_are_trimmed_and_empty_entries_dropped() {
        let origins = parse_origins(" http://localhost:5173, ,https://party.example ");
        assert_eq!(origins, vec!["http://localhost:5173", "https://party.example"]);
    }
}
