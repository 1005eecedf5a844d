// ====================================================================================
// src/spotify.rs - Spotify API 客户端
// ====================================================================================
use crate::{
    config::Config,
    db::{self, SpotifyToken},
    error::AppError,
    models::{SearchResponse, Song, TrackObject},
    services::MusicProvider,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: String,
}

pub struct SpotifyClient {
    client: Client,
    pool: SqlitePool,
    api_url: String,
    accounts_url: String,
    client_id: String,
    client_secret: String,
    search_limit: u32,
    // 按房主缓存的令牌；每个房主一把锁，刷新时不阻塞其他房主
    tokens: Mutex<HashMap<i64, Arc<Mutex<Option<SpotifyToken>>>>>,
}

impl SpotifyClient {
    pub fn new(config: &Config, pool: SqlitePool) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            pool,
            api_url: config.spotify_api_url.trim_end_matches('/').to_string(),
            accounts_url: config.spotify_accounts_url.clone(),
            client_id: config.spotify_client_id.clone(),
            client_secret: config.spotify_client_secret.clone(),
            search_limit: config.spotify_search_limit,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    // 使用 refresh_token 换取新的访问令牌并持久化
    async fn refresh(&self, stale: &SpotifyToken) -> Result<SpotifyToken, AppError> {
        if self.client_id.is_empty() || self.client_secret.is_empty() {
            return Err(AppError::Provider("missing spotify client id or client secret".to_string()));
        }

        let response = self
            .client
            .post(&self.accounts_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "refresh_token"), ("refresh_token", stale.refresh_token.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Provider(format!("spotify token refresh failed ({}): {}", status, body)));
        }

        let fresh: TokenResponse = response.json().await?;
        let token = SpotifyToken {
            host_id: stale.host_id,
            access_token: fresh.access_token,
            token_type: fresh.token_type,
            expires_in: fresh.expires_in,
            // Spotify 刷新时可能不返回新的 refresh_token
            refresh_token: fresh.refresh_token.unwrap_or_else(|| stale.refresh_token.clone()),
            scope: fresh.scope,
            time_issued: chrono::Utc::now().timestamp(),
        };
        db::save_spotify_token(&self.pool, &token).await?;
        tracing::info!("Refreshed Spotify token for host {}", token.host_id);
        Ok(token)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        query: &[(&str, String)],
        host_id: i64,
    ) -> Result<T, AppError> {
        let token = self.playback_token(host_id).await?;
        let response = self.client.get(url).bearer_auth(token).query(query).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Provider(format!("spotify request failed ({}): {}", status, body)));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl MusicProvider for SpotifyClient {
    async fn playback_token(&self, host_id: i64) -> Result<String, AppError> {
        let slot = Arc::clone(self.tokens.lock().await.entry(host_id).or_default());
        let mut cached = slot.lock().await;

        let token = match cached.take() {
            Some(token) => token,
            None => db::load_spotify_token(&self.pool, host_id)
                .await?
                .ok_or_else(|| AppError::Provider(format!("host {} has not linked a Spotify account", host_id)))?,
        };

        let token = if token.is_expired(chrono::Utc::now().timestamp()) {
            match self.refresh(&token).await {
                Ok(fresh) => fresh,
                Err(e) => {
                    *cached = Some(token);
                    return Err(e);
                }
            }
        } else {
            token
        };

        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    async fn search_tracks(&self, query: &str, host_id: i64) -> Result<Vec<TrackObject>, AppError> {
        let url = format!("{}/search", self.api_url);
        let params = [
            ("q", query.trim().to_string()),
            ("type", "track".to_string()),
            ("limit", self.search_limit.to_string()),
        ];
        let response: SearchResponse = self.get_json(&url, &params, host_id).await?;
        Ok(response.tracks.items)
    }

    async fn lookup_track(&self, track_id: &str, host_id: i64) -> Result<Song, AppError> {
        let url = format!("{}/tracks/{}", self.api_url, track_id);
        let track: TrackObject = self.get_json(&url, &[], host_id).await?;
        Ok(Song::from(track))
    }
}
