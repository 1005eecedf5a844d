// ====================================================================================
// src/db.rs - 数据库交互
// ====================================================================================
use crate::error::AppError;
use crate::models::{RoomRecord, UserRecord};
use crate::services::RoomStore;
use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

#[derive(FromRow, Debug, Clone)]
pub struct SpotifyToken {
    pub host_id: i64,
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_token: String,
    pub scope: String,
    pub time_issued: i64,
}

impl SpotifyToken {
    pub fn is_expired(&self, now: i64) -> bool {
        self.time_issued + self.expires_in < now
    }
}

// 初始化数据库表
pub async fn migrate(pool: &SqlitePool) -> Result<(), AppError> {
    sqlx::query(
        "
        PRAGMA foreign_keys = ON;
        CREATE TABLE IF NOT EXISTS users (id INTEGER PRIMARY KEY AUTOINCREMENT, username TEXT NOT NULL UNIQUE, email TEXT NOT NULL UNIQUE, password TEXT NOT NULL);
        CREATE TABLE IF NOT EXISTS rooms (id TEXT PRIMARY KEY, name TEXT NOT NULL, description TEXT NULL, host_id INTEGER NOT NULL, public BOOLEAN NOT NULL DEFAULT true, created_at INTEGER NOT NULL, FOREIGN KEY (host_id) REFERENCES users(id));
        CREATE TABLE IF NOT EXISTS spotify_tokens (host_id INTEGER PRIMARY KEY, access_token TEXT NOT NULL, token_type TEXT NOT NULL, expires_in INTEGER NOT NULL, refresh_token TEXT NOT NULL, scope TEXT NOT NULL, time_issued INTEGER NOT NULL);

        CREATE INDEX IF NOT EXISTS idx_rooms_host_id ON rooms(host_id);
        ",
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_room(pool: &SqlitePool, room_id: Uuid) -> Result<Option<RoomRecord>, AppError> {
    let row = sqlx::query_as::<_, (String, Option<String>, i64, bool, i64)>(
        "SELECT name, description, host_id, public, created_at FROM rooms WHERE id = ?",
    )
    .bind(room_id.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(name, description, host_id, public, created_at)| RoomRecord {
        id: room_id,
        name,
        description,
        host_id,
        public,
        created_at,
    }))
}

pub async fn load_user(pool: &SqlitePool, user_id: i64) -> Result<Option<UserRecord>, AppError> {
    sqlx::query_as("SELECT id, username FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
}

pub async fn delete_room(pool: &SqlitePool, room_id: Uuid) -> Result<bool, AppError> {
    let result = sqlx::query("DELETE FROM rooms WHERE id = ?")
        .bind(room_id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn load_spotify_token(pool: &SqlitePool, host_id: i64) -> Result<Option<SpotifyToken>, AppError> {
    sqlx::query_as(
        "SELECT host_id, access_token, token_type, expires_in, refresh_token, scope, time_issued FROM spotify_tokens WHERE host_id = ?",
    )
    .bind(host_id)
    .fetch_optional(pool)
    .await
    .map_err(Into::into)
}

pub async fn save_spotify_token(pool: &SqlitePool, token: &SpotifyToken) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO spotify_tokens (host_id, access_token, token_type, expires_in, refresh_token, scope, time_issued)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(host_id) DO UPDATE SET
            access_token = excluded.access_token,
            token_type = excluded.token_type,
            expires_in = excluded.expires_in,
            refresh_token = excluded.refresh_token,
            scope = excluded.scope,
            time_issued = excluded.time_issued",
    )
    .bind(token.host_id)
    .bind(&token.access_token)
    .bind(&token.token_type)
    .bind(token.expires_in)
    .bind(&token.refresh_token)
    .bind(&token.scope)
    .bind(token.time_issued)
    .execute(pool)
    .await?;
    Ok(())
}

// 基于 SQLite 的房间存储
#[derive(Clone)]
pub struct SqliteRoomStore {
    pool: SqlitePool,
}

impl SqliteRoomStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoomStore for SqliteRoomStore {
    async fn load_room(&self, room_id: Uuid) -> Result<RoomRecord, AppError> {
        load_room(&self.pool, room_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Room {} not found", room_id)))
    }

    async fn load_user(&self, user_id: i64) -> Result<UserRecord, AppError> {
        load_user(&self.pool, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[tokio::test]
    async fn store_loads_room_with_host() {
        let pool = memory_pool().await;
        let host = insert_user(&pool, "host").await;
        let room_id = insert_room(&pool, host, "Friday night").await;

        let store = SqliteRoomStore::new(pool);
        let room = store.load_room(room_id).await.unwrap();
        assert_eq!(room.id, room_id);
        assert_eq!(room.host_id, host);
        assert_eq!(room.name, "Friday night");
        assert!(room.public);
    }

    #[tokio::test]
    async fn missing_room_is_not_found() {
        let store = SqliteRoomStore::new(memory_pool().await);
        let result = store.load_room(Uuid::new_v4()).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn spotify_token_upsert_replaces_previous_value() {
        let pool = memory_pool().await;
        let mut token = SpotifyToken {
            host_id: 7,
            access_token: "first".into(),
            token_type: "Bearer".into(),
            expires_in: 3600,
            refresh_token: "refresh".into(),
            scope: "streaming".into(),
            time_issued: 1_000,
        };
        save_spotify_token(&pool, &token).await.unwrap();
        token.access_token = "second".into();
        token.time_issued = 5_000;
        save_spotify_token(&pool, &token).await.unwrap();

        let stored = load_spotify_token(&pool, 7).await.unwrap().unwrap();
        assert_eq!(stored.access_token, "second");
        assert_eq!(stored.time_issued, 5_000);
        assert!(!stored.is_expired(8_000));
        assert!(stored.is_expired(8_601));
    }

    #[tokio::test]
    async fn delete_room_reports_whether_a_row_was_removed() {
        let pool = memory_pool().await;
        let host = insert_user(&pool, "host").await;
        let room_id = insert_room(&pool, host, "r").await;
        assert!(delete_room(&pool, room_id).await.unwrap());
        assert!(!delete_room(&pool, room_id).await.unwrap());
    }
}
