// ====================================================================================
// src/models.rs - 数据模型定义
// ====================================================================================
use crate::error::AppError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use uuid::Uuid;

// 事件类型
pub mod events {
    pub const JOINED_ROOM: &str = "joined-room";
    pub const ROOM_INFORMATION: &str = "room-information";
    pub const SEARCH_SONGS: &str = "search-songs";
    pub const ADD_SONG: &str = "add-song";
    pub const ADDED_SONG_PLAYLIST: &str = "added-song-playlist";
    pub const SET_AND_PLAY_SONG: &str = "set-and-play-song";
    pub const SKIP_REQUEST: &str = "skip-request";
    pub const SONG_SKIPPED: &str = "song-skipped";
    pub const FINAL_SONG_ENDED: &str = "final-song-ended";
    pub const USER_LEFT: &str = "user-left";
}

/// WebSocket 上收发的事件信封，payload 的结构由 `type` 决定。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new<T: Serialize>(event_type: &str, payload: &T) -> Result<Self, AppError> {
        Ok(Self {
            event_type: event_type.to_string(),
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, AppError> {
        Ok(T::deserialize(&self.payload)?)
    }
}

// 歌曲模型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub id: String,
    pub uri: String,
    pub name: String,
    pub artists: Vec<String>,
    pub album: String,
    pub image: Image,
    pub duration_ms: u64,
    pub explicit: bool,
    pub external_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

// 持久化的房间记录
#[derive(Debug, Clone, Serialize)]
pub struct RoomRecord {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub host_id: i64,
    pub public: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
}

// ---------------- 事件负载 ----------------

#[derive(Debug, Serialize, Deserialize)]
pub struct RoomInformationEvent {
    pub user_count: usize,
    pub playlist: Vec<Song>,
    pub current_song: Option<Song>,
    pub api_token: String,
    pub song_position_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct SearchSongsRequest {
    pub search: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResultsEvent {
    pub songs: Vec<Song>,
}

#[derive(Debug, Deserialize)]
pub struct AddSongRequest {
    pub from: String,
    pub song_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddedSongPlaylistEvent {
    pub from: String,
    pub song: Song,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetAndPlaySongEvent {
    pub api_token: String,
    pub song: Song,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SongSkippedEvent {
    pub song: Song,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserLeftEvent {
    pub user_id: i64,
    pub user_count: usize,
}

// ---------------- Spotify 原始响应 ----------------

#[derive(Debug, Clone, Deserialize)]
pub struct TrackObject {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub artists: Vec<ArtistObject>,
    pub album: AlbumObject,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub explicit: bool,
    #[serde(default)]
    pub external_urls: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtistObject {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlbumObject {
    pub name: String,
    #[serde(default)]
    pub images: Vec<ImageObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageObject {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    pub tracks: TrackPage,
}

#[derive(Debug, Deserialize)]
pub struct TrackPage {
    #[serde(default)]
    pub items: Vec<TrackObject>,
}

impl From<TrackObject> for Song {
    fn from(track: TrackObject) -> Self {
        // Spotify 按尺寸从大到小返回封面，优先取第三张（64px 缩略图）
        let image = track
            .album
            .images
            .get(2)
            .or_else(|| track.album.images.last())
            .map(|img| Image {
                url: img.url.clone(),
                width: img.width.unwrap_or_default(),
                height: img.height.unwrap_or_default(),
            })
            .unwrap_or_default();

        let external_url = track.external_urls.get("spotify").cloned().unwrap_or_default();

        Song {
            id: track.id,
            uri: track.uri,
            name: track.name,
            artists: track.artists.into_iter().map(|a| a.name).collect(),
            album: track.album.name,
            image,
            duration_ms: track.duration_ms,
            explicit: track.explicit,
            external_url,
        }
    }
}

// ---------------- 管理 API 模型 ----------------

#[derive(Debug, Serialize)]
pub struct RoomSummary {
    #[serde(flatten)]
    pub room: RoomRecord,
    pub user_count: usize,
    pub queue_length: usize,
    pub current_song: Option<Song>,
}

#[derive(Debug, Serialize)]
pub struct MemberCountResponse {
    pub room_id: Uuid,
    pub user_count: usize,
}
