// ====================================================================================
// src/services.rs - 外部协作者接口
// ====================================================================================
use crate::{
    error::AppError,
    models::{RoomRecord, Song, TrackObject, UserRecord},
};
use async_trait::async_trait;
use uuid::Uuid;

/// 音乐服务：令牌按房主隔离，搜索和查询都以房主身份发起。
#[async_trait]
pub trait MusicProvider: Send + Sync {
    /// 获取房主当前有效的播放令牌（必要时刷新）。
    async fn playback_token(&self, host_id: i64) -> Result<String, AppError>;

    /// 搜索歌曲，返回服务商的原始对象，由调用方转换为 `Song`。
    async fn search_tracks(&self, query: &str, host_id: i64) -> Result<Vec<TrackObject>, AppError>;

    async fn lookup_track(&self, track_id: &str, host_id: i64) -> Result<Song, AppError>;
}

// 房间和用户记录的存储
#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn load_room(&self, room_id: Uuid) -> Result<RoomRecord, AppError>;

    async fn load_user(&self, user_id: i64) -> Result<UserRecord, AppError>;
}
