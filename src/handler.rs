// ====================================================================================
// src/handler.rs - 事件处理器
// ====================================================================================
use crate::{
    error::AppError,
    hub::{ClientContext, EventHandler, Hub},
    models::{events, AddSongRequest, Event, SearchResultsEvent, SearchSongsRequest, Song},
    room::{Room, SkipVote},
};
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;

pub fn event_handlers() -> HashMap<&'static str, EventHandler> {
    let mut handlers: HashMap<&'static str, EventHandler> = HashMap::new();
    handlers.insert(events::JOINED_ROOM, join_room);
    handlers.insert(events::SEARCH_SONGS, search_songs);
    handlers.insert(events::ADD_SONG, add_song);
    handlers.insert(events::SKIP_REQUEST, skip_request);
    handlers.insert(events::USER_LEFT, user_left);
    handlers
}

async fn room_of(hub: &Hub, ctx: &ClientContext) -> Result<Arc<Room>, AppError> {
    hub.room(ctx.room_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Room {} not found", ctx.room_id)))
}

// 新用户进房：通知其他人，再把房间快照只发给新用户
fn join_room<'a>(hub: &'a Hub, event: Event, ctx: &'a ClientContext) -> BoxFuture<'a, Result<(), AppError>> {
    Box::pin(async move {
        let room = room_of(hub, ctx).await?;
        let mut state = room.lock().await;
        if !state.is_member(ctx.conn_id) {
            return Ok(());
        }

        state.broadcast(&event, Some(ctx.conn_id));

        let api_token = hub.provider().playback_token(room.host_id()).await?;
        let snapshot = Event::new(events::ROOM_INFORMATION, &state.snapshot(api_token))?;
        ctx.reply(snapshot)
    })
}

fn search_songs<'a>(hub: &'a Hub, event: Event, ctx: &'a ClientContext) -> BoxFuture<'a, Result<(), AppError>> {
    Box::pin(async move {
        let request: SearchSongsRequest = event.decode()?;
        let room = room_of(hub, ctx).await?;

        let tracks = hub.provider().search_tracks(&request.search, room.host_id()).await?;
        let songs: Vec<Song> = tracks.into_iter().map(Song::from).collect();
        tracing::debug!("房间 {} 搜索 {:?} 返回 {} 首", ctx.room_id, request.search, songs.len());

        ctx.reply(Event::new(events::SEARCH_SONGS, &SearchResultsEvent { songs })?)
    })
}

fn add_song<'a>(hub: &'a Hub, event: Event, ctx: &'a ClientContext) -> BoxFuture<'a, Result<(), AppError>> {
    Box::pin(async move {
        let request: AddSongRequest = event.decode()?;
        let room = room_of(hub, ctx).await?;

        // 查询歌曲不需要持有房间锁
        let song = hub.provider().lookup_track(&request.song_id, room.host_id()).await?;

        let mut state = room.lock().await;
        if !state.is_member(ctx.conn_id) {
            return Ok(());
        }
        room.add_song(&mut state, song, request.from).await
    })
}

fn skip_request<'a>(hub: &'a Hub, event: Event, ctx: &'a ClientContext) -> BoxFuture<'a, Result<(), AppError>> {
    Box::pin(async move {
        let room = room_of(hub, ctx).await?;
        let mut state = room.lock().await;
        // 已被移出房间的连接不能投票
        if !state.is_member(ctx.conn_id) {
            return Ok(());
        }
        match state.vote_skip(ctx.user_id, &event) {
            SkipVote::Fired => tracing::info!("房间 {} 投票通过，跳过当前歌曲", ctx.room_id),
            SkipVote::Counted { votes, members } => {
                tracing::debug!("房间 {} 跳过投票 {}/{}", ctx.room_id, votes, members)
            }
            SkipVote::NothingPlaying | SkipVote::Pending | SkipVote::Duplicate => {}
        }
        Ok(())
    })
}

// 客户端主动离开，立即移除；读循环随后因取消而退出
fn user_left<'a>(hub: &'a Hub, _event: Event, ctx: &'a ClientContext) -> BoxFuture<'a, Result<(), AppError>> {
    Box::pin(async move {
        hub.remove_client(ctx).await;
        Ok(())
    })
}
