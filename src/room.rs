// ====================================================================================
// src/room.rs - 房间状态与播放状态机
// ====================================================================================
use crate::{
    error::AppError,
    models::{
        events, AddedSongPlaylistEvent, Event, RoomInformationEvent, RoomRecord, RoomSummary,
        SetAndPlaySongEvent, Song, SongSkippedEvent, UserLeftEvent,
    },
    services::MusicProvider,
};
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, mpsc::error::TrySendError, oneshot, Mutex, MutexGuard};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// 房间内的一个连接
pub struct Member {
    user_id: i64,
    outbound: mpsc::Sender<Event>,
    cancel: CancellationToken,
}

impl Member {
    pub fn new(user_id: i64, outbound: mpsc::Sender<Event>, cancel: CancellationToken) -> Self {
        Self { user_id, outbound, cancel }
    }
}

// 正在播放的歌曲。定时器与当前歌曲同生共死：丢弃 Playback 即取消定时器
struct Playback {
    song: Song,
    started_at: Instant,
    generation: u64,
    skip_tx: Option<oneshot::Sender<()>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEnd {
    Finished,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipVote {
    NothingPlaying,
    /// 本首歌的跳过已触发，等待切歌
    Pending,
    Duplicate,
    Counted { votes: usize, members: usize },
    Fired,
}

#[derive(Default)]
pub struct RoomState {
    members: HashMap<Uuid, Member>,
    queue: VecDeque<Song>,
    playback: Option<Playback>,
    skip_ballot: HashSet<i64>,
    generation: u64,
    evicted: bool,
}

impl RoomState {
    pub fn add_member(&mut self, conn_id: Uuid, member: Member) {
        self.members.insert(conn_id, member);
    }

    pub fn is_member(&self, conn_id: Uuid) -> bool {
        self.members.contains_key(&conn_id)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted
    }

    pub fn is_playing(&self) -> bool {
        self.playback.is_some()
    }

    pub fn current_song(&self) -> Option<&Song> {
        self.playback.as_ref().map(|p| &p.song)
    }

    pub fn queue(&self) -> &VecDeque<Song> {
        &self.queue
    }

    pub fn skip_votes(&self) -> usize {
        self.skip_ballot.len()
    }

    /// 移除连接并取消其读循环；丢弃发送端后写循环会发出关闭帧。
    /// 重复调用是安全的。
    pub fn remove_member(&mut self, conn_id: Uuid) -> bool {
        let Some(member) = self.members.remove(&conn_id) else {
            return false;
        };
        member.cancel.cancel();

        // 该用户已没有其他连接时，撤回其跳过票
        if !self.members.values().any(|m| m.user_id == member.user_id) {
            self.skip_ballot.remove(&member.user_id);
        }

        let left = UserLeftEvent { user_id: member.user_id, user_count: self.members.len() };
        self.notify(events::USER_LEFT, &left);
        true
    }

    // 向房间内所有连接广播；队列已满的慢消费者会被断开
    pub fn broadcast(&mut self, event: &Event, exclude: Option<Uuid>) {
        let mut dropped = Vec::new();
        for (conn_id, member) in &self.members {
            if Some(*conn_id) == exclude {
                continue;
            }
            match member.outbound.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!("连接 {} 发送队列已满，断开慢消费者", conn_id);
                    dropped.push(*conn_id);
                }
                Err(TrySendError::Closed(_)) => dropped.push(*conn_id),
            }
        }
        for conn_id in dropped {
            self.remove_member(conn_id);
        }
    }

    fn notify<T: Serialize>(&mut self, event_type: &str, payload: &T) {
        match Event::new(event_type, payload) {
            Ok(event) => self.broadcast(&event, None),
            Err(e) => tracing::error!("failed to encode {} event: {}", event_type, e),
        }
    }

    /// 投票跳过当前歌曲。票数严格超过当前连接数的一半时触发跳过信号。
    pub fn vote_skip(&mut self, user_id: i64, event: &Event) -> SkipVote {
        let Some(playback) = self.playback.as_ref() else {
            return SkipVote::NothingPlaying;
        };
        if playback.skip_tx.is_none() {
            return SkipVote::Pending;
        }
        if !self.skip_ballot.insert(user_id) {
            return SkipVote::Duplicate;
        }

        self.broadcast(event, None);

        let votes = self.skip_ballot.len();
        let members = self.members.len();
        if votes <= members / 2 {
            return SkipVote::Counted { votes, members };
        }

        if let Some(skip_tx) = self.playback.as_mut().and_then(|p| p.skip_tx.take()) {
            // 接收端已结束说明歌曲刚好自然结束，切歌照常进行
            let _ = skip_tx.send(());
        }
        self.skip_ballot.clear();
        SkipVote::Fired
    }

    pub fn snapshot(&self, api_token: String) -> RoomInformationEvent {
        RoomInformationEvent {
            user_count: self.members.len(),
            playlist: self.queue.iter().cloned().collect(),
            current_song: self.current_song().cloned(),
            api_token,
            song_position_ms: self
                .playback
                .as_ref()
                .map(|p| u64::try_from(p.started_at.elapsed().as_millis()).unwrap_or(u64::MAX))
                .unwrap_or(0),
        }
    }

    // 回收房间：停止播放，之后的注册会重新创建房间
    pub fn evict(&mut self) {
        self.evicted = true;
        self.playback = None;
        self.skip_ballot.clear();
    }
}

pub struct Room {
    record: RoomRecord,
    provider: Arc<dyn MusicProvider>,
    state: Mutex<RoomState>,
}

impl Room {
    pub fn new(record: RoomRecord, provider: Arc<dyn MusicProvider>) -> Self {
        Self { record, provider, state: Mutex::new(RoomState::default()) }
    }

    pub fn id(&self) -> Uuid {
        self.record.id
    }

    pub fn host_id(&self) -> i64 {
        self.record.host_id
    }

    pub async fn lock(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock().await
    }

    pub async fn summary(&self) -> RoomSummary {
        let state = self.lock().await;
        RoomSummary {
            room: self.record.clone(),
            user_count: state.member_count(),
            queue_length: state.queue.len(),
            current_song: state.current_song().cloned(),
        }
    }

    /// 点歌：空闲时立即播放，否则加入队尾并广播。
    pub async fn add_song(self: &Arc<Self>, state: &mut RoomState, song: Song, from: String) -> Result<(), AppError> {
        if state.is_playing() {
            state.queue.push_back(song.clone());
            let event = Event::new(events::ADDED_SONG_PLAYLIST, &AddedSongPlaylistEvent { from, song })?;
            state.broadcast(&event, None);
            return Ok(());
        }

        // 空闲时队列通常为空；若之前切歌失败留有残余，则按顺序从队首播放，新歌排在队尾
        let leftover = !state.queue.is_empty();
        state.queue.push_back(song.clone());
        if let Err(e) = self.play_next(state).await {
            // 失败时撤销入队，房间保持原状
            state.queue.pop_back();
            return Err(e);
        }

        if leftover {
            let event = Event::new(events::ADDED_SONG_PLAYLIST, &AddedSongPlaylistEvent { from, song })?;
            state.broadcast(&event, None);
        }
        Ok(())
    }

    // 从队首取歌播放。令牌获取失败时歌曲放回队首，房间保持空闲
    async fn play_next(self: &Arc<Self>, state: &mut RoomState) -> Result<bool, AppError> {
        let Some(next) = state.queue.pop_front() else {
            return Ok(false);
        };
        let api_token = match self.provider.playback_token(self.record.host_id).await {
            Ok(token) => token,
            Err(e) => {
                state.queue.push_front(next);
                return Err(e);
            }
        };
        self.play(state, next, api_token)?;
        Ok(true)
    }

    fn play(self: &Arc<Self>, state: &mut RoomState, song: Song, api_token: String) -> Result<(), AppError> {
        let event = Event::new(events::SET_AND_PLAY_SONG, &SetAndPlaySongEvent { api_token, song: song.clone() })?;

        let (skip_tx, skip_rx) = oneshot::channel();
        state.generation += 1;
        let generation = state.generation;
        let duration = Duration::from_millis(song.duration_ms);

        tracing::info!("房间 {} 开始播放 {} ({} ms)", self.record.id, song.id, song.duration_ms);
        state.skip_ballot.clear();
        state.playback = Some(Playback {
            song,
            started_at: Instant::now(),
            generation,
            skip_tx: Some(skip_tx),
        });
        state.broadcast(&event, None);

        tokio::spawn(playback_timer(Arc::clone(self), generation, duration, skip_rx));
        Ok(())
    }

    async fn finish_track(self: &Arc<Self>, state: &mut RoomState, reason: TrackEnd) {
        let Some(ended) = state.playback.take() else {
            return;
        };
        state.skip_ballot.clear();

        if reason == TrackEnd::Skipped {
            state.notify(events::SONG_SKIPPED, &SongSkippedEvent { song: ended.song });
        }

        match self.play_next(state).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!("房间 {} 播放列表已播完", self.record.id);
                state.notify(events::FINAL_SONG_ENDED, &());
            }
            Err(e) => {
                tracing::error!("房间 {} 切换下一首失败: {}", self.record.id, e);
            }
        }
    }
}

// 自然结束与跳过信号竞争，先到者生效；发送端被丢弃表示播放已被取消
fn playback_timer(
    room: Arc<Room>,
    generation: u64,
    duration: Duration,
    skip_rx: oneshot::Receiver<()>,
) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let reason = tokio::select! {
            _ = tokio::time::sleep(duration) => TrackEnd::Finished,
            signal = skip_rx => match signal {
                Ok(()) => TrackEnd::Skipped,
                Err(_) => return,
            },
        };

        let mut state = room.lock().await;
        if state.playback.as_ref().map(|p| p.generation) != Some(generation) {
            return;
        }
        room.finish_track(&mut state, reason).await;
    })
}
