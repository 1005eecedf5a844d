// ====================================================================================
// src/hub.rs - 房间注册表与事件分发
// ====================================================================================
use crate::{
    error::AppError,
    handler,
    models::{Event, RoomSummary},
    room::{Member, Room},
    services::{MusicProvider, RoomStore},
};
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, mpsc::error::TrySendError, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub type EventHandler =
    for<'a> fn(&'a Hub, Event, &'a ClientContext) -> BoxFuture<'a, Result<(), AppError>>;

#[derive(Debug, Clone)]
pub struct HubSettings {
    pub outbound_queue_capacity: usize,
    pub retain_empty_rooms: bool,
}

// 连接在房间中的身份；只持有发送队列的弱引用，房间移除成员后写循环即可结束
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub conn_id: Uuid,
    pub user_id: i64,
    pub room_id: Uuid,
    outbound: mpsc::WeakSender<Event>,
}

impl ClientContext {
    /// 只回复给当前连接。
    pub fn reply(&self, event: Event) -> Result<(), AppError> {
        let sender = self
            .outbound
            .upgrade()
            .ok_or_else(|| AppError::Connection("connection already closed".to_string()))?;
        sender.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => AppError::Connection("outbound queue full".to_string()),
            TrySendError::Closed(_) => AppError::Connection("connection already closed".to_string()),
        })
    }
}

// 注册成功后交给连接 actor 的资源
pub struct Connection {
    pub ctx: ClientContext,
    pub outbound: mpsc::Receiver<Event>,
    pub cancel: CancellationToken,
}

pub struct Hub {
    rooms: RwLock<HashMap<Uuid, Arc<Room>>>,
    handlers: HashMap<&'static str, EventHandler>,
    store: Arc<dyn RoomStore>,
    provider: Arc<dyn MusicProvider>,
    settings: HubSettings,
}

impl Hub {
    pub fn new(store: Arc<dyn RoomStore>, provider: Arc<dyn MusicProvider>, settings: HubSettings) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            handlers: handler::event_handlers(),
            store,
            provider,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn RoomStore> {
        &self.store
    }

    pub fn provider(&self) -> &Arc<dyn MusicProvider> {
        &self.provider
    }

    pub async fn room(&self, room_id: Uuid) -> Option<Arc<Room>> {
        self.rooms.read().await.get(&room_id).cloned()
    }

    // 获取房间，不存在时从存储加载。加载在锁外进行，插入时再次检查
    pub async fn get_or_load_room(&self, room_id: Uuid) -> Result<Arc<Room>, AppError> {
        let existing = self.rooms.read().await.get(&room_id).cloned();
        if let Some(room) = existing {
            return Ok(room);
        }

        let record = self.store.load_room(room_id).await?;
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(room_id)
            .or_insert_with(|| {
                tracing::info!("创建房间状态: {}", room_id);
                Arc::new(Room::new(record, Arc::clone(&self.provider)))
            })
            .clone();
        Ok(room)
    }

    pub async fn register_client(&self, user_id: i64, room_id: Uuid) -> Result<Connection, AppError> {
        let (tx, rx) = mpsc::channel(self.settings.outbound_queue_capacity);
        let cancel = CancellationToken::new();
        let ctx = ClientContext {
            conn_id: Uuid::new_v4(),
            user_id,
            room_id,
            outbound: tx.downgrade(),
        };

        loop {
            let room = self.get_or_load_room(room_id).await?;
            let mut state = room.lock().await;
            if state.is_evicted() {
                // 房间正在被回收，等待其从注册表移除后重建
                drop(state);
                tokio::task::yield_now().await;
                continue;
            }
            state.add_member(ctx.conn_id, Member::new(user_id, tx.clone(), cancel.clone()));
            tracing::info!(
                "用户 {} 加入房间 {} (连接 {}), 当前人数 {}",
                user_id,
                room_id,
                ctx.conn_id,
                state.member_count()
            );
            break;
        }

        Ok(Connection { ctx, outbound: rx, cancel })
    }

    /// 从房间移除连接，可重复调用。房间空了且未配置保留时回收房间。
    pub async fn remove_client(&self, ctx: &ClientContext) {
        let Some(room) = self.room(ctx.room_id).await else {
            return;
        };

        let evict = {
            let mut state = room.lock().await;
            if state.remove_member(ctx.conn_id) {
                tracing::info!("用户 {} 离开房间 {} (连接 {})", ctx.user_id, ctx.room_id, ctx.conn_id);
            }
            let evict = !self.settings.retain_empty_rooms && state.is_empty() && !state.is_evicted();
            if evict {
                state.evict();
            }
            evict
        };

        if evict {
            self.unlink(&room).await;
            tracing::info!("房间 {} 已无连接，回收内存状态", ctx.room_id);
        }
    }

    pub async fn count_members(&self, room_id: Uuid) -> usize {
        match self.room(room_id).await {
            Some(room) => room.lock().await.member_count(),
            None => 0,
        }
    }

    pub async fn dispatch(&self, event: Event, ctx: &ClientContext) -> Result<(), AppError> {
        let handler = self
            .handlers
            .get(event.event_type.as_str())
            .copied()
            .ok_or_else(|| AppError::UnknownEventType(event.event_type.clone()))?;
        handler(self, event, ctx).await
    }

    pub async fn room_summaries(&self) -> Vec<RoomSummary> {
        let rooms: Vec<Arc<Room>> = self.rooms.read().await.values().cloned().collect();
        let mut summaries = Vec::with_capacity(rooms.len());
        for room in rooms {
            summaries.push(room.summary().await);
        }
        summaries
    }

    /// 丢弃房间的内存状态；仍有连接时拒绝。
    pub async fn close_room(&self, room_id: Uuid) -> Result<(), AppError> {
        let Some(room) = self.room(room_id).await else {
            return Ok(());
        };
        {
            let mut state = room.lock().await;
            let count = state.member_count();
            if count > 0 {
                return Err(AppError::Conflict(format!("Room has {} active connection(s)", count)));
            }
            state.evict();
        }
        self.unlink(&room).await;
        Ok(())
    }

    async fn unlink(&self, room: &Arc<Room>) {
        let mut rooms = self.rooms.write().await;
        if rooms.get(&room.id()).is_some_and(|current| Arc::ptr_eq(current, room)) {
            rooms.remove(&room.id());
        }
    }
}
