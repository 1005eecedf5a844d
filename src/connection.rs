// ====================================================================================
// src/connection.rs - 单个 WebSocket 连接的读写循环
// ====================================================================================
use crate::{
    error::AppError,
    hub::{ClientContext, Connection, Hub},
    models::Event,
};
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct KeepAlive {
    pub pong_wait: Duration,
    pub ping_interval: Duration,
}

// RAII Guard for connection counting
pub struct ConnectionGuard {
    count: Arc<AtomicU32>,
}

impl ConnectionGuard {
    pub fn new(count: Arc<AtomicU32>) -> Self {
        count.fetch_add(1, Ordering::Relaxed);
        Self { count }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::Relaxed);
    }
}

// 处理单个WebSocket连接：写循环独立调度，读循环在当前任务中运行
pub async fn handle_socket(socket: WebSocket, hub: Arc<Hub>, connection: Connection, keepalive: KeepAlive) {
    let Connection { ctx, outbound, cancel } = connection;
    let (ws_sender, ws_receiver) = socket.split();

    tokio::spawn(write_loop(
        Arc::clone(&hub),
        ctx.clone(),
        ws_sender,
        outbound,
        keepalive.ping_interval,
    ));

    read_loop(&hub, &ctx, ws_receiver, cancel, keepalive.pong_wait).await;
    hub.remove_client(&ctx).await;
}

async fn read_loop(
    hub: &Hub,
    ctx: &ClientContext,
    mut ws_receiver: SplitStream<WebSocket>,
    cancel: CancellationToken,
    pong_wait: Duration,
) {
    let mut deadline = Instant::now() + pong_wait;

    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("连接 {} 已被移出房间，停止读取", ctx.conn_id);
                break;
            }
            frame = tokio::time::timeout_at(deadline, ws_receiver.next()) => frame,
        };

        let msg = match frame {
            Err(_) => {
                tracing::info!("连接 {} 超过 {:?} 无数据，判定为断开", ctx.conn_id, pong_wait);
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                tracing::debug!("连接 {} 读取失败: {}", ctx.conn_id, e);
                break;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        // 任何入站帧（包括 pong）都会续期读超时
        deadline = Instant::now() + pong_wait;

        match msg {
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => break,
            msg => {
                let event = match Event::try_from(msg) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!("failed to unmarshal message from {}: {}", ctx.conn_id, e);
                        break;
                    }
                };
                if let Err(e) = hub.dispatch(event, ctx).await {
                    tracing::warn!("failed to route event from {}: {}", ctx.conn_id, e);
                    break;
                }
            }
        }
    }
}

async fn write_loop(
    hub: Arc<Hub>,
    ctx: ClientContext,
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Event>,
    ping_interval: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);

    loop {
        tokio::select! {
            next = outbound.recv() => {
                let Some(event) = next else {
                    // 队列关闭：发送关闭帧后退出
                    if let Err(e) = ws_sender.send(Message::Close(None)).await {
                        tracing::debug!("连接 {} 关闭帧发送失败: {}", ctx.conn_id, e);
                    }
                    break;
                };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!("failed to marshal {} event: {}", event.event_type, e);
                        break;
                    }
                };
                if let Err(e) = ws_sender.send(Message::Text(text)).await {
                    tracing::debug!("连接 {} 发送失败: {}", ctx.conn_id, e);
                    break;
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = ws_sender.send(Message::Ping(Vec::new())).await {
                    tracing::debug!("连接 {} ping 失败: {}", ctx.conn_id, e);
                    break;
                }
            }
        }
    }

    hub.remove_client(&ctx).await;
}

impl TryFrom<Message> for Event {
    type Error = AppError;
    fn try_from(msg: Message) -> Result<Self, Self::Error> {
        match msg {
            Message::Text(text) => Ok(serde_json::from_str(&text)?),
            Message::Binary(bytes) => Ok(serde_json::from_slice(&bytes)?),
            _ => Err(AppError::BadRequest("unsupported frame type".to_string())),
        }
    }
}
