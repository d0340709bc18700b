//! WebSocket 进度推送
//!
//! 连接建立后先推送一次当前快照，之后逐条转发批次事件，
//! 批次进入终止状态或客户端断开时关闭连接。

mod throttle;

pub use throttle::EventThrottler;

use crate::batch::{ProgressEvent, ProgressSnapshot};
use axum::extract::ws::{Message, WebSocket};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

/// 服务端推送消息
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsServerMessage {
    /// 当前快照（连接建立时）
    Snapshot { snapshot: ProgressSnapshot },
    /// 进度事件
    Event { event: ProgressEvent },
    /// 推送跟不上，丢弃了若干事件
    Lagged { skipped: u64 },
}

/// 转发批次事件直到结束
pub async fn stream_events(
    mut socket: WebSocket,
    initial: ProgressSnapshot,
    mut rx: broadcast::Receiver<ProgressEvent>,
    throttler: EventThrottler,
) {
    let batch_id = initial.batch_id.clone();
    let finished = initial.state.is_terminal();

    if send(&mut socket, &WsServerMessage::Snapshot { snapshot: initial })
        .await
        .is_err()
        || finished
    {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(event) => {
                    let terminal = event.is_terminal();
                    if throttler.admit(&event)
                        && send(&mut socket, &WsServerMessage::Event { event }).await.is_err()
                    {
                        break;
                    }
                    if terminal {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("批次 {} 事件推送滞后，丢弃 {} 条", batch_id, skipped);
                    if send(&mut socket, &WsServerMessage::Lagged { skipped }).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    debug!("批次 {} 的事件订阅者已断开", batch_id);
                    return;
                }
                _ => {}
            },
        }
    }

    let _ = socket.send(Message::Close(None)).await;
    debug!("批次 {} 事件推送结束", batch_id);
}

async fn send(socket: &mut WebSocket, message: &WsServerMessage) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            warn!("序列化推送消息失败: {}", e);
            return Ok(());
        }
    };
    socket.send(Message::Text(text)).await
}
