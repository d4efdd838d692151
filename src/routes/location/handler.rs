use axum::{
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};

use crate::AppState;
use crate::hub::StreamEvent;
use crate::utils::{error_codes, verify_stream_token};

use super::model::{DriverLocationSample, InboundMessage};

#[axum::debug_handler]
pub async fn trip_stream(
    State(state): State<AppState>,
    Path(trip_id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, trip_id, socket))
}

async fn handle_socket(state: AppState, trip_id: String, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (conn_id, mut events) = state.hub.subscribe(&trip_id);
    tracing::debug!("Connection {} subscribed to trip {}", conn_id, trip_id);

    // 中枢事件转发到客户端
    let forward = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // 入站消息循环：单条消息异常只做否定应答，连接保持
    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => {
                if let Err((code, msg)) = handle_report(&state, &trip_id, text.as_str()).await {
                    state
                        .hub
                        .send_to(&trip_id, conn_id, StreamEvent::Error { code, msg });
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    // 连接退出即注销，过期订阅不会累积
    state.hub.unsubscribe(&trip_id, conn_id);
    forward.abort();
    tracing::debug!("Connection {} left trip {}", conn_id, trip_id);
}

// 位置上报：校验令牌 -> 落库 -> 扇出
async fn handle_report(state: &AppState, trip_id: &str, text: &str) -> Result<(), (i32, String)> {
    let inbound: InboundMessage = serde_json::from_str(text)
        .map_err(|_| (error_codes::VALIDATION_ERROR, "消息格式无效".to_string()))?;

    match inbound {
        InboundMessage::Location { token, lat, lon } => {
            let claims = verify_stream_token(&token, &state.config)
                .map_err(|_| (error_codes::BAD_STREAM_TOKEN, "位置上报令牌无效".to_string()))?;
            if claims.trip != trip_id {
                return Err((error_codes::BAD_STREAM_TOKEN, "令牌与行程不匹配".to_string()));
            }

            let sample = DriverLocationSample::insert(&state.pool, trip_id, &claims.sub, lat, lon)
                .await
                .map_err(|e| {
                    tracing::error!("Failed to persist location for trip {}: {}", trip_id, e);
                    (error_codes::INTERNAL_ERROR, "位置上报失败".to_string())
                })?;

            // 订阅为空时采样仍已持久化
            let delivered = state.hub.broadcast(
                trip_id,
                StreamEvent::DriverLocation {
                    lat: sample.lat,
                    lon: sample.lon,
                    timestamp: sample.timestamp,
                },
            );
            tracing::debug!(
                "Location for trip {} delivered to {} subscribers",
                trip_id,
                delivered
            );
            Ok(())
        }
    }
}
