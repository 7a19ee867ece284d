//! WebSocket handler for live telemetry

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use monisens_core::{LogMsg, SensorMsg};
use monisens_module::LifecycleState;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::state::{AppState, HostEvent};

/// WebSocket message types
#[derive(Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum WsMessage {
    Reading(SensorMsg),
    Log(LogMsg),
    State { state: LifecycleState },
    Pong,
}

impl From<HostEvent> for WsMessage {
    fn from(event: HostEvent) -> Self {
        match event {
            HostEvent::Reading(reading) => WsMessage::Reading(reading),
            HostEvent::Log(log) => WsMessage::Log(log),
            HostEvent::State(state) => WsMessage::State { state },
        }
    }
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_json(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    msg: &WsMessage,
) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to encode WebSocket message");
            true
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.subscribe();

    info!("WebSocket client connected");

    // Current state and latest readings first
    let current = state.status.read().await.state;
    if !send_json(&mut sender, &WsMessage::State { state: current }).await {
        return;
    }
    for latest in state.latest_readings().await {
        if !send_json(&mut sender, &WsMessage::Reading(latest.reading)).await {
            return;
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if !send_json(&mut sender, &event.into()).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        debug!(skipped = n, "WebSocket client lagging behind telemetry");
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        if text.as_str() == "ping" && !send_json(&mut sender, &WsMessage::Pong).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use monisens_core::SensorValue;

    #[test]
    fn test_event_encoding() {
        let reading: WsMessage = HostEvent::Reading(
            SensorMsg::new("probe_0").with("temperature", SensorValue::Float32(20.5)),
        )
        .into();
        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["type"], "reading");
        assert_eq!(json["data"]["sensor"], "probe_0");

        let state: WsMessage = HostEvent::State(LifecycleState::Running).into();
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["type"], "state");
        assert_eq!(json["data"]["state"], "running");
    }
}
