//! `GET (WS) /ws/runs/{id}/events` (spec.md §6): streams envelopes over the
//! push bus, falling back to polling storage when the bus yields nothing
//! for a while, and closes with a final status envelope once the Run is
//! terminal.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::Response;
use fleetd_shared::models::Event;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::event_gateway::subscribers::spawn_polling_fallback;
use crate::event_gateway::is_terminal;

use super::state::AppState;

#[derive(Deserialize)]
pub struct SubscribeQuery {
    #[serde(default)]
    pub from_seq: i64,
}

#[derive(Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum Envelope {
    Event {
        seq: i64,
        #[serde(rename = "type")]
        event_type: String,
        timestamp: chrono::DateTime<chrono::Utc>,
        payload: serde_json::Value,
    },
    Status {
        status: String,
    },
}

impl From<&Event> for Envelope {
    fn from(e: &Event) -> Self {
        Envelope::Event {
            seq: e.seq,
            event_type: e.event_type.clone(),
            timestamp: e.timestamp,
            payload: e.payload.0.clone(),
        }
    }
}

#[instrument(skip(state, ws))]
pub async fn subscribe_run_events(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Query(query): Query<SubscribeQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, run_id, query.from_seq, socket))
}

async fn handle_socket(state: AppState, run_id: Uuid, from_seq: i64, mut socket: WebSocket) {
    let send_timeout = Duration::from_millis(state.eventgateway_config.send_timeout_ms);
    let poll_interval = Duration::from_millis(state.eventgateway_config.poll_interval_ms);

    let backlog = match state.gateway.list_events(run_id, from_seq, 1000).await {
        Ok(events) => events,
        Err(err) => {
            warn!(%run_id, error = %err, "ws.subscribe.backlog_failed");
            return;
        }
    };

    let mut last_seq = from_seq - 1;
    for event in &backlog {
        if send_envelope(&mut socket, &Envelope::from(event), send_timeout).await.is_err() {
            return;
        }
        last_seq = event.seq;
        if is_terminal(&event.event_type) {
            send_final_status(&mut socket, &event.event_type, send_timeout).await;
            return;
        }
    }

    let mut bus_rx = match state.gateway.subscribe(run_id).await {
        Ok(rx) => Some(rx),
        Err(err) => {
            warn!(%run_id, error = %err, "ws.subscribe.bus_failed");
            None
        }
    };

    let mut poll_rx = spawn_polling_fallback(
        state.gateway.event_store(),
        state.gateway.run_store(),
        run_id,
        last_seq + 1,
        poll_interval,
    );

    loop {
        let event = if let Some(rx) = bus_rx.as_mut() {
            tokio::select! {
                bus_event = rx.recv() => match bus_event {
                    Ok(e) if e.seq > last_seq => Some(e),
                    Ok(_) => continue,
                    Err(_) => { bus_rx = None; continue; }
                },
                poll_event = poll_rx.recv() => match poll_event {
                    Some(e) if e.seq > last_seq => Some(e),
                    Some(_) => continue,
                    None => None,
                },
            }
        } else {
            poll_rx.recv().await
        };

        let Some(event) = event else {
            break;
        };

        last_seq = event.seq;
        let terminal = is_terminal(&event.event_type);
        if send_envelope(&mut socket, &Envelope::from(&event), send_timeout).await.is_err() {
            return;
        }
        if terminal {
            send_final_status(&mut socket, &event.event_type, send_timeout).await;
            return;
        }
    }
}

async fn send_envelope(socket: &mut WebSocket, envelope: &Envelope, send_timeout: Duration) -> Result<(), ()> {
    let text = serde_json::to_string(envelope).map_err(|_| ())?;
    tokio::time::timeout(send_timeout, socket.send(Message::Text(text.into())))
        .await
        .map_err(|_| ())?
        .map_err(|_| ())
}

async fn send_final_status(socket: &mut WebSocket, event_type: &str, send_timeout: Duration) {
    let status = match event_type {
        "run_completed" => "done",
        "run_failed" => "failed",
        "run_cancelled" => "cancelled",
        "run_timeout" => "timeout",
        other => other,
    };
    let envelope = Envelope::Status {
        status: status.to_string(),
    };
    let _ = send_envelope(socket, &envelope, send_timeout).await;
}
