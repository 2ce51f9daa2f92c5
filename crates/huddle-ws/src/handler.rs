use crate::limits::UserRateLimits;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use huddle_core::connection::Connection;
use huddle_core::outbound::{CloseReason, OutboundReceiver};
use huddle_core::{AppState, RealtimeConfig};
use huddle_models::gateway::{
    ClientEvent, ErrorCode, MessageError, ServerEvent, CLOSE_AUTH_FAILED, CLOSE_IDLE_TIMEOUT,
    CLOSE_UNHEALTHY,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const WS_PING_INTERVAL: Duration = Duration::from_secs(20);

fn wire_log_in(user_id: Option<i64>, text: &str) {
    tracing::trace!(target: "huddle_ws::wire", direction = "in", user_id = ?user_id, bytes = text.len(), payload = %text);
}

async fn send_event(
    sender: &mut (impl SinkExt<Message> + Unpin),
    event: &ServerEvent,
    user_id: Option<i64>,
) -> Result<(), ()> {
    let payload = serde_json::to_string(event).map_err(|e| {
        tracing::error!(event = event.name(), "failed to encode event: {e}");
    })?;
    tracing::trace!(
        target: "huddle_ws::wire",
        direction = "out",
        user_id = ?user_id,
        event = event.name(),
        payload = %payload
    );
    sender
        .send(Message::Text(payload.into()))
        .await
        .map_err(|_| ())
}

async fn send_close(
    sender: &mut (impl SinkExt<Message> + Unpin),
    code: u16,
    reason: &str,
) -> Result<(), ()> {
    tracing::trace!(target: "huddle_ws::wire", direction = "out", code, reason, "close");
    sender
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await
        .map_err(|_| ())
}

fn close_frame_for(reason: &CloseReason) -> Option<(u16, &'static str)> {
    match reason {
        CloseReason::ClientClosed | CloseReason::TransportError(_) => None,
        CloseReason::AuthFailed => Some((CLOSE_AUTH_FAILED, "authentication failed")),
        CloseReason::IdleTimeout => Some((CLOSE_IDLE_TIMEOUT, "idle timeout")),
        CloseReason::Unhealthy => Some((CLOSE_UNHEALTHY, "connection fell behind")),
        CloseReason::ServerError => Some((1011, "server error")),
        CloseReason::Shutdown => Some((1001, "server shutting down")),
        CloseReason::Logout => Some((1000, "logged out")),
    }
}

fn error_event(code: ErrorCode, message: impl Into<String>) -> ServerEvent {
    ServerEvent::MessageError(MessageError {
        code,
        message: message.into(),
        room_id: None,
        nonce: None,
    })
}

pub async fn handle_connection(socket: WebSocket, state: AppState, limits: Arc<UserRateLimits>) {
    let config = state.config.realtime.clone();
    let (mut sender, mut receiver) = socket.split();
    let (mut connection, mut outbound) = Connection::open(state.dispatcher.clone(), &config);

    let hello = ServerEvent::Hello {
        heartbeat_interval_ms: config.heartbeat_interval.as_millis() as u64,
    };
    if send_event(&mut sender, &hello, None).await.is_err() {
        return;
    }

    let token = match tokio::time::timeout(config.identify_timeout, wait_for_identify(&mut receiver)).await {
        Ok(Some(token)) => token,
        Ok(None) => {
            tracing::debug!(connection = %connection.id(), "client left before identifying");
            return;
        }
        Err(_) => {
            let _ = send_event(
                &mut sender,
                &error_event(ErrorCode::AuthFailed, "identify timed out"),
                None,
            )
            .await;
            let _ = send_close(&mut sender, CLOSE_AUTH_FAILED, "identify timed out").await;
            connection.close(CloseReason::AuthFailed);
            return;
        }
    };

    if let Err(e) = connection.identify(state.auth.as_ref(), &token).await {
        tracing::info!(connection = %connection.id(), "identify rejected: {e}");
        flush_and_close(&mut sender, &mut outbound, None).await;
        return;
    }

    let shutdown = state.shutdown.clone();
    run_session(sender, receiver, connection, outbound, &config, &limits, &shutdown).await;
}

/// Waits for the first `identify` frame. Anything else before it is ignored.
async fn wait_for_identify(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<String> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                wire_log_in(None, &text);
                match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(ClientEvent::Identify { token }) => return Some(token),
                    Ok(other) => {
                        tracing::debug!(event = other.name(), "ignoring event before identify")
                    }
                    Err(e) => tracing::debug!("ignoring malformed frame before identify: {e}"),
                }
            }
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn run_session(
    mut sender: impl SinkExt<Message> + Unpin,
    mut receiver: impl StreamExt<Item = Result<Message, axum::Error>> + Unpin,
    mut connection: Connection,
    mut outbound: OutboundReceiver,
    config: &RealtimeConfig,
    limits: &UserRateLimits,
    shutdown: &tokio::sync::Notify,
) {
    let Some(user_id) = connection.identity().map(|user| user.id) else {
        return;
    };
    let mut ws_ping_interval = tokio::time::interval(WS_PING_INTERVAL);
    ws_ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let idle_sleep = tokio::time::sleep(config.idle_timeout);
    tokio::pin!(idle_sleep);
    let shutdown_signal = shutdown.notified();
    tokio::pin!(shutdown_signal);
    // notify_waiters only wakes registered waiters.
    shutdown_signal.as_mut().enable();

    let reason = loop {
        let typing_deadline = connection.next_typing_deadline();
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        idle_sleep.as_mut().reset(Instant::now() + config.idle_timeout);
                        wire_log_in(Some(user_id), &text);
                        let event = match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => event,
                            Err(e) => {
                                connection.reply(error_event(
                                    ErrorCode::InvalidPayload,
                                    format!("malformed event: {e}"),
                                ));
                                continue;
                            }
                        };
                        if let Err(retry_after_ms) = limits.check(user_id, &event) {
                            if matches!(event, ClientEvent::TypingStart { .. } | ClientEvent::TypingStop { .. }) {
                                tracing::debug!(user_id, "typing rate limited (silent drop)");
                            } else {
                                connection.reply(error_event(
                                    ErrorCode::RateLimited,
                                    format!("rate limited, retry after {retry_after_ms}ms"),
                                ));
                            }
                            continue;
                        }
                        connection.handle_event(event, Instant::now()).await;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        idle_sleep.as_mut().reset(Instant::now() + config.idle_timeout);
                        connection.reply(error_event(
                            ErrorCode::InvalidPayload,
                            "binary frames are not supported",
                        ));
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        idle_sleep.as_mut().reset(Instant::now() + config.idle_timeout);
                    }
                    Some(Ok(Message::Close(_))) | None => break CloseReason::ClientClosed,
                    Some(Err(err)) => break CloseReason::TransportError(err.to_string()),
                }
            }
            event = outbound.recv() => {
                match event {
                    Some(event) => {
                        if send_event(&mut sender, &event, Some(user_id)).await.is_err() {
                            break CloseReason::TransportError("send failed".into());
                        }
                        // Evicted over REST; forget the room now rather than on the next event.
                        if matches!(*event, ServerEvent::RoomLeft { .. }) {
                            connection.sync();
                        }
                    }
                    None => break outbound.close_reason().unwrap_or(CloseReason::ServerError),
                }
            }
            () = sleep_until_deadline(typing_deadline) => {
                connection.expire_typing(Instant::now());
            }
            () = &mut idle_sleep => break CloseReason::IdleTimeout,
            () = &mut shutdown_signal => break CloseReason::Shutdown,
            _ = ws_ping_interval.tick() => {
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break CloseReason::TransportError("ping send failed".into());
                }
            }
        }
    };

    match &reason {
        CloseReason::IdleTimeout | CloseReason::Unhealthy => {
            tracing::warn!(user_id, reason = reason.as_str(), "client disconnected")
        }
        _ => tracing::info!(user_id, reason = reason.as_str(), "client disconnected"),
    }
    connection.close(reason.clone());
    flush_and_close(&mut sender, &mut outbound, Some(user_id)).await;
}

/// Sends whatever is still queued, then the close frame matching the reason.
async fn flush_and_close(
    sender: &mut (impl SinkExt<Message> + Unpin),
    outbound: &mut OutboundReceiver,
    user_id: Option<i64>,
) {
    let reason = outbound.close_reason();
    let Some((code, text)) = reason.as_ref().and_then(close_frame_for) else {
        return;
    };
    for event in outbound.drain() {
        if send_event(sender, &event, user_id).await.is_err() {
            return;
        }
    }
    let _ = send_close(sender, code, text).await;
}
