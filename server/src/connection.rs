//! Per-connection read and write pumps
//!
//! A WebSocket allows one concurrent reader and one concurrent writer. Each
//! connection is therefore split into two halves that never share access:
//! the read pump forwards inbound state to the hub, the write pump drains the
//! client's outbound queue and keeps the connection alive with pings.

use crate::config::ConnectionConfig;
use crate::error::TransportError;
use crate::hub::HubHandle;
use crate::registry::{Admitted, ClientId, EvictionReason, Outbound};
use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, info, warn};
use shared::{codec, FRAME_DELIMITER};
use std::fmt::Display;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};

/// Runs both pumps for an upgraded socket
///
/// The write pump gets its own task; the read pump runs on the caller's task
/// and returns once the connection is finished.
pub async fn serve(socket: WebSocket, admitted: Admitted, hub: HubHandle, config: ConnectionConfig) {
    let Admitted {
        client_id,
        session_key,
        display_name,
        outbound,
    } = admitted;
    info!(
        "Client {} ({}) connected to session {}",
        client_id, display_name, session_key
    );

    let (sink, stream) = socket.split();
    tokio::spawn(write_pump(sink, outbound, client_id, config));
    read_pump(stream, client_id, hub, config).await;
}

/// Sends an unregister if the read pump is dropped before it could send one
struct UnregisterGuard {
    hub: HubHandle,
    client_id: ClientId,
    armed: bool,
}

impl Drop for UnregisterGuard {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self
                .hub
                .try_unregister(self.client_id, EvictionReason::Disconnected)
            {
                debug!("Could not unregister client {}: {}", self.client_id, e);
            }
        }
    }
}

/// Forwards inbound frames to the hub until the connection ends
///
/// Data frames have newlines replaced and surrounding whitespace trimmed
/// before they are sent on as state updates. The read deadline is pushed
/// back only by pongs. Whatever ends the loop, the client is unregistered.
pub async fn read_pump<S, E>(mut stream: S, client_id: ClientId, hub: HubHandle, config: ConnectionConfig)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let mut guard = UnregisterGuard {
        hub: hub.clone(),
        client_id,
        armed: true,
    };
    let mut deadline = Instant::now() + config.pong_wait;

    loop {
        let frame = match timeout_at(deadline, stream.next()).await {
            Err(_) => {
                info!("Client {} missed the pong deadline", client_id);
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                warn!("Read error from client {}: {}", client_id, e);
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        let payload = match frame {
            Message::Text(text) => codec::normalize_frame(text.as_bytes()),
            Message::Binary(bytes) => codec::normalize_frame(&bytes),
            Message::Pong(_) => {
                deadline = Instant::now() + config.pong_wait;
                continue;
            }
            // Answered by the transport
            Message::Ping(_) => continue,
            Message::Close(_) => {
                debug!("Client {} sent close", client_id);
                break;
            }
        };

        if payload.is_empty() {
            continue;
        }
        if hub.update_state(client_id, payload).await.is_err() {
            debug!("Hub gone, ending read pump for client {}", client_id);
            break;
        }
    }

    if hub
        .unregister(client_id, EvictionReason::Disconnected)
        .await
        .is_ok()
    {
        guard.armed = false;
    }
}

/// Drains the outbound queue onto the socket and sends keepalive pings
///
/// Snapshots already waiting in the queue are joined into the same frame.
/// When the registry closes the queue a close frame is sent and the pump
/// ends; any failed write also ends it.
pub async fn write_pump<K>(
    mut sink: K,
    mut outbound: mpsc::Receiver<Outbound>,
    client_id: ClientId,
    config: ConnectionConfig,
) where
    K: Sink<Message> + Unpin,
    K::Error: Display,
{
    let mut keepalive = interval_at(Instant::now() + config.ping_period, config.ping_period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(first) = message else {
                    debug!("Outbound queue for client {} closed", client_id);
                    let _ = send_frame(&mut sink, Message::Close(None), &config).await;
                    break;
                };

                let frame = coalesce(first, &mut outbound);
                if let Err(e) = send_frame(&mut sink, Message::Text(frame), &config).await {
                    warn!("Write to client {} failed: {}", client_id, e);
                    break;
                }
            }
            _ = keepalive.tick() => {
                if let Err(e) = send_frame(&mut sink, Message::Ping(Vec::new()), &config).await {
                    warn!("Ping to client {} failed: {}", client_id, e);
                    break;
                }
            }
        }
    }

    let _ = timeout(config.write_wait, sink.close()).await;
}

/// Joins the first message with everything already queued behind it
fn coalesce(first: Outbound, outbound: &mut mpsc::Receiver<Outbound>) -> String {
    let mut frame = String::from(&*first);
    while let Ok(next) = outbound.try_recv() {
        frame.push(FRAME_DELIMITER);
        frame.push_str(&next);
    }
    frame
}

async fn send_frame<K>(
    sink: &mut K,
    message: Message,
    config: &ConnectionConfig,
) -> Result<(), TransportError>
where
    K: Sink<Message> + Unpin,
    K::Error: Display,
{
    match timeout(config.write_wait, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(TransportError::Socket(e.to_string())),
        Err(_) => Err(TransportError::WriteTimeout(config.write_wait)),
    }
}
