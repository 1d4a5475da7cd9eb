//! The hub task: sole owner of the session registry
//!
//! Every change to the registry arrives as a [`HubMessage`] on one bounded
//! queue and is applied to completion before the next message is taken.
//! Connections, the scheduler and the HTTP handlers only ever talk to the hub
//! through a cloneable [`HubHandle`].

use crate::admission::AdmissionRequest;
use crate::config::RegistryConfig;
use crate::error::{AdmissionError, HubError};
use crate::registry::{Admitted, ClientHandle, ClientId, EvictionReason, SessionRegistry};
use log::{debug, info, warn};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Requests processed by the hub loop
#[derive(Debug)]
pub enum HubMessage {
    Admit {
        request: AdmissionRequest,
        reply: oneshot::Sender<Result<Admitted, AdmissionError>>,
    },
    Register(ClientHandle),
    Unregister {
        client_id: ClientId,
        reason: EvictionReason,
    },
    UpdateState {
        client_id: ClientId,
        payload: Vec<u8>,
    },
    BroadcastTick,
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
    Shutdown,
}

/// Snapshot of registry size, answered by the `Stats` request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub sessions: usize,
    pub clients: usize,
}

pub struct Hub {
    registry: SessionRegistry,
    requests: mpsc::Receiver<HubMessage>,
    ticks: u64,
    shutting_down: bool,
}

impl Hub {
    /// Creates a hub with an intake queue of `capacity` requests
    ///
    /// The hub does nothing until [`Hub::run`] is polled.
    pub fn new(config: RegistryConfig, capacity: usize) -> (Self, HubHandle) {
        let (sender, requests) = mpsc::channel(capacity);
        let hub = Self {
            registry: SessionRegistry::new(config),
            requests,
            ticks: 0,
            shutting_down: false,
        };
        (hub, HubHandle { sender })
    }

    /// Creates a hub and runs it on its own task
    pub fn spawn(config: RegistryConfig, capacity: usize) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(config, capacity);
        (handle, tokio::spawn(hub.run()))
    }

    /// Applies requests until the intake closes, then evicts every client
    pub async fn run(mut self) {
        info!("Hub started");

        while let Some(message) = self.requests.recv().await {
            self.handle(message);
        }

        let evicted = self.registry.evict_all(EvictionReason::Shutdown);
        info!(
            "Hub stopped after {} ticks, {} clients disconnected",
            self.ticks, evicted
        );
    }

    fn handle(&mut self, message: HubMessage) {
        match message {
            HubMessage::Admit { request, reply } => {
                let result = if self.shutting_down {
                    Err(AdmissionError::Unavailable)
                } else {
                    self.registry.admit(request, Instant::now())
                };
                if let Err(e) = &result {
                    warn!("Admission refused: {}", e);
                }
                // The handshake gave up waiting
                if let Err(Ok(admitted)) = reply.send(result) {
                    self.registry
                        .unregister(admitted.client_id, EvictionReason::Disconnected);
                }
            }
            HubMessage::Register(handle) => {
                self.registry.register(handle);
            }
            HubMessage::Unregister { client_id, reason } => {
                self.registry.unregister(client_id, reason);
            }
            HubMessage::UpdateState { client_id, payload } => {
                if let Err(e) = self
                    .registry
                    .update_state(client_id, &payload, Instant::now())
                {
                    warn!("Dropping update from client {}: {}", client_id, e);
                }
            }
            HubMessage::BroadcastTick => {
                if self.shutting_down {
                    return;
                }
                let report = self.registry.broadcast_tick(Instant::now());
                self.ticks += 1;

                if self.ticks % 60 == 0 && !self.registry.is_empty() {
                    debug!(
                        "Tick {}: {} clients in {} sessions, {} frames queued",
                        self.ticks,
                        self.registry.len(),
                        self.registry.session_count(),
                        report.delivered
                    );
                }
            }
            HubMessage::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            HubMessage::Shutdown => {
                info!("Hub shutting down, draining pending requests");
                self.shutting_down = true;
                self.requests.close();
            }
        }
    }

    fn stats(&self) -> HubStats {
        HubStats {
            sessions: self.registry.session_count(),
            clients: self.registry.len(),
        }
    }
}

/// Cloneable sending side of the hub
#[derive(Debug, Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<HubMessage>,
}

impl HubHandle {
    #[cfg(test)]
    pub(crate) fn detached(capacity: usize) -> (Self, mpsc::Receiver<HubMessage>) {
        let (sender, requests) = mpsc::channel(capacity);
        (Self { sender }, requests)
    }

    async fn send(&self, message: HubMessage) -> Result<(), HubError> {
        self.sender.send(message).await.map_err(|_| HubError::Closed)
    }

    fn try_send(&self, message: HubMessage) -> Result<(), HubError> {
        self.sender.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => HubError::Busy,
            TrySendError::Closed(_) => HubError::Closed,
        })
    }

    /// Asks the hub to admit and register a new client
    pub async fn admit(&self, request: AdmissionRequest) -> Result<Admitted, AdmissionError> {
        let (reply, response) = oneshot::channel();
        self.send(HubMessage::Admit { request, reply })
            .await
            .map_err(|_| AdmissionError::Unavailable)?;
        response.await.map_err(|_| AdmissionError::Unavailable)?
    }

    /// Hands a prepared handle to the registry
    ///
    /// The hub refuses handles whose id or display name already belongs to
    /// another connection; the refused handle's queue is closed.
    pub async fn register(&self, handle: ClientHandle) -> Result<(), HubError> {
        self.send(HubMessage::Register(handle)).await
    }

    /// Removes a client; unknown ids are ignored
    pub async fn unregister(
        &self,
        client_id: ClientId,
        reason: EvictionReason,
    ) -> Result<(), HubError> {
        self.send(HubMessage::Unregister { client_id, reason }).await
    }

    /// Non-waiting unregister for contexts that cannot await
    pub fn try_unregister(
        &self,
        client_id: ClientId,
        reason: EvictionReason,
    ) -> Result<(), HubError> {
        self.try_send(HubMessage::Unregister { client_id, reason })
    }

    /// Forwards a raw payload; decoding happens on the hub task
    pub async fn update_state(&self, client_id: ClientId, payload: Vec<u8>) -> Result<(), HubError> {
        self.send(HubMessage::UpdateState { client_id, payload }).await
    }

    /// Requests a tick, waiting for room in the queue
    pub async fn broadcast_tick(&self) -> Result<(), HubError> {
        self.send(HubMessage::BroadcastTick).await
    }

    /// Requests a tick unless the hub queue is full
    pub fn try_broadcast_tick(&self) -> Result<(), HubError> {
        self.try_send(HubMessage::BroadcastTick)
    }

    /// Current session and client counts
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply, response) = oneshot::channel();
        self.send(HubMessage::Stats { reply }).await?;
        response.await.map_err(|_| HubError::Closed)
    }

    /// Stops the hub once the requests already queued have been applied
    pub async fn shutdown(&self) -> Result<(), HubError> {
        self.send(HubMessage::Shutdown).await
    }

    /// True once the hub has stopped taking requests
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
