//! Session registry: connected clients grouped by session key
//!
//! The registry is a plain data structure with no interior locking. It is
//! owned by the hub task, which applies every mutation in the order the
//! requests arrive. Methods that depend on time take `now` explicitly so the
//! eviction rules can be exercised without waiting.

use crate::admission::AdmissionRequest;
use crate::config::RegistryConfig;
use crate::error::AdmissionError;
use log::{error, info, warn};
use shared::{codec, CodecError, PlayerState, SessionSnapshot};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;

/// Opaque session identifier chosen by clients, compared exactly
pub type SessionKey = String;

/// Encoded snapshot shared by every member of a session
pub type Outbound = Arc<str>;

/// Registry-assigned identity of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub(crate) u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why a client left the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// The connection closed or failed
    Disconnected,
    /// No valid state update within the inactivity window
    Inactive,
    /// Connected for longer than the maximum session age
    SessionExpired,
    /// Outbound queue was full
    Backpressure,
    /// The hub is shutting down
    Shutdown,
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            EvictionReason::Disconnected => "disconnected",
            EvictionReason::Inactive => "no valid update received",
            EvictionReason::SessionExpired => "maximum session age reached",
            EvictionReason::Backpressure => "outbound queue full",
            EvictionReason::Shutdown => "server shutting down",
        };
        f.write_str(reason)
    }
}

/// The registry's view of one live connection
#[derive(Debug)]
pub struct ClientHandle {
    pub id: ClientId,
    pub session_key: SessionKey,
    pub display_name: String,
    pub client_version: String,
    pub connected_at: Instant,
    /// Time of the last update that decoded successfully
    pub last_valid_update: Instant,
    /// Most recently decoded state
    pub state: PlayerState,
    sender: mpsc::Sender<Outbound>,
}

impl ClientHandle {
    /// Builds the handle for an admitted request
    ///
    /// The client starts with a default state, and both `connected_at` and
    /// `last_valid_update` are set to `now`.
    pub fn new(
        id: ClientId,
        request: AdmissionRequest,
        sender: mpsc::Sender<Outbound>,
        now: Instant,
    ) -> Self {
        Self {
            id,
            session_key: request.session_key,
            display_name: request.display_name,
            client_version: request.client_version,
            connected_at: now,
            last_valid_update: now,
            state: PlayerState::default(),
            sender,
        }
    }

    /// True when no valid update arrived within `timeout`
    pub fn is_inactive(&self, now: Instant, timeout: std::time::Duration) -> bool {
        now.saturating_duration_since(self.last_valid_update) >= timeout
    }

    /// True when the connection is at least `max_age` old, regardless of
    /// activity
    pub fn is_expired(&self, now: Instant, max_age: std::time::Duration) -> bool {
        now.saturating_duration_since(self.connected_at) >= max_age
    }

    /// Queues a frame without waiting; a full or closed queue is reported as
    /// the reason to evict.
    fn deliver(&self, frame: &Outbound) -> Result<(), EvictionReason> {
        match self.sender.try_send(Arc::clone(frame)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(EvictionReason::Backpressure),
            Err(TrySendError::Closed(_)) => Err(EvictionReason::Disconnected),
        }
    }
}

/// What a connection receives once the registry has admitted it
#[derive(Debug)]
pub struct Admitted {
    pub client_id: ClientId,
    pub session_key: SessionKey,
    pub display_name: String,
    /// Receiving half of the client's outbound queue; closed on eviction
    pub outbound: mpsc::Receiver<Outbound>,
}

/// Outcome of one broadcast tick
#[derive(Debug, Default)]
pub struct TickReport {
    /// Sessions that received a snapshot
    pub sessions: usize,
    /// Frames queued across all sessions
    pub delivered: usize,
    /// Sessions skipped because their snapshot failed to encode
    pub skipped: usize,
    pub evicted: Vec<(ClientId, EvictionReason)>,
}

/// Connected clients grouped by session, plus an index from client to session
pub struct SessionRegistry {
    config: RegistryConfig,
    sessions: HashMap<SessionKey, BTreeMap<ClientId, ClientHandle>>,
    memberships: HashMap<ClientId, SessionKey>,
    next_client_id: u64,
}

impl SessionRegistry {
    /// Creates an empty registry; client ids start at 1
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
            memberships: HashMap::new(),
            next_client_id: 1,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Hands out a fresh client id
    pub fn allocate_id(&mut self) -> ClientId {
        let id = ClientId(self.next_client_id);
        self.next_client_id += 1;
        id
    }

    /// Admits a validated request and registers its handle
    ///
    /// Capacity and display-name uniqueness are checked against every session
    /// in the same step that registers the client, so two requests for the
    /// same name can never both succeed.
    pub fn admit(
        &mut self,
        request: AdmissionRequest,
        now: Instant,
    ) -> Result<Admitted, AdmissionError> {
        if self.len() >= self.config.max_clients {
            return Err(AdmissionError::ServerFull(self.len()));
        }
        if self.display_name_taken(&request.display_name) {
            return Err(AdmissionError::DisplayNameTaken(request.display_name));
        }

        let id = self.allocate_id();
        let (sender, outbound) = mpsc::channel(self.config.outbound_capacity);
        let handle = ClientHandle::new(id, request, sender, now);
        let admitted = Admitted {
            client_id: id,
            session_key: handle.session_key.clone(),
            display_name: handle.display_name.clone(),
            outbound,
        };

        self.register(handle);
        Ok(admitted)
    }

    /// Inserts a handle with a default state
    ///
    /// Registering the same connection again (same id, same outbound queue)
    /// replaces its entry and may move it to another session. A handle that
    /// claims an id held by a different connection, or a display name held by
    /// another client, is refused and dropped, which closes its queue.
    /// Returns whether the handle was stored.
    pub fn register(&mut self, mut handle: ClientHandle) -> bool {
        if let Some(existing) = self.get(handle.id) {
            if !existing.sender.same_channel(&handle.sender) {
                warn!(
                    "Refusing to register {} ({}): id belongs to another connection",
                    handle.id, handle.display_name
                );
                return false;
            }
        }
        if self.name_held_by_other(&handle.display_name, handle.id) {
            warn!(
                "Refusing to register {}: display name {} is taken",
                handle.id, handle.display_name
            );
            return false;
        }

        if let Some(previous) = self.memberships.get(&handle.id) {
            if *previous != handle.session_key {
                let previous = previous.clone();
                self.remove_member(&previous, handle.id);
            }
        }
        // Ids handed in from outside must never be allocated again
        self.next_client_id = self.next_client_id.max(handle.id.0.saturating_add(1));

        handle.state = PlayerState::default();
        info!(
            "Client {} ({}) joined session {}",
            handle.id, handle.display_name, handle.session_key
        );
        self.memberships
            .insert(handle.id, handle.session_key.clone());
        self.sessions
            .entry(handle.session_key.clone())
            .or_default()
            .insert(handle.id, handle);
        true
    }

    fn name_held_by_other(&self, display_name: &str, id: ClientId) -> bool {
        self.sessions
            .values()
            .flat_map(|members| members.values())
            .any(|handle| handle.id != id && handle.display_name == display_name)
    }

    /// Removes a client and closes its outbound queue
    ///
    /// Returns false if the client was already gone.
    pub fn unregister(&mut self, id: ClientId, reason: EvictionReason) -> bool {
        let Some(session_key) = self.memberships.remove(&id) else {
            return false;
        };

        if let Some(handle) = self.remove_member(&session_key, id) {
            info!(
                "Client {} ({}) left session {}: {}",
                handle.id, handle.display_name, session_key, reason
            );
        }
        true
    }

    fn remove_member(&mut self, session_key: &str, id: ClientId) -> Option<ClientHandle> {
        let members = self.sessions.get_mut(session_key)?;
        let handle = members.remove(&id);
        if members.is_empty() {
            self.sessions.remove(session_key);
        }
        handle
    }

    /// Decodes a raw payload and stores it as the client's latest state
    ///
    /// A payload that fails to decode leaves the previous state in place.
    /// Returns `Ok(false)` for clients that are no longer registered.
    pub fn update_state(
        &mut self,
        id: ClientId,
        payload: &[u8],
        now: Instant,
    ) -> Result<bool, CodecError> {
        let Some(handle) = self.handle_mut(id) else {
            return Ok(false);
        };

        let state = codec::decode_state(payload)?;
        handle.state = state;
        handle.last_valid_update = now;
        Ok(true)
    }

    /// Evicts stale clients, then queues one encoded snapshot per session
    pub fn broadcast_tick(&mut self, now: Instant) -> TickReport {
        let mut report = TickReport::default();
        let session_keys: Vec<SessionKey> = self.sessions.keys().cloned().collect();

        for session_key in session_keys {
            for (id, reason) in self.stale_members(&session_key, now) {
                self.unregister(id, reason);
                report.evicted.push((id, reason));
            }

            let Some(members) = self.sessions.get(&session_key) else {
                continue;
            };

            let snapshot = SessionSnapshot::new(
                members.values().map(|handle| handle.state.clone()).collect(),
                self.config.version.clone(),
            );
            let frame: Outbound = match codec::encode_snapshot(&snapshot) {
                Ok(text) => Arc::from(text),
                Err(e) => {
                    error!("Skipping broadcast for session {}: {}", session_key, e);
                    report.skipped += 1;
                    continue;
                }
            };

            let failed: Vec<(ClientId, EvictionReason)> = members
                .values()
                .filter_map(|handle| handle.deliver(&frame).err().map(|r| (handle.id, r)))
                .collect();

            report.delivered += members.len() - failed.len();
            report.sessions += 1;

            for (id, reason) in failed {
                self.unregister(id, reason);
                report.evicted.push((id, reason));
            }
        }

        report
    }

    fn stale_members(&self, session_key: &str, now: Instant) -> Vec<(ClientId, EvictionReason)> {
        let Some(members) = self.sessions.get(session_key) else {
            return Vec::new();
        };

        members
            .values()
            .filter_map(|handle| {
                if handle.is_expired(now, self.config.max_session_age) {
                    Some((handle.id, EvictionReason::SessionExpired))
                } else if handle.is_inactive(now, self.config.inactivity_timeout) {
                    Some((handle.id, EvictionReason::Inactive))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Removes every client, closing all outbound queues
    pub fn evict_all(&mut self, reason: EvictionReason) -> usize {
        let ids: Vec<ClientId> = self.memberships.keys().copied().collect();
        for id in &ids {
            self.unregister(*id, reason);
        }
        ids.len()
    }

    /// Linear scan over all sessions
    pub fn display_name_taken(&self, display_name: &str) -> bool {
        self.sessions
            .values()
            .flat_map(|members| members.values())
            .any(|handle| handle.display_name == display_name)
    }

    /// Looks up a connected client
    pub fn get(&self, id: ClientId) -> Option<&ClientHandle> {
        let session_key = self.memberships.get(&id)?;
        self.sessions.get(session_key)?.get(&id)
    }

    fn handle_mut(&mut self, id: ClientId) -> Option<&mut ClientHandle> {
        let session_key = self.memberships.get(&id)?;
        self.sessions.get_mut(session_key)?.get_mut(&id)
    }

    /// True while the client is registered
    pub fn contains(&self, id: ClientId) -> bool {
        self.memberships.contains_key(&id)
    }

    /// Last successfully decoded state of a client
    pub fn state_of(&self, id: ClientId) -> Option<&PlayerState> {
        self.get(id).map(|handle| &handle.state)
    }

    /// Member ids of a session in connect order
    ///
    /// Unknown sessions yield an empty list.
    pub fn members(&self, session_key: &str) -> Vec<ClientId> {
        self.sessions
            .get(session_key)
            .map(|members| members.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Number of sessions with at least one member
    ///
    /// Sessions are dropped with their last member, so this never counts
    /// empty sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Returns the number of currently connected clients
    pub fn len(&self) -> usize {
        self.memberships.len()
    }

    /// True when no client is connected
    pub fn is_empty(&self) -> bool {
        self.memberships.is_empty()
    }
}
