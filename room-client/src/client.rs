//! RoomClient - at-least-once, deduplicated delivery between room peers.
//!
//! [`RoomClient`] sits on top of a [`Mesh`] and a [`Signaling`] relay and
//! promotes the unreliable mesh to reliable delivery of game actions.
//!
//! # Architecture
//!
//! ```text
//! RoomSession → RoomClient → Mesh → peers
//!                   │  ↑
//!                   │  └── driver task (mesh events, signaling events)
//!                   └── Signaling relay (room membership, negotiation, fallback)
//! ```
//!
//! Every action sent to a known peer is tracked per `(action id, peer)` and
//! retransmitted on the fixed [`RETRY_LADDER`](room_core::RETRY_LADDER)
//! until that peer ACKs it. A peer that never ACKs is sent one
//! `syncRequest` and then left to pull from the store.

use crate::signaling::{Signaling, SignalingError};
use crate::transport::{Mesh, MeshEvent, PeerConnector, TransportError};
use dashmap::DashMap;
use room_core::{is_initiator, Clock, OfferBackoff, PendingAck, SystemClock, TimerOutcome};
use room_types::{
    Action, ActionId, ClientId, GameId, PeerMessage, RoomId, SignalingEvent, SignalingMessage,
    TypesError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Signaling error.
    #[error("signaling error: {0}")]
    Signaling(#[from] SignalingError),

    /// A frame could not be encoded.
    #[error("encoding error: {0}")]
    Encoding(#[from] TypesError),

    /// The client has been destroyed.
    #[error("client destroyed")]
    Destroyed,
}

/// How to enter the signaling room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMode {
    /// Create the relay room (the host).
    Create,
    /// Join an existing relay room.
    Join,
}

/// Something the application has to act on.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    /// A peer's action arrived. The ACK has already been sent.
    ///
    /// Retransmissions and relay copies arrive as separate events; the
    /// receiver is expected to skip actions it has already applied.
    Action {
        /// Sending peer.
        from: ClientId,
        /// Epoch the sender applied the action in.
        game_id: GameId,
        /// The action.
        action: Action,
    },
    /// A peer gave up on direct delivery and asks us to pull from the store.
    SyncRequested {
        /// Requesting peer.
        from: ClientId,
        /// Epoch the peer was on.
        game_id: Option<GameId>,
    },
    /// A direct channel to a peer opened.
    PeerConnected(ClientId),
    /// A peer's channel closed or the peer left the room.
    PeerDisconnected(ClientId),
    /// The relay reported an error.
    SignalingError(String),
}

/// Tunables of a [`RoomClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Offer retry policy.
    pub offer_backoff: OfferBackoff,
    /// Clock used to stamp pending ACKs.
    pub clock: Arc<dyn Clock>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            offer_backoff: OfferBackoff::default(),
            clock: Arc::new(SystemClock),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct KnownPeer {
    relay_only: bool,
}

struct PendingEntry {
    ack: PendingAck,
    timer: AbortHandle,
}

struct ClientInner<C: PeerConnector, S: Signaling> {
    local: ClientId,
    room: RoomId,
    mesh: Mesh<C>,
    signaling: S,
    options: ClientOptions,
    peers: DashMap<ClientId, KnownPeer>,
    pending: DashMap<ActionId, HashMap<ClientId, PendingEntry>>,
    offers: DashMap<ClientId, AbortHandle>,
    game_id: Mutex<Option<GameId>>,
    events: mpsc::UnboundedSender<RoomEvent>,
    destroyed: AtomicBool,
}

/// Reliable-delivery client for one room.
///
/// Created with [`RoomClient::connect`]; tear down with
/// [`RoomClient::destroy`]. Dropping without `destroy` still cancels every
/// task.
pub struct RoomClient<C: PeerConnector, S: Signaling> {
    inner: Arc<ClientInner<C, S>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl<C: PeerConnector, S: Signaling> std::fmt::Debug for RoomClient<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomClient")
            .field("local", &self.inner.local)
            .field("room", &self.inner.room)
            .field("peers", &self.known_peers())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl<C: PeerConnector, S: Signaling> RoomClient<C, S> {
    /// Connect to the relay and enter `room`.
    ///
    /// Returns the client and the stream of [`RoomEvent`]s.
    pub async fn connect(
        local: ClientId,
        room: RoomId,
        mode: JoinMode,
        connector: C,
        signaling: S,
        options: ClientOptions,
    ) -> Result<(Self, mpsc::UnboundedReceiver<RoomEvent>), ClientError> {
        let (mesh, mesh_rx) = Mesh::new(local.clone(), connector);
        let (events, events_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(ClientInner {
            local: local.clone(),
            room: room.clone(),
            mesh,
            signaling,
            options,
            peers: DashMap::new(),
            pending: DashMap::new(),
            offers: DashMap::new(),
            game_id: Mutex::new(None),
            events,
            destroyed: AtomicBool::new(false),
        });

        inner.signaling.connect(signal_tx).await?;
        let driver = tokio::spawn(drive(Arc::clone(&inner), mesh_rx, signal_rx));

        let hello = match mode {
            JoinMode::Create => SignalingMessage::CreateRoom {
                room_id: room.clone(),
                client_id: local.clone(),
            },
            JoinMode::Join => SignalingMessage::JoinRoom {
                room_id: room.clone(),
                client_id: local.clone(),
            },
        };
        if let Err(e) = inner.signaling.send(hello).await {
            driver.abort();
            inner.signaling.disconnect().await;
            return Err(e.into());
        }

        tracing::info!(local = %local, room = %room, ?mode, "Room client connected");
        let client = Self {
            inner,
            driver: Mutex::new(Some(driver)),
        };
        Ok((client, events_rx))
    }

    /// Local client id.
    pub fn local_id(&self) -> &ClientId {
        &self.inner.local
    }

    /// Room this client is in.
    pub fn room_id(&self) -> &RoomId {
        &self.inner.room
    }

    /// Move to a new epoch.
    ///
    /// Sets the epoch carried in outgoing `syncRequest`s and stops
    /// retransmitting actions from any other epoch.
    pub fn set_game_id(&self, game_id: GameId) {
        let cancelled = self.inner.cancel_stale(&game_id);
        if cancelled > 0 {
            tracing::debug!(epoch = %game_id, cancelled, "Dropped retries from previous epoch");
        }
        *self
            .inner
            .game_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(game_id);
    }

    /// Send a message to every peer.
    ///
    /// The message is broadcast over open channels and, whenever no peer is
    /// known yet or some known peer has no open channel, also relayed through
    /// signaling. Actions are then tracked per known peer until ACKed.
    pub async fn send(&self, message: PeerMessage) -> Result<(), ClientError> {
        self.inner.ensure_alive()?;
        let bytes = message.to_bytes()?;
        let delivered = self.inner.mesh.broadcast(&bytes);

        let known = self.known_peers();
        let needs_relay =
            known.is_empty() || known.iter().any(|p| !self.inner.mesh.has_open_channel(p));
        if needs_relay {
            let relay = SignalingMessage::RelayTo {
                to: None,
                message: message.clone(),
            };
            if let Err(e) = self.inner.signaling.send(relay).await {
                tracing::warn!(local = %self.inner.local, "Relay broadcast failed: {}", e);
            }
        }

        if let PeerMessage::Action { action, .. } = &message {
            for peer in &known {
                self.inner.track(&action.id, peer, &message);
            }
            tracing::debug!(
                action = %action.id,
                delivered,
                relayed = needs_relay,
                tracked = known.len(),
                "Action sent"
            );
        }
        Ok(())
    }

    /// Ask one peer (or everyone) to pull the room from the store.
    pub async fn request_sync(&self, peer: Option<&ClientId>) -> Result<(), ClientError> {
        self.inner.ensure_alive()?;
        let message = self.inner.sync_request();
        match peer {
            Some(peer) => {
                self.inner.send_direct(peer, &message).await;
                Ok(())
            }
            None => self.send(message).await,
        }
    }

    /// Peers currently known through signaling or negotiation, sorted.
    pub fn known_peers(&self) -> Vec<ClientId> {
        let mut peers: Vec<ClientId> = self.inner.peers.iter().map(|e| e.key().clone()).collect();
        peers.sort();
        peers
    }

    /// Whether the direct channel to `peer` is open.
    pub fn has_open_channel(&self, peer: &ClientId) -> bool {
        self.inner.mesh.has_open_channel(peer)
    }

    /// Whether negotiation with `peer` was abandoned.
    pub fn is_relay_only(&self, peer: &ClientId) -> bool {
        self.inner.peers.get(peer).is_some_and(|p| p.relay_only)
    }

    /// Number of unacknowledged `(action, peer)` pairs.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.iter().map(|e| e.value().len()).sum()
    }

    /// Peers that have not ACKed `action_id` yet, sorted.
    pub fn pending_for(&self, action_id: &ActionId) -> Vec<ClientId> {
        let mut peers: Vec<ClientId> = self
            .inner
            .pending
            .get(action_id)
            .map(|e| e.value().keys().cloned().collect())
            .unwrap_or_default();
        peers.sort();
        peers
    }

    /// Whether [`destroy`](Self::destroy) has run.
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Cancel every timer, leave the relay and close every channel.
    ///
    /// Safe to call more than once.
    pub async fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_driver();
        self.inner.shutdown();
        self.inner.signaling.disconnect().await;
        tracing::info!(local = %self.inner.local, room = %self.inner.room, "Room client destroyed");
    }

    fn stop_driver(&self) {
        let driver = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(driver) = driver {
            driver.abort();
        }
    }
}

impl<C: PeerConnector, S: Signaling> Drop for RoomClient<C, S> {
    fn drop(&mut self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_driver();
        self.inner.shutdown();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let inner = Arc::clone(&self.inner);
            handle.spawn(async move { inner.signaling.disconnect().await });
        }
    }
}

async fn drive<C: PeerConnector, S: Signaling>(
    inner: Arc<ClientInner<C, S>>,
    mut mesh_rx: mpsc::UnboundedReceiver<MeshEvent>,
    mut signal_rx: mpsc::UnboundedReceiver<SignalingEvent>,
) {
    loop {
        tokio::select! {
            Some(event) = mesh_rx.recv() => inner.on_mesh_event(event).await,
            Some(event) = signal_rx.recv() => inner.on_signaling_event(event).await,
            else => break,
        }
    }
    tracing::debug!(local = %inner.local, "Client driver stopped");
}

impl<C: PeerConnector, S: Signaling> ClientInner<C, S> {
    fn ensure_alive(&self) -> Result<(), ClientError> {
        if self.destroyed.load(Ordering::SeqCst) {
            Err(ClientError::Destroyed)
        } else {
            Ok(())
        }
    }

    fn emit(&self, event: RoomEvent) {
        let _ = self.events.send(event);
    }

    fn sync_request(&self) -> PeerMessage {
        PeerMessage::SyncRequest {
            from: self.local.clone(),
            game_id: self
                .game_id
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    // =========================================================================
    // Event handling
    // =========================================================================

    async fn on_signaling_event(self: &Arc<Self>, event: SignalingEvent) {
        match event {
            SignalingEvent::RoomCreated { room_id } => {
                tracing::debug!(room = %room_id, "Relay room created");
            }
            SignalingEvent::PeerList { peers } => {
                for peer in peers {
                    self.add_peer(&peer);
                }
            }
            SignalingEvent::PeerJoined { peer } => self.add_peer(&peer),
            SignalingEvent::PeerLeft { peer } => self.drop_peer(&peer),
            SignalingEvent::Signal { from, payload } => {
                if from == self.local {
                    return;
                }
                self.peers.entry(from.clone()).or_default();
                if let Err(e) = self.mesh.handle_signal(&from, payload).await {
                    tracing::warn!(peer = %from, "Signal handling failed: {}", e);
                }
            }
            SignalingEvent::Relay { from, message } => self.on_peer_message(from, message).await,
            SignalingEvent::Error { message } => {
                tracing::warn!(local = %self.local, "Relay error: {}", message);
                self.emit(RoomEvent::SignalingError(message));
            }
        }
    }

    async fn on_mesh_event(self: &Arc<Self>, event: MeshEvent) {
        match event {
            MeshEvent::Signal { peer, payload } => {
                let message = SignalingMessage::Signal {
                    to: peer.clone(),
                    payload,
                };
                if let Err(e) = self.signaling.send(message).await {
                    tracing::warn!(peer = %peer, "Forwarding signal failed: {}", e);
                }
            }
            MeshEvent::ChannelOpen(peer) => {
                self.peers.entry(peer.clone()).or_default().relay_only = false;
                tracing::info!(local = %self.local, peer = %peer, "Channel open");
                self.emit(RoomEvent::PeerConnected(peer));
            }
            MeshEvent::ChannelClosed(peer) => {
                let cancelled = self.cancel_peer(&peer);
                self.mesh.remove_peer(&peer);
                if let Some(mut known) = self.peers.get_mut(&peer) {
                    known.relay_only = true;
                }
                tracing::info!(peer = %peer, cancelled, "Channel closed");
                self.emit(RoomEvent::PeerDisconnected(peer));
            }
            MeshEvent::Message { peer, data } => match PeerMessage::from_bytes(&data) {
                Ok(message) => self.on_peer_message(peer, message).await,
                Err(e) => tracing::warn!(peer = %peer, "Dropping undecodable frame: {}", e),
            },
        }
    }

    async fn on_peer_message(self: &Arc<Self>, peer: ClientId, message: PeerMessage) {
        match message {
            PeerMessage::Action {
                game_id, action, ..
            } => {
                let ack = PeerMessage::Ack {
                    from: self.local.clone(),
                    action_id: action.id.clone(),
                };
                self.send_direct(&peer, &ack).await;
                self.emit(RoomEvent::Action {
                    from: peer,
                    game_id,
                    action,
                });
            }
            PeerMessage::Ack { action_id, .. } => {
                if self.cancel_pending(&action_id, &peer) {
                    tracing::trace!(action = %action_id, peer = %peer, "ACK received");
                }
            }
            PeerMessage::SyncRequest { game_id, .. } => {
                tracing::debug!(peer = %peer, "Sync requested");
                self.emit(RoomEvent::SyncRequested {
                    from: peer,
                    game_id,
                });
            }
        }
    }

    // =========================================================================
    // Peers
    // =========================================================================

    fn add_peer(self: &Arc<Self>, peer: &ClientId) {
        if peer == &self.local {
            return;
        }
        self.peers.entry(peer.clone()).or_default();
        let initiator = is_initiator(&self.local, peer);
        if let Err(e) = self.mesh.create_peer(peer, initiator) {
            tracing::warn!(peer = %peer, "Creating peer connection failed: {}", e);
            return;
        }
        if initiator && !self.offers.contains_key(peer) && !self.mesh.has_open_channel(peer) {
            self.spawn_offer(peer.clone());
        }
    }

    fn drop_peer(&self, peer: &ClientId) {
        let cancelled = self.cancel_peer(peer);
        if let Some((_, offer)) = self.offers.remove(peer) {
            offer.abort();
        }
        self.mesh.remove_peer(peer);
        self.peers.remove(peer);
        tracing::info!(peer = %peer, cancelled, "Peer left");
        self.emit(RoomEvent::PeerDisconnected(peer.clone()));
    }

    /// Offer to `peer` with bounded linear backoff, then fall back to relay.
    fn spawn_offer(self: &Arc<Self>, peer: ClientId) {
        let weak = Arc::downgrade(self);
        let backoff = self.options.offer_backoff;
        let target = peer.clone();
        let task = tokio::spawn(async move {
            let mut attempt = 0;
            while let Some(delay) = backoff.delay_before(attempt) {
                tokio::time::sleep(delay).await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match inner.mesh.create_offer(&target).await {
                    Ok(()) => {
                        inner.offers.remove(&target);
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(peer = %target, attempt, "Offer failed: {}", e);
                    }
                }
                attempt += 1;
            }
            if let Some(inner) = weak.upgrade() {
                inner.offers.remove(&target);
                if let Some(mut known) = inner.peers.get_mut(&target) {
                    known.relay_only = true;
                }
                tracing::warn!(peer = %target, attempts = attempt, "Giving up on direct channel, relay only");
            }
        });
        self.offers.insert(peer, task.abort_handle());
    }

    // =========================================================================
    // Delivery
    // =========================================================================

    /// Unicast, falling back to the relay when the channel is not usable.
    async fn send_direct(&self, peer: &ClientId, message: &PeerMessage) {
        match message.to_bytes() {
            Ok(bytes) if self.mesh.send_to(peer, &bytes) => return,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(peer = %peer, "Encoding frame failed: {}", e);
                return;
            }
        }
        let relay = SignalingMessage::RelayTo {
            to: Some(peer.clone()),
            message: message.clone(),
        };
        if let Err(e) = self.signaling.send(relay).await {
            tracing::warn!(peer = %peer, "Relay to peer failed: {}", e);
        }
    }

    fn track(self: &Arc<Self>, action_id: &ActionId, peer: &ClientId, message: &PeerMessage) {
        let mut peers = self.pending.entry(action_id.clone()).or_default();
        if peers.contains_key(peer) {
            return;
        }
        let timer = self.arm_timer(action_id.clone(), peer.clone(), PendingAck::first_delay());
        peers.insert(
            peer.clone(),
            PendingEntry {
                ack: PendingAck::new(message.clone(), self.options.clock.now_ms()),
                timer,
            },
        );
    }

    fn arm_timer(self: &Arc<Self>, action_id: ActionId, peer: ClientId, delay: Duration) -> AbortHandle {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_retry_timer(action_id, peer).await;
            }
        })
        .abort_handle()
    }

    async fn on_retry_timer(self: &Arc<Self>, action_id: ActionId, peer: ClientId) {
        let (message, exhausted) = {
            let Some(mut peers) = self.pending.get_mut(&action_id) else {
                return;
            };
            let Some(entry) = peers.get_mut(&peer) else {
                return;
            };
            let message = entry.ack.message.clone();
            match entry.ack.on_timer() {
                TimerOutcome::Retransmit { next_delay } => {
                    entry.timer = self.arm_timer(action_id.clone(), peer.clone(), next_delay);
                    tracing::debug!(
                        action = %action_id,
                        peer = %peer,
                        retry = entry.ack.retry_index,
                        "Retransmitting unacknowledged action"
                    );
                    (message, false)
                }
                TimerOutcome::RetransmitAndExhaust => {
                    peers.remove(&peer);
                    let empty = peers.is_empty();
                    drop(peers);
                    if empty {
                        self.pending.remove_if(&action_id, |_, peers| peers.is_empty());
                    }
                    (message, true)
                }
            }
        };

        self.send_direct(&peer, &message).await;
        if exhausted {
            tracing::warn!(action = %action_id, peer = %peer, "Retry ladder exhausted, requesting sync");
            self.send_direct(&peer, &self.sync_request()).await;
        }
    }

    /// Stop tracking one `(action, peer)` pair. Returns whether it was pending.
    fn cancel_pending(&self, action_id: &ActionId, peer: &ClientId) -> bool {
        let mut cancelled = false;
        let mut empty = false;
        if let Some(mut peers) = self.pending.get_mut(action_id) {
            if let Some(entry) = peers.remove(peer) {
                entry.timer.abort();
                cancelled = true;
            }
            empty = peers.is_empty();
        }
        if empty {
            self.pending.remove_if(action_id, |_, peers| peers.is_empty());
        }
        cancelled
    }

    /// Stop tracking everything addressed to `peer`. Returns how many.
    fn cancel_peer(&self, peer: &ClientId) -> usize {
        let mut cancelled = 0;
        for mut entry in self.pending.iter_mut() {
            if let Some(pending) = entry.value_mut().remove(peer) {
                pending.timer.abort();
                cancelled += 1;
            }
        }
        self.pending.retain(|_, peers| !peers.is_empty());
        cancelled
    }

    /// Stop tracking actions from epochs other than `current`. Returns how many.
    fn cancel_stale(&self, current: &GameId) -> usize {
        let mut cancelled = 0;
        for mut entry in self.pending.iter_mut() {
            entry.value_mut().retain(|_, pending| {
                if pending.ack.is_stale(current) {
                    pending.timer.abort();
                    cancelled += 1;
                    false
                } else {
                    true
                }
            });
        }
        self.pending.retain(|_, peers| !peers.is_empty());
        cancelled
    }

    fn shutdown(&self) {
        for entry in self.pending.iter() {
            for pending in entry.value().values() {
                pending.timer.abort();
            }
        }
        self.pending.clear();
        for offer in self.offers.iter() {
            offer.value().abort();
        }
        self.offers.clear();
        self.mesh.destroy();
    }
}
