//! One channel per known peer.

use super::{ChannelState, PeerConnection, PeerConnector, PeerEvents, TransportError};
use room_types::{ClientId, IceCandidate, SignalPayload};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Something the layer above has to act on.
#[derive(Debug, Clone, PartialEq)]
pub enum MeshEvent {
    /// A negotiation payload to deliver to `peer` through signaling.
    Signal {
        /// Destination peer.
        peer: ClientId,
        /// Offer, answer or candidate.
        payload: SignalPayload,
    },
    /// The channel to a peer opened.
    ChannelOpen(ClientId),
    /// The channel to a peer closed.
    ChannelClosed(ClientId),
    /// A frame arrived from a peer.
    Message {
        /// Sending peer.
        peer: ClientId,
        /// Raw frame.
        data: Vec<u8>,
    },
}

struct PeerSlot<P> {
    conn: Arc<P>,
    initiator: bool,
    has_remote: bool,
    pending_candidates: Vec<IceCandidate>,
}

struct MeshInner<P> {
    peers: HashMap<ClientId, PeerSlot<P>>,
    destroyed: bool,
}

/// Peer mesh over a [`PeerConnector`].
pub struct Mesh<C: PeerConnector> {
    local: ClientId,
    connector: C,
    inner: Mutex<MeshInner<C::Connection>>,
    events: mpsc::UnboundedSender<MeshEvent>,
}

impl<C: PeerConnector> std::fmt::Debug for Mesh<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mesh")
            .field("local", &self.local)
            .field("peers", &self.peers())
            .finish_non_exhaustive()
    }
}

impl<C: PeerConnector> Mesh<C> {
    /// Create an empty mesh and its event stream.
    pub fn new(local: ClientId, connector: C) -> (Self, mpsc::UnboundedReceiver<MeshEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let mesh = Self {
            local,
            connector,
            inner: Mutex::new(MeshInner {
                peers: HashMap::new(),
                destroyed: false,
            }),
            events,
        };
        (mesh, rx)
    }

    fn lock(&self) -> MutexGuard<'_, MeshInner<C::Connection>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connection(&self, peer: &ClientId) -> Result<Arc<C::Connection>, TransportError> {
        let inner = self.lock();
        if inner.destroyed {
            return Err(TransportError::Destroyed);
        }
        inner
            .peers
            .get(peer)
            .map(|slot| Arc::clone(&slot.conn))
            .ok_or_else(|| TransportError::UnknownPeer(peer.clone()))
    }

    /// Local peer id.
    pub fn local_id(&self) -> &ClientId {
        &self.local
    }

    /// Ids of every peer with a connection.
    pub fn peers(&self) -> Vec<ClientId> {
        let mut peers: Vec<ClientId> = self.lock().peers.keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Whether we created the channel to `peer` (as opposed to waiting for it).
    pub fn is_initiator_for(&self, peer: &ClientId) -> Option<bool> {
        self.lock().peers.get(peer).map(|slot| slot.initiator)
    }

    /// Create the connection to `peer`. The initiator opens the channel
    /// proactively. Does nothing if the peer already has a connection.
    pub fn create_peer(&self, peer: &ClientId, initiator: bool) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if inner.destroyed {
            return Err(TransportError::Destroyed);
        }
        if inner.peers.contains_key(peer) {
            return Ok(());
        }

        let events = PeerEvents::new(peer.clone(), self.events.clone());
        let conn = self.connector.connect(&self.local, peer, events)?;
        if initiator {
            conn.open_channel();
        }
        inner.peers.insert(
            peer.clone(),
            PeerSlot {
                conn,
                initiator,
                has_remote: false,
                pending_candidates: Vec::new(),
            },
        );
        tracing::debug!(local = %self.local, peer = %peer, initiator, "Peer connection created");
        Ok(())
    }

    /// Create an offer for `peer` and emit it as a [`MeshEvent::Signal`].
    pub async fn create_offer(&self, peer: &ClientId) -> Result<(), TransportError> {
        let conn = self.connection(peer)?;
        let offer = conn.create_offer().await?;
        let _ = self.events.send(MeshEvent::Signal {
            peer: peer.clone(),
            payload: SignalPayload::Offer(offer),
        });
        Ok(())
    }

    /// Handle a negotiation payload from `peer`.
    ///
    /// Candidates arriving before the remote description are buffered and
    /// applied once it is installed, never dropped. A signal from a peer
    /// without a connection creates one on the non-initiator side.
    pub async fn handle_signal(
        &self,
        peer: &ClientId,
        payload: SignalPayload,
    ) -> Result<(), TransportError> {
        if self.connection(peer).is_err() {
            self.create_peer(peer, false)?;
        }
        let conn = self.connection(peer)?;

        match payload {
            SignalPayload::Offer(desc) => {
                conn.set_remote_description(desc).await?;
                self.flush_candidates(peer, &conn).await?;
                let answer = conn.create_answer().await?;
                let _ = self.events.send(MeshEvent::Signal {
                    peer: peer.clone(),
                    payload: SignalPayload::Answer(answer),
                });
            }
            SignalPayload::Answer(desc) => {
                conn.set_remote_description(desc).await?;
                self.flush_candidates(peer, &conn).await?;
            }
            SignalPayload::Candidate(candidate) => {
                let ready = {
                    let mut inner = self.lock();
                    match inner.peers.get_mut(peer) {
                        Some(slot) if slot.has_remote => true,
                        Some(slot) => {
                            slot.pending_candidates.push(candidate.clone());
                            false
                        }
                        None => return Err(TransportError::UnknownPeer(peer.clone())),
                    }
                };
                if ready {
                    conn.add_ice_candidate(candidate).await?;
                } else {
                    tracing::trace!(peer = %peer, "Buffered candidate until remote description");
                }
            }
        }
        Ok(())
    }

    async fn flush_candidates(
        &self,
        peer: &ClientId,
        conn: &Arc<C::Connection>,
    ) -> Result<(), TransportError> {
        let buffered = {
            let mut inner = self.lock();
            match inner.peers.get_mut(peer) {
                Some(slot) => {
                    slot.has_remote = true;
                    std::mem::take(&mut slot.pending_candidates)
                }
                None => Vec::new(),
            }
        };
        for candidate in buffered {
            conn.add_ice_candidate(candidate).await?;
        }
        Ok(())
    }

    fn open_connections(&self) -> Vec<(ClientId, Arc<C::Connection>)> {
        let inner = self.lock();
        if inner.destroyed {
            return Vec::new();
        }
        inner
            .peers
            .iter()
            .filter(|(_, slot)| slot.conn.channel_state() == ChannelState::Open)
            .map(|(id, slot)| (id.clone(), Arc::clone(&slot.conn)))
            .collect()
    }

    /// Send a frame over every open channel. Returns how many accepted it.
    pub fn broadcast(&self, data: &[u8]) -> usize {
        let mut delivered = 0;
        for (peer, conn) in self.open_connections() {
            match conn.send(data) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::debug!(peer = %peer, "Broadcast send failed: {}", e),
            }
        }
        delivered
    }

    /// Send a frame to one peer. Returns `false` if its channel is not open
    /// or the send failed, so the caller can fall back to the relay.
    pub fn send_to(&self, peer: &ClientId, data: &[u8]) -> bool {
        let Ok(conn) = self.connection(peer) else {
            return false;
        };
        if conn.channel_state() != ChannelState::Open {
            return false;
        }
        match conn.send(data) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(peer = %peer, "Send failed: {}", e);
                false
            }
        }
    }

    /// Whether the channel to `peer` is open.
    pub fn has_open_channel(&self, peer: &ClientId) -> bool {
        self.connection(peer)
            .map(|conn| conn.channel_state() == ChannelState::Open)
            .unwrap_or(false)
    }

    /// Close and forget the connection to `peer`.
    pub fn remove_peer(&self, peer: &ClientId) {
        let slot = self.lock().peers.remove(peer);
        if let Some(slot) = slot {
            slot.conn.close();
            tracing::debug!(peer = %peer, "Peer removed");
        }
    }

    /// Close every connection. Safe to call more than once.
    pub fn destroy(&self) {
        let slots: Vec<PeerSlot<C::Connection>> = {
            let mut inner = self.lock();
            if inner.destroyed {
                return;
            }
            inner.destroyed = true;
            inner.peers.drain().map(|(_, slot)| slot).collect()
        };
        for slot in slots {
            slot.conn.close();
        }
        tracing::debug!(local = %self.local, "Mesh destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockNetwork;
    use room_types::SessionDescription;

    fn mesh(network: &MockNetwork, id: &str) -> (Mesh<crate::transport::MockConnector>, mpsc::UnboundedReceiver<MeshEvent>) {
        Mesh::new(ClientId::new(id), network.connector())
    }

    /// Forward every pending signal between two meshes until both are quiet.
    async fn pump(
        a: &Mesh<crate::transport::MockConnector>,
        a_rx: &mut mpsc::UnboundedReceiver<MeshEvent>,
        b: &Mesh<crate::transport::MockConnector>,
        b_rx: &mut mpsc::UnboundedReceiver<MeshEvent>,
    ) -> Vec<MeshEvent> {
        let mut other = Vec::new();
        loop {
            let mut progressed = false;
            while let Ok(event) = a_rx.try_recv() {
                progressed = true;
                match event {
                    MeshEvent::Signal { payload, .. } => {
                        b.handle_signal(a.local_id(), payload).await.unwrap()
                    }
                    e => other.push(e),
                }
            }
            while let Ok(event) = b_rx.try_recv() {
                progressed = true;
                match event {
                    MeshEvent::Signal { payload, .. } => {
                        a.handle_signal(b.local_id(), payload).await.unwrap()
                    }
                    e => other.push(e),
                }
            }
            if !progressed {
                return other;
            }
        }
    }

    // ===========================================
    // Negotiation
    // ===========================================

    #[tokio::test]
    async fn offer_answer_opens_both_channels() {
        let network = MockNetwork::new();
        let (a, mut a_rx) = mesh(&network, "a");
        let (b, mut b_rx) = mesh(&network, "b");

        a.create_peer(&ClientId::new("b"), true).unwrap();
        a.create_offer(&ClientId::new("b")).await.unwrap();
        let events = pump(&a, &mut a_rx, &b, &mut b_rx).await;

        assert!(events.contains(&MeshEvent::ChannelOpen(ClientId::new("b"))));
        assert!(events.contains(&MeshEvent::ChannelOpen(ClientId::new("a"))));
        assert!(a.has_open_channel(&ClientId::new("b")));
        assert!(b.has_open_channel(&ClientId::new("a")));
        assert_eq!(b.is_initiator_for(&ClientId::new("a")), Some(false));
    }

    #[tokio::test]
    async fn offer_for_unknown_peer_fails() {
        let network = MockNetwork::new();
        let (a, _rx) = mesh(&network, "a");
        let err = a.create_offer(&ClientId::new("nobody")).await.unwrap_err();
        assert!(matches!(err, TransportError::UnknownPeer(_)));
    }

    #[tokio::test]
    async fn early_candidates_are_buffered_not_dropped() {
        let network = MockNetwork::new();
        let (b, _rx) = mesh(&network, "b");
        let a_id = ClientId::new("a");

        b.handle_signal(&a_id, SignalPayload::Candidate(IceCandidate::new("c1")))
            .await
            .unwrap();
        b.handle_signal(&a_id, SignalPayload::Candidate(IceCandidate::new("c2")))
            .await
            .unwrap();
        assert!(network.applied_candidates("b", "a").is_empty());

        b.handle_signal(&a_id, SignalPayload::Offer(SessionDescription::offer("sdp")))
            .await
            .unwrap();
        let applied: Vec<String> = network
            .applied_candidates("b", "a")
            .into_iter()
            .map(|c| c.candidate)
            .collect();
        assert_eq!(applied, ["c1", "c2"]);

        // After the remote description, candidates apply immediately.
        b.handle_signal(&a_id, SignalPayload::Candidate(IceCandidate::new("c3")))
            .await
            .unwrap();
        assert_eq!(network.applied_candidates("b", "a").len(), 3);
    }

    // ===========================================
    // Traffic
    // ===========================================

    #[tokio::test]
    async fn send_only_over_open_channels() {
        let network = MockNetwork::new();
        let (a, mut a_rx) = mesh(&network, "a");
        let (b, mut b_rx) = mesh(&network, "b");
        let b_id = ClientId::new("b");

        a.create_peer(&b_id, true).unwrap();
        assert!(!a.send_to(&b_id, b"early"));
        assert_eq!(a.broadcast(b"early"), 0);

        a.create_offer(&b_id).await.unwrap();
        pump(&a, &mut a_rx, &b, &mut b_rx).await;

        assert!(a.send_to(&b_id, b"hello"));
        assert_eq!(a.broadcast(b"all"), 1);
        let received = pump(&a, &mut a_rx, &b, &mut b_rx).await;
        let frames: Vec<Vec<u8>> = received
            .into_iter()
            .filter_map(|e| match e {
                MeshEvent::Message { data, .. } => Some(data),
                _ => None,
            })
            .collect();
        assert_eq!(frames, vec![b"hello".to_vec(), b"all".to_vec()]);
    }

    #[tokio::test]
    async fn remove_peer_closes_remote_side() {
        let network = MockNetwork::new();
        let (a, mut a_rx) = mesh(&network, "a");
        let (b, mut b_rx) = mesh(&network, "b");
        a.create_peer(&ClientId::new("b"), true).unwrap();
        a.create_offer(&ClientId::new("b")).await.unwrap();
        pump(&a, &mut a_rx, &b, &mut b_rx).await;

        a.remove_peer(&ClientId::new("b"));
        let events = pump(&a, &mut a_rx, &b, &mut b_rx).await;
        assert!(events.contains(&MeshEvent::ChannelClosed(ClientId::new("a"))));
        assert!(a.peers().is_empty());
        assert!(!b.has_open_channel(&ClientId::new("a")));
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let network = MockNetwork::new();
        let (a, _rx) = mesh(&network, "a");
        a.create_peer(&ClientId::new("b"), true).unwrap();
        a.destroy();
        a.destroy();
        assert!(a.peers().is_empty());
        assert!(matches!(
            a.create_peer(&ClientId::new("c"), true),
            Err(TransportError::Destroyed)
        ));
    }
}
