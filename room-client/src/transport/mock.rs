//! Mock transport for testing.
//!
//! [`MockNetwork`] is an in-memory switchboard. Each [`MockConnection`] is
//! one endpoint `(local, remote)`; the channel opens once both endpoints of
//! a pair hold a local and a remote description, mimicking offer/answer.
//! Frames can be dropped per direction and links can be cut to simulate
//! loss and disconnects.

use super::{ChannelState, PeerConnection, PeerConnector, PeerEvents, TransportError};
use async_trait::async_trait;
use room_types::{ClientId, IceCandidate, SessionDescription};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Link = (ClientId, ClientId);

/// In-memory network shared by every mesh in a test.
#[derive(Debug, Clone, Default)]
pub struct MockNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

#[derive(Debug, Default)]
struct NetworkInner {
    endpoints: HashMap<Link, Endpoint>,
    lossy: HashSet<Link>,
    fail_offers: HashMap<ClientId, u32>,
    offers_attempted: HashMap<ClientId, u32>,
    frames_sent: HashMap<Link, u32>,
}

#[derive(Debug)]
struct Endpoint {
    events: PeerEvents,
    has_local: bool,
    has_remote: bool,
    open: bool,
    closed: bool,
    applied: Vec<IceCandidate>,
}

impl NetworkInner {
    /// Open both ends of a pair once negotiation is complete.
    fn maybe_open(&mut self, local: &ClientId, remote: &ClientId) {
        let ours = (local.clone(), remote.clone());
        let theirs = (remote.clone(), local.clone());
        let ready = |e: Option<&Endpoint>| {
            e.is_some_and(|e| e.has_local && e.has_remote && !e.open && !e.closed)
        };
        if !(ready(self.endpoints.get(&ours)) && ready(self.endpoints.get(&theirs))) {
            return;
        }
        for link in [ours, theirs] {
            if let Some(endpoint) = self.endpoints.get_mut(&link) {
                endpoint.open = true;
                endpoint.events.channel_open();
            }
        }
    }

    /// Close the far end of a pair, reporting it there.
    fn close_remote(&mut self, local: &ClientId, remote: &ClientId) {
        if let Some(endpoint) = self.endpoints.get_mut(&(remote.clone(), local.clone())) {
            if endpoint.open {
                endpoint.open = false;
                endpoint.closed = true;
                endpoint.events.channel_closed();
            }
        }
    }
}

impl MockNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A connector attached to this network.
    pub fn connector(&self) -> MockConnector {
        MockConnector {
            network: self.clone(),
        }
    }

    /// Drop (or stop dropping) every frame sent from `from` to `to`.
    ///
    /// The sender still sees a successful send, as with a lossy link.
    pub fn set_lossy(&self, from: &str, to: &str, lossy: bool) {
        let link = (ClientId::new(from), ClientId::new(to));
        let mut inner = self.lock();
        if lossy {
            inner.lossy.insert(link);
        } else {
            inner.lossy.remove(&link);
        }
    }

    /// Cut the link between two peers, closing both channels.
    pub fn cut(&self, a: &str, b: &str) {
        let (a, b) = (ClientId::new(a), ClientId::new(b));
        let mut inner = self.lock();
        inner.close_remote(&a, &b);
        inner.close_remote(&b, &a);
    }

    /// Make the next `count` offers created by `local` fail.
    pub fn fail_next_offers(&self, local: &str, count: u32) {
        self.lock().fail_offers.insert(ClientId::new(local), count);
    }

    /// Offers `local` has attempted so far, failed ones included.
    pub fn offers_attempted(&self, local: &str) -> u32 {
        self.lock()
            .offers_attempted
            .get(&ClientId::new(local))
            .copied()
            .unwrap_or(0)
    }

    /// Frames `from` handed to the link towards `to`, dropped ones included.
    pub fn frames_sent(&self, from: &str, to: &str) -> u32 {
        self.lock()
            .frames_sent
            .get(&(ClientId::new(from), ClientId::new(to)))
            .copied()
            .unwrap_or(0)
    }

    /// Remote candidates applied on the `local -> remote` endpoint.
    pub fn applied_candidates(&self, local: &str, remote: &str) -> Vec<IceCandidate> {
        self.lock()
            .endpoints
            .get(&(ClientId::new(local), ClientId::new(remote)))
            .map(|e| e.applied.clone())
            .unwrap_or_default()
    }
}

/// Connector handing out [`MockConnection`]s on a [`MockNetwork`].
#[derive(Debug, Clone)]
pub struct MockConnector {
    network: MockNetwork,
}

impl PeerConnector for MockConnector {
    type Connection = MockConnection;

    fn connect(
        &self,
        local: &ClientId,
        remote: &ClientId,
        events: PeerEvents,
    ) -> Result<Arc<MockConnection>, TransportError> {
        self.network.lock().endpoints.insert(
            (local.clone(), remote.clone()),
            Endpoint {
                events,
                has_local: false,
                has_remote: false,
                open: false,
                closed: false,
                applied: Vec::new(),
            },
        );
        Ok(Arc::new(MockConnection {
            network: self.network.clone(),
            local: local.clone(),
            remote: remote.clone(),
        }))
    }
}

/// One endpoint on a [`MockNetwork`].
#[derive(Debug)]
pub struct MockConnection {
    network: MockNetwork,
    local: ClientId,
    remote: ClientId,
}

impl MockConnection {
    fn link(&self) -> Link {
        (self.local.clone(), self.remote.clone())
    }

    fn with_endpoint<T>(
        &self,
        f: impl FnOnce(&mut Endpoint) -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let mut inner = self.network.lock();
        match inner.endpoints.get_mut(&self.link()) {
            Some(endpoint) if !endpoint.closed => f(endpoint),
            _ => Err(TransportError::ChannelNotOpen),
        }
    }
}

#[async_trait]
impl PeerConnection for MockConnection {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        {
            let mut inner = self.network.lock();
            *inner.offers_attempted.entry(self.local.clone()).or_default() += 1;
            if let Some(remaining) = inner.fail_offers.get_mut(&self.local) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(TransportError::Negotiation("injected offer failure".into()));
                }
            }
        }
        self.with_endpoint(|e| {
            e.has_local = true;
            e.events
                .local_candidate(IceCandidate::new(format!("candidate:{}", self.local)));
            Ok(())
        })?;
        Ok(SessionDescription::offer(format!(
            "offer:{}->{}",
            self.local, self.remote
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        self.with_endpoint(|e| {
            if !e.has_remote {
                return Err(TransportError::Negotiation("no remote offer".into()));
            }
            e.has_local = true;
            e.events
                .local_candidate(IceCandidate::new(format!("candidate:{}", self.local)));
            Ok(())
        })?;
        self.network.lock().maybe_open(&self.local, &self.remote);
        Ok(SessionDescription::answer(format!(
            "answer:{}->{}",
            self.local, self.remote
        )))
    }

    async fn set_remote_description(&self, _desc: SessionDescription) -> Result<(), TransportError> {
        self.with_endpoint(|e| {
            e.has_remote = true;
            Ok(())
        })?;
        self.network.lock().maybe_open(&self.local, &self.remote);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.with_endpoint(|e| {
            if !e.has_remote {
                return Err(TransportError::Negotiation(
                    "candidate before remote description".into(),
                ));
            }
            e.applied.push(candidate);
            Ok(())
        })
    }

    fn open_channel(&self) {}

    fn channel_state(&self) -> ChannelState {
        let inner = self.network.lock();
        match inner.endpoints.get(&self.link()) {
            Some(e) if e.open => ChannelState::Open,
            Some(e) if !e.closed => ChannelState::Connecting,
            _ => ChannelState::Closed,
        }
    }

    fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.network.lock();
        let link = self.link();
        if !inner.endpoints.get(&link).is_some_and(|e| e.open) {
            return Err(TransportError::ChannelNotOpen);
        }
        *inner.frames_sent.entry(link.clone()).or_default() += 1;
        if inner.lossy.contains(&link) {
            return Ok(());
        }
        match inner.endpoints.get(&(self.remote.clone(), self.local.clone())) {
            Some(remote) if remote.open => {
                remote.events.message(data.to_vec());
                Ok(())
            }
            _ => Err(TransportError::SendFailed("remote end closed".into())),
        }
    }

    fn close(&self) {
        let mut inner = self.network.lock();
        inner.endpoints.remove(&self.link());
        inner.close_remote(&self.local, &self.remote);
    }
}
