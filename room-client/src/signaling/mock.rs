//! In-memory signaling relay for testing.
//!
//! Implements the relay's room behaviour: membership, peer lists, join and
//! leave notifications, targeted signals and relayed peer messages.

use super::{Signaling, SignalingError};
use async_trait::async_trait;
use room_types::{ClientId, RoomId, SignalingEvent, SignalingMessage};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Shared relay state. Clone to share.
#[derive(Debug, Clone, Default)]
pub struct MockSignalingHub {
    inner: Arc<Mutex<HubInner>>,
}

#[derive(Debug, Default)]
struct HubInner {
    clients: HashMap<ClientId, HubClient>,
    relay_enabled: Option<bool>,
    fail_next_send: Option<String>,
    relayed: u32,
}

#[derive(Debug)]
struct HubClient {
    room: Option<RoomId>,
    events: mpsc::UnboundedSender<SignalingEvent>,
    sent: Vec<SignalingMessage>,
}

impl HubInner {
    fn room_members(&self, room: &RoomId, except: &ClientId) -> Vec<ClientId> {
        let mut members: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|(id, c)| *id != except && c.room.as_ref() == Some(room))
            .map(|(id, _)| id.clone())
            .collect();
        members.sort();
        members
    }

    fn deliver(&self, to: &ClientId, event: SignalingEvent) {
        if let Some(client) = self.clients.get(to) {
            let _ = client.events.send(event);
        }
    }

    fn enter(&mut self, client_id: &ClientId, room_id: &RoomId) {
        let peers = self.room_members(room_id, client_id);
        if let Some(client) = self.clients.get_mut(client_id) {
            client.room = Some(room_id.clone());
        }
        for peer in &peers {
            self.deliver(
                peer,
                SignalingEvent::PeerJoined {
                    peer: client_id.clone(),
                },
            );
        }
        self.deliver(client_id, SignalingEvent::PeerList { peers });
    }
}

impl MockSignalingHub {
    /// Create an empty relay.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A client handle for `id`.
    pub fn client(&self, id: &str) -> MockSignaling {
        MockSignaling {
            hub: self.clone(),
            id: ClientId::new(id),
        }
    }

    /// Stop (or resume) relaying peer messages. Signals still pass.
    pub fn set_relay_enabled(&self, enabled: bool) {
        self.lock().relay_enabled = Some(enabled);
    }

    /// Make the next `send` from any client fail.
    pub fn fail_next_send(&self, error: &str) {
        self.lock().fail_next_send = Some(error.to_string());
    }

    /// Everything `id` has sent to the relay.
    pub fn sent_by(&self, id: &str) -> Vec<SignalingMessage> {
        self.lock()
            .clients
            .get(&ClientId::new(id))
            .map(|c| c.sent.clone())
            .unwrap_or_default()
    }

    /// Number of peer messages relayed so far.
    pub fn relayed_count(&self) -> u32 {
        self.lock().relayed
    }

    /// Whether `id` is connected.
    pub fn is_connected(&self, id: &str) -> bool {
        self.lock().clients.contains_key(&ClientId::new(id))
    }
}

/// One client's connection to a [`MockSignalingHub`].
#[derive(Debug, Clone)]
pub struct MockSignaling {
    hub: MockSignalingHub,
    id: ClientId,
}

#[async_trait]
impl Signaling for MockSignaling {
    async fn connect(
        &self,
        events: mpsc::UnboundedSender<SignalingEvent>,
    ) -> Result<(), SignalingError> {
        self.hub.lock().clients.insert(
            self.id.clone(),
            HubClient {
                room: None,
                events,
                sent: Vec::new(),
            },
        );
        Ok(())
    }

    async fn send(&self, message: SignalingMessage) -> Result<(), SignalingError> {
        let mut hub = self.hub.lock();
        if let Some(error) = hub.fail_next_send.take() {
            return Err(SignalingError::SendFailed(error));
        }
        let Some(client) = hub.clients.get_mut(&self.id) else {
            return Err(SignalingError::NotConnected);
        };
        client.sent.push(message.clone());
        let room = client.room.clone();

        match message {
            SignalingMessage::CreateRoom { room_id, client_id } => {
                hub.deliver(
                    &client_id,
                    SignalingEvent::RoomCreated {
                        room_id: room_id.clone(),
                    },
                );
                hub.enter(&client_id, &room_id);
            }
            SignalingMessage::JoinRoom { room_id, client_id } => {
                hub.enter(&client_id, &room_id);
            }
            SignalingMessage::Signal { to, payload } => {
                hub.deliver(
                    &to,
                    SignalingEvent::Signal {
                        from: self.id.clone(),
                        payload,
                    },
                );
            }
            SignalingMessage::RelayTo { to, message } => {
                if hub.relay_enabled == Some(false) {
                    return Ok(());
                }
                let Some(room) = room else {
                    let event = SignalingEvent::Error {
                        message: "not in a room".into(),
                    };
                    hub.deliver(&self.id, event);
                    return Ok(());
                };
                let targets = match to {
                    Some(to) => vec![to],
                    None => hub.room_members(&room, &self.id),
                };
                for target in targets {
                    hub.relayed += 1;
                    hub.deliver(
                        &target,
                        SignalingEvent::Relay {
                            from: self.id.clone(),
                            message: message.clone(),
                        },
                    );
                }
            }
        }
        Ok(())
    }

    async fn disconnect(&self) {
        let mut hub = self.hub.lock();
        let Some(client) = hub.clients.remove(&self.id) else {
            return;
        };
        if let Some(room) = client.room {
            for peer in hub.room_members(&room, &self.id) {
                hub.deliver(
                    &peer,
                    SignalingEvent::PeerLeft {
                        peer: self.id.clone(),
                    },
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use room_types::{ActionId, PeerMessage};

    async fn connected(
        hub: &MockSignalingHub,
        id: &str,
    ) -> (MockSignaling, mpsc::UnboundedReceiver<SignalingEvent>) {
        let client = hub.client(id);
        let (tx, rx) = mpsc::unbounded_channel();
        client.connect(tx).await.unwrap();
        (client, rx)
    }

    fn join(id: &str) -> SignalingMessage {
        SignalingMessage::JoinRoom {
            room_id: RoomId::new("r"),
            client_id: ClientId::new(id),
        }
    }

    #[tokio::test]
    async fn join_announces_both_ways() {
        let hub = MockSignalingHub::new();
        let (a, mut a_rx) = connected(&hub, "a").await;
        let (b, mut b_rx) = connected(&hub, "b").await;

        a.send(SignalingMessage::CreateRoom {
            room_id: RoomId::new("r"),
            client_id: ClientId::new("a"),
        })
        .await
        .unwrap();
        assert!(matches!(a_rx.recv().await, Some(SignalingEvent::RoomCreated { .. })));
        assert_eq!(
            a_rx.recv().await,
            Some(SignalingEvent::PeerList { peers: vec![] })
        );

        b.send(join("b")).await.unwrap();
        assert_eq!(
            b_rx.recv().await,
            Some(SignalingEvent::PeerList {
                peers: vec![ClientId::new("a")]
            })
        );
        assert_eq!(
            a_rx.recv().await,
            Some(SignalingEvent::PeerJoined {
                peer: ClientId::new("b")
            })
        );

        b.disconnect().await;
        b.disconnect().await;
        assert_eq!(
            a_rx.recv().await,
            Some(SignalingEvent::PeerLeft {
                peer: ClientId::new("b")
            })
        );
    }

    #[tokio::test]
    async fn relay_broadcasts_to_room() {
        let hub = MockSignalingHub::new();
        let (a, _a_rx) = connected(&hub, "a").await;
        let (b, mut b_rx) = connected(&hub, "b").await;
        a.send(join("a")).await.unwrap();
        b.send(join("b")).await.unwrap();
        let _ = b_rx.recv().await;

        let message = PeerMessage::Ack {
            from: ClientId::new("a"),
            action_id: ActionId::new("x"),
        };
        a.send(SignalingMessage::RelayTo {
            to: None,
            message: message.clone(),
        })
        .await
        .unwrap();
        assert_eq!(
            b_rx.recv().await,
            Some(SignalingEvent::Relay {
                from: ClientId::new("a"),
                message
            })
        );
        assert_eq!(hub.relayed_count(), 1);
    }

    #[tokio::test]
    async fn send_before_connect_fails() {
        let hub = MockSignalingHub::new();
        let err = hub.client("x").send(join("x")).await.unwrap_err();
        assert!(matches!(err, SignalingError::NotConnected));
    }
}
