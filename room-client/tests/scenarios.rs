//! End-to-end room scenarios.
//!
//! Every scenario runs real sessions over the in-memory mesh, relay and
//! store; nothing is mocked below the seams.

use cardroom_client::{
    JoinRequest, MockConnector, MockNetwork, MockSignaling, MockSignalingHub, RoomSession,
    SessionConfig, SessionError, SessionUpdate,
};
use room_core::{hydrate_snapshot, ManualClock, MockRules, Phase, RoundLabel};
use room_store::{KvBackend, MemoryBackend, PlayerProfile, RoomStore, SqliteBackend, StoreSettings};
use room_types::{Action, ActionId, ClientId, RoomId};
use std::sync::Arc;
use std::time::Duration;

const START: i64 = 1_700_000_000_000;

type Session<B> = RoomSession<MockRules, B, MockConnector, MockSignaling>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct World<B: KvBackend> {
    store: RoomStore<B>,
    network: MockNetwork,
    hub: MockSignalingHub,
}

impl<B: KvBackend> World<B> {
    fn new(store: RoomStore<B>) -> Self {
        init_tracing();
        Self {
            store,
            network: MockNetwork::new(),
            hub: MockSignalingHub::new(),
        }
    }

    async fn join(&self, id: &str) -> Session<B> {
        RoomSession::join(
            Arc::new(MockRules),
            self.store.clone(),
            JoinRequest {
                room_id: RoomId::new("R"),
                player: PlayerProfile::new(id, id.to_uppercase()),
                expected_players: 2,
            },
            self.network.connector(),
            self.hub.client(id),
            &SessionConfig::default(),
        )
        .await
        .unwrap()
    }
}

fn memory_world() -> (World<MemoryBackend>, ManualClock) {
    let clock = ManualClock::new(START);
    let store = RoomStore::new(Arc::new(MemoryBackend::new()), StoreSettings::default())
        .with_clock(Arc::new(clock.clone()));
    (World::new(store), clock)
}

/// Process updates until the session has been quiet for a moment.
async fn drain<B: KvBackend>(session: &mut Session<B>) -> Vec<SessionUpdate> {
    let mut updates = Vec::new();
    while let Ok(Some(update)) =
        tokio::time::timeout(Duration::from_millis(100), session.next_update()).await
    {
        updates.push(update);
    }
    updates
}

/// Process updates until `done` holds.
async fn wait_for<B: KvBackend>(session: &mut Session<B>, done: impl Fn(&Session<B>) -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !done(session) {
            session.next_update().await;
        }
    })
    .await
    .expect("condition not reached");
}

fn ready(player: &str) -> Action {
    Action::new("ready").by(&ClientId::new(player))
}

fn play(player: &str, card: u64) -> Action {
    Action::new("play").by(&ClientId::new(player)).with("card", card)
}

fn ids(log: &[ActionId]) -> Vec<&str> {
    log.iter().map(ActionId::as_str).collect()
}

// ============================================================================
// Store convergence
// ============================================================================

/// Host creates, guest joins, each appends a ready; independent fetches
/// hydrate to the same log.
#[tokio::test]
async fn independent_fetches_hydrate_to_same_log() {
    let backend = Arc::new(MemoryBackend::new());
    let host_store = RoomStore::new(Arc::clone(&backend), StoreSettings::default());
    let guest_store = RoomStore::new(Arc::clone(&backend), StoreSettings::default());
    let room = RoomId::new("R");
    let host = ClientId::new("host");
    let guest = ClientId::new("guest");

    host_store
        .create_room(&MockRules, &room, &PlayerProfile::new("host", "Host"), 2)
        .await
        .unwrap();
    guest_store
        .join_room(&MockRules, &room, &PlayerProfile::new("guest", "Guest"), 2)
        .await
        .unwrap();

    let a1 = Action::with_id(ActionId::new("A1"), "ready").by(&host);
    let a2 = Action::with_id(ActionId::new("A2"), "ready").by(&guest);
    assert!(host_store.append_action(&room, &host, &a1, None).await.unwrap().is_some());
    assert!(guest_store.append_action(&room, &guest, &a2, None).await.unwrap().is_some());

    for store in [&host_store, &guest_store] {
        let snapshot = store.fetch_room_snapshot(&room, false).await.unwrap().unwrap();
        let hydration = hydrate_snapshot(&MockRules, &snapshot);
        assert!(hydration.is_complete());
        assert_eq!(ids(&hydration.state.action_log), vec!["A1", "A2"]);
        assert_eq!(hydration.state.phase, Phase::Playing);
    }
}

/// Two round resets with the same stale epoch: the first rotates, the
/// second changes nothing.
#[tokio::test]
async fn double_round_reset_with_stale_epoch() {
    let store = RoomStore::new(Arc::new(MemoryBackend::new()), StoreSettings::default());
    let room = RoomId::new("R");
    let created = store
        .create_room(&MockRules, &room, &PlayerProfile::new("host", "Host"), 2)
        .await
        .unwrap();
    store
        .join_room(&MockRules, &room, &PlayerProfile::new("guest", "Guest"), 2)
        .await
        .unwrap();
    let stale = created.meta.current_game_id.clone();

    let first = store
        .reset_round_session(&MockRules, &room, Some(&stale))
        .await
        .unwrap();
    assert_ne!(first.meta.current_game_id, stale);

    let second = store
        .reset_round_session(&MockRules, &room, Some(&stale))
        .await
        .unwrap();
    assert_eq!(second.meta, first.meta);
    assert_eq!(second.game_state, first.game_state);
}

// ============================================================================
// Sessions
// ============================================================================

/// Actions dispatched on both sides end up in both local states.
#[tokio::test(start_paused = true)]
async fn sessions_converge_on_both_actions() {
    let (world, _clock) = memory_world();
    let mut host = world.join("host").await;
    let mut guest = world.join("guest").await;
    drain(&mut host).await;
    drain(&mut guest).await;

    let a1 = ready("host");
    let a2 = ready("guest");
    assert!(host.dispatch(a1.clone()).await.unwrap().persisted);
    drain(&mut guest).await;
    assert!(guest.dispatch(a2.clone()).await.unwrap().persisted);
    drain(&mut host).await;
    drain(&mut guest).await;

    let expected = vec![a1.id.clone(), a2.id.clone()];
    assert_eq!(host.state().action_log, expected);
    assert_eq!(guest.state().action_log, expected);
    assert_eq!(host.state().phase, Phase::Playing);
}

/// With the direct link dropping everything, the store alone converges
/// the guest.
#[tokio::test(start_paused = true)]
async fn store_path_covers_a_dead_link() {
    let (world, _clock) = memory_world();
    let mut host = world.join("host").await;
    let mut guest = world.join("guest").await;
    drain(&mut host).await;
    drain(&mut guest).await;
    world.network.set_lossy("host", "guest", true);
    world.hub.set_relay_enabled(false);

    let action = ready("host");
    host.dispatch(action.clone()).await.unwrap();
    wait_for(&mut guest, |s| s.state().action_log.len() == 1).await;
    assert_eq!(guest.state().action_log, vec![action.id]);
}

/// An action stuck on a dead link when the epoch rotates never lands in
/// the next epoch, even once the link recovers.
#[tokio::test(start_paused = true)]
async fn late_retransmit_does_not_cross_epochs() {
    let (world, _clock) = memory_world();
    let mut host = world.join("host").await;
    let mut guest = world.join("guest").await;
    drain(&mut host).await;
    drain(&mut guest).await;
    world.network.set_lossy("host", "guest", true);
    world.hub.set_relay_enabled(false);

    host.dispatch(ready("host")).await.unwrap();
    wait_for(&mut guest, |s| s.state().action_log.len() == 1).await;

    let next = host.restart_game().await.unwrap();
    wait_for(&mut guest, |s| s.game_id() == &next).await;
    world.network.set_lossy("host", "guest", false);

    tokio::time::sleep(Duration::from_secs(40)).await;
    drain(&mut guest).await;
    drain(&mut host).await;

    assert_eq!(guest.game_id(), &next);
    assert!(guest.state().action_log.is_empty());
    assert!(host.state().action_log.is_empty());
    let stored = world
        .store
        .fetch_room_snapshot(&RoomId::new("R"), false)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.actions.is_empty());
}

/// A joiner against a full room is refused.
#[tokio::test(start_paused = true)]
async fn third_player_is_refused() {
    let (world, _clock) = memory_world();
    let _host = world.join("host").await;
    let _guest = world.join("guest").await;

    let err = RoomSession::join(
        Arc::new(MockRules),
        world.store.clone(),
        JoinRequest {
            room_id: RoomId::new("R"),
            player: PlayerProfile::new("late", "Late"),
            expected_players: 2,
        },
        world.network.connector(),
        world.hub.client("late"),
        &SessionConfig::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Store(room_store::StoreError::RoomFull { .. })
    ));
}

// ============================================================================
// Round control
// ============================================================================

/// The dealer goes silent during scoring: the other player waits out the
/// countdown, then takes over and deals the next round.
#[tokio::test(start_paused = true)]
async fn stale_dealer_is_taken_over() {
    let (world, clock) = memory_world();
    let mut host = world.join("host").await;
    let mut guest = world.join("guest").await;
    drain(&mut host).await;
    drain(&mut guest).await;

    // Host sits in seat 0 and deals; guest leads.
    let script = [
        ("host", ready("host")),
        ("guest", ready("guest")),
        ("guest", play("guest", 3)),
        ("host", play("host", 5)),
        ("guest", play("guest", 2)),
        ("host", play("host", 7)),
    ];
    for (who, action) in script {
        let (actor, other) = if who == "host" {
            (&mut host, &mut guest)
        } else {
            (&mut guest, &mut host)
        };
        actor.dispatch(action).await.unwrap();
        drain(other).await;
    }
    assert_eq!(host.state().phase, Phase::Scoring);
    assert_eq!(guest.state().phase, Phase::Scoring);
    assert_eq!(host.round_status().label, RoundLabel::NextRound);

    // Dealer stalls: no more heartbeats, presence record left behind.
    drop(host);
    clock.advance(20_000);
    drain(&mut guest).await;

    let waiting = guest.round_status();
    assert!(!waiting.can_start_next_round);
    assert_eq!(
        waiting.label,
        RoundLabel::WaitingForDealer {
            remaining: Duration::from_secs(25)
        }
    );
    assert!(matches!(
        guest.start_next_round().await,
        Err(SessionError::RoundLocked(_))
    ));

    clock.advance(25_000);
    let takeover = guest.round_status();
    assert!(takeover.can_start_next_round);
    assert_eq!(takeover.label, RoundLabel::TakeOver);

    let before = guest.game_id().clone();
    let after = guest.start_next_round().await.unwrap();
    assert_ne!(after, before);
    assert_eq!(guest.state().phase, Phase::Lobby);
    assert!(guest.state().action_log.is_empty());
    // The deal passes on from the host to the guest's seat.
    assert_eq!(guest.state().dealer, 1);
}

// ============================================================================
// Polled backend
// ============================================================================

/// Without push support the sessions still converge by polling.
#[tokio::test]
async fn sqlite_backend_converges_by_polling() {
    let backend = SqliteBackend::in_memory().await.unwrap();
    let settings = StoreSettings {
        poll_interval_ms: 20,
        ..StoreSettings::default()
    };
    let world = World::new(RoomStore::new(Arc::new(backend), settings));
    let mut host = world.join("host").await;
    let mut guest = world.join("guest").await;
    wait_for(&mut host, |s| !s.state().seats[1].placeholder).await;

    world.network.set_lossy("host", "guest", true);
    world.hub.set_relay_enabled(false);
    let action = ready("host");
    assert!(host.dispatch(action.clone()).await.unwrap().persisted);

    wait_for(&mut guest, |s| s.state().action_log.len() == 1).await;
    assert_eq!(guest.state().action_log, vec![action.id]);
}
