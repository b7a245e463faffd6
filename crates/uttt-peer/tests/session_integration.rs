//! End-to-end session test over loopback TCP: discovery entry → accept →
//! handshake → mutual readiness → game start → mirrored moves →
//! disconnect.
//!
//! Exercises both endpoints through the same public API a hosting façade
//! uses: the arbiter on the accepting side, the accept loop on the passive
//! side, and the event pump + per-identity registry on both.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use uttt_core::{ActiveBoard, Announcement, GamePhase, Mark};
use uttt_peer::application::{run_session_events, PeerEntry, PeerRegistry};
use uttt_peer::infrastructure::network::{
    spawn_accept_loop, ConnectionArbiter, DiscoveryBroadcaster, PendingRequestRegistry,
    PeerSession, SessionRole,
};

/// One wired endpoint: session, event pump, and per-identity registry.
struct Endpoint {
    session: Arc<PeerSession>,
    peers: Arc<PeerRegistry>,
}

impl Endpoint {
    fn new(identity: &str) -> Self {
        let (session, events) = PeerSession::new(identity);
        let peers = Arc::new(PeerRegistry::new());
        tokio::spawn(run_session_events(
            Arc::clone(&peers),
            Arc::clone(&session),
            events,
        ));
        Self { session, peers }
    }
}

/// Polls `predicate` for up to five seconds.
async fn wait_until(mut predicate: impl FnMut() -> bool) {
    for _ in 0..100 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached within the poll window");
}

/// Polls until `lookup` yields a value.
async fn wait_for<T>(mut lookup: impl FnMut() -> Option<T>) -> T {
    for _ in 0..100 {
        if let Some(value) = lookup() {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("value not available within the poll window");
}

/// Builds an arbiter for `endpoint` whose registry already holds a pending
/// request for `remote` at `port` on loopback.
fn arbiter_with_pending(
    endpoint: &Endpoint,
    remote: &str,
    port: u16,
) -> (ConnectionArbiter, Arc<PendingRequestRegistry>) {
    let pending = Arc::new(PendingRequestRegistry::new(
        endpoint.session.local_identity(),
    ));
    pending.record(
        &Announcement {
            identity: remote.to_string(),
            advertised_addr: "127.0.0.1".to_string(),
            listen_port: port,
            sequence: 0,
        },
        "127.0.0.1".parse().unwrap(),
    );
    let broadcaster = Arc::new(DiscoveryBroadcaster::new(
        0,
        "127.0.0.1:39990".parse().unwrap(),
        Duration::from_secs(1),
        Arc::clone(&endpoint.session),
    ));
    let arbiter = ConnectionArbiter::new(
        Arc::clone(&pending),
        broadcaster,
        Arc::clone(&endpoint.session),
    )
    .with_connect_timeout(Duration::from_secs(1));
    (arbiter, pending)
}

/// Drives both endpoints to a connected, started game.  Returns the two
/// entries with `alice` (the acceptor) holding the opening turn.
async fn connect_and_start(alice: &Endpoint, bob: &Endpoint) -> (Arc<PeerEntry>, Arc<PeerEntry>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    spawn_accept_loop(listener, Arc::clone(&bob.session));

    let (arbiter, pending) = arbiter_with_pending(alice, "bob", port);
    arbiter.accept("bob").await.expect("accept must succeed");
    assert!(pending.list().is_empty());

    let alice_peers = Arc::clone(&alice.peers);
    let bob_peers = Arc::clone(&bob.peers);
    let entry_a = wait_for(move || alice_peers.get("bob")).await;
    let entry_b = wait_for(move || bob_peers.get("alice")).await;

    let both = entry_a.mark_ready().await;
    assert!(!both, "one-sided readiness must not report both-ready");
    entry_b.mark_ready().await;

    {
        let entry_a = Arc::clone(&entry_a);
        wait_until(move || entry_a.phase() == GamePhase::InProgress).await;
    }
    {
        let entry_b = Arc::clone(&entry_b);
        wait_until(move || entry_b.phase() == GamePhase::InProgress).await;
    }
    (entry_a, entry_b)
}

#[tokio::test]
async fn test_accept_upgrades_to_connected_session_with_roles() {
    let alice = Endpoint::new("alice");
    let bob = Endpoint::new("bob");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    spawn_accept_loop(listener, Arc::clone(&bob.session));

    let (arbiter, pending) = arbiter_with_pending(&alice, "bob", port);
    arbiter.accept("bob").await.expect("accept must succeed");

    assert!(alice.session.is_connected());
    assert_eq!(alice.session.role(), Some(SessionRole::Acceptor));
    assert_eq!(alice.session.remote_identity().as_deref(), Some("bob"));
    assert!(
        pending.list().is_empty(),
        "a successful accept leaves the registry empty"
    );

    // The passive side learns the acceptor's identity from the handshake.
    let bob_session = Arc::clone(&bob.session);
    wait_until(move || bob_session.remote_identity().as_deref() == Some("alice")).await;
    assert_eq!(bob.session.role(), Some(SessionRole::Listener));
}

#[tokio::test]
async fn test_readiness_handshake_starts_acceptor_first() {
    let alice = Endpoint::new("alice");
    let bob = Endpoint::new("bob");
    let (entry_a, entry_b) = connect_and_start(&alice, &bob).await;

    assert!(entry_a.both_ready());
    assert!(entry_b.both_ready());
    assert!(entry_a.is_my_turn(), "the accepting side moves first");
    assert!(!entry_b.is_my_turn());
}

#[tokio::test]
async fn test_moves_mirror_across_the_wire() {
    let alice = Endpoint::new("alice");
    let bob = Endpoint::new("bob");
    let (entry_a, entry_b) = connect_and_start(&alice, &bob).await;

    let outcome = entry_a.play(0, 0, 1, 1).await.expect("legal opening move");
    assert!(!outcome.game_over);
    assert_eq!(outcome.sub_board_result, None);
    assert_eq!(entry_a.active_board(), ActiveBoard::At(1, 1));

    {
        let entry_b = Arc::clone(&entry_b);
        wait_until(move || entry_b.is_my_turn()).await;
    }
    assert_eq!(
        entry_b.active_board(),
        ActiveBoard::At(1, 1),
        "both sides must agree on the next active sub-board"
    );

    entry_b.play(1, 1, 2, 2).await.expect("legal reply");
    {
        let entry_a = Arc::clone(&entry_a);
        wait_until(move || entry_a.is_my_turn()).await;
    }
    assert_eq!(entry_a.active_board(), ActiveBoard::At(2, 2));

    // Mark assignment is deterministic: the first mover plays X.
    assert_eq!(entry_a.my_mark(), Some(Mark::X));
    assert_eq!(entry_b.my_mark(), Some(Mark::O));
    assert_eq!(outcome.winner, None);
    assert!(!outcome.is_draw);
}

#[tokio::test]
async fn test_leave_delivers_reason_to_both_sides() {
    let alice = Endpoint::new("alice");
    let bob = Endpoint::new("bob");
    let (entry_a, _entry_b) = connect_and_start(&alice, &bob).await;

    entry_a.leave("Opponent left the game").await;

    let bob_session = Arc::clone(&bob.session);
    wait_until(move || !bob_session.is_connected()).await;
    assert_eq!(
        bob.session.take_status().as_deref(),
        Some("Opponent left the game"),
        "the remaining side observes the carried reason"
    );
    assert_eq!(
        alice.session.take_status().as_deref(),
        Some("You left the game")
    );
    assert!(
        bob.session.take_status().is_none(),
        "status is delivered at most once"
    );

    // The pump tears down the per-identity entries.
    let alice_peers = Arc::clone(&alice.peers);
    wait_until(move || alice_peers.get("bob").is_none()).await;
    let bob_peers = Arc::clone(&bob.peers);
    wait_until(move || bob_peers.get("alice").is_none()).await;
}

#[tokio::test]
async fn test_further_inbound_connection_is_refused_while_connected() {
    let alice = Endpoint::new("alice");
    let bob = Endpoint::new("bob");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    spawn_accept_loop(listener, Arc::clone(&bob.session));

    let (arbiter, _pending) = arbiter_with_pending(&alice, "bob", port);
    arbiter.accept("bob").await.expect("accept must succeed");

    // A third party connecting to bob is dropped immediately.
    let intruder = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .unwrap();
    use tokio::io::AsyncReadExt;
    let mut intruder = intruder;
    let mut buf = [0u8; 1];
    let n = intruder.read(&mut buf).await.unwrap_or(0);
    assert_eq!(n, 0, "extra inbound connection must be closed");
    assert!(bob.session.is_connected(), "the first session survives");
}
