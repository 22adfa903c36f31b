//! End-to-end tests for joining, replication and failover.
//!
//! Every test runs a whole session on a `LocalNetwork`: one tracker, a few
//! nodes, and crash-stop failures injected by killing nodes or blocking
//! requests.
//!
//! # Test Strategy
//!
//! 1. **Joining**: role assignment, founder uniqueness, full sessions
//! 2. **Moves**: treasure pickup, rejected moves, snapshot consistency
//! 3. **Failover**: primary death, backup death, normal member death
//! 4. **Rediscovery**: members that miss the primary announcement
//! 5. **Leaving**: exit through the primary, backup re-election

use corelib::{
    Cell, Direction, GameState, MemberId, MoveCode, NodeRequest, RequestKind, Role, Service,
    Snapshot,
};
use replication::{LocalNetwork, Node, NodeConfig, Tracker};
use std::sync::Arc;
use std::time::{Duration, Instant};

const DIRECTIONS: [Direction; 4] = [
    Direction::North,
    Direction::South,
    Direction::East,
    Direction::West,
];

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn test_config() -> NodeConfig {
    NodeConfig {
        poll_interval: Duration::from_millis(20),
        join_backoff: Duration::from_millis(20),
        move_retry: Duration::from_millis(20),
        rediscovery_after: None,
        seed: Some(7),
    }
}

fn network(dim: usize, treasures: usize, config: NodeConfig) -> Arc<LocalNetwork> {
    init_tracing();
    LocalNetwork::new(Arc::new(Tracker::new(dim, treasures).unwrap()), config)
}

/// Join `ids` one after another.
async fn session(net: &Arc<LocalNetwork>, ids: &[&str]) -> Vec<Node> {
    let mut nodes = Vec::new();
    for id in ids {
        nodes.push(net.spawn_node(id).await.unwrap());
    }
    nodes
}

fn id(s: &str) -> MemberId {
    MemberId::new(s)
}

/// What a test can observe about one node at one instant.
struct Probe {
    role: Role,
    primary: Option<MemberId>,
    backup: Option<MemberId>,
    state: Option<GameState>,
}

async fn probe(node: &Node) -> Probe {
    Probe {
        role: node.role().await,
        primary: node.primary_id().await,
        backup: node.backup_id().await,
        state: node.game_state().await,
    }
}

/// Poll `node` until `pred` holds.
async fn wait_for(node: &Node, what: &str, pred: impl Fn(&Probe) -> bool) -> Probe {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let p = probe(node).await;
        if pred(&p) {
            return p;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {} on {}",
            what,
            node.id()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn tracker_ids(net: &LocalNetwork) -> Vec<MemberId> {
    net.tracker().members().into_iter().map(|m| m.id).collect()
}

async fn wait_tracker(net: &LocalNetwork, what: &str, pred: impl Fn(&[MemberId]) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !pred(&tracker_ids(net)) {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn member_ids(state: &GameState) -> Vec<MemberId> {
    state.members().iter().map(|m| m.id.clone()).collect()
}

// ============================================================================
// Joining Tests
// ============================================================================

#[tokio::test]
async fn test_scenario_a_roles_in_join_order() {
    let net = network(10, 3, test_config());
    let nodes = session(&net, &["aa", "bb", "cc"]).await;
    let (a, b, c) = (&nodes[0], &nodes[1], &nodes[2]);

    assert_eq!(a.role().await, Role::Primary);
    assert_eq!(b.role().await, Role::Backup);
    assert_eq!(c.role().await, Role::Normal);

    assert_eq!(a.backup_id().await, Some(id("bb")));
    assert_eq!(c.primary_id().await, Some(id("aa")));
    assert_eq!(b.primary_id().await, Some(id("aa")));

    assert_eq!(a.active_watcher(), Some(Role::Primary));
    assert_eq!(b.active_watcher(), Some(Role::Backup));
    assert_eq!(c.active_watcher(), None);

    let info = net.tracker().info();
    assert_eq!((info.dim, info.treasures), (10, 3));
    assert_eq!(tracker_ids(&net), vec![id("aa"), id("bb"), id("cc")]);

    let state = a.game_state().await.unwrap();
    assert_eq!(member_ids(&state), vec![id("aa"), id("bb"), id("cc")]);
    assert_eq!(state.board().treasure_count(), 3);
    assert_eq!(b.game_state().await.unwrap(), state);
    assert_eq!(c.game_state().await.unwrap(), state);
    state.check_invariants().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_elect_one_primary() {
    let net = network(10, 3, test_config());
    let handles: Vec<_> = ["n0", "n1", "n2", "n3", "n4"]
        .into_iter()
        .map(|name| {
            let net = net.clone();
            tokio::spawn(async move { net.spawn_node(name).await.unwrap() })
        })
        .collect();

    let mut nodes = Vec::new();
    for handle in handles {
        nodes.push(handle.await.unwrap());
    }

    let mut roles = Vec::new();
    for node in &nodes {
        roles.push(node.role().await);
    }
    assert_eq!(roles.iter().filter(|r| **r == Role::Primary).count(), 1);
    assert_eq!(roles.iter().filter(|r| **r == Role::Backup).count(), 1);
    assert_eq!(net.tracker().members().len(), 5);

    let primary = &nodes[roles.iter().position(|r| *r == Role::Primary).unwrap()];
    assert_eq!(primary.game_state().await.unwrap().member_count(), 5);
}

#[tokio::test]
async fn test_full_session_admits_after_a_leave() {
    // 2x2 board with 2 treasures holds two players
    let net = network(2, 2, test_config());
    let nodes = session(&net, &["aa", "bb"]).await;
    let (a, b) = (&nodes[0], &nodes[1]);

    let c = net.node("cc");
    let joining = tokio::spawn({
        let c = c.clone();
        async move { c.join().await }
    });
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!joining.is_finished());
    assert!(c.game_state().await.is_none());

    b.play(MoveCode::Exit).await.unwrap();

    let role = tokio::time::timeout(Duration::from_secs(5), joining)
        .await
        .expect("join still blocked")
        .unwrap()
        .unwrap();
    assert_eq!(role, Role::Backup);
    assert_eq!(a.backup_id().await, Some(id("cc")));
    let state = a.game_state().await.unwrap();
    assert_eq!(member_ids(&state), vec![id("aa"), id("cc")]);
}

// ============================================================================
// Move Tests
// ============================================================================

#[tokio::test]
async fn test_scenario_c_treasure_pickup() {
    // 2x2 board with 3 treasures: every neighbour is a treasure and the
    // vacated cell is the only place left for the respawn
    let net = network(2, 3, test_config());
    let a = net.spawn_node("aa").await.unwrap();
    let before = a.game_state().await.unwrap();
    let from = before.position_of(&id("aa")).unwrap();
    let dir = DIRECTIONS
        .into_iter()
        .find(|d| d.step(from, 2).is_some())
        .unwrap();
    let to = dir.step(from, 2).unwrap();

    let after = a.play(MoveCode::Step(dir)).await.unwrap();

    assert_eq!(after.score_of(&id("aa")), Some(1));
    assert_eq!(after.position_of(&id("aa")), Some(to));
    assert_eq!(after.board().treasure_count(), 3);
    assert_eq!(after.board().get(to), Some(&Cell::Member(id("aa"))));
    assert_eq!(after.board().get(from), Some(&Cell::Treasure));
    assert!(after.version() > before.version());
}

#[tokio::test]
async fn test_illegal_move_returns_identical_state() {
    // Four players fill a 2x2 board, so every move is blocked
    let net = network(2, 0, test_config());
    let nodes = session(&net, &["aa", "bb", "cc", "dd"]).await;
    let (a, d) = (&nodes[0], &nodes[3]);
    let before = bincode::serialize(&a.game_state().await.unwrap()).unwrap();

    for dir in DIRECTIONS {
        let reply = d.play(MoveCode::Step(dir)).await.unwrap();
        assert_eq!(bincode::serialize(&reply).unwrap(), before);
    }
    assert_eq!(
        bincode::serialize(&a.game_state().await.unwrap()).unwrap(),
        before
    );
}

#[tokio::test]
async fn test_moves_replicate_to_backup() {
    let net = network(6, 4, test_config());
    let nodes = session(&net, &["aa", "bb", "cc"]).await;
    let (a, b, c) = (&nodes[0], &nodes[1], &nodes[2]);
    let mut views = c.subscribe();

    for dir in DIRECTIONS.into_iter().cycle().take(12) {
        let reply = c.play(MoveCode::Step(dir)).await.unwrap();
        let primary = a.game_state().await.unwrap();
        assert_eq!(reply, primary);
        assert_eq!(b.game_state().await.unwrap(), primary);
        assert_eq!(primary.board().treasure_count(), 4);
        primary.check_invariants().unwrap();
    }

    let refreshed = c.play(MoveCode::Refresh).await.unwrap();
    assert_eq!(refreshed, a.game_state().await.unwrap());

    let view = views.borrow_and_update().clone().unwrap();
    assert_eq!(view.role, Role::Normal);
    assert_eq!(&view.board, refreshed.board());
    assert_eq!(&view.scores, refreshed.scores());
}

#[tokio::test]
async fn test_pushed_snapshot_is_adopted_whole() {
    let net = network(5, 2, test_config());
    let nodes = session(&net, &["aa", "bb", "cc"]).await;
    let (a, c) = (&nodes[0], &nodes[2]);

    let mut pushed = a.game_state().await.unwrap();
    pushed.bump_version();
    c.handle(NodeRequest::UpdateGameState(Snapshot::plain(pushed.clone())))
        .await;
    assert_eq!(c.game_state().await.unwrap(), pushed);

    // The primary owns its state and ignores pushes
    let own = a.game_state().await.unwrap();
    let mut foreign = own.clone();
    foreign.remove_member(&id("cc"));
    a.handle(NodeRequest::UpdateGameState(Snapshot::plain(foreign)))
        .await;
    assert_eq!(a.game_state().await.unwrap(), own);
}

// ============================================================================
// Failover Tests
// ============================================================================

#[tokio::test]
async fn test_scenario_b_backup_takes_over() {
    let net = network(10, 3, test_config());
    let nodes = session(&net, &["aa", "bb", "cc"]).await;
    let (b, c) = (&nodes[1], &nodes[2]);

    net.kill("aa");

    let p = wait_for(b, "promotion", |p| p.role == Role::Primary).await;
    assert_eq!(p.primary, Some(id("bb")));
    assert!(!p.state.unwrap().contains(&id("aa")));
    assert_eq!(b.active_watcher(), Some(Role::Primary));

    wait_for(c, "backup under the new primary", |p| {
        p.primary == Some(id("bb")) && p.role == Role::Backup
    })
    .await;
    assert_eq!(b.backup_id().await, Some(id("cc")));

    let state = c.play(MoveCode::Step(Direction::North)).await.unwrap();
    assert_eq!(member_ids(&state), vec![id("bb"), id("cc")]);
    assert_eq!(state, b.game_state().await.unwrap());

    wait_tracker(&net, "old primary removed", |ids| !ids.contains(&id("aa"))).await;
}

#[tokio::test]
async fn test_primary_death_elects_first_survivor_as_backup() {
    let net = network(10, 3, test_config());
    let nodes = session(&net, &["aa", "bb", "cc", "dd"]).await;
    let (b, c, d) = (&nodes[1], &nodes[2], &nodes[3]);

    net.kill("aa");

    wait_for(b, "promotion", |p| p.role == Role::Primary && p.backup.is_some()).await;
    assert_eq!(b.backup_id().await, Some(id("cc")));
    assert_eq!(c.role().await, Role::Backup);
    assert_eq!(d.role().await, Role::Normal);
    assert_eq!(d.primary_id().await, Some(id("bb")));
}

#[tokio::test]
async fn test_two_sequential_primary_failures() {
    let net = network(10, 3, test_config());
    let nodes = session(&net, &["aa", "bb", "cc", "dd"]).await;
    let (c, d) = (&nodes[2], &nodes[3]);

    net.kill("aa");
    wait_for(c, "backup role", |p| p.role == Role::Backup).await;

    net.kill("bb");
    let p = wait_for(c, "second promotion", |p| {
        p.role == Role::Primary && p.backup.is_some()
    })
    .await;
    assert_eq!(p.backup, Some(id("dd")));
    assert_eq!(member_ids(&p.state.unwrap()), vec![id("cc"), id("dd")]);

    let p = wait_for(d, "backup role", |p| p.role == Role::Backup).await;
    assert_eq!(p.primary, Some(id("cc")));
}

#[tokio::test]
async fn test_backup_death_reelects_backup() {
    let net = network(10, 3, test_config());
    let nodes = session(&net, &["aa", "bb", "cc"]).await;
    let (a, c) = (&nodes[0], &nodes[2]);

    net.kill("bb");

    let p = wait_for(a, "new backup", |p| p.backup == Some(id("cc"))).await;
    assert_eq!(p.role, Role::Primary);
    assert!(!p.state.unwrap().contains(&id("bb")));
    wait_for(c, "backup role", |p| p.role == Role::Backup).await;
    assert_eq!(c.active_watcher(), Some(Role::Backup));
    wait_tracker(&net, "dead backup removed", |ids| !ids.contains(&id("bb"))).await;
}

#[tokio::test]
async fn test_dead_normal_member_is_removed() {
    let net = network(10, 3, test_config());
    let nodes = session(&net, &["aa", "bb", "cc"]).await;
    let (a, b) = (&nodes[0], &nodes[1]);

    net.kill("cc");

    wait_for(b, "removal pushed to backup", |p| {
        p.state.as_ref().is_some_and(|s| !s.contains(&id("cc")))
    })
    .await;
    assert_eq!(a.backup_id().await, Some(id("bb")));
    assert_eq!(a.game_state().await, b.game_state().await);
    wait_tracker(&net, "dead member removed", |ids| !ids.contains(&id("cc"))).await;
}

#[tokio::test]
async fn test_lone_survivor_runs_without_backup() {
    let net = network(10, 3, test_config());
    let nodes = session(&net, &["aa", "bb"]).await;
    let b = &nodes[1];

    net.kill("aa");

    let p = wait_for(b, "promotion", |p| p.role == Role::Primary).await;
    assert_eq!(p.backup, None);
    let state = b.play(MoveCode::Refresh).await.unwrap();
    assert_eq!(member_ids(&state), vec![id("bb")]);
}

#[tokio::test]
async fn test_unresponsive_candidate_is_skipped_for_backup() {
    let net = network(10, 3, test_config());
    let nodes = session(&net, &["aa", "bb", "cc", "dd"]).await;
    let (b, c, d) = (&nodes[1], &nodes[2], &nodes[3]);

    net.block("cc", RequestKind::UpdateGameState);
    net.kill("aa");

    let p = wait_for(b, "promotion", |p| p.role == Role::Primary && p.backup.is_some()).await;
    assert_eq!(p.backup, Some(id("dd")));
    wait_for(d, "backup role", |p| p.role == Role::Backup).await;
    assert_eq!(c.role().await, Role::Normal);
    assert!(p.state.unwrap().contains(&id("cc")));
}

#[tokio::test]
async fn test_primary_watcher_fills_empty_backup_slot() {
    let net = network(10, 3, test_config());
    let nodes = session(&net, &["aa", "bb", "cc", "dd"]).await;
    let (b, d) = (&nodes[1], &nodes[3]);

    net.block("cc", RequestKind::UpdateGameState);
    net.block("dd", RequestKind::UpdateGameState);
    net.kill("aa");

    wait_for(b, "promotion", |p| p.role == Role::Primary).await;
    // Several watcher ticks find nobody willing to take the slot
    tokio::time::sleep(Duration::from_millis(150)).await;
    let p = probe(b).await;
    assert_eq!(p.backup, None);
    assert_eq!(member_ids(&p.state.unwrap()), vec![id("bb"), id("cc"), id("dd")]);

    net.unblock("dd", RequestKind::UpdateGameState);

    wait_for(b, "backup elected by the watcher", |p| p.backup == Some(id("dd"))).await;
    let p = wait_for(d, "backup role", |p| p.role == Role::Backup).await;
    assert_eq!(p.primary, Some(id("bb")));
    assert_eq!(d.active_watcher(), Some(Role::Backup));
}

#[tokio::test]
async fn test_restarted_member_replaces_old_address() {
    let net = network(10, 3, test_config());
    let nodes = session(&net, &["aa", "bb", "cc"]).await;
    let (a, b) = (&nodes[0], &nodes[1]);
    let old = nodes[2].me().clone();

    // Keep the primary from evicting cc before it comes back
    a.stop_watcher();
    net.kill("cc");
    let c = net.spawn_node("cc").await.unwrap();
    assert_ne!(c.me(), &old);

    let state = a.game_state().await.unwrap();
    assert_eq!(state.member(&id("cc")), Some(c.me()));
    assert_eq!(member_ids(&state), vec![id("aa"), id("bb"), id("cc")]);
    state.check_invariants().unwrap();
    assert_eq!(c.role().await, Role::Normal);
    assert_eq!(c.game_state().await.unwrap(), state);

    wait_for(b, "restart pushed to backup", |p| p.state.as_ref() == Some(&state)).await;
    assert!(net.tracker().members().contains(c.me()));
    assert!(!net.tracker().members().contains(&old));
}

// ============================================================================
// Rediscovery Tests
// ============================================================================

/// Four nodes where `dd` never hears that `bb` replaced the dead `aa`.
async fn missed_announcement(config: NodeConfig) -> (Arc<LocalNetwork>, Vec<Node>) {
    let net = network(10, 3, config);
    let nodes = session(&net, &["aa", "bb", "cc", "dd"]).await;
    net.block("dd", RequestKind::UpdateGameState);
    net.kill("aa");
    wait_for(&nodes[1], "promotion", |p| {
        p.role == Role::Primary && p.backup.is_some()
    })
    .await;
    (net, nodes)
}

#[tokio::test]
async fn test_missed_announcement_retries_forever_by_default() {
    let (_net, nodes) = missed_announcement(test_config()).await;
    let d = &nodes[3];

    assert_eq!(d.primary_id().await, Some(id("aa")));
    let attempt = tokio::time::timeout(Duration::from_millis(300), d.play(MoveCode::Refresh)).await;
    assert!(attempt.is_err(), "move should still be retrying");
    assert_eq!(d.primary_id().await, Some(id("aa")));
}

#[tokio::test]
async fn test_missed_announcement_recovers_with_rediscovery() {
    let config = NodeConfig {
        rediscovery_after: Some(2),
        ..test_config()
    };
    let (_net, nodes) = missed_announcement(config).await;
    let (b, d) = (&nodes[1], &nodes[3]);

    let state = tokio::time::timeout(Duration::from_secs(5), d.play(MoveCode::Refresh))
        .await
        .expect("move never reached the new primary")
        .unwrap();

    assert!(!state.contains(&id("aa")));
    assert_eq!(d.primary_id().await, Some(id("bb")));
    assert_eq!(state, b.game_state().await.unwrap());
}

// ============================================================================
// Leave Tests
// ============================================================================

#[tokio::test]
async fn test_normal_member_leaves() {
    let net = network(10, 3, test_config());
    let nodes = session(&net, &["aa", "bb", "cc"]).await;
    let (a, b, c) = (&nodes[0], &nodes[1], &nodes[2]);

    let state = c.play(MoveCode::Exit).await.unwrap();

    assert!(!state.contains(&id("cc")));
    assert_eq!(a.game_state().await.unwrap(), state);
    assert_eq!(b.game_state().await.unwrap(), state);
    assert!(!tracker_ids(&net).contains(&id("cc")));
}

#[tokio::test]
async fn test_backup_leaves_and_is_replaced() {
    let net = network(10, 3, test_config());
    let nodes = session(&net, &["aa", "bb", "cc"]).await;
    let (a, b, c) = (&nodes[0], &nodes[1], &nodes[2]);

    let state = b.leave().await.unwrap();

    assert_eq!(member_ids(&state), vec![id("aa"), id("cc")]);
    assert_eq!(b.active_watcher(), None);
    assert_eq!(a.backup_id().await, Some(id("cc")));
    assert_eq!(c.role().await, Role::Backup);
    assert!(!tracker_ids(&net).contains(&id("bb")));
}

#[tokio::test]
async fn test_leaving_primary_hands_over_when_process_stops() {
    let net = network(10, 3, test_config());
    let nodes = session(&net, &["aa", "bb", "cc"]).await;
    let (a, b) = (&nodes[0], &nodes[1]);

    let state = a.leave().await.unwrap();

    assert!(state.contains(&id("aa")));
    assert_eq!(a.active_watcher(), None);
    assert_eq!(a.role().await, Role::Primary);
    assert!(!tracker_ids(&net).contains(&id("aa")));
    assert_eq!(b.role().await, Role::Backup);

    net.kill("aa");

    let p = wait_for(b, "promotion", |p| p.role == Role::Primary).await;
    assert!(!p.state.unwrap().contains(&id("aa")));
}
