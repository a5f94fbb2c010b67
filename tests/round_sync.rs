//! Host and client replicas driven tick by tick over loopback links

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

use golf_server::game::{
    ClientSession, ClubId, Course, GameRound, HoleData, PhysicsConfig, RoundConfig, RoundHandle,
    RoundPhase, Surface, Swing, TerrainBuilder, Vec2, Vec3,
};
use golf_server::net::LoopbackEnd;
use golf_server::util::time::SIMULATION_TPS;
use golf_server::ws::protocol::ServerMsg;

const COURSE_ID: &str = "meadow";

fn course() -> Course {
    let mut builder = TerrainBuilder::new();
    builder
        .add_quad(Vec2::new(-60.0, -20.0), Vec2::new(60.0, 200.0), 0.0, Surface::Fairway)
        .add_quad(Vec2::new(-10.0, 140.0), Vec2::new(10.0, 160.0), 0.01, Surface::Green);
    let hole = HoleData::in_memory(
        4,
        Vec3::zeros(),
        Vec3::new(0.0, 0.0, 150.0),
        Vec3::new(0.0, 0.0, 120.0),
        builder.build().unwrap(),
    );
    Course {
        id: COURSE_ID.to_string(),
        title: "Meadow".to_string(),
        holes: vec![Arc::new(hole)],
    }
}

/// Two small greens where a gentle putt from the tee drops
fn putting_course() -> Course {
    let holes = [(Vec3::zeros(), 3), (Vec3::new(2.0, 0.0, 0.0), 2)]
        .into_iter()
        .map(|(tee, par)| {
            let mut builder = TerrainBuilder::new();
            builder.add_quad(Vec2::new(-5.0, -5.0), Vec2::new(7.0, 5.0), 0.0, Surface::Green);
            Arc::new(HoleData::in_memory(
                par,
                tee,
                tee + Vec3::new(0.0, 0.0, 0.15),
                tee + Vec3::new(0.0, 0.0, 2.0),
                builder.build().unwrap(),
            ))
        })
        .collect();
    Course {
        id: "putting-green".to_string(),
        title: "Putting green".to_string(),
        holes,
    }
}

fn host() -> (GameRound, RoundHandle) {
    let config = RoundConfig {
        seed: 7,
        hole_transition_secs: 0.5,
        ..RoundConfig::default()
    };
    GameRound::new(Uuid::new_v4(), course(), Arc::new(PhysicsConfig::default()), config)
}

async fn join(round: &mut GameRound, handle: &RoundHandle, name: &str, capacity: usize) -> ClientSession {
    join_course(round, handle, name, capacity, course()).await
}

async fn join_course(
    round: &mut GameRound,
    handle: &RoundHandle,
    name: &str,
    capacity: usize,
    course: Course,
) -> ClientSession {
    let (host_end, client_end) = LoopbackEnd::pair(capacity);
    assert_ok!(
        handle
            .connect(Uuid::new_v4(), name.to_string(), Box::new(host_end))
            .await
    );
    round.tick();

    let mut client = ClientSession::new(
        Box::new(client_end),
        Arc::new(PhysicsConfig::default()),
        PathBuf::from("unused"),
    );
    client.preload(course);
    assert_ok!(client.tick());
    client
}

fn pump(round: &mut GameRound, clients: &mut [&mut ClientSession], ticks: u32) {
    for _ in 0..ticks {
        round.tick();
        for client in clients.iter_mut() {
            assert_ok!(client.tick());
        }
    }
}

fn iron() -> Swing {
    Swing {
        club: ClubId::NineIron,
        power: 0.9,
        aim: 0.0,
        spin: [0.0, 0.0],
        accuracy: 0.0,
    }
}

fn putt(power: f32) -> Swing {
    Swing {
        club: ClubId::Putter,
        power,
        aim: 0.0,
        spin: [0.0, 0.0],
        accuracy: 0.0,
    }
}

/// Tick until the host has the player's ball at rest again
fn play_out(round: &mut GameRound, clients: &mut [&mut ClientSession], player: Uuid) {
    pump(round, clients, 2);
    for _ in 0..(SIMULATION_TPS * 60) {
        if round.director().ball(player).is_some_and(|b| b.is_idle()) {
            break;
        }
        pump(round, clients, 1);
    }
    assert!(round.director().ball(player).unwrap().is_idle());
}

#[tokio::test]
async fn clients_converge_on_the_host_result() {
    let (mut round, handle) = host();
    let mut alice = join(&mut round, &handle, "alice", 64).await;
    let mut bob = join(&mut round, &handle, "bob", 64).await;
    let alice_id = alice.player_id().unwrap();
    let bob_id = bob.player_id().unwrap();
    assert!(alice.is_owner());
    assert!(!bob.is_owner());

    assert_ok!(alice.start_round());
    pump(&mut round, &mut [&mut alice, &mut bob], 1);
    assert_eq!(alice.phase(), RoundPhase::Playing);
    assert!(alice.is_my_turn());
    assert_eq!(bob.active_player(), Some(alice_id));

    assert_ok!(alice.take_shot(iron()));
    play_out(&mut round, &mut [&mut alice, &mut bob], alice_id);

    let truth = round.director().ball(alice_id).unwrap().clone();
    assert!(truth.position.z > 40.0);
    for client in [&alice, &bob] {
        let replica = client.ball(alice_id).unwrap();
        assert!(replica.is_idle());
        assert_eq!(replica.position, truth.position);
    }

    // bob is still on the tee, furthest from the pin
    assert_eq!(alice.active_player(), Some(bob_id));
    assert!(bob.is_my_turn());
    assert_eq!(round.director().record(alice_id).unwrap().strokes, 1);
}

#[tokio::test]
async fn duplicate_shot_input_is_ignored() {
    let (mut round, handle) = host();
    let mut alice = join(&mut round, &handle, "alice", 64).await;
    let alice_id = alice.player_id().unwrap();
    assert_ok!(alice.start_round());
    pump(&mut round, &mut [&mut alice], 1);

    let shot = assert_ok!(alice.take_shot(iron()));
    pump(&mut round, &mut [&mut alice], 1);
    let in_flight = round.director().ball(alice_id).unwrap().clone();
    assert!(in_flight.state.is_moving());

    // same sequence again, then a lower one, while the ball is still moving
    assert_ok!(alice.resend_shot(shot));
    assert_ok!(alice.resend_shot(golf_server::game::ShotCommand { sequence: 0, ..shot }));
    play_out(&mut round, &mut [&mut alice], alice_id);

    let turn_events = alice
        .drain_notifications()
        .into_iter()
        .filter(|m| matches!(m, ServerMsg::TurnEvent { .. }))
        .count();
    assert_eq!(turn_events, 1);
    assert_eq!(round.director().record(alice_id).unwrap().strokes, 1);
    assert_eq!(round.director().ball(alice_id).unwrap().last_sequence, Some(shot.sequence));
}

#[tokio::test]
async fn late_joiner_converges_without_earlier_snapshots() {
    let (mut round, handle) = host();
    let mut alice = join(&mut round, &handle, "alice", 64).await;
    let alice_id = alice.player_id().unwrap();
    assert_ok!(alice.start_round());
    pump(&mut round, &mut [&mut alice], 1);

    assert_ok!(alice.take_shot(iron()));
    pump(&mut round, &mut [&mut alice], 40);
    assert!(round.director().ball(alice_id).unwrap().state.is_moving());

    let mut carol = join(&mut round, &handle, "carol", 64).await;
    assert_eq!(carol.phase(), RoundPhase::Playing);
    assert_eq!(carol.active_player(), Some(alice_id));
    assert!(carol.ball(alice_id).unwrap().state.is_moving());

    play_out(&mut round, &mut [&mut alice, &mut carol], alice_id);
    let truth = round.director().ball(alice_id).unwrap().position;
    assert_eq!(carol.ball(alice_id).unwrap().position, truth);
}

#[tokio::test]
async fn congested_snapshot_link_still_converges() {
    let (mut round, handle) = host();
    let mut alice = join(&mut round, &handle, "alice", 64).await;
    // one slot for unreliable traffic, and the client only polls now and then
    let mut dave = join(&mut round, &handle, "dave", 1).await;
    let alice_id = alice.player_id().unwrap();
    assert_ok!(alice.start_round());
    pump(&mut round, &mut [&mut alice, &mut dave], 1);

    assert_ok!(alice.take_shot(iron()));
    for _ in 0..(SIMULATION_TPS * 60) {
        round.tick();
        assert_ok!(alice.tick());
        if round.tick_count() % 15 == 0 {
            assert_ok!(dave.tick());
        }
        if round.director().ball(alice_id).is_some_and(|b| b.is_idle()) && round.tick_count() > 10 {
            break;
        }
    }
    assert_ok!(dave.tick());

    let truth = round.director().ball(alice_id).unwrap().position;
    assert_eq!(dave.ball(alice_id).unwrap().position, truth);
    assert!(dave.ball(alice_id).unwrap().is_idle());
}

#[tokio::test]
async fn fast_forward_lands_where_the_host_does() {
    let (mut round, handle) = host();
    let mut alice = join(&mut round, &handle, "alice", 64).await;
    let alice_id = alice.player_id().unwrap();
    assert_ok!(alice.start_round());
    pump(&mut round, &mut [&mut alice], 1);

    assert_ok!(alice.take_shot(iron()));
    // let the host finish without the client applying anything
    for _ in 0..(SIMULATION_TPS * 60) {
        round.tick();
        if round.tick_count() > 10 && round.director().ball(alice_id).is_some_and(|b| b.is_idle()) {
            break;
        }
    }

    assert!(assert_ok!(alice.fast_forward(alice_id)));
    let truth = round.director().ball(alice_id).unwrap().position;
    assert_eq!(alice.ball(alice_id).unwrap().position, truth);
}

#[tokio::test]
async fn owner_only_lobby_controls() {
    let (mut round, handle) = host();
    let mut alice = join(&mut round, &handle, "alice", 64).await;
    let mut bob = join(&mut round, &handle, "bob", 64).await;

    assert_ok!(bob.start_round());
    pump(&mut round, &mut [&mut alice, &mut bob], 1);
    assert_eq!(round.phase(), RoundPhase::Lobby);
    assert!(bob.last_error().is_some_and(|e| e.starts_with("not_allowed")));

    assert_ok!(alice.select_course("no-such-course"));
    for _ in 0..200 {
        pump(&mut round, &mut [&mut alice, &mut bob], 1);
        if alice.last_error().is_some_and(|e| e.starts_with("course_load_failed")) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(alice.last_error().is_some_and(|e| e.starts_with("course_load_failed")));
    assert_eq!(alice.course_id(), Some(COURSE_ID));
}

#[tokio::test]
async fn losing_the_host_is_fatal_for_the_client() {
    let (mut round, handle) = host();
    let mut alice = join(&mut round, &handle, "alice", 64).await;
    drop(round);

    let err = assert_err!(alice.tick());
    assert!(err.is_fatal());
    assert!(handle.is_closed());
}

#[tokio::test]
async fn every_client_follows_the_round_onto_the_next_hole() {
    let config = RoundConfig {
        seed: 11,
        hole_transition_secs: 0.5,
        ..RoundConfig::default()
    };
    let (mut round, handle) = GameRound::new(
        Uuid::new_v4(),
        putting_course(),
        Arc::new(PhysicsConfig::default()),
        config,
    );
    let mut alice = join_course(&mut round, &handle, "alice", 64, putting_course()).await;
    let mut bob = join_course(&mut round, &handle, "bob", 64, putting_course()).await;
    let alice_id = alice.player_id().unwrap();
    let bob_id = bob.player_id().unwrap();
    let first_hole = handle.current_hole();

    assert_ok!(alice.start_round());
    pump(&mut round, &mut [&mut alice, &mut bob], 1);

    // a zero-power putt leaves alice on the tee, still first to play
    assert_ok!(alice.take_shot(putt(0.0)));
    play_out(&mut round, &mut [&mut alice, &mut bob], alice_id);
    assert_eq!(round.director().record(alice_id).unwrap().strokes, 1);
    assert!(alice.is_my_turn());

    assert_ok!(alice.take_shot(putt(0.1)));
    play_out(&mut round, &mut [&mut alice, &mut bob], alice_id);
    assert!(round.director().record(alice_id).unwrap().is_finished());
    assert!(bob.is_my_turn());

    assert_ok!(bob.take_shot(putt(0.1)));
    play_out(&mut round, &mut [&mut alice, &mut bob], bob_id);
    assert_eq!(round.director().record(bob_id).unwrap().strokes, 1);
    alice.drain_notifications();
    bob.drain_notifications();

    pump(&mut round, &mut [&mut alice, &mut bob], SIMULATION_TPS);
    assert_eq!(round.director().hole_index(), 1);

    let current = handle.current_hole();
    assert!(!Arc::ptr_eq(&current, &first_hole));
    assert!(Arc::ptr_eq(&current, round.director().hole()));
    assert_eq!(current.tee, Vec3::new(2.0, 0.0, 0.0));

    for client in [&mut alice, &mut bob] {
        let msgs = client.drain_notifications();
        let changed = msgs
            .iter()
            .position(|m| matches!(m, ServerMsg::HoleChanged { hole, .. } if hole.index == 1))
            .unwrap();
        assert!(msgs[changed..]
            .iter()
            .any(|m| matches!(m, ServerMsg::WindTarget { .. })));

        assert_eq!(client.hole_index(), Some(1));
        // bob holed in one and has the honour
        assert_eq!(client.active_player(), Some(bob_id));
        for id in [alice_id, bob_id] {
            let replica = client.ball(id).unwrap();
            assert!(replica.is_idle());
            assert_eq!(replica.position, round.director().ball(id).unwrap().position);
            assert_eq!(replica.position.x, 2.0);
        }
    }
    assert_eq!(alice.wind().target_vector(), bob.wind().target_vector());

    assert_ok!(bob.take_shot(putt(0.1)));
    play_out(&mut round, &mut [&mut alice, &mut bob], bob_id);
    assert!(alice.is_my_turn());
    assert_ok!(alice.take_shot(putt(0.1)));
    play_out(&mut round, &mut [&mut alice, &mut bob], alice_id);
    pump(&mut round, &mut [&mut alice, &mut bob], SIMULATION_TPS);

    assert_eq!(round.phase(), RoundPhase::Complete);
    let standings = round.director().standings();
    assert_eq!(standings[0].player_id, bob_id);
    assert_eq!(standings[0].strokes, 2);
    assert_eq!(standings[1].strokes, 3);
    for client in [&alice, &bob] {
        assert_eq!(client.phase(), RoundPhase::Complete);
        assert_eq!(client.standings(), standings.as_slice());
    }
}
