//! End-to-end session tests against a live server on loopback

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tablecast::game::{Effect, Table};
use tablecast::network::{
    ClientConfig, Connection, GameClient, Server, ServerConfig, ServerEvent,
    SessionId, Threshold,
};
use tablecast::protocol::{ErrorCode, Message, PlayerAction, RoundResult};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

const SEED: u64 = 0x7ab1e;
const WAIT: Duration = Duration::from_secs(5);

fn table_config(max_players: usize, join_window: Duration) -> ServerConfig {
    ServerConfig::new(0)
        .with_name("test table")
        .with_join_window(join_window)
        .with_max_players(max_players)
        .with_deck_seed(SEED)
}

async fn start_server(max_players: usize, join_window: Duration) -> (Server, SocketAddr) {
    start_with(table_config(max_players, join_window)).await
}

async fn start_with(config: ServerConfig) -> (Server, SocketAddr) {
    let mut server = Server::new(config);
    let addr = server.start().await.unwrap();
    (server, SocketAddr::from(([127, 0, 0, 1], addr.port())))
}

async fn connect(addr: SocketAddr) -> Connection {
    let stream = TcpStream::connect(addr).await.unwrap();
    Connection::new(stream, addr)
}

async fn next(conn: &mut Connection) -> Message {
    tokio::time::timeout(WAIT, conn.recv())
        .await
        .expect("timed out waiting for server")
        .expect("connection failed")
}

/// Connect and get past Welcome/PlayerName
async fn join(addr: SocketAddr, name: &str) -> Connection {
    let mut conn = connect(addr).await;
    assert!(matches!(next(&mut conn).await, Message::Welcome { .. }));
    conn.send(&Message::PlayerName {
        name: name.to_string(),
    })
    .await
    .unwrap();
    conn
}

async fn wait_for<F>(events: &mut mpsc::Receiver<ServerEvent>, mut pred: F) -> ServerEvent
where
    F: FnMut(&ServerEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event stream closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn messages_for(seat: usize, effects: &[Effect]) -> Vec<Message> {
    effects
        .iter()
        .filter_map(Effect::to_message)
        .filter(|(s, _)| *s == seat)
        .map(|(_, m)| m)
        .collect()
}

/// Read until this player's Outcome arrives without ever acting
async fn idle_until_outcome(conn: &mut Connection) -> Message {
    loop {
        if let outcome @ Message::Outcome { .. } = next(conn).await {
            return outcome;
        }
    }
}

async fn ready(conn: &mut Connection, name: &str) {
    conn.send(&Message::PlayerName {
        name: name.to_string(),
    })
    .await
    .unwrap();
}

/// Play until this player's Outcome arrives, standing whenever asked
async fn stand_until_outcome(conn: &mut Connection) -> Message {
    loop {
        match next(conn).await {
            Message::Deal { your_turn: true, .. } => {
                conn.send(&Message::Action(PlayerAction::Stand)).await.unwrap();
            }
            outcome @ Message::Outcome { .. } => return outcome,
            _ => {}
        }
    }
}

#[tokio::test]
async fn test_round_matches_seeded_table() {
    let (_server, addr) = start_server(4, Duration::from_millis(200)).await;

    let mut conn = connect(addr).await;
    assert_eq!(
        next(&mut conn).await,
        Message::Welcome {
            server_name: "test table".to_string()
        }
    );
    conn.send(&Message::PlayerName {
        name: "Ann".to_string(),
    })
    .await
    .unwrap();

    // First round on a fresh server shuffles with seed + 1.
    let mut table = Table::new(1, SEED.wrapping_add(1));
    let dealt = table.deal().unwrap();
    let first = next(&mut conn).await;
    match &first {
        Message::Deal { hand, dealer, .. } => {
            assert_eq!(hand.len(), 2);
            assert_eq!(dealer.len(), 1);
        }
        other => panic!("expected Deal, got {:?}", other),
    }

    let mut expected = messages_for(0, &dealt).into_iter();
    assert_eq!(Some(first), expected.next());
    for message in expected {
        assert_eq!(next(&mut conn).await, message);
    }

    let mut action = PlayerAction::Hit;
    let mut last = None;
    while table.current_turn() == Some(0) {
        conn.send(&Message::Action(action)).await.unwrap();
        for message in messages_for(0, &table.act(0, action).unwrap()) {
            let received = next(&mut conn).await;
            assert_eq!(received, message);
            last = Some(received);
        }
        action = PlayerAction::Stand;
    }

    assert!(table.is_settled());
    assert!(
        last.is_none() || matches!(last, Some(Message::Outcome { .. })),
        "round should end with an Outcome"
    );

    conn.send(&Message::Bye).await.unwrap();
}

#[tokio::test]
async fn test_hit_after_outcome_is_illegal() {
    // A full table would start the next round at once if the player were requeued.
    let (_server, addr) = start_server(1, Duration::from_millis(50)).await;

    let mut conn = join(addr, "Ann").await;
    for _ in 0..3 {
        stand_until_outcome(&mut conn).await;

        conn.send(&Message::Action(PlayerAction::Hit)).await.unwrap();
        assert_eq!(
            next(&mut conn).await,
            Message::Error {
                code: ErrorCode::IllegalAction,
                message: "illegal action".to_string(),
            }
        );

        ready(&mut conn, "Ann").await;
    }

    // Still connected: Bye is accepted and the server closes its side.
    conn.send(&Message::Bye).await.unwrap();
    let closed = loop {
        match tokio::time::timeout(WAIT, conn.recv()).await.unwrap() {
            Ok(_) => continue,
            Err(e) => break e,
        }
    };
    assert!(closed.is_disconnect());
}

#[tokio::test]
async fn test_session_sits_out_until_ready() {
    let (_server, addr) = start_server(1, Duration::from_millis(50)).await;

    let mut conn = join(addr, "Ann").await;
    stand_until_outcome(&mut conn).await;

    let quiet = tokio::time::timeout(Duration::from_millis(400), conn.recv()).await;
    assert!(quiet.is_err(), "no round may start before the player asks");

    ready(&mut conn, "Ann").await;
    assert!(matches!(next(&mut conn).await, Message::Deal { .. }));
}

#[tokio::test]
async fn test_idle_player_is_stood_after_turn_timeout() {
    let config = table_config(1, Duration::from_millis(50))
        .with_timeouts(Duration::from_millis(200), Duration::from_secs(30));
    let (_server, addr) = start_with(config).await;

    let mut conn = join(addr, "Ann").await;
    match idle_until_outcome(&mut conn).await {
        Message::Outcome { result, .. } => assert_ne!(result, RoundResult::Bust),
        other => panic!("expected Outcome, got {:?}", other),
    }
}

#[tokio::test]
async fn test_turn_clock_restarts_after_each_action() {
    let config = table_config(1, Duration::from_millis(50))
        .with_timeouts(Duration::from_millis(600), Duration::from_secs(30));
    let (_server, addr) = start_with(config).await;

    let mut conn = join(addr, "Ann").await;
    for _ in 0..12 {
        let my_turn = loop {
            match next(&mut conn).await {
                Message::Deal { your_turn: true, .. } => break true,
                Message::Outcome { .. } => break false,
                _ => {}
            }
        };

        if my_turn {
            tokio::time::sleep(Duration::from_millis(400)).await;
            conn.send(&Message::Action(PlayerAction::Hit)).await.unwrap();

            match next(&mut conn).await {
                Message::Deal { your_turn: true, .. } => {
                    // Without a fresh clock the turn would expire 200 ms after the hit.
                    let quiet = tokio::time::timeout(Duration::from_millis(400), conn.recv()).await;
                    assert!(quiet.is_err(), "player was stood before the clock ran out");

                    conn.send(&Message::Action(PlayerAction::Stand)).await.unwrap();
                    assert!(matches!(next(&mut conn).await, Message::Outcome { .. }));
                    return;
                }
                Message::Outcome { .. } => {}
                _ => {
                    idle_until_outcome(&mut conn).await;
                }
            }
        }

        ready(&mut conn, "Ann").await;
    }
    panic!("no hand survived a hit");
}

#[tokio::test]
async fn test_round_deadline_settles_round() {
    let config = table_config(2, Duration::from_secs(5))
        .with_timeouts(Duration::from_secs(30), Duration::from_millis(300));
    let (mut server, addr) = start_with(config).await;
    let mut events = server.take_event_receiver().unwrap();

    let started = Instant::now();
    let mut ann = join(addr, "Ann").await;
    wait_for(&mut events, |e| matches!(e, ServerEvent::SessionJoined { .. })).await;
    let mut bob = join(addr, "Bob").await;

    assert!(matches!(idle_until_outcome(&mut ann).await, Message::Outcome { .. }));
    assert!(matches!(idle_until_outcome(&mut bob).await, Message::Outcome { .. }));
    wait_for(&mut events, |e| matches!(e, ServerEvent::RoundSettled { .. })).await;

    assert!(started.elapsed() < Duration::from_secs(30));
}

#[tokio::test]
async fn test_unnamed_session_is_closed() {
    let config = table_config(4, Duration::from_secs(30))
        .with_name_timeout(Duration::from_millis(200));
    let (mut server, addr) = start_with(config).await;
    let mut events = server.take_event_receiver().unwrap();

    let mut conn = connect(addr).await;
    assert!(matches!(next(&mut conn).await, Message::Welcome { .. }));

    let closed = tokio::time::timeout(WAIT, conn.recv()).await.unwrap();
    assert!(matches!(closed, Err(ref e) if e.is_disconnect()));

    match wait_for(&mut events, |e| matches!(e, ServerEvent::SessionLeft { .. })).await {
        ServerEvent::SessionLeft { name, .. } => assert!(name.is_none()),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_action_before_round_is_illegal() {
    let (_server, addr) = start_server(4, Duration::from_secs(30)).await;

    let mut conn = join(addr, "Early").await;
    conn.send(&Message::Action(PlayerAction::Stand)).await.unwrap();
    assert!(matches!(
        next(&mut conn).await,
        Message::Error {
            code: ErrorCode::IllegalAction,
            ..
        }
    ));
}

#[tokio::test]
async fn test_invalid_name_keeps_session_open() {
    let (_server, addr) = start_server(1, Duration::from_millis(100)).await;

    let mut conn = connect(addr).await;
    assert!(matches!(next(&mut conn).await, Message::Welcome { .. }));

    conn.send(&Message::PlayerName {
        name: "   ".to_string(),
    })
    .await
    .unwrap();
    assert!(matches!(
        next(&mut conn).await,
        Message::Error {
            code: ErrorCode::InvalidName,
            ..
        }
    ));

    conn.send(&Message::PlayerName {
        name: "Bea".to_string(),
    })
    .await
    .unwrap();
    assert!(matches!(next(&mut conn).await, Message::Deal { .. }));
}

#[tokio::test]
async fn test_disconnect_does_not_disturb_other_player() {
    let (mut server, addr) = start_server(2, Duration::from_secs(5)).await;
    let mut events = server.take_event_receiver().unwrap();

    let mut ann = join(addr, "Ann").await;
    wait_for(&mut events, |e| matches!(e, ServerEvent::SessionJoined { name, .. } if name == "Ann")).await;
    let mut bob = join(addr, "Bob").await;

    // The table is full, so the round starts without waiting out the window.
    assert!(matches!(next(&mut ann).await, Message::Deal { .. }));
    let bob_first = next(&mut bob).await;
    assert!(matches!(bob_first, Message::Deal { .. }));

    drop(ann);
    if matches!(bob_first, Message::Deal { your_turn: true, .. }) {
        bob.send(&Message::Action(PlayerAction::Stand)).await.unwrap();
    }

    // Bob can still play the round out and leave cleanly.
    assert!(matches!(stand_until_outcome(&mut bob).await, Message::Outcome { .. }));
    bob.send(&Message::Bye).await.unwrap();

    let mut left = None;
    let mut settled = None;
    tokio::time::timeout(WAIT, async {
        while left.is_none() || settled.is_none() {
            match events.recv().await.expect("event stream closed") {
                event @ ServerEvent::SessionLeft { .. } if left.is_none() => left = Some(event),
                event @ ServerEvent::RoundSettled { .. } => settled = Some(event),
                _ => {}
            }
        }
    })
    .await
    .expect("timed out waiting for events");

    match left {
        Some(ServerEvent::SessionLeft { name, reason, .. }) => {
            assert_eq!(name.as_deref(), Some("Ann"));
            assert_eq!(reason, "disconnected");
        }
        other => panic!("unexpected {:?}", other),
    }
    match settled {
        Some(ServerEvent::RoundSettled { results, .. }) => {
            let ann = results.iter().find(|r| r.name == "Ann").unwrap();
            let bob = results.iter().find(|r| r.name == "Bob").unwrap();
            assert!(ann.result.is_none(), "Ann forfeited");
            assert!(bob.result.is_some());
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_out_of_turn_action_rejected() {
    let (mut server, addr) = start_server(2, Duration::from_secs(5)).await;
    let mut events = server.take_event_receiver().unwrap();

    let mut ann = join(addr, "Ann").await;
    wait_for(&mut events, |e| matches!(e, ServerEvent::SessionJoined { .. })).await;
    let mut bob = join(addr, "Bob").await;

    let ann_turn = matches!(next(&mut ann).await, Message::Deal { your_turn: true, .. });
    let bob_deal = next(&mut bob).await;
    if !ann_turn {
        // Ann drew a natural; nothing to check this time.
        return;
    }
    assert!(matches!(bob_deal, Message::Deal { your_turn: false, .. }));

    bob.send(&Message::Action(PlayerAction::Hit)).await.unwrap();
    assert_eq!(next(&mut bob).await, Message::error(ErrorCode::NotYourTurn));
}

#[tokio::test]
async fn test_protocol_violation_closes_only_that_session() {
    let (_server, addr) = start_server(4, Duration::from_secs(30)).await;

    let mut good = join(addr, "Good").await;

    let mut raw = TcpStream::connect(addr).await.unwrap();
    tokio::io::AsyncWriteExt::write_all(&mut raw, &[0x42, 0, 0, 0, 0])
        .await
        .unwrap();
    let mut bad = Connection::new(raw, addr);
    assert!(matches!(next(&mut bad).await, Message::Welcome { .. }));
    let closed = tokio::time::timeout(WAIT, bad.recv()).await.unwrap();
    assert!(matches!(closed, Err(ref e) if e.is_disconnect()));

    // The other session still answers.
    good.send(&Message::Action(PlayerAction::Hit)).await.unwrap();
    assert!(matches!(next(&mut good).await, Message::Error { .. }));
}

#[tokio::test]
async fn test_observer_sees_round_and_can_act() {
    let (mut server, addr) = start_server(1, Duration::from_millis(100)).await;
    let mut events = server.take_event_receiver().unwrap();

    let mut conn = join(addr, "Cy").await;

    let joined = wait_for(&mut events, |e| matches!(e, ServerEvent::SessionJoined { .. })).await;
    let session: SessionId = match joined {
        ServerEvent::SessionJoined { session, .. } => session,
        _ => unreachable!(),
    };
    assert_eq!(server.sessions().len(), 1);

    wait_for(&mut events, |e| matches!(e, ServerEvent::HandDealt { .. })).await;
    let next_event = wait_for(&mut events, |e| {
        matches!(
            e,
            ServerEvent::ActionRequested { .. } | ServerEvent::RoundSettled { .. }
        )
    })
    .await;

    let settled_on_deal = matches!(next_event, ServerEvent::RoundSettled { .. });
    if !settled_on_deal {
        server
            .submit_action(session, PlayerAction::Stand)
            .await
            .unwrap();
    }

    let outcome = loop {
        if let outcome @ Message::Outcome { .. } = next(&mut conn).await {
            break outcome;
        }
    };
    assert!(matches!(outcome, Message::Outcome { .. }));

    if !settled_on_deal {
        wait_for(&mut events, |e| matches!(e, ServerEvent::RoundSettled { round: 1, .. })).await;
    }
}

#[tokio::test]
async fn test_client_plays_several_rounds() {
    let (_server, addr) = start_server(1, Duration::from_millis(50)).await;

    let client = GameClient::connect(addr, &ClientConfig::new("Robo"))
        .await
        .unwrap();
    assert_eq!(client.server_name(), "test table");

    let summary = tokio::time::timeout(
        Duration::from_secs(10),
        client.play(3, &mut Threshold::default()),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(summary.rounds(), 3);
}

#[tokio::test]
async fn test_stop_says_bye() {
    let (mut server, addr) = start_server(4, Duration::from_secs(30)).await;
    let mut events = server.take_event_receiver().unwrap();

    let mut conn = join(addr, "Dee").await;
    wait_for(&mut events, |e| matches!(e, ServerEvent::SessionJoined { .. })).await;

    server.stop().await.unwrap();
    assert_eq!(next(&mut conn).await, Message::Bye);
    wait_for(&mut events, |e| matches!(e, ServerEvent::Stopped)).await;
}
