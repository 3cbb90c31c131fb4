//! Discovery tests: broadcaster and listener on loopback

use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

use tablecast::discovery::{BroadcastConfig, Broadcaster, Listener};
use tablecast::network::{ClientConfig, GameClient, Server, ServerConfig};

fn loopback(port: u16, interval: Duration) -> BroadcastConfig {
    BroadcastConfig {
        discovery_port: port,
        interval,
        target: IpAddr::V4(Ipv4Addr::LOCALHOST),
    }
}

#[tokio::test]
async fn test_discovery_within_two_intervals() {
    let interval = Duration::from_secs(1);
    let listener = Listener::bind(0).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut broadcaster = Broadcaster::new(loopback(port, interval), 5555);
    broadcaster.start().await.unwrap();

    let started = Instant::now();
    let found = listener.discover(interval * 2).await.unwrap();
    assert!(started.elapsed() <= interval * 2);
    assert_eq!(found.addr.port(), 5555);
    assert_eq!(found.addr.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));

    broadcaster.stop().await.unwrap();
}

#[tokio::test]
async fn test_listener_started_late_still_finds_server() {
    let interval = Duration::from_millis(200);
    let scout = Listener::bind(0).await.unwrap();
    let port = scout.local_addr().unwrap().port();
    drop(scout);

    let mut broadcaster = Broadcaster::new(loopback(port, interval), 6000);
    broadcaster.start().await.unwrap();
    tokio::time::sleep(interval * 3).await;

    let found = tablecast::discovery::discover(port, interval * 2).await.unwrap();
    assert_eq!(found.addr.port(), 6000);

    broadcaster.stop().await.unwrap();
}

#[tokio::test]
async fn test_discover_then_join() {
    let mut server = Server::new(
        ServerConfig::new(0)
            .with_name("found me")
            .with_join_window(Duration::from_secs(30)),
    );
    let game_addr = server.start().await.unwrap();

    let listener = Listener::bind(0).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let mut broadcaster =
        Broadcaster::new(loopback(port, Duration::from_millis(100)), game_addr.port());
    broadcaster.start().await.unwrap();

    let found = listener.discover(Duration::from_secs(2)).await.unwrap();
    let client = GameClient::connect(found.addr, &ClientConfig::new("Ann"))
        .await
        .unwrap();
    assert_eq!(client.server_name(), "found me");
    client.bye().await.unwrap();

    broadcaster.stop().await.unwrap();
    server.stop().await.unwrap();
}
