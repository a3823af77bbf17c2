//! Integration tests for the replicated store over real TCP connections
//!
//! Every test starts its own server on an ephemeral port and talks to it
//! through raw framed streams, the way the client's network thread does.

use client::mirror::ClientMirror;
use server::config::ServerConfig;
use server::connection_manager::ConnectionManager;
use server::network::Server;
use shared::{player_key, read_packet, write_packet, ClientId, Packet, Vec3};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpSocket, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};

const WAIT: Duration = Duration::from_secs(5);

struct TestServer {
    addr: SocketAddr,
    manager: Arc<ConnectionManager>,
    handle: JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn start_server(config: ServerConfig) -> TestServer {
    let server = Server::bind(config.with_bind_addr("127.0.0.1:0"))
        .await
        .expect("Failed to bind server");
    let addr = server.local_addr().unwrap();
    let manager = server.manager();
    let handle = tokio::spawn(async move {
        let _ = server.run().await;
    });

    TestServer {
        addr,
        manager,
        handle,
    }
}

struct TestClient {
    id: ClientId,
    stream: TcpStream,
    /// Everything received so far, greeting included
    received: Vec<Packet>,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let mut stream = TcpStream::connect(addr).await.expect("Failed to connect");
        let greeting = timeout(WAIT, read_packet(&mut stream))
            .await
            .expect("No greeting")
            .expect("Bad greeting");

        let id = match greeting {
            Packet::AssignId { client_id } => client_id,
            other => panic!("Expected AssignId, got {:?}", other),
        };

        TestClient {
            id,
            stream,
            received: vec![greeting],
        }
    }

    async fn send(&mut self, packet: Packet) {
        write_packet(&mut self.stream, &packet)
            .await
            .expect("Failed to send");
    }

    async fn next(&mut self) -> Packet {
        let packet = timeout(WAIT, read_packet(&mut self.stream))
            .await
            .expect("Timed out waiting for packet")
            .expect("Failed to read packet");
        self.received.push(packet.clone());
        packet
    }

    /// Reads until a packet matches `wanted` and returns it
    async fn expect<F>(&mut self, wanted: F) -> Packet
    where
        F: Fn(&Packet) -> bool,
    {
        loop {
            let packet = self.next().await;
            if wanted(&packet) {
                return packet;
            }
        }
    }
}

fn is_update_of(packet: &Packet, key: &str) -> bool {
    matches!(packet, Packet::Updated { key: k, .. } if k == key)
}

/// END-TO-END REPLICATION
mod replication_tests {
    use super::*;

    /// One client moves, the other sees it, then sees it leave
    #[tokio::test]
    async fn position_update_and_disconnect_reach_other_client() {
        let server = start_server(ServerConfig::default()).await;

        let mut a = TestClient::connect(server.addr).await;
        assert_eq!(a.id, 1);
        let mut b = TestClient::connect(server.addr).await;

        a.send(Packet::SetPosition(Vec3::new(5.0, 0.0, 0.0))).await;
        match b.expect(|p| is_update_of(p, "player_1")).await {
            Packet::Updated { record, .. } => {
                assert_eq!(record.position, Vec3::new(5.0, 0.0, 0.0));
            }
            other => panic!("Unexpected packet: {:?}", other),
        }

        a.send(Packet::Disconnect).await;
        b.expect(|p| *p == Packet::Removed { key: "player_1".into() })
            .await;

        let mut mirror = ClientMirror::new();
        for packet in b.received.drain(..) {
            mirror.apply(packet, &mut ());
        }
        assert!(!mirror.contains("player_1"));
        assert!(mirror.contains(&player_key(b.id)));
    }

    /// Updates from one sender are never observed out of order
    #[tokio::test]
    async fn per_key_updates_keep_order() {
        let server = start_server(ServerConfig::default()).await;
        let mut a = TestClient::connect(server.addr).await;
        let mut b = TestClient::connect(server.addr).await;

        for x in 1..=20 {
            a.send(Packet::SetPosition(Vec3::new(x as f32, 0.0, 0.0))).await;
        }

        let mut seen = Vec::new();
        loop {
            if let Packet::Updated { key, record } = b.next().await {
                if key == "player_1" {
                    seen.push(record.position.x);
                    if record.position.x == 20.0 {
                        break;
                    }
                }
            }
        }

        assert!(seen.windows(2).all(|pair| pair[0] < pair[1]), "{:?}", seen);
    }

    /// A late joiner gets every existing variable before its own
    #[tokio::test]
    async fn late_joiner_receives_replay() {
        let server = start_server(ServerConfig::default()).await;
        let mut a = TestClient::connect(server.addr).await;
        let mut b = TestClient::connect(server.addr).await;

        a.send(Packet::SetUsername("Ada".into())).await;
        b.expect(|p| is_update_of(p, "player_1")).await;

        let mut c = TestClient::connect(server.addr).await;
        let replay = vec![c.next().await, c.next().await, c.next().await];

        let keys: Vec<&str> = replay.iter().filter_map(|p| p.event_key()).collect();
        assert_eq!(keys, vec!["player_1", "player_2", "player_3"]);
        match &replay[0] {
            Packet::Created { record, .. } => assert_eq!(record.username, "Ada"),
            other => panic!("Unexpected packet: {:?}", other),
        }
    }

    /// Store and connection table stay in step as clients come and go
    #[tokio::test]
    async fn single_variable_per_connected_client() {
        let server = start_server(ServerConfig::default()).await;

        let mut clients = Vec::new();
        for _ in 0..5 {
            clients.push(TestClient::connect(server.addr).await);
        }
        let mut leaving = clients.split_off(3);
        leaving[0].send(Packet::Disconnect).await;
        drop(leaving);

        let mut converged = false;
        for _ in 0..100 {
            let connected = server.manager.client_ids().await;
            let store = server.manager.store().lock().await;
            if connected.len() == 3 && store.len() == 3 {
                assert!(connected.iter().all(|id| store.contains(&player_key(*id))));
                converged = true;
                break;
            }
            drop(store);
            sleep(Duration::from_millis(20)).await;
        }
        assert!(converged, "store did not settle at three variables");
    }
}

/// MALFORMED INPUT AND LIVENESS
mod robustness_tests {
    use super::*;

    async fn send_raw(stream: &mut TcpStream, bytes: &[u8]) {
        stream.write_all(bytes).await.unwrap();
        stream.flush().await.unwrap();
    }

    fn garbage_frame() -> Vec<u8> {
        let mut frame = 4u32.to_be_bytes().to_vec();
        frame.extend_from_slice(&[0xff, 0xff, 0xff, 0xff]);
        frame
    }

    /// An undecodable frame is dropped and the connection keeps working
    #[tokio::test]
    async fn malformed_frame_is_skipped() {
        let server = start_server(ServerConfig::default()).await;
        let mut a = TestClient::connect(server.addr).await;
        let mut b = TestClient::connect(server.addr).await;

        send_raw(&mut a.stream, &garbage_frame()).await;
        a.send(Packet::SetHighscore("not a number".into())).await;
        a.send(Packet::SetHighscore("41.999".into())).await;

        match b.expect(|p| is_update_of(p, "player_1")).await {
            Packet::Updated { record, .. } => assert_eq!(record.highscore, 42.0),
            other => panic!("Unexpected packet: {:?}", other),
        }
    }

    /// Too many malformed messages in a row close the connection
    #[tokio::test]
    async fn malformed_streak_disconnects() {
        let config = ServerConfig {
            max_malformed: 3,
            ..ServerConfig::default()
        };
        let server = start_server(config).await;
        let mut a = TestClient::connect(server.addr).await;
        let mut b = TestClient::connect(server.addr).await;

        for _ in 0..3 {
            send_raw(&mut a.stream, &garbage_frame()).await;
        }

        a.expect(|p| matches!(p, Packet::Disconnected { .. })).await;
        b.expect(|p| *p == Packet::Removed { key: "player_1".into() })
            .await;
    }

    /// A length prefix above the frame limit is fatal for that connection only
    #[tokio::test]
    async fn oversized_frame_disconnects_sender_only() {
        let server = start_server(ServerConfig::default()).await;
        let mut a = TestClient::connect(server.addr).await;
        let mut b = TestClient::connect(server.addr).await;

        send_raw(&mut a.stream, &u32::MAX.to_be_bytes()).await;
        b.expect(|p| *p == Packet::Removed { key: "player_1".into() })
            .await;

        b.send(Packet::SetModel("assets/cars/van.obj".into())).await;
        b.expect(|p| is_update_of(p, "player_2")).await;
    }

    /// A silent client is dropped after the configured timeout
    #[tokio::test]
    async fn silent_client_times_out() {
        let config = ServerConfig {
            client_timeout: Duration::from_millis(200),
            timeout_check_interval: Duration::from_millis(50),
            ..ServerConfig::default()
        };
        let server = start_server(config).await;
        let mut a = TestClient::connect(server.addr).await;

        match a.expect(|p| matches!(p, Packet::Disconnected { .. })).await {
            Packet::Disconnected { reason } => assert_eq!(reason, "client timeout"),
            other => panic!("Unexpected packet: {:?}", other),
        }
        assert!(server.manager.is_empty().await);
    }

    /// Heartbeats keep an otherwise idle client connected
    #[tokio::test]
    async fn heartbeat_keeps_client_alive() {
        let config = ServerConfig {
            client_timeout: Duration::from_millis(300),
            timeout_check_interval: Duration::from_millis(50),
            ..ServerConfig::default()
        };
        let server = start_server(config).await;
        let mut a = TestClient::connect(server.addr).await;

        for _ in 0..8 {
            sleep(Duration::from_millis(100)).await;
            a.send(Packet::Heartbeat).await;
        }

        assert_eq!(server.manager.client_ids().await, vec![a.id]);
    }

    /// A client may not send server-side packet kinds
    #[tokio::test]
    async fn server_packets_from_client_are_rejected() {
        let server = start_server(ServerConfig::default()).await;
        let mut a = TestClient::connect(server.addr).await;
        let mut b = TestClient::connect(server.addr).await;

        a.send(Packet::Removed { key: "player_2".into() }).await;
        a.send(Packet::SetPosition(Vec3::new(1.0, 1.0, 1.0))).await;

        b.expect(|p| is_update_of(p, "player_1")).await;
        assert!(server.manager.store().lock().await.contains("player_2"));
        assert!(!b.received.contains(&Packet::Removed { key: "player_2".into() }));
    }
}

/// SLOW CONSUMERS
mod slow_client_tests {
    use super::*;

    /// Connects with a tiny receive window and never reads
    async fn stalled_connection(addr: SocketAddr) -> TcpStream {
        let socket = TcpSocket::new_v4().unwrap();
        socket.set_recv_buffer_size(4096).unwrap();
        socket.connect(addr).await.unwrap()
    }

    /// A client that stops reading is dropped while the rest keep up
    #[tokio::test]
    async fn stalled_client_is_dropped_without_blocking_others() {
        let config = ServerConfig {
            write_timeout: Duration::from_millis(200),
            outbox_capacity: 16,
            ..ServerConfig::default()
        };
        let server = start_server(config).await;

        let mut observer = TestClient::connect(server.addr).await;
        let flooder = TestClient::connect(server.addr).await;
        let flooder_key = player_key(flooder.id);
        let _stalled = stalled_connection(server.addr).await;

        let observer_id = observer.id;
        let flooder_id = flooder.id;
        let known = [player_key(observer_id), flooder_key.clone()];
        let created = observer
            .expect(|p| matches!(p, Packet::Created { key, .. } if !known.contains(key)))
            .await;
        let stalled_key = created.event_key().unwrap().to_string();

        // The flooder's own events are drained so only the stalled client backs up
        let (mut flood_reader, mut flood_writer) = flooder.stream.into_split();
        let drain = tokio::spawn(async move { while read_packet(&mut flood_reader).await.is_ok() {} });

        let removed = Packet::Removed {
            key: stalled_key.clone(),
        };
        let watch_key = removed.clone();
        let watcher = tokio::spawn(async move {
            loop {
                let packet = read_packet(&mut observer.stream).await.unwrap();
                if packet == watch_key {
                    return observer;
                }
            }
        });

        let deadline = Instant::now() + Duration::from_secs(20);
        let mut round = 0u32;
        while !watcher.is_finished() {
            assert!(Instant::now() < deadline, "stalled client was never dropped");
            for _ in 0..50 {
                round += 1;
                let username = format!("{:0>200}", round);
                write_packet(&mut flood_writer, &Packet::SetUsername(username))
                    .await
                    .unwrap();
            }
            sleep(Duration::from_millis(1)).await;
        }

        let mut observer = watcher.await.unwrap();
        assert_eq!(server.manager.client_ids().await, vec![observer_id, flooder_id]);
        assert!(!server.manager.store().lock().await.contains(&stalled_key));

        write_packet(&mut flood_writer, &Packet::SetPosition(Vec3::new(7.0, 0.0, 0.0)))
            .await
            .unwrap();
        let started = Instant::now();
        loop {
            match observer.next().await {
                Packet::Updated { key, record } if key == flooder_key && record.position.x == 7.0 => break,
                Packet::Removed { key } => panic!("{} removed unexpectedly", key),
                _ => {}
            }
        }
        assert!(started.elapsed() < Duration::from_secs(1));

        drain.abort();
    }
}
