//! Client networking on a background tokio runtime
//!
//! The render loop owns a [`NetworkHandle`] and never blocks on the socket:
//! outbound packets go through one channel, server packets and status
//! changes come back through another and are drained once per frame.

use crate::config::ClientConfig;
use crate::error::ClientError;
use log::{debug, info, warn};
use shared::{read_packet, write_packet, ClientId, Field, FrameError, Packet, PlayerRecord};
use std::fmt;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Longest the render thread waits for the network thread when leaving
const DISCONNECT_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Disconnected(Option<String>),
    Connecting,
    Connected(ClientId),
    TimedOut,
    Failed(String),
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected(_))
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected(None) => write!(f, "Disconnected"),
            ConnectionStatus::Disconnected(Some(reason)) => write!(f, "Disconnected: {}", reason),
            ConnectionStatus::Connecting => write!(f, "Connecting..."),
            ConnectionStatus::Connected(id) => write!(f, "Connected as player {}", id),
            ConnectionStatus::TimedOut => write!(f, "Connection Timeout"),
            ConnectionStatus::Failed(reason) => write!(f, "Connection failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    Status(ConnectionStatus),
    Packet(Packet),
}

/// Render-thread side of one connection attempt
pub struct NetworkHandle {
    outgoing: mpsc::UnboundedSender<Packet>,
    events: mpsc::UnboundedReceiver<NetworkEvent>,
    thread: Option<JoinHandle<()>>,
}

impl NetworkHandle {
    /// Starts connecting in a background thread; progress is reported as
    /// [`NetworkEvent::Status`] events
    pub fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let addr = config.server_addr.clone();
        let connect_timeout = config.connect_timeout;

        let thread = std::thread::Builder::new()
            .name("network".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = events_tx.send(NetworkEvent::Status(ConnectionStatus::Failed(
                            e.to_string(),
                        )));
                        return;
                    }
                };
                runtime.block_on(session(addr, connect_timeout, outgoing_rx, events_tx));
            })?;

        Ok(Self {
            outgoing: outgoing_tx,
            events: events_rx,
            thread: Some(thread),
        })
    }

    pub fn send(&self, packet: Packet) -> Result<(), ClientError> {
        self.outgoing
            .send(packet)
            .map_err(|_| ClientError::ConnectionLost)
    }

    /// Everything received since the last call
    pub fn poll(&mut self) -> Vec<NetworkEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Tells the server goodbye and waits up to [`DISCONNECT_GRACE`] for the
    /// network thread to finish. A thread still connecting is left behind.
    pub fn disconnect(mut self) {
        let _ = self.outgoing.send(Packet::Disconnect);
        let Some(thread) = self.thread.take() else {
            return;
        };

        let deadline = Instant::now() + DISCONNECT_GRACE;
        while !thread.is_finished() {
            if Instant::now() >= deadline {
                debug!("Network thread still busy, not waiting for it");
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        if thread.join().is_err() {
            warn!("Network thread panicked");
        }
    }
}

/// Runs one connection to completion and reports how it ended
pub async fn session(
    addr: String,
    connect_timeout: Duration,
    outgoing: mpsc::UnboundedReceiver<Packet>,
    events: mpsc::UnboundedSender<NetworkEvent>,
) {
    let _ = events.send(NetworkEvent::Status(ConnectionStatus::Connecting));

    let status = match run_session(&addr, connect_timeout, outgoing, &events).await {
        Ok(reason) => ConnectionStatus::Disconnected(reason),
        Err(ClientError::ConnectTimeout(addr)) => {
            warn!("No response from {}", addr);
            ConnectionStatus::TimedOut
        }
        Err(e) => {
            warn!("Connection ended: {}", e);
            ConnectionStatus::Failed(e.to_string())
        }
    };

    info!("{}", status);
    let _ = events.send(NetworkEvent::Status(status));
}

/// Returns the server's reason when it closed the connection on purpose
async fn run_session(
    addr: &str,
    connect_timeout: Duration,
    mut outgoing: mpsc::UnboundedReceiver<Packet>,
    events: &mpsc::UnboundedSender<NetworkEvent>,
) -> Result<Option<String>, ClientError> {
    info!("Connecting to {}", addr);
    let stream = timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| ClientError::ConnectTimeout(addr.to_string()))??;
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();

    let greeting = timeout(connect_timeout, read_packet(&mut reader))
        .await
        .map_err(|_| ClientError::ConnectTimeout(addr.to_string()))??;

    match greeting {
        Packet::AssignId { client_id } => {
            info!("Connected! Client ID: {}", client_id);
            let _ = events.send(NetworkEvent::Status(ConnectionStatus::Connected(client_id)));
            let _ = events.send(NetworkEvent::Packet(Packet::AssignId { client_id }));
        }
        Packet::Disconnected { reason } => return Ok(Some(reason)),
        other => {
            return Err(ClientError::Handshake(format!(
                "expected AssignId, got {:?}",
                other
            )))
        }
    }

    let mut reader_task = tokio::spawn(forward_packets(reader, events.clone()));

    loop {
        tokio::select! {
            finished = &mut reader_task => {
                return finished.map_err(|_| ClientError::ConnectionLost)?;
            }

            packet = outgoing.recv() => {
                let packet = packet.unwrap_or(Packet::Disconnect);
                let leaving = packet == Packet::Disconnect;

                write_packet(&mut writer, &packet).await?;
                if leaving {
                    debug!("Sent disconnect");
                    reader_task.abort();
                    return Ok(None);
                }
            }
        }
    }
}

/// Hands every server packet to the render thread until the stream ends
async fn forward_packets(
    mut reader: OwnedReadHalf,
    events: mpsc::UnboundedSender<NetworkEvent>,
) -> Result<Option<String>, ClientError> {
    loop {
        match read_packet(&mut reader).await {
            Ok(Packet::Disconnected { reason }) => {
                warn!("Disconnected by server: {}", reason);
                return Ok(Some(reason));
            }
            Ok(packet) => {
                if events.send(NetworkEvent::Packet(packet)).is_err() {
                    return Ok(None);
                }
            }
            Err(e) if e.is_recoverable() => warn!("Skipping malformed packet: {}", e),
            Err(FrameError::Closed) => return Err(ClientError::ConnectionLost),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Decides which local fields to report to the server
///
/// Sends at most once per `send_interval`, and only the fields that changed
/// since the previous send. A heartbeat goes out after `heartbeat_interval`
/// without any message so the server keeps the connection alive.
#[derive(Debug)]
pub struct StateSync {
    send_interval: Duration,
    heartbeat_interval: Duration,
    last_sent: Option<PlayerRecord>,
    last_send_at: Option<Instant>,
    last_message_at: Option<Instant>,
}

impl StateSync {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            send_interval: config.send_interval,
            heartbeat_interval: config.heartbeat_interval,
            last_sent: None,
            last_send_at: None,
            last_message_at: None,
        }
    }

    pub fn changes(&mut self, local: &PlayerRecord, now: Instant) -> Vec<Packet> {
        if let Some(at) = self.last_send_at {
            if now.duration_since(at) < self.send_interval {
                return Vec::new();
            }
        }
        self.last_send_at = Some(now);

        let mut packets: Vec<Packet> = Field::ALL
            .iter()
            .filter(|field| match &self.last_sent {
                Some(previous) => previous.get(**field) != local.get(**field),
                None => true,
            })
            .map(|field| Packet::field_update(*field, local))
            .collect();

        let idle = self
            .last_message_at
            .map_or(true, |at| now.duration_since(at) >= self.heartbeat_interval);

        if packets.is_empty() && idle {
            packets.push(Packet::Heartbeat);
        }

        if !packets.is_empty() {
            self.last_message_at = Some(now);
        }
        self.last_sent = Some(local.clone());
        packets
    }

    /// Forget what was sent, so the next call reports every field
    pub fn reset(&mut self) {
        self.last_sent = None;
        self.last_send_at = None;
        self.last_message_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Vec3;
    use tokio::net::TcpListener;

    fn sync() -> StateSync {
        StateSync::new(&ClientConfig::default())
    }

    #[test]
    fn test_first_send_reports_every_field() {
        let mut sync = sync();
        let packets = sync.changes(&PlayerRecord::new(1), Instant::now());
        assert_eq!(packets.len(), Field::ALL.len());
    }

    #[test]
    fn test_only_changed_fields_are_sent() {
        let mut sync = sync();
        let start = Instant::now();
        let mut record = PlayerRecord::new(1);
        sync.changes(&record, start);

        record.position = Vec3::new(1.0, 0.0, 0.0);
        record.highscore = 3.14159;
        let packets = sync.changes(&record, start + Duration::from_millis(100));

        assert_eq!(
            packets,
            vec![
                Packet::SetPosition(Vec3::new(1.0, 0.0, 0.0)),
                Packet::SetHighscore("3.14".into()),
            ]
        );
    }

    #[test]
    fn test_rate_limited_to_send_interval() {
        let mut sync = sync();
        let start = Instant::now();
        let mut record = PlayerRecord::new(1);
        sync.changes(&record, start);

        record.position = Vec3::new(2.0, 0.0, 0.0);
        assert!(sync.changes(&record, start + Duration::from_millis(50)).is_empty());
        assert_eq!(sync.changes(&record, start + Duration::from_millis(100)).len(), 1);
    }

    #[test]
    fn test_heartbeat_when_idle() {
        let mut sync = sync();
        let start = Instant::now();
        let record = PlayerRecord::new(1);
        sync.changes(&record, start);

        assert!(sync.changes(&record, start + Duration::from_secs(1)).is_empty());
        assert_eq!(
            sync.changes(&record, start + Duration::from_secs(2)),
            vec![Packet::Heartbeat]
        );
    }

    #[test]
    fn test_status_text() {
        assert_eq!(ConnectionStatus::TimedOut.to_string(), "Connection Timeout");
        assert!(ConnectionStatus::Connected(2).is_connected());
        assert!(!ConnectionStatus::Connecting.is_connected());
    }

    #[tokio::test]
    async fn test_session_forwards_greeting_and_packets() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            write_packet(&mut stream, &Packet::AssignId { client_id: 3 })
                .await
                .unwrap();
            write_packet(&mut stream, &Packet::Removed { key: "player_9".into() })
                .await
                .unwrap();
            let packet = read_packet(&mut stream).await.unwrap();
            assert_eq!(packet, Packet::Disconnect);
        });

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let client = tokio::spawn(session(addr, Duration::from_secs(5), outgoing_rx, events_tx));

        let mut seen = Vec::new();
        while seen.len() < 4 {
            seen.push(events_rx.recv().await.unwrap());
        }
        assert_eq!(seen[0], NetworkEvent::Status(ConnectionStatus::Connecting));
        assert_eq!(seen[1], NetworkEvent::Status(ConnectionStatus::Connected(3)));
        assert_eq!(seen[2], NetworkEvent::Packet(Packet::AssignId { client_id: 3 }));
        assert_eq!(
            seen[3],
            NetworkEvent::Packet(Packet::Removed { key: "player_9".into() })
        );

        outgoing_tx.send(Packet::Disconnect).unwrap();
        client.await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_server_refusal_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let refusal = Packet::Disconnected {
                reason: "server full".into(),
            };
            write_packet(&mut stream, &refusal).await.unwrap();
        });

        let (_outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        session(addr, Duration::from_secs(5), outgoing_rx, events_tx).await;

        let mut last = None;
        while let Ok(event) = events_rx.try_recv() {
            last = Some(event);
        }
        assert_eq!(
            last,
            Some(NetworkEvent::Status(ConnectionStatus::Disconnected(Some(
                "server full".into()
            ))))
        );
    }

    #[test]
    fn test_disconnect_does_not_wait_for_pending_handshake() {
        // Accepted by the kernel backlog but never greeted
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let config = ClientConfig {
            server_addr: listener.local_addr().unwrap().to_string(),
            connect_timeout: Duration::from_secs(10),
            ..ClientConfig::default()
        };

        let mut handle = NetworkHandle::connect(&config).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert!(handle
            .poll()
            .contains(&NetworkEvent::Status(ConnectionStatus::Connecting)));

        let start = Instant::now();
        handle.disconnect();
        assert!(start.elapsed() < Duration::from_secs(2), "{:?}", start.elapsed());
        drop(listener);
    }
}
