//! Server network layer: TCP accept loop and per-connection tasks
//!
//! Every accepted stream is split in two halves driven by separate tasks. The
//! reader decodes frames and routes them through the [`ConnectionManager`];
//! the writer drains the connection's outbox onto the socket. Neither ever
//! blocks the shared store, and any failure on either side ends in a single
//! idempotent `disconnect`.

use crate::config::ServerConfig;
use crate::connection_manager::{ConnectionManager, DisconnectReason, Flow};
use crate::error::ServerError;
use crate::outbox::Outbox;
use crate::store::VariableStore;
use log::{debug, error, info, warn};
use shared::{encode_frame, read_packet, write_packet, ClientId, FrameError, Packet};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::timeout;

/// Authoritative server owning the listener, the store and all connections
pub struct Server {
    listener: TcpListener,
    manager: Arc<ConnectionManager>,
    config: ServerConfig,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let store = Arc::new(Mutex::new(VariableStore::new()));
        let manager = Arc::new(ConnectionManager::new(store, config.clone()));

        Ok(Server {
            listener,
            manager,
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn manager(&self) -> Arc<ConnectionManager> {
        Arc::clone(&self.manager)
    }

    /// Serves clients until the process is stopped
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Serves clients until `shutdown` completes, then disconnects everyone
    /// and waits for their pending packets to be flushed
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let timeout_checker = self.spawn_timeout_checker();
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        info!(
            "Server started (max {} clients, {:?} client timeout)",
            self.config.max_clients, self.config.client_timeout
        );

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("Incoming connection from {}", addr);
                        connections.spawn(handle_connection(
                            Arc::clone(&self.manager),
                            stream,
                            addr,
                            self.config.write_timeout,
                        ));
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },

                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        error!("Connection task failed: {}", e);
                    }
                },

                _ = &mut shutdown => {
                    info!("Server shutting down");
                    break;
                }
            }
        }

        timeout_checker.abort();
        self.manager
            .disconnect_all(DisconnectReason::ServerShutdown)
            .await;

        let drain = async { while connections.join_next().await.is_some() {} };
        if timeout(self.config.write_timeout, drain).await.is_err() {
            warn!("Some connections did not close in time");
        }
        Ok(())
    }

    /// Spawns task that disconnects clients that went silent
    fn spawn_timeout_checker(&self) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(&self.manager);
        let period = self.config.timeout_check_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            loop {
                interval.tick().await;

                let timed_out = manager.check_timeouts().await;
                if !timed_out.is_empty() {
                    info!("Timed out clients: {:?}", timed_out);
                }
            }
        })
    }
}

async fn handle_connection(
    manager: Arc<ConnectionManager>,
    mut stream: TcpStream,
    addr: SocketAddr,
    write_timeout: Duration,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not disable Nagle for {}: {}", addr, e);
    }

    let (client_id, outbox) = match manager.accept(addr).await {
        Ok(accepted) => accepted,
        Err(ServerError::ServerFull(max)) => {
            warn!("Rejecting {}: server full ({} clients)", addr, max);
            let refusal = Packet::Disconnected {
                reason: "server full".to_string(),
            };
            let _ = timeout(write_timeout, write_packet(&mut stream, &refusal)).await;
            let _ = stream.shutdown().await;
            return;
        }
        Err(e) => {
            warn!("Failed to accept {}: {}", addr, e);
            return;
        }
    };

    let (reader, writer) = stream.into_split();
    let writer_task = tokio::spawn(write_loop(
        Arc::clone(&manager),
        client_id,
        Arc::clone(&outbox),
        writer,
        write_timeout,
    ));

    read_loop(&manager, client_id, &outbox, reader).await;

    if let Err(e) = writer_task.await {
        error!("Writer for client {} failed: {}", client_id, e);
    }
}

/// Feeds inbound packets to the manager until the connection closes
async fn read_loop(
    manager: &ConnectionManager,
    client_id: ClientId,
    outbox: &Outbox,
    reader: OwnedReadHalf,
) {
    let mut reader = BufReader::new(reader);
    let mut closed = outbox.closed_signal();

    let reason = loop {
        let result = tokio::select! {
            result = read_packet(&mut reader) => result,
            _ = closed.wait_for(|closed| *closed) => {
                break if outbox.is_lagging() {
                    DisconnectReason::Lagging
                } else {
                    DisconnectReason::ConnectionLost
                };
            }
        };

        let flow = match result {
            Ok(packet) => manager.handle_packet(client_id, packet).await,
            Err(e) if e.is_recoverable() => manager.reject_malformed(client_id, e.to_string()).await,
            Err(FrameError::Closed) => {
                debug!("Client {} closed the stream", client_id);
                Ok(Flow::Close(DisconnectReason::ConnectionLost))
            }
            Err(e) => {
                warn!("Dropping client {}: {}", client_id, e);
                Ok(Flow::Close(DisconnectReason::ConnectionLost))
            }
        };

        match flow {
            Ok(Flow::Continue) => {}
            Ok(Flow::Close(reason)) => break reason,
            // Already counted and logged by the manager
            Err(e) => debug!("{}", e),
        }
    };

    manager.disconnect(client_id, reason).await;
}

/// Drains the outbox onto the socket, one flush per batch
async fn write_loop(
    manager: Arc<ConnectionManager>,
    client_id: ClientId,
    outbox: Arc<Outbox>,
    writer: OwnedWriteHalf,
    write_timeout: Duration,
) {
    let mut writer = BufWriter::new(writer);

    while let Some(batch) = outbox.next_batch().await {
        match timeout(write_timeout, write_batch(&mut writer, &batch)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Write to client {} failed: {}", client_id, e);
                manager
                    .disconnect(client_id, DisconnectReason::ConnectionLost)
                    .await;
                return;
            }
            Err(_) => {
                warn!("Write to client {} timed out", client_id);
                manager
                    .disconnect(client_id, DisconnectReason::ConnectionLost)
                    .await;
                return;
            }
        }
    }

    let _ = timeout(write_timeout, writer.shutdown()).await;
}

async fn write_batch(
    writer: &mut BufWriter<OwnedWriteHalf>,
    batch: &[Packet],
) -> Result<(), FrameError> {
    for packet in batch {
        let frame = encode_frame(packet)?;
        writer.write_all(&frame).await?;
    }
    writer.flush().await?;
    Ok(())
}
