//! # Rally Sync Server
//!
//! Authoritative server for the replicated racing-car state. It owns one
//! store of named variables, binds every connected client to exactly one of
//! them and mirrors every change to every client.
//!
//! ## Data Flow
//!
//! A client message names a field and a value. The connection manager
//! validates it and applies it to the sender's own variable, the store
//! broadcasts the resulting full record as a store event, and each
//! subscriber's outbox carries the event to its socket.
//!
//! ## Module Organization
//!
//! ### Store (`store`)
//! Key to record map with `Created`/`Updated`/`Removed` fan-out and snapshot
//! replay for late joiners.
//!
//! ### Outbox (`outbox`)
//! Bounded per-client queue that coalesces updates so a slow reader cannot
//! grow server memory or stall the store.
//!
//! ### Connection Manager (`connection_manager`)
//! Id assignment, message routing, malformed-message policy, liveness and
//! idempotent teardown.
//!
//! ### Network (`network`)
//! TCP accept loop plus one reader and one writer task per connection.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default().with_bind_addr("127.0.0.1:25565");
//!     let server = Server::bind(config).await?;
//!
//!     server
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection_manager;
pub mod error;
pub mod network;
pub mod outbox;
pub mod store;
