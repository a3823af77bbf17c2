//! # Rally Sync Client
//!
//! Drives a local car, reports its state to the server and shows every other
//! connected car from a local mirror of the server's replicated variables.
//!
//! ## Frame Loop
//!
//! Each frame the client:
//! - samples input and moves the local car
//! - drains packets from the background network thread into the mirror
//! - sends the fields that changed, at most ten times per second
//! - smooths every remote car toward its latest known state
//! - draws the world, the leaderboard and the connection status
//!
//! ## Module Organization
//!
//! ### Mirror Module (`mirror`)
//! Applies `AssignId`/`Created`/`Updated`/`Removed` and drives a
//! [`mirror::Presentation`] with spawn, update and despawn callbacks.
//!
//! ### Interpolation Module (`interpolation`)
//! Per-tick or time-scaled exponential smoothing of position and rotation.
//!
//! ### Leaderboard Module (`leaderboard`)
//! Top five highscores across the mirror and the local car.
//!
//! ### Network Module (`network`)
//! TCP session on its own thread, connection status reporting and the
//! changed-field sender.
//!
//! ### Input and Rendering Modules (`input`, `rendering`)
//! Keyboard driving model and the macroquad top-down view.
//!
//! ## Usage Example
//!
//! ```rust
//! use client::interpolation::Smoothing;
//! use client::mirror::ClientMirror;
//! use shared::{Packet, PlayerRecord};
//!
//! let mut mirror = ClientMirror::new();
//! mirror.apply(Packet::AssignId { client_id: 1 }, &mut ());
//! mirror.apply(
//!     Packet::Created {
//!         key: "player_2".to_string(),
//!         record: PlayerRecord::new(2),
//!     },
//!     &mut (),
//! );
//!
//! mirror.interpolate(&Smoothing::default(), 1.0 / 60.0, &mut ());
//! assert_eq!(mirror.remote_entries().count(), 1);
//! ```

pub mod config;
pub mod error;
pub mod input;
pub mod interpolation;
pub mod leaderboard;
pub mod mirror;
pub mod network;
pub mod rendering;
