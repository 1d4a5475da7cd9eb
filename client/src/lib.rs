//! # Sync Client Library
//!
//! Headless client for the session sync server. It joins a session over a
//! WebSocket, pushes its own [`shared::PlayerState`] and receives the
//! aggregated [`shared::SessionSnapshot`] of every member on each server tick.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! Connection handling:
//! - Handshake with the admission parameters in the query string
//! - Mapping of HTTP rejections to [`ClientError::Rejected`]
//! - Splitting of coalesced frames into individual snapshots
//!
//! ### Motion Module (`motion`)
//! Simulated movement used by the bot binary and by load tests.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::Client;
//! use shared::PlayerState;
//!
//! # async fn demo() -> Result<(), client::ClientError> {
//! let mut client = Client::connect("ws://127.0.0.1:8000/ws", "lobby", "Alice", "0.1.0").await?;
//! client.send_state(&PlayerState::at(1.0, 0.0, 2.0)).await?;
//!
//! for snapshot in client.next_snapshots().await? {
//!     println!("{} players in session", snapshot.len());
//! }
//!
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod motion;
pub mod network;

pub use motion::CircularMotion;
pub use network::{Client, ClientError};
