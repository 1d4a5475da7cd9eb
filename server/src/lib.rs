//! # Session Sync Server Library
//!
//! This library provides a real-time state synchronization hub for multiplayer
//! sessions. Clients hold a WebSocket open, push their own transform and
//! animation state whenever they like, and receive the aggregated state of
//! every player in their session at a fixed tick rate.
//!
//! ## Core Responsibilities
//!
//! ### Session Registry
//! Tracks every connected client, grouped by session key, together with the
//! last state each client reported. The registry is owned by a single hub task
//! and is never shared behind a lock.
//!
//! ### Client Lifecycle
//! Handles the complete lifecycle of a connection:
//! - Handshake validation and admission (version, display name, capacity)
//! - Inbound state decoding, where malformed payloads are dropped, not fatal
//! - Eviction on disconnect, inactivity, maximum session age or backpressure
//!
//! ### State Broadcasting
//! A scheduler ticks at a fixed rate. On each tick the hub builds one snapshot
//! per session, encodes it once and queues it for every member.
//!
//! ## Architecture Design
//!
//! ### Single Serializing Hub
//! All registry mutations arrive as messages on one queue and are applied in
//! order by the hub task. This gives a total order over admissions, updates,
//! evictions and ticks without any locking.
//!
//! ### Two Pumps Per Connection
//! Each socket is split into a read pump and a write pump running on separate
//! tasks, so there is exactly one reader and one writer per connection. They
//! coordinate only through the outbound queue: when the hub drops a client,
//! its queue closes and the write pump sends a close frame.
//!
//! ### Bounded Delivery
//! Outbound queues are bounded. The hub never waits on a client; a full queue
//! means the client is stalled and it is evicted.
//!
//! ## Module Organization
//!
//! - [`admission`]: handshake query validation
//! - [`registry`]: the session registry data structure and eviction rules
//! - [`hub`]: the serializing task owning the registry, and its handle
//! - [`connection`]: read and write pumps
//! - [`scheduler`]: fixed-rate broadcast ticks
//! - [`network`]: axum routes and server lifecycle
//! - [`config`] and [`error`]
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         bind_addr: "0.0.0.0:8000".parse()?,
//!         ..ServerConfig::default()
//!     };
//!
//!     // Runs until Ctrl+C, then drains the hub and closes every client
//!     Server::new(config)?.run().await?;
//!     Ok(())
//! }
//! ```

pub mod admission;
pub mod config;
pub mod connection;
pub mod error;
pub mod hub;
pub mod network;
pub mod registry;
pub mod scheduler;
