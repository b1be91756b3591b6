//! # tor-conductor
//!
//! Launch, supervise, and drive a Tor process over the control protocol.
//!
//! ## Overview
//!
//! This crate supervises a `tor` daemon and speaks the
//! [Tor Control Protocol](https://spec.torproject.org/control-spec/) to it.
//! It enables applications to:
//!
//! - Launch Tor with a managed data directory and discover its control port
//! - Authenticate using any supported method (NULL, password, cookie,
//!   SAFECOOKIE)
//! - Query and modify Tor configuration at runtime
//! - Subscribe to asynchronous events (circuits, streams, bandwidth,
//!   hidden-service descriptors, bootstrap status)
//! - Publish onion services backed by local listeners
//! - Dial out through Tor's SOCKS proxy, with per-stream circuit isolation
//!
//! ## Key Types
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`Tor`] | Supervised Tor process with its control client |
//! | [`StartConf`] | Launch configuration |
//! | [`TorClient`] | Control-port client (commands, events, auth) |
//! | [`Event`], [`EventType`] | Asynchronous events and their codes |
//! | [`OnionService`], [`ListenConf`] | Onion services as local listeners |
//! | [`Dialer`] | Outbound SOCKS connector |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tor_conductor::{StartConf, Tor};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> tor_conductor::Result<()> {
//!     // Launch tor with a temporary data directory and authenticate.
//!     let mut tor = Tor::start(StartConf::default()).await?;
//!
//!     let version = tor.control()?.get_version().await?;
//!     println!("Running Tor {}", version);
//!
//!     // Publish an onion service forwarding port 80 to a local listener.
//!     let cancel = CancellationToken::new();
//!     let mut onion = tor
//!         .listen(
//!             &cancel,
//!             tor_conductor::ListenConf {
//!                 remote_ports: vec![80],
//!                 ..Default::default()
//!             },
//!         )
//!         .await?;
//!     println!("Serving on {}", onion.onion_addr());
//!
//!     onion.close().await?;
//!     tor.close().await
//! }
//! ```
//!
//! ## Authentication
//!
//! [`TorClient::authenticate`] picks the strongest workable method from
//! PROTOCOLINFO:
//!
//! | Method | Selected when | Security |
//! |--------|---------------|----------|
//! | HASHEDPASSWORD | a password is supplied | medium |
//! | SAFECOOKIE | advertised, no password | highest |
//! | COOKIE | advertised, SAFECOOKIE absent | high |
//! | NULL | nothing else applies | none |
//!
//! [`Tor::start`] authenticates eagerly with an empty password unless
//! [`StartConf::disable_eager_auth`] is set.
//!
//! ## Event Monitoring
//!
//! Subscribers are plain bounded channels; delivery is in Tor's emission
//! order and blocks the connection reader when a subscriber cannot keep up,
//! so pick capacities accordingly.
//!
//! ```rust,no_run
//! use tor_conductor::{Event, EventType};
//! use tokio_util::sync::CancellationToken;
//! # async fn example(tor: tor_conductor::Tor) -> tor_conductor::Result<()> {
//! let control = tor.control()?.clone();
//! let (tx, mut rx) = tokio::sync::mpsc::channel(64);
//! control
//!     .add_event_listener(tx, &[EventType::Circuit, EventType::Bandwidth])
//!     .await?;
//!
//! let cancel = CancellationToken::new();
//! let pump = {
//!     let control = control.clone();
//!     let cancel = cancel.clone();
//!     tokio::spawn(async move { control.handle_events(cancel).await })
//! };
//!
//! while let Some(event) = rx.recv().await {
//!     match event {
//!         Event::Circuit(circ) => println!("circuit {}: {}", circ.circuit_id, circ.status),
//!         Event::Bandwidth(bw) => println!("bw: {} in, {} out", bw.bytes_read, bw.bytes_written),
//!         _ => {}
//!     }
//! }
//! # cancel.cancel();
//! # drop(pump);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, TorControlError>`](TorControlError).
//! Command rejections carry Tor's status code and message; teardown
//! aggregates the errors of its individual steps.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]

pub mod auth;
pub mod commands;
pub mod config;
pub mod connection;
pub mod dialer;
pub mod error;
pub mod events;
pub mod keys;
pub mod onion;
pub mod process;
pub mod protocol;
pub mod tor;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export the main types for convenience.
pub use auth::{AuthMethod, ProtocolInfo};
pub use commands::{AddOnionRequest, AddOnionResponse, OnionPort};
pub use config::StartConf;
pub use connection::TorClient;
pub use dialer::{DialConf, Dialer, ProxyAuth};
pub use error::{Result, StatusCode, TorControlError};
pub use events::{Event, EventType};
pub use keys::{KeyAlgo, KeyType, OnionKey};
pub use onion::{ForwardConf, ListenConf, LocalListener, OnionForward, OnionService, OnionStream};
pub use protocol::Reply;
pub use tor::Tor;
pub use types::{CircuitId, KeyVal, OnionAddress, Signal, StreamId, TorVersion};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Tor control protocol version supported.
pub const PROTOCOL_VERSION: u32 = 1;
