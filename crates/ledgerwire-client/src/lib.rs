//! Client engine for XRP Ledger style servers.
//!
//! - [`Client`]: one WebSocket with correlation ids, timeouts, heartbeat and
//!   automatic reconnection.
//! - [`SubmissionCoordinator`]: autofill, signing, submission and waiting for
//!   a validated ledger.
//! - [`BroadcastClient`]: several servers behind one client, reads raced.
//! - [`HttpClient`]: the same contract over HTTP JSON-RPC.
//!
//! ```no_run
//! use ledgerwire_client::{Client, ClientConfig, LedgerClient};
//! use ledgerwire_core::Request;
//!
//! # async fn run() -> Result<(), ledgerwire_client::ClientError> {
//! let client = Client::new("wss://s.altnet.rippletest.net:51233", ClientConfig::default());
//! client.connect().await?;
//! let index = client.ledger_index().await?;
//! let info = client
//!     .request(&Request::new("ledger").with("ledger_index", index))
//!     .await?;
//! println!("{}", info.result);
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

mod broadcast;
mod client;
mod config;
mod connection;
mod dispatcher;
mod error;
mod events;
mod http;
mod submit;

pub use broadcast::BroadcastClient;
pub use client::{Client, LedgerClient};
pub use config::{ClientConfig, ConfigError, ReconnectConfig, SubmissionConfig};
pub use connection::Connection;
pub use dispatcher::Dispatcher;
pub use error::{ABNORMAL_CLOSURE, ClientError, ConnectionError, NORMAL_CLOSURE};
pub use events::{ClientEvent, EventKind, EventRegistry, ListenerId};
pub use http::HttpClient;
pub use submit::{PreparedTransaction, SubmissionCoordinator, SubmitOptions};
