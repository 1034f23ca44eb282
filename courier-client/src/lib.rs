//! # courier-client
//!
//! Thin clients for the courier relay and key directory.
//!
//! - [`RelayClient`]: register, send and fetch over the binary TCP protocol
//! - [`DirectoryClient`]: upload and fetch prekey bundles over HTTP
//!
//! Payloads are opaque bytes here; encryption happens above this crate.
//!
//! ## Example
//!
//! ```ignore
//! use courier_client::{DirectoryClient, RelayClient};
//! use courier_types::Identity;
//!
//! let me = Identity::random();
//! let mut relay = RelayClient::connect("127.0.0.1:5000").await?;
//! relay.register(me).await?;
//! let mail = relay.fetch_messages().await?;
//!
//! let directory = DirectoryClient::new("http://127.0.0.1:8000");
//! let bundle = directory.fetch("alice").await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod directory;
pub mod error;
pub mod relay;

pub use directory::DirectoryClient;
pub use error::{ClientError, Result};
pub use relay::RelayClient;
