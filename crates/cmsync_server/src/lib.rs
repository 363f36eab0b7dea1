//! # cmsync Server
//!
//! In-process reference implementation of the authoritative CRUD source
//! and its change broadcast hub.
//!
//! The server owns record identity: it assigns ids and timestamps on
//! create and validates every record against its kind. Each successful
//! mutation is published as a change message before the caller gets its
//! answer. Integration tests and the engine's adapters use it in place of
//! a networked backend.
//!
//! ```rust,ignore
//! use cmsync_server::{CmsServer, IdStrategy, ServerConfig};
//!
//! let server = CmsServer::new(ServerConfig::new().with_id_strategy(IdStrategy::Sequential));
//! let mut changes = server.subscribe()?;
//! let record = server.create(EntityKind::Product, json!({ "title": "X" }))?;
//! assert_eq!(record["id"], "p-1");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod hub;
mod server;

pub use config::{IdStrategy, ServerConfig};
pub use error::{respond, ServerError, ServerResult};
pub use hub::ChangeHub;
pub use server::CmsServer;
