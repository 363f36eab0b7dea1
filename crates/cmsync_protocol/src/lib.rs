//! # cmsync Protocol
//!
//! Entity, change-message and API response types shared by every cmsync
//! crate.
//!
//! This crate provides:
//! - The five managed entity kinds and their typed records
//! - The [`Record`] trait that parameterises replica operations per kind
//! - [`ChangeMessage`] as delivered by the broadcast hub
//! - [`ApiResponse`] as returned by the authoritative CRUD source
//!
//! This is a pure types crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entity;
mod error;
mod message;
mod response;

pub use entity::{
    Chart, CollectionCounts, Collections, EntityKind, Product, Record, Template, TextAsset,
    Timestamp, VisualAsset,
};
pub use error::{ProtocolError, ProtocolResult};
pub use message::{ChangeAction, ChangeMessage};
pub use response::{ApiFailure, ApiResponse};
