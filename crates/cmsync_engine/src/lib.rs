//! # cmsync Engine
//!
//! Client-side state synchronization and crash recovery.
//!
//! This crate provides:
//! - [`ReplicaStore`] - the in-memory replica of the server-owned
//!   collections, with CRUD through the authoritative source and
//!   idempotent reconciliation of change notifications
//! - [`RealtimeChannel`] - the push subscription feeding the replica, with
//!   bounded reconnection
//! - [`RecoveryCoordinator`] - the boot-time decision procedure between
//!   snapshot import, backup restore and regeneration
//! - [`ClientContext`] - wiring of the above plus the backup timer
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   ChangeStream   ┌────────────────┐
//! │ BroadcastHub  │ ───────────────▶ │ RealtimeChannel│
//! └───────────────┘                  └───────┬────────┘
//!                                            │ reconcile
//! ┌───────────────┐   CRUD           ┌───────▼────────┐  snapshot  ┌──────────────────┐
//! │   CrudApi     │ ◀──────────────▶ │  ReplicaStore  │ ─────────▶ │ LocalPersistence │
//! └───────────────┘                  └───────▲────────┘            └────────▲─────────┘
//!                                            │ import / bulk load           │
//!                                    ┌───────┴────────────┐                 │
//!                                    │ RecoveryCoordinator│ ────────────────┘
//!                                    └────────────────────┘
//! ```
//!
//! The network and the user are reached only through traits
//! ([`CrudApi`], [`BroadcastHub`], [`RecoveryDecider`]), so the engine runs
//! unchanged against HTTP, an in-process server, or the mocks.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod api;
mod config;
mod context;
mod error;
mod realtime;
mod recovery;
mod replica;

pub use api::{BroadcastHub, ChangeStream, CrudApi, MockApi, MockHub};
pub use config::{ChannelConfig, EngineConfig, RetryConfig};
pub use context::{BootOutcome, ClientContext};
pub use error::{FatalInitError, SyncError, SyncResult};
pub use realtime::{ChannelState, ChannelStats, RealtimeChannel};
pub use recovery::{
    ChannelDecider, DecisionRequest, FixedDecider, RecoveryCoordinator, RecoveryDecider,
    RecoveryReport, RecoveryState,
};
pub use replica::{BulkLoadReport, IssueSink, KindFailure, ReplicaStore, SnapshotSink};
