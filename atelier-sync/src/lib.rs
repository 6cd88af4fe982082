//! # atelier-sync - Real-time synchronization core for collaborative workspaces
//!
//! Keeps a client's view of a shared workspace consistent with the server:
//! one WebSocket connection carries heterogeneous update batches that are
//! reconciled into a normalized entity cache, alongside presence records and
//! pending document changes.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   JSON frames   ┌──────────────┐
//! │ ConnectionManager│ ◄─────────────► │ Workspace WS │
//! │ heartbeat/retry  │                 │ server       │
//! └────────┬─────────┘                 └──────────────┘
//!          │ one frame at a time
//!          ▼
//! ┌──────────────────┐  subscribe/fetch/submit  ┌──────────────┐
//! │ SyncClient       │ ───────────────────────► │ Collaborators│
//! │ demux + dispatch │                          │ (HTTP API)   │
//! └──┬─────┬──────┬──┘                          └──────────────┘
//!    │     │      │
//!    │     │      └──► ChannelRegistry / ChannelOccupancy
//!    │     ▼
//!    │  reconcile ──► NormalizedCache ─ PresenceOverlay ─ PendingChangeQueue
//!    ▼
//! SyncEvent broadcast
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire frames, channels, session ids
//! - [`entity`]: closed entity-kind set, payloads, index entries
//! - [`classify`]: kind classification of deletions and upserts
//! - [`cache`]: normalized cache with secondary indices
//! - [`reconcile`]: applies update batches to the store
//! - [`presence`]: per-project presence overlay
//! - [`pending`]: revision-ordered pending change queue
//! - [`channels`]: subscription registry and occupancy counter
//! - [`api`]: request/response collaborator traits
//! - [`connection`]: transport lifecycle, heartbeat, reconnect
//! - [`client`]: `SyncClient` context object
//! - [`config`]: `SyncConfig`

pub mod api;
pub mod cache;
pub mod channels;
pub mod classify;
pub mod client;
pub mod config;
pub mod connection;
pub mod entity;
pub mod pending;
pub mod presence;
pub mod protocol;
pub mod reconcile;

// Re-exports for convenience
pub use api::{ApiError, ChangeApi, ChannelApi, Collaborators, FetchApi};
pub use cache::{LoadState, NormalizedCache, UpsertOutcome};
pub use channels::{ChannelCommand, ChannelOccupancy, ChannelRegistry, Retention, SubscribeOutcome};
pub use classify::{classify_deletions, classify_entities, classify_entity, ClassifyError};
pub use client::{SyncClient, SyncError, SyncEvent};
pub use config::{ConfigError, ReconnectPolicy, SyncConfig};
pub use connection::{ConnectionState, ConnectionStatus};
pub use entity::{Entity, EntityId, EntityKind, IndexEntry, IndexKey, IndexName, Route, UpdateBatch};
pub use pending::{ChangeTarget, PendingChange, PendingChangeQueue, Revision};
pub use presence::PresenceOverlay;
pub use protocol::{Channel, ChannelKind, ProtocolError, SessionId, WsMessage};
pub use reconcile::{reconcile, ReconcileError, ReconcileReport, Store};
