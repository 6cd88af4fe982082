//! Request/response collaborators the sync core calls out to.
//!
//! The HTTP API itself lives outside this crate. These traits are the only
//! surface the core needs from it: channel subscription, fetching full
//! payloads when the cache has nothing for a key, and submitting local edits.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::entity::{EntityId, EntityKind, IndexName};
use crate::pending::{ChangeTarget, Revision};
use crate::protocol::{Channel, SessionId};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("not found")]
    NotFound,
}

/// Binds channels to a WebSocket session on the server side.
#[async_trait]
pub trait ChannelApi: Send + Sync {
    async fn subscribe(&self, channel: &Channel, session: &SessionId) -> Result<(), ApiError>;

    async fn unsubscribe(&self, channel: &Channel, session: &SessionId) -> Result<(), ApiError>;
}

/// Fetches full payloads. Returned values are raw entity payloads carrying
/// their `@class` discriminant.
#[async_trait]
pub trait FetchApi: Send + Sync {
    async fn fetch_entity(&self, kind: EntityKind, id: EntityId) -> Result<Value, ApiError>;

    /// Every child listed under `parent` in `index`.
    async fn fetch_collection(&self, index: IndexName, parent: EntityId) -> Result<Vec<Value>, ApiError>;
}

#[async_trait]
pub trait ChangeApi: Send + Sync {
    /// Submit a local edit. The server answers with the revision it assigned.
    async fn submit_change(&self, target: ChangeTarget, payload: &Value) -> Result<Revision, ApiError>;
}

/// The collaborators a [`SyncClient`](crate::client::SyncClient) is built with.
#[derive(Clone)]
pub struct Collaborators {
    pub channels: Arc<dyn ChannelApi>,
    pub fetch: Arc<dyn FetchApi>,
    pub changes: Arc<dyn ChangeApi>,
}

impl Collaborators {
    pub fn new(channels: Arc<dyn ChannelApi>, fetch: Arc<dyn FetchApi>, changes: Arc<dyn ChangeApi>) -> Self {
        Self {
            channels,
            fetch,
            changes,
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
