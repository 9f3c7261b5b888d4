//! The remote directory/notification service as seen by the reconciliation
//! engine.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{BatchOutcome, ReconciledUpdate};

#[cfg(feature = "runtime")]
mod athoc;

#[cfg(feature = "runtime")]
pub use athoc::AtHocClient;

/// One identity from the full directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub username: String,
    pub attributes: HashMap<String, String>,
}

impl DirectoryEntry {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("remote configuration error: {0}")]
    Config(String),
}

impl RemoteError {
    /// Failures that happened before a definitive answer reached us.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Transport(_) => true,
            RemoteError::Status { status, .. } => *status == 429 || *status >= 500,
            RemoteError::Auth(_) | RemoteError::Decode(_) | RemoteError::Config(_) => false,
        }
    }
}

#[async_trait]
pub trait DirectoryService: Send + Sync {
    /// Complete worker listing restricted to the requested attributes.
    async fn fetch_directory(&self, attributes: &[String])
        -> Result<Vec<DirectoryEntry>, RemoteError>;

    /// Submits every update in a single call. The service answers per record.
    async fn submit_updates(
        &self,
        field: &str,
        updates: &[ReconciledUpdate],
    ) -> Result<Vec<BatchOutcome>, RemoteError>;

    /// Usernames whose `field` value is older than `older_than_hours`.
    async fn query_stale(&self, field: &str, older_than_hours: u32)
        -> Result<Vec<String>, RemoteError>;
}
