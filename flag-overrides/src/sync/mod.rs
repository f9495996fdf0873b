//! Keeps the server-side override cookie in step with a client-side flag client.
//!
//! The client library is injected as a [`FlagSource`]; overrides travel to the
//! server through an [`OverrideTransport`], normally [`HttpOverrideTransport`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::overrides::{FlagValue, OverridesBag};

pub mod auto_sync;
pub mod snapshot;
pub mod transport;

pub use auto_sync::{AutoSyncHandle, OverrideSync, SyncOptions};
pub use snapshot::{capture_snapshot, collect_overrides, snapshot_changed, Snapshot};
pub use transport::HttpOverrideTransport;

/// The capabilities we need from a client-side flag library.
#[async_trait]
pub trait FlagSource {
    /// Resolves once the client has loaded its flags. Might never resolve.
    async fn flags_ready(&self);

    /// Fires every time the client re-evaluates its flags.
    fn subscribe(&self) -> broadcast::Receiver<()>;

    fn flag_keys(&self) -> Vec<String>;

    /// `None` when the client has no value for the key.
    fn flag_value(&self, key: &str) -> Option<FlagValue>;

    fn flag_payload(&self, key: &str) -> Option<Value>;
}

#[async_trait]
pub trait OverrideTransport {
    /// Replaces the server-side overrides with `bag`.
    async fn push(&self, bag: &OverridesBag) -> Result<(), SyncError>;

    /// Removes the server-side overrides entirely.
    async fn clear(&self) -> Result<(), SyncError>;
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("override request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("override endpoint responded with {0}")]
    UnexpectedStatus(StatusCode),
}

/// Waits for the source to report its flags, but never longer than `timeout`.
/// Returns whether the source actually became ready.
pub async fn wait_for_flags<S>(source: &S, timeout: Duration) -> bool
where
    S: FlagSource + ?Sized,
{
    match tokio::time::timeout(timeout, source.flags_ready()).await {
        Ok(()) => true,
        Err(_) => {
            tracing::debug!(?timeout, "flags not ready in time, using what is loaded");
            false
        }
    }
}
