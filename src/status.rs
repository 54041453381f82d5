//! Shared connectivity status
//!
//! The controller is the only writer; the presentation side reads the latest
//! value on demand or subscribes for change notifications. A `watch` channel
//! gives both: single retained value behind a reader/writer lock, plus wakeups
//! for subscribers, so a consumer never observes a stale transition forever.

use serde::Serialize;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;

/// Latest known connectivity state. Only the most recent value is retained.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Status {
    pub online: bool,
    pub message: String,
    /// Unix timestamp of the probe/login attempt that produced this status
    pub last_check: u64,
}

impl Status {
    fn new(online: bool, message: impl Into<String>) -> Self {
        Self {
            online,
            message: message.into(),
            last_check: unix_now(),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Handle publishing status transitions to the presentation boundary
#[derive(Clone)]
pub struct StatusBoard {
    tx: watch::Sender<Status>,
}

impl StatusBoard {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Status::new(false, "初始化中"));
        Self { tx }
    }

    /// Publish a new status. Subscribers are woken; pull readers see it on
    /// their next `get`.
    pub fn set(&self, online: bool, message: impl Into<String>) -> Status {
        let status = Status::new(online, message);
        self.tx.send_replace(status.clone());
        status
    }

    /// Latest status (pull side)
    pub fn get(&self) -> Status {
        self.tx.borrow().clone()
    }

    /// Change notifications (push side)
    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.tx.subscribe()
    }

    /// Mirror the latest status to a JSON file for headless consumers.
    /// Best-effort: a write failure is logged and otherwise ignored.
    pub async fn mirror_to_file(&self, path: &Path) {
        let status = self.get();
        match serde_json::to_vec_pretty(&status) {
            Ok(json) => {
                if let Err(e) = tokio::fs::write(path, json).await {
                    tracing::warn!("Failed to write {}: {}", path.display(), e);
                }
            }
            Err(e) => tracing::warn!("Failed to serialize status: {}", e),
        }
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}
