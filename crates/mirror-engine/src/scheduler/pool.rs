//! Transfer handles and the pool that tracks them.
//!
//! A handle owns at most one remote session. It connects on first use and
//! drops the session after a timeout or any error that leaves the control
//! connection unusable, so the next task it is bound to logs in afresh.

use crate::error::{MirrorError, MirrorResult};
use crate::remote::{RemoteConnector, RemoteSession};
use crate::types::DownloadTask;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::debug;

pub struct TransferHandle {
    pub id: usize,
    connector: Arc<dyn RemoteConnector>,
    session: Option<Box<dyn RemoteSession>>,
    connect_timeout: Duration,
}

impl TransferHandle {
    pub fn new(id: usize, connector: Arc<dyn RemoteConnector>, connect_timeout: Duration) -> Self {
        Self {
            id,
            connector,
            session: None,
            connect_timeout,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    async fn connect(
        connector: Arc<dyn RemoteConnector>,
        connect_timeout: Duration,
    ) -> MirrorResult<Box<dyn RemoteSession>> {
        match time::timeout(connect_timeout, connector.connect()).await {
            Ok(Ok(session)) => Ok(session),
            Ok(Err(e)) => Err(MirrorError::Transfer(format!("connecting: {}", e))),
            Err(_) => Err(MirrorError::Transfer(format!(
                "connecting to {} timed out after {}s",
                connector.describe(),
                connect_timeout.as_secs()
            ))),
        }
    }

    async fn retrieve(&mut self, task: &DownloadTask) -> MirrorResult<u64> {
        if self.session.is_none() {
            self.session = Some(Self::connect(self.connector.clone(), self.connect_timeout).await?);
            debug!(handle = self.id, "handle connected");
        }
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| MirrorError::Transfer("handle has no session".to_string()))?;
        match session.retrieve(&task.remote_path, &task.local_path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                if e.is_fatal_to_session() {
                    self.session = None;
                }
                Err(MirrorError::Transfer(format!("{}: {}", task.remote_path, e)))
            }
        }
    }

    /// Download `task`, giving up after `timeout` in total.
    pub async fn fetch(&mut self, task: &DownloadTask, timeout: Duration) -> MirrorResult<u64> {
        match time::timeout(timeout, self.retrieve(task)).await {
            Ok(result) => result,
            Err(_) => {
                // The session is mid-transfer; it cannot be reused.
                self.session = None;
                Err(MirrorError::Transfer(format!(
                    "{}: timed out after {}s",
                    task.remote_path,
                    timeout.as_secs_f32()
                )))
            }
        }
    }

    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
    }
}

/// Free/bound counts at one instant. `free + bound == capacity` always,
/// and `bound_paths == bound` while no remote path is held by two handles.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub capacity: usize,
    pub free: usize,
    pub bound: usize,
    /// Distinct remote paths among the bound handles.
    pub bound_paths: usize,
}

/// Fixed set of handles. A bound handle is away in a transfer task; the
/// pool only remembers which task it went with.
pub struct HandlePool {
    free: Vec<TransferHandle>,
    bound: HashMap<usize, String>,
    capacity: usize,
}

impl HandlePool {
    pub fn new(handles: Vec<TransferHandle>) -> Self {
        let capacity = handles.len();
        Self {
            // Reversed so `pop` hands out handle 0 first.
            free: handles.into_iter().rev().collect(),
            bound: HashMap::new(),
            capacity,
        }
    }

    pub fn has_free(&self) -> bool {
        !self.free.is_empty()
    }

    /// Take a free handle for `task`.
    pub fn bind(&mut self, task: &DownloadTask) -> Option<TransferHandle> {
        let handle = self.free.pop()?;
        self.bound.insert(handle.id, task.remote_path.clone());
        Some(handle)
    }

    /// Return a handle from its transfer task.
    pub fn release(&mut self, handle: TransferHandle) {
        self.bound.remove(&handle.id);
        self.free.push(handle);
    }

    /// Remote path the handle `id` is currently transferring.
    pub fn bound_to(&self, id: usize) -> Option<&str> {
        self.bound.get(&id).map(String::as_str)
    }

    pub fn stats(&self) -> PoolStats {
        let paths: HashSet<&str> = self.bound.keys().filter_map(|id| self.bound_to(*id)).collect();
        PoolStats {
            capacity: self.capacity,
            free: self.free.len(),
            bound: self.bound.len(),
            bound_paths: paths.len(),
        }
    }

    /// Take every free handle out, e.g. to close them.
    pub fn drain(&mut self) -> Vec<TransferHandle> {
        std::mem::take(&mut self.free)
    }
}
