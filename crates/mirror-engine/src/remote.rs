//! The engine's view of the remote host.
//!
//! Everything above this module talks to `RemoteConnector` /
//! `RemoteSession`; `FtpConnector` is the production implementation on top
//! of `mirror-ftp`.

use async_trait::async_trait;
use mirror_ftp::{FtpClient, FtpConnectionConfig, FtpEntry, FtpError, FtpResult};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One logged-in connection to the remote host.
#[async_trait]
pub trait RemoteSession: Send {
    /// Change into `dir` and list it.
    async fn list_dir(&mut self, dir: &str) -> FtpResult<Vec<FtpEntry>>;

    /// Retrieve `remote_path` into `local_path` (binary). Returns bytes written.
    async fn retrieve(&mut self, remote_path: &str, local_path: &Path) -> FtpResult<u64>;

    /// Best-effort logout.
    async fn close(&mut self);
}

/// Opens new sessions against the configured host.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn connect(&self) -> FtpResult<Box<dyn RemoteSession>>;

    /// Host description for log lines.
    fn describe(&self) -> String;
}

// ─── Listing session ─────────────────────────────────────────────────

/// The session a walk lists over. When the connection under it is lost,
/// the next command logs in again, and a listing interrupted that way is
/// retried once on the fresh session.
pub struct ReconnectingSession {
    connector: Arc<dyn RemoteConnector>,
    connect_timeout: Duration,
    session: Option<Box<dyn RemoteSession>>,
    reconnects: usize,
}

impl ReconnectingSession {
    /// Log in once up front; an error here is the caller's to report.
    pub async fn open(connector: Arc<dyn RemoteConnector>, connect_timeout: Duration) -> FtpResult<Self> {
        let session = connect_within(connector.as_ref(), connect_timeout).await?;
        Ok(Self {
            connector,
            connect_timeout,
            session: Some(session),
            reconnects: 0,
        })
    }

    /// Logins after the first one.
    pub fn reconnects(&self) -> usize {
        self.reconnects
    }

    async fn live(&mut self) -> FtpResult<&mut Box<dyn RemoteSession>> {
        if self.session.is_none() {
            let session = connect_within(self.connector.as_ref(), self.connect_timeout).await?;
            self.reconnects += 1;
            debug!(reconnects = self.reconnects, "listing session reopened");
            self.session = Some(session);
        }
        self.session
            .as_mut()
            .ok_or_else(|| FtpError::disconnected("listing session unavailable"))
    }

    /// Forget a session whose control connection can no longer be trusted.
    fn discard_if_lost<T>(&mut self, result: &FtpResult<T>) {
        if matches!(result, Err(e) if e.is_fatal_to_session()) {
            self.session = None;
        }
    }

    async fn list_once(&mut self, dir: &str) -> FtpResult<Vec<FtpEntry>> {
        let result = self.live().await?.list_dir(dir).await;
        self.discard_if_lost(&result);
        result
    }
}

async fn connect_within(connector: &dyn RemoteConnector, connect_timeout: Duration) -> FtpResult<Box<dyn RemoteSession>> {
    match tokio::time::timeout(connect_timeout, connector.connect()).await {
        Ok(result) => result,
        Err(_) => Err(FtpError::timeout(format!(
            "connecting to {} timed out after {}s",
            connector.describe(),
            connect_timeout.as_secs()
        ))),
    }
}

#[async_trait]
impl RemoteSession for ReconnectingSession {
    async fn list_dir(&mut self, dir: &str) -> FtpResult<Vec<FtpEntry>> {
        match self.list_once(dir).await {
            Err(e) if e.is_fatal_to_session() => {
                warn!(dir = %dir, error = %e, "listing session lost, logging in again");
                self.list_once(dir).await
            }
            other => other,
        }
    }

    async fn retrieve(&mut self, remote_path: &str, local_path: &Path) -> FtpResult<u64> {
        let result = self.live().await?.retrieve(remote_path, local_path).await;
        self.discard_if_lost(&result);
        result
    }

    async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
    }
}

// ─── FTP ─────────────────────────────────────────────────────────────

pub struct FtpConnector {
    config: FtpConnectionConfig,
}

impl FtpConnector {
    pub fn new(config: FtpConnectionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RemoteConnector for FtpConnector {
    async fn connect(&self) -> FtpResult<Box<dyn RemoteSession>> {
        let client = FtpClient::connect(self.config.clone()).await?;
        Ok(Box::new(client))
    }

    fn describe(&self) -> String {
        format!("ftp://{}@{}:{}", self.config.username, self.config.host, self.config.port)
    }
}

#[async_trait]
impl RemoteSession for FtpClient {
    async fn list_dir(&mut self, dir: &str) -> FtpResult<Vec<FtpEntry>> {
        self.cwd(dir).await?;
        self.list().await
    }

    async fn retrieve(&mut self, remote_path: &str, local_path: &Path) -> FtpResult<u64> {
        self.download(remote_path, local_path).await
    }

    async fn close(&mut self) {
        let _ = self.quit().await;
    }
}
