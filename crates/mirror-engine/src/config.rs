//! Run configuration, loaded once from TOML and handed to each component.

use crate::error::{MirrorError, MirrorResult};
use crate::netrc::Netrc;
use crate::snapshot::category_for;
use mirror_ftp::{DataChannelMode, FtpConnectionConfig, TransferType};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ─── Sections ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    pub server: ServerConfig,
    pub local: LocalPaths,
    #[serde(default)]
    pub roots: Vec<RootConfig>,
    #[serde(default)]
    pub products: ProductRules,
    #[serde(default)]
    pub ancillary: Option<AncillaryConfig>,
    #[serde(default)]
    pub general: GeneralConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Credentials file consulted when no username is configured.
    #[serde(default)]
    pub netrc: Option<PathBuf>,
    #[serde(default)]
    pub data_channel_mode: DataChannelMode,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_sec: u64,
    #[serde(default = "default_transfer_timeout")]
    pub transfer_timeout_sec: u64,
    #[serde(default = "default_data_timeout")]
    pub data_timeout_sec: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// List with MLSD when the server advertises it.
    #[serde(default)]
    pub use_mlsd: bool,
    /// Substring allow-list applied to listed file paths.
    #[serde(default)]
    pub file_filter: Vec<String>,
}

fn default_port() -> u16 {
    21
}
fn default_concurrency() -> usize {
    4
}
fn default_connect_timeout() -> u64 {
    30
}
fn default_transfer_timeout() -> u64 {
    300
}
fn default_data_timeout() -> u64 {
    30
}
fn default_poll_interval() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalPaths {
    /// Where raw artifacts land before dispatch.
    pub ftp_inbox: PathBuf,
    pub snapshot_dir: PathBuf,
    pub bad_artifact_log: PathBuf,
}

/// One remote tree to mirror and the store its products go to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootConfig {
    pub remote: String,
    pub data_store: PathBuf,
    #[serde(default)]
    pub category: Option<String>,
}

impl RootConfig {
    /// Snapshot category: the configured one or one derived from the path.
    pub fn category(&self) -> String {
        match &self.category {
            Some(c) if !c.trim().is_empty() => c.trim().to_string(),
            _ => category_for(&self.remote),
        }
    }
}

/// Names that make up a valid product archive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProductRules {
    pub product_prefixes: Vec<String>,
    pub payload_suffixes: Vec<String>,
    pub header_suffixes: Vec<String>,
    /// Suffixes under which gzip content is treated as a tar archive.
    pub archive_suffixes: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for ProductRules {
    fn default() -> Self {
        Self {
            product_prefixes: strings(&["AE_OPER_ALD_U_N_", "AE_OPER_AUX_MET_12_"]),
            payload_suffixes: strings(&[".DBL", ".dbl"]),
            header_suffixes: strings(&[".HDR", ".hdr"]),
            archive_suffixes: strings(&[".TGZ", ".tgz"]),
        }
    }
}

/// Date-based download of auxiliary files into one flat directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AncillaryConfig {
    pub remote_dirs: Vec<String>,
    #[serde(default)]
    pub name_prefixes: Vec<String>,
    pub data_dir: PathBuf,
    #[serde(default = "default_replace_markers")]
    pub replace_markers: Vec<String>,
}

fn default_replace_markers() -> Vec<String> {
    strings(&["ORBCNT"])
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub verbose: bool,
    pub log_file: Option<PathBuf>,
    pub log_level: String,
    /// One JSON object per log line, for log aggregation.
    pub log_json: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_file: None,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

/// Knobs of the transfer scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    pub concurrency: usize,
    pub connect_timeout: Duration,
    pub transfer_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            connect_timeout: Duration::from_secs(default_connect_timeout()),
            transfer_timeout: Duration::from_secs(default_transfer_timeout()),
            poll_interval: Duration::from_millis(default_poll_interval()),
        }
    }
}

// ─── Loading ─────────────────────────────────────────────────────────

impl MirrorConfig {
    pub fn load(path: &Path) -> MirrorResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| MirrorError::Config(format!("reading {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> MirrorResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> MirrorResult<()> {
        let fail = |msg: &str| Err(MirrorError::Config(msg.to_string()));

        if self.server.host_name().is_empty() {
            return fail("server.host must not be empty");
        }
        if self.server.concurrency == 0 {
            return fail("server.concurrency must be at least 1");
        }
        if self.server.connect_timeout_sec == 0
            || self.server.transfer_timeout_sec == 0
            || self.server.data_timeout_sec == 0
        {
            return fail("server timeouts must be non-zero");
        }
        if self.roots.is_empty() {
            return fail("at least one [[roots]] entry is required");
        }
        if let Some(root) = self.roots.iter().find(|r| !r.remote.starts_with('/')) {
            return Err(MirrorError::Config(format!(
                "remote root '{}' must be an absolute path",
                root.remote
            )));
        }
        if self.products.product_prefixes.is_empty() || self.products.payload_suffixes.is_empty() {
            return fail("products.product_prefixes and products.payload_suffixes must not be empty");
        }
        if let Some(anc) = &self.ancillary {
            if anc.remote_dirs.iter().any(|d| !d.starts_with('/')) {
                return fail("ancillary.remote_dirs must be absolute paths");
            }
        }
        Ok(())
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            concurrency: self.server.concurrency,
            connect_timeout: Duration::from_secs(self.server.connect_timeout_sec),
            transfer_timeout: Duration::from_secs(self.server.transfer_timeout_sec),
            poll_interval: Duration::from_millis(self.server.poll_interval_ms.max(1)),
        }
    }
}

impl ServerConfig {
    /// Host without an `ftp://` scheme or trailing slash.
    pub fn host_name(&self) -> &str {
        let host = self.host.trim();
        host.strip_prefix("ftp://")
            .unwrap_or(host)
            .trim_end_matches('/')
    }

    fn netrc_path(&self) -> Option<PathBuf> {
        match &self.netrc {
            Some(path) => match path.strip_prefix("~") {
                Ok(rest) => dirs::home_dir().map(|home| home.join(rest)),
                Err(_) => Some(path.clone()),
            },
            None => dirs::home_dir().map(|home| home.join(".netrc")),
        }
    }

    /// Resolve login credentials: explicit values, then netrc, then
    /// anonymous.
    pub fn credentials(&self) -> MirrorResult<(String, String)> {
        if let Some(user) = &self.username {
            return Ok((user.clone(), self.password.clone().unwrap_or_default()));
        }
        if let Some(path) = self.netrc_path() {
            if let Some(creds) = Netrc::load(&path)?
                .as_ref()
                .and_then(|n| n.lookup(self.host_name()))
            {
                if let Some(login) = &creds.login {
                    return Ok((login.clone(), creds.password.clone().unwrap_or_default()));
                }
            }
        }
        let anon = FtpConnectionConfig::default();
        Ok((anon.username, anon.password))
    }

    pub fn connection_config(&self) -> MirrorResult<FtpConnectionConfig> {
        let (username, password) = self.credentials()?;
        Ok(FtpConnectionConfig {
            host: self.host_name().to_string(),
            port: self.port,
            username,
            password,
            transfer_type: TransferType::Binary,
            data_channel_mode: self.data_channel_mode,
            connect_timeout_sec: self.connect_timeout_sec,
            data_timeout_sec: self.data_timeout_sec,
            use_mlsd: self.use_mlsd,
            ..FtpConnectionConfig::default()
        })
    }
}
