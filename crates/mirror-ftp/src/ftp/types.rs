//! Connection settings, session state, listing entries and replies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─── Connection ──────────────────────────────────────────────────────

/// Representation type (RFC 959 `TYPE`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TransferType {
    Ascii,
    #[default]
    Binary,
}

impl TransferType {
    pub fn type_command(self) -> &'static str {
        match self {
            Self::Ascii => "TYPE A",
            Self::Binary => "TYPE I",
        }
    }
}

/// How the data connection is established.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum DataChannelMode {
    /// `PASV`, we connect to the address the server returns.
    #[default]
    Passive,
    /// `EPSV`, we connect to the control host on the returned port.
    ExtendedPassive,
    /// `PORT`, the server connects back to us.
    Active,
    /// `EPRT`, as `Active` but IPv6-capable.
    ExtendedActive,
}

/// Everything needed to open and log in one control connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpConnectionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub transfer_type: TransferType,
    #[serde(default)]
    pub data_channel_mode: DataChannelMode,
    /// Covers TCP connect plus the server greeting.
    #[serde(default = "default_timeout")]
    pub connect_timeout_sec: u64,
    /// Data-channel setup and idle time between data chunks.
    #[serde(default = "default_timeout")]
    pub data_timeout_sec: u64,
    /// Send `OPTS UTF8 ON` when the server advertises UTF8.
    #[serde(default = "default_true")]
    pub request_utf8: bool,
    /// List with `MLSD` when the server advertises it.
    #[serde(default)]
    pub use_mlsd: bool,
    /// Compare the received byte count with `SIZE` when the server has it.
    #[serde(default = "default_true")]
    pub verify_size: bool,
    /// Local address for `PORT`/`EPRT` listeners.
    #[serde(default)]
    pub active_bind: Option<String>,
}

fn default_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for FtpConnectionConfig {
    /// Anonymous login on port 21.
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 21,
            username: "anonymous".into(),
            password: "anonymous@".into(),
            transfer_type: TransferType::Binary,
            data_channel_mode: DataChannelMode::Passive,
            connect_timeout_sec: default_timeout(),
            data_timeout_sec: default_timeout(),
            request_utf8: true,
            use_mlsd: false,
            verify_size: true,
            active_bind: None,
        }
    }
}

impl FtpConnectionConfig {
    pub fn address(&self) -> String {
        host_port(&self.host, self.port)
    }
}

/// `host:port`, bracketing bare IPv6 literals.
pub fn host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// What we learned about a session while logging in, plus transfer counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub address: String,
    pub username: String,
    pub greeting: String,
    pub system: Option<String>,
    pub working_dir: String,
    pub connected_at: DateTime<Utc>,
    pub files_retrieved: u64,
    pub bytes_retrieved: u64,
}

// ─── Listings ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FtpEntryKind {
    File,
    Directory,
    Symlink,
    Unknown,
}

/// One parsed line of a `LIST` or `MLSD` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpEntry {
    pub name: String,
    pub kind: FtpEntryKind,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    /// Unix mode string, or the MLSD `unix.mode` fact.
    pub mode: Option<String>,
    pub link_target: Option<String>,
    /// MLSD facts with lower-cased keys.
    #[serde(default)]
    pub facts: HashMap<String, String>,
}

impl FtpEntry {
    pub fn new(name: impl Into<String>, kind: FtpEntryKind) -> Self {
        Self {
            name: name.into(),
            kind,
            size: 0,
            modified: None,
            mode: None,
            link_target: None,
            facts: HashMap::new(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FtpEntryKind::Directory
    }

    /// `.` and `..`, which some servers include in listings.
    pub fn is_self_or_parent(&self) -> bool {
        self.name == "." || self.name == ".."
    }
}

// ─── Replies ─────────────────────────────────────────────────────────

/// A complete server reply; `lines` holds every line including the code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Last line without its `NNN ` prefix.
    pub fn message(&self) -> &str {
        let last = self.lines.last().map(String::as_str).unwrap_or("");
        last.get(4..).unwrap_or("").trim()
    }

    /// First digit of the code.
    pub fn class(&self) -> u16 {
        self.code / 100
    }

    /// 1xx, more replies follow.
    pub fn is_preliminary(&self) -> bool {
        self.class() == 1
    }

    /// 2xx.
    pub fn is_completion(&self) -> bool {
        self.class() == 2
    }
}

// ─── FEAT ────────────────────────────────────────────────────────────

/// The parts of a `FEAT` reply the client acts on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFeatures {
    pub mlsd: bool,
    pub size: bool,
    pub utf8: bool,
    pub advertised: Vec<String>,
}

impl ServerFeatures {
    /// Interpret a `211-` multi-line `FEAT` reply. Feature lines are the ones
    /// between the first and last line, each indented by one space.
    pub fn from_feat(reply: &Reply) -> Self {
        let advertised: Vec<String> = match reply.lines.len() {
            0..=2 => Vec::new(),
            n => reply.lines[1..n - 1]
                .iter()
                .map(|l| l.trim().to_ascii_uppercase())
                .filter(|l| !l.is_empty())
                .collect(),
        };
        let has = |name: &str| {
            advertised
                .iter()
                .any(|l| l.split_whitespace().next() == Some(name))
        };
        Self {
            mlsd: has("MLSD") || has("MLST"),
            size: has("SIZE"),
            utf8: has("UTF8"),
            advertised,
        }
    }
}
