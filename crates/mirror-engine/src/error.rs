// mirror-engine: error types

use mirror_ftp::FtpError;
use std::fmt;

#[derive(Debug, Clone)]
pub enum MirrorError {
    /// Invalid or unreadable configuration. Fatal for the run.
    Config(String),
    /// A remote directory could not be listed.
    Listing(String),
    /// A download failed or timed out.
    Transfer(String),
    /// Artifact content is not a supported format or the archive is invalid.
    Unpack(String),
    /// A recognised product could not be put in its final place.
    Convert(String),
    /// Local directory creation, rename or delete failed.
    Filesystem(String),
    /// Snapshot or bad-artifact log could not be read or written.
    Snapshot(String),
    /// Remote host unreachable or refused the login.
    Remote(FtpError),
}

impl fmt::Display for MirrorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
            Self::Listing(msg) => write!(f, "Listing error: {}", msg),
            Self::Transfer(msg) => write!(f, "Transfer error: {}", msg),
            Self::Unpack(msg) => write!(f, "Unpack error: {}", msg),
            Self::Convert(msg) => write!(f, "Convert error: {}", msg),
            Self::Filesystem(msg) => write!(f, "Filesystem error: {}", msg),
            Self::Snapshot(msg) => write!(f, "Snapshot error: {}", msg),
            Self::Remote(e) => write!(f, "Remote error: {}", e),
        }
    }
}

impl std::error::Error for MirrorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Remote(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FtpError> for MirrorError {
    fn from(e: FtpError) -> Self {
        Self::Remote(e)
    }
}

impl From<std::io::Error> for MirrorError {
    fn from(e: std::io::Error) -> Self {
        Self::Filesystem(e.to_string())
    }
}

impl From<toml::de::Error> for MirrorError {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}

impl MirrorError {
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

pub type MirrorResult<T> = Result<T, MirrorError>;
