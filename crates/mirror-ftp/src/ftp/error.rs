//! Errors raised by an FTP session, and the classification of negative
//! replies into them.

use crate::ftp::types::Reply;
use std::fmt;

#[derive(Debug, Clone)]
pub struct FtpError {
    pub kind: FtpErrorKind,
    pub message: String,
    /// Server reply code behind the error, if it came from a reply.
    pub code: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtpErrorKind {
    /// Host unreachable or name resolution failed.
    ConnectionFailed,
    /// Login refused (430/530).
    AuthFailed,
    /// Any other 4xx/5xx reply.
    CommandRejected,
    /// PASV/EPSV/PORT/EPRT setup failed, or 425/426.
    DataChannelFailed,
    /// Transfer aborted or short.
    TransferFailed,
    /// Reply could not be understood.
    ProtocolError,
    /// Local I/O failure.
    IoError,
    Timeout,
    /// Control connection closed (or 421).
    Disconnected,
    PermissionDenied,
    NotFound,
    InvalidConfig,
}

impl FtpErrorKind {
    fn describe(self) -> &'static str {
        match self {
            Self::ConnectionFailed => "connection failed",
            Self::AuthFailed => "login refused",
            Self::CommandRejected => "command rejected",
            Self::DataChannelFailed => "data channel failed",
            Self::TransferFailed => "transfer failed",
            Self::ProtocolError => "protocol error",
            Self::IoError => "local I/O error",
            Self::Timeout => "timed out",
            Self::Disconnected => "disconnected",
            Self::PermissionDenied => "permission denied",
            Self::NotFound => "not found",
            Self::InvalidConfig => "invalid configuration",
        }
    }
}

pub type FtpResult<T> = Result<T, FtpError>;

impl FtpError {
    pub fn new(kind: FtpErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            code: None,
        }
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ConnectionFailed, msg)
    }

    pub fn data_channel(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::DataChannelFailed, msg)
    }

    pub fn transfer_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::TransferFailed, msg)
    }

    pub fn protocol_error(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ProtocolError, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Timeout, msg)
    }

    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Disconnected, msg)
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::InvalidConfig, msg)
    }

    /// Error for an unexpected reply, classified by its code.
    pub fn rejected(reply: &Reply) -> Self {
        Self::from_reply(reply.code, &reply.text())
    }

    /// Classify a reply code. 450/550 carry no finer code, so their text
    /// decides between a missing path and a permission problem.
    pub fn from_reply(code: u16, text: &str) -> Self {
        let kind = match code {
            421 => FtpErrorKind::Disconnected,
            425 | 426 => FtpErrorKind::DataChannelFailed,
            430 | 530 | 532 => FtpErrorKind::AuthFailed,
            451 | 452 | 552 => FtpErrorKind::TransferFailed,
            450 | 550 => classify_unavailable(text),
            400..=599 => FtpErrorKind::CommandRejected,
            _ => FtpErrorKind::ProtocolError,
        };
        Self {
            kind,
            message: text.to_string(),
            code: Some(code),
        }
    }

    /// The control connection cannot be trusted after this error; a new
    /// session is needed.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self.kind,
            FtpErrorKind::Disconnected
                | FtpErrorKind::ConnectionFailed
                | FtpErrorKind::AuthFailed
                | FtpErrorKind::Timeout
                | FtpErrorKind::ProtocolError
                | FtpErrorKind::TransferFailed
                | FtpErrorKind::DataChannelFailed
        )
    }

    /// The path does not exist (or is hidden from this login).
    pub fn is_missing(&self) -> bool {
        matches!(self.kind, FtpErrorKind::NotFound | FtpErrorKind::PermissionDenied)
    }
}

fn classify_unavailable(text: &str) -> FtpErrorKind {
    let lower = text.to_ascii_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("access") {
        FtpErrorKind::PermissionDenied
    } else if lower.contains("no such") || lower.contains("not found") || lower.contains("doesn't exist") {
        FtpErrorKind::NotFound
    } else {
        FtpErrorKind::CommandRejected
    }
}

impl fmt::Display for FtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} ({}): {}", self.kind.describe(), code, self.message),
            None => write!(f, "{}: {}", self.kind.describe(), self.message),
        }
    }
}

impl std::error::Error for FtpError {}

impl From<std::io::Error> for FtpError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::TimedOut => Self::timeout(e.to_string()),
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
                Self::disconnected(e.to_string())
            }
            _ => Self::new(FtpErrorKind::IoError, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_replies_are_auth_failures() {
        for code in [430, 530, 532] {
            let e = FtpError::from_reply(code, "Login incorrect.");
            assert_eq!(e.kind, FtpErrorKind::AuthFailed);
            assert_eq!(e.code, Some(code));
            assert!(e.is_fatal_to_session());
        }
    }

    #[test]
    fn unavailable_file_is_classified_by_text() {
        assert_eq!(
            FtpError::from_reply(550, "550 No such file or directory").kind,
            FtpErrorKind::NotFound
        );
        assert_eq!(
            FtpError::from_reply(550, "550 Permission denied").kind,
            FtpErrorKind::PermissionDenied
        );
        assert_eq!(FtpError::from_reply(550, "550 Failed").kind, FtpErrorKind::CommandRejected);
    }

    #[test]
    fn missing_paths_keep_the_session() {
        let e = FtpError::from_reply(550, "550 No such file");
        assert!(e.is_missing());
        assert!(!e.is_fatal_to_session());
        assert!(!FtpError::from_reply(502, "502 Not implemented").is_fatal_to_session());
    }

    #[test]
    fn display_names_kind_and_code() {
        let e = FtpError::from_reply(421, "421 Timeout");
        assert_eq!(e.to_string(), "disconnected (421): 421 Timeout");
        assert_eq!(FtpError::timeout("greeting").to_string(), "timed out: greeting");
    }

    #[test]
    fn reset_socket_means_disconnected() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(FtpError::from(io).kind, FtpErrorKind::Disconnected);
    }
}
