//! Stateful FTP client owning one control connection.
//!
//! `connect()` opens the control connection, logs in, queries `FEAT`, `SYST`
//! and `PWD`, and sets the configured `TYPE`. Transfer commands go through
//! [`FtpClient::start_transfer`] / [`FtpClient::finish_transfer`], which
//! bracket the data connection with its preliminary and completion replies.

use crate::ftp::connection;
use crate::ftp::error::{FtpError, FtpErrorKind, FtpResult};
use crate::ftp::parser;
use crate::ftp::protocol::ControlChannel;
use crate::ftp::transfer::{self, DataChannel};
use crate::ftp::types::*;
use chrono::Utc;
use std::time::Duration;
use tokio::net::TcpStream;
use uuid::Uuid;

pub struct FtpClient {
    control: ControlChannel,
    config: FtpConnectionConfig,
    current_type: TransferType,
    pub info: SessionInfo,
    pub features: ServerFeatures,
}

impl FtpClient {
    pub async fn connect(config: FtpConnectionConfig) -> FtpResult<Self> {
        if config.host.trim().is_empty() {
            return Err(FtpError::invalid_config("host must not be empty"));
        }

        let (mut control, greeting) = connection::open_control(&config).await?;
        login(&mut control, &config).await?;

        let features = match control.command("FEAT").await? {
            reply if reply.is_completion() => ServerFeatures::from_feat(&reply),
            _ => ServerFeatures::default(),
        };
        if config.request_utf8 && features.utf8 {
            // Advisory; servers that advertise UTF8 often ignore OPTS.
            let _ = control.command("OPTS UTF8 ON").await?;
        }
        let system = match control.command("SYST").await? {
            reply if reply.is_completion() => Some(reply.message().to_string()),
            _ => None,
        };
        let working_dir = match control.command("PWD").await? {
            reply if reply.is_completion() => parse_pwd(&reply.text()).unwrap_or_else(|_| "/".into()),
            _ => "/".into(),
        };
        control.expect_completion(config.transfer_type.type_command()).await?;

        let info = SessionInfo {
            id: Uuid::new_v4().to_string(),
            address: config.address(),
            username: config.username.clone(),
            greeting: greeting.message().to_string(),
            system,
            working_dir,
            connected_at: Utc::now(),
            files_retrieved: 0,
            bytes_retrieved: 0,
        };
        log::debug!(
            "session {} logged in to {} as {} (system {:?})",
            info.id,
            info.address,
            info.username,
            info.system
        );

        Ok(Self {
            control,
            current_type: config.transfer_type,
            config,
            info,
            features,
        })
    }

    pub fn data_timeout(&self) -> Duration {
        Duration::from_secs(self.config.data_timeout_sec)
    }

    pub(crate) fn verify_size(&self) -> bool {
        self.config.verify_size && self.features.size
    }

    // ─── Navigation ──────────────────────────────────────────────

    pub async fn cwd(&mut self, path: &str) -> FtpResult<()> {
        self.control.expect_completion(&format!("CWD {}", path)).await?;
        self.info.working_dir = path.to_string();
        Ok(())
    }

    pub async fn set_type(&mut self, tt: TransferType) -> FtpResult<()> {
        if self.current_type != tt {
            self.control.expect_completion(tt.type_command()).await?;
            self.current_type = tt;
        }
        Ok(())
    }

    // ─── Data transfers ──────────────────────────────────────────

    /// Open a data channel and send `cmd`. Returns the data socket and
    /// whether the server already sent its completion reply.
    pub(crate) async fn start_transfer(&mut self, cmd: &str) -> FtpResult<(TcpStream, bool)> {
        let data_timeout = self.data_timeout();
        let channel = DataChannel::open(
            &mut self.control,
            self.config.data_channel_mode,
            &self.config.host,
            data_timeout,
            self.config.active_bind.as_deref(),
        )
        .await?;
        let reply = self.control.command(cmd).await?;
        if !(reply.is_preliminary() || reply.is_completion()) {
            return Err(FtpError::rejected(&reply));
        }
        let tcp = channel.into_stream(data_timeout).await?;
        Ok((tcp, reply.is_completion()))
    }

    /// Wait for the 226/250 that follows the data connection closing.
    pub(crate) async fn finish_transfer(&mut self, completed: bool) -> FtpResult<()> {
        if completed {
            return Ok(());
        }
        let reply = self.control.read_reply().await?;
        if reply.is_completion() {
            Ok(())
        } else {
            Err(FtpError::rejected(&reply))
        }
    }

    /// List the working directory. Uses `MLSD` when enabled in the config
    /// and advertised by the server, `LIST` otherwise.
    pub async fn list(&mut self) -> FtpResult<Vec<FtpEntry>> {
        let verb = if self.config.use_mlsd && self.features.mlsd {
            "MLSD"
        } else {
            "LIST"
        };
        let idle = self.data_timeout();
        let (mut tcp, completed) = self.start_transfer(verb).await?;
        let mut body = Vec::new();
        transfer::pump(&mut tcp, &mut body, idle, verb).await?;
        drop(tcp);
        self.finish_transfer(completed).await?;
        Ok(parser::parse_listing(&String::from_utf8_lossy(&body)))
    }

    /// Size of a remote file (RFC 3659 `SIZE`).
    pub async fn size(&mut self, path: &str) -> FtpResult<u64> {
        let reply = self.control.expect_completion(&format!("SIZE {}", path)).await?;
        reply
            .message()
            .parse()
            .map_err(|_| FtpError::protocol_error(format!("unparseable SIZE reply: {}", reply.text())))
    }

    /// Log out and close the control connection.
    pub async fn quit(&mut self) -> FtpResult<()> {
        let result = self.control.command("QUIT").await;
        self.control.shutdown().await;
        result.map(|_| ())
    }
}

// ─── Login ───────────────────────────────────────────────────────────

async fn login(control: &mut ControlChannel, config: &FtpConnectionConfig) -> FtpResult<()> {
    let user = control.command(&format!("USER {}", config.username)).await?;
    let reply = match user.code {
        230 => return Ok(()),
        331 => control.command(&format!("PASS {}", config.password)).await?,
        _ => user,
    };
    match reply.code {
        202 | 230 => Ok(()),
        421 => Err(FtpError::rejected(&reply)),
        code => Err(FtpError {
            kind: FtpErrorKind::AuthFailed,
            message: format!("login as {} refused: {}", config.username, reply.message()),
            code: Some(code),
        }),
    }
}

/// Path from `257 "/some/path" is current directory`. Doubled quotes inside
/// the path stand for one quote.
fn parse_pwd(text: &str) -> FtpResult<String> {
    let bad = || FtpError::protocol_error(format!("unparseable PWD reply: {}", text));
    let start = text.find('"').ok_or_else(bad)? + 1;
    let mut path = String::new();
    let mut chars = text[start..].chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            if chars.peek() == Some(&'"') {
                chars.next();
                path.push('"');
            } else {
                return Ok(path);
            }
        } else {
            path.push(c);
        }
    }
    Err(bad())
}
