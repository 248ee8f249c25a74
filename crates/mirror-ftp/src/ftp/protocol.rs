//! Control-channel codec (RFC 959 §4.2).
//!
//! Commands go out CRLF-terminated. Replies are assembled line by line by
//! [`ReplyAssembler`]: `NNN text` is a complete reply, `NNN-text` opens a
//! multi-line reply that runs until a line starting with `NNN `.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::types::Reply;
use std::net::IpAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Commands whose argument must not reach the log.
const SECRET_VERBS: [&str; 2] = ["PASS", "ACCT"];

pub struct ControlChannel {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    local_ip: Option<IpAddr>,
}

impl ControlChannel {
    pub fn new(stream: TcpStream) -> Self {
        let local_ip = stream.local_addr().ok().map(|a| a.ip());
        let (rd, wr) = stream.into_split();
        Self {
            reader: BufReader::new(rd),
            writer: wr,
            local_ip,
        }
    }

    /// Our end of the control connection; active-mode listeners bind here.
    pub fn local_ip(&self) -> Option<IpAddr> {
        self.local_ip
    }

    pub async fn send(&mut self, cmd: &str) -> FtpResult<()> {
        self.writer.write_all(cmd.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        log::trace!(">>> {}", loggable(cmd));
        Ok(())
    }

    pub async fn read_reply(&mut self) -> FtpResult<Reply> {
        let mut assembler = ReplyAssembler::default();
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                return Err(FtpError::disconnected("server closed the control connection"));
            }
            if let Some(reply) = assembler.push(line.trim_end_matches(['\r', '\n']))? {
                log::trace!("<<< {}", reply.lines.last().map(String::as_str).unwrap_or(""));
                return Ok(reply);
            }
        }
    }

    /// Send `cmd` and read its reply, whatever the code.
    pub async fn command(&mut self, cmd: &str) -> FtpResult<Reply> {
        self.send(cmd).await?;
        self.read_reply().await
    }

    /// Send `cmd` and fail unless the reply is in `class` (first digit).
    pub async fn expect(&mut self, cmd: &str, class: u16) -> FtpResult<Reply> {
        let reply = self.command(cmd).await?;
        if reply.class() != class {
            return Err(FtpError::rejected(&reply));
        }
        Ok(reply)
    }

    /// Send `cmd` and require a 2xx reply.
    pub async fn expect_completion(&mut self, cmd: &str) -> FtpResult<Reply> {
        self.expect(cmd, 2).await
    }

    /// Half-close so the server sees EOF.
    pub async fn shutdown(&mut self) {
        let _ = self.writer.shutdown().await;
    }
}

fn loggable(cmd: &str) -> String {
    match cmd.split_once(' ') {
        Some((verb, _)) if SECRET_VERBS.iter().any(|v| verb.eq_ignore_ascii_case(v)) => {
            format!("{} ****", verb)
        }
        _ => cmd.to_string(),
    }
}

/// Collects the lines of one reply.
#[derive(Debug, Default)]
pub struct ReplyAssembler {
    open: Option<(u16, Vec<String>)>,
}

impl ReplyAssembler {
    /// Feed one line (without CRLF). Returns the reply once it is complete.
    pub fn push(&mut self, line: &str) -> FtpResult<Option<Reply>> {
        if let Some((code, mut lines)) = self.open.take() {
            lines.push(line.to_string());
            if closes(code, line) {
                return Ok(Some(Reply { code, lines }));
            }
            self.open = Some((code, lines));
            return Ok(None);
        }

        let code = reply_code(line)?;
        if line.as_bytes().get(3) == Some(&b'-') {
            self.open = Some((code, vec![line.to_string()]));
            Ok(None)
        } else {
            Ok(Some(Reply {
                code,
                lines: vec![line.to_string()],
            }))
        }
    }
}

fn closes(code: u16, line: &str) -> bool {
    let prefix = code.to_string();
    line.strip_prefix(prefix.as_str())
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(' '))
}

fn reply_code(line: &str) -> FtpResult<u16> {
    let digits = line
        .get(..3)
        .filter(|d| d.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| FtpError::protocol_error(format!("not a reply line: {:?}", line)))?;
    match line.as_bytes().get(3) {
        None | Some(b' ') | Some(b'-') => digits
            .parse()
            .map_err(|_| FtpError::protocol_error(format!("bad reply code: {:?}", line))),
        Some(_) => Err(FtpError::protocol_error(format!("not a reply line: {:?}", line))),
    }
}
