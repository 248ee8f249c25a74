//! Control connection setup.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::ControlChannel;
use crate::ftp::types::{FtpConnectionConfig, Reply};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};

/// Connect and wait for the 220 greeting. The whole exchange, including a
/// `120` "ready in n minutes" preamble, shares one connect timeout.
pub async fn open_control(config: &FtpConnectionConfig) -> FtpResult<(ControlChannel, Reply)> {
    let addr = config.address();
    let deadline = Instant::now() + Duration::from_secs(config.connect_timeout_sec);

    let tcp = timeout_at(deadline, TcpStream::connect(&addr))
        .await
        .map_err(|_| FtpError::timeout(format!("connecting to {}", addr)))?
        .map_err(|e| FtpError::connection_failed(format!("{}: {}", addr, e)))?;
    let _ = tcp.set_nodelay(true);

    let mut control = ControlChannel::new(tcp);
    loop {
        let greeting = timeout_at(deadline, control.read_reply())
            .await
            .map_err(|_| FtpError::timeout(format!("waiting for greeting from {}", addr)))??;
        match greeting.code {
            120 => log::debug!("{} not ready yet: {}", addr, greeting.message()),
            220 => return Ok((control, greeting)),
            _ => return Err(FtpError::rejected(&greeting)),
        }
    }
}
