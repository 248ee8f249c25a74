//! Data-channel setup for the four modes of RFC 959 / RFC 2428.
//!
//! Passive modes connect before the transfer command is sent; active modes
//! bind a listener, announce it, and accept the server's connection after
//! the transfer command was accepted.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::ControlChannel;
use crate::ftp::types::{host_port, DataChannelMode};
use lazy_static::lazy_static;
use regex::Regex;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};

/// Read size for data connections.
const CHUNK: usize = 64 * 1024;

lazy_static! {
    static ref PASV_RE: Regex =
        Regex::new(r"(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3})")
            .expect("valid PASV regex");
}

pub enum DataChannel {
    /// Passive: already connected to the server.
    Connected(TcpStream),
    /// Active: waiting for the server to connect.
    Listening(TcpListener),
}

impl DataChannel {
    /// Open a channel in `mode`. `host` is the control connection's host.
    pub async fn open(
        control: &mut ControlChannel,
        mode: DataChannelMode,
        host: &str,
        data_timeout: Duration,
        active_bind: Option<&str>,
    ) -> FtpResult<Self> {
        match mode {
            DataChannelMode::Passive => {
                let reply = control.expect_completion("PASV").await?;
                let addr = pasv_address(&reply.text())?;
                if addr.ip().is_unspecified() {
                    // Some servers answer 0,0,0,0 behind NAT.
                    return connect(&host_port(host, addr.port()), data_timeout).await;
                }
                connect(&addr.to_string(), data_timeout).await
            }
            DataChannelMode::ExtendedPassive => {
                let reply = control.expect_completion("EPSV").await?;
                let port = epsv_port(&reply.text())?;
                connect(&host_port(host, port), data_timeout).await
            }
            DataChannelMode::Active => {
                let (listener, local) = listen(active_bind, control.local_ip()).await?;
                control.expect_completion(&format!("PORT {}", port_argument(&local)?)).await?;
                Ok(Self::Listening(listener))
            }
            DataChannelMode::ExtendedActive => {
                let (listener, local) = listen(active_bind, control.local_ip()).await?;
                control.expect_completion(&format!("EPRT {}", eprt_argument(&local))).await?;
                Ok(Self::Listening(listener))
            }
        }
    }

    /// The connected socket; accepts the server's connection in active mode.
    pub async fn into_stream(self, data_timeout: Duration) -> FtpResult<TcpStream> {
        match self {
            Self::Connected(tcp) => Ok(tcp),
            Self::Listening(listener) => {
                let (tcp, peer) = timeout(data_timeout, listener.accept())
                    .await
                    .map_err(|_| FtpError::data_channel("server did not connect to the data port"))?
                    .map_err(|e| FtpError::data_channel(format!("accepting data connection: {}", e)))?;
                log::trace!("data connection from {}", peer);
                Ok(tcp)
            }
        }
    }
}

async fn connect(addr: &str, data_timeout: Duration) -> FtpResult<DataChannel> {
    let tcp = timeout(data_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| FtpError::data_channel(format!("data connect to {} timed out", addr)))?
        .map_err(|e| FtpError::data_channel(format!("data connect to {}: {}", addr, e)))?;
    Ok(DataChannel::Connected(tcp))
}

/// Bind on `active_bind`, else on the control connection's local address so
/// the announced address is one the server can reach.
async fn listen(
    active_bind: Option<&str>,
    control_ip: Option<IpAddr>,
) -> FtpResult<(TcpListener, SocketAddr)> {
    let ip: IpAddr = match active_bind {
        Some(bind) => bind
            .parse()
            .map_err(|_| FtpError::invalid_config(format!("active bind address {:?}", bind)))?,
        None => control_ip.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
    };
    let listener = TcpListener::bind(SocketAddr::new(ip, 0))
        .await
        .map_err(|e| FtpError::data_channel(format!("binding data listener: {}", e)))?;
    let local = listener
        .local_addr()
        .map_err(|e| FtpError::data_channel(format!("data listener address: {}", e)))?;
    Ok((listener, local))
}

/// Copy a data connection into `sink` until EOF, failing if no data arrives
/// for `idle`. Every failure is reported as a transfer failure or timeout:
/// the server still owes a reply on the control connection, so the session
/// cannot continue after an aborted copy.
pub async fn pump<R, W>(source: &mut R, sink: &mut W, idle: Duration, what: &str) -> FtpResult<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK];
    let mut total = 0u64;
    loop {
        let n = match timeout(idle, source.read(&mut buf)).await {
            Err(_) => {
                return Err(FtpError::timeout(format!(
                    "{}: no data for {}s",
                    what,
                    idle.as_secs()
                )))
            }
            Ok(Err(e)) => return Err(FtpError::transfer_failed(format!("{}: {}", what, e))),
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => n,
        };
        sink.write_all(&buf[..n])
            .await
            .map_err(|e| FtpError::transfer_failed(format!("{}: writing: {}", what, e)))?;
        total += n as u64;
    }
    Ok(total)
}

// ─── Reply / argument formats ────────────────────────────────────────

/// Address from `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`.
/// The parentheses are optional in practice.
pub fn pasv_address(text: &str) -> FtpResult<SocketAddr> {
    let caps = PASV_RE
        .captures(text)
        .ok_or_else(|| FtpError::protocol_error(format!("unparseable PASV reply: {}", text)))?;
    let mut n = [0u8; 6];
    for (i, slot) in n.iter_mut().enumerate() {
        *slot = caps[i + 1]
            .parse()
            .map_err(|_| FtpError::protocol_error(format!("PASV field out of range: {}", text)))?;
    }
    let ip = Ipv4Addr::new(n[0], n[1], n[2], n[3]);
    let port = u16::from_be_bytes([n[4], n[5]]);
    Ok(SocketAddr::new(IpAddr::V4(ip), port))
}

/// Port from `229 Entering Extended Passive Mode (<d><d><d>port<d>)`, where
/// `<d>` is any delimiter character, usually `|`.
pub fn epsv_port(text: &str) -> FtpResult<u16> {
    let bad = || FtpError::protocol_error(format!("unparseable EPSV reply: {}", text));
    let open = text.find('(').ok_or_else(bad)?;
    let inner = &text[open + 1..];
    let close = inner.find(')').ok_or_else(bad)?;
    let inner = &inner[..close];
    let delim = inner.chars().next().ok_or_else(bad)?;
    let fields: Vec<&str> = inner.split(delim).collect();
    // "|||6446|" splits into ["", "", "", "6446", ""].
    match fields.as_slice() {
        ["", "", "", port, ""] => port.parse().map_err(|_| bad()),
        _ => Err(bad()),
    }
}

/// `h1,h2,h3,h4,p1,p2` for `PORT`; IPv4 only.
pub fn port_argument(local: &SocketAddr) -> FtpResult<String> {
    let IpAddr::V4(ip) = local.ip() else {
        return Err(FtpError::data_channel("PORT needs an IPv4 address; use extendedActive"));
    };
    let [a, b, c, d] = ip.octets();
    let [p1, p2] = local.port().to_be_bytes();
    Ok(format!("{},{},{},{},{},{}", a, b, c, d, p1, p2))
}

/// `|af|addr|port|` for `EPRT`.
pub fn eprt_argument(local: &SocketAddr) -> String {
    let af = if local.is_ipv4() { 1 } else { 2 };
    format!("|{}|{}|{}|", af, local.ip(), local.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pasv_reply_is_decoded() {
        let addr = pasv_address("227 Entering Passive Mode (192,168,1,20,19,137)").unwrap();
        assert_eq!(addr.ip().to_string(), "192.168.1.20");
        assert_eq!(addr.port(), 19 * 256 + 137);

        // Without parentheses.
        let addr = pasv_address("227 =10,0,0,1,4,1").unwrap();
        assert_eq!(addr.port(), 1025);
    }

    #[test]
    fn pasv_rejects_out_of_range_fields() {
        assert!(pasv_address("227 Entering Passive Mode (300,1,1,1,1,1)").is_err());
        assert!(pasv_address("227 nothing here").is_err());
    }

    #[test]
    fn epsv_accepts_any_delimiter() {
        assert_eq!(epsv_port("229 Entering Extended Passive Mode (|||50123|)").unwrap(), 50123);
        assert_eq!(epsv_port("229 ok (!!!2121!)").unwrap(), 2121);
        assert!(epsv_port("229 (|||99999|)").is_err());
        assert!(epsv_port("229 (|1|::1|21|)").is_err());
    }

    #[tokio::test]
    async fn pump_copies_until_eof() {
        let mut source: &[u8] = b"drwxr-xr-x 2 ftp ftp 0 Jan 1 12:00 sub\r\n";
        let mut sink = Vec::new();
        let n = pump(&mut source, &mut sink, Duration::from_secs(1), "LIST").await.unwrap();
        assert_eq!(n as usize, sink.len());
        assert!(sink.ends_with(b"sub\r\n"));
    }

    #[tokio::test]
    async fn pump_times_out_on_a_silent_channel() {
        let (_keep_open, mut silent) = tokio::io::duplex(16);
        let mut sink = Vec::new();
        let err = pump(&mut silent, &mut sink, Duration::from_millis(20), "RETR x")
            .await
            .unwrap_err();
        assert!(err.is_fatal_to_session());
    }

    #[test]
    fn active_arguments_are_formatted() {
        let v4: SocketAddr = "10.1.2.3:1025".parse().unwrap();
        assert_eq!(port_argument(&v4).unwrap(), "10,1,2,3,4,1");
        assert_eq!(eprt_argument(&v4), "|1|10.1.2.3|1025|");

        let v6: SocketAddr = "[::1]:2000".parse().unwrap();
        assert!(port_argument(&v6).is_err());
        assert_eq!(eprt_argument(&v6), "|2|::1|2000|");
    }
}
