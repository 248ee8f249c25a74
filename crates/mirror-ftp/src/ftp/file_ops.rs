//! Streamed download (`RETR`) into a local file.

use crate::ftp::client::FtpClient;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::transfer;
use crate::ftp::types::TransferType;
use std::path::Path;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};

impl FtpClient {
    /// Retrieve `remote_path` in binary mode into `local_path`, creating
    /// parent directories. Returns the byte count.
    ///
    /// With size verification on and `SIZE` advertised, a byte count that
    /// differs from the announced size fails the download. The partial file
    /// is left for the caller to remove.
    pub async fn download(&mut self, remote_path: &str, local_path: &Path) -> FtpResult<u64> {
        self.set_type(TransferType::Binary).await?;
        let expected = if self.verify_size() {
            self.size(remote_path).await.ok()
        } else {
            None
        };

        // The local file exists before RETR goes out: once the server starts
        // sending, a local failure would leave its reply unread.
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut out = BufWriter::new(fs::File::create(local_path).await?);
        let (mut tcp, completed) = match self.start_transfer(&format!("RETR {}", remote_path)).await {
            Ok(started) => started,
            Err(e) => {
                drop(out);
                let _ = fs::remove_file(local_path).await;
                return Err(e);
            }
        };
        let received = transfer::pump(&mut tcp, &mut out, self.data_timeout(), remote_path).await?;
        out.flush().await?;
        drop(out);
        drop(tcp);
        self.finish_transfer(completed).await?;

        match expected {
            Some(size) if size != received => Err(FtpError::transfer_failed(format!(
                "{}: received {} of {} bytes",
                remote_path, received, size
            ))),
            _ => {
                self.info.files_retrieved += 1;
                self.info.bytes_retrieved += received;
                log::debug!("RETR {} -> {} ({} bytes)", remote_path, local_path.display(), received);
                Ok(received)
            }
        }
    }
}
