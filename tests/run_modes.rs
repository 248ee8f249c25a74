//! End-to-end runs of the binary driver against an in-memory remote.

use async_trait::async_trait;
use clap::Parser;
use ftp_mirror_lib::app::{execute_with, EXIT_CONFIG, EXIT_FATAL};
use ftp_mirror_lib::cli::Args;
use ftp_mirror_lib::exit_code;
use mirror_engine::{MirrorConfig, RemoteConnector, RemoteSession};
use mirror_ftp::{FtpEntry, FtpEntryKind, FtpError, FtpResult};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const XML_DOC: &[u8] = b"<?xml version=\"1.0\"?>\n<Earth_Explorer_File/>\n";

/// One flat remote directory.
#[derive(Clone, Default)]
struct FlatRemote {
    dir: String,
    files: BTreeMap<String, Vec<u8>>,
    refuse_login: bool,
}

impl FlatRemote {
    fn new(dir: &str) -> Self {
        Self {
            dir: dir.to_string(),
            ..Self::default()
        }
    }

    fn with_file(mut self, name: &str, body: &[u8]) -> Self {
        self.files.insert(name.to_string(), body.to_vec());
        self
    }
}

#[async_trait]
impl RemoteConnector for FlatRemote {
    async fn connect(&self) -> FtpResult<Box<dyn RemoteSession>> {
        if self.refuse_login {
            return Err(FtpError::from_reply(530, "530 Login incorrect"));
        }
        Ok(Box::new(self.clone()))
    }

    fn describe(&self) -> String {
        "flat://memory".to_string()
    }
}

#[async_trait]
impl RemoteSession for FlatRemote {
    async fn list_dir(&mut self, dir: &str) -> FtpResult<Vec<FtpEntry>> {
        if dir != self.dir {
            return Err(FtpError::from_reply(550, "550 No such directory"));
        }
        Ok(self
            .files
            .iter()
            .map(|(name, body)| {
                let mut entry = FtpEntry::new(name.as_str(), FtpEntryKind::File);
                entry.size = body.len() as u64;
                entry
            })
            .collect())
    }

    async fn retrieve(&mut self, remote_path: &str, local_path: &Path) -> FtpResult<u64> {
        let name = remote_path.rsplit('/').next().unwrap_or(remote_path);
        let body = self
            .files
            .get(name)
            .ok_or_else(|| FtpError::from_reply(550, "550 No such file"))?;
        fs::write(local_path, body)?;
        Ok(body.len() as u64)
    }

    async fn close(&mut self) {}
}

fn config(dir: &TempDir, extra: &str) -> MirrorConfig {
    let base = dir.path().display();
    let text = format!(
        r#"
[server]
host = "ftp://ftp.example.org/"
username = "user"
password = "secret"
concurrency = 2
poll_interval_ms = 10

[local]
ftp_inbox = "{base}/inbox"
snapshot_dir = "{base}/lists"
bad_artifact_log = "{base}/lists/bad_artifacts.txt"

[[roots]]
remote = "/AUX"
data_store = "{base}/store"
{extra}
"#
    );
    MirrorConfig::from_toml_str(&text).unwrap()
}

fn args(extra: &[&str]) -> Args {
    let mut argv = vec!["ftp-mirror"];
    argv.extend_from_slice(extra);
    Args::try_parse_from(argv).unwrap()
}

// ── Mirror mode ──────────────────────────────────────────────────────

#[tokio::test]
async fn mirror_places_products_and_writes_the_report() {
    let dir = TempDir::new().unwrap();
    let report_path = dir.path().join("report.json");
    let remote = FlatRemote::new("/AUX")
        .with_file("a.EEF", XML_DOC)
        .with_file("b.EEF", XML_DOC);

    let report_arg = report_path.to_string_lossy().to_string();
    execute_with(
        &args(&["--report", &report_arg, "mirror"]),
        config(&dir, ""),
        Arc::new(remote),
    )
    .await
    .unwrap();

    assert_eq!(fs::read(dir.path().join("store/a.EEF")).unwrap(), XML_DOC);
    assert_eq!(fs::read(dir.path().join("store/b.EEF")).unwrap(), XML_DOC);

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(report["host"], "flat://memory");
    assert_eq!(report["roots"][0]["remoteRoot"], "/AUX");
    assert_eq!(report["roots"][0]["tasks"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn refused_login_is_fatal() {
    let dir = TempDir::new().unwrap();
    let mut remote = FlatRemote::new("/AUX").with_file("a.EEF", XML_DOC);
    remote.refuse_login = true;

    let err = execute_with(&args(&[]), config(&dir, ""), Arc::new(remote))
        .await
        .unwrap_err();
    assert_eq!(exit_code(&err), EXIT_FATAL);
}

// ── Ancillary mode ───────────────────────────────────────────────────

#[tokio::test]
async fn ancillary_without_section_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    let remote = FlatRemote::new("/AUX");

    let err = execute_with(&args(&["ancillary"]), config(&dir, ""), Arc::new(remote))
        .await
        .unwrap_err();
    assert_eq!(exit_code(&err), EXIT_CONFIG);
}

#[tokio::test]
async fn ancillary_fills_an_empty_data_dir() {
    let dir = TempDir::new().unwrap();
    let remote = FlatRemote::new("/AUX")
        .with_file("Kp_MJD_1.txt", b"kp")
        .with_file("README", b"skip me");
    let section = format!(
        r#"
[ancillary]
remote_dirs = ["/AUX"]
name_prefixes = ["Kp_MJD"]
data_dir = "{}/aux"
"#,
        dir.path().display()
    );

    execute_with(&args(&["ancillary"]), config(&dir, &section), Arc::new(remote))
        .await
        .unwrap();

    assert_eq!(fs::read(dir.path().join("aux/Kp_MJD_1.txt")).unwrap(), b"kp");
    assert!(!dir.path().join("aux/README").exists());
}
