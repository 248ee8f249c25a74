//! # mirror-engine
//!
//! One-way FTP mirror for product archives:
//!
//! - `listing`: recursive remote walk over a single session
//! - `diff`: set difference against the previous snapshot, plus the
//!   timestamp variant used for ancillary files
//! - `scheduler`: bounded pool of transfer handles
//! - `dispatch`: content sniffing, tar extraction, XML copy
//! - `snapshot`: snapshot store and bad-artifact log
//! - `mirror` / `ancillary`: the two run modes
//! - `config` / `netrc`: run configuration and credential lookup

pub mod ancillary;
pub mod config;
pub mod diff;
pub mod dispatch;
pub mod error;
pub mod listing;
pub mod mirror;
pub mod netrc;
pub mod remote;
pub mod scheduler;
pub mod snapshot;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use ancillary::{AncillaryReport, AncillaryRunner};
pub use config::{MirrorConfig, ProductRules, SchedulerOptions};
pub use error::{MirrorError, MirrorResult};
pub use mirror::{MirrorEngine, MirrorReport, RootReport};
pub use remote::{FtpConnector, RemoteConnector, RemoteSession};
