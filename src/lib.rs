//! `ftp-mirror` binary support: argument parsing, logging setup and the
//! run driver around `mirror-engine`.

pub mod app;
pub mod cli;
pub mod logging;

pub use app::{exit_code, run};
