//! # mirror-ftp
//!
//! The FTP client behind the mirror engine.
//!
//! Plain-TCP implementation of the parts of RFC 959 a one-way mirror needs,
//! plus the common extensions:
//! - RFC 2389: FEAT
//! - RFC 2428: EPSV and EPRT
//! - RFC 3659: MLSD and SIZE
//!
//! A session is an [`FtpClient`] wrapping one [`protocol::ControlChannel`].
//! Every transfer opens a fresh data connection and copies it with
//! [`transfer::pump`], which bounds the time spent waiting for data.
//!
//! Modules:
//! - `types`: connection config, listing entries, [`Reply`]
//! - `error`: error kinds and reply-code classification
//! - `protocol`: control channel and multi-line reply assembly
//! - `connection`: TCP connect and greeting
//! - `client`: login, CWD, TYPE, LIST/MLSD, SIZE
//! - `parser`: Unix, DOS and MLSD listing lines
//! - `transfer`: PASV/EPSV/PORT/EPRT data channels
//! - `file_ops`: streamed RETR into a local file

pub mod types;
pub mod error;
pub mod protocol;
pub mod connection;
pub mod client;
pub mod parser;
pub mod transfer;
pub mod file_ops;

pub use client::FtpClient;
pub use error::{FtpError, FtpErrorKind, FtpResult};
pub use types::*;
