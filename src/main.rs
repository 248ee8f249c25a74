//! `ftp-mirror` entry point.

use std::process::ExitCode;

fn main() -> ExitCode {
    ftp_mirror_lib::run()
}
