//! Minimal `.netrc` reader for FTP credentials.
//!
//! Understands `machine`, `default`, `login`, `password` and `account`
//! tokens; `macdef` bodies are skipped up to the next blank line.

use crate::error::{MirrorError, MirrorResult};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetrcCredentials {
    pub login: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Netrc {
    machines: Vec<(String, NetrcCredentials)>,
    default: Option<NetrcCredentials>,
}

enum Target {
    None,
    Machine(usize),
    Default,
}

impl Netrc {
    pub fn parse(text: &str) -> Self {
        let mut netrc = Netrc::default();
        let mut target = Target::None;
        let mut lines = text.lines();

        while let Some(line) = lines.next() {
            let mut tokens = line.split_whitespace();
            while let Some(token) = tokens.next() {
                match token {
                    "machine" => {
                        let host = tokens.next().unwrap_or_default().to_string();
                        netrc.machines.push((host, NetrcCredentials::default()));
                        target = Target::Machine(netrc.machines.len() - 1);
                    }
                    "default" => {
                        netrc.default = Some(NetrcCredentials::default());
                        target = Target::Default;
                    }
                    "login" | "password" => {
                        let value = tokens.next().map(str::to_string);
                        let creds = match target {
                            Target::Machine(i) => &mut netrc.machines[i].1,
                            Target::Default => match netrc.default.as_mut() {
                                Some(c) => c,
                                None => continue,
                            },
                            Target::None => continue,
                        };
                        if token == "login" {
                            creds.login = value;
                        } else {
                            creds.password = value;
                        }
                    }
                    "account" => {
                        tokens.next();
                    }
                    "macdef" => {
                        for body in lines.by_ref() {
                            if body.trim().is_empty() {
                                break;
                            }
                        }
                        break;
                    }
                    _ => {}
                }
            }
        }
        netrc
    }

    /// Read and parse `path`. A missing file is `Ok(None)`.
    pub fn load(path: &Path) -> MirrorResult<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Some(Self::parse(&text))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MirrorError::Config(format!(
                "reading {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Credentials for `host`, else the `default` entry.
    pub fn lookup(&self, host: &str) -> Option<&NetrcCredentials> {
        self.machines
            .iter()
            .find(|(machine, _)| machine.eq_ignore_ascii_case(host))
            .map(|(_, creds)| creds)
            .or(self.default.as_ref())
    }
}
