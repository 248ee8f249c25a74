//! Content sniffing: what an artifact really is, judged by its bytes.

use serde::{Deserialize, Serialize};

/// Bytes of an artifact's head needed by [`SignatureSniffer`].
pub const SNIFF_LEN: usize = 512;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ContentType {
    Xml,
    Gzip,
    Zip,
    Tar,
    Unknown,
}

/// Something that can classify an artifact from its leading bytes.
pub trait ContentSniffer: Send + Sync {
    fn detect(&self, head: &[u8]) -> ContentType;
}

/// Magic-number matching, no external tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureSniffer;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

fn is_tar_header(head: &[u8]) -> bool {
    // POSIX "ustar\0" and GNU "ustar " both start with these five bytes.
    head.len() >= 262 && &head[257..262] == b"ustar"
}

fn is_xml(head: &[u8]) -> bool {
    let body = head.strip_prefix(UTF8_BOM).unwrap_or(head);
    let start = body
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(body.len());
    body[start..]
        .get(..5)
        .is_some_and(|tag| tag.eq_ignore_ascii_case(b"<?xml"))
}

impl ContentSniffer for SignatureSniffer {
    fn detect(&self, head: &[u8]) -> ContentType {
        match head {
            [0x1F, 0x8B, ..] => ContentType::Gzip,
            [b'P', b'K', 0x03, 0x04, ..] | [b'P', b'K', 0x05, 0x06, ..] | [b'P', b'K', 0x07, 0x08, ..] => {
                ContentType::Zip
            }
            _ if is_tar_header(head) => ContentType::Tar,
            _ if is_xml(head) => ContentType::Xml,
            _ => ContentType::Unknown,
        }
    }
}
