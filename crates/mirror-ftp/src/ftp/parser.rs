//! `LIST` / `MLSD` body parsing.
//!
//! Each line is tried as an MLSD fact line, a Unix `ls -l` line, then a
//! DOS/IIS line. Anything else (`total N`, truncated lines, banners some
//! servers interleave) is dropped, as are `.` and `..`.

use crate::ftp::types::{FtpEntry, FtpEntryKind};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

lazy_static! {
    static ref UNIX_LINE: Regex = Regex::new(
        r"(?x)
        ^(?P<mode>[-dlbcps][-rwxsStT]{9})[+@.]?\s+
        \d+\s+                                  # links
        \S+\s+                                  # owner
        (?:\S+\s+)?                             # group, absent on some servers
        (?P<size>\d+)\s+
        (?P<date>[A-Za-z]{3}\s+\d{1,2}\s+(?:\d{1,2}:\d{2}|\d{4}))\s
        (?P<name>.+)$
        ",
    )
    .expect("valid unix listing regex");
    static ref DOS_LINE: Regex = Regex::new(
        r"(?x)
        ^(?P<date>\d{2}-\d{2}-(?:\d{4}|\d{2}))\s+
        (?P<time>\d{1,2}:\d{2}\s?(?:[AaPp][Mm])?)\s+
        (?P<size><DIR>|\d+)\s+
        (?P<name>.+)$
        ",
    )
    .expect("valid dos listing regex");
}

/// Parse a whole listing body.
pub fn parse_listing(body: &str) -> Vec<FtpEntry> {
    let now = Utc::now();
    body.lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| {
            let entry = parse_line(line, now);
            if entry.is_none() {
                log::debug!("skipping listing line {:?}", line);
            }
            entry
        })
        .filter(|e| !e.is_self_or_parent())
        .collect()
}

/// Parse one line. `now` resolves Unix dates that carry a time instead of
/// a year.
pub fn parse_line(line: &str, now: DateTime<Utc>) -> Option<FtpEntry> {
    parse_mlsd(line)
        .or_else(|| parse_unix(line, now))
        .or_else(|| parse_dos(line))
}

// ─── MLSD (RFC 3659 §7) ──────────────────────────────────────────────

/// `fact=value;fact=value; name`: the facts contain no spaces and end with
/// `;`, a single space separates them from the name.
fn parse_mlsd(line: &str) -> Option<FtpEntry> {
    let (facts_part, name) = line.split_once(' ')?;
    if !facts_part.ends_with(';') || !facts_part.contains('=') || name.is_empty() {
        return None;
    }

    let facts: HashMap<String, String> = facts_part
        .split(';')
        .filter_map(|f| f.split_once('='))
        .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
        .collect();

    let kind = match facts.get("type").map(|t| t.to_ascii_lowercase()) {
        Some(t) if t == "file" => FtpEntryKind::File,
        Some(t) if t == "dir" || t == "cdir" || t == "pdir" => FtpEntryKind::Directory,
        Some(t) if t.starts_with("os.unix=slink") || t.starts_with("os.unix=symlink") => {
            FtpEntryKind::Symlink
        }
        _ => FtpEntryKind::Unknown,
    };

    let mut entry = FtpEntry::new(name, kind);
    entry.size = facts.get("size").and_then(|s| s.parse().ok()).unwrap_or(0);
    entry.modified = facts.get("modify").and_then(|m| parse_mlsd_time(m));
    entry.mode = facts.get("unix.mode").cloned();
    entry.facts = facts;
    Some(entry)
}

/// `YYYYMMDDHHMMSS[.sss]`, always UTC.
fn parse_mlsd_time(value: &str) -> Option<DateTime<Utc>> {
    let whole = value.split('.').next()?;
    NaiveDateTime::parse_from_str(whole, "%Y%m%d%H%M%S")
        .ok()
        .map(|dt| Utc.from_utc_datetime(&dt))
}

// ─── Unix ls -l ──────────────────────────────────────────────────────

fn parse_unix(line: &str, now: DateTime<Utc>) -> Option<FtpEntry> {
    let caps = UNIX_LINE.captures(line)?;
    let mode = &caps["mode"];
    let kind = match mode.as_bytes()[0] {
        b'-' => FtpEntryKind::File,
        b'd' => FtpEntryKind::Directory,
        b'l' => FtpEntryKind::Symlink,
        _ => FtpEntryKind::Unknown,
    };

    let raw_name = &caps["name"];
    let (name, link_target) = match raw_name.split_once(" -> ") {
        Some((name, target)) if kind == FtpEntryKind::Symlink => (name, Some(target.to_string())),
        _ => (raw_name, None),
    };

    let mut entry = FtpEntry::new(name, kind);
    entry.size = caps["size"].parse().unwrap_or(0);
    entry.modified = parse_unix_date(&caps["date"], now);
    entry.mode = Some(mode.to_string());
    entry.link_target = link_target;
    Some(entry)
}

/// `Mon DD HH:MM` or `Mon DD YYYY`. A date that carries a time of day
/// instead of a year is taken to be in the year of `now`.
pub fn parse_unix_date(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let parts: Vec<&str> = text.split_whitespace().collect();
    let [month, day, last] = parts.as_slice() else {
        return None;
    };

    if last.contains(':') {
        let stamp = format!("{} {} {} {}", now.year(), month, day, last);
        return NaiveDateTime::parse_from_str(&stamp, "%Y %b %d %H:%M")
            .ok()
            .map(|dt| Utc.from_utc_datetime(&dt));
    }

    let date = NaiveDate::parse_from_str(&format!("{} {} {}", month, day, last), "%b %d %Y").ok()?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

// ─── DOS / IIS ───────────────────────────────────────────────────────

fn parse_dos(line: &str) -> Option<FtpEntry> {
    let caps = DOS_LINE.captures(line)?;
    let (kind, size) = match &caps["size"] {
        "<DIR>" => (FtpEntryKind::Directory, 0),
        n => (FtpEntryKind::File, n.parse().unwrap_or(0)),
    };
    let mut entry = FtpEntry::new(&caps["name"], kind);
    entry.size = size;
    entry.modified = parse_dos_time(&caps["date"], &caps["time"]);
    Some(entry)
}

fn parse_dos_time(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let stamp = format!("{} {}", date, time.replace(' ', "").to_ascii_uppercase());
    let year_fmt = if date.len() == 10 { "%m-%d-%Y" } else { "%m-%d-%y" };
    [format!("{} %I:%M%p", year_fmt), format!("{} %H:%M", year_fmt)]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&stamp, fmt).ok())
        .map(|dt| Utc.from_utc_datetime(&dt))
}
