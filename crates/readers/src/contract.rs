//! Futures contract naming and source file discovery.
//!
//! Trade files are named after their contract, e.g. `ESU25_FUT_CME.scid`
//! (root `ES`, month code `U` = September, year `25`). Depth day files
//! carry the contract stem plus a `YYYY-MM-DD` date.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tickalign_core::{Error, Result};

/// Futures month codes, January through December.
pub const MONTH_CODES: &str = "FGHJKMNQUVXZ";

/// Quarterly month codes (Mar/Jun/Sep/Dec), the only listings for index
/// futures like ES.
pub const QUARTERLY_CODES: &str = "HMUZ";

/// A parsed contract identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractId {
    /// Root symbol, e.g. "ES".
    pub root: String,
    /// Month code, one of `MONTH_CODES`.
    pub month: char,
    /// Two-digit year.
    pub year: u8,
}

impl ContractId {
    /// Parse a contract from a trade file name or stem.
    ///
    /// Accepts `ESU25.scid`, `ESU25_FUT_CME.scid`, or just `ESU25`.
    pub fn parse(name: &str) -> Result<Self> {
        let upper = name.to_uppercase();
        let stem = upper.split('.').next().unwrap_or("");
        let bytes = stem.as_bytes();

        // first digit marks the start of the two-digit year; the char
        // before it must be a month code, everything before that the root
        let digit_at = bytes.iter().position(|b| b.is_ascii_digit());
        let d = digit_at.ok_or_else(|| bad_contract(name))?;
        if d < 2 || d + 1 >= bytes.len() || !bytes[d + 1].is_ascii_digit() {
            return Err(bad_contract(name));
        }
        let month = bytes[d - 1] as char;
        if !MONTH_CODES.contains(month) {
            return Err(bad_contract(name));
        }
        let root = &stem[..d - 1];
        if root.is_empty() || !root.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(bad_contract(name));
        }
        let year: u8 = stem[d..d + 2]
            .parse()
            .map_err(|_| bad_contract(name))?;

        Ok(Self {
            root: root.to_string(),
            month,
            year,
        })
    }

    /// Short contract code, e.g. "ESU25".
    pub fn code(&self) -> String {
        format!("{}{}{:02}", self.root, self.month, self.year)
    }

    /// Position of the month within the year (0 = January).
    pub fn month_index(&self) -> usize {
        MONTH_CODES.find(self.month).unwrap_or(0)
    }

    /// Whether this is a quarterly listing.
    pub fn is_quarterly(&self) -> bool {
        QUARTERLY_CODES.contains(self.month)
    }
}

fn bad_contract(name: &str) -> Error {
    Error::config(format!("cannot parse contract from file name: {name}"))
}

/// Pick the latest contract among candidate trade files for a root, by
/// (year, month) order. When `quarterly_only` is set, non-quarterly months
/// are ignored (the rule for ES).
pub fn choose_latest(paths: &[PathBuf], root: &str, quarterly_only: bool) -> Option<PathBuf> {
    let root = root.to_uppercase();
    let mut scored: Vec<(u8, usize, &PathBuf)> = Vec::new();
    for p in paths {
        let Some(name) = p.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Ok(id) = ContractId::parse(name) else {
            continue;
        };
        if id.root != root {
            continue;
        }
        if quarterly_only && !id.is_quarterly() {
            continue;
        }
        scored.push((id.year, id.month_index(), p));
    }
    scored.sort();
    scored.last().map(|(_, _, p)| (*p).clone())
}

/// Find an embedded `YYYY-MM-DD` date in a file name.
pub fn date_in_name(name: &str) -> Option<NaiveDate> {
    let bytes = name.as_bytes();
    if bytes.len() < 10 {
        return None;
    }
    for start in 0..=bytes.len() - 10 {
        let w = &bytes[start..start + 10];
        let shape_ok = w[4] == b'-'
            && w[7] == b'-'
            && w.iter().enumerate().all(|(i, b)| {
                if i == 4 || i == 7 {
                    true
                } else {
                    b.is_ascii_digit()
                }
            });
        if !shape_ok {
            continue;
        }
        if let Ok(date) = std::str::from_utf8(w).unwrap_or("").parse() {
            return Some(date);
        }
    }
    None
}

/// Discover depth day files for a contract under a directory.
///
/// Matches files whose name contains the contract stem; the day comes from
/// an embedded `YYYY-MM-DD` in the name, falling back to the first record's
/// timestamp. Unreadable or non-depth files are skipped.
pub fn discover_depth_days(dir: &Path, stem: &str) -> Result<BTreeMap<NaiveDate, PathBuf>> {
    let mut days = BTreeMap::new();
    if !dir.is_dir() {
        return Ok(days);
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.contains(stem) {
            continue;
        }
        if let Some(date) = date_in_name(name) {
            days.insert(date, path);
            continue;
        }
        match crate::depth::peek_first_day(&path) {
            Ok(Some(date)) => {
                days.insert(date, path);
            }
            Ok(None) => {}
            Err(err) => {
                tracing::debug!(file = %path.display(), %err, "skipping non-depth file");
            }
        }
    }
    Ok(days)
}
