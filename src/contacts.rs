//! Contact importer.
//!
//! Parses a flat delimited text file into recipient records. Each non-blank
//! line is `phone[,name]`: no header row, no quoting, no escaping. Lines with
//! an empty phone field are dropped silently; a missing name falls back to a
//! generic placeholder.

use crate::model::Contact;
use crate::template::DEFAULT_NAME;
use anyhow::{Context, Result};
use std::path::Path;

/// Parse raw import text into an ordered contact list.
///
/// Index-stable relative to input order. Malformed lines degrade to
/// best-effort field extraction; only an empty phone drops the record.
pub fn parse_contacts(text: &str) -> Vec<Contact> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .filter_map(|(index, line)| {
            let mut fields = line.split(',');
            let phone = fields.next().unwrap_or("").trim();
            if phone.is_empty() {
                return None;
            }
            let name = match fields.next().map(str::trim) {
                Some(n) if !n.is_empty() => n.to_string(),
                _ => DEFAULT_NAME.to_string(),
            };
            Some(Contact {
                id: format!("c-{}", index),
                phone: phone.to_string(),
                name,
            })
        })
        .collect()
}

/// Read and parse a contact file. A read failure surfaces to the caller and
/// leaves any existing contact list untouched.
pub fn load_contacts(path: &Path) -> Result<Vec<Contact>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read contact file {}", path.display()))?;
    Ok(parse_contacts(&text))
}
