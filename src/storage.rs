//! Durable local storage.
//!
//! Three independent named slots mirrored on every change: the message
//! template, the delay (numeric seconds, stored as text), and the full send
//! log. No versioning or migration; a malformed stored log loads as empty.
//! Every function takes the slot directory so callers (and tests) choose the
//! storage location; [`data_dir`] is the default.

use crate::model::SendLogEntry;
use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

const TEMPLATE_FILE: &str = "message.txt";
const DELAY_FILE: &str = "delay.txt";
const LOG_FILE: &str = "send_log.json";

/// Default slot directory under the platform data dir, created on demand.
pub fn data_dir() -> Result<PathBuf> {
    let base = dirs::data_dir()
        .context("no platform data directory")?
        .join("smsblast");
    std::fs::create_dir_all(&base)
        .with_context(|| format!("create data directory {}", base.display()))?;
    Ok(base)
}

pub fn save_template(dir: &Path, template: &str) -> Result<()> {
    write_slot(&dir.join(TEMPLATE_FILE), template.as_bytes())
}

pub fn load_template(dir: &Path) -> Option<String> {
    std::fs::read_to_string(dir.join(TEMPLATE_FILE)).ok()
}

pub fn save_delay(dir: &Path, delay: Duration) -> Result<()> {
    let text = format_seconds(delay);
    write_slot(&dir.join(DELAY_FILE), text.as_bytes())
}

pub fn load_delay(dir: &Path) -> Option<Duration> {
    let text = std::fs::read_to_string(dir.join(DELAY_FILE)).ok()?;
    let secs: f64 = text.trim().parse().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}

pub fn save_log(dir: &Path, entries: &[SendLogEntry]) -> Result<()> {
    let json = serde_json::to_vec_pretty(entries).context("serialize send log")?;
    write_slot(&dir.join(LOG_FILE), &json)
}

/// A missing or malformed stored log is treated as empty, never fatal.
pub fn load_log(dir: &Path) -> Vec<SendLogEntry> {
    let Ok(bytes) = std::fs::read(dir.join(LOG_FILE)) else {
        return Vec::new();
    };
    serde_json::from_slice(&bytes).unwrap_or_default()
}

/// Bulk clear: drop the persisted copy along with the in-memory log.
pub fn clear_log(dir: &Path) -> Result<()> {
    let path = dir.join(LOG_FILE);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
    }
}

pub fn export_json(path: &Path, entries: &[SendLogEntry]) -> Result<()> {
    let json = serde_json::to_vec_pretty(entries).context("serialize send log")?;
    std::fs::write(path, json).with_context(|| format!("write {}", path.display()))
}

pub fn export_csv(path: &Path, entries: &[SendLogEntry]) -> Result<()> {
    let mut out = Vec::new();
    writeln!(out, "id,recipient,status,timestamp,error,message")?;
    for e in entries {
        writeln!(
            out,
            "{},{},{},{},{},{}",
            csv_field(&e.id),
            csv_field(&e.recipient),
            e.status.as_str(),
            csv_field(&e.timestamp),
            csv_field(e.error.as_deref().unwrap_or("")),
            csv_field(&e.message),
        )?;
    }
    std::fs::write(path, out).with_context(|| format!("write {}", path.display()))
}

/// Seconds with the fraction kept only when present, matching the stored
/// "numeric seconds as text" format.
fn format_seconds(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if (secs - secs.trunc()).abs() < f64::EPSILON {
        format!("{}", secs as u64)
    } else {
        format!("{}", secs)
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn write_slot(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{gen_entry_id, DeliveryStatus};

    struct ScratchDir(PathBuf);

    impl ScratchDir {
        fn new() -> Self {
            let dir = std::env::temp_dir().join(format!("smsblast-test-{}", gen_entry_id()));
            std::fs::create_dir_all(&dir).expect("create scratch dir");
            Self(dir)
        }
    }

    impl Drop for ScratchDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    #[test]
    fn template_round_trips_byte_for_byte() {
        let scratch = ScratchDir::new();
        let template = "Oi [Nome]!\nPromoção até sábado.";
        save_template(&scratch.0, template).expect("save");
        assert_eq!(load_template(&scratch.0).as_deref(), Some(template));
    }

    #[test]
    fn delay_round_trips_through_text_seconds() {
        let scratch = ScratchDir::new();
        for delay in [Duration::from_secs(5), Duration::from_secs_f64(2.5)] {
            save_delay(&scratch.0, delay).expect("save");
            assert_eq!(load_delay(&scratch.0), Some(delay));
        }
        // Stored value is plain text, e.g. "2.5".
        let raw = std::fs::read_to_string(scratch.0.join(DELAY_FILE)).expect("read");
        assert_eq!(raw, "2.5");
    }

    #[test]
    fn log_round_trips_field_for_field() {
        let scratch = ScratchDir::new();
        let mut a = SendLogEntry::new("+15551234".into(), "Oi Ana".into());
        a.status = DeliveryStatus::Sent;
        let mut b = SendLogEntry::new("+15559876".into(), "Oi Cliente".into());
        b.status = DeliveryStatus::Failed;
        b.error = Some("SIM gateway failure".into());
        let entries = vec![a, b];

        save_log(&scratch.0, &entries).expect("save");
        assert_eq!(load_log(&scratch.0), entries);
    }

    #[test]
    fn malformed_log_loads_as_empty() {
        let scratch = ScratchDir::new();
        std::fs::write(scratch.0.join(LOG_FILE), b"{not json").expect("write");
        assert!(load_log(&scratch.0).is_empty());
    }

    #[test]
    fn missing_slots_load_as_absent() {
        let scratch = ScratchDir::new();
        assert!(load_template(&scratch.0).is_none());
        assert!(load_delay(&scratch.0).is_none());
        assert!(load_log(&scratch.0).is_empty());
    }

    #[test]
    fn clear_log_removes_the_persisted_copy_and_is_idempotent() {
        let scratch = ScratchDir::new();
        save_log(&scratch.0, &[SendLogEntry::new("+1".into(), "hi".into())]).expect("save");
        clear_log(&scratch.0).expect("clear");
        assert!(load_log(&scratch.0).is_empty());
        clear_log(&scratch.0).expect("clear twice");
    }

    #[test]
    fn csv_export_quotes_messages_with_delimiters() {
        let scratch = ScratchDir::new();
        let mut e = SendLogEntry::new("+1".into(), "Oi, \"Ana\"".into());
        e.status = DeliveryStatus::Sent;
        let path = scratch.0.join("out.csv");
        export_csv(&path, &[e]).expect("export");
        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.starts_with("id,recipient,status,timestamp,error,message"));
        assert!(text.contains("\"Oi, \"\"Ana\"\"\""));
    }
}
