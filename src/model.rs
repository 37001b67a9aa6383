use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::template;

/// Lower bound for the per-recipient send delay. Anything below this gets clamped.
pub const MIN_SEND_DELAY: Duration = Duration::from_millis(500);

/// Default success probability for a fresh send attempt.
pub const DEFAULT_SUCCESS_RATE: f64 = 0.97;

/// Default success probability when resending previously failed entries.
pub const DEFAULT_RESEND_SUCCESS_RATE: f64 = 0.95;

/// One recipient parsed from the import file. Immutable once created;
/// the whole list is replaced on re-import.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contact {
    pub id: String,
    pub phone: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, DeliveryStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "Pending",
            DeliveryStatus::Sent => "Sent",
            DeliveryStatus::Failed => "Failed",
        }
    }
}

/// A single send attempt. Created Pending when the attempt begins and resolved
/// in place to a terminal status once the simulated delivery settles. A resend
/// resets the same entry back to Pending rather than creating a new one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SendLogEntry {
    pub id: String,
    pub recipient: String,
    pub message: String,
    pub status: DeliveryStatus,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendLogEntry {
    /// New Pending entry. The message is already rendered (substitution token
    /// replaced); it is never re-derived from the template later.
    pub fn new(recipient: String, message: String) -> Self {
        Self {
            id: gen_entry_id(),
            recipient,
            message,
            status: DeliveryStatus::Pending,
            timestamp: local_time_string(),
            error: None,
        }
    }
}

/// Generate a random id for log entries and runs.
pub fn gen_entry_id() -> String {
    use rand::RngCore;
    let mut b = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut b);
    format!("{:016x}", u64::from_le_bytes(b))
}

/// Local wall-clock time as HH:MM:SS, falling back to UTC when the local
/// offset cannot be determined.
pub fn local_time_string() -> String {
    let fmt = time::macros::format_description!("[hour]:[minute]:[second]");
    let now = time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    now.format(&fmt).unwrap_or_else(|_| "??:??:??".into())
}

#[derive(Debug, Clone, Serialize)]
pub struct CampaignConfig {
    pub message_template: String,
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
    pub success_rate: f64,
    pub resend_success_rate: f64,
}

impl CampaignConfig {
    /// Clamp the delay to the supported minimum and the rates into [0, 1].
    pub fn sanitized(mut self) -> Self {
        if self.delay < MIN_SEND_DELAY {
            self.delay = MIN_SEND_DELAY;
        }
        self.success_rate = self.success_rate.clamp(0.0, 1.0);
        self.resend_success_rate = self.resend_success_rate.clamp(0.0, 1.0);
        self
    }

    /// Render the template for one contact.
    pub fn render_message(&self, contact: &Contact) -> String {
        template::render(&self.message_template, &contact.name)
    }
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            message_template: String::new(),
            delay: Duration::from_secs(5),
            success_rate: DEFAULT_SUCCESS_RATE,
            resend_success_rate: DEFAULT_RESEND_SUCCESS_RATE,
        }
    }
}

/// Derived counters, recomputed on every change and never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CampaignStats {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub remaining: usize,
}

impl CampaignStats {
    /// `remaining` counts contacts not yet resolved to a terminal state in the
    /// current pass, so it bottoms out at zero even when the log carries
    /// entries from earlier passes.
    pub fn compute(total_contacts: usize, entries: &[SendLogEntry]) -> Self {
        let sent = entries
            .iter()
            .filter(|e| e.status == DeliveryStatus::Sent)
            .count();
        let failed = entries
            .iter()
            .filter(|e| e.status == DeliveryStatus::Failed)
            .count();
        let terminal = sent + failed;
        Self {
            total: total_contacts,
            sent,
            failed,
            remaining: total_contacts.saturating_sub(terminal),
        }
    }
}

/// Which pass the engine is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunKind {
    Fresh,
    ResendFailed,
}

/// Summary of one completed (or cancelled) pass. Emitted in the JSON output
/// alongside the log; never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignReport {
    pub run_id: String,
    pub kind: RunKind,
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub started_at: String,
    pub finished_at: String,
}

/// Events emitted by the engine and orchestrator, consumed by UI/CLI layers.
#[derive(Debug, Clone)]
pub enum CampaignEvent {
    RunStarted {
        kind: RunKind,
        total: usize,
    },
    /// Fresh entry queued at the head of the log, status Pending.
    EntryQueued {
        entry: SendLogEntry,
    },
    /// Existing entry reset to Pending for a resend pass.
    EntryReset {
        id: String,
        timestamp: String,
    },
    EntryResolved {
        id: String,
        status: DeliveryStatus,
        error: Option<String>,
    },
    /// The optimizer produced a rewritten message body.
    MessageOptimized {
        message: String,
        explanation: String,
    },
    Info(InfoEvent),
    RunCompleted {
        report: Box<CampaignReport>,
    },
}

/// Structured info events rendered by UI/CLI layers.
#[derive(Debug, Clone)]
pub enum InfoEvent {
    Message(String),
    ContactsLoaded { count: usize, file: String },
    RunInProgress,
    NothingToSend,
    NothingToResend,
    OptimizeFailed { reason: String },
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::ContactsLoaded { count, file } => {
                format!("Loaded {} contacts from {}", count, file)
            }
            InfoEvent::RunInProgress => "A campaign is already in progress".to_string(),
            InfoEvent::NothingToSend => {
                "Nothing to send: load contacts and set a message first".to_string()
            }
            InfoEvent::NothingToResend => "No failed entries to resend".to_string(),
            InfoEvent::OptimizeFailed { reason } => {
                format!("Message optimization failed, keeping original: {}", reason)
            }
        }
    }
}

/// Estimated wall time for a full pass: contacts x delay, formatted `XhYmZs`.
pub fn format_estimated_duration(contacts: usize, delay: Duration) -> String {
    let total = (delay.as_secs_f64() * contacts as f64).floor() as u64;
    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;
    let mut out = String::new();
    if h > 0 {
        out.push_str(&format!("{}h ", h));
    }
    if m > 0 {
        out.push_str(&format!("{}m ", m));
    }
    out.push_str(&format!("{}s", s));
    out
}
