//! Send log store.
//!
//! Newest-first ordered collection of send attempts. New entries are inserted
//! at the head; resolutions and resets mutate in place by id. Entries are
//! never removed individually, only through a bulk clear.

use crate::model::{CampaignEvent, DeliveryStatus, SendLogEntry};

#[derive(Debug, Default, Clone)]
pub struct LogStore {
    entries: Vec<SendLogEntry>,
}

impl LogStore {
    pub fn new(entries: Vec<SendLogEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[SendLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fold an engine event into the log. Returns true when the log changed,
    /// so callers know when to write through to persistence.
    pub fn apply(&mut self, ev: &CampaignEvent) -> bool {
        match ev {
            CampaignEvent::EntryQueued { entry } => {
                self.entries.insert(0, entry.clone());
                true
            }
            CampaignEvent::EntryReset { id, timestamp } => {
                if let Some(e) = self.entry_mut(id) {
                    e.status = DeliveryStatus::Pending;
                    e.timestamp = timestamp.clone();
                    e.error = None;
                    true
                } else {
                    false
                }
            }
            CampaignEvent::EntryResolved { id, status, error } => {
                if let Some(e) = self.entry_mut(id) {
                    e.status = *status;
                    e.error = error.clone();
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    /// Snapshot of entries currently in Failed state, for a resend pass.
    pub fn failed_entries(&self) -> Vec<SendLogEntry> {
        self.entries
            .iter()
            .filter(|e| e.status == DeliveryStatus::Failed)
            .cloned()
            .collect()
    }

    /// Bulk clear. The only way entries leave the log.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn entry_mut(&mut self, id: &str) -> Option<&mut SendLogEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(recipient: &str) -> (CampaignEvent, String) {
        let entry = SendLogEntry::new(recipient.into(), "hi".into());
        let id = entry.id.clone();
        (CampaignEvent::EntryQueued { entry }, id)
    }

    #[test]
    fn new_entries_land_at_the_head() {
        let mut store = LogStore::default();
        let (ev1, _) = queued("+1");
        let (ev2, _) = queued("+2");
        store.apply(&ev1);
        store.apply(&ev2);
        assert_eq!(store.entries()[0].recipient, "+2");
        assert_eq!(store.entries()[1].recipient, "+1");
    }

    #[test]
    fn resolve_mutates_in_place_by_id() {
        let mut store = LogStore::default();
        let (ev, id) = queued("+1");
        store.apply(&ev);
        let changed = store.apply(&CampaignEvent::EntryResolved {
            id: id.clone(),
            status: DeliveryStatus::Failed,
            error: Some("SIM gateway failure".into()),
        });
        assert!(changed);
        assert_eq!(store.len(), 1);
        assert_eq!(store.entries()[0].status, DeliveryStatus::Failed);
        assert_eq!(store.entries()[0].id, id);
    }

    #[test]
    fn reset_returns_entry_to_pending_with_new_timestamp() {
        let mut store = LogStore::default();
        let (ev, id) = queued("+1");
        store.apply(&ev);
        store.apply(&CampaignEvent::EntryResolved {
            id: id.clone(),
            status: DeliveryStatus::Failed,
            error: Some("SIM gateway failure".into()),
        });
        store.apply(&CampaignEvent::EntryReset {
            id: id.clone(),
            timestamp: "12:00:00".into(),
        });
        let e = &store.entries()[0];
        assert_eq!(e.status, DeliveryStatus::Pending);
        assert_eq!(e.timestamp, "12:00:00");
        assert!(e.error.is_none());
    }

    #[test]
    fn unknown_ids_leave_the_log_unchanged() {
        let mut store = LogStore::default();
        let changed = store.apply(&CampaignEvent::EntryResolved {
            id: "missing".into(),
            status: DeliveryStatus::Sent,
            error: None,
        });
        assert!(!changed);
        assert!(store.is_empty());
    }

    #[test]
    fn failed_snapshot_skips_sent_and_pending() {
        let mut store = LogStore::default();
        for (recipient, status) in [
            ("+1", Some(DeliveryStatus::Sent)),
            ("+2", Some(DeliveryStatus::Failed)),
            ("+3", None),
        ] {
            let (ev, id) = queued(recipient);
            store.apply(&ev);
            if let Some(status) = status {
                store.apply(&CampaignEvent::EntryResolved {
                    id,
                    status,
                    error: None,
                });
            }
        }
        let failed = store.failed_entries();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].recipient, "+2");
    }

    #[test]
    fn clear_empties_the_log_in_bulk() {
        let mut store = LogStore::default();
        let (ev, _) = queued("+1");
        store.apply(&ev);
        store.clear();
        assert!(store.is_empty());
    }
}
