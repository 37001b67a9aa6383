//! Campaign runner.
//!
//! Strictly sequential: one recipient's send attempt in flight at a time.
//! Pause and cancellation are cooperative flags polled while waiting out the
//! per-recipient delay, so cancelling aborts the in-flight wait immediately.

mod delivery;

pub use delivery::{DeliveryBackend, DeliveryOutcome, SimulatedGateway};

use crate::model::{
    gen_entry_id, local_time_string, CampaignConfig, CampaignEvent, CampaignReport, Contact,
    DeliveryStatus, RunKind, SendLogEntry,
};
use anyhow::Result;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::mpsc;

const POLL_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub enum EngineControl {
    /// Pause (true) or resume (false) the running campaign
    Pause(bool),
    /// Cancel the campaign entirely
    Cancel,
}

/// What a single engine run iterates over.
pub enum RunPlan {
    Fresh { contacts: Vec<Contact> },
    /// Snapshot of currently Failed entries, taken by the caller. Each one is
    /// reset to Pending and re-resolved on the same entry id.
    ResendFailed { entries: Vec<SendLogEntry> },
}

pub struct CampaignEngine {
    cfg: CampaignConfig,
    backend: Box<dyn DeliveryBackend>,
}

impl CampaignEngine {
    pub fn new(cfg: CampaignConfig, backend: Box<dyn DeliveryBackend>) -> Self {
        Self {
            cfg: cfg.sanitized(),
            backend,
        }
    }

    pub async fn run(
        mut self,
        plan: RunPlan,
        event_tx: mpsc::UnboundedSender<CampaignEvent>,
        mut control_rx: mpsc::UnboundedReceiver<EngineControl>,
    ) -> Result<CampaignReport> {
        let paused = Arc::new(AtomicBool::new(false));
        let cancel = Arc::new(AtomicBool::new(false));

        // Control listener: latch pause/cancel into flags the send loop polls.
        let paused2 = paused.clone();
        let cancel2 = cancel.clone();
        let control_handle = tokio::spawn(async move {
            while let Some(msg) = control_rx.recv().await {
                match msg {
                    EngineControl::Pause(p) => paused2.store(p, Ordering::Relaxed),
                    EngineControl::Cancel => {
                        cancel2.store(true, Ordering::Relaxed);
                        break;
                    }
                }
            }
        });

        let report = match plan {
            RunPlan::Fresh { contacts } => {
                self.run_fresh(contacts, &event_tx, &paused, &cancel).await
            }
            RunPlan::ResendFailed { entries } => {
                self.run_resend(entries, &event_tx, &paused, &cancel).await
            }
        };

        // Dropping a JoinHandle does not cancel the task; abort explicitly so
        // the listener is not left waiting on a channel that never closes.
        control_handle.abort();

        Ok(report)
    }

    async fn run_fresh(
        &mut self,
        contacts: Vec<Contact>,
        event_tx: &mpsc::UnboundedSender<CampaignEvent>,
        paused: &Arc<AtomicBool>,
        cancel: &Arc<AtomicBool>,
    ) -> CampaignReport {
        let mut report = new_report(RunKind::Fresh);

        // Starting with nothing to send is a no-op: no entries, no events.
        if contacts.is_empty() || self.cfg.message_template.trim().is_empty() {
            report.finished_at = local_time_string();
            return report;
        }

        let _ = event_tx.send(CampaignEvent::RunStarted {
            kind: RunKind::Fresh,
            total: contacts.len(),
        });

        for contact in contacts {
            if cancel.load(Ordering::Relaxed) {
                report.cancelled = true;
                break;
            }

            let message = self.cfg.render_message(&contact);
            let entry = SendLogEntry::new(contact.phone.clone(), message);
            let id = entry.id.clone();
            let _ = event_tx.send(CampaignEvent::EntryQueued { entry: entry.clone() });
            report.attempted += 1;

            if !wait_for_delay(self.cfg.delay, paused, cancel).await {
                // Delay aborted by cancel: resolve the in-flight entry Failed
                // so nothing is left Pending and it stays resend-eligible.
                report.cancelled = true;
                report.failed += 1;
                let _ = event_tx.send(CampaignEvent::EntryResolved {
                    id,
                    status: DeliveryStatus::Failed,
                    error: Some("campaign cancelled".to_string()),
                });
                break;
            }

            self.resolve(id, &entry.recipient, &entry.message, event_tx, &mut report);
        }

        report.finished_at = local_time_string();
        report
    }

    async fn run_resend(
        &mut self,
        entries: Vec<SendLogEntry>,
        event_tx: &mpsc::UnboundedSender<CampaignEvent>,
        paused: &Arc<AtomicBool>,
        cancel: &Arc<AtomicBool>,
    ) -> CampaignReport {
        let mut report = new_report(RunKind::ResendFailed);

        // Only entries still Failed in the snapshot are retried; Sent and
        // Pending entries are never touched.
        let entries: Vec<SendLogEntry> = entries
            .into_iter()
            .filter(|e| e.status == DeliveryStatus::Failed)
            .collect();

        if entries.is_empty() {
            report.finished_at = local_time_string();
            return report;
        }

        let _ = event_tx.send(CampaignEvent::RunStarted {
            kind: RunKind::ResendFailed,
            total: entries.len(),
        });

        for entry in entries {
            if cancel.load(Ordering::Relaxed) {
                report.cancelled = true;
                break;
            }

            let _ = event_tx.send(CampaignEvent::EntryReset {
                id: entry.id.clone(),
                timestamp: local_time_string(),
            });
            report.attempted += 1;

            if !wait_for_delay(self.cfg.delay, paused, cancel).await {
                report.cancelled = true;
                report.failed += 1;
                let _ = event_tx.send(CampaignEvent::EntryResolved {
                    id: entry.id.clone(),
                    status: DeliveryStatus::Failed,
                    error: Some("campaign cancelled".to_string()),
                });
                break;
            }

            self.resolve(
                entry.id.clone(),
                &entry.recipient,
                &entry.message,
                event_tx,
                &mut report,
            );
        }

        report.finished_at = local_time_string();
        report
    }

    fn resolve(
        &mut self,
        id: String,
        recipient: &str,
        message: &str,
        event_tx: &mpsc::UnboundedSender<CampaignEvent>,
        report: &mut CampaignReport,
    ) {
        match self.backend.attempt_send(recipient, message) {
            DeliveryOutcome::Delivered => {
                report.sent += 1;
                let _ = event_tx.send(CampaignEvent::EntryResolved {
                    id,
                    status: DeliveryStatus::Sent,
                    error: None,
                });
            }
            DeliveryOutcome::Failed { reason } => {
                report.failed += 1;
                let _ = event_tx.send(CampaignEvent::EntryResolved {
                    id,
                    status: DeliveryStatus::Failed,
                    error: Some(reason),
                });
            }
        }
    }
}

fn new_report(kind: RunKind) -> CampaignReport {
    CampaignReport {
        run_id: gen_entry_id(),
        kind,
        attempted: 0,
        sent: 0,
        failed: 0,
        cancelled: false,
        started_at: local_time_string(),
        finished_at: String::new(),
    }
}

/// Wait out the configured delay in short slices, honoring pause and cancel.
/// Returns false when the wait was aborted by a cancel.
async fn wait_for_delay(
    delay: Duration,
    paused: &Arc<AtomicBool>,
    cancel: &Arc<AtomicBool>,
) -> bool {
    let mut remaining = delay;
    loop {
        if cancel.load(Ordering::Relaxed) {
            return false;
        }
        if paused.load(Ordering::Relaxed) {
            tokio::time::sleep(POLL_SLICE).await;
            continue;
        }
        if remaining.is_zero() {
            return true;
        }
        let step = remaining.min(POLL_SLICE);
        tokio::time::sleep(step).await;
        remaining = remaining.saturating_sub(step);
    }
}

#[cfg(test)]
mod tests {
    use super::delivery::testing::ScriptedBackend;
    use super::*;
    use crate::model::CampaignStats;

    fn test_config(template: &str) -> CampaignConfig {
        CampaignConfig {
            message_template: template.to_string(),
            delay: Duration::from_secs(1),
            ..Default::default()
        }
    }

    fn contact(i: usize, phone: &str, name: &str) -> Contact {
        Contact {
            id: format!("c-{}", i),
            phone: phone.to_string(),
            name: name.to_string(),
        }
    }

    async fn drain_until_complete(
        rx: &mut mpsc::UnboundedReceiver<CampaignEvent>,
        handle: tokio::task::JoinHandle<Result<CampaignReport>>,
    ) -> (Vec<CampaignEvent>, CampaignReport) {
        let report = handle.await.expect("join").expect("run");
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        (events, report)
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_run_creates_one_entry_per_contact_in_order() {
        let contacts = vec![
            contact(0, "+1", "Ana"),
            contact(1, "+2", "Bob"),
            contact(2, "+3", "Cai"),
        ];
        let backend = ScriptedBackend::new(vec![
            DeliveryOutcome::Delivered,
            DeliveryOutcome::Failed {
                reason: "SIM gateway failure".into(),
            },
            DeliveryOutcome::Delivered,
        ]);
        let recipients = backend.recipients.clone();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();
        let engine = CampaignEngine::new(test_config("Oi [Nome]"), Box::new(backend));
        let handle = tokio::spawn(engine.run(RunPlan::Fresh { contacts }, tx, ctrl_rx));

        let (events, report) = drain_until_complete(&mut rx, handle).await;

        assert_eq!(report.attempted, 3);
        assert_eq!(report.sent, 2);
        assert_eq!(report.failed, 1);
        assert!(!report.cancelled);
        assert_eq!(
            recipients.lock().unwrap().as_slice(),
            &["+1".to_string(), "+2".to_string(), "+3".to_string()]
        );

        let queued: Vec<&SendLogEntry> = events
            .iter()
            .filter_map(|ev| match ev {
                CampaignEvent::EntryQueued { entry } => Some(entry),
                _ => None,
            })
            .collect();
        assert_eq!(queued.len(), 3);
        assert_eq!(queued[0].message, "Oi Ana");
        assert_eq!(queued[1].message, "Oi Bob");
        assert!(queued.iter().all(|e| e.status == DeliveryStatus::Pending));

        // Every queued entry resolves exactly once, on the same id.
        let resolved: Vec<(&String, DeliveryStatus)> = events
            .iter()
            .filter_map(|ev| match ev {
                CampaignEvent::EntryResolved { id, status, .. } => Some((id, *status)),
                _ => None,
            })
            .collect();
        assert_eq!(resolved.len(), 3);
        for (i, entry) in queued.iter().enumerate() {
            assert_eq!(resolved[i].0, &entry.id);
            assert!(resolved[i].1.is_terminal());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn empty_contacts_or_message_is_a_noop() {
        for (contacts, template) in [
            (Vec::new(), "Oi [Nome]"),
            (vec![contact(0, "+1", "Ana")], ""),
            (vec![contact(0, "+1", "Ana")], "   "),
        ] {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let (_ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();
            let engine = CampaignEngine::new(
                test_config(template),
                Box::new(ScriptedBackend::new(Vec::new())),
            );
            let handle = tokio::spawn(engine.run(RunPlan::Fresh { contacts }, tx, ctrl_rx));
            let (events, report) = drain_until_complete(&mut rx, handle).await;
            assert!(events.is_empty());
            assert_eq!(report.attempted, 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_aborts_the_in_flight_delay_and_stops_the_run() {
        let contacts: Vec<Contact> = (0..10)
            .map(|i| contact(i, &format!("+{}", i), "Ana"))
            .collect();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();
        let engine = CampaignEngine::new(
            test_config("Oi [Nome]"),
            Box::new(ScriptedBackend::always(DeliveryOutcome::Delivered, 10)),
        );
        let handle = tokio::spawn(engine.run(RunPlan::Fresh { contacts }, tx, ctrl_rx));

        // Wait for the first entry to be queued, then cancel mid-delay.
        loop {
            match rx.recv().await.expect("event") {
                CampaignEvent::EntryQueued { .. } => break,
                _ => continue,
            }
        }
        ctrl_tx.send(EngineControl::Cancel).expect("send cancel");

        let report = handle.await.expect("join").expect("run");
        assert!(report.cancelled);
        assert_eq!(report.attempted, 1);

        // The in-flight entry resolved Failed with a cancel marker; no further
        // entries were queued.
        let mut resolved = 0;
        while let Ok(ev) = rx.try_recv() {
            match ev {
                CampaignEvent::EntryQueued { .. } => panic!("entry queued after cancel"),
                CampaignEvent::EntryResolved { status, error, .. } => {
                    resolved += 1;
                    assert_eq!(status, DeliveryStatus::Failed);
                    assert_eq!(error.as_deref(), Some("campaign cancelled"));
                }
                _ => {}
            }
        }
        assert_eq!(resolved, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resend_touches_only_failed_entries_and_creates_none() {
        let mut failed_a = SendLogEntry::new("+1".into(), "Oi Ana".into());
        failed_a.status = DeliveryStatus::Failed;
        let mut sent_b = SendLogEntry::new("+2".into(), "Oi Bob".into());
        sent_b.status = DeliveryStatus::Sent;
        let mut failed_c = SendLogEntry::new("+3".into(), "Oi Cai".into());
        failed_c.status = DeliveryStatus::Failed;
        let snapshot = vec![failed_a.clone(), sent_b, failed_c.clone()];

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();
        let engine = CampaignEngine::new(
            test_config("unused"),
            Box::new(ScriptedBackend::always(DeliveryOutcome::Delivered, 2)),
        );
        let handle = tokio::spawn(engine.run(RunPlan::ResendFailed { entries: snapshot }, tx, ctrl_rx));

        let (events, report) = drain_until_complete(&mut rx, handle).await;
        assert_eq!(report.attempted, 2);
        assert_eq!(report.sent, 2);

        let reset_ids: Vec<&String> = events
            .iter()
            .filter_map(|ev| match ev {
                CampaignEvent::EntryReset { id, .. } => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(reset_ids, vec![&failed_a.id, &failed_c.id]);
        assert!(!events
            .iter()
            .any(|ev| matches!(ev, CampaignEvent::EntryQueued { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_stretches_the_delay_until_resumed() {
        let contacts = vec![contact(0, "+1", "Ana")];
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();
        let engine = CampaignEngine::new(
            test_config("Oi [Nome]"),
            Box::new(ScriptedBackend::always(DeliveryOutcome::Delivered, 1)),
        );
        let handle = tokio::spawn(engine.run(RunPlan::Fresh { contacts }, tx, ctrl_rx));

        loop {
            match rx.recv().await.expect("event") {
                CampaignEvent::EntryQueued { .. } => break,
                _ => continue,
            }
        }
        ctrl_tx.send(EngineControl::Pause(true)).expect("pause");
        // Let the paused loop spin a few slices, then resume.
        tokio::time::sleep(Duration::from_secs(2)).await;
        ctrl_tx.send(EngineControl::Pause(false)).expect("resume");

        let report = handle.await.expect("join").expect("run");
        assert_eq!(report.sent, 1);
        assert!(!report.cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn full_pass_matches_derived_stats() {
        let contacts: Vec<Contact> = (0..4)
            .map(|i| contact(i, &format!("+{}", i), "Ana"))
            .collect();
        let backend = ScriptedBackend::new(vec![
            DeliveryOutcome::Delivered,
            DeliveryOutcome::Delivered,
            DeliveryOutcome::Failed {
                reason: "SIM gateway failure".into(),
            },
            DeliveryOutcome::Delivered,
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();
        let engine = CampaignEngine::new(test_config("Oi [Nome]"), Box::new(backend));
        let handle = tokio::spawn(engine.run(RunPlan::Fresh { contacts }, tx, ctrl_rx));

        let (events, _) = drain_until_complete(&mut rx, handle).await;
        let mut store = crate::store::LogStore::default();
        for ev in &events {
            store.apply(ev);
        }
        let stats = CampaignStats::compute(4, store.entries());
        assert_eq!(stats.sent, 3);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.remaining, 0);
    }
}
