//! Text summary builder for CLI output.
//!
//! Formats human-readable lines for a finished campaign pass in text mode.

use crate::model::{CampaignReport, CampaignStats, RunKind};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Build a text summary from a run report and the post-run log stats.
pub(crate) fn build_text_summary(report: &CampaignReport, stats: &CampaignStats) -> TextSummary {
    let mut lines = Vec::new();

    let kind = match report.kind {
        RunKind::Fresh => "Campaign",
        RunKind::ResendFailed => "Resend pass",
    };
    let outcome = if report.cancelled {
        "cancelled"
    } else {
        "finished"
    };
    lines.push(format!(
        "{} {}: {} attempted, {} sent, {} failed",
        kind, outcome, report.attempted, report.sent, report.failed
    ));

    if report.attempted > 0 {
        let pct = (report.sent as f64 / report.attempted as f64) * 100.0;
        lines.push(format!("Success rate: {:.1}%", pct));
    }
    lines.push(format!(
        "Window: {} – {}",
        report.started_at, report.finished_at
    ));
    lines.push(format!(
        "Log totals: {} sent, {} failed, {} remaining",
        stats.sent, stats.failed, stats.remaining
    ));

    TextSummary { lines }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(attempted: usize, sent: usize, cancelled: bool) -> CampaignReport {
        CampaignReport {
            run_id: "r".into(),
            kind: RunKind::Fresh,
            attempted,
            sent,
            failed: attempted - sent,
            cancelled,
            started_at: "10:00:00".into(),
            finished_at: "10:05:00".into(),
        }
    }

    #[test]
    fn summarizes_a_completed_pass() {
        let stats = CampaignStats {
            total: 10,
            sent: 9,
            failed: 1,
            remaining: 0,
        };
        let summary = build_text_summary(&report(10, 9, false), &stats);
        assert_eq!(
            summary.lines[0],
            "Campaign finished: 10 attempted, 9 sent, 1 failed"
        );
        assert_eq!(summary.lines[1], "Success rate: 90.0%");
    }

    #[test]
    fn marks_cancelled_passes_and_skips_rate_when_nothing_attempted() {
        let stats = CampaignStats::default();
        let summary = build_text_summary(&report(0, 0, true), &stats);
        assert!(summary.lines[0].starts_with("Campaign cancelled"));
        assert!(!summary.lines.iter().any(|l| l.starts_with("Success rate")));
    }
}
