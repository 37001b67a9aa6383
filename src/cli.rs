use crate::engine::{CampaignEngine, EngineControl, RunPlan, SimulatedGateway};
use crate::model::{
    CampaignConfig, CampaignEvent, CampaignReport, CampaignStats, Contact, DeliveryStatus,
    InfoEvent, SendLogEntry, DEFAULT_RESEND_SUCCESS_RATE, DEFAULT_SUCCESS_RATE,
};
use crate::store::LogStore;
use crate::{contacts, storage};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "smsblast",
    version,
    about = "Bulk SMS campaign simulator with optional TUI dashboard"
)]
pub struct Cli {
    /// Contact list file: one `phone[,name]` per line, no header
    #[arg(long)]
    pub contacts: Option<PathBuf>,

    /// Message template; `[Nome]` is replaced with the recipient name
    #[arg(long)]
    pub message: Option<String>,

    /// Read the message template from a file instead
    #[arg(long, conflicts_with = "message")]
    pub message_file: Option<PathBuf>,

    /// Delay between sends (e.g. 5s, 1500ms)
    #[arg(long)]
    pub delay: Option<humantime::Duration>,

    /// Success probability for fresh sends
    #[arg(long, default_value_t = DEFAULT_SUCCESS_RATE)]
    pub success_rate: f64,

    /// Success probability when resending failed entries
    #[arg(long, default_value_t = DEFAULT_RESEND_SUCCESS_RATE)]
    pub resend_success_rate: f64,

    /// Print the final send log as JSON and exit (no TUI)
    #[arg(long)]
    pub json: bool,

    /// Run with plain text progress output and exit (no TUI)
    #[arg(long)]
    pub text: bool,

    /// Run silently: suppress all output except errors (for cron usage)
    #[arg(long)]
    pub silent: bool,

    /// Resend currently failed entries from the persisted log instead of a fresh pass
    #[arg(long)]
    pub resend_failed: bool,

    /// Export the send log as JSON after the run
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    /// Export the send log as CSV after the run
    #[arg(long)]
    pub export_csv: Option<PathBuf>,

    /// Use --auto-save true or --auto-save false to override log/config persistence
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub auto_save: bool,

    /// Rewrite the message through the optimization service before sending
    #[arg(long)]
    pub optimize: bool,

    /// Audience context passed to the optimizer
    #[arg(long, default_value = "Vendas e Fidelização")]
    pub optimize_context: String,

    /// Clear the persisted send log and exit
    #[arg(long)]
    pub clear_log: bool,
}

/// Everything a run needs, assembled from CLI flags and the persisted slots.
pub struct Session {
    pub contacts: Vec<Contact>,
    pub contacts_file: Option<String>,
    pub config: CampaignConfig,
    pub store: LogStore,
    pub data_dir: PathBuf,
}

pub async fn run(args: Cli) -> Result<()> {
    // Validate that --silent can only be used with --json
    if args.silent && !args.json {
        return Err(anyhow::anyhow!(
            "--silent can only be used with --json. Use --silent --json together."
        ));
    }

    if args.clear_log {
        let dir = storage::data_dir()?;
        storage::clear_log(&dir)?;
        if !args.silent {
            println!("Send log cleared.");
        }
        return Ok(());
    }

    // Silent mode takes precedence over other output modes
    if args.silent {
        return run_headless(args, true).await;
    }

    if !args.json && !args.text {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args).await;
        }
        #[cfg(not(feature = "tui"))]
        {
            // Fallback when built without TUI support.
            return run_text(args).await;
        }
    }

    if args.json {
        return run_headless(args, false).await;
    }

    run_text(args).await
}

/// Assemble contacts, config, and the persisted log. Flags win over the
/// persisted slots; the slots win over defaults.
pub fn prepare_session(args: &Cli) -> Result<Session> {
    let data_dir = storage::data_dir()?;

    let message_template = if let Some(msg) = args.message.clone() {
        msg
    } else if let Some(path) = args.message_file.as_deref() {
        std::fs::read_to_string(path)
            .with_context(|| format!("read message file {}", path.display()))?
    } else {
        storage::load_template(&data_dir).unwrap_or_default()
    };

    let delay = args
        .delay
        .map(Duration::from)
        .or_else(|| storage::load_delay(&data_dir))
        .unwrap_or(Duration::from_secs(5));

    let config = CampaignConfig {
        message_template,
        delay,
        success_rate: args.success_rate,
        resend_success_rate: args.resend_success_rate,
    }
    .sanitized();

    let (contacts, contacts_file) = match args.contacts.as_deref() {
        Some(path) => (
            contacts::load_contacts(path)?,
            Some(path.display().to_string()),
        ),
        None => (Vec::new(), None),
    };

    let store = LogStore::new(storage::load_log(&data_dir));

    Ok(Session {
        contacts,
        contacts_file,
        config,
        store,
        data_dir,
    })
}

/// Rewrite the session message through the optimizer when requested.
/// Any failure keeps the original message; headless modes only note it.
async fn maybe_optimize(args: &Cli, session: &mut Session, note: impl Fn(String)) {
    if !args.optimize || session.config.message_template.trim().is_empty() {
        return;
    }
    let Some(client) = crate::optimizer::OptimizerClient::from_env() else {
        note("Optimizer disabled: no API key configured (set SMSBLAST_API_KEY)".into());
        return;
    };
    match client
        .optimize(&session.config.message_template, &args.optimize_context)
        .await
    {
        Ok(result) => {
            note(format!("Message optimized: {}", result.explanation));
            session.config.message_template = result.optimized_message;
        }
        Err(e) => {
            note(
                InfoEvent::OptimizeFailed {
                    reason: format!("{e:#}"),
                }
                .to_message(),
            );
        }
    }
}

/// Build the run plan from the session. Resend iterates the persisted failed
/// entries; a fresh pass iterates the imported contacts.
fn build_plan(args: &Cli, session: &Session) -> RunPlan {
    if args.resend_failed {
        RunPlan::ResendFailed {
            entries: session.store.failed_entries(),
        }
    } else {
        RunPlan::Fresh {
            contacts: session.contacts.clone(),
        }
    }
}

fn spawn_engine(
    session: &Session,
    plan: RunPlan,
    event_tx: mpsc::UnboundedSender<CampaignEvent>,
) -> tokio::task::JoinHandle<Result<CampaignReport>> {
    let rate = match plan {
        RunPlan::Fresh { .. } => session.config.success_rate,
        RunPlan::ResendFailed { .. } => session.config.resend_success_rate,
    };
    let (_ctrl_tx, ctrl_rx) = mpsc::unbounded_channel::<EngineControl>();
    let engine = CampaignEngine::new(
        session.config.clone(),
        Box::new(SimulatedGateway::new(rate)),
    );
    tokio::spawn(async move { engine.run(plan, event_tx, ctrl_rx).await })
}

/// Persist the three slots after a run, when auto-save is on.
fn persist_session(args: &Cli, session: &Session) -> Result<()> {
    if !args.auto_save {
        return Ok(());
    }
    storage::save_template(&session.data_dir, &session.config.message_template)?;
    storage::save_delay(&session.data_dir, session.config.delay)?;
    storage::save_log(&session.data_dir, session.store.entries())?;
    Ok(())
}

fn handle_exports(args: &Cli, store: &LogStore) -> Result<()> {
    if let Some(p) = args.export_json.as_deref() {
        storage::export_json(p, store.entries())?;
    }
    if let Some(p) = args.export_csv.as_deref() {
        storage::export_csv(p, store.entries())?;
    }
    Ok(())
}

/// Shape of the JSON output mode: the effective config, the run report, and
/// the final send log in one document.
#[derive(serde::Serialize)]
struct JsonOutput<'a> {
    config: &'a CampaignConfig,
    report: &'a CampaignReport,
    entries: &'a [SendLogEntry],
}

/// Run the campaign without a TUI and print the final result as JSON.
/// `silent` suppresses all progress output.
async fn run_headless(args: Cli, silent: bool) -> Result<()> {
    let mut session = prepare_session(&args)?;
    let (out_tx, out_handle) = if silent {
        (None, None)
    } else {
        let (tx, handle) = spawn_output_writer();
        (Some(tx), Some(handle))
    };

    let stderr_note = |msg: String| {
        if let Some(tx) = out_tx.as_ref() {
            let _ = tx.send(OutputLine::Stderr(msg));
        }
    };
    maybe_optimize(&args, &mut session, &stderr_note).await;

    let plan = build_plan(&args, &session);
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<CampaignEvent>();
    let handle = spawn_engine(&session, plan, evt_tx);

    // Fold events into the log; progress stays quiet in these modes.
    while let Some(ev) = evt_rx.recv().await {
        session.store.apply(&ev);
    }

    let report = handle
        .await
        .context("campaign task failed")?
        .context("campaign run failed")?;

    persist_session(&args, &session)?;
    handle_exports(&args, &session.store)?;

    if let Some(tx) = out_tx.as_ref() {
        let out = serde_json::to_string_pretty(&JsonOutput {
            config: &session.config,
            report: &report,
            entries: session.store.entries(),
        })?;
        let _ = tx.send(OutputLine::Stdout(out));
    }

    if let Some(tx) = out_tx {
        drop(tx);
    }
    if let Some(handle) = out_handle {
        let _ = handle.await;
    }

    Ok(())
}

async fn run_text(args: Cli) -> Result<()> {
    let mut session = prepare_session(&args)?;
    let (out_tx, out_handle) = spawn_output_writer();

    if let Some(file) = session.contacts_file.as_deref() {
        let _ = out_tx.send(OutputLine::Stderr(
            InfoEvent::ContactsLoaded {
                count: session.contacts.len(),
                file: file.to_string(),
            }
            .to_message(),
        ));
    }

    let note = |msg: String| {
        let _ = out_tx.send(OutputLine::Stderr(msg));
    };
    maybe_optimize(&args, &mut session, &note).await;

    let plan = build_plan(&args, &session);
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<CampaignEvent>();
    let handle = spawn_engine(&session, plan, evt_tx);

    while let Some(ev) = evt_rx.recv().await {
        match &ev {
            CampaignEvent::RunStarted { total, .. } => {
                let _ = out_tx.send(OutputLine::Stderr(format!(
                    "== Sending to {} recipient(s), {} between sends ==",
                    total,
                    humantime::format_duration(session.config.delay)
                )));
            }
            CampaignEvent::EntryQueued { entry } => {
                let _ = out_tx.send(OutputLine::Stderr(format!(
                    "[{}] {} … sending",
                    entry.timestamp, entry.recipient
                )));
            }
            CampaignEvent::EntryReset { .. } => {}
            CampaignEvent::EntryResolved { id, status, error } => {
                if let Some(entry) = session.store.entries().iter().find(|e| &e.id == id) {
                    let suffix = match (status, error) {
                        (DeliveryStatus::Failed, Some(reason)) => format!(" ({})", reason),
                        _ => String::new(),
                    };
                    let _ = out_tx.send(OutputLine::Stderr(format!(
                        "[{}] {} → {}{}",
                        entry.timestamp,
                        entry.recipient,
                        status.as_str(),
                        suffix
                    )));
                }
            }
            CampaignEvent::Info(info) => {
                let _ = out_tx.send(OutputLine::Stderr(info.to_message()));
            }
            CampaignEvent::MessageOptimized { .. } | CampaignEvent::RunCompleted { .. } => {}
        }
        session.store.apply(&ev);
    }

    let report = handle
        .await
        .context("campaign task failed")?
        .context("campaign run failed")?;

    persist_session(&args, &session)?;
    handle_exports(&args, &session.store)?;

    let stats = CampaignStats::compute(session.contacts.len(), session.store.entries());
    let summary = crate::text_summary::build_text_summary(&report, &stats);
    for line in summary.lines {
        let _ = out_tx.send(OutputLine::Stdout(line));
    }
    if args.auto_save {
        let _ = out_tx.send(OutputLine::Stderr(format!(
            "Log saved under {}",
            session.data_dir.display()
        )));
    }

    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_plan_uses_contacts_and_resend_uses_failed_entries() {
        let args = Cli::parse_from(["smsblast", "--resend-failed"]);
        let mut store = LogStore::default();
        let entry = crate::model::SendLogEntry::new("+1".into(), "hi".into());
        let id = entry.id.clone();
        store.apply(&CampaignEvent::EntryQueued { entry });
        store.apply(&CampaignEvent::EntryResolved {
            id,
            status: DeliveryStatus::Failed,
            error: None,
        });
        let session = Session {
            contacts: vec![Contact {
                id: "c-0".into(),
                phone: "+2".into(),
                name: "Ana".into(),
            }],
            contacts_file: None,
            config: CampaignConfig::default(),
            store,
            data_dir: std::env::temp_dir(),
        };

        match build_plan(&args, &session) {
            RunPlan::ResendFailed { entries } => assert_eq!(entries.len(), 1),
            RunPlan::Fresh { .. } => panic!("expected resend plan"),
        }

        let args = Cli::parse_from(["smsblast"]);
        match build_plan(&args, &session) {
            RunPlan::Fresh { contacts } => assert_eq!(contacts.len(), 1),
            RunPlan::ResendFailed { .. } => panic!("expected fresh plan"),
        }
    }

    #[test]
    fn json_output_carries_config_report_and_entries() {
        let config = CampaignConfig {
            message_template: "Oi [Nome]".into(),
            delay: Duration::from_secs(5),
            ..Default::default()
        }
        .sanitized();
        let report = CampaignReport {
            run_id: "r".into(),
            kind: crate::model::RunKind::Fresh,
            attempted: 1,
            sent: 1,
            failed: 0,
            cancelled: false,
            started_at: "10:00:00".into(),
            finished_at: "10:00:05".into(),
        };
        let mut entry = SendLogEntry::new("+15551234".into(), "Oi Ana".into());
        entry.status = DeliveryStatus::Sent;

        let value = serde_json::to_value(JsonOutput {
            config: &config,
            report: &report,
            entries: std::slice::from_ref(&entry),
        })
        .expect("serialize");

        assert_eq!(value["config"]["delay"], "5s");
        assert_eq!(value["report"]["kind"], "Fresh");
        assert_eq!(value["report"]["sent"], 1);
        assert_eq!(value["entries"][0]["recipient"], "+15551234");
        assert_eq!(value["entries"][0]["status"], "Sent");
        // A clean entry carries no error field at all.
        assert!(value["entries"][0].get("error").is_none());
    }

    #[test]
    fn silent_requires_json() {
        let args = Cli::parse_from(["smsblast", "--silent"]);
        let err = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime")
            .block_on(run(args));
        assert!(err.is_err());
    }
}
