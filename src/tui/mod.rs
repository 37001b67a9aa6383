mod help;

use crate::cli::{self, Cli};
use crate::model::{
    format_estimated_duration, CampaignConfig, CampaignEvent, CampaignReport, CampaignStats,
    Contact, DeliveryStatus, InfoEvent, RunKind, MIN_SEND_DELAY,
};
use crate::orchestrator::{self, UiCommand};
use crate::store::LogStore;
use crate::storage;
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use help::draw_help;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph, Tabs},
    Terminal,
};
use std::path::PathBuf;
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

const DELAY_STEP: Duration = Duration::from_millis(500);
const MAX_DELAY: Duration = Duration::from_secs(60);

struct UiState {
    tab: usize,
    paused: bool,
    running: bool,
    run_kind: Option<RunKind>,
    run_total: usize,
    run_done: usize,
    info: String,

    contacts: Vec<Contact>,
    contacts_file: Option<String>,
    message: String,
    delay: Duration,
    success_rate: f64,
    resend_success_rate: f64,
    optimize_context: String,
    optimizing: bool,
    last_explanation: Option<String>,

    store: LogStore,
    log_scroll: usize,
    last_report: Option<CampaignReport>,

    auto_save: bool,
    data_dir: PathBuf,
}

impl UiState {
    fn config(&self) -> CampaignConfig {
        CampaignConfig {
            message_template: self.message.clone(),
            delay: self.delay,
            success_rate: self.success_rate,
            resend_success_rate: self.resend_success_rate,
        }
        .sanitized()
    }

    fn stats(&self) -> CampaignStats {
        CampaignStats::compute(self.contacts.len(), self.store.entries())
    }

    /// Write-through persistence for the three slots. Errors land in the info
    /// line instead of tearing the UI down.
    fn persist_log(&mut self) {
        if !self.auto_save {
            return;
        }
        if let Err(e) = storage::save_log(&self.data_dir, self.store.entries()) {
            self.info = format!("Log save failed: {e:#}");
        }
    }

    fn persist_template(&mut self) {
        if !self.auto_save {
            return;
        }
        if let Err(e) = storage::save_template(&self.data_dir, &self.message) {
            self.info = format!("Template save failed: {e:#}");
        }
    }

    fn persist_delay(&mut self) {
        if !self.auto_save {
            return;
        }
        if let Err(e) = storage::save_delay(&self.data_dir, self.delay) {
            self.info = format!("Delay save failed: {e:#}");
        }
    }
}

pub async fn run(args: Cli) -> Result<()> {
    // Unbounded channels avoid backpressure between engine and UI.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<CampaignEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    let session = cli::prepare_session(&args)?;
    let contacts = session.contacts.clone();

    // TUI runs in a dedicated thread to keep all blocking I/O out of the
    // Tokio runtime.
    let ui_args = args.clone();
    let ui_handle = std::thread::spawn(move || run_threaded(ui_args, session, event_rx, cmd_tx));

    let res = orchestrator::run_controller(contacts, event_tx, cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res
}

/// Run the TUI loop on a dedicated thread.
fn run_threaded(
    args: Cli,
    session: cli::Session,
    mut event_rx: UnboundedReceiver<CampaignEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    // UiState is owned by the UI thread only; no cross-thread mutation.
    let mut state = UiState {
        tab: 0,
        paused: false,
        running: false,
        run_kind: None,
        run_total: 0,
        run_done: 0,
        info: if session.contacts.is_empty() {
            "No contacts loaded. Restart with --contacts <file>.".into()
        } else {
            InfoEvent::ContactsLoaded {
                count: session.contacts.len(),
                file: session
                    .contacts_file
                    .clone()
                    .unwrap_or_else(|| "import".into()),
            }
            .to_message()
        },
        contacts: session.contacts,
        contacts_file: session.contacts_file,
        message: session.config.message_template.clone(),
        delay: session.config.delay,
        success_rate: session.config.success_rate,
        resend_success_rate: session.config.resend_success_rate,
        optimize_context: args.optimize_context.clone(),
        optimizing: false,
        last_explanation: None,
        store: session.store,
        log_scroll: 0,
        last_report: None,
        auto_save: args.auto_save,
        data_dir: session.data_dir,
    };

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain events without blocking to keep the UI responsive.
        while let Ok(ev) = event_rx.try_recv() {
            apply_event(&mut state, ev);
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                match (k.modifiers, k.code) {
                    (_, KeyCode::Char('q')) | (KeyModifiers::CONTROL, KeyCode::Char('c')) => {
                        let _ = cmd_tx.send(UiCommand::Quit);
                        break Ok(());
                    }
                    (_, KeyCode::Char('s')) => {
                        let _ = cmd_tx.send(UiCommand::Start {
                            config: state.config(),
                        });
                    }
                    (_, KeyCode::Char('p')) => {
                        if state.running {
                            state.paused = !state.paused;
                            let _ = cmd_tx.send(UiCommand::Pause(state.paused));
                            state.info = if state.paused {
                                "Paused".into()
                            } else {
                                "Resumed".into()
                            };
                        }
                    }
                    (_, KeyCode::Char('c')) => {
                        let _ = cmd_tx.send(UiCommand::Cancel);
                    }
                    (_, KeyCode::Char('f')) => {
                        let _ = cmd_tx.send(UiCommand::ResendFailed {
                            config: state.config(),
                            entries: state.store.failed_entries(),
                        });
                    }
                    (_, KeyCode::Char('o')) => {
                        if state.message.trim().is_empty() {
                            state.info = "Nothing to optimize: message is empty".into();
                        } else if state.optimizing {
                            state.info = "Optimization already in flight".into();
                        } else {
                            state.optimizing = true;
                            state.info = "Optimizing message…".into();
                            let _ = cmd_tx.send(UiCommand::Optimize {
                                message: state.message.clone(),
                                context: state.optimize_context.clone(),
                            });
                        }
                    }
                    (_, KeyCode::Char('+')) | (_, KeyCode::Char('=')) => {
                        state.delay = (state.delay + DELAY_STEP).min(MAX_DELAY);
                        state.persist_delay();
                        state.info = format!(
                            "Delay: {}",
                            humantime::format_duration(state.delay)
                        );
                    }
                    (_, KeyCode::Char('-')) => {
                        state.delay = state.delay.saturating_sub(DELAY_STEP).max(MIN_SEND_DELAY);
                        state.persist_delay();
                        state.info = format!(
                            "Delay: {}",
                            humantime::format_duration(state.delay)
                        );
                    }
                    (_, KeyCode::Char('a')) => {
                        state.auto_save = !state.auto_save;
                        state.info = if state.auto_save {
                            "Auto-save enabled".into()
                        } else {
                            "Auto-save disabled".into()
                        };
                    }
                    (_, KeyCode::Char('x')) => {
                        if state.running {
                            state.info = "Cannot clear the log during a run".into();
                        } else {
                            state.store.clear();
                            state.log_scroll = 0;
                            match storage::clear_log(&state.data_dir) {
                                Ok(()) => state.info = "Send log cleared".into(),
                                Err(e) => state.info = format!("Log clear failed: {e:#}"),
                            }
                        }
                    }
                    (_, KeyCode::Char('e')) => {
                        export_log(&mut state, "json");
                    }
                    (_, KeyCode::Char('w')) => {
                        export_log(&mut state, "csv");
                    }
                    (_, KeyCode::Tab) => {
                        state.tab = (state.tab + 1) % 3;
                        if state.tab == 1 {
                            state.log_scroll = 0;
                        }
                    }
                    (_, KeyCode::Char('?')) => {
                        state.tab = 2;
                    }
                    (_, KeyCode::Up) | (_, KeyCode::Char('k')) => {
                        if state.tab == 1 {
                            state.log_scroll = state.log_scroll.saturating_sub(1);
                        }
                    }
                    (_, KeyCode::Down) | (_, KeyCode::Char('j')) => {
                        if state.tab == 1
                            && state.log_scroll + 1 < state.store.len()
                        {
                            state.log_scroll += 1;
                        }
                    }
                    _ => {}
                }
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

fn apply_event(state: &mut UiState, ev: CampaignEvent) {
    match ev {
        CampaignEvent::RunStarted { kind, total } => {
            state.running = true;
            state.paused = false;
            state.run_kind = Some(kind);
            state.run_total = total;
            state.run_done = 0;
            state.info = match kind {
                RunKind::Fresh => format!("Campaign started: {} recipient(s)", total),
                RunKind::ResendFailed => format!("Resending {} failed entr(ies)", total),
            };
        }
        CampaignEvent::EntryQueued { .. } | CampaignEvent::EntryReset { .. } => {
            if state.store.apply(&ev) {
                state.persist_log();
            }
        }
        CampaignEvent::EntryResolved { .. } => {
            if state.store.apply(&ev) {
                state.run_done += 1;
                state.persist_log();
            }
        }
        CampaignEvent::MessageOptimized {
            message,
            explanation,
        } => {
            state.message = message;
            state.last_explanation = Some(explanation);
            state.optimizing = false;
            state.info = "Message optimized".into();
            state.persist_template();
        }
        CampaignEvent::Info(info) => {
            if matches!(info, InfoEvent::OptimizeFailed { .. }) {
                state.optimizing = false;
            }
            state.info = info.to_message();
        }
        CampaignEvent::RunCompleted { report } => {
            state.running = false;
            state.paused = false;
            state.info = if report.cancelled {
                format!(
                    "Run cancelled: {} sent, {} failed",
                    report.sent, report.failed
                )
            } else if report.attempted == 0 {
                InfoEvent::NothingToSend.to_message()
            } else {
                format!(
                    "Run finished: {} sent, {} failed",
                    report.sent, report.failed
                )
            };
            state.last_report = Some(*report);
        }
    }
}

fn export_log(state: &mut UiState, ext: &str) {
    if state.store.is_empty() {
        state.info = "Nothing to export: log is empty".into();
        return;
    }
    let path = match std::env::current_dir() {
        Ok(dir) => dir.join(export_file_name(ext)),
        Err(e) => {
            state.info = format!("Export failed: {e}");
            return;
        }
    };
    let res = match ext {
        "csv" => storage::export_csv(&path, state.store.entries()),
        _ => storage::export_json(&path, state.store.entries()),
    };
    match res {
        Ok(()) => state.info = format!("Exported: {}", path.display()),
        Err(e) => state.info = format!("Export failed: {e:#}"),
    }
}

fn export_file_name(ext: &str) -> String {
    let fmt = time::macros::format_description!("[year][month][day]-[hour][minute][second]");
    let now = time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    format!(
        "smsblast-log-{}.{}",
        now.format(&fmt).unwrap_or_else(|_| "now".into()),
        ext
    )
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)].as_ref())
        .split(area);

    let tabs = Tabs::new(vec![
        Line::from("Dashboard"),
        Line::from("Log"),
        Line::from("Help"),
    ])
    .select(state.tab)
    .block(Block::default().borders(Borders::ALL).title("smsblast"))
    .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        0 => draw_dashboard(chunks[1], f, state),
        1 => draw_log(chunks[1], f, state),
        _ => draw_help(chunks[1], f),
    }
}

fn draw_dashboard(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let main = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(9), // Campaign + progress cards side by side
                Constraint::Length(3), // Progress gauge
                Constraint::Min(4),    // Recent log entries
                Constraint::Length(4), // Status row
            ]
            .as_ref(),
        )
        .split(area);

    let top_row = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)].as_ref())
        .split(main[0]);

    // Campaign configuration card.
    let message_preview = match state.message.lines().next() {
        Some(line) if !line.is_empty() => {
            let mut p: String = line.chars().take(48).collect();
            if line.chars().count() > 48 {
                p.push('…');
            }
            p
        }
        _ => "<empty — pass --message or --message-file>".to_string(),
    };
    let mut campaign_lines = vec![
        Line::from(vec![
            Span::styled("Contacts: ", Style::default().fg(Color::Gray)),
            Span::raw(format!(
                "{}{}",
                state.contacts.len(),
                state
                    .contacts_file
                    .as_deref()
                    .map(|fname| format!(" ({})", fname))
                    .unwrap_or_default()
            )),
        ]),
        Line::from(vec![
            Span::styled("Delay: ", Style::default().fg(Color::Gray)),
            Span::raw(format!("{}", humantime::format_duration(state.delay))),
            Span::raw("   "),
            Span::styled("Est. total: ", Style::default().fg(Color::Gray)),
            Span::raw(format_estimated_duration(state.contacts.len(), state.delay)),
        ]),
        Line::from(vec![
            Span::styled("Success rate: ", Style::default().fg(Color::Gray)),
            Span::raw(format!(
                "{:.0}% fresh / {:.0}% resend",
                state.success_rate * 100.0,
                state.resend_success_rate * 100.0
            )),
        ]),
        Line::from(vec![
            Span::styled("Message: ", Style::default().fg(Color::Gray)),
            Span::raw(message_preview),
        ]),
        Line::from(vec![
            Span::styled("Auto-save: ", Style::default().fg(Color::Gray)),
            Span::raw(if state.auto_save { "on" } else { "off" }),
        ]),
    ];
    if let Some(explanation) = state.last_explanation.as_deref() {
        campaign_lines.push(Line::from(vec![
            Span::styled("Optimizer: ", Style::default().fg(Color::Gray)),
            Span::styled(truncate(explanation, 60), Style::default().fg(Color::Cyan)),
        ]));
    }
    let campaign = Paragraph::new(campaign_lines)
        .block(Block::default().borders(Borders::ALL).title("Campaign"));
    f.render_widget(campaign, top_row[0]);

    // Live counters card.
    let stats = state.stats();
    let status_label = if state.optimizing {
        ("Optimizing", Color::Cyan)
    } else if state.running && state.paused {
        ("Paused", Color::Yellow)
    } else if state.running {
        match state.run_kind {
            Some(RunKind::ResendFailed) => ("Resending", Color::Green),
            _ => ("Sending", Color::Green),
        }
    } else {
        ("Idle", Color::Gray)
    };
    let stats_lines = vec![
        Line::from(vec![
            Span::styled("Status: ", Style::default().fg(Color::Gray)),
            Span::styled(status_label.0, Style::default().fg(status_label.1)),
        ]),
        Line::from(vec![
            Span::styled("Sent: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{}", stats.sent),
                Style::default().fg(Color::Green),
            ),
            Span::raw("   "),
            Span::styled("Failed: ", Style::default().fg(Color::Gray)),
            Span::styled(format!("{}", stats.failed), Style::default().fg(Color::Red)),
            Span::raw("   "),
            Span::styled("Remaining: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{}", stats.remaining),
                Style::default().fg(Color::Cyan),
            ),
        ]),
        Line::from(vec![
            Span::styled("Log entries: ", Style::default().fg(Color::Gray)),
            Span::raw(format!("{}", state.store.len())),
        ]),
        match state.last_report.as_ref() {
            Some(r) => Line::from(vec![
                Span::styled("Last run: ", Style::default().fg(Color::Gray)),
                Span::raw(format!(
                    "{} attempted, {} sent, {} failed{}",
                    r.attempted,
                    r.sent,
                    r.failed,
                    if r.cancelled { " (cancelled)" } else { "" }
                )),
            ]),
            None => Line::from(vec![
                Span::styled("Last run: ", Style::default().fg(Color::Gray)),
                Span::raw("-"),
            ]),
        },
    ];
    let progress = Paragraph::new(stats_lines)
        .block(Block::default().borders(Borders::ALL).title("Progress"));
    f.render_widget(progress, top_row[1]);

    // Gauge tracks the current pass while running, the whole log otherwise.
    let (ratio, label) = if state.running && state.run_total > 0 {
        (
            (state.run_done as f64 / state.run_total as f64).clamp(0.0, 1.0),
            format!("{} / {}", state.run_done, state.run_total),
        )
    } else if stats.total > 0 {
        let done = stats.total.saturating_sub(stats.remaining);
        (
            (done as f64 / stats.total as f64).clamp(0.0, 1.0),
            format!("{} / {}", done, stats.total),
        )
    } else {
        (0.0, "-".to_string())
    };
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Pass progress"))
        .gauge_style(Style::default().fg(Color::Blue))
        .ratio(ratio)
        .label(label);
    f.render_widget(gauge, main[1]);

    // Most recent attempts, newest first.
    let visible = (main[2].height.saturating_sub(2)) as usize;
    let recent: Vec<Line> = state
        .store
        .entries()
        .iter()
        .take(visible.max(1))
        .map(entry_line)
        .collect();
    let recent = Paragraph::new(recent)
        .block(Block::default().borders(Borders::ALL).title("Recent sends"));
    f.render_widget(recent, main[2]);

    let mut status_lines = vec![Line::from(vec![
        Span::styled("Info: ", Style::default().fg(Color::Gray)),
        Span::raw(state.info.as_str()),
    ])];
    status_lines.push(Line::from(
        "Keys: s start | p pause | c cancel | f resend failed | o optimize | +/- delay | tab switch | ? help",
    ));
    let status =
        Paragraph::new(status_lines).block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(status, main[3]);
}

fn draw_log(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let title = format!("Send log ({} entries, newest first)", state.store.len());
    if state.store.is_empty() {
        let empty = Paragraph::new("No send attempts recorded yet.")
            .block(Block::default().borders(Borders::ALL).title(title));
        f.render_widget(empty, area);
        return;
    }

    let visible = (area.height.saturating_sub(2)) as usize;
    let lines: Vec<Line> = state
        .store
        .entries()
        .iter()
        .skip(state.log_scroll)
        .take(visible.max(1))
        .map(entry_line)
        .collect();
    let log =
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(log, area);
}

fn entry_line(entry: &crate::model::SendLogEntry) -> Line<'static> {
    let (marker, color) = match entry.status {
        DeliveryStatus::Sent => ("✓", Color::Green),
        DeliveryStatus::Failed => ("✗", Color::Red),
        DeliveryStatus::Pending => ("…", Color::Yellow),
    };
    let mut spans = vec![
        Span::styled(format!("{} ", marker), Style::default().fg(color)),
        Span::styled(
            format!("{:<8} ", entry.status.as_str()),
            Style::default().fg(color),
        ),
        Span::raw(format!("{}  {}  ", entry.timestamp, entry.recipient)),
        Span::styled(
            truncate(&entry.message, 60),
            Style::default().fg(Color::Gray),
        ),
    ];
    if let Some(err) = entry.error.as_deref() {
        spans.push(Span::styled(
            format!("  [{}]", err),
            Style::default().fg(Color::Red),
        ));
    }
    Line::from(spans)
}

fn truncate(text: &str, max: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= max {
        flat
    } else {
        let mut out: String = flat.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}
