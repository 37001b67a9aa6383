//! Campaign lifecycle controller.
//!
//! Serializes runs behind a single in-progress gate and emits events for
//! presentation layers.

use crate::engine::{CampaignEngine, EngineControl, RunPlan, SimulatedGateway};
use crate::model::{
    CampaignConfig, CampaignEvent, CampaignReport, Contact, InfoEvent, SendLogEntry,
};
use crate::optimizer::OptimizerClient;
use anyhow::Result;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// Commands emitted by UI/CLI layers to control the campaign.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    /// Start a fresh pass over the current contact list.
    Start { config: CampaignConfig },
    Pause(bool),
    Cancel,
    /// Retry a snapshot of currently failed entries.
    ResendFailed {
        config: CampaignConfig,
        entries: Vec<SendLogEntry>,
    },
    /// Ask the optimizer to rewrite the message body. Does not block the run gate.
    Optimize { message: String, context: String },
    Quit,
}

/// Internal handle for a running campaign task.
struct RunCtx {
    ctrl_tx: UnboundedSender<EngineControl>,
    handle: Option<tokio::task::JoinHandle<Result<CampaignReport>>>,
}

/// Spawn an engine run and return its control handle.
fn start_run(
    config: CampaignConfig,
    plan: RunPlan,
    event_tx: UnboundedSender<CampaignEvent>,
) -> RunCtx {
    let rate = match plan {
        RunPlan::Fresh { .. } => config.success_rate,
        RunPlan::ResendFailed { .. } => config.resend_success_rate,
    };
    let (ctrl_tx, ctrl_rx) = tokio::sync::mpsc::unbounded_channel::<EngineControl>();
    let engine = CampaignEngine::new(config, Box::new(SimulatedGateway::new(rate)));
    let handle = tokio::spawn(async move { engine.run(plan, event_tx, ctrl_rx).await });
    RunCtx {
        ctrl_tx,
        handle: Some(handle),
    }
}

/// Drive campaign runs from UI commands and emit events back to presentation
/// layers. Returns when a quit command has been observed and any active run
/// has wound down.
pub(crate) async fn run_controller(
    contacts: Vec<Contact>,
    event_tx: UnboundedSender<CampaignEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let mut run_ctx: Option<RunCtx> = None;
    let mut quit_pending = false;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UiCommand::Start { config }) => {
                        if run_ctx.is_some() {
                            let _ = event_tx.send(CampaignEvent::Info(InfoEvent::RunInProgress));
                        } else if contacts.is_empty()
                            || config.message_template.trim().is_empty()
                        {
                            let _ = event_tx.send(CampaignEvent::Info(InfoEvent::NothingToSend));
                        } else {
                            let plan = RunPlan::Fresh { contacts: contacts.clone() };
                            run_ctx = Some(start_run(config, plan, event_tx.clone()));
                        }
                    }
                    Some(UiCommand::ResendFailed { config, entries }) => {
                        if run_ctx.is_some() {
                            let _ = event_tx.send(CampaignEvent::Info(InfoEvent::RunInProgress));
                        } else if entries.is_empty() {
                            let _ = event_tx.send(CampaignEvent::Info(InfoEvent::NothingToResend));
                        } else {
                            let plan = RunPlan::ResendFailed { entries };
                            run_ctx = Some(start_run(config, plan, event_tx.clone()));
                        }
                    }
                    Some(UiCommand::Pause(p)) => {
                        if let Some(ctx) = &run_ctx {
                            let _ = ctx.ctrl_tx.send(EngineControl::Pause(p));
                        }
                    }
                    Some(UiCommand::Cancel) => {
                        if let Some(ctx) = &run_ctx {
                            let _ = ctx.ctrl_tx.send(EngineControl::Cancel);
                            let _ = event_tx.send(CampaignEvent::Info(InfoEvent::Message(
                                "Cancelling…".into(),
                            )));
                        }
                    }
                    Some(UiCommand::Optimize { message, context }) => {
                        spawn_optimize(message, context, event_tx.clone());
                    }
                    Some(UiCommand::Quit) => {
                        // Quit waits for the current run so presentation state
                        // can be finalized cleanly.
                        quit_pending = true;
                        if let Some(ctx) = &run_ctx {
                            let _ = ctx.ctrl_tx.send(EngineControl::Cancel);
                        } else {
                            break;
                        }
                    }
                    None => {
                        quit_pending = true;
                        if let Some(ctx) = &run_ctx {
                            let _ = ctx.ctrl_tx.send(EngineControl::Cancel);
                        } else {
                            break;
                        }
                    }
                }
            }
            // Do not take the JoinHandle before this branch wins; otherwise it
            // can be dropped when another branch is chosen and completion is
            // never observed.
            maybe_done = async {
                if let Some(ctx) = &mut run_ctx {
                    if let Some(h) = ctx.handle.as_mut() {
                        return Some(h.await);
                    }
                }
                futures::future::pending().await
            } => {
                if let Some(join_res) = maybe_done {
                    if let Some(ctx) = &mut run_ctx {
                        ctx.handle.take();
                    }
                    match join_res {
                        Ok(Ok(report)) => {
                            let _ = event_tx.send(CampaignEvent::RunCompleted {
                                report: Box::new(report),
                            });
                        }
                        Ok(Err(e)) => {
                            let _ = event_tx.send(CampaignEvent::Info(InfoEvent::Message(
                                format!("Campaign run failed: {e:#}"),
                            )));
                        }
                        Err(e) => {
                            let _ = event_tx.send(CampaignEvent::Info(InfoEvent::Message(
                                format!("Campaign task join failed: {e}"),
                            )));
                        }
                    }
                    run_ctx = None;
                    if quit_pending {
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

/// Fire-and-forget optimizer call. Failures are reported as info only; the
/// original message stays in place.
fn spawn_optimize(message: String, context: String, event_tx: UnboundedSender<CampaignEvent>) {
    tokio::spawn(async move {
        let Some(client) = OptimizerClient::from_env() else {
            let _ = event_tx.send(CampaignEvent::Info(InfoEvent::OptimizeFailed {
                reason: "no API key configured (set SMSBLAST_API_KEY)".into(),
            }));
            return;
        };
        match client.optimize(&message, &context).await {
            Ok(result) => {
                let _ = event_tx.send(CampaignEvent::MessageOptimized {
                    message: result.optimized_message,
                    explanation: result.explanation,
                });
            }
            Err(e) => {
                let _ = event_tx.send(CampaignEvent::Info(InfoEvent::OptimizeFailed {
                    reason: format!("{e:#}"),
                }));
            }
        }
    });
}
