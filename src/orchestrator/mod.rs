//! Application-level orchestration.
//!
//! Owns the campaign run lifecycle (start/cancel/resend gating) and emits
//! events for presentation layers. UI/CLI layers talk to this module through
//! commands instead of driving the engine directly.

mod controller;

pub(crate) use controller::{run_controller, UiCommand};
