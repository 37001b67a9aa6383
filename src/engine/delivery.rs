//! Delivery backends.
//!
//! The engine talks to delivery through a trait so the simulated gateway and
//! any real carrier integration stay interchangeable.

use rand::Rng;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed { reason: String },
}

/// One send attempt against whatever transports the messages.
pub trait DeliveryBackend: Send {
    fn attempt_send(&mut self, recipient: &str, message: &str) -> DeliveryOutcome;
}

/// Simulated SIM gateway: an unweighted random draw against a fixed success
/// probability. "Failed" here is a synthetic terminal status, not an I/O error.
pub struct SimulatedGateway {
    success_rate: f64,
}

impl SimulatedGateway {
    pub fn new(success_rate: f64) -> Self {
        Self {
            success_rate: success_rate.clamp(0.0, 1.0),
        }
    }
}

impl DeliveryBackend for SimulatedGateway {
    fn attempt_send(&mut self, _recipient: &str, _message: &str) -> DeliveryOutcome {
        if rand::thread_rng().gen::<f64>() < self.success_rate {
            DeliveryOutcome::Delivered
        } else {
            DeliveryOutcome::Failed {
                reason: "SIM gateway failure".to_string(),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Deterministic backend for engine tests: pops outcomes front-to-back and
    /// records every recipient it was asked to send to.
    pub struct ScriptedBackend {
        outcomes: Vec<DeliveryOutcome>,
        pub recipients: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
    }

    impl ScriptedBackend {
        pub fn new(outcomes: Vec<DeliveryOutcome>) -> Self {
            Self {
                outcomes,
                recipients: Default::default(),
            }
        }

        pub fn always(outcome: DeliveryOutcome, n: usize) -> Self {
            Self::new(vec![outcome; n])
        }
    }

    impl DeliveryBackend for ScriptedBackend {
        fn attempt_send(&mut self, recipient: &str, _message: &str) -> DeliveryOutcome {
            self.recipients
                .lock()
                .expect("recipients lock")
                .push(recipient.to_string());
            if self.outcomes.is_empty() {
                DeliveryOutcome::Delivered
            } else {
                self.outcomes.remove(0)
            }
        }
    }
}
