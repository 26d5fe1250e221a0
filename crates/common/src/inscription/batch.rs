use std::time::Duration;

use super::builder::InscriptionError;
use super::payload::Inscription;
use super::receipt::InscriptionReceipt;

/// How long to wait between batch items
///
/// Injected into [`InscriptionBuilder::mint_batch`](super::InscriptionBuilder::mint_batch)
/// so callers pick their rate limit and tests can run without wall-clock delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulePolicy {
    Immediate,
    FixedDelay(Duration),
    /// `base` between successes, doubled for each consecutive failure up to `max`
    Backoff { base: Duration, max: Duration },
}

impl SchedulePolicy {
    /// Pause before item `index`. The first item never waits.
    pub fn delay(&self, index: usize, consecutive_failures: u32) -> Duration {
        if index == 0 {
            return Duration::ZERO;
        }
        match *self {
            SchedulePolicy::Immediate => Duration::ZERO,
            SchedulePolicy::FixedDelay(delay) => delay,
            SchedulePolicy::Backoff { base, max } => {
                let factor = 1u32.checked_shl(consecutive_failures).unwrap_or(u32::MAX);
                base.checked_mul(factor).unwrap_or(max).min(max)
            }
        }
    }
}

#[derive(Debug)]
pub struct BatchOutcome {
    pub index: usize,
    pub inscription: Inscription,
    pub result: Result<InscriptionReceipt, InscriptionError>,
}

/// Per-item results of a batch, in submission order
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<BatchOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &InscriptionReceipt> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    /// Items to hand back to a retry
    pub fn failed(&self) -> Vec<&Inscription> {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_err())
            .map(|o| &o.inscription)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }
}
