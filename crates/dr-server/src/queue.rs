//! The external queue-submission shell (spec.md §4.8, §6: "an external
//! `drsub` shell is invoked verbatim when `SUBMITJOBS` is active").
//! Guarded by the *queue lock* (spec.md §5), third in the fixed
//! acquisition order.

use std::process::Command;

use dr_types::MAX_FAILURES_FOR_SUBMISSION;

/// `N_reserved_queue_slots` plus the consecutive-failure counter that
/// trips `SubmitError`'s disable-after-threshold policy (spec.md §7).
#[derive(Debug, Default)]
pub struct QueueState {
    pub reserved_slots: u32,
    consecutive_failures: u32,
    disabled: bool,
}

impl QueueState {
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Invokes `drsub` for one more queued job. A spawn or non-zero exit
    /// is a `SubmitError`: it's counted, and submission is disabled once
    /// `MAX_FAILURES_FOR_SUBMISSION` consecutive failures accumulate
    /// (spec.md §7) — the caller is expected to log the returned error
    /// and move on, never to treat it as session- or process-fatal.
    pub fn submit(&mut self, title: &str) -> Result<(), String> {
        if self.disabled {
            return Err("queue submission disabled after too many consecutive failures".to_string());
        }
        match Command::new("drsub").arg(title).status() {
            Ok(status) if status.success() => {
                self.consecutive_failures = 0;
                self.reserved_slots += 1;
                Ok(())
            }
            Ok(status) => {
                self.record_failure();
                Err(format!("drsub exited with {status}"))
            }
            Err(err) => {
                self.record_failure();
                Err(format!("failed to spawn drsub: {err}"))
            }
        }
    }

    fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= MAX_FAILURES_FOR_SUBMISSION {
            self.disabled = true;
        }
    }

    pub fn release_slot(&mut self) {
        self.reserved_slots = self.reserved_slots.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disables_after_max_consecutive_failures() {
        let mut queue = QueueState::default();
        for _ in 0..MAX_FAILURES_FOR_SUBMISSION {
            queue.record_failure();
        }
        assert!(queue.is_disabled());
    }

    #[test]
    fn a_success_resets_the_failure_count() {
        let mut queue = QueueState::default();
        queue.record_failure();
        queue.record_failure();
        queue.consecutive_failures = 0;
        queue.reserved_slots += 1;
        assert!(!queue.is_disabled());
    }
}
