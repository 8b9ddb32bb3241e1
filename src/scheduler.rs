//! Runs the comparator on its cron schedule.
//!
//! A single worker: each invocation, retries and retry delays included, runs
//! to completion on the calling thread before the next tick is computed. Ticks
//! that pass while an invocation is still busy are skipped, not queued.

use crate::comparator::{CheckReport, Comparator, RetryState};
use crate::schedule::Schedule;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Longest uninterrupted sleep, so a stop request is noticed promptly.
const SLEEP_SLICE: Duration = Duration::from_secs(1);

pub struct Scheduler {
    schedule: Schedule,
    comparator: Comparator,
    running: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(schedule: Schedule, comparator: Comparator) -> Scheduler {
        Scheduler {
            schedule,
            comparator,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Flag that stops the loop once cleared; shareable with other threads.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&self) {
        tracing::info!("Stopping fingerprint scheduler...");
        self.running.store(false, Ordering::SeqCst);
    }

    /// One invocation, always starting from a fresh [`RetryState`].
    pub fn run_tick(&self) -> CheckReport {
        tracing::info!(
            "Running fingerprint check for {} ({})",
            self.comparator.target().address(),
            self.schedule
        );
        let (report, state) = self.comparator.run(RetryState::new());
        tracing::debug!(
            "Invocation ended {} after {} retries",
            report.outcome,
            state.count()
        );
        report
    }

    /// Loops until stopped, handing every report to `on_report`.
    ///
    /// With `run_now` an invocation runs immediately instead of waiting for
    /// the first tick.
    pub fn run<F>(&self, run_now: bool, mut on_report: F)
    where
        F: FnMut(&CheckReport),
    {
        tracing::info!(
            "Scheduling fingerprint checks of {} with '{}'",
            self.comparator.target().address(),
            self.schedule
        );

        if run_now && self.is_running() {
            let report = self.run_tick();
            on_report(&report);
        }

        while self.is_running() {
            let next = match self.schedule.next_after(Utc::now()) {
                Some(next) => next,
                None => {
                    tracing::warn!("Schedule '{}' never fires again", self.schedule);
                    break;
                }
            };
            tracing::info!("Next fingerprint check at {}", next);

            if !self.sleep_until(next) {
                break;
            }

            let report = self.run_tick();
            let skipped = missed_ticks(&self.schedule, next, Utc::now());
            if skipped > 0 {
                tracing::warn!(
                    "Skipped {} tick(s) while the previous check was running",
                    skipped
                );
            }
            on_report(&report);
        }

        tracing::info!("Fingerprint scheduler stopped");
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns false when interrupted by a stop request.
    fn sleep_until(&self, when: DateTime<Utc>) -> bool {
        while self.is_running() {
            let remaining = match (when - Utc::now()).to_std() {
                Ok(remaining) if !remaining.is_zero() => remaining,
                _ => return true,
            };
            thread::sleep(remaining.min(SLEEP_SLICE));
        }
        false
    }
}

/// Ticks strictly after `fired` and up to `until`.
fn missed_ticks(schedule: &Schedule, fired: DateTime<Utc>, until: DateTime<Utc>) -> u32 {
    let mut count = 0;
    let mut t = fired;
    while let Some(next) = schedule.next_after(t) {
        if next > until {
            break;
        }
        count += 1;
        t = next;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::fakes::Harness;
    use crate::comparator::Outcome;
    use chrono::TimeZone;

    #[test]
    fn test_each_tick_starts_with_fresh_retry_state() {
        let h = Harness::new(vec![Ok(())], vec![Some("AA:BB")], vec![None]);
        let scheduler = Scheduler::new("* * * * *".parse().unwrap(), h.comparator());

        for _ in 0..2 {
            let report = scheduler.run_tick();
            assert_eq!(report.outcome, Outcome::Failed);
            assert_eq!(report.attempts.len(), 4);
            assert_eq!(report.attempts[0].retry, 0);
            assert!(report.attempts.iter().all(|a| a.retry <= 3));
        }
        assert_eq!(h.live.calls(), 8);
    }

    #[test]
    fn test_run_now_then_stop() {
        let h = Harness::new(vec![Ok(())], vec![Some("AA:BB")], vec![Some("aa bb")]);
        let scheduler = Scheduler::new("*/45 * * * *".parse().unwrap(), h.comparator());
        let stop = scheduler.stop_handle();

        let mut outcomes = Vec::new();
        scheduler.run(true, |report| {
            outcomes.push(report.outcome);
            stop.store(false, Ordering::SeqCst);
        });

        assert_eq!(outcomes, vec![Outcome::Matched]);
    }

    #[test]
    fn test_stopped_scheduler_does_not_run() {
        let h = Harness::new(vec![Ok(())], vec![Some("AA")], vec![Some("AA")]);
        let scheduler = Scheduler::new("* * * * *".parse().unwrap(), h.comparator());
        scheduler.stop();

        let mut calls = 0;
        scheduler.run(true, |_| calls += 1);

        assert_eq!(calls, 0);
        assert_eq!(h.reference.calls(), 0);
    }

    #[test]
    fn test_missed_ticks() {
        let schedule: Schedule = "*/45 * * * *".parse().unwrap();
        let fired = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();

        let quick = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 40).unwrap();
        assert_eq!(missed_ticks(&schedule, fired, quick), 0);

        // a two hour run passes 10:45, 11:00, 11:45 and 12:00
        let slow = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(missed_ticks(&schedule, fired, slow), 4);
    }
}
