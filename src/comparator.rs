//! One invocation of the fingerprint check, retries included.
//!
//! ```text
//! Idle -> Fetching -> Comparing -> Matched
//!            |                  \-> Mismatched (notifier invoked once)
//!            \-> Failed -> (retry: full re-run of both fetches) | give up
//! ```
//!
//! Retry bookkeeping lives in a [`RetryState`] value that the caller passes in
//! and gets back, so the comparator keeps no state between invocations.

use crate::error::{CheckError, ErrorKind};
use crate::{Fingerprint, MonitorTarget};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::thread;
use std::time::Duration;
use strum_macros::Display;

/// Resolves the monitored hostname before any handshake is attempted.
pub trait Prober: Send {
    fn probe(&self, hostname: &str, port: u16) -> Result<Vec<SocketAddr>, CheckError>;
}

/// Source of truth for the expected fingerprint.
pub trait ReferenceSource: Send {
    fn fetch(&self, target: &MonitorTarget) -> Result<Fingerprint, CheckError>;
}

/// Fingerprints the certificate the target presents right now.
pub trait LiveSource: Send {
    fn fetch(&self, target: &MonitorTarget, addrs: &[SocketAddr])
        -> Result<Fingerprint, CheckError>;
}

/// Delivers the mismatch alert.
pub trait Notifier: Send {
    fn notify(&self, alert: &MismatchAlert) -> Result<(), CheckError>;
}

/// What the notifier is told about a mismatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MismatchAlert {
    pub target: MonitorTarget,
    pub expected: Fingerprint,
    pub actual: Fingerprint,
    pub detected_at: DateTime<Utc>,
}

/// Retry bounds for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            delay: Duration::from_secs(5),
        }
    }
}

/// Number of retries spent in the current invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    count: u32,
}

impl RetryState {
    /// Fresh state, as handed out at the start of every scheduled invocation.
    pub fn new() -> RetryState {
        RetryState { count: 0 }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Consumes one retry, or `None` once `max_retries` are used up.
    pub fn advance(self, max_retries: u32) -> Option<RetryState> {
        if self.count < max_retries {
            Some(RetryState {
                count: self.count + 1,
            })
        } else {
            None
        }
    }
}

/// Result of a single pass through the fetch and compare steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptResult {
    Match {
        fingerprint: Fingerprint,
    },
    Mismatch {
        expected: Fingerprint,
        actual: Fingerprint,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckAttempt {
    /// 0 for the first pass, then 1..=max_retries
    pub retry: u32,
    pub timestamp: DateTime<Utc>,
    pub result: AttemptResult,
}

/// Terminal state of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Matched,
    Mismatched,
    Failed,
}

/// Everything that happened during one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckReport {
    pub target: MonitorTarget,
    pub outcome: Outcome,
    pub attempts: Vec<CheckAttempt>,
    /// `Some(true)` when an alert went out, `Some(false)` when sending failed
    pub notified: Option<bool>,
}

impl CheckReport {
    pub fn last_attempt(&self) -> Option<&CheckAttempt> {
        self.attempts.last()
    }
}

pub struct Comparator {
    target: MonitorTarget,
    prober: Box<dyn Prober>,
    reference: Box<dyn ReferenceSource>,
    live: Box<dyn LiveSource>,
    notifier: Box<dyn Notifier>,
    policy: RetryPolicy,
}

impl Comparator {
    pub fn new(
        target: MonitorTarget,
        prober: Box<dyn Prober>,
        reference: Box<dyn ReferenceSource>,
        live: Box<dyn LiveSource>,
        notifier: Box<dyn Notifier>,
        policy: RetryPolicy,
    ) -> Comparator {
        Comparator {
            target,
            prober,
            reference,
            live,
            notifier,
            policy,
        }
    }

    pub fn target(&self) -> &MonitorTarget {
        &self.target
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Runs one invocation to completion, sleeping between retries.
    ///
    /// Returns the report and the retry state as it stood when the
    /// invocation ended.
    pub fn run(&self, mut state: RetryState) -> (CheckReport, RetryState) {
        let mut attempts = Vec::new();

        loop {
            let timestamp = Utc::now();
            match self.fetch_both() {
                Ok((expected, actual)) => {
                    tracing::info!("Reference fingerprint: {}", expected);
                    tracing::info!("Live fingerprint: {}", actual);

                    if expected == actual {
                        tracing::info!("Fingerprints match for {}", self.target.address());
                        attempts.push(CheckAttempt {
                            retry: state.count(),
                            timestamp,
                            result: AttemptResult::Match {
                                fingerprint: actual,
                            },
                        });
                        return (self.report(Outcome::Matched, attempts, None), state);
                    }

                    tracing::warn!(
                        "Fingerprints do not match for {}: expected {}, got {}",
                        self.target.address(),
                        expected,
                        actual
                    );
                    let alert = MismatchAlert {
                        target: self.target.clone(),
                        expected: expected.clone(),
                        actual: actual.clone(),
                        detected_at: timestamp,
                    };
                    attempts.push(CheckAttempt {
                        retry: state.count(),
                        timestamp,
                        result: AttemptResult::Mismatch { expected, actual },
                    });
                    let notified = match self.notifier.notify(&alert) {
                        Ok(()) => true,
                        Err(e) => {
                            tracing::error!("{}", e);
                            false
                        }
                    };
                    return (
                        self.report(Outcome::Mismatched, attempts, Some(notified)),
                        state,
                    );
                }
                Err(e) => {
                    tracing::error!("Error comparing fingerprints: {}", e);
                    attempts.push(CheckAttempt {
                        retry: state.count(),
                        timestamp,
                        result: AttemptResult::Error {
                            kind: e.kind(),
                            message: e.to_string(),
                        },
                    });

                    match state.advance(self.policy.max_retries) {
                        Some(next) => {
                            state = next;
                            tracing::info!(
                                "Retrying... ({}/{})",
                                state.count(),
                                self.policy.max_retries
                            );
                            thread::sleep(self.policy.delay);
                        }
                        None => {
                            tracing::warn!("Max retry limit reached. Aborting.");
                            return (self.report(Outcome::Failed, attempts, None), state);
                        }
                    }
                }
            }
        }
    }

    /// Both fingerprints for one comparison window. The probe gates the live
    /// handshake: if it fails the handshake is never attempted.
    fn fetch_both(&self) -> Result<(Fingerprint, Fingerprint), CheckError> {
        let expected = self.reference.fetch(&self.target)?;
        let addrs = self.prober.probe(&self.target.hostname, self.target.port)?;
        let actual = self.live.fetch(&self.target, &addrs)?;
        Ok((expected, actual))
    }

    fn report(
        &self,
        outcome: Outcome,
        attempts: Vec<CheckAttempt>,
        notified: Option<bool>,
    ) -> CheckReport {
        CheckReport {
            target: self.target.clone(),
            outcome,
            attempts,
            notified,
        }
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex};

    /// Scripted responses; the last one repeats once the script runs out.
    #[derive(Clone)]
    pub struct Script<T: Clone> {
        steps: Arc<Mutex<VecDeque<T>>>,
        last: Arc<Mutex<Option<T>>>,
        pub calls: Arc<Mutex<u32>>,
    }

    impl<T: Clone> Script<T> {
        pub fn new(steps: Vec<T>) -> Script<T> {
            Script {
                steps: Arc::new(Mutex::new(steps.into())),
                last: Arc::new(Mutex::new(None)),
                calls: Arc::new(Mutex::new(0)),
            }
        }

        fn step(&self) -> T {
            *self.calls.lock().unwrap() += 1;
            let mut last = self.last.lock().unwrap();
            if let Some(next) = self.steps.lock().unwrap().pop_front() {
                *last = Some(next);
            }
            last.clone().expect("script has no steps")
        }

        pub fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    /// `Ok(())` resolves, `Err(())` fails with a DNS error.
    pub struct FakeProber(pub Script<Result<(), ()>>);

    impl Prober for FakeProber {
        fn probe(&self, hostname: &str, port: u16) -> Result<Vec<SocketAddr>, CheckError> {
            match self.0.step() {
                Ok(()) => Ok(vec![SocketAddr::from(([127, 0, 0, 1], port))]),
                Err(()) => Err(CheckError::DnsResolution {
                    hostname: hostname.to_string(),
                    source: io::Error::new(io::ErrorKind::NotFound, "no such host"),
                }),
            }
        }
    }

    /// `Some(text)` answers with that fingerprint, `None` fails.
    pub struct FakeReference(pub Script<Option<&'static str>>);

    impl ReferenceSource for FakeReference {
        fn fetch(&self, target: &MonitorTarget) -> Result<Fingerprint, CheckError> {
            self.0
                .step()
                .and_then(Fingerprint::parse)
                .ok_or_else(|| CheckError::reference(target.reference_url.as_str(), "empty body"))
        }
    }

    /// `Some(text)` answers with that fingerprint, `None` times out.
    pub struct FakeLive(pub Script<Option<&'static str>>);

    impl LiveSource for FakeLive {
        fn fetch(
            &self,
            target: &MonitorTarget,
            _addrs: &[SocketAddr],
        ) -> Result<Fingerprint, CheckError> {
            self.0
                .step()
                .and_then(Fingerprint::parse)
                .ok_or_else(|| CheckError::Timeout {
                    operation: format!("TLS handshake with {}", target.address()),
                })
        }
    }

    #[derive(Clone, Default)]
    pub struct FakeNotifier {
        pub fail: bool,
        pub sent: Arc<Mutex<Vec<MismatchAlert>>>,
    }

    impl Notifier for FakeNotifier {
        fn notify(&self, alert: &MismatchAlert) -> Result<(), CheckError> {
            self.sent.lock().unwrap().push(alert.clone());
            if self.fail {
                Err(CheckError::Notification {
                    reason: "authentication failed".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    pub struct Harness {
        pub prober: Script<Result<(), ()>>,
        pub reference: Script<Option<&'static str>>,
        pub live: Script<Option<&'static str>>,
        pub notifier: FakeNotifier,
    }

    impl Harness {
        pub fn new(
            prober: Vec<Result<(), ()>>,
            reference: Vec<Option<&'static str>>,
            live: Vec<Option<&'static str>>,
        ) -> Harness {
            Harness {
                prober: Script::new(prober),
                reference: Script::new(reference),
                live: Script::new(live),
                notifier: FakeNotifier::default(),
            }
        }

        pub fn comparator(&self) -> Comparator {
            Comparator::new(
                MonitorTarget::new(
                    "example.firebaseio.com",
                    443,
                    url::Url::parse("http://reference.local/fingerprint").unwrap(),
                ),
                Box::new(FakeProber(self.prober.clone())),
                Box::new(FakeReference(self.reference.clone())),
                Box::new(FakeLive(self.live.clone())),
                Box::new(self.notifier.clone()),
                RetryPolicy {
                    max_retries: 3,
                    delay: Duration::ZERO,
                },
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::Harness;
    use super::*;

    #[test]
    fn test_retry_state_is_bounded() {
        let mut state = RetryState::new();
        assert_eq!(state.count(), 0);
        for expected in 1..=3 {
            state = state.advance(3).unwrap();
            assert_eq!(state.count(), expected);
        }
        assert_eq!(state.advance(3), None);
        assert_eq!(RetryState::new().advance(0), None);
    }

    #[test]
    fn test_match_normalizes_reference() {
        let h = Harness::new(vec![Ok(())], vec![Some("AB CD EF")], vec![Some("ab:cd:ef")]);
        let (report, state) = h.comparator().run(RetryState::new());

        assert_eq!(report.outcome, Outcome::Matched);
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(state.count(), 0);
        assert_eq!(report.notified, None);
        assert!(h.notifier.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_mismatch_notifies_once() {
        let h = Harness::new(vec![Ok(())], vec![Some("11:22:33")], vec![Some("44:55:66")]);
        let (report, _) = h.comparator().run(RetryState::new());

        assert_eq!(report.outcome, Outcome::Mismatched);
        assert_eq!(report.notified, Some(true));
        let sent = h.notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].expected.as_str(), "11:22:33");
        assert_eq!(sent[0].actual.as_str(), "44:55:66");
    }

    #[test]
    fn test_notification_failure_keeps_mismatched() {
        let mut h = Harness::new(vec![Ok(())], vec![Some("11:22:33")], vec![Some("44:55:66")]);
        h.notifier.fail = true;
        let (report, state) = h.comparator().run(RetryState::new());

        assert_eq!(report.outcome, Outcome::Mismatched);
        assert_eq!(report.notified, Some(false));
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(state.count(), 0);
        assert_eq!(h.live.calls(), 1);
    }

    #[test]
    fn test_dns_failure_skips_live_fetch() {
        let h = Harness::new(vec![Err(())], vec![Some("AA:BB")], vec![Some("AA:BB")]);
        let (report, state) = h.comparator().run(RetryState::new());

        assert_eq!(report.outcome, Outcome::Failed);
        assert_eq!(h.live.calls(), 0);
        assert_eq!(state.count(), 3);
        for attempt in &report.attempts {
            match &attempt.result {
                AttemptResult::Error { kind, .. } => assert_eq!(*kind, ErrorKind::DnsResolution),
                other => panic!("expected DNS error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_two_failures_then_success() {
        let h = Harness::new(
            vec![Ok(())],
            vec![Some("AA:BB")],
            vec![None, None, Some("aa:bb")],
        );
        let (report, state) = h.comparator().run(RetryState::new());

        assert_eq!(report.outcome, Outcome::Matched);
        assert_eq!(report.attempts.len(), 3);
        assert_eq!(state.count(), 2);
        let retries: Vec<u32> = report.attempts.iter().map(|a| a.retry).collect();
        assert_eq!(retries, vec![0, 1, 2]);
        // every retry re-runs both fetches
        assert_eq!(h.reference.calls(), 3);
        assert_eq!(h.prober.calls(), 3);
    }

    #[test]
    fn test_two_failures_then_mismatch_notifies_at_most_once() {
        let h = Harness::new(
            vec![Ok(())],
            vec![None, None, Some("11:22:33")],
            vec![Some("44:55:66")],
        );
        let (report, _) = h.comparator().run(RetryState::new());

        assert_eq!(report.outcome, Outcome::Mismatched);
        assert_eq!(h.notifier.sent.lock().unwrap().len(), 1);
        // reference failures never reach the probe or the handshake
        assert_eq!(h.prober.calls(), 1);
        assert_eq!(h.live.calls(), 1);
    }

    #[test]
    fn test_max_retries_ends_failed_without_notifying() {
        let h = Harness::new(vec![Ok(())], vec![Some("AA:BB")], vec![None]);
        let (report, state) = h.comparator().run(RetryState::new());

        assert_eq!(report.outcome, Outcome::Failed);
        assert_eq!(report.attempts.len(), 4);
        assert_eq!(state.count(), 3);
        assert!(report.attempts.iter().all(|a| a.retry <= 3));
        assert!(h.notifier.sent.lock().unwrap().is_empty());
        match &report.last_attempt().unwrap().result {
            AttemptResult::Error { kind, .. } => assert_eq!(*kind, ErrorKind::Timeout),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_exhausted_state_does_not_retry() {
        let h = Harness::new(vec![Ok(())], vec![None], vec![Some("AA")]);
        let exhausted = RetryState::new().advance(3).unwrap().advance(3).unwrap().advance(3).unwrap();
        let (report, state) = h.comparator().run(exhausted);

        assert_eq!(report.outcome, Outcome::Failed);
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(state.count(), 3);
    }
}
