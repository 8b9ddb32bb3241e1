//! Integration tests for the public API

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fingerwatch::comparator::{
    AttemptResult, LiveSource, MismatchAlert, Notifier, Prober, ReferenceSource,
};
use fingerwatch::notifier::DEFAULT_SUBJECT;
use fingerwatch::{
    CheckError, Comparator, ErrorKind, Fingerprint, MonitorTarget, Outcome, RetryPolicy,
    RetryState,
};
use url::Url;

struct StaticProber;

impl Prober for StaticProber {
    fn probe(&self, _hostname: &str, port: u16) -> Result<Vec<SocketAddr>, CheckError> {
        Ok(vec![SocketAddr::from(([127, 0, 0, 1], port))])
    }
}

struct StaticReference(&'static str);

impl ReferenceSource for StaticReference {
    fn fetch(&self, target: &MonitorTarget) -> Result<Fingerprint, CheckError> {
        Fingerprint::parse(self.0).ok_or_else(|| CheckError::ReferenceFetch {
            url: target.reference_url.to_string(),
            reason: "empty body".to_string(),
        })
    }
}

/// Fails with a timeout for the first `failures` calls.
struct FlakyLive {
    fingerprint: &'static str,
    failures: Arc<Mutex<u32>>,
}

impl LiveSource for FlakyLive {
    fn fetch(
        &self,
        target: &MonitorTarget,
        _addrs: &[SocketAddr],
    ) -> Result<Fingerprint, CheckError> {
        let mut failures = self.failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(CheckError::Timeout {
                operation: format!("TLS handshake with {}", target.address()),
            });
        }
        Ok(Fingerprint::parse(self.fingerprint).unwrap())
    }
}

#[derive(Clone, Default)]
struct RecordingNotifier {
    subjects: Arc<Mutex<Vec<String>>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, alert: &MismatchAlert) -> Result<(), CheckError> {
        assert_ne!(alert.expected, alert.actual);
        self.subjects.lock().unwrap().push(DEFAULT_SUBJECT.to_string());
        Ok(())
    }
}

fn comparator(
    reference: &'static str,
    live: &'static str,
    failures: u32,
    notifier: RecordingNotifier,
) -> Comparator {
    Comparator::new(
        MonitorTarget::new(
            "example.firebaseio.com",
            443,
            Url::parse("http://fingerprints.example.com/fp").unwrap(),
        ),
        Box::new(StaticProber),
        Box::new(StaticReference(reference)),
        Box::new(FlakyLive {
            fingerprint: live,
            failures: Arc::new(Mutex::new(failures)),
        }),
        Box::new(notifier),
        RetryPolicy {
            max_retries: 3,
            delay: Duration::ZERO,
        },
    )
}

#[test]
fn test_reference_with_spaces_matches_lowercase_live() {
    let notifier = RecordingNotifier::default();
    let (report, _) = comparator("AB CD EF", "ab:cd:ef", 0, notifier.clone()).run(RetryState::new());

    assert_eq!(report.outcome, Outcome::Matched);
    assert!(notifier.subjects.lock().unwrap().is_empty());
}

#[test]
fn test_mismatch_sends_alert_with_subject() {
    let notifier = RecordingNotifier::default();
    let (report, _) = comparator("11:22:33", "44:55:66", 0, notifier.clone()).run(RetryState::new());

    assert_eq!(report.outcome, Outcome::Mismatched);
    assert_eq!(
        *notifier.subjects.lock().unwrap(),
        vec!["SSL Fingerprint is changed, please check it ... !!".to_string()]
    );
}

#[test]
fn test_timeouts_are_retried() {
    let notifier = RecordingNotifier::default();
    let (report, state) = comparator("AA:BB", "aa:bb", 2, notifier).run(RetryState::new());

    assert_eq!(report.outcome, Outcome::Matched);
    assert_eq!(state.count(), 2);
    assert!(matches!(
        report.attempts[0].result,
        AttemptResult::Error {
            kind: ErrorKind::Timeout,
            ..
        }
    ));
}

#[test]
fn test_gives_up_after_max_retries() {
    let notifier = RecordingNotifier::default();
    let (report, state) = comparator("AA:BB", "aa:bb", 10, notifier.clone()).run(RetryState::new());

    assert_eq!(report.outcome, Outcome::Failed);
    assert_eq!(report.attempts.len(), 4);
    assert_eq!(state.count(), 3);
    assert!(notifier.subjects.lock().unwrap().is_empty());
}

#[test]
fn test_error_display() {
    let err = CheckError::NoCertificate {
        hostname: "example.com".to_string(),
    };

    let display = format!("{}", err);
    assert!(display.contains("example.com"));
    assert_eq!(err.kind(), ErrorKind::NoCertificate);
}

#[test]
fn test_retry_state_advance() {
    let state = RetryState::new().advance(1).unwrap();
    assert_eq!(state.count(), 1);
    assert_eq!(state.advance(1), None);
}
