use lazy_static::lazy_static;
use prometheus::{labels, register_gauge, Gauge};

use fingerwatch::{CheckReport, Outcome};

lazy_static! {
    static ref FINGERWATCH_FINGERPRINT_MATCH: Gauge = register_gauge!(
        "fingerwatch_fingerprint_match",
        "1 when the live fingerprint matches the reference"
    )
    .unwrap();
    static ref FINGERWATCH_CHECK_ATTEMPTS: Gauge = register_gauge!(
        "fingerwatch_check_attempts",
        "attempts spent by the last invocation"
    )
    .unwrap();
    static ref FINGERWATCH_OUTCOME: Gauge =
        register_gauge!("fingerwatch_outcome", "last invocation outcome").unwrap();
}

/// 0 = matched, 1 = mismatched, 2 = failed
fn outcome_value(outcome: Outcome) -> f64 {
    match outcome {
        Outcome::Matched => 0.0,
        Outcome::Mismatched => 1.0,
        Outcome::Failed => 2.0,
    }
}

/// Function to push metrics to prometheus
/// # Arguments
/// * `report` - Result of one invocation
/// * `prometheus_address` - Push gateway address
pub fn prometheus_metrics(report: &CheckReport, prometheus_address: &str) {
    let matched = if report.outcome == Outcome::Matched { 1.0 } else { 0.0 };
    FINGERWATCH_FINGERPRINT_MATCH.set(matched);
    FINGERWATCH_CHECK_ATTEMPTS.set(report.attempts.len() as f64);
    FINGERWATCH_OUTCOME.set(outcome_value(report.outcome));

    let metric_families = prometheus::gather();
    let pushed = prometheus::push_metrics(
        "fingerwatch",
        labels! {
            "instance".to_owned() => "fingerwatch".to_owned(),
            "host".to_owned() => report.target.address(),
            "outcome".to_owned() => report.outcome.to_string(),
        },
        &format!("{}/metrics/job", prometheus_address),
        metric_families,
        None,
    );

    if let Err(e) = pushed {
        tracing::warn!("Failed to push metrics to prometheus: {}", e);
    }
}
