//! Rendering of check reports for the terminal.

use crate::comparator::{AttemptResult, CheckReport};
use comfy_table::Table;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Text,
    Json,
    Summary,
}

pub fn render(report: &CheckReport, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => render_text(report),
        OutputFormat::Json => serde_json::to_string_pretty(report)
            .unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e)),
        OutputFormat::Summary => render_summary(report),
    }
}

fn describe(result: &AttemptResult) -> String {
    match result {
        AttemptResult::Match { fingerprint } => format!("match {}", fingerprint),
        AttemptResult::Mismatch { expected, actual } => {
            format!("mismatch: expected {}, got {}", expected, actual)
        }
        AttemptResult::Error { kind, message } => format!("{}: {}", kind, message),
    }
}

fn notified_label(report: &CheckReport) -> &'static str {
    match report.notified {
        Some(true) => "sent",
        Some(false) => "failed",
        None => "-",
    }
}

fn render_text(report: &CheckReport) -> String {
    let mut out = String::new();
    out.push_str("--------------------------------------\n");
    out.push_str(&format!("Host: {}\n", report.target.address()));
    out.push_str(&format!("Reference: {}\n", report.target.reference_url));
    out.push_str(&format!("Outcome: {}\n", report.outcome));
    out.push_str(&format!("Notification: {}\n", notified_label(report)));
    out.push_str("Attempts:\n");
    for attempt in &report.attempts {
        out.push_str(&format!(
            "\t#{} {} {}\n",
            attempt.retry,
            attempt.timestamp.format("%Y-%m-%d %H:%M:%S"),
            describe(&attempt.result)
        ));
    }
    out
}

fn render_summary(report: &CheckReport) -> String {
    let mut table = Table::new();
    table.set_header(vec!["Host", "Attempt", "Time (UTC)", "Result"]);
    for attempt in &report.attempts {
        table.add_row(vec![
            report.target.address(),
            attempt.retry.to_string(),
            attempt.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            describe(&attempt.result),
        ]);
    }
    format!(
        "{}\nOutcome: {} (notification: {})",
        table,
        report.outcome,
        notified_label(report)
    )
}
