//! Certificate fingerprint watch.
//!
//! Checks on a schedule that the certificate a TLS endpoint presents has the
//! fingerprint published by a reference source, and sends an alert email when
//! the two disagree.

pub mod comparator;
pub mod config;
pub mod error;
pub mod live;
pub mod notifier;
pub mod output;
pub mod probe;
pub mod reference;
pub mod schedule;
pub mod scheduler;

use openssl::hash::MessageDigest;
use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::{Display, EnumString};
use url::Url;

pub use comparator::{CheckAttempt, CheckReport, Comparator, Outcome, RetryPolicy, RetryState};
pub use error::{CheckError, ErrorKind};

/// Port the monitored endpoint is contacted on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 443;

/// Canonical certificate fingerprint.
///
/// Held as uppercase hex octets separated by `:`. Two fingerprints are equal
/// iff their canonical forms are equal, so `"aa bb cc"` and `"AA:BB:CC"` match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Normalizes a textual fingerprint.
    ///
    /// Surrounding whitespace is trimmed, internal whitespace runs become `:`
    /// and letters are uppercased. Returns `None` when nothing is left.
    pub fn parse(raw: &str) -> Option<Fingerprint> {
        let canonical = raw
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(":")
            .to_ascii_uppercase();
        if canonical.is_empty() {
            None
        } else {
            Some(Fingerprint(canonical))
        }
    }

    /// Renders raw digest bytes as `AB:CD:...`.
    pub fn from_digest(bytes: &[u8]) -> Fingerprint {
        let octets: Vec<String> = bytes.iter().map(|b| format!("{:02X}", b)).collect();
        Fingerprint(octets.join(":"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hash used to fingerprint the peer certificate.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Sha1,
    Sha256,
}

impl DigestAlgorithm {
    pub fn message_digest(self) -> MessageDigest {
        match self {
            DigestAlgorithm::Sha1 => MessageDigest::sha1(),
            DigestAlgorithm::Sha256 => MessageDigest::sha256(),
        }
    }
}

/// The endpoint under observation and where its expected fingerprint lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorTarget {
    pub hostname: String,
    pub port: u16,
    pub reference_url: Url,
}

impl MonitorTarget {
    pub fn new(hostname: &str, port: u16, reference_url: Url) -> MonitorTarget {
        MonitorTarget {
            hostname: hostname.to_string(),
            port,
            reference_url,
        }
    }

    /// `host:port` form used for connecting and in log lines.
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}
