//! Error types for fingerprint checks.
//!
//! Every failure a single check attempt can run into is a [`CheckError`].
//! The comparator folds all of them except [`CheckError::Notification`] into
//! its retry loop.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use strum_macros::{Display, EnumString};

/// Error raised while fetching, comparing or reporting a fingerprint.
#[derive(Debug)]
pub enum CheckError {
    /// The monitored hostname did not resolve
    DnsResolution {
        /// The hostname that failed to resolve
        hostname: String,
        /// The underlying resolver error
        source: io::Error,
    },

    /// The reference fingerprint could not be retrieved
    ReferenceFetch {
        /// The reference URL
        url: String,
        /// Why the fetch failed
        reason: String,
    },

    /// A network operation ran past its deadline
    Timeout {
        /// Description of which operation timed out
        operation: String,
    },

    /// The handshake completed but the peer sent no certificate
    NoCertificate {
        /// The host that was checked
        hostname: String,
    },

    /// Transport-level failure: refused, reset, TLS protocol error
    Connection {
        /// The address (host:port) involved
        address: String,
        /// Details of the underlying cause
        details: String,
    },

    /// The alert email could not be delivered
    Notification {
        /// Description of the failure
        reason: String,
    },
}

/// Serializable classification of a [`CheckError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DnsResolution,
    ReferenceFetch,
    Timeout,
    NoCertificate,
    Connection,
    Notification,
}

impl CheckError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DnsResolution { .. } => ErrorKind::DnsResolution,
            Self::ReferenceFetch { .. } => ErrorKind::ReferenceFetch,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::NoCertificate { .. } => ErrorKind::NoCertificate,
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Notification { .. } => ErrorKind::Notification,
        }
    }

    pub(crate) fn reference(url: &str, reason: impl Into<String>) -> Self {
        Self::ReferenceFetch {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn connection(address: &str, details: impl fmt::Display) -> Self {
        Self::Connection {
            address: address.to_string(),
            details: details.to_string(),
        }
    }
}

impl fmt::Display for CheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DnsResolution { hostname, source } => {
                write!(f, "Failed to resolve hostname {}: {}", hostname, source)
            }
            Self::ReferenceFetch { url, reason } => {
                write!(f, "Could not fetch reference fingerprint from {}: {}", url, reason)
            }
            Self::Timeout { operation } => {
                write!(f, "Operation timed out: {}", operation)
            }
            Self::NoCertificate { hostname } => {
                write!(f, "No peer certificate presented by {}", hostname)
            }
            Self::Connection { address, details } => {
                write!(f, "Connection to {} failed: {}", address, details)
            }
            Self::Notification { reason } => {
                write!(f, "Notification failed: {}", reason)
            }
        }
    }
}

impl std::error::Error for CheckError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::DnsResolution { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<openssl::error::ErrorStack> for CheckError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        Self::Connection {
            address: "tls context".to_string(),
            details: e.to_string(),
        }
    }
}

impl From<lettre::error::Error> for CheckError {
    fn from(e: lettre::error::Error) -> Self {
        Self::Notification {
            reason: e.to_string(),
        }
    }
}

impl From<lettre::address::AddressError> for CheckError {
    fn from(e: lettre::address::AddressError) -> Self {
        Self::Notification {
            reason: format!("invalid address: {}", e),
        }
    }
}

impl From<lettre::transport::smtp::Error> for CheckError {
    fn from(e: lettre::transport::smtp::Error) -> Self {
        Self::Notification {
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CheckError::Timeout {
            operation: "TLS handshake with example.com:443".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Operation timed out: TLS handshake with example.com:443"
        );
    }

    #[test]
    fn test_error_kind() {
        let err = CheckError::reference("http://ref.local/fp", "empty body");
        assert_eq!(err.kind(), ErrorKind::ReferenceFetch);
        assert_eq!(err.kind().to_string(), "reference_fetch");

        let err = CheckError::DnsResolution {
            hostname: "nope.invalid".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such host"),
        };
        assert_eq!(err.kind(), ErrorKind::DnsResolution);
        assert!(std::error::Error::source(&err).is_some());
    }
}
