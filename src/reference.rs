//! Fetches the expected fingerprint from the reference source.

use crate::comparator::ReferenceSource;
use crate::error::CheckError;
use crate::{Fingerprint, MonitorTarget};
use reqwest::blocking::Client;
use std::io::Read;
use std::time::Duration;

/// Largest reference body accepted; a fingerprint page is a few dozen bytes.
pub const MAX_BODY_BYTES: u64 = 4096;

/// Plain HTTP GET against the target's reference URL.
///
/// The response body is the fingerprint text. Whatever whitespace layout the
/// page uses is normalized through [`Fingerprint::parse`].
pub struct ReferenceFetcher {
    client: Client,
}

impl ReferenceFetcher {
    pub fn new(timeout: Duration) -> Result<ReferenceFetcher, CheckError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fingerwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CheckError::reference("-", format!("cannot build HTTP client: {}", e)))?;
        Ok(ReferenceFetcher { client })
    }
}

impl ReferenceSource for ReferenceFetcher {
    fn fetch(&self, target: &MonitorTarget) -> Result<Fingerprint, CheckError> {
        let url = target.reference_url.as_str();
        let mut response = self
            .client
            .get(target.reference_url.clone())
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    CheckError::reference(url, "request timed out")
                } else {
                    CheckError::reference(url, e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CheckError::reference(url, format!("HTTP status {}", status)));
        }

        let mut body = String::new();
        (&mut response)
            .take(MAX_BODY_BYTES + 1)
            .read_to_string(&mut body)
            .map_err(|e| CheckError::reference(url, format!("unreadable body: {}", e)))?;
        if body.len() as u64 > MAX_BODY_BYTES {
            return Err(CheckError::reference(
                url,
                format!("body exceeds {} bytes", MAX_BODY_BYTES),
            ));
        }

        Fingerprint::parse(&body).ok_or_else(|| CheckError::reference(url, "empty body"))
    }
}
