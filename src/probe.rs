//! Reachability probe run before every live handshake.
//!
//! Only resolves the name; no connection is attempted. A failure here means
//! the host does not exist or the network is down, which is reported
//! separately from a certificate that changed.

use crate::comparator::Prober;
use crate::error::CheckError;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Resolves hostnames through the system resolver.
#[derive(Debug, Clone)]
pub struct DnsProber {
    timeout: Duration,
}

impl DnsProber {
    pub fn new(timeout: Duration) -> DnsProber {
        DnsProber { timeout }
    }
}

impl Prober for DnsProber {
    fn probe(&self, hostname: &str, port: u16) -> Result<Vec<SocketAddr>, CheckError> {
        let (tx, rx) = mpsc::channel();
        let host = hostname.to_string();
        // getaddrinfo has no deadline of its own; a stuck lookup is left behind.
        thread::spawn(move || {
            let result = (host.as_str(), port)
                .to_socket_addrs()
                .map(|addrs| addrs.collect::<Vec<_>>());
            let _ = tx.send(result);
        });

        let resolved = match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("lookup did not finish within {:?}", self.timeout),
            )),
        };

        match resolved {
            Ok(addrs) if !addrs.is_empty() => {
                tracing::debug!("{} resolved to {} address(es)", hostname, addrs.len());
                Ok(addrs)
            }
            Ok(_) => Err(CheckError::DnsResolution {
                hostname: hostname.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no addresses returned"),
            }),
            Err(source) => Err(CheckError::DnsResolution {
                hostname: hostname.to_string(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_probe_localhost() {
        let prober = DnsProber::new(Duration::from_secs(5));
        let addrs = prober.probe("localhost", 443).unwrap();
        assert!(!addrs.is_empty());
        assert!(addrs.iter().all(|a| a.port() == 443));
    }

    #[test]
    fn test_probe_ip_literal() {
        let prober = DnsProber::new(Duration::from_secs(5));
        let addrs = prober.probe("127.0.0.1", 8443).unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:8443".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn test_probe_unresolvable_host() {
        // .invalid is reserved and never resolves
        let prober = DnsProber::new(Duration::from_secs(10));
        let err = prober.probe("fingerwatch-test.invalid", 443).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DnsResolution);
    }
}
