//! Live fingerprint of the certificate the monitored host presents.
//!
//! Chain validation is switched off: the reference fingerprint is the trust
//! anchor, so self-signed or otherwise untrusted certificates must still be
//! fingerprinted. Every call builds a fresh context with session caching
//! disabled, so a rotated certificate is never hidden behind a resumed session.

use crate::comparator::LiveSource;
use crate::error::CheckError;
use crate::{DigestAlgorithm, Fingerprint, MonitorTarget};
use openssl::ssl::{
    HandshakeError, Ssl, SslContext, SslMethod, SslSessionCacheMode, SslVerifyMode,
};
use openssl::x509::X509;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

/// Handshake deadline used unless configured otherwise.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct LiveFetcher {
    timeout: Duration,
    digest: DigestAlgorithm,
}

impl LiveFetcher {
    pub fn new(timeout: Duration, digest: DigestAlgorithm) -> LiveFetcher {
        LiveFetcher { timeout, digest }
    }

    fn timed_out(&self, target: &MonitorTarget) -> CheckError {
        CheckError::Timeout {
            operation: format!(
                "TLS handshake with {} after {:?}",
                target.address(),
                self.timeout
            ),
        }
    }

    fn connect(
        &self,
        target: &MonitorTarget,
        addr: &SocketAddr,
        deadline: Instant,
    ) -> Result<Fingerprint, CheckError> {
        let mut context = SslContext::builder(SslMethod::tls())?;
        context.set_verify(SslVerifyMode::NONE);
        context.set_session_cache_mode(SslSessionCacheMode::OFF);
        let context = context.build();

        let mut ssl = Ssl::new(&context)?;
        ssl.set_hostname(&target.hostname)?;

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(self.timed_out(target));
        }
        let tcp_stream = TcpStream::connect_timeout(addr, remaining).map_err(|e| {
            if is_timeout(&e) {
                self.timed_out(target)
            } else {
                CheckError::connection(&target.address(), e)
            }
        })?;

        let stream = DeadlineStream {
            inner: tcp_stream,
            deadline,
        };

        let stream = match ssl.connect(stream) {
            Ok(stream) => stream,
            Err(HandshakeError::WouldBlock(_)) => return Err(self.timed_out(target)),
            Err(HandshakeError::Failure(mid)) => {
                let error = mid.into_error();
                let io_timeout = error.io_error().map(is_timeout).unwrap_or(false);
                if io_timeout || Instant::now() >= deadline {
                    return Err(self.timed_out(target));
                }
                return Err(CheckError::connection(&target.address(), error));
            }
            Err(HandshakeError::SetupFailure(stack)) => {
                return Err(CheckError::connection(&target.address(), stack));
            }
        };

        // stream drops on return, closing the connection; nothing is kept for reuse
        peer_fingerprint(stream.ssl().peer_certificate(), &target.hostname, self.digest)
    }
}

/// Digest of the peer certificate, or `NoCertificate` when none was sent.
fn peer_fingerprint(
    certificate: Option<X509>,
    hostname: &str,
    digest: DigestAlgorithm,
) -> Result<Fingerprint, CheckError> {
    let certificate = certificate.ok_or_else(|| CheckError::NoCertificate {
        hostname: hostname.to_string(),
    })?;
    let digest = certificate.digest(digest.message_digest())?;
    Ok(Fingerprint::from_digest(&digest))
}

/// Socket whose every read and write is bounded by one overall deadline.
///
/// Each call only gets the time left before the deadline, so a peer
/// trickling bytes cannot stretch the handshake.
struct DeadlineStream {
    inner: TcpStream,
    deadline: Instant,
}

impl DeadlineStream {
    fn remaining(&self) -> io::Result<Duration> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            Err(io::Error::new(io::ErrorKind::TimedOut, "handshake deadline passed"))
        } else {
            Ok(remaining)
        }
    }
}

impl Read for DeadlineStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.remaining()?;
        self.inner.set_read_timeout(Some(remaining))?;
        self.inner.read(buf)
    }
}

impl Write for DeadlineStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let remaining = self.remaining()?;
        self.inner.set_write_timeout(Some(remaining))?;
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl LiveSource for LiveFetcher {
    fn fetch(
        &self,
        target: &MonitorTarget,
        addrs: &[SocketAddr],
    ) -> Result<Fingerprint, CheckError> {
        let addr = addrs.first().ok_or_else(|| CheckError::DnsResolution {
            hostname: target.hostname.clone(),
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses to connect to"),
        })?;
        let deadline = Instant::now() + self.timeout;
        tracing::debug!("Opening TLS connection to {} ({})", target.address(), addr);
        self.connect(target, addr, deadline)
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}
