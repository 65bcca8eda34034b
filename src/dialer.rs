use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::{
    error::DialError,
    gate::ConnectionGate,
    policy::{NetworkType, Policy},
};

/// Connect timeout used when none is configured.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// A TCP dialer that consults a [`ConnectionGate`] before every connect.
///
/// The host is resolved first, then **every** resolved address is checked
/// against the gate. A single denial aborts the whole dial before any socket
/// is opened, so a name that resolves to one public and one internal address
/// cannot be used to reach the internal one. Only then are the candidates
/// tried in resolver order.
///
/// Resolution and socket errors are reported as ordinary [`DialError`]
/// variants and never as a denial.
///
/// # Examples
///
/// ```no_run
/// use egress_guard::{GuardedDialer, Policy};
///
/// # async fn example() -> Result<(), egress_guard::DialError> {
/// let dialer = GuardedDialer::new(Policy::default());
/// let stream = dialer.connect("example.com", 80).await?;
/// # drop(stream);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct GuardedDialer {
    gate: ConnectionGate,
    connect_timeout: Option<Duration>,
}

impl GuardedDialer {
    /// Creates a dialer enforcing `policy` with the default connect timeout.
    pub fn new(policy: impl Into<Policy>) -> Self {
        Self::with_gate(ConnectionGate::new(policy))
    }

    /// Creates a dialer around an existing gate.
    pub fn with_gate(gate: ConnectionGate) -> Self {
        Self {
            gate,
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
        }
    }

    /// Sets the per-address connect timeout. `None` disables it.
    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// The gate this dialer consults.
    pub fn gate(&self) -> &ConnectionGate {
        &self.gate
    }

    /// Resolves `host` and opens a TCP connection to it if the policy allows.
    ///
    /// `host` may be a name, an IP literal, or a bracketed IPv6 literal.
    ///
    /// # Errors
    ///
    /// - [`DialError::Denied`] if any resolved address is refused by the gate
    /// - [`DialError::Resolve`] / [`DialError::NoAddresses`] on lookup failure
    /// - [`DialError::Connect`] / [`DialError::Timeout`] if no candidate connects
    pub async fn connect(&self, host: &str, port: u16) -> Result<TcpStream, DialError> {
        let host = strip_brackets(host);
        let candidates: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|source| DialError::Resolve {
                host: host.to_string(),
                source,
            })?
            .collect();

        if candidates.is_empty() {
            return Err(DialError::NoAddresses {
                host: host.to_string(),
            });
        }

        self.check_all(host, &candidates)?;

        let mut last_err = None;
        for addr in candidates {
            match self.connect_one(addr).await {
                Ok(stream) => {
                    tracing::debug!(host, %addr, "guarded connection established");
                    return Ok(stream);
                }
                Err(err) => {
                    tracing::debug!(host, %addr, error = %err, "connect attempt failed");
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or(DialError::NoAddresses {
            host: host.to_string(),
        }))
    }

    /// Connects to an already-resolved address after checking it.
    pub async fn connect_addr(&self, addr: SocketAddr) -> Result<TcpStream, DialError> {
        self.check_all(&addr.ip().to_string(), &[addr])?;
        self.connect_one(addr).await
    }

    fn check_all(&self, host: &str, candidates: &[SocketAddr]) -> Result<(), DialError> {
        for addr in candidates {
            if let Err(denial) = self.gate.evaluate_socket_addr(addr) {
                tracing::warn!(
                    host,
                    network = %NetworkType::tcp_for(&addr.ip()),
                    address = %addr,
                    code = denial.code(),
                    reason = %denial,
                    "outbound connection blocked"
                );
                return Err(denial.into());
            }
        }
        Ok(())
    }

    async fn connect_one(&self, addr: SocketAddr) -> Result<TcpStream, DialError> {
        let connect = TcpStream::connect(addr);
        let result = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| DialError::Timeout { addr })?,
            None => connect.await,
        };
        result.map_err(|source| DialError::Connect { addr, source })
    }
}

impl Default for GuardedDialer {
    fn default() -> Self {
        Self::with_gate(ConnectionGate::default())
    }
}

fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}
