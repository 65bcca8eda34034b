use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::num::ParseIntError;
use std::path::PathBuf;

use thiserror::Error;

/// Stable code identifying why a connection was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DenialKind {
    /// The transport family is not in the allow-list
    BadNetworkType = 1,
    /// The dialed address is not a `host:port` pair
    BadHostPortPair = 2,
    /// The host is not an IP literal, or the IP is forbidden
    BadIpAddress = 3,
    /// The IP belongs to non-public address space
    NotPublicIpAddress = 4,
}

impl DenialKind {
    /// Numeric code of this kind.
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for DenialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenialKind::BadNetworkType => write!(f, "BadNetworkType"),
            DenialKind::BadHostPortPair => write!(f, "BadHostPortPair"),
            DenialKind::BadIpAddress => write!(f, "BadIpAddress"),
            DenialKind::NotPublicIpAddress => write!(f, "NotPublicIpAddress"),
        }
    }
}

/// A numeric code that does not name any [`DenialKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown error")]
pub struct UnknownDenialCode(
    /// The unrecognized code
    pub u8,
);

impl TryFrom<u8> for DenialKind {
    type Error = UnknownDenialCode;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(DenialKind::BadNetworkType),
            2 => Ok(DenialKind::BadHostPortPair),
            3 => Ok(DenialKind::BadIpAddress),
            4 => Ok(DenialKind::NotPublicIpAddress),
            other => Err(UnknownDenialCode(other)),
        }
    }
}

/// Why a `host:port` string could not be split.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostPortError {
    /// No `:port` suffix
    #[error("missing port in address")]
    MissingPort,
    /// More than one `:` outside brackets
    #[error("too many colons in address")]
    TooManyColons,
    /// `[` without a closing `]`
    #[error("missing ']' in address")]
    MissingBracket,
    /// `[` somewhere other than the start
    #[error("unexpected '[' in address")]
    UnexpectedOpenBracket,
    /// `]` without an opening `[`, or not followed by `:`
    #[error("unexpected ']' in address")]
    UnexpectedCloseBracket,
    /// The port is not a decimal number in `0..=65535`
    #[error("invalid port {port:?}")]
    InvalidPort {
        /// The text found after the last colon
        port: String,
        /// Integer parse failure, absent when the text has a sign
        #[source]
        source: Option<ParseIntError>,
    },
}

/// A connection attempt refused by the gate.
///
/// Each variant carries enough context to render its message on its own.
/// The underlying parse failure, when there is one, is exposed through
/// [`std::error::Error::source`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Denial {
    /// The network type is not allowed by the policy.
    #[error("{network} is not a safe network type")]
    BadNetworkType {
        /// Network type as given by the dialer
        network: String,
    },

    /// The address could not be split into host and port.
    #[error("{address} is not a valid host/port pair")]
    BadHostPortPair {
        /// The raw dialed address
        address: String,
        /// Why splitting failed
        #[source]
        source: HostPortError,
    },

    /// The host is not an IP literal, or the IP is forbidden by the policy.
    #[error("{host} is not a valid IP address")]
    BadIpAddress {
        /// Host part of the dialed address
        host: String,
        /// Parsed IP, present when the address was forbidden rather than unparseable
        ip: Option<IpAddr>,
        /// IP literal parse failure
        #[source]
        source: Option<AddrParseError>,
    },

    /// The IP is not in public address space.
    #[error("{ip} is not a public IP address")]
    NotPublicIpAddress {
        /// The rejected address
        ip: IpAddr,
        /// Name of the classifier rule that matched
        rule: &'static str,
    },
}

impl Denial {
    /// Kind of this denial.
    pub fn kind(&self) -> DenialKind {
        match self {
            Denial::BadNetworkType { .. } => DenialKind::BadNetworkType,
            Denial::BadHostPortPair { .. } => DenialKind::BadHostPortPair,
            Denial::BadIpAddress { .. } => DenialKind::BadIpAddress,
            Denial::NotPublicIpAddress { .. } => DenialKind::NotPublicIpAddress,
        }
    }

    /// Numeric code of this denial.
    pub fn code(&self) -> u8 {
        self.kind().code()
    }

    /// Searches an error chain for a policy denial.
    ///
    /// Looks through [`Denial`], [`DialError`] and [`io::Error`] wrappers at
    /// every level of `source()`. Returns `None` when the failure is an
    /// ordinary network error.
    ///
    /// ```
    /// use egress_guard::Denial;
    ///
    /// let denial = Denial::BadNetworkType { network: "udp4".to_string() };
    /// let err: std::io::Error = denial.clone().into();
    /// assert_eq!(Denial::find_in(&err), Some(&denial));
    ///
    /// let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
    /// assert!(Denial::find_in(&refused).is_none());
    /// ```
    pub fn find_in<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a Denial> {
        let mut current = Some(err);
        while let Some(err) = current {
            if let Some(denial) = Self::unwrap_one(err) {
                return Some(denial);
            }
            current = err.source();
        }
        None
    }

    fn unwrap_one<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a Denial> {
        if let Some(denial) = err.downcast_ref::<Denial>() {
            return Some(denial);
        }
        if let Some(dial) = err.downcast_ref::<DialError>() {
            return dial.denial();
        }
        // io::Error::source() skips the wrapped error itself.
        if let Some(inner) = err.downcast_ref::<io::Error>().and_then(|e| e.get_ref()) {
            return Self::find_in(inner);
        }
        None
    }
}

impl From<Denial> for io::Error {
    fn from(denial: Denial) -> Self {
        io::Error::new(io::ErrorKind::PermissionDenied, denial)
    }
}

/// Failure of a guarded dial.
#[derive(Debug, Error)]
pub enum DialError {
    /// The gate refused one of the resolved addresses.
    #[error(transparent)]
    Denied(#[from] Denial),

    /// Name resolution failed.
    #[error("failed to resolve {host}")]
    Resolve {
        /// Host that was looked up
        host: String,
        /// Resolver error
        #[source]
        source: io::Error,
    },

    /// Resolution succeeded but returned nothing.
    #[error("no addresses found for {host}")]
    NoAddresses {
        /// Host that was looked up
        host: String,
    },

    /// The connect did not finish within the configured timeout.
    #[error("connection to {addr} timed out")]
    Timeout {
        /// Address being connected
        addr: SocketAddr,
    },

    /// The socket connect failed.
    #[error("failed to connect to {addr}")]
    Connect {
        /// Address being connected
        addr: SocketAddr,
        /// Underlying socket error
        #[source]
        source: io::Error,
    },

    /// The URI cannot be dialed (missing host, unsupported scheme).
    #[error("cannot dial {uri}: {reason}")]
    InvalidTarget {
        /// The offending URI
        uri: String,
        /// What is wrong with it
        reason: &'static str,
    },
}

impl DialError {
    /// The policy denial behind this error, if it is one.
    pub fn denial(&self) -> Option<&Denial> {
        match self {
            DialError::Denied(denial) => Some(denial),
            _ => None,
        }
    }

    /// Returns `true` if the dial was refused by policy.
    pub fn is_denied(&self) -> bool {
        self.denial().is_some()
    }
}

/// Errors loading a policy configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read policy config {}", path.display())]
    Read {
        /// Path that was read
        path: PathBuf,
        /// I/O failure
        #[source]
        source: io::Error,
    },

    /// The TOML was malformed or named an unknown network type / invalid IP.
    #[error("invalid policy config: {0}")]
    Parse(#[from] toml::de::Error),
}
