//! Pre-connect guard against SSRF and DNS rebinding for outbound HTTP.
//!
//! Every outbound TCP connection is checked *after* its hostname has been
//! resolved and *before* the socket connects, so the decision is always made
//! on the concrete IP that will be dialed and never on a hostname that could
//! resolve differently a moment later.
//!
//! # Core Types
//!
//! - [`is_public`] / [`classify`]: address classification against a table of
//!   reserved ranges ([`RULES`])
//! - [`PolicyConfig`] / [`Policy`]: allowed network types and forbidden
//!   addresses, normalized once at construction
//! - [`ConnectionGate`]: the ordered pre-connect checks, returning a
//!   [`Denial`] with a stable [`DenialKind`] code
//! - [`GuardedDialer`]: resolve, gate every candidate, then connect
//! - [`GuardedConnector`] / [`build_client`]: the same dialer behind a hyper
//!   client with rustls for `https` (feature `client`)
//!
//! # Examples
//!
//! ```
//! use egress_guard::{ConnectionGate, DenialKind, NetworkType, PolicyConfig};
//!
//! let gate = ConnectionGate::new(
//!     PolicyConfig::default()
//!         .allow_network(NetworkType::Tcp4)
//!         .forbid_address("142.251.33.206".parse().unwrap()),
//! );
//!
//! let denial = gate.evaluate("tcp6", "[::1]:5000").unwrap_err();
//! assert_eq!(denial.kind(), DenialKind::BadNetworkType);
//! assert_eq!(denial.to_string(), "tcp6 is not a safe network type");
//!
//! let denial = gate.evaluate("tcp4", "142.251.33.206:80").unwrap_err();
//! assert_eq!(denial.code(), 3);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod classifier;
mod dialer;
mod error;
mod gate;
mod policy;

#[cfg(feature = "client")]
mod client;

pub use classifier::{AddressRule, RULES, classify, is_public};
pub use dialer::{DEFAULT_CONNECT_TIMEOUT, GuardedDialer};
pub use error::{ConfigError, Denial, DenialKind, DialError, HostPortError, UnknownDenialCode};
pub use gate::{ConnectionGate, HostPort, split_host_port};
pub use policy::{DEFAULT_NETWORK_TYPES, NetworkType, Policy, PolicyConfig, UnknownNetworkType};

#[cfg(feature = "client")]
pub use client::{
    ClientOptions, GuardedClient, GuardedConnector, build_client, build_client_with_tls,
};
