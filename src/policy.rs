use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Transport family of a connection attempt, named the way dialers name them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    /// TCP over IPv4 or IPv6
    Tcp,
    /// TCP over IPv4
    Tcp4,
    /// TCP over IPv6
    Tcp6,
    /// UDP over IPv4 or IPv6
    Udp,
    /// UDP over IPv4
    Udp4,
    /// UDP over IPv6
    Udp6,
}

impl NetworkType {
    /// Returns the dialer name of this network type.
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkType::Tcp => "tcp",
            NetworkType::Tcp4 => "tcp4",
            NetworkType::Tcp6 => "tcp6",
            NetworkType::Udp => "udp",
            NetworkType::Udp4 => "udp4",
            NetworkType::Udp6 => "udp6",
        }
    }

    /// The TCP network type matching the family of `ip`.
    pub fn tcp_for(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => NetworkType::Tcp4,
            IpAddr::V6(_) => NetworkType::Tcp6,
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not a known network type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown network type {0:?}")]
pub struct UnknownNetworkType(
    /// The unrecognized name
    pub String,
);

impl FromStr for NetworkType {
    type Err = UnknownNetworkType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(NetworkType::Tcp),
            "tcp4" => Ok(NetworkType::Tcp4),
            "tcp6" => Ok(NetworkType::Tcp6),
            "udp" => Ok(NetworkType::Udp),
            "udp4" => Ok(NetworkType::Udp4),
            "udp6" => Ok(NetworkType::Udp6),
            other => Err(UnknownNetworkType(other.to_string())),
        }
    }
}

/// Network types allowed when a configuration leaves the list empty.
pub const DEFAULT_NETWORK_TYPES: [NetworkType; 2] = [NetworkType::Tcp4, NetworkType::Tcp6];

/// Caller-facing policy configuration.
///
/// This is the raw, possibly incomplete form a caller builds in code or
/// loads from TOML. It becomes an immutable [`Policy`] through
/// [`PolicyConfig::normalize`], which is where defaults are applied.
///
/// # Examples
///
/// ```
/// use egress_guard::{NetworkType, PolicyConfig};
///
/// let policy = PolicyConfig::default()
///     .allow_network(NetworkType::Tcp4)
///     .forbid_address("142.251.33.206".parse().unwrap())
///     .normalize();
///
/// assert!(policy.allows_network(NetworkType::Tcp4));
/// assert!(!policy.allows_network(NetworkType::Tcp6));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    /// Transport families that may be dialed. Empty means tcp4 and tcp6.
    pub allowed_network_types: BTreeSet<NetworkType>,
    /// Addresses that are refused even when they are public.
    pub forbidden_addresses: BTreeSet<IpAddr>,
}

impl PolicyConfig {
    /// Adds a permitted network type.
    pub fn allow_network(mut self, network: NetworkType) -> Self {
        self.allowed_network_types.insert(network);
        self
    }

    /// Adds an address that must never be dialed.
    pub fn forbid_address(mut self, ip: IpAddr) -> Self {
        self.forbidden_addresses.insert(ip);
        self
    }

    /// Parses a configuration from TOML text.
    ///
    /// ```
    /// use egress_guard::PolicyConfig;
    ///
    /// let config = PolicyConfig::from_toml_str(r#"
    ///     allowed_network_types = ["tcp4"]
    ///     forbidden_addresses = ["142.251.33.206"]
    /// "#).unwrap();
    /// assert_eq!(config.forbidden_addresses.len(), 1);
    /// ```
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    /// Reads and parses a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    /// Fills in defaults and freezes the configuration.
    ///
    /// An empty network list becomes tcp4 + tcp6. Forbidden addresses are
    /// stored in canonical form, so `::ffff:1.2.3.4` and `1.2.3.4` name the
    /// same entry.
    pub fn normalize(self) -> Policy {
        let allowed_network_types = if self.allowed_network_types.is_empty() {
            DEFAULT_NETWORK_TYPES.into_iter().collect()
        } else {
            self.allowed_network_types
        };

        let forbidden_addresses = self
            .forbidden_addresses
            .into_iter()
            .map(|ip| ip.to_canonical())
            .collect();

        Policy {
            allowed_network_types,
            forbidden_addresses,
        }
    }
}

/// A normalized, read-only connection policy.
///
/// Only obtainable through [`PolicyConfig::normalize`] (or `From`), so every
/// `Policy` already has its defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    allowed_network_types: BTreeSet<NetworkType>,
    forbidden_addresses: BTreeSet<IpAddr>,
}

impl Policy {
    /// Returns `true` if connections over `network` are permitted.
    pub fn allows_network(&self, network: NetworkType) -> bool {
        self.allowed_network_types.contains(&network)
    }

    /// Returns `true` if `ip` is explicitly forbidden.
    ///
    /// `ip` is compared in canonical form.
    pub fn forbids(&self, ip: &IpAddr) -> bool {
        self.forbidden_addresses.contains(&ip.to_canonical())
    }

    /// Permitted network types.
    pub fn allowed_network_types(&self) -> impl Iterator<Item = NetworkType> + '_ {
        self.allowed_network_types.iter().copied()
    }

    /// Forbidden addresses, in canonical form.
    pub fn forbidden_addresses(&self) -> impl Iterator<Item = &IpAddr> {
        self.forbidden_addresses.iter()
    }
}

impl Default for Policy {
    fn default() -> Self {
        PolicyConfig::default().normalize()
    }
}

impl From<PolicyConfig> for Policy {
    fn from(config: PolicyConfig) -> Self {
        config.normalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_config_defaults_to_tcp() {
        let policy = PolicyConfig::default().normalize();
        assert!(policy.allows_network(NetworkType::Tcp4));
        assert!(policy.allows_network(NetworkType::Tcp6));
        assert!(!policy.allows_network(NetworkType::Udp4));
        assert!(!policy.allows_network(NetworkType::Tcp));
        assert_eq!(policy.forbidden_addresses().count(), 0);
    }

    #[test]
    fn explicit_networks_replace_defaults() {
        let policy = PolicyConfig::default()
            .allow_network(NetworkType::Tcp4)
            .normalize();
        assert!(policy.allows_network(NetworkType::Tcp4));
        assert!(!policy.allows_network(NetworkType::Tcp6));
        assert_eq!(policy.allowed_network_types().count(), 1);
    }

    #[test]
    fn forbidden_addresses_are_canonical() {
        let policy = PolicyConfig::default()
            .forbid_address("::ffff:142.251.33.206".parse().unwrap())
            .normalize();
        assert!(policy.forbids(&"142.251.33.206".parse().unwrap()));
        assert!(policy.forbids(&"::ffff:142.251.33.206".parse().unwrap()));
        assert!(!policy.forbids(&"142.251.33.207".parse().unwrap()));
    }

    #[test]
    fn network_type_round_trips_names() {
        for name in ["tcp", "tcp4", "tcp6", "udp", "udp4", "udp6"] {
            let parsed: NetworkType = name.parse().unwrap();
            assert_eq!(parsed.to_string(), name);
        }
        assert_eq!(
            "unix".parse::<NetworkType>(),
            Err(UnknownNetworkType("unix".to_string()))
        );
    }

    #[test]
    fn toml_config_parses() {
        let config = PolicyConfig::from_toml_str(
            r#"
            allowed_network_types = ["tcp4"]
            forbidden_addresses = ["142.251.33.206", "2001:4860:4860::8888"]
            "#,
        )
        .unwrap();
        assert_eq!(
            config.allowed_network_types,
            BTreeSet::from([NetworkType::Tcp4])
        );
        assert_eq!(config.forbidden_addresses.len(), 2);
    }

    #[test]
    fn empty_toml_is_default() {
        let config = PolicyConfig::from_toml_str("").unwrap();
        assert_eq!(config, PolicyConfig::default());
    }

    #[test]
    fn toml_rejects_bad_entries() {
        assert!(PolicyConfig::from_toml_str(r#"allowed_network_types = ["unix"]"#).is_err());
        assert!(PolicyConfig::from_toml_str(r#"forbidden_addresses = ["not-an-ip"]"#).is_err());
        assert!(PolicyConfig::from_toml_str(r#"forbidden_ips = []"#).is_err());
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"forbidden_addresses = ["8.8.8.8"]"#).unwrap();

        let policy = PolicyConfig::load(file.path()).unwrap().normalize();
        assert!(policy.forbids(&"8.8.8.8".parse().unwrap()));
        assert!(policy.allows_network(NetworkType::Tcp6));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = PolicyConfig::load("/nonexistent/egress-guard.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("/nonexistent/egress-guard.toml"));
    }
}
