use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::{
    classifier,
    error::{Denial, HostPortError},
    policy::{NetworkType, Policy, PolicyConfig},
};

/// A dialed address split into its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostPort<'a> {
    /// Host part, without IPv6 brackets
    pub host: &'a str,
    /// Port number
    pub port: u16,
}

/// Splits `host:port` or `[host]:port` into its parts.
///
/// Follows the usual dialer rules: an IPv6 host must be bracketed, the port
/// must follow the last colon, and stray brackets are rejected. The host is
/// not validated any further here.
///
/// # Examples
///
/// ```
/// use egress_guard::{split_host_port, HostPortError};
///
/// let hp = split_host_port("[::1]:5000").unwrap();
/// assert_eq!((hp.host, hp.port), ("::1", 5000));
/// assert_eq!(split_host_port("bad:address:"), Err(HostPortError::TooManyColons));
/// ```
pub fn split_host_port(address: &str) -> Result<HostPort<'_>, HostPortError> {
    let colon = address.rfind(':').ok_or(HostPortError::MissingPort)?;

    let (host, rest_after_open, rest_after_close) = if address.starts_with('[') {
        let end = address.find(']').ok_or(HostPortError::MissingBracket)?;
        match end + 1 {
            n if n == address.len() => return Err(HostPortError::MissingPort),
            n if n == colon => {}
            n if address.as_bytes()[n] == b':' => return Err(HostPortError::TooManyColons),
            _ => return Err(HostPortError::MissingPort),
        }
        (&address[1..end], &address[1..], &address[end + 1..])
    } else {
        let host = &address[..colon];
        if host.contains(':') {
            return Err(HostPortError::TooManyColons);
        }
        (host, address, address)
    };

    if rest_after_open.contains('[') {
        return Err(HostPortError::UnexpectedOpenBracket);
    }
    if rest_after_close.contains(']') {
        return Err(HostPortError::UnexpectedCloseBracket);
    }

    let port_text = &address[colon + 1..];
    let invalid_port = |source| HostPortError::InvalidPort {
        port: port_text.to_string(),
        source,
    };
    // `u16::from_str` accepts a leading '+'.
    if port_text.starts_with('+') {
        return Err(invalid_port(None));
    }
    let port = port_text
        .parse::<u16>()
        .map_err(|source| invalid_port(Some(source)))?;

    Ok(HostPort { host, port })
}

/// The pre-connect checkpoint every outbound connection passes through.
///
/// `ConnectionGate` holds an immutable [`Policy`] and decides, for one
/// resolved `(network, address)` pair, whether the socket may connect.
/// Checks run in a fixed order and stop at the first failure:
///
/// 1. network type is allowed
/// 2. address splits into host and port
/// 3. host is an IP literal
/// 4. IP is not forbidden by the policy
/// 5. IP is public
///
/// Evaluation performs no I/O, holds no mutable state, and is safe to call
/// concurrently from any number of dials. Cloning is cheap.
///
/// # Examples
///
/// ```
/// use egress_guard::{ConnectionGate, DenialKind, Policy};
///
/// let gate = ConnectionGate::new(Policy::default());
///
/// assert!(gate.evaluate("tcp4", "142.251.33.206:80").is_ok());
///
/// let denial = gate.evaluate("tcp4", "127.0.0.1:5000").unwrap_err();
/// assert_eq!(denial.kind(), DenialKind::NotPublicIpAddress);
/// assert_eq!(denial.to_string(), "127.0.0.1 is not a public IP address");
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConnectionGate {
    policy: Arc<Policy>,
}

impl ConnectionGate {
    /// Creates a gate enforcing `policy`.
    pub fn new(policy: impl Into<Policy>) -> Self {
        Self {
            policy: Arc::new(policy.into()),
        }
    }

    /// The policy this gate enforces.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Decides whether a connection to `address` over `network` may proceed.
    ///
    /// `address` is the resolved `ip:port` the dialer is about to connect
    /// to, never a hostname.
    ///
    /// # Errors
    ///
    /// Returns the [`Denial`] for the first check that fails.
    pub fn evaluate(&self, network: &str, address: &str) -> Result<(), Denial> {
        // 1. Network type
        let allowed = network
            .parse::<NetworkType>()
            .is_ok_and(|n| self.policy.allows_network(n));
        if !allowed {
            return Err(Denial::BadNetworkType {
                network: network.to_string(),
            });
        }

        // 2. host:port
        let HostPort { host, .. } =
            split_host_port(address).map_err(|source| Denial::BadHostPortPair {
                address: address.to_string(),
                source,
            })?;

        // 3. IP literal
        let ip = host
            .parse::<IpAddr>()
            .map_err(|source| Denial::BadIpAddress {
                host: host.to_string(),
                ip: None,
                source: Some(source),
            })?
            .to_canonical();

        // 4. Forbidden list
        if self.policy.forbids(&ip) {
            return Err(Denial::BadIpAddress {
                host: host.to_string(),
                ip: Some(ip),
                source: None,
            });
        }

        // 5. Public address space
        if let Some(rule) = classifier::classify(ip) {
            return Err(Denial::NotPublicIpAddress {
                ip,
                rule: rule.name,
            });
        }

        Ok(())
    }

    /// Evaluates a resolved socket address over TCP of the matching family.
    ///
    /// The address is rendered the way a resolver hands it to the dialer
    /// (`1.2.3.4:80`, `[::1]:80`) and then goes through [`evaluate`](Self::evaluate).
    pub fn evaluate_socket_addr(&self, addr: &SocketAddr) -> Result<(), Denial> {
        let network = NetworkType::tcp_for(&addr.ip());
        self.evaluate(network.as_str(), &addr.to_string())
    }
}

impl From<PolicyConfig> for ConnectionGate {
    fn from(config: PolicyConfig) -> Self {
        Self::new(config.normalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DenialKind;
    use proptest::prelude::*;
    use rstest::rstest;

    fn default_gate() -> ConnectionGate {
        ConnectionGate::new(PolicyConfig::default())
    }

    #[rstest]
    #[case("127.0.0.1:5000", "127.0.0.1", 5000)]
    #[case("[::1]:5000", "::1", 5000)]
    #[case("[fe80::1%eth0]:80", "fe80::1%eth0", 80)]
    #[case("example.com:443", "example.com", 443)]
    #[case(":80", "", 80)]
    fn splits_valid_pairs(#[case] address: &str, #[case] host: &str, #[case] port: u16) {
        assert_eq!(split_host_port(address), Ok(HostPort { host, port }));
    }

    #[rstest]
    #[case("", HostPortError::MissingPort)]
    #[case("127.0.0.1", HostPortError::MissingPort)]
    #[case("[::1]", HostPortError::MissingPort)]
    #[case("[::1]x:80", HostPortError::MissingPort)]
    #[case("bad:address:", HostPortError::TooManyColons)]
    #[case("::1:5000", HostPortError::TooManyColons)]
    #[case("[::1]:80:80", HostPortError::TooManyColons)]
    #[case("[::1:80", HostPortError::MissingBracket)]
    #[case("a[b:80", HostPortError::UnexpectedOpenBracket)]
    #[case("a]b:80", HostPortError::UnexpectedCloseBracket)]
    fn rejects_malformed_pairs(#[case] address: &str, #[case] expected: HostPortError) {
        assert_eq!(split_host_port(address), Err(expected));
    }

    #[rstest]
    #[case("127.0.0.1:")]
    #[case("127.0.0.1:http")]
    #[case("127.0.0.1:65536")]
    #[case("127.0.0.1:-1")]
    #[case("127.0.0.1:+80")]
    #[case("[::1]:+443")]
    fn rejects_bad_ports(#[case] address: &str) {
        assert!(matches!(
            split_host_port(address),
            Err(HostPortError::InvalidPort { .. })
        ));
    }

    #[test]
    fn signed_port_is_bad_pair() {
        let denial = default_gate()
            .evaluate("tcp4", "142.251.33.206:+80")
            .unwrap_err();
        assert_eq!(denial.kind(), DenialKind::BadHostPortPair);
        assert_eq!(
            denial.to_string(),
            "142.251.33.206:+80 is not a valid host/port pair"
        );
    }

    #[test]
    fn accepts_public_address() {
        assert_eq!(default_gate().evaluate("tcp4", "142.251.33.206:80"), Ok(()));
        assert_eq!(
            default_gate().evaluate("tcp6", "[2001:4860:4860::8888]:443"),
            Ok(())
        );
    }

    #[test]
    fn rejects_loopback() {
        let denial = default_gate().evaluate("tcp4", "127.0.0.1:5000").unwrap_err();
        assert_eq!(denial.kind(), DenialKind::NotPublicIpAddress);
        assert_eq!(denial.to_string(), "127.0.0.1 is not a public IP address");

        let denial = default_gate().evaluate("tcp6", "[::1]:5000").unwrap_err();
        assert_eq!(denial.to_string(), "::1 is not a public IP address");
    }

    #[test]
    fn rejects_disallowed_network_before_address() {
        let gate = ConnectionGate::new(PolicyConfig::default().allow_network(NetworkType::Tcp4));
        let denial = gate.evaluate("tcp6", "[::1]:5000").unwrap_err();
        assert_eq!(denial.kind(), DenialKind::BadNetworkType);
        assert_eq!(denial.to_string(), "tcp6 is not a safe network type");

        // Public address, wrong network
        let denial = default_gate().evaluate("udp4", "142.251.33.206:53").unwrap_err();
        assert_eq!(denial.kind(), DenialKind::BadNetworkType);

        // Unknown network name
        let denial = default_gate().evaluate("unix", "/tmp/sock").unwrap_err();
        assert_eq!(denial.to_string(), "unix is not a safe network type");
    }

    #[test]
    fn rejects_malformed_address() {
        let denial = default_gate().evaluate("tcp4", "bad:address:").unwrap_err();
        assert_eq!(denial.kind(), DenialKind::BadHostPortPair);
        assert_eq!(denial.to_string(), "bad:address: is not a valid host/port pair");
    }

    #[test]
    fn rejects_non_ip_host() {
        let denial = default_gate()
            .evaluate("tcp4", "12345789.12345789.123456789879:80")
            .unwrap_err();
        assert_eq!(denial.kind(), DenialKind::BadIpAddress);
        assert!(matches!(
            denial,
            Denial::BadIpAddress {
                ip: None,
                source: Some(_),
                ..
            }
        ));

        // Hostnames never reach the gate legitimately
        let denial = default_gate().evaluate("tcp4", "localhost:80").unwrap_err();
        assert_eq!(denial.to_string(), "localhost is not a valid IP address");
    }

    #[test]
    fn rejects_forbidden_public_address() {
        let gate = ConnectionGate::new(
            PolicyConfig::default()
                .allow_network(NetworkType::Tcp4)
                .forbid_address("142.251.33.206".parse().unwrap()),
        );
        let denial = gate.evaluate("tcp4", "142.251.33.206:80").unwrap_err();
        assert_eq!(denial.kind(), DenialKind::BadIpAddress);
        assert_eq!(
            denial.to_string(),
            "142.251.33.206 is not a valid IP address"
        );
        assert!(matches!(denial, Denial::BadIpAddress { ip: Some(_), .. }));

        // Mapped form of a forbidden address
        let gate = ConnectionGate::new(
            PolicyConfig::default().forbid_address("142.251.33.206".parse().unwrap()),
        );
        let denial = gate
            .evaluate("tcp6", "[::ffff:142.251.33.206]:80")
            .unwrap_err();
        assert_eq!(denial.kind(), DenialKind::BadIpAddress);
    }

    #[test]
    fn mapped_loopback_reports_ipv4_form() {
        let denial = default_gate()
            .evaluate("tcp6", "[::ffff:127.0.0.1]:80")
            .unwrap_err();
        assert_eq!(
            denial,
            Denial::NotPublicIpAddress {
                ip: "127.0.0.1".parse().unwrap(),
                rule: "loopback",
            }
        );
    }

    #[test]
    fn socket_addr_uses_matching_family() {
        let gate = ConnectionGate::new(PolicyConfig::default().allow_network(NetworkType::Tcp4));
        assert_eq!(
            gate.evaluate_socket_addr(&"142.251.33.206:80".parse().unwrap()),
            Ok(())
        );
        let denial = gate
            .evaluate_socket_addr(&"[2001:4860:4860::8888]:80".parse().unwrap())
            .unwrap_err();
        assert_eq!(denial.to_string(), "tcp6 is not a safe network type");
    }

    proptest! {
        /// Property: an address with an unbracketed extra colon never gets past splitting.
        #[test]
        fn proptest_too_many_colons_is_bad_host_port(
            a in "[0-9a-z.]{0,12}",
            b in "[0-9a-z.]{0,12}",
            c in "[0-9]{0,5}",
        ) {
            let address = format!("{a}:{b}:{c}");
            let denial = default_gate().evaluate("tcp4", &address).unwrap_err();
            prop_assert_eq!(denial.kind(), DenialKind::BadHostPortPair);
        }

        /// Property: evaluating the same attempt twice gives the same decision.
        #[test]
        fn proptest_evaluation_is_idempotent(
            bits in any::<u32>(),
            port in any::<u16>(),
            network in prop_oneof![Just("tcp4"), Just("tcp6"), Just("udp4")],
        ) {
            let gate = default_gate();
            let address = format!("{}:{port}", std::net::Ipv4Addr::from(bits));
            prop_assert_eq!(gate.evaluate(network, &address), gate.evaluate(network, &address));
        }

        /// Property: a disallowed network is reported even for public addresses.
        #[test]
        fn proptest_network_checked_first(bits in any::<u32>()) {
            let gate = ConnectionGate::new(PolicyConfig::default().allow_network(NetworkType::Tcp6));
            let address = format!("{}:80", std::net::Ipv4Addr::from(bits));
            let denial = gate.evaluate("tcp4", &address).unwrap_err();
            prop_assert_eq!(denial.kind(), DenialKind::BadNetworkType);
        }
    }
}
