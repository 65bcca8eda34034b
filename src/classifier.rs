//! Classification of resolved addresses into public and non-public space.
//!
//! An address is *public* when no rule in [`RULES`] matches it. Rules are
//! evaluated in table order and each one is a named set of CIDR ranges, so a
//! newly reserved block is one more row rather than one more branch.
//!
//! IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) are classified as the IPv4
//! address they carry.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::{IpNet, Ipv4Net, Ipv6Net};

/// A named group of address ranges that are never a valid outbound target.
#[derive(Debug, PartialEq, Eq)]
pub struct AddressRule {
    /// Stable identifier used in diagnostics and logs.
    pub name: &'static str,
    /// Ranges covered by this rule.
    pub ranges: &'static [IpNet],
}

impl AddressRule {
    /// Returns `true` if `ip` falls into any range of this rule.
    ///
    /// No normalization happens here; [`classify`] canonicalizes first.
    pub fn matches(&self, ip: &IpAddr) -> bool {
        self.ranges.iter().any(|net| net.contains(ip))
    }
}

const fn v4(a: u8, b: u8, c: u8, d: u8, prefix: u8) -> IpNet {
    IpNet::V4(Ipv4Net::new_assert(Ipv4Addr::new(a, b, c, d), prefix))
}

const fn v6(segments: [u16; 8], prefix: u8) -> IpNet {
    let [a, b, c, d, e, f, g, h] = segments;
    IpNet::V6(Ipv6Net::new_assert(
        Ipv6Addr::new(a, b, c, d, e, f, g, h),
        prefix,
    ))
}

/// Rejection rules, in evaluation order.
///
/// The first five rows are the generic address kinds that apply to both
/// families. The rest are IPv4 special-purpose blocks not covered by them.
pub static RULES: &[AddressRule] = &[
    AddressRule {
        name: "unspecified",
        ranges: &[v4(0, 0, 0, 0, 32), v6([0, 0, 0, 0, 0, 0, 0, 0], 128)],
    },
    AddressRule {
        name: "loopback",
        ranges: &[v4(127, 0, 0, 0, 8), v6([0, 0, 0, 0, 0, 0, 0, 1], 128)],
    },
    AddressRule {
        name: "link-local-unicast",
        ranges: &[v4(169, 254, 0, 0, 16), v6([0xfe80, 0, 0, 0, 0, 0, 0, 0], 10)],
    },
    AddressRule {
        name: "link-local-multicast",
        ranges: &[v4(224, 0, 0, 0, 24), v6([0xff02, 0, 0, 0, 0, 0, 0, 0], 16)],
    },
    AddressRule {
        name: "private-use",
        ranges: &[
            v4(10, 0, 0, 0, 8),
            v4(172, 16, 0, 0, 12),
            v4(192, 168, 0, 0, 16),
            v6([0xfc00, 0, 0, 0, 0, 0, 0, 0], 7),
        ],
    },
    AddressRule {
        name: "this-network",
        ranges: &[v4(0, 0, 0, 0, 8)],
    },
    AddressRule {
        name: "shared-address-space",
        ranges: &[v4(100, 64, 0, 0, 10)],
    },
    AddressRule {
        name: "ietf-protocol-assignments",
        ranges: &[v4(192, 0, 0, 0, 24)],
    },
    AddressRule {
        name: "documentation",
        ranges: &[
            v4(192, 0, 2, 0, 24),
            v4(198, 51, 100, 0, 24),
            v4(203, 0, 113, 0, 24),
        ],
    },
    AddressRule {
        name: "6to4-relay-anycast",
        ranges: &[v4(192, 88, 99, 0, 24)],
    },
    AddressRule {
        name: "benchmarking",
        ranges: &[v4(198, 18, 0, 0, 15)],
    },
    AddressRule {
        name: "multicast",
        ranges: &[v4(224, 0, 0, 0, 4)],
    },
    AddressRule {
        name: "reserved",
        ranges: &[v4(240, 0, 0, 0, 4)],
    },
    AddressRule {
        name: "limited-broadcast",
        ranges: &[v4(255, 255, 255, 255, 32)],
    },
];

/// Returns the first rule that rejects `ip`, or `None` if it is public.
///
/// # Examples
///
/// ```
/// use egress_guard::classify;
///
/// let rule = classify("100.64.1.1".parse().unwrap()).unwrap();
/// assert_eq!(rule.name, "shared-address-space");
/// assert!(classify("142.251.33.206".parse().unwrap()).is_none());
/// ```
pub fn classify(ip: IpAddr) -> Option<&'static AddressRule> {
    let ip = ip.to_canonical();
    RULES.iter().find(|rule| rule.matches(&ip))
}

/// Returns `true` if `ip` is publicly routable and may be dialed.
///
/// # Examples
///
/// ```
/// use egress_guard::is_public;
///
/// assert!(is_public("142.251.33.206".parse().unwrap()));
/// assert!(!is_public("127.0.0.1".parse().unwrap()));
/// assert!(!is_public("::ffff:10.0.0.1".parse().unwrap()));
/// ```
pub fn is_public(ip: IpAddr) -> bool {
    classify(ip).is_none()
}
