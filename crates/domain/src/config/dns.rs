use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DNS resolution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which address family to connect over when a host resolves to several
/// addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InetFamily {
    /// IPv4 only; fail when the host has no A record.
    Ipv4,
    /// IPv6 only; fail when the host has no AAAA record.
    Ipv6,
    /// First IPv4 address, else first IPv6 address.
    #[default]
    PreferIpv4,
    /// First IPv6 address, else first IPv4 address.
    PreferIpv6,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Resolver to query instead of the system one: `ip`, `ip:port`,
    /// `[v6]:port` or a hostname. Port defaults to 53.
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub family: InetFamily,
}
