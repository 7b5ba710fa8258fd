//! Host resolution with an address-family strategy and an optional DNS
//! server override.

use std::net::{IpAddr, SocketAddr};

use hickory_resolver::config::{LookupIpStrategy, NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use px_domain::config::{DnsConfig, InetFamily};
use px_domain::{Error, Result};
use tokio::sync::OnceCell;

const DEFAULT_DNS_PORT: u16 = 53;

/// Pick exactly one address from `addrs` according to `family`.
///
/// Preference strategies take the first address of the preferred family,
/// falling back to the first of the other. Exclusive strategies fail when
/// no address of that family exists.
pub fn select_address(addrs: &[IpAddr], family: InetFamily) -> Result<IpAddr> {
    let first_v4 = addrs.iter().copied().find(IpAddr::is_ipv4);
    let first_v6 = addrs.iter().copied().find(IpAddr::is_ipv6);

    let selected = match family {
        InetFamily::Ipv4 => first_v4.ok_or("no IPv4 address found"),
        InetFamily::Ipv6 => first_v6.ok_or("no IPv6 address found"),
        InetFamily::PreferIpv4 => first_v4
            .or(first_v6)
            .ok_or("no IPv4 or IPv6 address found"),
        InetFamily::PreferIpv6 => first_v6
            .or(first_v4)
            .ok_or("no IPv4 or IPv6 address found"),
    };
    selected.map_err(|msg| Error::Resolve(msg.into()))
}

/// Where DNS queries go when a server override is configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsServer {
    Addr(SocketAddr),
    /// A resolver given by name; looked up once through the system resolver.
    Host(String, u16),
}

/// Accepts `ip`, `ip:port`, `[v6]:port`, `[v6]`, bare v6, `host` and
/// `host:port`. The port defaults to 53.
pub fn parse_dns_server(raw: &str) -> Result<DnsServer> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::Config("dns.server must not be empty".into()));
    }
    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return Ok(DnsServer::Addr(addr));
    }
    let unbracketed = raw
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(raw);
    if let Ok(ip) = unbracketed.parse::<IpAddr>() {
        return Ok(DnsServer::Addr(SocketAddr::new(ip, DEFAULT_DNS_PORT)));
    }
    match raw.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| Error::Config(format!("invalid DNS server port in {raw:?}")))?;
            Ok(DnsServer::Host(host.to_owned(), port))
        }
        None => Ok(DnsServer::Host(raw.to_owned(), DEFAULT_DNS_PORT)),
    }
}

/// Resolves hostnames to a single address.
pub struct Resolver {
    family: InetFamily,
    server: Option<DnsServer>,
    custom: OnceCell<TokioAsyncResolver>,
}

impl Resolver {
    pub fn new(cfg: &DnsConfig) -> Result<Self> {
        let server = cfg.server.as_deref().map(parse_dns_server).transpose()?;
        Ok(Self {
            family: cfg.family,
            server,
            custom: OnceCell::new(),
        })
    }

    pub fn family(&self) -> InetFamily {
        self.family
    }

    /// Resolve `host` and select one address. IP literals skip DNS but are
    /// still subject to the family strategy.
    pub async fn resolve(&self, host: &str) -> Result<IpAddr> {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = host.parse::<IpAddr>() {
            return select_address(&[ip], self.family);
        }

        let addrs = match &self.server {
            None => system_lookup(host).await?,
            Some(server) => {
                let resolver = self
                    .custom
                    .get_or_try_init(|| async { build_resolver(server).await })
                    .await?;
                resolver
                    .lookup_ip(host)
                    .await
                    .map_err(|e| Error::Resolve(format!("{host}: {e}")))?
                    .iter()
                    .collect()
            }
        };
        tracing::debug!(host = %host, candidates = addrs.len(), "resolved host");
        select_address(&addrs, self.family)
    }
}

async fn system_lookup(host: &str) -> Result<Vec<IpAddr>> {
    let addrs = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| Error::Resolve(format!("{host}: {e}")))?;
    Ok(addrs.map(|a| a.ip()).collect())
}

async fn build_resolver(server: &DnsServer) -> Result<TokioAsyncResolver> {
    let addr = match server {
        DnsServer::Addr(addr) => *addr,
        DnsServer::Host(host, port) => {
            let ip = system_lookup(host)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| Error::Resolve(format!("DNS server {host} has no address")))?;
            SocketAddr::new(ip, *port)
        }
    };
    tracing::debug!(server = %addr, "using custom DNS server");

    let group = NameServerConfigGroup::from_ips_clear(&[addr.ip()], addr.port(), true);
    let config = ResolverConfig::from_parts(None, vec![], group);
    let mut opts = ResolverOpts::default();
    opts.ip_strategy = LookupIpStrategy::Ipv4AndIpv6;
    Ok(TokioAsyncResolver::tokio(config, opts))
}
