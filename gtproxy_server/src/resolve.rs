//! DNS resolution.
//!
//! Upstream hosts resolve through a configurable resolver preset
//! (`cloudflare`, `google`, `quad9`, `system`) or an explicit
//! comma-separated list of resolver addresses. Lookups cap at two IPv4
//! addresses per host; the interceptor tries them in order. The seam is a
//! trait so tests can substitute a fixed table.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};

use anyhow::Context;
use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use tracing::debug;

/// Upstream attempts fan out over at most this many addresses per host.
pub const MAX_ADDRS_PER_HOST: usize = 2;

#[async_trait]
pub trait ResolveIpv4: Send + Sync {
    /// Resolves `host` to at most [`MAX_ADDRS_PER_HOST`] IPv4 addresses.
    async fn lookup(&self, host: &str) -> anyhow::Result<Vec<Ipv4Addr>>;
}

/// Resolver backed by hickory-dns.
pub struct DnsResolver {
    inner: TokioAsyncResolver,
}

impl DnsResolver {
    /// Builds a resolver from the `client.dnsServer` setting.
    pub fn from_setting(setting: &str) -> anyhow::Result<Self> {
        let config = match setting {
            "cloudflare" | "" => ResolverConfig::cloudflare(),
            "google" => ResolverConfig::google(),
            "quad9" => ResolverConfig::quad9(),
            "system" => {
                let inner = TokioAsyncResolver::tokio_from_system_conf()
                    .context("system resolver configuration")?;
                return Ok(Self { inner });
            }
            list => Self::custom_config(list)?,
        };
        Ok(Self {
            inner: TokioAsyncResolver::tokio(config, ResolverOpts::default()),
        })
    }

    fn custom_config(list: &str) -> anyhow::Result<ResolverConfig> {
        let ips: Vec<IpAddr> = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse().with_context(|| format!("resolver address {s}")))
            .collect::<anyhow::Result<_>>()?;
        anyhow::ensure!(!ips.is_empty(), "empty resolver list");
        let group = NameServerConfigGroup::from_ips_clear(&ips, 53, true);
        Ok(ResolverConfig::from_parts(None, Vec::new(), group))
    }
}

#[async_trait]
impl ResolveIpv4 for DnsResolver {
    async fn lookup(&self, host: &str) -> anyhow::Result<Vec<Ipv4Addr>> {
        // Literal addresses skip the resolver.
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Ok(vec![ip]);
        }
        let lookup = self
            .inner
            .ipv4_lookup(host)
            .await
            .with_context(|| format!("resolve {host}"))?;
        let addrs: Vec<Ipv4Addr> = lookup
            .iter()
            .take(MAX_ADDRS_PER_HOST)
            .map(|a| a.0)
            .collect();
        debug!(host, ?addrs, "resolved");
        Ok(addrs)
    }
}

/// Fixed-table resolver for tests.
#[derive(Default)]
pub struct StaticResolver {
    table: HashMap<String, Vec<Ipv4Addr>>,
}

impl StaticResolver {
    pub fn with(mut self, host: &str, addrs: Vec<Ipv4Addr>) -> Self {
        self.table.insert(host.to_lowercase(), addrs);
        self
    }
}

#[async_trait]
impl ResolveIpv4 for StaticResolver {
    async fn lookup(&self, host: &str) -> anyhow::Result<Vec<Ipv4Addr>> {
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Ok(vec![ip]);
        }
        self.table
            .get(&host.to_lowercase())
            .cloned()
            .with_context(|| format!("unknown host {host}"))
    }
}
