//! Seed address resolution.
//!
//! Turns configured `host:port` seeds into dialable `ip:port` strings. A seed
//! may be a literal address or a DNS name that expands to many addresses
//! (e.g. a headless service). Resolution is stateless and is re-run on every
//! join attempt and every refresh tick.

use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ClusterError;

/// DNS lookup capability used by [`resolve_peers`].
#[async_trait::async_trait]
pub trait HostResolver: Send + Sync {
    /// Look up all IP addresses for `host`.
    async fn lookup_ip(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the operating system (`getaddrinfo`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait::async_trait]
impl HostResolver for SystemResolver {
    async fn lookup_ip(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let mut ips: Vec<IpAddr> = Vec::new();
        for addr in tokio::net::lookup_host((host, 0)).await? {
            if !ips.contains(&addr.ip()) {
                ips.push(addr.ip());
            }
        }
        Ok(ips)
    }
}

/// Split `host:port` (or `[v6]:port`) into its host and numeric port.
pub fn split_host_port(addr: &str) -> Result<(&str, u16), String> {
    let (host, port) = if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| "missing ']' in address".to_string())?;
        let port = tail
            .strip_prefix(':')
            .ok_or_else(|| "missing port in address".to_string())?;
        (host, port)
    } else {
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| "missing port in address".to_string())?;
        if host.contains(':') {
            return Err("too many colons in address".to_string());
        }
        (host, port)
    };

    let port = port
        .parse::<u16>()
        .map_err(|e| format!("invalid port {port:?}: {e}"))?;
    Ok((host, port))
}

/// Resolve seeds into dialable `ip:port` strings, preserving seed order.
///
/// - A seed that cannot be split into host and port fails the whole batch.
/// - A lookup that errors means the seed is used as a literal address.
/// - A lookup that succeeds with zero addresses is retried every
///   `retry_interval` until it yields an address or `cancel` completes; on
///   cancellation the last lookup outcome is reported.
pub async fn resolve_peers<F>(
    seeds: &[String],
    resolver: &dyn HostResolver,
    retry_interval: Duration,
    cancel: F,
) -> Result<Vec<String>, ClusterError>
where
    F: Future<Output = ()>,
{
    tokio::pin!(cancel);
    let mut resolved = Vec::new();

    for seed in seeds {
        let (host, port) = split_host_port(seed).map_err(|reason| ClusterError::AddressFormat {
            addr: seed.clone(),
            reason,
        })?;

        let ips = match resolver.lookup_ip(host).await {
            Err(e) => {
                debug!(%seed, %e, "lookup failed, assuming direct address");
                resolved.push(seed.clone());
                continue;
            }
            Ok(ips) if ips.is_empty() => {
                retry_lookup(host, resolver, retry_interval, cancel.as_mut()).await?
            }
            Ok(ips) => ips,
        };

        resolved.extend(ips.into_iter().map(|ip| SocketAddr::new(ip, port).to_string()));
    }

    Ok(resolved)
}

/// Repeat a lookup that returned nothing until it returns something.
///
/// The first retry happens immediately.
async fn retry_lookup<F>(
    host: &str,
    resolver: &dyn HostResolver,
    interval: Duration,
    mut cancel: Pin<&mut F>,
) -> Result<Vec<IpAddr>, ClusterError>
where
    F: Future<Output = ()>,
{
    let mut last;
    loop {
        match resolver.lookup_ip(host).await {
            Ok(ips) if !ips.is_empty() => return Ok(ips),
            Ok(_) => {
                debug!(host, "lookup returned no addresses, retrying");
                last = String::from("empty address list");
            }
            Err(e) => {
                warn!(host, %e, "lookup failed, retrying");
                last = e.to_string();
            }
        }

        tokio::select! {
            biased;
            _ = &mut cancel => {
                return Err(ClusterError::DnsResolution {
                    host: host.to_string(),
                    reason: last,
                });
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
