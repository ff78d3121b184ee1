//! SSRF protection for webhook destinations.
//!
//! Two independent checks guard every target:
//!
//! - [`validate_webhook_url`] runs when a webhook is registered and rejects
//!   URLs that are obviously internal.
//! - [`SafeDialer`] is installed as the HTTP client's resolver, so it runs on
//!   every outbound connect. It rejects the whole connection if *any* answer
//!   is internal, and otherwise hands the client only the first answer. DNS
//!   answers can change after registration, so this is the actual security
//!   boundary. The client's `connect_timeout` bounds the dial itself.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;
use url::{Host, Url};

use crate::error::{ConnectRejection, UrlRejection};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Structural validation of a webhook URL, for the registration path.
pub fn validate_webhook_url(raw: &str) -> Result<Url, UrlRejection> {
    let url = Url::parse(raw).map_err(|e| UrlRejection::Malformed(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(UrlRejection::UnsupportedScheme(other.to_string())),
    }

    match url.host() {
        None => return Err(UrlRejection::MissingHost),
        Some(Host::Domain(domain)) => {
            let host = domain.trim_end_matches('.').to_ascii_lowercase();
            if host.is_empty() {
                return Err(UrlRejection::MissingHost);
            }
            if is_internal_hostname(&host) {
                return Err(UrlRejection::InternalHost(host));
            }
        }
        Some(Host::Ipv4(ip)) => check_literal(IpAddr::V4(ip))?,
        Some(Host::Ipv6(ip)) => check_literal(IpAddr::V6(ip))?,
    }

    Ok(url)
}

fn check_literal(ip: IpAddr) -> Result<(), UrlRejection> {
    if is_blocked_ip(ip) {
        Err(UrlRejection::BlockedAddress(ip))
    } else {
        Ok(())
    }
}

fn is_internal_hostname(host: &str) -> bool {
    host == "localhost"
        || host == "0.0.0.0"
        || host.ends_with(".local")
        || host.ends_with(".internal")
}

/// True for loopback, private, link-local (unicast or multicast) and
/// unspecified addresses. IPv4-mapped IPv6 is judged by its IPv4 form.
pub fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_blocked_v4(v4),
            None => is_blocked_v6(v6),
        },
    }
}

fn is_blocked_v4(ip: Ipv4Addr) -> bool {
    let [a, b, c, _] = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        // 224.0.0.0/24, link-local multicast
        || (a == 224 && b == 0 && c == 0)
}

fn is_blocked_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7, unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10, link-local unicast
        || (first & 0xffc0) == 0xfe80
        // ffx2::/16, link-local multicast
        || (first & 0xff0f) == 0xff02
}

/// Rejects IP-literal hosts that point inside the network.
///
/// The HTTP stack skips DNS for literal hosts, so [`SafeDialer`] never sees
/// them; callers must run this before sending.
pub fn guard_literal_host(url: &Url) -> Result<(), ConnectRejection> {
    let ip = match url.host() {
        Some(Host::Ipv4(ip)) => IpAddr::V4(ip),
        Some(Host::Ipv6(ip)) => IpAddr::V6(ip),
        _ => return Ok(()),
    };

    if is_blocked_ip(ip) {
        warn!(url = %url, ip = %ip, "blocked webhook connection to internal address");
        return Err(ConnectRejection::BlockedAddress {
            host: ip.to_string(),
            ip,
        });
    }
    Ok(())
}

/// Name resolution used by [`SafeDialer`].
#[async_trait]
pub trait HostResolver: Send + Sync + 'static {
    async fn lookup(&self, host: &str) -> std::io::Result<Vec<IpAddr>>;
}

/// The operating system resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn lookup(&self, host: &str) -> std::io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

/// Resolver that refuses internal destinations.
#[derive(Clone)]
pub struct SafeDialer {
    resolver: Arc<dyn HostResolver>,
}

impl Default for SafeDialer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SafeDialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeDialer").finish_non_exhaustive()
    }
}

impl SafeDialer {
    pub fn new() -> Self {
        Self::with_resolver(SystemResolver)
    }

    pub fn with_resolver(resolver: impl HostResolver) -> Self {
        Self {
            resolver: Arc::new(resolver),
        }
    }

    /// Resolve `host` and pick the address to dial.
    ///
    /// Fails closed: one internal answer rejects the whole host, so a
    /// multi-answer record cannot smuggle an internal address past the check.
    pub async fn resolve_host(&self, host: &str) -> Result<IpAddr, ConnectRejection> {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let candidates = self
            .resolver
            .lookup(host)
            .await
            .map_err(|source| ConnectRejection::Resolve {
                host: host.to_string(),
                source,
            })?;

        if let Some(ip) = candidates.iter().copied().find(|ip| is_blocked_ip(*ip)) {
            warn!(host, ip = %ip, "blocked webhook connection to internal address");
            return Err(ConnectRejection::BlockedAddress {
                host: host.to_string(),
                ip,
            });
        }

        candidates
            .first()
            .copied()
            .ok_or_else(|| ConnectRejection::NoAddresses(host.to_string()))
    }
}

impl reqwest::dns::Resolve for SafeDialer {
    fn resolve(&self, name: reqwest::dns::Name) -> reqwest::dns::Resolving {
        let dialer = self.clone();
        Box::pin(async move {
            let ip = dialer
                .resolve_host(name.as_str())
                .await
                .map_err(|e| -> BoxError { Box::new(e) })?;
            // Port 0 is replaced by the connector with the URL's port.
            let addrs: reqwest::dns::Addrs = Box::new(std::iter::once(SocketAddr::new(ip, 0)));
            Ok::<_, BoxError>(addrs)
        })
    }
}
