//! Source identities: the local address or proxy a check originates from.

use std::fmt;
use std::net::{IpAddr, ToSocketAddrs, UdpSocket};
use url::Url;

use super::ProbeError;

/// Where outgoing checks originate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceIdentity {
    /// Outgoing connections are bound to this local address.
    Local(IpAddr),
    /// Requests go through this proxy.
    Proxy(Url),
    /// Detected default-route address. Connections are left unbound.
    Detected(IpAddr),
}

impl fmt::Display for SourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceIdentity::Local(ip) | SourceIdentity::Detected(ip) => write!(f, "{}", ip),
            SourceIdentity::Proxy(url) => write!(f, "{}", url),
        }
    }
}

/// Resolve configured addresses and proxies into source identities.
///
/// Local addresses come first, then proxies. With neither configured, the
/// default-route local address is detected. Any failure is fatal.
pub fn resolve_sources(ips: &[String], proxies: &[String]) -> Result<Vec<SourceIdentity>, ProbeError> {
    let mut sources = Vec::with_capacity(ips.len() + proxies.len());

    for ip in ips {
        sources.push(SourceIdentity::Local(resolve_local(ip)?));
    }

    for proxy in proxies {
        let url = Url::parse(proxy).map_err(|e| ProbeError::Proxy {
            url: proxy.clone(),
            reason: e.to_string(),
        })?;
        sources.push(SourceIdentity::Proxy(url));
    }

    if sources.is_empty() {
        sources.push(SourceIdentity::Detected(detect_local_address()?));
    }

    Ok(sources)
}

fn resolve_local(address: &str) -> Result<IpAddr, ProbeError> {
    let resolve_err = |reason: String| ProbeError::Resolve {
        address: address.to_string(),
        reason,
    };

    (address, 0u16)
        .to_socket_addrs()
        .map_err(|e| resolve_err(e.to_string()))?
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| resolve_err("no addresses returned".to_string()))
}

/// Find the address the OS would use for outbound traffic.
///
/// Connecting a UDP socket only selects a route; no packet is sent.
fn detect_local_address() -> Result<IpAddr, ProbeError> {
    let socket = UdpSocket::bind("0.0.0.0:0").map_err(ProbeError::LocalAddress)?;
    socket.connect("8.8.8.8:53").map_err(ProbeError::LocalAddress)?;
    let addr = socket.local_addr().map_err(ProbeError::LocalAddress)?;
    Ok(addr.ip())
}
