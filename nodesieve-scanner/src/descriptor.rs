use crate::codec::decode_base64_text;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use url::{Host, Url};

/// Supported proxy protocols, recognised by their `<scheme>://` prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Vmess,
    #[serde(rename = "ss")]
    Shadowsocks,
    Trojan,
    Vless,
    Hysteria,
    Hysteria2,
    Tuic,
}

impl Scheme {
    pub const ALL: [Scheme; 7] = [
        Scheme::Vmess,
        Scheme::Shadowsocks,
        Scheme::Trojan,
        Scheme::Vless,
        Scheme::Hysteria,
        Scheme::Hysteria2,
        Scheme::Tuic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Vmess => "vmess",
            Scheme::Shadowsocks => "ss",
            Scheme::Trojan => "trojan",
            Scheme::Vless => "vless",
            Scheme::Hysteria => "hysteria",
            Scheme::Hysteria2 => "hysteria2",
            Scheme::Tuic => "tuic",
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            Scheme::Vmess => "vmess://",
            Scheme::Shadowsocks => "ss://",
            Scheme::Trojan => "trojan://",
            Scheme::Vless => "vless://",
            Scheme::Hysteria => "hysteria://",
            Scheme::Hysteria2 => "hysteria2://",
            Scheme::Tuic => "tuic://",
        }
    }

    /// Match a line against the supported prefixes (case-sensitive)
    pub fn detect(line: &str) -> Option<Scheme> {
        Self::ALL
            .into_iter()
            .find(|scheme| line.starts_with(scheme.prefix()))
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A network address a node can be probed at. Hosts are lower-cased and
/// IPv6 literals are stored without brackets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Returns `None` for an empty host or a port outside `1..=65535`.
    pub fn new(host: &str, port: u64) -> Option<Self> {
        let host = host
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']');
        if host.is_empty() || port == 0 || port > u64::from(u16::MAX) {
            return None;
        }
        Some(Self {
            host: host.to_ascii_lowercase(),
            port: port as u16,
        })
    }

    /// Parse `host:port` or `[v6]:port`
    pub fn from_host_port(address: &str) -> Option<Self> {
        let (host, port) = address.trim().rsplit_once(':')?;
        Self::new(host, port.parse().ok()?)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A single node line from a subscription, kept verbatim
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeDescriptor {
    raw: String,
    scheme: Scheme,
}

impl NodeDescriptor {
    /// Accepts a trimmed line if it starts with a supported scheme prefix
    pub fn parse(line: &str) -> Option<Self> {
        let scheme = Scheme::detect(line)?;
        Some(Self {
            raw: line.to_string(),
            scheme,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Extract the address this node listens on.
    ///
    /// URI authorities (`scheme://user@host:port`) are tried first. A URI
    /// with an out-of-range port is invalid outright. Descriptors without
    /// an authority fall back to the base64 payload forms used by vmess
    /// (JSON) and legacy shadowsocks (`method:password@host:port`).
    pub fn endpoint(&self) -> Option<Endpoint> {
        match Url::parse(&self.raw) {
            Ok(url) => {
                if let Some(endpoint) = endpoint_from_url(&url) {
                    return Some(endpoint);
                }
                if url.port().is_some() {
                    return None;
                }
            }
            Err(url::ParseError::InvalidPort) => return None,
            Err(_) => {}
        }

        let payload = &self.raw[self.scheme.prefix().len()..];
        match self.scheme {
            Scheme::Vmess => vmess_endpoint(payload),
            Scheme::Shadowsocks => legacy_ss_endpoint(payload),
            _ => None,
        }
    }
}

impl fmt::Display for NodeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn endpoint_from_url(url: &Url) -> Option<Endpoint> {
    let port = url.port()?;
    let host = match url.host()? {
        Host::Domain(domain) => domain.to_string(),
        Host::Ipv4(ip) => ip.to_string(),
        Host::Ipv6(ip) => ip.to_string(),
    };
    Endpoint::new(&host, port.into())
}

fn vmess_endpoint(payload: &str) -> Option<Endpoint> {
    let json = decode_base64_text(payload)?;
    let value: Value = serde_json::from_str(&json).ok()?;
    let host = value.get("add")?.as_str()?;
    let port = match value.get("port")? {
        Value::Number(number) => number.as_u64()?,
        Value::String(text) => text.trim().parse().ok()?,
        _ => return None,
    };
    Endpoint::new(host, port)
}

fn legacy_ss_endpoint(payload: &str) -> Option<Endpoint> {
    let encoded = payload.split(['#', '?']).next()?;
    let decoded = decode_base64_text(encoded)?;
    let (_, address) = decoded.rsplit_once('@')?;
    Endpoint::from_host_port(address)
}
