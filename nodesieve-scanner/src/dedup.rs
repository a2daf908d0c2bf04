use crate::descriptor::{Endpoint, NodeDescriptor, Scheme};
use crate::result::ProbeTarget;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

/// Which parts of a node make it unique
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyScope {
    /// `scheme:host:port` - two protocols on one address are kept apart
    #[default]
    SchemeQualified,
    /// `host:port` - the first node seen on an address wins, whatever its protocol
    Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    scheme: Option<Scheme>,
    host: String,
    port: u16,
}

impl IdentityKey {
    /// `None` when the descriptor has no usable host and port
    pub fn of(descriptor: &NodeDescriptor, scope: KeyScope) -> Option<Self> {
        let endpoint = descriptor.endpoint()?;
        Some(Self::new(descriptor.scheme(), &endpoint, scope))
    }

    fn new(scheme: Scheme, endpoint: &Endpoint, scope: KeyScope) -> Self {
        let scheme = match scope {
            KeyScope::SchemeQualified => Some(scheme),
            KeyScope::Address => None,
        };
        Self {
            scheme,
            host: endpoint.host.clone(),
            port: endpoint.port,
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scheme) = self.scheme {
            write!(f, "{}:", scheme)?;
        }
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Output of [`deduplicate`]
#[derive(Debug, Clone, Default)]
pub struct Deduplicated {
    /// One target per identity, in first-seen order
    pub targets: Vec<ProbeTarget>,
    /// Candidates without a usable host/port
    pub invalid: usize,
    /// Later candidates whose identity was already taken
    pub duplicates: usize,
}

/// Reduce candidates to one per identity. The first candidate seen for an
/// identity is kept, so the result depends only on input order.
pub fn deduplicate<I>(candidates: I, scope: KeyScope) -> Deduplicated
where
    I: IntoIterator<Item = NodeDescriptor>,
{
    let mut seen: HashSet<IdentityKey> = HashSet::new();
    let mut result = Deduplicated::default();

    for descriptor in candidates {
        let Some(endpoint) = descriptor.endpoint() else {
            debug!("Dropping node without usable address: {}", descriptor);
            result.invalid += 1;
            continue;
        };

        if !seen.insert(IdentityKey::new(descriptor.scheme(), &endpoint, scope)) {
            result.duplicates += 1;
            continue;
        }

        let ordinal = result.targets.len();
        result.targets.push(ProbeTarget {
            descriptor,
            endpoint,
            ordinal,
        });
    }

    result
}
