use crate::descriptor::{Endpoint, NodeDescriptor};
use serde::{Deserialize, Serialize};

/// A deduplicated node ready to be probed. `ordinal` is its position in
/// discovery order and breaks latency ties when ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeTarget {
    pub descriptor: NodeDescriptor,
    pub endpoint: Endpoint,
    pub ordinal: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub target: ProbeTarget,
    /// `None` when the node was unreachable, timed out or exceeded the
    /// maximum acceptable delay
    pub latency_ms: Option<u64>,
}

impl ProbeResult {
    pub fn reachable(target: ProbeTarget, latency_ms: u64) -> Self {
        Self {
            target,
            latency_ms: Some(latency_ms),
        }
    }

    pub fn unreachable(target: ProbeTarget) -> Self {
        Self {
            target,
            latency_ms: None,
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.latency_ms.is_some()
    }
}
