use nodesieve_scanner::{NodeDescriptor, ProbeResult};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_RETAINED: usize = 6666;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedNode {
    pub descriptor: NodeDescriptor,
    pub latency_ms: u64,
}

/// Keep reachable nodes only, fastest first, at most `max_retained`.
///
/// Equal latencies are ordered by discovery ordinal, so the ranking does
/// not depend on the order probes happened to finish in.
pub fn rank(results: Vec<ProbeResult>, max_retained: usize) -> Vec<RankedNode> {
    let mut reachable: Vec<_> = results
        .into_iter()
        .filter_map(|result| result.latency_ms.map(|ms| (ms, result.target)))
        .collect();

    reachable.sort_by_key(|(latency_ms, target)| (*latency_ms, target.ordinal));
    reachable.truncate(max_retained);

    reachable
        .into_iter()
        .map(|(latency_ms, target)| RankedNode {
            descriptor: target.descriptor,
            latency_ms,
        })
        .collect()
}
