use futures::StreamExt;
use futures::stream;
use nodesieve_scanner::{Fetcher, NodeDescriptor, Subscription};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const DEFAULT_FETCH_CONCURRENCY: usize = 8;

pub struct FetchedSubscription {
    pub url: String,
    pub subscription: Subscription,
}

/// A subscription URL whose body could not be retrieved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedFetch {
    pub url: String,
    pub reason: String,
}

#[derive(Default)]
pub struct GatherSummary {
    /// Successful fetches, in subscription list order
    pub fetched: Vec<FetchedSubscription>,
    pub failed: Vec<FailedFetch>,
    pub cancelled: bool,
}

impl GatherSummary {
    /// Every candidate node in discovery order: subscriptions in list
    /// order, each one's nodes in document order
    pub fn candidates(&self) -> impl Iterator<Item = NodeDescriptor> + '_ {
        self.fetched
            .iter()
            .flat_map(|fetched| fetched.subscription.descriptors())
    }

    pub fn failed_urls(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.url.as_str()).collect()
    }
}

/// Fetch every subscription with up to `concurrency` requests in flight.
///
/// Bodies are consumed in list order whatever order the requests finish
/// in. A failed fetch is recorded and contributes no nodes.
pub async fn gather_subscriptions(
    urls: &[String],
    fetcher: &dyn Fetcher,
    concurrency: usize,
    cancel: &CancellationToken,
) -> GatherSummary {
    let mut summary = GatherSummary::default();
    let mut responses = stream::iter(urls.iter().cloned())
        .map(|url| async move {
            let response = fetcher.fetch(&url).await;
            (url, response)
        })
        .buffered(concurrency.max(1));

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                summary.cancelled = true;
                break;
            }
            next = responses.next() => next,
        };

        let Some((url, response)) = next else {
            break;
        };

        match response {
            Ok(body) => {
                let subscription = Subscription::parse(&body);
                let count = subscription.descriptors().count();
                if count > 0 {
                    info!("Fetched {}: {} nodes", url, count);
                } else {
                    warn!("Fetched {} but it lists no supported nodes", url);
                }
                summary.fetched.push(FetchedSubscription { url, subscription });
            }
            Err(e) => {
                warn!("Failed to fetch {}: {}", url, e);
                summary.failed.push(FailedFetch {
                    url,
                    reason: e.to_string(),
                });
            }
        }
    }

    summary
}
