pub mod codec;
pub mod dedup;
pub mod descriptor;
pub mod error;
pub mod fetch;
pub mod parser;
pub mod prober;
pub mod result;

pub use dedup::{Deduplicated, IdentityKey, KeyScope, deduplicate};
pub use descriptor::{Endpoint, NodeDescriptor, Scheme};
pub use error::ScanError;
pub use fetch::{Fetcher, HttpFetcher};
pub use parser::Subscription;
pub use prober::{Connector, ProbeOutcome, ProbeProgress, Prober, ProgressCallback, TcpConnector};
pub use result::{ProbeResult, ProbeTarget};
