pub mod canonicalizer;
pub mod dedup;
pub mod poller;

pub use canonicalizer::{canonicalize, CanonicalizeError};
pub use dedup::{Deduplicator, FEED_CURSOR};
pub use poller::TradePoller;
