//! Batch pipeline: fetch → assemble → publish.

pub mod assembler;
pub mod backoff;
pub mod fetcher;
pub mod pool;
pub mod publisher;

pub use assembler::{assemble, check_listing_quota, Assembled, BatchLimits};
pub use backoff::Backoff;
pub use fetcher::{FetchOptions, Fetcher};
pub use pool::{ChannelLease, ChannelPool};
pub use publisher::{PublishOptions, PublishOutcome, Publisher};
