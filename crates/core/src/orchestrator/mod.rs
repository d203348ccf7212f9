//! Resolution pipeline: job resolution, prefetch, fallback and the
//! request-facing [`StreamResolver`].

mod fallback;
mod jobs;
mod prefetch;
mod resolver;
mod types;

pub use fallback::{ChainOutcome, FallbackChain};
pub use jobs::JobResolver;
pub use prefetch::{select_prefetch, PrefetchPlan, Prefetcher};
pub use resolver::{ResolverDeps, ResolverSettings, StreamResolver};
pub use types::*;
