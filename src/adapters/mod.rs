pub mod traits;
pub mod rate_limiter;
pub mod oneinch;
pub mod zeroex;
pub mod paraswap;
pub mod factory;

pub use traits::{AdapterError, AdapterMetrics, QuoteRequest, QuoteSource};
pub use rate_limiter::RateLimiter;
pub use oneinch::OneInchAdapter;
pub use zeroex::ZeroExAdapter;
pub use paraswap::ParaSwapAdapter;
pub use factory::AdapterFactory;
