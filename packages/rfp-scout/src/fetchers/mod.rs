//! Page fetcher implementations.
//!
//! - `HttpFetcher` - reqwest-backed fetcher
//! - `RateLimitedFetcher` - per-host politeness wrapper
//! - `RobotsCache` - robots.txt compliance for the Deep Scanner

pub mod http;
pub mod rate_limited;
pub mod robots;

pub use http::{HttpFetcher, DEFAULT_USER_AGENT};
pub use rate_limited::RateLimitedFetcher;
pub use robots::{RobotsCache, RobotsTxt};
