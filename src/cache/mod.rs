//! Cache module for short-lived upstream responses
//!
//! This module provides an in-memory cache with per-entry TTL values and a generic
//! cache-then-fetch pipeline. Expired entries are still readable with an
//! `is_expired` flag, allowing stale data to be served when an upstream is down.

mod fetcher;
mod manager;

pub use fetcher::{CachedFetcher, ParseFn};
pub use manager::{CachedData, ResponseCache};
