//! Probe module for endpoint liveness checks.
//!
//! A [`Checker`] is bound to one source identity and answers a single
//! question per call: did the endpoint produce a response at all.

mod http;
mod source;

pub use http::*;
pub use source::*;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Probe construction errors. Check failures are never errors; they are
/// reported as down observations.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to resolve source address {address}: {reason}")]
    Resolve { address: String, reason: String },
    #[error("failed to detect local address: {0}")]
    LocalAddress(#[source] std::io::Error),
    #[error("invalid proxy URL {url}: {reason}")]
    Proxy { url: String, reason: String },
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// A liveness check issued from one source identity.
#[async_trait]
pub trait Checker: Send + Sync {
    /// Identity recorded on every observation this checker produces.
    fn source(&self) -> &str;

    /// Returns true if the endpoint answered without a transport error.
    async fn check(&self, endpoint: &str) -> bool;
}

/// Per-check network timeout for a probe period.
///
/// Two thirds of the period, so a hung check cannot overlap the next pass.
pub fn check_timeout(period: Duration) -> Duration {
    period - period / 3
}
