//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One timestamped up/down result for an (endpoint, source identity) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    /// Normalized URL of the probed target.
    pub endpoint: String,
    pub observed_at: DateTime<Utc>,
    /// Local address or proxy the check was issued from.
    pub source: String,
    /// True iff the check completed without a transport-level error.
    pub is_up: bool,
}

impl Observation {
    pub fn new(endpoint: impl Into<String>, source: impl Into<String>, is_up: bool) -> Self {
        Self {
            endpoint: endpoint.into(),
            observed_at: Utc::now(),
            source: source.into(),
            is_up,
        }
    }
}
