//! Storage interfaces.
//!
//! The writer only sees [`ObservationSink`] and the aggregator only sees
//! [`RecordSource`], so either side can run against any backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::models::Observation;
use super::store::DbError;

/// Transactional append store for observations.
///
/// A batch is opened with `begin_batch`, filled with `stage`, and made durable
/// by `commit`. Nothing staged into a batch is visible or durable until the
/// commit returns `Ok`.
#[async_trait]
pub trait ObservationSink: Send + Sync {
    type Batch: Send;

    async fn begin_batch(&self) -> Result<Self::Batch, DbError>;

    async fn stage(&self, batch: &mut Self::Batch, observation: Observation)
        -> Result<(), DbError>;

    /// Commit the batch, returning the number of observations persisted.
    async fn commit(&self, batch: Self::Batch) -> Result<usize, DbError>;

    async fn rollback(&self, batch: Self::Batch);
}

/// Time-range reads over stored observations.
pub trait RecordSource {
    /// Return observations with `from <= observed_at <= to`, ordered by
    /// `(endpoint, source, observed_at)` ascending. An empty `endpoints`
    /// slice means all endpoints.
    fn get_records(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        endpoints: &[String],
    ) -> Result<Vec<Observation>, DbError>;
}
