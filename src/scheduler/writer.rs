//! Batch writer that drains the observation stream into storage.

use crate::db::{DbError, Observation, ObservationSink};

use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Terminal writer errors. The writer does not retry; reconnect policy
/// belongs to whoever owns the storage connection.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("failed to open batch: {0}")]
    Begin(#[source] DbError),
    #[error("failed to stage observation: {0}")]
    Stage(#[source] DbError),
    #[error("failed to commit batch: {0}")]
    Commit(#[source] DbError),
}

/// Run the batch writer until the observation stream closes.
///
/// Observations are staged into an open batch which is committed every
/// `flush_period`, whether or not anything arrived, and once more when the
/// stream closes. Returns the number of observations committed.
///
/// Only observations covered by a successful commit are durable. A stage or
/// commit failure ends the writer; whatever was staged in that batch is lost.
pub async fn run_batch_writer<S: ObservationSink>(
    sink: &S,
    flush_period: Duration,
    mut observations: mpsc::Receiver<Observation>,
) -> Result<u64, WriteError> {
    let mut batch = sink.begin_batch().await.map_err(WriteError::Begin)?;
    let mut committed: u64 = 0;

    let mut ticker = interval_at(Instant::now() + flush_period, flush_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            next = observations.recv() => {
                let Some(observation) = next else {
                    break;
                };
                if let Err(e) = sink.stage(&mut batch, observation).await {
                    tracing::error!("Batch writer: staging failed, abandoning batch: {}", e);
                    sink.rollback(batch).await;
                    return Err(WriteError::Stage(e));
                }
            }
            _ = ticker.tick() => {
                committed += commit(sink, batch).await?;
                batch = sink.begin_batch().await.map_err(WriteError::Begin)?;
            }
        }
    }

    committed += commit(sink, batch).await?;
    tracing::info!("Batch writer: stream closed, {} observations committed", committed);
    Ok(committed)
}

async fn commit<S: ObservationSink>(sink: &S, batch: S::Batch) -> Result<u64, WriteError> {
    match sink.commit(batch).await {
        Ok(n) => {
            tracing::debug!("Batch writer: committed {} observations", n);
            Ok(n as u64)
        }
        Err(e) => {
            tracing::error!("Batch writer: commit failed: {}", e);
            Err(WriteError::Commit(e))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// In-memory sink that records every committed batch.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub batches: Mutex<Vec<Vec<Observation>>>,
        pub fail_stage: AtomicBool,
        pub fail_commit: AtomicBool,
        pub stall_commit: AtomicBool,
        pub rollbacks: AtomicUsize,
    }

    impl RecordingSink {
        pub(crate) fn committed(&self) -> Vec<Observation> {
            self.batches.lock().unwrap().iter().flatten().cloned().collect()
        }
    }

    #[async_trait]
    impl ObservationSink for RecordingSink {
        type Batch = Vec<Observation>;

        async fn begin_batch(&self) -> Result<Vec<Observation>, DbError> {
            Ok(Vec::new())
        }

        async fn stage(&self, batch: &mut Vec<Observation>, observation: Observation) -> Result<(), DbError> {
            if self.fail_stage.load(Ordering::SeqCst) {
                return Err(DbError::Unavailable("stage refused".into()));
            }
            batch.push(observation);
            Ok(())
        }

        async fn commit(&self, batch: Vec<Observation>) -> Result<usize, DbError> {
            if self.stall_commit.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if self.fail_commit.load(Ordering::SeqCst) {
                return Err(DbError::Unavailable("commit refused".into()));
            }
            let n = batch.len();
            self.batches.lock().unwrap().push(batch);
            Ok(n)
        }

        async fn rollback(&self, _batch: Vec<Observation>) {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn obs(endpoint: &str) -> Observation {
        Observation::new(endpoint, "127.0.0.1", true)
    }

    #[tokio::test]
    async fn test_final_commit_on_stream_close() {
        let sink = RecordingSink::default();
        let (tx, rx) = mpsc::channel(16);
        for name in ["http://a.com/", "http://b.com/", "http://c.com/"] {
            tx.send(obs(name)).await.unwrap();
        }
        drop(tx);

        let committed = tokio_test::assert_ok!(
            run_batch_writer(&sink, Duration::from_secs(3600), rx).await
        );
        assert_eq!(committed, 3);

        let endpoints: Vec<String> = sink.committed().into_iter().map(|o| o.endpoint).collect();
        assert_eq!(endpoints, vec!["http://a.com/", "http://b.com/", "http://c.com/"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_period_commits_while_stream_is_open() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = mpsc::channel(16);

        let writer_sink = sink.clone();
        let writer = tokio::spawn(async move {
            run_batch_writer(writer_sink.as_ref(), Duration::from_secs(5), rx).await
        });

        tx.send(obs("http://a.com/")).await.unwrap();
        tx.send(obs("http://b.com/")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5100)).await;
        assert_eq!(sink.committed().len(), 2);

        // Idle periods still commit, just empty batches.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sink.batches.lock().unwrap().len(), 2);

        tx.send(obs("http://c.com/")).await.unwrap();
        drop(tx);
        assert_eq!(writer.await.unwrap().unwrap(), 3);
        assert_eq!(sink.committed().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_failure_is_terminal() {
        let sink = Arc::new(RecordingSink::default());
        sink.fail_commit.store(true, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);

        let writer_sink = sink.clone();
        let writer = tokio::spawn(async move {
            run_batch_writer(writer_sink.as_ref(), Duration::from_secs(1), rx).await
        });

        tx.send(obs("http://a.com/")).await.unwrap();
        let result = writer.await.unwrap();
        assert!(matches!(result, Err(WriteError::Commit(_))));

        // The stream is gone with the writer; producers see it closed.
        assert!(tx.send(obs("http://b.com/")).await.is_err());
        assert!(sink.committed().is_empty());
    }

    #[tokio::test]
    async fn test_stage_failure_abandons_batch() {
        let sink = RecordingSink::default();
        sink.fail_stage.store(true, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);
        tx.send(obs("http://a.com/")).await.unwrap();

        let result = run_batch_writer(&sink, Duration::from_secs(3600), rx).await;
        assert!(matches!(result, Err(WriteError::Stage(_))));
        assert_eq!(sink.rollbacks.load(Ordering::SeqCst), 1);
        assert!(sink.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stalled_commit_fills_stream() {
        let sink = Arc::new(RecordingSink::default());
        sink.stall_commit.store(true, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(4);

        let writer_sink = sink.clone();
        let _writer = tokio::spawn(async move {
            run_batch_writer(writer_sink.as_ref(), Duration::from_millis(20), rx).await
        });

        // Let the writer reach its first (never-returning) commit.
        tokio::time::sleep(Duration::from_millis(100)).await;

        for i in 0..4 {
            tx.try_send(obs(&format!("http://host{}.com/", i))).unwrap();
        }
        assert!(matches!(
            tx.try_send(obs("http://overflow.com/")),
            Err(mpsc::error::TrySendError::Full(_))
        ));
    }
}
