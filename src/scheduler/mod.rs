//! Scheduler module for running probes and persisting their results.

mod crawl;
mod writer;

pub use crawl::*;
pub use writer::*;

use crate::config::CrawlConfig;
use crate::db::Observation;
use crate::probe::{check_timeout, resolve_sources, Checker, HttpChecker, ProbeError};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;

/// Capacity of the observation stream between engine and writer.
pub const OBSERVATION_BUFFER: usize = 500;

/// Capacity of each source identity's work queue.
const WORK_QUEUE_CAPACITY: usize = 500;

/// Upper bound for the random delay before a worker's first pull.
const MAX_START_JITTER_MS: u64 = 100;

type WorkQueue = Arc<Mutex<mpsc::Receiver<String>>>;

/// Periodically checks every endpoint from every source identity.
///
/// Each source identity gets its own work queue and worker pool. A feeder
/// refills the queue with the full endpoint list once per period; workers
/// pull endpoints, check them, and emit one [`Observation`] per check.
pub struct ProbeEngine {
    endpoints: Arc<[String]>,
    checkers: Vec<Arc<dyn Checker>>,
    period: Duration,
    workers: usize,
}

impl ProbeEngine {
    /// Build HTTP checkers for every configured source identity.
    ///
    /// Fails if any source address cannot be resolved or any proxy is invalid.
    pub fn new(config: &CrawlConfig) -> Result<Self, ProbeError> {
        let sources = resolve_sources(&config.ips, &config.proxies)?;
        let timeout = check_timeout(config.period);

        let checkers = sources
            .iter()
            .map(|source| {
                tracing::info!("Probe engine: using source identity {}", source);
                HttpChecker::new(source, timeout, config.follow_redirects)
                    .map(|c| Arc::new(c) as Arc<dyn Checker>)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::with_checkers(
            config.endpoints.clone(),
            checkers,
            config.period,
            config.workers,
        ))
    }

    pub fn with_checkers(
        endpoints: Vec<String>,
        checkers: Vec<Arc<dyn Checker>>,
        period: Duration,
        workers: usize,
    ) -> Self {
        Self {
            endpoints: endpoints.into(),
            checkers,
            period,
            workers: workers.max(1),
        }
    }

    /// Probe until `shutdown` flips to true (or its sender is dropped).
    ///
    /// Returns once every feeder and worker has exited. In-flight checks are
    /// allowed to finish and emit; endpoints still queued are discarded. The
    /// observation stream closes when this returns.
    pub async fn run(&self, observations: mpsc::Sender<Observation>, shutdown: watch::Receiver<bool>) {
        let mut tasks = JoinSet::new();

        for checker in &self.checkers {
            let (queue_tx, queue_rx) = mpsc::channel(WORK_QUEUE_CAPACITY);
            let queue: WorkQueue = Arc::new(Mutex::new(queue_rx));

            for _ in 0..self.workers {
                tasks.spawn(run_worker(
                    checker.clone(),
                    queue.clone(),
                    observations.clone(),
                    shutdown.clone(),
                ));
            }

            tasks.spawn(run_feeder(
                self.endpoints.clone(),
                self.period,
                queue_tx,
                shutdown.clone(),
            ));
        }
        drop(observations);

        tracing::info!(
            "Probe engine: {} endpoints, {} source(s), {} workers each, period {:?}",
            self.endpoints.len(),
            self.checkers.len(),
            self.workers,
            self.period
        );

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Probe engine: task failed: {}", e);
            }
        }

        tracing::info!("Probe engine stopped");
    }
}

/// Resolves once shutdown is requested or the signal owner is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Push one full pass of endpoints into the work queue per tick.
///
/// A full queue blocks the feeder, so a slow pass delays the next one instead
/// of growing a backlog; leftover endpoints are consumed before new ones.
async fn run_feeder(
    endpoints: Arc<[String]>,
    period: Duration,
    queue: mpsc::Sender<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => return,
            _ = interval.tick() => {}
        }

        for endpoint in endpoints.iter() {
            tokio::select! {
                biased;
                _ = stopped(&mut shutdown) => return,
                sent = queue.send(endpoint.clone()) => {
                    if sent.is_err() {
                        // Every worker is gone.
                        return;
                    }
                }
            }
        }
    }
}

async fn run_worker(
    checker: Arc<dyn Checker>,
    queue: WorkQueue,
    observations: mpsc::Sender<Observation>,
    mut shutdown: watch::Receiver<bool>,
) {
    let jitter = rand::random::<u64>() % MAX_START_JITTER_MS;
    tokio::time::sleep(Duration::from_millis(jitter)).await;

    loop {
        let endpoint = tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => break,
            next = pull(&queue) => match next {
                Some(endpoint) => endpoint,
                None => break,
            },
        };

        let is_up = checker.check(&endpoint).await;
        let observation = Observation::new(endpoint, checker.source(), is_up);

        // Blocks while the stream is full.
        if observations.send(observation).await.is_err() {
            tracing::warn!(
                "Probe engine: observation stream closed, stopping worker for {}",
                checker.source()
            );
            break;
        }
    }
}

async fn pull(queue: &Mutex<mpsc::Receiver<String>>) -> Option<String> {
    queue.lock().await.recv().await
}
