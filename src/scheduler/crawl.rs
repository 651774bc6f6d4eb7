//! Wires the probe engine to the batch writer.

use super::{run_batch_writer, ProbeEngine, WriteError, OBSERVATION_BUFFER};
use crate::db::ObservationSink;

use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Probe and persist until `shutdown` resolves or the writer fails.
///
/// Either way the engine is stopped, its in-flight checks drain into the
/// writer, and the writer's outcome is returned: the committed count on a
/// clean stop, or the writer's terminal error.
pub async fn run_crawler<S, F>(
    engine: ProbeEngine,
    sink: &S,
    flush_period: Duration,
    shutdown: F,
) -> Result<u64, WriteError>
where
    S: ObservationSink,
    F: Future<Output = ()>,
{
    let (observation_tx, observation_rx) = mpsc::channel(OBSERVATION_BUFFER);
    let (stop_tx, stop_rx) = watch::channel(false);

    let probing = tokio::spawn(async move { engine.run(observation_tx, stop_rx).await });

    let writer = run_batch_writer(sink, flush_period, observation_rx);
    tokio::pin!(writer);
    tokio::pin!(shutdown);

    let early = tokio::select! {
        _ = &mut shutdown => {
            tracing::info!("Crawler: shutdown requested, stopping probes");
            None
        }
        result = &mut writer => {
            tracing::error!("Crawler: writer stopped, stopping probes");
            Some(result)
        }
    };

    let _ = stop_tx.send(true);

    match early {
        Some(result) => {
            if let Err(e) = probing.await {
                tracing::error!("Crawler: probe engine task failed: {}", e);
            }
            result
        }
        None => {
            // The writer keeps draining while workers finish in-flight checks.
            let (result, joined) = tokio::join!(writer, probing);
            if let Err(e) = joined {
                tracing::error!("Crawler: probe engine task failed: {}", e);
            }
            result
        }
    }
}
