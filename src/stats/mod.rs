//! Uptime statistics reconstructed from stored observations.
//!
//! [`aggregate`] folds an ordered observation sequence into one [`Stat`] per
//! contiguous `(endpoint, source)` group using run-length merging.

mod report;

pub use report::*;

use crate::db::{DbError, Observation, RecordSource};

use chrono::{DateTime, Duration, Utc};

/// A maximal run of observations sharing the same up/down state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub is_up: bool,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl Interval {
    fn open(observation: &Observation) -> Self {
        Self {
            is_up: observation.is_up,
            from: observation.observed_at,
            to: observation.observed_at,
        }
    }

    pub fn duration(&self) -> Duration {
        self.to - self.from
    }
}

/// Uptime summary for one (endpoint, source) group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub endpoint: String,
    pub source: String,
    /// Sum of all interval durations.
    pub whole_time: Duration,
    pub up_time: Duration,
    /// Longest down interval; the earliest one wins ties.
    pub longest_down: Option<Interval>,
}

impl Stat {
    /// Up time as a percentage of whole time, `None` when nothing was measured.
    pub fn uptime_percent(&self) -> Option<f64> {
        let whole = self.whole_time.num_milliseconds();
        if whole <= 0 {
            return None;
        }
        Some(self.up_time.num_milliseconds() as f64 * 100.0 / whole as f64)
    }
}

/// Intervals of one group under construction.
struct GroupFold {
    endpoint: String,
    source: String,
    intervals: Vec<Interval>,
    current: Interval,
    /// Whether `current` has been extended past its first observation.
    extended: bool,
}

impl GroupFold {
    fn start(first: &Observation) -> Self {
        Self {
            endpoint: first.endpoint.clone(),
            source: first.source.clone(),
            intervals: Vec::new(),
            current: Interval::open(first),
            extended: false,
        }
    }

    fn accepts(&self, observation: &Observation) -> bool {
        self.endpoint == observation.endpoint && self.source == observation.source
    }

    fn push(&mut self, observation: &Observation) {
        // A flip closes the running interval at the flipping observation, so
        // consecutive intervals share their boundary.
        self.current.to = observation.observed_at;
        if observation.is_up == self.current.is_up {
            self.extended = true;
        } else {
            self.intervals.push(self.current);
            self.current = Interval::open(observation);
            self.extended = false;
        }
    }

    fn finish(mut self) -> Stat {
        // A trailing single observation has no duration and is dropped.
        if self.extended {
            self.intervals.push(self.current);
        }

        let mut stat = Stat {
            endpoint: self.endpoint,
            source: self.source,
            whole_time: Duration::zero(),
            up_time: Duration::zero(),
            longest_down: None,
        };

        for interval in self.intervals {
            let d = interval.duration();
            stat.whole_time = stat.whole_time + d;
            if interval.is_up {
                stat.up_time = stat.up_time + d;
            } else if stat.longest_down.map_or(true, |l| l.duration() < d) {
                stat.longest_down = Some(interval);
            }
        }

        stat
    }
}

/// Fold observations into per-group stats.
///
/// Input must already be ordered by `(endpoint, source, observed_at)`;
/// non-contiguous runs of the same group are not merged. Stats come out in
/// input group order. Empty input yields no stats.
pub fn aggregate<'a, I>(records: I) -> Vec<Stat>
where
    I: IntoIterator<Item = &'a Observation>,
{
    let mut stats = Vec::new();
    let mut group: Option<GroupFold> = None;

    for record in records {
        if let Some(g) = group.as_mut().filter(|g| g.accepts(record)) {
            g.push(record);
            continue;
        }
        if let Some(done) = group.replace(GroupFold::start(record)) {
            stats.push(done.finish());
        }
    }

    if let Some(done) = group {
        stats.push(done.finish());
    }
    stats
}

/// Runs [`aggregate`] over a time range of stored observations.
pub struct Collector<S> {
    source: S,
}

impl<S: RecordSource> Collector<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn collect(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        endpoints: &[String],
    ) -> Result<Vec<Stat>, DbError> {
        let records = self.source.get_records(from, to, endpoints)?;
        tracing::debug!("Collector: aggregating {} records", records.len());
        Ok(aggregate(&records))
    }
}
