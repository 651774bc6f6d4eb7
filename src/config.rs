//! Configuration module for uptrail.
//!
//! Flags come from the command line, each with an `UPTRAIL_*` environment
//! fallback. The crawl flags are validated once into an immutable
//! [`CrawlConfig`].

use chrono::{DateTime, Local, NaiveDateTime, NaiveTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use regex::Regex;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Maximum number of lines accepted in an endpoint file.
pub const ENDPOINT_LIMIT: usize = 2000;

const TIME_FORMAT: &str = "%d.%m.%Y %H:%M:%S";
const SHORT_TIME_FORMAT: &str = "%H:%M:%S";

/// Configuration errors. All of them are fatal before probing starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read endpoint file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("endpoint file exceeds {0} lines size limit")]
    TooManyLines(usize),
    #[error("invalid endpoint {endpoint:?}: {reason}")]
    Endpoint { endpoint: String, reason: String },
    #[error("endpoint file contains no endpoints")]
    NoEndpoints,
    #[error("invalid time {0:?}, expected \"DD.MM.YYYY HH:MM:SS\" or \"HH:MM:SS\"")]
    Time(String),
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Parser)]
#[command(name = "uptrail", version, about = "Endpoint uptime crawler and reporter")]
pub struct Args {
    /// Path to the SQLite database file
    #[arg(long, env = "UPTRAIL_DB_PATH", default_value = "uptrail.db", global = true)]
    pub db: PathBuf,

    /// Database connection attempts at startup, one second apart
    #[arg(long, env = "UPTRAIL_DB_RETRIES", default_value_t = 5, global = true)]
    pub db_retries: u32,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Probe endpoints periodically and record up/down observations
    Crawl(CrawlArgs),
    /// Report uptime statistics for a time range
    Stat(StatArgs),
}

#[derive(Debug, clap::Args)]
pub struct CrawlArgs {
    /// File with endpoints to monitor, one per line
    #[arg(long, env = "UPTRAIL_CONFIG")]
    pub config: PathBuf,

    /// Probe period; also bounds each check's timeout
    #[arg(long, env = "UPTRAIL_PERIOD", default_value = "30s", value_parser = humantime::parse_duration)]
    pub period: Duration,

    /// How often staged observations are committed
    #[arg(long, env = "UPTRAIL_FLUSH_PERIOD", default_value = "5s", value_parser = humantime::parse_duration)]
    pub flush_period: Duration,

    /// Comma-separated local addresses to probe from
    #[arg(long, env = "UPTRAIL_IPS", value_delimiter = ',')]
    pub ips: Vec<String>,

    /// Comma-separated proxy URLs to probe through
    #[arg(long, env = "UPTRAIL_PROXIES", value_delimiter = ',')]
    pub proxies: Vec<String>,

    /// Follow HTTP redirects instead of treating them as the response
    #[arg(long, env = "UPTRAIL_FOLLOW_REDIRECTS")]
    pub follow_redirects: bool,

    /// Concurrent workers per source identity
    #[arg(long, env = "UPTRAIL_WORKERS", default_value_t = 10)]
    pub workers: usize,
}

#[derive(Debug, clap::Args)]
pub struct StatArgs {
    /// Range start, "DD.MM.YYYY HH:MM:SS" or "HH:MM:SS" (today), local time
    #[arg(long)]
    pub from: String,

    /// Range end in the same format, now by default
    #[arg(long)]
    pub to: Option<String>,

    /// Print stats as JSON
    #[arg(long)]
    pub json: bool,

    /// Endpoints to report on; all when empty
    pub endpoints: Vec<String>,
}

/// Validated crawl settings, built once at startup.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub endpoints: Vec<String>,
    pub ips: Vec<String>,
    pub proxies: Vec<String>,
    pub period: Duration,
    pub flush_period: Duration,
    pub follow_redirects: bool,
    pub workers: usize,
}

impl CrawlConfig {
    /// Validate flags and load the endpoint file.
    pub fn load(args: &CrawlArgs) -> Result<Self, ConfigError> {
        if args.period.is_zero() {
            return Err(ConfigError::Invalid("period must be greater than zero".into()));
        }
        if args.flush_period.is_zero() {
            return Err(ConfigError::Invalid("flush period must be greater than zero".into()));
        }
        if args.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }

        let endpoints = load_endpoints(&args.config)?;
        if endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }

        Ok(Self {
            endpoints,
            ips: non_empty(&args.ips),
            proxies: non_empty(&args.proxies),
            period: args.period,
            flush_period: args.flush_period,
            follow_redirects: args.follow_redirects,
            workers: args.workers,
        })
    }
}

fn non_empty(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read and normalize the endpoint file at `path`.
pub fn load_endpoints(path: &Path) -> Result<Vec<String>, ConfigError> {
    let read_err = |source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    };
    let file = File::open(path).map_err(read_err)?;
    parse_endpoints(BufReader::new(file)).map_err(|e| match e {
        ConfigError::Read { source, .. } => read_err(source),
        other => other,
    })
}

/// Parse one endpoint per line. Blank lines and `#` comments are skipped.
pub fn parse_endpoints<R: BufRead>(reader: R) -> Result<Vec<String>, ConfigError> {
    let mut endpoints = Vec::new();

    for (i, line) in reader.lines().enumerate() {
        if i == ENDPOINT_LIMIT {
            return Err(ConfigError::TooManyLines(ENDPOINT_LIMIT));
        }
        let line = line.map_err(|source| ConfigError::Read {
            path: String::new(),
            source,
        })?;

        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        endpoints.push(normalize_endpoint(line)?);
    }

    Ok(endpoints)
}

fn scheme_regex() -> &'static Regex {
    static SCHEME: OnceLock<Regex> = OnceLock::new();
    SCHEME.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://").unwrap())
}

/// Normalize an endpoint to a full URL, assuming `http://` when no scheme
/// is given.
pub fn normalize_endpoint(raw: &str) -> Result<String, ConfigError> {
    let raw = raw.trim();
    let candidate = if scheme_regex().is_match(raw) {
        raw.to_string()
    } else {
        format!("http://{}", raw)
    };

    let url = Url::parse(&candidate).map_err(|e| ConfigError::Endpoint {
        endpoint: raw.to_string(),
        reason: e.to_string(),
    })?;
    if url.host_str().is_none() {
        return Err(ConfigError::Endpoint {
            endpoint: raw.to_string(),
            reason: "missing host".into(),
        });
    }
    Ok(url.to_string())
}

/// Parse a report time argument in local time.
///
/// `HH:MM:SS` alone means that time today.
pub fn parse_time_arg(raw: &str, now: DateTime<Local>) -> Result<DateTime<Utc>, ConfigError> {
    let naive = NaiveDateTime::parse_from_str(raw, TIME_FORMAT)
        .or_else(|_| {
            NaiveTime::parse_from_str(raw, SHORT_TIME_FORMAT)
                .map(|t| now.date_naive().and_time(t))
        })
        .map_err(|_| ConfigError::Time(raw.to_string()))?;

    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| ConfigError::Time(raw.to_string()))
}
