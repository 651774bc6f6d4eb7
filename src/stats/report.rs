//! Text and JSON rendering of uptime stats.

use super::{Interval, Stat};

use chrono::{DateTime, Duration, Local, SecondsFormat, Utc};
use serde::Serialize;
use std::fmt::Write;

const DISPLAY_TIME_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

/// Human-readable duration, e.g. `1h 2m 3s`.
fn format_duration(d: Duration) -> String {
    match d.to_std() {
        Ok(std) => humantime::format_duration(std).to_string(),
        Err(_) => format!("-{}", humantime::format_duration((-d).to_std().unwrap_or_default())),
    }
}

fn format_local(t: DateTime<Utc>) -> String {
    t.with_timezone(&Local).format(DISPLAY_TIME_FORMAT).to_string()
}

/// Render one stat as an indented text block.
pub fn render_text(stat: &Stat) -> String {
    let percent = match stat.uptime_percent() {
        Some(p) => format!("{:.2}%", p),
        None => "n/a".to_string(),
    };

    let mut out = String::new();
    let _ = writeln!(out, "{} [from {}]:", stat.endpoint, stat.source);
    let _ = writeln!(out, "\twhole time: {}", format_duration(stat.whole_time));
    let _ = writeln!(out, "\tuptime: {} ({})", format_duration(stat.up_time), percent);

    if let Some(down) = &stat.longest_down {
        let _ = writeln!(out, "\tlongest downtime {}:", format_duration(down.duration()));
        let _ = writeln!(out, "\t\tfrom: {}", format_local(down.from));
        let _ = writeln!(out, "\t\tto:   {}", format_local(down.to));
    }
    out
}

#[derive(Debug, Serialize)]
struct DowntimeReport {
    from: String,
    to: String,
    duration_secs: f64,
}

#[derive(Debug, Serialize)]
struct StatReport<'a> {
    endpoint: &'a str,
    source: &'a str,
    whole_time_secs: f64,
    up_time_secs: f64,
    uptime_percent: Option<f64>,
    longest_down: Option<DowntimeReport>,
}

fn secs(d: Duration) -> f64 {
    d.num_milliseconds() as f64 / 1000.0
}

impl From<&Interval> for DowntimeReport {
    fn from(interval: &Interval) -> Self {
        Self {
            from: interval.from.to_rfc3339_opts(SecondsFormat::Secs, true),
            to: interval.to.to_rfc3339_opts(SecondsFormat::Secs, true),
            duration_secs: secs(interval.duration()),
        }
    }
}

/// Render stats as a pretty-printed JSON array.
pub fn render_json(stats: &[Stat]) -> serde_json::Result<String> {
    let reports: Vec<StatReport<'_>> = stats
        .iter()
        .map(|s| StatReport {
            endpoint: &s.endpoint,
            source: &s.source,
            whole_time_secs: secs(s.whole_time),
            up_time_secs: secs(s.up_time),
            uptime_percent: s.uptime_percent(),
            longest_down: s.longest_down.as_ref().map(DowntimeReport::from),
        })
        .collect();
    serde_json::to_string_pretty(&reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn stat(up_minutes: i64, down: Option<(u32, u32)>) -> Stat {
        let at = |m: u32| Utc.with_ymd_and_hms(1972, 1, 1, 0, m, 0).unwrap();
        Stat {
            endpoint: "http://test.com/".to_string(),
            source: "127.0.0.1".to_string(),
            whole_time: Duration::minutes(3),
            up_time: Duration::minutes(up_minutes),
            longest_down: down.map(|(from, to)| Interval {
                is_up: false,
                from: at(from),
                to: at(to),
            }),
        }
    }

    #[test]
    fn test_text_with_downtime() {
        let text = render_text(&stat(1, Some((0, 2))));
        assert!(text.starts_with("http://test.com/ [from 127.0.0.1]:\n"));
        assert!(text.contains("\twhole time: 3m\n"));
        assert!(text.contains("\tuptime: 1m (33.33%)\n"));
        assert!(text.contains("\tlongest downtime 2m:\n"));
        assert!(text.contains("\t\tfrom: "));
        assert!(text.contains("\t\tto:   "));
    }

    #[test]
    fn test_text_without_downtime_or_time() {
        let mut s = stat(0, None);
        s.whole_time = Duration::zero();
        let text = render_text(&s);
        assert!(text.contains("(n/a)"));
        assert!(!text.contains("longest downtime"));
    }

    #[test]
    fn test_json_fields() {
        let json = render_json(&[stat(2, Some((2, 3)))]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let first = &value[0];
        assert_eq!(first["endpoint"], "http://test.com/");
        assert_eq!(first["whole_time_secs"], 180.0);
        assert_eq!(first["up_time_secs"], 120.0);
        assert_eq!(first["longest_down"]["from"], "1972-01-01T00:02:00Z");
        assert_eq!(first["longest_down"]["duration_secs"], 60.0);
    }
}
