//! Reads back the published records of a node and condenses them into a trend summary.
use std::fmt;

use serde_json::Value;

use crate::path::NodePath;
use crate::record::fahrenheit_to_celsius;
use crate::sync::{Datastore, PublishError};

#[derive(Debug, Clone, PartialEq, Default)]
/// A stored record converted back to metric units. Missing fields stay `None`.
pub struct Sample {
    pub ts: Option<f64>,
    pub moisture: Option<f64>,
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub light_lux: Option<f64>,
}

impl Sample {
    pub fn from_value(value: &Value) -> Self {
        let number = |key: &str| value.get(key).and_then(Value::as_f64);
        Sample {
            ts: number("ts"),
            moisture: number("soil"),
            temperature_c: number("temp").map(fahrenheit_to_celsius),
            humidity_pct: number("hum"),
            light_lux: number("light"),
        }
    }

    /// One line `moisture=..%, tempC=.., humidity=..%, light_lux=..` rounded for display.
    pub fn snapshot_line(&self) -> String {
        format!("moisture={}%, tempC={}, humidity={}%, light_lux={}",
                format_opt(self.moisture, 1), format_opt(self.temperature_c, 1),
                format_opt(self.humidity_pct, 1), format_opt(self.light_lux, 0))
    }
}

/// Converts the history collection (push key to record) into samples sorted by timestamp.
///
/// Entries without a timestamp are dropped.
pub fn history_samples(history: &Value) -> Vec<Sample> {
    let mut samples: Vec<Sample> = match history.as_object() {
        Some(entries) => entries.values()
            .filter(|entry| entry.is_object())
            .map(Sample::from_value)
            .filter(|sample| sample.ts.is_some())
            .collect(),
        None => Vec::new(),
    };
    samples.sort_by(|a, b| a.ts.partial_cmp(&b.ts).unwrap_or(std::cmp::Ordering::Equal));
    samples
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    /// Change per hour between the first and the last point.
    pub slope_per_hour: Option<f64>,
}

impl MetricStats {
    fn from_series(series: &[(f64, f64)]) -> Option<Self> {
        if series.is_empty() {
            return None;
        }
        let values = series.iter().map(|(_, value)| *value);
        let min = values.clone().fold(f64::INFINITY, f64::min);
        let max = values.clone().fold(f64::NEG_INFINITY, f64::max);
        let avg = values.sum::<f64>() / series.len() as f64;
        Some(MetricStats { min, max, avg, slope_per_hour: slope_per_hour(series) })
    }
}

fn slope_per_hour(series: &[(f64, f64)]) -> Option<f64> {
    if series.len() < 2 {
        return None;
    }
    let (t0, v0) = series[0];
    let (t1, v1) = series[series.len() - 1];
    let hours = (t1 - t0).max(1e-6) / 3600.0;
    Some((v1 - v0) / hours)
}

fn series(samples: &[Sample], metric: fn(&Sample) -> Option<f64>) -> Vec<(f64, f64)> {
    samples.iter()
        .filter_map(|sample| match (sample.ts, metric(sample)) {
            (Some(ts), Some(value)) => Some((ts, value)),
            _ => None,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum HistorySummary {
    NoHistory,
    InsufficientPoints,
    Window {
        hours: f64,
        moisture: Option<MetricStats>,
        temperature_c: Option<MetricStats>,
        humidity_pct: Option<MetricStats>,
        light_lux: Option<MetricStats>,
    },
}

/// Summarizes the last `limit` samples. A `limit` of zero uses all of them.
pub fn describe_history(samples: &[Sample], limit: usize) -> HistorySummary {
    if samples.is_empty() {
        return HistorySummary::NoHistory;
    }
    let recent = if limit > 0 && samples.len() > limit { &samples[samples.len() - limit..] } else { samples };
    if recent.len() < 2 {
        return HistorySummary::InsufficientPoints;
    }

    let first = recent[0].ts.unwrap_or_default();
    let last = recent[recent.len() - 1].ts.unwrap_or_default();

    HistorySummary::Window {
        hours: ((last - first) / 3600.0).max(0.0),
        moisture: MetricStats::from_series(&series(recent, |s| s.moisture)),
        temperature_c: MetricStats::from_series(&series(recent, |s| s.temperature_c)),
        humidity_pct: MetricStats::from_series(&series(recent, |s| s.humidity_pct)),
        light_lux: MetricStats::from_series(&series(recent, |s| s.light_lux)),
    }
}

fn format_opt(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(value) => format!("{:.*}", precision, value),
        None => String::from("NA"),
    }
}

fn format_metric(f: &mut fmt::Formatter<'_>, label: &str, unit: &str, stats: &Option<MetricStats>, precision: usize) -> fmt::Result {
    let (avg, min, max, slope) = match stats {
        Some(stats) => (Some(stats.avg), Some(stats.min), Some(stats.max), stats.slope_per_hour),
        None => (None, None, None, None),
    };
    write!(f, "{} avg {}{} (min {} max {}), trend {}{}/h",
           label, format_opt(avg, precision), unit, format_opt(min, precision),
           format_opt(max, precision), format_opt(slope, precision), unit)
}

impl fmt::Display for HistorySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistorySummary::NoHistory => f.write_str("no_history"),
            HistorySummary::InsufficientPoints => f.write_str("insufficient_points"),
            HistorySummary::Window { hours, moisture, temperature_c, humidity_pct, light_lux } => {
                write!(f, "window={:.1}h; ", hours)?;
                format_metric(f, "moisture", "%", moisture, 1)?;
                f.write_str("; ")?;
                format_metric(f, "tempC", "°C", temperature_c, 1)?;
                f.write_str("; ")?;
                format_metric(f, "humidity", "%", humidity_pct, 1)?;
                f.write_str("; ")?;
                format_metric(f, "light", " lux", light_lux, 0)?;
                f.write_str(".")
            }
        }
    }
}

/// Latest snapshot and sorted history of one node.
///
/// Without a snapshot the last history point stands in for it.
pub fn fetch(store: &dyn Datastore, node: &NodePath, auth: Option<&str>) -> Result<(Option<Sample>, Vec<Sample>), PublishError> {
    let latest = store.get(&node.latest(), auth)?;
    let history = history_samples(&store.get(&node.history(), auth)?);

    let latest = match latest {
        Value::Object(ref entries) if !entries.is_empty() => Some(Sample::from_value(&latest)),
        _ => history.last().cloned(),
    };
    Ok((latest, history))
}
