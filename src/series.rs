/*!
 * Series identity and assembly.
 * Samples that share a canonical key (metric name plus sorted labels) are folded into one [`Series`],
 * whose points are then stably sorted by time.
 */

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::{
    error::ParseError,
    sample::{MetricKind, Sample},
};

/// One (timestamp, value) observation inside a series
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl From<(DateTime<Utc>, f64)> for Point {
    fn from(value: (DateTime<Utc>, f64)) -> Self {
        Point {
            timestamp: value.0,
            value: value.1,
        }
    }
}

/// The time-ordered values of a single metric name + label set.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: String,
    pub kind: MetricKind,
    pub labels: BTreeMap<String, String>,
    /// sorted ascending by timestamp, duplicate instants are kept
    pub data: Vec<Point>,
}

impl Series {
    /// The canonical identity of this series
    pub fn key(&self) -> String {
        format_series_key(&self.name, &self.labels)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The value of the most recent point, if any
    pub fn latest(&self) -> Option<f64> {
        self.data.last().map(|p| p.value)
    }
}

/// An inclusive time interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        TimeRange { start, end }
    }

    /// A zero-width range sitting on a single instant
    pub fn at(ts: DateTime<Utc>) -> Self {
        TimeRange { start: ts, end: ts }
    }

    /// Widen the range so it covers `ts`
    pub fn extend(&mut self, ts: DateTime<Utc>) {
        if ts < self.start {
            self.start = ts;
        }
        if ts > self.end {
            self.end = ts;
        }
    }

    pub fn span(&self) -> Duration {
        self.end - self.start
    }
}

/// Render the canonical key for a metric name and label set: `name{a="1",b="2"}`, or just `name`
/// when there are no labels. Labels are sorted by key first, so the order they arrive in never matters.
pub fn format_series_key<I, K, V>(name: &str, labels: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut pairs: Vec<(K, V)> = labels.into_iter().collect();
    if pairs.is_empty() {
        return name.to_string();
    }
    pairs.sort_by(|a, b| a.0.as_ref().cmp(b.0.as_ref()));

    let rendered: Vec<String> = pairs
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k.as_ref(), v.as_ref()))
        .collect();

    format!("{}{{{}}}", name, rendered.join(","))
}

/// The output of the assembler
#[derive(Debug)]
pub struct Assembled {
    /// in order of first appearance in the input
    pub series: Vec<Series>,
    pub time_range: TimeRange,
    pub total_samples: usize,
}

/// Fold samples into series, and track the global time range in the same pass.
/// Metadata (kind, labels) comes from the first sample seen for a key.
pub fn assemble(samples: Vec<Sample>) -> Result<Assembled, ParseError> {
    let total_samples = samples.len();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut series: Vec<Series> = Vec::new();
    let mut range: Option<TimeRange> = None;
    let mut kind_conflicts: HashSet<usize> = HashSet::new();

    for sample in samples {
        match range.as_mut() {
            Some(r) => r.extend(sample.timestamp),
            None => range = Some(TimeRange::at(sample.timestamp)),
        }

        let key = format_series_key(&sample.name, &sample.labels);
        let point = Point {
            timestamp: sample.timestamp,
            value: sample.value,
        };

        match index.get(&key) {
            Some(&idx) => {
                let existing = &mut series[idx];
                if existing.kind != sample.kind && kind_conflicts.insert(idx) {
                    warn!(
                        "series {} seen as {} and {}, keeping {}",
                        key, existing.kind, sample.kind, existing.kind
                    );
                }
                existing.data.push(point);
            }
            None => {
                index.insert(key, series.len());
                series.push(Series {
                    name: sample.name,
                    kind: sample.kind,
                    labels: sample.labels,
                    data: vec![point],
                });
            }
        }
    }

    // sort_by_key is stable, equal instants keep their input order
    for s in &mut series {
        s.data.sort_by_key(|p| p.timestamp);
    }

    let time_range = range.ok_or(ParseError::EmptyInput)?;
    debug!(
        "assembled {} samples into {} series",
        total_samples,
        series.len()
    );

    Ok(Assembled {
        series,
        time_range,
        total_samples,
    })
}

/// Turn a cumulative counter into per-interval increments.
/// The first point is consumed, and decreases (counter resets) are clamped to zero.
/// Callers are expected to only pass COUNTER series.
pub fn to_delta(series: &Series) -> Series {
    if series.data.len() <= 1 {
        return series.clone();
    }

    let data = series
        .data
        .windows(2)
        .map(|pair| Point {
            timestamp: pair[1].timestamp,
            value: (pair[1].value - pair[0].value).max(0.0),
        })
        .collect();

    Series {
        name: series.name.clone(),
        kind: series.kind,
        labels: series.labels.clone(),
        data,
    }
}
