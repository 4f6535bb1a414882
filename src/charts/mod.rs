/*!
 * cfmetrics treats every chart as a [`ChartUnit`]: a bounded set of series that share a metric name.
 * Metrics with only a handful of series get one chart, high-cardinality ones are split by a label
 * so that no single chart (and its legend) grows past [`SPLIT_THRESHOLD`] series.
 *
 * This module also builds the per-timestamp rows a chart or table is drawn from.
 */

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    format::format_labels,
    series::{to_delta, Series},
};

pub mod render;

/// The most series we put on one chart before splitting it
pub const SPLIT_THRESHOLD: usize = 15;

/// Labels we'd rather split on, most preferred first
pub const PREFERRED_SPLIT_KEYS: [&str; 7] = [
    "frame_type",
    "conn_index",
    "code",
    "method",
    "handler",
    "quantile",
    "le",
];

/// Labels worth showing in a short legend entry, in display order
const LEGEND_KEYS: [&str; 7] = [
    "frame_type",
    "conn_index",
    "le",
    "quantile",
    "code",
    "method",
    "handler",
];

/// The value used for series that don't carry the split label at all.
/// An empty label value is still a value and gets its own unit.
const OTHER_BUCKET: &str = "other";

/// How a chart gets drawn
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    #[default]
    Line,
    Bar,
    Scatter,
    Table,
}

/// Whether counters are shown as-is or as increments between samples
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Cumulative,
    Delta,
}

/// The set of series one chart renders
#[derive(Debug, Clone, PartialEq)]
pub struct ChartUnit<'a> {
    pub label: String,
    pub series: Vec<&'a Series>,
}

impl<'a> ChartUnit<'a> {
    /// The human title for this chart, which is also what favorites are matched against
    pub fn title(&self) -> String {
        format_metric_title(&self.label)
    }

    /// The metric name shared by every series in this chart
    pub fn metric_name(&self) -> &str {
        self.series.first().map(|s| s.name.as_str()).unwrap_or_default()
    }

    pub fn is_counter(&self) -> bool {
        self.series.first().is_some_and(|s| s.kind.is_counter())
    }

    /// Copy out the series to draw. Counters are turned into deltas in delta mode, everything else is left alone.
    pub fn materialize(&self, mode: ViewMode) -> Vec<Series> {
        self.series
            .iter()
            .map(|s| match mode {
                ViewMode::Delta if s.kind.is_counter() => to_delta(s),
                _ => (*s).clone(),
            })
            .collect()
    }
}

/// Partition series into chart units.
/// Series are bucketed by name first. A bucket that is too big for one chart is split on a label,
/// preferring [`PREFERRED_SPLIT_KEYS`] and otherwise the lexicographically smallest key. If a split value
/// still holds too many series, it is split again on the next label, until nothing is left to split on.
pub fn split_for_display(series: &[Series]) -> Vec<ChartUnit<'_>> {
    let mut buckets: Vec<(&str, Vec<&Series>)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for s in series {
        match index.get(s.name.as_str()) {
            Some(&idx) => buckets[idx].1.push(s),
            None => {
                index.insert(s.name.as_str(), buckets.len());
                buckets.push((s.name.as_str(), vec![s]));
            }
        }
    }

    let mut units = Vec::new();
    for (name, bucket) in buckets {
        split_bucket(name, bucket, &mut Vec::new(), &mut units);
    }
    units
}

fn split_bucket<'a>(
    name: &str,
    bucket: Vec<&'a Series>,
    path: &mut Vec<(String, String)>,
    out: &mut Vec<ChartUnit<'a>>,
) {
    let label = unit_label(name, path);
    if bucket.len() <= SPLIT_THRESHOLD {
        out.push(ChartUnit {
            label,
            series: bucket,
        });
        return;
    }

    let Some(split_key) = choose_split_key(&bucket, path) else {
        debug!(
            "{} has {} series and no label left to split on",
            label,
            bucket.len()
        );
        out.push(ChartUnit {
            label,
            series: bucket,
        });
        return;
    };
    debug!("splitting {} ({} series) on {}", label, bucket.len(), split_key);

    let mut subs: Vec<(String, Vec<&'a Series>)> = Vec::new();
    for s in bucket {
        let value = s
            .labels
            .get(&split_key)
            .map(String::as_str)
            .unwrap_or(OTHER_BUCKET);
        match subs.iter_mut().find(|(v, _)| v == value) {
            Some((_, members)) => members.push(s),
            None => subs.push((value.to_string(), vec![s])),
        }
    }

    for (value, members) in subs {
        path.push((split_key.clone(), value));
        split_bucket(name, members, path, out);
        path.pop();
    }
}

/// Find the label to split an oversized bucket on, ignoring keys already split on
fn choose_split_key(bucket: &[&Series], used: &[(String, String)]) -> Option<String> {
    let keys: BTreeSet<&str> = bucket
        .iter()
        .flat_map(|s| s.labels.keys().map(String::as_str))
        .filter(|k| !used.iter().any(|(u, _)| u.as_str() == *k))
        .collect();

    PREFERRED_SPLIT_KEYS
        .iter()
        .find(|k| keys.contains(*k))
        .or_else(|| keys.iter().next())
        .map(|k| k.to_string())
}

fn unit_label(name: &str, path: &[(String, String)]) -> String {
    if path.is_empty() {
        return name.to_string();
    }
    let parts: Vec<String> = path
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, v))
        .collect();
    format!("{} ({})", name, parts.join(", "))
}

/// Turn a metric name or chart label into a title: underscores become spaces,
/// and every word starts with a capital letter.
pub fn format_metric_title(name: &str) -> String {
    let mut title = String::with_capacity(name.len());
    let mut prev_word = false;
    for c in name.chars() {
        let c = if c == '_' { ' ' } else { c };
        let is_word = c.is_ascii_alphanumeric();
        if is_word && !prev_word {
            title.push(c.to_ascii_uppercase());
        } else {
            title.push(c);
        }
        prev_word = is_word;
    }
    title
}

/// A filesystem-safe stem for a chart's output files: lower-cased, with anything that isn't
/// an ASCII letter or digit replaced by `_`.
pub fn file_stem(title: &str) -> String {
    title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

/// [`file_stem`], made unique among the stems already handed out in `used`.
/// Titles that only differ in case or punctuation map to the same stem, so later ones get a `_2`, `_3`... suffix.
pub fn unique_stem(used: &mut HashSet<String>, title: &str) -> String {
    let base = file_stem(title);
    let mut stem = base.clone();
    let mut n = 1;
    while !used.insert(stem.clone()) {
        n += 1;
        stem = format!("{}_{}", base, n);
    }
    if n > 1 {
        debug!("{} collides with an earlier chart, writing it as {}", title, stem);
    }
    stem
}

/// The full legend label of a series: `name{k="v", ...}`
pub fn series_label(series: &Series) -> String {
    let labels = format_labels(&series.labels);
    if labels.is_empty() {
        series.name.clone()
    } else {
        format!("{}{{{}}}", series.name, labels)
    }
}

/// A compact legend label that only shows the labels that tell series apart in practice.
/// Falls back to the first two labels, then to the metric name.
pub fn short_series_label(series: &Series) -> String {
    let important: Vec<String> = LEGEND_KEYS
        .iter()
        .filter_map(|k| series.labels.get(*k).map(|v| format!("{}=\"{}\"", k, v)))
        .collect();
    if !important.is_empty() {
        return important.join(", ");
    }

    let first: Vec<String> = series
        .labels
        .iter()
        .take(2)
        .map(|(k, v)| format!("{}=\"{}\"", k, v))
        .collect();
    if first.is_empty() {
        series.name.clone()
    } else {
        first.join(", ")
    }
}

/// Whether a chart with this many series should draw its legend
pub fn legend_visible(series_count: usize) -> bool {
    series_count <= SPLIT_THRESHOLD
}

/// The most recent value of every series, keyed by [`series_label`]
pub fn latest_values(series: &[Series]) -> BTreeMap<String, f64> {
    series
        .iter()
        .filter_map(|s| s.latest().map(|v| (series_label(s), v)))
        .collect()
}

/// One timestamp bucket of a chart, with the value of every series at that instant.
/// A series with no point at this instant maps to `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartRow {
    pub timestamp: DateTime<Utc>,
    /// wall-clock label for the x axis
    pub time: String,
    pub values: BTreeMap<String, Option<f64>>,
}

/// Build the rows of a chart over the union of all the series' timestamps.
/// When a series has more than one point at the same instant, the first one is used.
pub fn chart_rows(series: &[Series]) -> Vec<ChartRow> {
    let timestamps: BTreeSet<DateTime<Utc>> = series
        .iter()
        .flat_map(|s| s.data.iter().map(|p| p.timestamp))
        .collect();

    let lookups: Vec<(String, BTreeMap<DateTime<Utc>, f64>)> = series
        .iter()
        .map(|s| {
            let mut by_time = BTreeMap::new();
            for p in &s.data {
                by_time.entry(p.timestamp).or_insert(p.value);
            }
            (series_label(s), by_time)
        })
        .collect();

    timestamps
        .into_iter()
        .map(|ts| ChartRow {
            timestamp: ts,
            time: ts.format("%H:%M:%S").to_string(),
            values: lookups
                .iter()
                .map(|(label, by_time)| (label.clone(), by_time.get(&ts).copied()))
                .collect(),
        })
        .collect()
}
