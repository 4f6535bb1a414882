/*!
 * cfmetrics turns a cloudflared metrics capture (one JSON sample per line) into a queryable
 * time-series dataset: series keyed by name and labels, grouped by subsystem, split into
 * readable charts, with counters optionally shown as deltas.
 *
 * ```text
 * raw text -> decode_lines -> assemble -> categorize -> Dataset
 * Dataset  -> filter -> split_for_display -> ChartUnit -> (to_delta) -> render
 * ```
 */

pub mod charts;
pub mod dataset;
pub mod error;
pub mod export;
pub mod filter;
pub mod format;
pub mod prefs;
pub mod sample;
pub mod series;

pub use charts::{split_for_display, ChartUnit};
pub use dataset::{parse, Dataset};
pub use error::ParseError;
pub use filter::{filter, ViewFilter};
pub use series::{format_series_key, to_delta, Series};
