/*!
 * The line decoder. A capture is one JSON object per line, and every line that decodes
 * cleanly becomes a [`Sample`]. Bad lines are reported and skipped, they never end a parse on their own.
 */

use std::{collections::BTreeMap, fmt::Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{MalformedLine, ParseError};

/// The prometheus metric type, as written by cloudflared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Summary,
    Untyped,
}

impl MetricKind {
    pub fn is_counter(&self) -> bool {
        matches!(self, MetricKind::Counter)
    }
}

impl Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MetricKind::Counter => "COUNTER",
            MetricKind::Gauge => "GAUGE",
            MetricKind::Histogram => "HISTOGRAM",
            MetricKind::Summary => "SUMMARY",
            MetricKind::Untyped => "UNTYPED",
        };
        write!(f, "{}", name)
    }
}

/// A single observation decoded from one input line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    pub value: f64,
    /// cloudflared omits the field for unlabelled metrics
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// The result of decoding a whole input: the samples that survived, plus every line we had to drop.
#[derive(Debug, Default)]
pub struct Decoded {
    pub samples: Vec<Sample>,
    pub malformed: Vec<MalformedLine>,
}

/// Decode raw JSONL text into samples.
/// Blank lines are skipped silently, malformed lines are logged and collected.
/// Fails only if nothing valid is left at the end.
pub fn decode_lines(raw: &str) -> Result<Decoded, ParseError> {
    let mut decoded = Decoded::default();

    for (idx, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Sample>(line) {
            Ok(sample) => decoded.samples.push(sample),
            Err(e) => {
                let bad = MalformedLine {
                    line: idx + 1,
                    reason: e.to_string(),
                };
                warn!("{}", bad);
                decoded.malformed.push(bad);
            }
        }
    }

    if decoded.samples.is_empty() {
        return Err(ParseError::EmptyInput);
    }

    if !decoded.malformed.is_empty() {
        info!(
            "skipped {} malformed lines, kept {} samples",
            decoded.malformed.len(),
            decoded.samples.len()
        );
    } else {
        debug!("decoded {} samples", decoded.samples.len());
    }

    Ok(decoded)
}
