/*!
 * The parsed dataset, and the categorizer that sorts every series into exactly one subsystem group.
 */

use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use anyhow::anyhow;
use tracing::debug;

use crate::{
    error::ParseError,
    format::format_span,
    sample::decode_lines,
    series::{assemble, Series, TimeRange},
};

/// The subsystem a metric belongs to.
/// The declaration order is the display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    Tunnel,
    Network,
    Http,
    Memory,
    Process,
    Rpc,
    Other,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Tunnel,
        Category::Network,
        Category::Http,
        Category::Memory,
        Category::Process,
        Category::Rpc,
        Category::Other,
    ];

    /// Pick the category for a metric name. Rules are checked in order, first match wins.
    pub fn classify(name: &str) -> Category {
        if name.starts_with("cloudflared_tunnel_") {
            Category::Tunnel
        } else if name.starts_with("quic_client_") || name.contains("_latency") {
            Category::Network
        } else if name.contains("response") || name.contains("request") {
            Category::Http
        } else if name.starts_with("go_memstats_") || name.starts_with("go_gc_") {
            Category::Memory
        } else if name.starts_with("process_") || name == "go_goroutines" || name == "go_threads" {
            Category::Process
        } else if name.starts_with("cloudflared_rpc_") {
            Category::Rpc
        } else {
            Category::Other
        }
    }

    /// The short key used on the command line and in group maps
    pub fn key(&self) -> &'static str {
        match self {
            Category::Tunnel => "tunnel",
            Category::Network => "network",
            Category::Http => "http",
            Category::Memory => "memory",
            Category::Process => "process",
            Category::Rpc => "rpc",
            Category::Other => "other",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Category::Tunnel => "Tunnel Health",
            Category::Network => "Network & QUIC",
            Category::Http => "HTTP Responses",
            Category::Memory => "Memory & Resources",
            Category::Process => "Process Metrics",
            Category::Rpc => "RPC & Registration",
            Category::Other => "Other Metrics",
        }
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.key() == s)
            .ok_or_else(|| anyhow!("unknown category '{}'", s))
    }
}

/// The key of a group inside a [`Dataset`]. Favorites only ever shows up in filtered views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GroupKey {
    Favorites,
    Category(Category),
}

impl GroupKey {
    pub fn key(&self) -> &'static str {
        match self {
            GroupKey::Favorites => "favorites",
            GroupKey::Category(c) => c.key(),
        }
    }
}

impl From<Category> for GroupKey {
    fn from(value: Category) -> Self {
        GroupKey::Category(value)
    }
}

/// A named set of series
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub display_name: String,
    pub series: Vec<Series>,
}

impl Group {
    pub fn new<T: ToString>(display_name: T, series: Vec<Series>) -> Self {
        Group {
            display_name: display_name.to_string(),
            series,
        }
    }

    /// Total number of points across every series in the group
    pub fn sample_count(&self) -> usize {
        self.series.iter().map(Series::len).sum()
    }
}

/// Everything we know about one capture file. Never mutated once built, views are derived from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub groups: BTreeMap<GroupKey, Group>,
    pub time_range: TimeRange,
    pub total_samples: usize,
    /// how many input lines the decoder had to drop
    pub skipped_lines: usize,
}

impl Dataset {
    /// The number of unique series across all groups
    pub fn series_count(&self) -> usize {
        self.groups.values().map(|g| g.series.len()).sum()
    }

    pub fn series(&self) -> impl Iterator<Item = &Series> {
        self.groups.values().flat_map(|g| g.series.iter())
    }

    pub fn group(&self, key: GroupKey) -> Option<&Group> {
        self.groups.get(&key)
    }
}

impl Display for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} samples across {} series ({} lines skipped)",
            self.total_samples,
            self.series_count(),
            self.skipped_lines
        )?;
        writeln!(
            f,
            "{} -> {} ({})",
            self.time_range.start.to_rfc3339(),
            self.time_range.end.to_rfc3339(),
            format_span(self.time_range.span())
        )?;
        for (key, group) in &self.groups {
            writeln!(
                f,
                "{} [{}]: {} series, {} samples",
                group.display_name,
                key.key(),
                group.series.len(),
                group.sample_count()
            )?;
        }
        Ok(())
    }
}

/// Sort series into their category groups. Groups that end up empty are left out.
pub fn categorize(series: Vec<Series>) -> BTreeMap<GroupKey, Group> {
    let mut groups: BTreeMap<GroupKey, Group> = BTreeMap::new();

    for s in series {
        let category = Category::classify(&s.name);
        groups
            .entry(category.into())
            .or_insert_with(|| Group::new(category.display_name(), Vec::new()))
            .series
            .push(s);
    }

    groups
}

/// Run the whole pipeline over a capture: decode, assemble, categorize.
pub fn parse(raw: &str) -> Result<Dataset, ParseError> {
    let decoded = decode_lines(raw)?;
    let skipped_lines = decoded.malformed.len();
    let assembled = assemble(decoded.samples)?;
    let groups = categorize(assembled.series);
    debug!("categorized into {} groups", groups.len());

    Ok(Dataset {
        groups,
        time_range: assembled.time_range,
        total_samples: assembled.total_samples,
        skipped_lines,
    })
}
