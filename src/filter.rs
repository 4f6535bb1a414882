/*!
 * Derived views over a [`Dataset`]: a time window, an optional name search and a category selection.
 * Filtering never touches the source dataset, and never fails.
 */

use std::{
    collections::{BTreeMap, BTreeSet},
    str::FromStr,
};

use tracing::debug;

use crate::{
    charts::split_for_display,
    dataset::{Category, Dataset, Group, GroupKey},
    series::{Series, TimeRange},
};

/// Which groups a view shows
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CategorySelector {
    #[default]
    All,
    /// the synthetic group built from favorite chart titles
    Favorites,
    Category(Category),
}

impl FromStr for CategorySelector {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(CategorySelector::All),
            "favorites" => Ok(CategorySelector::Favorites),
            other => Ok(CategorySelector::Category(other.parse()?)),
        }
    }
}

/// The predicates of one view
#[derive(Debug, Clone, PartialEq)]
pub struct ViewFilter {
    /// inclusive at both ends
    pub window: TimeRange,
    pub search: Option<String>,
    pub category: CategorySelector,
}

impl ViewFilter {
    pub fn new(window: TimeRange) -> Self {
        ViewFilter {
            window,
            search: None,
            category: CategorySelector::All,
        }
    }

    pub fn with_search<T: ToString>(mut self, term: T) -> Self {
        self.search = Some(term.to_string());
        self
    }

    pub fn with_category(mut self, category: CategorySelector) -> Self {
        self.category = category;
        self
    }
}

/// Apply a view to a dataset: time window first, then category (resolving favorites against the
/// windowed data), then the name search. `favorites` holds chart titles as produced by
/// [`crate::charts::ChartUnit::title`].
pub fn filter(dataset: &Dataset, view: &ViewFilter, favorites: &BTreeSet<String>) -> Dataset {
    let windowed = filter_time(&dataset.groups, view.window);

    let mut groups = match view.category {
        CategorySelector::All => windowed,
        CategorySelector::Favorites => favorites_group(&windowed, favorites)
            .map(|g| BTreeMap::from([(GroupKey::Favorites, g)]))
            .unwrap_or_default(),
        CategorySelector::Category(c) => windowed
            .into_iter()
            .filter(|(key, _)| *key == GroupKey::Category(c))
            .collect(),
    };

    // blank means no search, anything else is matched exactly as typed
    if let Some(term) = view.search.as_deref().filter(|t| !t.trim().is_empty()) {
        groups = search_groups(groups, term);
    }

    let total_samples = groups.values().map(Group::sample_count).sum();
    debug!(
        "view kept {} groups, {} samples",
        groups.len(),
        total_samples
    );

    Dataset {
        groups,
        time_range: view.window,
        total_samples,
        skipped_lines: dataset.skipped_lines,
    }
}

/// Keep only points inside the window, dropping series and groups that end up empty
fn filter_time(groups: &BTreeMap<GroupKey, Group>, window: TimeRange) -> BTreeMap<GroupKey, Group> {
    groups
        .iter()
        .filter_map(|(key, group)| {
            let series: Vec<Series> = group
                .series
                .iter()
                .filter_map(|s| window_series(s, window))
                .collect();
            (!series.is_empty()).then(|| (*key, Group::new(&group.display_name, series)))
        })
        .collect()
}

fn window_series(series: &Series, window: TimeRange) -> Option<Series> {
    // data is sorted, so the window is one contiguous slice
    let lo = series.data.partition_point(|p| p.timestamp < window.start);
    let hi = series.data.partition_point(|p| p.timestamp <= window.end);
    if lo >= hi {
        return None;
    }

    Some(Series {
        name: series.name.clone(),
        kind: series.kind,
        labels: series.labels.clone(),
        data: series.data[lo..hi].to_vec(),
    })
}

/// Collect every chart whose title is a favorite into one group
fn favorites_group(groups: &BTreeMap<GroupKey, Group>, favorites: &BTreeSet<String>) -> Option<Group> {
    if favorites.is_empty() {
        return None;
    }

    let mut series: Vec<Series> = Vec::new();
    for group in groups.values() {
        for unit in split_for_display(&group.series) {
            if favorites.contains(&unit.title()) {
                series.extend(unit.series.into_iter().cloned());
            }
        }
    }

    (!series.is_empty()).then(|| Group::new("Favorites", series))
}

/// Case-insensitive substring match over series names only
fn search_groups(groups: BTreeMap<GroupKey, Group>, term: &str) -> BTreeMap<GroupKey, Group> {
    let needle = term.to_lowercase();
    groups
        .into_iter()
        .filter_map(|(key, mut group)| {
            group
                .series
                .retain(|s| s.name.to_lowercase().contains(&needle));
            (!group.series.is_empty()).then_some((key, group))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::{filter, CategorySelector, ViewFilter};
    use crate::{
        dataset::{parse, Category, Dataset, GroupKey},
        series::TimeRange,
    };

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn line(secs: i64, name: &str, value: f64, labels: &str) -> String {
        format!(
            r#"{{"timestamp": "{}", "name": "{}", "type": "COUNTER", "value": {}, "labels": {}}}"#,
            ts(secs).to_rfc3339(),
            name,
            value,
            labels
        )
    }

    fn fixture() -> anyhow::Result<Dataset> {
        let lines = vec![
            line(0, "cloudflared_tunnel_total_requests", 10.0, "{}"),
            line(1, "cloudflared_tunnel_total_requests", 15.0, "{}"),
            line(2, "cloudflared_tunnel_total_requests", 20.0, "{}"),
            line(3, "cloudflared_tunnel_total_requests", 25.0, "{}"),
            line(0, "go_goroutines", 42.0, "{}"),
            line(3, "go_goroutines", 40.0, "{}"),
            line(1, "quic_client_sent_frames", 1.0, r#"{"frame_type": "Tunnel"}"#),
        ];
        Ok(parse(&lines.join("\n"))?)
    }

    #[test]
    fn test_window_is_inclusive() -> anyhow::Result<()> {
        let dataset = fixture()?;
        let view = ViewFilter::new(TimeRange::new(ts(1), ts(2)));
        let filtered = filter(&dataset, &view, &BTreeSet::new());

        let tunnel = filtered
            .group(Category::Tunnel.into())
            .ok_or_else(|| anyhow::anyhow!("missing tunnel group"))?;
        let kept: Vec<DateTime<Utc>> = tunnel.series[0].data.iter().map(|p| p.timestamp).collect();
        assert_eq!(kept, vec![ts(1), ts(2)]);

        // goroutines only has points at 0 and 3, so the series and its group disappear
        assert!(filtered.group(Category::Process.into()).is_none());
        assert_eq!(filtered.total_samples, 3);
        assert_eq!(filtered.time_range, view.window);

        // the source is untouched
        assert_eq!(dataset.total_samples, 7);
        Ok(())
    }

    #[test]
    fn test_window_exact_start() -> anyhow::Result<()> {
        let dataset = fixture()?;
        let filtered = filter(&dataset, &ViewFilter::new(TimeRange::at(ts(3))), &BTreeSet::new());
        assert_eq!(filtered.total_samples, 2);

        let just_after = TimeRange::new(ts(3) + Duration::milliseconds(1), ts(10));
        let filtered = filter(&dataset, &ViewFilter::new(just_after), &BTreeSet::new());
        assert_eq!(filtered.total_samples, 0);
        assert!(filtered.groups.is_empty());
        Ok(())
    }

    #[test]
    fn test_inverted_window_is_empty() -> anyhow::Result<()> {
        let dataset = fixture()?;
        let filtered = filter(&dataset, &ViewFilter::new(TimeRange::new(ts(3), ts(0))), &BTreeSet::new());
        assert!(filtered.groups.is_empty());
        assert_eq!(filtered.total_samples, 0);
        Ok(())
    }

    #[test]
    fn test_search_matches_names_only() -> anyhow::Result<()> {
        let dataset = fixture()?;
        let view = ViewFilter::new(dataset.time_range).with_search("GOROUTINES");
        let filtered = filter(&dataset, &view, &BTreeSet::new());
        assert_eq!(filtered.series_count(), 1);
        assert_eq!(filtered.total_samples, 2);

        // surrounding whitespace is part of the term
        let view = ViewFilter::new(dataset.time_range).with_search("go ");
        assert!(filter(&dataset, &view, &BTreeSet::new()).groups.is_empty());
        let view = ViewFilter::new(dataset.time_range).with_search(" goroutines");
        assert!(filter(&dataset, &view, &BTreeSet::new()).groups.is_empty());

        // a blank term doesn't filter anything
        let view = ViewFilter::new(dataset.time_range).with_search("   ");
        assert_eq!(filter(&dataset, &view, &BTreeSet::new()).total_samples, dataset.total_samples);

        // "Tunnel" is a label value on the quic series, it must not match through the label
        let view = ViewFilter::new(dataset.time_range)
            .with_search("tunnel")
            .with_category(CategorySelector::Category(Category::Network));
        assert!(filter(&dataset, &view, &BTreeSet::new()).groups.is_empty());
        Ok(())
    }

    #[test]
    fn test_category_selection() -> anyhow::Result<()> {
        let dataset = fixture()?;
        let view = ViewFilter::new(dataset.time_range).with_category(CategorySelector::Category(Category::Tunnel));
        let filtered = filter(&dataset, &view, &BTreeSet::new());
        assert_eq!(filtered.groups.len(), 1);
        assert_eq!(filtered.total_samples, 4);
        Ok(())
    }

    #[test]
    fn test_favorites_group() -> anyhow::Result<()> {
        let dataset = fixture()?;
        let favorites = BTreeSet::from([
            "Go Goroutines".to_string(),
            "Quic Client Sent Frames".to_string(),
            "Not A Chart".to_string(),
        ]);
        let view = ViewFilter::new(dataset.time_range).with_category(CategorySelector::Favorites);
        let filtered = filter(&dataset, &view, &favorites);

        let group = filtered
            .group(GroupKey::Favorites)
            .ok_or_else(|| anyhow::anyhow!("missing favorites"))?;
        assert_eq!(group.display_name, "Favorites");
        assert_eq!(group.series.len(), 2);
        assert_eq!(filtered.total_samples, 3);

        let none = filter(&dataset, &view, &BTreeSet::new());
        assert!(none.groups.is_empty());
        Ok(())
    }

    #[test]
    fn test_selector_from_str() -> anyhow::Result<()> {
        assert_eq!("all".parse::<CategorySelector>()?, CategorySelector::All);
        assert_eq!("favorites".parse::<CategorySelector>()?, CategorySelector::Favorites);
        assert_eq!(
            "rpc".parse::<CategorySelector>()?,
            CategorySelector::Category(Category::Rpc)
        );
        assert!("nope".parse::<CategorySelector>().is_err());
        Ok(())
    }
}
