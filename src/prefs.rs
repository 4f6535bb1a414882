/*!
 * User preferences: favorite chart titles and per-metric chart settings.
 * The store is handed to whatever presents charts. Interested parties subscribe for change
 * notifications and get a [`Subscription`] back; dropping it unsubscribes.
 * The parsing pipeline never reads this, it only ever sees a resolved set of favorite titles.
 */

use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
    fs::{read_to_string, File},
    io::Write,
    path::Path,
    rc::{Rc, Weak},
};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::charts::{ChartType, ViewMode};

/// How one metric's charts are drawn
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartSettings {
    pub chart_type: ChartType,
    pub view_mode: ViewMode,
}

/// The serializable preference state
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    /// chart titles
    #[serde(default)]
    pub favorites: BTreeSet<String>,
    /// keyed by metric name
    #[serde(default)]
    pub charts: BTreeMap<String, ChartSettings>,
}

type Listener = Rc<dyn Fn(&Preferences)>;
type ListenerList = RefCell<Vec<(usize, Listener)>>;

#[derive(Default)]
pub struct PreferencesStore {
    prefs: Preferences,
    listeners: Rc<ListenerList>,
    next_id: usize,
}

/// A live change subscription. Dropping it, or calling [`Subscription::unsubscribe`], removes the callback.
#[must_use = "dropping a subscription unsubscribes it"]
pub struct Subscription {
    id: usize,
    listeners: Weak<ListenerList>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.borrow_mut().retain(|(id, _)| *id != self.id);
        }
    }
}

impl PreferencesStore {
    pub fn new(prefs: Preferences) -> Self {
        PreferencesStore {
            prefs,
            ..Default::default()
        }
    }

    pub fn preferences(&self) -> &Preferences {
        &self.prefs
    }

    pub fn favorites(&self) -> &BTreeSet<String> {
        &self.prefs.favorites
    }

    pub fn is_favorite(&self, title: &str) -> bool {
        self.prefs.favorites.contains(title)
    }

    /// Flip a chart title in or out of the favorites. Returns whether it is a favorite afterwards.
    pub fn toggle_favorite(&mut self, title: &str) -> bool {
        let now_favorite = if self.prefs.favorites.remove(title) {
            false
        } else {
            self.prefs.favorites.insert(title.to_string());
            true
        };
        self.notify();
        now_favorite
    }

    /// Settings for a metric, defaults if none were stored
    pub fn chart_settings(&self, metric_name: &str) -> ChartSettings {
        self.prefs
            .charts
            .get(metric_name)
            .copied()
            .unwrap_or_default()
    }

    pub fn set_chart_settings(&mut self, metric_name: &str, settings: ChartSettings) {
        self.prefs.charts.insert(metric_name.to_string(), settings);
        self.notify();
    }

    /// Register a callback that runs after every change
    pub fn subscribe<F: Fn(&Preferences) + 'static>(&mut self, callback: F) -> Subscription {
        let id = self.next_id;
        self.next_id += 1;
        let listener: Listener = Rc::new(callback);
        self.listeners.borrow_mut().push((id, listener));
        Subscription {
            id,
            listeners: Rc::downgrade(&self.listeners),
        }
    }

    fn notify(&self) {
        // snapshot first, so a callback is free to drop subscriptions
        let current: Vec<Listener> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        debug!("notifying {} preference listeners", current.len());
        for listener in current {
            listener(&self.prefs);
        }
    }
}

/// Read preferences from a JSON file. A missing file is just empty preferences.
pub fn load_preferences(path: &Path) -> anyhow::Result<Preferences> {
    if !path.exists() {
        debug!("no preferences at {}, using defaults", path.display());
        return Ok(Preferences::default());
    }
    let raw = read_to_string(path).context("error reading preferences file")?;
    let prefs = serde_json::from_str(&raw).context("error parsing preferences file")?;
    Ok(prefs)
}

pub fn save_preferences(path: &Path, prefs: &Preferences) -> anyhow::Result<()> {
    let mut file = File::create(path).context("error creating preferences file")?;
    writeln!(file, "{}", serde_json::to_string_pretty(prefs)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use super::{load_preferences, save_preferences, ChartSettings, Preferences, PreferencesStore};
    use crate::charts::{ChartType, ViewMode};

    #[test]
    fn test_toggle_favorite_notifies() {
        let mut store = PreferencesStore::default();
        let calls = Rc::new(Cell::new(0));
        let seen = calls.clone();
        let sub = store.subscribe(move |prefs| {
            seen.set(seen.get() + 1);
            assert!(prefs.favorites.len() <= 1);
        });

        assert!(store.toggle_favorite("Go Goroutines"));
        assert!(store.is_favorite("Go Goroutines"));
        assert!(!store.toggle_favorite("Go Goroutines"));
        assert!(!store.is_favorite("Go Goroutines"));
        assert_eq!(calls.get(), 2);

        sub.unsubscribe();
        store.toggle_favorite("Go Threads");
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_dropped_subscription_stops_listening() {
        let mut store = PreferencesStore::default();
        let calls = Rc::new(Cell::new(0));
        {
            let seen = calls.clone();
            let _sub = store.subscribe(move |_| seen.set(seen.get() + 1));
            store.set_chart_settings(
                "cloudflared_tunnel_total_requests",
                ChartSettings {
                    chart_type: ChartType::Bar,
                    view_mode: ViewMode::Delta,
                },
            );
        }
        store.toggle_favorite("anything");
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_chart_settings_default() {
        let store = PreferencesStore::default();
        let settings = store.chart_settings("go_goroutines");
        assert_eq!(settings.chart_type, ChartType::Line);
        assert_eq!(settings.view_mode, ViewMode::Cumulative);
    }

    #[test]
    fn test_preferences_file() -> anyhow::Result<()> {
        let path = std::env::temp_dir().join(format!("cfmetrics-prefs-{}.json", std::process::id()));
        assert_eq!(load_preferences(&path)?, Preferences::default());

        let mut store = PreferencesStore::default();
        store.toggle_favorite("Http Status (Code=\"200\")");
        store.set_chart_settings(
            "quic_client_sent_frames",
            ChartSettings {
                chart_type: ChartType::Scatter,
                view_mode: ViewMode::Delta,
            },
        );
        save_preferences(&path, store.preferences())?;

        let loaded = load_preferences(&path)?;
        std::fs::remove_file(&path)?;
        assert_eq!(&loaded, store.preferences());

        let partial: Preferences = serde_json::from_str(r#"{"favorites": ["Go Threads"]}"#)?;
        assert!(partial.charts.is_empty());
        Ok(())
    }
}
