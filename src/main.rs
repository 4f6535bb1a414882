use std::{collections::HashSet, fs::{create_dir_all, read_to_string}, path::PathBuf};

use anyhow::Context;
use cfmetrics::{
    charts::{render::render_svg, split_for_display, unique_stem, ChartType, ViewMode},
    dataset::{parse, Dataset},
    export::{export_csv, print_table},
    filter::{filter, CategorySelector, ViewFilter},
    prefs::{load_preferences, save_preferences, Preferences, PreferencesStore},
    series::TimeRange,
};
use chrono::{DateTime, Utc};
use clap::Parser;
use spinners::{Spinner, Spinners};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;


#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// the cloudflared metrics capture to load, one JSON sample per line
    file: PathBuf,

    /// Only show samples at or after this time, in RFC 3339
    #[arg(long)]
    start: Option<DateTime<Utc>>,

    /// Only show samples at or before this time, in RFC 3339
    #[arg(long)]
    end: Option<DateTime<Utc>>,

    /// Only show metrics whose name contains this, ignoring case
    #[arg(long, short)]
    search: Option<String>,

    /// The group to show: all, favorites, tunnel, network, http, memory, process, rpc or other
    #[arg(long, short, default_value = "all")]
    category: CategorySelector,

    /// Toggle a chart title (e.g. "Go Goroutines") in or out of the favorites
    #[arg(long)]
    favorite: Vec<String>,

    /// A JSON file holding favorites and per-metric chart settings. Written back when favorites change.
    #[arg(long)]
    prefs: Option<PathBuf>,

    /// Show every counter as the increase between samples
    #[arg(long)]
    delta: bool,

    /// Where to write charts
    #[arg(long, short, default_value = ".")]
    out: PathBuf,

    /// Also export the points behind every chart as CSV
    #[arg(long)]
    csv: bool,

    /// Print the dataset summary and exit without rendering
    #[arg(long)]
    summary_only: bool,

    /// Debug logging
    #[arg(long, short)]
    verbose: bool,
}

/// Read and parse the capture off the async threads.
/// Returns `None` if the token was cancelled before it finished.
async fn load(path: PathBuf, token: &CancellationToken) -> anyhow::Result<Option<Dataset>> {
    let mut sp = Spinner::new(Spinners::Dots9, format!("Loading {}...", path.display()));
    let handle = tokio::task::spawn_blocking(move || -> anyhow::Result<Dataset> {
        let raw = read_to_string(&path).context("error reading file to string")?;
        Ok(parse(&raw)?)
    });

    tokio::select! {
        _ = token.cancelled() => {
            sp.stop_with_message("cancelled, nothing loaded".to_string());
            Ok(None)
        }
        res = handle => {
            sp.stop_with_newline();
            let dataset = res.context("parse task failed")??;
            Ok(Some(dataset))
        }
    }
}

/// Write every chart of the dataset, returning how many SVGs were written.
/// Stops between charts once the token is cancelled.
fn render(dataset: &Dataset, store: &PreferencesStore, args: &Cli, token: &CancellationToken) -> anyhow::Result<usize> {
    create_dir_all(&args.out).context("could not create output directory")?;

    let mut rendered = 0;
    let mut stems: HashSet<String> = HashSet::new();
    for group in dataset.groups.values() {
        info!("rendering {} ({} series)", group.display_name, group.series.len());

        for unit in split_for_display(&group.series) {
            if token.is_cancelled() {
                info!("cancelled after {} charts", rendered);
                return Ok(rendered);
            }

            let title = unit.title();
            let stem = unique_stem(&mut stems, &title);
            let mut settings = store.chart_settings(unit.metric_name());
            if args.delta {
                settings.view_mode = ViewMode::Delta;
            }
            let series = unit.materialize(settings.view_mode);
            let caption = if settings.view_mode == ViewMode::Delta && unit.is_counter() {
                format!("{} (delta)", title)
            } else {
                title.clone()
            };

            if args.csv {
                match export_csv(&args.out, &stem, &series) {
                    Ok(path) => debug!("wrote {}", path.display()),
                    Err(e) => error!("error exporting {}: {}", title, e),
                }
            }

            if settings.chart_type == ChartType::Table {
                print_table(&caption, &series);
                continue;
            }

            let path = args.out.join(format!("{}.svg", stem));
            match render_svg(&path, &caption, settings.chart_type, &series) {
                Ok(()) => rendered += 1,
                Err(e) => error!("error rendering {}: {}", title, e),
            }
        }
    }

    info!("wrote {} charts to {}", rendered, args.out.display());
    Ok(rendered)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let mut level = LevelFilter::INFO;
    if args.verbose {
        level = LevelFilter::DEBUG;
    }

    tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::builder().with_default_directive(level.into()).from_env_lossy())
    .init();

    let token = CancellationToken::new();
    let listener = token.clone();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {}", e);
            return;
        }
        listener.cancel();
    });

    let Some(dataset) = load(args.file.clone(), &token).await? else {
        // the blocking parse can't be interrupted, don't wait on it during runtime shutdown
        std::process::exit(130);
    };
    print!("{}", dataset);

    let prefs = match &args.prefs {
        Some(path) => load_preferences(path)?,
        None => Preferences::default(),
    };
    let mut store = PreferencesStore::new(prefs);
    let _persist = args.prefs.clone().map(|path| {
        store.subscribe(move |prefs| {
            if let Err(e) = save_preferences(&path, prefs) {
                error!("could not save preferences: {}", e);
            }
        })
    });
    let _log = store.subscribe(|prefs| debug!("favorites are now {:?}", prefs.favorites));

    for title in &args.favorite {
        if store.toggle_favorite(title) {
            info!("added {} to favorites", title);
        } else {
            info!("removed {} from favorites", title);
        }
    }

    let window = TimeRange::new(
        args.start.unwrap_or(dataset.time_range.start),
        args.end.unwrap_or(dataset.time_range.end),
    );
    let mut view = ViewFilter::new(window).with_category(args.category);
    if let Some(term) = &args.search {
        view = view.with_search(term);
    }

    let filtered = filter(&dataset, &view, store.favorites());
    if filtered.groups.is_empty() {
        info!("no metrics match the current view");
        return Ok(());
    }
    if filtered != dataset {
        println!("\nshowing:");
        print!("{}", filtered);
    }

    if args.summary_only {
        return Ok(());
    }

    render(&filtered, &store, &args, &token)?;
    if token.is_cancelled() {
        std::process::exit(130);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs::{read_dir, remove_dir_all};

    use clap::Parser;
    use tokio_util::sync::CancellationToken;

    use super::{render, Cli};
    use cfmetrics::{dataset::parse, prefs::{Preferences, PreferencesStore}};

    const CAPTURE: &str = r#"{"timestamp": "2024-05-01T10:00:00Z", "name": "go_goroutines", "type": "GAUGE", "value": 42}
{"timestamp": "2024-05-01T10:00:05Z", "name": "go_goroutines", "type": "GAUGE", "value": 40}
{"timestamp": "2024-05-01T10:00:05Z", "name": "cloudflared_tunnel_total_requests", "type": "COUNTER", "value": 7}"#;

    #[test]
    fn test_render_stops_when_cancelled() -> anyhow::Result<()> {
        let out = std::env::temp_dir().join(format!("cfmetrics-cancelled-{}", std::process::id()));
        let out_arg = out.to_string_lossy().to_string();
        let args = Cli::parse_from(["cfmetrics", "capture.jsonl", "--out", out_arg.as_str(), "--csv"]);
        let dataset = parse(CAPTURE)?;
        let store = PreferencesStore::new(Preferences::default());

        let token = CancellationToken::new();
        token.cancel();
        let rendered = render(&dataset, &store, &args, &token)?;

        let written = read_dir(&out)?.count();
        remove_dir_all(&out)?;
        assert_eq!(rendered, 0);
        assert_eq!(written, 0);
        Ok(())
    }
}
