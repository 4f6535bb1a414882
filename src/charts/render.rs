/*!
 * SVG output for a single chart. Every series in the chart gets its own colour, x is wall-clock time
 * and y is formatted according to what the metric measures.
 */

use std::{collections::BTreeMap, path::Path};

use anyhow::{anyhow, Context};
use chrono::{DateTime, Duration, Utc};
use plotters::{chart::ChartBuilder, coord::Shift, prelude::*};
use tracing::debug;

use crate::{
    charts::{latest_values, legend_visible, series_label, short_series_label, ChartType},
    format::format_value,
    series::Series,
};

/// The default margin percentage for a graph
const DEFAULT_GRAPH_MARGIN: i32 = 1;
/// The default left label size
const LABEL_SIZE_LEFT: i32 = 9;
/// The default bottom label size
const LABEL_SIZE_BOTTOM: i32 = 12;
/// The graph dimensions
pub const SVG_SIZE: (u32, u32) = (1024, 768);
/// The default font size for labels
const CHART_NAME_FONT_PCT_SIZE: i32 = 5;
/// The default additional y axis to add, to make way for the graph legend
const HEADROOM_CHART_MAX: f64 = 0.10;
/// Half the width of a bar, as a share of the x range
const BAR_HALF_WIDTH: f64 = 0.002;

/// Helper to set up the base graph object
fn setup_graph<'a, 'b, DB: DrawingBackend>(name: &str, root: &'a DrawingArea<DB, Shift>) -> ChartBuilder<'a, 'b, DB> {
    let mut chart_new = ChartBuilder::on(root);
    chart_new.caption(name, ("sans-serif", (CHART_NAME_FONT_PCT_SIZE).percent_height()))
    .set_label_area_size(LabelAreaPosition::Left, (LABEL_SIZE_LEFT).percent())
    .set_label_area_size(LabelAreaPosition::Bottom, (LABEL_SIZE_BOTTOM).percent())
    .margin((DEFAULT_GRAPH_MARGIN).percent());

    chart_new
}

/// The y range of a chart. A flat line is anchored to zero so it doesn't collapse to nothing.
fn get_min_max(series: &[Series]) -> anyhow::Result<(f64, f64)> {
    let values = || series.iter().flat_map(|s| s.data.iter().map(|p| p.value));

    let mut max = values().reduce(f64::max).ok_or_else(|| anyhow!("data does not have any values"))?;
    let mut min = values().reduce(f64::min).ok_or_else(|| anyhow!("data does not have any values"))?;

    if min == max {
        if max > 0.0 {
            min = 0.0;
        } else if max < 0.0 {
            max = 0.0;
        } else {
            max = 1.0;
        }
    }

    Ok((min, max))
}

/// The first timestamp in the chart, and the x extent in seconds from it
fn get_time_span(series: &[Series]) -> anyhow::Result<(DateTime<Utc>, f64)> {
    let start = series.iter().filter_map(|s| s.data.first()).map(|p| p.timestamp).min()
        .ok_or_else(|| anyhow!("data does not have any values"))?;
    let end = series.iter().filter_map(|s| s.data.last()).map(|p| p.timestamp).max()
        .ok_or_else(|| anyhow!("data does not have any values"))?;

    let span = seconds_since(start, end);
    Ok((start, if span > 0.0 { span } else { 1.0 }))
}

fn seconds_since(start: DateTime<Utc>, ts: DateTime<Utc>) -> f64 {
    (ts - start).num_milliseconds() as f64 / 1000.0
}

/// The legend entry of a series, with its latest value appended.
/// A zero latest value says nothing, especially in delta mode, so it is left off.
fn legend_label(series: &Series, metric_name: &str, latest: &BTreeMap<String, f64>) -> String {
    match latest.get(&series_label(series)) {
        Some(v) if *v != 0.0 => format!("{}: {}", short_series_label(series), format_value(metric_name, *v)),
        _ => short_series_label(series),
    }
}

/// Draw one chart onto a drawing area
fn draw_chart<DB: DrawingBackend<ErrorType: 'static>>(area: &DrawingArea<DB, Shift>, title: &str, chart_type: ChartType, series: &[Series]) -> anyhow::Result<()> {
    let (min, max) = get_min_max(series)?;
    let (start, span) = get_time_span(series)?;
    let metric_name = series.first().map(|s| s.name.as_str()).unwrap_or_default();

    // give the top of the chart some headroom, this way the legend won't collide with the graphs.
    let headroom = (max - min) * HEADROOM_CHART_MAX;

    let mut chart = setup_graph(title, area);
    let mut chart_con = chart.build_cartesian_2d(0f64..span, min..(max + headroom))?;

    let x_fmt = |secs: &f64| (start + Duration::milliseconds((secs * 1000.0) as i64)).format("%H:%M:%S").to_string();
    let y_fmt = |raw: &f64| format_value(metric_name, *raw);
    chart_con.configure_mesh().x_desc("Time (UTC)").x_label_formatter(&x_fmt).y_label_formatter(&y_fmt).draw()?;

    let bar_half_width = span * BAR_HALF_WIDTH;
    let latest = latest_values(series);
    for (idx, s) in series.iter().enumerate() {
        let color = Palette99::pick(idx).mix(0.9);
        let points: Vec<(f64, f64)> = s.data.iter().map(|p| (seconds_since(start, p.timestamp), p.value)).collect();

        let anno = match chart_type {
            ChartType::Scatter => chart_con.draw_series(points.iter().map(|(x, y)| Circle::new((*x, *y), 3, color.filled())))?,
            ChartType::Bar => chart_con.draw_series(points.iter().map(|(x, y)| Rectangle::new([(*x - bar_half_width, min), (*x + bar_half_width, *y)], color.filled())))?,
            ChartType::Line | ChartType::Table => chart_con.draw_series(LineSeries::new(points, color.stroke_width(2)))?,
        };

        anno.label(legend_label(s, metric_name, &latest))
        .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], color.filled()));
    }

    if legend_visible(series.len()) {
        chart_con.configure_series_labels().border_style(BLACK).background_style(WHITE.mix(0.8)).position(SeriesLabelPosition::UpperLeft).draw()?;
    }

    Ok(())
}

/// Render a chart to an SVG file
pub fn render_svg(path: &Path, title: &str, chart_type: ChartType, series: &[Series]) -> anyhow::Result<()> {
    debug!("writing {}...", path.display());

    let root = SVGBackend::new(path, SVG_SIZE).into_drawing_area();
    root.fill(&WHITE)?;

    draw_chart(&root, title, chart_type, series)?;

    root.present().context("could not write file")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{DateTime, TimeZone, Utc};

    use super::{get_min_max, get_time_span, legend_label};
    use crate::{
        charts::latest_values,
        sample::MetricKind,
        series::{Point, Series},
    };

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn gauge(points: &[(i64, f64)]) -> Series {
        Series {
            name: "go_goroutines".to_string(),
            kind: MetricKind::Gauge,
            labels: BTreeMap::new(),
            data: points.iter().map(|(s, v)| Point::from((ts(*s), *v))).collect(),
        }
    }

    #[test]
    fn test_min_max() -> anyhow::Result<()> {
        assert_eq!(get_min_max(&[gauge(&[(0, 5.0), (1, 9.0)]), gauge(&[(0, 2.0)])])?, (2.0, 9.0));
        assert_eq!(get_min_max(&[gauge(&[(0, 7.0)])])?, (0.0, 7.0));
        assert_eq!(get_min_max(&[gauge(&[(0, -3.0)])])?, (-3.0, 0.0));
        assert_eq!(get_min_max(&[gauge(&[(0, 0.0), (1, 0.0)])])?, (0.0, 1.0));
        assert!(get_min_max(&[gauge(&[])]).is_err());
        Ok(())
    }

    #[test]
    fn test_time_span() -> anyhow::Result<()> {
        let (start, span) = get_time_span(&[gauge(&[(5, 1.0), (65, 1.0)]), gauge(&[(2, 1.0)])])?;
        assert_eq!(start, ts(2));
        assert_eq!(span, 63.0);

        let (_, single) = get_time_span(&[gauge(&[(5, 1.0)])])?;
        assert_eq!(single, 1.0);
        Ok(())
    }

    #[test]
    fn test_legend_label() {
        let mut connections = gauge(&[(0, 3.0), (1, 4.0)]);
        connections.name = "cloudflared_tunnel_ha_connections".to_string();
        connections.labels.insert("conn_index".to_string(), "0".to_string());
        let mut idle = gauge(&[(0, 3.0), (1, 0.0)]);
        idle.labels.insert("conn_index".to_string(), "1".to_string());
        let empty = gauge(&[]);

        let latest = latest_values(&[connections.clone(), idle.clone(), empty.clone()]);
        assert_eq!(
            legend_label(&connections, "cloudflared_tunnel_ha_connections", &latest),
            "conn_index=\"0\": 4.00"
        );
        assert_eq!(legend_label(&idle, "go_goroutines", &latest), "conn_index=\"1\"");
        assert_eq!(legend_label(&empty, "go_goroutines", &latest), "go_goroutines");
    }
}
