// flat table rows for a chart, written out as CSV or printed as a text table

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{
    charts::chart_rows,
    format::format_labels,
    series::Series,
};

/// One point of one series, flattened
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub timestamp: DateTime<Utc>,
    pub series_name: String,
    /// `-` for unlabelled series
    pub labels: String,
    pub value: f64,
}

/// Every point of every series, series by series
pub fn table_rows(series: &[Series]) -> Vec<TableRow> {
    series
        .iter()
        .flat_map(|s| {
            let labels = match format_labels(&s.labels) {
                l if l.is_empty() => "-".to_string(),
                l => l,
            };
            s.data.iter().map(move |p| TableRow {
                timestamp: p.timestamp,
                series_name: s.name.clone(),
                labels: labels.clone(),
                value: p.value,
            })
        })
        .collect()
}

/// Write rows as CSV with a `Timestamp,Series,Labels,Value` header
pub fn write_csv<W: Write>(out: &mut W, rows: &[TableRow]) -> anyhow::Result<()> {
    writeln!(out, "Timestamp,Series,Labels,Value")?;
    for row in rows {
        writeln!(
            out,
            "{},\"{}\",\"{}\",{}",
            row.timestamp.to_rfc3339(),
            row.series_name,
            row.labels.replace('"', "\"\""),
            row.value
        )?;
    }
    Ok(())
}

/// Export a chart's points to `<dir>/<stem>_data.csv`, returning the path written
pub fn export_csv(dir: &Path, stem: &str, series: &[Series]) -> anyhow::Result<PathBuf> {
    let path = dir.join(format!("{}_data.csv", stem));
    debug!("writing {}...", path.display());

    let file = File::create(&path).context("error creating CSV file")?;
    let mut out = BufWriter::new(file);
    write_csv(&mut out, &table_rows(series))?;
    out.flush().context("could not write file")?;

    Ok(path)
}

/// Print a chart as a time-aligned text table, one column per series
pub fn print_table(title: &str, series: &[Series]) {
    println!("{}:", title);
    for row in chart_rows(series) {
        let cells: Vec<String> = row
            .values
            .iter()
            .map(|(label, value)| match value {
                Some(v) => format!("{}={}", label, v),
                None => format!("{}=-", label),
            })
            .collect();
        println!("\t{}\t{}", row.timestamp.to_rfc3339(), cells.join("\t"));
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{TimeZone, Utc};

    use super::{table_rows, write_csv};
    use crate::{
        sample::MetricKind,
        series::{Point, Series},
    };

    #[test]
    fn test_csv_output() -> anyhow::Result<()> {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let labelled = Series {
            name: "http_status".to_string(),
            kind: MetricKind::Counter,
            labels: BTreeMap::from([("code".to_string(), "200".to_string())]),
            data: vec![Point::from((at, 5.0))],
        };
        let plain = Series {
            name: "go_goroutines".to_string(),
            kind: MetricKind::Gauge,
            labels: BTreeMap::new(),
            data: vec![Point::from((at, 42.5))],
        };

        let rows = table_rows(&[labelled, plain]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].labels, "-");

        let mut out: Vec<u8> = Vec::new();
        write_csv(&mut out, &rows)?;
        let text = String::from_utf8(out)?;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Timestamp,Series,Labels,Value");
        assert_eq!(lines[1], r#"2024-05-01T10:00:00+00:00,"http_status","code=""200""",5"#);
        assert_eq!(lines[2], r#"2024-05-01T10:00:00+00:00,"go_goroutines","-",42.5"#);
        Ok(())
    }
}
