use chrono::prelude::*;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::PathBuf;
use tracing::{debug, info};

pub mod error;
pub mod figure;
pub mod logging;
pub mod plot;
pub mod render;

use error::{PlotError, Result};
use figure::Figure;
use plot::PlotConfig;
use render::{PlottersRenderer, Renderer};

pub const VERSION: Option<&'static str> = option_env!("CARGO_PKG_VERSION");

/// datetime format written by the anomaly detector
pub const DT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// accepted `Time` formats, tried in order; `%.f` also matches no fraction
const DT_INPUT_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

pub const TIME_COLUMN: &str = "Time";
pub const VALUE_COLUMN: &str = "value";
pub const SALIENCY_COLUMN: &str = "saliency";
pub const SCORE_COLUMN: &str = "score";
pub const OUTPUT_COLUMN: &str = "output";

/// Where the csv comes from, "-" selects the standard input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Stdin,
    File(PathBuf),
}

impl From<&str> for Source {
    fn from(path: &str) -> Source {
        match path {
            "-" => Source::Stdin,
            p => Source::File(PathBuf::from(p)),
        }
    }
}

impl Source {
    pub fn open(&self) -> Result<Box<dyn BufRead>> {
        match self {
            Source::Stdin => Ok(Box::new(BufReader::new(io::stdin()))),
            Source::File(path) => {
                let file = File::open(path).map_err(|source| PlotError::Open {
                    path: path.clone(),
                    source,
                })?;
                Ok(Box::new(BufReader::new(file)))
            }
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Stdin => write!(f, "<stdin>"),
            Source::File(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Row {
    line: u64,
    fields: Vec<String>,
}

/// The loaded time series, kept as untyped csv fields.
///
/// Columns are looked up by name when they are first needed,
/// so a missing column surfaces as a schema error at that point.
/// Each row remembers its line in the source for error reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationTable {
    headers: Vec<String>,
    rows: Vec<Row>,
}

impl ObservationTable {
    /// Init the table from any csv reader with a header row;
    /// short rows are accepted and their missing fields read as empty
    pub fn from_reader<R: Read>(rdr: R) -> Result<ObservationTable> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(rdr);
        let headers: Vec<String> = reader.headers()?.iter().map(String::from).collect();
        if headers.iter().all(|h| h.is_empty()) {
            return Err(PlotError::NoHeader);
        }
        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result?;
            let line = record.position().map_or(0, |p| p.line());
            rows.push(Row {
                line,
                fields: record.iter().map(String::from).collect(),
            });
        }
        debug!("read {} rows with columns {:?}", rows.len(), headers);
        Ok(ObservationTable { headers, rows })
    }

    pub fn from_source(source: &Source) -> Result<ObservationTable> {
        ObservationTable::from_reader(source.open()?)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    fn column_index(&self, name: &str) -> Result<usize> {
        self.headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| PlotError::MissingColumn(name.to_string()))
    }

    /// (source line, raw field) pairs of a column
    pub fn column<'a>(&'a self, name: &str) -> Result<impl Iterator<Item = (u64, &'a str)> + 'a> {
        let idx = self.column_index(name)?;
        Ok(self.rows.iter().map(move |row| {
            let field = row.fields.get(idx).map_or("", String::as_str);
            (row.line, field)
        }))
    }

    /// parses a column as floats, empty fields become NAN
    pub fn floats(&self, name: &str) -> Result<Vec<f64>> {
        self.column(name)?
            .map(|(line, field)| {
                parse_float(field).ok_or_else(|| PlotError::InvalidNumber {
                    column: name.to_string(),
                    line,
                    value: field.to_string(),
                })
            })
            .collect()
    }

    /// parses the time column, every field must hold a datetime
    pub fn times(&self) -> Result<Vec<NaiveDateTime>> {
        self.column(TIME_COLUMN)?
            .map(|(line, field)| {
                parse_datetime(field).ok_or_else(|| PlotError::InvalidTime {
                    line,
                    value: field.to_string(),
                })
            })
            .collect()
    }

    /// the rows flagged with output == 1, as a new table with the same columns
    pub fn anomalies(&self) -> Result<ObservationTable> {
        let idx = self.column_index(OUTPUT_COLUMN)?;
        let rows = self
            .rows
            .iter()
            .filter(|row| row.fields.get(idx).map_or(false, |f| is_anomaly_flag(f)))
            .cloned()
            .collect();
        Ok(ObservationTable {
            headers: self.headers.clone(),
            rows,
        })
    }
}

/// Anything that does not read as the number 1 is not an anomaly.
pub fn is_anomaly_flag(field: &str) -> bool {
    field.trim().parse::<f64>().map_or(false, |v| v == 1.0)
}

fn parse_float(field: &str) -> Option<f64> {
    let field = field.trim();
    if field.is_empty() {
        return Some(f64::NAN);
    }
    field.parse().ok()
}

/// Parses the timestamp formats found in the detector output and the common ISO variants;
/// offsets are converted to UTC and a bare date means midnight.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    DT_INPUT_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.naive_utc()))
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

pub fn min_and_max<T: std::cmp::PartialOrd + Copy>(s: &[T]) -> Option<(T, T)> {
    let mut self_iter = s.iter();
    let (mut min, mut max) = match self_iter.next() {
        Some(v) => (*v, *v),
        None => return None,
    };
    for es in self_iter {
        if *es > max {
            max = *es
        }
        if *es < min {
            min = *es
        }
    }
    Some((min, max))
}

/// Loads the configured source, renders the figure with plotters and shows it if asked.
pub fn run(config: &PlotConfig) -> Result<()> {
    let input = config.source.open()?;
    let mut renderer = PlottersRenderer::default();
    run_with(config, input, &mut renderer)
}

/// Same as [`run`] with the input and the renderer supplied by the caller.
pub fn run_with<R: Read>(config: &PlotConfig, input: R, renderer: &mut dyn Renderer) -> Result<()> {
    let table = ObservationTable::from_reader(input)?;
    let anomalies = table.anomalies()?;
    info!(
        "loaded {} rows, {} flagged as anomalies",
        table.len(),
        anomalies.len()
    );
    let figure = Figure::build(&table, &anomalies, &config.name, config.threshold)?;
    renderer.render(&figure, &config.output)?;
    info!("figure written to {}", config.output.display());
    if config.show {
        renderer.show(&config.output)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Write;

    const CSV: &str = "Time,value,saliency,score,output\n\
        2024-01-01 00:00:00,1000,0.1,0.2,0\n\
        2024-01-01 01:00:00,2000,0.9,0.95,1\n\
        2024-01-01 02:00:00,1500,0.3,0.4,2\n\
        2024-01-01 03:00:00,1200,0.2,0.3,1.0\n";

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, DT_FORMAT).unwrap()
    }

    #[test]
    fn test_from_reader() {
        let table = ObservationTable::from_reader(CSV.as_bytes()).unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table.headers()[0], TIME_COLUMN);
        assert_eq!(
            table.floats(VALUE_COLUMN).unwrap(),
            vec![1000., 2000., 1500., 1200.]
        );
        assert_eq!(table.times().unwrap()[1], dt("2024-01-01 01:00:00"));
    }

    #[test]
    fn test_anomalies_subset() {
        let table = ObservationTable::from_reader(CSV.as_bytes()).unwrap();
        let anomalies = table.anomalies().unwrap();
        let flagged = table
            .column(OUTPUT_COLUMN)
            .unwrap()
            .filter(|(_, f)| is_anomaly_flag(f))
            .count();
        assert_eq!(anomalies.len(), flagged);
        assert_eq!(anomalies.len(), 2);

        // every anomaly matches a full-table row at the same time
        let times = table.times().unwrap();
        let scores = table.floats(SCORE_COLUMN).unwrap();
        for (t, s) in anomalies
            .times()
            .unwrap()
            .iter()
            .zip(anomalies.floats(SCORE_COLUMN).unwrap())
        {
            let i = times.iter().position(|x| x == t).unwrap();
            assert_eq!(scores[i], s);
        }
    }

    #[test]
    fn test_anomaly_flag_is_lenient() {
        assert!(is_anomaly_flag("1"));
        assert!(is_anomaly_flag("1.0"));
        assert!(!is_anomaly_flag("0"));
        assert!(!is_anomaly_flag("2"));
        assert!(!is_anomaly_flag("yes"));
        assert!(!is_anomaly_flag(""));
    }

    #[test]
    fn test_missing_column_is_schema_error() {
        let csv = "Time,value,saliency,output\n2024-01-01 00:00:00,1,2,0\n";
        let table = ObservationTable::from_reader(csv.as_bytes()).unwrap();
        let err = table.floats(SCORE_COLUMN).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);

        let csv = "Time,value,saliency,score\n2024-01-01 00:00:00,1,2,0\n";
        let table = ObservationTable::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(table.anomalies().unwrap_err().kind(), ErrorKind::Schema);
    }

    #[test]
    fn test_empty_input_has_no_header() {
        let err = ObservationTable::from_reader("".as_bytes()).unwrap_err();
        assert!(matches!(err, PlotError::NoHeader));
        assert_eq!(err.kind(), ErrorKind::DataLoad);
    }

    #[test]
    fn test_empty_fields_are_nan() {
        let csv = "Time,value,saliency,score,output\n\
            2024-01-01 00:00:00,,0.1,0.2,0\n\
            2024-01-01 01:00:00,5,0.1\n";
        let table = ObservationTable::from_reader(csv.as_bytes()).unwrap();
        let values = table.floats(VALUE_COLUMN).unwrap();
        assert!(values[0].is_nan());
        assert_eq!(values[1], 5.);
        assert!(table.floats(SCORE_COLUMN).unwrap()[1].is_nan());
        assert!(table.anomalies().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_values_report_line() {
        let csv = "Time,value,saliency,score,output\n\
            2024-01-01 00:00:00,1,0.1,0.2,0\n\
            2024-01-01 01:00:00,abc,0.1,0.2,0\n\
            later,1,0.1,0.2,0\n";
        let table = ObservationTable::from_reader(csv.as_bytes()).unwrap();
        match table.floats(VALUE_COLUMN).unwrap_err() {
            PlotError::InvalidNumber { column, line, value } => {
                assert_eq!(column, VALUE_COLUMN);
                assert_eq!(line, 3);
                assert_eq!(value, "abc");
            }
            other => panic!("unexpected error {}", other),
        }
        match table.times().unwrap_err() {
            PlotError::InvalidTime { line, .. } => assert_eq!(line, 4),
            other => panic!("unexpected error {}", other),
        }
    }

    #[test]
    fn test_parse_datetime_formats() {
        let expected = dt("2024-01-01 01:00:00");
        assert_eq!(parse_datetime("2024-01-01 01:00:00"), Some(expected));
        assert_eq!(parse_datetime("2024-01-01T01:00:00"), Some(expected));
        assert_eq!(parse_datetime("2024-01-01T01:00"), Some(expected));
        assert_eq!(parse_datetime("2024-01-01T03:00:00+02:00"), Some(expected));
        assert_eq!(
            parse_datetime("2024-01-01"),
            Some(dt("2024-01-01 00:00:00"))
        );
        assert_eq!(
            parse_datetime("2024-01-01 01:00:00.500"),
            Some(expected + chrono::Duration::milliseconds(500))
        );
        assert_eq!(parse_datetime("01/01/2024"), None);
    }

    #[test]
    fn test_source_from_str() {
        assert_eq!(Source::from("-"), Source::Stdin);
        assert_eq!(
            Source::from("data.csv"),
            Source::File(PathBuf::from("data.csv"))
        );
        assert_eq!(Source::Stdin.to_string(), "<stdin>");
    }

    #[test]
    fn test_file_and_reader_give_same_table() {
        let path = std::env::temp_dir().join(format!("anomaly_plot_src_{}.csv", std::process::id()));
        File::create(&path).unwrap().write_all(CSV.as_bytes()).unwrap();
        let from_file = ObservationTable::from_source(&Source::File(path.clone())).unwrap();
        let from_reader = ObservationTable::from_reader(CSV.as_bytes()).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(from_file, from_reader);
    }

    #[test]
    fn test_missing_file() {
        let source = Source::from("/nonexistent/anomaly_plot/input.csv");
        let err = ObservationTable::from_source(&source).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataLoad);
    }

    #[test]
    fn test_min_and_max() {
        assert_eq!(min_and_max(&[3., 1., 2.]), Some((1., 3.)));
        assert_eq!(min_and_max::<f64>(&[]), None);
    }
}
