//! Headless description of the three-panel anomaly figure.
//!
//! Everything the drawing backend needs is computed here as plain data:
//! titles, line and marker points, the optional threshold, the axis ranges
//! and the tick positions. Renderers only translate it into drawing calls.

use super::error::Result;
use super::{min_and_max, ObservationTable};
use super::{SALIENCY_COLUMN, SCORE_COLUMN, VALUE_COLUMN};
use chrono::{DateTime, Duration, NaiveDateTime, Timelike, Utc};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};

/// width and height in inches
pub const FIGURE_SIZE: (f64, f64) = (12.8, 9.6);
pub const DPI: f64 = 100.;

/// label format of the major time ticks
pub const TICK_FORMAT: &str = "%Y-%m-%d %H:%M";
pub const MAJOR_HOURS: [u32; 4] = [0, 6, 12, 18];

/// each side of an axis gets 1/20 of the data span as margin
const MARGIN_PARTS: i32 = 20;

/// above this many ticks a tick kind is dropped
const MAX_TICKS: usize = 1000;

pub const SALIENCY_TITLE: &str = "Saliency Map";
pub const SCORE_TITLE: &str = "Score";

/// the value column is plotted divided by this
pub const VALUE_DIVISOR: f64 = 1000.;

pub type Point = (NaiveDateTime, f64);

#[derive(Debug, Clone, PartialEq)]
pub struct Panel {
    pub title: String,
    /// plotted as a connected line, NAN values split it
    pub line: Vec<Point>,
    /// plotted as unconnected red circles
    pub anomalies: Vec<Point>,
    /// red dashed horizontal line across the panel
    pub threshold: Option<f64>,
}

impl Panel {
    fn from_column(
        title: &str,
        column: &str,
        divisor: f64,
        table: (&ObservationTable, &[NaiveDateTime]),
        anomalies: (&ObservationTable, &[NaiveDateTime]),
    ) -> Result<Panel> {
        Ok(Panel {
            title: title.to_string(),
            line: scaled_points(table.1, &table.0.floats(column)?, divisor),
            anomalies: scaled_points(anomalies.1, &anomalies.0.floats(column)?, divisor),
            threshold: None,
        })
    }

    /// runs of the line without NAN values
    pub fn line_segments(&self) -> Vec<&[Point]> {
        self.line
            .split(|(_, v)| v.is_nan())
            .filter(|chunk| !chunk.is_empty())
            .collect()
    }

    /// anomaly markers that can be drawn
    pub fn markers(&self) -> impl Iterator<Item = &Point> {
        self.anomalies.iter().filter(|(_, v)| v.is_finite())
    }

    /// y range covering the line, the markers and the threshold, with margins
    pub fn y_range(&self) -> (f64, f64) {
        let ys: Vec<f64> = self
            .line
            .iter()
            .chain(self.anomalies.iter())
            .map(|(_, v)| *v)
            .chain(self.threshold)
            .filter(|v| v.is_finite())
            .collect();
        match min_and_max(&ys[..]) {
            None => (0., 1.),
            Some((ymin, ymax)) if ymin == ymax => {
                let pad = if ymin == 0. { 1. } else { ymin.abs() * 0.1 };
                (ymin - pad, ymax + pad)
            }
            Some((ymin, ymax)) => {
                let margin = (ymax - ymin) / MARGIN_PARTS as f64;
                (ymin - margin, ymax + margin)
            }
        }
    }
}

fn scaled_points(times: &[NaiveDateTime], values: &[f64], divisor: f64) -> Vec<Point> {
    times
        .iter()
        .zip(values.iter())
        .map(|(&t, &v)| (t, v / divisor))
        .collect()
}

/// Tick placement and label layout shared by every panel
#[derive(Debug, Clone, PartialEq)]
pub struct TimeAxis {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub major_hours: Vec<u32>,
    pub minor_interval_hours: i64,
    pub label_format: &'static str,
    /// rotation of the major labels, in degrees
    pub label_rotation: f64,
    /// labels are shown on the bottom panel only
    pub labels_on_bottom_only: bool,
}

impl TimeAxis {
    /// x axis spanning the given times, with 5% margins
    pub fn spanning(times: &[NaiveDateTime]) -> TimeAxis {
        let (start, end) = match min_and_max(times) {
            None => {
                let epoch = DateTime::<Utc>::from(UNIX_EPOCH).naive_utc();
                (epoch, epoch + Duration::days(1))
            }
            Some((tmin, tmax)) if tmin == tmax => widened(tmin, tmax, Duration::hours(1)),
            Some((tmin, tmax)) => widened(tmin, tmax, (tmax - tmin) / MARGIN_PARTS),
        };
        TimeAxis {
            start,
            end,
            major_hours: MAJOR_HOURS.to_vec(),
            minor_interval_hours: 1,
            label_format: TICK_FORMAT,
            label_rotation: 30.,
            labels_on_bottom_only: true,
        }
    }

    /// every whole hour within the axis range
    fn hours(&self) -> impl Iterator<Item = NaiveDateTime> {
        let first = self
            .start
            .with_nanosecond(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_minute(0))
            .unwrap_or(self.start);
        let hour = Duration::hours(1);
        let first = if first < self.start {
            first.checked_add_signed(hour)
        } else {
            Some(first)
        };
        let end = self.end;
        std::iter::successors(first, move |t| t.checked_add_signed(hour))
            .take_while(move |t| *t <= end)
    }

    pub fn major_ticks(&self) -> Vec<NaiveDateTime> {
        let ticks = self
            .hours()
            .filter(|t| self.major_hours.contains(&t.hour()))
            .take(MAX_TICKS + 1)
            .collect();
        capped(ticks, "major")
    }

    pub fn minor_ticks(&self) -> Vec<NaiveDateTime> {
        let step = self.minor_interval_hours.max(1) as usize;
        let ticks = self.hours().step_by(step).take(MAX_TICKS + 1).collect();
        capped(ticks, "minor")
    }

    pub fn format_label(&self, t: &NaiveDateTime) -> String {
        t.format(self.label_format).to_string()
    }
}

/// moves the bounds outwards, a bound that would leave the datetime range stays put
fn widened(tmin: NaiveDateTime, tmax: NaiveDateTime, margin: Duration) -> (NaiveDateTime, NaiveDateTime) {
    (
        tmin.checked_sub_signed(margin).unwrap_or(tmin),
        tmax.checked_add_signed(margin).unwrap_or(tmax),
    )
}

fn capped(ticks: Vec<NaiveDateTime>, kind: &str) -> Vec<NaiveDateTime> {
    if ticks.len() > MAX_TICKS {
        warn!(
            "time range needs more than {} {} ticks, not drawing them",
            MAX_TICKS, kind
        );
        return Vec::new();
    }
    ticks
}

/// The full figure: three stacked panels sharing one time axis
#[derive(Debug, Clone, PartialEq)]
pub struct Figure {
    /// width and height in inches
    pub size: (f64, f64),
    pub panels: Vec<Panel>,
    pub time_axis: TimeAxis,
}

impl Figure {
    /// Builds the value, saliency and score panels.
    /// The times of the table and of the anomalies are parsed separately.
    pub fn build(
        table: &ObservationTable,
        anomalies: &ObservationTable,
        name: &str,
        threshold: Option<f64>,
    ) -> Result<Figure> {
        let t_anomalies = anomalies.times()?;
        let t = table.times()?;
        let all = (table, &t[..]);
        let flagged = (anomalies, &t_anomalies[..]);

        let value = Panel::from_column(name, VALUE_COLUMN, VALUE_DIVISOR, all, flagged)?;
        let saliency = Panel::from_column(SALIENCY_TITLE, SALIENCY_COLUMN, 1., all, flagged)?;
        let mut score = Panel::from_column(SCORE_TITLE, SCORE_COLUMN, 1., all, flagged)?;
        score.threshold = threshold;

        let time_axis = TimeAxis::spanning(&t);
        debug!(
            "time axis from {} to {}, threshold {:?}",
            time_axis.start, time_axis.end, threshold
        );
        Ok(Figure {
            size: FIGURE_SIZE,
            panels: vec![value, saliency, score],
            time_axis,
        })
    }

    pub fn pixel_size(&self) -> (u32, u32) {
        (
            (self.size.0 * DPI).round() as u32,
            (self.size.1 * DPI).round() as u32,
        )
    }
}
