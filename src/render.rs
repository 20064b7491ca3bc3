use super::error::{PlotError, Result};
use super::figure::{Figure, Panel};
use chrono::prelude::*;
use plotters::coord::combinators::BindKeyPoints;
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// matplotlib's default line color
const LINE_COLOR: RGBColor = RGBColor(31, 119, 180);
const MARKER_SIZE: u32 = 4;

/// Turns a [`Figure`] into an image file and optionally shows it.
pub trait Renderer {
    fn render(&mut self, figure: &Figure, output: &Path) -> Result<()>;

    fn show(&mut self, image: &Path) -> Result<()>;
}

/// Draws with plotters, svg or bitmap depending on the output extension
#[derive(Debug, Default)]
pub struct PlottersRenderer;

impl Renderer for PlottersRenderer {
    fn render(&mut self, figure: &Figure, output: &Path) -> Result<()> {
        write_atomically(output, |staging| {
            let size = figure.pixel_size();
            debug!("drawing {}x{} px to {}", size.0, size.1, staging.display());
            if is_svg(staging) {
                let root = SVGBackend::new(staging, size).into_drawing_area();
                draw_figure(&root, figure)
            } else {
                let root = BitMapBackend::new(staging, size).into_drawing_area();
                draw_figure(&root, figure)
            }
        })
    }

    fn show(&mut self, image: &Path) -> Result<()> {
        info!("showing {}, waiting for the viewer to close", image.display());
        let status = viewer_command(image)
            .status()
            .map_err(|e| PlotError::Show {
                path: image.to_path_buf(),
                reason: e.to_string(),
            })?;
        if !status.success() {
            return Err(PlotError::Show {
                path: image.to_path_buf(),
                reason: format!("viewer exited with {}", status),
            });
        }
        Ok(())
    }
}

fn is_svg(path: &Path) -> bool {
    path.extension()
        .map_or(false, |e| e.eq_ignore_ascii_case("svg"))
}

fn viewer_command(image: &Path) -> Command {
    if cfg!(target_os = "macos") {
        let mut cmd = Command::new("open");
        cmd.arg("-W").arg(image);
        cmd
    } else if cfg!(target_os = "windows") {
        let mut cmd = Command::new("cmd");
        cmd.args(&["/C", "start", "/WAIT", ""]).arg(image);
        cmd
    } else {
        // returns once the desktop opener hands the file over
        let mut cmd = Command::new("xdg-open");
        cmd.arg(image);
        cmd
    }
}

/// Hidden sibling of the output that the image is drawn into.
/// It keeps the output extension so the encoder is picked from it,
/// an output without extension is encoded as png.
pub fn staging_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map_or_else(|| OsString::from("output"), OsString::from);
    let ext = output
        .extension()
        .map_or_else(|| OsString::from("png"), OsString::from);
    let mut name = OsString::from(".");
    name.push(stem);
    name.push(".partial.");
    name.push(ext);
    output.with_file_name(name)
}

/// Runs `draw` on the staging path and renames the result to `output`,
/// the staging file is removed on any failure.
pub fn write_atomically<F>(output: &Path, draw: F) -> Result<()>
where
    F: FnOnce(&Path) -> std::result::Result<(), Box<dyn std::error::Error>>,
{
    let write_error = |reason: String| PlotError::OutputWrite {
        path: output.to_path_buf(),
        reason,
    };
    if output.is_dir() || output.file_name().is_none() {
        return Err(write_error("not a file path".to_string()));
    }
    let staging = staging_path(output);
    if let Err(e) = draw(&staging) {
        let _ = fs::remove_file(&staging);
        return Err(write_error(e.to_string()));
    }
    if let Err(e) = fs::rename(&staging, output) {
        let _ = fs::remove_file(&staging);
        return Err(write_error(e.to_string()));
    }
    Ok(())
}

fn utc(t: &NaiveDateTime) -> DateTime<Utc> {
    TimeZone::from_utc_datetime(&Utc, t)
}

/// plots the three panels stacked vertically on the root area
fn draw_figure<DB>(
    root: &DrawingArea<DB, Shift>,
    figure: &Figure,
) -> std::result::Result<(), Box<dyn std::error::Error>>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;
    let areas = root.split_evenly((figure.panels.len(), 1));
    let last = figure.panels.len().saturating_sub(1);
    for (i, (panel, area)) in figure.panels.iter().zip(areas.iter()).enumerate() {
        let with_labels = !figure.time_axis.labels_on_bottom_only || i == last;
        draw_panel(area, figure, panel, with_labels)?;
    }
    root.present()?;
    Ok(())
}

fn draw_panel<DB>(
    area: &DrawingArea<DB, Shift>,
    figure: &Figure,
    panel: &Panel,
    with_labels: bool,
) -> std::result::Result<(), Box<dyn std::error::Error>>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let axis = &figure.time_axis;
    let xmin = utc(&axis.start);
    let xmax = utc(&axis.end);
    let xrange = (xmin..xmax)
        .with_key_points(axis.major_ticks().iter().map(utc).collect())
        .with_light_points(axis.minor_ticks().iter().map(utc));
    let (ymin, ymax) = panel.y_range();

    let mut chart = ChartBuilder::on(area)
        .caption(&panel.title, ("sans-serif", 22))
        .margin(10)
        .x_label_area_size(if with_labels { 40 } else { 10 })
        .y_label_area_size(70)
        .build_cartesian_2d(xrange, ymin..ymax)?;

    // labels are right-aligned under their tick, as date labels usually are
    let label_pos = Pos::new(HPos::Right, VPos::Top);
    let xfmt = axis.label_format;
    let xlabel = |x: &DateTime<Utc>| {
        if with_labels {
            x.format(xfmt).to_string()
        } else {
            String::new()
        }
    };
    chart
        .configure_mesh()
        .disable_y_mesh()
        .light_line_style(&RGBColor(235, 235, 235))
        .bold_line_style(RGBColor(200, 200, 200).stroke_width(1))
        .set_all_tick_mark_size(4)
        .label_style(("sans-serif", 14))
        .x_label_style(TextStyle::from(("sans-serif", 14).into_font()).pos(label_pos))
        .x_label_formatter(&xlabel)
        .y_label_formatter(&|y: &f64| format!("{:.2}", y))
        .draw()?;

    for segment in panel.line_segments() {
        let line = LineSeries::new(
            segment.iter().map(|(t, v)| (utc(t), *v)),
            LINE_COLOR.stroke_width(1),
        );
        chart.draw_series(line)?;
    }

    let markers = panel
        .markers()
        .map(|(t, v)| Circle::new((utc(t), *v), MARKER_SIZE, RED.filled()));
    chart.draw_series(markers)?;

    if let Some(threshold) = panel.threshold.filter(|t| t.is_finite()) {
        let line = DashedLineSeries::new(
            vec![(xmin, threshold), (xmax, threshold)],
            10,
            6,
            RED.stroke_width(2),
        );
        chart.draw_series(line)?;
    }
    Ok(())
}
