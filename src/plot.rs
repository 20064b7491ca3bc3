use super::{Source, VERSION};
use clap::{App, Arg};
use std::ffi::OsString;
use std::path::PathBuf;

/// Everything one plotting run needs, as collected from the CLI.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotConfig {
    pub source: Source,
    /// title of the value panel
    pub name: String,
    pub threshold: Option<f64>,
    pub output: PathBuf,
    pub show: bool,
    pub verbose: bool,
}

fn cli_app<'a, 'b>() -> App<'a, 'b> {
    let arg_path = Arg::with_name("path")
        .help("path to the csv file with the detection results (\"-\" to read from stdin)")
        .required(true)
        .index(1);
    let arg_name = Arg::with_name("name")
        .help("title of the value plot")
        .short("n")
        .long("name")
        .takes_value(true)
        .default_value("value");
    let arg_threshold = Arg::with_name("threshold")
        .help("threshold for the anomaly score, drawn as a dashed line")
        .short("t")
        .long("threshold")
        .takes_value(true)
        .allow_hyphen_values(true)
        .validator(|v| match v.parse::<f64>() {
            Ok(t) if t.is_finite() => Ok(()),
            _ => Err(format!("{} is not a finite number", v)),
        });
    let arg_output = Arg::with_name("output")
        .help("path of the output image, the extension selects the format")
        .short("o")
        .long("output")
        .takes_value(true)
        .default_value("output.png");
    let arg_show = Arg::with_name("show")
        .help("show the plot after saving it")
        .long_help(
            "open the saved image in the system viewer; waits for it to close on macOS \
             and Windows, on other platforms it returns once xdg-open has handed the file over",
        )
        .short("s")
        .long("show");
    let arg_verbose = Arg::with_name("verbose")
        .help("debug logging")
        .short("v")
        .long("verbose");
    App::new("anomaly_plot")
        .version(VERSION.unwrap_or("unknown"))
        .about("cli app to plot the results of the anomaly detection")
        .arg(arg_path)
        .arg(arg_name)
        .arg(arg_threshold)
        .arg(arg_output)
        .arg(arg_show)
        .arg(arg_verbose)
}

/// Takes the CLI arguments that control the plotting of the detection results,
/// exits with the usage message on invalid arguments.
pub fn parse_cli() -> PlotConfig {
    match parse_cli_from(std::env::args_os()) {
        Ok(config) => config,
        Err(e) => e.exit(),
    }
}

pub fn parse_cli_from<I, T>(args: I) -> Result<PlotConfig, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli_args = cli_app().get_matches_from_safe(args)?;
    let source = Source::from(cli_args.value_of("path").unwrap_or("-"));
    let name = cli_args.value_of("name").unwrap_or("value").to_string();
    // already checked by the validator
    let threshold = cli_args
        .value_of("threshold")
        .and_then(|t| t.parse::<f64>().ok());
    let output = PathBuf::from(cli_args.value_of("output").unwrap_or("output.png"));
    Ok(PlotConfig {
        source,
        name,
        threshold,
        output,
        show: cli_args.is_present("show"),
        verbose: cli_args.is_present("verbose"),
    })
}
