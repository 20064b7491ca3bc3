use anomaly_plot::plot::parse_cli;
use anomaly_plot::{logging, run};
use tracing::{error, info};

fn main() {
    let config = parse_cli();
    logging::init(config.verbose);
    info!(
        "read data from {} and plot to {}",
        config.source,
        config.output.display()
    );
    if let Err(err) = run(&config) {
        error!("{}", err);
        std::process::exit(1);
    }
}
