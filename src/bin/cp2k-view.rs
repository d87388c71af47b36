use clap::Parser;
use cp2k_dash::logging::{self, LogConfig};
use cp2k_dash::viewer::{self, ViewCli};

fn main() {
    let args = ViewCli::parse();
    let log = LogConfig {
        level: Some(args.log_level.clone()),
        file: None,
    };
    if let Err(e) = logging::init_logging(&log) {
        eprintln!("Warning: {e:#}");
    }
    if let Err(e) = viewer::run(args) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
