use clap::Parser;
use cp2k_dash::{cli, logging};

#[tokio::main]
async fn main() {
    let args = cli::Cli::parse();
    if let Err(e) = logging::init_logging(&args.log_config()) {
        eprintln!("Warning: {e:#}");
    }

    // Precondition failures exit before anything is launched or written.
    let plan = match cli::plan(&args) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    match cli::run(args, plan).await {
        Ok(report) => {
            match serde_json::to_string(&report) {
                Ok(line) => println!("{line}"),
                Err(e) => eprintln!("Error: {e}"),
            }
            std::process::exit(report.return_code);
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}
