use clap::Parser;
use clickhelper::cli::{render_report, run, Cli};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    tracing::info!("CLI application startup: tracing initialised, environment loaded");

    let cli = Cli::parse();
    let json = cli.json;
    match run(cli).await {
        Ok(report) => {
            if json {
                match report.to_json_pretty() {
                    Ok(text) => println!("{text}"),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialise run report");
                        return ExitCode::FAILURE;
                    }
                }
            } else {
                println!("{}", render_report(&report));
            }
            if report.has_failures() {
                tracing::warn!("CLI completed with failures");
                ExitCode::FAILURE
            } else {
                tracing::info!("CLI completed successfully");
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "CLI exited with error");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
