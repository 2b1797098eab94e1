use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod server;

use server::settings::Settings;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the custom resource invocation endpoint
    Serve,
    /// Reconcile a single custom resource request and report its completion
    Handle {
        /// Path to the request JSON document, or "-" to read from stdin
        #[arg(long, default_value = "-")]
        event: String,
    },
    /// Check configuration for errors and unused options
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => {
            let settings = Settings::new()?;
            server::run_server(settings).await
        }
        Commands::Handle { event } => {
            let settings = Settings::new()?;
            if !server::handle_event(settings, &event).await? {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::CheckConfig => {
            println!("Checking configuration...");
            match Settings::new() {
                Ok(settings) => {
                    println!("✓ Configuration is valid");
                    println!(
                        "  waiter: {} attempts every {}s, handler timeout {}s",
                        settings.waiter.max_attempts,
                        settings.waiter.poll_interval_secs,
                        settings.handler.timeout_secs
                    );
                    Ok(())
                }
                Err(e) => {
                    eprintln!("✗ Configuration error: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
}
