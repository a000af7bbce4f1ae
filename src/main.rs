use clap::Parser;
use nyft::cli::{commands, Cli};
use std::process;
use tracing::debug;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = nyft::logging::init(cli.verbose) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    debug!("Starting nyft v{}", nyft::VERSION);

    let result = match cli.command {
        Some(command) => commands::handle_command(&cli.servers, command).await,
        None => {
            eprintln!("No command specified. Use --help for usage information.");
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
