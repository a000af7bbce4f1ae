pub mod commands;

use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::parse_duration;
use crate::transport::DEFAULT_SERVERS;

#[derive(Parser)]
#[command(name = "nyft")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Operator client for nyft components", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true, env = "NYFT_VERBOSE", help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(
        short,
        long,
        global = true,
        env = "NATS_URL",
        default_value = DEFAULT_SERVERS,
        help = "Comma-separated NATS server URLs"
    )]
    pub servers: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Discover running components and fetch their status")]
    Discover {
        #[arg(long, env = "NYFT_DISCOVERY_DEADLINE", default_value = "2s", value_parser = parse_duration, help = "Hard deadline for the discovery round")]
        deadline: Duration,

        #[arg(long, env = "NYFT_DISCOVERY_IDLE", default_value = "150ms", value_parser = parse_duration, help = "Stop after this long without a new reply")]
        idle: Duration,

        #[arg(long, env = "NYFT_STATUS_TIMEOUT", default_value = "500ms", value_parser = parse_duration, help = "Timeout for each status query")]
        status_timeout: Duration,

        #[arg(short, long, value_enum, env = "NYFT_FORMAT", default_value_t = OutputFormat::Table, help = "Output format")]
        format: OutputFormat,
    },
    #[command(about = "Fetch the status of one component")]
    Status {
        #[arg(help = "Component id")]
        id: String,

        #[arg(long, env = "NYFT_STATUS_TIMEOUT", default_value = "500ms", value_parser = parse_duration, help = "Request timeout")]
        timeout: Duration,

        #[arg(short, long, value_enum, env = "NYFT_FORMAT", default_value_t = OutputFormat::Table, help = "Output format")]
        format: OutputFormat,
    },
    #[command(about = "Ask the dispatch service for a driver")]
    Find {
        #[arg(short = 't', long = "type", env = "NYFT_VEHICLE_TYPE", default_value = "regular", help = "Vehicle kind")]
        kind: String,

        #[arg(short, long, env = "NYFT_BRIDGE_URL", help = "Go through the HTTP bridge at this URL instead of NATS")]
        url: Option<String>,

        #[arg(long, env = "NYFT_FIND_TIMEOUT", default_value = "2s", value_parser = parse_duration, help = "Request timeout")]
        timeout: Duration,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_defaults() {
        let cli = Cli::try_parse_from(["nyft", "discover"]).unwrap();
        match cli.command {
            Some(Commands::Discover {
                deadline,
                idle,
                status_timeout,
                format,
            }) => {
                assert_eq!(deadline, Duration::from_secs(2));
                assert_eq!(idle, Duration::from_millis(150));
                assert_eq!(status_timeout, Duration::from_millis(500));
                assert_eq!(format, OutputFormat::Table);
            }
            _ => panic!("expected discover command"),
        }
    }

    #[test]
    fn test_find_flags() {
        let cli = Cli::try_parse_from([
            "nyft",
            "--servers",
            "nats://10.0.0.1:4222",
            "find",
            "--type",
            "large",
            "--timeout",
            "3s",
        ])
        .unwrap();

        assert_eq!(cli.servers, "nats://10.0.0.1:4222");
        match cli.command {
            Some(Commands::Find { kind, url, timeout }) => {
                assert_eq!(kind, "large");
                assert!(url.is_none());
                assert_eq!(timeout, Duration::from_secs(3));
            }
            _ => panic!("expected find command"),
        }
    }

    #[test]
    fn test_rejects_bad_duration() {
        assert!(Cli::try_parse_from(["nyft", "discover", "--idle", "soon"]).is_err());
    }
}
