use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use nyft_common::{new_id, subject, DriveRequest, StatusSnapshot};
use serde::Serialize;
use tracing::{debug, info};

use crate::cli::{Commands, OutputFormat};
use crate::config::DiscoveryConfig;
use crate::discovery::{Discovery, Survey};
use crate::reconnect::ReconnectPolicy;
use crate::transport::{NatsConfig, NatsTransport, Transport};
use crate::{NyftError, Result};

pub async fn handle_command(servers: &str, command: Commands) -> Result<()> {
    match command {
        Commands::Discover {
            deadline,
            idle,
            status_timeout,
            format,
        } => {
            let config = DiscoveryConfig {
                hard_deadline: deadline,
                idle_window: idle,
                status_timeout,
            };
            handle_discover(servers, config, format).await
        }
        Commands::Status {
            id,
            timeout,
            format,
        } => handle_status(servers, &id, timeout, format).await,
        Commands::Find { kind, url, timeout } => match url {
            Some(url) => handle_find_http(&url, &kind, timeout).await,
            None => handle_find(servers, &kind, timeout).await,
        },
    }
}

async fn connect(servers: &str) -> Result<Arc<dyn Transport>> {
    let config = NatsConfig::new(servers, ReconnectPolicy::fail_fast());
    let name = format!("nyft-cli:{}", new_id());
    let transport = NatsTransport::connect(&config, &name).await?;
    Ok(Arc::new(transport))
}

async fn handle_discover(servers: &str, config: DiscoveryConfig, format: OutputFormat) -> Result<()> {
    let transport = connect(servers).await?;
    let survey = Discovery::new(transport.clone()).survey(&config).await?;
    transport.close().await?;

    match format {
        OutputFormat::Table => print_survey(&survey),
        OutputFormat::Json => print_json(&survey)?,
        OutputFormat::Yaml => print_yaml(&survey)?,
    }
    Ok(())
}

async fn handle_status(
    servers: &str,
    id: &str,
    timeout: Duration,
    format: OutputFormat,
) -> Result<()> {
    let transport = connect(servers).await?;
    let status = Discovery::new(transport.clone()).status_of(id, timeout).await;
    transport.close().await?;
    let status = status?;

    match format {
        OutputFormat::Table => print_status_table(std::slice::from_ref(&status)),
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Yaml => print_yaml(&status)?,
    }
    Ok(())
}

async fn handle_find(servers: &str, kind: &str, timeout: Duration) -> Result<()> {
    let transport = connect(servers).await?;
    let payload = DriveRequest::new(kind).encode()?;

    info!(kind, "Requesting a driver");
    let response = transport
        .request(subject::FIND, Bytes::from(payload), timeout)
        .await;
    transport.close().await?;

    let response = response?;
    println!("[Response] {}", String::from_utf8_lossy(&response.payload));
    Ok(())
}

async fn handle_find_http(url: &str, kind: &str, timeout: Duration) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| NyftError::Transport(e.to_string()))?;

    info!(kind, url, "Requesting a driver over HTTP");
    let response = client
        .post(url)
        .json(&serde_json::json!({ "type": kind }))
        .send()
        .await
        .map_err(|e| NyftError::Transport(e.to_string()))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| NyftError::Transport(e.to_string()))?;
    debug!(%status, "HTTP bridge replied");

    println!("[Response] {}", body);
    Ok(())
}

fn print_survey(survey: &Survey) {
    println!(
        "Found {} components in {}ms",
        survey.replies.len(),
        survey.discovery_time.as_millis()
    );
    if survey.replies.is_empty() {
        return;
    }

    println!();
    print_status_table(&survey.statuses);

    let missing = survey.replies.len() - survey.statuses.len();
    if missing > 0 {
        println!("\n{} component(s) did not answer the status query.", missing);
    }
}

fn print_status_table(statuses: &[StatusSnapshot]) {
    println!(
        "{:<16} {:<34} {:>9}  {}",
        "KIND", "ID", "MEM", "CMDLINE"
    );
    println!("{}", "-".repeat(90));

    for status in statuses {
        println!(
            "{:<16} {:<34} {:>9}  {}",
            truncate(&status.kind, 16),
            truncate(&status.id, 34),
            format_bytes(status.heap_bytes),
            status.process_args.join(" ")
        );
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_yaml<T: Serialize>(value: &T) -> Result<()> {
    let yaml = serde_yaml::to_string(value).map_err(|e| NyftError::Config(e.to_string()))?;
    print!("{}", yaml);
    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1}GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
