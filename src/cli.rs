//! Command-line interface: argument parsing and command execution.

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use courier_core::{DeliveryContext, DeliveryId, Priority};
use courier_delivery::{
    instrument::timed, BatchCoordinator, DeliveryClient, DeliveryOrchestrator, DeliveryRequest,
    DeliveryResult,
};
use serde::Serialize;
use tracing::info;

use crate::config::Config;

/// Webhook delivery with bounded retries and batch fan-out.
#[derive(Debug, Parser)]
#[command(name = "courier", version, about)]
pub struct Cli {
    /// Configuration file (defaults to ./courier.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Command to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Deliver one payload to one endpoint.
    Deliver(DeliverArgs),
    /// Deliver every entry of a JSON array file.
    Batch(BatchArgs),
    /// Check whether an endpoint answers.
    Probe(ProbeArgs),
}

/// Arguments of `courier deliver`.
#[derive(Debug, Args)]
pub struct DeliverArgs {
    /// Destination URL.
    #[arg(long)]
    pub url: String,

    /// JSON payload.
    #[arg(long)]
    pub payload: String,

    /// Delivery id (generated when omitted).
    #[arg(long)]
    pub id: Option<String>,

    /// Extra header as `Name: value`, may be repeated.
    #[arg(long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Priority class.
    #[arg(long)]
    pub priority: Option<Priority>,

    /// Event type label.
    #[arg(long)]
    pub event_type: Option<String>,

    /// Agent id.
    #[arg(long)]
    pub agent_id: Option<String>,

    /// Workflow id.
    #[arg(long)]
    pub workflow_id: Option<String>,
}

/// Arguments of `courier batch`.
#[derive(Debug, Args)]
pub struct BatchArgs {
    /// JSON file holding an array of deliveries.
    #[arg(long)]
    pub file: PathBuf,

    /// Deliveries in flight at once (overrides configuration).
    #[arg(long)]
    pub concurrency: Option<usize>,
}

/// Arguments of `courier probe`.
#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Endpoint URL.
    #[arg(long)]
    pub url: String,

    /// Probe timeout in milliseconds (overrides configuration).
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

/// Splits `Name: value` into its parts.
fn parse_header(raw: &str) -> std::result::Result<(String, String), String> {
    let (name, value) =
        raw.split_once(':').ok_or_else(|| format!("expected `Name: value`, got `{raw}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("header name missing in `{raw}`"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

impl DeliverArgs {
    /// Builds the delivery request these arguments describe.
    pub fn into_request(self) -> Result<DeliveryRequest> {
        let payload: serde_json::Value =
            serde_json::from_str(&self.payload).context("--payload is not valid JSON")?;
        let delivery_id = match self.id {
            Some(id) => DeliveryId::parse(&id).context("invalid --id")?,
            None => DeliveryId::new(),
        };

        let headers: HashMap<String, String> = self.headers.into_iter().collect();
        let mut request =
            DeliveryRequest::new(delivery_id.clone(), self.url, payload).with_headers(headers);

        let has_context = self.priority.is_some()
            || self.event_type.is_some()
            || self.agent_id.is_some()
            || self.workflow_id.is_some();
        if has_context {
            let mut context = DeliveryContext::new(delivery_id)
                .with_priority(self.priority.unwrap_or_default());
            if let Some(event_type) = self.event_type {
                context = context.with_event_type(event_type);
            }
            if let Some(agent_id) = self.agent_id {
                context = context.with_agent_id(agent_id);
            }
            if let Some(workflow_id) = self.workflow_id {
                context = context.with_workflow_id(workflow_id);
            }
            request = request.with_context(context);
        }

        Ok(request)
    }
}

/// Runs a command and reports whether everything it did succeeded.
pub async fn run(command: Command, config: &Config) -> Result<bool> {
    match command {
        Command::Deliver(args) => deliver(args, config).await,
        Command::Batch(args) => batch(args, config).await,
        Command::Probe(args) => probe(args, config).await,
    }
}

fn orchestrator(config: &Config) -> Result<Arc<DeliveryOrchestrator>> {
    let orchestrator = DeliveryOrchestrator::with_http_client(
        config.to_delivery_config(),
        config.to_client_config(),
    )
    .context("Failed to create delivery orchestrator")?;
    Ok(Arc::new(orchestrator))
}

async fn deliver(args: DeliverArgs, config: &Config) -> Result<bool> {
    let request = args.into_request()?;
    let orchestrator = orchestrator(config)?;

    let (result, elapsed) = timed("deliver", orchestrator.deliver(request)).await;
    info!(success = result.success, elapsed_ms = elapsed.as_millis(), "delivery finished");

    print_json(&result)?;
    Ok(result.success)
}

async fn batch(args: BatchArgs, config: &Config) -> Result<bool> {
    let raw = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let requests: Vec<DeliveryRequest> = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON array of deliveries", args.file.display()))?;

    let concurrency = args.concurrency.unwrap_or(config.batch_concurrency);
    let coordinator = BatchCoordinator::new(orchestrator(config)?, concurrency)
        .context("Invalid batch concurrency")?;

    let (results, elapsed) = timed("batch", coordinator.deliver_all(requests)).await;
    let summary = BatchSummary::new(&results);
    info!(
        total = summary.total,
        succeeded = summary.succeeded,
        rounds = coordinator.rounds_for(summary.total),
        elapsed_ms = elapsed.as_millis(),
        "batch finished"
    );

    let all_succeeded = summary.failed == 0;
    print_json(&BatchReport { summary, results })?;
    Ok(all_succeeded)
}

async fn probe(args: ProbeArgs, config: &Config) -> Result<bool> {
    let client = DeliveryClient::new(
        config.to_client_config(),
        Arc::new(courier_core::RealClock::new()),
    )
    .context("Failed to create HTTP client")?;
    let timeout = args.timeout_ms.map_or(config.probe_timeout(), std::time::Duration::from_millis);

    let result = client.probe(&args.url, timeout).await;

    print_json(&result)?;
    Ok(result.reachable)
}

/// Counts across a batch.
#[derive(Debug, Serialize)]
struct BatchSummary {
    total: usize,
    succeeded: usize,
    failed: usize,
}

impl BatchSummary {
    fn new(results: &[DeliveryResult]) -> Self {
        let succeeded = results.iter().filter(|result| result.success).count();
        Self { total: results.len(), succeeded, failed: results.len() - succeeded }
    }
}

#[derive(Debug, Serialize)]
struct BatchReport {
    summary: BatchSummary,
    results: Vec<DeliveryResult>,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render output")?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn header_parsing() {
        assert_eq!(
            parse_header("Authorization: Bearer a:b").unwrap(),
            ("Authorization".to_string(), "Bearer a:b".to_string())
        );
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header(": value").is_err());
    }

    #[test]
    fn deliver_args_build_request_with_context() {
        let cli = Cli::parse_from([
            "courier",
            "deliver",
            "--url",
            "https://example.com/hook",
            "--payload",
            r#"{"event":"created"}"#,
            "--id",
            "d-1",
            "--header",
            "X-Custom: yes",
            "--priority",
            "critical",
            "--event-type",
            "agent.completed",
        ]);
        let Command::Deliver(args) = cli.command else { panic!("expected deliver") };

        let request = args.into_request().unwrap();

        assert_eq!(request.delivery_id.as_str(), "d-1");
        assert_eq!(request.payload, serde_json::json!({"event": "created"}));
        assert_eq!(request.headers["X-Custom"], "yes");
        assert!(request.is_critical());
        assert_eq!(
            request.context.and_then(|context| context.event_type).as_deref(),
            Some("agent.completed")
        );
    }

    #[test]
    fn deliver_args_without_context_fields() {
        let cli = Cli::parse_from([
            "courier",
            "deliver",
            "--url",
            "https://example.com/hook",
            "--payload",
            "[1,2,3]",
        ]);
        let Command::Deliver(args) = cli.command else { panic!("expected deliver") };

        let request = args.into_request().unwrap();

        assert!(request.context.is_none());
        assert!(!request.delivery_id.as_str().is_empty());
    }

    #[test]
    fn invalid_payload_rejected() {
        let cli = Cli::parse_from([
            "courier",
            "deliver",
            "--url",
            "https://example.com/hook",
            "--payload",
            "{not json",
        ]);
        let Command::Deliver(args) = cli.command else { panic!("expected deliver") };

        assert!(args.into_request().is_err());
    }

    #[test]
    fn batch_summary_counts() {
        let results: Vec<DeliveryResult> = Vec::new();
        let summary = BatchSummary::new(&results);
        assert_eq!((summary.total, summary.succeeded, summary.failed), (0, 0, 0));
    }
}
