use std::{env, fs, path::Path, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tender::{
    agent::BuyerAgent,
    config::BuyerConfig,
    directory::Registry,
    domain::{AgentAddress, DEFAULT_CONVERSATION, DEFAULT_SERVICE_TYPE, Price},
    error::TenderResult,
    negotiation::RoundReport,
    seller::Seller,
    transport::LocalBus,
};
use time::macros::format_description;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Buys a resource from the cheapest seller found in the directory.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Resource to buy, e.g. a book title.
    resource: Option<String>,

    #[arg(long, default_value = "buyer", help = "Address of the buyer agent")]
    name: String,

    #[arg(
        long,
        default_value = "20s",
        value_parser = humantime::parse_duration,
        help = "Time between two negotiation rounds"
    )]
    period: Duration,

    #[arg(
        long = "reply-timeout",
        value_parser = humantime::parse_duration,
        help = "Give up waiting for replies after this long (waits forever when unset)"
    )]
    reply_timeout: Option<Duration>,

    #[arg(long, default_value = DEFAULT_SERVICE_TYPE, help = "Service type sellers advertise")]
    service: String,

    #[arg(long, default_value = DEFAULT_CONVERSATION, help = "Conversation tag of the negotiation")]
    conversation: String,

    #[arg(
        long = "seller",
        value_name = "NAME=PRICE",
        value_parser = parse_seller,
        help = "Start an in-process seller offering the resource at PRICE (repeatable)"
    )]
    sellers: Vec<SellerSpec>,

    #[arg(
        long,
        value_parser = parse_positive_u64,
        help = "Stop after this many rounds have been scheduled"
    )]
    rounds: Option<u64>,

    #[arg(long, help = "Keep scheduling rounds after a successful purchase")]
    keep_buying: bool,

    #[arg(long, help = "Print every round report as a JSON line")]
    json_reports: bool,

    #[arg(long, help = "Log to stdout instead of a log file")]
    log_stdout: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SellerSpec {
    name: String,
    price: Price,
}

impl FromStr for SellerSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, price) = s
            .split_once('=')
            .ok_or_else(|| format!("expected NAME=PRICE, got '{s}'"))?;
        let name = name.trim();
        if name.is_empty() {
            return Err("seller name must not be empty".to_string());
        }
        let price = price
            .parse::<Price>()
            .map_err(|e| format!("invalid price '{price}': {e}"))?;
        Ok(Self {
            name: name.to_string(),
            price,
        })
    }
}

fn parse_seller(value: &str) -> Result<SellerSpec, String> {
    value.parse()
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_stdout)?;

    let config = buyer_config(&cli);
    let bus = LocalBus::new();
    let registry = Registry::new();
    let cancel = CancellationToken::new();

    let agent = BuyerAgent::on_bus(
        cli.name.as_str().into(),
        config.clone(),
        registry.clone(),
        &bus,
    )?;

    let mut sellers = JoinSet::new();
    for spec in &cli.sellers {
        let address = AgentAddress::from(spec.name.as_str());
        let mailbox = bus.register(address.clone());
        let seller = Seller::new(address, bus.clone(), mailbox)
            .with_conversation(config.conversation.clone())
            .with_offer(config.resource.clone(), spec.price);
        seller.advertise(&registry, config.service.clone());
        sellers.spawn(seller.run(cancel.child_token()));
    }

    let printer = tokio::spawn(print_reports(agent.reports(), cli.json_reports));

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            interrupt.cancel();
        }
    });

    let buyer = agent.identity().clone();
    let reports = agent.run(cancel.child_token()).await;
    cancel.cancel();
    while let Some(joined) = sellers.join_next().await {
        joined.context("Seller task failed")?;
    }
    printer.await.context("Report printer failed")??;

    let purchased = reports.iter().filter(|r| r.is_purchase()).count();
    println!("\n--- Summary ({buyer}) ---");
    println!("Rounds finished:  {}", reports.len());
    println!("Purchases:        {purchased}");

    Ok(())
}

/// Maps the flags onto a configuration. A missing resource becomes a blank one,
/// which the agent rejects at setup.
fn buyer_config(cli: &Cli) -> BuyerConfig {
    BuyerConfig::new(cli.resource.clone().unwrap_or_default())
        .with_service(cli.service.as_str())
        .with_conversation(cli.conversation.as_str())
        .with_period(cli.period)
        .with_reply_timeout(cli.reply_timeout)
        .with_stop_after_purchase(!cli.keep_buying)
        .with_max_ticks(cli.rounds)
}

async fn print_reports(
    reports: async_channel::Receiver<RoundReport>,
    json: bool,
) -> TenderResult<()> {
    while let Ok(report) = reports.recv().await {
        if json {
            println!("{}", report.to_json_line()?);
        } else {
            println!(
                "round {:>4}  {:<24}  replies {}/{}  {}",
                report.round_id,
                report.resource,
                report.replies,
                report.counterparties.len(),
                report.outcome
            );
        }
    }
    Ok(())
}

// ================================================================================================
// Tracing Configuration
// ================================================================================================

fn init_tracing(force_stdout: bool) -> Result<Option<WorkerGuard>> {
    let app_name = "tender";

    let in_container = env::var("CONTAINER").is_ok() || Path::new("/.dockerenv").exists();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if force_stdout || in_container {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_span_events(tracing_subscriber::fmt::format::FmtSpan::NONE)
            .with_current_span(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
            .init();

        info!("Logging to stdout");
        return Ok(None);
    }

    let log_dir = match dirs::state_dir() {
        Some(dir) => dir.join(app_name).join("logs"),
        None => dirs::home_dir()
            .context("Failed to find home directory")?
            .join(format!(".local/state/{app_name}/logs")),
    };
    fs::create_dir_all(&log_dir)?;

    let timestamp = time::OffsetDateTime::now_utc()
        .format(&format_description!(
            "[year][month][day]-[hour][minute][second]"
        ))
        .context("Failed to format timestamp")?;
    let file_name = format!("{app_name}-{timestamp}.log");
    let file_path = log_dir.join(&file_name);

    let file_appender = tracing_appender::rolling::never(&log_dir, &file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_writer(non_blocking)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::NONE)
        .with_current_span(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    info!(log_file = %file_path.display(), "Logging to file");
    Ok(Some(guard))
}
