//! selfcare - command line client for an ISP customer self-care portal
//!
//! Logs into the portal and shows the dashboard, usage, billing history or
//! live bandwidth, the same data the portal's own web pages display.

mod config;
mod error;
mod http;
mod models;
mod parser;
mod portal;
mod session;
mod utils;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use models::{Credentials, DashboardSnapshot, LoginOutcome};
use portal::{PortalSessionClient, SampleWindow};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "selfcare")]
#[command(about = "ISP Self-Care Portal Client", long_about = None)]
struct Args {
    /// Config file path (default: config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Customer ID (overrides [account] in the config)
    #[arg(short = 'u', long)]
    customer_id: Option<String>,

    /// Password (overrides [account] in the config)
    #[arg(short, long)]
    password: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Account overview (default)
    Dashboard,
    /// Daily download/upload totals
    Usage,
    /// Billing history
    Payments,
    /// One live speed reading
    Speed,
    /// Live speed until Ctrl-C
    Watch {
        /// Stop after this many samples
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let cfg = config::Config::load(args.config.as_deref())?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.logging.level)),
        )
        .init();

    tracing::info!("selfcare v{} - {}", env!("CARGO_PKG_VERSION"), cfg.portal.base_url);

    let credentials = resolve_credentials(&args, &cfg)?;
    let client = PortalSessionClient::from_config(&cfg).context("Failed to build HTTP client")?;

    let dashboard = match client.login(&credentials).await {
        LoginOutcome::Success(dashboard) => dashboard,
        LoginOutcome::Failure(reason) => bail!("{}", reason),
    };

    match args.command.unwrap_or(Command::Dashboard) {
        Command::Dashboard => print_dashboard(&dashboard),
        Command::Usage => {
            let entries = client.fetch_usage_history().await;
            if entries.is_empty() {
                println!("No usage data available");
            }
            for entry in entries {
                println!(
                    "{:<12} down {:>10}  up {:>10}",
                    entry.date,
                    utils::format_bytes(entry.download),
                    utils::format_bytes(entry.upload)
                );
            }
        }
        Command::Payments => {
            let records = client.fetch_payment_history().await;
            if records.is_empty() {
                println!("No payment history available");
            }
            for record in records {
                println!(
                    "{:<12} {:>12}  {:<10} {:<10} {}",
                    record.date, record.amount, record.method, record.status, record.transaction_id
                );
            }
        }
        Command::Speed => {
            let sample = client.fetch_live_speed().await;
            println!("{}", utils::format_sample(&sample));
        }
        Command::Watch { count } => watch(&client, count).await,
    }

    Ok(())
}

fn resolve_credentials(args: &Args, cfg: &config::Config) -> Result<Credentials> {
    let customer_id = args
        .customer_id
        .clone()
        .unwrap_or_else(|| cfg.account.customer_id.clone());
    let password = args
        .password
        .clone()
        .unwrap_or_else(|| cfg.account.password.clone());

    if customer_id.is_empty() || password.is_empty() {
        bail!("No credentials: pass --customer-id/--password or set [account] in config.toml");
    }

    Ok(Credentials {
        customer_id,
        password,
    })
}

fn print_dashboard(dashboard: &DashboardSnapshot) {
    println!("Welcome, {}", dashboard.name);
    println!("  Connection:     {}", dashboard.connection_status);
    println!("  Package:        {}", dashboard.package);
    println!("  Plan rate:      {}", dashboard.plan_rate);
    println!("  Expiry date:    {}", dashboard.expiry_date);
    println!("  Account status: {}", dashboard.account_status);
}

/// Print streamed samples until Ctrl-C or `count` samples
async fn watch(client: &PortalSessionClient, count: Option<usize>) {
    let mut stream = client.stream_live_speed();
    let mut window = SampleWindow::default();
    let mut seen = 0;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let sample = tokio::select! {
            _ = &mut ctrl_c => break,
            sample = stream.next() => match sample {
                Some(sample) => sample,
                None => break,
            },
        };

        window.push(sample);
        seen += 1;
        println!(
            "{}  (peak {})",
            utils::format_sample(&sample),
            utils::format_kbps(window.peak())
        );

        if count.is_some_and(|n| seen >= n) {
            break;
        }
    }

    stream.cancel();
    tracing::debug!("Stopped after {} samples", seen);
}
