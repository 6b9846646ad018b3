//! trailmint - operator CLI for the local activity store and the relay
//!
//! This tool provides commands for:
//! - Inspecting tracked visits, captured prompts and reward counters
//! - Connecting a wallet and submitting accumulated activity
//! - Querying the relay (health, contract, analytics, marketplace, balance)
//! - Previewing the anonymized archive record for the current state
//! - Replaying recorded host requests through the router
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/trailmint/state.db (~/.local/share/trailmint/state.db)
//! - Config: $XDG_CONFIG_HOME/trailmint/config.toml (~/.config/trailmint/config.toml)
//! - Logs: $XDG_STATE_HOME/trailmint/trailmint.YYYY-MM-DD.log (with --verbose)

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use trailmint_core::anonymize::{anonymize, data_score, ArchiveKeys};
use trailmint_core::classify::Classifier;
use trailmint_core::messaging::{Request, Response, Router, Stats};
use trailmint_core::relay::{refresh_balance, RelayClient};
use trailmint_core::submit::{is_valid_address, SyncSubmitter};
use trailmint_core::{Config, StateStore, Submission, WalletState};

#[derive(Parser)]
#[command(name = "trailmint")]
#[command(about = "Inspect tracked activity and submit it for rewards")]
#[command(version)]
struct Args {
    /// Verbose output (writes logs to the state directory)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show counters, reward estimate and wallet state
    Status,

    /// List recorded page visits, newest last
    Visits {
        /// Number of visits to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// List captured prompts
    Prompts,

    /// Submit accumulated activity to the relay
    Submit {
        /// Wallet address (default: the connected wallet)
        #[arg(short, long)]
        wallet: Option<String>,
    },

    /// Manage the connected wallet
    Wallet {
        #[command(subcommand)]
        action: WalletCommand,
    },

    /// Fetch and cache the token balance
    Balance {
        /// Address to query (default: the connected wallet)
        #[arg(short, long)]
        address: Option<String>,
    },

    /// Query the relay service
    Relay {
        #[command(subcommand)]
        action: RelayCommand,
    },

    /// Show the anonymized archive record for the current state
    Preview {
        /// Wallet address (default: the connected wallet)
        #[arg(short, long)]
        wallet: Option<String>,
    },

    /// Feed recorded host requests (one JSON object per line) through the router
    Replay {
        /// JSONL file of requests
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum WalletCommand {
    /// Store a wallet address as connected
    Connect { address: String },
    /// Forget the connected wallet
    Disconnect,
    /// Show the stored wallet state
    Show,
}

#[derive(Subcommand)]
enum RelayCommand {
    /// Relay liveness
    Health,
    /// Token contract address
    Contract,
    /// Archive statistics
    Analytics {
        /// Days to cover
        #[arg(short, long, default_value_t = 30)]
        days: u32,
    },
    /// Dataset listing
    Marketplace,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard = if args.verbose {
        Some(trailmint_core::logging::init(&config.logging).context("failed to initialize logging")?)
    } else {
        None
    };

    match args.command {
        Command::Status => cmd_status(&config),
        Command::Visits { limit } => cmd_visits(limit),
        Command::Prompts => cmd_prompts(&config),
        Command::Submit { wallet } => cmd_submit(&config, wallet),
        Command::Wallet { action } => cmd_wallet(action),
        Command::Balance { address } => cmd_balance(&config, address),
        Command::Relay { action } => cmd_relay(&config, action),
        Command::Preview { wallet } => cmd_preview(&config, wallet),
        Command::Replay { file } => cmd_replay(config, &file),
    }
}

fn open_store() -> Result<Arc<StateStore>> {
    let db_path = Config::database_path();
    let store = StateStore::open(&db_path).context("failed to open database")?;
    store.migrate().context("failed to run database migrations")?;
    Ok(Arc::new(store))
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create async runtime")
}

/// Explicit address, else the connected wallet.
fn resolve_wallet(store: &StateStore, explicit: Option<String>) -> Result<String> {
    if let Some(address) = explicit {
        return Ok(address);
    }
    let state = store.wallet_state().context("failed to read wallet state")?;
    match state.active_account() {
        Some(account) => Ok(account.to_string()),
        None => bail!("No wallet connected. Run `trailmint wallet connect <address>` or pass --wallet"),
    }
}

fn format_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

fn cmd_status(config: &Config) -> Result<()> {
    let store = open_store()?;
    let stats = Stats::collect(&store, &config.reward);
    let wallet = store.wallet_state().context("failed to read wallet state")?;

    println!("Trailmint Status");
    println!("================");
    println!();
    println!("Database:        {}", Config::database_path().display());
    println!(
        "Log file:        {}",
        trailmint_core::logging::log_file_path(Utc::now().date_naive()).display()
    );
    println!("Relay:           {}", config.relay.server_url);
    println!();
    println!("Pages visited:   {}", stats.pages_visited);
    println!("Time tracked:    {} min", stats.time_tracked);
    println!("Visits stored:   {}", stats.navigation_entries);
    println!("Prompts stored:  {}", stats.captured_prompts);
    println!("Claimable:       {:.2}", stats.claimable);
    println!(
        "Token balance:   {}",
        stats.token_balance.as_deref().unwrap_or("<unknown>")
    );
    println!();
    match wallet.active_account() {
        Some(account) => println!("Wallet:          connected ({})", account),
        None => println!("Wallet:          not connected"),
    }

    Ok(())
}

fn cmd_visits(limit: usize) -> Result<()> {
    let store = open_store()?;
    let entries = store
        .navigation_entries(Some(limit))
        .context("failed to read visits")?;

    if entries.is_empty() {
        println!("No visits recorded.");
        return Ok(());
    }

    println!(
        "{:<19}  {:>4}  {:>5}  {:<16}  {:<28}  TITLE",
        "TIME", "MIN", "INTER", "EVENT", "DOMAIN"
    );
    for entry in &entries {
        println!(
            "{:<19}  {:>4}  {:>5}  {:<16}  {:<28}  {}",
            format_time(entry.timestamp),
            entry.time_spent,
            entry.interactions,
            entry.event_type.as_str(),
            truncate(&entry.domain, 28),
            truncate(&entry.title, 60),
        );
    }

    let total = store.count_navigation_entries()?;
    if total as usize > entries.len() {
        println!();
        println!("Showing {} of {} visits (use --limit for more)", entries.len(), total);
    }

    Ok(())
}

fn cmd_prompts(config: &Config) -> Result<()> {
    let store = open_store()?;
    let prompts = store.prompts().context("failed to read prompts")?;
    let classifier = Classifier::from_config(&config.classify);

    if prompts.is_empty() {
        println!("No prompts captured.");
        return Ok(());
    }

    for prompt in &prompts {
        println!(
            "[{}] {} ({}, {} chars)",
            format_time(prompt.timestamp),
            prompt.conversation_id,
            classifier.classify_prompt(&prompt.prompt).as_str(),
            prompt.prompt_length,
        );
        println!("  {}", truncate(&prompt.prompt, 100));
    }
    println!();
    println!("{} prompt(s)", prompts.len());

    Ok(())
}

fn cmd_submit(config: &Config, wallet: Option<String>) -> Result<()> {
    let store = open_store()?;
    let wallet = resolve_wallet(&store, wallet)?;

    let snapshot = store.snapshot().context("failed to read local state")?;
    if snapshot.is_empty() {
        println!("Nothing to submit.");
        return Ok(());
    }

    let relay = RelayClient::new(config.relay.clone()).context("failed to create relay client")?;
    let submitter =
        SyncSubmitter::new(store.clone(), relay).context("failed to create submitter")?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(format!(
        "Submitting {} page(s), {} min to {}",
        snapshot.pages_visited,
        snapshot.time_tracked,
        submitter.relay().base_url()
    ));
    pb.enable_steady_tick(Duration::from_millis(100));

    let result = submitter.submit(&wallet, Utc::now());
    pb.finish_and_clear();

    match result {
        Ok(receipt) => {
            println!("Submission accepted");
            println!(
                "  Transaction:  {}",
                receipt.transaction_reference.as_deref().unwrap_or("-")
            );
            println!(
                "  Tokens:       {}",
                receipt.tokens_awarded.as_deref().unwrap_or("-")
            );
            if let Some(id) = receipt.submission_id.as_deref() {
                println!("  Submission:   {}", id);
            }
            println!("Local activity cleared.");
            Ok(())
        }
        Err(e) => bail!("Submission failed, {}", e.user_message()),
    }
}

fn cmd_wallet(action: WalletCommand) -> Result<()> {
    let store = open_store()?;

    match action {
        WalletCommand::Connect { address } => {
            if !is_valid_address(&address) {
                bail!("'{}' is not a valid wallet address", address);
            }
            store
                .save_wallet_state(&WalletState::connected(address.as_str(), Utc::now()))
                .context("failed to save wallet state")?;
            println!("Connected {}", address);
        }
        WalletCommand::Disconnect => {
            store
                .save_wallet_state(&WalletState::default())
                .context("failed to save wallet state")?;
            println!("Wallet disconnected");
        }
        WalletCommand::Show => {
            let state = store.wallet_state().context("failed to read wallet state")?;
            println!("Connected:       {}", state.connected);
            println!(
                "Account:         {}",
                state.account.as_deref().unwrap_or("<none>")
            );
            println!(
                "Last connected:  {}",
                state
                    .last_connected
                    .map(format_time)
                    .unwrap_or_else(|| "<never>".to_string())
            );
        }
    }

    Ok(())
}

fn cmd_balance(config: &Config, address: Option<String>) -> Result<()> {
    let store = open_store()?;
    let address = resolve_wallet(&store, address)?;
    let client = RelayClient::new(config.relay.clone()).context("failed to create relay client")?;

    let balance = runtime()?
        .block_on(refresh_balance(&client, &store, &address))
        .context("failed to fetch balance")?;

    println!("{}: {}", balance.address, balance.display());
    Ok(())
}

fn cmd_relay(config: &Config, action: RelayCommand) -> Result<()> {
    let client = RelayClient::new(config.relay.clone()).context("failed to create relay client")?;
    let rt = runtime()?;

    match action {
        RelayCommand::Health => {
            let health = rt.block_on(client.health()).context("relay health check failed")?;
            println!("Status:              {}", health.status);
            println!("Contract connected:  {}", health.contract_connected);
            println!("Archive enabled:     {}", health.s3_enabled);
            if let Some(ts) = health.timestamp.as_deref() {
                println!("Timestamp:           {}", ts);
            }
        }
        RelayCommand::Contract => {
            let info = rt
                .block_on(client.contract_info())
                .context("failed to fetch contract info")?;
            println!("Contract:  {}", info.address);
            println!("ABI:       {} entries", info.abi.len());
        }
        RelayCommand::Analytics { days } => {
            let analytics = rt
                .block_on(client.analytics(days))
                .context("failed to fetch analytics")?;
            println!("{}", serde_json::to_string_pretty(&analytics)?);
        }
        RelayCommand::Marketplace => {
            let market = rt
                .block_on(client.marketplace())
                .context("failed to fetch marketplace")?;
            println!("{}", serde_json::to_string_pretty(&market)?);
        }
    }

    Ok(())
}

fn cmd_preview(config: &Config, wallet: Option<String>) -> Result<()> {
    let store = open_store()?;
    let wallet = resolve_wallet(&store, wallet)?;
    let snapshot = store.snapshot().context("failed to read local state")?;

    let now = Utc::now();
    let submission = Submission::from_snapshot(wallet.as_str(), snapshot, now);
    let classifier = Classifier::from_config(&config.classify);
    let anonymized = anonymize(&submission, &classifier);
    let keys = ArchiveKeys::generate(&wallet, now);

    println!("Data score:      {}", data_score(&submission));
    println!("Raw key:         {}", keys.raw);
    println!("Anonymized key:  {}", keys.anonymized);
    println!();
    println!("{}", serde_json::to_string_pretty(&anonymized)?);

    Ok(())
}

fn cmd_replay(config: Config, file: &Path) -> Result<()> {
    let store = open_store()?;
    let reader = std::io::BufReader::new(
        std::fs::File::open(file).with_context(|| format!("failed to open {}", file.display()))?,
    );
    let mut router = Router::from_config(store, config).context("failed to create router")?;

    let mut handled = 0usize;
    let mut failed = 0usize;
    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", file.display()))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let response = match serde_json::from_str::<Request>(line) {
            Ok(request) => router.handle(request),
            Err(e) => Response::Failed {
                success: false,
                error: format!("line {}: {}", index + 1, e),
                category: None,
            },
        };
        if !response.is_success() {
            failed += 1;
        }
        handled += 1;
        println!("{}", serde_json::to_string(&response)?);
    }

    // Open tabs stay open: recorded `at` values are in the past, so
    // finalizing them against the wall clock would inflate time spent.
    eprintln!(
        "Replayed {} request(s), {} failed, {} tab(s) left open",
        handled,
        failed,
        router.tracked_tabs()
    );
    Ok(())
}
