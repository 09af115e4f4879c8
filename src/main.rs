// Buy Monitor
// Polls the chain for Uniswap V2 buys of monitored tokens and alerts registered groups

use anyhow::{Context, Result};
use buy_monitor::admin::AdminService;
use buy_monitor::chain::EthersChainClient;
use buy_monitor::config::{Config, LoggingConfig};
use buy_monitor::dispatch::{AlertPipeline, LogNotifier, Notifier, TelegramNotifier};
use buy_monitor::patterns::PatternEngine;
use buy_monitor::providers::dexscreener::DexScreenerClient;
use buy_monitor::providers::ethplorer::EthplorerClient;
use buy_monitor::providers::WalletReputationProvider;
use buy_monitor::registry::PairRegistry;
use buy_monitor::scanner::Scanner;
use buy_monitor::types::PatternType;
use buy_monitor::Database;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// ERC-20 buy monitor for Uniswap V2 pairs
#[derive(Parser, Debug)]
#[command(name = "buy-monitor", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan blocks and dispatch alerts (default)
    Run,
    /// Start monitoring a token
    AddToken {
        address: String,
        /// Operator id recorded with the token
        #[arg(long, default_value_t = 0)]
        added_by: i64,
    },
    /// Stop monitoring a token
    RemoveToken { address: String },
    /// List monitored tokens
    ListTokens,
    /// Register a chat to receive buy alerts
    Register {
        #[arg(allow_hyphen_values = true)]
        chat_id: i64,
        title: String,
        #[arg(long, default_value_t = 0)]
        registered_by: i64,
    },
    /// Stop sending alerts to a chat
    Unregister {
        #[arg(allow_hyphen_values = true)]
        chat_id: i64,
    },
    /// List registered chats
    ListGroups,
    /// Trading summary of a wallet for one token
    TokenInfo { wallet: String, token: String },
    /// Patterns detected recently
    Patterns {
        /// Only this token
        #[arg(long)]
        token: Option<String>,
        /// pump_dump or accumulation
        #[arg(long = "type")]
        pattern_type: Option<String>,
        #[arg(long, default_value_t = 24)]
        hours: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_env().context("Failed to load configuration")?;
    init_logging(&config.logging);
    config.validate()?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        command => run_admin(config, command).await,
    }
}

async fn run(config: Config) -> Result<()> {
    info!("🚀 Buy Monitor Starting...");

    let db = Database::open(&config.database.path, config.database.wal_mode, config.database.pool_size)?;
    info!("✅ Database initialized: {}", config.database.path.display());

    let chain = Arc::new(EthersChainClient::new(&config.chain)?);
    chain.connect(5, Duration::from_secs(5)).await?;

    let http_timeout = Duration::from_secs(config.market.http_timeout_secs);
    let registry = Arc::new(PairRegistry::new(chain.clone(), config.chain.reference_asset));
    let engine = Arc::new(PatternEngine::new(db.clone(), config.patterns.clone()));
    let market = Arc::new(DexScreenerClient::new(&config.market, &config.chain.reference_asset)?);
    let wallets: Arc<dyn WalletReputationProvider> = Arc::new(EthplorerClient::new(&config.wallet, http_timeout)?);

    let admin = Arc::new(
        AdminService::new(db.clone(), registry.clone(), wallets.clone())
            .with_pattern_engine(engine.clone())
            .with_unresolved_retry(Duration::from_secs(config.scanner.unresolved_token_retry_secs)),
    );
    let pairs = admin.bootstrap(&config.chain.initial_tokens).await?;
    if pairs == 0 {
        warn!("⚠️  No pairs registered yet - add tokens with `buy-monitor add-token <address>`");
    }

    let notifier: Arc<dyn Notifier> = if config.telegram.bot_token.is_empty() {
        info!("ℹ️  Telegram: DISABLED (alerts are logged only)");
        Arc::new(LogNotifier)
    } else {
        info!("📱 Telegram: ENABLED");
        Arc::new(TelegramNotifier::new(
            config.telegram.bot_token.clone(),
            config.telegram.admin_chat_id,
            http_timeout,
        )?)
    };

    let (events_tx, events_rx) = mpsc::channel(config.scanner.event_channel_capacity);

    let mut scanner = Scanner::new(
        chain.clone(),
        registry.clone(),
        Arc::new(db.clone()),
        config.chain.router,
        events_tx,
        config.scanner.clone(),
    );
    let stop = scanner.stop_handle();

    let pipeline = AlertPipeline::new(
        db.clone(),
        engine,
        market,
        wallets,
        notifier,
        config.telegram.clone(),
        &config.market,
    );
    let pipeline_handle = tokio::spawn(async move { pipeline.run(events_rx).await });

    // Pick up tokens added or removed by admin commands in other processes
    let refresh_stop = stop.clone();
    let refresh_every = Duration::from_secs(config.scanner.token_refresh_secs);
    let refresh_handle = tokio::spawn(async move {
        while refresh_stop.is_running() {
            tokio::time::sleep(refresh_every).await;
            match admin.refresh_if_changed().await {
                Ok(Some(count)) => info!("🔄 Monitored set changed, {} pairs registered", count),
                Ok(None) => {}
                Err(e) => warn!("⚠️  Token refresh failed: {:#}", e),
            }
        }
    });

    let scanner_handle = tokio::spawn(async move { scanner.run().await });
    info!("✅ Buy Monitor running (router {:?})", config.chain.router);

    shutdown_signal().await?;
    stop.stop();

    if let Err(e) = scanner_handle.await {
        error!("❌ Scanner task failed: {}", e);
    }
    // The scanner owned the only sender, so the pipeline drains and exits
    if let Err(e) = pipeline_handle.await {
        error!("❌ Alert pipeline task failed: {}", e);
    }
    refresh_handle.abort();

    info!("👋 Buy Monitor stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or on SIGTERM where the platform has it
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.context("Failed to listen for Ctrl-C")?;
                info!("🛑 Shutdown requested (Ctrl-C)");
            }
            _ = terminate.recv() => info!("🛑 Shutdown requested (SIGTERM)"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
        info!("🛑 Shutdown requested (Ctrl-C)");
    }

    Ok(())
}

async fn run_admin(config: Config, command: Command) -> Result<()> {
    let db = Database::open(&config.database.path, config.database.wal_mode, config.database.pool_size)?;
    let chain = Arc::new(EthersChainClient::new(&config.chain)?);
    let registry = Arc::new(PairRegistry::new(chain, config.chain.reference_asset));
    let wallets = Arc::new(EthplorerClient::new(
        &config.wallet,
        Duration::from_secs(config.market.http_timeout_secs),
    )?);
    let admin = AdminService::new(db, registry, wallets);

    match command {
        Command::Run => anyhow::bail!("`run` is not an admin command"),
        Command::AddToken { address, added_by } => {
            let token = admin.add_token(&address, added_by).await?;
            println!("Added token {} ({}) to monitoring list.", token.name, token.symbol);
        }
        Command::RemoveToken { address } => {
            if admin.remove_token(&address).await? {
                println!("Removed token {} from monitoring list.", address);
            } else {
                println!("Token {} was not being monitored.", address);
            }
        }
        Command::ListTokens => println!("{}", admin.token_list_report()?),
        Command::Register {
            chat_id,
            title,
            registered_by,
        } => {
            if admin.register_group(chat_id, &title, registered_by)? {
                println!("Group {} ({}) registered for buy alerts.", title, chat_id);
            } else {
                println!("Group {} is already registered.", chat_id);
            }
        }
        Command::Unregister { chat_id } => {
            if admin.unregister_group(chat_id)? {
                println!("Group {} unregistered.", chat_id);
            } else {
                println!("Group {} was not registered.", chat_id);
            }
        }
        Command::ListGroups => println!("{}", admin.group_list_report()?),
        Command::TokenInfo { wallet, token } => {
            println!("{}", admin.token_info_report(&wallet, &token).await?);
        }
        Command::Patterns {
            token,
            pattern_type,
            hours,
        } => {
            let pattern_type = pattern_type
                .as_deref()
                .map(str::parse::<PatternType>)
                .transpose()?;
            println!("{}", admin.patterns_report(token.as_deref(), pattern_type, hours)?);
        }
    }

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.json_logs {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .init();
    }
}
