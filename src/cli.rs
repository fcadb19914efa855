//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::fs;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use crate::adapters::api_client::{ApiClient, ApiError, BacktestSubmission, StrategyUpdate};
use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::sqlite_adapter::SqliteAdapter;
use crate::adapters::sqlite_store::SqliteStore;
use crate::adapters::stripe_adapter::StripeAdapter;
use crate::adapters::web::{self, AppState, WebSettings};
use crate::domain::backtest::{self as backtest_engine, BacktestConfig};
use crate::domain::error::QuantdeskError;
use crate::domain::price::{format_timestamp, parse_timestamp, parse_window_end};
use crate::domain::strategy::{Parameters, StrategyKind};
use crate::domain::subscription::Tier;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:5000";

#[derive(Parser, Debug)]
#[command(name = "quantdesk", about = "Algorithmic trading platform backend")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the API server
    Serve {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Load a price CSV into the SQLite prices table
    Import {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        csv: PathBuf,
    },
    /// List symbols with price data
    Symbols {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Run a backtest locally without storing it
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// Strategy type: SMA or MeanReversion
        #[arg(long)]
        kind: String,
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        /// Strategy parameter as KEY=VALUE; repeatable
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,
        /// Transaction cost per unit traded, overriding the config
        #[arg(long)]
        tc: Option<f64>,
    },
    /// Output an argon2 hash for a password read from stdin
    HashPassword,
    /// Talk to a running server
    Client {
        #[arg(short, long)]
        config: PathBuf,
        #[command(subcommand)]
        action: ClientCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum ClientCommand {
    /// Create an account and sign in
    Register {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Strategies, backtests and subscription at a glance
    Dashboard,
    Strategies,
    CreateStrategy {
        #[arg(long)]
        name: String,
        #[arg(long)]
        kind: String,
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,
    },
    UpdateStrategy {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        kind: Option<String>,
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,
        #[arg(long)]
        active: Option<bool>,
    },
    DeleteStrategy {
        #[arg(long)]
        id: i64,
    },
    Backtests,
    RunBacktest {
        #[arg(long)]
        strategy_id: i64,
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        #[arg(long)]
        tc: Option<f64>,
    },
    /// Show the subscription tiers and the current plan
    Tiers,
    /// Start checkout for a paid tier
    Upgrade {
        #[arg(long)]
        tier: String,
    },
    /// Cancel the paid subscription
    Cancel,
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Serve { config } => run_serve(&config),
        Command::Import {
            config,
            symbol,
            csv,
        } => run_import(&config, &symbol, &csv),
        Command::Symbols { config } => run_symbols(&config),
        Command::Backtest {
            config,
            kind,
            symbol,
            start,
            end,
            params,
            tc,
        } => run_backtest(&config, &kind, &symbol, &start, &end, params, tc),
        Command::HashPassword => run_hash_password(),
        Command::Client { config, action } => run_client(&config, action),
    }
}

/// Parses `KEY=VALUE`; whole numbers stay integers, other numbers are floats.
pub fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in {raw:?}"));
    }
    let value = value.trim();
    let value = if let Ok(n) = value.parse::<i64>() {
        Value::from(n)
    } else if let Ok(f) = value.parse::<f64>() {
        Value::from(f)
    } else {
        return Err(format!("{key}: {value:?} is not a number"));
    };
    Ok((key.to_string(), value))
}

fn to_parameters(params: Vec<(String, Value)>) -> Parameters {
    params.into_iter().collect()
}

fn fail(err: QuantdeskError) -> ExitCode {
    eprintln!("error: {err}");
    (&err).into()
}

pub fn load_config(path: &PathBuf) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path)
        .map(|config| config.with_env_overrides(std::env::vars()))
        .map_err(fail)
}

/// Price source from `[data] source`: `sqlite` (default) or `csv`.
pub fn build_data_port(
    config: &dyn ConfigPort,
) -> Result<Arc<dyn DataPort + Send + Sync>, QuantdeskError> {
    let source = config
        .get_string("data", "source")
        .unwrap_or_else(|| "sqlite".to_string());
    match source.trim().to_ascii_lowercase().as_str() {
        "sqlite" => {
            let adapter = SqliteAdapter::from_config(config)?;
            adapter.initialize_schema()?;
            Ok(Arc::new(adapter))
        }
        "csv" => {
            let dir = config.require_string("data", "csv_dir")?;
            Ok(Arc::new(CsvAdapter::new(PathBuf::from(dir))))
        }
        other => Err(QuantdeskError::ConfigInvalid {
            section: "data".into(),
            key: "source".into(),
            reason: format!("unknown source {other:?} (expected sqlite or csv)"),
        }),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime, QuantdeskError> {
    tokio::runtime::Runtime::new().map_err(QuantdeskError::Io)
}

fn run_serve(config_path: &PathBuf) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    match serve(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(e),
    }
}

/// How often expired rows are purged from the session table.
const SESSION_SWEEP_SECS: u64 = 300;

fn spawn_session_cleanup<S>(store: S, period: std::time::Duration) -> tokio::task::JoinHandle<()>
where
    S: tower_sessions::ExpiredDeletion,
{
    tokio::task::spawn(async move {
        if let Err(e) = store.continuously_delete_expired(period).await {
            tracing::warn!(error = %e, "expired session cleanup stopped");
        }
    })
}

fn serve(config: &FileConfigAdapter) -> Result<(), QuantdeskError> {
    use tower_sessions_rusqlite_store::RusqliteStore;

    let settings = WebSettings::from_config(config)?;
    let store = SqliteStore::from_config(config)?;
    store.initialize_schema()?;
    let data = build_data_port(config)?;
    let payments = StripeAdapter::from_config(config)?;

    let listen = config
        .get_string("server", "listen")
        .unwrap_or_else(|| DEFAULT_LISTEN.to_string());
    let addr: std::net::SocketAddr =
        listen
            .parse()
            .map_err(|e: std::net::AddrParseError| QuantdeskError::ConfigInvalid {
                section: "server".into(),
                key: "listen".into(),
                reason: e.to_string(),
            })?;
    let db_path = config.require_string("database", "path")?;

    let state = AppState {
        store: Arc::new(store),
        data,
        payments: Arc::new(payments),
        settings,
    };

    runtime()?.block_on(async move {
        let session_db = tokio_rusqlite::Connection::open(&db_path)
            .await
            .map_err(|e| QuantdeskError::Database {
                reason: format!("session store: {e}"),
            })?;
        let sessions = RusqliteStore::new(session_db);
        sessions
            .migrate()
            .await
            .map_err(|e| QuantdeskError::Database {
                reason: format!("session store migration: {e}"),
            })?;

        let cleanup = spawn_session_cleanup(
            sessions.clone(),
            std::time::Duration::from_secs(SESSION_SWEEP_SECS),
        );

        let router = web::build_router(state, sessions);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        eprintln!("Starting web server on {}", addr);
        tracing::info!(%addr, "listening");
        let served = axum::serve(listener, router).await;
        cleanup.abort();
        served?;
        Ok::<(), QuantdeskError>(())
    })
}

fn run_import(config_path: &PathBuf, symbol: &str, csv_path: &PathBuf) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let symbol = symbol.trim().to_ascii_uppercase();

    let content = match fs::read_to_string(csv_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: failed to read {}: {}", csv_path.display(), e);
            return ExitCode::from(1);
        }
    };
    let bars = match CsvAdapter::read_file(&symbol, &content) {
        Ok(b) => b,
        Err(e) => return fail(e),
    };
    if bars.is_empty() {
        eprintln!("No rows in {}", csv_path.display());
        return ExitCode::SUCCESS;
    }

    let adapter = match SqliteAdapter::from_config(&config) {
        Ok(a) => a,
        Err(e) => return fail(e),
    };
    if let Err(e) = adapter.initialize_schema() {
        return fail(e);
    }
    match adapter.insert_bars(&bars) {
        Ok(n) => {
            eprintln!(
                "Imported {} bars for {} ({} to {})",
                n,
                symbol,
                format_timestamp(&bars[0].time),
                format_timestamp(&bars[bars.len() - 1].time)
            );
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}

fn run_symbols(config_path: &PathBuf) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let symbols = match build_data_port(&config).and_then(|data| data.list_symbols()) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };

    if symbols.is_empty() {
        eprintln!("No symbols found");
    } else {
        for symbol in &symbols {
            println!("{}", symbol);
        }
        eprintln!("{} symbols found", symbols.len());
    }
    ExitCode::SUCCESS
}

fn run_backtest(
    config_path: &PathBuf,
    kind: &str,
    symbol: &str,
    start: &str,
    end: &str,
    params: Vec<(String, Value)>,
    tc: Option<f64>,
) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    match backtest_offline(&config, kind, symbol, start, end, params, tc) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(e),
    }
}

fn backtest_offline(
    config: &dyn ConfigPort,
    kind: &str,
    symbol: &str,
    start: &str,
    end: &str,
    params: Vec<(String, Value)>,
    tc: Option<f64>,
) -> Result<(), QuantdeskError> {
    let kind: StrategyKind = kind.parse()?;
    let parameters = kind.with_defaults(to_parameters(params));
    kind.validate(&parameters)?;

    let start_date = parse_timestamp(start)
        .ok_or_else(|| QuantdeskError::validation(format!("Invalid start date: {start}")))?;
    let end_date = parse_window_end(end)
        .ok_or_else(|| QuantdeskError::validation(format!("Invalid end date: {end}")))?;
    if end_date < start_date {
        return Err(QuantdeskError::validation("end date must not be before start date"));
    }

    let mut bt_config = BacktestConfig::from_config(config)?;
    if let Some(tc) = tc {
        if !(0.0..1.0).contains(&tc) {
            return Err(QuantdeskError::validation("--tc must be in [0, 1)"));
        }
        bt_config.transaction_cost = tc;
    }

    let data = build_data_port(config)?;
    let bars = data.fetch_bars(symbol, start_date, end_date)?;
    eprintln!("Running {} on {} ({} bars)", kind.label(), symbol, bars.len());

    let outcome = backtest_engine::run_backtest(kind, &parameters, &bars, &bt_config)?;
    println!("performance: {:.6}", outcome.performance);
    println!("outperformance: {:.6}", outcome.outperformance);
    Ok(())
}

fn run_hash_password() -> ExitCode {
    eprintln!("Enter password to hash:");
    let password = match io::stdin().lock().lines().next() {
        Some(Ok(line)) => line,
        Some(Err(e)) => {
            eprintln!("error: {e}");
            return ExitCode::from(1);
        }
        None => String::new(),
    };

    match web::hash_password(&password) {
        Ok(hash) => {
            println!("{}", hash);
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}

fn run_client(config_path: &PathBuf, action: ClientCommand) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let client = match ApiClient::from_config(&config) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };
    let rt = match runtime() {
        Ok(rt) => rt,
        Err(e) => return fail(e),
    };

    rt.block_on(async {
        if !matches!(action, ClientCommand::Register { .. } | ClientCommand::Tiers) {
            let credentials = config
                .require_string("client", "username")
                .and_then(|u| Ok((u, config.require_string("client", "password")?)));
            let (username, password) = match credentials {
                Ok(c) => c,
                Err(e) => return fail(e),
            };
            if let Err(e) = client.login(&username, &password).await {
                return client_failure(&e);
            }
        }

        match client_action(&client, action).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => client_failure(&e),
        }
    })
}

fn client_failure(err: &ApiError) -> ExitCode {
    eprintln!("error: {}", err.user_message());
    ExitCode::from(if err.is_unauthorized() { 7 } else { 1 })
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("error: {e}"),
    }
}

async fn client_action(client: &ApiClient, action: ClientCommand) -> Result<(), ApiError> {
    match action {
        ClientCommand::Register {
            username,
            email,
            password,
        } => {
            let account = client.register(&username, &email, &password).await?;
            eprintln!("Registered {} ({})", account.username, account.subscription_tier);
        }
        ClientCommand::Dashboard => {
            let dashboard = client.load_dashboard().await?;
            println!(
                "tier: {} ({})",
                dashboard.subscription.tier, dashboard.subscription.tier_config.name
            );
            println!("strategies: {}", dashboard.strategies.len());
            for strategy in &dashboard.strategies {
                println!("  #{} {} [{}]", strategy.id, strategy.name, strategy.kind.label());
            }
            println!("backtests: {}", dashboard.backtests.len());
            for backtest in dashboard.backtests.iter().take(5) {
                println!(
                    "  #{} {} performance={}",
                    backtest.id,
                    backtest.symbol,
                    backtest
                        .performance
                        .map(|p| format!("{p:.4}"))
                        .unwrap_or_else(|| "-".into())
                );
            }
        }
        ClientCommand::Strategies => print_json(&client.list_strategies().await?),
        ClientCommand::CreateStrategy { name, kind, params } => {
            let kind = parse_kind(&kind)?;
            let strategy = client
                .create_strategy(&name, kind, to_parameters(params))
                .await?;
            print_json(&strategy);
        }
        ClientCommand::UpdateStrategy {
            id,
            name,
            kind,
            params,
            active,
        } => {
            let update = StrategyUpdate {
                name,
                kind: kind.as_deref().map(parse_kind).transpose()?,
                parameters: (!params.is_empty()).then(|| to_parameters(params)),
                is_active: active,
            };
            print_json(&client.update_strategy(id, update).await?);
        }
        ClientCommand::DeleteStrategy { id } => {
            client.delete_strategy(id).await?;
            eprintln!("Deleted strategy {id}");
        }
        ClientCommand::Backtests => print_json(&client.list_backtests().await?),
        ClientCommand::RunBacktest {
            strategy_id,
            symbol,
            start,
            end,
            tc,
        } => {
            let backtest = client
                .run_backtest(&BacktestSubmission {
                    strategy_id,
                    symbol,
                    start_date: start,
                    end_date: end,
                    transaction_cost: tc,
                })
                .await?;
            print_json(&backtest);
        }
        ClientCommand::Tiers => {
            for (tier, config) in client.tiers().await? {
                println!(
                    "{:<13} ${:>7.2}/mo  strategies: {:<9} backtests/day: {:<9} live trading: {}",
                    tier.as_str(),
                    config.price,
                    config.strategies_label(),
                    config.backtests_label(),
                    config.live_trading_label()
                );
            }
        }
        ClientCommand::Upgrade { tier } => {
            let tier = tier
                .parse::<Tier>()
                .map_err(|e| ApiError::Input(e.to_string()))?;
            let link = client.create_checkout(tier).await?;
            println!("{}", link.checkout_url);
        }
        ClientCommand::Cancel => {
            let message = client.cancel_subscription().await?;
            eprintln!("{message}");
        }
    }
    Ok(())
}

fn parse_kind(kind: &str) -> Result<StrategyKind, ApiError> {
    kind.parse::<StrategyKind>()
        .map_err(|e| ApiError::Input(e.to_string()))
}
