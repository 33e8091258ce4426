use anyhow::Context;
use callscreen::console::spawn_stdin_feed;
use callscreen::normalize::normalize;
use callscreen::server::Server;
use callscreen::stats::StatsAggregator;
use callscreen::store::{NumberListStore, Verdict};
use callscreen::Config;
use clap::{Arg, Command};
use log::LevelFilter;
use serde::Serialize;
use std::process;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() {
    let matches = Command::new("callscreen")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Caller-id filter that lets wanted calls through and tarpits the rest")
        .long_about("callscreen - caller-id access control for inbound calls:\n\
                    • Block and allow lists loaded from files and directories\n\
                    • National numbers normalized to international form before matching\n\
                    • Blocked callers are rung, answered and hung up after configurable delays\n\
                    • CSV audit trail of every decision, reopened on SIGHUP\n\
                    • Lists reloaded on SIGUSR1 or when the files change")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/callscreen.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Validate the configuration and load the number lists")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("check-number")
                .long("check-number")
                .value_name("NUMBER")
                .help("Show how a caller id would be classified")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("format")
                .long("format")
                .value_name("FORMAT")
                .help("Output format for --check-number")
                .value_parser(["text", "json"])
                .default_value("text"),
        )
        .arg(
            Arg::new("daemon")
                .short('d')
                .long("daemon")
                .help("Ignore standard input and run until SIGINT or SIGTERM")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("/etc/callscreen.yaml");
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e:#}");
            process::exit(1);
        }
    };

    // Initialize logger based on verbose flag, falling back to the config
    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        config.log_level_filter().unwrap_or(LevelFilter::Info)
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if matches.get_flag("test-config") {
        if let Err(e) = test_config(&config) {
            println!("❌ Configuration validation failed:");
            println!("Error: {e:#}");
            process::exit(1);
        }
        return;
    }

    if let Some(number) = matches.get_one::<String>("check-number") {
        let json = matches.get_one::<String>("format").map(String::as_str) == Some("json");
        if let Err(e) = check_number(&config, number, json) {
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
        return;
    }

    if let Err(e) = run_server(&config, matches.get_flag("daemon")).await {
        log::error!("Call filter error: {e:#}");
        process::exit(1);
    }
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    if std::path::Path::new(path).exists() {
        Ok(Config::from_file(path)?)
    } else {
        // Logging is not up yet
        eprintln!("Configuration file '{path}' not found, using default configuration");
        Ok(Config::default())
    }
}

fn generate_default_config(path: &str) {
    let config = Config::default();
    match config.to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Please edit the configuration file to suit your needs.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e}");
            process::exit(1);
        }
    }
}

fn load_store(config: &Config) -> anyhow::Result<(NumberListStore, callscreen::store::ReloadReport)> {
    let store = NumberListStore::new(Arc::new(StatsAggregator::new()));
    let report = store
        .reload(&config.lists.block_paths, &config.lists.allow_paths)
        .context("Failed to load number lists")?;
    Ok((store, report))
}

fn test_config(config: &Config) -> anyhow::Result<()> {
    println!("🔍 Testing configuration...");
    println!();
    println!("Country code: +{}", config.country_code);
    println!(
        "Tarpit delays: pre-answer {:?}, answer {:?}, hangup {:?}",
        config.tarpit.pre_answer_delay, config.tarpit.answer_delay, config.tarpit.hangup_delay
    );

    let (_, report) = load_store(config)?;
    println!(
        "Block list: {} entries in {} files",
        report.block_entries, report.block_tables
    );
    println!(
        "Allow list: {} entries in {} files",
        report.allow_entries, report.allow_tables
    );
    if !report.warnings.is_empty() {
        println!("Warnings ({}):", report.warnings.len());
        for warning in &report.warnings {
            println!("  • {warning}");
        }
    }
    println!("✅ Configuration is valid");
    Ok(())
}

#[derive(Serialize)]
struct NumberCheck<'a> {
    input: &'a str,
    normalized: String,
    result: Verdict,
}

fn check_number(config: &Config, number: &str, json: bool) -> anyhow::Result<()> {
    let (store, _) = load_store(config)?;
    let normalized = normalize(number.trim(), &config.country_code);
    let verdict = store.lookup(&normalized);

    if json {
        let check = NumberCheck {
            input: number,
            normalized,
            result: verdict,
        };
        println!("{}", serde_json::to_string_pretty(&check)?);
        return Ok(());
    }

    match &verdict {
        Verdict::Blocked(found) => println!(
            "🚫 {normalized}: blocked by {}:{} {}",
            found.source, found.line, found.comment
        ),
        Verdict::Whitelisted(found) => println!(
            "✅ {normalized}: allowed, on allow list {}:{} {}",
            found.source, found.line, found.comment
        ),
        Verdict::NotListed => println!("✅ {normalized}: allowed, not listed"),
    }
    Ok(())
}

async fn run_server(config: &Config, daemon: bool) -> anyhow::Result<()> {
    let server = Server::new(config)?;
    let (tx, rx) = mpsc::channel(64);

    if daemon {
        // Holding the sender keeps the feed open until shutdown
        log::info!("Running as a daemon, standard input is not read");
        server.run(rx, shutdown_signal()).await?;
        drop(tx);
        return Ok(());
    }

    log::info!(
        "Reading caller ids from standard input, one per line; \
         the filter stops when it closes (use --daemon to keep running)"
    );
    let feed = spawn_stdin_feed(tx);
    server.run(rx, shutdown_signal()).await?;
    feed.abort();
    Ok(())
}

async fn shutdown_signal() {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            log::warn!("Failed to install SIGTERM handler: {e}");
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to wait for ctrl-c: {e}");
                std::future::pending::<()>().await;
            }
            return;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                log::error!("Failed to wait for ctrl-c: {e}");
            }
            log::info!("Received SIGINT, shutting down");
        }
        _ = terminate.recv() => log::info!("Received SIGTERM, shutting down"),
    }
}
