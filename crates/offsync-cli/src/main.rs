//! offsync - command-line front end for the offline-first data layer.
//!
//! Reads and writes go through the same interceptor an application would
//! use, so `--offline` shows exactly what a disconnected client would see:
//! reads answered from the cache and writes parked in the queue until the
//! next `offsync sync`.

use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use offsync_core::{
    Config, InterceptorConfig, Method, OfflineClient, Request, SyncOutcome, SyncRun,
};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "offsync", version, about = "Offline-first cache and write queue")]
struct Cli {
    /// Treat the network as unavailable
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read a URL through the cache policy
    Get {
        url: String,
        #[command(flatten)]
        policy: PolicyArgs,
    },
    /// Send a write (POST, PUT, PATCH, DELETE) through the cache policy
    Send {
        method: Method,
        url: String,
        /// JSON request body
        #[arg(long)]
        body: Option<String>,
        /// Extra header as name:value (repeatable)
        #[arg(long = "header", short = 'H')]
        headers: Vec<String>,
        #[command(flatten)]
        policy: PolicyArgs,
    },
    /// Inspect or clear the pending-mutation queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Inspect or clear cached collections
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Replay queued mutations now
    Sync,
    /// Show or change the saved configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration, environment overrides included
    Show,
    /// Update the config file
    Set(ConfigArgs),
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// Prefix for resource routes
    #[arg(long)]
    base_url: Option<String>,
    /// Directory for cached collections and the queue
    #[arg(long)]
    data_dir: Option<PathBuf>,
    #[arg(long)]
    request_timeout_secs: Option<u64>,
    #[arg(long)]
    replay_timeout_secs: Option<u64>,
    #[arg(long)]
    max_consecutive_failures: Option<u32>,
}

impl ConfigArgs {
    fn apply(self, config: &mut Config) {
        if let Some(url) = self.base_url {
            config.base_url = Some(url);
        }
        if let Some(dir) = self.data_dir {
            config.data_dir = Some(dir);
        }
        if let Some(secs) = self.request_timeout_secs {
            config.request_timeout_secs = secs;
        }
        if let Some(secs) = self.replay_timeout_secs {
            config.replay_timeout_secs = secs;
        }
        if let Some(limit) = self.max_consecutive_failures {
            config.max_consecutive_failures = limit;
        }
    }
}

#[derive(Args, Debug)]
struct PolicyArgs {
    /// Collection key; without it the request bypasses the cache
    #[arg(long, short = 'c')]
    collection: Option<String>,
    /// Store successful GET responses
    #[arg(long)]
    store: bool,
    /// Answer from the cache when the network fails
    #[arg(long)]
    fallback: bool,
    /// Clear the collection before fetching
    #[arg(long)]
    bust: bool,
}

impl PolicyArgs {
    fn to_config(&self) -> Option<InterceptorConfig> {
        self.collection.as_ref().map(|collection| InterceptorConfig {
            collection_key: Some(collection.clone()),
            should_store: self.store,
            should_return_stored_values_on_error: self.fallback,
            cache_buster: self.bust,
        })
    }
}

#[derive(Subcommand, Debug)]
enum QueueAction {
    /// Print pending mutations in replay order
    List,
    /// Drop every pending mutation
    Clear,
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Print the cached items of a collection
    Show { collection: String },
    /// Clear one collection
    Clear { collection: String },
    /// Clear every collection
    ClearAll,
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .with_context(|| format!("Header must look like name:value, got {}", raw))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

async fn open_client(config: &Config) -> Result<OfflineClient> {
    let client = OfflineClient::open(config).await?;
    info!(offline = config.start_offline, "offsync starting");
    Ok(client)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing();

    let mut config = Config::load().context("Failed to load config")?;
    if cli.offline {
        config.start_offline = true;
    }
    match cli.command {
        Command::Get { url, policy } => {
            let client = open_client(&config).await?;
            let response = client.send(Request::get(url), policy.to_config().as_ref()).await?;
            print_json(&response)?;
        }
        Command::Send {
            method,
            url,
            body,
            headers,
            policy,
        } => {
            let client = open_client(&config).await?;
            let mut request = Request::new(method, url);
            if let Some(body) = body {
                let body: Value = serde_json::from_str(&body).context("Body is not valid JSON")?;
                request = request.with_body(body);
            }
            for raw in &headers {
                let (name, value) = parse_header(raw)?;
                request = request.with_header(name, value);
            }
            let response = client.send(request, policy.to_config().as_ref()).await?;
            print_json(&response)?;
        }
        Command::Queue { action } => {
            let client = open_client(&config).await?;
            match action {
                QueueAction::List => print_json(&client.store().list_mutations().await?)?,
                QueueAction::Clear => {
                    client.store().clear_mutations().await?;
                    eprintln!("Queue cleared");
                }
            }
        }
        Command::Cache { action } => {
            let client = open_client(&config).await?;
            match action {
                CacheAction::Show { collection } => {
                    print_json(&client.store().get_collection(&collection).await?)?
                }
                CacheAction::Clear { collection } => {
                    client.store().clear_collection(&collection).await?;
                    eprintln!("Cleared {}", collection);
                }
                CacheAction::ClearAll => {
                    client.store().clear_all_collections().await?;
                    eprintln!("Cleared all collections");
                }
            }
        }
        Command::Sync => {
            let client = open_client(&config).await?;
            if !client.connectivity().is_online() {
                anyhow::bail!("Cannot sync while offline");
            }
            match client.sync_engine().sync().await {
                SyncRun::Skipped => eprintln!("A sync pass is already running"),
                SyncRun::Completed(SyncOutcome::Success { replayed }) => {
                    eprintln!("Synchronized {} mutation(s)", replayed)
                }
                SyncRun::Completed(SyncOutcome::Failure {
                    mutation_id,
                    replayed,
                    error,
                }) => {
                    anyhow::bail!(
                        "Sync stopped after {} mutation(s) at {:?}: {}",
                        replayed,
                        mutation_id,
                        error
                    );
                }
            }
        }
        Command::Config { action } => match action {
            ConfigAction::Show => print_json(&config)?,
            ConfigAction::Set(args) => {
                let mut saved = Config::load_file().context("Failed to load config")?;
                args.apply(&mut saved);
                let path = saved.save()?;
                eprintln!("Saved {}", path.display());
            }
        },
    }

    Ok(())
}
