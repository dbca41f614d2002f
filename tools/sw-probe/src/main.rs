//! Command-line probe for the AfuChat offline worker.
//!
//! Runs the worker outside a browser: list the cache buckets of a version,
//! show which route owns a URL, push requests through an installed worker
//! (against the real network or a simulated offline one), render the offline
//! page and decode push payloads.
//!
//! ## Usage
//!
//! ```bash
//! # Bucket names for the configured version
//! sw-probe buckets --config sw.json
//!
//! # Which rule handles an image from backend storage?
//! sw-probe classify https://afuchat.supabase.co/storage/v1/object/a.png --destination image
//!
//! # Navigate while offline (ends in the offline page)
//! sw-probe fetch https://afuchat.com/chats --navigate --offline
//!
//! # Decode a push payload
//! sw-probe push --data '{"title":"Amina","url":"/chats/42"}'
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use afuchat_common::{init_logging, LogConfig, LogFormat};
use afuchat_net::{Destination, Fetcher, HttpFetcher, LoaderConfig, Request, ScriptedFetcher};
use afuchat_sw::{
    CacheRegistry, CacheStorage, Clients, FetchOutcome, LogNotificationSink, OfflinePage,
    OfflineWorker, Registration, Router, SwConfig, WorkerContext,
};
use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::debug;
use url::Url;

#[derive(Parser)]
#[command(name = "sw-probe")]
#[command(about = "Inspect and exercise the AfuChat offline worker")]
struct Cli {
    /// Worker configuration (JSON). Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log format: pretty, compact or json
    #[arg(long, default_value = "compact", global = true)]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the cache buckets owned by the configured version
    Buckets,

    /// Show which route handles a request
    Classify {
        url: String,
        /// Request destination (document, script, style, image, font, ...)
        #[arg(short, long, default_value = "empty")]
        destination: String,
        /// Treat the request as a top-level navigation
        #[arg(long)]
        navigate: bool,
        /// HTTP method
        #[arg(short, long, default_value = "GET")]
        method: String,
    },

    /// Install the worker and fetch a URL through it
    Fetch {
        url: String,
        #[arg(short, long, default_value = "empty")]
        destination: String,
        #[arg(long)]
        navigate: bool,
        /// Simulate a device without connectivity
        #[arg(long)]
        offline: bool,
        /// Fetch this many times (later fetches can hit the cache)
        #[arg(short, long, default_value = "1")]
        repeat: usize,
        /// Print the response body
        #[arg(long)]
        body: bool,
    },

    /// Print the offline page for the configured version
    OfflinePage,

    /// Build the notification for a push payload
    Push {
        /// Raw push data; omitted means an empty push
        #[arg(short, long)]
        data: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format: LogFormat = cli.log_format.parse()?;
    init_logging(LogConfig::from_verbosity(cli.verbose).with_format(format));

    let config = load_config(cli.config.as_deref())?;
    debug!(version = %config.version, "Loaded configuration");

    match cli.command {
        Commands::Buckets => {
            for name in CacheRegistry::from_config(&config).valid_names() {
                println!("{name}");
            }
        }

        Commands::Classify {
            url,
            destination,
            navigate,
            method,
        } => {
            let request = build_request(&url, &destination, navigate)?
                .method(method.parse().context("invalid HTTP method")?);
            let router = Router::from_config(&config);
            let registry = CacheRegistry::from_config(&config);
            let report = match router.classify(&request) {
                Some(rule) => json!({
                    "url": request.url.as_str(),
                    "rule": rule.name,
                    "strategy": rule.strategy.to_string(),
                    "bucket": registry.bucket_name(rule.purpose),
                    "max_entries": rule.expiration.max_entries,
                    "max_age_secs": rule.expiration.max_age_secs,
                    "offline_fallback": rule.offline_fallback,
                }),
                None => json!({
                    "url": request.url.as_str(),
                    "rule": null,
                    "passthrough": true,
                }),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Fetch {
            url,
            destination,
            navigate,
            offline,
            repeat,
            body,
        } => {
            let fetcher: Arc<dyn Fetcher> = if offline {
                Arc::new(ScriptedFetcher::offline())
            } else {
                Arc::new(HttpFetcher::new(LoaderConfig::default())?)
            };
            let context = WorkerContext::new(
                CacheStorage::default().shared(),
                fetcher,
                Clients::new().shared(),
                Arc::new(LogNotificationSink),
            );
            let (mut registration, _events) = Registration::new(config.scope.clone());
            let report = registration
                .register(OfflineWorker::new(config, context.clone())?)
                .await?;
            println!(
                "Installed: {} cached, {} failed",
                report.cached.len(),
                report.failed.len()
            );

            for attempt in 1..=repeat.max(1) {
                let request = build_request(&url, &destination, navigate)?;
                match registration.handle_fetch(&request).await {
                    FetchOutcome::Passthrough => {
                        println!("#{attempt}: passthrough (not intercepted)");
                    }
                    FetchOutcome::Respond(response) => {
                        println!(
                            "#{attempt}: {} {} ({} bytes, {})",
                            response.status,
                            response.status_text,
                            response.body.len(),
                            if response.from_cache { "cache" } else { "network" }
                        );
                        if body {
                            println!("{}", String::from_utf8_lossy(&response.body));
                        }
                    }
                }
            }

            if let Some(active) = registration.active() {
                active.worker().wait_until_idle().await;
            }
            let storage = context.storage.read().await;
            for name in storage.keys() {
                let entries = storage.get(&name).map(|cache| cache.len()).unwrap_or(0);
                println!("  {name}: {entries} entries");
            }
        }

        Commands::OfflinePage => {
            let page = OfflinePage::new(&CacheRegistry::from_config(&config));
            println!("{}", page.render());
        }

        Commands::Push { data } => {
            let context = WorkerContext::new(
                CacheStorage::default().shared(),
                Arc::new(ScriptedFetcher::offline()),
                Clients::new().shared(),
                Arc::new(LogNotificationSink),
            );
            let worker = OfflineWorker::new(config, context)?;
            let notification = worker.on_push(data.as_deref().map(str::as_bytes)).await;
            println!("{}", serde_json::to_string_pretty(&notification)?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SwConfig> {
    match path {
        Some(path) => SwConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(SwConfig::default()),
    }
}

fn build_request(url: &str, destination: &str, navigate: bool) -> anyhow::Result<Request> {
    let url = Url::parse(url).with_context(|| format!("invalid URL: {url}"))?;
    if navigate {
        return Ok(Request::navigate(url));
    }
    let destination: Destination = destination.parse()?;
    Ok(Request::get(url).destination(destination))
}
