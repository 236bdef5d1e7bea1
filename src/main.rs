//! Fetch Cache - request cache probe and configuration tool

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info, warn};

use fetch_cache::{
    RequestCache,
    cli::{Cli, Command},
    config::Config,
    setup_tracing, spawn_sweep_task,
};

/// What the probe caches for each URL
#[derive(Debug, Clone, Serialize)]
struct ProbeResponse {
    status: u16,
    bytes: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::Config => print_config(&config),
        Command::Probe {
            url,
            concurrency,
            rounds,
            interval,
            ttl,
        } => {
            let ttl = ttl.unwrap_or(config.cache.default_ttl);
            match run_probe(&config, &url, concurrency, rounds, interval, ttl).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("❌ Probe failed: {e:#}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

/// Print the effective configuration
fn print_config(config: &Config) -> ExitCode {
    match serde_yaml::to_string(config) {
        Ok(yaml) => {
            print!("{yaml}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Failed to serialize configuration: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Hit `url` with `concurrency` simultaneous cached requests per round
async fn run_probe(
    config: &Config,
    url: &str,
    concurrency: usize,
    rounds: usize,
    interval: Duration,
    ttl: Duration,
) -> anyhow::Result<()> {
    let client = reqwest::Client::builder()
        .timeout(config.probe.timeout)
        .user_agent(config.probe.user_agent.as_str())
        .build()
        .context("building HTTP client")?;

    let cache = RequestCache::from_config(&config.cache);
    let sweeper = config
        .cache
        .sweep_interval
        .map(|every| spawn_sweep_task(&cache, every));
    let http = cache.namespace("http");

    info!(
        version = env!("CARGO_PKG_VERSION"),
        url,
        concurrency,
        rounds,
        ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
        "Starting probe"
    );

    for round in 1..=rounds {
        let requests = (0..concurrency).map(|_| {
            let client = client.clone();
            let target = url.to_string();
            let http = http.clone();
            async move {
                http.get_or_fetch_with_ttl(url, ttl, move || async move {
                    let response = client
                        .get(&target)
                        .send()
                        .await
                        .with_context(|| format!("GET {target}"))?
                        .error_for_status()?;
                    let status = response.status().as_u16();
                    let body = response.bytes().await.context("reading response body")?;
                    Ok(ProbeResponse {
                        status,
                        bytes: body.len(),
                    })
                })
                .await
            }
        });

        let results = join_all(requests).await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        if let Some(Err(e)) = results.iter().find(|r| r.is_err()) {
            warn!(round, failed, error = %e, "Round had failures");
        }
        if let Some(Ok(response)) = results.iter().find(|r| r.is_ok()) {
            info!(round, status = response.status, bytes = response.bytes, "Round complete");
        }

        if round < rounds {
            tokio::time::sleep(interval).await;
        }
    }

    if let Some(handle) = sweeper {
        handle.abort();
    }

    println!("{}", serde_json::to_string_pretty(&cache.stats())?);
    Ok(())
}
