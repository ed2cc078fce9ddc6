//! `hermes sync`: one foreground run through the same orchestrator the
//! daemon uses.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Args;
use colored::Colorize;

use hermes_core::{HermesConfig, PreferenceStore, SyncConfig, SyncOrigin};
use hermes_sync::{FileCache, HttpFetcher, LogSink, NoopPublisher, Orchestrator, StatusPresenter};

use super::home_dir;

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Run as a critical sync (status line carries the `(C)` marker).
    #[arg(long)]
    pub critical: bool,

    /// Emit the outcome as JSON.
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let config = HermesConfig::load_at(&home).context("failed to load configuration")?;
        let prefs =
            Arc::new(PreferenceStore::open_at(&home).context("failed to open preferences")?);
        let fetcher = HttpFetcher::from_config(&config.source)
            .context("no document source; set source.url in ~/.hermes/config.yaml")?;
        let cache = Arc::new(FileCache::open_at(&home));

        let orchestrator = Orchestrator::new(
            Arc::new(fetcher),
            cache.clone(),
            Arc::new(StatusPresenter::new(Box::new(LogSink))),
            Arc::new(NoopPublisher),
            SyncConfig::new(
                prefs,
                config.schedule.frequent_interval(),
                config.schedule.critical_interval(),
            ),
        );
        let origin = if self.critical {
            SyncOrigin::Critical
        } else {
            SyncOrigin::Frequent
        };
        let outcome = orchestrator.run_once(origin);

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&outcome).context("failed to render outcome JSON")?
            );
        } else {
            let status = orchestrator.presenter().snapshot();
            let headline = if outcome.succeeded {
                status.status_text.green().bold()
            } else {
                status.status_text.red().bold()
            };
            println!("{headline}");
            println!(
                "  at:     {}",
                outcome.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
            );
            if outcome.active_alarm_items.is_empty() {
                println!("  alarms: none");
            } else {
                println!("  alarms: {}", outcome.active_alarm_items.to_string().yellow());
            }
            if let Some(cached) = cache.latest() {
                let short = cached.sha256.get(..12).unwrap_or(&cached.sha256);
                println!("  cache:  {} ({short})", cache.path().display());
            }
        }

        match outcome.failure {
            Some(reason) if !outcome.succeeded => anyhow::bail!(reason),
            _ => Ok(()),
        }
    }
}
