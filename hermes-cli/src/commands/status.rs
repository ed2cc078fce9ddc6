//! `hermes status`: live supervisor state when the daemon runs, otherwise
//! what is on disk (cached payload and preferences).

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::{json, Value};
use tabled::{settings::Style, Table, Tabled};

use hermes_core::PreferenceStore;
use hermes_daemon::paths::socket_path;
use hermes_daemon::{request_status, DaemonError};
use hermes_sync::FileCache;

use super::home_dir;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "field")]
    field: &'static str,
    #[tabled(rename = "value")]
    value: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let report = match request_status(&home) {
            Ok(status) => status,
            Err(DaemonError::DaemonNotRunning { .. }) => offline_report(&home)?,
            Err(err) => return Err(err).context("failed to query daemon status"),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to render status JSON")?
            );
            return Ok(());
        }

        print_table(&report);
        Ok(())
    }
}

fn offline_report(home: &Path) -> Result<Value> {
    let cache = FileCache::open_at(home);
    let prefs = PreferenceStore::open_at(home).context("failed to open preferences")?;
    let cached = cache.latest().map(|cached| {
        json!({
            "path": cache.path().display().to_string(),
            "sha256": cached.sha256,
            "saved_at": cached.saved_at,
            "bytes": cached.raw.len(),
        })
    });
    Ok(json!({
        "running": false,
        "cache": cached,
        "prefs": prefs.values(),
        "socket": socket_path(home).display().to_string(),
    }))
}

fn print_table(report: &Value) {
    let running = report["running"].as_bool().unwrap_or(false);
    let mut rows = vec![StatusRow {
        field: "daemon",
        value: if running {
            "running".green().bold().to_string()
        } else {
            "not running".red().bold().to_string()
        },
    }];

    let supervisor = &report["supervisor"];
    if running {
        rows.push(StatusRow {
            field: "supervisor",
            value: text(&supervisor["state"]),
        });
        rows.push(StatusRow {
            field: "status",
            value: text(&supervisor["snapshot"]["status_text"]),
        });
        rows.push(StatusRow {
            field: "last update",
            value: text(&supervisor["snapshot"]["last_update_time"]),
        });
        rows.push(StatusRow {
            field: "frequent",
            value: format!(
                "{} ({} runs)",
                if supervisor["frequent_running"].as_bool().unwrap_or(false) {
                    "active"
                } else {
                    "idle"
                },
                supervisor["frequent_runs"].as_u64().unwrap_or(0)
            ),
        });
        let next = &supervisor["next_critical"];
        rows.push(StatusRow {
            field: "next critical",
            value: if next.is_null() {
                "none".to_string()
            } else {
                format!("{} ({})", text(&next["fires_at"]), text(&next["mode"]))
            },
        });
        if supervisor["scheduling_degraded"].as_bool().unwrap_or(false) {
            rows.push(StatusRow {
                field: "scheduling",
                value: format!(
                    "{} ({} fallbacks)",
                    "degraded".yellow(),
                    supervisor["degraded_count"].as_u64().unwrap_or(0)
                ),
            });
        }
        if let Some(alarms) = supervisor["last_outcome"]["active_alarm_items"].as_array() {
            if !alarms.is_empty() {
                let names: Vec<String> = alarms.iter().map(text).collect();
                rows.push(StatusRow {
                    field: "alarms",
                    value: names.join(", ").yellow().to_string(),
                });
            }
        }
    }

    let cache = &report["cache"];
    rows.push(StatusRow {
        field: "cache",
        value: if cache.is_null() {
            "empty".to_string()
        } else {
            format!(
                "{} bytes, saved {}",
                cache["bytes"].as_u64().unwrap_or(0),
                text(&cache["saved_at"])
            )
        },
    });
    if let Some(prefs) = report["prefs"].as_object() {
        for (key, value) in prefs {
            rows.push(StatusRow {
                field: pref_label(key),
                value: text(value),
            });
        }
    }

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if !running {
        println!("Run 'hermes daemon start' to begin syncing.");
    }
}

fn pref_label(key: &str) -> &'static str {
    match key {
        hermes_core::PREF_FREQUENT_SYNC_ENABLED => "pref: frequent",
        hermes_core::PREF_ALARMS_ENABLED => "pref: alarms",
        _ => "pref: other",
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}
