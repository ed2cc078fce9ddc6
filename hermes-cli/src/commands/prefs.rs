//! `hermes frequent|alarms on|off` and `hermes prefs list`.
//!
//! Writes go straight to `~/.hermes/prefs.yaml`; a running daemon watches
//! that file and applies the change without a restart.

use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use hermes_core::{
    prefs::prefs_path_at, PreferenceStore, PREF_ALARMS_ENABLED, PREF_FREQUENT_SYNC_ENABLED,
};

use super::home_dir;

/// Every known key, listed even when unset.
const KNOWN_KEYS: [&str; 2] = [PREF_FREQUENT_SYNC_ENABLED, PREF_ALARMS_ENABLED];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    fn enabled(self) -> bool {
        self == Toggle::On
    }
}

#[derive(Subcommand, Debug)]
pub enum PrefsCommand {
    /// Show every preference and where it is stored.
    List,
}

#[derive(Tabled)]
struct PrefRow {
    #[tabled(rename = "key")]
    key: String,
    #[tabled(rename = "value")]
    value: String,
    #[tabled(rename = "source")]
    source: &'static str,
}

pub fn set(key: &str, state: Toggle) -> Result<()> {
    let home = home_dir()?;
    let store = PreferenceStore::open_at(&home).context("failed to open preferences")?;
    store
        .set_bool(key, state.enabled())
        .with_context(|| format!("failed to save preference '{key}'"))?;
    println!("{key} = {}", state.enabled());
    Ok(())
}

pub fn run(command: PrefsCommand) -> Result<()> {
    match command {
        PrefsCommand::List => list(),
    }
}

fn list() -> Result<()> {
    let home = home_dir()?;
    let store = PreferenceStore::open_at(&home).context("failed to open preferences")?;
    let stored = store.values();

    let mut rows: Vec<PrefRow> = KNOWN_KEYS
        .iter()
        .map(|key| match stored.get(*key) {
            Some(value) => PrefRow {
                key: key.to_string(),
                value: colorize(*value),
                source: "prefs.yaml",
            },
            None => PrefRow {
                key: key.to_string(),
                value: colorize(store.get_bool(key, true)),
                source: "default",
            },
        })
        .collect();
    rows.extend(
        stored
            .iter()
            .filter(|(key, _)| !KNOWN_KEYS.contains(&key.as_str()))
            .map(|(key, value)| PrefRow {
                key: key.clone(),
                value: colorize(*value),
                source: "prefs.yaml",
            }),
    );

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    println!("stored in {}", prefs_path_at(&home).display());
    Ok(())
}

fn colorize(value: bool) -> String {
    if value {
        "true".green().to_string()
    } else {
        "false".red().to_string()
    }
}
