pub mod control;
pub mod daemon;
pub mod prefs;
pub mod status;
pub mod sync;

use std::path::PathBuf;

use anyhow::{Context, Result};

pub(crate) fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}
