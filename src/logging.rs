use std::fs::{self, OpenOptions};
use std::path::PathBuf;

use anyhow::{Context, Result};
use env_logger::{Builder, Target};

pub const LOG_ENV: &str = "OTOGRAM_LOG";
pub const LOG_FILE_ENV: &str = "OTOGRAM_LOG_FILE";

/// Installs the global logger when `OTOGRAM_LOG` is set (using its value as the filter).
///
/// Output always goes to a file; the terminal belongs to the UI.
pub fn init() -> Result<Option<PathBuf>> {
    let Ok(filter) = std::env::var(LOG_ENV) else {
        return Ok(None);
    };
    if filter.trim().is_empty() {
        return Ok(None);
    }
    let path = std::env::var_os(LOG_FILE_ENV)
        .map(PathBuf::from)
        .or_else(default_log_path)
        .context("logging: resolve log file path")?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("logging: create {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("logging: open {}", path.display()))?;

    Builder::new()
        .parse_filters(&filter)
        .target(Target::Pipe(Box::new(file)))
        .format_timestamp_millis()
        .try_init()
        .context("logging: install logger")?;
    log::info!("otogram-tui {} logging to {}", crate::VERSION, path.display());
    Ok(Some(path))
}

pub fn default_log_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("otogram").join("otogram.log"))
}
