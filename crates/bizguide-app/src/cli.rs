//! CLI argument definitions for the business guide.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

use bizguide_core::GuideContext;

/// Business guide: ask questions about starting a business in Finland or Estonia.
#[derive(Parser, Debug)]
#[command(name = "bizguide", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Country to start in (finland, estonia).
    #[arg(long = "country")]
    pub country: Option<String>,

    /// Override the answer pipeline base URL.
    #[arg(long = "pipeline-url")]
    pub pipeline_url: Option<String>,

    /// Hide the generation time under answers.
    #[arg(long = "no-timer")]
    pub no_timer: bool,

    /// Print pipeline debug logs to stderr.
    #[arg(long = "debug-view")]
    pub debug_view: bool,

    /// Answer from canned in-process collaborators instead of the network.
    #[arg(long = "offline")]
    pub offline: bool,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > BIZGUIDE_CONFIG env var > platform default (~/.bizguide/config.toml).
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("BIZGUIDE_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the log filter directive.
    ///
    /// Priority: --log-level flag > RUST_LOG env var > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        if let Some(ref level) = self.log_level {
            return level.clone();
        }
        if let Ok(level) = std::env::var("RUST_LOG") {
            if !level.trim().is_empty() {
                return level;
            }
        }
        config_level.to_string()
    }

    /// Resolve the starting country.
    ///
    /// Priority: --country flag > BIZGUIDE_COUNTRY env var. `None` means the
    /// user picks one interactively.
    pub fn resolve_country(&self) -> Result<Option<GuideContext>, String> {
        let raw = match self.country {
            Some(ref c) => c.clone(),
            None => match std::env::var("BIZGUIDE_COUNTRY") {
                Ok(c) if !c.trim().is_empty() => c,
                _ => return Ok(None),
            },
        };
        raw.parse().map(Some)
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".bizguide").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".bizguide").join("config.toml");
    }
    PathBuf::from("config.toml")
}
