//! TOML config loading for the soup CLI.
//!
//! Deserializes an optional config file with a `[soup]` section, then
//! merges with CLI overrides. Priority chain: built-in defaults < TOML
//! values < CLI flags.

use std::path::Path;

use serde::Deserialize;

/// Top-level structure of the CLI config file.
#[derive(Debug, Default, Deserialize)]
pub struct SoupToml {
    #[serde(default)]
    pub soup: SoupOverrides,
}

/// Optional overrides for CLI behavior.
#[derive(Debug, Default, Deserialize)]
pub struct SoupOverrides {
    /// Decimal places for values in `inspect` output and logs.
    pub digits: Option<usize>,
    /// Log each checkpoint as `uniform` loads it.
    pub verbose: Option<bool>,
}

/// Effective CLI settings after merging.
#[derive(Debug)]
pub struct Settings {
    pub digits: usize,
    pub verbose: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            digits: 4,
            verbose: false,
        }
    }
}

/// Load and deserialize a [`SoupToml`] config file.
pub fn load_soup_toml(path: &Path) -> anyhow::Result<SoupToml> {
    let contents = std::fs::read_to_string(path)?;
    let config: SoupToml = toml::from_str(&contents)?;
    tracing::info!(path = %path.display(), "Loaded soup config");
    Ok(config)
}

/// Merge defaults, TOML values, and CLI flags into effective settings.
pub fn build_settings(
    toml: Option<&SoupToml>,
    digits_cli: Option<usize>,
    verbose_cli: Option<bool>,
) -> Settings {
    let mut settings = Settings::default();
    if let Some(toml) = toml {
        if let Some(d) = toml.soup.digits {
            settings.digits = d;
        }
        if let Some(v) = toml.soup.verbose {
            settings.verbose = v;
        }
    }
    // CLI overrides take highest priority
    if let Some(d) = digits_cli {
        settings.digits = d;
    }
    if let Some(v) = verbose_cli {
        settings.verbose = v;
    }
    settings
}
