//! Project configuration loaded from `.tack/config.toml`.

use std::{fs, path::Path};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tack_core::scan::ScanLimits;
use time::UtcOffset;
use time::macros::format_description;

/// Directory under the project root holding configuration and data.
pub const CONFIG_DIR: &str = ".tack";
const CONFIG_FILE: &str = "config.toml";

/// Top-level project configuration.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Content scanning bounds.
    #[serde(default)]
    pub extraction: ExtractionConfig,
    /// Query defaults.
    #[serde(default)]
    pub query: QueryConfig,
}

impl ProjectConfig {
    /// Load `<dir>/.tack/config.toml`, falling back to defaults when it does not exist.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read, parsed or validated.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let config_path = dir.as_ref().join(CONFIG_DIR).join(CONFIG_FILE);
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", config_path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid configuration in {}", config_path.display()))?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.extraction.validate()?;
        self.query.offset()?;
        Ok(())
    }
}

/// `[extraction]` block.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Bytes of each body scanned for references.
    pub max_scan_bytes: usize,
    /// Distinct card numbers considered per pass.
    pub max_references: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        let limits = ScanLimits::default();
        Self {
            max_scan_bytes: limits.max_scan_bytes,
            max_references: limits.max_references,
        }
    }
}

impl ExtractionConfig {
    /// Scan limits derived from this block.
    #[must_use]
    pub const fn limits(&self) -> ScanLimits {
        ScanLimits {
            max_scan_bytes: self.max_scan_bytes,
            max_references: self.max_references,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_scan_bytes == 0 {
            bail!("extraction.max_scan_bytes must be greater than zero");
        }
        if self.max_references == 0 {
            bail!("extraction.max_references must be greater than zero");
        }
        Ok(())
    }
}

/// `[query]` block.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueryConfig {
    /// Offset (`±HH:MM`) in which date windows such as `today` are resolved.
    pub utc_offset: String,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            utc_offset: "+00:00".to_owned(),
        }
    }
}

impl QueryConfig {
    /// Parsed offset.
    ///
    /// # Errors
    /// Returns an error unless `utc_offset` has the form `±HH:MM`.
    pub fn offset(&self) -> Result<UtcOffset> {
        UtcOffset::parse(
            self.utc_offset.trim(),
            format_description!("[offset_hour sign:mandatory]:[offset_minute]"),
        )
        .with_context(|| format!("query.utc_offset `{}` is not of the form ±HH:MM", self.utc_offset))
    }
}
