use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::Config;
use serde::Deserialize;

use crate::fetcher::{DelayRange, FetchConfig};
use crate::normalize::DEFAULT_ORIGIN;

const CONFIG_FILE: &str = "csfd";
const ENV_PREFIX: &str = "CSFD";

/// Runtime settings: defaults, then `csfd.toml`, then `CSFD_*` env vars,
/// then [`Overrides`] from the command line.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub output: PathBuf,
    pub origin: String,
    pub max_concurrency: usize,
    pub min_delay_secs: f64,
    pub max_delay_secs: f64,
    pub timeout_secs: u64,
    pub headers: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            output: PathBuf::from("movies.csv"),
            origin: DEFAULT_ORIGIN.to_string(),
            max_concurrency: 5,
            min_delay_secs: 0.5,
            max_delay_secs: 2.0,
            timeout_secs: 30,
            headers: default_headers(),
        }
    }
}

/// Browser-like header set sent with every detail page request.
/// Accept-Encoding is left to the client, which decodes what it advertises.
pub fn default_headers() -> BTreeMap<String, String> {
    [
        (
            "User-Agent",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:125.0) Gecko/20100101 Firefox/125.0",
        ),
        (
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
        ("Accept-Language", "en-US,en;q=0.5"),
        ("Referer", "https://www.csfd.cz/soukrome/chci-videt/"),
        ("Connection", "keep-alive"),
        ("Upgrade-Insecure-Requests", "1"),
        ("Sec-Fetch-Dest", "document"),
        ("Sec-Fetch-Mode", "navigate"),
        ("Sec-Fetch-Site", "same-origin"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Command-line values that win over every loaded source.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub data_dir: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub max_concurrency: Option<usize>,
    pub min_delay_secs: Option<f64>,
    pub max_delay_secs: Option<f64>,
}

impl Settings {
    /// Load the file and environment layers. Not validated: call
    /// [`Settings::apply`] (or [`Settings::validate`]) once overrides are known.
    pub fn load() -> Result<Self> {
        Config::builder()
            .add_source(config::File::with_name(CONFIG_FILE).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("Failed to load settings")?
            .try_deserialize()
            .context("Invalid settings")
    }

    /// Apply command-line overrides, then validate the result.
    pub fn apply(mut self, overrides: Overrides) -> Result<Self> {
        if let Some(dir) = overrides.data_dir {
            self.data_dir = dir;
        }
        if let Some(path) = overrides.output {
            self.output = path;
        }
        if let Some(c) = overrides.max_concurrency {
            self.max_concurrency = c;
        }
        if let Some(d) = overrides.min_delay_secs {
            self.min_delay_secs = d;
        }
        if let Some(d) = overrides.max_delay_secs {
            self.max_delay_secs = d;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            bail!("max_concurrency must be at least 1");
        }
        let delay_ok = |d: f64| d.is_finite() && d >= 0.0;
        if !(delay_ok(self.min_delay_secs) && delay_ok(self.max_delay_secs)) {
            bail!(
                "delays must be finite and non-negative (got {}..{})",
                self.min_delay_secs,
                self.max_delay_secs
            );
        }
        if self.min_delay_secs > self.max_delay_secs {
            bail!(
                "min_delay_secs ({}) exceeds max_delay_secs ({})",
                self.min_delay_secs,
                self.max_delay_secs
            );
        }
        if self.timeout_secs == 0 {
            bail!("timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn delay_range(&self) -> DelayRange {
        DelayRange::from_secs(self.min_delay_secs, self.max_delay_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn fetch_config(&self, show_progress: bool) -> FetchConfig {
        FetchConfig {
            max_concurrency: self.max_concurrency,
            delay: self.delay_range(),
            show_progress,
        }
    }
}
