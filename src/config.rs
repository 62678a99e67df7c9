use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const APP_VERSION: &str = "v0.1.0";

/// Settings file looked up next to the executable when no path is given.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Largest accepted `sample_window`; the ring is allocated up front.
pub const MAX_SAMPLE_WINDOW: usize = 4096;

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Average peak level (0.0 - 1.0) above which the volume is reduced.
    /// 0.0 keeps the volume reduced almost permanently, 1.0 practically never triggers.
    pub threshold: f32,

    /// The current volume is divided by this when loud audio is detected.
    /// 1.0 is accepted but makes no audible difference.
    pub division_factor: f32,

    /// Seconds the average must stay below the threshold before the
    /// original volume comes back.
    pub restore_delay: u64,

    /// Number of peak readings averaged before comparing to the threshold.
    /// A settings file without this key gets 1 (raw peaks, no smoothing).
    #[serde(default = "unwindowed")]
    pub sample_window: usize,

    /// Log peak, average, volume and state every couple of seconds.
    pub verbose: bool,
}

fn unwindowed() -> usize {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threshold: 0.4,
            division_factor: 4.0,
            restore_delay: 3,
            sample_window: 5,
            verbose: false,
        }
    }
}

impl Config {
    /// Load settings, falling back to defaults on any failure.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let result = match path {
            Some(path) => Self::load_from(path),
            None => default_path().and_then(|path| Self::load_from(&path)),
        };

        result.unwrap_or_else(|e| {
            warn!("{e:#}");
            warn!("Using default configuration");
            Self::default()
        })
    }

    /// Read `path`, or create it with defaults if it does not exist yet.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.write_to(path)?;
            info!("Created default configuration file at: {}", path.display());
            return Ok(config);
        }

        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config: Self = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.sanitize();

        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Replace values the controller cannot work with by their defaults.
    /// Run after every source of settings has been applied.
    pub fn sanitize(&mut self) {
        let defaults = Self::default();

        if !(self.division_factor.is_finite() && self.division_factor > 0.0) {
            warn!(
                "division_factor must be greater than 0, got {}; using {}",
                self.division_factor, defaults.division_factor
            );
            self.division_factor = defaults.division_factor;
        }

        if self.sample_window > MAX_SAMPLE_WINDOW {
            warn!(
                "sample_window {} exceeds the maximum of {MAX_SAMPLE_WINDOW}; using {}",
                self.sample_window, defaults.sample_window
            );
            self.sample_window = defaults.sample_window;
        }
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let data =
            serde_json::to_string_pretty(self).context("failed to serialize default config")?;
        fs::write(path, data)
            .with_context(|| format!("failed to write config file {}", path.display()))
    }
}

fn default_path() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("failed to get executable path")?;
    let dir = exe
        .parent()
        .ok_or_else(|| anyhow::anyhow!("executable path has no parent directory"))?;
    Ok(dir.join(CONFIG_FILE_NAME))
}
