use crate::config::Config;
use clap::Parser;
use log::warn;
use std::path::PathBuf;

/// Automatically turns the system volume down on loud audio and back up
/// once it calms down.
///
/// Numeric flags left negative (the default) keep the settings file value.
#[derive(Parser, Debug)]
#[command(name = "earguard", version, about)]
pub struct Cli {
    /// Audio peak threshold (0.0-1.0)
    #[arg(long, default_value_t = -1.0, allow_negative_numbers = true)]
    pub threshold: f32,

    /// Factor to divide the volume by when loud sound is detected
    #[arg(long, default_value_t = -1.0, allow_negative_numbers = true)]
    pub division: f32,

    /// Seconds to wait before restoring the volume
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub delay: i64,

    /// Number of peak samples to average
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub window: i64,

    /// Enable verbose output
    #[arg(long)]
    pub verbose: bool,

    /// Path to the configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded settings
    pub fn apply(&self, config: &mut Config) {
        if self.threshold >= 0.0 {
            config.threshold = self.threshold;
        }
        if self.division > 0.0 {
            config.division_factor = self.division;
        } else if self.division == 0.0 {
            warn!("Ignoring --division 0, the volume cannot be divided by zero");
        }
        if self.delay >= 0 {
            config.restore_delay = self.delay as u64;
        }
        if self.window >= 0 {
            config.sample_window = self.window as usize;
        }
        if self.verbose {
            config.verbose = true;
        }
    }
}
