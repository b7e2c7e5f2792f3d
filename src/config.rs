//! Startup configuration and the validate-and-substitute rules shared with
//! the live command protocol.

use crate::filter::{FilterSpec, WindowKind, MAX_FILTER_LENGTH};
use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CUTOFF: f64 = 0.3;
pub const DEFAULT_RATE: u32 = 22_050;
pub const SUPPORTED_RATES: [u32; 2] = [11_025, 22_050];
pub const DEFAULT_WINDOW: WindowKind = WindowKind::Blackman;
pub const DEFAULT_FILTER_LENGTH: usize = 25;
pub const DEFAULT_LATENCY_MS: u32 = 200;
pub const MIN_LATENCY_MS: u32 = 100;
pub const MAX_LATENCY_MS: u32 = 10_000;
pub const DEFAULT_PLOT_WIDTH: u32 = 320;

pub fn validate_cutoff(cutoff: f64) -> f64 {
    if cutoff > 0.0 && cutoff < 1.0 {
        cutoff
    } else {
        log::warn!("cutoff must be in (0, 1), got {cutoff}; using {DEFAULT_CUTOFF}");
        DEFAULT_CUTOFF
    }
}

pub fn validate_rate(rate: i64) -> u32 {
    match SUPPORTED_RATES.iter().find(|&&r| i64::from(r) == rate) {
        Some(&r) => r,
        None => {
            log::warn!("sample rate must be 11025 or 22050, got {rate}; using {DEFAULT_RATE}");
            DEFAULT_RATE
        }
    }
}

pub fn validate_window(index: i64) -> WindowKind {
    WindowKind::from_index(index).unwrap_or_else(|| {
        log::warn!("window selector must be in [0, 4], got {index}; using {DEFAULT_WINDOW}");
        DEFAULT_WINDOW
    })
}

pub fn validate_filter_length(length: i64) -> usize {
    match usize::try_from(length) {
        Ok(l) if (1..=MAX_FILTER_LENGTH).contains(&l) => l,
        _ => {
            log::warn!(
                "filter length must be in [1, {MAX_FILTER_LENGTH}], got {length}; using {DEFAULT_FILTER_LENGTH}"
            );
            DEFAULT_FILTER_LENGTH
        }
    }
}

/// Minutes of generation; non-positive means "run until stopped".
pub fn validate_run_minutes(minutes: i64) -> Option<Duration> {
    u64::try_from(minutes)
        .ok()
        .filter(|&m| m > 0)
        .map(|m| Duration::from_secs(m * 60))
}

/// Fade length in seconds; non-positive disables the fade.
pub fn validate_fade_seconds(seconds: i64) -> Option<Duration> {
    u64::try_from(seconds)
        .ok()
        .filter(|&s| s > 0)
        .map(Duration::from_secs)
}

pub fn validate_latency(latency_ms: i64) -> u32 {
    match u32::try_from(latency_ms) {
        Ok(l) if (MIN_LATENCY_MS..=MAX_LATENCY_MS).contains(&l) => l,
        _ => {
            log::warn!(
                "latency must be in [{MIN_LATENCY_MS}, {MAX_LATENCY_MS}] ms, got {latency_ms}; using {DEFAULT_LATENCY_MS}"
            );
            DEFAULT_LATENCY_MS
        }
    }
}

pub fn validate_plot_width(width: i64) -> u32 {
    u32::try_from(width).unwrap_or_else(|_| {
        log::warn!("plot width must be non-negative, got {width}; using {DEFAULT_PLOT_WIDTH}");
        DEFAULT_PLOT_WIDTH
    })
}

/// Raw settings as read from a TOML file or the command line. Every field
/// is optional and unvalidated; [`Config::resolve`] applies the rules.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub cutoff: Option<f64>,
    pub rate: Option<i64>,
    pub window: Option<i64>,
    pub filter_length: Option<i64>,
    pub run_minutes: Option<i64>,
    pub fade_seconds: Option<i64>,
    pub latency_ms: Option<i64>,
    pub plot_width: Option<i64>,
    pub read_commands: Option<bool>,
    pub seed: Option<u64>,
}

impl Config {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("invalid configuration file")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Fields set in `other` win.
    pub fn overlay(self, other: Config) -> Config {
        Config {
            cutoff: other.cutoff.or(self.cutoff),
            rate: other.rate.or(self.rate),
            window: other.window.or(self.window),
            filter_length: other.filter_length.or(self.filter_length),
            run_minutes: other.run_minutes.or(self.run_minutes),
            fade_seconds: other.fade_seconds.or(self.fade_seconds),
            latency_ms: other.latency_ms.or(self.latency_ms),
            plot_width: other.plot_width.or(self.plot_width),
            read_commands: other.read_commands.or(self.read_commands),
            seed: other.seed.or(self.seed),
        }
    }

    pub fn resolve(&self) -> StreamSettings {
        StreamSettings {
            filter: FilterSpec {
                window: self.window.map_or(DEFAULT_WINDOW, validate_window),
                length: self
                    .filter_length
                    .map_or(DEFAULT_FILTER_LENGTH, validate_filter_length),
                cutoff: self.cutoff.map_or(DEFAULT_CUTOFF, validate_cutoff),
            },
            sample_rate: self.rate.map_or(DEFAULT_RATE, validate_rate),
            latency_ms: self.latency_ms.map_or(DEFAULT_LATENCY_MS, validate_latency),
            run_time: self.run_minutes.and_then(validate_run_minutes),
            fade_time: self.fade_seconds.and_then(validate_fade_seconds),
            plot_width: self.plot_width.map(validate_plot_width),
            read_commands: self.read_commands.unwrap_or(false),
            seed: self.seed,
        }
    }
}

/// Validated startup settings for the stream controller.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    pub filter: FilterSpec,
    pub sample_rate: u32,
    pub latency_ms: u32,
    pub run_time: Option<Duration>,
    pub fade_time: Option<Duration>,
    /// Render the frequency response at startup with this width.
    pub plot_width: Option<u32>,
    pub read_commands: bool,
    pub seed: Option<u64>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Config::default().resolve()
    }
}
