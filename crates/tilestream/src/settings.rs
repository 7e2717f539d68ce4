use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tiles::PoolConfig;
use view::GridConfig;

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub pool: PoolConfig,
    pub grid: GridConfig,
    pub run: RunConfig,
}

/// Shape of the simulated session: viewport size, how far it pans per frame
/// and how slow the synthetic loader is.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub width: u32,
    pub height: u32,
    pub frames: u32,
    pub frame_millis: u64,
    pub pan_x: f64,
    pub pan_y: f64,
    pub seed: u64,
    pub load_delay_millis: u64,
    pub report_every: u32,
    pub settle_timeout_millis: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frames: 240,
            frame_millis: 16,
            pan_x: -12.0,
            pan_y: -4.0,
            seed: 0x5eed,
            load_delay_millis: 0,
            report_every: 60,
            settle_timeout_millis: 10_000,
        }
    }
}

impl Settings {
    /// Reads settings from a TOML file, or returns the defaults when no path
    /// is given. Missing keys keep their default values.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("read settings file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parse settings file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let settings: Self = toml::from_str(text)?;
        settings
            .pool
            .validate()
            .context("invalid [pool] settings")?;
        Ok(settings)
    }
}
