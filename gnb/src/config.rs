//! Baseband Configuration File
//!
//! The file carries the pipeline parameters under `pipeline`, the loopback
//! fronthaul under `transport` and the initial link settings under `link`.
//! YAML and TOML are both accepted, chosen by file extension.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use common::{is_supported_mod_order, PipelineConfig};
use interfaces::transport::TransportOptions;
use serde::{Deserialize, Serialize};

/// Top-level configuration file
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BasebandConfig {
    /// Scheduler, worker and dimension parameters
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Loopback fronthaul
    #[serde(default)]
    pub transport: TransportConfig,
    /// Initial link settings
    #[serde(default)]
    pub link: LinkConfig,
}

/// Loopback fronthaul configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Microseconds between frame starts, 0 for as fast as possible
    #[serde(default)]
    pub frame_interval_us: u64,
    /// Shuffle antenna order within each symbol
    #[serde(default = "default_shuffle")]
    pub shuffle: bool,
    /// Shuffle seed
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Transmit requests served per poll
    #[serde(default = "default_tx_bulk_size")]
    pub tx_bulk_size: usize,
}

fn default_shuffle() -> bool {
    true
}

fn default_seed() -> u64 {
    0x5eed
}

fn default_tx_bulk_size() -> usize {
    8
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            frame_interval_us: 0,
            shuffle: default_shuffle(),
            seed: default_seed(),
            tx_bulk_size: default_tx_bulk_size(),
        }
    }
}

impl TransportConfig {
    pub fn to_options(&self) -> TransportOptions {
        TransportOptions {
            frame_interval: Duration::from_micros(self.frame_interval_us),
            shuffle: self.shuffle,
            seed: self.seed,
            tx_bulk_size: self.tx_bulk_size,
        }
    }
}

/// Link configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LinkConfig {
    /// Bits per modulation symbol (2 = QPSK, 4 = 16QAM, 6 = 64QAM, 8 = 256QAM)
    #[serde(default = "default_mod_order_bits")]
    pub mod_order_bits: u8,
}

fn default_mod_order_bits() -> u8 {
    4
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            mod_order_bits: default_mod_order_bits(),
        }
    }
}

impl BasebandConfig {
    /// Load from a `.yml`/`.yaml` or `.toml` file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("yml") | Some("yaml") => Self::from_yaml_str(&contents)?,
            Some("toml") => Self::from_toml_str(&contents)?,
            _ => bail!("Unsupported configuration format: {}", path.display()),
        };
        Ok(config)
    }

    pub fn from_yaml_str(contents: &str) -> anyhow::Result<Self> {
        let config: BasebandConfig = serde_yaml::from_str(contents)?;
        config.check()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let config: BasebandConfig = toml::from_str(contents)?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> anyhow::Result<()> {
        self.pipeline.validate()?;
        if !is_supported_mod_order(self.link.mod_order_bits) {
            bail!("Invalid modulation order: {} bits", self.link.mod_order_bits);
        }
        if self.transport.tx_bulk_size == 0 {
            bail!("transport.tx_bulk_size must be nonzero");
        }
        Ok(())
    }
}
