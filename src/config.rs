//! Configuration management for hartsim.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (`HARTSIM_IC`, `HARTSIM_DC`, `HARTSIM_L2`,
//!    `HARTSIM_VLEN`, `HARTSIM_LANES`)
//! 2. Project-local config file (`./hartsim.toml`)
//! 3. User config file (`~/.config/hartsim/config.toml`)
//! 4. Built-in defaults
//!
//! # Config File Format
//!
//! ```toml
//! # hartsim.toml
//! harts = 2
//! icache = "64:4:64"
//! dcache = "64:8:64"
//! l2 = "1024:16:64"
//!
//! vlen = 512
//! elen = 64
//! lanes_per_vpu = 8
//! lane_policy = "pipelined"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheGeometry, FillMode, HierarchyConfig, WritePolicy};
use crate::error::{ConfigError, ConfigResult};
use crate::timing::{LaneModel, LanePolicy, LatencyTable};
use crate::vector::VectorGeometry;

/// Global cached configuration.
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Default L1 instruction cache geometry.
pub const DEFAULT_ICACHE: &str = "64:4:64";

/// Default L1 data cache geometry.
pub const DEFAULT_DCACHE: &str = "64:8:64";

/// Default vector register width in bits.
pub const DEFAULT_VLEN: usize = 128;

/// Default maximum element width in bits.
pub const DEFAULT_ELEN: usize = 64;

/// hartsim configuration.
///
/// Every field is optional so file layers can be merged; the accessors
/// supply the defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Number of harts.
    pub harts: Option<usize>,

    /// L1 instruction cache, `sets:ways:lineBytes`.
    pub icache: Option<String>,

    /// L1 data cache, `sets:ways:lineBytes`.
    pub dcache: Option<String>,

    /// Shared L2, `sets:ways:lineBytes`. Absent means no L2.
    pub l2: Option<String>,

    /// L1 data caches use write-back (true) or write-through (false).
    pub l1_writeback: Option<bool>,

    /// When missing lines are installed.
    pub fill_mode: Option<FillMode>,

    /// Vector memory operations skip the L1.
    pub vector_bypass_l1: Option<bool>,

    /// Vector memory operations skip the L2.
    pub vector_bypass_l2: Option<bool>,

    /// Vector register width in bits.
    pub vlen: Option<usize>,

    /// Maximum element width in bits.
    pub elen: Option<usize>,

    /// Striping distance in bits (defaults to VLEN).
    pub slen: Option<usize>,

    /// Lanes per vector unit.
    pub lanes_per_vpu: Option<usize>,

    /// How vector latency scales with VL.
    pub lane_policy: Option<LanePolicy>,

    /// Per-mnemonic latency overrides.
    pub latencies: Option<BTreeMap<String, u64>>,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Project-local `hartsim.toml`
    /// 3. User config `~/.config/hartsim/config.toml`
    /// 4. Defaults
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(user_config) = Self::user_config_path().and_then(|p| Self::load_optional(&p)) {
            config.merge(user_config);
        }

        if let Some(local_config) = Self::load_optional(Path::new("hartsim.toml")) {
            config.merge(local_config);
        }

        config.apply_env_overrides();

        config
    }

    /// Get the cached global configuration.
    ///
    /// Loads configuration on first call and caches it.
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(|| {
            let config = Self::load();
            log::debug!("Loaded configuration: {:?}", config);
            config
        })
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let config = toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load a config layer if the file exists. Errors are logged and skipped.
    fn load_optional(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        match Self::load_from_file(path) {
            Ok(config) => Some(config),
            Err(e) => {
                log::warn!("{:#}", e);
                None
            }
        }
    }

    /// Merge another config into this one.
    /// Only overrides fields that are Some in the other config.
    fn merge(&mut self, other: Self) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(
                    if other.$field.is_some() {
                        self.$field = other.$field;
                    }
                )*
            };
        }
        take!(
            harts,
            icache,
            dcache,
            l2,
            l1_writeback,
            fill_mode,
            vector_bypass_l1,
            vector_bypass_l2,
            vlen,
            elen,
            slen,
            lanes_per_vpu,
            lane_policy,
            latencies
        );
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(spec) = lookup("HARTSIM_IC") {
            log::info!("Using HARTSIM_IC from environment: {}", spec);
            self.icache = Some(spec);
        }
        if let Some(spec) = lookup("HARTSIM_DC") {
            log::info!("Using HARTSIM_DC from environment: {}", spec);
            self.dcache = Some(spec);
        }
        if let Some(spec) = lookup("HARTSIM_L2") {
            log::info!("Using HARTSIM_L2 from environment: {}", spec);
            self.l2 = Some(spec);
        }
        if let Some(value) = lookup("HARTSIM_VLEN") {
            match value.parse() {
                Ok(vlen) => {
                    log::info!("Using HARTSIM_VLEN from environment: {}", vlen);
                    self.vlen = Some(vlen);
                }
                Err(e) => log::warn!("Ignoring HARTSIM_VLEN={}: {}", value, e),
            }
        }
        if let Some(value) = lookup("HARTSIM_LANES") {
            match value.parse() {
                Ok(lanes) => {
                    log::info!("Using HARTSIM_LANES from environment: {}", lanes);
                    self.lanes_per_vpu = Some(lanes);
                }
                Err(e) => log::warn!("Ignoring HARTSIM_LANES={}: {}", value, e),
            }
        }
    }

    /// Number of harts, default 1.
    pub fn num_harts(&self) -> usize {
        self.harts.unwrap_or(1)
    }

    /// Cache hierarchy described by this config.
    pub fn hierarchy(&self) -> ConfigResult<HierarchyConfig> {
        let icache = CacheGeometry::parse(self.icache.as_deref().unwrap_or(DEFAULT_ICACHE))?;
        let dcache = CacheGeometry::parse(self.dcache.as_deref().unwrap_or(DEFAULT_DCACHE))?;
        let l2 = self.l2.as_deref().map(CacheGeometry::parse).transpose()?;
        let l1_write_policy = if self.l1_writeback.unwrap_or(true) {
            WritePolicy::WriteBack
        } else {
            WritePolicy::WriteThrough
        };
        Ok(HierarchyConfig {
            icache,
            dcache,
            l2,
            l1_write_policy,
            fill_mode: self.fill_mode.unwrap_or_default(),
            vector_bypass_l1: self.vector_bypass_l1.unwrap_or(true),
            vector_bypass_l2: self.vector_bypass_l2.unwrap_or(false),
        })
    }

    /// Vector unit geometry described by this config.
    pub fn vector_geometry(&self) -> ConfigResult<VectorGeometry> {
        VectorGeometry::new(
            self.vlen.unwrap_or(DEFAULT_VLEN),
            self.elen.unwrap_or(DEFAULT_ELEN),
            self.slen,
        )
    }

    /// Lane model described by this config.
    pub fn lane_model(&self) -> ConfigResult<LaneModel> {
        let defaults = LaneModel::default();
        let lanes_per_vpu = self.lanes_per_vpu.unwrap_or(defaults.lanes_per_vpu);
        if lanes_per_vpu == 0 {
            return Err(ConfigError::NoLanes);
        }
        Ok(LaneModel {
            lanes_per_vpu,
            policy: self.lane_policy.unwrap_or(defaults.policy),
        })
    }

    /// Latency table described by this config.
    pub fn latency_table(&self) -> ConfigResult<LatencyTable> {
        let lanes = self.lane_model()?;
        Ok(match &self.latencies {
            Some(pairs) => LatencyTable::from_pairs(lanes, pairs.iter().map(|(k, v)| (k.clone(), *v))),
            None => LatencyTable::new(lanes),
        })
    }

    /// Get the path to the user config file (for display/creation).
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("hartsim").join("config.toml"))
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# hartsim configuration
# Place this file at ~/.config/hartsim/config.toml or ./hartsim.toml

# Number of harts
harts = 1

# Caches as sets:ways:lineBytes
icache = "64:4:64"
dcache = "64:8:64"
# l2 = "1024:16:64"

# L1 data write policy and fill mode ("immediate" or "deferred")
l1_writeback = true
fill_mode = "deferred"

# Vector memory operations skip the L1 / L2
vector_bypass_l1 = true
vector_bypass_l2 = false

# Vector unit
vlen = 128
elen = 64
# slen = 128
lanes_per_vpu = 8
lane_policy = "full_width"

# Per-mnemonic latency overrides
# [latencies]
# "vfmacc.vv" = 6
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.num_harts(), 1);
        let hierarchy = config.hierarchy().unwrap();
        assert_eq!(hierarchy.icache.to_string(), DEFAULT_ICACHE);
        assert_eq!(hierarchy.dcache.to_string(), DEFAULT_DCACHE);
        assert!(hierarchy.l2.is_none());
        assert_eq!(hierarchy.l1_write_policy, WritePolicy::WriteBack);
        assert_eq!(hierarchy.fill_mode, FillMode::Deferred);
        assert!(hierarchy.vector_bypass_l1);
        assert!(!hierarchy.vector_bypass_l2);

        let geometry = config.vector_geometry().unwrap();
        assert_eq!(geometry.vlen(), 128);
        assert_eq!(geometry.elen(), 64);
        assert_eq!(config.lane_model().unwrap(), LaneModel::default());
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config {
            harts: Some(4),
            icache: Some("32:2:32".to_string()),
            vlen: Some(256),
            ..Default::default()
        };

        let overlay = Config {
            icache: Some("128:4:64".to_string()),
            l2: Some("512:8:64".to_string()),
            ..Default::default()
        };

        base.merge(overlay);

        // harts unchanged (overlay was None)
        assert_eq!(base.harts, Some(4));
        // icache overridden by overlay
        assert_eq!(base.icache.as_deref(), Some("128:4:64"));
        // l2 set from overlay
        assert_eq!(base.l2.as_deref(), Some("512:8:64"));
        assert_eq!(base.vlen, Some(256));
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config.apply_overrides(|key| match key {
            "HARTSIM_DC" => Some("16:2:32".to_string()),
            "HARTSIM_VLEN" => Some("512".to_string()),
            "HARTSIM_LANES" => Some("many".to_string()),
            _ => None,
        });
        assert_eq!(config.dcache.as_deref(), Some("16:2:32"));
        assert_eq!(config.vlen, Some(512));
        // Unparseable values are ignored
        assert_eq!(config.lanes_per_vpu, None);
    }

    #[test]
    fn test_bad_geometry_reported() {
        let config = Config {
            l2: Some("3:4:64".to_string()),
            ..Default::default()
        };
        assert_eq!(
            config.hierarchy(),
            Err(ConfigError::NotPowerOfTwo { field: "sets", value: 3 })
        );
    }

    #[test]
    fn test_zero_lanes_rejected() {
        let config = Config {
            lanes_per_vpu: Some(0),
            ..Default::default()
        };
        assert_eq!(config.lane_model(), Err(ConfigError::NoLanes));
        assert!(config.latency_table().is_err());
    }

    #[test]
    fn test_latency_overrides() {
        let mut latencies = BTreeMap::new();
        latencies.insert("vfmacc.vv".to_string(), 6);
        let config = Config {
            latencies: Some(latencies),
            lane_policy: Some(LanePolicy::Pipelined),
            ..Default::default()
        };
        let table = config.latency_table().unwrap();
        assert_eq!(table.mnemonic("vfmacc.vv"), Some(6));
        assert_eq!(table.lanes().policy, LanePolicy::Pipelined);
    }

    #[test]
    fn test_load_from_missing_file() {
        let err = Config::load_from_file(Path::new("/nonexistent/hartsim.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }

    #[test]
    fn test_sample_config_parses() {
        let sample = Config::sample_config();
        let config: Config = toml::from_str(&sample).expect("Sample config should parse");
        assert_eq!(config.fill_mode, Some(FillMode::Deferred));
        assert_eq!(config.lane_policy, Some(LanePolicy::FullWidth));
        assert!(config.hierarchy().is_ok());
    }
}
