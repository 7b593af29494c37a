//! JSON configuration for segmentation runs.
//!
//! Every field is optional in the file; missing ones fall back to the
//! defaults below. `into_params` turns a config into validated
//! `SegmentationParams`.

use crate::error::SegmentationError;
use crate::pixel_buffer::ColorSpace;
use crate::pipeline::SegmentationParams;
use crate::pixel_graph::Connectivity;
use crate::threshold::ThresholdPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_VERSION: u8 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported config version {0}")]
    Version(u8),
    #[error(transparent)]
    Invalid(#[from] SegmentationError),
}

/// Threshold as written in a config file.
///
/// Accepts a number, one of `"auto"`, `"median"`, `"infinity"`, a percentile
/// written as `"p90"`, or a tagged policy object such as
/// `{"mode": "percentile", "p": 90}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ThresholdSetting {
    Value(f64),
    Named(String),
    Policy(ThresholdPolicy),
}

#[derive(Serialize)]
#[serde(untagged)]
enum ThresholdSettingProxy<'a> {
    Value(f64),
    Named(&'a str),
    Policy(&'a ThresholdPolicy),
}

/// JSON has no infinity, so an unbounded fixed threshold is written by name.
impl Serialize for ThresholdSetting {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let unbounded = match self {
            ThresholdSetting::Value(value) => *value == f64::INFINITY,
            ThresholdSetting::Policy(ThresholdPolicy::Fixed { value }) => *value == f64::INFINITY,
            _ => false,
        };
        let proxy = match self {
            _ if unbounded => ThresholdSettingProxy::Named("infinity"),
            ThresholdSetting::Value(value) => ThresholdSettingProxy::Value(*value),
            ThresholdSetting::Named(name) => ThresholdSettingProxy::Named(name),
            ThresholdSetting::Policy(policy) => ThresholdSettingProxy::Policy(policy),
        };
        proxy.serialize(serializer)
    }
}

impl Default for ThresholdSetting {
    fn default() -> Self {
        ThresholdSetting::Named("auto".to_string())
    }
}

impl ThresholdSetting {
    pub fn to_policy(&self) -> Result<ThresholdPolicy, SegmentationError> {
        let policy = match self {
            ThresholdSetting::Value(value) => ThresholdPolicy::fixed(*value),
            ThresholdSetting::Policy(policy) => *policy,
            ThresholdSetting::Named(name) => match name.to_ascii_lowercase().as_str() {
                "auto" => ThresholdPolicy::default(),
                "median" => ThresholdPolicy::Median,
                "inf" | "infinity" => ThresholdPolicy::fixed(f64::INFINITY),
                other => match other.strip_prefix('p').and_then(|p| p.parse::<f64>().ok()) {
                    Some(p) => ThresholdPolicy::Percentile { p },
                    None => {
                        return Err(SegmentationError::parameter(
                            "threshold",
                            format!("unknown threshold mode `{}`", other),
                        ))
                    }
                },
            },
        };
        policy.validate()?;
        Ok(policy)
    }
}

impl From<f64> for ThresholdSetting {
    fn from(value: f64) -> Self {
        ThresholdSetting::Value(value)
    }
}

impl std::str::FromStr for ThresholdSetting {
    type Err = std::convert::Infallible;

    /// Numbers become fixed thresholds; anything else is kept as a name and
    /// checked by `to_policy`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Ok(match raw.trim().parse::<f64>() {
            Ok(value) if value.is_finite() => ThresholdSetting::Value(value),
            _ => ThresholdSetting::Named(raw.trim().to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SegmentationConfig {
    pub version: u8,
    pub connectivity: u8,
    pub alpha: f64,
    pub beta: f64,
    pub threshold: ThresholdSetting,
    /// Signed so that negative values in a file are reported, not wrapped.
    pub min_region_size: i64,
    pub max_merges: Option<usize>,
    pub color_space: ColorSpace,
    /// Gaussian pre-smoothing sigma in pixels; `0` disables smoothing.
    pub smoothing_sigma: f32,
    pub memory_limit_bytes: Option<usize>,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            connectivity: 4,
            alpha: 1.0,
            beta: 0.1,
            threshold: ThresholdSetting::default(),
            min_region_size: 10,
            max_merges: None,
            color_space: ColorSpace::Rgb,
            smoothing_sigma: 0.0,
            memory_limit_bytes: None,
        }
    }
}

impl SegmentationConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&raw).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        log::info!("Loaded segmentation config from {}", path.display());
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        if config.version != CONFIG_VERSION {
            return Err(ConfigError::Version(config.version));
        }
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn into_params(self) -> Result<SegmentationParams, SegmentationError> {
        if self.min_region_size < 0 {
            return Err(SegmentationError::parameter(
                "min_region_size",
                format!("must be >= 0, got {}", self.min_region_size),
            ));
        }
        if !self.smoothing_sigma.is_finite() || self.smoothing_sigma < 0.0 {
            return Err(SegmentationError::parameter(
                "smoothing_sigma",
                format!("must be a finite value >= 0, got {}", self.smoothing_sigma),
            ));
        }

        let params = SegmentationParams {
            connectivity: Connectivity::try_from(self.connectivity)?,
            alpha: self.alpha,
            beta: self.beta,
            threshold: self.threshold.to_policy()?,
            min_region_size: self.min_region_size as usize,
            max_merges: self.max_merges,
            memory_limit_bytes: self.memory_limit_bytes,
        };
        params.validate()?;
        Ok(params)
    }
}
