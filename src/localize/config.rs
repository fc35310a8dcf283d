//! Tunable parameters of the localization algorithms.
//!
//! Every section has defaults, so a YAML file only needs the keys it changes:
//!
//! ```yaml
//! topomono:
//!   tolerance_m: 0.05
//! firetri:
//!   snap_to_dem: false
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::robust::ConsensusConfig;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse config: {0}")]
    YamlError(String),
    #[error("Invalid config value: {0}")]
    InvalidValue(String),
    #[error("IO Error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IOError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::YamlError(err.to_string())
    }
}

/// Ray marching parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopoMonoConfig {
    /// Coarse step as a multiple of the DEM cell size.
    pub step_scale: f64,
    /// Lower bound on the coarse step in metres.
    pub min_step_m: f64,
    /// Search range along the ray in metres.
    pub max_distance_m: f64,
    /// Hard cap on coarse steps.
    pub max_steps: usize,
    /// Vertical residual at which refinement stops, in metres.
    pub tolerance_m: f64,
    pub max_refine_iterations: usize,
    /// Largest vertical residual accepted once refinement has stopped. A
    /// crossing that cannot be refined below it lies in missing terrain.
    pub max_residual_m: f64,
}

impl Default for TopoMonoConfig {
    fn default() -> Self {
        TopoMonoConfig {
            step_scale: 1.0,
            min_step_m: 1.0,
            max_distance_m: 50_000.0,
            max_steps: 200_000,
            tolerance_m: 0.1,
            max_refine_iterations: 60,
            max_residual_m: 1.0,
        }
    }
}

/// Depth fusion parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DmtConfig {
    /// Largest separation at which the terrain and depth candidates are
    /// considered to agree, in metres.
    pub fusion_tolerance_m: f64,
    /// Weight of the terrain candidate when both agree; `1.0` keeps the
    /// terrain intersection, `0.0` keeps the depth point.
    pub terrain_weight: f64,
    /// Half size of the pixel window sampled in RANSAC mode.
    pub window_radius: u32,
    pub consensus: ConsensusConfig,
}

impl Default for DmtConfig {
    fn default() -> Self {
        DmtConfig {
            fusion_tolerance_m: 50.0,
            terrain_weight: 1.0,
            window_radius: 2,
            consensus: ConsensusConfig::default(),
        }
    }
}

/// Multi-view triangulation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FireTriConfig {
    /// Rays closer to parallel than this angle cannot be triangulated.
    pub min_ray_angle_deg: f64,
    /// Replace the triangulated height with the DEM elevation when a DEM is
    /// available.
    pub snap_to_dem: bool,
    /// Consensus over rays; `inlier_threshold_m` is the largest accepted
    /// perpendicular distance between a ray and the estimate.
    pub consensus: ConsensusConfig,
}

impl Default for FireTriConfig {
    fn default() -> Self {
        FireTriConfig {
            min_ray_angle_deg: 0.1,
            snap_to_dem: true,
            consensus: ConsensusConfig {
                inlier_threshold_m: 25.0,
                min_inliers: 2,
                ..ConsensusConfig::default()
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalizerConfig {
    pub topomono: TopoMonoConfig,
    pub dmt: DmtConfig,
    pub firetri: FireTriConfig,
}

impl LocalizerConfig {
    pub fn load_from_yaml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: LocalizerConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::InvalidValue(msg.to_string()));
        let t = &self.topomono;
        if !(t.step_scale > 0.0 && t.min_step_m > 0.0 && t.max_distance_m > 0.0) {
            return invalid("topomono step and range must be positive");
        }
        if !(t.tolerance_m > 0.0) || t.max_steps == 0 {
            return invalid("topomono tolerance and max_steps must be positive");
        }
        if !(t.max_residual_m >= t.tolerance_m) {
            return invalid("topomono.max_residual_m must not be below tolerance_m");
        }
        if !(0.0..=1.0).contains(&self.dmt.terrain_weight) {
            return invalid("dmt.terrain_weight must lie in [0, 1]");
        }
        if !(self.dmt.fusion_tolerance_m >= 0.0) {
            return invalid("dmt.fusion_tolerance_m must be non-negative");
        }
        if !(self.firetri.min_ray_angle_deg > 0.0 && self.firetri.min_ray_angle_deg < 90.0) {
            return invalid("firetri.min_ray_angle_deg must lie in (0, 90)");
        }
        for consensus in [&self.dmt.consensus, &self.firetri.consensus] {
            if !(consensus.inlier_threshold_m > 0.0) || consensus.max_hypotheses == 0 {
                return invalid("consensus threshold and max_hypotheses must be positive");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(LocalizerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = LocalizerConfig::from_yaml_str(
            "topomono:\n  tolerance_m: 0.05\nfiretri:\n  snap_to_dem: false\n  consensus:\n    inlier_threshold_m: 10.0\n",
        )
        .unwrap();
        assert_eq!(config.topomono.tolerance_m, 0.05);
        assert_eq!(config.topomono.max_steps, TopoMonoConfig::default().max_steps);
        assert!(!config.firetri.snap_to_dem);
        assert_eq!(config.firetri.consensus.inlier_threshold_m, 10.0);
        assert_eq!(config.dmt, DmtConfig::default());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            LocalizerConfig::from_yaml_str("dmt:\n  terrain_weight: 1.5\n"),
            Err(ConfigError::InvalidValue(_))
        ));
        assert!(matches!(
            LocalizerConfig::from_yaml_str("topomono:\n  tolerance_m: 0.5\n  max_residual_m: 0.2\n"),
            Err(ConfigError::InvalidValue(_))
        ));
        assert!(matches!(
            LocalizerConfig::from_yaml_str("topomono: [1, 2]\n"),
            Err(ConfigError::YamlError(_))
        ));
    }
}
