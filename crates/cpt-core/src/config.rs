use std::fs;
use std::path::{Path, PathBuf};

use cpt_parser::{EdgePolicy, NegativeValuePolicy, PorePressurePosition};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid option {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Top-level configuration file: a `[preprocess]` table and a
/// `[validation]` table, both optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub preprocess: PreprocessOptions,
    pub validation: ValidationOptions,
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.check()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn check(&self) -> Result<(), ConfigError> {
        self.preprocess.check()?;
        self.validation.check()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreprocessOptions {
    pub negative_values: NegativeValuePolicy,
    pub interpolation_edge: EdgePolicy,
    /// Derive vertical depth from the inclination (or a delivered corrected
    /// depth) instead of using the raw rod length.
    pub inclination_correction: bool,
    pub pre_drill: PreDrillOptions,
    pub pore_pressure: PorePressureOptions,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            negative_values: NegativeValuePolicy::Clip,
            interpolation_edge: EdgePolicy::Nearest,
            inclination_correction: true,
            pre_drill: PreDrillOptions::default(),
            pore_pressure: PorePressureOptions::default(),
        }
    }
}

impl PreprocessOptions {
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.pre_drill.fill == PreDrillFill::Average && self.pre_drill.average_samples == 0 {
            return Err(ConfigError::Invalid {
                key: "pre_drill.average_samples",
                message: "must be at least 1 when fill = \"average\"".to_string(),
            });
        }
        match self.pore_pressure.relation {
            PorePressureRelation::Hydrostatic {
                unit_weight_water,
                water_level,
            } => {
                if !(unit_weight_water.is_finite() && unit_weight_water > 0.0) {
                    return Err(ConfigError::Invalid {
                        key: "pore_pressure.relation.unit_weight_water",
                        message: format!("{unit_weight_water} is not a positive unit weight"),
                    });
                }
                if water_level.is_some_and(|level| !level.is_finite()) {
                    return Err(ConfigError::Invalid {
                        key: "pore_pressure.relation.water_level",
                        message: "must be finite".to_string(),
                    });
                }
            }
            PorePressureRelation::Empirical { coefficient, .. } if !coefficient.is_finite() => {
                return Err(ConfigError::Invalid {
                    key: "pore_pressure.relation.coefficient",
                    message: "must be finite".to_string(),
                });
            }
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreDrillFill {
    /// Synthetic readings are zero.
    #[default]
    Zero,
    /// Synthetic readings take the mean of the first measured samples; pore
    /// pressure ramps from zero to the first measured value.
    Average,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreDrillOptions {
    pub fill: PreDrillFill,
    pub average_samples: usize,
}

impl Default for PreDrillOptions {
    fn default() -> Self {
        Self {
            fill: PreDrillFill::Zero,
            average_samples: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PorePressureOptions {
    /// Channels downstream interpretation expects; missing ones are derived
    /// with `relation`.
    pub required: Vec<PorePressurePosition>,
    pub relation: PorePressureRelation,
}

impl Default for PorePressureOptions {
    fn default() -> Self {
        Self {
            required: vec![PorePressurePosition::U2],
            relation: PorePressureRelation::Disabled,
        }
    }
}

pub const DEFAULT_UNIT_WEIGHT_WATER: f64 = 9.81;

fn default_unit_weight_water() -> f64 {
    DEFAULT_UNIT_WEIGHT_WATER
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PorePressureRelation {
    /// Missing channels stay unset.
    #[default]
    #[serde(rename = "none")]
    Disabled,
    /// `u = unit_weight_water * max(0, water_level - elevation)`. The water
    /// level falls back to the sounding metadata when not configured.
    Hydrostatic {
        #[serde(default = "default_unit_weight_water")]
        unit_weight_water: f64,
        #[serde(default)]
        water_level: Option<f64>,
    },
    /// `u = coefficient * source`, with `source` a measured channel. Without
    /// an explicit source the first measured of u2, u1, u3 is used.
    Empirical {
        coefficient: f64,
        #[serde(default)]
        source: Option<PorePressurePosition>,
    },
}

/// Quality thresholds. Falling short only produces warnings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationOptions {
    /// Minimum penetration length (m).
    pub minimum_length: f64,
    pub minimum_samples: usize,
    /// Largest tolerated share of non-positive cone resistance or friction.
    pub max_non_positive_ratio: f64,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            minimum_length: 5.0,
            minimum_samples: 50,
            max_non_positive_ratio: 0.1,
        }
    }
}

impl ValidationOptions {
    pub fn check(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.max_non_positive_ratio) {
            return Err(ConfigError::Invalid {
                key: "validation.max_non_positive_ratio",
                message: format!("{} is not within 0..=1", self.max_non_positive_ratio),
            });
        }
        if !self.minimum_length.is_finite() {
            return Err(ConfigError::Invalid {
                key: "validation.minimum_length",
                message: "must be finite".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::from_toml_str("").expect("empty config");
        assert_eq!(config, Config::default());
        assert_eq!(config.preprocess.negative_values, NegativeValuePolicy::Clip);
        assert!(config.preprocess.inclination_correction);
        assert_eq!(
            config.preprocess.pore_pressure.required,
            vec![PorePressurePosition::U2]
        );
        assert_eq!(config.validation.minimum_samples, 50);
    }

    #[test]
    fn parses_hydrostatic_relation_with_default_unit_weight() {
        let config = Config::from_toml_str(
            r#"
            [preprocess]
            negative_values = "interpolate"
            interpolation_edge = "fail"

            [preprocess.pore_pressure]
            required = ["u1", "u2"]

            [preprocess.pore_pressure.relation]
            kind = "hydrostatic"
            water_level = -1.5
            "#,
        )
        .expect("valid config");

        let options = &config.preprocess;
        assert_eq!(options.negative_values, NegativeValuePolicy::Interpolate);
        assert_eq!(options.interpolation_edge, EdgePolicy::Fail);
        assert_eq!(
            options.pore_pressure.relation,
            PorePressureRelation::Hydrostatic {
                unit_weight_water: DEFAULT_UNIT_WEIGHT_WATER,
                water_level: Some(-1.5),
            }
        );
    }

    #[test]
    fn parses_empirical_relation() {
        let config = Config::from_toml_str(
            r#"
            [preprocess.pore_pressure.relation]
            kind = "empirical"
            coefficient = 0.8
            source = "u2"
            "#,
        )
        .expect("valid config");
        assert_eq!(
            config.preprocess.pore_pressure.relation,
            PorePressureRelation::Empirical {
                coefficient: 0.8,
                source: Some(PorePressurePosition::U2),
            }
        );
    }

    #[test]
    fn rejects_unknown_policy() {
        let err = Config::from_toml_str("[preprocess]\nnegative_values = \"drop\"\n")
            .expect_err("unknown policy");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_zero_average_samples() {
        let err = Config::from_toml_str(
            "[preprocess.pre_drill]\nfill = \"average\"\naverage_samples = 0\n",
        )
        .expect_err("zero samples");
        match err {
            ConfigError::Invalid { key, .. } => assert_eq!(key, "pre_drill.average_samples"),
            other => panic!("expected Invalid, got {other:?}"),
        }
    }
}
