use std::fmt;
use std::ops::Deref;

use cpt_parser::{Channel, CptRecord, RawChannels};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::config::ValidationOptions;

/// Tolerance for comparing the pre-drill depth against the first sample.
const DEPTH_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("sounding {id} has no samples")]
    Empty { id: String },

    #[error("sounding {id}: {channel} has {found} samples, expected {expected}")]
    LengthMismatch {
        id: String,
        channel: Channel,
        expected: usize,
        found: usize,
    },

    #[error("sounding {id}: {channel} is not finite at index {index}")]
    NonFinite {
        id: String,
        channel: Channel,
        index: usize,
    },

    #[error(
        "sounding {id}: penetration length decreases at index {index} ({previous} -> {value})"
    )]
    NonMonotonic {
        id: String,
        index: usize,
        previous: f64,
        value: f64,
    },

    #[error("sounding {id} is missing mandatory channel {channel}")]
    MissingChannel { id: String, channel: Channel },

    #[error("sounding {id}: pre-drill depth {depth} m is invalid: {reason}")]
    PreDrill {
        id: String,
        depth: f64,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    Negative,
    NonFinite,
    ShortSounding,
    FewSamples,
    NonPositiveShare,
}

/// Structurally sound but physically doubtful data. Repaired (or merely
/// reported) downstream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlausibilityWarning {
    pub channel: Channel,
    pub kind: WarningKind,
    pub first_index: Option<usize>,
    pub count: usize,
}

impl fmt::Display for PlausibilityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            WarningKind::Negative => write!(f, "{} has {} negative samples", self.channel, self.count),
            WarningKind::NonFinite => {
                write!(f, "{} has {} non-finite samples", self.channel, self.count)
            }
            WarningKind::ShortSounding => write!(f, "sounding is shorter than the minimum length"),
            WarningKind::FewSamples => write!(f, "sounding has only {} samples", self.count),
            WarningKind::NonPositiveShare => write!(
                f,
                "{} has {} non-positive samples, above the tolerated share",
                self.channel, self.count
            ),
        }?;
        if let Some(index) = self.first_index {
            write!(f, " (first at index {index})")?;
        }
        Ok(())
    }
}

/// A record that passed the structural checks. Only `validate` builds one,
/// so holding it proves the mandatory channels exist and line up.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRecord {
    record: CptRecord,
    warnings: Vec<PlausibilityWarning>,
}

impl ValidatedRecord {
    pub fn record(&self) -> &CptRecord {
        &self.record
    }

    pub fn warnings(&self) -> &[PlausibilityWarning] {
        &self.warnings
    }

    pub fn into_inner(self) -> CptRecord {
        self.record
    }
}

impl Deref for ValidatedRecord {
    type Target = CptRecord;

    fn deref(&self) -> &Self::Target {
        &self.record
    }
}

pub fn validate(record: CptRecord) -> Result<ValidatedRecord, ValidationError> {
    validate_with(record, &ValidationOptions::default())
}

/// Structural checks fail fast in a fixed order: sample count, channel
/// lengths, penetration length finite and non-decreasing, mandatory
/// channels, pre-drill depth. Plausibility problems become warnings.
pub fn validate_with(
    record: CptRecord,
    options: &ValidationOptions,
) -> Result<ValidatedRecord, ValidationError> {
    let id = record.id.clone();
    let raw = &record.raw;
    let expected = raw.len();

    if expected == 0 {
        return Err(ValidationError::Empty { id });
    }

    for (channel, values) in raw.present_channels() {
        if values.len() != expected {
            return Err(ValidationError::LengthMismatch {
                id,
                channel,
                expected,
                found: values.len(),
            });
        }
    }

    if let Some(index) = raw.penetration_length.iter().position(|v| !v.is_finite()) {
        return Err(ValidationError::NonFinite {
            id,
            channel: Channel::PenetrationLength,
            index,
        });
    }

    if let Some(index) = (1..expected)
        .find(|&idx| raw.penetration_length[idx] < raw.penetration_length[idx - 1])
    {
        return Err(ValidationError::NonMonotonic {
            id,
            index,
            previous: raw.penetration_length[index - 1],
            value: raw.penetration_length[index],
        });
    }

    check_mandatory(&id, raw)?;
    check_pre_drill(&record)?;

    let warnings = plausibility(raw, options);
    for warning in &warnings {
        warn!(
            sounding = %id,
            channel = %warning.channel,
            kind = ?warning.kind,
            count = warning.count,
            first_index = ?warning.first_index,
            "plausibility warning"
        );
    }

    Ok(ValidatedRecord { record, warnings })
}

fn check_mandatory(id: &str, raw: &RawChannels) -> Result<(), ValidationError> {
    let missing = |channel| ValidationError::MissingChannel {
        id: id.to_string(),
        channel,
    };
    if raw.cone_resistance.is_none() {
        return Err(missing(Channel::ConeResistance));
    }
    if raw.sleeve_friction.is_none() && raw.friction_ratio.is_none() {
        return Err(missing(Channel::SleeveFriction));
    }
    if raw.measured_pore_pressures().is_empty() {
        return Err(missing(Channel::PorePressureU2));
    }
    Ok(())
}

fn check_pre_drill(record: &CptRecord) -> Result<(), ValidationError> {
    let first = record.raw.penetration_length[0];
    let invalid = |depth: f64, reason: String| ValidationError::PreDrill {
        id: record.id.clone(),
        depth,
        reason,
    };

    let depth = record.metadata.pre_drill_depth;
    if !depth.is_finite() || depth < 0.0 {
        return Err(invalid(depth, "must be a non-negative length".to_string()));
    }
    if depth > first + DEPTH_TOLERANCE {
        return Err(invalid(
            depth,
            format!("exceeds the first penetration length {first} m"),
        ));
    }

    if let Some(section) = &record.metadata.pre_drill_section {
        if !section.depth.is_finite() || section.depth < 0.0 {
            return Err(invalid(
                section.depth,
                "pre-drill section depth must be a non-negative length".to_string(),
            ));
        }
        if !section.main_series_start.is_finite() {
            return Err(invalid(
                section.depth,
                "pre-drill section has no finite main-series start".to_string(),
            ));
        }
        if section.depth > first + DEPTH_TOLERANCE {
            return Err(invalid(
                section.depth,
                format!("pre-drill section exceeds the first penetration length {first} m"),
            ));
        }
    }
    Ok(())
}

fn plausibility(raw: &RawChannels, options: &ValidationOptions) -> Vec<PlausibilityWarning> {
    let mut warnings = Vec::new();

    for (channel, values) in raw.present_channels() {
        if channel == Channel::PenetrationLength {
            continue;
        }
        if let Some(warning) = count_matching(channel, values, WarningKind::NonFinite, |v| {
            !v.is_finite()
        }) {
            warnings.push(warning);
        }
        if matches!(
            channel,
            Channel::ConeResistance | Channel::SleeveFriction | Channel::FrictionRatio
        ) {
            if let Some(warning) =
                count_matching(channel, values, WarningKind::Negative, |v| v < 0.0)
            {
                warnings.push(warning);
            }
        }
    }

    let length = raw
        .penetration_length
        .iter()
        .fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if length < options.minimum_length {
        warnings.push(PlausibilityWarning {
            channel: Channel::PenetrationLength,
            kind: WarningKind::ShortSounding,
            first_index: None,
            count: raw.len(),
        });
    }
    if raw.len() < options.minimum_samples {
        warnings.push(PlausibilityWarning {
            channel: Channel::PenetrationLength,
            kind: WarningKind::FewSamples,
            first_index: None,
            count: raw.len(),
        });
    }

    let friction = raw
        .sleeve_friction
        .as_deref()
        .map(|values| (Channel::SleeveFriction, values))
        .or_else(|| {
            raw.friction_ratio
                .as_deref()
                .map(|values| (Channel::FrictionRatio, values))
        });
    let resistance = raw
        .cone_resistance
        .as_deref()
        .map(|values| (Channel::ConeResistance, values));
    for (channel, values) in resistance.into_iter().chain(friction) {
        let non_positive = values.iter().filter(|v| **v <= 0.0).count();
        if non_positive as f64 > options.max_non_positive_ratio * values.len() as f64 {
            warnings.push(PlausibilityWarning {
                channel,
                kind: WarningKind::NonPositiveShare,
                first_index: values.iter().position(|v| *v <= 0.0),
                count: non_positive,
            });
        }
    }

    warnings
}

fn count_matching(
    channel: Channel,
    values: &[f64],
    kind: WarningKind,
    predicate: impl Fn(f64) -> bool,
) -> Option<PlausibilityWarning> {
    let first_index = values.iter().position(|v| predicate(*v))?;
    Some(PlausibilityWarning {
        channel,
        kind,
        first_index: Some(first_index),
        count: values.iter().filter(|v| predicate(**v)).count(),
    })
}
