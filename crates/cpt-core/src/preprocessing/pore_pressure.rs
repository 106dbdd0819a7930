use cpt_parser::{PorePressurePosition, PorePressureSource};
use tracing::debug;

use super::{StageContext, StageFailure, StageOutcome, WorkingSet};
use crate::config::PorePressureRelation;

/// Fallback order when an empirical relation does not name its source.
const EMPIRICAL_SOURCE_ORDER: [PorePressurePosition; 3] = [
    PorePressurePosition::U2,
    PorePressurePosition::U1,
    PorePressurePosition::U3,
];

/// Derives the pore-pressure channels downstream interpretation expects but
/// the source did not measure. Without a configured relation they stay unset.
pub(super) fn apply(
    set: &WorkingSet,
    context: &StageContext<'_>,
) -> Result<StageOutcome, StageFailure> {
    let options = &context.options.pore_pressure;
    let missing: Vec<PorePressurePosition> = options
        .required
        .iter()
        .copied()
        .filter(|position| !set.pore_pressure.contains_key(position))
        .collect();
    let Some(&first_missing) = missing.first() else {
        return Ok(StageOutcome::Skipped);
    };

    let mut next = set.clone();
    match options.relation {
        PorePressureRelation::Disabled => {
            debug!(
                sounding = context.sounding,
                missing = ?missing,
                "no pore-pressure relation configured, leaving channels unset"
            );
            return Ok(StageOutcome::Skipped);
        }
        PorePressureRelation::Hydrostatic {
            unit_weight_water,
            water_level,
        } => {
            let water_level = water_level
                .or(context.metadata.water_level)
                .ok_or_else(|| {
                    StageFailure::channel(
                        first_missing.channel(),
                        "hydrostatic relation needs a water level",
                    )
                })?;
            let elevation = set.corrected_depth.as_deref().ok_or_else(|| {
                StageFailure::channel(first_missing.channel(), "elevation was never derived")
            })?;
            let values = hydrostatic(elevation, water_level, unit_weight_water);
            for position in missing {
                next.pore_pressure.insert(position, values.clone());
                next.pore_pressure_sources
                    .insert(position, PorePressureSource::Hydrostatic);
            }
        }
        PorePressureRelation::Empirical {
            coefficient,
            source,
        } => {
            let from = empirical_source(set, source).ok_or_else(|| {
                StageFailure::channel(
                    first_missing.channel(),
                    "empirical relation has no measured source channel",
                )
            })?;
            let values: Vec<f64> = set.pore_pressure[&from]
                .iter()
                .map(|u| coefficient * u)
                .collect();
            for position in missing {
                next.pore_pressure.insert(position, values.clone());
                next.pore_pressure_sources
                    .insert(position, PorePressureSource::Empirical { from });
            }
        }
    }
    Ok(StageOutcome::Applied(next))
}

/// `u = γw · max(0, water_level − elevation)` in kPa for γw in kN/m³.
fn hydrostatic(elevation: &[f64], water_level: f64, unit_weight_water: f64) -> Vec<f64> {
    elevation
        .iter()
        .map(|z| unit_weight_water * (water_level - z).max(0.0))
        .collect()
}

fn empirical_source(
    set: &WorkingSet,
    requested: Option<PorePressurePosition>,
) -> Option<PorePressurePosition> {
    let measured = |position: &PorePressurePosition| {
        matches!(
            set.pore_pressure_sources.get(position),
            Some(PorePressureSource::Measured)
        ) && set.pore_pressure.contains_key(position)
    };
    match requested {
        Some(position) => Some(position).filter(measured),
        None => EMPIRICAL_SOURCE_ORDER.into_iter().find(measured),
    }
}

#[cfg(test)]
mod tests {
    use cpt_parser::SoundingMetadata;

    use super::*;
    use crate::config::{PorePressureOptions, PreprocessOptions};
    use crate::preprocessing::test_support::{assert_all_close, context, raw, working_set};

    fn options(
        required: Vec<PorePressurePosition>,
        relation: PorePressureRelation,
    ) -> PreprocessOptions {
        PreprocessOptions {
            pore_pressure: PorePressureOptions { required, relation },
            ..PreprocessOptions::default()
        }
    }

    fn u2_only() -> WorkingSet {
        let mut set = working_set(&raw(vec![0.0, 1.0, 2.0], vec![1.0, 1.0, 1.0]));
        set.pore_pressure
            .insert(PorePressurePosition::U2, vec![10.0, 20.0, 30.0]);
        set.corrected_depth = Some(vec![0.0, -1.0, -2.0]);
        set
    }

    #[test]
    fn nothing_missing_is_skipped() {
        let metadata = SoundingMetadata::default();
        let options = PreprocessOptions::default();
        let outcome = apply(&u2_only(), &context(&metadata, &options, 0.0));
        assert_eq!(outcome, Ok(StageOutcome::Skipped));
    }

    #[test]
    fn missing_channel_stays_unset_without_relation() {
        let metadata = SoundingMetadata::default();
        let options = options(
            vec![PorePressurePosition::U1, PorePressurePosition::U2],
            PorePressureRelation::Disabled,
        );
        let outcome = apply(&u2_only(), &context(&metadata, &options, 0.0));
        assert_eq!(outcome, Ok(StageOutcome::Skipped));
    }

    #[test]
    fn hydrostatic_uses_metadata_water_level() {
        let metadata = SoundingMetadata {
            water_level: Some(-0.5),
            ..SoundingMetadata::default()
        };
        let options = options(
            vec![PorePressurePosition::U1],
            PorePressureRelation::Hydrostatic {
                unit_weight_water: 10.0,
                water_level: None,
            },
        );
        let Ok(StageOutcome::Applied(set)) = apply(&u2_only(), &context(&metadata, &options, 0.0))
        else {
            panic!("u1 should be derived");
        };
        assert_all_close(&set.pore_pressure[&PorePressurePosition::U1], &[0.0, 5.0, 15.0]);
        assert_eq!(
            set.pore_pressure_sources[&PorePressurePosition::U1],
            PorePressureSource::Hydrostatic
        );
    }

    #[test]
    fn hydrostatic_without_water_level_fails() {
        let metadata = SoundingMetadata::default();
        let options = options(
            vec![PorePressurePosition::U1],
            PorePressureRelation::Hydrostatic {
                unit_weight_water: 9.81,
                water_level: None,
            },
        );
        let failure = apply(&u2_only(), &context(&metadata, &options, 0.0))
            .expect_err("no water level");
        assert_eq!(failure.channel, Some(cpt_parser::Channel::PorePressureU1));
    }

    #[test]
    fn empirical_scales_first_measured_channel() {
        let metadata = SoundingMetadata::default();
        let options = options(
            vec![PorePressurePosition::U2, PorePressurePosition::U3],
            PorePressureRelation::Empirical {
                coefficient: 0.5,
                source: None,
            },
        );
        let Ok(StageOutcome::Applied(set)) = apply(&u2_only(), &context(&metadata, &options, 0.0))
        else {
            panic!("u3 should be derived");
        };
        assert_all_close(&set.pore_pressure[&PorePressurePosition::U3], &[5.0, 10.0, 15.0]);
        assert_eq!(
            set.pore_pressure_sources[&PorePressurePosition::U3],
            PorePressureSource::Empirical {
                from: PorePressurePosition::U2
            }
        );
    }

    #[test]
    fn empirical_rejects_unmeasured_source() {
        let metadata = SoundingMetadata::default();
        let options = options(
            vec![PorePressurePosition::U3],
            PorePressureRelation::Empirical {
                coefficient: 1.0,
                source: Some(PorePressurePosition::U1),
            },
        );
        let failure = apply(&u2_only(), &context(&metadata, &options, 0.0))
            .expect_err("u1 is not measured");
        assert_eq!(failure.channel, Some(cpt_parser::Channel::PorePressureU3));
    }
}
