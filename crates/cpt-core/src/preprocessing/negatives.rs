use cpt_parser::{Channel, EdgePolicy, NegativeValuePolicy};

use super::{StageContext, StageFailure, StageOutcome, WorkingSet};

/// Replaces physically invalid samples. Resistance and friction must be
/// finite and non-negative; pore pressure only finite, since suction is real.
pub(super) fn apply(
    set: &WorkingSet,
    context: &StageContext<'_>,
) -> Result<StageOutcome, StageFailure> {
    let policy = context.options.negative_values;
    let edge = context.options.interpolation_edge;
    let synthetic = set.synthetic_samples;
    let axis = set.axis().to_vec();
    let mut next = set.clone();

    let (values, corrected) = correct_channel(
        &set.cone_resistance,
        &axis,
        synthetic,
        non_negative_invalid,
        policy,
        edge,
    )
    .map_err(|failure| failure.on(Channel::ConeResistance))?;
    next.cone_resistance = values;
    if corrected > 0 {
        next.corrections.insert(Channel::ConeResistance, corrected);
    }

    for (channel, slot) in [
        (Channel::SleeveFriction, &mut next.sleeve_friction),
        (Channel::FrictionRatio, &mut next.friction_ratio),
    ] {
        if let Some(current) = slot.as_mut() {
            let (values, corrected) = correct_channel(
                current,
                &axis,
                synthetic,
                non_negative_invalid,
                policy,
                edge,
            )
            .map_err(|failure| failure.on(channel))?;
            *current = values;
            if corrected > 0 {
                next.corrections.insert(channel, corrected);
            }
        }
    }

    for (position, current) in next.pore_pressure.iter_mut() {
        let (values, corrected) =
            correct_channel(current, &axis, synthetic, non_finite, policy, edge)
                .map_err(|failure| failure.on(position.channel()))?;
        *current = values;
        if corrected > 0 {
            next.corrections.insert(position.channel(), corrected);
        }
    }

    Ok(StageOutcome::Applied(next))
}

fn non_negative_invalid(value: f64) -> bool {
    !value.is_finite() || value < 0.0
}

fn non_finite(value: f64) -> bool {
    !value.is_finite()
}

/// Applies `policy` to every sample for which `invalid` holds and returns the
/// corrected values with the number of replaced samples. Interpolation is
/// linear along `axis` between the nearest valid neighbours; `edge` decides
/// what happens when only one side has a valid neighbour.
///
/// The first `synthetic` samples are stitched pre-drill fill: they are left
/// as they are and never serve as interpolation neighbours. Failure indices
/// refer to the full array.
pub fn correct_channel(
    values: &[f64],
    axis: &[f64],
    synthetic: usize,
    invalid: fn(f64) -> bool,
    policy: NegativeValuePolicy,
    edge: EdgePolicy,
) -> Result<(Vec<f64>, usize), StageFailure> {
    let start = synthetic.min(values.len());
    let (fill, measured) = values.split_at(start);
    let bad: Vec<bool> = measured.iter().map(|v| invalid(*v)).collect();
    let corrected = bad.iter().filter(|b| **b).count();
    if corrected == 0 {
        return Ok((values.to_vec(), 0));
    }

    let tail: Vec<f64> = match policy {
        NegativeValuePolicy::Clip => measured
            .iter()
            .zip(&bad)
            .map(|(value, bad)| if *bad { 0.0 } else { *value })
            .collect(),
        NegativeValuePolicy::Interpolate => {
            let axis = axis.get(start..).unwrap_or_default();
            interpolate(measured, axis, &bad, edge).map_err(|mut failure| {
                failure.index = failure.index.map(|index| index + start);
                failure
            })?
        }
    };

    let mut out = Vec::with_capacity(values.len());
    out.extend_from_slice(fill);
    out.extend(tail);
    Ok((out, corrected))
}

fn interpolate(
    values: &[f64],
    axis: &[f64],
    bad: &[bool],
    edge: EdgePolicy,
) -> Result<Vec<f64>, StageFailure> {
    let n = values.len();
    if axis.len() != n {
        return Err(StageFailure::new(format!(
            "interpolation axis has {} samples, expected {n}",
            axis.len()
        )));
    }
    if let Some(first) = bad.iter().position(|b| *b) {
        if bad.iter().all(|b| *b) {
            return Err(StageFailure::new("no valid samples to interpolate from").at(first));
        }
    }

    let mut previous = vec![None; n];
    let mut last = None;
    for idx in 0..n {
        previous[idx] = last;
        if !bad[idx] {
            last = Some(idx);
        }
    }
    let mut following = vec![None; n];
    let mut last = None;
    for idx in (0..n).rev() {
        following[idx] = last;
        if !bad[idx] {
            last = Some(idx);
        }
    }

    let mut out = values.to_vec();
    for idx in (0..n).filter(|idx| bad[*idx]) {
        out[idx] = match (previous[idx], following[idx]) {
            (Some(lo), Some(hi)) => {
                let span = axis[hi] - axis[lo];
                if span.abs() < f64::EPSILON {
                    (values[lo] + values[hi]) / 2.0
                } else {
                    values[lo] + (values[hi] - values[lo]) * (axis[idx] - axis[lo]) / span
                }
            }
            (Some(only), None) | (None, Some(only)) => match edge {
                EdgePolicy::Nearest => values[only],
                EdgePolicy::Clip => 0.0,
                EdgePolicy::Fail => {
                    return Err(StageFailure::new(
                        "invalid sample has a valid neighbour on one side only",
                    )
                    .at(idx))
                }
            },
            (None, None) => {
                return Err(StageFailure::new("no valid samples to interpolate from").at(idx))
            }
        };
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use cpt_parser::{PorePressurePosition, SoundingMetadata};

    use super::*;
    use crate::config::PreprocessOptions;
    use crate::preprocessing::test_support::{assert_all_close, context, raw, working_set};

    const AXIS: [f64; 3] = [0.0, 1.0, 2.0];

    #[test]
    fn clip_sets_negative_to_zero() {
        let (values, count) = correct_channel(
            &[5.0, -1.0, 7.0],
            &AXIS,
            0,
            non_negative_invalid,
            NegativeValuePolicy::Clip,
            EdgePolicy::Nearest,
        )
        .expect("clip");
        assert_all_close(&values, &[5.0, 0.0, 7.0]);
        assert_eq!(count, 1);
    }

    #[test]
    fn interpolate_between_neighbours() {
        let (values, _) = correct_channel(
            &[5.0, -1.0, 7.0],
            &AXIS,
            0,
            non_negative_invalid,
            NegativeValuePolicy::Interpolate,
            EdgePolicy::Nearest,
        )
        .expect("interpolate");
        assert_all_close(&values, &[5.0, 6.0, 7.0]);
    }

    #[test]
    fn interpolation_follows_uneven_axis() {
        let (values, _) = correct_channel(
            &[0.0, f64::NAN, 10.0],
            &[0.0, 0.25, 1.0],
            0,
            non_finite,
            NegativeValuePolicy::Interpolate,
            EdgePolicy::Nearest,
        )
        .expect("interpolate");
        assert_all_close(&values, &[0.0, 2.5, 10.0]);
    }

    #[test]
    fn edge_policy_controls_one_sided_samples() {
        let values = [-1.0, 4.0, 6.0];
        let run = |edge| {
            correct_channel(
                &values,
                &AXIS,
                0,
                non_negative_invalid,
                NegativeValuePolicy::Interpolate,
                edge,
            )
        };

        assert_all_close(&run(EdgePolicy::Nearest).expect("nearest").0, &[4.0, 4.0, 6.0]);
        assert_all_close(&run(EdgePolicy::Clip).expect("clip").0, &[0.0, 4.0, 6.0]);
        let failure = run(EdgePolicy::Fail).expect_err("fail");
        assert_eq!(failure.index, Some(0));
    }

    #[test]
    fn pre_drill_fill_is_not_an_interpolation_neighbour() {
        let values = [0.0, 0.0, -1.0, 8.0, 8.0];
        let axis = [0.0, 0.5, 1.0, 1.5, 2.0];
        let run = |edge| {
            correct_channel(
                &values,
                &axis,
                2,
                non_negative_invalid,
                NegativeValuePolicy::Interpolate,
                edge,
            )
        };

        let (corrected, count) = run(EdgePolicy::Nearest).expect("nearest");
        assert_all_close(&corrected, &[0.0, 0.0, 8.0, 8.0, 8.0]);
        assert_eq!(count, 1);
        let failure = run(EdgePolicy::Fail).expect_err("one-sided");
        assert_eq!(failure.index, Some(2));
    }

    #[test]
    fn stage_skips_stitched_samples() {
        let raw = raw(vec![0.0, 0.5, 1.0, 1.5, 2.0], vec![0.0, 0.0, -1.0, 8.0, 8.0]);
        let mut set = working_set(&raw);
        set.synthetic_samples = 2;
        let metadata = SoundingMetadata::default();
        let options = PreprocessOptions {
            negative_values: NegativeValuePolicy::Interpolate,
            ..PreprocessOptions::default()
        };

        let set = match apply(&set, &context(&metadata, &options, 0.0)) {
            Ok(StageOutcome::Applied(set)) => set,
            other => panic!("expected applied stage, got {other:?}"),
        };
        assert_all_close(&set.cone_resistance, &[0.0, 0.0, 8.0, 8.0, 8.0]);
        assert_eq!(set.corrections.get(&Channel::ConeResistance), Some(&1));
    }

    #[test]
    fn stage_keeps_negative_pore_pressure_and_counts_corrections() {
        let mut raw = raw(vec![0.0, 1.0, 2.0], vec![5.0, -1.0, 7.0]);
        raw.pore_pressure_u2 = Some(vec![-3.0, f64::NAN, 1.0]);
        raw.sleeve_friction = Some(vec![-0.5, 1.0, 2.0]);
        let metadata = SoundingMetadata::default();
        let options = PreprocessOptions::default();

        let set = match apply(&working_set(&raw), &context(&metadata, &options, 0.0)) {
            Ok(StageOutcome::Applied(set)) => set,
            other => panic!("expected applied stage, got {other:?}"),
        };
        assert_all_close(&set.pore_pressure[&PorePressurePosition::U2], &[-3.0, 0.0, 1.0]);
        assert_all_close(set.sleeve_friction.as_deref().expect("fs"), &[0.0, 1.0, 2.0]);
        assert_eq!(set.corrections.get(&Channel::ConeResistance), Some(&1));
        assert_eq!(set.corrections.get(&Channel::SleeveFriction), Some(&1));
        assert_eq!(set.corrections.get(&Channel::PorePressureU2), Some(&1));
    }
}
