use cpt_parser::{Channel, DepthSource};
use tracing::debug;

use super::{StageContext, StageFailure, StageOutcome, WorkingSet};

pub(super) fn apply(
    set: &WorkingSet,
    context: &StageContext<'_>,
) -> Result<StageOutcome, StageFailure> {
    let (depth, source) = if context.options.inclination_correction {
        vertical_depth(set, context.sounding)?
    } else {
        (set.penetration_length.clone(), DepthSource::PenetrationLength)
    };

    let corrected_depth = depth
        .iter()
        .map(|depth| context.ground_level - depth)
        .collect();

    let mut next = set.clone();
    next.depth = Some(depth);
    next.corrected_depth = Some(corrected_depth);
    next.depth_source = Some(source);
    Ok(StageOutcome::Applied(next))
}

fn vertical_depth(
    set: &WorkingSet,
    sounding: &str,
) -> Result<(Vec<f64>, DepthSource), StageFailure> {
    if let Some(measured) = &set.measured_depth {
        if usable_depth(measured, set.len()) {
            return Ok((measured.clone(), DepthSource::Measured));
        }
        debug!(sounding, "delivered corrected depth is unusable, falling back");
    }
    match &set.inclination {
        Some(inclination) => Ok((
            inclination_corrected_depth(&set.penetration_length, inclination)?,
            DepthSource::InclinationCorrected,
        )),
        None => Ok((set.penetration_length.clone(), DepthSource::PenetrationLength)),
    }
}

fn usable_depth(values: &[f64], len: usize) -> bool {
    values.len() == len
        && values.iter().all(|v| v.is_finite())
        && values.windows(2).all(|pair| pair[1] >= pair[0])
}

/// Vertical depth from rod length and resultant inclination (degrees):
/// each rod segment contributes its length times the cosine of the
/// inclination at its upper end.
pub fn inclination_corrected_depth(
    penetration_length: &[f64],
    inclination: &[f64],
) -> Result<Vec<f64>, StageFailure> {
    if inclination.len() != penetration_length.len() {
        return Err(StageFailure::channel(
            Channel::Inclination,
            format!(
                "has {} samples, expected {}",
                inclination.len(),
                penetration_length.len()
            ),
        ));
    }
    if let Some(index) = inclination.iter().position(|v| !v.is_finite()) {
        return Err(
            StageFailure::channel(Channel::Inclination, "inclination is not finite").at(index),
        );
    }

    let mut depth = Vec::with_capacity(penetration_length.len());
    let mut current = match penetration_length.first() {
        Some(first) => *first,
        None => return Ok(depth),
    };
    depth.push(current);
    for idx in 1..penetration_length.len() {
        let segment = penetration_length[idx] - penetration_length[idx - 1];
        current += segment * inclination[idx - 1].to_radians().cos();
        depth.push(current);
    }
    Ok(depth)
}
