use super::{mean_spacing, StageContext, StageFailure, StageOutcome, WorkingSet};
use crate::config::PreDrillFill;

/// Stitches a reported pre-drill section onto the top of the record: the
/// main series moves so it starts at the pre-drill depth and synthetic
/// samples cover `0..depth` at the main series' mean spacing.
pub(super) fn apply(
    set: &WorkingSet,
    context: &StageContext<'_>,
) -> Result<StageOutcome, StageFailure> {
    let Some(section) = context
        .metadata
        .pre_drill_section
        .as_ref()
        .filter(|section| section.depth > 0.0)
    else {
        return Ok(StageOutcome::Skipped);
    };

    let depth = section.depth;
    let offset = section.main_series_offset();
    let shifted: Vec<f64> = set.penetration_length.iter().map(|v| v + offset).collect();
    let step = mean_spacing(&shifted)
        .filter(|step| step.is_finite() && *step > 0.0)
        .unwrap_or(depth);
    let count = ((depth / step - 1e-9).ceil() as usize).max(1);
    let positions: Vec<f64> = (0..count).map(|k| k as f64 * step).collect();

    let options = &context.options.pre_drill;
    let fill = |values: &[f64]| -> Vec<f64> {
        let value = match options.fill {
            PreDrillFill::Zero => 0.0,
            PreDrillFill::Average => leading_mean(values, options.average_samples),
        };
        vec![value; count]
    };
    let ramp = |values: &[f64]| -> Vec<f64> {
        match (options.fill, values.first()) {
            (PreDrillFill::Average, Some(first)) if first.is_finite() => (0..count)
                .map(|k| k as f64 * first / count as f64)
                .collect(),
            _ => vec![0.0; count],
        }
    };

    let mut next = set.clone();
    next.penetration_length = prepend(&positions, &shifted);
    next.cone_resistance = prepend(&fill(&set.cone_resistance), &set.cone_resistance);
    next.sleeve_friction = set
        .sleeve_friction
        .as_ref()
        .map(|values| prepend(&fill(values), values));
    next.friction_ratio = set
        .friction_ratio
        .as_ref()
        .map(|values| prepend(&fill(values), values));
    for (position, values) in next.pore_pressure.iter_mut() {
        if let Some(original) = set.pore_pressure.get(position) {
            *values = prepend(&ramp(original), original);
        }
    }
    next.inclination = set
        .inclination
        .as_ref()
        .map(|values| prepend(&vec![0.0; count], values));
    next.elapsed_time = set.elapsed_time.as_ref().map(|values| {
        let start = values.first().copied().unwrap_or(0.0);
        prepend(&vec![start; count], values)
    });
    // Delivered depth is anchored on its own first sample, not the rod length.
    next.measured_depth = set.measured_depth.as_ref().map(|values| {
        let anchor = values.first().map_or(offset, |first| depth - first);
        let shifted: Vec<f64> = values.iter().map(|v| v + anchor).collect();
        prepend(&positions, &shifted)
    });
    next.synthetic_samples = set.synthetic_samples + count;

    Ok(StageOutcome::Applied(next))
}

fn prepend(head: &[f64], tail: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(head.len() + tail.len());
    out.extend_from_slice(head);
    out.extend_from_slice(tail);
    out
}

/// Mean of the finite, non-negative values among the first `samples` entries.
fn leading_mean(values: &[f64], samples: usize) -> f64 {
    let (sum, n) = values
        .iter()
        .take(samples)
        .filter(|v| v.is_finite() && **v >= 0.0)
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}
