use cpt_parser::Channel;

use super::{StageContext, StageFailure, StageOutcome, WorkingSet};

/// Completes the friction pair: whichever of sleeve friction and friction
/// ratio the source did not deliver is computed from the other and qc.
pub(super) fn apply(
    set: &WorkingSet,
    _context: &StageContext<'_>,
) -> Result<StageOutcome, StageFailure> {
    let next = match (&set.sleeve_friction, &set.friction_ratio) {
        (Some(_), Some(_)) => return Ok(StageOutcome::Skipped),
        (Some(fs), None) => {
            let mut next = set.clone();
            next.friction_ratio = Some(friction_ratio(fs, &set.cone_resistance));
            next
        }
        (None, Some(rf)) => {
            let mut next = set.clone();
            next.sleeve_friction = Some(sleeve_friction(rf, &set.cone_resistance));
            next
        }
        (None, None) => {
            return Err(StageFailure::channel(
                Channel::SleeveFriction,
                "neither sleeve friction nor friction ratio is available",
            ))
        }
    };
    Ok(StageOutcome::Applied(next))
}

/// `Rf = fs / qc * 100`, zero where qc is zero.
fn friction_ratio(sleeve_friction: &[f64], cone_resistance: &[f64]) -> Vec<f64> {
    sleeve_friction
        .iter()
        .zip(cone_resistance)
        .map(|(fs, qc)| if *qc == 0.0 { 0.0 } else { fs / qc * 100.0 })
        .collect()
}

fn sleeve_friction(friction_ratio: &[f64], cone_resistance: &[f64]) -> Vec<f64> {
    friction_ratio
        .iter()
        .zip(cone_resistance)
        .map(|(rf, qc)| rf * qc / 100.0)
        .collect()
}
