//! Ordered correction stages that turn a validated raw record into the
//! analysis-ready signal.
//!
//! Every stage is a pure function of the previous working set and the
//! options. Preprocessing always starts again from the raw fields, so
//! running it twice with the same options gives the same result.

mod depth;
mod friction;
mod negatives;
mod pore_pressure;
mod predrill;

use std::collections::BTreeMap;
use std::fmt::Write as _;

use cpt_parser::{
    Channel, CptRecord, DepthSource, PorePressurePosition, PorePressureSource, ProcessedChannels,
    Provenance, RawChannels, SoundingMetadata, StageRecord,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::PreprocessOptions;
use crate::validation::ValidatedRecord;

pub use depth::inclination_corrected_depth;
pub use negatives::correct_channel;

/// Intermediate state handed from stage to stage.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkingSet {
    pub penetration_length: Vec<f64>,
    pub depth: Option<Vec<f64>>,
    pub corrected_depth: Option<Vec<f64>>,
    pub depth_source: Option<DepthSource>,
    pub cone_resistance: Vec<f64>,
    pub sleeve_friction: Option<Vec<f64>>,
    pub friction_ratio: Option<Vec<f64>>,
    pub pore_pressure: BTreeMap<PorePressurePosition, Vec<f64>>,
    pub pore_pressure_sources: BTreeMap<PorePressurePosition, PorePressureSource>,
    pub inclination: Option<Vec<f64>>,
    pub elapsed_time: Option<Vec<f64>>,
    pub measured_depth: Option<Vec<f64>>,
    pub synthetic_samples: usize,
    pub corrections: BTreeMap<Channel, usize>,
}

impl WorkingSet {
    pub fn from_raw(raw: &RawChannels) -> Result<Self, StageFailure> {
        let cone_resistance = raw.cone_resistance.clone().ok_or_else(|| {
            StageFailure::channel(Channel::ConeResistance, "mandatory channel is absent")
        })?;

        let mut pore_pressure = BTreeMap::new();
        let mut pore_pressure_sources = BTreeMap::new();
        for position in raw.measured_pore_pressures() {
            if let Some(values) = raw.pore_pressure(position) {
                pore_pressure.insert(position, values.to_vec());
                pore_pressure_sources.insert(position, PorePressureSource::Measured);
            }
        }

        Ok(Self {
            penetration_length: raw.penetration_length.clone(),
            depth: None,
            corrected_depth: None,
            depth_source: None,
            cone_resistance,
            sleeve_friction: raw.sleeve_friction.clone(),
            friction_ratio: raw.friction_ratio.clone(),
            pore_pressure,
            pore_pressure_sources,
            inclination: raw.inclination.clone(),
            elapsed_time: raw.elapsed_time.clone(),
            measured_depth: raw.measured_depth.clone(),
            synthetic_samples: 0,
            corrections: BTreeMap::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.penetration_length.len()
    }

    pub fn is_empty(&self) -> bool {
        self.penetration_length.is_empty()
    }

    /// Axis used for interpolation: vertical depth once derived.
    fn axis(&self) -> &[f64] {
        self.depth.as_deref().unwrap_or(&self.penetration_length)
    }

    fn finish(
        self,
        options: &PreprocessOptions,
        stages: Vec<StageRecord>,
    ) -> Result<ProcessedChannels, StageFailure> {
        let (Some(depth), Some(corrected_depth), Some(depth_source)) =
            (self.depth, self.corrected_depth, self.depth_source)
        else {
            return Err(StageFailure::new("depth was never derived"));
        };
        let (Some(sleeve_friction), Some(friction_ratio)) =
            (self.sleeve_friction, self.friction_ratio)
        else {
            return Err(StageFailure::channel(
                Channel::SleeveFriction,
                "friction channels were not completed",
            ));
        };
        let governing_pore_pressure = PorePressurePosition::ALL
            .into_iter()
            .find(|position| self.pore_pressure.contains_key(position))
            .ok_or_else(|| {
                StageFailure::channel(Channel::PorePressureU2, "no pore-pressure channel")
            })?;

        let mut pore_pressure = self.pore_pressure;
        Ok(ProcessedChannels {
            penetration_length: self.penetration_length,
            depth,
            corrected_depth,
            cone_resistance: self.cone_resistance,
            sleeve_friction,
            friction_ratio,
            pore_pressure_u1: pore_pressure.remove(&PorePressurePosition::U1),
            pore_pressure_u2: pore_pressure.remove(&PorePressurePosition::U2),
            pore_pressure_u3: pore_pressure.remove(&PorePressurePosition::U3),
            governing_pore_pressure,
            inclination: self.inclination,
            elapsed_time: self.elapsed_time,
            synthetic_samples: self.synthetic_samples,
            provenance: Provenance {
                negative_values: options.negative_values,
                interpolation_edge: options.interpolation_edge,
                depth_source,
                corrections: self.corrections,
                stages,
                pore_pressure_sources: self.pore_pressure_sources,
            },
        })
    }
}

/// Read-only inputs every stage may consult.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub sounding: &'a str,
    pub ground_level: f64,
    pub metadata: &'a SoundingMetadata,
    pub options: &'a PreprocessOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Applied(WorkingSet),
    /// Nothing to do for this record; the working set passes through.
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageFailure {
    pub channel: Option<Channel>,
    pub index: Option<usize>,
    pub reason: String,
}

impl StageFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            channel: None,
            index: None,
            reason: reason.into(),
        }
    }

    pub fn channel(channel: Channel, reason: impl Into<String>) -> Self {
        Self {
            channel: Some(channel),
            index: None,
            reason: reason.into(),
        }
    }

    pub fn at(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    /// Attributes a channel-agnostic failure to `channel`.
    pub fn on(mut self, channel: Channel) -> Self {
        self.channel = Some(channel);
        self
    }
}

pub type StageFn = fn(&WorkingSet, &StageContext<'_>) -> Result<StageOutcome, StageFailure>;

#[derive(Clone, Copy)]
pub struct Stage {
    pub name: &'static str,
    pub run: StageFn,
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage").field("name", &self.name).finish()
    }
}

/// The stage order is part of the contract: pre-drill stitching before
/// depth derivation, depth before interpolation on the depth axis, friction
/// completion after sanitation, pore pressure last.
pub const STAGES: &[Stage] = &[
    Stage {
        name: "pre_drill",
        run: predrill::apply,
    },
    Stage {
        name: "depth",
        run: depth::apply,
    },
    Stage {
        name: "negative_values",
        run: negatives::apply,
    },
    Stage {
        name: "friction_completion",
        run: friction::apply,
    },
    Stage {
        name: "pore_pressure",
        run: pore_pressure::apply,
    },
];

pub fn stage_names() -> Vec<&'static str> {
    STAGES.iter().map(|stage| stage.name).collect()
}

/// Failure of one stage. The input record is untouched; `partial` holds the
/// working set as it was before the failing stage.
#[derive(Debug, Error)]
#[error(
    "sounding {sounding}: preprocessing stage '{stage}' failed{}: {reason}",
    describe_location(.channel, .index)
)]
pub struct PreprocessingError {
    pub sounding: String,
    pub stage: &'static str,
    pub channel: Option<Channel>,
    pub index: Option<usize>,
    pub reason: String,
    pub completed: Vec<StageRecord>,
    pub partial: Option<Box<WorkingSet>>,
}

fn describe_location(channel: &Option<Channel>, index: &Option<usize>) -> String {
    let mut out = String::new();
    if let Some(channel) = channel {
        let _ = write!(out, " on {channel}");
    }
    if let Some(index) = index {
        let _ = write!(out, " at sample {index}");
    }
    out
}

impl PreprocessingError {
    fn from_failure(
        sounding: &str,
        stage: &'static str,
        failure: StageFailure,
        completed: Vec<StageRecord>,
        partial: Option<WorkingSet>,
    ) -> Self {
        Self {
            sounding: sounding.to_string(),
            stage,
            channel: failure.channel,
            index: failure.index,
            reason: failure.reason,
            completed,
            partial: partial.map(Box::new),
        }
    }
}

pub fn preprocess(
    record: &ValidatedRecord,
    options: &PreprocessOptions,
) -> Result<CptRecord, PreprocessingError> {
    run_stages(record, options, STAGES)
}

/// Runs `stages` in order over the raw fields of `record` and returns a copy
/// of the record carrying the processed fields.
pub fn run_stages(
    record: &ValidatedRecord,
    options: &PreprocessOptions,
    stages: &[Stage],
) -> Result<CptRecord, PreprocessingError> {
    let source = record.record();
    let context = StageContext {
        sounding: &source.id,
        ground_level: source.ground_level,
        metadata: &source.metadata,
        options,
    };

    let mut set = WorkingSet::from_raw(&source.raw).map_err(|failure| {
        PreprocessingError::from_failure(&source.id, "prepare", failure, Vec::new(), None)
    })?;
    let mut completed = Vec::with_capacity(stages.len());

    for stage in stages {
        match (stage.run)(&set, &context) {
            Ok(StageOutcome::Applied(next)) => {
                debug!(
                    sounding = %source.id,
                    stage = stage.name,
                    samples = next.len(),
                    "stage applied"
                );
                set = next;
                completed.push(StageRecord {
                    stage: stage.name.to_string(),
                    applied: true,
                });
            }
            Ok(StageOutcome::Skipped) => {
                debug!(sounding = %source.id, stage = stage.name, "stage skipped");
                completed.push(StageRecord {
                    stage: stage.name.to_string(),
                    applied: false,
                });
            }
            Err(failure) => {
                return Err(PreprocessingError::from_failure(
                    &source.id,
                    stage.name,
                    failure,
                    completed,
                    Some(set),
                ));
            }
        }
    }

    let processed = set.finish(options, completed.clone()).map_err(|failure| {
        PreprocessingError::from_failure(&source.id, "finish", failure, completed, None)
    })?;
    info!(
        sounding = %source.id,
        samples = processed.len(),
        synthetic = processed.synthetic_samples,
        "preprocessing complete"
    );

    Ok(source.clone().into_raw().with_processed(processed))
}

/// Mean distance between consecutive samples, if there are at least two.
pub(crate) fn mean_spacing(values: &[f64]) -> Option<f64> {
    let (first, last) = (values.first()?, values.last()?);
    if values.len() < 2 {
        return None;
    }
    Some((last - first) / (values.len() - 1) as f64)
}
