use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDateTime;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Gef,
    BroXml,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Gef => "gef",
            SourceFormat::BroXml => "bro_xml",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical units. Every channel is converted to one of these at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Meter,
    Kilopascal,
    Percent,
    Degree,
    Second,
}

impl Unit {
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Meter => "m",
            Unit::Kilopascal => "kPa",
            Unit::Percent => "%",
            Unit::Degree => "deg",
            Unit::Second => "s",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    PenetrationLength,
    ConeResistance,
    SleeveFriction,
    FrictionRatio,
    PorePressureU1,
    PorePressureU2,
    PorePressureU3,
    Inclination,
    ElapsedTime,
    MeasuredDepth,
    Depth,
    CorrectedDepth,
}

impl Channel {
    pub fn canonical_name(&self) -> &'static str {
        match self {
            Channel::PenetrationLength => "penetration_length_m",
            Channel::ConeResistance => "cone_resistance_kpa",
            Channel::SleeveFriction => "sleeve_friction_kpa",
            Channel::FrictionRatio => "friction_ratio_pct",
            Channel::PorePressureU1 => "pore_pressure_u1_kpa",
            Channel::PorePressureU2 => "pore_pressure_u2_kpa",
            Channel::PorePressureU3 => "pore_pressure_u3_kpa",
            Channel::Inclination => "inclination_deg",
            Channel::ElapsedTime => "elapsed_time_s",
            Channel::MeasuredDepth => "measured_depth_m",
            Channel::Depth => "depth_m",
            Channel::CorrectedDepth => "corrected_depth_m",
        }
    }

    pub fn unit(&self) -> Unit {
        match self {
            Channel::PenetrationLength
            | Channel::MeasuredDepth
            | Channel::Depth
            | Channel::CorrectedDepth => Unit::Meter,
            Channel::ConeResistance
            | Channel::SleeveFriction
            | Channel::PorePressureU1
            | Channel::PorePressureU2
            | Channel::PorePressureU3 => Unit::Kilopascal,
            Channel::FrictionRatio => Unit::Percent,
            Channel::Inclination => Unit::Degree,
            Channel::ElapsedTime => Unit::Second,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

/// Filter-element position of a pore-pressure sensor on the cone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PorePressurePosition {
    U1,
    U2,
    U3,
}

impl PorePressurePosition {
    pub const ALL: [PorePressurePosition; 3] = [
        PorePressurePosition::U1,
        PorePressurePosition::U2,
        PorePressurePosition::U3,
    ];

    pub fn channel(&self) -> Channel {
        match self {
            PorePressurePosition::U1 => Channel::PorePressureU1,
            PorePressurePosition::U2 => Channel::PorePressureU2,
            PorePressurePosition::U3 => Channel::PorePressureU3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PorePressurePosition::U1 => "u1",
            PorePressurePosition::U2 => "u2",
            PorePressurePosition::U3 => "u3",
        }
    }
}

impl fmt::Display for PorePressurePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for PorePressurePosition {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "u1" | "1" => Ok(PorePressurePosition::U1),
            "u2" | "2" => Ok(PorePressurePosition::U2),
            "u3" | "3" => Ok(PorePressurePosition::U3),
            other => Err(format!("unknown pore pressure position '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub x: f64,
    pub y: f64,
    pub reference_system: Option<String>,
}

/// Pre-drill section reported by a source that delivers the main series
/// separately from the pre-drilled interval. Stitching happens during
/// preprocessing; the arrays are untouched at parse time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreDrillSection {
    pub depth: f64,
    /// Penetration length of the first main-series sample.
    pub main_series_start: f64,
}

impl PreDrillSection {
    /// Shift that moves the main series so that it starts at the pre-drill depth.
    pub fn main_series_offset(&self) -> f64 {
        self.depth - self.main_series_start
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SoundingMetadata {
    pub pre_drill_depth: f64,
    pub pre_drill_section: Option<PreDrillSection>,
    /// Phreatic level relative to the vertical datum (m).
    pub water_level: Option<f64>,
    pub cpt_standard: Option<String>,
    pub quality_class: Option<String>,
    pub cone_type: Option<String>,
    pub cone_area_ratio: Option<f64>,
    pub vertical_datum: Option<String>,
    pub local_reference: Option<String>,
    pub started_at: Option<NaiveDateTime>,
    /// Unit strings as declared by the source, before conversion.
    pub source_units: BTreeMap<Channel, String>,
}

/// Source fields exactly as parsed: co-indexed, converted to canonical units.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawChannels {
    pub penetration_length: Vec<f64>,
    pub cone_resistance: Option<Vec<f64>>,
    pub sleeve_friction: Option<Vec<f64>>,
    pub friction_ratio: Option<Vec<f64>>,
    pub pore_pressure_u1: Option<Vec<f64>>,
    pub pore_pressure_u2: Option<Vec<f64>>,
    pub pore_pressure_u3: Option<Vec<f64>>,
    pub inclination: Option<Vec<f64>>,
    pub elapsed_time: Option<Vec<f64>>,
    pub measured_depth: Option<Vec<f64>>,
}

impl RawChannels {
    pub fn len(&self) -> usize {
        self.penetration_length.len()
    }

    pub fn is_empty(&self) -> bool {
        self.penetration_length.is_empty()
    }

    pub fn pore_pressure(&self, position: PorePressurePosition) -> Option<&[f64]> {
        match position {
            PorePressurePosition::U1 => self.pore_pressure_u1.as_deref(),
            PorePressurePosition::U2 => self.pore_pressure_u2.as_deref(),
            PorePressurePosition::U3 => self.pore_pressure_u3.as_deref(),
        }
    }

    pub fn pore_pressure_mut(&mut self, position: PorePressurePosition) -> &mut Option<Vec<f64>> {
        match position {
            PorePressurePosition::U1 => &mut self.pore_pressure_u1,
            PorePressurePosition::U2 => &mut self.pore_pressure_u2,
            PorePressurePosition::U3 => &mut self.pore_pressure_u3,
        }
    }

    pub fn measured_pore_pressures(&self) -> Vec<PorePressurePosition> {
        PorePressurePosition::ALL
            .into_iter()
            .filter(|position| self.pore_pressure(*position).is_some())
            .collect()
    }

    pub fn channel(&self, channel: Channel) -> Option<&[f64]> {
        match channel {
            Channel::PenetrationLength => Some(&self.penetration_length),
            Channel::ConeResistance => self.cone_resistance.as_deref(),
            Channel::SleeveFriction => self.sleeve_friction.as_deref(),
            Channel::FrictionRatio => self.friction_ratio.as_deref(),
            Channel::PorePressureU1 => self.pore_pressure_u1.as_deref(),
            Channel::PorePressureU2 => self.pore_pressure_u2.as_deref(),
            Channel::PorePressureU3 => self.pore_pressure_u3.as_deref(),
            Channel::Inclination => self.inclination.as_deref(),
            Channel::ElapsedTime => self.elapsed_time.as_deref(),
            Channel::MeasuredDepth => self.measured_depth.as_deref(),
            Channel::Depth | Channel::CorrectedDepth => None,
        }
    }

    pub fn channel_mut(&mut self, channel: Channel) -> Option<&mut Option<Vec<f64>>> {
        match channel {
            Channel::ConeResistance => Some(&mut self.cone_resistance),
            Channel::SleeveFriction => Some(&mut self.sleeve_friction),
            Channel::FrictionRatio => Some(&mut self.friction_ratio),
            Channel::PorePressureU1 => Some(&mut self.pore_pressure_u1),
            Channel::PorePressureU2 => Some(&mut self.pore_pressure_u2),
            Channel::PorePressureU3 => Some(&mut self.pore_pressure_u3),
            Channel::Inclination => Some(&mut self.inclination),
            Channel::ElapsedTime => Some(&mut self.elapsed_time),
            Channel::MeasuredDepth => Some(&mut self.measured_depth),
            Channel::PenetrationLength | Channel::Depth | Channel::CorrectedDepth => None,
        }
    }

    /// Every populated channel, penetration length first.
    pub fn present_channels(&self) -> Vec<(Channel, &[f64])> {
        RAW_CHANNELS
            .iter()
            .filter_map(|channel| self.channel(*channel).map(|values| (*channel, values)))
            .collect()
    }
}

const RAW_CHANNELS: [Channel; 10] = [
    Channel::PenetrationLength,
    Channel::ConeResistance,
    Channel::SleeveFriction,
    Channel::FrictionRatio,
    Channel::PorePressureU1,
    Channel::PorePressureU2,
    Channel::PorePressureU3,
    Channel::Inclination,
    Channel::ElapsedTime,
    Channel::MeasuredDepth,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegativeValuePolicy {
    #[default]
    Clip,
    Interpolate,
}

impl NegativeValuePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            NegativeValuePolicy::Clip => "clip",
            NegativeValuePolicy::Interpolate => "interpolate",
        }
    }
}

impl fmt::Display for NegativeValuePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What interpolation does with an invalid sample that has a valid
/// neighbour on one side only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgePolicy {
    #[default]
    Nearest,
    Clip,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthSource {
    PenetrationLength,
    Measured,
    InclinationCorrected,
}

impl DepthSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepthSource::PenetrationLength => "penetration length",
            DepthSource::Measured => "measured",
            DepthSource::InclinationCorrected => "inclination corrected",
        }
    }
}

impl fmt::Display for DepthSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PorePressureSource {
    Measured,
    Hydrostatic,
    Empirical { from: PorePressurePosition },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: String,
    pub applied: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub negative_values: NegativeValuePolicy,
    pub interpolation_edge: EdgePolicy,
    pub depth_source: DepthSource,
    /// Number of samples replaced per channel by the negative-value stage.
    pub corrections: BTreeMap<Channel, usize>,
    pub stages: Vec<StageRecord>,
    pub pore_pressure_sources: BTreeMap<PorePressurePosition, PorePressureSource>,
}

/// Analysis-ready signal. Arrays are co-indexed and include the synthetic
/// pre-drill samples at the top, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedChannels {
    pub penetration_length: Vec<f64>,
    /// Vertical depth below the surface (m).
    pub depth: Vec<f64>,
    /// Ground level minus vertical depth, relative to the vertical datum (m).
    pub corrected_depth: Vec<f64>,
    pub cone_resistance: Vec<f64>,
    pub sleeve_friction: Vec<f64>,
    pub friction_ratio: Vec<f64>,
    pub pore_pressure_u1: Option<Vec<f64>>,
    pub pore_pressure_u2: Option<Vec<f64>>,
    pub pore_pressure_u3: Option<Vec<f64>>,
    /// Pore-pressure channel downstream interpretation should read.
    pub governing_pore_pressure: PorePressurePosition,
    pub inclination: Option<Vec<f64>>,
    pub elapsed_time: Option<Vec<f64>>,
    pub synthetic_samples: usize,
    pub provenance: Provenance,
}

impl ProcessedChannels {
    pub fn len(&self) -> usize {
        self.depth.len()
    }

    pub fn is_empty(&self) -> bool {
        self.depth.is_empty()
    }

    pub fn pore_pressure_at(&self, position: PorePressurePosition) -> Option<&[f64]> {
        match position {
            PorePressurePosition::U1 => self.pore_pressure_u1.as_deref(),
            PorePressurePosition::U2 => self.pore_pressure_u2.as_deref(),
            PorePressurePosition::U3 => self.pore_pressure_u3.as_deref(),
        }
    }

    pub fn pore_pressure(&self) -> &[f64] {
        self.pore_pressure_at(self.governing_pore_pressure)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub format: SourceFormat,
    pub file_hash: String,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    Raw,
    Processed,
}

/// One sounding. Raw fields are always present; processed fields only exist
/// once the preprocessing pipeline has run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CptRecord {
    pub id: String,
    pub location: Location,
    pub ground_level: f64,
    pub metadata: SoundingMetadata,
    pub raw: RawChannels,
    pub source: SourceInfo,
    #[serde(default)]
    processed: Option<ProcessedChannels>,
}

impl CptRecord {
    pub fn new(
        id: impl Into<String>,
        location: Location,
        ground_level: f64,
        metadata: SoundingMetadata,
        raw: RawChannels,
        format: SourceFormat,
    ) -> Self {
        Self {
            id: id.into(),
            location,
            ground_level,
            metadata,
            raw,
            source: SourceInfo {
                format,
                file_hash: String::new(),
                path: None,
            },
            processed: None,
        }
    }

    pub fn sample_count(&self) -> usize {
        self.raw.len()
    }

    pub fn state(&self) -> RecordState {
        if self.processed.is_some() {
            RecordState::Processed
        } else {
            RecordState::Raw
        }
    }

    pub fn is_processed(&self) -> bool {
        self.processed.is_some()
    }

    pub fn processed(&self) -> Option<&ProcessedChannels> {
        self.processed.as_ref()
    }

    /// Attaches the output of the preprocessing pipeline.
    pub fn with_processed(mut self, processed: ProcessedChannels) -> Self {
        self.processed = Some(processed);
        self
    }

    /// Drops any processed fields, returning the record to its raw state.
    pub fn into_raw(mut self) -> Self {
        self.processed = None;
        self
    }

    /// Tabular view for plotting and interpretation collaborators: the
    /// processed channels once present, the raw channels otherwise.
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let mut columns: Vec<Column> = Vec::new();
        match &self.processed {
            Some(processed) => {
                push_column(&mut columns, Channel::PenetrationLength, &processed.penetration_length);
                push_column(&mut columns, Channel::Depth, &processed.depth);
                push_column(&mut columns, Channel::CorrectedDepth, &processed.corrected_depth);
                push_column(&mut columns, Channel::ConeResistance, &processed.cone_resistance);
                push_column(&mut columns, Channel::SleeveFriction, &processed.sleeve_friction);
                push_column(&mut columns, Channel::FrictionRatio, &processed.friction_ratio);
                for position in PorePressurePosition::ALL {
                    if let Some(values) = processed.pore_pressure_at(position) {
                        push_column(&mut columns, position.channel(), values);
                    }
                }
                if let Some(values) = &processed.inclination {
                    push_column(&mut columns, Channel::Inclination, values);
                }
                if let Some(values) = &processed.elapsed_time {
                    push_column(&mut columns, Channel::ElapsedTime, values);
                }
                let synthetic: Vec<bool> = (0..processed.len())
                    .map(|idx| idx < processed.synthetic_samples)
                    .collect();
                columns.push(Series::new("synthetic".into(), synthetic).into());
            }
            None => {
                for (channel, values) in self.raw.present_channels() {
                    push_column(&mut columns, channel, values);
                }
            }
        }
        DataFrame::new(columns)
    }
}

fn push_column(columns: &mut Vec<Column>, channel: Channel, values: &[f64]) {
    columns.push(Series::new(channel.canonical_name().into(), values.to_vec()).into());
}
