use std::collections::HashMap;

use crate::errors::FormatError;
use crate::model::{Channel, RawChannels, Unit};

/// Factor that brings a source unit to the canonical unit of its dimension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct UnitConversion {
    pub unit: Unit,
    pub factor: f64,
}

impl UnitConversion {
    pub const fn new(unit: Unit, factor: f64) -> Self {
        Self { unit, factor }
    }

    pub fn apply(&self, value: f64) -> f64 {
        value * self.factor
    }
}

pub(crate) fn unit_conversion(unit: &str) -> Option<UnitConversion> {
    let lower = unit.trim().to_ascii_lowercase();
    let conversion = match lower.as_str() {
        "m" | "meter" | "metre" => UnitConversion::new(Unit::Meter, 1.0),
        "cm" => UnitConversion::new(Unit::Meter, 0.01),
        "mm" => UnitConversion::new(Unit::Meter, 0.001),
        "mpa" | "mn/m2" | "mn/m²" => UnitConversion::new(Unit::Kilopascal, 1000.0),
        "kpa" | "kn/m2" | "kn/m²" => UnitConversion::new(Unit::Kilopascal, 1.0),
        "pa" => UnitConversion::new(Unit::Kilopascal, 0.001),
        "%" | "percent" | "procent" => UnitConversion::new(Unit::Percent, 1.0),
        "deg" | "degree" | "degrees" | "graden" | "°" => UnitConversion::new(Unit::Degree, 1.0),
        "s" | "sec" | "second" | "seconds" | "seconde" => UnitConversion::new(Unit::Second, 1.0),
        "min" | "minute" | "minutes" => UnitConversion::new(Unit::Second, 60.0),
        _ => return None,
    };
    Some(conversion)
}

/// Accumulates per-channel values row by row and checks they stay co-indexed.
pub(crate) struct ChannelBuilder {
    order: Vec<Channel>,
    values: HashMap<Channel, Vec<f64>>,
}

impl ChannelBuilder {
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            values: HashMap::new(),
        }
    }

    pub fn declare(&mut self, channel: Channel) {
        if !self.order.contains(&channel) {
            self.order.push(channel);
        }
        self.values.entry(channel).or_default();
    }

    pub fn push(&mut self, channel: Channel, value: f64) {
        self.declare(channel);
        self.values.entry(channel).or_default().push(value);
    }

    pub fn contains(&self, channel: Channel) -> bool {
        self.values.contains_key(&channel)
    }

    pub fn build(
        mut self,
        parser: &'static str,
        row_count: usize,
    ) -> Result<RawChannels, FormatError> {
        for channel in &self.order {
            let found = self.values.get(channel).map(Vec::len).unwrap_or_default();
            if found != row_count {
                return Err(FormatError::Inconsistent {
                    parser,
                    message: format!("{channel} had {found} rows, expected {row_count}"),
                });
            }
        }

        let penetration_length = self
            .values
            .remove(&Channel::PenetrationLength)
            .ok_or_else(|| FormatError::MissingElement {
                parser,
                element: Channel::PenetrationLength.canonical_name().to_string(),
            })?;

        let mut raw = RawChannels {
            penetration_length,
            ..RawChannels::default()
        };
        for (channel, values) in self.values {
            if let Some(slot) = raw.channel_mut(channel) {
                *slot = Some(values);
            }
        }
        Ok(raw)
    }
}

pub(crate) fn parse_value(
    parser: &'static str,
    value: &str,
    row: usize,
    line: usize,
    column: usize,
) -> Result<f64, FormatError> {
    let trimmed = value.trim();
    trimmed
        .parse::<f64>()
        .map_err(|err| FormatError::DataRow {
            parser,
            row,
            line,
            message: format!("failed to parse column {column} value '{trimmed}' as float: {err}"),
        })
}

pub(crate) fn clean_optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

/// Resultant inclination (degrees) from two perpendicular components.
pub(crate) fn resultant_inclination(first: &[f64], second: &[f64]) -> Vec<f64> {
    first
        .iter()
        .zip(second)
        .map(|(a, b)| {
            let (ta, tb) = (a.to_radians().tan(), b.to_radians().tan());
            (ta * ta + tb * tb).sqrt().atan().to_degrees()
        })
        .collect()
}
