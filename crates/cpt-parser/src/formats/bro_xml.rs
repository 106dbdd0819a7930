use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use roxmltree::{Document, Node};
use tracing::{debug, warn};

use crate::errors::FormatError;
use crate::model::{Channel, CptRecord, Location, PreDrillSection, SoundingMetadata, SourceFormat};
use crate::registry::CptParser;

use super::{clean_optional, parse_value, resultant_inclination, ChannelBuilder};

/// BRO-style XML delivery of a single cone penetration test.
#[derive(Debug, Default, Clone, Copy)]
pub struct BroXmlParser;

/// Fixed column order of the `values` block.
const BRO_COLUMNS: [&str; 25] = [
    "penetrationLength",
    "depth",
    "elapsedTime",
    "coneResistance",
    "correctedConeResistance",
    "netConeResistance",
    "magneticFieldStrengthX",
    "magneticFieldStrengthY",
    "magneticFieldStrengthZ",
    "magneticFieldStrengthTotal",
    "electricalConductivity",
    "inclinationEW",
    "inclinationNS",
    "inclinationX",
    "inclinationY",
    "inclinationResultant",
    "magneticInclination",
    "magneticDeclination",
    "localFriction",
    "poreRatio",
    "temperature",
    "porePressureU1",
    "porePressureU2",
    "porePressureU3",
    "frictionRatio",
];

const NO_DATA: f64 = -999999.0;
const MPA_TO_KPA: f64 = 1000.0;
const BRO_NAMESPACE_HINT: &str = "broservices.nl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Target {
    Channel(Channel),
    InclinationEw,
    InclinationNs,
    InclinationX,
    InclinationY,
}

fn column_target(name: &str) -> Option<(Target, f64)> {
    let target = match name {
        "penetrationLength" => (Target::Channel(Channel::PenetrationLength), 1.0),
        "depth" => (Target::Channel(Channel::MeasuredDepth), 1.0),
        "elapsedTime" => (Target::Channel(Channel::ElapsedTime), 1.0),
        "coneResistance" => (Target::Channel(Channel::ConeResistance), MPA_TO_KPA),
        "localFriction" => (Target::Channel(Channel::SleeveFriction), MPA_TO_KPA),
        "frictionRatio" => (Target::Channel(Channel::FrictionRatio), 1.0),
        "porePressureU1" => (Target::Channel(Channel::PorePressureU1), MPA_TO_KPA),
        "porePressureU2" => (Target::Channel(Channel::PorePressureU2), MPA_TO_KPA),
        "porePressureU3" => (Target::Channel(Channel::PorePressureU3), MPA_TO_KPA),
        "inclinationResultant" => (Target::Channel(Channel::Inclination), 1.0),
        "inclinationEW" => (Target::InclinationEw, 1.0),
        "inclinationNS" => (Target::InclinationNs, 1.0),
        "inclinationX" => (Target::InclinationX, 1.0),
        "inclinationY" => (Target::InclinationY, 1.0),
        _ => return None,
    };
    Some(target)
}

fn source_unit(target: Target, factor: f64) -> &'static str {
    match target {
        Target::Channel(Channel::PenetrationLength | Channel::MeasuredDepth) => "m",
        Target::Channel(Channel::ElapsedTime) => "s",
        Target::Channel(Channel::FrictionRatio) => "%",
        Target::Channel(_) if factor == MPA_TO_KPA => "MPa",
        _ => "deg",
    }
}

struct UsedColumn {
    index: usize,
    target: Target,
    factor: f64,
}

fn find<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.descendants()
        .find(|child| child.is_element() && child.tag_name().name() == name)
}

/// First non-blank text below `node`; BRO wraps some values in nested
/// elements (`resultTime/TimeInstant/timePosition`).
fn deep_text(node: Node<'_, '_>) -> Option<String> {
    node.descendants()
        .filter(|child| child.is_text())
        .find_map(|child| clean_optional(child.text()))
}

fn text_of(node: Node<'_, '_>, name: &str) -> Option<String> {
    find(node, name).and_then(deep_text)
}

fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.naive_utc());
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Some(parsed);
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

impl BroXmlParser {
    const NAME: &'static str = "BRO_XML";

    fn missing(element: &str) -> FormatError {
        FormatError::MissingElement {
            parser: Self::NAME,
            element: element.to_string(),
        }
    }

    fn number(node: Node<'_, '_>, name: &str) -> Result<Option<f64>, FormatError> {
        let Some(text) = text_of(node, name) else {
            return Ok(None);
        };
        text.parse::<f64>()
            .map(Some)
            .map_err(|err| FormatError::InvalidValue {
                parser: Self::NAME,
                element: name.to_string(),
                message: format!("'{text}' is not a number: {err}"),
            })
    }

    fn location(root: Node<'_, '_>) -> Result<Location, FormatError> {
        let delivered = find(root, "deliveredLocation").unwrap_or(root);
        let pos =
            text_of(delivered, "pos").ok_or_else(|| Self::missing("deliveredLocation/pos"))?;

        let coordinates: Vec<f64> = pos
            .split_whitespace()
            .map(str::parse::<f64>)
            .collect::<Result<_, _>>()
            .map_err(|err| FormatError::InvalidValue {
                parser: Self::NAME,
                element: "pos".to_string(),
                message: format!("'{pos}' is not a coordinate pair: {err}"),
            })?;
        let &[x, y] = coordinates.as_slice() else {
            return Err(FormatError::InvalidValue {
                parser: Self::NAME,
                element: "pos".to_string(),
                message: format!("expected two coordinates, found {}", coordinates.len()),
            });
        };

        let reference_system = find(delivered, "Point")
            .and_then(|point| point.attribute("srsName"))
            .and_then(|srs| srs.rsplit("::").next())
            .and_then(|code| clean_optional(Some(code)))
            .map(|code| {
                if code.chars().all(|c| c.is_ascii_digit()) {
                    format!("EPSG:{code}")
                } else {
                    code
                }
            });

        Ok(Location {
            x,
            y,
            reference_system,
        })
    }

    fn available_columns(root: Node<'_, '_>) -> HashSet<String> {
        match find(root, "parameters") {
            Some(parameters) => parameters
                .children()
                .filter(|child| child.is_element())
                .filter(|child| {
                    deep_text(*child).is_some_and(|flag| flag.eq_ignore_ascii_case("ja"))
                })
                .map(|child| child.tag_name().name().to_string())
                .collect(),
            None => {
                warn!("BRO document has no parameters block, treating every column as available");
                BRO_COLUMNS.iter().map(|name| name.to_string()).collect()
            }
        }
    }

    fn check_required(available: &HashSet<String>) -> Result<(), FormatError> {
        for required in ["penetrationLength", "coneResistance"] {
            if !available.contains(required) {
                return Err(Self::missing(&format!("parameters/{required}")));
            }
        }
        if !available.contains("localFriction") && !available.contains("frictionRatio") {
            return Err(Self::missing("parameters/localFriction or parameters/frictionRatio"));
        }
        if !["porePressureU1", "porePressureU2", "porePressureU3"]
            .iter()
            .any(|name| available.contains(*name))
        {
            return Err(Self::missing("parameters/porePressureU1..U3"));
        }
        Ok(())
    }

    fn metadata(root: Node<'_, '_>, test: Node<'_, '_>) -> Result<SoundingMetadata, FormatError> {
        let mut metadata = SoundingMetadata {
            vertical_datum: text_of(root, "verticalDatum"),
            local_reference: text_of(root, "localVerticalReferencePoint"),
            quality_class: text_of(root, "qualityClass"),
            cpt_standard: text_of(root, "cptStandard"),
            cone_type: text_of(root, "conePenetrometerType"),
            cone_area_ratio: Self::number(root, "coneSurfaceQuotient")?,
            ..SoundingMetadata::default()
        };

        let result_time = text_of(test, "resultTime").or_else(|| text_of(root, "resultTime"));
        if let Some(result_time) = result_time {
            metadata.started_at = parse_timestamp(&result_time);
            if metadata.started_at.is_none() {
                warn!(value = %result_time, "ignoring unparseable BRO result time");
            }
        }

        let pre_drill = match find(root, "trajectory") {
            Some(trajectory) => Self::number(trajectory, "predrilledDepth")?,
            None => Self::number(root, "predrilledDepth")?,
        };
        metadata.pre_drill_depth = pre_drill.unwrap_or(0.0);
        Ok(metadata)
    }
}

impl CptParser for BroXmlParser {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn format(&self) -> SourceFormat {
        SourceFormat::BroXml
    }

    fn parse(&self, content: &str) -> Result<CptRecord, FormatError> {
        let content = content.trim_start_matches('\u{feff}').trim_start();
        if !content.starts_with('<') {
            return Err(FormatError::FormatMismatch {
                parser: Self::NAME,
                reason: "document does not start with an XML element".to_string(),
            });
        }
        if !content.contains("conePenetrationTest") && !content.contains("broId") {
            return Err(FormatError::FormatMismatch {
                parser: Self::NAME,
                reason: "no conePenetrationTest or broId element".to_string(),
            });
        }

        let doc = Document::parse(content).map_err(|err| FormatError::Xml {
            parser: Self::NAME,
            source: err,
        })?;
        let root = doc.root_element();

        let test = find(root, "conePenetrationTest")
            .ok_or_else(|| Self::missing("conePenetrationTest"))?;
        match test.tag_name().namespace() {
            Some(namespace) if namespace.contains(BRO_NAMESPACE_HINT) => {}
            other => debug!(namespace = ?other, "conePenetrationTest outside the BRO namespace"),
        }

        let id = text_of(root, "broId").ok_or_else(|| Self::missing("broId"))?;
        let location = Self::location(root)?;
        let ground_level = Self::number(root, "offset")?.ok_or_else(|| Self::missing("offset"))?;
        let mut metadata = Self::metadata(root, test)?;

        let available = Self::available_columns(root);
        Self::check_required(&available)?;

        let values_node =
            find(test, "values").ok_or_else(|| Self::missing("conePenetrationTest/values"))?;
        let values_text =
            deep_text(values_node).ok_or_else(|| Self::missing("conePenetrationTest/values"))?;
        let line = doc.text_pos_at(values_node.range().start).row as usize;

        let used: Vec<UsedColumn> = BRO_COLUMNS
            .iter()
            .enumerate()
            .filter(|(_, name)| available.contains(**name))
            .filter_map(|(index, name)| {
                column_target(name).map(|(target, factor)| UsedColumn {
                    index,
                    target,
                    factor,
                })
            })
            .collect();

        let mut rows: Vec<Vec<f64>> = Vec::new();
        let mut dropped = 0usize;
        for (row, record) in values_text
            .split(';')
            .map(str::trim)
            .filter(|record| !record.is_empty())
            .enumerate()
        {
            let fields: Vec<&str> = record.split(',').map(str::trim).collect();
            if fields.len() != BRO_COLUMNS.len() {
                return Err(FormatError::ColumnCount {
                    parser: Self::NAME,
                    row,
                    line,
                    expected: BRO_COLUMNS.len(),
                    found: fields.len(),
                });
            }

            let mut values = Vec::with_capacity(used.len());
            for column in &used {
                let value =
                    parse_value(Self::NAME, fields[column.index], row, line, column.index + 1)?;
                values.push(value);
            }
            if values.iter().any(|value| *value == NO_DATA) {
                dropped += 1;
                continue;
            }
            rows.push(values);
        }

        // penetration length is always the first used column
        rows.sort_by(|a, b| a[0].total_cmp(&b[0]));
        let before = rows.len();
        rows.dedup_by(|later, earlier| later[0] == earlier[0]);
        let duplicates = before - rows.len();

        if rows.is_empty() {
            return Err(FormatError::EmptyData { parser: Self::NAME });
        }
        if dropped > 0 || duplicates > 0 {
            warn!(
                sounding = %id,
                dropped,
                duplicates,
                kept = rows.len(),
                "removed BRO rows without data or with repeated penetration length"
            );
        }

        let mut builder = ChannelBuilder::new();
        let mut components: Vec<(Target, Vec<f64>)> = Vec::new();
        for (position, column) in used.iter().enumerate() {
            let values = rows.iter().map(|row| row[position] * column.factor);
            match column.target {
                Target::Channel(channel) => {
                    builder.declare(channel);
                    for value in values {
                        builder.push(channel, value);
                    }
                    metadata
                        .source_units
                        .insert(channel, source_unit(column.target, column.factor).to_string());
                }
                other => components.push((other, values.collect())),
            }
        }

        if !builder.contains(Channel::Inclination) {
            let component = |target: Target| {
                components
                    .iter()
                    .find(|(candidate, _)| *candidate == target)
                    .map(|(_, values)| values.as_slice())
            };
            let pair = match (component(Target::InclinationX), component(Target::InclinationY)) {
                (Some(a), Some(b)) => Some((a, b)),
                _ => match (component(Target::InclinationNs), component(Target::InclinationEw)) {
                    (Some(a), Some(b)) => Some((a, b)),
                    _ => None,
                },
            };
            if let Some((a, b)) = pair {
                for value in resultant_inclination(a, b) {
                    builder.push(Channel::Inclination, value);
                }
            }
        }

        let raw = builder.build(Self::NAME, rows.len())?;
        if metadata.pre_drill_depth > 0.0 {
            metadata.pre_drill_section = Some(PreDrillSection {
                depth: metadata.pre_drill_depth,
                main_series_start: raw.penetration_length[0],
            });
        }
        debug!(sounding = %id, samples = raw.len(), "parsed BRO XML sounding");

        Ok(CptRecord::new(
            id,
            location,
            ground_level,
            metadata,
            raw,
            SourceFormat::BroXml,
        ))
    }
}
