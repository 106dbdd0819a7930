use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use tracing::{debug, warn};

use crate::errors::FormatError;
use crate::model::{Channel, CptRecord, Location, SoundingMetadata, SourceFormat, Unit};
use crate::registry::CptParser;

use super::{
    clean_optional, parse_value, resultant_inclination, unit_conversion, ChannelBuilder,
    UnitConversion,
};

/// GEF-CPT: `#KEYWORD= value` header terminated by `#EOH=`, followed by
/// delimited numeric rows.
#[derive(Debug, Default, Clone, Copy)]
pub struct GefParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Quantity {
    Channel(Channel),
    InclinationNs,
    InclinationEw,
    InclinationX,
    InclinationY,
}

impl Quantity {
    fn from_number(number: u32) -> Option<Self> {
        let quantity = match number {
            1 => Quantity::Channel(Channel::PenetrationLength),
            2 => Quantity::Channel(Channel::ConeResistance),
            3 => Quantity::Channel(Channel::SleeveFriction),
            4 => Quantity::Channel(Channel::FrictionRatio),
            5 => Quantity::Channel(Channel::PorePressureU1),
            6 => Quantity::Channel(Channel::PorePressureU2),
            7 => Quantity::Channel(Channel::PorePressureU3),
            8 => Quantity::Channel(Channel::Inclination),
            9 => Quantity::InclinationNs,
            10 => Quantity::InclinationEw,
            11 => Quantity::Channel(Channel::MeasuredDepth),
            12 => Quantity::Channel(Channel::ElapsedTime),
            21 => Quantity::InclinationX,
            22 => Quantity::InclinationY,
            _ => return None,
        };
        Some(quantity)
    }

    fn channel(&self) -> Channel {
        match self {
            Quantity::Channel(channel) => *channel,
            _ => Channel::Inclination,
        }
    }

    /// Unit the GEF-CPT report convention assumes when the header does not
    /// name a recognisable one.
    fn default_conversion(&self) -> UnitConversion {
        match self.channel().unit() {
            Unit::Kilopascal => UnitConversion::new(Unit::Kilopascal, 1000.0),
            other => UnitConversion::new(other, 1.0),
        }
    }
}

#[derive(Debug, Clone)]
struct ColumnInfo {
    index: usize,
    quantity: Quantity,
    conversion: UnitConversion,
    unit_label: String,
    void: Option<f64>,
}

struct HeaderLine<'a> {
    keyword: String,
    value: &'a str,
    line: usize,
}

struct GefHeader<'a> {
    entries: Vec<HeaderLine<'a>>,
    data_start: usize,
}

impl<'a> GefHeader<'a> {
    fn find(&self, keyword: &str) -> Option<&HeaderLine<'a>> {
        self.entries.iter().find(|entry| entry.keyword == keyword)
    }

    fn all<'s>(&'s self, keyword: &'s str) -> impl Iterator<Item = &'s HeaderLine<'a>> + 's {
        self.entries
            .iter()
            .filter(move |entry| entry.keyword == keyword)
    }
}

impl GefParser {
    const NAME: &'static str = "GEF_CPT";

    fn read_header<'a>(lines: &[&'a str]) -> Result<GefHeader<'a>, FormatError> {
        let mut entries = Vec::new();
        let mut seen_gefid = false;

        for (idx, raw) in lines.iter().copied().enumerate() {
            let line = idx + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            if !seen_gefid {
                if !trimmed.to_ascii_uppercase().starts_with("#GEFID") {
                    return Err(FormatError::FormatMismatch {
                        parser: Self::NAME,
                        reason: "first line is not a #GEFID= declaration".to_string(),
                    });
                }
                seen_gefid = true;
            }

            // Data before the terminator means the header was never closed.
            let Some(body) = trimmed.strip_prefix('#') else {
                return Err(FormatError::MissingElement {
                    parser: Self::NAME,
                    element: "#EOH".to_string(),
                });
            };
            let (keyword, value) =
                body.split_once('=')
                    .ok_or_else(|| FormatError::InvalidHeader {
                        parser: Self::NAME,
                        line,
                        message: "missing '=' after keyword".to_string(),
                    })?;
            let keyword = keyword.trim().to_ascii_uppercase();

            match keyword.as_str() {
                "EOH" => {
                    return Ok(GefHeader {
                        entries,
                        data_start: idx + 1,
                    })
                }
                "COMMENT" => continue,
                _ => entries.push(HeaderLine {
                    keyword,
                    value,
                    line,
                }),
            }
        }

        if !seen_gefid {
            return Err(FormatError::FormatMismatch {
                parser: Self::NAME,
                reason: "document is empty".to_string(),
            });
        }
        Err(FormatError::MissingElement {
            parser: Self::NAME,
            element: "#EOH".to_string(),
        })
    }

    /// Splits a comma-separated header value, honouring quoted names.
    fn header_fields(value: &str) -> Result<Vec<String>, FormatError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(value.as_bytes());

        match reader.records().next() {
            Some(record) => {
                let record = record.map_err(|err| FormatError::Csv {
                    parser: Self::NAME,
                    source: err,
                })?;
                Ok(record.iter().map(str::to_string).collect())
            }
            None => Ok(Vec::new()),
        }
    }

    fn header_number<T: std::str::FromStr>(
        value: &str,
        line: usize,
        what: &str,
    ) -> Result<T, FormatError> {
        value.trim().parse::<T>().map_err(|_| FormatError::InvalidHeader {
            parser: Self::NAME,
            line,
            message: format!("{what} '{}' is not a number", value.trim()),
        })
    }

    fn column_count(header: &GefHeader<'_>) -> Result<usize, FormatError> {
        let entry = header
            .find("COLUMN")
            .ok_or_else(|| FormatError::MissingElement {
                parser: Self::NAME,
                element: "#COLUMN".to_string(),
            })?;
        let fields = Self::header_fields(entry.value)?;
        let first = fields.first().map(String::as_str).unwrap_or_default();
        let count: usize = Self::header_number(first, entry.line, "column count")?;
        if count == 0 {
            return Err(FormatError::InvalidHeader {
                parser: Self::NAME,
                line: entry.line,
                message: "column count must be positive".to_string(),
            });
        }
        Ok(count)
    }

    fn column_infos(
        header: &GefHeader<'_>,
        column_count: usize,
    ) -> Result<Vec<ColumnInfo>, FormatError> {
        let mut voids: HashMap<usize, f64> = HashMap::new();
        for entry in header.all("COLUMNVOID") {
            let fields = Self::header_fields(entry.value)?;
            if fields.len() < 2 {
                return Err(FormatError::InvalidHeader {
                    parser: Self::NAME,
                    line: entry.line,
                    message: "expected 'column, void value'".to_string(),
                });
            }
            let column: usize = Self::header_number(&fields[0], entry.line, "void column")?;
            let value: f64 = Self::header_number(&fields[1], entry.line, "void value")?;
            voids.insert(column, value);
        }

        let mut columns: Vec<ColumnInfo> = Vec::new();
        for entry in header.all("COLUMNINFO") {
            let fields = Self::header_fields(entry.value)?;
            if fields.len() < 4 {
                return Err(FormatError::InvalidHeader {
                    parser: Self::NAME,
                    line: entry.line,
                    message: "expected 'column, unit, name, quantity'".to_string(),
                });
            }
            let number: usize = Self::header_number(&fields[0], entry.line, "column number")?;
            if number == 0 || number > column_count {
                return Err(FormatError::InvalidHeader {
                    parser: Self::NAME,
                    line: entry.line,
                    message: format!(
                        "column {number} lies outside the {column_count} declared columns"
                    ),
                });
            }
            let quantity_number: u32 =
                Self::header_number(&fields[3], entry.line, "quantity number")?;
            let Some(quantity) = Quantity::from_number(quantity_number) else {
                debug!(
                    column = number,
                    quantity = quantity_number,
                    name = %fields[2],
                    "ignoring GEF column with unmapped quantity"
                );
                continue;
            };
            if columns.iter().any(|existing| existing.quantity == quantity) {
                return Err(FormatError::InvalidHeader {
                    parser: Self::NAME,
                    line: entry.line,
                    message: format!("quantity {quantity_number} declared more than once"),
                });
            }

            let unit_label = fields[1].clone();
            let conversion = match unit_conversion(&unit_label) {
                Some(conversion) if conversion.unit == quantity.channel().unit() => conversion,
                Some(_) => {
                    return Err(FormatError::UnitMismatch {
                        parser: Self::NAME,
                        column: number,
                        unit: unit_label,
                        channel: quantity.channel(),
                    })
                }
                None => {
                    let fallback = quantity.default_conversion();
                    warn!(
                        column = number,
                        unit = %unit_label,
                        assumed = %fallback.unit,
                        factor = fallback.factor,
                        "unrecognised GEF unit, assuming the quantity's default"
                    );
                    fallback
                }
            };

            columns.push(ColumnInfo {
                index: number - 1,
                quantity,
                conversion,
                unit_label,
                void: voids.get(&number).copied(),
            });
        }

        if !columns
            .iter()
            .any(|column| column.quantity == Quantity::Channel(Channel::PenetrationLength))
        {
            return Err(FormatError::MissingElement {
                parser: Self::NAME,
                element: "#COLUMNINFO for quantity 1 (penetration length)".to_string(),
            });
        }
        Ok(columns)
    }

    fn location(header: &GefHeader<'_>) -> Result<Location, FormatError> {
        let entry = header
            .find("XYID")
            .ok_or_else(|| FormatError::MissingElement {
                parser: Self::NAME,
                element: "#XYID".to_string(),
            })?;
        let fields = Self::header_fields(entry.value)?;
        if fields.len() < 3 {
            return Err(FormatError::InvalidHeader {
                parser: Self::NAME,
                line: entry.line,
                message: "expected 'system, x, y'".to_string(),
            });
        }
        let x: f64 = Self::header_number(&fields[1], entry.line, "x coordinate")?;
        let y: f64 = Self::header_number(&fields[2], entry.line, "y coordinate")?;
        let reference_system = match fields[0].trim() {
            "" => None,
            "31000" => Some("EPSG:28992".to_string()),
            other => Some(format!("GEF:{other}")),
        };
        Ok(Location {
            x,
            y,
            reference_system,
        })
    }

    fn ground_level(header: &GefHeader<'_>) -> Result<(f64, Option<String>), FormatError> {
        let entry = header
            .find("ZID")
            .ok_or_else(|| FormatError::MissingElement {
                parser: Self::NAME,
                element: "#ZID".to_string(),
            })?;
        let fields = Self::header_fields(entry.value)?;
        if fields.len() < 2 {
            return Err(FormatError::InvalidHeader {
                parser: Self::NAME,
                line: entry.line,
                message: "expected 'datum, z'".to_string(),
            });
        }
        let z: f64 = Self::header_number(&fields[1], entry.line, "ground level")?;
        let datum = match fields[0].trim() {
            "" => None,
            "31000" => Some("NAP".to_string()),
            other => Some(format!("GEF:{other}")),
        };
        Ok((z, datum))
    }

    fn metadata(header: &GefHeader<'_>) -> Result<SoundingMetadata, FormatError> {
        let mut metadata = SoundingMetadata::default();

        for entry in header.all("MEASUREMENTVAR") {
            let fields = Self::header_fields(entry.value)?;
            if fields.len() < 2 {
                continue;
            }
            let number: u32 = Self::header_number(&fields[0], entry.line, "variable number")?;
            match number {
                3 => {
                    let value: f64 =
                        Self::header_number(&fields[1], entry.line, "cone area ratio")?;
                    metadata.cone_area_ratio = Some(value);
                }
                13 => {
                    let value: f64 =
                        Self::header_number(&fields[1], entry.line, "pre-drill depth")?;
                    let factor = fields
                        .get(2)
                        .and_then(|unit| unit_conversion(unit))
                        .filter(|conversion| conversion.unit == Unit::Meter)
                        .map(|conversion| conversion.factor)
                        .unwrap_or(1.0);
                    metadata.pre_drill_depth = value * factor;
                }
                _ => {}
            }
        }

        for entry in header.all("MEASUREMENTTEXT") {
            let fields = Self::header_fields(entry.value)?;
            let Some(Ok(number)) = fields.first().map(|number| number.parse::<u32>()) else {
                continue;
            };
            let text = clean_optional(fields.get(1).map(String::as_str));
            match number {
                4 => metadata.cone_type = text,
                6 => metadata.cpt_standard = text,
                _ => {}
            }
        }

        metadata.started_at = Self::started_at(header)?;
        Ok(metadata)
    }

    fn started_at(header: &GefHeader<'_>) -> Result<Option<NaiveDateTime>, FormatError> {
        let Some(date_entry) = header.find("STARTDATE") else {
            return Ok(None);
        };
        let date_fields = Self::header_fields(date_entry.value)?;
        let time_fields = match header.find("STARTTIME") {
            Some(entry) => Self::header_fields(entry.value)?,
            None => Vec::new(),
        };

        let parsed = Self::timestamp(&date_fields, &time_fields);
        if parsed.is_none() {
            warn!(line = date_entry.line, "ignoring unparseable GEF start date");
        }
        Ok(parsed)
    }

    fn timestamp(date: &[String], time: &[String]) -> Option<NaiveDateTime> {
        let number = |fields: &[String], idx: usize| -> Option<f64> {
            fields.get(idx).and_then(|value| value.trim().parse::<f64>().ok())
        };
        let day = NaiveDate::from_ymd_opt(
            number(date, 0)? as i32,
            number(date, 1)? as u32,
            number(date, 2)? as u32,
        )?;
        day.and_hms_opt(
            number(time, 0).unwrap_or(0.0) as u32,
            number(time, 1).unwrap_or(0.0) as u32,
            number(time, 2).unwrap_or(0.0) as u32,
        )
    }

    fn is_void(value: f64, void: f64) -> bool {
        (value - void).abs() <= 1e-9 * void.abs().max(1.0)
    }
}

impl CptParser for GefParser {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn format(&self) -> SourceFormat {
        SourceFormat::Gef
    }

    fn parse(&self, content: &str) -> Result<CptRecord, FormatError> {
        let lines: Vec<&str> = content.trim_start_matches('\u{feff}').lines().collect();
        let header = Self::read_header(&lines)?;

        let column_count = Self::column_count(&header)?;
        let columns = Self::column_infos(&header, column_count)?;
        let column_separator = header
            .find("COLUMNSEPARATOR")
            .map(|entry| entry.value.trim())
            .filter(|sep| !sep.is_empty());
        let record_separator = header
            .find("RECORDSEPARATOR")
            .map(|entry| entry.value.trim())
            .filter(|sep| !sep.is_empty());

        let id = clean_optional(header.find("TESTID").map(|entry| entry.value)).ok_or_else(
            || FormatError::MissingElement {
                parser: Self::NAME,
                element: "#TESTID".to_string(),
            },
        )?;
        let location = Self::location(&header)?;
        let (ground_level, vertical_datum) = Self::ground_level(&header)?;
        let mut metadata = Self::metadata(&header)?;
        metadata.vertical_datum = vertical_datum;

        let mut builder = ChannelBuilder::new();
        let mut components: HashMap<Quantity, Vec<f64>> = HashMap::new();
        for column in &columns {
            if let Quantity::Channel(channel) = column.quantity {
                builder.declare(channel);
                metadata
                    .source_units
                    .insert(channel, column.unit_label.clone());
            }
        }

        let mut row = 0usize;
        let mut kept = 0usize;
        let mut dropped = 0usize;
        let mut converted = Vec::with_capacity(columns.len());

        for (offset, raw_line) in lines[header.data_start..].iter().enumerate() {
            let line = header.data_start + offset + 1;
            let mut text = raw_line.trim();
            if text.is_empty() || text.starts_with('#') {
                continue;
            }
            if let Some(separator) = record_separator {
                text = text.trim_end_matches(separator).trim_end();
            }

            let fields: Vec<&str> = match column_separator {
                Some(separator) => text
                    .split(separator)
                    .map(str::trim)
                    .filter(|field| !field.is_empty())
                    .collect(),
                None => text.split_whitespace().collect(),
            };
            if fields.len() != column_count {
                return Err(FormatError::ColumnCount {
                    parser: Self::NAME,
                    row,
                    line,
                    expected: column_count,
                    found: fields.len(),
                });
            }

            converted.clear();
            let mut void_row = false;
            for column in &columns {
                let value =
                    parse_value(Self::NAME, fields[column.index], row, line, column.index + 1)?;
                if column.void.is_some_and(|void| Self::is_void(value, void)) {
                    void_row = true;
                }
                converted.push(column.conversion.apply(value));
            }
            row += 1;

            if void_row {
                dropped += 1;
                continue;
            }
            for (column, value) in columns.iter().zip(converted.iter().copied()) {
                match column.quantity {
                    Quantity::Channel(channel) => builder.push(channel, value),
                    other => components.entry(other).or_default().push(value),
                }
            }
            kept += 1;
        }

        if kept == 0 {
            return Err(FormatError::EmptyData { parser: Self::NAME });
        }
        if dropped > 0 {
            warn!(
                sounding = %id,
                dropped,
                kept,
                "removed GEF rows holding a column void value"
            );
        }

        if !builder.contains(Channel::Inclination) {
            let pairs = [
                (Quantity::InclinationX, Quantity::InclinationY),
                (Quantity::InclinationNs, Quantity::InclinationEw),
            ];
            let resultant = pairs.iter().find_map(|(first, second)| {
                match (components.get(first), components.get(second)) {
                    (Some(a), Some(b)) => Some(resultant_inclination(a, b)),
                    _ => None,
                }
            });
            if let Some(values) = resultant {
                for value in values {
                    builder.push(Channel::Inclination, value);
                }
            }
        }

        let raw = builder.build(Self::NAME, kept)?;
        debug!(sounding = %id, samples = kept, "parsed GEF sounding");

        Ok(CptRecord::new(
            id,
            location,
            ground_level,
            metadata,
            raw,
            SourceFormat::Gef,
        ))
    }
}
