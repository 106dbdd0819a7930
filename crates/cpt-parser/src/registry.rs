use crate::errors::{FormatError, ParserAttempt};
use crate::formats::{BroXmlParser, GefParser};
use crate::model::{CptRecord, SourceFormat};

pub trait CptParser {
    fn name(&self) -> &'static str;
    fn format(&self) -> SourceFormat;
    fn parse(&self, content: &str) -> Result<CptRecord, FormatError>;
}

/// Detects the format of `content` and parses it into a raw record.
pub fn parse_cpt_file(content: &str) -> Result<CptRecord, FormatError> {
    let gef = GefParser;
    let bro_xml = BroXmlParser;
    let parsers: [&dyn CptParser; 2] = [&gef, &bro_xml];
    parse_with_parsers(content, &parsers)
}

/// Parses `content` with the adapter for a known format, skipping detection.
pub fn parse_as(format: SourceFormat, content: &str) -> Result<CptRecord, FormatError> {
    match format {
        SourceFormat::Gef => GefParser.parse(content),
        SourceFormat::BroXml => BroXmlParser.parse(content),
    }
}

pub fn parse_with_parsers(
    content: &str,
    parsers: &[&dyn CptParser],
) -> Result<CptRecord, FormatError> {
    let mut attempts = Vec::new();

    for parser in parsers {
        match parser.parse(content) {
            Ok(parsed) => return Ok(parsed),
            Err(FormatError::FormatMismatch { reason, .. }) => {
                attempts.push(ParserAttempt::new(parser.name(), reason));
            }
            Err(err) => return Err(err),
        }
    }

    Err(FormatError::NoMatchingParser { attempts })
}
