mod bro_xml;
mod common;
mod gef;

pub use bro_xml::BroXmlParser;
pub use gef::GefParser;

pub(crate) use common::{
    clean_optional, parse_value, resultant_inclination, unit_conversion, ChannelBuilder,
    UnitConversion,
};
