pub mod errors;
pub mod formats;
pub mod model;
mod registry;

pub use errors::{FormatError, ParserAttempt};
pub use model::{
    Channel, CptRecord, DepthSource, EdgePolicy, Location, NegativeValuePolicy,
    PorePressurePosition, PorePressureSource, PreDrillSection, ProcessedChannels, Provenance,
    RawChannels, RecordState, SoundingMetadata, SourceFormat, SourceInfo, StageRecord, Unit,
};
pub use registry::{parse_as, parse_cpt_file, parse_with_parsers, CptParser};

#[cfg(test)]
mod tests;
