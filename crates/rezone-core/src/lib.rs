//! Domain model, identity matching and merge policy for planning records.

mod error;
mod matcher;
mod merge;
mod record;

pub use error::ValidationError;
pub use matcher::{
    normalize_address, IdentityMatcher, MatchOutcome, MatchRule, MatcherConfig, NearMiss,
};
pub use merge::merge_records;
pub use record::{
    clean_text, parse_day, BuildingType, DateField, Location, MinutesUrl, PartialRecord,
    RawSummary, Record, RecordDates, RecordType, ReportUrl, Stats, Zoning, ZoningStatus,
};

pub const CRATE_NAME: &str = "rezone-core";
