//! Canonical record shape and the partial observations it is built from.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordType {
    #[serde(rename = "rezoning")]
    Rezoning,
    #[serde(rename = "development permit")]
    DevelopmentPermit,
}

impl RecordType {
    pub const ALL: [RecordType; 2] = [RecordType::Rezoning, RecordType::DevelopmentPermit];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Rezoning => "rezoning",
            RecordType::DevelopmentPermit => "development permit",
        }
    }

    /// Path-safe form used for directory names.
    pub fn slug(&self) -> &'static str {
        match self {
            RecordType::Rezoning => "rezoning",
            RecordType::DevelopmentPermit => "development-permit",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rezoning" | "rezonings" => Ok(RecordType::Rezoning),
            "development permit" | "development-permit" | "developmentpermit"
            | "development_permit" | "dp" => Ok(RecordType::DevelopmentPermit),
            other => Err(format!("unknown record type `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BuildingType {
    #[serde(rename = "single-family residential")]
    SingleFamilyResidential,
    #[serde(rename = "townhouse")]
    Townhouse,
    #[serde(rename = "mixed-use")]
    MixedUse,
    #[serde(rename = "multi-family residential")]
    MultiFamilyResidential,
    #[serde(rename = "industrial")]
    Industrial,
    #[serde(rename = "commercial")]
    Commercial,
}

impl BuildingType {
    pub const ALL: [BuildingType; 6] = [
        BuildingType::SingleFamilyResidential,
        BuildingType::MultiFamilyResidential,
        BuildingType::Townhouse,
        BuildingType::MixedUse,
        BuildingType::Commercial,
        BuildingType::Industrial,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildingType::SingleFamilyResidential => "single-family residential",
            BuildingType::Townhouse => "townhouse",
            BuildingType::MixedUse => "mixed-use",
            BuildingType::MultiFamilyResidential => "multi-family residential",
            BuildingType::Industrial => "industrial",
            BuildingType::Commercial => "commercial",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZoningStatus {
    #[serde(rename = "applied")]
    Applied,
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "public hearing")]
    PublicHearing,
    #[serde(rename = "approved")]
    Approved,
    #[serde(rename = "denied")]
    Denied,
    #[serde(rename = "withdrawn")]
    Withdrawn,
}

impl ZoningStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoningStatus::Applied => "applied",
            ZoningStatus::Pending => "pending",
            ZoningStatus::PublicHearing => "public hearing",
            ZoningStatus::Approved => "approved",
            ZoningStatus::Denied => "denied",
            ZoningStatus::Withdrawn => "withdrawn",
        }
    }
}

impl fmt::Display for ZoningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ZoningStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "applied" => Ok(ZoningStatus::Applied),
            "pending" => Ok(ZoningStatus::Pending),
            "public hearing" | "public-hearing" | "publichearing" => Ok(ZoningStatus::PublicHearing),
            "approved" => Ok(ZoningStatus::Approved),
            "denied" => Ok(ZoningStatus::Denied),
            "withdrawn" => Ok(ZoningStatus::Withdrawn),
            other => Err(format!("unknown status `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Stats {
    #[serde(deserialize_with = "lenient_number")]
    pub buildings: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub stratas: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub rentals: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub hotels: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub fsr: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub height: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub storeys: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Zoning {
    #[serde(deserialize_with = "lenient")]
    pub previous_zoning_code: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub previous_zoning_description: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub new_zoning_code: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub new_zoning_description: Option<String>,
}

/// Milestone dates, each a `YYYY-MM-DD` string when known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecordDates {
    #[serde(deserialize_with = "lenient")]
    pub applied_date: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub public_hearing_date: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub approval_date: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub denial_date: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub withdrawn_date: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DateField {
    AppliedDate,
    PublicHearingDate,
    ApprovalDate,
    DenialDate,
    WithdrawnDate,
}

impl RecordDates {
    pub fn get(&self, field: DateField) -> Option<&str> {
        let value = match field {
            DateField::AppliedDate => &self.applied_date,
            DateField::PublicHearingDate => &self.public_hearing_date,
            DateField::ApprovalDate => &self.approval_date,
            DateField::DenialDate => &self.denial_date,
            DateField::WithdrawnDate => &self.withdrawn_date,
        };
        value.as_deref()
    }

    pub fn latest(&self) -> Option<NaiveDate> {
        [
            &self.applied_date,
            &self.public_hearing_date,
            &self.approval_date,
            &self.denial_date,
            &self.withdrawn_date,
        ]
        .into_iter()
        .filter_map(|d| d.as_deref().and_then(parse_day))
        .max()
    }
}

/// One provenance entry: the text and source of a single observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSummary {
    pub summary: String,
    pub date: String,
    pub status: ZoningStatus,
    #[serde(default)]
    pub report_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportUrl {
    #[serde(default)]
    pub title: String,
    pub url: String,
    pub date: String,
    pub status: ZoningStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinutesUrl {
    pub url: String,
    pub date: String,
    pub status: ZoningStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// One reconciled planning application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub city: String,
    pub metro_city: String,
    #[serde(default)]
    pub application_id: Option<String>,
    pub address: String,
    #[serde(default)]
    pub applicant: Option<String>,
    #[serde(default)]
    pub behalf: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub building_type: Option<BuildingType>,
    #[serde(default)]
    pub stats: Stats,
    #[serde(default)]
    pub zoning: Zoning,
    pub status: ZoningStatus,
    #[serde(default)]
    pub dates: RecordDates,
    #[serde(default)]
    pub raw_summaries: Vec<RawSummary>,
    #[serde(default)]
    pub report_urls: Vec<ReportUrl>,
    #[serde(default)]
    pub minutes_urls: Vec<MinutesUrl>,
    #[serde(default)]
    pub location: Option<Location>,
    pub create_date: NaiveDate,
    pub update_date: NaiveDate,
}

/// An incoming observation with any subset of record fields populated.
///
/// Extractor output is loosely typed, so a malformed field deserializes to `None` and a
/// malformed provenance entry is dropped, instead of failing the whole observation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PartialRecord {
    #[serde(deserialize_with = "lenient")]
    pub id: Option<Uuid>,
    #[serde(rename = "type", deserialize_with = "lenient")]
    pub record_type: Option<RecordType>,
    pub city: Option<String>,
    pub metro_city: Option<String>,
    pub application_id: Option<String>,
    pub address: Option<String>,
    pub applicant: Option<String>,
    pub behalf: Option<String>,
    pub description: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub building_type: Option<BuildingType>,
    #[serde(deserialize_with = "lenient")]
    pub stats: Option<Stats>,
    #[serde(deserialize_with = "lenient")]
    pub zoning: Option<Zoning>,
    #[serde(deserialize_with = "lenient")]
    pub status: Option<ZoningStatus>,
    #[serde(deserialize_with = "lenient")]
    pub dates: Option<RecordDates>,
    #[serde(deserialize_with = "lenient_list")]
    pub raw_summaries: Option<Vec<RawSummary>>,
    #[serde(deserialize_with = "lenient_list")]
    pub report_urls: Option<Vec<ReportUrl>>,
    #[serde(deserialize_with = "lenient_list")]
    pub minutes_urls: Option<Vec<MinutesUrl>>,
    #[serde(deserialize_with = "lenient")]
    pub location: Option<Location>,
    #[serde(deserialize_with = "lenient")]
    pub create_date: Option<NaiveDate>,
    #[serde(deserialize_with = "lenient")]
    pub update_date: Option<NaiveDate>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

/// Keep the list elements that parse and drop the rest.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Array(items)) => Some(
            items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
        ),
        _ => None,
    })
}

/// Numbers, or strings holding a number like `"3"` or `" 4.5 "`.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => {
            s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
        }
        _ => None,
    })
}

impl Record {
    /// Build a fully-defaulted record, failing only when an identity field is missing.
    pub fn new(partial: PartialRecord, today: NaiveDate) -> Result<Self, ValidationError> {
        let record_type = partial
            .record_type
            .ok_or(ValidationError::MissingField("type"))?;
        let city = required(partial.city, "city")?;
        let metro_city = required(partial.metro_city, "metroCity")?;
        let address = required(partial.address, "address")?;
        let status = partial.status.ok_or(ValidationError::MissingField("status"))?;

        let create_date = partial.create_date.unwrap_or(today);
        let update_date = partial.update_date.unwrap_or(today).max(create_date);

        Ok(Self {
            id: partial.id.unwrap_or_else(Uuid::new_v4),
            record_type,
            city,
            metro_city,
            application_id: optional(partial.application_id),
            address,
            applicant: optional(partial.applicant),
            behalf: optional(partial.behalf),
            description: partial
                .description
                .as_deref()
                .map(clean_text)
                .unwrap_or_default(),
            building_type: partial.building_type,
            stats: partial.stats.unwrap_or_default(),
            zoning: normalize_zoning(partial.zoning.unwrap_or_default()),
            status,
            dates: normalize_dates(partial.dates.unwrap_or_default()),
            raw_summaries: partial.raw_summaries.unwrap_or_default(),
            report_urls: partial.report_urls.unwrap_or_default(),
            minutes_urls: partial.minutes_urls.unwrap_or_default(),
            location: partial.location,
            create_date,
            update_date,
        })
    }

    /// The observation view of this record, suitable for feeding back into an upsert.
    pub fn into_partial(self) -> PartialRecord {
        PartialRecord {
            id: Some(self.id),
            record_type: Some(self.record_type),
            city: Some(self.city),
            metro_city: Some(self.metro_city),
            application_id: self.application_id,
            address: Some(self.address),
            applicant: self.applicant,
            behalf: self.behalf,
            description: Some(self.description),
            building_type: self.building_type,
            stats: Some(self.stats),
            zoning: Some(self.zoning),
            status: Some(self.status),
            dates: Some(self.dates),
            raw_summaries: Some(self.raw_summaries),
            report_urls: Some(self.report_urls),
            minutes_urls: Some(self.minutes_urls),
            location: self.location,
            create_date: Some(self.create_date),
            update_date: Some(self.update_date),
        }
    }

    /// Most recent date attached to the application, falling back to `update_date`.
    pub fn latest_activity(&self) -> NaiveDate {
        let provenance = self
            .raw_summaries
            .iter()
            .map(|s| s.date.as_str())
            .chain(self.report_urls.iter().map(|r| r.date.as_str()))
            .chain(self.minutes_urls.iter().map(|m| m.date.as_str()))
            .filter_map(parse_day);

        self.dates
            .latest()
            .into_iter()
            .chain(provenance)
            .max()
            .unwrap_or(self.update_date)
    }
}

/// Parse the leading `YYYY-MM-DD` of a date or timestamp string.
pub fn parse_day(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    let day = value.get(..10).unwrap_or(value);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Trim each line, collapse runs of whitespace and drop blank lines.
pub fn clean_text(content: &str) -> String {
    content
        .replace("\r\n", "\n")
        .replace("\\t", " ")
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ValidationError> {
    optional(value).ok_or(ValidationError::MissingField(field))
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn normalize_zoning(zoning: Zoning) -> Zoning {
    Zoning {
        previous_zoning_code: optional(zoning.previous_zoning_code),
        previous_zoning_description: optional(zoning.previous_zoning_description),
        new_zoning_code: optional(zoning.new_zoning_code),
        new_zoning_description: optional(zoning.new_zoning_description),
    }
}

fn normalize_dates(dates: RecordDates) -> RecordDates {
    RecordDates {
        applied_date: optional(dates.applied_date),
        public_hearing_date: optional(dates.public_hearing_date),
        approval_date: optional(dates.approval_date),
        denial_date: optional(dates.denial_date),
        withdrawn_date: optional(dates.withdrawn_date),
    }
}
