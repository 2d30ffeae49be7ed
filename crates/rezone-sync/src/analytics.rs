use std::collections::{BTreeMap, BTreeSet};

use rezone_core::{BuildingType, DateField, Record, ZoningStatus};
use serde::Serialize;

pub const OTHER: &str = "other";
pub const TOTAL: &str = "total";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct YearBreakdown {
    pub year: String,
    pub data: BTreeMap<String, BTreeMap<String, usize>>,
}

/// The dated milestone a status refers to; `pending` has none.
pub fn date_field_for_status(status: ZoningStatus) -> Option<DateField> {
    match status {
        ZoningStatus::Applied => Some(DateField::AppliedDate),
        ZoningStatus::PublicHearing => Some(DateField::PublicHearingDate),
        ZoningStatus::Approved => Some(DateField::ApprovalDate),
        ZoningStatus::Denied => Some(DateField::DenialDate),
        ZoningStatus::Withdrawn => Some(DateField::WithdrawnDate),
        ZoningStatus::Pending => None,
    }
}

fn year_of(record: &Record, field: DateField) -> Option<i32> {
    record.dates.get(field)?.get(..4)?.parse().ok()
}

fn empty_counts() -> BTreeMap<String, usize> {
    BuildingType::ALL
        .iter()
        .map(|t| t.as_str())
        .chain([OTHER, TOTAL])
        .map(|key| (key.to_string(), 0))
        .collect()
}

/// Counts records currently at `status`, bucketed by the year of `date_field`.
///
/// Years run contiguously from the earliest to the latest dated record, and every city seen in
/// `records` appears in every year with every building type key, even when all counts are zero.
/// Records with no building type are left out of every count, including `total`; the `other`
/// key is kept for a stable shape.
pub fn building_type_breakdown(
    records: &[Record],
    date_field: DateField,
    status: ZoningStatus,
) -> Vec<YearBreakdown> {
    let cities = records
        .iter()
        .map(|r| r.city.clone())
        .collect::<BTreeSet<_>>();
    let years = records
        .iter()
        .filter_map(|r| year_of(r, date_field))
        .collect::<BTreeSet<_>>();
    let (Some(&first), Some(&last)) = (years.first(), years.last()) else {
        return Vec::new();
    };

    (first..=last)
        .map(|year| {
            let mut data = cities
                .iter()
                .map(|city| (city.clone(), empty_counts()))
                .collect::<BTreeMap<_, _>>();
            for record in records
                .iter()
                .filter(|r| r.status == status && year_of(r, date_field) == Some(year))
            {
                let Some(building_type) = record.building_type else {
                    continue;
                };
                let Some(counts) = data.get_mut(&record.city) else {
                    continue;
                };
                *counts.entry(building_type.as_str().to_string()).or_default() += 1;
                *counts.entry(TOTAL.to_string()).or_default() += 1;
            }
            YearBreakdown {
                year: year.to_string(),
                data,
            }
        })
        .collect()
}
