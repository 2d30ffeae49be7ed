//! Field-level merge of a matched `(existing, incoming)` pair.

use std::collections::HashSet;
use std::hash::Hash;

use chrono::NaiveDate;

use crate::{MinutesUrl, RawSummary, Record, RecordDates, ReportUrl, Stats, Zoning};

/// Combine a stored record with a newer observation of the same application.
///
/// Identity (`id`, `create_date`), scope (`record_type`, `city`) and `location` always
/// come from `existing`. Every other field takes the incoming value when it carries one.
/// Provenance lists are unioned. `update_date` advances to `today` and never moves back.
pub fn merge_records(existing: &Record, incoming: Record, today: NaiveDate) -> Record {
    Record {
        id: existing.id,
        record_type: existing.record_type,
        city: existing.city.clone(),
        metro_city: prefer_string(incoming.metro_city, &existing.metro_city),
        application_id: prefer_text(incoming.application_id, &existing.application_id),
        address: prefer_string(incoming.address, &existing.address),
        applicant: prefer_text(incoming.applicant, &existing.applicant),
        behalf: prefer_text(incoming.behalf, &existing.behalf),
        description: prefer_string(incoming.description, &existing.description),
        building_type: incoming.building_type.or(existing.building_type),
        stats: merge_stats(incoming.stats, &existing.stats),
        zoning: merge_zoning(incoming.zoning, &existing.zoning),
        status: incoming.status,
        dates: merge_dates(incoming.dates, &existing.dates),
        raw_summaries: union_by(&existing.raw_summaries, incoming.raw_summaries, summary_key),
        report_urls: union_by(&existing.report_urls, incoming.report_urls, report_key),
        minutes_urls: union_by(&existing.minutes_urls, incoming.minutes_urls, minutes_key),
        location: existing.location,
        create_date: existing.create_date,
        update_date: existing.update_date.max(today),
    }
}

fn prefer_string(incoming: String, existing: &str) -> String {
    if incoming.trim().is_empty() {
        existing.to_string()
    } else {
        incoming
    }
}

fn prefer_text(incoming: Option<String>, existing: &Option<String>) -> Option<String> {
    incoming
        .filter(|v| !v.trim().is_empty())
        .or_else(|| existing.clone())
}

fn merge_stats(incoming: Stats, existing: &Stats) -> Stats {
    Stats {
        buildings: incoming.buildings.or(existing.buildings),
        stratas: incoming.stratas.or(existing.stratas),
        rentals: incoming.rentals.or(existing.rentals),
        hotels: incoming.hotels.or(existing.hotels),
        fsr: incoming.fsr.or(existing.fsr),
        height: incoming.height.or(existing.height),
        storeys: incoming.storeys.or(existing.storeys),
    }
}

fn merge_zoning(incoming: Zoning, existing: &Zoning) -> Zoning {
    Zoning {
        previous_zoning_code: prefer_text(
            incoming.previous_zoning_code,
            &existing.previous_zoning_code,
        ),
        previous_zoning_description: prefer_text(
            incoming.previous_zoning_description,
            &existing.previous_zoning_description,
        ),
        new_zoning_code: prefer_text(incoming.new_zoning_code, &existing.new_zoning_code),
        new_zoning_description: prefer_text(
            incoming.new_zoning_description,
            &existing.new_zoning_description,
        ),
    }
}

fn merge_dates(incoming: RecordDates, existing: &RecordDates) -> RecordDates {
    RecordDates {
        applied_date: prefer_text(incoming.applied_date, &existing.applied_date),
        public_hearing_date: prefer_text(
            incoming.public_hearing_date,
            &existing.public_hearing_date,
        ),
        approval_date: prefer_text(incoming.approval_date, &existing.approval_date),
        denial_date: prefer_text(incoming.denial_date, &existing.denial_date),
        withdrawn_date: prefer_text(incoming.withdrawn_date, &existing.withdrawn_date),
    }
}

#[derive(PartialEq, Eq, Hash)]
enum SummaryKey {
    Url { date: String, url: String },
    Text { date: String, summary: String },
}

// Summaries without a report url are keyed on their text instead.
fn summary_key(s: &RawSummary) -> SummaryKey {
    match &s.report_url {
        Some(url) => SummaryKey::Url {
            date: s.date.clone(),
            url: url.clone(),
        },
        None => SummaryKey::Text {
            date: s.date.clone(),
            summary: s.summary.clone(),
        },
    }
}

fn report_key(r: &ReportUrl) -> (String, String) {
    (r.date.clone(), r.url.clone())
}

fn minutes_key(m: &MinutesUrl) -> (String, String) {
    (m.date.clone(), m.url.clone())
}

fn union_by<T, K>(existing: &[T], incoming: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T>
where
    T: Clone,
    K: Eq + Hash,
{
    let mut seen = HashSet::with_capacity(existing.len() + incoming.len());
    existing
        .iter()
        .cloned()
        .chain(incoming)
        .filter(|item| seen.insert(key(item)))
        .collect()
}
