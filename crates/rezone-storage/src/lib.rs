//! Tier-partitioned durable record store with atomic whole-document writes.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rezone_core::{
    merge_records, IdentityMatcher, MatchRule, NearMiss, PartialRecord, Record, RecordType,
    ValidationError,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

mod query;

pub use query::{Page, RecordsQuery};

pub const CRATE_NAME: &str = "rezone-storage";

/// An isolated, independently persisted collection of records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Draft,
    Final,
    Test,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Draft => "draft",
            Tier::Final => "final",
            Tier::Test => "test",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.as_str())
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(Tier::Draft),
            "final" => Ok(Tier::Final),
            "test" => Ok(Tier::Test),
            other => Err(format!("unknown tier `{other}`")),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record {id} not found in {tier} tier")]
    NotFound { tier: Tier, id: Uuid },
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt record document {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("encoding records: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeFilter {
    #[default]
    All,
    Only(RecordType),
}

impl TypeFilter {
    fn accepts(&self, record: &Record) -> bool {
        match self {
            TypeFilter::All => true,
            TypeFilter::Only(t) => record.record_type == *t,
        }
    }
}

impl From<RecordType> for TypeFilter {
    fn from(value: RecordType) -> Self {
        TypeFilter::Only(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CityFilter {
    One(String),
    Any(Vec<String>),
}

impl CityFilter {
    /// `"Burnaby"` → one city, `"Burnaby,Surrey"` → a set; blank input → no filter.
    pub fn parse(raw: &str) -> Option<Self> {
        let cities = raw
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        match cities.len() {
            0 => None,
            1 => cities.into_iter().next().map(CityFilter::One),
            _ => Some(CityFilter::Any(cities)),
        }
    }

    fn accepts(&self, city: &str) -> bool {
        match self {
            CityFilter::One(c) => c == city,
            CityFilter::Any(cs) => cs.iter().any(|c| c == city),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordsFilter {
    pub city: Option<CityFilter>,
    pub id: Option<Uuid>,
}

impl RecordsFilter {
    pub fn city(city: impl Into<String>) -> Self {
        Self {
            city: Some(CityFilter::One(city.into())),
            id: None,
        }
    }

    pub fn id(id: Uuid) -> Self {
        Self {
            city: None,
            id: Some(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordsPage {
    pub total: usize,
    pub data: Vec<Record>,
}

/// Type first, then city, then id.
pub fn filter_records(
    records: Vec<Record>,
    type_filter: TypeFilter,
    filter: &RecordsFilter,
) -> Vec<Record> {
    records
        .into_iter()
        .filter(|r| type_filter.accepts(r))
        .filter(|r| filter.city.as_ref().map_or(true, |c| c.accepts(&r.city)))
        .filter(|r| filter.id.map_or(true, |id| r.id == id))
        .collect()
}

/// Display order: most recent activity first, then most recently updated, then id.
pub fn display_order(a: &Record, b: &Record) -> Ordering {
    b.latest_activity()
        .cmp(&a.latest_activity())
        .then_with(|| b.update_date.cmp(&a.update_date))
        .then_with(|| a.id.cmp(&b.id))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedRecord {
    pub input_index: usize,
    pub id: Uuid,
    pub rule: MatchRule,
    pub ambiguous: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertFailure {
    pub input_index: usize,
    pub error: String,
}

/// A newly created record that closely resembles an existing one; never merged automatically.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewItem {
    pub input_index: usize,
    pub created_id: Uuid,
    pub near_miss: NearMiss,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertReport {
    pub created: Vec<Uuid>,
    pub merged: Vec<MergedRecord>,
    pub failures: Vec<UpsertFailure>,
    pub review: Vec<ReviewItem>,
}

impl UpsertReport {
    pub fn changed(&self) -> usize {
        self.created.len() + self.merged.len()
    }

    pub fn absorb(&mut self, other: UpsertReport) {
        self.created.extend(other.created);
        self.merged.extend(other.merged);
        self.failures.extend(other.failures);
        self.review.extend(other.review);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInEntry {
    pub tier: Tier,
    pub snapshot_path: String,
    pub sha256: String,
    pub records: usize,
    pub checked_in_at: DateTime<Utc>,
    pub promoted_to: Option<Tier>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInManifest {
    pub entries: Vec<CheckInEntry>,
}

fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}

/// One tier's record collection, stored as `<root>/<tier>.json`.
///
/// Every mutation reads the whole document, changes it in memory and atomically replaces
/// the file. Writers are expected to take turns; nothing here locks.
#[derive(Debug, Clone)]
pub struct RecordsRepository {
    root: PathBuf,
    tier: Tier,
    matcher: IdentityMatcher,
    today: fn() -> NaiveDate,
}

impl RecordsRepository {
    pub fn new(root: impl Into<PathBuf>, tier: Tier) -> Self {
        Self {
            root: root.into(),
            tier,
            matcher: IdentityMatcher::default(),
            today: today_utc,
        }
    }

    pub fn with_matcher(mut self, matcher: IdentityMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    /// Override the clock used for `create_date`/`update_date`.
    pub fn with_today(mut self, today: fn() -> NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn today(&self) -> NaiveDate {
        (self.today)()
    }

    pub fn path(&self) -> PathBuf {
        self.root.join(self.tier.file_name())
    }

    /// Read the whole collection; a missing document is an empty tier.
    pub async fn load(&self) -> StoreResult<Vec<Record>> {
        let path = self.path();
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_err(&path)(err)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt { path, source })
    }

    async fn persist(&self, records: &[Record]) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(records)?;
        write_atomic(&self.path(), &bytes).await?;
        debug!(tier = %self.tier, records = records.len(), "persisted tier");
        Ok(())
    }

    pub async fn get_records(
        &self,
        type_filter: TypeFilter,
        filter: &RecordsFilter,
    ) -> StoreResult<RecordsPage> {
        let data = filter_records(self.load().await?, type_filter, filter);
        Ok(RecordsPage {
            total: data.len(),
            data,
        })
    }

    /// Append a fully-formed record without matching.
    pub async fn create_record(&self, record: Record) -> StoreResult<()> {
        let mut records = self.load().await?;
        records.push(record);
        self.persist(&records).await
    }

    /// Match each observation against the current collection, merging on a hit and
    /// creating a record on a miss.
    ///
    /// Observations are processed in input order, so later ones see earlier ones. A bad
    /// observation is recorded in the report and skipped; the batch is written once at
    /// the end, and an I/O failure leaves the previous document untouched.
    pub async fn upsert_records(
        &self,
        record_type: RecordType,
        partials: Vec<PartialRecord>,
    ) -> StoreResult<UpsertReport> {
        let span = info_span!(
            "upsert_records",
            tier = %self.tier,
            %record_type,
            batch = partials.len()
        );
        async move {
            let today = self.today();
            let mut records = self.load().await?;
            let mut report = UpsertReport::default();

            for (input_index, partial) in partials.into_iter().enumerate() {
                let incoming = match prepare_incoming(record_type, partial, today) {
                    Ok(record) => record,
                    Err(err) => {
                        warn!(input_index, error = %err, "skipping observation");
                        report.failures.push(UpsertFailure {
                            input_index,
                            error: err.to_string(),
                        });
                        continue;
                    }
                };

                match self.matcher.find_match(&incoming, &records) {
                    Some(outcome) => {
                        let merged = merge_records(&records[outcome.index], incoming, today);
                        debug!(id = %merged.id, rule = ?outcome.rule, "merged observation");
                        report.merged.push(MergedRecord {
                            input_index,
                            id: merged.id,
                            rule: outcome.rule,
                            ambiguous: outcome.ambiguous,
                        });
                        records[outcome.index] = merged;
                    }
                    None => {
                        let mut created = incoming;
                        if records.iter().any(|r| r.id == created.id) {
                            warn!(id = %created.id, "observation reused a stored id; assigning a fresh one");
                            created.id = Uuid::new_v4();
                        }
                        for near_miss in self.matcher.near_misses(&created, &records) {
                            report.review.push(ReviewItem {
                                input_index,
                                created_id: created.id,
                                near_miss,
                            });
                        }
                        report.created.push(created.id);
                        records.push(created);
                    }
                }
            }

            if report.changed() > 0 {
                self.persist(&records).await?;
            }
            info!(
                created = report.created.len(),
                merged = report.merged.len(),
                failed = report.failures.len(),
                review = report.review.len(),
                "upsert complete"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Remove exactly one record, returning it.
    pub async fn delete_record(&self, id: Uuid) -> StoreResult<Record> {
        let mut records = self.load().await?;
        let idx = records
            .iter()
            .position(|r| r.id == id)
            .ok_or(StoreError::NotFound {
                tier: self.tier,
                id,
            })?;
        let removed = records.remove(idx);
        self.persist(&records).await?;
        info!(tier = %self.tier, %id, "deleted record");
        Ok(removed)
    }

    pub async fn dangerously_replace_all_records(&self, records: Vec<Record>) -> StoreResult<()> {
        warn!(tier = %self.tier, records = records.len(), "replacing entire tier");
        self.persist(&records).await
    }

    /// Swap out every record of one `(type, city)` scope; returns how many were removed.
    pub async fn dangerously_replace_records_for_city(
        &self,
        record_type: RecordType,
        city: &str,
        replacements: Vec<Record>,
    ) -> StoreResult<usize> {
        let mut records = self.load().await?;
        let before = records.len();
        records.retain(|r| !(r.record_type == record_type && r.city == city));
        let removed = before - records.len();
        records.extend(replacements);
        self.persist(&records).await?;
        warn!(tier = %self.tier, %record_type, city, removed, "replaced city records");
        Ok(removed)
    }

    pub async fn reorder_records(&self) -> StoreResult<()> {
        let mut records = self.load().await?;
        records.sort_by(display_order);
        self.persist(&records).await
    }

    /// Snapshot this tier under `snapshots/<tier>/` and log it in `snapshots/manifest.json`.
    ///
    /// Checking in the draft tier also replaces the final tier with the same collection.
    pub async fn final_check_in(&self) -> StoreResult<CheckInEntry> {
        let records = self.load().await?;
        let bytes = serde_json::to_vec_pretty(&records)?;
        let sha256 = sha256_hex(&bytes);
        let checked_in_at = Utc::now();

        let relative_path = PathBuf::from("snapshots").join(self.tier.as_str()).join(format!(
            "{}_{}.json",
            checked_in_at.format("%Y%m%d_%H%M%S"),
            &sha256[..12]
        ));
        write_atomic(&self.root.join(&relative_path), &bytes).await?;

        let promoted_to = if self.tier == Tier::Draft {
            write_atomic(&self.root.join(Tier::Final.file_name()), &bytes).await?;
            Some(Tier::Final)
        } else {
            None
        };

        let entry = CheckInEntry {
            tier: self.tier,
            snapshot_path: relative_path.display().to_string(),
            sha256,
            records: records.len(),
            checked_in_at,
            promoted_to,
        };

        let manifest_path = self.root.join("snapshots").join("manifest.json");
        let mut manifest = match fs::read(&manifest_path).await {
            Ok(bytes) => serde_json::from_slice::<CheckInManifest>(&bytes).map_err(|source| {
                StoreError::Corrupt {
                    path: manifest_path.clone(),
                    source,
                }
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => CheckInManifest::default(),
            Err(err) => return Err(io_err(&manifest_path)(err)),
        };
        manifest.entries.push(entry.clone());
        write_atomic(&manifest_path, &serde_json::to_vec_pretty(&manifest)?).await?;

        info!(
            tier = %self.tier,
            records = entry.records,
            snapshot = %entry.snapshot_path,
            promoted = ?entry.promoted_to,
            "checked in tier"
        );
        Ok(entry)
    }
}

fn prepare_incoming(
    record_type: RecordType,
    mut partial: PartialRecord,
    today: NaiveDate,
) -> Result<Record, ValidationError> {
    match partial.record_type {
        Some(found) if found != record_type => {
            return Err(ValidationError::TypeMismatch {
                expected: record_type,
                found,
            })
        }
        _ => partial.record_type = Some(record_type),
    }
    Record::new(partial, today)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Write through a sibling temp file and rename it over `path`.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).await.map_err(io_err(parent))?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let write = async {
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok::<(), std::io::Error>(())
    };
    if let Err(err) = write.await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(io_err(&temp_path)(err));
    }

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(io_err(path)(err));
    }
    sync_dir(parent).await
}

/// Flush a directory entry change (the rename) to disk.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> StoreResult<()> {
    let handle = fs::File::open(dir).await.map_err(io_err(dir))?;
    handle.sync_all().await.map_err(io_err(dir))
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> StoreResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rezone_core::ZoningStatus;
    use tempfile::tempdir;

    fn fixed_day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn partial(city: &str, address: &str) -> PartialRecord {
        PartialRecord {
            city: Some(city.into()),
            metro_city: Some("Metro Vancouver".into()),
            address: Some(address.into()),
            status: Some(ZoningStatus::Applied),
            ..Default::default()
        }
    }

    #[test]
    fn city_filter_parses_lists() {
        assert_eq!(CityFilter::parse(" "), None);
        assert_eq!(
            CityFilter::parse("Burnaby"),
            Some(CityFilter::One("Burnaby".into()))
        );
        assert_eq!(
            CityFilter::parse("Burnaby, Surrey,"),
            Some(CityFilter::Any(vec!["Burnaby".into(), "Surrey".into()]))
        );
    }

    #[tokio::test]
    async fn missing_document_is_an_empty_tier() {
        let dir = tempdir().expect("tempdir");
        let repo = RecordsRepository::new(dir.path(), Tier::Test);
        let page = repo
            .get_records(TypeFilter::All, &RecordsFilter::default())
            .await
            .expect("load");
        assert_eq!(page.total, 0);
        assert!(!repo.path().exists());
    }

    #[tokio::test]
    async fn tiers_are_independent() {
        let dir = tempdir().expect("tempdir");
        let draft = RecordsRepository::new(dir.path(), Tier::Draft).with_today(fixed_day);
        let test = RecordsRepository::new(dir.path(), Tier::Test).with_today(fixed_day);

        draft
            .upsert_records(RecordType::Rezoning, vec![partial("Surrey", "1 Main St")])
            .await
            .expect("upsert");

        assert_eq!(draft.load().await.expect("draft").len(), 1);
        assert!(test.load().await.expect("test").is_empty());
    }

    #[tokio::test]
    async fn failed_observations_do_not_abort_the_batch() {
        let dir = tempdir().expect("tempdir");
        let repo = RecordsRepository::new(dir.path(), Tier::Test).with_today(fixed_day);

        let mut wrong_type = partial("Surrey", "2 Main St");
        wrong_type.record_type = Some(RecordType::DevelopmentPermit);
        let mut no_address = partial("Surrey", "");
        no_address.address = None;

        let report = repo
            .upsert_records(
                RecordType::Rezoning,
                vec![wrong_type, partial("Surrey", "1 Main St"), no_address],
            )
            .await
            .expect("upsert");

        assert_eq!(report.created.len(), 1);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].input_index, 0);
        assert!(report.failures[0].error.contains("mismatch"));
        assert_eq!(report.failures[1].input_index, 2);
        assert_eq!(repo.load().await.expect("load").len(), 1);
    }

    #[tokio::test]
    async fn observations_in_one_batch_merge_with_each_other() {
        let dir = tempdir().expect("tempdir");
        let repo = RecordsRepository::new(dir.path(), Tier::Test).with_today(fixed_day);

        let mut second = partial("Burnaby", "4567 LOUGHEED HWY.");
        second.description = Some("Second look".into());
        let report = repo
            .upsert_records(
                RecordType::Rezoning,
                vec![partial("Burnaby", "4567 Lougheed Hwy"), second],
            )
            .await
            .expect("upsert");

        assert_eq!(report.created.len(), 1);
        assert_eq!(report.merged.len(), 1);
        assert_eq!(report.merged[0].rule, MatchRule::Address);
        let records = repo.load().await.expect("load");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].description, "Second look");
    }

    #[tokio::test]
    async fn near_misses_are_listed_for_review() {
        let dir = tempdir().expect("tempdir");
        let repo = RecordsRepository::new(dir.path(), Tier::Test).with_today(fixed_day);
        let report = repo
            .upsert_records(
                RecordType::Rezoning,
                vec![
                    partial("Surrey", "13450 104 Ave"),
                    partial("Surrey", "13450 104th Ave"),
                ],
            )
            .await
            .expect("upsert");

        assert_eq!(report.created.len(), 2);
        assert_eq!(report.review.len(), 1);
        assert_eq!(report.review[0].input_index, 1);
        assert_eq!(report.review[0].near_miss.candidate_id, report.created[0]);
    }

    #[tokio::test]
    async fn reorder_puts_recent_activity_first() {
        let dir = tempdir().expect("tempdir");
        let repo = RecordsRepository::new(dir.path(), Tier::Test).with_today(fixed_day);

        let mut old = partial("Richmond", "1 Old Rd");
        old.dates = Some(rezone_core::RecordDates {
            applied_date: Some("2019-01-01".into()),
            ..Default::default()
        });
        let mut recent = partial("Richmond", "2 New Rd");
        recent.dates = Some(rezone_core::RecordDates {
            approval_date: Some("2023-11-30".into()),
            ..Default::default()
        });
        repo.upsert_records(RecordType::Rezoning, vec![old, recent])
            .await
            .expect("upsert");

        repo.reorder_records().await.expect("reorder");
        let records = repo.load().await.expect("load");
        assert_eq!(records[0].address, "2 New Rd");
        assert_eq!(records[1].address, "1 Old Rd");
    }

    #[tokio::test]
    async fn corrupt_document_is_reported_and_left_alone() {
        let dir = tempdir().expect("tempdir");
        let repo = RecordsRepository::new(dir.path(), Tier::Test);
        std::fs::write(repo.path(), b"[{not json").expect("seed");

        let err = repo
            .upsert_records(RecordType::Rezoning, vec![partial("Surrey", "1 Main St")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
        assert_eq!(std::fs::read(repo.path()).expect("read"), b"[{not json");
    }

    #[tokio::test]
    async fn failed_replace_keeps_previous_bytes_and_no_temp_files() {
        let dir = tempdir().expect("tempdir");
        // A non-empty directory at the target makes the final rename fail.
        let target = dir.path().join("test.json");
        std::fs::create_dir(&target).expect("dir");
        std::fs::write(target.join("previous.json"), b"[]").expect("seed");

        let err = write_atomic(&target, b"[{\"replacement\": true}]")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
        assert_eq!(
            std::fs::read(target.join("previous.json")).expect("read"),
            b"[]"
        );
        let leftovers = std::fs::read_dir(dir.path())
            .expect("list")
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn failed_persist_leaves_the_tier_document_intact() {
        let dir = tempdir().expect("tempdir");
        let repo = RecordsRepository::new(dir.path(), Tier::Draft).with_today(fixed_day);
        repo.upsert_records(RecordType::Rezoning, vec![partial("Delta", "1 River Rd")])
            .await
            .expect("seed");
        let before = std::fs::read(repo.path()).expect("read");

        // Promotion to final cannot replace a non-empty directory.
        let final_path = dir.path().join(Tier::Final.file_name());
        std::fs::create_dir(&final_path).expect("dir");
        std::fs::write(final_path.join("keep"), b"x").expect("seed");

        let err = repo.final_check_in().await.unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
        assert_eq!(std::fs::read(repo.path()).expect("read"), before);
        assert_eq!(std::fs::read(final_path.join("keep")).expect("read"), b"x");
        assert!(!dir.path().join("snapshots").join("manifest.json").exists());
    }

    #[tokio::test]
    async fn draft_check_in_promotes_to_final() {
        let dir = tempdir().expect("tempdir");
        let draft = RecordsRepository::new(dir.path(), Tier::Draft).with_today(fixed_day);
        draft
            .upsert_records(RecordType::Rezoning, vec![partial("Surrey", "1 Main St")])
            .await
            .expect("upsert");

        let entry = draft.final_check_in().await.expect("check in");
        assert_eq!(entry.records, 1);
        assert_eq!(entry.promoted_to, Some(Tier::Final));
        assert!(dir.path().join(&entry.snapshot_path).exists());

        let snapshot = std::fs::read(dir.path().join(&entry.snapshot_path)).expect("snapshot");
        assert_eq!(sha256_hex(&snapshot), entry.sha256);

        let final_tier = RecordsRepository::new(dir.path(), Tier::Final);
        assert_eq!(final_tier.load().await.expect("final"), draft.load().await.expect("draft"));

        let manifest: CheckInManifest = serde_json::from_slice(
            &std::fs::read(dir.path().join("snapshots/manifest.json")).expect("manifest"),
        )
        .expect("parse manifest");
        assert_eq!(manifest.entries, vec![entry]);
    }

    #[tokio::test]
    async fn atomic_write_leaves_no_temp_files() {
        let dir = tempdir().expect("tempdir");
        let target = dir.path().join("nested").join("doc.json");
        write_atomic(&target, b"[]").await.expect("first");
        write_atomic(&target, b"[1]").await.expect("second");

        assert_eq!(std::fs::read(&target).expect("read"), b"[1]");
        let leftovers = std::fs::read_dir(dir.path().join("nested"))
            .expect("dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn artifact_hashing_is_stable() {
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
