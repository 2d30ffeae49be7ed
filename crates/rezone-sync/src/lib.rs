//! Batch ingestion: extraction bundles in, reconciled tier out.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rezone_core::{IdentityMatcher, Location, MatcherConfig, PartialRecord, RecordType};
use rezone_storage::{RecordsRepository, Tier, UpsertFailure, UpsertReport};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

mod analytics;

pub use analytics::{building_type_breakdown, date_field_for_status, YearBreakdown};

pub const CRATE_NAME: &str = "rezone-sync";

#[derive(Debug, Clone, Deserialize)]
pub struct CityRegistry {
    pub cities: Vec<CitySource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CitySource {
    pub city: String,
    pub metro_city: String,
    pub enabled: bool,
    #[serde(default = "all_record_types")]
    pub record_types: Vec<RecordType>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn all_record_types() -> Vec<RecordType> {
    RecordType::ALL.to_vec()
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub data_dir: PathBuf,
    pub tier: Tier,
    pub workspace_root: PathBuf,
    pub review_threshold: f64,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            data_dir: std::env::var("REZONE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./database")),
            tier: std::env::var("REZONE_TIER")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(Tier::Draft),
            workspace_root: std::env::var("REZONE_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            review_threshold: std::env::var("REZONE_REVIEW_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(MatcherConfig::default().review_threshold),
        }
    }

    pub fn repository(&self) -> RecordsRepository {
        self.repository_for(self.tier)
    }

    pub fn repository_for(&self, tier: Tier) -> RecordsRepository {
        RecordsRepository::new(&self.data_dir, tier).with_matcher(IdentityMatcher::new(
            MatcherConfig {
                review_threshold: self.review_threshold,
            },
        ))
    }
}

/// Output of one extractor run over one source document.
///
/// Bundle-level `city`, `metroCity` and `type` fill in records that omit them. Records stay
/// raw until [`ExtractionBundle::into_partials`] so one unreadable entry cannot sink the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExtractionBundle {
    pub city: Option<String>,
    pub metro_city: Option<String>,
    #[serde(rename = "type")]
    pub record_type: Option<RecordType>,
    pub source_url: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub records: Vec<serde_json::Value>,
}

impl ExtractionBundle {
    /// Convert each raw record on its own, in order, applying bundle defaults to those that parse.
    pub fn into_partials(self) -> Vec<Result<PartialRecord, serde_json::Error>> {
        let Self {
            city,
            metro_city,
            record_type,
            records,
            ..
        } = self;
        records
            .into_iter()
            .map(|raw| {
                let mut partial = serde_json::from_value::<PartialRecord>(raw)?;
                if partial.city.is_none() {
                    partial.city = city.clone();
                }
                if partial.metro_city.is_none() {
                    partial.metro_city = metro_city.clone();
                }
                if partial.record_type.is_none() {
                    partial.record_type = record_type;
                }
                Ok(partial)
            })
            .collect()
    }
}

pub fn load_extraction_bundle(path: impl AsRef<Path>) -> Result<ExtractionBundle> {
    let path = path.as_ref();
    let data =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

/// Lowercase, with runs of anything but letters and digits turned into a single `-`.
pub fn city_slug(city: &str) -> String {
    city.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[derive(Debug, Clone, Serialize)]
pub struct BundleOutcome {
    pub city: String,
    pub record_type: RecordType,
    pub path: String,
    pub report: UpsertReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedBundle {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tier: Tier,
    pub enabled_cities: usize,
    pub bundles: usize,
    pub skipped_bundles: usize,
    pub created: usize,
    pub merged: usize,
    pub failed: usize,
    pub review: usize,
    pub reports_dir: String,
}

pub struct SyncPipeline {
    config: SyncConfig,
    repository: RecordsRepository,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig) -> Self {
        let repository = config.repository();
        Self { config, repository }
    }

    pub fn with_repository(mut self, repository: RecordsRepository) -> Self {
        self.repository = repository;
        self
    }

    pub fn repository(&self) -> &RecordsRepository {
        &self.repository
    }

    pub async fn run_once(&self) -> Result<SyncRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let registry = self.load_city_registry().await?;
        let enabled = registry
            .cities
            .into_iter()
            .filter(|c| c.enabled)
            .collect::<Vec<_>>();

        let mut outcomes = Vec::new();
        let mut skipped = Vec::new();

        for source in &enabled {
            for &record_type in &source.record_types {
                for path in self.bundle_paths_for(source, record_type).await? {
                    let shown = path.display().to_string();
                    let mut bundle = match load_extraction_bundle(&path) {
                        Ok(bundle) => bundle,
                        Err(err) => {
                            let error = format!("{err:#}");
                            warn!(path = %shown, %error, "skipping bundle");
                            skipped.push(SkippedBundle {
                                path: shown,
                                error,
                            });
                            continue;
                        }
                    };
                    bundle.city.get_or_insert_with(|| source.city.clone());
                    bundle
                        .metro_city
                        .get_or_insert_with(|| source.metro_city.clone());
                    bundle.record_type.get_or_insert(record_type);

                    let report = self
                        .upsert_bundle(record_type, bundle)
                        .await
                        .with_context(|| format!("upserting {shown}"))?;
                    outcomes.push(BundleOutcome {
                        city: source.city.clone(),
                        record_type,
                        path: shown,
                        report,
                    });
                }
            }
        }

        if outcomes.iter().any(|o| o.report.changed() > 0) {
            self.repository
                .reorder_records()
                .await
                .context("reordering records")?;
        }

        let mut totals = UpsertReport::default();
        for outcome in &outcomes {
            totals.absorb(outcome.report.clone());
        }

        let finished_at = Utc::now();
        let mut summary = SyncRunSummary {
            run_id,
            started_at,
            finished_at,
            tier: self.repository.tier(),
            enabled_cities: enabled.len(),
            bundles: outcomes.len(),
            skipped_bundles: skipped.len(),
            created: totals.created.len(),
            merged: totals.merged.len(),
            failed: totals.failures.len(),
            review: totals.review.len(),
            reports_dir: String::new(),
        };
        let reports_dir = self.write_reports(&summary, &outcomes, &skipped).await?;
        summary.reports_dir = reports_dir.display().to_string();

        info!(
            %run_id,
            bundles = summary.bundles,
            created = summary.created,
            merged = summary.merged,
            failed = summary.failed,
            "sync complete"
        );
        Ok(summary)
    }

    /// Upsert one bundle; unreadable records become failures at their position in the file.
    async fn upsert_bundle(
        &self,
        record_type: RecordType,
        bundle: ExtractionBundle,
    ) -> Result<UpsertReport> {
        let mut origins = Vec::new();
        let mut partials = Vec::new();
        let mut unreadable = Vec::new();
        for (input_index, converted) in bundle.into_partials().into_iter().enumerate() {
            match converted {
                Ok(partial) => {
                    origins.push(input_index);
                    partials.push(partial);
                }
                Err(err) => {
                    warn!(input_index, error = %err, "skipping unreadable observation");
                    unreadable.push(UpsertFailure {
                        input_index,
                        error: format!("unreadable observation: {err}"),
                    });
                }
            }
        }

        let mut report = self.repository.upsert_records(record_type, partials).await?;
        for merged in &mut report.merged {
            merged.input_index = origins[merged.input_index];
        }
        for failure in &mut report.failures {
            failure.input_index = origins[failure.input_index];
        }
        for item in &mut report.review {
            item.input_index = origins[item.input_index];
        }
        report.failures.extend(unreadable);
        report.failures.sort_by_key(|f| f.input_index);
        Ok(report)
    }

    async fn load_city_registry(&self) -> Result<CityRegistry> {
        let path = self.config.workspace_root.join("cities.yaml");
        let text = fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    async fn bundle_paths_for(
        &self,
        source: &CitySource,
        record_type: RecordType,
    ) -> Result<Vec<PathBuf>> {
        let dir = self
            .config
            .workspace_root
            .join("extractions")
            .join(city_slug(&source.city))
            .join(record_type.slug());
        if !fs::try_exists(&dir)
            .await
            .with_context(|| format!("checking {}", dir.display()))?
        {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&dir)
            .await
            .with_context(|| format!("reading {}", dir.display()))?;
        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("listing {}", dir.display()))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    async fn write_reports(
        &self,
        summary: &SyncRunSummary,
        outcomes: &[BundleOutcome],
        skipped: &[SkippedBundle],
    ) -> Result<PathBuf> {
        let reports_dir = self
            .config
            .workspace_root
            .join("reports")
            .join(summary.run_id.to_string());
        fs::create_dir_all(&reports_dir)
            .await
            .with_context(|| format!("creating {}", reports_dir.display()))?;

        let mut city_counts: BTreeMap<String, (usize, usize)> = BTreeMap::new();
        for outcome in outcomes {
            let counts = city_counts.entry(outcome.city.clone()).or_default();
            counts.0 += outcome.report.created.len();
            counts.1 += outcome.report.merged.len();
        }

        let brief = format!(
            "# Planning Records Sync\n\n- Run ID: `{}`\n- Tier: {}\n- Started: {}\n- Finished: {}\n- Enabled cities: {}\n- Bundles: {} ({} skipped)\n- Created: {}\n- Merged: {}\n- Failed observations: {}\n- Flagged for review: {}\n\n## Cities\n{}\n",
            summary.run_id,
            summary.tier,
            summary.started_at,
            summary.finished_at,
            summary.enabled_cities,
            summary.bundles,
            summary.skipped_bundles,
            summary.created,
            summary.merged,
            summary.failed,
            summary.review,
            city_counts
                .iter()
                .map(|(city, (created, merged))| format!("- {city}: {created} created, {merged} merged"))
                .collect::<Vec<_>>()
                .join("\n")
        );
        fs::write(reports_dir.join("daily_brief.md"), brief)
            .await
            .context("writing daily_brief.md")?;

        let details = serde_json::to_vec_pretty(&serde_json::json!({
            "summary": summary,
            "bundles": outcomes,
            "skipped": skipped,
        }))
        .context("serializing sync summary")?;
        fs::write(reports_dir.join("sync_summary.json"), details)
            .await
            .context("writing sync_summary.json")?;

        Ok(reports_dir)
    }
}

pub async fn run_sync_once_from_env() -> Result<SyncRunSummary> {
    SyncPipeline::new(SyncConfig::from_env()).run_once().await
}

/// Address-to-coordinates lookup supplied by an external provider.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn locate(&self, address: &str, city: &str) -> Result<Option<Location>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GeocodeSummary {
    pub attempted: usize,
    pub located: usize,
    pub not_found: usize,
    pub failed: usize,
}

/// Fill in `location` for every record that lacks one, writing the tier once at the end.
pub async fn populate_locations(
    repository: &RecordsRepository,
    geocoder: &dyn Geocoder,
) -> Result<GeocodeSummary> {
    let today = repository.today();
    let mut records = repository.load().await.context("loading records")?;
    let mut summary = GeocodeSummary::default();

    for record in records.iter_mut().filter(|r| r.location.is_none()) {
        summary.attempted += 1;
        match geocoder.locate(&record.address, &record.city).await {
            Ok(Some(location)) => {
                record.location = Some(location);
                record.update_date = record.update_date.max(today);
                summary.located += 1;
            }
            Ok(None) => {
                info!(id = %record.id, address = %record.address, city = %record.city, "no coordinates found");
                summary.not_found += 1;
            }
            Err(err) => {
                let error = format!("{err:#}");
                warn!(id = %record.id, %error, "geocoding failed");
                summary.failed += 1;
            }
        }
    }

    if summary.located > 0 {
        repository
            .dangerously_replace_all_records(records)
            .await
            .context("writing geocoded records")?;
    }
    Ok(summary)
}
