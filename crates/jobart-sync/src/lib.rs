//! Pipeline orchestration: fetch, normalize, dedup, skill extraction, write.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use jobart_adapters::{
    CreationWindow, FranceTravailAdapter, FranceTravailEndpoints, LinksFileHarvester, SearchQuery,
    SourceAdapter, WttjAdapter,
};
use jobart_core::{dataset_slug, CanonicalListing};
use jobart_storage::{
    manifest_entry, read_parquet, write_csv, write_manifest, write_parquet, HttpClientConfig,
    ManifestFile, RetryPolicy, SqlSink,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

mod similar;
mod skills;

pub use similar::{similar_listings, SimilarListing, SimilarityIndex, DEFAULT_SIMILAR_COUNT};
pub use skills::{SkillExtractor, SkillSets};

pub const CRATE_NAME: &str = "jobart-sync";

/// Job titles walked by an "all queries" run.
pub const JOB_TITLES: [&str; 3] = ["data analyst", "data scientist", "data engineer"];

pub const ALL_JOBS_DATASET: &str = "all_jobs";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub output_dir: PathBuf,
    pub database_url: String,
    pub links_dir: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub retry_backoff_secs: u64,
    pub retry_max_attempts: Option<usize>,
    pub keep_partial: bool,
    pub sql_enabled: bool,
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            output_dir: std::env::var("JOBART_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./datasets")),
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://database/job_offers.db".to_string()),
            links_dir: std::env::var("JOBART_LINKS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./links")),
            user_agent: std::env::var("JOBART_USER_AGENT")
                .unwrap_or_else(|_| "jobart-bot/0.1".to_string()),
            http_timeout_secs: std::env::var("JOBART_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            retry_backoff_secs: std::env::var("JOBART_RETRY_BACKOFF_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            retry_max_attempts: std::env::var("JOBART_RETRY_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok()),
            keep_partial: env_flag("JOBART_KEEP_PARTIAL", true),
            sql_enabled: env_flag("JOBART_SQL_ENABLED", true),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let backoff = Duration::from_secs(self.retry_backoff_secs);
        match self.retry_max_attempts {
            Some(max) => RetryPolicy::bounded(max, backoff),
            None => RetryPolicy::forever(backoff),
        }
    }
}

pub trait DedupHook: Send + Sync {
    fn apply(&self, items: Vec<CanonicalListing>) -> Result<Vec<CanonicalListing>>;
}

pub trait EnrichmentHook: Send + Sync {
    fn apply(&self, items: Vec<CanonicalListing>) -> Result<Vec<CanonicalListing>>;
}

#[derive(Default)]
pub struct NoopDedupHook;

impl DedupHook for NoopDedupHook {
    fn apply(&self, items: Vec<CanonicalListing>) -> Result<Vec<CanonicalListing>> {
        Ok(items)
    }
}

/// Keeps the first listing of every distinct cleaned description.
#[derive(Default)]
pub struct DescriptionDedupHook;

impl DedupHook for DescriptionDedupHook {
    fn apply(&self, items: Vec<CanonicalListing>) -> Result<Vec<CanonicalListing>> {
        let mut seen = HashSet::new();
        Ok(items
            .into_iter()
            .filter(|item| seen.insert(item.description.clone()))
            .collect())
    }
}

pub struct SkillEnrichment {
    extractor: SkillExtractor,
}

impl SkillEnrichment {
    pub fn new(extractor: SkillExtractor) -> Self {
        Self { extractor }
    }

    pub fn bundled() -> Result<Self> {
        Ok(Self::new(SkillExtractor::bundled()?))
    }
}

impl EnrichmentHook for SkillEnrichment {
    fn apply(&self, items: Vec<CanonicalListing>) -> Result<Vec<CanonicalListing>> {
        Ok(items
            .into_iter()
            .map(|item| {
                let skills = self.extractor.extract(&item.description);
                item.with_skills(skills.tech, skills.soft)
            })
            .collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub schema_version: u32,
    pub run_id: Uuid,
    pub dataset: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fetched_per_source: BTreeMap<String, usize>,
    pub dropped_without_description: usize,
    pub deduplicated: usize,
    pub records: usize,
    pub sql_table: Option<String>,
    pub files: Vec<ManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub dataset: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fetched: usize,
    pub dropped_without_description: usize,
    pub deduplicated: usize,
    pub written: usize,
    pub parquet_path: String,
    pub manifest_path: String,
    pub sql_table: Option<String>,
}

pub struct SyncPipeline {
    config: SyncConfig,
    adapters: Vec<Box<dyn SourceAdapter>>,
    enrichment: Box<dyn EnrichmentHook>,
    creation_window: Option<CreationWindow>,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig, adapters: Vec<Box<dyn SourceAdapter>>) -> Result<Self> {
        Ok(Self {
            config,
            adapters,
            enrichment: Box::new(SkillEnrichment::bundled()?),
            creation_window: None,
        })
    }

    pub fn with_creation_window(mut self, window: Option<CreationWindow>) -> Self {
        self.creation_window = window;
        self
    }

    /// One job title, both sources, no deduplication.
    pub async fn run_query(&self, job_title: &str) -> Result<RunSummary> {
        self.run_dataset(&dataset_slug(job_title), &[job_title], &NoopDedupHook)
            .await
    }

    /// Every title of [`JOB_TITLES`] merged into one deduplicated dataset.
    pub async fn run_all(&self) -> Result<RunSummary> {
        self.run_dataset(ALL_JOBS_DATASET, &JOB_TITLES, &DescriptionDedupHook)
            .await
    }

    async fn run_dataset(&self, dataset: &str, titles: &[&str], dedup: &dyn DedupHook) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id, dataset);
        self.run_dataset_inner(run_id, dataset, titles, dedup)
            .instrument(span)
            .await
    }

    async fn run_dataset_inner(
        &self,
        run_id: Uuid,
        dataset: &str,
        titles: &[&str],
        dedup: &dyn DedupHook,
    ) -> Result<RunSummary> {
        let started_at = Utc::now();
        let mut fetched_per_source = BTreeMap::new();
        let mut listings = Vec::new();

        for title in titles {
            let query = SearchQuery::keywords(*title).with_creation_window(self.creation_window);
            for adapter in &self.adapters {
                let batch = self.fetch_source(adapter.as_ref(), &query).await;
                *fetched_per_source
                    .entry(adapter.source().as_str().to_string())
                    .or_insert(0usize) += batch.len();
                listings.extend(batch.iter().map(|raw| adapter.normalize(raw)));
            }
        }
        let fetched = listings.len();
        info!(fetched, "normalization done");

        let listings = listings
            .into_iter()
            .filter(CanonicalListing::has_description)
            .collect::<Vec<_>>();
        let dropped_without_description = fetched - listings.len();

        let before_dedup = listings.len();
        let listings = dedup.apply(listings)?;
        let deduplicated = before_dedup - listings.len();
        info!(dropped_without_description, deduplicated, kept = listings.len(), "dedup done");

        let listings = self.enrichment.apply(listings)?;
        info!(records = listings.len(), "skill extraction done");

        let output_dir = &self.config.output_dir;
        let parquet_path = dataset_path(output_dir, dataset);
        write_parquet(&parquet_path, &listings)?;
        let csv_path = output_dir.join(format!("{dataset}.csv"));
        write_csv(&csv_path, &listings)?;

        let sql_table = if self.config.sql_enabled {
            let sink = SqlSink::connect(&self.config.database_url).await?;
            sink.replace_table(dataset, &listings).await?;
            sink.pool().close().await;
            Some(dataset.to_string())
        } else {
            None
        };

        let finished_at = Utc::now();
        let manifest_path = output_dir.join(format!("{dataset}.manifest.json"));
        let manifest = DatasetManifest {
            schema_version: 1,
            run_id,
            dataset: dataset.to_string(),
            started_at,
            finished_at,
            fetched_per_source,
            dropped_without_description,
            deduplicated,
            records: listings.len(),
            sql_table: sql_table.clone(),
            files: vec![
                manifest_entry(dataset, output_dir, &parquet_path)?,
                manifest_entry(&format!("{dataset}_csv"), output_dir, &csv_path)?,
            ],
        };
        write_manifest(&manifest_path, &manifest).await?;
        info!(path = %parquet_path.display(), records = listings.len(), "write done");

        Ok(RunSummary {
            run_id,
            dataset: dataset.to_string(),
            started_at,
            finished_at,
            fetched,
            dropped_without_description,
            deduplicated,
            written: listings.len(),
            parquet_path: parquet_path.display().to_string(),
            manifest_path: manifest_path.display().to_string(),
            sql_table,
        })
    }

    /// Failures stay local to their source: a pagination abort may still
    /// contribute its partial records, anything else skips the source.
    async fn fetch_source(
        &self,
        adapter: &dyn SourceAdapter,
        query: &SearchQuery,
    ) -> Vec<jobart_core::RawListing> {
        let source = adapter.source();
        match adapter.fetch(query).await {
            Ok(batch) => batch,
            Err(err) => match err.into_partial() {
                Ok(partial) if self.config.keep_partial => {
                    warn!(%source, query = %query.keywords, kept = partial.len(), "keeping partial results");
                    partial
                }
                Ok(partial) => {
                    warn!(%source, query = %query.keywords, discarded = partial.len(), "discarding partial results");
                    Vec::new()
                }
                Err(err) => {
                    error!(%source, query = %query.keywords, error = %err, "source skipped");
                    Vec::new()
                }
            },
        }
    }
}

pub fn default_adapters(config: &SyncConfig) -> Vec<Box<dyn SourceAdapter>> {
    vec![
        Box::new(FranceTravailAdapter::new(
            FranceTravailEndpoints::from_env(),
            config.http_client_config(),
            config.retry_policy(),
        )),
        Box::new(WttjAdapter::new(
            Box::new(LinksFileHarvester::new(config.links_dir.clone())),
            config.http_client_config(),
            config.retry_policy(),
        )),
    ]
}

pub fn build_pipeline(config: SyncConfig) -> Result<SyncPipeline> {
    let adapters = default_adapters(&config);
    SyncPipeline::new(config, adapters).context("building sync pipeline")
}

pub fn dataset_path(output_dir: &Path, dataset: &str) -> PathBuf {
    output_dir.join(format!("{dataset}.parquet"))
}

/// Listings of a dataset written by an earlier run.
pub fn read_dataset(output_dir: &Path, dataset: &str) -> Result<Vec<CanonicalListing>> {
    let path = dataset_path(output_dir, dataset);
    read_parquet(&path).with_context(|| format!("loading dataset {dataset}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use jobart_adapters::AdapterError;
    use jobart_core::{RawListing, Source};
    use serde_json::json;

    struct FakeAdapter {
        source: Source,
        result: fn(&SearchQuery) -> Result<Vec<RawListing>, AdapterError>,
    }

    #[async_trait]
    impl SourceAdapter for FakeAdapter {
        fn source(&self) -> Source {
            self.source
        }

        async fn fetch(&self, query: &SearchQuery) -> Result<Vec<RawListing>, AdapterError> {
            (self.result)(query)
        }
    }

    fn france_travail_ok(query: &SearchQuery) -> Result<Vec<RawListing>, AdapterError> {
        Ok(vec![
            RawListing::FranceTravail(json!({
                "intitule": format!("{} (H/F)", query.keywords),
                "typeContrat": "CDI",
                "dateCreation": "2024-03-01T10:15:30.000Z",
                "description": "Python, SQL et machine learning. Esprit d'équipe.",
                "formations": [{"niveauLibelle": "Bac+5 et plus ou équivalents"}],
                "salaire": {"libelle": "Annuel de 40000,00 Euros à 50000,00 Euros"},
                "lieuTravail": {"libelle": "69 - LYON 03"},
                "origineOffre": {"urlOrigine": "https://candidat.francetravail.fr/offres/1"},
            })),
            RawListing::FranceTravail(json!({"intitule": "Sans description"})),
        ])
    }

    fn wttj_partial(_query: &SearchQuery) -> Result<Vec<RawListing>, AdapterError> {
        Err(AdapterError::PaginationAborted {
            partial: vec![RawListing::WelcomeToTheJungle(json!({
                "name": "Data Analyst",
                "contract_type": "internship",
                "description": "<p>Python, SQL et machine learning. Esprit d'équipe.</p>",
                "link": "https://www.welcometothejungle.com/fr/companies/acme/jobs/1",
            }))],
            source: Box::new(AdapterError::Harvest("boom".into())),
        })
    }

    fn missing_credential(_query: &SearchQuery) -> Result<Vec<RawListing>, AdapterError> {
        Err(AdapterError::MissingCredential("FRANCE_TRAVAIL_CLIENT_ID"))
    }

    fn config(dir: &Path) -> SyncConfig {
        SyncConfig {
            output_dir: dir.join("datasets"),
            database_url: format!("sqlite://{}", dir.join("database").join("jobs.db").display()),
            links_dir: dir.join("links"),
            user_agent: "test".into(),
            http_timeout_secs: 1,
            retry_backoff_secs: 0,
            retry_max_attempts: Some(1),
            keep_partial: true,
            sql_enabled: true,
        }
    }

    fn pipeline(config: SyncConfig) -> SyncPipeline {
        SyncPipeline::new(
            config,
            vec![
                Box::new(FakeAdapter {
                    source: Source::FranceTravail,
                    result: france_travail_ok,
                }),
                Box::new(FakeAdapter {
                    source: Source::WelcomeToTheJungle,
                    result: wttj_partial,
                }),
            ],
        )
        .unwrap()
    }

    fn listing(description: &str, url: &str) -> CanonicalListing {
        let raw = RawListing::FranceTravail(json!({
            "description": description,
            "origineOffre": {"urlOrigine": url},
        }));
        jobart_adapters::normalize::normalize(&raw)
    }

    #[test]
    fn description_dedup_keeps_first_occurrence() {
        let items = vec![
            listing("Same text", "https://a.test/1"),
            listing("Other text", "https://a.test/2"),
            listing("Same text", "https://b.test/9"),
        ];
        let kept = DescriptionDedupHook.apply(items).unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].source_url, "https://a.test/1");
        assert_eq!(kept[1].source_url, "https://a.test/2");
    }

    #[test]
    fn retry_policy_follows_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        assert_eq!(cfg.retry_policy().max_attempts, Some(1));
        cfg.retry_max_attempts = None;
        cfg.retry_backoff_secs = 30;
        assert_eq!(cfg.retry_policy(), RetryPolicy::forever(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn single_query_writes_every_sink() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let summary = pipeline(cfg.clone()).run_query("Data Analyst").await.unwrap();

        assert_eq!(summary.dataset, "data_analyst");
        assert_eq!(summary.fetched, 3);
        assert_eq!(summary.dropped_without_description, 1);
        assert_eq!(summary.deduplicated, 0);
        assert_eq!(summary.written, 2);

        let written = read_parquet(&dataset_path(&cfg.output_dir, "data_analyst")).unwrap();
        assert_eq!(written.len(), 2);
        let ft = &written[0];
        assert_eq!(ft.title, "Data Analyst (H/F)");
        assert_eq!(ft.city, "Lyon");
        assert_eq!(ft.salary_annualized, "45000 sur 12 mois");
        assert!(ft.tech_skills.contains("Machine Learning"));
        assert!(ft.soft_skills.contains("Esprit d'équipe"));
        assert_eq!(written[1].source, Source::WelcomeToTheJungle);

        let sink = SqlSink::connect(&cfg.database_url).await.unwrap();
        assert_eq!(sink.read_table("data_analyst").await.unwrap(), written);

        let manifest: DatasetManifest =
            serde_json::from_slice(&std::fs::read(&summary.manifest_path).unwrap()).unwrap();
        assert_eq!(manifest.run_id, summary.run_id);
        assert_eq!(manifest.fetched_per_source["france_travail"], 2);
        assert_eq!(manifest.fetched_per_source["wttj"], 1);
        assert_eq!(manifest.files.len(), 2);
        assert_eq!(manifest.files[0].path, "data_analyst.parquet");
        assert_eq!(manifest.files[1].path, "data_analyst.csv");
        assert!(cfg.output_dir.join("data_analyst.csv").exists());
    }

    #[tokio::test]
    async fn all_queries_merge_and_dedup_by_description() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = SyncConfig {
            sql_enabled: false,
            ..config(dir.path())
        };
        let summary = pipeline(cfg.clone()).run_all().await.unwrap();

        // Three titles, two descriptive listings each, one shared description.
        assert_eq!(summary.fetched, 9);
        assert_eq!(summary.dropped_without_description, 3);
        assert_eq!(summary.deduplicated, 5);
        assert_eq!(summary.written, 1);
        assert!(summary.sql_table.is_none());

        let written = read_dataset(&cfg.output_dir, ALL_JOBS_DATASET).unwrap();
        assert_eq!(written[0].title, "data analyst (H/F)");
    }

    #[tokio::test]
    async fn failing_source_is_skipped_and_partial_can_be_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = SyncConfig {
            keep_partial: false,
            sql_enabled: false,
            ..config(dir.path())
        };
        let pipeline = SyncPipeline::new(
            cfg,
            vec![
                Box::new(FakeAdapter {
                    source: Source::FranceTravail,
                    result: missing_credential,
                }),
                Box::new(FakeAdapter {
                    source: Source::WelcomeToTheJungle,
                    result: wttj_partial,
                }),
            ],
        )
        .unwrap();

        let summary = pipeline.run_query("data engineer").await.unwrap();
        assert_eq!(summary.fetched, 0);
        assert_eq!(summary.written, 0);
    }
}
