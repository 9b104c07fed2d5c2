use crate::clique::{self, Clique, CliqueSummary, DEFAULT_MIN_CLIQUE_SIZE};
use crate::error::{Result, StitchError};
use crate::ingest::{self, IngestConfig, IngestReport, MappingSpec, Progress, ProgressSink, Schema, SourceInput};
use crate::jobs::{JobInfo, JobKind, JobOutput, JobParams, JobScheduler};
use crate::keys::StitchKey;
use crate::metrics::{CurationMetrics, MetricsCache};
use crate::repair::{
    choose_closest_source, deprecate_hubs, recolor, relabel_components, ClosestReport, DeprecationConfig,
    DeprecationReport, RecolorConfig, RecolorReport, RelabelReport,
};
use crate::stitch::{build_stitches, list_stitches, resolve_stitch, StitchBuild};
use crate::storage::{GraphStore, GraphView, NameKind, Page, StoreStats};
use crate::types::{DataSource, EdgeId, Entity, EntityId, Stitch, StitchEdge};
use std::ops::ControlFlow;
use std::path::Path;

/// Config for an embedded stitcher.
#[derive(Debug, Clone, Default)]
pub struct StitcherConfig {
    pub ingest: IngestConfig,
    /// Defaults for hub-value deprecation
    pub deprecation: DeprecationConfig,
    /// Defaults for recoloring and closest-source selection
    pub recolor: RecolorConfig,
}

impl StitcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ingest(mut self, ingest: IngestConfig) -> Self {
        self.ingest = ingest;
        self
    }

    pub fn with_deprecation(mut self, deprecation: DeprecationConfig) -> Self {
        self.deprecation = deprecation;
        self
    }

    pub fn with_recolor(mut self, recolor: RecolorConfig) -> Self {
        self.recolor = recolor;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.ingest.validate()?;
        self.deprecation.validate()?;
        self.recolor.validate()
    }
}

/// High-level, embedded record-linkage API over one graph file.
///
/// # Example
/// ```rust,no_run
/// use stitcher_core::{MappingSpec, SourceInput, StitchKey, StitchSpec, Stitcher, StitcherConfig};
///
/// let stitcher = Stitcher::open("./graph.redb", StitcherConfig::default()).unwrap();
/// let spec = MappingSpec::new()
///     .with_id_field("id")
///     .with_stitch(StitchSpec::new(StitchKey::Cas, "cas"));
/// stitcher.ingest(&SourceInput::path("registry.csv"), &spec).unwrap();
/// let build = stitcher.build_stitches(None).unwrap();
/// println!("{} stitches in {}", build.stitches, build.label());
/// ```
pub struct Stitcher {
    store: GraphStore,
    config: StitcherConfig,
    metrics: MetricsCache,
    jobs: JobScheduler,
}

impl Stitcher {
    /// Open (or create) a graph at the given path.
    pub fn open(path: impl AsRef<Path>, config: StitcherConfig) -> Result<Self> {
        config.validate()?;
        let store = GraphStore::open(path)?;
        let jobs = JobScheduler::new(store.clone(), config.clone());
        Ok(Self {
            store,
            config,
            metrics: MetricsCache::new(),
            jobs,
        })
    }

    /// Route job progress to `sink`.
    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.jobs = self.jobs.with_progress(sink);
        self
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn config(&self) -> &StitcherConfig {
        &self.config
    }

    // --- Ingestion ---

    pub fn ingest(&self, input: &SourceInput, spec: &MappingSpec) -> Result<IngestReport> {
        self.ingest_with_progress(input, spec, &Progress::none())
    }

    pub fn ingest_with_progress(
        &self,
        input: &SourceInput,
        spec: &MappingSpec,
        progress: &Progress,
    ) -> Result<IngestReport> {
        ingest::ingest(&self.store, input, spec, &self.config.ingest, progress)
    }

    /// Preview a source's schema without ingesting it.
    pub fn scan(&self, input: &SourceInput, spec: &MappingSpec) -> Result<Schema> {
        ingest::scan_source(input, spec, self.config.ingest.scan_limit)
    }

    pub fn datasources(&self) -> Result<Vec<DataSource>> {
        self.store.datasources()
    }

    pub fn datasource(&self, key: &str) -> Result<Option<DataSource>> {
        self.store.read()?.datasource(key)
    }

    /// Remove a source with every entity it owns. Returns the entity count.
    pub fn delete_datasource(&self, key: &str) -> Result<usize> {
        self.store.write(|txn| txn.delete_datasource(key))
    }

    // --- Queries ---

    pub fn entity(&self, id: EntityId) -> Result<Option<Entity>> {
        self.store.entity(id)
    }

    pub fn entities(&self, page: Page, labels: &[&str]) -> Result<Vec<Entity>> {
        self.store.entities(page, labels)
    }

    pub fn filter(&self, name: &str, value: &str, labels: &[&str]) -> Result<Vec<Entity>> {
        self.store.read()?.filter(name, value, labels)
    }

    /// Entities registered under an external id.
    pub fn by_external_id(&self, external: &str, labels: &[&str]) -> Result<Vec<Entity>> {
        self.store.read()?.by_external_id(external, labels)
    }

    pub fn edges(&self, id: EntityId) -> Result<Vec<StitchEdge>> {
        self.store.read()?.edges(id)
    }

    pub fn component(&self, root: EntityId) -> Result<Option<Vec<Entity>>> {
        self.store.read()?.component(root)
    }

    /// Entities carrying every label. `None` signals a store failure, which
    /// is logged; an empty match is `Some(0)`.
    pub fn count(&self, labels: &[&str]) -> Option<u64> {
        match self.store.count(labels) {
            Ok(n) => Some(n),
            Err(e) => {
                log::error!("count {:?} failed: {}", labels, e);
                None
            }
        }
    }

    pub fn labels(&self) -> Result<Vec<String>> {
        self.store.read()?.names(NameKind::Label)
    }

    pub fn properties(&self) -> Result<Vec<String>> {
        self.store.read()?.names(NameKind::Property)
    }

    pub fn relationships(&self) -> Result<Vec<String>> {
        self.store.read()?.names(NameKind::Relationship)
    }

    pub fn add_relationship(
        &self,
        a: EntityId,
        b: EntityId,
        key: StitchKey,
        value: &str,
        source: &str,
    ) -> Result<Option<EdgeId>> {
        self.store.write(|txn| txn.add_relationship(a, b, key, value, source))
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.store.stats()
    }

    // --- Cliques ---

    pub fn cliques(&self, key: StitchKey, labels: &[&str]) -> Result<Vec<Clique>> {
        clique::cliques(&self.store.read()?, key, labels, DEFAULT_MIN_CLIQUE_SIZE)
    }

    pub fn visit_cliques<F>(&self, key: StitchKey, labels: &[&str], visitor: F) -> Result<CliqueSummary>
    where
        F: FnMut(&Clique) -> ControlFlow<()>,
    {
        clique::enumerate(&self.store.read()?, key, labels, DEFAULT_MIN_CLIQUE_SIZE, visitor)
    }

    // --- Repair ---

    pub fn deprecate(&self, source: &str, key: StitchKey) -> Result<DeprecationReport> {
        self.deprecate_with(source, key, &self.config.deprecation)
    }

    pub fn deprecate_with(
        &self,
        source: &str,
        key: StitchKey,
        config: &DeprecationConfig,
    ) -> Result<DeprecationReport> {
        self.store.write(|txn| deprecate_hubs(txn, source, key, config))
    }

    pub fn recolor(&self, source: &str) -> Result<RecolorReport> {
        self.recolor_with(source, &self.config.recolor)
    }

    pub fn recolor_with(&self, source: &str, config: &RecolorConfig) -> Result<RecolorReport> {
        self.store.write(|txn| recolor(txn, source, config))
    }

    pub fn closest(&self, source: &str) -> Result<ClosestReport> {
        self.closest_with(source, &self.config.recolor)
    }

    pub fn closest_with(&self, source: &str, config: &RecolorConfig) -> Result<ClosestReport> {
        self.store.write(|txn| choose_closest_source(txn, source, config))
    }

    pub fn relabel(&self, labels: &[&str]) -> Result<RelabelReport> {
        self.store.write(|txn| relabel_components(txn, labels))
    }

    // --- Metrics and stitches ---

    /// Cached until the next committed write.
    pub fn metrics(&self, label: Option<&str>) -> Result<CurationMetrics> {
        self.metrics.get(&self.store, label)
    }

    pub fn build_stitches(&self, label: Option<&str>) -> Result<StitchBuild> {
        let labels: Vec<&str> = label.into_iter().collect();
        self.store.write(|txn| build_stitches(txn, &labels))
    }

    pub fn stitches(&self, version: u32) -> Result<Vec<Stitch>> {
        list_stitches(&self.store.read()?, version)
    }

    /// Resolve by internal id, else by member external id.
    pub fn stitch(&self, version: u32, id: &str) -> Result<Option<Stitch>> {
        resolve_stitch(&self.store.read()?, version, id)
    }

    pub fn require_stitch(&self, version: u32, id: &str) -> Result<Stitch> {
        self.stitch(version, id)?.ok_or_else(|| StitchError::StitchNotFound {
            version,
            id: id.to_string(),
        })
    }

    // --- Jobs ---

    /// Start a background job; identical parameters share one run.
    pub fn submit(&self, kind: JobKind, params: JobParams) -> Result<String> {
        self.jobs.submit(kind, params)
    }

    pub fn running(&self) -> Vec<JobInfo> {
        self.jobs.running()
    }

    pub fn wait(&self, fingerprint: &str) -> Result<JobOutput> {
        self.jobs.wait(fingerprint)
    }
}
