//! Background passes keyed by a parameter fingerprint.
//!
//! A [`JobRegistry`] maps each [`JobKind`] to a factory building the job from
//! its [`JobParams`]. The [`JobScheduler`] runs each job on its own thread and
//! refuses to start a second run of the same fingerprint while one is live.

use crate::api::StitcherConfig;
use crate::error::{Result, StitchError};
use crate::ingest::{self, CounterSnapshot, IngestReport, JobCounters, MappingSpec, Progress, ProgressSink, SourceInput};
use crate::keys::StitchKey;
use crate::metrics::{calc_metrics, CurationMetrics};
use crate::repair::{deprecate_hubs, recolor, relabel_components, DeprecationReport, RecolorReport, RelabelReport};
use crate::stitch::{build_stitches, StitchBuild};
use crate::storage::GraphStore;
use crate::types::sha256_hex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use uuid::Uuid;

/// Well-known parameter names.
pub mod param {
    pub const DATASOURCE: &str = "DATASOURCE";
    pub const URL: &str = "URL";
    pub const FILE: &str = "FILE";
    pub const ID: &str = "ID";
    pub const NAME: &str = "NAME";
    pub const FORMAT: &str = "FORMAT";
    pub const DELIMITER: &str = "DELIMITER";
    /// A serialized mapping spec (JSON)
    pub const MAPPING: &str = "MAPPING";
    pub const LABEL: &str = "LABEL";
    pub const KEY: &str = "KEY";
    pub const LIMIT: &str = "LIMIT";
    pub const DRYRUN: &str = "DRYRUN";
}

const FINGERPRINT_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Ingest,
    Deprecate,
    Recolor,
    Relabel,
    Stitch,
    Metrics,
}

impl JobKind {
    pub const ALL: [JobKind; 6] = [
        JobKind::Ingest,
        JobKind::Deprecate,
        JobKind::Recolor,
        JobKind::Relabel,
        JobKind::Stitch,
        JobKind::Metrics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Ingest => "ingest",
            JobKind::Deprecate => "deprecate",
            JobKind::Recolor => "recolor",
            JobKind::Relabel => "relabel",
            JobKind::Stitch => "stitch",
            JobKind::Metrics => "metrics",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = StitchError;

    fn from_str(s: &str) -> Result<Self> {
        JobKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| StitchError::Validation(format!("unknown job kind: {}", s)))
    }
}

/// Sorted string parameters of a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParams(BTreeMap<String, String>);

impl JobParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn require(&self, name: &str) -> Result<&str> {
        self.get(name)
            .ok_or_else(|| StitchError::Validation(format!("missing job parameter {}", name)))
    }

    /// Parse an optional parameter.
    pub fn parse<T: FromStr>(&self, name: &str) -> Result<Option<T>> {
        match self.get(name) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| StitchError::Validation(format!("invalid value for {}: {:?}", name, raw))),
        }
    }

    /// `true`, `yes` and `1` (any case) are set; absent is unset.
    pub fn flag(&self, name: &str) -> bool {
        matches!(
            self.get(name).map(|v| v.trim().to_ascii_lowercase()).as_deref(),
            Some("true" | "yes" | "1")
        )
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    /// Hex prefix of SHA-256 over the kind and the sorted `name=value` pairs.
    pub fn fingerprint(&self, kind: JobKind) -> String {
        let parts = std::iter::once(kind.as_str().to_string())
            .chain(self.0.iter().map(|(k, v)| format!("\n{}={}", k, v)));
        let mut digest = sha256_hex(parts);
        digest.truncate(FINGERPRINT_LEN);
        digest
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for JobParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// What a finished job produced.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "job", content = "report", rename_all = "lowercase")]
pub enum JobOutput {
    Ingest(IngestReport),
    Deprecate(DeprecationReport),
    Recolor(RecolorReport),
    Relabel(RelabelReport),
    Stitch(StitchBuild),
    Metrics(CurationMetrics),
}

/// Shared state handed to a running job.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub store: GraphStore,
    pub config: StitcherConfig,
    pub progress: Progress,
}

pub trait Job: Send {
    fn kind(&self) -> JobKind;

    fn run(&mut self, ctx: &JobContext) -> Result<JobOutput>;
}

pub type JobFactory = fn(&JobParams) -> Result<Box<dyn Job>>;

/// Job kind to factory.
#[derive(Clone)]
pub struct JobRegistry {
    factories: HashMap<JobKind, JobFactory>,
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.factories.keys().collect();
        kinds.sort();
        f.debug_struct("JobRegistry").field("kinds", &kinds).finish()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(JobKind::Ingest, IngestJob::create);
        registry.register(JobKind::Deprecate, DeprecateJob::create);
        registry.register(JobKind::Recolor, RecolorJob::create);
        registry.register(JobKind::Relabel, ScopedJob::create_relabel);
        registry.register(JobKind::Stitch, ScopedJob::create_stitch);
        registry.register(JobKind::Metrics, ScopedJob::create_metrics);
        registry
    }
}

impl JobRegistry {
    /// Registry with the built-in jobs.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Replaces any factory already registered for `kind`.
    pub fn register(&mut self, kind: JobKind, factory: JobFactory) {
        self.factories.insert(kind, factory);
    }

    pub fn create(&self, kind: JobKind, params: &JobParams) -> Result<Box<dyn Job>> {
        let factory = self
            .factories
            .get(&kind)
            .ok_or_else(|| StitchError::Validation(format!("no job registered for {}", kind)))?;
        factory(params)
    }
}

// === Built-in jobs ===

struct IngestJob {
    input: SourceInput,
    spec: MappingSpec,
}

impl IngestJob {
    fn create(params: &JobParams) -> Result<Box<dyn Job>> {
        let mut input = SourceInput::path(params.require(param::FILE)?);
        if let Some(url) = params.get(param::URL) {
            input = input.with_uri(url);
        }
        let mut spec = match params.get(param::MAPPING) {
            Some(json) => serde_json::from_str(json)?,
            None => MappingSpec::new(),
        };
        spec.apply_params(params.as_map())?;
        Ok(Box::new(Self { input, spec }))
    }
}

impl Job for IngestJob {
    fn kind(&self) -> JobKind {
        JobKind::Ingest
    }

    fn run(&mut self, ctx: &JobContext) -> Result<JobOutput> {
        ingest::ingest(&ctx.store, &self.input, &self.spec, &ctx.config.ingest, &ctx.progress)
            .map(JobOutput::Ingest)
    }
}

struct DeprecateJob {
    source: String,
    key: StitchKey,
    limit: Option<usize>,
    dry_run: bool,
}

impl DeprecateJob {
    fn create(params: &JobParams) -> Result<Box<dyn Job>> {
        Ok(Box::new(Self {
            source: params.require(param::DATASOURCE)?.to_string(),
            key: params.require(param::KEY)?.parse()?,
            limit: params.parse(param::LIMIT)?,
            dry_run: params.flag(param::DRYRUN),
        }))
    }
}

impl Job for DeprecateJob {
    fn kind(&self) -> JobKind {
        JobKind::Deprecate
    }

    fn run(&mut self, ctx: &JobContext) -> Result<JobOutput> {
        let mut config = ctx.config.deprecation.clone();
        if let Some(limit) = self.limit {
            config = config.with_limit(limit);
        }
        if self.dry_run {
            config = config.with_dry_run(true);
        }
        ctx.store
            .write(|txn| deprecate_hubs(txn, &self.source, self.key, &config))
            .map(JobOutput::Deprecate)
    }
}

struct RecolorJob {
    source: String,
}

impl RecolorJob {
    fn create(params: &JobParams) -> Result<Box<dyn Job>> {
        Ok(Box::new(Self {
            source: params.require(param::DATASOURCE)?.to_string(),
        }))
    }
}

impl Job for RecolorJob {
    fn kind(&self) -> JobKind {
        JobKind::Recolor
    }

    fn run(&mut self, ctx: &JobContext) -> Result<JobOutput> {
        ctx.store
            .write(|txn| recolor(txn, &self.source, &ctx.config.recolor))
            .map(JobOutput::Recolor)
    }
}

/// Passes that only take an optional label scope.
struct ScopedJob {
    kind: JobKind,
    label: Option<String>,
}

impl ScopedJob {
    fn build(kind: JobKind, params: &JobParams) -> Box<dyn Job> {
        Box::new(Self {
            kind,
            label: params.get(param::LABEL).map(str::to_string),
        })
    }

    fn create_relabel(params: &JobParams) -> Result<Box<dyn Job>> {
        Ok(Self::build(JobKind::Relabel, params))
    }

    fn create_stitch(params: &JobParams) -> Result<Box<dyn Job>> {
        Ok(Self::build(JobKind::Stitch, params))
    }

    fn create_metrics(params: &JobParams) -> Result<Box<dyn Job>> {
        Ok(Self::build(JobKind::Metrics, params))
    }
}

impl Job for ScopedJob {
    fn kind(&self) -> JobKind {
        self.kind
    }

    fn run(&mut self, ctx: &JobContext) -> Result<JobOutput> {
        let labels: Vec<&str> = self.label.as_deref().into_iter().collect();
        match self.kind {
            JobKind::Relabel => ctx
                .store
                .write(|txn| relabel_components(txn, &labels))
                .map(JobOutput::Relabel),
            JobKind::Stitch => ctx
                .store
                .write(|txn| build_stitches(txn, &labels))
                .map(JobOutput::Stitch),
            JobKind::Metrics => {
                calc_metrics(&ctx.store.read()?, self.label.as_deref()).map(JobOutput::Metrics)
            }
            other => Err(StitchError::Validation(format!("{} is not a scoped job", other))),
        }
    }
}

// === Scheduler ===

/// A job visible through [`JobScheduler::running`].
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub fingerprint: String,
    pub id: Uuid,
    pub kind: JobKind,
    pub started_at: DateTime<Utc>,
    pub params: JobParams,
    pub counters: CounterSnapshot,
}

struct RunningJob {
    id: Uuid,
    kind: JobKind,
    started_at: DateTime<Utc>,
    params: JobParams,
    counters: Arc<JobCounters>,
    /// Taken by the first waiter
    handle: Option<JoinHandle<Result<JobOutput>>>,
}

impl RunningJob {
    fn is_live(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| !h.is_finished())
    }
}

/// Runs jobs on background threads, one per fingerprint at a time. There are
/// no retries; a failed job is reported and returned from [`wait`].
///
/// [`wait`]: JobScheduler::wait
pub struct JobScheduler {
    store: GraphStore,
    config: StitcherConfig,
    registry: JobRegistry,
    sink: Option<ProgressSink>,
    jobs: Arc<Mutex<HashMap<String, RunningJob>>>,
}

impl JobScheduler {
    pub fn new(store: GraphStore, config: StitcherConfig) -> Self {
        Self {
            store,
            config,
            registry: JobRegistry::default(),
            sink: None,
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_registry(mut self, registry: JobRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Every job reports to this sink.
    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Start a job unless one with the same fingerprint is live. Returns the
    /// fingerprint either way.
    pub fn submit(&self, kind: JobKind, params: JobParams) -> Result<String> {
        let fingerprint = params.fingerprint(kind);
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(existing) = jobs.get(&fingerprint) {
            if existing.is_live() {
                log::info!("{} job {} already running as {}", kind, fingerprint, existing.id);
                return Ok(fingerprint);
            }
            log::debug!("discarding unclaimed result of {} job {}", kind, fingerprint);
        }

        let mut job = self.registry.create(kind, &params)?;
        let id = Uuid::now_v7();
        let counters = Arc::new(JobCounters::new());
        let mut progress = Progress::none().with_counters(counters.clone());
        if let Some(sink) = &self.sink {
            progress = progress.with_sink(sink.clone());
        }
        let ctx = JobContext {
            store: self.store.clone(),
            config: self.config.clone(),
            progress,
        };

        let thread_fingerprint = fingerprint.clone();
        let handle = std::thread::Builder::new()
            .name(format!("{}-{}", kind, &fingerprint[..8]))
            .spawn(move || {
                log::info!("{} job {} started ({})", kind, thread_fingerprint, id);
                let result = job.run(&ctx);
                match &result {
                    Ok(_) => log::info!("{} job {} finished", kind, thread_fingerprint),
                    Err(e) => {
                        log::error!("{} job {} failed: {}", kind, thread_fingerprint, e);
                        ctx.progress.error(None, None, format!("{} job {} failed: {}", kind, thread_fingerprint, e));
                    }
                }
                result
            })?;

        jobs.insert(
            fingerprint.clone(),
            RunningJob {
                id,
                kind,
                started_at: Utc::now(),
                params,
                counters,
                handle: Some(handle),
            },
        );
        Ok(fingerprint)
    }

    /// Jobs still running, oldest first.
    pub fn running(&self) -> Vec<JobInfo> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<JobInfo> = jobs
            .iter()
            .filter(|(_, job)| job.is_live())
            .map(|(fingerprint, job)| JobInfo {
                fingerprint: fingerprint.clone(),
                id: job.id,
                kind: job.kind,
                started_at: job.started_at,
                params: job.params.clone(),
                counters: job.counters.snapshot(),
            })
            .collect();
        out.sort_by_key(|info| info.id);
        out
    }

    /// Block until the job finishes and take its result.
    pub fn wait(&self, fingerprint: &str) -> Result<JobOutput> {
        let handle = {
            let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
            jobs.get_mut(fingerprint).and_then(|job| job.handle.take())
        };
        let Some(handle) = handle else {
            return Err(StitchError::Job {
                fingerprint: fingerprint.to_string(),
                reason: "no such job, or already awaited".into(),
            });
        };

        let joined = handle.join();
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(fingerprint);

        match joined {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(StitchError::Job {
                fingerprint: fingerprint.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(StitchError::Job {
                fingerprint: fingerprint.to_string(),
                reason: "job thread panicked".into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{channel, ProgressEvent};
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn scheduler() -> (JobScheduler, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = GraphStore::open(temp.path().join("jobs.redb")).unwrap();
        (JobScheduler::new(store, StitcherConfig::default()), temp)
    }

    #[test]
    fn test_fingerprint_ignores_insertion_order() {
        let a = JobParams::new().with("FILE", "x.csv").with("I_CAS", "CAS");
        let b = JobParams::new().with("I_CAS", "CAS").with("FILE", "x.csv");
        assert_eq!(a.fingerprint(JobKind::Ingest), b.fingerprint(JobKind::Ingest));
        assert_eq!(a.fingerprint(JobKind::Ingest).len(), 16);
        assert_ne!(a.fingerprint(JobKind::Ingest), a.fingerprint(JobKind::Stitch));
        assert_ne!(
            a.fingerprint(JobKind::Ingest),
            a.clone().with("ID", "id").fingerprint(JobKind::Ingest)
        );
    }

    #[test]
    fn test_params_helpers() {
        let p = JobParams::new().with("LIMIT", "3").with("DRYRUN", "Yes");
        assert_eq!(p.parse::<usize>("LIMIT").unwrap(), Some(3));
        assert_eq!(p.parse::<usize>("MISSING").unwrap(), None);
        assert!(p.flag("DRYRUN"));
        assert!(!p.flag("MISSING"));
        assert!(matches!(p.require("FILE"), Err(StitchError::Validation(_))));
        assert!(JobParams::new().with("LIMIT", "x").parse::<usize>("LIMIT").is_err());
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in JobKind::ALL {
            assert_eq!(kind.as_str().parse::<JobKind>().unwrap(), kind);
        }
        assert!("cron".parse::<JobKind>().is_err());
    }

    #[test]
    fn test_bad_params_fail_at_submit() {
        let (scheduler, _temp) = scheduler();
        let err = scheduler.submit(JobKind::Ingest, JobParams::new()).unwrap_err();
        assert!(matches!(err, StitchError::Validation(_)));
        assert!(scheduler.running().is_empty());
    }

    #[test]
    fn test_ingest_job_runs_to_completion() {
        let (scheduler, temp) = scheduler();
        let file = temp.path().join("a.csv");
        std::fs::write(&file, "id,cas\n1,50-78-2\n2,50-78-2\n").unwrap();

        let params = JobParams::new()
            .with(param::FILE, file.display().to_string())
            .with(param::ID, "id")
            .with("I_CAS", "cas");
        let fp = scheduler.submit(JobKind::Ingest, params).unwrap();
        match scheduler.wait(&fp).unwrap() {
            JobOutput::Ingest(report) => {
                assert!(report.created);
                assert_eq!(report.entities_added, 2);
                assert_eq!(report.edges_added, 1);
            }
            other => panic!("unexpected output {:?}", other),
        }
        assert!(scheduler.wait(&fp).is_err());
    }

    struct Blocking(Option<mpsc::Receiver<()>>);

    impl Job for Blocking {
        fn kind(&self) -> JobKind {
            JobKind::Metrics
        }

        fn run(&mut self, ctx: &JobContext) -> Result<JobOutput> {
            if let Some(rx) = self.0.take() {
                let _ = rx.recv_timeout(Duration::from_secs(10));
            }
            calc_metrics(&ctx.store.read()?, None).map(JobOutput::Metrics)
        }
    }

    static GATE: Mutex<Option<mpsc::Receiver<()>>> = Mutex::new(None);

    fn blocking(_: &JobParams) -> Result<Box<dyn Job>> {
        Ok(Box::new(Blocking(GATE.lock().unwrap().take())))
    }

    #[test]
    fn test_duplicate_submission_is_deduplicated() {
        let (tx, rx) = mpsc::channel();
        *GATE.lock().unwrap() = Some(rx);

        let (scheduler, _temp) = scheduler();
        let mut registry = JobRegistry::empty();
        registry.register(JobKind::Metrics, blocking);
        let scheduler = scheduler.with_registry(registry);

        let params = JobParams::new().with(param::LABEL, "x");
        let first = scheduler.submit(JobKind::Metrics, params.clone()).unwrap();
        let second = scheduler.submit(JobKind::Metrics, params).unwrap();
        assert_eq!(first, second);

        let running = scheduler.running();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].kind, JobKind::Metrics);
        assert_eq!(running[0].params.get(param::LABEL), Some("x"));

        tx.send(()).unwrap();
        assert!(matches!(scheduler.wait(&first).unwrap(), JobOutput::Metrics(_)));
        assert!(scheduler.running().is_empty());
    }

    #[test]
    fn test_failure_reaches_progress_channel() {
        let (sink, rx) = channel(8);
        let (scheduler, _temp) = scheduler();
        let scheduler = scheduler.with_progress(sink);

        let params = JobParams::new()
            .with(param::DATASOURCE, "missing")
            .with(param::KEY, "N_Name");
        let fp = scheduler.submit(JobKind::Deprecate, params).unwrap();
        let err = scheduler.wait(&fp).unwrap_err();
        assert!(matches!(err, StitchError::Job { .. }));

        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(event, ProgressEvent::Error { source: None, .. }));
    }
}
