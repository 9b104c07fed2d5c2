pub mod types;
pub mod keys;
pub mod error;
pub mod unionfind;
pub mod storage;
pub mod matcher;
pub mod ingest;
pub mod clique;
pub mod repair;
pub mod metrics;
pub mod stitch;
pub mod jobs;
pub mod api;

pub use error::{Result, StitchError};
pub use keys::{StitchKey, ValueKind};
pub use types::*;
pub use unionfind::DisjointSet;
pub use storage::{
    GraphSnapshot, GraphStore, GraphTxn, GraphView, NameKind, Page, StoreStats, CURRENT_SCHEMA_VERSION,
    MAX_PAGE_SIZE,
};
pub use ingest::{
    IngestConfig, IngestReport, KeyMapping, MappingSpec, Progress, ProgressEvent, ProgressSink, RegexMapper,
    Schema, SourceFormat, SourceInput, StitchKeyMapper, StitchSpec,
};
pub use clique::{Clique, CliqueSummary};
pub use repair::{
    ClosestReport, DeprecationConfig, DeprecationReport, RecolorConfig, RecolorReport, RelabelReport,
};
pub use metrics::{calc_metrics, CurationMetrics, MetricsCache};
pub use stitch::StitchBuild;
pub use jobs::{Job, JobContext, JobInfo, JobKind, JobOutput, JobParams, JobRegistry, JobScheduler};
pub use api::{Stitcher, StitcherConfig};
