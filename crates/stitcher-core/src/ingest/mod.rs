//! Turning record streams into entities and key values.

mod ingestor;
pub mod mapping;
pub mod progress;
pub mod reader;
pub mod scan;

pub use ingestor::{ingest, scan_source, IngestConfig, IngestReport, SourceInput};
pub use mapping::{FieldMapper, KeyMapping, MappingSpec, RegexMapper, StitchKeyMapper, StitchSpec};
pub use progress::{channel, CounterSnapshot, JobCounters, Progress, ProgressEvent, ProgressSink};
pub use reader::{Record, RecordReader, SourceFormat};
pub use scan::{Schema, DEFAULT_SCAN_LIMIT};
