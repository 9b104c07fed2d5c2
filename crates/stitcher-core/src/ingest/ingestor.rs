use crate::error::{Result, StitchError};
use crate::ingest::mapping::MappingSpec;
use crate::ingest::progress::{Progress, DEFAULT_PROGRESS_CAPACITY};
use crate::ingest::reader::RecordReader;
use crate::ingest::scan::{scan, Schema, DEFAULT_SCAN_LIMIT};
use crate::matcher;
use crate::storage::{GraphStore, GraphView};
use crate::types::{DataSource, NewEntity, Payload, MALFORMED_LABEL};
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;

/// Configuration for ingestion passes
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Records inspected by the scan pass. Default: 1000.
    pub scan_limit: usize,

    /// Capacity of progress channels created for jobs. Default: 1024.
    pub progress_capacity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            scan_limit: DEFAULT_SCAN_LIMIT,
            progress_capacity: DEFAULT_PROGRESS_CAPACITY,
        }
    }
}

impl IngestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scan_limit(mut self, limit: usize) -> Self {
        self.scan_limit = limit;
        self
    }

    pub fn with_progress_capacity(mut self, capacity: usize) -> Self {
        self.progress_capacity = capacity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.scan_limit == 0 {
            return Err(StitchError::Validation("scan_limit must be > 0".into()));
        }
        if self.progress_capacity == 0 {
            return Err(StitchError::Validation("progress_capacity must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum InputData {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// Bytes to ingest, from a file or from memory.
#[derive(Debug, Clone)]
pub struct SourceInput {
    pub name: String,
    pub uri: Option<String>,
    data: InputData,
}

impl SourceInput {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            name,
            uri: Some(path.display().to_string()),
            data: InputData::Path(path),
        }
    }

    pub fn bytes(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            uri: None,
            data: InputData::Bytes(bytes.into()),
        }
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn open(&self) -> Result<Box<dyn Read + '_>> {
        Ok(match &self.data {
            InputData::Path(path) => Box::new(BufReader::new(File::open(path)?)),
            InputData::Bytes(bytes) => Box::new(bytes.as_slice()),
        })
    }

    /// Full SHA-256 hex digest and byte size of the content.
    pub fn digest(&self) -> Result<(String, u64)> {
        let mut reader = self.open()?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        let mut size = 0u64;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            size += n as u64;
        }
        Ok((hex::encode(hasher.finalize()), size))
    }
}

/// Result of one ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub datasource: DataSource,
    /// False when identical content was already registered.
    pub created: bool,
    pub entities_added: u64,
    pub edges_added: u64,
    pub record_errors: u64,
}

impl IngestReport {
    fn existing(datasource: DataSource) -> Self {
        Self {
            datasource,
            created: false,
            entities_added: 0,
            edges_added: 0,
            record_errors: 0,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} [{}]: created={}, entities={}, edges={}, errors={}",
            self.datasource.name,
            self.datasource.key,
            self.created,
            self.entities_added,
            self.edges_added,
            self.record_errors
        )
    }
}

/// Schema preview of a source, without ingesting it.
pub fn scan_source(input: &SourceInput, spec: &MappingSpec, limit: usize) -> Result<Schema> {
    let reader = RecordReader::new(input.open()?, spec.format, spec.delimiter_byte()?)?;
    scan(reader, limit)
}

/// Register a source and ingest every record in one transaction.
///
/// Content that is already registered (same digest) is a no-op returning the
/// existing data source. A failure anywhere rolls back the whole source.
pub fn ingest(
    store: &GraphStore,
    input: &SourceInput,
    spec: &MappingSpec,
    config: &IngestConfig,
    progress: &Progress,
) -> Result<IngestReport> {
    config.validate()?;
    let mapping = spec.key_mapping()?;
    let delimiter = spec.delimiter_byte()?;
    let name = spec.name.clone().unwrap_or_else(|| input.name.clone());

    let (digest, size) = input.digest()?;
    let key = DataSource::key_for_digest(&digest);

    if let Some(existing) = store.read()?.datasource(&key)? {
        log::info!("source {} already ingested as {}", name, key);
        return Ok(IngestReport::existing(existing));
    }

    log::info!("ingesting {} ({} bytes) as {}", name, size, key);
    let schema = scan(RecordReader::new(input.open()?, spec.format, delimiter)?, config.scan_limit)?;

    let report = store.write(|txn| {
        // A concurrent ingestion of the same bytes may have committed since
        // the check above.
        if let Some(existing) = txn.datasource(&key)? {
            return Ok(IngestReport::existing(existing));
        }

        txn.put_datasource(&DataSource {
            key: key.clone(),
            name: name.clone(),
            uri: input.uri.clone(),
            sha256: digest.clone(),
            size,
            instances: 0,
            created_at: Utc::now(),
            id_field: spec.id_field.clone(),
            name_field: spec.name_field.clone(),
            stitches: mapping.declared(),
            fields: schema.fields.clone(),
        })?;

        let mut entities_added = 0;
        let mut edges_added = 0;
        let mut record_errors = 0;

        for record in RecordReader::new(input.open()?, spec.format, delimiter)? {
            let record = record?;

            let mut new = NewEntity::new(spec.kind);
            if let Some(reason) = &record.malformed {
                log::warn!("{}: record {} malformed: {}", key, record.ordinal, reason);
                progress.error(Some(&key), Some(record.ordinal), reason.clone());
                record_errors += 1;
                new = new.with_label(MALFORMED_LABEL);
            } else {
                for (field, values) in &record.fields {
                    new.properties.insert(field.clone(), schema.convert(field, values));
                }
                new.stitches = mapping.apply(&record);
                if let Some(id_field) = &spec.id_field {
                    new.external_id = record.first(id_field).map(str::to_string);
                }
            }

            let entity = txn.create_entity(&key, new)?;
            txn.put_payload(&Payload {
                entity: entity.id,
                source: key.clone(),
                ordinal: record.ordinal,
                raw: record.raw,
            })?;
            edges_added += matcher::link(txn, &entity)?.edges_added as u64;
            entities_added += 1;
            progress.added(&key, entity.id, record.ordinal);
        }

        let datasource = txn
            .datasource(&key)?
            .ok_or_else(|| StitchError::DataSourceNotFound(key.clone()))?;
        Ok(IngestReport {
            datasource,
            created: true,
            entities_added,
            edges_added,
            record_errors,
        })
    })?;

    log::info!("ingested {}", report.summary());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::mapping::StitchSpec;
    use crate::ingest::progress::{channel, ProgressEvent};
    use crate::ingest::reader::SourceFormat;
    use crate::keys::StitchKey;
    use crate::types::PropertyValue;
    use tempfile::TempDir;

    const SOURCE: &str = "id,name,cas\n1,Aspirin,50-78-2\n2,ASA,50-78-2\n3,Caffeine,58-08-2\n";

    fn setup() -> (GraphStore, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = GraphStore::open(temp.path().join("ingest.redb")).unwrap();
        (store, temp)
    }

    fn spec() -> MappingSpec {
        MappingSpec::new()
            .with_id_field("id")
            .with_stitch(StitchSpec::new(StitchKey::Cas, "cas"))
            .with_stitch(StitchSpec::new(StitchKey::Name, "name"))
    }

    #[test]
    fn test_ingest_creates_entities_and_edges() {
        let (store, _temp) = setup();
        let report = ingest(
            &store,
            &SourceInput::bytes("a.csv", SOURCE),
            &spec(),
            &IngestConfig::default(),
            &Progress::none(),
        )
        .unwrap();

        assert!(report.created);
        assert_eq!(report.entities_added, 3);
        assert_eq!(report.edges_added, 1);
        assert_eq!(report.datasource.instances, 3);
        assert_eq!(report.datasource.key.len(), 9);

        let snap = store.read().unwrap();
        let e = snap.entity(1).unwrap().unwrap();
        assert_eq!(e.properties["id"], PropertyValue::Integer(1));
        assert_eq!(e.external_id.as_deref(), Some("1"));
        assert_eq!(snap.payload(2).unwrap().unwrap().raw, "2,ASA,50-78-2");
        assert_eq!(snap.filter("id", "3", &[]).unwrap()[0].id, 3);
    }

    #[test]
    fn test_same_bytes_is_noop() {
        let (store, _temp) = setup();
        let input = SourceInput::bytes("a.csv", SOURCE);
        let first = ingest(&store, &input, &spec(), &IngestConfig::default(), &Progress::none()).unwrap();
        let again = ingest(
            &store,
            &SourceInput::bytes("renamed.csv", SOURCE),
            &spec(),
            &IngestConfig::default(),
            &Progress::none(),
        )
        .unwrap();

        assert!(!again.created);
        assert_eq!(again.datasource.key, first.datasource.key);
        assert_eq!(store.count(&[]).unwrap(), 3);
        assert_eq!(store.datasources().unwrap().len(), 1);
    }

    #[test]
    fn test_json_line_with_invalid_utf8_is_skipped() {
        let (store, _temp) = setup();
        let mut data = b"{\"id\": 1, \"cas\": \"50-78-2\"}\n".to_vec();
        data.extend_from_slice(b"{\"id\": 2, \"cas\": \"\xff\xfe\"}\n");
        data.extend_from_slice(b"{\"id\": 3, \"cas\": \"50-78-2\"}\n");

        let report = ingest(
            &store,
            &SourceInput::bytes("bad.jsonl", data),
            &spec().with_format(SourceFormat::JsonLines),
            &IngestConfig::default(),
            &Progress::none(),
        )
        .unwrap();

        assert_eq!(report.entities_added, 3);
        assert_eq!(report.record_errors, 1);
        assert_eq!(report.edges_added, 1);
        assert!(store.entity(2).unwrap().unwrap().stitches.is_empty());
    }

    #[test]
    fn test_malformed_record_keeps_count() {
        let (store, _temp) = setup();
        let (sink, rx) = channel(16);
        let report = ingest(
            &store,
            &SourceInput::bytes("bad.csv", "id,cas\n1,50-78-2\n2\n3,50-78-2\n"),
            &spec(),
            &IngestConfig::default(),
            &Progress::none().with_sink(sink),
        )
        .unwrap();

        assert_eq!(report.entities_added, 3);
        assert_eq!(report.record_errors, 1);
        let bad = store.entity(2).unwrap().unwrap();
        assert!(bad.properties.is_empty());
        assert!(bad.stitches.is_empty());
        assert!(bad.has_label(MALFORMED_LABEL));

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 4);
        assert!(events
            .iter()
            .any(|e| matches!(e, ProgressEvent::Error { ordinal: Some(1), .. })));
    }

    #[test]
    fn test_malformed_record_is_not_a_singleton() {
        let (store, _temp) = setup();
        let report = ingest(
            &store,
            &SourceInput::bytes("bad.csv", "id,cas\n1,50-78-2\n2\n3,50-78-2\n"),
            &spec(),
            &IngestConfig::default(),
            &Progress::none(),
        )
        .unwrap();

        let key = report.datasource.key.clone();
        let metrics = crate::metrics::calc_metrics(&store.read().unwrap(), Some(&key)).unwrap();
        assert_eq!(metrics.entity_count, 2);
        assert_eq!(metrics.connected_component_count, 1);
        assert_eq!(metrics.singleton_count, 0);

        let relabel = store
            .write(|txn| crate::repair::relabel_components(txn, &[key.as_str()]))
            .unwrap();
        assert_eq!(relabel.singletons, 0);
        assert!(!store.entity(2).unwrap().unwrap().has_label(crate::types::SINGLETON_LABEL));
    }

    #[test]
    fn test_scan_source_preview() {
        let schema = scan_source(&SourceInput::bytes("a.csv", SOURCE), &spec(), 2).unwrap();
        assert_eq!(schema.records, 2);
        assert_eq!(schema.fields.len(), 3);
    }

    #[test]
    fn test_file_input() {
        let (store, temp) = setup();
        let path = temp.path().join("source.tsv");
        std::fs::write(&path, "id\tcas\n1\t50-78-2\n").unwrap();
        let report = ingest(
            &store,
            &SourceInput::path(&path),
            &spec().with_delimiter('\t'),
            &IngestConfig::default(),
            &Progress::none(),
        )
        .unwrap();
        assert_eq!(report.datasource.name, "source.tsv");
        assert_eq!(report.datasource.size, 17);
    }
}
