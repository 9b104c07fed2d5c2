use crate::error::Result;
use crate::repair::partition;
use crate::storage::{GraphStore, GraphView};
use crate::types::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

/// Curation statistics for one label scope, or for the whole graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurationMetrics {
    /// Scope label; `None` means every entity.
    pub label: Option<String>,

    /// Commit sequence the metrics were computed at.
    pub watermark: u64,

    pub entity_count: u64,

    /// Stitch edges with both ends in scope.
    pub stitch_count: u64,

    /// Components, singletons included.
    pub connected_component_count: u64,

    pub singleton_count: u64,

    /// Entity kind -> count
    pub entity_histogram: BTreeMap<String, u64>,

    /// Stitch key -> edge count
    pub stitch_histogram: BTreeMap<String, u64>,

    /// In-scope degree -> entity count
    pub entity_size_distribution: BTreeMap<usize, u64>,

    /// Component size -> component count
    pub component_size_histogram: BTreeMap<usize, u64>,
}

impl CurationMetrics {
    /// Get a summary string for logging
    pub fn summary(&self) -> String {
        format!(
            "{} @{}: {} entities, {} stitches, {} components ({} singletons)",
            self.label.as_deref().unwrap_or("*"),
            self.watermark,
            self.entity_count,
            self.stitch_count,
            self.connected_component_count,
            self.singleton_count
        )
    }
}

/// Walk the component partition of `label` (all entities if `None`).
pub fn calc_metrics<V: GraphView + ?Sized>(view: &V, label: Option<&str>) -> Result<CurationMetrics> {
    let labels: Vec<&str> = label.into_iter().collect();
    let components = partition(view, &labels)?;
    let scope: BTreeSet<EntityId> = components.iter().flatten().copied().collect();

    let mut metrics = CurationMetrics {
        label: label.map(str::to_string),
        watermark: view.last_modified()?,
        entity_count: scope.len() as u64,
        stitch_count: 0,
        connected_component_count: components.len() as u64,
        singleton_count: 0,
        entity_histogram: BTreeMap::new(),
        stitch_histogram: BTreeMap::new(),
        entity_size_distribution: BTreeMap::new(),
        component_size_histogram: BTreeMap::new(),
    };

    for component in &components {
        if component.len() == 1 {
            metrics.singleton_count += 1;
        }
        *metrics.component_size_histogram.entry(component.len()).or_default() += 1;
    }

    for &id in &scope {
        let Some(entity) = view.entity(id)? else {
            continue;
        };
        *metrics
            .entity_histogram
            .entry(entity.kind.as_str().to_string())
            .or_default() += 1;

        let mut degree = 0;
        for edge in view.edges(id)? {
            let other = edge.other(id);
            if !scope.contains(&other) {
                continue;
            }
            degree += 1;
            if other > id {
                metrics.stitch_count += 1;
                *metrics
                    .stitch_histogram
                    .entry(edge.key.as_str().to_string())
                    .or_default() += 1;
            }
        }
        *metrics.entity_size_distribution.entry(degree).or_default() += 1;
    }

    log::debug!("metrics {}", metrics.summary());
    Ok(metrics)
}

/// Metrics memoized per label against the store's commit sequence. Entries
/// go stale on the next committed write and are recomputed on demand.
#[derive(Debug, Default)]
pub struct MetricsCache {
    entries: RwLock<HashMap<Option<String>, CurationMetrics>>,
}

impl MetricsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, store: &GraphStore, label: Option<&str>) -> Result<CurationMetrics> {
        let snapshot = store.read()?;
        let watermark = snapshot.last_modified()?;
        let key = label.map(str::to_string);

        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            if let Some(cached) = entries.get(&key) {
                if cached.watermark == watermark {
                    return Ok(cached.clone());
                }
            }
        }

        let metrics = calc_metrics(&snapshot, label)?;
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, metrics.clone());
        Ok(metrics)
    }

    pub fn invalidate(&self) {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::StitchKey;
    use crate::matcher;
    use crate::types::{DataSource, EntityKind, NewEntity};
    use chrono::Utc;
    use tempfile::TempDir;

    fn setup() -> (GraphStore, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = GraphStore::open(temp.path().join("metrics.redb")).unwrap();
        store
            .write(|txn| {
                txn.put_datasource(&DataSource {
                    key: "s".into(),
                    name: "s".into(),
                    uri: None,
                    sha256: String::new(),
                    size: 0,
                    instances: 0,
                    created_at: Utc::now(),
                    id_field: None,
                    name_field: None,
                    stitches: BTreeMap::new(),
                    fields: Vec::new(),
                })?;
                for cas in ["1-1-1", "1-1-1", "1-1-1", "2-2-2"] {
                    let e = txn.create_entity(
                        "s",
                        NewEntity::new(EntityKind::Agent).with_stitch(StitchKey::Cas, cas),
                    )?;
                    matcher::link(txn, &e)?;
                }
                Ok(())
            })
            .unwrap();
        (store, temp)
    }

    #[test]
    fn test_counts_and_histograms() {
        let (store, _temp) = setup();
        let m = calc_metrics(&store.read().unwrap(), Some("s")).unwrap();
        assert_eq!(m.entity_count, 4);
        assert_eq!(m.stitch_count, 3);
        assert_eq!(m.connected_component_count, 2);
        assert_eq!(m.singleton_count, 1);
        assert_eq!(m.entity_histogram["Agent"], 4);
        assert_eq!(m.stitch_histogram["I_CAS"], 3);
        assert_eq!(m.entity_size_distribution[&2], 3);
        assert_eq!(m.component_size_histogram[&3], 1);
        assert!(m.singleton_count <= m.connected_component_count);
        assert!(m.connected_component_count <= m.entity_count);
    }

    #[test]
    fn test_unknown_label_is_empty() {
        let (store, _temp) = setup();
        let m = calc_metrics(&store.read().unwrap(), Some("missing")).unwrap();
        assert_eq!(m.entity_count, 0);
        assert_eq!(m.connected_component_count, 0);
    }

    #[test]
    fn test_cache_follows_watermark() {
        let (store, _temp) = setup();
        let cache = MetricsCache::new();
        let first = cache.get(&store, None).unwrap();
        let again = cache.get(&store, None).unwrap();
        assert_eq!(first, again);

        store
            .write(|txn| txn.create_entity("s", NewEntity::new(EntityKind::Agent)).map(|_| ()))
            .unwrap();
        let fresh = cache.get(&store, None).unwrap();
        assert_eq!(fresh.entity_count, 5);
        assert!(fresh.watermark > first.watermark);
    }
}
