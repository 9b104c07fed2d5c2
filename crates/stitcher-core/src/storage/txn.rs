use crate::error::{Result, StitchError};
use crate::keys::StitchKey;
use crate::storage::tables::*;
use crate::storage::traits::GraphView;
use crate::types::{
    DataSource, EdgeId, Entity, EntityId, NewEntity, Payload, Stitch, StitchEdge,
};
use chrono::Utc;
use redb::{ReadTransaction, ReadableMultimapTable, ReadableTable, WriteTransaction};
use std::collections::BTreeSet;

/// Consistent read-only view of the last committed state.
pub struct GraphSnapshot {
    txn: ReadTransaction,
}

impl GraphSnapshot {
    pub(crate) fn new(txn: ReadTransaction) -> Self {
        Self { txn }
    }
}

/// An open write transaction. Changes become visible to readers only when
/// the owning [`GraphStore::write`](crate::storage::GraphStore::write)
/// call commits; any error rolls everything back.
pub struct GraphTxn {
    txn: WriteTransaction,
}

macro_rules! impl_graph_view {
    ($ty:ty) => {
        impl GraphView for $ty {
            fn entity(&self, id: EntityId) -> Result<Option<Entity>> {
                let table = self.txn.open_table(ENTITIES)?;
                let found = table.get(id)?;
                found.map(|guard| decode(guard.value())).transpose()
            }

            fn edge(&self, id: EdgeId) -> Result<Option<StitchEdge>> {
                let table = self.txn.open_table(EDGES)?;
                let found = table.get(id)?;
                found.map(|guard| decode(guard.value())).transpose()
            }

            fn edges(&self, id: EntityId) -> Result<Vec<StitchEdge>> {
                let edge_ids: Vec<EdgeId> = {
                    let index = self.txn.open_multimap_table(EDGES_BY_ENTITY)?;
                    let mut ids = Vec::new();
                    for item in index.get(id)? {
                        ids.push(item?.value());
                    }
                    ids
                };

                let table = self.txn.open_table(EDGES)?;
                let mut edges = Vec::with_capacity(edge_ids.len());
                for edge_id in edge_ids {
                    if let Some(bytes) = table.get(edge_id)? {
                        edges.push(decode(bytes.value())?);
                    }
                }
                Ok(edges)
            }

            fn payload(&self, id: EntityId) -> Result<Option<Payload>> {
                let table = self.txn.open_table(PAYLOADS)?;
                let found = table.get(id)?;
                found.map(|guard| decode(guard.value())).transpose()
            }

            fn datasource(&self, key: &str) -> Result<Option<DataSource>> {
                let table = self.txn.open_table(DATASOURCES)?;
                let found = table.get(key)?;
                found.map(|guard| decode(guard.value())).transpose()
            }

            fn datasources(&self) -> Result<Vec<DataSource>> {
                let table = self.txn.open_table(DATASOURCES)?;
                let mut out = Vec::new();
                for item in table.iter()? {
                    let (_, value) = item?;
                    out.push(decode(value.value())?);
                }
                Ok(out)
            }

            fn stitch(&self, id: EntityId) -> Result<Option<Stitch>> {
                let table = self.txn.open_table(STITCHES)?;
                let found = table.get(id)?;
                found.map(|guard| decode(guard.value())).transpose()
            }

            fn all_entity_ids(&self) -> Result<Vec<EntityId>> {
                let table = self.txn.open_table(ENTITIES)?;
                let mut ids = Vec::new();
                for item in table.iter()? {
                    let (key, _) = item?;
                    ids.push(key.value());
                }
                Ok(ids)
            }

            fn labeled(&self, label: &str) -> Result<Vec<EntityId>> {
                let index = self.txn.open_multimap_table(ENTITIES_BY_LABEL)?;
                let mut ids = Vec::new();
                for item in index.get(label)? {
                    ids.push(item?.value());
                }
                Ok(ids)
            }

            fn source_entities(&self, source: &str) -> Result<Vec<EntityId>> {
                let index = self.txn.open_multimap_table(ENTITIES_BY_SOURCE)?;
                let mut ids = Vec::new();
                for item in index.get(source)? {
                    ids.push(item?.value());
                }
                Ok(ids)
            }

            fn indexed(&self, key: StitchKey, value: &str) -> Result<Vec<EntityId>> {
                let index = self.txn.open_multimap_table(STITCH_INDEX)?;
                let index_key = stitch_index_key(key, value);
                let mut ids = Vec::new();
                for item in index.get(index_key.as_str())? {
                    ids.push(item?.value());
                }
                Ok(ids)
            }

            fn indexed_groups(&self, key: StitchKey) -> Result<Vec<(String, Vec<EntityId>)>> {
                let index = self.txn.open_multimap_table(STITCH_INDEX)?;
                let (lo, hi) = stitch_index_range(key);
                let mut groups = Vec::new();
                for item in index.range(lo.as_str()..hi.as_str())? {
                    let (index_key, values) = item?;
                    let value = stitch_index_value(index_key.value()).to_string();
                    let mut ids = Vec::new();
                    for id in values {
                        ids.push(id?.value());
                    }
                    groups.push((value, ids));
                }
                Ok(groups)
            }

            fn property_matches(&self, name: &str, value: &str) -> Result<Vec<EntityId>> {
                let index = self.txn.open_multimap_table(PROPERTY_INDEX)?;
                let index_key = property_index_key(name, value);
                let mut ids = Vec::new();
                for item in index.get(index_key.as_str())? {
                    ids.push(item?.value());
                }
                Ok(ids)
            }

            fn stitch_ids(&self, version: u32) -> Result<Vec<EntityId>> {
                let index = self.txn.open_multimap_table(STITCHES_BY_VERSION)?;
                let mut ids = Vec::new();
                for item in index.get(version)? {
                    ids.push(item?.value());
                }
                Ok(ids)
            }

            fn external_matches(&self, external: &str) -> Result<Vec<EntityId>> {
                let index = self.txn.open_multimap_table(EXTERNAL_ID_INDEX)?;
                let mut ids = Vec::new();
                for item in index.get(external)? {
                    ids.push(item?.value());
                }
                Ok(ids)
            }

            fn stitch_external_matches(&self, version: u32, external: &str) -> Result<Vec<EntityId>> {
                let index = self.txn.open_multimap_table(STITCH_EXTERNAL_INDEX)?;
                let index_key = stitch_external_key(version, external);
                let mut ids = Vec::new();
                for item in index.get(index_key.as_str())? {
                    ids.push(item?.value());
                }
                Ok(ids)
            }

            fn stitch_matches(&self, version: u32, name: &str, value: &str) -> Result<Vec<EntityId>> {
                let index = self.txn.open_multimap_table(STITCH_PROPERTY_INDEX)?;
                let index_key = stitch_property_key(version, name, value);
                let mut ids = Vec::new();
                for item in index.get(index_key.as_str())? {
                    ids.push(item?.value());
                }
                Ok(ids)
            }

            fn names(&self, kind: NameKind) -> Result<Vec<String>> {
                let table = self.txn.open_table(names_table(kind))?;
                let mut names = Vec::new();
                for item in table.iter()? {
                    let (name, count) = item?;
                    if count.value() > 0 {
                        names.push(name.value().to_string());
                    }
                }
                Ok(names)
            }

            fn meta_u64(&self, key: &str) -> Result<Option<u64>> {
                let table = self.txn.open_table(META)?;
                let found = table.get(key)?;
                Ok(found.map(|guard| decode_u64(guard.value())))
            }
        }
    };
}

impl_graph_view!(GraphSnapshot);
impl_graph_view!(GraphTxn);

impl GraphTxn {
    pub(crate) fn new(txn: WriteTransaction) -> Self {
        Self { txn }
    }

    /// Bump the commit sequence and commit.
    pub(crate) fn commit(self) -> Result<()> {
        self.incr_meta(LAST_MODIFIED_KEY, 1)?;
        self.txn.commit()?;
        Ok(())
    }

    pub(crate) fn abort(self) -> Result<()> {
        self.txn.abort()?;
        Ok(())
    }

    // === Counters ===

    pub(crate) fn set_meta_u64(&self, key: &str, value: u64) -> Result<()> {
        let mut meta = self.txn.open_table(META)?;
        meta.insert(key, value.to_le_bytes().as_slice())?;
        Ok(())
    }

    /// Add `delta` to a META counter and return the new value.
    fn incr_meta(&self, key: &str, delta: i64) -> Result<u64> {
        let current = self.meta_u64(key)?.unwrap_or(0);
        let next = if delta >= 0 {
            current.saturating_add(delta as u64)
        } else {
            current.saturating_sub(delta.unsigned_abs())
        };
        self.set_meta_u64(key, next)?;
        Ok(next)
    }

    /// Next value of a sequence. Sequences start at 1.
    pub(crate) fn next_in_sequence(&self, key: &str) -> Result<u64> {
        self.incr_meta(key, 1)
    }

    fn bump_name(&self, kind: NameKind, name: &str, delta: i64) -> Result<()> {
        let mut table = self.txn.open_table(names_table(kind))?;
        let current = table.get(name)?.map(|g| g.value()).unwrap_or(0);
        let next = if delta >= 0 {
            current.saturating_add(delta as u64)
        } else {
            current.saturating_sub(delta.unsigned_abs())
        };
        if next == 0 {
            table.remove(name)?;
        } else {
            table.insert(name, next)?;
        }
        Ok(())
    }

    // === Data sources ===

    pub fn put_datasource(&self, datasource: &DataSource) -> Result<()> {
        let bytes = encode(datasource)?;
        let mut table = self.txn.open_table(DATASOURCES)?;
        table.insert(datasource.key.as_str(), bytes.as_slice())?;
        Ok(())
    }

    /// Remove a data source and every entity it owns. Returns the number of
    /// entities removed.
    pub fn delete_datasource(&self, key: &str) -> Result<usize> {
        if self.datasource(key)?.is_none() {
            return Err(StitchError::DataSourceNotFound(key.to_string()));
        }

        let owned = self.source_entities(key)?;
        for id in &owned {
            self.delete_entity(*id)?;
        }

        let mut table = self.txn.open_table(DATASOURCES)?;
        table.remove(key)?;
        Ok(owned.len())
    }

    // === Entities ===

    /// Store a new entity owned by `source` and return its id.
    ///
    /// Labels, properties and the external id are indexed. Stitch values
    /// are recorded on the entity but not indexed; matching does that so
    /// existing holders of a value are linked first.
    pub fn create_entity(&self, source: &str, new: NewEntity) -> Result<Entity> {
        let mut datasource = self
            .datasource(source)?
            .ok_or_else(|| StitchError::DataSourceNotFound(source.to_string()))?;

        let id = self.next_in_sequence(NEXT_ID_KEY)?;
        let mut labels = new.labels;
        labels.insert(source.to_string());
        labels.insert(new.kind.as_str().to_string());

        let entity = Entity {
            id,
            kind: new.kind,
            source: source.to_string(),
            labels,
            properties: new.properties,
            stitches: new.stitches,
            deprecated: Default::default(),
            external_id: new.external_id,
            created_at: Utc::now(),
        };

        self.put_entity(&entity)?;
        {
            let mut by_source = self.txn.open_multimap_table(ENTITIES_BY_SOURCE)?;
            by_source.insert(source, id)?;
        }
        for label in &entity.labels {
            self.index_label(id, label)?;
        }
        self.index_properties(&entity, true)?;
        self.incr_meta(ENTITY_COUNT_KEY, 1)?;

        datasource.instances += 1;
        self.put_datasource(&datasource)?;
        Ok(entity)
    }

    /// Overwrite the stored record. Index maintenance is the caller's job.
    pub(crate) fn put_entity(&self, entity: &Entity) -> Result<()> {
        let bytes = encode(entity)?;
        let mut table = self.txn.open_table(ENTITIES)?;
        table.insert(entity.id, bytes.as_slice())?;
        Ok(())
    }

    fn index_label(&self, id: EntityId, label: &str) -> Result<()> {
        let inserted = {
            let mut index = self.txn.open_multimap_table(ENTITIES_BY_LABEL)?;
            !index.insert(label, id)?
        };
        if inserted {
            self.bump_name(NameKind::Label, label, 1)?;
        }
        Ok(())
    }

    fn unindex_label(&self, id: EntityId, label: &str) -> Result<()> {
        let removed = {
            let mut index = self.txn.open_multimap_table(ENTITIES_BY_LABEL)?;
            index.remove(label, id)?
        };
        if removed {
            self.bump_name(NameKind::Label, label, -1)?;
        }
        Ok(())
    }

    fn index_properties(&self, entity: &Entity, add: bool) -> Result<()> {
        let delta = if add { 1 } else { -1 };
        {
            let mut index = self.txn.open_multimap_table(PROPERTY_INDEX)?;
            for (name, value) in &entity.properties {
                for scalar in value.scalars() {
                    let key = property_index_key(name, &scalar.index_text());
                    if add {
                        index.insert(key.as_str(), entity.id)?;
                    } else {
                        index.remove(key.as_str(), entity.id)?;
                    }
                }
            }
        }
        if let Some(external) = &entity.external_id {
            let mut index = self.txn.open_multimap_table(EXTERNAL_ID_INDEX)?;
            if add {
                index.insert(external.as_str(), entity.id)?;
            } else {
                index.remove(external.as_str(), entity.id)?;
            }
        }
        for name in entity.properties.keys() {
            self.bump_name(NameKind::Property, name, delta)?;
        }
        Ok(())
    }

    pub fn add_label(&self, id: EntityId, label: &str) -> Result<bool> {
        let mut entity = self.require_entity(id)?;
        if !entity.labels.insert(label.to_string()) {
            return Ok(false);
        }
        self.put_entity(&entity)?;
        self.index_label(id, label)?;
        Ok(true)
    }

    pub fn remove_label(&self, id: EntityId, label: &str) -> Result<bool> {
        let mut entity = self.require_entity(id)?;
        if !entity.labels.remove(label) {
            return Ok(false);
        }
        self.put_entity(&entity)?;
        self.unindex_label(id, label)?;
        Ok(true)
    }

    /// Replace the label set. The source key and kind label always stay.
    pub fn set_labels(&self, id: EntityId, labels: &BTreeSet<String>) -> Result<()> {
        let mut entity = self.require_entity(id)?;
        let mut next = labels.clone();
        next.insert(entity.source.clone());
        next.insert(entity.kind.as_str().to_string());

        let removed: Vec<String> = entity.labels.difference(&next).cloned().collect();
        let added: Vec<String> = next.difference(&entity.labels).cloned().collect();
        if removed.is_empty() && added.is_empty() {
            return Ok(());
        }

        entity.labels = next;
        self.put_entity(&entity)?;
        for l in &removed {
            self.unindex_label(id, l)?;
        }
        for l in &added {
            self.index_label(id, l)?;
        }
        Ok(())
    }

    /// Replace every label matching `stale` with `labels`, in one rewrite.
    pub fn replace_labels<F>(&self, id: EntityId, stale: F, labels: &[&str]) -> Result<()>
    where
        F: Fn(&str) -> bool,
    {
        let mut entity = self.require_entity(id)?;
        let old: Vec<String> = entity
            .labels
            .iter()
            .filter(|l| stale(l) && !labels.contains(&l.as_str()))
            .cloned()
            .collect();
        let added: Vec<&str> = labels
            .iter()
            .copied()
            .filter(|l| entity.labels.insert(l.to_string()))
            .collect();
        if old.is_empty() && added.is_empty() {
            return Ok(());
        }

        for l in &old {
            entity.labels.remove(l);
        }
        self.put_entity(&entity)?;
        for l in &old {
            self.unindex_label(id, l)?;
        }
        for l in added {
            self.index_label(id, l)?;
        }
        Ok(())
    }

    /// Remove an entity with its edges, index entries and payload.
    pub fn delete_entity(&self, id: EntityId) -> Result<()> {
        let entity = self.require_entity(id)?;

        for edge in self.edges(id)? {
            self.remove_relationship(edge.id)?;
        }
        for (key, values) in &entity.stitches {
            for value in values {
                self.unindex_stitch(id, *key, value)?;
            }
        }
        for label in &entity.labels {
            self.unindex_label(id, label)?;
        }
        self.index_properties(&entity, false)?;
        {
            let mut by_source = self.txn.open_multimap_table(ENTITIES_BY_SOURCE)?;
            by_source.remove(entity.source.as_str(), id)?;
        }
        {
            let mut payloads = self.txn.open_table(PAYLOADS)?;
            payloads.remove(id)?;
        }
        {
            let mut table = self.txn.open_table(ENTITIES)?;
            table.remove(id)?;
        }
        self.incr_meta(ENTITY_COUNT_KEY, -1)?;
        Ok(())
    }

    pub fn put_payload(&self, payload: &Payload) -> Result<()> {
        let bytes = encode(payload)?;
        let mut table = self.txn.open_table(PAYLOADS)?;
        table.insert(payload.entity, bytes.as_slice())?;
        Ok(())
    }

    // === Stitch index ===

    pub fn index_stitch(&self, id: EntityId, key: StitchKey, value: &str) -> Result<()> {
        let mut index = self.txn.open_multimap_table(STITCH_INDEX)?;
        index.insert(stitch_index_key(key, value).as_str(), id)?;
        Ok(())
    }

    pub fn unindex_stitch(&self, id: EntityId, key: StitchKey, value: &str) -> Result<()> {
        let mut index = self.txn.open_multimap_table(STITCH_INDEX)?;
        index.remove(stitch_index_key(key, value).as_str(), id)?;
        Ok(())
    }

    /// Withdraw `value` from matching for one entity: its edges carrying the
    /// value are deleted, the value leaves the index and is recorded as
    /// deprecated. Returns the number of edges removed.
    pub fn deprecate_value(&self, id: EntityId, key: StitchKey, value: &str) -> Result<usize> {
        let mut entity = self.require_entity(id)?;

        let mut removed = 0;
        for edge in self.edges(id)? {
            if edge.key == key && edge.value == value {
                self.remove_relationship(edge.id)?;
                removed += 1;
            }
        }

        let held = entity
            .stitches
            .get_mut(&key)
            .map(|values| values.remove(value))
            .unwrap_or(false);
        if let Some(values) = entity.stitches.get(&key) {
            if values.is_empty() {
                entity.stitches.remove(&key);
            }
        }
        if held {
            self.unindex_stitch(id, key, value)?;
        }
        entity.deprecated.entry(key).or_default().insert(value.to_string());
        self.put_entity(&entity)?;
        Ok(removed)
    }

    // === Relationships ===

    /// Link two entities by a shared key value. Idempotent: returns `None`
    /// when the (endpoints, key, value) tuple already exists.
    pub fn add_relationship(
        &self,
        a: EntityId,
        b: EntityId,
        key: StitchKey,
        value: &str,
        source: &str,
    ) -> Result<Option<EdgeId>> {
        if a == b {
            return Err(StitchError::InvalidRelationship {
                reason: format!("self-link on entity {}", a),
            });
        }
        for id in [a, b] {
            if self.entity(id)?.is_none() {
                return Err(StitchError::InvalidRelationship {
                    reason: format!("entity {} does not exist", id),
                });
            }
        }

        let tuple = edge_tuple_key(a, b, key, value);
        {
            let tuples = self.txn.open_table(EDGE_TUPLES)?;
            if tuples.get(tuple.as_str())?.is_some() {
                return Ok(None);
            }
        }

        let (from, to) = if key.is_directed() || a < b { (a, b) } else { (b, a) };
        let edge = StitchEdge {
            id: self.next_in_sequence(NEXT_EDGE_ID_KEY)?,
            from,
            to,
            key,
            value: value.to_string(),
            source: source.to_string(),
        };

        let bytes = encode(&edge)?;
        {
            let mut edges = self.txn.open_table(EDGES)?;
            edges.insert(edge.id, bytes.as_slice())?;
        }
        {
            let mut tuples = self.txn.open_table(EDGE_TUPLES)?;
            tuples.insert(tuple.as_str(), edge.id)?;
        }
        {
            let mut adjacency = self.txn.open_multimap_table(EDGES_BY_ENTITY)?;
            adjacency.insert(from, edge.id)?;
            adjacency.insert(to, edge.id)?;
        }
        self.bump_name(NameKind::Relationship, key.as_str(), 1)?;
        self.incr_meta(EDGE_COUNT_KEY, 1)?;
        Ok(Some(edge.id))
    }

    /// Delete an edge. Returns false if it did not exist.
    pub fn remove_relationship(&self, id: EdgeId) -> Result<bool> {
        let Some(edge) = self.edge(id)? else {
            return Ok(false);
        };

        {
            let mut adjacency = self.txn.open_multimap_table(EDGES_BY_ENTITY)?;
            adjacency.remove(edge.from, id)?;
            adjacency.remove(edge.to, id)?;
        }
        {
            let mut tuples = self.txn.open_table(EDGE_TUPLES)?;
            tuples.remove(edge_tuple_key_of(&edge).as_str())?;
        }
        {
            let mut edges = self.txn.open_table(EDGES)?;
            edges.remove(id)?;
        }
        self.bump_name(NameKind::Relationship, edge.key.as_str(), -1)?;
        self.incr_meta(EDGE_COUNT_KEY, -1)?;
        Ok(true)
    }

    // === Stitches ===

    /// Allocate the next stitch version number.
    pub fn next_stitch_version(&self) -> Result<u32> {
        let version = self.next_in_sequence(STITCH_VERSION_KEY)?;
        u32::try_from(version)
            .map_err(|_| StitchError::Validation(format!("stitch version overflow: {}", version)))
    }

    pub fn allocate_id(&self) -> Result<EntityId> {
        self.next_in_sequence(NEXT_ID_KEY)
    }

    /// Store a stitch and index its merged properties under its version.
    /// Stitches are append-only.
    pub fn put_stitch(&self, stitch: &Stitch) -> Result<()> {
        if self.stitch(stitch.id)?.is_some() {
            return Err(StitchError::Validation(format!(
                "stitch {} already exists",
                stitch.id
            )));
        }

        let bytes = encode(stitch)?;
        {
            let mut table = self.txn.open_table(STITCHES)?;
            table.insert(stitch.id, bytes.as_slice())?;
        }
        {
            let mut by_version = self.txn.open_multimap_table(STITCHES_BY_VERSION)?;
            by_version.insert(stitch.version, stitch.id)?;
        }
        {
            let mut external = self.txn.open_multimap_table(STITCH_EXTERNAL_INDEX)?;
            for id in &stitch.external_ids {
                external.insert(stitch_external_key(stitch.version, id).as_str(), stitch.id)?;
            }
        }
        let mut index = self.txn.open_multimap_table(STITCH_PROPERTY_INDEX)?;
        for (name, values) in &stitch.properties {
            let texts: BTreeSet<String> = values
                .iter()
                .flat_map(|v| v.scalars())
                .map(|v| v.index_text())
                .collect();
            for text in texts {
                let key = stitch_property_key(stitch.version, name, &text);
                index.insert(key.as_str(), stitch.id)?;
            }
        }
        Ok(())
    }

    /// Advance the component generation counter.
    pub fn next_component_generation(&self) -> Result<u64> {
        self.next_in_sequence(COMPONENT_GENERATION_KEY)
    }
}
