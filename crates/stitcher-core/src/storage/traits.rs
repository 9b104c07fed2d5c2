use crate::error::{Result, StitchError};
use crate::keys::StitchKey;
use crate::storage::filters::Page;
use crate::storage::tables::{NameKind, ENTITY_COUNT_KEY, LAST_MODIFIED_KEY};
use crate::types::{DataSource, EdgeId, Entity, EntityId, Payload, Stitch, StitchEdge};
use std::collections::{BTreeSet, VecDeque};

/// Read access to the entity graph.
///
/// Implemented by read snapshots and by write transactions, so every
/// algorithm can run against committed state or against its own pending
/// changes with the same code.
pub trait GraphView {
    // === Records ===

    /// Retrieve an entity by internal id
    fn entity(&self, id: EntityId) -> Result<Option<Entity>>;

    fn edge(&self, id: EdgeId) -> Result<Option<StitchEdge>>;

    /// All stitch edges touching an entity, in either direction
    fn edges(&self, id: EntityId) -> Result<Vec<StitchEdge>>;

    fn payload(&self, id: EntityId) -> Result<Option<Payload>>;

    fn datasource(&self, key: &str) -> Result<Option<DataSource>>;

    fn datasources(&self) -> Result<Vec<DataSource>>;

    fn stitch(&self, id: EntityId) -> Result<Option<Stitch>>;

    // === Indexes ===

    /// Every entity id, ascending
    fn all_entity_ids(&self) -> Result<Vec<EntityId>>;

    /// Entity ids carrying a label, ascending
    fn labeled(&self, label: &str) -> Result<Vec<EntityId>>;

    /// Entity ids owned by a data source
    fn source_entities(&self, source: &str) -> Result<Vec<EntityId>>;

    /// Entity ids indexed under an exact (key, normalized value)
    fn indexed(&self, key: StitchKey, value: &str) -> Result<Vec<EntityId>>;

    /// Every indexed value of a key with its entity ids, ordered by value
    fn indexed_groups(&self, key: StitchKey) -> Result<Vec<(String, Vec<EntityId>)>>;

    /// Entity ids whose property `name` has the literal value `value`
    fn property_matches(&self, name: &str, value: &str) -> Result<Vec<EntityId>>;

    fn stitch_ids(&self, version: u32) -> Result<Vec<EntityId>>;

    /// Entity ids whose external id is exactly `external`
    fn external_matches(&self, external: &str) -> Result<Vec<EntityId>>;

    /// Stitch ids of a version with a member carrying the external id
    fn stitch_external_matches(&self, version: u32, external: &str) -> Result<Vec<EntityId>>;

    /// Stitch ids of a version whose merged property matches the literal
    fn stitch_matches(&self, version: u32, name: &str, value: &str) -> Result<Vec<EntityId>>;

    /// Distinct names currently in use
    fn names(&self, kind: NameKind) -> Result<Vec<String>>;

    fn meta_u64(&self, key: &str) -> Result<Option<u64>>;

    // === Derived queries ===

    /// Ids carrying every given label, ascending. No labels means all.
    fn entity_ids(&self, labels: &[&str]) -> Result<Vec<EntityId>> {
        let Some((first, rest)) = labels.split_first() else {
            return self.all_entity_ids();
        };

        let mut ids = self.labeled(first)?;
        for label in rest {
            let other: BTreeSet<EntityId> = self.labeled(label)?.into_iter().collect();
            ids.retain(|id| other.contains(id));
        }
        Ok(ids)
    }

    /// One page of entities ordered by id
    fn entities(&self, page: Page, labels: &[&str]) -> Result<Vec<Entity>> {
        let ids = self.entity_ids(labels)?;
        let mut out = Vec::new();
        for id in ids.into_iter().skip(page.skip).take(page.top.min(super::MAX_PAGE_SIZE)) {
            if let Some(entity) = self.entity(id)? {
                out.push(entity);
            }
        }
        Ok(out)
    }

    /// Entities whose property matches a literal, through the value index.
    /// Unbounded.
    fn filter(&self, name: &str, value: &str, labels: &[&str]) -> Result<Vec<Entity>> {
        let mut out = Vec::new();
        for id in self.property_matches(name, value)? {
            if let Some(entity) = self.entity(id)? {
                if entity.has_labels(labels) {
                    out.push(entity);
                }
            }
        }
        Ok(out)
    }

    /// Entities registered under an external id. Property values are never
    /// consulted, whatever the column is called.
    fn by_external_id(&self, external: &str, labels: &[&str]) -> Result<Vec<Entity>> {
        let mut out = Vec::new();
        for id in self.external_matches(external)? {
            if let Some(entity) = self.entity(id)? {
                if entity.has_labels(labels) {
                    out.push(entity);
                }
            }
        }
        Ok(out)
    }

    fn count(&self, labels: &[&str]) -> Result<u64> {
        match labels {
            [] => Ok(self.meta_u64(ENTITY_COUNT_KEY)?.unwrap_or(0)),
            [label] => Ok(self.labeled(label)?.len() as u64),
            _ => Ok(self.entity_ids(labels)?.len() as u64),
        }
    }

    /// Neighbour ids, optionally restricted to one key
    fn neighbors(&self, id: EntityId, key: Option<StitchKey>) -> Result<BTreeSet<EntityId>> {
        Ok(self
            .edges(id)?
            .into_iter()
            .filter(|e| key.map_or(true, |k| e.key == k))
            .map(|e| e.other(id))
            .collect())
    }

    /// Everything reachable from `root` over any stitch edge, ordered by id.
    /// `None` if `root` does not exist.
    fn component(&self, root: EntityId) -> Result<Option<Vec<Entity>>> {
        if self.entity(root)?.is_none() {
            return Ok(None);
        }

        let mut seen = BTreeSet::from([root]);
        let mut queue = VecDeque::from([root]);
        while let Some(id) = queue.pop_front() {
            for next in self.neighbors(id, None)? {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }

        let mut members = Vec::with_capacity(seen.len());
        for id in seen {
            if let Some(entity) = self.entity(id)? {
                members.push(entity);
            }
        }
        Ok(Some(members))
    }

    /// Commit sequence of the last write visible to this view
    fn last_modified(&self) -> Result<u64> {
        Ok(self.meta_u64(LAST_MODIFIED_KEY)?.unwrap_or(0))
    }

    fn require_entity(&self, id: EntityId) -> Result<Entity> {
        self.entity(id)?.ok_or(StitchError::EntityNotFound(id))
    }
}
