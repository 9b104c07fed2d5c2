//! Index-driven linking of a new entity to every existing holder of the
//! same (key, normalized value).

use crate::error::Result;
use crate::keys::StitchKey;
use crate::storage::{GraphTxn, GraphView};
use crate::types::{Entity, EntityId};
use std::collections::BTreeMap;

/// What one call to [`link`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkOutcome {
    pub edges_added: usize,
    /// Edges added per key
    pub by_key: BTreeMap<StitchKey, usize>,
}

impl LinkOutcome {
    pub fn merge(&mut self, other: &LinkOutcome) {
        self.edges_added += other.edges_added;
        for (key, n) in &other.by_key {
            *self.by_key.entry(*key).or_default() += n;
        }
    }
}

/// Link `entity` to all entities already indexed under each of its stitch
/// values, then index it under those values.
///
/// Linking happens before indexing, so the entity never meets itself in the
/// index. Relinking an already-indexed entity is harmless: existing edge
/// tuples are skipped.
pub fn link(txn: &GraphTxn, entity: &Entity) -> Result<LinkOutcome> {
    let mut outcome = LinkOutcome::default();

    for (key, values) in &entity.stitches {
        for value in values {
            let holders: Vec<EntityId> = txn
                .indexed(*key, value)?
                .into_iter()
                .filter(|id| *id != entity.id)
                .collect();

            for other in holders {
                if txn
                    .add_relationship(other, entity.id, *key, value, &entity.source)?
                    .is_some()
                {
                    outcome.edges_added += 1;
                    *outcome.by_key.entry(*key).or_default() += 1;
                }
            }
            txn.index_stitch(entity.id, *key, value)?;
        }
    }

    if outcome.edges_added > 0 {
        log::debug!("entity {} linked by {} edges", entity.id, outcome.edges_added);
    }
    Ok(outcome)
}
