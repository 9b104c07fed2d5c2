//! Exact-duplicate detection: groups of entities sharing one key value that
//! are also pairwise linked by that key and value.

use crate::error::Result;
use crate::keys::StitchKey;
use crate::storage::GraphView;
use crate::types::EntityId;
use serde::Serialize;
use std::collections::BTreeSet;
use std::ops::ControlFlow;

/// Smallest clique reported unless the caller raises it.
pub const DEFAULT_MIN_CLIQUE_SIZE: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Clique {
    pub key: StitchKey,
    pub value: String,
    /// Ascending
    pub members: Vec<EntityId>,
}

impl Clique {
    pub fn size(&self) -> usize {
        self.members.len()
    }
}

/// Totals of one enumeration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CliqueSummary {
    /// Value groups with at least `min_size` members in scope
    pub groups: usize,
    pub cliques: usize,
    /// Groups that failed full connectivity
    pub rejected: usize,
    /// Whether the visitor ended the walk early
    pub stopped: bool,
}

/// Walk every value of `key`, reporting fully connected groups to `visitor`.
///
/// Only entities carrying every label in `labels` take part. A group passes
/// when every pair of its members shares a direct edge of this key and
/// value; otherwise it is skipped. Returning `ControlFlow::Break` from the
/// visitor stops the walk.
pub fn enumerate<V, F>(
    view: &V,
    key: StitchKey,
    labels: &[&str],
    min_size: usize,
    mut visitor: F,
) -> Result<CliqueSummary>
where
    V: GraphView + ?Sized,
    F: FnMut(&Clique) -> ControlFlow<()>,
{
    let min_size = min_size.max(DEFAULT_MIN_CLIQUE_SIZE);
    let scope: Option<BTreeSet<EntityId>> = if labels.is_empty() {
        None
    } else {
        Some(view.entity_ids(labels)?.into_iter().collect())
    };

    let mut summary = CliqueSummary::default();
    for (value, ids) in view.indexed_groups(key)? {
        let members: BTreeSet<EntityId> = ids
            .into_iter()
            .filter(|id| scope.as_ref().map_or(true, |s| s.contains(id)))
            .collect();
        if members.len() < min_size {
            continue;
        }
        summary.groups += 1;

        if !fully_connected(view, key, &value, &members)? {
            summary.rejected += 1;
            continue;
        }

        summary.cliques += 1;
        let clique = Clique {
            key,
            value,
            members: members.into_iter().collect(),
        };
        if visitor(&clique).is_break() {
            summary.stopped = true;
            break;
        }
    }

    log::debug!(
        "{}: {} cliques out of {} groups ({} rejected)",
        key,
        summary.cliques,
        summary.groups,
        summary.rejected
    );
    Ok(summary)
}

/// Collect every clique of `key` in scope.
pub fn cliques<V>(view: &V, key: StitchKey, labels: &[&str], min_size: usize) -> Result<Vec<Clique>>
where
    V: GraphView + ?Sized,
{
    let mut out = Vec::new();
    enumerate(view, key, labels, min_size, |c| {
        out.push(c.clone());
        ControlFlow::Continue(())
    })?;
    Ok(out)
}

fn fully_connected<V>(view: &V, key: StitchKey, value: &str, members: &BTreeSet<EntityId>) -> Result<bool>
where
    V: GraphView + ?Sized,
{
    for &id in members {
        let linked: BTreeSet<EntityId> = view
            .edges(id)?
            .into_iter()
            .filter(|e| e.key == key && e.value == value)
            .map(|e| e.other(id))
            .collect();
        if members.iter().any(|other| *other != id && !linked.contains(other)) {
            return Ok(false);
        }
    }
    Ok(true)
}
