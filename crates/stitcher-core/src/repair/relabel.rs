use crate::error::Result;
use crate::storage::{GraphTxn, GraphView};
use crate::types::{EntityId, COMPONENT_LABEL_PREFIX, MALFORMED_LABEL, SINGLETON_LABEL};
use crate::unionfind::DisjointSet;
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, Serialize)]
pub struct RelabelReport {
    pub generation: u64,
    /// Components with more than one member
    pub components: usize,
    pub singletons: usize,
    pub entities: usize,
}

/// The connected-component partition of the entities carrying `labels`
/// (all entities if empty), counting only edges inside that scope. Largest
/// component first. Entities of malformed records are left out.
pub fn partition<V: GraphView + ?Sized>(view: &V, labels: &[&str]) -> Result<Vec<BTreeSet<EntityId>>> {
    let malformed: BTreeSet<EntityId> = view.labeled(MALFORMED_LABEL)?.into_iter().collect();
    let scope: BTreeSet<EntityId> = view
        .entity_ids(labels)?
        .into_iter()
        .filter(|id| !malformed.contains(id))
        .collect();
    let mut ds = DisjointSet::new();
    for &id in &scope {
        ds.add(id);
        for edge in view.edges(id)? {
            let other = edge.other(id);
            if other > id && scope.contains(&other) {
                ds.union(id, other);
            }
        }
    }
    Ok(ds.components())
}

/// Recompute components and rewrite their labels as a new generation:
/// every member of the n-th component gets `CC_<n>`, and isolated entities
/// also get `SINGLETON`. Earlier such labels are replaced.
pub fn relabel_components(txn: &GraphTxn, labels: &[&str]) -> Result<RelabelReport> {
    let components = partition(txn, labels)?;
    let generation = txn.next_component_generation()?;

    let stale = |l: &str| l.starts_with(COMPONENT_LABEL_PREFIX) || l == SINGLETON_LABEL;
    let mut report = RelabelReport {
        generation,
        ..Default::default()
    };

    for (n, members) in components.iter().enumerate() {
        report.entities += members.len();
        let label = format!("{}{}", COMPONENT_LABEL_PREFIX, n + 1);
        let mut next = vec![label.as_str()];
        if members.len() > 1 {
            report.components += 1;
        } else {
            report.singletons += 1;
            next.push(SINGLETON_LABEL);
        }
        for &id in members {
            txn.replace_labels(id, stale, &next)?;
        }
    }

    log::info!(
        "component generation {}: {} components, {} singletons over {} entities",
        generation,
        report.components,
        report.singletons,
        report.entities
    );
    Ok(report)
}
