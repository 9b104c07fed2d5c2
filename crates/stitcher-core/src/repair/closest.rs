use crate::error::{Result, StitchError};
use crate::keys::StitchKey;
use crate::repair::coloring::{best_neighbour, count_vectors, RecolorConfig};
use crate::storage::{GraphTxn, GraphView};
use crate::types::EntityId;
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClosestReport {
    pub source: String,
    /// Colored entities outside the source that were examined
    pub examined: usize,
    /// Entities with a chosen closest source entity
    pub resolved: usize,
    pub edges_removed: usize,
    pub values_deprecated: usize,
}

/// Tie each colored entity of the configured kind to a single entity of
/// `source`.
///
/// The closest source entity is the neighbour with the greatest count
/// vector over the priority keys. Edges to other source entities whose value
/// the entity also shares with the closest one are deleted; the remaining
/// values it shares only with other source entities are deprecated on it.
pub fn choose_closest_source(
    txn: &GraphTxn,
    source: &str,
    config: &RecolorConfig,
) -> Result<ClosestReport> {
    config.validate()?;
    if txn.datasource(source)?.is_none() {
        return Err(StitchError::DataSourceNotFound(source.to_string()));
    }

    let in_source: BTreeSet<EntityId> = txn.source_entities(source)?.into_iter().collect();
    let mut report = ClosestReport {
        source: source.to_string(),
        ..Default::default()
    };

    for id in txn.labeled(config.kind.as_str())? {
        if in_source.contains(&id) {
            continue;
        }
        let Some(entity) = txn.entity(id)? else {
            continue;
        };
        if entity.component_label().is_none() {
            continue;
        }
        report.examined += 1;

        let edges = txn.edges(id)?;
        let counts = count_vectors(id, &edges, config, |other| in_source.contains(&other));
        let Some(best) = best_neighbour(&counts) else {
            continue;
        };
        report.resolved += 1;

        let good: BTreeSet<&str> = edges
            .iter()
            .filter(|e| e.other(id) == best)
            .map(|e| e.value.as_str())
            .collect();

        let mut bad: BTreeSet<(StitchKey, String)> = BTreeSet::new();
        for edge in &edges {
            let other = edge.other(id);
            if other == best || !in_source.contains(&other) {
                continue;
            }
            if good.contains(edge.value.as_str()) {
                if txn.remove_relationship(edge.id)? {
                    report.edges_removed += 1;
                }
            } else {
                bad.insert((edge.key, edge.value.clone()));
            }
        }

        for (key, value) in bad {
            report.edges_removed += txn.deprecate_value(id, key, &value)?;
            report.values_deprecated += 1;
        }
    }

    log::info!(
        "closest source {}: {} examined, {} resolved, {} edges removed, {} values deprecated",
        source,
        report.examined,
        report.resolved,
        report.edges_removed,
        report.values_deprecated
    );
    Ok(report)
}
