use crate::error::{Result, StitchError};
use crate::keys::StitchKey;
use crate::storage::{GraphTxn, GraphView};
use crate::types::EntityId;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Configuration for hub-value deprecation
#[derive(Debug, Clone)]
pub struct DeprecationConfig {
    /// A value linking one entity to more than this many peers is
    /// deprecated. Default: 2.
    pub limit: usize,

    /// Count only peers from the same source. Default: true.
    pub strict: bool,

    /// Report without changing anything. Default: false.
    pub dry_run: bool,
}

impl Default for DeprecationConfig {
    fn default() -> Self {
        Self {
            limit: 2,
            strict: true,
            dry_run: false,
        }
    }
}

impl DeprecationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(StitchError::Validation("deprecation limit must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Deprecation {
    pub value: String,
    /// Peer count that tripped the limit
    pub peers: usize,
    /// Source entities the value was (or would be) withdrawn from
    pub entities: Vec<EntityId>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeprecationReport {
    pub source: String,
    pub key: Option<StitchKey>,
    pub dry_run: bool,
    /// Distinct values examined
    pub evaluated: usize,
    pub deprecations: Vec<Deprecation>,
    /// Peer count -> number of values with that count
    pub histogram: BTreeMap<usize, usize>,
    pub edges_removed: usize,
}

/// Withdraw hub values of `key` among the entities of `source`.
///
/// Entities are visited in id order. For each value of the key not yet
/// examined, the peers counted are those linked to the entity by this key
/// and value and not also linked to it through any other key. When that
/// count exceeds the limit the value is deprecated on every entity of the
/// source that carries it.
pub fn deprecate_hubs(
    txn: &GraphTxn,
    source: &str,
    key: StitchKey,
    config: &DeprecationConfig,
) -> Result<DeprecationReport> {
    config.validate()?;
    if txn.datasource(source)?.is_none() {
        return Err(StitchError::DataSourceNotFound(source.to_string()));
    }

    let members: BTreeSet<EntityId> = txn.source_entities(source)?.into_iter().collect();
    let mut report = DeprecationReport {
        source: source.to_string(),
        key: Some(key),
        dry_run: config.dry_run,
        ..Default::default()
    };
    let mut visited: BTreeSet<String> = BTreeSet::new();

    for &id in &members {
        let Some(entity) = txn.entity(id)? else {
            continue;
        };
        let values: Vec<String> = entity.stitch_values(key).cloned().collect();
        if values.is_empty() {
            continue;
        }

        let edges = txn.edges(id)?;
        let linked_otherwise: BTreeSet<EntityId> = edges
            .iter()
            .filter(|e| e.key != key)
            .map(|e| e.other(id))
            .collect();

        for value in values {
            if !visited.insert(value.clone()) {
                continue;
            }

            let peers: BTreeSet<EntityId> = edges
                .iter()
                .filter(|e| e.key == key && e.value == value)
                .map(|e| e.other(id))
                .filter(|peer| !linked_otherwise.contains(peer))
                .filter(|peer| !config.strict || members.contains(peer))
                .collect();
            report.evaluated += 1;
            *report.histogram.entry(peers.len()).or_default() += 1;

            if peers.len() <= config.limit {
                continue;
            }

            let holders: Vec<EntityId> = txn
                .indexed(key, &value)?
                .into_iter()
                .filter(|h| members.contains(h))
                .collect();
            if !config.dry_run {
                for &holder in &holders {
                    report.edges_removed += txn.deprecate_value(holder, key, &value)?;
                }
            }
            log::debug!(
                "{} {}={} links {} peers, deprecating on {} entities",
                source,
                key,
                value,
                peers.len(),
                holders.len()
            );
            report.deprecations.push(Deprecation {
                value,
                peers: peers.len(),
                entities: holders,
            });
        }
    }

    log::info!(
        "{} {}: {} values evaluated, {} deprecated{}",
        source,
        key,
        report.evaluated,
        report.deprecations.len(),
        if config.dry_run { " (dry run)" } else { "" }
    );
    Ok(report)
}
