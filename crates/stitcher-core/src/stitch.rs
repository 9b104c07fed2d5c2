//! Versioned stitch synthesis and lookup.

use crate::error::Result;
use crate::repair::partition;
use crate::storage::{GraphTxn, GraphView};
use crate::types::{sha256_hex, EntityId, PropertyValue, Stitch, KEY_PREFIX_LEN};
use chrono::Utc;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

/// Outcome of one synthesis pass.
#[derive(Debug, Clone, Serialize)]
pub struct StitchBuild {
    pub version: u32,
    pub stitches: usize,
    pub members: usize,
    /// Largest rank produced
    pub max_rank: u64,
}

impl StitchBuild {
    pub fn label(&self) -> String {
        Stitch::version_label(self.version)
    }
}

/// Digest prefix identifying a member set.
pub fn member_hash(members: &[EntityId]) -> String {
    let mut sorted = members.to_vec();
    sorted.sort_unstable();
    let digest = sha256_hex(sorted.iter().map(|id| format!("{},", id)));
    digest.chars().take(KEY_PREFIX_LEN).collect()
}

/// Build one stitch per component of the entities carrying `labels`,
/// under a newly allocated version. Earlier versions are left untouched.
pub fn build_stitches(txn: &GraphTxn, labels: &[&str]) -> Result<StitchBuild> {
    let components = partition(txn, labels)?;
    let version = txn.next_stitch_version()?;

    let mut build = StitchBuild {
        version,
        stitches: 0,
        members: 0,
        max_rank: 0,
    };

    for component in components {
        let members: Vec<EntityId> = component.into_iter().collect();
        let mut sources = BTreeSet::new();
        let mut properties: BTreeMap<String, BTreeSet<PropertyValue>> = BTreeMap::new();
        let mut external_ids = BTreeSet::new();

        for &id in &members {
            let Some(entity) = txn.entity(id)? else {
                continue;
            };
            sources.insert(entity.source.clone());
            for (name, value) in entity.property_view() {
                let merged = properties.entry(name).or_default();
                merged.extend(value.scalars().into_iter().cloned());
            }
            if let Some(external) = entity.external_id {
                external_ids.insert(external);
            }
        }

        let rank = members.len() as u64;
        let stitch = Stitch {
            id: txn.allocate_id()?,
            hash: member_hash(&members),
            version,
            rank,
            parent: members.first().copied().unwrap_or_default(),
            members,
            sources,
            external_ids,
            properties,
            created_at: Utc::now(),
        };
        txn.put_stitch(&stitch)?;

        build.stitches += 1;
        build.members += stitch.members.len();
        build.max_rank = build.max_rank.max(rank);
    }

    log::info!(
        "stitch version {}: {} stitches over {} entities (max rank {})",
        build.version,
        build.stitches,
        build.members,
        build.max_rank
    );
    Ok(build)
}

/// Every stitch of a version, by id.
pub fn list_stitches<V: GraphView + ?Sized>(view: &V, version: u32) -> Result<Vec<Stitch>> {
    let mut out = Vec::new();
    for id in view.stitch_ids(version)? {
        if let Some(stitch) = view.stitch(id)? {
            out.push(stitch);
        }
    }
    Ok(out)
}

/// Resolve `id` within `version`: first as an internal stitch id, then as an
/// external id of a member. Several external matches resolve to the highest
/// rank, then the lowest id.
pub fn resolve_stitch<V: GraphView + ?Sized>(view: &V, version: u32, id: &str) -> Result<Option<Stitch>> {
    if let Ok(internal) = id.trim().parse::<EntityId>() {
        if let Some(stitch) = view.stitch(internal)? {
            if stitch.version == version {
                return Ok(Some(stitch));
            }
        }
    }

    let mut candidates = Vec::new();
    for sid in view.stitch_external_matches(version, id)? {
        if let Some(stitch) = view.stitch(sid)? {
            candidates.push(stitch);
        }
    }
    if candidates.len() > 1 {
        log::warn!(
            "external id {} matches {} stitches in {}; using highest rank",
            id,
            candidates.len(),
            Stitch::version_label(version)
        );
    }
    Ok(candidates.into_iter().max_by_key(|s| (s.rank, Reverse(s.id))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::StitchKey;
    use crate::matcher;
    use crate::storage::GraphStore;
    use crate::types::{DataSource, EntityKind, NewEntity};
    use tempfile::TempDir;

    fn source(id_field: &str) -> DataSource {
        DataSource {
            key: "s".into(),
            name: "s".into(),
            uri: None,
            sha256: String::new(),
            size: 0,
            instances: 0,
            created_at: Utc::now(),
            id_field: Some(id_field.into()),
            name_field: None,
            stitches: BTreeMap::new(),
            fields: Vec::new(),
        }
    }

    fn setup() -> (GraphStore, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = GraphStore::open(temp.path().join("stitch.redb")).unwrap();
        store
            .write(|txn| {
                txn.put_datasource(&source("id"))?;
                let rows = [("A1", "1-1-1", "x"), ("A2", "1-1-1", "y"), ("B1", "2-2-2", "x")];
                for (ext, cas, tag) in rows {
                    let e = txn.create_entity(
                        "s",
                        NewEntity::new(EntityKind::Agent)
                            .with_external_id(ext)
                            .with_property("tag", PropertyValue::Text(tag.into()))
                            .with_stitch(StitchKey::Cas, cas),
                    )?;
                    matcher::link(txn, &e)?;
                }
                Ok(())
            })
            .unwrap();
        (store, temp)
    }

    #[test]
    fn test_build_merges_properties() {
        let (store, _temp) = setup();
        let build = store.write(|txn| build_stitches(txn, &["s"])).unwrap();
        assert_eq!(build.version, 1);
        assert_eq!(build.label(), "V1");
        assert_eq!(build.stitches, 2);
        assert_eq!(build.max_rank, 2);

        let snap = store.read().unwrap();
        let all = list_stitches(&snap, 1).unwrap();
        let big = all.iter().find(|s| s.rank == 2).unwrap();
        assert_eq!(big.members, vec![1, 2]);
        assert_eq!(big.parent, 1);
        assert_eq!(big.properties["tag"].len(), 2);
        assert_eq!(big.external_ids.len(), 2);
        assert!(!big.properties.contains_key("id"));
        assert_eq!(big.properties["I_CAS"].len(), 1);
        assert_eq!(big.hash, member_hash(&[2, 1]));
        // stitch ids come after entity ids
        assert!(big.id > 3);
    }

    #[test]
    fn test_versions_are_append_only() {
        let (store, _temp) = setup();
        store.write(|txn| build_stitches(txn, &["s"])).unwrap();
        let v1 = list_stitches(&store.read().unwrap(), 1).unwrap();
        let second = store.write(|txn| build_stitches(txn, &["s"])).unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(list_stitches(&store.read().unwrap(), 1).unwrap(), v1);
    }

    #[test]
    fn test_resolve_by_internal_and_external_id() {
        let (store, _temp) = setup();
        store.write(|txn| build_stitches(txn, &["s"])).unwrap();
        let snap = store.read().unwrap();

        let by_ext = resolve_stitch(&snap, 1, "A2").unwrap().unwrap();
        assert_eq!(by_ext.rank, 2);
        let by_id = resolve_stitch(&snap, 1, &by_ext.id.to_string()).unwrap().unwrap();
        assert_eq!(by_id, by_ext);

        assert!(resolve_stitch(&snap, 1, "nope").unwrap().is_none());
        assert!(resolve_stitch(&snap, 2, "A2").unwrap().is_none());
    }

    #[test]
    fn test_ambiguous_external_id_prefers_rank() {
        let (store, _temp) = setup();
        store
            .write(|txn| {
                // a second holder of "B1" joins the 1-1-1 component
                let e = txn.create_entity(
                    "s",
                    NewEntity::new(EntityKind::Agent)
                        .with_external_id("B1")
                        .with_stitch(StitchKey::Cas, "1-1-1"),
                )?;
                matcher::link(txn, &e)?;
                build_stitches(txn, &["s"])
            })
            .unwrap();

        let snap = store.read().unwrap();
        let hit = resolve_stitch(&snap, 1, "B1").unwrap().unwrap();
        assert_eq!(hit.rank, 3);
    }

    #[test]
    fn test_external_id_ignores_id_column() {
        let temp = TempDir::new().unwrap();
        let store = GraphStore::open(temp.path().join("clash.redb")).unwrap();
        store
            .write(|txn| {
                txn.put_datasource(&source("unii"))?;
                // (external id, value of a column literally named `id`, cas)
                let rows = [("U1", "7", "1-1-1"), ("7", "9", "2-2-2")];
                for (ext, column, cas) in rows {
                    let e = txn.create_entity(
                        "s",
                        NewEntity::new(EntityKind::Agent)
                            .with_external_id(ext)
                            .with_property("id", PropertyValue::Text(column.into()))
                            .with_stitch(StitchKey::Cas, cas),
                    )?;
                    matcher::link(txn, &e)?;
                }
                build_stitches(txn, &["s"])
            })
            .unwrap();

        let snap = store.read().unwrap();
        let hit = resolve_stitch(&snap, 1, "7").unwrap().unwrap();
        assert_eq!(hit.members, vec![2]);
        assert!(hit.external_ids.contains("7"));

        let by_external: Vec<EntityId> = snap.by_external_id("7", &[]).unwrap().iter().map(|e| e.id).collect();
        assert_eq!(by_external, vec![2]);
        let by_column: Vec<EntityId> = snap.filter("id", "7", &[]).unwrap().iter().map(|e| e.id).collect();
        assert_eq!(by_column, vec![1]);
    }

    #[test]
    fn test_equal_rank_tie_takes_lowest_id() {
        let temp = TempDir::new().unwrap();
        let store = GraphStore::open(temp.path().join("tie.redb")).unwrap();
        store
            .write(|txn| {
                txn.put_datasource(&source("id"))?;
                for cas in ["1-1-1", "2-2-2"] {
                    let e = txn.create_entity(
                        "s",
                        NewEntity::new(EntityKind::Agent)
                            .with_external_id("T")
                            .with_stitch(StitchKey::Cas, cas),
                    )?;
                    matcher::link(txn, &e)?;
                }
                build_stitches(txn, &["s"])
            })
            .unwrap();

        let snap = store.read().unwrap();
        let all = list_stitches(&snap, 1).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|s| s.rank == 1));
        let lowest = all.iter().map(|s| s.id).min().unwrap();

        let hit = resolve_stitch(&snap, 1, "T").unwrap().unwrap();
        assert_eq!(hit.id, lowest);
    }
}
