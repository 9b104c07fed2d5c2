//! Batch passes that keep components honest: hub-value deprecation,
//! precedence-aware recoloring, closest-source selection and plain
//! component relabeling.

mod closest;
mod coloring;
mod deprecate;
mod relabel;

pub use closest::{choose_closest_source, ClosestReport};
pub use coloring::{recolor, RecolorConfig, RecolorReport};
pub use deprecate::{deprecate_hubs, Deprecation, DeprecationConfig, DeprecationReport};
pub use relabel::{partition, relabel_components, RelabelReport};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::StitchKey;
    use crate::matcher;
    use crate::storage::{GraphStore, GraphView};
    use crate::types::{DataSource, EntityId, EntityKind, NewEntity, SINGLETON_LABEL};
    use chrono::Utc;
    use std::collections::{BTreeMap, BTreeSet};
    use tempfile::TempDir;

    fn datasource(key: &str) -> DataSource {
        DataSource {
            key: key.into(),
            name: key.into(),
            uri: None,
            sha256: String::new(),
            size: 0,
            instances: 0,
            created_at: Utc::now(),
            id_field: None,
            name_field: None,
            stitches: BTreeMap::new(),
            fields: Vec::new(),
        }
    }

    fn setup() -> (GraphStore, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = GraphStore::open(temp.path().join("repair.redb")).unwrap();
        store
            .write(|txn| {
                txn.put_datasource(&datasource("src"))?;
                txn.put_datasource(&datasource("other"))
            })
            .unwrap();
        (store, temp)
    }

    fn add(store: &GraphStore, source: &str, stitches: &[(StitchKey, &str)]) -> EntityId {
        store
            .write(|txn| {
                let mut new = NewEntity::new(EntityKind::Agent);
                for (key, value) in stitches {
                    new = new.with_stitch(*key, value);
                }
                let e = txn.create_entity(source, new)?;
                matcher::link(txn, &e)?;
                Ok(e.id)
            })
            .unwrap()
    }

    fn color(store: &GraphStore, id: EntityId) -> Option<String> {
        store
            .entity(id)
            .unwrap()
            .unwrap()
            .component_label()
            .map(str::to_string)
    }

    #[test]
    fn test_hub_value_is_deprecated() {
        let (store, _temp) = setup();
        // six entities share a common synonym: each sees 5 peers
        let ids: Vec<_> = (0..6)
            .map(|_| add(&store, "src", &[(StitchKey::Name, "sodium chloride")]))
            .collect();

        let report = store
            .write(|txn| {
                deprecate_hubs(txn, "src", StitchKey::Name, &DeprecationConfig::new().with_limit(2))
            })
            .unwrap();
        assert_eq!(report.deprecations.len(), 1);
        assert_eq!(report.deprecations[0].peers, 5);
        assert_eq!(report.deprecations[0].entities, ids);
        assert_eq!(report.histogram[&5], 1);

        let snap = store.read().unwrap();
        for id in &ids {
            assert!(snap.edges(*id).unwrap().is_empty());
            let e = snap.entity(*id).unwrap().unwrap();
            assert!(e.deprecated[&StitchKey::Name].contains("SODIUM CHLORIDE"));
        }

        store.write(|txn| recolor(txn, "src", &RecolorConfig::default())).unwrap();
        let colors: BTreeSet<_> = ids.iter().map(|id| color(&store, *id).unwrap()).collect();
        assert_eq!(colors.len(), 6);
    }

    #[test]
    fn test_dry_run_changes_nothing() {
        let (store, _temp) = setup();
        for _ in 0..4 {
            add(&store, "src", &[(StitchKey::Name, "salt")]);
        }
        let before = store.stats().unwrap().edge_count;

        let report = store
            .write(|txn| {
                deprecate_hubs(
                    txn,
                    "src",
                    StitchKey::Name,
                    &DeprecationConfig::new().with_limit(2).with_dry_run(true),
                )
            })
            .unwrap();
        assert_eq!(report.deprecations.len(), 1);
        assert_eq!(report.edges_removed, 0);
        assert_eq!(store.stats().unwrap().edge_count, before);
    }

    #[test]
    fn test_peers_linked_otherwise_are_not_counted() {
        let (store, _temp) = setup();
        for i in 0..4 {
            let cas = format!("{}-00-0", i % 2);
            add(&store, "src", &[(StitchKey::Name, "salt"), (StitchKey::Cas, &cas)]);
        }
        // entity 1 shares CAS with 3, so only 2 and 4 count toward "salt"
        let report = store
            .write(|txn| deprecate_hubs(txn, "src", StitchKey::Name, &DeprecationConfig::new()))
            .unwrap();
        assert!(report.deprecations.is_empty());
        assert_eq!(report.histogram[&2], 1);
    }

    #[test]
    fn test_recolor_seeds_and_grows() {
        let (store, _temp) = setup();
        let a = add(&store, "src", &[(StitchKey::ActiveMoiety, "M1")]);
        let b = add(&store, "src", &[(StitchKey::ActiveMoiety, "M1")]);
        let c = add(&store, "src", &[(StitchKey::Unii, "U2")]);
        // outside the source: d reaches c by UNII, e reaches d by name
        let d = add(&store, "other", &[(StitchKey::Unii, "U2"), (StitchKey::Name, "x")]);
        let e = add(&store, "other", &[(StitchKey::Name, "x")]);
        // isolated pair outside the source
        let f = add(&store, "other", &[(StitchKey::Cas, "1-1-1")]);
        let g = add(&store, "other", &[(StitchKey::Cas, "1-1-1")]);

        let report = store.write(|txn| recolor(txn, "src", &RecolorConfig::default())).unwrap();
        assert_eq!(color(&store, a), color(&store, b));
        assert_ne!(color(&store, a), color(&store, c));
        assert_eq!(color(&store, d), color(&store, c));
        assert_eq!(color(&store, e), color(&store, d));
        assert_eq!(color(&store, f), color(&store, g));
        assert_ne!(color(&store, f), color(&store, c));
        assert_eq!(report.colored, 7);
        assert_eq!(report.grow_rounds, 1);

        // a second pass replaces rather than adds labels
        store.write(|txn| recolor(txn, "src", &RecolorConfig::default())).unwrap();
        let labels = store.entity(a).unwrap().unwrap().labels;
        assert_eq!(labels.iter().filter(|l| l.starts_with("CC_")).count(), 1);
    }

    #[test]
    fn test_closest_source_prunes_other_links() {
        let (store, _temp) = setup();
        let s1 = add(&store, "src", &[(StitchKey::Unii, "U1"), (StitchKey::Name, "n")]);
        let s2 = add(&store, "src", &[(StitchKey::Name, "n"), (StitchKey::Cas, "2-2-2")]);
        let x = add(
            &store,
            "other",
            &[(StitchKey::Unii, "U1"), (StitchKey::Name, "n"), (StitchKey::Cas, "2-2-2")],
        );
        store.write(|txn| recolor(txn, "src", &RecolorConfig::default())).unwrap();

        let report = store
            .write(|txn| choose_closest_source(txn, "src", &RecolorConfig::default()))
            .unwrap();
        assert_eq!(report.resolved, 1);

        let snap = store.read().unwrap();
        let neighbours = snap.neighbors(x, None).unwrap();
        assert!(neighbours.contains(&s1));
        assert!(!neighbours.contains(&s2));
        let e = snap.entity(x).unwrap().unwrap();
        assert!(e.deprecated[&StitchKey::Cas].contains("2-2-2"));
    }

    #[test]
    fn test_relabel_components() {
        let (store, _temp) = setup();
        let a = add(&store, "src", &[(StitchKey::Cas, "50-78-2")]);
        let b = add(&store, "src", &[(StitchKey::Cas, "50-78-2")]);
        let c = add(&store, "src", &[(StitchKey::Cas, "58-08-2")]);

        let first = store.write(|txn| relabel_components(txn, &["src"])).unwrap();
        assert_eq!(first.components, 1);
        assert_eq!(first.singletons, 1);
        assert_eq!(color(&store, a).as_deref(), Some("CC_1"));
        assert_eq!(color(&store, b).as_deref(), Some("CC_1"));
        let lone = store.entity(c).unwrap().unwrap();
        assert!(lone.has_label(SINGLETON_LABEL));
        assert_eq!(lone.component_label(), Some("CC_2"));

        add(&store, "src", &[(StitchKey::Cas, "58-08-2")]);
        let second = store.write(|txn| relabel_components(txn, &["src"])).unwrap();
        assert_eq!(second.generation, first.generation + 1);
        let c_entity = store.entity(c).unwrap().unwrap();
        assert!(!c_entity.has_label(SINGLETON_LABEL));
        assert!(c_entity.component_label().is_some());
        assert_eq!(c_entity.labels.iter().filter(|l| l.starts_with("CC_")).count(), 1);
    }

    #[test]
    fn test_every_singleton_gets_its_own_component_label() {
        let (store, _temp) = setup();
        let ids: Vec<_> = ["50-00-0", "64-17-5", "67-56-1"]
            .iter()
            .map(|cas| add(&store, "src", &[(StitchKey::Cas, *cas)]))
            .collect();

        let report = store.write(|txn| relabel_components(txn, &["src"])).unwrap();
        assert_eq!(report.components, 0);
        assert_eq!(report.singletons, 3);

        let snap = store.read().unwrap();
        let mut colors = BTreeSet::new();
        for id in ids {
            let e = snap.entity(id).unwrap().unwrap();
            assert!(e.has_label(SINGLETON_LABEL));
            colors.insert(e.component_label().unwrap().to_string());
        }
        assert_eq!(colors.len(), 3);
        assert_eq!(snap.labeled("CC_2").unwrap().len(), 1);
    }
}
