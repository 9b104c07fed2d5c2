use stitcher_core::{
    EntityKind, GraphView, JobKind, JobOutput, JobParams, MappingSpec, NewEntity, Page, SourceInput, StitchError,
    StitchKey, StitchSpec, Stitcher, StitcherConfig, DeprecationConfig, MAX_PAGE_SIZE,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::TempDir;

fn open() -> (Stitcher, TempDir) {
    let _ = env_logger::builder().is_test(true).try_init();
    let temp = TempDir::new().unwrap();
    let stitcher = Stitcher::open(temp.path().join("graph.redb"), StitcherConfig::default()).unwrap();
    (stitcher, temp)
}

fn cas_spec() -> MappingSpec {
    MappingSpec::new()
        .with_id_field("id")
        .with_stitch(StitchSpec::new(StitchKey::Cas, "cas"))
}

#[test]
fn test_reingesting_identical_bytes_is_a_noop() {
    let (stitcher, _temp) = open();
    let data = "id,cas\nA1,50-78-2\nA2,50-78-2\nA3,58-08-2\n";

    let first = stitcher.ingest(&SourceInput::bytes("a.csv", data), &cas_spec()).unwrap();
    assert!(first.created);
    // a different name does not make it a different source
    let second = stitcher.ingest(&SourceInput::bytes("renamed.csv", data), &cas_spec()).unwrap();
    assert!(!second.created);
    assert_eq!(second.datasource.key, first.datasource.key);

    assert_eq!(stitcher.datasources().unwrap().len(), 1);
    assert_eq!(stitcher.count(&[]), Some(3));
    assert_eq!(stitcher.datasources().unwrap()[0].instances, 3);
}

#[test]
fn test_concurrent_ingestion_registers_once() {
    let (stitcher, _temp) = open();
    let stitcher = Arc::new(stitcher);
    let data = "id,cas\nA1,50-78-2\nA2,50-78-2\n";

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let stitcher = stitcher.clone();
            std::thread::spawn(move || {
                stitcher
                    .ingest(&SourceInput::bytes("a.csv", data), &cas_spec())
                    .unwrap()
                    .created
            })
        })
        .collect();
    let created = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|created| *created)
        .count();
    assert_eq!(created, 1);

    assert_eq!(stitcher.datasources().unwrap().len(), 1);
    assert_eq!(stitcher.count(&[]), Some(2));
}

#[test]
fn test_cas_components_span_sources() {
    let (stitcher, _temp) = open();
    let a = stitcher
        .ingest(
            &SourceInput::bytes("a.csv", "id,cas\nA1,50-78-2\nA2, 50-78-2\nA3,58-08-2\n"),
            &cas_spec(),
        )
        .unwrap();
    let b = stitcher
        .ingest(&SourceInput::bytes("b.csv", "id,cas\nB1,50-78-2\n"), &cas_spec())
        .unwrap();
    assert_eq!(a.edges_added, 1);
    assert_eq!(b.edges_added, 2);

    let b1 = &stitcher.filter("id", "B1", &[]).unwrap()[0];
    let component = stitcher.component(b1.id).unwrap().unwrap();
    let sources: BTreeSet<_> = component.iter().map(|e| e.source.clone()).collect();
    assert_eq!(component.len(), 3);
    assert_eq!(sources.len(), 2);

    let metrics = stitcher.metrics(Some("Agent")).unwrap();
    assert_eq!(metrics.entity_count, 4);
    assert_eq!(metrics.connected_component_count, 2);
    assert_eq!(metrics.singleton_count, 1);

    let only_a = stitcher.metrics(Some(a.datasource.key.as_str())).unwrap();
    assert_eq!(only_a.entity_count, 3);
    assert!(only_a.singleton_count <= only_a.connected_component_count);
    assert!(only_a.connected_component_count <= only_a.entity_count);
}

#[test]
fn test_clique_requires_every_pair() {
    let (stitcher, _temp) = open();
    stitcher
        .ingest(
            &SourceInput::bytes("a.csv", "id,cas\n1,50-78-2\n2,50-78-2\n3,50-78-2\n4,50-78-2\n5,64-17-5\n"),
            &cas_spec(),
        )
        .unwrap();

    let cliques = stitcher.cliques(StitchKey::Cas, &[]).unwrap();
    assert_eq!(cliques.len(), 1);
    assert_eq!(cliques[0].size(), 4);
    assert_eq!(stitcher.stats().unwrap().edge_count, 6);

    let member = cliques[0].members[0];
    let edge = stitcher.edges(member).unwrap()[0].id;
    stitcher.store().write(|txn| txn.remove_relationship(edge)).unwrap();

    assert!(stitcher.cliques(StitchKey::Cas, &[]).unwrap().is_empty());
}

#[test]
fn test_paging_is_capped() {
    let (stitcher, _temp) = open();
    let mut data = String::from("id,cas\n");
    for i in 0..1200 {
        data.push_str(&format!("R{},{}-00-1\n", i, i));
    }
    stitcher.ingest(&SourceInput::bytes("big.csv", data), &cas_spec()).unwrap();

    let page = stitcher.entities(Page::new(0, 5000), &[]).unwrap();
    assert_eq!(page.len(), MAX_PAGE_SIZE);
    let rest = stitcher.entities(Page::new(1000, 5000), &[]).unwrap();
    assert_eq!(rest.len(), 200);
    assert!(page.windows(2).all(|w| w[0].id < w[1].id));
}

#[test]
fn test_hub_deprecation_then_recolor() {
    let (stitcher, _temp) = open();
    let spec = MappingSpec::new()
        .with_id_field("id")
        .with_stitch(StitchSpec::new(StitchKey::Name, "synonym"));
    let mut data = String::from("id,synonym\n");
    for i in 0..6 {
        data.push_str(&format!("S{},Table Salt\n", i));
    }
    let report = stitcher.ingest(&SourceInput::bytes("salts.csv", data), &spec).unwrap();
    let source = report.datasource.key;

    let deprecated = stitcher
        .deprecate_with(&source, StitchKey::Name, &DeprecationConfig::new().with_limit(2))
        .unwrap();
    assert_eq!(deprecated.deprecations.len(), 1);
    assert_eq!(deprecated.deprecations[0].value, "TABLE SALT");
    assert_eq!(stitcher.stats().unwrap().edge_count, 0);

    stitcher.recolor(&source).unwrap();
    let colors: BTreeSet<String> = stitcher
        .entities(Page::default(), &[source.as_str()])
        .unwrap()
        .iter()
        .map(|e| e.component_label().unwrap().to_string())
        .collect();
    assert_eq!(colors.len(), 6);
}

#[test]
fn test_failed_write_rolls_back() {
    let (stitcher, _temp) = open();
    let report = stitcher
        .ingest(&SourceInput::bytes("a.csv", "id,cas\nA1,50-78-2\n"), &cas_spec())
        .unwrap();
    let source = report.datasource.key;
    let before = stitcher.stats().unwrap();

    let result: Result<(), StitchError> = stitcher.store().write(|txn| {
        let e = txn.create_entity(&source, NewEntity::new(EntityKind::Agent).with_stitch(StitchKey::Cas, "50-78-2"))?;
        stitcher_core::matcher::link(txn, &e)?;
        txn.add_relationship(e.id, e.id, StitchKey::Cas, "50-78-2", &source)?;
        Ok(())
    });
    assert!(matches!(result, Err(StitchError::InvalidRelationship { .. })));

    let after = stitcher.stats().unwrap();
    assert_eq!(after.entity_count, before.entity_count);
    assert_eq!(after.edge_count, before.edge_count);
    assert_eq!(after.last_modified, before.last_modified);
    assert_eq!(stitcher.datasources().unwrap()[0].instances, 1);
    assert_eq!(stitcher.store().read().unwrap().indexed(StitchKey::Cas, "50-78-2").unwrap().len(), 1);
}

#[test]
fn test_stitch_versions_and_lookup() {
    let (stitcher, _temp) = open();
    stitcher
        .ingest(
            &SourceInput::bytes("a.csv", "id,cas\nA1,50-78-2\nA2,50-78-2\nA3,58-08-2\n"),
            &cas_spec(),
        )
        .unwrap();

    let v1 = stitcher.build_stitches(None).unwrap();
    let hit = stitcher.stitch(v1.version, "A2").unwrap().unwrap();
    assert_eq!(hit.rank, 2);
    assert_eq!(hit.members.len(), 2);

    stitcher
        .ingest(&SourceInput::bytes("b.csv", "id,cas\nB1,58-08-2\n"), &cas_spec())
        .unwrap();
    let v2 = stitcher.build_stitches(None).unwrap();
    assert_eq!(v2.version, v1.version + 1);

    // earlier version is untouched
    assert_eq!(stitcher.stitch(v1.version, "A3").unwrap().unwrap().rank, 1);
    assert_eq!(stitcher.stitch(v2.version, "A3").unwrap().unwrap().rank, 2);
    assert!(stitcher.stitch(v1.version, "B1").unwrap().is_none());
}

#[test]
fn test_ingest_job_through_scheduler() {
    let (stitcher, temp) = open();
    let file = temp.path().join("a.csv");
    std::fs::write(&file, "id,cas\nA1,50-78-2\nA2,50-78-2\n").unwrap();

    let params = JobParams::new()
        .with("FILE", file.display().to_string())
        .with("ID", "id")
        .with("I_CAS", "cas");
    let fingerprint = stitcher.submit(JobKind::Ingest, params).unwrap();
    match stitcher.wait(&fingerprint).unwrap() {
        JobOutput::Ingest(report) => assert_eq!(report.entities_added, 2),
        other => panic!("unexpected output {:?}", other),
    }
    assert_eq!(stitcher.store().read().unwrap().filter("id", "A2", &[]).unwrap().len(), 1);
}
