//! Conformance and durability of the SQLite backend over a file.

use std::sync::Arc;
use volstore_core::{
    Entity, InflightRegistry, KeyValue, PersistenceConfig, Snapshot, SnapshotFilter, SnapshotSpec,
    SqlBackend, VolumeFilter, VolumeSpec,
};
use volstore_testkit::{create_volume, pairs, TestSession};

volstore_testkit::conformance_tests!(volstore_testkit::TestSession::file_db());

#[test]
fn data_survives_reopen() {
    let fixture = TestSession::file_db();
    let volume = create_volume(
        &fixture,
        "node@lvm#pool",
        VolumeSpec::new(3)
            .name("kept")
            .extra_specs(pairs(&[("k1", "v1")]))
            .qos_specs(pairs(&[("total_iops_sec", "100")])),
    );
    let snapshot = Snapshot::new(&volume, SnapshotSpec::new().name("snap")).unwrap();
    fixture.save_snapshot(&snapshot).unwrap();
    fixture
        .save_key_value(&KeyValue::new("version", Some("1".to_string())))
        .unwrap();

    let reopened = fixture.reopen().expect("file session");
    let volumes = reopened
        .volumes(&VolumeFilter::new().backend_name("lvm"))
        .unwrap();
    assert_eq!(volumes.len(), 1);
    assert_eq!(volumes[0].id(), volume.id());
    assert_eq!(volumes[0].name().as_deref(), Some("kept"));
    let driver = reopened.driver();
    assert_eq!(volumes[0].extra_specs(driver).unwrap(), pairs(&[("k1", "v1")]));
    assert_eq!(
        volumes[0].qos_specs(driver).unwrap().map(|q| q.specs()),
        Some(pairs(&[("total_iops_sec", "100")]))
    );
    assert_eq!(
        reopened.snapshots(&SnapshotFilter::new()).unwrap()[0].id(),
        snapshot.id()
    );
    assert_eq!(
        reopened.key_values(Some("version")).unwrap(),
        vec![KeyValue::new("version", Some("1".to_string()))]
    );
}

#[test]
fn schema_is_created_once() {
    let fixture = TestSession::file_db();
    let path = fixture.path().expect("file session");
    let config = PersistenceConfig::db(format!("sqlite://{}", path.display()));

    let backend = SqlBackend::open(&config, Arc::new(InflightRegistry::new())).unwrap();
    let status = backend.schema();
    assert!(status.applied.is_empty());
    assert_eq!(status.stored, status.expected);
    assert!(!status.is_newer());
    assert_eq!(status.current(), status.expected);
}

#[test]
fn table_counts_track_live_rows() {
    let fixture = TestSession::file_db();
    let volume = create_volume(&fixture, "node@lvm", VolumeSpec::new(1));
    create_volume(&fixture, "node@lvm", VolumeSpec::new(1));
    fixture.delete_volume(&volume).unwrap();

    let path = fixture.path().expect("file session");
    let config = PersistenceConfig::db(format!("sqlite://{}", path.display()));
    let backend = SqlBackend::open(&config, Arc::new(InflightRegistry::new())).unwrap();
    let counts = backend.table_counts().unwrap();
    assert!(counts.contains(&("volumes", 1)));
    assert!(counts.contains(&("key_value", 0)));
}
