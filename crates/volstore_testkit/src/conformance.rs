//! Backend conformance suite.
//!
//! Every check takes a [`Session`] and panics on failure, so the same
//! checks run against every backend. [`conformance_tests!`] expands into
//! one `#[test]` per check for a given session factory.
//!
//! [`conformance_tests!`]: crate::conformance_tests

use std::collections::BTreeMap;

use crate::fixtures::{create_n_volumes, create_volume, pairs};
use volstore_core::tracker::WriteSet;
use volstore_core::{
    Connection, ConnectionFilter, DriverDb, Entity, KeyValue, Session, Snapshot, SnapshotFilter,
    SnapshotSpec, Transport, Volume, VolumeFilter, VolumeSpec,
};
use volstore_codec::{Map, Value};

const HOST: &str = "node@fake_backend#pool";

fn ids(volumes: &[Volume]) -> Vec<String> {
    volumes.iter().map(|v| v.id().to_string()).collect()
}

/// Assigned fields without the explicit nulls of unset ones.
fn stored_fields<E: Entity>(entity: &E) -> BTreeMap<&'static str, Value> {
    entity
        .fields()
        .into_iter()
        .filter(|(_, value)| !value.is_null())
        .collect()
}

fn reload(session: &Session, volume: &Volume) -> Volume {
    let mut found = session
        .volumes(&VolumeFilter::new().volume_id(volume.id()))
        .expect("Failed to get volume");
    assert_eq!(found.len(), 1, "volume {} should be stored once", volume.id());
    found.remove(0)
}

fn connector() -> Map {
    Map::from([
        ("host".to_string(), Value::from("compute-1")),
        ("initiator".to_string(), Value::from("iqn.1993-08.org.debian:01:1")),
    ])
}

/// Volumes filtered by display name come back in insertion order.
pub fn volumes_by_name(session: &Session) {
    let first = create_volume(session, HOST, VolumeSpec::new(1).name("disk"));
    let found = session
        .volumes(&VolumeFilter::new().volume_name("disk"))
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].size(), Some(1));

    let second = create_volume(session, HOST, VolumeSpec::new(2).name("disk"));
    create_volume(session, HOST, VolumeSpec::new(3).name("other"));
    let found = session
        .volumes(&VolumeFilter::new().volume_name("disk"))
        .unwrap();
    assert_eq!(ids(&found), ids(&[first, second]));
}

/// Lookup by identifier returns exactly that volume.
pub fn volumes_by_id(session: &Session) {
    let volumes = create_n_volumes(session, HOST, 3);
    let found = session
        .volumes(&VolumeFilter::new().volume_id(volumes[1].id()))
        .unwrap();
    assert_eq!(ids(&found), ids(&volumes[1..2]));
}

/// Lookups that match nothing return an empty sequence.
pub fn volumes_not_found(session: &Session) {
    create_n_volumes(session, HOST, 2);
    assert!(session
        .volumes(&VolumeFilter::new().volume_id("missing"))
        .unwrap()
        .is_empty());
    assert!(session
        .volumes(&VolumeFilter::new().volume_name("missing"))
        .unwrap()
        .is_empty());
    assert!(session
        .volumes(&VolumeFilter::new().backend_name("missing"))
        .unwrap()
        .is_empty());
}

/// Backend-scoped queries match the owner tag with or without node and
/// pool.
pub fn volumes_by_backend(session: &Session) {
    let ours = create_n_volumes(session, HOST, 2);
    let theirs = create_volume(session, "node@fake2", VolumeSpec::new(3));
    let bare = create_volume(session, "fake_backend", VolumeSpec::new(1));

    let found = session
        .volumes(&VolumeFilter::new().backend_name("fake2"))
        .unwrap();
    assert_eq!(ids(&found), ids(&[theirs]));

    let found = session
        .volumes(&VolumeFilter::new().backend_name("fake_backend"))
        .unwrap();
    assert_eq!(ids(&found), ids(&[ours[0].clone(), ours[1].clone(), bare]));
}

/// Every predicate of a filter must hold.
pub fn volumes_combined_filters(session: &Session) {
    let volumes = create_n_volumes(session, HOST, 2);
    let filter = VolumeFilter::new()
        .volume_id(volumes[0].id())
        .volume_name("disk-0")
        .backend_name("fake_backend");
    assert_eq!(ids(&session.volumes(&filter).unwrap()), ids(&volumes[..1]));

    let mismatch = VolumeFilter::new()
        .volume_id(volumes[0].id())
        .volume_name("disk-1");
    assert!(session.volumes(&mismatch).unwrap().is_empty());
}

/// Stored fields come back unchanged, timestamps included.
pub fn volume_fields_round_trip(session: &Session) {
    let volume = create_volume(
        session,
        HOST,
        VolumeSpec::new(5)
            .name("disk")
            .description("scratch")
            .availability_zone("nova")
            .bootable(true)
            .metadata(pairs(&[("owner", "ops")]))
            .admin_metadata(pairs(&[("readonly", "False")])),
    );
    let loaded = reload(session, &volume);
    assert_eq!(stored_fields(&loaded), stored_fields(&volume));
    assert_eq!(loaded.created_at(), volume.created_at());
    assert_eq!(loaded.metadata(), pairs(&[("owner", "ops")]));
    assert!(loaded.changed_fields().is_empty());
}

/// Volumes without attributes get an empty classification scoped to the
/// volume, reused across saves.
pub fn default_classification(session: &Session) {
    let driver = session.driver();
    let volume = create_volume(session, HOST, VolumeSpec::new(1));
    let loaded = reload(session, &volume);
    assert!(loaded.extra_specs(driver).unwrap().is_empty());
    assert_eq!(loaded.volume_type(driver).unwrap().id(), volume.id());
    assert!(loaded.qos_specs(driver).unwrap().is_none());

    loaded.set("display_name", "renamed").unwrap();
    session.save_volume(&loaded).unwrap();
    let again = reload(session, &volume);
    assert_eq!(again.volume_type(driver).unwrap().id(), volume.id());
    assert_eq!(again.name().as_deref(), Some("renamed"));
    assert!(again.extra_specs(driver).unwrap().is_empty());
}

/// Custom attributes come back on a classification scoped to the volume.
pub fn custom_classification(session: &Session) {
    let volume = create_volume(
        session,
        HOST,
        VolumeSpec::new(1).extra_specs(pairs(&[("k1", "v1")])),
    );
    let loaded = reload(session, &volume);
    let volume_type = loaded.volume_type(session.driver()).unwrap();
    assert_eq!(volume_type.extra_specs(), pairs(&[("k1", "v1")]));
    assert_eq!(volume_type.id(), volume.id());
    assert_eq!(volume_type.name(), Some(volume.id().to_string()));
}

/// Reloading a volume from its simplified document and saving it leaves
/// the stored attributes alone.
pub fn simplified_reload_keeps_classification(session: &Session) {
    let driver = session.driver();
    let volume = create_volume(
        session,
        HOST,
        VolumeSpec::new(1)
            .extra_specs(pairs(&[("k1", "v1")]))
            .qos_specs(pairs(&[("read_iops_sec", "10")])),
    );
    let reloaded = session
        .load_volume(volume.to_transport(true), true)
        .unwrap();
    assert_eq!(reloaded.extra_specs(driver).unwrap(), pairs(&[("k1", "v1")]));

    let stored = reload(session, &volume);
    assert_eq!(stored.extra_specs(driver).unwrap(), pairs(&[("k1", "v1")]));
    let qos = stored.qos_specs(driver).unwrap().expect("QoS should survive");
    assert_eq!(qos.specs(), pairs(&[("read_iops_sec", "10")]));
}

/// Attribute updates replace the whole map.
pub fn classification_update_replaces(session: &Session) {
    let volume = create_volume(
        session,
        HOST,
        VolumeSpec::new(1).extra_specs(pairs(&[("a", "1"), ("b", "2")])),
    );
    let driver = session.driver();
    volume.set_extra_specs(driver, &pairs(&[("c", "3")])).unwrap();
    session.save_volume(&volume).unwrap();
    assert_eq!(
        reload(session, &volume).extra_specs(driver).unwrap(),
        pairs(&[("c", "3")])
    );
}

/// QoS limits come back with the volume.
pub fn qos_round_trip(session: &Session) {
    let volume = create_volume(
        session,
        HOST,
        VolumeSpec::new(1).qos_specs(pairs(&[("total_iops_sec", "1000")])),
    );
    let driver = session.driver();
    let qos = reload(session, &volume)
        .qos_specs(driver)
        .unwrap()
        .expect("QoS should load");
    assert_eq!(qos.specs(), pairs(&[("total_iops_sec", "1000")]));
    assert_eq!(qos.id(), volume.id());
    assert_eq!(qos.consumer().as_deref(), Some("back-end"));

    let added = create_volume(session, HOST, VolumeSpec::new(1));
    added.set_qos_specs(driver, &pairs(&[("read_iops_sec", "5")])).unwrap();
    session.save_volume(&added).unwrap();
    let qos = reload(session, &added)
        .qos_specs(driver)
        .unwrap()
        .expect("QoS should load");
    assert_eq!(qos.specs(), pairs(&[("read_iops_sec", "5")]));
}

/// A second save without mutation writes nothing.
pub fn unchanged_save_writes_nothing(session: &Session) {
    let volume = create_volume(session, HOST, VolumeSpec::new(1));
    assert!(WriteSet::for_volume(&volume).is_empty());
    session.save_volume(&volume).unwrap();
    assert!(volume.changed_fields().is_empty());

    let loaded = reload(session, &volume);
    assert!(WriteSet::for_volume(&loaded).is_empty());
}

/// Changed fields are written and the rest left alone.
pub fn field_updates(session: &Session) {
    let volume = create_volume(session, HOST, VolumeSpec::new(1).name("disk"));
    let loaded = reload(session, &volume);
    loaded.set("size", 10).unwrap();
    assert_eq!(
        WriteSet::for_volume(&loaded).field_names(),
        vec!["size"]
    );
    session.save_volume(&loaded).unwrap();

    let again = reload(session, &volume);
    assert_eq!(again.size(), Some(10));
    assert_eq!(again.name().as_deref(), Some("disk"));
}

/// Creating an identifier that already exists updates the stored entity.
pub fn duplicate_create_updates(session: &Session) {
    let first = Volume::new(HOST, VolumeSpec::new(1).id("vol-dup")).unwrap();
    session.save_volume(&first).unwrap();
    let second = Volume::new(HOST, VolumeSpec::new(7).id("vol-dup")).unwrap();
    session.save_volume(&second).unwrap();

    let found = session.volumes(&VolumeFilter::new()).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].size(), Some(7));
}

/// Deleting entities that were never stored is a no-op.
pub fn delete_missing_is_noop(session: &Session) {
    let kept = create_volume(session, HOST, VolumeSpec::new(1));
    let ghost = Volume::new(HOST, VolumeSpec::new(1)).unwrap();
    session.delete_volume(&ghost).unwrap();
    let snapshot = Snapshot::new(&ghost, SnapshotSpec::new()).unwrap();
    session.delete_snapshot(&snapshot).unwrap();
    let connection = Connection::new(&ghost, connector(), Map::new()).unwrap();
    session.delete_connection(&connection).unwrap();
    session
        .delete_key_value(&KeyValue::new("missing", None))
        .unwrap();
    assert_eq!(ids(&session.volumes(&VolumeFilter::new()).unwrap()), ids(&[kept]));
}

/// Deleting twice leaves the entity deleted.
pub fn delete_twice(session: &Session) {
    let volume = create_volume(session, HOST, VolumeSpec::new(1));
    session.delete_volume(&volume).unwrap();
    session.delete_volume(&volume).unwrap();
    assert!(volume.is_deleted());
    assert_eq!(volume.status().as_deref(), Some("deleted"));
    assert!(volume.deleted_at().is_some());
    assert!(session.volumes(&VolumeFilter::new()).unwrap().is_empty());
}

/// Deleting a snapshot leaves its volume in place.
pub fn delete_snapshot_keeps_volume(session: &Session) {
    let volume = create_volume(session, HOST, VolumeSpec::new(1));
    let snapshot = Snapshot::new(&volume, SnapshotSpec::new().name("snap")).unwrap();
    session.save_snapshot(&snapshot).unwrap();
    assert_eq!(session.snapshots(&SnapshotFilter::new()).unwrap().len(), 1);

    session.delete_snapshot(&snapshot).unwrap();
    assert!(session.snapshots(&SnapshotFilter::new()).unwrap().is_empty());
    assert_eq!(
        ids(&session.volumes(&VolumeFilter::new()).unwrap()),
        ids(&[volume])
    );
    assert_eq!(snapshot.status().as_deref(), Some("deleted"));
}

/// Snapshot filters and the lazy relationship between snapshot and volume.
pub fn snapshots(session: &Session) {
    let volume = create_volume(session, HOST, VolumeSpec::new(2));
    let other = create_volume(session, HOST, VolumeSpec::new(1));
    let first = Snapshot::new(&volume, SnapshotSpec::new().name("a")).unwrap();
    let second = Snapshot::new(&volume, SnapshotSpec::new().name("b")).unwrap();
    let third = Snapshot::new(&other, SnapshotSpec::new().name("a")).unwrap();
    for snapshot in [&first, &second, &third] {
        session.save_snapshot(snapshot).unwrap();
    }
    assert_eq!(first.volume_size(), Some(2));

    let by_id = session
        .snapshots(&SnapshotFilter::new().snapshot_id(second.id()))
        .unwrap();
    assert_eq!(by_id.len(), 1);
    assert_eq!(stored_fields(&by_id[0]), stored_fields(&second));

    let by_name = session
        .snapshots(&SnapshotFilter::new().snapshot_name("a"))
        .unwrap();
    assert_eq!(by_name.len(), 2);

    let of_volume = session
        .snapshots(&SnapshotFilter::new().volume_id(volume.id()))
        .unwrap();
    assert_eq!(of_volume.len(), 2);
    assert_eq!(of_volume[0].id(), first.id());

    let parent = by_id[0].volume(session.driver()).unwrap();
    assert_eq!(parent.id(), volume.id());

    let loaded = reload(session, &volume);
    let children = loaded.snapshots(session.driver()).unwrap();
    assert_eq!(children.len(), 2);
}

/// Connection filters, stored connector data and the lazy volume link.
pub fn connections(session: &Session) {
    let volume = create_volume(session, HOST, VolumeSpec::new(1));
    let info = Map::from([("driver_volume_type".to_string(), Value::from("iscsi"))]);
    let connection = Connection::new(&volume, connector(), info.clone()).unwrap();
    session.save_connection(&connection).unwrap();

    let found = session
        .connections(&ConnectionFilter::new().volume_id(volume.id()))
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].connector(), connector());
    assert_eq!(found[0].connection_info(), info);
    assert_eq!(found[0].attached_host().as_deref(), Some("compute-1"));
    assert_eq!(found[0].volume(session.driver()).unwrap().id(), volume.id());

    let by_id = session
        .connections(&ConnectionFilter::new().connection_id(connection.id()))
        .unwrap();
    assert_eq!(by_id.len(), 1);

    let listed = session
        .db()
        .connections_get_all_by_volume_id(volume.id().as_str())
        .unwrap();
    assert_eq!(listed.len(), 1);

    session.delete_connection(&connection).unwrap();
    assert!(session
        .connections(&ConnectionFilter::new())
        .unwrap()
        .is_empty());
}

/// Key/value pairs: insert, overwrite, filter and delete.
pub fn key_values(session: &Session) {
    session
        .save_key_value(&KeyValue::new("k1", Some("v1".to_string())))
        .unwrap();
    session.save_key_value(&KeyValue::new("k2", None)).unwrap();
    session
        .save_key_value(&KeyValue::new("k1", Some("v1.1".to_string())))
        .unwrap();

    let all = session.key_values(None).unwrap();
    assert_eq!(
        all,
        vec![
            KeyValue::new("k1", Some("v1.1".to_string())),
            KeyValue::new("k2", None),
        ]
    );
    assert_eq!(session.key_values(Some("k2")).unwrap().len(), 1);
    assert!(session.key_values(Some("k3")).unwrap().is_empty());

    session.delete_key_value(&KeyValue::new("k1", None)).unwrap();
    assert_eq!(
        session.key_values(None).unwrap(),
        vec![KeyValue::new("k2", None)]
    );
}

/// Record lookups and admin metadata through the engine interface.
pub fn driver_db(session: &Session) {
    let db = session.db();
    let volume = create_volume(
        session,
        HOST,
        VolumeSpec::new(1).admin_metadata(pairs(&[("k", "v"), ("k2", "v2")])),
    );
    let id = volume.id();

    assert_eq!(db.volume_get(id.as_str()).unwrap().id(), id);
    assert!(db.volume_get("missing").unwrap_err().is_not_found());
    assert!(db.snapshot_get("missing").unwrap_err().is_not_found());
    assert_eq!(db.volume_type_get(id.as_str()).unwrap().id(), id);
    assert_eq!(db.volume_get_all_by_host("other@fake_backend").unwrap().len(), 1);

    db.volume_admin_metadata_update(
        id.as_str(),
        &pairs(&[("k2", "v2.1"), ("k3", "v3")]),
        true,
        true,
        true,
    )
    .unwrap();
    assert_eq!(
        reload(session, &volume).admin_metadata(),
        pairs(&[("k2", "v2.1"), ("k3", "v3")])
    );

    db.volume_admin_metadata_delete(id.as_str(), "k2").unwrap();
    assert_eq!(
        db.volume_admin_metadata_get(id.as_str()).unwrap(),
        pairs(&[("k3", "v3")])
    );
}

/// A stored volume survives a transport round trip and a reload.
pub fn transport_after_reload(session: &Session) {
    let volume = create_volume(
        session,
        HOST,
        VolumeSpec::new(1)
            .extra_specs(pairs(&[("k", "v")]))
            .qos_specs(pairs(&[("q", "1")])),
    );
    let loaded = reload(session, &volume);
    loaded.snapshots(session.driver()).unwrap();
    loaded.connections(session.driver()).unwrap();

    let text = volstore_codec::to_json(&loaded.to_transport(false)).unwrap();
    let back = Volume::from_transport(volstore_codec::from_json(&text).unwrap()).unwrap();
    assert_eq!(stored_fields(&back), stored_fields(&loaded));
    let back_type = back.loaded_volume_type().expect("classification should be embedded");
    assert_eq!(
        stored_fields(&back_type),
        stored_fields(&loaded.volume_type(session.driver()).unwrap())
    );
    assert_eq!(back_type.extra_specs(), pairs(&[("k", "v")]));
}

/// Instantiates the conformance suite for a session factory expression.
///
/// Each check becomes a `#[test]` that evaluates the factory afresh.
#[macro_export]
macro_rules! conformance_tests {
    ($factory:expr) => {
        $crate::conformance_tests!(@checks $factory;
            volumes_by_name,
            volumes_by_id,
            volumes_not_found,
            volumes_by_backend,
            volumes_combined_filters,
            volume_fields_round_trip,
            default_classification,
            custom_classification,
            simplified_reload_keeps_classification,
            classification_update_replaces,
            qos_round_trip,
            unchanged_save_writes_nothing,
            field_updates,
            duplicate_create_updates,
            delete_missing_is_noop,
            delete_twice,
            delete_snapshot_keeps_volume,
            snapshots,
            connections,
            key_values,
            driver_db,
            transport_after_reload,
        );
    };
    (@checks $factory:expr; $($check:ident),* $(,)?) => {
        $(
            #[test]
            fn $check() {
                let fixture = $factory;
                $crate::conformance::$check(&fixture);
            }
        )*
    };
}
