//! Transport round trips over generated volume trees.

use proptest::prelude::*;
use std::collections::BTreeMap;
use volstore_codec::{from_cbor, from_json, to_cbor, to_json, Value};
use volstore_core::{Entity, Transport, Volume, VolumeFilter};
use volstore_testkit::{volume_tree_strategy, PropTestConfig, TestSession, VolumeTree};

fn assigned<E: Entity>(entity: &E) -> BTreeMap<&'static str, Value> {
    entity
        .fields()
        .into_iter()
        .filter(|(_, value)| !value.is_null())
        .collect()
}

/// Attributes and QoS limits of an embedded classification.
fn classification(volume: &Volume) -> (BTreeMap<String, String>, Option<BTreeMap<String, String>>) {
    let volume_type = volume.loaded_volume_type().expect("classification is loaded");
    let qos = volume_type.qos_specs().map(|q| q.specs());
    (volume_type.extra_specs(), qos)
}

fn assert_same_tree(back: &Volume, tree: &VolumeTree) -> Result<(), TestCaseError> {
    prop_assert_eq!(assigned(back), assigned(&tree.volume));
    prop_assert_eq!(classification(back), classification(&tree.volume));

    let snapshots = back.loaded_snapshots().unwrap_or_default();
    prop_assert_eq!(snapshots.len(), tree.snapshots.len());
    for (got, want) in snapshots.iter().zip(&tree.snapshots) {
        prop_assert_eq!(assigned(got), assigned(want));
    }
    let connections = back.loaded_connections().unwrap_or_default();
    prop_assert_eq!(connections.len(), tree.connections.len());
    for (got, want) in connections.iter().zip(&tree.connections) {
        prop_assert_eq!(got.connector(), want.connector());
    }
    Ok(())
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn json_round_trip(tree in volume_tree_strategy(3)) {
        let text = to_json(&tree.volume.to_transport(false)).unwrap();
        let back = Volume::from_transport(from_json(&text).unwrap()).unwrap();
        assert_same_tree(&back, &tree)?;
    }

    #[test]
    fn cbor_round_trip(tree in volume_tree_strategy(3)) {
        let bytes = to_cbor(&tree.volume.to_transport(false)).unwrap();
        let back = Volume::from_transport(from_cbor(&bytes).unwrap()).unwrap();
        assert_same_tree(&back, &tree)?;
    }

    #[test]
    fn loaded_documents_persist(tree in volume_tree_strategy(2)) {
        let fixture = TestSession::memory_db();
        fixture.load_volume(tree.volume.to_transport(false), true).unwrap();

        let stored = fixture
            .volumes(&VolumeFilter::new().volume_id(tree.volume.id()))
            .unwrap();
        prop_assert_eq!(stored.len(), 1);
        prop_assert_eq!(stored[0].size(), tree.volume.size());
        prop_assert_eq!(stored[0].metadata(), tree.volume.metadata());
        prop_assert_eq!(stored[0].admin_metadata(), tree.volume.admin_metadata());
        prop_assert_eq!(
            stored[0].extra_specs(fixture.driver()).unwrap(),
            classification(&tree.volume).0
        );
        prop_assert_eq!(
            stored[0].snapshots(fixture.driver()).unwrap().len(),
            tree.snapshots.len()
        );
        prop_assert_eq!(
            stored[0].connections(fixture.driver()).unwrap().len(),
            tree.connections.len()
        );
    }
}
