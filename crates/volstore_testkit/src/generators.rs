//! Property-based test generators using proptest.
//!
//! Strategies produce valid specs and entity trees; every generated volume
//! can be persisted as-is.

use proptest::prelude::*;
use std::collections::BTreeMap;
use volstore_codec::{Map, Value};
use volstore_core::{Connection, Snapshot, SnapshotSpec, Volume, VolumeSpec};

/// Strategy for short identifier-like strings.
pub fn word_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_-]{0,11}").expect("Invalid regex")
}

/// Strategy for free text, including non-ASCII characters.
pub fn text_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9 äöüß€-]{0,24}").expect("Invalid regex")
}

/// Strategy for string maps such as metadata or extra specs.
pub fn string_map_strategy(max_len: usize) -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map(word_strategy(), text_strategy(), 0..=max_len)
}

/// Strategy for `node@backend#pool` hosts, with optional node and pool.
pub fn host_strategy() -> impl Strategy<Value = String> {
    (
        prop::option::of(word_strategy()),
        prop::sample::select(vec!["lvm", "ceph", "fake_backend"]),
        prop::option::of(word_strategy()),
    )
        .prop_map(|(node, backend, pool)| {
            let mut host = String::new();
            if let Some(node) = node {
                host.push_str(&node);
                host.push('@');
            }
            host.push_str(backend);
            if let Some(pool) = pool {
                host.push('#');
                host.push_str(&pool);
            }
            host
        })
}

/// Strategy for volume specs.
pub fn volume_spec_strategy() -> impl Strategy<Value = VolumeSpec> {
    (
        1i64..=2048,
        prop::option::of(word_strategy()),
        prop::option::of(text_strategy()),
        any::<bool>(),
        string_map_strategy(3),
        string_map_strategy(3),
        string_map_strategy(2),
        string_map_strategy(2),
    )
        .prop_map(
            |(size, name, description, bootable, extra_specs, qos_specs, metadata, admin)| {
                let mut spec = VolumeSpec::new(size)
                    .bootable(bootable)
                    .extra_specs(extra_specs)
                    .qos_specs(qos_specs)
                    .metadata(metadata)
                    .admin_metadata(admin);
                if let Some(name) = name {
                    spec = spec.name(name);
                }
                if let Some(description) = description {
                    spec = spec.description(description);
                }
                spec
            },
        )
}

/// Strategy for connector maps.
pub fn connector_strategy() -> impl Strategy<Value = Map> {
    (word_strategy(), word_strategy(), any::<bool>()).prop_map(|(host, initiator, multipath)| {
        Map::from([
            ("host".to_string(), Value::from(host)),
            ("initiator".to_string(), Value::from(format!("iqn.2004-10.com:{initiator}"))),
            ("multipath".to_string(), Value::from(multipath)),
        ])
    })
}

/// A generated volume with its children.
#[derive(Debug, Clone)]
pub struct VolumeTree {
    /// The volume; its snapshot and connection lists are loaded.
    pub volume: Volume,
    /// Snapshots of the volume.
    pub snapshots: Vec<Snapshot>,
    /// Connections of the volume.
    pub connections: Vec<Connection>,
}

/// Strategy for new volumes with up to `max_children` snapshots and
/// connections each.
pub fn volume_tree_strategy(max_children: usize) -> impl Strategy<Value = VolumeTree> {
    (
        host_strategy(),
        volume_spec_strategy(),
        prop::collection::vec(prop::option::of(word_strategy()), 0..=max_children),
        prop::collection::vec(connector_strategy(), 0..=max_children),
    )
        .prop_map(|(host, spec, snapshot_names, connectors)| {
            let volume = Volume::new(&host, spec).expect("Generated spec is valid");
            let snapshots = snapshot_names
                .into_iter()
                .map(|name| {
                    let spec = match name {
                        Some(name) => SnapshotSpec::new().name(name),
                        None => SnapshotSpec::new(),
                    };
                    Snapshot::new(&volume, spec).expect("Volume has a size")
                })
                .collect();
            let connections = connectors
                .into_iter()
                .map(|connector| {
                    Connection::new(&volume, connector, Map::new()).expect("Connector is valid")
                })
                .collect();
            VolumeTree {
                volume,
                snapshots,
                connections,
            }
        })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 128,
            max_shrink_iters: 500,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 24,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volstore_core::{backend_name_of, Entity};

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn hosts_name_a_known_backend(host in host_strategy()) {
            prop_assert!(["lvm", "ceph", "fake_backend"].contains(&backend_name_of(&host)));
        }

        #[test]
        fn trees_link_children_to_the_volume(tree in volume_tree_strategy(3)) {
            let id = tree.volume.id();
            for snapshot in &tree.snapshots {
                prop_assert_eq!(snapshot.volume_id(), Some(id.clone()));
            }
            for connection in &tree.connections {
                prop_assert_eq!(connection.volume_id(), Some(id.clone()));
            }
            prop_assert_eq!(
                tree.volume.loaded_snapshots().map(|s| s.len()),
                Some(tree.snapshots.len())
            );
        }
    }
}
