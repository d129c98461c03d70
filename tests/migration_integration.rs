use treeacl::acl::{AccessRule, AccessStore, InMemoryAccessStore};
use treeacl::config::MigrationConfig;
use treeacl::directory::{InMemoryDirectory, InMemorySubnetLists};
use treeacl::legacy::LegacyRuleLibrary;
use treeacl::migration::{
    migrate_dataset, FailureKind, MigrationDataset, MigrationDriver, NodeAccess, UserRecord,
};
use treeacl::types::AccessType;

use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

fn dataset() -> MigrationDataset {
    MigrationDataset {
        nodes: vec![
            NodeAccess {
                id: 1,
                read: Some("{ group test_readers }".to_string()),
                write: Some("{ group test_writers }".to_string()),
                data: Some("{ group test_datausers }".to_string()),
            },
            NodeAccess {
                id: 2,
                read: Some("{ NOT ( group test_readers OR group test_readers2 ) }".to_string()),
                ..Default::default()
            },
            NodeAccess {
                id: 3,
                read: Some("not_rule,{ user darfdas }".to_string()),
                ..Default::default()
            },
            NodeAccess {
                id: 4,
                read: Some("not_rule".to_string()),
                write: Some("iplist campus AND date >= 01.01.2015".to_string()),
                ..Default::default()
            },
        ],
        rules: BTreeMap::from([(
            "not_rule".to_string(),
            "NOT ( group test_readers OR group test_readers2 )".to_string(),
        )]),
        groups: vec![
            "test_readers".to_string(),
            "test_readers2".to_string(),
            "test_writers".to_string(),
            "test_datausers".to_string(),
        ],
        users: vec![UserRecord {
            login: "darfdas".to_string(),
            groups: vec!["test_readers".to_string()],
        }],
        subnet_lists: BTreeMap::from([(
            "campus".to_string(),
            vec!["10.0.0.0/8".parse().unwrap(), "172.16.0.0/12".parse().unwrap()],
        )]),
        edges: vec![(2, 1), (3, 1), (4, 3)],
    }
}

#[tokio::test]
async fn test_dataset_migrates_cleanly() {
    let output = migrate_dataset(&dataset(), MigrationConfig::default())
        .await
        .unwrap();
    let (store, report) = (output.store, output.report);

    assert!(report.is_clean(), "{}", report);
    assert_eq!(report.nodes_migrated, 4);
    // 3 + 1 + (not_rule + inline) + write of node 4; not_rule is converted once
    assert_eq!(report.successes, 7);

    let shared: Vec<_> = store
        .rulesets()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| !r.private)
        .collect();
    assert_eq!(shared.len(), 1);
    assert_eq!(shared[0].name, "not_rule");

    // node 2 and the shared ruleset hold the same inverted rule
    let node2 = store.rule_associations_for_node(2, AccessType::Read).await.unwrap();
    let shared_rules = store.ruleset_rules(shared[0].id).await.unwrap();
    assert_eq!(node2, shared_rules);
    assert!(node2[0].invert && node2[0].blocking);
}

#[tokio::test]
async fn test_no_rule_has_two_value_sets_for_one_dimension() {
    let store = migrate_dataset(&dataset(), MigrationConfig::default())
        .await
        .unwrap()
        .store;

    for (_, rule) in store.list_rules().await.unwrap() {
        assert_eq!(rule.clone().canonicalize(), rule);
    }

    let write4 = store.rule_associations_for_node(4, AccessType::Write).await.unwrap();
    assert_eq!(write4.len(), 1);
    let rule = store.get_rule(write4[0].rule_id).await.unwrap().unwrap();
    assert_eq!(rule.subnets.map(|s| s.len()), Some(2));
    assert_eq!(rule.dateranges.map(|d| d.len()), Some(1));
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let data = dataset();
    let store = InMemoryAccessStore::new();
    let driver = MigrationDriver::new(
        Arc::new(store.clone()),
        Arc::new(data.directory()),
        Arc::new(data.subnet_lists()),
        MigrationConfig::default(),
    )
    .unwrap();

    driver.run(&data.library(), &data.nodes).await.unwrap();
    let first = store.snapshot().await.unwrap();

    let report = driver.run(&data.library(), &data.nodes).await.unwrap();
    let second = store.snapshot().await.unwrap();

    assert!(report.is_clean());
    assert_eq!(first.rules, second.rules);
    assert_eq!(first.rulesets, second.rulesets);
    assert_eq!(first.ruleset_rules, second.ruleset_rules);
    assert_eq!(first.node_rulesets, second.node_rulesets);
}

#[tokio::test]
async fn test_unrepresentable_rules_are_reported_not_fatal() {
    let mut directory = InMemoryDirectory::new();
    directory.add_group("a");
    directory.add_group("b");

    let store = InMemoryAccessStore::new();
    let driver = MigrationDriver::new(
        Arc::new(store.clone()),
        Arc::new(directory),
        Arc::new(InMemorySubnetLists::new()),
        MigrationConfig::default(),
    )
    .unwrap();

    let nodes = vec![
        NodeAccess {
            id: 1,
            read: Some("( group a ) AND ( group b )".to_string()),
            ..Default::default()
        },
        NodeAccess {
            id: 2,
            read: Some("group a AND AND".to_string()),
            ..Default::default()
        },
        NodeAccess {
            id: 3,
            read: Some("( group a ) OR ( group b )".to_string()),
            ..Default::default()
        },
    ];

    let report = driver.run(&LegacyRuleLibrary::new(), &nodes).await.unwrap();
    assert_eq!(report.failures_of(FailureKind::CannotRepresent).count(), 1);
    assert_eq!(report.failures_of(FailureKind::Parse).count(), 1);
    assert_eq!(report.successes, 1);

    let node3 = store.rule_associations_for_node(3, AccessType::Read).await.unwrap();
    let rule = store.get_rule(node3[0].rule_id).await.unwrap().unwrap();
    assert_eq!(rule.group_ids.map(|g| g.len()), Some(2));
    assert!(store.node_rulesets(1, AccessType::Read).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_principals_use_placeholders() {
    let data = MigrationDataset {
        nodes: vec![NodeAccess {
            id: 9,
            read: Some("group ghosts, user nobody, group ghosts".to_string()),
            ..Default::default()
        }],
        ..Default::default()
    };

    let output = migrate_dataset(&data, MigrationConfig::default())
        .await
        .unwrap();
    let (store, report) = (output.store, output.report);
    assert_eq!(report.failures.len(), 0);
    assert_eq!(report.unresolved.len(), 2);

    let assocs = store.rule_associations_for_node(9, AccessType::Read).await.unwrap();
    let rule = store.get_rule(assocs[0].rule_id).await.unwrap().unwrap();
    assert_eq!(rule, AccessRule::with_groups([9_999_999, 10_000_000]));
}

#[tokio::test]
async fn test_dataset_loads_from_json_file() {
    let json = serde_json::to_string(&dataset()).unwrap();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();

    let loaded = MigrationDataset::from_file(file.path()).unwrap();
    assert_eq!(loaded.nodes, dataset().nodes);
    assert_eq!(loaded.edges, vec![(2, 1), (3, 1), (4, 3)]);
}
