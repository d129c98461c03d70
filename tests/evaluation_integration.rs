use treeacl::acl::{AccessEvaluator, AccessRequest, InheritanceResolver, PolicyDecision};
use treeacl::config::{EvaluationConfig, MigrationConfig};
use treeacl::migration::{migrate_dataset, MigratedState, MigrationDataset, NodeAccess, UserRecord};
use treeacl::types::AccessType;

use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

fn node(id: u64, read: &str) -> NodeAccess {
    NodeAccess {
        id,
        read: Some(read.to_string()),
        ..Default::default()
    }
}

fn user(login: &str, groups: &[&str]) -> UserRecord {
    UserRecord {
        login: login.to_string(),
        groups: groups.iter().map(|g| g.to_string()).collect(),
    }
}

/// 1 staff root; 2 blocks interns; 3 plain child of 2; 4 grants the campus
/// network after 2015; 5 denies everyone; 6 blocks interns but grants dave;
/// 7 and 8 are roots granting carol and the campus iplist; 9 names an
/// unknown iplist
fn dataset() -> MigrationDataset {
    MigrationDataset {
        nodes: vec![
            node(1, "{ group staff }"),
            node(2, "NOT ( group interns )"),
            node(4, "ip 10.0.0.0/8 AND date > 01.01.2015"),
            node(5, "false"),
            node(6, "( NOT ( group interns ) ) OR ( user dave )"),
            node(7, "{ user carol }"),
            node(8, "iplist campus"),
            node(9, "iplist nowhere"),
        ],
        groups: vec!["staff".to_string(), "interns".to_string()],
        users: vec![
            user("alice", &["staff"]),
            user("bob", &["staff", "interns"]),
            user("carol", &[]),
            user("dave", &[]),
            user("erin", &["interns"]),
        ],
        subnet_lists: BTreeMap::from([(
            "campus".to_string(),
            vec!["10.0.0.0/8".parse().unwrap()],
        )]),
        edges: vec![(2, 1), (3, 2), (4, 1), (5, 1), (6, 1)],
        ..Default::default()
    }
}

async fn evaluator() -> AccessEvaluator {
    let dataset = dataset();
    let output = migrate_dataset(&dataset, MigrationConfig::default())
        .await
        .unwrap();
    assert!(output.report.failures.is_empty(), "{}", output.report);

    let resolver = InheritanceResolver::new(Arc::new(output.store), Arc::new(dataset.hierarchy()));
    AccessEvaluator::new(resolver, output.directory, EvaluationConfig::default())
}

async fn decide(evaluator: &AccessEvaluator, node: u64, login: &str, ip: Ipv4Addr) -> PolicyDecision {
    evaluator
        .check(node, AccessType::Read, &request(login, ip, day(2020, 1, 1)))
        .await
        .unwrap()
}

fn request(login: &str, ip: Ipv4Addr, date: NaiveDate) -> AccessRequest {
    AccessRequest::new(login, ip, date)
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[tokio::test]
async fn test_group_grant_on_root() {
    let evaluator = evaluator().await;
    let ip = Ipv4Addr::new(192, 168, 1, 10);
    let today = day(2020, 1, 1);

    for (login, allowed) in [("alice", true), ("bob", true), ("carol", false)] {
        let decision = evaluator
            .check(1, AccessType::Read, &request(login, ip, today))
            .await
            .unwrap();
        assert_eq!(decision.is_allowed(), allowed, "{}: {:?}", login, decision);
    }

    let write = evaluator
        .check(1, AccessType::Write, &request("alice", ip, today))
        .await
        .unwrap();
    assert_eq!(write, PolicyDecision::NoMatch);
}

#[tokio::test]
async fn test_negated_child_rule_blocks_inherited_grant() {
    let evaluator = evaluator().await;
    let ip = Ipv4Addr::new(192, 168, 1, 10);
    let today = day(2020, 1, 1);

    for node in [2, 3] {
        let alice = evaluator
            .check(node, AccessType::Read, &request("alice", ip, today))
            .await
            .unwrap();
        assert!(alice.is_allowed());

        let bob = evaluator
            .check(node, AccessType::Read, &request("bob", ip, today))
            .await
            .unwrap();
        assert!(matches!(bob, PolicyDecision::Deny { .. }), "{:?}", bob);

        let carol = evaluator
            .check(node, AccessType::Read, &request("carol", ip, today))
            .await
            .unwrap();
        assert_eq!(carol, PolicyDecision::NoMatch);
    }
}

#[tokio::test]
async fn test_subnet_and_date_grant() {
    let evaluator = evaluator().await;
    let campus = Ipv4Addr::new(10, 20, 30, 40);
    let outside = Ipv4Addr::new(8, 8, 8, 8);

    let check = |login: &'static str, ip, date| {
        let evaluator = &evaluator;
        async move {
            evaluator
                .check(4, AccessType::Read, &request(login, ip, date))
                .await
                .unwrap()
        }
    };

    assert!(check("carol", campus, day(2016, 3, 1)).await.is_allowed());
    assert!(!check("carol", campus, day(2015, 1, 1)).await.is_allowed());
    assert!(!check("carol", outside, day(2016, 3, 1)).await.is_allowed());
    assert!(check("alice", outside, day(2010, 1, 1)).await.is_allowed());
}

#[tokio::test]
async fn test_false_denies_everyone() {
    let evaluator = evaluator().await;
    for login in ["alice", "bob", "carol"] {
        let decision = evaluator
            .check(5, AccessType::Read, &request(login, Ipv4Addr::LOCALHOST, day(2020, 1, 1)))
            .await
            .unwrap();
        assert!(matches!(decision, PolicyDecision::Deny { .. }));
    }
}

#[tokio::test]
async fn test_user_rule_grants_through_private_group() {
    let evaluator = evaluator().await;
    let ip = Ipv4Addr::new(192, 168, 1, 10);

    assert!(decide(&evaluator, 7, "carol", ip).await.is_allowed());
    assert_eq!(decide(&evaluator, 7, "alice", ip).await, PolicyDecision::NoMatch);
}

#[tokio::test]
async fn test_negated_group_or_user() {
    let evaluator = evaluator().await;
    let ip = Ipv4Addr::new(192, 168, 1, 10);

    // member of the negated group
    let erin = decide(&evaluator, 6, "erin", ip).await;
    assert!(matches!(erin, PolicyDecision::Deny { .. }), "{:?}", erin);
    let bob = decide(&evaluator, 6, "bob", ip).await;
    assert!(matches!(bob, PolicyDecision::Deny { .. }), "{:?}", bob);

    // the named user outside the group
    assert!(decide(&evaluator, 6, "dave", ip).await.is_allowed());

    // anyone else passes the gate but has no grant
    assert_eq!(decide(&evaluator, 6, "carol", ip).await, PolicyDecision::NoMatch);
}

#[tokio::test]
async fn test_iplist_rules() {
    let evaluator = evaluator().await;

    assert!(decide(&evaluator, 8, "carol", Ipv4Addr::new(10, 4, 5, 6)).await.is_allowed());
    assert_eq!(
        decide(&evaluator, 8, "carol", Ipv4Addr::new(8, 8, 8, 8)).await,
        PolicyDecision::NoMatch
    );

    // unknown lists only admit the loopback network
    assert!(decide(&evaluator, 9, "carol", Ipv4Addr::LOCALHOST).await.is_allowed());
    assert_eq!(
        decide(&evaluator, 9, "carol", Ipv4Addr::new(10, 4, 5, 6)).await,
        PolicyDecision::NoMatch
    );
}

#[tokio::test]
async fn test_saved_state_keeps_user_grants() {
    let dataset = dataset();
    let output = migrate_dataset(&dataset, MigrationConfig::default())
        .await
        .unwrap();

    let json = serde_json::to_string(&output.state().await.unwrap()).unwrap();
    let state: MigratedState = serde_json::from_str(&json).unwrap();
    let (store, directory) = state.restore(&dataset).unwrap();

    let resolver = InheritanceResolver::new(Arc::new(store), Arc::new(dataset.hierarchy()));
    let evaluator = AccessEvaluator::new(resolver, Arc::new(directory), EvaluationConfig::default());

    let ip = Ipv4Addr::new(192, 168, 1, 10);
    assert!(decide(&evaluator, 7, "carol", ip).await.is_allowed());
    assert!(decide(&evaluator, 6, "dave", ip).await.is_allowed());
}
