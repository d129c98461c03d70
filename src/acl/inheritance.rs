//! Inheritance Resolution
//!
//! Effective associations of a node are its own associations together with
//! those of every strict ancestor in the containment hierarchy.

use super::rules::{EffectiveAssociation, RuleAssociation};
use super::storage::AccessStore;
use crate::directory::HierarchyService;
use crate::error::{AclError, Result};
use crate::types::{AccessType, NodeId};

use futures::future::try_join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

pub struct InheritanceResolver {
    store: Arc<dyn AccessStore>,
    hierarchy: Arc<dyn HierarchyService>,
}

impl InheritanceResolver {
    pub fn new(store: Arc<dyn AccessStore>, hierarchy: Arc<dyn HierarchyService>) -> Self {
        Self { store, hierarchy }
    }

    /// Own and inherited associations, deduplicated by `(rule, invert, blocking)`
    pub async fn associations_for(
        &self,
        node_id: NodeId,
        access_type: AccessType,
    ) -> Result<BTreeSet<RuleAssociation>> {
        let ancestors = self.hierarchy.ancestors_of(node_id).await?;

        let nodes = std::iter::once(node_id).chain(ancestors.iter().copied());
        let per_node = try_join_all(
            nodes.map(|node| self.store.rule_associations_for_node(node, access_type)),
        )
        .await?;

        let associations: BTreeSet<RuleAssociation> = per_node.into_iter().flatten().collect();
        debug!(
            "Node {} {} inherits from {} ancestors: {} associations",
            node_id,
            access_type,
            ancestors.len(),
            associations.len()
        );
        Ok(associations)
    }

    /// Associations resolved against their rules
    pub async fn effective_associations(
        &self,
        node_id: NodeId,
        access_type: AccessType,
    ) -> Result<Vec<EffectiveAssociation>> {
        let associations = self.associations_for(node_id, access_type).await?;

        let rules = try_join_all(associations.iter().map(|a| self.store.get_rule(a.rule_id))).await?;

        associations
            .into_iter()
            .zip(rules)
            .map(|(assoc, rule)| {
                let rule = rule.ok_or_else(|| {
                    AclError::Storage(format!(
                        "association on node {} references missing rule {}",
                        node_id, assoc.rule_id
                    ))
                })?;
                Ok(EffectiveAssociation {
                    rule_id: assoc.rule_id,
                    rule,
                    access_type,
                    invert: assoc.invert,
                    blocking: assoc.blocking,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::rules::AccessRule;
    use crate::acl::storage::{AccessSnapshot, InMemoryAccessStore};
    use crate::directory::InMemoryHierarchy;

    #[tokio::test]
    async fn test_ancestor_associations_are_inherited_once() {
        let store = Arc::new(InMemoryAccessStore::new());
        // 3 -> 2 -> 1, 3 -> 1
        let hierarchy = Arc::new(InMemoryHierarchy::from_edges([(3, 2), (2, 1), (3, 1)]));

        let rule = store.intern_rule(AccessRule::with_groups([7])).await.unwrap();
        let other = store.intern_rule(AccessRule::with_groups([8])).await.unwrap();
        let grant = RuleAssociation::new(rule, false, false);

        store.add_node_rule(1, AccessType::Read, grant).await.unwrap();
        store.add_node_rule(2, AccessType::Read, grant).await.unwrap();
        store
            .add_node_rule(3, AccessType::Read, RuleAssociation::new(other, true, true))
            .await
            .unwrap();
        store
            .add_node_rule(1, AccessType::Write, RuleAssociation::new(other, false, false))
            .await
            .unwrap();

        let resolver = InheritanceResolver::new(store, hierarchy);
        let effective = resolver.effective_associations(3, AccessType::Read).await.unwrap();

        assert_eq!(effective.len(), 2);
        assert!(effective.iter().any(|e| e.rule_id == rule && !e.blocking));
        assert!(effective.iter().any(|e| e.rule_id == other && e.blocking));
        assert!(effective.iter().all(|e| e.access_type == AccessType::Read));

        let root = resolver.effective_associations(1, AccessType::Read).await.unwrap();
        assert_eq!(root.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_rule_is_a_storage_error() {
        let snapshot = AccessSnapshot {
            rules: Default::default(),
            rulesets: Vec::new(),
            ruleset_rules: Default::default(),
            node_rulesets: Vec::new(),
            node_rules: vec![(1, AccessType::Read, RuleAssociation::new(42, false, false))],
            timestamp: 0,
        };
        let store = Arc::new(InMemoryAccessStore::from_snapshot(snapshot).unwrap());

        let resolver = InheritanceResolver::new(store, Arc::new(InMemoryHierarchy::new()));
        let err = resolver.effective_associations(1, AccessType::Read).await.unwrap_err();
        assert!(err.is_structural());
    }
}
