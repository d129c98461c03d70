//! Access Rule Persistence Layer
//!
//! Stores interned access rules, rulesets and the node/ruleset associations.
//! Rules are content-addressed: interning an equal rule returns the id of the
//! existing row. Private rulesets are get-or-create, keyed by
//! `(node, access type)`.

use super::rules::{AccessRule, RuleAssociation};
use crate::error::{AclError, Result};
use crate::types::{AccessType, NodeId, RuleId, RulesetId};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock as AsyncRwLock;

/// Named, reusable bag of rule associations for one access type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRuleset {
    pub id: RulesetId,
    pub name: String,
    pub access_type: AccessType,
    /// System generated and owned by exactly one node
    pub private: bool,
    /// Owning node of a private ruleset
    pub owner: Option<NodeId>,
}

/// Node to ruleset attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeToRuleset {
    pub node_id: NodeId,
    pub ruleset_id: RulesetId,
    pub access_type: AccessType,
    pub private: bool,
}

/// Point-in-time copy of everything the store holds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessSnapshot {
    pub rules: BTreeMap<RuleId, AccessRule>,
    pub rulesets: Vec<AccessRuleset>,
    pub ruleset_rules: BTreeMap<RulesetId, BTreeSet<RuleAssociation>>,
    pub node_rulesets: Vec<NodeToRuleset>,
    pub node_rules: Vec<(NodeId, AccessType, RuleAssociation)>,
    /// Snapshot timestamp
    pub timestamp: u64,
}

/// Persistent storage interface for access rules and rulesets
#[async_trait]
pub trait AccessStore: Send + Sync {
    /// Return the id of an equal rule, inserting it first if absent
    async fn intern_rule(&self, rule: AccessRule) -> Result<RuleId>;

    /// Get a rule by id
    async fn get_rule(&self, rule_id: RuleId) -> Result<Option<AccessRule>>;

    /// Number of distinct rules
    async fn rule_count(&self) -> Result<usize>;

    /// All rules ordered by id
    async fn list_rules(&self) -> Result<Vec<(RuleId, AccessRule)>>;

    /// Get or create a shared ruleset by name
    async fn create_shared_ruleset(&self, name: &str, access_type: AccessType) -> Result<AccessRuleset>;

    /// Get or create the private ruleset of a node
    async fn get_or_create_private_ruleset(
        &self,
        node_id: NodeId,
        access_type: AccessType,
    ) -> Result<AccessRuleset>;

    /// Get a ruleset by id
    async fn get_ruleset(&self, ruleset_id: RulesetId) -> Result<Option<AccessRuleset>>;

    /// All rulesets ordered by id
    async fn rulesets(&self) -> Result<Vec<AccessRuleset>>;

    /// Replace all rule associations of a ruleset as one unit
    async fn replace_ruleset_rules(
        &self,
        ruleset_id: RulesetId,
        associations: Vec<RuleAssociation>,
    ) -> Result<()>;

    /// Rule associations of a ruleset
    async fn ruleset_rules(&self, ruleset_id: RulesetId) -> Result<Vec<RuleAssociation>>;

    /// Attach a ruleset to a node (idempotent)
    async fn attach_ruleset(
        &self,
        node_id: NodeId,
        ruleset_id: RulesetId,
        access_type: AccessType,
        private: bool,
    ) -> Result<()>;

    /// Rulesets attached to a node for one access type
    async fn node_rulesets(&self, node_id: NodeId, access_type: AccessType) -> Result<Vec<NodeToRuleset>>;

    /// Add a direct node to rule association (idempotent)
    async fn add_node_rule(
        &self,
        node_id: NodeId,
        access_type: AccessType,
        association: RuleAssociation,
    ) -> Result<()>;

    /// Direct associations plus those of every attached ruleset
    async fn rule_associations_for_node(
        &self,
        node_id: NodeId,
        access_type: AccessType,
    ) -> Result<Vec<RuleAssociation>>;

    /// Copy of the whole store
    async fn snapshot(&self) -> Result<AccessSnapshot>;
}

#[derive(Debug, Default)]
struct StoreState {
    rules: BTreeMap<RuleId, AccessRule>,
    rule_index: HashMap<AccessRule, RuleId>,
    rulesets: BTreeMap<RulesetId, AccessRuleset>,
    shared_index: HashMap<(String, AccessType), RulesetId>,
    private_index: HashMap<(NodeId, AccessType), RulesetId>,
    ruleset_rules: BTreeMap<RulesetId, BTreeSet<RuleAssociation>>,
    node_rulesets: BTreeSet<NodeToRuleset>,
    node_rules: BTreeMap<(NodeId, AccessType), BTreeSet<RuleAssociation>>,
    next_rule_id: RuleId,
    next_ruleset_id: RulesetId,
}

/// In-memory access store.
///
/// All writes go through one async write lock, so lookup-then-insert is
/// atomic and concurrent interning cannot create equivalent duplicates.
#[derive(Clone, Default)]
pub struct InMemoryAccessStore {
    state: Arc<AsyncRwLock<StoreState>>,
}

impl InMemoryAccessStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a snapshot
    pub fn from_snapshot(snapshot: AccessSnapshot) -> Result<Self> {
        let mut state = StoreState::default();

        for (id, rule) in snapshot.rules {
            if state.rule_index.insert(rule.clone(), id).is_some() {
                return Err(AclError::IntegrityConflict(format!(
                    "snapshot holds duplicate rule {}",
                    rule
                )));
            }
            state.rules.insert(id, rule);
            state.next_rule_id = state.next_rule_id.max(id + 1);
        }

        for ruleset in snapshot.rulesets {
            match (ruleset.private, ruleset.owner) {
                (true, Some(owner)) => {
                    state.private_index.insert((owner, ruleset.access_type), ruleset.id);
                }
                (true, None) => {
                    return Err(AclError::IntegrityConflict(format!(
                        "private ruleset {} has no owner",
                        ruleset.name
                    )));
                }
                (false, _) => {
                    state
                        .shared_index
                        .insert((ruleset.name.clone(), ruleset.access_type), ruleset.id);
                }
            }
            state.next_ruleset_id = state.next_ruleset_id.max(ruleset.id + 1);
            state.rulesets.insert(ruleset.id, ruleset);
        }

        state.ruleset_rules = snapshot.ruleset_rules;
        state.node_rulesets = snapshot.node_rulesets.into_iter().collect();
        for (node_id, access_type, assoc) in snapshot.node_rules {
            state
                .node_rules
                .entry((node_id, access_type))
                .or_default()
                .insert(assoc);
        }

        Ok(Self {
            state: Arc::new(AsyncRwLock::new(state)),
        })
    }

    fn private_ruleset_name(node_id: NodeId, access_type: AccessType) -> String {
        format!("_{}_{}", access_type, node_id)
    }

    fn current_timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

#[async_trait]
impl AccessStore for InMemoryAccessStore {
    async fn intern_rule(&self, rule: AccessRule) -> Result<RuleId> {
        let rule = rule.canonicalize();
        let mut state = self.state.write().await;

        if let Some(id) = state.rule_index.get(&rule) {
            return Ok(*id);
        }

        let id = state.next_rule_id;
        state.next_rule_id += 1;
        state.rule_index.insert(rule.clone(), id);
        state.rules.insert(id, rule);
        Ok(id)
    }

    async fn get_rule(&self, rule_id: RuleId) -> Result<Option<AccessRule>> {
        Ok(self.state.read().await.rules.get(&rule_id).cloned())
    }

    async fn rule_count(&self) -> Result<usize> {
        Ok(self.state.read().await.rules.len())
    }

    async fn list_rules(&self) -> Result<Vec<(RuleId, AccessRule)>> {
        let state = self.state.read().await;
        Ok(state.rules.iter().map(|(id, rule)| (*id, rule.clone())).collect())
    }

    async fn create_shared_ruleset(&self, name: &str, access_type: AccessType) -> Result<AccessRuleset> {
        let mut state = self.state.write().await;
        let key = (name.to_string(), access_type);

        if let Some(id) = state.shared_index.get(&key) {
            return state
                .rulesets
                .get(id)
                .cloned()
                .ok_or_else(|| AclError::Storage(format!("shared ruleset index points at missing ruleset {}", id)));
        }

        let ruleset = AccessRuleset {
            id: state.next_ruleset_id,
            name: name.to_string(),
            access_type,
            private: false,
            owner: None,
        };
        state.next_ruleset_id += 1;
        state.shared_index.insert(key, ruleset.id);
        state.rulesets.insert(ruleset.id, ruleset.clone());
        Ok(ruleset)
    }

    async fn get_or_create_private_ruleset(
        &self,
        node_id: NodeId,
        access_type: AccessType,
    ) -> Result<AccessRuleset> {
        let mut state = self.state.write().await;

        if let Some(id) = state.private_index.get(&(node_id, access_type)) {
            return state
                .rulesets
                .get(id)
                .cloned()
                .ok_or_else(|| AclError::Storage(format!("private ruleset index points at missing ruleset {}", id)));
        }

        let ruleset = AccessRuleset {
            id: state.next_ruleset_id,
            name: Self::private_ruleset_name(node_id, access_type),
            access_type,
            private: true,
            owner: Some(node_id),
        };
        state.next_ruleset_id += 1;
        state.private_index.insert((node_id, access_type), ruleset.id);
        state.rulesets.insert(ruleset.id, ruleset.clone());
        Ok(ruleset)
    }

    async fn get_ruleset(&self, ruleset_id: RulesetId) -> Result<Option<AccessRuleset>> {
        Ok(self.state.read().await.rulesets.get(&ruleset_id).cloned())
    }

    async fn rulesets(&self) -> Result<Vec<AccessRuleset>> {
        Ok(self.state.read().await.rulesets.values().cloned().collect())
    }

    async fn replace_ruleset_rules(
        &self,
        ruleset_id: RulesetId,
        associations: Vec<RuleAssociation>,
    ) -> Result<()> {
        let mut state = self.state.write().await;

        if !state.rulesets.contains_key(&ruleset_id) {
            return Err(AclError::NotFound(format!("ruleset {}", ruleset_id)));
        }
        if let Some(missing) = associations.iter().find(|a| !state.rules.contains_key(&a.rule_id)) {
            return Err(AclError::NotFound(format!("rule {}", missing.rule_id)));
        }

        state
            .ruleset_rules
            .insert(ruleset_id, associations.into_iter().collect());
        Ok(())
    }

    async fn ruleset_rules(&self, ruleset_id: RulesetId) -> Result<Vec<RuleAssociation>> {
        Ok(self
            .state
            .read()
            .await
            .ruleset_rules
            .get(&ruleset_id)
            .map(|assocs| assocs.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn attach_ruleset(
        &self,
        node_id: NodeId,
        ruleset_id: RulesetId,
        access_type: AccessType,
        private: bool,
    ) -> Result<()> {
        let mut state = self.state.write().await;

        let ruleset = state
            .rulesets
            .get(&ruleset_id)
            .ok_or_else(|| AclError::NotFound(format!("ruleset {}", ruleset_id)))?;

        if ruleset.access_type != access_type {
            return Err(AclError::IntegrityConflict(format!(
                "ruleset {} governs {} access, cannot attach for {}",
                ruleset.name, ruleset.access_type, access_type
            )));
        }
        if private && ruleset.owner != Some(node_id) {
            return Err(AclError::IntegrityConflict(format!(
                "private ruleset {} is not owned by node {}",
                ruleset.name, node_id
            )));
        }

        state.node_rulesets.insert(NodeToRuleset {
            node_id,
            ruleset_id,
            access_type,
            private,
        });
        Ok(())
    }

    async fn node_rulesets(&self, node_id: NodeId, access_type: AccessType) -> Result<Vec<NodeToRuleset>> {
        Ok(self
            .state
            .read()
            .await
            .node_rulesets
            .iter()
            .filter(|nr| nr.node_id == node_id && nr.access_type == access_type)
            .copied()
            .collect())
    }

    async fn add_node_rule(
        &self,
        node_id: NodeId,
        access_type: AccessType,
        association: RuleAssociation,
    ) -> Result<()> {
        let mut state = self.state.write().await;

        if !state.rules.contains_key(&association.rule_id) {
            return Err(AclError::NotFound(format!("rule {}", association.rule_id)));
        }

        state
            .node_rules
            .entry((node_id, access_type))
            .or_default()
            .insert(association);
        Ok(())
    }

    async fn rule_associations_for_node(
        &self,
        node_id: NodeId,
        access_type: AccessType,
    ) -> Result<Vec<RuleAssociation>> {
        let state = self.state.read().await;
        let mut out: BTreeSet<RuleAssociation> = state
            .node_rules
            .get(&(node_id, access_type))
            .cloned()
            .unwrap_or_default();

        for attachment in state
            .node_rulesets
            .iter()
            .filter(|nr| nr.node_id == node_id && nr.access_type == access_type)
        {
            if let Some(assocs) = state.ruleset_rules.get(&attachment.ruleset_id) {
                out.extend(assocs.iter().copied());
            }
        }

        Ok(out.into_iter().collect())
    }

    async fn snapshot(&self) -> Result<AccessSnapshot> {
        let state = self.state.read().await;
        Ok(AccessSnapshot {
            rules: state.rules.clone(),
            rulesets: state.rulesets.values().cloned().collect(),
            ruleset_rules: state.ruleset_rules.clone(),
            node_rulesets: state.node_rulesets.iter().copied().collect(),
            node_rules: state
                .node_rules
                .iter()
                .flat_map(|((node_id, access_type), assocs)| {
                    assocs.iter().map(move |a| (*node_id, *access_type, *a))
                })
                .collect(),
            timestamp: Self::current_timestamp(),
        })
    }
}
