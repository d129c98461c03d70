//! External Collaborators
//!
//! Seams to the principal directory, the named subnet-list store and the
//! containment hierarchy, plus in-memory implementations used by the
//! migration binary and the tests.

use crate::error::{AclError, Result};
use crate::types::{GroupId, NodeId};

use async_trait::async_trait;
use dashmap::DashMap;
use ipnetwork::Ipv4Network;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Users and groups
#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    /// Group id for a group name
    async fn find_group(&self, name: &str) -> Result<Option<GroupId>>;

    /// Every group the user belongs to, including the private group
    async fn group_ids_of(&self, user: &str) -> Result<BTreeSet<GroupId>>;

    /// The user's single-member group, created on first request.
    /// `None` when the user does not exist.
    async fn get_or_create_private_group(&self, user: &str) -> Result<Option<GroupId>>;
}

/// Named IP network lists
#[async_trait]
pub trait SubnetListStore: Send + Sync {
    async fn subnets_of(&self, list_name: &str) -> Result<Option<BTreeSet<Ipv4Network>>>;
}

/// Containment hierarchy over content nodes
#[async_trait]
pub trait HierarchyService: Send + Sync {
    /// Transitive ancestors, excluding the node itself
    async fn ancestors_of(&self, node_id: NodeId) -> Result<BTreeSet<NodeId>>;
}

/// In-memory principal directory
pub struct InMemoryDirectory {
    groups: HashMap<String, GroupId>,
    memberships: HashMap<String, BTreeSet<GroupId>>,
    private_groups: DashMap<String, GroupId>,
    next_group_id: AtomicU64,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self {
            groups: HashMap::new(),
            memberships: HashMap::new(),
            private_groups: DashMap::new(),
            next_group_id: AtomicU64::new(1),
        }
    }

    /// Register a group, returning its id
    pub fn add_group(&mut self, name: impl Into<String>) -> GroupId {
        let name = name.into();
        if let Some(id) = self.groups.get(&name) {
            return *id;
        }
        let id = self.next_group_id.fetch_add(1, Ordering::SeqCst);
        self.groups.insert(name, id);
        id
    }

    /// Register a user with the named groups, creating missing groups
    pub fn add_user<I, S>(&mut self, login: impl Into<String>, groups: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: BTreeSet<GroupId> = groups.into_iter().map(|g| self.add_group(g)).collect();
        self.memberships.entry(login.into()).or_default().extend(ids);
    }

    /// Private groups created so far, by login
    pub fn private_groups(&self) -> BTreeMap<String, GroupId> {
        self.private_groups
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Re-register a private group created by an earlier run
    pub fn restore_private_group(&self, login: impl Into<String>, id: GroupId) {
        self.private_groups.insert(login.into(), id);
        self.next_group_id.fetch_max(id + 1, Ordering::SeqCst);
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PrincipalDirectory for InMemoryDirectory {
    async fn find_group(&self, name: &str) -> Result<Option<GroupId>> {
        Ok(self.groups.get(name).copied())
    }

    async fn group_ids_of(&self, user: &str) -> Result<BTreeSet<GroupId>> {
        let mut ids = self.memberships.get(user).cloned().unwrap_or_default();
        if let Some(private) = self.private_groups.get(user) {
            ids.insert(*private);
        }
        Ok(ids)
    }

    async fn get_or_create_private_group(&self, user: &str) -> Result<Option<GroupId>> {
        if !self.memberships.contains_key(user) {
            return Ok(None);
        }
        let id = *self
            .private_groups
            .entry(user.to_string())
            .or_insert_with(|| self.next_group_id.fetch_add(1, Ordering::SeqCst));
        Ok(Some(id))
    }
}

/// In-memory subnet lists
#[derive(Debug, Clone, Default)]
pub struct InMemorySubnetLists {
    lists: HashMap<String, BTreeSet<Ipv4Network>>,
}

impl InMemorySubnetLists {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, subnets: impl IntoIterator<Item = Ipv4Network>) {
        self.lists.insert(name.into(), subnets.into_iter().collect());
    }
}

#[async_trait]
impl SubnetListStore for InMemorySubnetLists {
    async fn subnets_of(&self, list_name: &str) -> Result<Option<BTreeSet<Ipv4Network>>> {
        Ok(self.lists.get(list_name).cloned())
    }
}

/// In-memory containment DAG
#[derive(Debug, Clone, Default)]
pub struct InMemoryHierarchy {
    parents: Arc<HashMap<NodeId, BTreeSet<NodeId>>>,
}

impl InMemoryHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_edges(edges: impl IntoIterator<Item = (NodeId, NodeId)>) -> Self {
        let mut parents: HashMap<NodeId, BTreeSet<NodeId>> = HashMap::new();
        for (child, parent) in edges {
            parents.entry(child).or_default().insert(parent);
        }
        Self {
            parents: Arc::new(parents),
        }
    }

    pub fn parents_of(&self, node_id: NodeId) -> BTreeSet<NodeId> {
        self.parents.get(&node_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl HierarchyService for InMemoryHierarchy {
    async fn ancestors_of(&self, node_id: NodeId) -> Result<BTreeSet<NodeId>> {
        let mut ancestors = BTreeSet::new();
        let mut pending: Vec<NodeId> = self.parents_of(node_id).into_iter().collect();

        while let Some(next) = pending.pop() {
            if next == node_id {
                return Err(AclError::Hierarchy(format!(
                    "node {} is its own ancestor",
                    node_id
                )));
            }
            if ancestors.insert(next) {
                pending.extend(self.parents_of(next));
            }
        }

        Ok(ancestors)
    }
}
