//! Access Evaluation
//!
//! Blocking associations are gates: a request is denied as soon as one of
//! them does not match. Otherwise it is allowed when any non-blocking
//! association matches, and falls through to [`PolicyDecision::NoMatch`]
//! when nothing grants.

use super::inheritance::InheritanceResolver;
use super::policy::PolicyDecision;
use super::rules::EffectiveAssociation;
use crate::config::EvaluationConfig;
use crate::directory::PrincipalDirectory;
use crate::error::Result;
use crate::types::{AccessType, GroupId, NodeId};

use chrono::NaiveDate;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, trace};

/// Who asks, from where, and when
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub user: String,
    pub ip: Ipv4Addr,
    pub date: NaiveDate,
}

impl AccessRequest {
    pub fn new(user: impl Into<String>, ip: Ipv4Addr, date: NaiveDate) -> Self {
        Self {
            user: user.into(),
            ip,
            date,
        }
    }
}

pub struct AccessEvaluator {
    resolver: InheritanceResolver,
    directory: Arc<dyn PrincipalDirectory>,
    /// Group sets of recently seen principals. Bounded by
    /// `principal_cache_size`: a full cache is cleared before the next insert,
    /// and a size of 0 disables caching.
    principal_cache: RwLock<HashMap<String, BTreeSet<GroupId>>>,
    config: EvaluationConfig,
}

impl AccessEvaluator {
    pub fn new(
        resolver: InheritanceResolver,
        directory: Arc<dyn PrincipalDirectory>,
        config: EvaluationConfig,
    ) -> Self {
        Self {
            resolver,
            directory,
            principal_cache: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Decide whether the request may access the node
    pub async fn check(
        &self,
        node_id: NodeId,
        access_type: AccessType,
        request: &AccessRequest,
    ) -> Result<PolicyDecision> {
        let groups = self.groups_of(&request.user).await?;
        let associations = self.resolver.effective_associations(node_id, access_type).await?;
        let decision = Self::decide(&associations, &groups, request.ip, request.date);

        debug!(
            "{} access to node {} for {} from {}: {:?}",
            access_type, node_id, request.user, request.ip, decision
        );
        Ok(decision)
    }

    /// Decision over already resolved associations
    pub fn decide(
        associations: &[EffectiveAssociation],
        groups: &BTreeSet<GroupId>,
        ip: Ipv4Addr,
        date: NaiveDate,
    ) -> PolicyDecision {
        if let Some(gate) = associations
            .iter()
            .find(|a| a.blocking && !a.matches(groups, ip, date))
        {
            return PolicyDecision::Deny {
                rule_id: gate.rule_id,
                reason: format!(
                    "blocked by {}rule {} {}",
                    if gate.invert { "inverted " } else { "" },
                    gate.rule_id,
                    gate.rule
                ),
            };
        }

        if associations
            .iter()
            .any(|a| !a.blocking && a.matches(groups, ip, date))
        {
            PolicyDecision::Allow
        } else {
            PolicyDecision::NoMatch
        }
    }

    /// Forget cached principals
    pub fn clear_cache(&self) {
        self.principal_cache.write().clear();
    }

    async fn groups_of(&self, user: &str) -> Result<BTreeSet<GroupId>> {
        if let Some(groups) = self.principal_cache.read().get(user) {
            trace!("Principal cache hit for {}", user);
            return Ok(groups.clone());
        }

        let groups = self.directory.group_ids_of(user).await?;

        if self.config.principal_cache_size > 0 {
            let mut cache = self.principal_cache.write();
            if cache.len() >= self.config.principal_cache_size {
                cache.clear();
            }
            cache.insert(user.to_string(), groups.clone());
        }
        Ok(groups)
    }
}
