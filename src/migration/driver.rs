//! Migration Driver
//!
//! Runs legacy access strings through parse, symbolization, DNF conversion,
//! symbol resolution and rule synthesis, then persists the result as rulesets.
//! Named predefined rules become shared rulesets; the inline clauses of a
//! node's access string become that node's private ruleset. Every write is a
//! get-or-create or a wholesale replacement, so re-running is idempotent.

use super::report::{MigrationReport, RuleSource, UnresolvedName};
use crate::acl::rules::RuleAssociation;
use crate::acl::storage::{AccessSnapshot, AccessStore, InMemoryAccessStore};
use crate::acl::synthesis::{Atom, AtomMap, RuleSynthesizer};
use crate::config::MigrationConfig;
use crate::directory::{
    InMemoryDirectory, InMemoryHierarchy, InMemorySubnetLists, PrincipalDirectory, SubnetListStore,
};
use crate::error::{AclError, Result};
use crate::legacy::{split_access_string, AccessClause, Condition, LegacyAclParser, LegacyRuleLibrary};
use crate::logic::{DnfNormalizer, Expr, SymbolTable};
use crate::types::{AccessType, GroupId, NodeId};

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Legacy access strings of one node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAccess {
    pub id: NodeId,
    #[serde(default)]
    pub read: Option<String>,
    #[serde(default)]
    pub write: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

impl NodeAccess {
    pub fn access(&self, access_type: AccessType) -> Option<&str> {
        match access_type {
            AccessType::Read => self.read.as_deref(),
            AccessType::Write => self.write.as_deref(),
            AccessType::Data => self.data.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub login: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Bulk legacy input: nodes, predefined rules and the directory contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationDataset {
    #[serde(default)]
    pub nodes: Vec<NodeAccess>,
    /// Predefined rules by name
    #[serde(default)]
    pub rules: BTreeMap<String, String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub users: Vec<UserRecord>,
    #[serde(default)]
    pub subnet_lists: BTreeMap<String, Vec<Ipv4Network>>,
    /// `(child, parent)` containment edges
    #[serde(default)]
    pub edges: Vec<(NodeId, NodeId)>,
}

impl MigrationDataset {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn library(&self) -> LegacyRuleLibrary {
        self.rules.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub fn directory(&self) -> InMemoryDirectory {
        let mut directory = InMemoryDirectory::new();
        for group in &self.groups {
            directory.add_group(group.as_str());
        }
        for user in &self.users {
            directory.add_user(user.login.as_str(), user.groups.iter().map(String::as_str));
        }
        directory
    }

    pub fn subnet_lists(&self) -> InMemorySubnetLists {
        let mut lists = InMemorySubnetLists::new();
        for (name, subnets) in &self.subnet_lists {
            lists.insert(name.as_str(), subnets.iter().copied());
        }
        lists
    }

    pub fn hierarchy(&self) -> InMemoryHierarchy {
        InMemoryHierarchy::from_edges(self.edges.iter().copied())
    }
}

/// Run-scoped caches threaded through one migration run
pub struct MigrationContext {
    symbols: SymbolTable,
    atoms: AtomMap,
    placeholders: HashMap<(String, String), GroupId>,
    next_placeholder: GroupId,
    unresolved: Vec<UnresolvedName>,
    named: HashMap<String, Option<Vec<RuleAssociation>>>,
    published: HashSet<(String, AccessType)>,
}

impl MigrationContext {
    pub fn new(placeholder_id_base: GroupId) -> Self {
        Self {
            symbols: SymbolTable::new(),
            atoms: AtomMap::new(),
            placeholders: HashMap::new(),
            next_placeholder: placeholder_id_base,
            unresolved: Vec::new(),
            named: HashMap::new(),
            published: HashSet::new(),
        }
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn unresolved(&self) -> &[UnresolvedName] {
        &self.unresolved
    }

    /// Deterministic stand-in id for a name, memoized for the run
    fn placeholder(&mut self, kind: &str, name: &str) -> GroupId {
        let key = (kind.to_string(), name.to_string());
        if let Some(id) = self.placeholders.get(&key) {
            return *id;
        }

        let id = self.next_placeholder;
        self.next_placeholder += 1;
        self.placeholders.insert(key, id);
        self.unresolved.push(UnresolvedName {
            kind: kind.to_string(),
            name: name.to_string(),
            placeholder: Some(id),
        });
        id
    }
}

pub struct MigrationDriver {
    store: Arc<dyn AccessStore>,
    directory: Arc<dyn PrincipalDirectory>,
    subnet_lists: Arc<dyn SubnetListStore>,
    config: MigrationConfig,
    parser: LegacyAclParser,
    normalizer: DnfNormalizer,
    loopback: Ipv4Network,
}

impl MigrationDriver {
    pub fn new(
        store: Arc<dyn AccessStore>,
        directory: Arc<dyn PrincipalDirectory>,
        subnet_lists: Arc<dyn SubnetListStore>,
        config: MigrationConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            directory,
            subnet_lists,
            normalizer: DnfNormalizer::new(config.simplify_dnf, config.max_dnf_terms),
            parser: LegacyAclParser::new(),
            loopback: config.loopback_network()?,
            config,
        })
    }

    pub fn new_context(&self) -> MigrationContext {
        MigrationContext::new(self.config.placeholder_id_base)
    }

    /// Migrate every node's access strings, folding per-rule failures into
    /// the report. Structural errors and, with `fail_fast`, the first rule
    /// failure abort the run.
    pub async fn run(&self, library: &LegacyRuleLibrary, nodes: &[NodeAccess]) -> Result<MigrationReport> {
        let mut ctx = self.new_context();
        let mut report = MigrationReport::new();
        info!(
            "Starting migration run {} over {} nodes and {} predefined rules",
            report.run_id,
            nodes.len(),
            library.iter().count()
        );

        for node in nodes {
            self.migrate_node(&mut ctx, &mut report, library, node).await?;
            report.nodes_migrated += 1;
        }

        report.unresolved = ctx.unresolved.clone();
        report.rules_total = self.store.rule_count().await?;
        report.rulesets_total = self.store.rulesets().await?.len();
        report.finish();

        info!(
            "Migration run {} finished: {} rules migrated, {} failed, {} unresolved names",
            report.run_id,
            report.successes,
            report.failures.len(),
            report.unresolved.len()
        );
        Ok(report)
    }

    async fn migrate_node(
        &self,
        ctx: &mut MigrationContext,
        report: &mut MigrationReport,
        library: &LegacyRuleLibrary,
        node: &NodeAccess,
    ) -> Result<()> {
        for access_type in &self.config.access_types {
            let mut inline = Vec::new();
            if let Some(access) = node.access(*access_type) {
                for clause in split_access_string(access, library) {
                    match clause {
                        AccessClause::Named(name) => {
                            self.attach_named_rule(ctx, report, library, node.id, *access_type, &name)
                                .await?;
                        }
                        AccessClause::Inline(text) => inline.push(text),
                    }
                }
            }

            if inline.is_empty() {
                self.clear_private_ruleset(node.id, *access_type).await?;
                continue;
            }

            let rule = join_clauses(&inline);
            let source = RuleSource::Inline {
                node_id: node.id,
                access_type: *access_type,
            };
            let Some(associations) = self.convert_recorded(ctx, report, source, &rule).await? else {
                self.clear_private_ruleset(node.id, *access_type).await?;
                continue;
            };

            let ruleset = self
                .store
                .get_or_create_private_ruleset(node.id, *access_type)
                .await?;
            self.store.replace_ruleset_rules(ruleset.id, associations).await?;
            self.store
                .attach_ruleset(node.id, ruleset.id, *access_type, true)
                .await?;
        }
        Ok(())
    }

    /// Empty the node's private ruleset, if it has one, so no grant from an
    /// earlier run survives
    async fn clear_private_ruleset(&self, node_id: NodeId, access_type: AccessType) -> Result<()> {
        for attached in self.store.node_rulesets(node_id, access_type).await? {
            if attached.private && !self.store.ruleset_rules(attached.ruleset_id).await?.is_empty() {
                debug!("Clearing private {} ruleset of node {}", access_type, node_id);
                self.store
                    .replace_ruleset_rules(attached.ruleset_id, Vec::new())
                    .await?;
            }
        }
        Ok(())
    }

    /// Publish a predefined rule as a shared ruleset and attach it
    async fn attach_named_rule(
        &self,
        ctx: &mut MigrationContext,
        report: &mut MigrationReport,
        library: &LegacyRuleLibrary,
        node_id: NodeId,
        access_type: AccessType,
        name: &str,
    ) -> Result<()> {
        if !ctx.named.contains_key(name) {
            let rule = library.get(name).unwrap_or_default().to_string();
            let source = RuleSource::Named {
                name: name.to_string(),
            };
            let converted = self.convert_recorded(ctx, report, source, &rule).await?;
            ctx.named.insert(name.to_string(), converted);
        }

        let associations = match ctx.named.get(name) {
            Some(Some(associations)) => associations.clone(),
            _ => return Ok(()),
        };

        let ruleset = self.store.create_shared_ruleset(name, access_type).await?;
        if ctx.published.insert((name.to_string(), access_type)) {
            self.store.replace_ruleset_rules(ruleset.id, associations).await?;
        }
        self.store
            .attach_ruleset(node_id, ruleset.id, access_type, false)
            .await
    }

    /// Convert and record the outcome; `None` when the rule failed softly
    async fn convert_recorded(
        &self,
        ctx: &mut MigrationContext,
        report: &mut MigrationReport,
        source: RuleSource,
        rule: &str,
    ) -> Result<Option<Vec<RuleAssociation>>> {
        match self.convert_rule_string(ctx, rule).await {
            Ok(associations) => {
                report.record_success();
                Ok(Some(associations))
            }
            Err(e) if e.is_structural() || self.config.fail_fast => {
                report.record_failure(source, rule, &e);
                Err(e)
            }
            Err(e) => {
                warn!("Skipping {}: {}", source, e);
                report.record_failure(source, rule, &e);
                Ok(None)
            }
        }
    }

    /// Full pipeline for one rule string: parse, symbolize, normalize,
    /// resolve, synthesize and intern
    pub async fn convert_rule_string(
        &self,
        ctx: &mut MigrationContext,
        rule: &str,
    ) -> Result<Vec<RuleAssociation>> {
        let condition = self.parser.parse(rule)?;
        let expr = ctx.symbols.to_expr(&condition);
        let dnf = self.normalizer.normalize(&expr)?;
        debug!(
            "Rule '{}' -> {} ({} terms)",
            rule,
            ctx.symbols.display(&expr),
            dnf.term_count()
        );

        self.resolve_symbols(ctx, &expr).await?;
        let synthesized = RuleSynthesizer::new(&ctx.symbols, &ctx.atoms).synthesize(&dnf)?;

        let mut associations = BTreeSet::new();
        for unit in synthesized {
            let rule_id = self.store.intern_rule(unit.rule).await?;
            associations.insert(RuleAssociation::new(rule_id, unit.invert, unit.blocking));
        }
        Ok(associations.into_iter().collect())
    }

    /// Resolve every not yet resolved symbol of the expression to an atom
    async fn resolve_symbols(&self, ctx: &mut MigrationContext, expr: &Expr) -> Result<()> {
        for symbol in expr.symbols() {
            if ctx.atoms.contains_key(&symbol) {
                continue;
            }
            let condition = ctx
                .symbols
                .condition(symbol)
                .cloned()
                .ok_or_else(|| AclError::NotFound(format!("symbol #{}", symbol.index())))?;
            let atom = self.resolve_condition(ctx, &condition).await?;
            ctx.atoms.insert(symbol, atom);
        }
        Ok(())
    }

    async fn resolve_condition(&self, ctx: &mut MigrationContext, condition: &Condition) -> Result<Atom> {
        match condition {
            Condition::Group(name) => match self.directory.find_group(name).await? {
                Some(id) => Ok(Atom::Group(id)),
                None => {
                    let id = ctx.placeholder("group", name);
                    warn!("Unknown group '{}', using placeholder id {}", name, id);
                    Ok(Atom::Group(id))
                }
            },
            Condition::User(name) => match self.directory.get_or_create_private_group(name).await? {
                Some(id) => Ok(Atom::Group(id)),
                None => {
                    let id = ctx.placeholder("user", name);
                    warn!("Unknown user '{}', using placeholder id {}", name, id);
                    Ok(Atom::Group(id))
                }
            },
            Condition::IpList(name) => match self.subnet_lists.subnets_of(name).await? {
                Some(subnets) if !subnets.is_empty() => Ok(Atom::Subnets(subnets)),
                _ => {
                    warn!("Unknown or empty iplist '{}', using {}", name, self.loopback);
                    if !ctx.unresolved.iter().any(|u| u.kind == "iplist" && u.name == *name) {
                        ctx.unresolved.push(UnresolvedName {
                            kind: "iplist".to_string(),
                            name: name.clone(),
                            placeholder: None,
                        });
                    }
                    Ok(Atom::Subnets([self.loopback].into_iter().collect()))
                }
            },
            other => Atom::from_static_condition(other).ok_or_else(|| {
                AclError::parse(other.to_string(), "condition has no rule dimension")
            }),
        }
    }
}

/// Inline clauses are alternatives
fn join_clauses(clauses: &[String]) -> String {
    match clauses {
        [single] => single.clone(),
        many => many
            .iter()
            .map(|c| format!("( {} )", c))
            .collect::<Vec<_>>()
            .join(" OR "),
    }
}

/// Result of migrating a dataset into fresh in-memory stores
pub struct MigrationOutput {
    pub store: InMemoryAccessStore,
    /// Directory the run resolved against, including the private groups it created
    pub directory: Arc<InMemoryDirectory>,
    pub report: MigrationReport,
}

impl MigrationOutput {
    /// Everything that must outlive the run for rules to evaluate as migrated
    pub async fn state(&self) -> Result<MigratedState> {
        Ok(MigratedState {
            access: self.store.snapshot().await?,
            private_groups: self.directory.private_groups(),
        })
    }
}

/// Persisted migration result: the access store plus the private groups
/// that `user` rules point at
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigratedState {
    pub access: AccessSnapshot,
    #[serde(default)]
    pub private_groups: BTreeMap<String, GroupId>,
}

impl MigratedState {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Rebuild the store and the dataset's directory with the run's private groups
    pub fn restore(self, dataset: &MigrationDataset) -> Result<(InMemoryAccessStore, InMemoryDirectory)> {
        let store = InMemoryAccessStore::from_snapshot(self.access)?;
        let directory = dataset.directory();
        for (login, id) in self.private_groups {
            directory.restore_private_group(login, id);
        }
        Ok((store, directory))
    }
}

/// Migrate a whole dataset into a fresh in-memory store
pub async fn migrate_dataset(dataset: &MigrationDataset, config: MigrationConfig) -> Result<MigrationOutput> {
    let store = InMemoryAccessStore::new();
    let directory = Arc::new(dataset.directory());
    let driver = MigrationDriver::new(
        Arc::new(store.clone()),
        directory.clone(),
        Arc::new(dataset.subnet_lists()),
        config,
    )?;
    let report = driver.run(&dataset.library(), &dataset.nodes).await?;
    Ok(MigrationOutput {
        store,
        directory,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::rules::AccessRule;
    use pretty_assertions::assert_eq;

    fn driver_with(directory: InMemoryDirectory, config: MigrationConfig) -> (InMemoryAccessStore, MigrationDriver) {
        let store = InMemoryAccessStore::new();
        let driver = MigrationDriver::new(
            Arc::new(store.clone()),
            Arc::new(directory),
            Arc::new(InMemorySubnetLists::new()),
            config,
        )
        .unwrap();
        (store, driver)
    }

    fn readers() -> InMemoryDirectory {
        let mut directory = InMemoryDirectory::new();
        directory.add_group("test_readers");
        directory.add_group("test_readers2");
        directory.add_user("darfdas", Vec::<String>::new());
        directory
    }

    #[tokio::test]
    async fn test_true_and_false_share_the_match_all_rule() {
        let (store, driver) = driver_with(readers(), MigrationConfig::default());
        let mut ctx = driver.new_context();

        let t = driver.convert_rule_string(&mut ctx, "true").await.unwrap();
        let f = driver.convert_rule_string(&mut ctx, "false").await.unwrap();

        assert_eq!(t, vec![RuleAssociation::new(t[0].rule_id, false, false)]);
        assert_eq!(f, vec![RuleAssociation::new(t[0].rule_id, true, true)]);
        assert_eq!(store.get_rule(t[0].rule_id).await.unwrap(), Some(AccessRule::match_all()));
        assert_eq!(store.rule_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_names_get_sequential_placeholders() {
        let (_store, driver) = driver_with(readers(), MigrationConfig::default());
        let mut ctx = driver.new_context();

        driver
            .convert_rule_string(&mut ctx, "group ghosts OR user nobody")
            .await
            .unwrap();
        driver.convert_rule_string(&mut ctx, "group ghosts").await.unwrap();

        let placeholders: Vec<_> = ctx.unresolved().iter().map(|u| (u.name.as_str(), u.placeholder)).collect();
        assert_eq!(
            placeholders,
            vec![("ghosts", Some(9_999_999)), ("nobody", Some(10_000_000))]
        );
    }

    #[tokio::test]
    async fn test_unknown_iplist_falls_back_to_loopback() {
        let (store, driver) = driver_with(readers(), MigrationConfig::default());
        let mut ctx = driver.new_context();

        let assocs = driver.convert_rule_string(&mut ctx, "iplist campus").await.unwrap();
        let rule = store.get_rule(assocs[0].rule_id).await.unwrap().unwrap();
        assert_eq!(rule, AccessRule::with_subnets(["127.0.0.1/32".parse().unwrap()]));
        assert_eq!(ctx.unresolved()[0].kind, "iplist");
    }

    #[tokio::test]
    async fn test_named_rule_and_inline_clause_become_two_rulesets() {
        let (store, driver) = driver_with(readers(), MigrationConfig::default());
        let mut library = LegacyRuleLibrary::new();
        library.insert("not_rule", "NOT ( group test_readers OR group test_readers2 )");
        let nodes = vec![NodeAccess {
            id: 1,
            read: Some("not_rule,{ user darfdas }".to_string()),
            ..Default::default()
        }];

        let report = driver.run(&library, &nodes).await.unwrap();
        assert!(report.is_clean(), "{}", report);
        assert_eq!(report.successes, 2);

        let attached = store.node_rulesets(1, AccessType::Read).await.unwrap();
        assert_eq!(attached.len(), 2);
        assert_eq!(attached.iter().filter(|a| a.private).count(), 1);

        let assocs = store.rule_associations_for_node(1, AccessType::Read).await.unwrap();
        assert_eq!(assocs.len(), 2);
        assert!(assocs.iter().any(|a| a.invert && a.blocking));
        assert!(assocs.iter().any(|a| !a.invert && !a.blocking));
    }

    #[tokio::test]
    async fn test_failures_are_collected_and_batch_continues() {
        let (store, driver) = driver_with(readers(), MigrationConfig::default());
        let nodes = vec![
            NodeAccess {
                id: 1,
                read: Some("group test_readers AND group test_readers2".to_string()),
                ..Default::default()
            },
            NodeAccess {
                id: 2,
                read: Some("group (".to_string()),
                write: Some("group test_readers".to_string()),
                ..Default::default()
            },
        ];

        let report = driver.run(&LegacyRuleLibrary::new(), &nodes).await.unwrap();
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.successes, 1);
        assert_eq!(report.nodes_migrated, 2);
        assert_eq!(store.rule_associations_for_node(2, AccessType::Write).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fail_fast_aborts_on_first_failure() {
        let config = MigrationConfig {
            fail_fast: true,
            ..MigrationConfig::default()
        };
        let (_store, driver) = driver_with(readers(), config);
        let nodes = vec![NodeAccess {
            id: 1,
            read: Some("group test_readers AND group test_readers2".to_string()),
            ..Default::default()
        }];

        let err = driver.run(&LegacyRuleLibrary::new(), &nodes).await.unwrap_err();
        assert!(matches!(err, AclError::CannotRepresentRule(_)));
    }

    #[tokio::test]
    async fn test_rerun_clears_stale_private_grants() {
        let (store, driver) = driver_with(readers(), MigrationConfig::default());
        let library = LegacyRuleLibrary::new();

        let first = vec![NodeAccess {
            id: 1,
            read: Some("group test_readers".to_string()),
            write: Some("group test_readers".to_string()),
            ..Default::default()
        }];
        driver.run(&library, &first).await.unwrap();
        assert_eq!(store.rule_associations_for_node(1, AccessType::Read).await.unwrap().len(), 1);
        assert_eq!(store.rule_associations_for_node(1, AccessType::Write).await.unwrap().len(), 1);

        let second = vec![NodeAccess {
            id: 1,
            read: Some("group test_readers AND group test_readers2".to_string()),
            ..Default::default()
        }];
        let report = driver.run(&library, &second).await.unwrap();

        assert_eq!(report.failures.len(), 1);
        assert!(store.rule_associations_for_node(1, AccessType::Read).await.unwrap().is_empty());
        assert!(store.rule_associations_for_node(1, AccessType::Write).await.unwrap().is_empty());
    }

    #[test]
    fn test_inline_clauses_are_or_joined() {
        assert_eq!(join_clauses(&["group a".to_string()]), "group a");
        assert_eq!(
            join_clauses(&["group a".to_string(), "{ user b }".to_string()]),
            "( group a ) OR ( { user b } )"
        );
    }
}
