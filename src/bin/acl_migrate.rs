use treeacl::acl::{AccessEvaluator, AccessRequest, InheritanceResolver, RuleSynthesizer};
use treeacl::acl::synthesis::{Atom, AtomMap};
use treeacl::legacy::{Condition, LegacyAclParser};
use treeacl::logic::{DnfNormalizer, SymbolTable};
use treeacl::migration::{migrate_dataset, MigratedState, MigrationDataset};
use treeacl::types::{AccessType, NodeId};
use treeacl::Config;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "treeacl-migrate")]
#[command(about = "Migrate legacy free-text ACLs to access rules and rulesets")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate a JSON dataset and write the resulting store snapshot
    Migrate {
        /// Legacy dataset (JSON)
        dataset: PathBuf,

        /// Snapshot output file
        #[arg(short, long, default_value = "acl_snapshot.json")]
        output: PathBuf,

        /// Report output file, printed to stdout when omitted
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Dry-run a migration and exit non-zero if any rule fails
    Check {
        dataset: PathBuf,
    },

    /// Show how a single rule string is parsed and synthesized
    Parse {
        rule: String,
    },

    /// Evaluate access against a migrated snapshot
    Evaluate {
        /// Snapshot written by `migrate`
        snapshot: PathBuf,

        /// Dataset providing users, groups and the hierarchy
        dataset: PathBuf,

        #[arg(long)]
        node: NodeId,

        #[arg(long)]
        user: String,

        #[arg(long, default_value = "127.0.0.1")]
        ip: Ipv4Addr,

        #[arg(long, default_value = "read")]
        access: AccessType,

        /// Request date (YYYY-MM-DD), today when omitted
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(&path.to_string_lossy())
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    match cli.command {
        Commands::Migrate {
            dataset,
            output,
            report,
        } => {
            let data = MigrationDataset::from_file(&dataset)
                .with_context(|| format!("reading dataset {}", dataset.display()))?;
            let migration = migrate_dataset(&data, config.migration).await?;

            let state = migration.state().await?;
            std::fs::write(&output, serde_json::to_string_pretty(&state)?)?;
            info!("Wrote snapshot to {}", output.display());

            match report {
                Some(path) => std::fs::write(&path, serde_json::to_string_pretty(&migration.report)?)?,
                None => println!("{}", migration.report),
            }
        }
        Commands::Check { dataset } => {
            let data = MigrationDataset::from_file(&dataset)
                .with_context(|| format!("reading dataset {}", dataset.display()))?;
            let migration_report = migrate_dataset(&data, config.migration).await?.report;
            println!("{}", migration_report);
            if !migration_report.failures.is_empty() {
                bail!("{} rules failed to migrate", migration_report.failures.len());
            }
        }
        Commands::Parse { rule } => {
            let condition = LegacyAclParser::new().parse(&rule)?;
            println!("condition: {}", condition);

            let mut symbols = SymbolTable::new();
            let expr = symbols.to_expr(&condition);
            println!("expr:      {}", symbols.display(&expr));

            let normalizer = DnfNormalizer::new(config.migration.simplify_dnf, config.migration.max_dnf_terms);
            let dnf = normalizer.normalize(&expr)?;
            println!("dnf terms: {}", dnf.term_count());

            // Principals are numbered by first appearance when no directory is at hand
            let mut atoms = AtomMap::new();
            for (position, symbol) in expr.symbols().into_iter().enumerate() {
                let atom = match symbols.condition(symbol) {
                    Some(Condition::Group(_)) | Some(Condition::User(_)) => Atom::Group(position as u64 + 1),
                    Some(Condition::IpList(_)) => {
                        Atom::Subnets([config.migration.loopback_network()?].into_iter().collect())
                    }
                    Some(other) => match Atom::from_static_condition(other) {
                        Some(atom) => atom,
                        None => bail!("cannot resolve {}", other),
                    },
                    None => bail!("unknown symbol in {}", rule),
                };
                atoms.insert(symbol, atom);
            }

            for unit in RuleSynthesizer::new(&symbols, &atoms).synthesize(&dnf)? {
                println!(
                    "rule:      {} invert={} blocking={}",
                    unit.rule, unit.invert, unit.blocking
                );
            }
        }
        Commands::Evaluate {
            snapshot,
            dataset,
            node,
            user,
            ip,
            access,
            date,
        } => {
            let state = MigratedState::from_file(&snapshot)
                .with_context(|| format!("reading snapshot {}", snapshot.display()))?;
            let data = MigrationDataset::from_file(&dataset)?;
            let (store, directory) = state.restore(&data)?;

            let resolver = InheritanceResolver::new(Arc::new(store), Arc::new(data.hierarchy()));
            let evaluator = AccessEvaluator::new(resolver, Arc::new(directory), config.evaluation);

            let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
            let decision = evaluator
                .check(node, access, &AccessRequest::new(user, ip, date))
                .await?;

            match decision.denial_reason() {
                None => println!("allow"),
                Some(reason) => println!("deny: {}", reason),
            }
        }
    }

    Ok(())
}
