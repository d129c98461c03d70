//! Access Rule Model
//!
//! Rules, rulesets and their persistence, rule synthesis from DNF,
//! inheritance over the containment hierarchy, and access evaluation.

pub mod evaluator;
pub mod inheritance;
pub mod policy;
pub mod rules;
pub mod storage;
pub mod synthesis;

pub use evaluator::{AccessEvaluator, AccessRequest};
pub use inheritance::InheritanceResolver;
pub use policy::PolicyDecision;
pub use rules::{
    AccessRule, DateBound, DateRange, Dimension, EffectiveAssociation, RuleAssociation,
};
pub use storage::{AccessRuleset, AccessSnapshot, AccessStore, InMemoryAccessStore, NodeToRuleset};
pub use synthesis::{Atom, AtomMap, RuleSynthesizer, SynthesizedRule};
