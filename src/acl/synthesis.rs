//! Rule Synthesis
//!
//! Turns DNF terms into access rules plus association flags. A rule holds at
//! most one value set per dimension with one invert flag, so not every term is
//! representable. Conjunctions that do not fit are retried via De Morgan as a
//! single inverted disjunction; disjunctions that do not fit are split into
//! one association per term.
//!
//! Terms made only of negated literals (and the constant `false`) become
//! blocking associations: they deny regardless of what else grants.

use super::rules::{AccessRule, DateRange, Dimension};
use crate::error::{AclError, Result};
use crate::legacy::Condition;
use crate::logic::{Dnf, Literal, Symbol, SymbolTable, Term};
use crate::types::GroupId;

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Dimension value a resolved symbol stands for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Atom {
    Group(GroupId),
    Subnets(BTreeSet<Ipv4Network>),
    DateRange(DateRange),
}

impl Atom {
    pub fn dimension(&self) -> Dimension {
        match self {
            Atom::Group(_) => Dimension::Group,
            Atom::Subnets(_) => Dimension::Subnet,
            Atom::DateRange(_) => Dimension::Date,
        }
    }

    /// Atoms for leaves that need no directory lookup
    pub fn from_static_condition(condition: &Condition) -> Option<Atom> {
        match condition {
            Condition::Ip { addr, prefix_len } => Ipv4Network::new(*addr, *prefix_len)
                .ok()
                .map(|net| Atom::Subnets([net].into_iter().collect())),
            Condition::DateBefore { date, inclusive } => {
                Some(Atom::DateRange(DateRange::before(*date, *inclusive)))
            }
            Condition::DateAfter { date, inclusive } => {
                Some(Atom::DateRange(DateRange::after(*date, *inclusive)))
            }
            _ => None,
        }
    }
}

/// Resolved atoms of one migration run
pub type AtomMap = HashMap<Symbol, Atom>;

/// One rule plus the flags of the association that will point at it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SynthesizedRule {
    pub rule: AccessRule,
    pub invert: bool,
    pub blocking: bool,
}

#[derive(Debug)]
struct Slot<T: Ord> {
    values: BTreeSet<T>,
    negated: bool,
}

#[derive(Debug, Default)]
struct Slots {
    group: Option<Slot<GroupId>>,
    subnet: Option<Slot<Ipv4Network>>,
    date: Option<Slot<DateRange>>,
}

impl Slots {
    fn occupied(&self) -> usize {
        [self.group.is_some(), self.subnet.is_some(), self.date.is_some()]
            .iter()
            .filter(|set| **set)
            .count()
    }

    fn negated(&self, dimension: Dimension) -> Option<bool> {
        match dimension {
            Dimension::Group => self.group.as_ref().map(|s| s.negated),
            Dimension::Subnet => self.subnet.as_ref().map(|s| s.negated),
            Dimension::Date => self.date.as_ref().map(|s| s.negated),
        }
    }

    /// Put an atom into its slot, merging with what is already there
    fn merge(&mut self, atom: &Atom, negated: bool) {
        match atom {
            Atom::Group(id) => {
                let slot = self.group.get_or_insert_with(|| Slot {
                    values: BTreeSet::new(),
                    negated,
                });
                slot.values.insert(*id);
            }
            Atom::Subnets(nets) => {
                let slot = self.subnet.get_or_insert_with(|| Slot {
                    values: BTreeSet::new(),
                    negated,
                });
                slot.values.extend(nets.iter().copied());
            }
            Atom::DateRange(range) => {
                let slot = self.date.get_or_insert_with(|| Slot {
                    values: BTreeSet::new(),
                    negated,
                });
                slot.values.insert(*range);
            }
        }
    }

    /// Build the rule, optionally flipping every dimension invert
    fn into_rule(self, flip: bool) -> AccessRule {
        let mut rule = AccessRule::default();
        if let Some(slot) = self.group {
            rule.group_ids = Some(slot.values);
            rule.invert_group = slot.negated != flip;
        }
        if let Some(slot) = self.subnet {
            rule.subnets = Some(slot.values);
            rule.invert_subnet = slot.negated != flip;
        }
        if let Some(slot) = self.date {
            rule.dateranges = Some(slot.values);
            rule.invert_date = slot.negated != flip;
        }
        rule.canonicalize()
    }
}

/// Synthesizes access rules from DNF over resolved symbols
pub struct RuleSynthesizer<'a> {
    symbols: &'a SymbolTable,
    atoms: &'a AtomMap,
}

impl<'a> RuleSynthesizer<'a> {
    pub fn new(symbols: &'a SymbolTable, atoms: &'a AtomMap) -> Self {
        Self { symbols, atoms }
    }

    /// Synthesize the associations for a whole DNF. The DNF is simplified
    /// first, so the result does not depend on whether the normalizer did.
    pub fn synthesize(&self, dnf: &Dnf) -> Result<Vec<SynthesizedRule>> {
        match &dnf.simplified() {
            Dnf::Const(true) => Ok(vec![SynthesizedRule {
                rule: AccessRule::match_all(),
                invert: false,
                blocking: false,
            }]),
            Dnf::Const(false) => Ok(vec![SynthesizedRule {
                rule: AccessRule::match_all(),
                invert: true,
                blocking: true,
            }]),
            Dnf::Terms(terms) if terms.len() == 1 => Ok(vec![self.term(&terms[0])?]),
            Dnf::Terms(terms) => self.disjunction(terms),
        }
    }

    /// A literal or a conjunction
    pub fn term(&self, term: &Term) -> Result<SynthesizedRule> {
        let mut term = term.clone();
        term.sort();
        term.dedup();
        match term.as_slice() {
            [] => Err(AclError::CannotRepresentRule("empty term".to_string())),
            [literal] => self.literal(*literal),
            literals => self.conjunction(literals),
        }
    }

    /// A negated literal reuses the positive literal's rule and inverts the
    /// association, so `x` and `NOT x` share one stored rule
    pub fn literal(&self, literal: Literal) -> Result<SynthesizedRule> {
        let mut slots = Slots::default();
        slots.merge(self.atom(literal.symbol)?, false);
        Ok(SynthesizedRule {
            rule: slots.into_rule(false),
            invert: literal.negated,
            blocking: literal.negated,
        })
    }

    pub fn conjunction(&self, literals: &[Literal]) -> Result<SynthesizedRule> {
        let blocking = literals.iter().all(|l| l.negated);

        match self.conjunction_rule(literals) {
            Ok(rule) => Ok(SynthesizedRule {
                rule,
                invert: false,
                blocking,
            }),
            Err(AclError::CannotRepresentRule(reason)) => {
                debug!(
                    "Conjunction {} not representable ({}), retrying via De Morgan",
                    self.describe(literals, "&"),
                    reason
                );
                let negated: Vec<Literal> = literals.iter().map(|l| l.negate()).collect();
                let (rule, invert) = self.disjunction_rule(&negated).map_err(|_| {
                    AclError::CannotRepresentRule(format!(
                        "{}: {}",
                        self.describe(literals, "&"),
                        reason
                    ))
                })?;
                Ok(SynthesizedRule {
                    rule,
                    invert: !invert,
                    blocking,
                })
            }
            Err(other) => Err(other),
        }
    }

    /// Disjunction of terms: one rule when the literals fit, otherwise one
    /// association per term
    pub fn disjunction(&self, terms: &[Term]) -> Result<Vec<SynthesizedRule>> {
        if terms.iter().all(|t| t.len() == 1) {
            let literals: Vec<Literal> = terms.iter().map(|t| t[0]).collect();
            match self.disjunction_rule(&literals) {
                Ok((rule, invert)) => {
                    return Ok(vec![SynthesizedRule {
                        rule,
                        invert,
                        blocking: false,
                    }])
                }
                Err(AclError::CannotRepresentRule(reason)) => {
                    debug!(
                        "Disjunction {} not representable as one rule ({}), splitting terms",
                        self.describe(&literals, "|"),
                        reason
                    );
                }
                Err(other) => return Err(other),
            }
        }

        let mut out: Vec<SynthesizedRule> = Vec::with_capacity(terms.len());
        for term in terms {
            let synthesized = self.term(term)?;
            if !out.contains(&synthesized) {
                out.push(synthesized);
            }
        }
        Ok(out)
    }

    fn conjunction_rule(&self, literals: &[Literal]) -> Result<AccessRule> {
        let mut slots = Slots::default();

        for literal in literals {
            let atom = self.atom(literal.symbol)?;
            let dimension = atom.dimension();
            match (slots.negated(dimension), dimension) {
                (None, _) => {}
                (Some(negated), Dimension::Subnet) if negated == literal.negated => {}
                (Some(_), _) => {
                    return Err(AclError::CannotRepresentRule(format!(
                        "second {:?} literal {} in a conjunction",
                        dimension,
                        self.name(literal.symbol)
                    )));
                }
            }
            slots.merge(atom, literal.negated);
        }

        Ok(slots.into_rule(false))
    }

    /// Single rule for a disjunction of literals, with the association invert.
    ///
    /// Values of one dimension are unioned. At most one literal may be
    /// negated and it must be alone in its dimension. Several dimensions are
    /// encoded by De Morgan: flipped dimension inverts, inverted association.
    fn disjunction_rule(&self, literals: &[Literal]) -> Result<(AccessRule, bool)> {
        let negated = literals.iter().filter(|l| l.negated).count();
        if negated > 1 {
            return Err(AclError::CannotRepresentRule(format!(
                "{} negated literals in a disjunction",
                negated
            )));
        }

        let mut slots = Slots::default();
        for literal in literals {
            let atom = self.atom(literal.symbol)?;
            if let Some(slot_negated) = slots.negated(atom.dimension()) {
                if slot_negated || literal.negated {
                    return Err(AclError::CannotRepresentRule(format!(
                        "negated literal shares the {:?} dimension in a disjunction",
                        atom.dimension()
                    )));
                }
            }
            slots.merge(atom, literal.negated);
        }

        if slots.occupied() > 1 {
            Ok((slots.into_rule(true), true))
        } else {
            Ok((slots.into_rule(false), false))
        }
    }

    fn atom(&self, symbol: Symbol) -> Result<&'a Atom> {
        self.atoms
            .get(&symbol)
            .ok_or_else(|| AclError::UnresolvedReference {
                kind: "symbol".to_string(),
                name: self.name(symbol),
            })
    }

    fn name(&self, symbol: Symbol) -> String {
        self.symbols
            .name(symbol)
            .map(str::to_string)
            .unwrap_or_else(|| format!("#{}", symbol.index()))
    }

    fn describe(&self, literals: &[Literal], op: &str) -> String {
        literals
            .iter()
            .map(|l| format!("{}{}", if l.negated { "~" } else { "" }, self.name(l.symbol)))
            .collect::<Vec<_>>()
            .join(&format!(" {} ", op))
    }
}
