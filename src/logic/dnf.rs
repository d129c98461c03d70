//! Disjunctive Normal Form
//!
//! Negations are pushed to the literals, AND is distributed over OR and
//! constants are folded. Simplification only ever changes the number of
//! terms, never the truth table.

use super::expr::{Expr, Symbol};
use crate::error::{AclError, Result};

use serde::{Deserialize, Serialize};

/// Possibly negated symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Literal {
    pub symbol: Symbol,
    pub negated: bool,
}

impl Literal {
    pub fn positive(symbol: Symbol) -> Self {
        Self {
            symbol,
            negated: false,
        }
    }

    pub fn negative(symbol: Symbol) -> Self {
        Self {
            symbol,
            negated: true,
        }
    }

    pub fn negate(self) -> Self {
        Self {
            symbol: self.symbol,
            negated: !self.negated,
        }
    }
}

/// Conjunction of literals, never empty
pub type Term = Vec<Literal>;

/// OR of terms, or a constant when the expression folded away
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dnf {
    Const(bool),
    Terms(Vec<Term>),
}

impl Dnf {
    pub fn term_count(&self) -> usize {
        match self {
            Dnf::Const(_) => 0,
            Dnf::Terms(terms) => terms.len(),
        }
    }

    pub fn eval<F>(&self, assignment: &F) -> bool
    where
        F: Fn(Symbol) -> bool,
    {
        match self {
            Dnf::Const(value) => *value,
            Dnf::Terms(terms) => terms.iter().any(|term| {
                term.iter()
                    .all(|literal| assignment(literal.symbol) != literal.negated)
            }),
        }
    }

    /// Equivalent DNF with duplicate literals and terms, contradictions and
    /// absorbed terms removed
    pub fn simplified(&self) -> Dnf {
        match self {
            Dnf::Const(value) => Dnf::Const(*value),
            Dnf::Terms(terms) => simplify_terms(terms.clone()),
        }
    }
}

/// Converts expressions to DNF
#[derive(Debug, Clone, Copy)]
pub struct DnfNormalizer {
    simplify: bool,
    max_terms: usize,
}

impl Default for DnfNormalizer {
    fn default() -> Self {
        Self {
            simplify: true,
            max_terms: 4096,
        }
    }
}

impl DnfNormalizer {
    pub fn new(simplify: bool, max_terms: usize) -> Self {
        Self {
            simplify,
            max_terms,
        }
    }

    pub fn normalize(&self, expr: &Expr) -> Result<Dnf> {
        self.convert(expr, false)
    }

    fn convert(&self, expr: &Expr, negated: bool) -> Result<Dnf> {
        match expr {
            Expr::Const(value) => Ok(Dnf::Const(*value != negated)),
            Expr::Var(symbol) => Ok(Dnf::Terms(vec![vec![Literal {
                symbol: *symbol,
                negated,
            }]])),
            Expr::Not(inner) => self.convert(inner, !negated),
            Expr::And(args) if !negated => self.conjoin_all(args, negated),
            Expr::Or(args) if negated => self.conjoin_all(args, negated),
            Expr::And(args) | Expr::Or(args) => self.disjoin_all(args, negated),
        }
    }

    fn conjoin_all(&self, args: &[Expr], negated: bool) -> Result<Dnf> {
        let mut acc = Dnf::Const(true);
        for arg in args {
            let next = self.convert(arg, negated)?;
            acc = self.conjoin(acc, next)?;
            if acc == Dnf::Const(false) {
                break;
            }
        }
        Ok(acc)
    }

    fn disjoin_all(&self, args: &[Expr], negated: bool) -> Result<Dnf> {
        let mut acc = Dnf::Const(false);
        for arg in args {
            let next = self.convert(arg, negated)?;
            acc = self.disjoin(acc, next)?;
            if acc == Dnf::Const(true) {
                break;
            }
        }
        Ok(acc)
    }

    fn conjoin(&self, a: Dnf, b: Dnf) -> Result<Dnf> {
        match (a, b) {
            (Dnf::Const(false), _) | (_, Dnf::Const(false)) => Ok(Dnf::Const(false)),
            (Dnf::Const(true), other) | (other, Dnf::Const(true)) => Ok(other),
            (Dnf::Terms(left), Dnf::Terms(right)) => {
                let terms = left.len().saturating_mul(right.len());
                if terms > self.max_terms {
                    return Err(AclError::DnfTooLarge {
                        terms,
                        limit: self.max_terms,
                    });
                }

                let mut product = Vec::with_capacity(terms);
                for l in &left {
                    for r in &right {
                        let mut term = l.clone();
                        term.extend_from_slice(r);
                        product.push(term);
                    }
                }
                Ok(self.finish(product))
            }
        }
    }

    fn disjoin(&self, a: Dnf, b: Dnf) -> Result<Dnf> {
        match (a, b) {
            (Dnf::Const(true), _) | (_, Dnf::Const(true)) => Ok(Dnf::Const(true)),
            (Dnf::Const(false), other) | (other, Dnf::Const(false)) => Ok(other),
            (Dnf::Terms(mut left), Dnf::Terms(right)) => {
                left.extend(right);
                if left.len() > self.max_terms {
                    return Err(AclError::DnfTooLarge {
                        terms: left.len(),
                        limit: self.max_terms,
                    });
                }
                Ok(self.finish(left))
            }
        }
    }

    fn finish(&self, terms: Vec<Term>) -> Dnf {
        if self.simplify {
            simplify_terms(terms)
        } else {
            Dnf::Terms(terms)
        }
    }
}

/// Sort and dedup literals, drop contradictory and duplicate terms, apply
/// absorption. Preserves the truth table.
fn simplify_terms(terms: Vec<Term>) -> Dnf {
    let mut kept: Vec<Term> = Vec::with_capacity(terms.len());
    for mut term in terms {
        term.sort();
        term.dedup();
        let contradictory = term
            .windows(2)
            .any(|pair| pair[0].symbol == pair[1].symbol);
        if contradictory || kept.contains(&term) {
            continue;
        }
        kept.push(term);
    }

    // absorption: a ∨ (a ∧ b) = a
    let absorbed: Vec<Term> = kept
        .iter()
        .enumerate()
        .filter(|(i, term)| {
            !kept.iter().enumerate().any(|(j, other)| {
                *i != j
                    && other.len() < term.len()
                    && other.iter().all(|lit| term.contains(lit))
            })
        })
        .map(|(_, term)| term.clone())
        .collect();

    if absorbed.is_empty() {
        Dnf::Const(false)
    } else {
        Dnf::Terms(absorbed)
    }
}
