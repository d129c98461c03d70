//! Boolean Expressions over Condition Symbols
//!
//! Maps a [`Condition`] tree to an [`Expr`] whose atoms are [`Symbol`]s, one
//! per distinct leaf. The [`SymbolTable`] is scoped to a single migration run:
//! the same leaf text only maps to the same symbol within that run.

use crate::legacy::{Condition, LEGACY_DATE_FORMAT};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Opaque atom standing for one leaf condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(u32);

impl Symbol {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Boolean expression over symbols
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Const(bool),
    Var(Symbol),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    pub fn not(expr: Expr) -> Self {
        Expr::Not(Box::new(expr))
    }

    /// Evaluate under a truth assignment
    pub fn eval<F>(&self, assignment: &F) -> bool
    where
        F: Fn(Symbol) -> bool,
    {
        match self {
            Expr::Const(value) => *value,
            Expr::Var(symbol) => assignment(*symbol),
            Expr::Not(inner) => !inner.eval(assignment),
            Expr::And(args) => args.iter().all(|arg| arg.eval(assignment)),
            Expr::Or(args) => args.iter().any(|arg| arg.eval(assignment)),
        }
    }

    /// All symbols occurring in the expression
    pub fn symbols(&self) -> BTreeSet<Symbol> {
        let mut out = BTreeSet::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols(&self, out: &mut BTreeSet<Symbol>) {
        match self {
            Expr::Const(_) => {}
            Expr::Var(symbol) => {
                out.insert(*symbol);
            }
            Expr::Not(inner) => inner.collect_symbols(out),
            Expr::And(args) | Expr::Or(args) => {
                for arg in args {
                    arg.collect_symbols(out);
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
struct SymbolEntry {
    name: String,
    condition: Condition,
}

/// Per-run memo from leaf conditions to symbols
#[derive(Debug, Default)]
pub struct SymbolTable {
    by_condition: HashMap<Condition, Symbol>,
    entries: Vec<SymbolEntry>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Symbol for a leaf, allocating one on first sight
    pub fn intern(&mut self, leaf: &Condition) -> Symbol {
        if let Some(symbol) = self.by_condition.get(leaf) {
            return *symbol;
        }

        let symbol = Symbol(self.entries.len() as u32);
        self.entries.push(SymbolEntry {
            name: symbol_name(leaf),
            condition: leaf.clone(),
        });
        self.by_condition.insert(leaf.clone(), symbol);
        symbol
    }

    pub fn condition(&self, symbol: Symbol) -> Option<&Condition> {
        self.entries.get(symbol.index()).map(|e| &e.condition)
    }

    pub fn name(&self, symbol: Symbol) -> Option<&str> {
        self.entries.get(symbol.index()).map(|e| e.name.as_str())
    }

    /// Convert a condition tree, interning its leaves
    pub fn to_expr(&mut self, condition: &Condition) -> Expr {
        match condition {
            Condition::True => Expr::Const(true),
            Condition::False => Expr::Const(false),
            Condition::And(a, b) => {
                let mut args = Vec::new();
                push_flattened(&mut args, self.to_expr(a), true);
                push_flattened(&mut args, self.to_expr(b), true);
                Expr::And(args)
            }
            Condition::Or(a, b) => {
                let mut args = Vec::new();
                push_flattened(&mut args, self.to_expr(a), false);
                push_flattened(&mut args, self.to_expr(b), false);
                Expr::Or(args)
            }
            Condition::Not(a) => Expr::not(self.to_expr(a)),
            leaf => Expr::Var(self.intern(leaf)),
        }
    }

    /// Render an expression with symbol names, for logs and reports
    pub fn display<'a>(&'a self, expr: &'a Expr) -> ExprDisplay<'a> {
        ExprDisplay { table: self, expr }
    }
}

fn push_flattened(args: &mut Vec<Expr>, expr: Expr, conjunction: bool) {
    match (expr, conjunction) {
        (Expr::And(inner), true) | (Expr::Or(inner), false) => args.extend(inner),
        (other, _) => args.push(other),
    }
}

fn symbol_name(leaf: &Condition) -> String {
    let bound = |inclusive: bool| if inclusive { "inclusive" } else { "exclusive" };
    match leaf {
        Condition::Group(name) => format!("group_{}", name),
        Condition::User(name) => format!("user_{}", name),
        Condition::Ip { addr, prefix_len } => format!("ip_{}/{}", addr, prefix_len),
        Condition::IpList(name) => format!("iplist_{}", name),
        Condition::DateBefore { date, inclusive } => format!(
            "before_{}_{}",
            date.format(LEGACY_DATE_FORMAT),
            bound(*inclusive)
        ),
        Condition::DateAfter { date, inclusive } => format!(
            "after_{}_{}",
            date.format(LEGACY_DATE_FORMAT),
            bound(*inclusive)
        ),
        other => other.to_string(),
    }
}

pub struct ExprDisplay<'a> {
    table: &'a SymbolTable,
    expr: &'a Expr,
}

impl fmt::Display for ExprDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |f: &mut fmt::Formatter<'_>, args: &[Expr], op: &str| -> fmt::Result {
            write!(f, "(")?;
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    write!(f, " {} ", op)?;
                }
                write!(f, "{}", self.table.display(arg))?;
            }
            write!(f, ")")
        };

        match self.expr {
            Expr::Const(true) => write!(f, "true"),
            Expr::Const(false) => write!(f, "false"),
            Expr::Var(symbol) => write!(f, "{}", self.table.name(*symbol).unwrap_or("?")),
            Expr::Not(inner) => write!(f, "~{}", self.table.display(inner)),
            Expr::And(args) => join(f, args, "&"),
            Expr::Or(args) => join(f, args, "|"),
        }
    }
}
