//! Boolean Logic
//!
//! Symbolization of condition trees and conversion to disjunctive normal form.

pub mod dnf;
pub mod expr;

pub use dnf::{Dnf, DnfNormalizer, Literal, Term};
pub use expr::{Expr, Symbol, SymbolTable};
