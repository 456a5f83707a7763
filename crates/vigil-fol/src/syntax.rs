//! Terms and formulas.
//!
//! Formulas are a closed tagged-variant type with exhaustive-match traversal;
//! there is no open-ended node hierarchy. Occurrences of declared symbols
//! carry an epoch index selecting one temporal copy of the mutable
//! vocabulary: single-state formulas use epoch 0 throughout, transition
//! bodies use 0 for the old state and 1 for the new state. Immutable symbols
//! ignore the index.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::vocab::Vocabulary;

/// A quantifier-bound variable with its sort.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortedVar {
    pub name: String,
    pub sort: String,
}

impl SortedVar {
    pub fn new(name: impl Into<String>, sort: impl Into<String>) -> Self {
        SortedVar {
            name: name.into(),
            sort: sort.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Term {
    /// A quantifier-bound variable.
    Var(String),
    /// A constant (nullary) or function application.
    App {
        symbol: String,
        epoch: usize,
        args: Vec<Term>,
    },
}

impl Term {
    pub fn var(name: impl Into<String>) -> Term {
        Term::Var(name.into())
    }

    /// A constant occurrence at epoch 0.
    pub fn cnst(name: impl Into<String>) -> Term {
        Term::cnst_at(0, name)
    }

    pub fn cnst_at(epoch: usize, name: impl Into<String>) -> Term {
        Term::App {
            symbol: name.into(),
            epoch,
            args: Vec::new(),
        }
    }

    /// A function application at epoch 0.
    pub fn app(symbol: impl Into<String>, args: Vec<Term>) -> Term {
        Term::app_at(0, symbol, args)
    }

    pub fn app_at(epoch: usize, symbol: impl Into<String>, args: Vec<Term>) -> Term {
        Term::App {
            symbol: symbol.into(),
            epoch,
            args,
        }
    }

    fn collect_free_vars(&self, bound: &mut Vec<String>, out: &mut HashSet<String>) {
        match self {
            Term::Var(v) => {
                if !bound.iter().any(|b| b == v) {
                    out.insert(v.clone());
                }
            }
            Term::App { args, .. } => {
                for a in args {
                    a.collect_free_vars(bound, out);
                }
            }
        }
    }

    fn substitute(&self, map: &HashMap<String, Term>, bound: &[String]) -> Term {
        match self {
            Term::Var(v) => {
                if bound.iter().any(|b| b == v) {
                    self.clone()
                } else if let Some(t) = map.get(v) {
                    t.clone()
                } else {
                    self.clone()
                }
            }
            Term::App {
                symbol,
                epoch,
                args,
            } => Term::App {
                symbol: symbol.clone(),
                epoch: *epoch,
                args: args.iter().map(|a| a.substitute(map, bound)).collect(),
            },
        }
    }

    fn max_epoch(&self) -> usize {
        match self {
            Term::Var(_) => 0,
            Term::App { epoch, args, .. } => args
                .iter()
                .map(Term::max_epoch)
                .max()
                .unwrap_or(0)
                .max(*epoch),
        }
    }

    fn mentions_mutable(&self, vocab: &Vocabulary) -> bool {
        match self {
            Term::Var(_) => false,
            Term::App { symbol, args, .. } => {
                vocab.is_mutable(symbol) || args.iter().any(|a| a.mentions_mutable(vocab))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quant {
    Forall,
    Exists,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Formula {
    Lit(bool),
    Eq(Term, Term),
    /// A relation atom.
    Rel {
        symbol: String,
        epoch: usize,
        args: Vec<Term>,
    },
    Not(Box<Formula>),
    And(Vec<Formula>),
    Or(Vec<Formula>),
    Implies(Box<Formula>, Box<Formula>),
    Iff(Box<Formula>, Box<Formula>),
    Quantified {
        quant: Quant,
        binders: Vec<SortedVar>,
        body: Box<Formula>,
    },
}

impl Formula {
    pub fn tru() -> Formula {
        Formula::Lit(true)
    }

    pub fn fls() -> Formula {
        Formula::Lit(false)
    }

    pub fn eq(lhs: Term, rhs: Term) -> Formula {
        Formula::Eq(lhs, rhs)
    }

    pub fn ne(lhs: Term, rhs: Term) -> Formula {
        Formula::Eq(lhs, rhs).negate()
    }

    /// A relation atom at epoch 0.
    pub fn rel(symbol: impl Into<String>, args: Vec<Term>) -> Formula {
        Formula::rel_at(0, symbol, args)
    }

    pub fn rel_at(epoch: usize, symbol: impl Into<String>, args: Vec<Term>) -> Formula {
        Formula::Rel {
            symbol: symbol.into(),
            epoch,
            args,
        }
    }

    /// Negation, collapsing double negation and boolean literals.
    pub fn negate(self) -> Formula {
        match self {
            Formula::Lit(b) => Formula::Lit(!b),
            Formula::Not(f) => *f,
            f => Formula::Not(Box::new(f)),
        }
    }

    /// Conjunction. Empty input is `true`; a single conjunct is returned as is.
    pub fn and(mut fs: Vec<Formula>) -> Formula {
        match fs.len() {
            0 => Formula::Lit(true),
            1 => fs.remove(0),
            _ => Formula::And(fs),
        }
    }

    pub fn or(mut fs: Vec<Formula>) -> Formula {
        match fs.len() {
            0 => Formula::Lit(false),
            1 => fs.remove(0),
            _ => Formula::Or(fs),
        }
    }

    pub fn implies(lhs: Formula, rhs: Formula) -> Formula {
        Formula::Implies(Box::new(lhs), Box::new(rhs))
    }

    pub fn iff(lhs: Formula, rhs: Formula) -> Formula {
        Formula::Iff(Box::new(lhs), Box::new(rhs))
    }

    pub fn forall(binders: Vec<SortedVar>, body: Formula) -> Formula {
        Formula::quantified(Quant::Forall, binders, body)
    }

    pub fn exists(binders: Vec<SortedVar>, body: Formula) -> Formula {
        Formula::quantified(Quant::Exists, binders, body)
    }

    pub fn quantified(quant: Quant, binders: Vec<SortedVar>, body: Formula) -> Formula {
        if binders.is_empty() {
            body
        } else {
            Formula::Quantified {
                quant,
                binders,
                body: Box::new(body),
            }
        }
    }

    /// Free variables of the formula.
    pub fn free_vars(&self) -> HashSet<String> {
        let mut out = HashSet::new();
        self.collect_free_vars(&mut Vec::new(), &mut out);
        out
    }

    fn collect_free_vars(&self, bound: &mut Vec<String>, out: &mut HashSet<String>) {
        match self {
            Formula::Lit(_) => {}
            Formula::Eq(l, r) => {
                l.collect_free_vars(bound, out);
                r.collect_free_vars(bound, out);
            }
            Formula::Rel { args, .. } => {
                for a in args {
                    a.collect_free_vars(bound, out);
                }
            }
            Formula::Not(f) => f.collect_free_vars(bound, out),
            Formula::And(fs) | Formula::Or(fs) => {
                for f in fs {
                    f.collect_free_vars(bound, out);
                }
            }
            Formula::Implies(l, r) | Formula::Iff(l, r) => {
                l.collect_free_vars(bound, out);
                r.collect_free_vars(bound, out);
            }
            Formula::Quantified { binders, body, .. } => {
                let depth = bound.len();
                bound.extend(binders.iter().map(|b| b.name.clone()));
                body.collect_free_vars(bound, out);
                bound.truncate(depth);
            }
        }
    }

    /// Substitute free variables by terms. Bound occurrences are left alone;
    /// the caller is responsible for picking replacement terms whose own
    /// variables cannot be captured (diagram machinery only ever substitutes
    /// closed terms).
    pub fn substitute(&self, map: &HashMap<String, Term>) -> Formula {
        self.substitute_under(map, &mut Vec::new())
    }

    fn substitute_under(&self, map: &HashMap<String, Term>, bound: &mut Vec<String>) -> Formula {
        match self {
            Formula::Lit(_) => self.clone(),
            Formula::Eq(l, r) => Formula::Eq(l.substitute(map, bound), r.substitute(map, bound)),
            Formula::Rel {
                symbol,
                epoch,
                args,
            } => Formula::Rel {
                symbol: symbol.clone(),
                epoch: *epoch,
                args: args.iter().map(|a| a.substitute(map, bound)).collect(),
            },
            Formula::Not(f) => Formula::Not(Box::new(f.substitute_under(map, bound))),
            Formula::And(fs) => {
                Formula::And(fs.iter().map(|f| f.substitute_under(map, bound)).collect())
            }
            Formula::Or(fs) => {
                Formula::Or(fs.iter().map(|f| f.substitute_under(map, bound)).collect())
            }
            Formula::Implies(l, r) => Formula::Implies(
                Box::new(l.substitute_under(map, bound)),
                Box::new(r.substitute_under(map, bound)),
            ),
            Formula::Iff(l, r) => Formula::Iff(
                Box::new(l.substitute_under(map, bound)),
                Box::new(r.substitute_under(map, bound)),
            ),
            Formula::Quantified {
                quant,
                binders,
                body,
            } => {
                let depth = bound.len();
                bound.extend(binders.iter().map(|b| b.name.clone()));
                let body = body.substitute_under(map, bound);
                bound.truncate(depth);
                Formula::Quantified {
                    quant: *quant,
                    binders: binders.clone(),
                    body: Box::new(body),
                }
            }
        }
    }

    /// Largest epoch index occurring in the formula. A query translating this
    /// formula must supply at least `max_epoch() + 1` epoch keys.
    pub fn max_epoch(&self) -> usize {
        match self {
            Formula::Lit(_) => 0,
            Formula::Eq(l, r) => l.max_epoch().max(r.max_epoch()),
            Formula::Rel { epoch, args, .. } => args
                .iter()
                .map(Term::max_epoch)
                .max()
                .unwrap_or(0)
                .max(*epoch),
            Formula::Not(f) => f.max_epoch(),
            Formula::And(fs) | Formula::Or(fs) => fs.iter().map(Formula::max_epoch).max().unwrap_or(0),
            Formula::Implies(l, r) | Formula::Iff(l, r) => l.max_epoch().max(r.max_epoch()),
            Formula::Quantified { body, .. } => body.max_epoch(),
        }
    }

    /// Whether any mutable symbol occurs in the formula. Axioms that mention
    /// none can be asserted once per query instead of once per epoch key.
    pub fn mentions_mutable(&self, vocab: &Vocabulary) -> bool {
        match self {
            Formula::Lit(_) => false,
            Formula::Eq(l, r) => l.mentions_mutable(vocab) || r.mentions_mutable(vocab),
            Formula::Rel { symbol, args, .. } => {
                vocab.is_mutable(symbol) || args.iter().any(|a| a.mentions_mutable(vocab))
            }
            Formula::Not(f) => f.mentions_mutable(vocab),
            Formula::And(fs) | Formula::Or(fs) => fs.iter().any(|f| f.mentions_mutable(vocab)),
            Formula::Implies(l, r) | Formula::Iff(l, r) => {
                l.mentions_mutable(vocab) || r.mentions_mutable(vocab)
            }
            Formula::Quantified { body, .. } => body.mentions_mutable(vocab),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Var(v) => write!(f, "{v}"),
            Term::App {
                symbol,
                epoch,
                args,
            } => {
                if *epoch > 0 {
                    write!(f, "{symbol}@{epoch}")?;
                } else {
                    write!(f, "{symbol}")?;
                }
                if !args.is_empty() {
                    write!(f, "(")?;
                    for (i, a) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{a}")?;
                    }
                    write!(f, ")")?;
                }
                Ok(())
            }
        }
    }
}

fn fmt_binders(f: &mut fmt::Formatter<'_>, binders: &[SortedVar]) -> fmt::Result {
    for (i, b) in binders.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}:{}", b.name, b.sort)?;
    }
    Ok(())
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Formula::Lit(b) => write!(f, "{b}"),
            Formula::Eq(l, r) => write!(f, "{l} = {r}"),
            Formula::Rel {
                symbol,
                epoch,
                args,
            } => {
                if *epoch > 0 {
                    write!(f, "{symbol}@{epoch}")?;
                } else {
                    write!(f, "{symbol}")?;
                }
                if !args.is_empty() {
                    write!(f, "(")?;
                    for (i, a) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{a}")?;
                    }
                    write!(f, ")")?;
                }
                Ok(())
            }
            Formula::Not(g) => write!(f, "!({g})"),
            Formula::And(fs) => {
                write!(f, "(")?;
                for (i, g) in fs.iter().enumerate() {
                    if i > 0 {
                        write!(f, " & ")?;
                    }
                    write!(f, "{g}")?;
                }
                write!(f, ")")
            }
            Formula::Or(fs) => {
                write!(f, "(")?;
                for (i, g) in fs.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{g}")?;
                }
                write!(f, ")")
            }
            Formula::Implies(l, r) => write!(f, "({l} -> {r})"),
            Formula::Iff(l, r) => write!(f, "({l} <-> {r})"),
            Formula::Quantified {
                quant,
                binders,
                body,
            } => {
                let kw = match quant {
                    Quant::Forall => "forall",
                    Quant::Exists => "exists",
                };
                write!(f, "({kw} ")?;
                fmt_binders(f, binders)?;
                write!(f, ". {body})")
            }
        }
    }
}
