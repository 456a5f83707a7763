//! Finite first-order structures.
//!
//! A `Structure` is the solver-independent form of a model: a finite
//! universe per sort plus concrete interpretations of every symbol, with one
//! copy of the mutable vocabulary per epoch key of the originating query.
//! Element identities are structure-local indices into the universe; the
//! stored element names exist only for reporting.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::syntax::{Formula, Quant, Term};
use crate::{FolError, FolResult};

/// Interpretations of one copy of the vocabulary. Relation and function
/// interpretations are total over the universe: every tuple is present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interp {
    pub relations: BTreeMap<String, BTreeMap<Vec<usize>, bool>>,
    pub constants: BTreeMap<String, usize>,
    pub functions: BTreeMap<String, BTreeMap<Vec<usize>, usize>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Structure {
    /// Universe per sort: element names, indexed by element id.
    pub universes: BTreeMap<String, Vec<String>>,
    /// Interpretations of the immutable symbols, shared by all epochs.
    pub immutable: Interp,
    /// Interpretations of the mutable symbols, one per epoch key.
    pub epochs: Vec<Interp>,
}

impl Structure {
    pub fn universe(&self, sort: &str) -> FolResult<&Vec<String>> {
        self.universes
            .get(sort)
            .ok_or_else(|| FolError::UnknownSort(sort.to_string()))
    }

    pub fn universe_size(&self, sort: &str) -> usize {
        self.universes.get(sort).map(Vec::len).unwrap_or(0)
    }

    fn epoch_interp(&self, epoch_map: &[usize], epoch: usize) -> FolResult<&Interp> {
        let idx = *epoch_map
            .get(epoch)
            .ok_or(FolError::EpochOutOfRange {
                epoch,
                max: epoch_map.len().saturating_sub(1),
            })?;
        self.epochs.get(idx).ok_or(FolError::EpochOutOfRange {
            epoch: idx,
            max: self.epochs.len().saturating_sub(1),
        })
    }

    fn relation_value(&self, symbol: &str, epoch_map: &[usize], epoch: usize, tuple: &[usize]) -> FolResult<bool> {
        let lookup = |interp: &Interp| {
            interp
                .relations
                .get(symbol)
                .and_then(|t| t.get(tuple))
                .copied()
        };
        if let Some(v) = lookup(self.epoch_interp(epoch_map, epoch)?) {
            return Ok(v);
        }
        lookup(&self.immutable).ok_or_else(|| FolError::MissingInterp(symbol.to_string()))
    }

    fn constant_value(&self, symbol: &str, epoch_map: &[usize], epoch: usize) -> FolResult<usize> {
        if let Some(v) = self.epoch_interp(epoch_map, epoch)?.constants.get(symbol) {
            return Ok(*v);
        }
        self.immutable
            .constants
            .get(symbol)
            .copied()
            .ok_or_else(|| FolError::MissingInterp(symbol.to_string()))
    }

    fn function_value(&self, symbol: &str, epoch_map: &[usize], epoch: usize, tuple: &[usize]) -> FolResult<usize> {
        let lookup = |interp: &Interp| {
            interp
                .functions
                .get(symbol)
                .and_then(|t| t.get(tuple))
                .copied()
        };
        if let Some(v) = lookup(self.epoch_interp(epoch_map, epoch)?) {
            return Ok(v);
        }
        lookup(&self.immutable).ok_or_else(|| FolError::MissingInterp(symbol.to_string()))
    }

    fn eval_term(
        &self,
        t: &Term,
        epoch_map: &[usize],
        env: &mut Vec<(String, usize)>,
    ) -> FolResult<usize> {
        match t {
            Term::Var(v) => env
                .iter()
                .rev()
                .find(|(name, _)| name == v)
                .map(|(_, e)| *e)
                .ok_or_else(|| FolError::UnboundVar(v.clone())),
            Term::App {
                symbol,
                epoch,
                args,
            } => {
                if args.is_empty() {
                    return self.constant_value(symbol, epoch_map, *epoch);
                }
                let mut tuple = Vec::with_capacity(args.len());
                for a in args {
                    tuple.push(self.eval_term(a, epoch_map, env)?);
                }
                self.function_value(symbol, epoch_map, *epoch, &tuple)
            }
        }
    }

    /// Evaluate a formula against this structure. `epoch_map[e]` names the
    /// structure epoch interpreting formula epoch `e`; a single-state formula
    /// over epoch 0 is evaluated with `&[k]` for the epoch of interest.
    /// Quantifiers are enumerated over the finite universes.
    pub fn eval(&self, f: &Formula, epoch_map: &[usize]) -> FolResult<bool> {
        self.eval_env(f, epoch_map, &mut Vec::new())
    }

    fn eval_env(
        &self,
        f: &Formula,
        epoch_map: &[usize],
        env: &mut Vec<(String, usize)>,
    ) -> FolResult<bool> {
        match f {
            Formula::Lit(b) => Ok(*b),
            Formula::Eq(l, r) => {
                Ok(self.eval_term(l, epoch_map, env)? == self.eval_term(r, epoch_map, env)?)
            }
            Formula::Rel {
                symbol,
                epoch,
                args,
            } => {
                let mut tuple = Vec::with_capacity(args.len());
                for a in args {
                    tuple.push(self.eval_term(a, epoch_map, env)?);
                }
                self.relation_value(symbol, epoch_map, *epoch, &tuple)
            }
            Formula::Not(g) => Ok(!self.eval_env(g, epoch_map, env)?),
            Formula::And(fs) => {
                for g in fs {
                    if !self.eval_env(g, epoch_map, env)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Formula::Or(fs) => {
                for g in fs {
                    if self.eval_env(g, epoch_map, env)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Formula::Implies(l, r) => {
                Ok(!self.eval_env(l, epoch_map, env)? || self.eval_env(r, epoch_map, env)?)
            }
            Formula::Iff(l, r) => {
                Ok(self.eval_env(l, epoch_map, env)? == self.eval_env(r, epoch_map, env)?)
            }
            Formula::Quantified {
                quant,
                binders,
                body,
            } => {
                let mut sizes = Vec::with_capacity(binders.len());
                for b in binders {
                    sizes.push(self.universe(&b.sort)?.len());
                }
                if sizes.contains(&0) {
                    return Ok(matches!(quant, Quant::Forall));
                }
                let mut assignment = vec![0usize; binders.len()];
                loop {
                    let depth = env.len();
                    for (b, e) in binders.iter().zip(&assignment) {
                        env.push((b.name.clone(), *e));
                    }
                    let holds = self.eval_env(body, epoch_map, env)?;
                    env.truncate(depth);
                    match quant {
                        Quant::Forall if !holds => return Ok(false),
                        Quant::Exists if holds => return Ok(true),
                        _ => {}
                    }
                    if !advance(&mut assignment, &sizes) {
                        break;
                    }
                }
                Ok(matches!(quant, Quant::Forall))
            }
        }
    }
}

/// Advance a mixed-radix counter; false once it wraps around.
fn advance(assignment: &mut [usize], sizes: &[usize]) -> bool {
    for i in (0..assignment.len()).rev() {
        if sizes[i] == 0 {
            return false;
        }
        assignment[i] += 1;
        if assignment[i] < sizes[i] {
            return true;
        }
        assignment[i] = 0;
    }
    false
}

/// All tuples over the given dimension sizes, in lexicographic order.
pub fn all_tuples(sizes: &[usize]) -> Vec<Vec<usize>> {
    if sizes.iter().any(|&s| s == 0) {
        return if sizes.is_empty() {
            vec![Vec::new()]
        } else {
            Vec::new()
        };
    }
    let mut out = Vec::new();
    let mut current = vec![0usize; sizes.len()];
    loop {
        out.push(current.clone());
        if !advance(&mut current, sizes) {
            break;
        }
    }
    out
}
