//! The validated program model: vocabulary, axioms, initial conditions,
//! safety formulas, and transition definitions.

use serde::{Deserialize, Serialize};

use crate::syntax::{Formula, SortedVar, Term};
use crate::vocab::{
    ConstantDecl, DerivedDef, FunctionDecl, RelationDecl, SortDecl, SymbolKind, Vocabulary,
};
use crate::{FolError, FolResult};

/// A guarded transition. The body is a two-state formula relating epoch 0
/// (old state) and epoch 1 (new state) interpretations of the symbols in
/// `mods`. Mutable symbols absent from `mods` are forced equal between the
/// two epochs by the translator's frame condition, not by explicit clauses
/// in the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionDef {
    pub name: String,
    /// Existentially quantified parameters of the transition.
    pub binders: Vec<SortedVar>,
    /// Mutable symbols this transition may modify.
    pub mods: Vec<String>,
    pub body: Formula,
}

/// A validated first-order transition system. Built once, never mutated
/// during search; components take it by shared reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub vocab: Vocabulary,
    /// Constraints on the vocabulary, assumed in every state.
    pub axioms: Vec<Formula>,
    pub inits: Vec<Formula>,
    /// The safety properties the search must prove or refute.
    pub safeties: Vec<Formula>,
    pub transitions: Vec<TransitionDef>,
}

impl Program {
    pub fn transition(&self, name: &str) -> Option<&TransitionDef> {
        self.transitions.iter().find(|t| t.name == name)
    }

    /// Check that every formula is well-sorted against the vocabulary and
    /// that epochs and modifies-sets are in range. After this succeeds,
    /// translation failures downstream are programming errors.
    pub fn validate(&self) -> FolResult<()> {
        let mut seen: Vec<&str> = Vec::new();
        for name in self
            .vocab
            .relations
            .iter()
            .map(|r| r.name.as_str())
            .chain(self.vocab.constants.iter().map(|c| c.name.as_str()))
            .chain(self.vocab.functions.iter().map(|f| f.name.as_str()))
        {
            if seen.contains(&name) {
                return Err(FolError::Duplicate(name.to_string()));
            }
            seen.push(name);
        }
        for (i, s) in self.vocab.sorts.iter().enumerate() {
            if self.vocab.sorts[..i].iter().any(|t| t.name == s.name) {
                return Err(FolError::Duplicate(s.name.clone()));
            }
        }

        for r in &self.vocab.relations {
            for s in &r.arity {
                self.check_sort(s)?;
            }
            if let Some(def) = &r.derived {
                self.check_derived(r, def)?;
            }
        }
        for c in &self.vocab.constants {
            self.check_sort(&c.sort)?;
        }
        for f in &self.vocab.functions {
            for s in &f.domain {
                self.check_sort(s)?;
            }
            self.check_sort(&f.range)?;
        }

        let checker = SortChecker { vocab: &self.vocab };
        for f in self.axioms.iter().chain(&self.inits).chain(&self.safeties) {
            checker.check_formula(f, &mut Vec::new(), 0)?;
        }
        for t in &self.transitions {
            for b in &t.binders {
                self.check_sort(&b.sort)?;
            }
            for m in &t.mods {
                if !self.vocab.is_mutable(m) {
                    return Err(FolError::BadModifies {
                        name: t.name.clone(),
                        symbol: m.clone(),
                    });
                }
            }
            let mut env: Vec<SortedVar> = t.binders.clone();
            checker.check_formula(&t.body, &mut env, 1)?;
        }
        Ok(())
    }

    fn check_sort(&self, name: &str) -> FolResult<()> {
        if self.vocab.sort(name).is_none() {
            return Err(FolError::UnknownSort(name.to_string()));
        }
        Ok(())
    }

    fn check_derived(&self, rel: &RelationDecl, def: &DerivedDef) -> FolResult<()> {
        if def.binders.len() != rel.arity.len() {
            return Err(FolError::Arity {
                name: rel.name.clone(),
                expected: rel.arity.len(),
                got: def.binders.len(),
            });
        }
        let checker = SortChecker { vocab: &self.vocab };
        let mut env = def.binders.clone();
        checker.check_formula(&def.body, &mut env, 0)
    }
}

struct SortChecker<'a> {
    vocab: &'a Vocabulary,
}

impl SortChecker<'_> {
    fn term_sort(&self, t: &Term, env: &[SortedVar], max_epoch: usize) -> FolResult<String> {
        match t {
            Term::Var(v) => env
                .iter()
                .rev()
                .find(|b| b.name == *v)
                .map(|b| b.sort.clone())
                .ok_or_else(|| FolError::UnboundVar(v.clone())),
            Term::App {
                symbol,
                epoch,
                args,
            } => {
                if *epoch > max_epoch {
                    return Err(FolError::EpochOutOfRange {
                        epoch: *epoch,
                        max: max_epoch,
                    });
                }
                match self.vocab.symbol_kind(symbol) {
                    Some(SymbolKind::Constant) => {
                        if !args.is_empty() {
                            return Err(FolError::Arity {
                                name: symbol.clone(),
                                expected: 0,
                                got: args.len(),
                            });
                        }
                        Ok(self.vocab.constant(symbol).unwrap().sort.clone())
                    }
                    Some(SymbolKind::Function) => {
                        let decl = self.vocab.function(symbol).unwrap();
                        if args.len() != decl.domain.len() {
                            return Err(FolError::Arity {
                                name: symbol.clone(),
                                expected: decl.domain.len(),
                                got: args.len(),
                            });
                        }
                        for (a, expected) in args.iter().zip(&decl.domain) {
                            let got = self.term_sort(a, env, max_epoch)?;
                            if got != *expected {
                                return Err(FolError::SortMismatch {
                                    context: symbol.clone(),
                                    expected: expected.clone(),
                                    got,
                                });
                            }
                        }
                        Ok(decl.range.clone())
                    }
                    Some(SymbolKind::Relation) => Err(FolError::NotATerm(symbol.clone())),
                    None => Err(FolError::UnknownSymbol(symbol.clone())),
                }
            }
        }
    }

    fn check_formula(
        &self,
        f: &Formula,
        env: &mut Vec<SortedVar>,
        max_epoch: usize,
    ) -> FolResult<()> {
        match f {
            Formula::Lit(_) => Ok(()),
            Formula::Eq(l, r) => {
                let ls = self.term_sort(l, env, max_epoch)?;
                let rs = self.term_sort(r, env, max_epoch)?;
                if ls != rs {
                    return Err(FolError::SortMismatch {
                        context: format!("{l} = {r}"),
                        expected: ls,
                        got: rs,
                    });
                }
                Ok(())
            }
            Formula::Rel {
                symbol,
                epoch,
                args,
            } => {
                if *epoch > max_epoch {
                    return Err(FolError::EpochOutOfRange {
                        epoch: *epoch,
                        max: max_epoch,
                    });
                }
                let decl = match self.vocab.symbol_kind(symbol) {
                    Some(SymbolKind::Relation) => self.vocab.relation(symbol).unwrap(),
                    Some(_) => return Err(FolError::NotARelation(symbol.clone())),
                    None => return Err(FolError::UnknownSymbol(symbol.clone())),
                };
                if args.len() != decl.arity.len() {
                    return Err(FolError::Arity {
                        name: symbol.clone(),
                        expected: decl.arity.len(),
                        got: args.len(),
                    });
                }
                for (a, expected) in args.iter().zip(&decl.arity) {
                    let got = self.term_sort(a, env, max_epoch)?;
                    if got != *expected {
                        return Err(FolError::SortMismatch {
                            context: symbol.clone(),
                            expected: expected.clone(),
                            got,
                        });
                    }
                }
                Ok(())
            }
            Formula::Not(g) => self.check_formula(g, env, max_epoch),
            Formula::And(fs) | Formula::Or(fs) => {
                for g in fs {
                    self.check_formula(g, env, max_epoch)?;
                }
                Ok(())
            }
            Formula::Implies(l, r) | Formula::Iff(l, r) => {
                self.check_formula(l, env, max_epoch)?;
                self.check_formula(r, env, max_epoch)
            }
            Formula::Quantified { binders, body, .. } => {
                for b in binders {
                    if self.vocab.sort(&b.sort).is_none() {
                        return Err(FolError::UnknownSort(b.sort.clone()));
                    }
                }
                let depth = env.len();
                env.extend(binders.iter().cloned());
                let res = self.check_formula(body, env, max_epoch);
                env.truncate(depth);
                res
            }
        }
    }
}

/// Convenience builder for constructing validated programs in code. The
/// parser and resolver of the specification language are external to this
/// workspace; tests and embedders use this instead.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    vocab: Vocabulary,
    axioms: Vec<Formula>,
    inits: Vec<Formula>,
    safeties: Vec<Formula>,
    transitions: Vec<TransitionDef>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort(mut self, name: impl Into<String>) -> Self {
        self.vocab.sorts.push(SortDecl { name: name.into() });
        self
    }

    pub fn relation(mut self, name: impl Into<String>, arity: &[&str], mutable: bool) -> Self {
        self.vocab.relations.push(RelationDecl {
            name: name.into(),
            arity: arity.iter().map(|s| s.to_string()).collect(),
            mutable,
            derived: None,
        });
        self
    }

    pub fn derived_relation(
        mut self,
        name: impl Into<String>,
        arity: &[&str],
        def: DerivedDef,
    ) -> Self {
        self.vocab.relations.push(RelationDecl {
            name: name.into(),
            arity: arity.iter().map(|s| s.to_string()).collect(),
            mutable: true,
            derived: Some(def),
        });
        self
    }

    pub fn constant(mut self, name: impl Into<String>, sort: impl Into<String>, mutable: bool) -> Self {
        self.vocab.constants.push(ConstantDecl {
            name: name.into(),
            sort: sort.into(),
            mutable,
        });
        self
    }

    pub fn function(
        mut self,
        name: impl Into<String>,
        domain: &[&str],
        range: impl Into<String>,
        mutable: bool,
    ) -> Self {
        self.vocab.functions.push(FunctionDecl {
            name: name.into(),
            domain: domain.iter().map(|s| s.to_string()).collect(),
            range: range.into(),
            mutable,
        });
        self
    }

    pub fn axiom(mut self, f: Formula) -> Self {
        self.axioms.push(f);
        self
    }

    pub fn init(mut self, f: Formula) -> Self {
        self.inits.push(f);
        self
    }

    pub fn safety(mut self, f: Formula) -> Self {
        self.safeties.push(f);
        self
    }

    pub fn transition(
        mut self,
        name: impl Into<String>,
        binders: Vec<SortedVar>,
        mods: &[&str],
        body: Formula,
    ) -> Self {
        self.transitions.push(TransitionDef {
            name: name.into(),
            binders,
            mods: mods.iter().map(|s| s.to_string()).collect(),
            body,
        });
        self
    }

    pub fn build(self) -> FolResult<Program> {
        let program = Program {
            vocab: self.vocab,
            axioms: self.axioms,
            inits: self.inits,
            safeties: self.safeties,
            transitions: self.transitions,
        };
        program.validate()?;
        Ok(program)
    }
}
