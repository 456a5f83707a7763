//! Diagrams: the existential closure of everything a finite structure says.
//!
//! A diagram introduces one variable per universe element and pins down the
//! truth value of every ground atom over them, plus pairwise distinctness.
//! The originating structure satisfies its own diagram by construction, and
//! the negated, universally closed form is the blocking clause the search
//! learns.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use vigil_fol::{Formula, Program, SortedVar, Structure, Term};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagram {
    pub binders: Vec<SortedVar>,
    pub literals: Vec<Formula>,
}

fn element_var(sort: &str, element: usize) -> Term {
    Term::var(format!("{sort}_{element}"))
}

impl Diagram {
    /// The diagram of one epoch of a structure, as single-state literals
    /// over epoch 0.
    pub fn of_structure(program: &Program, structure: &Structure, epoch: usize) -> Diagram {
        let vocab = &program.vocab;
        let mut binders = Vec::new();
        let mut literals = Vec::new();

        for (sort, names) in &structure.universes {
            for i in 0..names.len() {
                binders.push(SortedVar::new(format!("{sort}_{i}"), sort.clone()));
            }
            for i in 0..names.len() {
                for j in i + 1..names.len() {
                    literals.push(Formula::ne(element_var(sort, i), element_var(sort, j)));
                }
            }
        }

        let interp_of = |mutable: bool| {
            if mutable {
                &structure.epochs[epoch]
            } else {
                &structure.immutable
            }
        };

        for r in &vocab.relations {
            let table = interp_of(r.mutable)
                .relations
                .get(&r.name)
                .unwrap_or_else(|| panic!("structure lacks relation '{}'", r.name));
            for (tuple, value) in table {
                let args: Vec<Term> = tuple
                    .iter()
                    .zip(&r.arity)
                    .map(|(&e, sort)| element_var(sort, e))
                    .collect();
                let atom = Formula::rel(&r.name, args);
                literals.push(if *value { atom } else { atom.negate() });
            }
        }

        for c in &vocab.constants {
            let e = *interp_of(c.mutable)
                .constants
                .get(&c.name)
                .unwrap_or_else(|| panic!("structure lacks constant '{}'", c.name));
            literals.push(Formula::eq(Term::cnst(&c.name), element_var(&c.sort, e)));
        }

        for f in &vocab.functions {
            let table = interp_of(f.mutable)
                .functions
                .get(&f.name)
                .unwrap_or_else(|| panic!("structure lacks function '{}'", f.name));
            for (tuple, result) in table {
                let args: Vec<Term> = tuple
                    .iter()
                    .zip(&f.domain)
                    .map(|(&e, sort)| element_var(sort, e))
                    .collect();
                literals.push(Formula::eq(
                    Term::app(&f.name, args),
                    element_var(&f.range, *result),
                ));
            }
        }

        Diagram { binders, literals }
    }

    /// `exists binders. /\ literals`.
    pub fn to_formula(&self) -> Formula {
        Formula::exists(self.binders.clone(), Formula::and(self.literals.clone()))
    }

    /// The learned clause form: `forall binders. \/ !literals`.
    pub fn blocking_clause(&self) -> Formula {
        let negated = self.literals.iter().map(|l| l.clone().negate()).collect();
        Formula::forall(self.binders.clone(), Formula::or(negated))
    }

    /// Substitute away every variable pinned to a constant by an equality
    /// literal, dropping the literal and the binder. Shrinks the quantifier
    /// prefix without changing the set of states the diagram describes.
    pub fn simplify_equal_constants(&mut self) {
        loop {
            let Some(pos) = self.literals.iter().position(|l| pinned_var(l).is_some()) else {
                break;
            };
            let lit = self.literals.remove(pos);
            let (var, term) = pinned_var(&lit).unwrap_or_else(|| unreachable!());
            let mut map = HashMap::new();
            map.insert(var.clone(), term);
            self.literals = self.literals.iter().map(|l| l.substitute(&map)).collect();
            self.binders.retain(|b| b.name != var);
        }
    }

    /// The sub-diagram of the literals selected by `keep`, with binders no
    /// remaining literal mentions pruned away.
    pub fn restricted_to(&self, keep: &[bool]) -> Diagram {
        let literals: Vec<Formula> = self
            .literals
            .iter()
            .zip(keep)
            .filter(|(_, &k)| k)
            .map(|(l, _)| l.clone())
            .collect();
        let mut used = HashSet::new();
        for l in &literals {
            used.extend(l.free_vars());
        }
        Diagram {
            binders: self
                .binders
                .iter()
                .filter(|b| used.contains(&b.name))
                .cloned()
                .collect(),
            literals,
        }
    }

    pub fn without_literal(&self, idx: usize) -> Diagram {
        let mut keep = vec![true; self.literals.len()];
        keep[idx] = false;
        self.restricted_to(&keep)
    }
}

/// Matches `c = v` or `v = c` where `c` is a constant occurrence and `v` a
/// variable; returns the variable name and the constant term.
fn pinned_var(lit: &Formula) -> Option<(String, Term)> {
    let Formula::Eq(l, r) = lit else {
        return None;
    };
    let is_const = |t: &Term| matches!(t, Term::App { args, .. } if args.is_empty());
    match (l, r) {
        (Term::Var(v), c) if is_const(c) => Some((v.clone(), c.clone())),
        (c, Term::Var(v)) if is_const(c) => Some((v.clone(), c.clone())),
        _ => None,
    }
}

impl fmt::Display for Diagram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_formula())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use vigil_fol::{DerivedDef, Interp, ProgramBuilder};

    fn program() -> Program {
        ProgramBuilder::new()
            .sort("node")
            .relation("holds", &["node"], true)
            .constant("boss", "node", false)
            .build()
            .unwrap()
    }

    /// Two nodes; `holds` true exactly for node 0, `boss` is node 1.
    fn structure() -> Structure {
        let mut s = Structure::default();
        s.universes
            .insert("node".into(), vec!["node!0".into(), "node!1".into()]);
        let mut epoch = Interp::default();
        let mut holds = BTreeMap::new();
        holds.insert(vec![0], true);
        holds.insert(vec![1], false);
        epoch.relations.insert("holds".into(), holds);
        s.epochs.push(epoch);
        s.immutable.constants.insert("boss".into(), 1);
        s
    }

    #[test]
    fn origin_satisfies_its_diagram() {
        let p = program();
        let s = structure();
        let d = Diagram::of_structure(&p, &s, 0);
        assert!(s.eval(&d.to_formula(), &[0]).unwrap());
        assert!(!s.eval(&d.blocking_clause(), &[0]).unwrap());
    }

    #[test]
    fn diagram_pins_every_atom() {
        let d = Diagram::of_structure(&program(), &structure(), 0);
        assert_eq!(d.binders.len(), 2);
        // 1 distinctness + 2 holds literals + 1 constant literal
        assert_eq!(d.literals.len(), 4);
    }

    #[test]
    fn simplification_drops_pinned_binders() {
        let p = program();
        let s = structure();
        let mut d = Diagram::of_structure(&p, &s, 0);
        d.simplify_equal_constants();
        assert_eq!(d.binders.len(), 1);
        assert!(d.binders.iter().all(|b| b.name != "node_1"));
        // Still satisfied by the origin after substitution.
        assert!(s.eval(&d.to_formula(), &[0]).unwrap());
    }

    #[test]
    fn derived_relations_are_pinned() {
        let p = ProgramBuilder::new()
            .sort("node")
            .relation("holds", &["node"], true)
            .derived_relation(
                "idle",
                &["node"],
                DerivedDef {
                    binders: vec![SortedVar::new("n", "node")],
                    body: Formula::rel("holds", vec![Term::var("n")]).negate(),
                },
            )
            .build()
            .unwrap();
        let mut s = Structure::default();
        s.universes.insert("node".into(), vec!["node!0".into()]);
        let mut epoch = Interp::default();
        let mut holds = BTreeMap::new();
        holds.insert(vec![0], true);
        epoch.relations.insert("holds".into(), holds);
        let mut idle = BTreeMap::new();
        idle.insert(vec![0], false);
        epoch.relations.insert("idle".into(), idle);
        s.epochs.push(epoch);

        let d = Diagram::of_structure(&p, &s, 0);
        let pinned = Formula::rel("idle", vec![Term::var("node_0")]).negate();
        assert!(d.literals.contains(&pinned));
        assert!(s.eval(&d.to_formula(), &[0]).unwrap());
    }

    #[test]
    fn restriction_prunes_unused_binders() {
        let d = Diagram::of_structure(&program(), &structure(), 0);
        let keep: Vec<bool> = d
            .literals
            .iter()
            .map(|l| matches!(l, Formula::Rel { .. }))
            .collect();
        let r = d.restricted_to(&keep);
        assert_eq!(r.literals.len(), 1);
        assert_eq!(r.binders.len(), 1);
    }
}
