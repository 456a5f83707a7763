//! Translation of programs into z3 terms.
//!
//! A single solver query may talk about several states at once. Each state is
//! named by an epoch key: mutable symbols are declared once per key as
//! `{key}_{name}`, immutable symbols once under their bare name. A formula is
//! translated against a slice of keys indexed by the epoch of each symbol
//! occurrence, so the same `Formula` value serves as an initial condition, a
//! frame predicate at any key, or half of a transition relation.
//!
//! Resolution failures here (unknown symbols, missing epoch keys) are
//! programming errors: every formula reaching the translator comes out of a
//! validated [`Program`]. They panic instead of surfacing as `Result`s.

use std::collections::HashMap;
use std::sync::Arc;

use z3::ast::{exists_const, forall_const, Ast, Bool, Dynamic};
use z3::{FuncDecl, Sort, Symbol};

use vigil_fol::{Formula, Program, Quant, SortedVar, Term, TransitionDef};

/// Epoch key for single-state queries.
pub const KEY_ONE: &str = "one";
/// Epoch key for the pre-state of a transition query.
pub const KEY_OLD: &str = "old";
/// Epoch key for the post-state of a transition query.
pub const KEY_NEW: &str = "new";

/// Cache key for immutable symbols, which are shared across epoch keys.
const KEY_IMMUTABLE: &str = "";

pub struct Translator {
    program: Arc<Program>,
    sorts: HashMap<String, Sort>,
    decls: HashMap<(String, String), FuncDecl>,
    fresh: u64,
}

impl Translator {
    pub fn new(program: Arc<Program>) -> Translator {
        let sorts = program
            .vocab
            .sorts
            .iter()
            .map(|s| {
                (
                    s.name.clone(),
                    Sort::uninterpreted(Symbol::String(s.name.clone())),
                )
            })
            .collect();
        Translator {
            program,
            sorts,
            decls: HashMap::new(),
            fresh: 0,
        }
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    pub fn sort(&self, name: &str) -> &Sort {
        self.sorts
            .get(name)
            .unwrap_or_else(|| panic!("translator: unknown sort '{name}'"))
    }

    /// The declaration of `symbol` at epoch key `key`. Mutable symbols get a
    /// distinct declaration per key; immutable ones ignore the key.
    pub fn decl(&mut self, key: &str, symbol: &str) -> FuncDecl {
        let vocab = &self.program.vocab;
        let key = if vocab.is_mutable(symbol) {
            key
        } else {
            KEY_IMMUTABLE
        };
        if let Some(d) = self.decls.get(&(key.to_string(), symbol.to_string())) {
            return d.clone();
        }
        let native = if key == KEY_IMMUTABLE {
            symbol.to_string()
        } else {
            format!("{key}_{symbol}")
        };
        let (domain, range) = if let Some(r) = vocab.relation(symbol) {
            (r.arity.clone(), None)
        } else if let Some(c) = vocab.constant(symbol) {
            (Vec::new(), Some(c.sort.clone()))
        } else if let Some(f) = vocab.function(symbol) {
            (f.domain.clone(), Some(f.range.clone()))
        } else {
            panic!("translator: unknown symbol '{symbol}'")
        };
        let domain: Vec<&Sort> = domain.iter().map(|s| self.sort(s)).collect();
        let bool_sort = Sort::bool();
        let range = match &range {
            Some(s) => self.sort(s),
            None => &bool_sort,
        };
        let decl = FuncDecl::new(Symbol::String(native), &domain, range);
        self.decls
            .insert((key.to_string(), symbol.to_string()), decl.clone());
        decl
    }

    fn decl_at(&mut self, keys: &[&str], epoch: usize, symbol: &str) -> FuncDecl {
        let key = if self.program.vocab.is_mutable(symbol) {
            *keys.get(epoch).unwrap_or_else(|| {
                panic!("translator: mutable symbol '{symbol}' at epoch {epoch} but only {} keys supplied", keys.len())
            })
        } else {
            KEY_IMMUTABLE
        };
        self.decl(key, symbol)
    }

    /// A fresh uninterpreted constant of the named sort.
    pub fn fresh_const(&mut self, prefix: &str, sort: &str) -> Dynamic {
        self.fresh += 1;
        let name = format!("{prefix}!{}", self.fresh);
        FuncDecl::new(Symbol::String(name), &[], self.sort(sort)).apply(&[])
    }

    /// A fresh boolean constant, used to tag assertions for unsat cores.
    pub fn fresh_indicator(&mut self, prefix: &str) -> Bool {
        self.fresh += 1;
        Bool::new_const(format!("{prefix}!{}", self.fresh))
    }

    /// Translate a closed formula against the given epoch keys.
    pub fn translate(&mut self, f: &Formula, keys: &[&str]) -> Bool {
        let mut env = Vec::new();
        self.formula(f, keys, &mut env)
    }

    /// Translate a formula whose free variables are bound by `bindings`.
    pub fn translate_open(
        &mut self,
        f: &Formula,
        keys: &[&str],
        bindings: &[(String, Dynamic)],
    ) -> Bool {
        let mut env = bindings.to_vec();
        self.formula(f, keys, &mut env)
    }

    fn term(&mut self, t: &Term, keys: &[&str], env: &mut Vec<(String, Dynamic)>) -> Dynamic {
        match t {
            Term::Var(v) => env
                .iter()
                .rev()
                .find(|(name, _)| name == v)
                .map(|(_, d)| d.clone())
                .unwrap_or_else(|| panic!("translator: unbound variable '{v}'")),
            Term::App {
                symbol,
                epoch,
                args,
            } => {
                let decl = self.decl_at(keys, *epoch, symbol);
                let args: Vec<Dynamic> =
                    args.iter().map(|a| self.term(a, keys, env)).collect();
                let arg_refs: Vec<&dyn Ast> = args.iter().map(|a| a as &dyn Ast).collect();
                decl.apply(&arg_refs)
            }
        }
    }

    fn atom(
        &mut self,
        symbol: &str,
        epoch: usize,
        args: &[Term],
        keys: &[&str],
        env: &mut Vec<(String, Dynamic)>,
    ) -> Bool {
        let decl = self.decl_at(keys, epoch, symbol);
        let args: Vec<Dynamic> = args.iter().map(|a| self.term(a, keys, env)).collect();
        let arg_refs: Vec<&dyn Ast> = args.iter().map(|a| a as &dyn Ast).collect();
        decl.apply(&arg_refs)
            .as_bool()
            .unwrap_or_else(|| panic!("translator: '{symbol}' is not a relation"))
    }

    fn formula(&mut self, f: &Formula, keys: &[&str], env: &mut Vec<(String, Dynamic)>) -> Bool {
        match f {
            Formula::Lit(b) => Bool::from_bool(*b),
            Formula::Eq(l, r) => {
                let l = self.term(l, keys, env);
                let r = self.term(r, keys, env);
                l.eq(&r)
            }
            Formula::Rel {
                symbol,
                epoch,
                args,
            } => self.atom(symbol, *epoch, args, keys, env),
            Formula::Not(g) => self.formula(g, keys, env).not(),
            Formula::And(fs) => {
                let parts: Vec<Bool> = fs.iter().map(|g| self.formula(g, keys, env)).collect();
                Bool::and(&parts)
            }
            Formula::Or(fs) => {
                let parts: Vec<Bool> = fs.iter().map(|g| self.formula(g, keys, env)).collect();
                Bool::or(&parts)
            }
            Formula::Implies(l, r) => {
                let l = self.formula(l, keys, env);
                let r = self.formula(r, keys, env);
                l.implies(&r)
            }
            Formula::Iff(l, r) => {
                let l = self.formula(l, keys, env);
                let r = self.formula(r, keys, env);
                l.iff(&r)
            }
            Formula::Quantified {
                quant,
                binders,
                body,
            } => {
                let (consts, depth) = self.bind(binders, env);
                let body = self.formula(body, keys, env);
                env.truncate(depth);
                let bound: Vec<&dyn Ast> = consts.iter().map(|c| c as &dyn Ast).collect();
                match quant {
                    Quant::Forall => forall_const(&bound, &[], &body),
                    Quant::Exists => exists_const(&bound, &[], &body),
                }
            }
        }
    }

    /// Push fresh constants for `binders` onto the environment; returns the
    /// constants and the previous environment depth for truncation.
    fn bind(
        &mut self,
        binders: &[SortedVar],
        env: &mut Vec<(String, Dynamic)>,
    ) -> (Vec<Dynamic>, usize) {
        let depth = env.len();
        let consts: Vec<Dynamic> = binders
            .iter()
            .map(|b| {
                let c = self.fresh_const(&b.name, &b.sort);
                env.push((b.name.clone(), c.clone()));
                c
            })
            .collect();
        (consts, depth)
    }

    /// The two-state relation of one transition between the given keys: its
    /// parameters existentially quantified over the body, conjoined with the
    /// frame condition equating every mutable symbol outside the
    /// modifies-set across the two keys.
    pub fn transition(&mut self, t: &TransitionDef, old: &str, new: &str) -> Bool {
        let keys = [old, new];
        let mut env = Vec::new();
        let (consts, _) = self.bind(&t.binders, &mut env);
        let body = self.formula(&t.body, &keys, &mut env);
        let full = Bool::and(&[body, self.frame_condition(&t.mods, old, new)]);
        if consts.is_empty() {
            full
        } else {
            let bound: Vec<&dyn Ast> = consts.iter().map(|c| c as &dyn Ast).collect();
            exists_const(&bound, &[], &full)
        }
    }

    /// Equality of every mutable symbol not named in `mods` across two keys.
    pub fn frame_condition(&mut self, mods: &[String], old: &str, new: &str) -> Bool {
        let vocab = self.program.vocab.clone();
        let mut parts = Vec::new();
        for symbol in vocab.mutable_symbols() {
            if mods.iter().any(|m| m == symbol) {
                continue;
            }
            let old_decl = self.decl(old, symbol);
            let new_decl = self.decl(new, symbol);
            if let Some(r) = vocab.relation(symbol) {
                parts.push(self.pointwise(&old_decl, &new_decl, &r.arity, true));
            } else if vocab.constant(symbol).is_some() {
                parts.push(old_decl.apply(&[]).eq(&new_decl.apply(&[])));
            } else if let Some(f) = vocab.function(symbol) {
                parts.push(self.pointwise(&old_decl, &new_decl, &f.domain, false));
            }
        }
        Bool::and(&parts)
    }

    /// `forall xs. old(xs) <-> new(xs)` (relations) or `= ` (functions).
    fn pointwise(
        &mut self,
        old_decl: &FuncDecl,
        new_decl: &FuncDecl,
        domain: &[String],
        relational: bool,
    ) -> Bool {
        let xs: Vec<Dynamic> = domain
            .iter()
            .map(|s| self.fresh_const("fr", s))
            .collect();
        let arg_refs: Vec<&dyn Ast> = xs.iter().map(|x| x as &dyn Ast).collect();
        let lhs = old_decl.apply(&arg_refs);
        let rhs = new_decl.apply(&arg_refs);
        let body = if relational {
            lhs.as_bool()
                .zip(rhs.as_bool())
                .map(|(l, r)| l.iff(&r))
                .unwrap_or_else(|| panic!("translator: relation expected in frame condition"))
        } else {
            lhs.eq(&rhs)
        };
        if xs.is_empty() {
            body
        } else {
            let bound: Vec<&dyn Ast> = xs.iter().map(|x| x as &dyn Ast).collect();
            forall_const(&bound, &[], &body)
        }
    }

    /// Axioms that involve no mutable symbol, plus the definitions of
    /// immutable derived relations. Asserted once per solver.
    pub fn immutable_axioms(&mut self) -> Vec<Bool> {
        let program = self.program.clone();
        let mut out = Vec::new();
        for axiom in &program.axioms {
            if !axiom.mentions_mutable(&program.vocab) {
                out.push(self.translate(axiom, &[]));
            }
        }
        for rel in &program.vocab.relations {
            if let Some(def) = &rel.derived {
                if !rel.mutable && !def.body.mentions_mutable(&program.vocab) {
                    out.push(self.derived_def(KEY_IMMUTABLE, &rel.name, def));
                }
            }
        }
        out
    }

    /// Axioms that involve mutable symbols, plus the definitions of mutable
    /// derived relations, instantiated at one epoch key. Asserted once per
    /// key in every solver that talks about that key.
    pub fn key_axioms(&mut self, key: &str) -> Vec<Bool> {
        let program = self.program.clone();
        let mut out = Vec::new();
        for axiom in &program.axioms {
            if axiom.mentions_mutable(&program.vocab) {
                out.push(self.translate(axiom, &[key]));
            }
        }
        for rel in &program.vocab.relations {
            if let Some(def) = &rel.derived {
                if rel.mutable || def.body.mentions_mutable(&program.vocab) {
                    out.push(self.derived_def(key, &rel.name, def));
                }
            }
        }
        out
    }

    fn derived_def(&mut self, key: &str, symbol: &str, def: &vigil_fol::DerivedDef) -> Bool {
        let mut env = Vec::new();
        let (consts, _) = self.bind(&def.binders, &mut env);
        let decl = self.decl(key, symbol);
        let arg_refs: Vec<&dyn Ast> = consts.iter().map(|c| c as &dyn Ast).collect();
        let lhs = decl
            .apply(&arg_refs)
            .as_bool()
            .unwrap_or_else(|| panic!("translator: derived symbol '{symbol}' is not a relation"));
        let rhs = self.formula(&def.body, &[key], &mut env);
        let body = lhs.iff(&rhs);
        if consts.is_empty() {
            body
        } else {
            let bound: Vec<&dyn Ast> = consts.iter().map(|c| c as &dyn Ast).collect();
            forall_const(&bound, &[], &body)
        }
    }
}
