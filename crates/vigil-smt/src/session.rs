//! A solver session: one z3 solver plus the translator feeding it.
//!
//! The session owns query accounting (count and cumulative solver time),
//! retry handling for `unknown` results, scoped push/pop, and
//! assumption-tracked checks that map unsat cores back to caller indices.

use std::time::{Duration, Instant};

use tracing::{debug, warn};
use z3::ast::{Ast, Bool, Dynamic};
use z3::{Params, SatResult, Solver};

use std::sync::Arc;

use vigil_fol::{Formula, Program, Structure, TransitionDef};

use crate::extract;
use crate::translate::Translator;
use crate::{SessionConfig, SmtError, SmtResult};

/// Result of a plain satisfiability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Sat,
    Unsat,
}

/// Result of a check under assumptions. The core holds indices into the
/// assumption slice passed to [`Session::check_assuming`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssumptionOutcome {
    Sat,
    Unsat { core: Vec<usize> },
}

enum RawOutcome {
    Sat,
    Unsat,
    Unknown,
}

pub struct Session {
    solver: Solver,
    translator: Translator,
    cfg: SessionConfig,
    nqueries: u64,
    solver_time: Duration,
}

impl Session {
    /// Open a session over `program` that will talk about the given epoch
    /// keys. Immutable axioms are asserted once; per-key axioms and derived
    /// definitions are asserted for each key, all at the base solver level.
    pub fn new(program: Arc<Program>, cfg: SessionConfig, keys: &[&str]) -> Session {
        let solver = Solver::new();
        if let Some(ms) = cfg.timeout_ms {
            let mut params = Params::new();
            params.set_u32("timeout", ms);
            solver.set_params(&params);
        }
        let mut translator = Translator::new(program);
        for axiom in translator.immutable_axioms() {
            solver.assert(&axiom);
        }
        for key in keys {
            for axiom in translator.key_axioms(key) {
                solver.assert(&axiom);
            }
        }
        Session {
            solver,
            translator,
            cfg,
            nqueries: 0,
            solver_time: Duration::ZERO,
        }
    }

    pub fn program(&self) -> &Arc<Program> {
        self.translator.program()
    }

    /// Number of satisfiability checks issued so far, retries included.
    pub fn nqueries(&self) -> u64 {
        self.nqueries
    }

    /// Cumulative wall-clock time spent inside the solver.
    pub fn solver_time(&self) -> Duration {
        self.solver_time
    }

    /// Run `body` inside a fresh solver scope; assertions made within are
    /// discarded afterwards.
    pub fn scoped<R>(&mut self, body: impl FnOnce(&mut Session) -> R) -> R {
        self.solver.push();
        let result = body(self);
        self.solver.pop(1);
        result
    }

    pub fn assert(&mut self, f: &Formula, keys: &[&str]) {
        self.assert_with(f, keys, &[]);
    }

    /// Assert a formula whose free variables are bound by `bindings`.
    pub fn assert_with(&mut self, f: &Formula, keys: &[&str], bindings: &[(String, Dynamic)]) {
        let b = self.translator.translate_open(f, keys, bindings);
        self.solver.assert(&b);
    }

    /// Assert `guard -> f`, so that `f` only bites when the indicator is
    /// assumed. Used for unsat-core tracking.
    pub fn assert_implied_by(
        &mut self,
        guard: &Bool,
        f: &Formula,
        keys: &[&str],
        bindings: &[(String, Dynamic)],
    ) {
        let b = self.translator.translate_open(f, keys, bindings);
        self.solver.assert(&guard.implies(&b));
    }

    pub fn assert_transition(&mut self, t: &TransitionDef, old: &str, new: &str) {
        let b = self.translator.transition(t, old, new);
        self.solver.assert(&b);
    }

    /// Assert that some declared transition relates the two keys. With no
    /// transitions declared this is `false`.
    pub fn assert_any_transition(&mut self, old: &str, new: &str) {
        let program = self.translator.program().clone();
        let parts: Vec<Bool> = program
            .transitions
            .iter()
            .map(|t| self.translator.transition(t, old, new))
            .collect();
        self.solver.assert(&Bool::or(&parts));
    }

    /// Assert an already-translated term, e.g. an indicator.
    pub fn assert_bool(&mut self, b: &Bool) {
        self.solver.assert(b);
    }

    pub fn fresh_const(&mut self, prefix: &str, sort: &str) -> Dynamic {
        self.translator.fresh_const(prefix, sort)
    }

    pub fn fresh_indicator(&mut self, prefix: &str) -> Bool {
        self.translator.fresh_indicator(prefix)
    }

    fn raw_check(&mut self, assumptions: Option<&[Bool]>, query: &str) -> RawOutcome {
        let mut attempt = 0u32;
        loop {
            self.nqueries += 1;
            let start = Instant::now();
            let result = match assumptions {
                Some(a) => self.solver.check_assumptions(a),
                None => self.solver.check(),
            };
            let elapsed = start.elapsed();
            self.solver_time += elapsed;
            debug!(query, elapsed_ms = elapsed.as_millis() as u64, ?result, "solver check");
            match result {
                SatResult::Sat => return RawOutcome::Sat,
                SatResult::Unsat => return RawOutcome::Unsat,
                SatResult::Unknown if attempt < self.cfg.unknown_retries => {
                    attempt += 1;
                    warn!(query, attempt, "solver returned unknown, retrying");
                }
                SatResult::Unknown => return RawOutcome::Unknown,
            }
        }
    }

    /// Check satisfiability of the current assertions. `query` names the
    /// check for logs and error reports.
    pub fn check(&mut self, query: &str) -> SmtResult<CheckOutcome> {
        match self.raw_check(None, query) {
            RawOutcome::Sat => Ok(CheckOutcome::Sat),
            RawOutcome::Unsat => Ok(CheckOutcome::Unsat),
            RawOutcome::Unknown => Err(SmtError::Inconclusive {
                query: query.to_string(),
                attempts: self.cfg.unknown_retries + 1,
            }),
        }
    }

    /// Check under assumptions. On unsat, the returned core lists the indices
    /// of the assumptions that participated in the proof.
    pub fn check_assuming(
        &mut self,
        assumptions: &[Bool],
        query: &str,
    ) -> SmtResult<AssumptionOutcome> {
        match self.raw_check(Some(assumptions), query) {
            RawOutcome::Sat => Ok(AssumptionOutcome::Sat),
            RawOutcome::Unsat => {
                let core = self.solver.get_unsat_core();
                let indices = assumptions
                    .iter()
                    .enumerate()
                    .filter(|(_, a)| core.iter().any(|c| c == *a))
                    .map(|(i, _)| i)
                    .collect();
                Ok(AssumptionOutcome::Unsat { core: indices })
            }
            RawOutcome::Unknown => Err(SmtError::Inconclusive {
                query: query.to_string(),
                attempts: self.cfg.unknown_retries + 1,
            }),
        }
    }

    /// Extract a finite structure from the current (satisfiable) assertions,
    /// with the universe of every sort minimized.
    ///
    /// Minimization probes cardinalities from 1 upwards: for each sort a
    /// scope is pushed asserting that the universe is covered by that many
    /// fresh representatives, and the first cardinality that stays
    /// satisfiable wins. The scopes are popped before returning, so the
    /// session is left as it was found.
    pub fn minimized_model(&mut self, keys: &[&str], query: &str) -> SmtResult<Structure> {
        let mut pushed = 0u32;
        let result = self.minimize_and_extract(keys, query, &mut pushed);
        if pushed > 0 {
            self.solver.pop(pushed);
        }
        result
    }

    fn minimize_and_extract(
        &mut self,
        keys: &[&str],
        query: &str,
        pushed: &mut u32,
    ) -> SmtResult<Structure> {
        let sorts: Vec<String> = self
            .program()
            .vocab
            .sorts
            .iter()
            .map(|s| s.name.clone())
            .collect();
        let mut reps: Vec<(String, Vec<Dynamic>)> = Vec::new();
        for sort in sorts {
            let mut chosen = None;
            for n in 1..=self.cfg.max_universe {
                self.solver.push();
                *pushed += 1;
                let consts: Vec<Dynamic> = (0..n)
                    .map(|_| self.translator.fresh_const("elem", &sort))
                    .collect();
                let x = self.translator.fresh_const("cover", &sort);
                let covered: Vec<Bool> = consts.iter().map(|e| x.eq(e)).collect();
                let bound: Vec<&dyn Ast> = vec![&x];
                self.solver
                    .assert(&z3::ast::forall_const(&bound, &[], &Bool::or(&covered)));
                match self.raw_check(None, &format!("{query} [|{sort}| <= {n}]")) {
                    RawOutcome::Sat => {
                        chosen = Some(consts);
                        break;
                    }
                    // Unknown at a small bound is treated like unsat: a
                    // larger bound may still go through cleanly.
                    RawOutcome::Unsat | RawOutcome::Unknown => {
                        self.solver.pop(1);
                        *pushed -= 1;
                    }
                }
            }
            let consts = chosen.ok_or_else(|| SmtError::UniverseCap {
                query: query.to_string(),
                sort: sort.clone(),
                cap: self.cfg.max_universe,
            })?;
            debug!(query, sort, size = consts.len(), "universe minimized");
            reps.push((sort, consts));
        }
        let model = self.solver.get_model().ok_or_else(|| SmtError::NoModel {
            query: query.to_string(),
        })?;
        Ok(extract::structure_from_model(
            &model,
            &mut self.translator,
            keys,
            &reps,
        ))
    }
}
