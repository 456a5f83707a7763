//! Generalization of blocked diagrams.
//!
//! A blocked diagram usually says far more than what makes it unreachable.
//! Dropping literals while the remainder stays excluded by the initial
//! states and unreachable in one step from the previous frame yields a much
//! stronger blocking clause. Two strategies: plain literal-removal, and
//! seeding the kept set from the solver's unsat cores before refining.

use serde::{Deserialize, Serialize};
use tracing::debug;
use z3::ast::{Bool, Dynamic};

use vigil_fol::{Formula, SortedVar};
use vigil_smt::{AssumptionOutcome, CheckOutcome, Session, KEY_NEW, KEY_OLD, KEY_ONE};

use crate::diagram::Diagram;
use crate::{UpdrError, UpdrResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MinimizeStrategy {
    /// Try removing every literal in turn, re-checking blockedness each time.
    BruteForce,
    /// Start from the union of the unsat cores gathered while blocking,
    /// augmented so the initial states stay excluded, then refine.
    UnsatCore,
}

/// Skolem constants for a diagram's binders, for asserting its literals
/// individually.
pub(crate) fn skolemize(
    session: &mut Session,
    binders: &[SortedVar],
) -> Vec<(String, Dynamic)> {
    binders
        .iter()
        .map(|b| (b.name.clone(), session.fresh_const(&b.name, &b.sort)))
        .collect()
}

pub(crate) struct Blocker<'a> {
    session: &'a mut Session,
    /// Predicates of the frame below the one being strengthened.
    pre_frame: Vec<Formula>,
}

impl<'a> Blocker<'a> {
    pub fn new(session: &'a mut Session, pre_frame: Vec<Formula>) -> Blocker<'a> {
        Blocker { session, pre_frame }
    }

    fn excludes_init(&mut self, diag: &Diagram) -> UpdrResult<bool> {
        let program = self.session.program().clone();
        let formula = diag.to_formula();
        let outcome = self.session.scoped(|s| {
            for init in &program.inits {
                s.assert(init, &[KEY_ONE]);
            }
            s.assert(&formula, &[KEY_ONE]);
            s.check("candidate excludes initial states")
        })?;
        Ok(outcome == CheckOutcome::Unsat)
    }

    fn unreachable_in_one_step(&mut self, diag: &Diagram) -> UpdrResult<bool> {
        let program = self.session.program().clone();
        let formula = diag.to_formula();
        for t in &program.transitions {
            let outcome = self.session.scoped(|s| {
                for p in &self.pre_frame {
                    s.assert(p, &[KEY_OLD]);
                }
                s.assert_transition(t, KEY_OLD, KEY_NEW);
                s.assert(&formula, &[KEY_NEW]);
                s.check(&format!("candidate unreachable via '{}'", t.name))
            })?;
            if outcome == CheckOutcome::Sat {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether the candidate is still excluded by the initial states and by
    /// one step from the previous frame.
    pub fn still_blocked(&mut self, diag: &Diagram) -> UpdrResult<bool> {
        Ok(self.excludes_init(diag)? && self.unreachable_in_one_step(diag)?)
    }

    /// Grow `keep` until the kept literals alone exclude the initial
    /// states, using an unsat core over all literals.
    pub fn augment_for_init(&mut self, diag: &Diagram, keep: &mut [bool]) -> UpdrResult<()> {
        let program = self.session.program().clone();
        let diagram = diag.clone();
        self.session.scoped(|s| -> UpdrResult<()> {
            for init in &program.inits {
                s.assert(init, &[KEY_ONE]);
            }
            let bindings = skolemize(s, &diagram.binders);
            let mut guards = Vec::with_capacity(diagram.literals.len());
            for lit in &diagram.literals {
                let g = s.fresh_indicator("init_core");
                s.assert_implied_by(&g, lit, &[KEY_ONE], &bindings);
                guards.push(g);
            }
            let kept: Vec<Bool> = guards
                .iter()
                .zip(keep.iter())
                .filter(|(_, &k)| k)
                .map(|(g, _)| g.clone())
                .collect();
            match s.check_assuming(&kept, "kept literals exclude initial states")? {
                AssumptionOutcome::Unsat { .. } => return Ok(()),
                AssumptionOutcome::Sat => {}
            }
            match s.check_assuming(&guards, "diagram excludes initial states")? {
                AssumptionOutcome::Unsat { core } => {
                    for idx in core {
                        keep[idx] = true;
                    }
                    Ok(())
                }
                AssumptionOutcome::Sat => Err(UpdrError::Internal(
                    "blocked diagram is satisfiable in an initial state".to_string(),
                )),
            }
        })
    }

    /// Remove literals until no single removal keeps the candidate blocked.
    pub fn minimize(&mut self, diag: &Diagram) -> UpdrResult<Diagram> {
        let mut current = diag.clone();
        loop {
            let mut changed = false;
            let mut i = 0;
            while i < current.literals.len() {
                if current.literals.len() == 1 {
                    break;
                }
                let candidate = current.without_literal(i);
                if self.still_blocked(&candidate)? {
                    current = candidate;
                    changed = true;
                } else {
                    i += 1;
                }
            }
            if !changed {
                break;
            }
        }
        Ok(current)
    }
}

/// Generalize a blocked diagram to a locally minimal one. `core_seed` marks
/// the literals that appeared in a per-transition unsat core while the
/// diagram was blocked; it is only consulted by the core-directed strategy.
pub(crate) fn generalize(
    session: &mut Session,
    pre_frame: Vec<Formula>,
    diag: &Diagram,
    strategy: MinimizeStrategy,
    core_seed: &[bool],
) -> UpdrResult<Diagram> {
    let mut blocker = Blocker::new(session, pre_frame);
    let seeded = match strategy {
        MinimizeStrategy::BruteForce => diag.clone(),
        MinimizeStrategy::UnsatCore => {
            let mut keep = core_seed.to_vec();
            blocker.augment_for_init(diag, &mut keep)?;
            let candidate = diag.restricted_to(&keep);
            if candidate.literals.is_empty() {
                diag.clone()
            } else {
                candidate
            }
        }
    };
    let minimal = blocker.minimize(&seeded)?;
    debug!(
        before = diag.literals.len(),
        after = minimal.literals.len(),
        ?strategy,
        "diagram generalized"
    );
    Ok(minimal)
}
