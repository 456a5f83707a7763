//! Direct verification of a user-supplied invariant.
//!
//! Checks the three proof obligations of an inductive safety argument:
//! every initial state satisfies the invariant, the invariant is preserved
//! by every transition, and it implies the safety properties. The first
//! failing obligation is reported with a concrete witness state.

use std::sync::Arc;

use tracing::info;

use vigil_fol::{Formula, Program, Structure};
use vigil_smt::{CheckOutcome, Session, SessionConfig, KEY_NEW, KEY_OLD, KEY_ONE};

use crate::trace::StateSnapshot;
use crate::UpdrResult;

#[derive(Debug, Clone)]
pub enum VerifyOutcome {
    /// All three obligations hold.
    Inductive,
    /// An initial state violating the invariant.
    InitViolation { state: StateSnapshot },
    /// A transition out of the invariant: the pre- and post-state of a step
    /// that leaves it.
    ConsecutionViolation {
        transition: String,
        pre: StateSnapshot,
        post: StateSnapshot,
    },
    /// A state inside the invariant that violates safety.
    Unsafe { state: StateSnapshot },
}

pub fn verify_invariant(
    program: &Arc<Program>,
    invariant: &[Formula],
    cfg: &SessionConfig,
) -> UpdrResult<VerifyOutcome> {
    let mut session = Session::new(program.clone(), cfg.clone(), &[KEY_ONE, KEY_OLD, KEY_NEW]);
    let conj = Formula::and(invariant.to_vec());
    let negated = conj.clone().negate();

    let init_witness = session.scoped(|s| -> UpdrResult<Option<Structure>> {
        for init in &program.inits {
            s.assert(init, &[KEY_ONE]);
        }
        s.assert(&negated, &[KEY_ONE]);
        match s.check("invariant holds initially")? {
            CheckOutcome::Unsat => Ok(None),
            CheckOutcome::Sat => Ok(Some(s.minimized_model(&[KEY_ONE], "initiation witness")?)),
        }
    })?;
    if let Some(st) = init_witness {
        return Ok(VerifyOutcome::InitViolation {
            state: StateSnapshot::from_structure(program, &st, 0),
        });
    }

    for t in &program.transitions {
        let witness = session.scoped(|s| -> UpdrResult<Option<Structure>> {
            for f in invariant {
                s.assert(f, &[KEY_OLD]);
            }
            s.assert_transition(t, KEY_OLD, KEY_NEW);
            s.assert(&negated, &[KEY_NEW]);
            match s.check(&format!("invariant preserved by '{}'", t.name))? {
                CheckOutcome::Unsat => Ok(None),
                CheckOutcome::Sat => Ok(Some(s.minimized_model(
                    &[KEY_OLD, KEY_NEW],
                    &format!("consecution witness for '{}'", t.name),
                )?)),
            }
        })?;
        if let Some(st) = witness {
            return Ok(VerifyOutcome::ConsecutionViolation {
                transition: t.name.clone(),
                pre: StateSnapshot::from_structure(program, &st, 0),
                post: StateSnapshot::from_structure(program, &st, 1),
            });
        }
    }

    let unsafe_witness = session.scoped(|s| -> UpdrResult<Option<Structure>> {
        s.assert(&conj, &[KEY_ONE]);
        s.assert(
            &Formula::and(program.safeties.clone()).negate(),
            &[KEY_ONE],
        );
        match s.check("invariant implies safety")? {
            CheckOutcome::Unsat => Ok(None),
            CheckOutcome::Sat => Ok(Some(s.minimized_model(&[KEY_ONE], "unsafety witness")?)),
        }
    })?;
    if let Some(st) = unsafe_witness {
        return Ok(VerifyOutcome::Unsafe {
            state: StateSnapshot::from_structure(program, &st, 0),
        });
    }

    info!(
        conjuncts = invariant.len(),
        nqueries = session.nqueries(),
        "invariant verified inductive"
    );
    Ok(VerifyOutcome::Inductive)
}
