//! Whole-engine runs over small protocols.

use std::sync::Arc;

use vigil_fol::{Formula, Program, ProgramBuilder, SortedVar, Term};
use vigil_updr::{
    verify_invariant, MinimizeStrategy, Updr, UpdrConfig, Verdict, VerifyOutcome,
};

fn var(name: &str) -> Term {
    Term::var(name)
}

fn mutual_exclusion(rel: &str) -> Formula {
    Formula::forall(
        vec![SortedVar::new("x", "node"), SortedVar::new("y", "node")],
        Formula::implies(
            Formula::and(vec![
                Formula::rel(rel, vec![var("x")]),
                Formula::rel(rel, vec![var("y")]),
            ]),
            Formula::eq(var("x"), var("y")),
        ),
    )
}

fn no_holder() -> Formula {
    Formula::forall(
        vec![SortedVar::new("n", "node")],
        Formula::rel("holds", vec![var("n")]).negate(),
    )
}

/// `holds` becomes exactly the old set plus `n` (epoch 1 vs epoch 0).
fn grows_by(rel: &str, n: &str) -> Formula {
    Formula::forall(
        vec![SortedVar::new("m", "node")],
        Formula::iff(
            Formula::rel_at(1, rel, vec![var("m")]),
            Formula::or(vec![
                Formula::rel(rel, vec![var("m")]),
                Formula::eq(var("m"), var(n)),
            ]),
        ),
    )
}

/// `rel` becomes exactly the old set minus `n`.
fn shrinks_by(rel: &str, n: &str) -> Formula {
    Formula::forall(
        vec![SortedVar::new("m", "node")],
        Formula::iff(
            Formula::rel_at(1, rel, vec![var("m")]),
            Formula::and(vec![
                Formula::rel(rel, vec![var("m")]),
                Formula::ne(var("m"), var(n)),
            ]),
        ),
    )
}

/// A lock where acquisition is guarded by the lock being free. Safe, and
/// safety alone is inductive.
fn mutex() -> Arc<Program> {
    let program = ProgramBuilder::new()
        .sort("node")
        .relation("holds", &["node"], true)
        .init(no_holder())
        .safety(mutual_exclusion("holds"))
        .transition(
            "acquire",
            vec![SortedVar::new("n", "node")],
            &["holds"],
            Formula::and(vec![
                no_holder(),
                Formula::forall(
                    vec![SortedVar::new("m", "node")],
                    Formula::iff(
                        Formula::rel_at(1, "holds", vec![var("m")]),
                        Formula::eq(var("m"), var("n")),
                    ),
                ),
            ]),
        )
        .transition(
            "release",
            vec![SortedVar::new("n", "node")],
            &["holds"],
            Formula::and(vec![
                Formula::rel("holds", vec![var("n")]),
                shrinks_by("holds", "n"),
            ]),
        )
        .build()
        .unwrap();
    Arc::new(program)
}

/// The same lock without the acquisition guard: two nodes can acquire.
/// Carries an immutable ring function that plays no role in the bug.
fn broken_mutex() -> Arc<Program> {
    let program = ProgramBuilder::new()
        .sort("node")
        .relation("holds", &["node"], true)
        .function("next", &["node"], "node", false)
        .init(no_holder())
        .safety(mutual_exclusion("holds"))
        .transition(
            "acquire",
            vec![SortedVar::new("n", "node")],
            &["holds"],
            grows_by("holds", "n"),
        )
        .transition(
            "release",
            vec![SortedVar::new("n", "node")],
            &["holds"],
            Formula::and(vec![
                Formula::rel("holds", vec![var("n")]),
                shrinks_by("holds", "n"),
            ]),
        )
        .build()
        .unwrap();
    Arc::new(program)
}

/// A lock server granting a lock over a message protocol. Safe, but safety
/// alone is not inductive: the search has to learn auxiliary clauses about
/// the messages in flight.
fn lockserv() -> Arc<Program> {
    let empty = |rel: &str| {
        Formula::forall(
            vec![SortedVar::new("n", "node")],
            Formula::rel(rel, vec![var("n")]).negate(),
        )
    };
    let program = ProgramBuilder::new()
        .sort("node")
        .relation("lock_msg", &["node"], true)
        .relation("grant_msg", &["node"], true)
        .relation("unlock_msg", &["node"], true)
        .relation("holds_lock", &["node"], true)
        .relation("server_holds_lock", &[], true)
        .init(empty("lock_msg"))
        .init(empty("grant_msg"))
        .init(empty("unlock_msg"))
        .init(empty("holds_lock"))
        .init(Formula::rel("server_holds_lock", vec![]))
        .safety(mutual_exclusion("holds_lock"))
        .transition(
            "send_lock",
            vec![SortedVar::new("n", "node")],
            &["lock_msg"],
            grows_by("lock_msg", "n"),
        )
        .transition(
            "recv_lock",
            vec![SortedVar::new("n", "node")],
            &["lock_msg", "grant_msg", "server_holds_lock"],
            Formula::and(vec![
                Formula::rel("server_holds_lock", vec![]),
                Formula::rel("lock_msg", vec![var("n")]),
                Formula::rel_at(1, "server_holds_lock", vec![]).negate(),
                shrinks_by("lock_msg", "n"),
                grows_by("grant_msg", "n"),
            ]),
        )
        .transition(
            "recv_grant",
            vec![SortedVar::new("n", "node")],
            &["grant_msg", "holds_lock"],
            Formula::and(vec![
                Formula::rel("grant_msg", vec![var("n")]),
                shrinks_by("grant_msg", "n"),
                grows_by("holds_lock", "n"),
            ]),
        )
        .transition(
            "unlock",
            vec![SortedVar::new("n", "node")],
            &["holds_lock", "unlock_msg"],
            Formula::and(vec![
                Formula::rel("holds_lock", vec![var("n")]),
                shrinks_by("holds_lock", "n"),
                grows_by("unlock_msg", "n"),
            ]),
        )
        .transition(
            "recv_unlock",
            vec![SortedVar::new("n", "node")],
            &["unlock_msg", "server_holds_lock"],
            Formula::and(vec![
                Formula::rel("unlock_msg", vec![var("n")]),
                shrinks_by("unlock_msg", "n"),
                Formula::rel_at(1, "server_holds_lock", vec![]),
            ]),
        )
        .build()
        .unwrap();
    Arc::new(program)
}

#[test]
fn mutex_is_proved_and_invariant_is_inductive() {
    let program = mutex();
    let mut updr = Updr::new(program.clone(), UpdrConfig::default());
    let verdict = updr.search().unwrap();
    let Verdict::Proved { invariant } = verdict else {
        panic!("expected a proof, got {verdict:?}");
    };
    assert!(invariant.contains(&program.safeties[0]));
    assert!(updr.nqueries() > 0);
    assert!(matches!(
        verify_invariant(&program, &invariant, &Default::default()).unwrap(),
        VerifyOutcome::Inductive
    ));
}

#[test]
fn both_strategies_prove_the_mutex() {
    for strategy in [MinimizeStrategy::BruteForce, MinimizeStrategy::UnsatCore] {
        let cfg = UpdrConfig {
            strategy,
            ..UpdrConfig::default()
        };
        let verdict = Updr::new(mutex(), cfg).search().unwrap();
        assert!(
            matches!(verdict, Verdict::Proved { .. }),
            "{strategy:?} failed: {verdict:?}"
        );
    }
}

#[test]
fn smoke_test_accepts_sound_clauses() {
    let cfg = UpdrConfig {
        smoke_test: true,
        ..UpdrConfig::default()
    };
    let verdict = Updr::new(mutex(), cfg).search().unwrap();
    assert!(matches!(verdict, Verdict::Proved { .. }));
}

#[test]
fn unguarded_mutex_yields_a_counterexample_run() {
    let program = broken_mutex();
    let safety = program.safeties[0].clone();
    let verdict = Updr::new(program, UpdrConfig::default()).search().unwrap();
    let Verdict::Disproved { trace } = verdict else {
        panic!("expected a counterexample, got {verdict:?}");
    };

    // Two acquisitions are needed to violate mutual exclusion.
    assert!(trace.len() >= 3, "trace too short: {trace}");
    assert_eq!(trace.steps[0].via, None);
    for step in &trace.steps[1..] {
        assert!(step.via.is_some());
    }

    // Every step is concrete, and the run actually ends in a bad state.
    let first = trace.steps[0].structure.as_ref().unwrap();
    for init in &trace_program_inits() {
        assert!(first.eval(init, &[0]).unwrap());
    }
    let last = trace.final_step().unwrap().structure.as_ref().unwrap();
    assert!(!last.eval(&safety, &[0]).unwrap());

    // Mutable symbols are reported per step, immutables once for the run.
    let shared = trace.immutable.as_ref().unwrap();
    assert!(shared.functions.contains_key("next"));
    for step in &trace.steps {
        let state = step.state.as_ref().unwrap();
        assert!(state.relations.contains_key("holds"));
        assert!(state.functions.is_empty());
    }

    assert!(trace.to_json().is_object());
}

fn trace_program_inits() -> Vec<Formula> {
    broken_mutex().inits.clone()
}

#[test]
fn lockserv_requires_learned_clauses() {
    let program = lockserv();
    // The bounded re-check runs on every learned clause here.
    let cfg = UpdrConfig {
        smoke_test: true,
        ..UpdrConfig::default()
    };
    let mut updr = Updr::new(program.clone(), cfg);
    let verdict = updr.search().unwrap();
    let Verdict::Proved { invariant } = verdict else {
        panic!("expected a proof, got {verdict:?}");
    };
    // Safety is not inductive here, so something had to be learned.
    assert!(invariant.len() > 1);
    assert!(updr.state_count() > 0);
    assert!(matches!(
        verify_invariant(&program, &invariant, &Default::default()).unwrap(),
        VerifyOutcome::Inductive
    ));
}

#[test]
fn frames_weaken_with_depth() {
    let mut updr = Updr::new(lockserv(), UpdrConfig::default());
    updr.search().unwrap();
    let frames = updr.frames();
    for i in 0..frames.len() - 1 {
        assert!(
            frames[i + 1].is_subset(&frames[i]),
            "frame {} is not weaker than frame {}",
            i + 1,
            i
        );
    }
}

#[test]
fn declared_invariant_that_is_too_weak_is_rejected() {
    let program = broken_mutex();
    let outcome =
        verify_invariant(&program, &[program.safeties[0].clone()], &Default::default()).unwrap();
    match outcome {
        VerifyOutcome::ConsecutionViolation { transition, .. } => {
            assert_eq!(transition, "acquire");
        }
        other => panic!("expected a consecution violation, got {other:?}"),
    }
}

#[test]
fn interrupted_search_resumes_from_checkpoint() {
    let path = std::env::temp_dir().join(format!(
        "vigil-updr-checkpoint-{}.json",
        std::process::id()
    ));
    let program = mutex();

    let cfg = UpdrConfig {
        max_iterations: Some(1),
        checkpoint_out: Some(path.clone()),
        ..UpdrConfig::default()
    };
    let verdict = Updr::new(program.clone(), cfg).search().unwrap();
    assert!(matches!(verdict, Verdict::Interrupted { .. }));
    assert!(path.exists());

    let mut resumed = Updr::restore(program, UpdrConfig::default(), &path).unwrap();
    let verdict = resumed.search().unwrap();
    std::fs::remove_file(&path).ok();
    assert!(matches!(verdict, Verdict::Proved { .. }));
}
