//! End-to-end checks of the session layer against a real solver.

use std::sync::Arc;

use vigil_fol::{DerivedDef, Formula, Program, ProgramBuilder, SortedVar, Term};
use vigil_smt::{
    AssumptionOutcome, CheckOutcome, Session, SessionConfig, KEY_NEW, KEY_OLD, KEY_ONE,
};

fn mutex_program() -> Arc<Program> {
    let program = ProgramBuilder::new()
        .sort("node")
        .relation("holds", &["node"], true)
        .init(Formula::forall(
            vec![SortedVar::new("n", "node")],
            Formula::rel("holds", vec![Term::var("n")]).negate(),
        ))
        .safety(Formula::forall(
            vec![SortedVar::new("m", "node"), SortedVar::new("n", "node")],
            Formula::implies(
                Formula::and(vec![
                    Formula::rel("holds", vec![Term::var("m")]),
                    Formula::rel("holds", vec![Term::var("n")]),
                ]),
                Formula::eq(Term::var("m"), Term::var("n")),
            ),
        ))
        .build()
        .unwrap();
    Arc::new(program)
}

/// Two independent nullary relations; `toggle` may only change `lock_held`.
fn toggle_program() -> Arc<Program> {
    let program = ProgramBuilder::new()
        .sort("unit")
        .relation("lock_held", &[], true)
        .relation("flag", &[], true)
        .transition(
            "toggle",
            vec![],
            &["lock_held"],
            Formula::iff(
                Formula::rel_at(1, "lock_held", vec![]),
                Formula::rel("lock_held", vec![]).negate(),
            ),
        )
        .build()
        .unwrap();
    Arc::new(program)
}

/// `idle` is fixed by definition to the complement of `holds`.
fn registry_program() -> Arc<Program> {
    let program = ProgramBuilder::new()
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
    Arc::new(program)
}

/// A mutable unary function `owner` next to an unrelated nullary flag.
fn owner_program() -> Arc<Program> {
    let program = ProgramBuilder::new()
        .sort("node")
        .relation("active", &[], true)
        .constant("root", "node", false)
        .function("owner", &["node"], "node", true)
        .transition(
            "activate",
            vec![],
            &["active"],
            Formula::rel_at(1, "active", vec![]),
        )
        .build()
        .unwrap();
    Arc::new(program)
}

#[test]
fn initial_states_satisfy_safety() {
    let program = mutex_program();
    let mut session = Session::new(program.clone(), SessionConfig::default(), &[KEY_ONE]);
    let outcome = session.scoped(|s| {
        for init in &program.inits {
            s.assert(init, &[KEY_ONE]);
        }
        s.assert(&program.safeties[0].clone().negate(), &[KEY_ONE]);
        s.check("init excludes safety violation")
    });
    assert_eq!(outcome.unwrap(), CheckOutcome::Unsat);
}

#[test]
fn frame_condition_pins_unmodified_symbols() {
    let program = toggle_program();
    let toggle = program.transition("toggle").unwrap().clone();

    let mut session = Session::new(program.clone(), SessionConfig::default(), &[KEY_OLD, KEY_NEW]);
    let pinned = session.scoped(|s| {
        s.assert(&Formula::rel("flag", vec![]), &[KEY_OLD]);
        s.assert_transition(&toggle, KEY_OLD, KEY_NEW);
        s.assert(&Formula::rel("flag", vec![]).negate(), &[KEY_NEW]);
        s.check("frame pins flag")
    });
    assert_eq!(pinned.unwrap(), CheckOutcome::Unsat);

    let free = session.scoped(|s| {
        s.assert(&Formula::rel("lock_held", vec![]).negate(), &[KEY_OLD]);
        s.assert_transition(&toggle, KEY_OLD, KEY_NEW);
        s.assert(&Formula::rel("lock_held", vec![]), &[KEY_NEW]);
        s.check("modified symbol moves")
    });
    assert_eq!(free.unwrap(), CheckOutcome::Sat);
}

#[test]
fn derived_definition_constrains_models() {
    let program = registry_program();
    let mut session = Session::new(program, SessionConfig::default(), &[KEY_ONE]);
    let all_held = Formula::forall(
        vec![SortedVar::new("n", "node")],
        Formula::rel("holds", vec![Term::var("n")]),
    );
    let some_idle = Formula::exists(
        vec![SortedVar::new("n", "node")],
        Formula::rel("idle", vec![Term::var("n")]),
    );

    let outcome = session.scoped(|s| {
        s.assert(&all_held, &[KEY_ONE]);
        s.assert(&some_idle, &[KEY_ONE]);
        s.check("definition excludes an idle holder")
    });
    assert_eq!(outcome.unwrap(), CheckOutcome::Unsat);

    let structure = session.scoped(|s| {
        s.assert(&some_idle, &[KEY_ONE]);
        assert_eq!(s.check("idle node exists").unwrap(), CheckOutcome::Sat);
        s.minimized_model(&[KEY_ONE], "idle node exists").unwrap()
    });
    assert!(structure.epochs[0].relations.contains_key("idle"));
    let complement = Formula::forall(
        vec![SortedVar::new("n", "node")],
        Formula::iff(
            Formula::rel("idle", vec![Term::var("n")]),
            Formula::rel("holds", vec![Term::var("n")]).negate(),
        ),
    );
    assert!(structure.eval(&complement, &[0]).unwrap());
}

#[test]
fn frame_condition_pins_functions() {
    let program = owner_program();
    let activate = program.transition("activate").unwrap().clone();
    let mut session = Session::new(program, SessionConfig::default(), &[KEY_OLD, KEY_NEW]);
    let moved = Formula::exists(
        vec![SortedVar::new("n", "node")],
        Formula::ne(
            Term::app("owner", vec![Term::var("n")]),
            Term::app_at(1, "owner", vec![Term::var("n")]),
        ),
    );
    let outcome = session.scoped(|s| {
        s.assert_transition(&activate, KEY_OLD, KEY_NEW);
        s.assert(&moved, &[KEY_OLD, KEY_NEW]);
        s.check("frame pins owner")
    });
    assert_eq!(outcome.unwrap(), CheckOutcome::Unsat);
}

#[test]
fn functions_are_extracted_into_tables() {
    let program = owner_program();
    let mut session = Session::new(program, SessionConfig::default(), &[KEY_ONE]);
    let fixed = Formula::forall(
        vec![SortedVar::new("n", "node")],
        Formula::eq(
            Term::app("owner", vec![Term::var("n")]),
            Term::cnst("root"),
        ),
    );
    let structure = session.scoped(|s| {
        s.assert(&fixed, &[KEY_ONE]);
        assert_eq!(s.check("owner maps to root").unwrap(), CheckOutcome::Sat);
        s.minimized_model(&[KEY_ONE], "owner maps to root").unwrap()
    });
    assert_eq!(structure.universe_size("node"), 1);
    let root = structure.immutable.constants["root"];
    let table = &structure.epochs[0].functions["owner"];
    assert!(!table.is_empty());
    assert!(table.values().all(|&v| v == root));
    assert!(structure.eval(&fixed, &[0]).unwrap());
}

#[test]
fn minimized_model_has_smallest_universe() {
    let program = mutex_program();
    let mut session = Session::new(program, SessionConfig::default(), &[KEY_ONE]);
    let someone_holds = Formula::exists(
        vec![SortedVar::new("x", "node")],
        Formula::rel("holds", vec![Term::var("x")]),
    );
    let structure = session.scoped(|s| {
        s.assert(&someone_holds, &[KEY_ONE]);
        assert_eq!(s.check("holder exists").unwrap(), CheckOutcome::Sat);
        s.minimized_model(&[KEY_ONE], "holder exists").unwrap()
    });
    assert_eq!(structure.universe_size("node"), 1);
    assert!(structure.eval(&someone_holds, &[0]).unwrap());
}

#[test]
fn unsat_core_reports_assumption_indices() {
    let program = ProgramBuilder::new()
        .sort("node")
        .relation("holds", &["node"], true)
        .constant("boss", "node", false)
        .build()
        .unwrap();
    let mut session = Session::new(Arc::new(program), SessionConfig::default(), &[KEY_ONE]);
    let pos = Formula::rel("holds", vec![Term::cnst("boss")]);
    let neg = pos.clone().negate();

    let outcome = session.scoped(|s| {
        let g_pos = s.fresh_indicator("g");
        let g_neg = s.fresh_indicator("g");
        let g_idle = s.fresh_indicator("g");
        s.assert_implied_by(&g_pos, &pos, &[KEY_ONE], &[]);
        s.assert_implied_by(&g_neg, &neg, &[KEY_ONE], &[]);
        s.assert_implied_by(&g_idle, &Formula::tru(), &[KEY_ONE], &[]);

        let sat = s
            .check_assuming(&[g_pos.clone()], "single assumption")
            .unwrap();
        assert_eq!(sat, AssumptionOutcome::Sat);

        s.check_assuming(&[g_pos, g_neg, g_idle], "conflicting assumptions")
            .unwrap()
    });
    match outcome {
        AssumptionOutcome::Unsat { core } => {
            assert!(core.contains(&0));
            assert!(core.contains(&1));
            assert!(!core.contains(&2));
        }
        AssumptionOutcome::Sat => panic!("conflicting assumptions reported sat"),
    }
}

#[test]
fn queries_are_counted() {
    let program = mutex_program();
    let mut session = Session::new(program, SessionConfig::default(), &[KEY_ONE]);
    assert_eq!(session.nqueries(), 0);
    session.check("empty").unwrap();
    session.check("empty again").unwrap();
    assert_eq!(session.nqueries(), 2);
}
