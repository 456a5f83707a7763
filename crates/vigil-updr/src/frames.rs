//! The frame manager: backward reachability with learned blocking clauses.
//!
//! Frames are sets of indices into a shared predicate pool. Frame 0 holds
//! the initial conditions; every later frame starts unconstrained and is
//! strengthened by blocking clauses as unsafe states are traced backwards
//! from the frontier. Blocking works through an explicit obligation stack,
//! never recursion, so the in-flight state can be checkpointed and resumed.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use vigil_fol::{Formula, Program, Structure};
use vigil_smt::{AssumptionOutcome, CheckOutcome, Session, KEY_NEW, KEY_OLD, KEY_ONE};

use crate::checkpoint::{Checkpoint, CHECKPOINT_VERSION};
use crate::diagram::Diagram;
use crate::generalize::{self, skolemize};
use crate::trace::{StateSnapshot, Trace, TraceStep};
use crate::{PushFrameZero, TransitionOrder, UpdrConfig, UpdrError, UpdrResult, Verdict};

/// A state (as its diagram) that must be shown unreachable within `frame`
/// steps, or traced back to an initial state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Obligation {
    pub frame: usize,
    pub diagram: Diagram,
    /// Transition from this state to the successor obligation's state;
    /// `None` for the frontier state itself.
    pub via: Option<String>,
    /// The concrete model the diagram came from. Not persisted: an
    /// obligation restored from a checkpoint stays abstract.
    #[serde(skip)]
    pub state: Option<Structure>,
}

enum Progress {
    Secured,
    Refuted(Trace),
    OutOfBudget(String),
}

enum Predecessor {
    Found { via: String, state: Structure },
    Blocked { core_seed: Vec<bool> },
}

pub struct Updr {
    program: Arc<Program>,
    cfg: UpdrConfig,
    session: Session,
    predicates: Vec<Formula>,
    pred_index: HashMap<Formula, usize>,
    frames: Vec<BTreeSet<usize>>,
    pending: Vec<Obligation>,
    /// Diagrams blocked, counting repeats; `predicates` holds the
    /// deduplicated clauses.
    state_count: u64,
    iterations: u64,
}

impl Updr {
    pub fn new(program: Arc<Program>, cfg: UpdrConfig) -> Updr {
        let session = Session::new(
            program.clone(),
            cfg.session.clone(),
            &[KEY_ONE, KEY_OLD, KEY_NEW],
        );
        let inits = program.inits.clone();
        let mut updr = Updr {
            program,
            cfg,
            session,
            predicates: Vec::new(),
            pred_index: HashMap::new(),
            frames: Vec::new(),
            pending: Vec::new(),
            state_count: 0,
            iterations: 0,
        };
        let frame_zero: BTreeSet<usize> = inits.into_iter().map(|f| updr.intern(f)).collect();
        updr.frames.push(frame_zero);
        updr.frames.push(BTreeSet::new());
        updr
    }

    /// Resume a search from a checkpoint written by an earlier run over the
    /// same program.
    pub fn restore(program: Arc<Program>, cfg: UpdrConfig, path: &Path) -> UpdrResult<Updr> {
        let checkpoint = Checkpoint::load(path)?;
        let pool_size = checkpoint.predicates.len();
        let mut pred_index = HashMap::new();
        for (i, f) in checkpoint.predicates.iter().enumerate() {
            pred_index.insert(f.clone(), i);
        }
        let mut frames = Vec::with_capacity(checkpoint.frames.len());
        for ids in &checkpoint.frames {
            let set: BTreeSet<usize> = ids.iter().copied().collect();
            if set.iter().any(|&id| id >= pool_size) {
                return Err(UpdrError::Internal(
                    "checkpoint frame refers to a predicate outside the pool".to_string(),
                ));
            }
            frames.push(set);
        }
        if frames.len() < 2 {
            return Err(UpdrError::Internal(
                "checkpoint holds fewer than two frames".to_string(),
            ));
        }
        let session = Session::new(
            program.clone(),
            cfg.session.clone(),
            &[KEY_ONE, KEY_OLD, KEY_NEW],
        );
        info!(
            frames = frames.len(),
            predicates = pool_size,
            pending = checkpoint.pending.len(),
            "search state restored from checkpoint"
        );
        Ok(Updr {
            program,
            cfg,
            session,
            predicates: checkpoint.predicates,
            pred_index,
            frames,
            pending: checkpoint.pending,
            state_count: checkpoint.state_count,
            iterations: checkpoint.iterations,
        })
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    pub fn frames(&self) -> &[BTreeSet<usize>] {
        &self.frames
    }

    pub fn predicates(&self) -> &[Formula] {
        &self.predicates
    }

    pub fn frame_formulas(&self, i: usize) -> Vec<Formula> {
        self.frames[i]
            .iter()
            .map(|&id| self.predicates[id].clone())
            .collect()
    }

    /// Diagrams blocked so far, counting repeats.
    pub fn state_count(&self) -> u64 {
        self.state_count
    }

    pub fn nqueries(&self) -> u64 {
        self.session.nqueries()
    }

    pub fn solver_time(&self) -> Duration {
        self.session.solver_time()
    }

    fn intern(&mut self, f: Formula) -> usize {
        if let Some(&id) = self.pred_index.get(&f) {
            return id;
        }
        let id = self.predicates.len();
        self.pred_index.insert(f.clone(), id);
        self.predicates.push(f);
        id
    }

    fn negated_safety(&self) -> Formula {
        Formula::and(self.program.safeties.clone()).negate()
    }

    fn diagram_of(&self, state: &Structure) -> Diagram {
        let mut diagram = Diagram::of_structure(&self.program, state, 0);
        if self.cfg.simplify_diagram {
            diagram.simplify_equal_constants();
        }
        diagram
    }

    /// Run until a verdict. May be called again after `Interrupted` if the
    /// budgets are raised.
    pub fn search(&mut self) -> UpdrResult<Verdict> {
        let verdict = self.run()?;
        info!(
            nqueries = self.session.nqueries(),
            solver_ms = self.session.solver_time().as_millis() as u64,
            frames = self.frames.len(),
            predicates = self.predicates.len(),
            states_blocked = self.state_count,
            "search finished"
        );
        Ok(verdict)
    }

    fn run(&mut self) -> UpdrResult<Verdict> {
        if let Some(trace) = self.init_violation()? {
            return Ok(Verdict::Disproved { trace });
        }
        loop {
            self.iterations += 1;
            info!(
                iteration = self.iterations,
                frames = self.frames.len(),
                "frontier iteration"
            );
            if let Some(reason) = self.budget_exceeded() {
                self.maybe_checkpoint()?;
                return Ok(Verdict::Interrupted { reason });
            }
            match self.establish_safety()? {
                Progress::Refuted(trace) => return Ok(Verdict::Disproved { trace }),
                Progress::OutOfBudget(reason) => {
                    self.maybe_checkpoint()?;
                    return Ok(Verdict::Interrupted { reason });
                }
                Progress::Secured => {}
            }
            self.push_forward()?;
            if let Some(invariant) = self.inductive_invariant() {
                info!(conjuncts = invariant.len(), "fixpoint reached");
                return Ok(Verdict::Proved { invariant });
            }
            self.frames.push(BTreeSet::new());
            self.maybe_checkpoint()?;
        }
    }

    /// Safety must already hold in the initial states.
    fn init_violation(&mut self) -> UpdrResult<Option<Trace>> {
        let program = self.program.clone();
        let bad = self.negated_safety();
        let state = self.session.scoped(|s| -> UpdrResult<Option<Structure>> {
            for init in &program.inits {
                s.assert(init, &[KEY_ONE]);
            }
            s.assert(&bad, &[KEY_ONE]);
            match s.check("initial states satisfy safety")? {
                CheckOutcome::Unsat => Ok(None),
                CheckOutcome::Sat => Ok(Some(
                    s.minimized_model(&[KEY_ONE], "initial safety violation")?,
                )),
            }
        })?;
        Ok(state.map(|st| {
            warn!("safety violated in an initial state");
            let shared = StateSnapshot::immutable_part(&self.program, &st);
            Trace::new(
                vec![TraceStep {
                    via: None,
                    diagram: self.diagram_of(&st).to_string(),
                    state: Some(StateSnapshot::mutable_part(&self.program, &st, 0)),
                    structure: Some(st),
                }],
                Some(shared),
            )
        }))
    }

    /// Block every frontier state that violates safety, tracing predecessors
    /// through the obligation stack.
    fn establish_safety(&mut self) -> UpdrResult<Progress> {
        loop {
            if self.pending.is_empty() {
                match self.frontier_violation()? {
                    None => return Ok(Progress::Secured),
                    Some(ob) => self.pending.push(ob),
                }
            }
            while let Some(ob) = self.pending.last().cloned() {
                if let Some(reason) = self.budget_exceeded() {
                    return Ok(Progress::OutOfBudget(reason));
                }
                if ob.frame == 0 {
                    let trace = self.build_trace();
                    warn!(steps = trace.len(), "counterexample found");
                    return Ok(Progress::Refuted(trace));
                }
                match self.find_predecessor(&ob)? {
                    Predecessor::Found { via, state } => {
                        let diagram = self.diagram_of(&state);
                        self.pending.push(Obligation {
                            frame: ob.frame - 1,
                            diagram,
                            via: Some(via),
                            state: Some(state),
                        });
                    }
                    Predecessor::Blocked { core_seed } => {
                        self.learn(&ob, &core_seed)?;
                        self.pending.pop();
                    }
                }
            }
        }
    }

    /// A minimized model of the frontier violating safety, if any.
    fn frontier_violation(&mut self) -> UpdrResult<Option<Obligation>> {
        let last = self.frames.len() - 1;
        let preds = self.frame_formulas(last);
        let bad = self.negated_safety();
        let state = self.session.scoped(|s| -> UpdrResult<Option<Structure>> {
            for p in &preds {
                s.assert(p, &[KEY_ONE]);
            }
            s.assert(&bad, &[KEY_ONE]);
            match s.check(&format!("frame {last} excludes safety violations"))? {
                CheckOutcome::Unsat => Ok(None),
                CheckOutcome::Sat => Ok(Some(
                    s.minimized_model(&[KEY_ONE], &format!("frame {last} bad state"))?,
                )),
            }
        })?;
        Ok(state.map(|st| {
            info!(frame = last, "unsafe state in the frontier");
            Obligation {
                frame: last,
                diagram: self.diagram_of(&st),
                via: None,
                state: Some(st),
            }
        }))
    }

    /// Search for a predecessor of the obligation's diagram one frame down.
    /// When every transition refuses, the union of the per-transition unsat
    /// cores over the diagram's literals is returned as a generalization
    /// seed.
    fn find_predecessor(&mut self, ob: &Obligation) -> UpdrResult<Predecessor> {
        let pre = self.frame_formulas(ob.frame - 1);
        let program = self.program.clone();
        let diagram = ob.diagram.clone();
        let frame = ob.frame;
        let order: Vec<usize> = match self.cfg.transition_order {
            TransitionOrder::Declared => (0..program.transitions.len()).collect(),
            TransitionOrder::ReverseDeclared => (0..program.transitions.len()).rev().collect(),
        };
        self.session.scoped(|s| -> UpdrResult<Predecessor> {
            for p in &pre {
                s.assert(p, &[KEY_OLD]);
            }
            let bindings = skolemize(s, &diagram.binders);
            let mut guards = Vec::with_capacity(diagram.literals.len());
            for lit in &diagram.literals {
                let g = s.fresh_indicator("lit");
                s.assert_implied_by(&g, lit, &[KEY_NEW], &bindings);
                guards.push(g);
            }
            let mut keep = vec![false; guards.len()];
            for idx in order {
                let t = &program.transitions[idx];
                let found = s.scoped(|s2| -> UpdrResult<Option<Structure>> {
                    s2.assert_transition(t, KEY_OLD, KEY_NEW);
                    let query = format!("frame {frame} predecessor via '{}'", t.name);
                    match s2.check_assuming(&guards, &query)? {
                        AssumptionOutcome::Sat => {
                            for g in &guards {
                                s2.assert_bool(g);
                            }
                            Ok(Some(s2.minimized_model(&[KEY_OLD, KEY_NEW], &query)?))
                        }
                        AssumptionOutcome::Unsat { core } => {
                            for i in core {
                                keep[i] = true;
                            }
                            Ok(None)
                        }
                    }
                })?;
                if let Some(state) = found {
                    debug!(frame, transition = %t.name, "predecessor found");
                    return Ok(Predecessor::Found {
                        via: t.name.clone(),
                        state,
                    });
                }
            }
            Ok(Predecessor::Blocked { core_seed: keep })
        })
    }

    /// Generalize a blocked diagram and add its blocking clause to every
    /// frame up to the obligation's.
    fn learn(&mut self, ob: &Obligation, core_seed: &[bool]) -> UpdrResult<()> {
        let pre = self.frame_formulas(ob.frame - 1);
        let minimal = generalize::generalize(
            &mut self.session,
            pre,
            &ob.diagram,
            self.cfg.strategy,
            core_seed,
        )?;
        let clause = minimal.blocking_clause();
        info!(frame = ob.frame, clause = %clause, "learned blocking clause");
        let id = self.intern(clause.clone());
        for j in 0..=ob.frame {
            self.frames[j].insert(id);
        }
        self.state_count += 1;
        if self.cfg.smoke_test {
            self.smoke_test(&clause, ob.frame)?;
        }
        Ok(())
    }

    /// Re-check a learned clause against every bounded run of up to `depth`
    /// steps. A violation means the engine derived an unsound clause.
    fn smoke_test(&self, clause: &Formula, depth: usize) -> UpdrResult<()> {
        let keys: Vec<String> = (0..=depth).map(|i| format!("s{i}")).collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let mut session = Session::new(self.program.clone(), self.cfg.session.clone(), &refs);
        for init in &self.program.inits {
            session.assert(init, &[refs[0]]);
        }
        let negated = clause.clone().negate();
        for k in 0..=depth {
            if k > 0 {
                session.assert_any_transition(refs[k - 1], refs[k]);
            }
            let outcome = session.scoped(|s| {
                s.assert(&negated, &[refs[k]]);
                s.check(&format!("smoke test at depth {k}"))
            })?;
            if outcome == CheckOutcome::Sat {
                return Err(UpdrError::Internal(format!(
                    "learned clause '{clause}' is violated {k} steps from an initial state"
                )));
            }
        }
        Ok(())
    }

    /// Copy every predicate preserved by all transitions into the next
    /// frame.
    fn push_forward(&mut self) -> UpdrResult<()> {
        let start = match self.cfg.push_frame_zero {
            PushFrameZero::Never => 1,
            PushFrameZero::Always | PushFrameZero::IfTrivial => 0,
        };
        for i in start..self.frames.len() - 1 {
            let candidates: Vec<usize> = self.frames[i]
                .difference(&self.frames[i + 1])
                .copied()
                .collect();
            if candidates.is_empty() {
                continue;
            }
            let frame_preds = self.frame_formulas(i);
            for id in candidates {
                let p = self.predicates[id].clone();
                if self.preserved_from(&frame_preds, &p, i)? {
                    debug!(frame = i, predicate = %p, "predicate pushed forward");
                    self.frames[i + 1].insert(id);
                }
            }
        }
        Ok(())
    }

    fn preserved_from(&mut self, frame: &[Formula], p: &Formula, i: usize) -> UpdrResult<bool> {
        let program = self.program.clone();
        let negated = p.clone().negate();
        for t in &program.transitions {
            let outcome = self.session.scoped(|s| {
                for q in frame {
                    s.assert(q, &[KEY_OLD]);
                }
                s.assert_transition(t, KEY_OLD, KEY_NEW);
                s.assert(&negated, &[KEY_NEW]);
                s.check(&format!("push from frame {i} via '{}'", t.name))
            })?;
            if outcome == CheckOutcome::Sat {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Two adjacent frames agreeing certify the later one inductive. The
    /// returned invariant carries the safety properties as conjuncts.
    fn inductive_invariant(&self) -> Option<Vec<Formula>> {
        for i in 1..self.frames.len() - 1 {
            if self.frames[i] == self.frames[i + 1] {
                let mut invariant = self.frame_formulas(i + 1);
                for safety in &self.program.safeties {
                    if !invariant.contains(safety) {
                        invariant.push(safety.clone());
                    }
                }
                return Some(invariant);
            }
        }
        None
    }

    fn budget_exceeded(&self) -> Option<String> {
        if let Some(max) = self.cfg.max_iterations {
            if self.iterations > max {
                return Some(format!("iteration budget of {max} exhausted"));
            }
        }
        if let Some(limit) = self.cfg.memory_limit_mb {
            if let Some(usage) = memory_stats::memory_stats() {
                let used_mb = usage.physical_mem / (1024 * 1024);
                if used_mb >= limit {
                    return Some(format!(
                        "memory use of {used_mb} MiB reached the {limit} MiB limit"
                    ));
                }
            }
        }
        None
    }

    /// The pending obligation chain, initial state first. Immutable-symbol
    /// interpretations come from the frontier state's model, the final step
    /// of the trace.
    fn build_trace(&self) -> Trace {
        let shared = self
            .pending
            .iter()
            .find_map(|ob| ob.state.as_ref())
            .map(|st| StateSnapshot::immutable_part(&self.program, st));
        let mut steps = Vec::with_capacity(self.pending.len());
        let mut incoming: Option<String> = None;
        for ob in self.pending.iter().rev() {
            steps.push(TraceStep {
                via: incoming.take(),
                diagram: ob.diagram.to_string(),
                state: ob
                    .state
                    .as_ref()
                    .map(|st| StateSnapshot::mutable_part(&self.program, st, 0)),
                structure: ob.state.clone(),
            });
            incoming = ob.via.clone();
        }
        Trace::new(steps, shared)
    }

    fn maybe_checkpoint(&self) -> UpdrResult<()> {
        let Some(path) = &self.cfg.checkpoint_out else {
            return Ok(());
        };
        let checkpoint = Checkpoint {
            version: CHECKPOINT_VERSION,
            predicates: self.predicates.clone(),
            frames: self
                .frames
                .iter()
                .map(|ids| ids.iter().copied().collect())
                .collect(),
            state_count: self.state_count,
            iterations: self.iterations,
            pending: self.pending.clone(),
        };
        checkpoint.save(path)?;
        debug!(path = %path.display(), "checkpoint written");
        Ok(())
    }
}
