//! Counterexample traces.
//!
//! A trace is the reversed obligation chain of a failed blocking attempt:
//! it starts in an initial state and ends in a state violating safety. Steps
//! carry a concrete snapshot of the mutable symbols when the obligation
//! still had its model; the immutable symbols are reported once for the
//! whole trace. Obligations restored from a checkpoint only have their
//! diagram, which is reported as an abstract step.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use vigil_fol::{Program, Structure};

/// Which part of the vocabulary a snapshot captures.
#[derive(Clone, Copy)]
enum Part {
    All,
    Mutable,
    Immutable,
}

impl Part {
    fn wants(self, mutable: bool) -> bool {
        match self {
            Part::All => true,
            Part::Mutable => mutable,
            Part::Immutable => !mutable,
        }
    }
}

/// One state rendered with element names: relations as their true tuples,
/// constants and functions as their values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateSnapshot {
    pub universes: BTreeMap<String, Vec<String>>,
    pub relations: BTreeMap<String, Vec<Vec<String>>>,
    pub constants: BTreeMap<String, String>,
    pub functions: BTreeMap<String, Vec<(Vec<String>, String)>>,
}

impl StateSnapshot {
    /// Every symbol of the vocabulary, for standalone witness states.
    pub fn from_structure(program: &Program, structure: &Structure, epoch: usize) -> StateSnapshot {
        Self::capture(program, structure, epoch, Part::All)
    }

    /// Only the mutable symbols, for per-step trace rendering.
    pub fn mutable_part(program: &Program, structure: &Structure, epoch: usize) -> StateSnapshot {
        Self::capture(program, structure, epoch, Part::Mutable)
    }

    /// Only the immutable symbols, reported once per trace.
    pub fn immutable_part(program: &Program, structure: &Structure) -> StateSnapshot {
        Self::capture(program, structure, 0, Part::Immutable)
    }

    fn capture(
        program: &Program,
        structure: &Structure,
        epoch: usize,
        part: Part,
    ) -> StateSnapshot {
        let vocab = &program.vocab;
        let name = |sort: &str, e: usize| -> String {
            structure
                .universes
                .get(sort)
                .and_then(|u| u.get(e))
                .cloned()
                .unwrap_or_else(|| format!("{sort}!{e}"))
        };
        let interp_of = |mutable: bool| {
            if mutable {
                &structure.epochs[epoch]
            } else {
                &structure.immutable
            }
        };

        let mut snapshot = StateSnapshot {
            universes: structure.universes.clone(),
            relations: BTreeMap::new(),
            constants: BTreeMap::new(),
            functions: BTreeMap::new(),
        };

        for r in &vocab.relations {
            if !part.wants(r.mutable) {
                continue;
            }
            let Some(table) = interp_of(r.mutable).relations.get(&r.name) else {
                continue;
            };
            let tuples: Vec<Vec<String>> = table
                .iter()
                .filter(|(_, &v)| v)
                .map(|(tuple, _)| {
                    tuple
                        .iter()
                        .zip(&r.arity)
                        .map(|(&e, sort)| name(sort, e))
                        .collect()
                })
                .collect();
            snapshot.relations.insert(r.name.clone(), tuples);
        }
        for c in &vocab.constants {
            if !part.wants(c.mutable) {
                continue;
            }
            let Some(&e) = interp_of(c.mutable).constants.get(&c.name) else {
                continue;
            };
            snapshot.constants.insert(c.name.clone(), name(&c.sort, e));
        }
        for f in &vocab.functions {
            if !part.wants(f.mutable) {
                continue;
            }
            let Some(table) = interp_of(f.mutable).functions.get(&f.name) else {
                continue;
            };
            let entries: Vec<(Vec<String>, String)> = table
                .iter()
                .map(|(tuple, &result)| {
                    let args = tuple
                        .iter()
                        .zip(&f.domain)
                        .map(|(&e, sort)| name(sort, e))
                        .collect();
                    (args, name(&f.range, result))
                })
                .collect();
            snapshot.functions.insert(f.name.clone(), entries);
        }
        snapshot
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceStep {
    /// The transition taken to reach this state; `None` for the first step.
    pub via: Option<String>,
    /// Pretty form of the state's diagram.
    pub diagram: String,
    /// Concrete snapshot of the mutable symbols, when the state could be
    /// concretized.
    pub state: Option<StateSnapshot>,
    /// The underlying structure, kept for programmatic re-checking. Not
    /// serialized; checkpoints persist diagrams only.
    #[serde(skip)]
    pub structure: Option<Structure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Trace {
    pub steps: Vec<TraceStep>,
    /// Interpretations of the immutable symbols, shared by every step.
    /// Taken from the final state's model; `None` when every step is
    /// abstract.
    pub immutable: Option<StateSnapshot>,
}

impl Trace {
    pub fn new(steps: Vec<TraceStep>, immutable: Option<StateSnapshot>) -> Trace {
        Trace { steps, immutable }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The state violating safety.
    pub fn final_step(&self) -> Option<&TraceStep> {
        self.steps.last()
    }

    /// Machine-readable form, mirroring the `Serialize` impl.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

fn write_interps(f: &mut fmt::Formatter<'_>, s: &StateSnapshot) -> fmt::Result {
    for (rel, tuples) in &s.relations {
        let shown: Vec<String> = tuples.iter().map(|t| format!("({})", t.join(", "))).collect();
        writeln!(f, "  {rel} = {{{}}}", shown.join(", "))?;
    }
    for (c, v) in &s.constants {
        writeln!(f, "  {c} = {v}")?;
    }
    for (func, entries) in &s.functions {
        for (args, result) in entries {
            writeln!(f, "  {func}({}) = {result}", args.join(", "))?;
        }
    }
    Ok(())
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(shared) = &self.immutable {
            writeln!(f, "immutable:")?;
            write_interps(f, shared)?;
        }
        for (i, step) in self.steps.iter().enumerate() {
            match &step.via {
                None => writeln!(f, "state {i} (initial):")?,
                Some(t) => writeln!(f, "state {i} (via {t}):")?,
            }
            match &step.state {
                Some(s) => {
                    for (sort, elems) in &s.universes {
                        writeln!(f, "  {sort} = {{{}}}", elems.join(", "))?;
                    }
                    write_interps(f, s)?;
                }
                None => writeln!(f, "  (abstract) {}", step.diagram)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_fol::{Interp, ProgramBuilder};

    fn program() -> Program {
        ProgramBuilder::new()
            .sort("node")
            .relation("holds", &["node"], true)
            .constant("boss", "node", false)
            .function("next", &["node"], "node", false)
            .build()
            .unwrap()
    }

    /// Two nodes; `holds` true for node 0, `boss` is node 1, `next` swaps.
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
        let mut next = BTreeMap::new();
        next.insert(vec![0], 1);
        next.insert(vec![1], 0);
        s.immutable.functions.insert("next".into(), next);
        s
    }

    #[test]
    fn snapshot_parts_partition_the_vocabulary() {
        let p = program();
        let s = structure();

        let mutable = StateSnapshot::mutable_part(&p, &s, 0);
        assert!(mutable.relations.contains_key("holds"));
        assert!(mutable.constants.is_empty());
        assert!(mutable.functions.is_empty());

        let shared = StateSnapshot::immutable_part(&p, &s);
        assert!(shared.relations.is_empty());
        assert_eq!(shared.constants["boss"], "node!1");
        assert!(shared.functions.contains_key("next"));

        let full = StateSnapshot::from_structure(&p, &s, 0);
        assert!(full.relations.contains_key("holds"));
        assert!(full.functions.contains_key("next"));
    }

    #[test]
    fn display_reports_immutables_once() {
        let p = program();
        let s = structure();
        let step = |via: Option<&str>| TraceStep {
            via: via.map(str::to_string),
            diagram: String::new(),
            state: Some(StateSnapshot::mutable_part(&p, &s, 0)),
            structure: None,
        };
        let trace = Trace::new(
            vec![step(None), step(Some("tick"))],
            Some(StateSnapshot::immutable_part(&p, &s)),
        );
        let rendered = trace.to_string();
        assert_eq!(rendered.matches("boss = node!1").count(), 1);
        assert_eq!(rendered.matches("holds = ").count(), 2);
    }
}
