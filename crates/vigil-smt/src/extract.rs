//! Turning a z3 model into a finite [`Structure`].
//!
//! The session has already pinned each sort to a finite set of representative
//! constants. Extraction deduplicates the representatives under the model's
//! equality, then evaluates every ground atom and ground term over them with
//! model completion, producing total interpretation tables.

use std::collections::BTreeMap;

use z3::ast::{Ast, Bool, Dynamic};
use z3::Model;

use vigil_fol::structure::all_tuples;
use vigil_fol::{Interp, Structure};

use crate::translate::Translator;

fn eval_bool(model: &Model, b: &Bool) -> bool {
    model
        .eval(b, true)
        .and_then(|v| v.as_bool())
        .unwrap_or_else(|| panic!("model evaluation produced no boolean value"))
}

fn element_index(model: &Model, value: &Dynamic, elems: &[Dynamic], context: &str) -> usize {
    elems
        .iter()
        .position(|e| eval_bool(model, &value.eq(e)))
        .unwrap_or_else(|| panic!("model value of '{context}' matches no universe element"))
}

fn ground_args(tuple: &[usize], domain: &[String], elems: &BTreeMap<String, Vec<Dynamic>>) -> Vec<Dynamic> {
    tuple
        .iter()
        .zip(domain)
        .map(|(&i, sort)| elems[sort][i].clone())
        .collect()
}

fn relation_table(
    model: &Model,
    translator: &mut Translator,
    key: &str,
    name: &str,
    arity: &[String],
    elems: &BTreeMap<String, Vec<Dynamic>>,
) -> BTreeMap<Vec<usize>, bool> {
    let decl = translator.decl(key, name);
    let sizes: Vec<usize> = arity.iter().map(|s| elems[s].len()).collect();
    let mut table = BTreeMap::new();
    for tuple in all_tuples(&sizes) {
        let args = ground_args(&tuple, arity, elems);
        let refs: Vec<&dyn Ast> = args.iter().map(|a| a as &dyn Ast).collect();
        let atom = decl
            .apply(&refs)
            .as_bool()
            .unwrap_or_else(|| panic!("'{name}' is not a relation"));
        table.insert(tuple, eval_bool(model, &atom));
    }
    table
}

fn function_table(
    model: &Model,
    translator: &mut Translator,
    key: &str,
    name: &str,
    domain: &[String],
    range: &str,
    elems: &BTreeMap<String, Vec<Dynamic>>,
) -> BTreeMap<Vec<usize>, usize> {
    let decl = translator.decl(key, name);
    let sizes: Vec<usize> = domain.iter().map(|s| elems[s].len()).collect();
    let mut table = BTreeMap::new();
    for tuple in all_tuples(&sizes) {
        let args = ground_args(&tuple, domain, elems);
        let refs: Vec<&dyn Ast> = args.iter().map(|a| a as &dyn Ast).collect();
        let value = decl.apply(&refs);
        table.insert(tuple, element_index(model, &value, &elems[range], name));
    }
    table
}

pub(crate) fn structure_from_model(
    model: &Model,
    translator: &mut Translator,
    keys: &[&str],
    reps: &[(String, Vec<Dynamic>)],
) -> Structure {
    let program = translator.program().clone();
    let mut structure = Structure::default();
    let mut elems: BTreeMap<String, Vec<Dynamic>> = BTreeMap::new();

    for (sort, rs) in reps {
        let mut canonical: Vec<Dynamic> = Vec::new();
        for r in rs {
            if !canonical.iter().any(|e| eval_bool(model, &r.eq(e))) {
                canonical.push(r.clone());
            }
        }
        let names = canonical
            .iter()
            .map(|e| {
                model
                    .eval(e, true)
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| panic!("model has no value for an element of '{sort}'"))
            })
            .collect();
        structure.universes.insert(sort.clone(), names);
        elems.insert(sort.clone(), canonical);
    }

    structure.epochs = vec![Interp::default(); keys.len()];

    for rel in &program.vocab.relations {
        if rel.mutable {
            for (k, key) in keys.iter().enumerate() {
                let table = relation_table(model, translator, key, &rel.name, &rel.arity, &elems);
                structure.epochs[k].relations.insert(rel.name.clone(), table);
            }
        } else {
            let table = relation_table(model, translator, "", &rel.name, &rel.arity, &elems);
            structure.immutable.relations.insert(rel.name.clone(), table);
        }
    }

    for c in &program.vocab.constants {
        let targets: Vec<&str> = if c.mutable { keys.to_vec() } else { vec![""] };
        for (k, key) in targets.iter().enumerate() {
            let decl = translator.decl(key, &c.name);
            let value = decl.apply(&[]);
            let idx = element_index(model, &value, &elems[&c.sort], &c.name);
            if c.mutable {
                structure.epochs[k].constants.insert(c.name.clone(), idx);
            } else {
                structure.immutable.constants.insert(c.name.clone(), idx);
            }
        }
    }

    for f in &program.vocab.functions {
        if f.mutable {
            for (k, key) in keys.iter().enumerate() {
                let table =
                    function_table(model, translator, key, &f.name, &f.domain, &f.range, &elems);
                structure.epochs[k].functions.insert(f.name.clone(), table);
            }
        } else {
            let table = function_table(model, translator, "", &f.name, &f.domain, &f.range, &elems);
            structure.immutable.functions.insert(f.name.clone(), table);
        }
    }

    structure
}
