//! First-order program model for vigil.
//!
//! A program is a vocabulary (sorts, relations, constants, functions), a set
//! of axioms, initial-condition and safety formulas, and guarded transition
//! definitions with explicit modifies-sets. Everything here is pure data:
//! the solver-facing encoding lives in `vigil-smt` and the invariant search
//! in `vigil-updr`.

pub mod program;
pub mod structure;
pub mod syntax;
pub mod vocab;

pub use program::{Program, ProgramBuilder, TransitionDef};
pub use structure::{Interp, Structure};
pub use syntax::{Formula, Quant, SortedVar, Term};
pub use vocab::{ConstantDecl, DerivedDef, FunctionDecl, RelationDecl, SortDecl, Vocabulary};

use thiserror::Error;

/// Validation error for the program model.
#[derive(Debug, Error)]
pub enum FolError {
    #[error("unknown sort '{0}'")]
    UnknownSort(String),

    #[error("unknown symbol '{0}'")]
    UnknownSymbol(String),

    #[error("duplicate declaration of '{0}'")]
    Duplicate(String),

    #[error("'{name}' applied to {got} arguments, expected {expected}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("sort mismatch at '{context}': expected {expected}, got {got}")]
    SortMismatch {
        context: String,
        expected: String,
        got: String,
    },

    #[error("unbound variable '{0}'")]
    UnboundVar(String),

    #[error("'{0}' used as a term but is not a constant or function")]
    NotATerm(String),

    #[error("'{0}' used as an atom but is not a relation")]
    NotARelation(String),

    #[error("formula refers to epoch {epoch} but at most {max} temporal copies are allowed here")]
    EpochOutOfRange { epoch: usize, max: usize },

    #[error("transition '{name}' lists '{symbol}' in its modifies-set, which is not a mutable symbol")]
    BadModifies { name: String, symbol: String },

    #[error("structure has no interpretation for '{0}'")]
    MissingInterp(String),
}

pub type FolResult<T> = Result<T, FolError>;
