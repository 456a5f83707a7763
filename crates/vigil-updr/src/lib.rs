//! Invariant inference for first-order transition systems.
//!
//! The search maintains a growing sequence of frames, each a set of
//! predicates over-approximating the states reachable in that many steps.
//! Unsafe states found in the frontier are turned into diagrams, traced
//! backwards through predecessors, generalized into universally quantified
//! blocking clauses, and pushed forward until two adjacent frames agree,
//! which certifies an inductive invariant. A chain of predecessors reaching
//! an initial state is returned as a counterexample trace instead.

pub mod checkpoint;
pub mod diagram;
pub mod frames;
mod generalize;
pub mod trace;
pub mod verify;

pub use checkpoint::{Checkpoint, CHECKPOINT_VERSION};
pub use diagram::Diagram;
pub use frames::{Obligation, Updr};
pub use generalize::MinimizeStrategy;
pub use trace::{StateSnapshot, Trace, TraceStep};
pub use verify::{verify_invariant, VerifyOutcome};

use std::path::PathBuf;

use thiserror::Error;

use vigil_fol::{FolError, Formula};
use vigil_smt::{SessionConfig, SmtError};

#[derive(Debug, Error)]
pub enum UpdrError {
    #[error(transparent)]
    Smt(#[from] SmtError),

    #[error(transparent)]
    Fol(#[from] FolError),

    #[error("checkpoint io: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint encoding: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("checkpoint version {found} is not supported (expected {expected})")]
    CheckpointVersion { found: u32, expected: u32 },

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

pub type UpdrResult<T> = Result<T, UpdrError>;

/// Outcome of a search.
#[derive(Debug)]
pub enum Verdict {
    /// An inductive invariant implying every safety property.
    Proved { invariant: Vec<Formula> },
    /// A run from an initial state to a safety violation.
    Disproved { trace: Trace },
    /// The search hit a configured budget; a checkpoint was written if one
    /// was configured.
    Interrupted { reason: String },
}

/// Iteration order over transitions in predecessor search. Affects which
/// counterexample is found first, never whether one is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOrder {
    Declared,
    ReverseDeclared,
}

/// Whether the push phase also tries to push initial-condition conjuncts
/// out of frame zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushFrameZero {
    Always,
    /// Same as `Always` in this engine; kept as a distinct setting because
    /// callers persist it.
    IfTrivial,
    Never,
}

#[derive(Debug, Clone)]
pub struct UpdrConfig {
    pub session: SessionConfig,
    pub strategy: MinimizeStrategy,
    /// Substitute away diagram variables pinned to a constant.
    pub simplify_diagram: bool,
    pub push_frame_zero: PushFrameZero,
    pub transition_order: TransitionOrder,
    /// Re-check each learned clause by bounded unrolling up to its frame
    /// index. Expensive; a failure is an engine bug and aborts the search.
    pub smoke_test: bool,
    pub max_iterations: Option<u64>,
    pub memory_limit_mb: Option<usize>,
    /// Where to write checkpoints, at frame boundaries and on interruption.
    pub checkpoint_out: Option<PathBuf>,
}

impl Default for UpdrConfig {
    fn default() -> Self {
        UpdrConfig {
            session: SessionConfig::default(),
            strategy: MinimizeStrategy::UnsatCore,
            simplify_diagram: true,
            push_frame_zero: PushFrameZero::IfTrivial,
            transition_order: TransitionOrder::Declared,
            smoke_test: false,
            max_iterations: None,
            memory_limit_mb: None,
            checkpoint_out: None,
        }
    }
}
