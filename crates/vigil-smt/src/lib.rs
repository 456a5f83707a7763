//! Solver layer for vigil.
//!
//! Wraps z3 behind a [`Session`] that translates validated programs into
//! multi-state queries, keeps query accounting, retries `unknown` results,
//! and extracts minimized finite structures from satisfiable queries.

pub mod extract;
pub mod session;
pub mod translate;

pub use session::{AssumptionOutcome, CheckOutcome, Session};
pub use translate::{Translator, KEY_NEW, KEY_OLD, KEY_ONE};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SmtError {
    #[error("solver returned unknown on query '{query}' after {attempts} attempts")]
    Inconclusive { query: String, attempts: u32 },

    #[error("solver reported sat but produced no model for query '{query}'")]
    NoModel { query: String },

    #[error("no model of query '{query}' with at most {cap} elements of sort '{sort}'")]
    UniverseCap {
        query: String,
        sort: String,
        cap: usize,
    },
}

pub type SmtResult<T> = Result<T, SmtError>;

/// Tuning knobs for a [`Session`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Per-check solver timeout in milliseconds. `None` lets checks run
    /// unbounded.
    pub timeout_ms: Option<u32>,
    /// How many times an `unknown` check is retried before giving up.
    pub unknown_retries: u32,
    /// Largest universe size probed per sort during model minimization.
    pub max_universe: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            timeout_ms: None,
            unknown_retries: 2,
            max_universe: 8,
        }
    }
}
