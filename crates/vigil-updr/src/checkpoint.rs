//! Persistent search state.
//!
//! A checkpoint captures everything needed to resume a search: the predicate
//! pool, the frames as index sets into it, the counters, and any pending
//! obligations. Models are not persisted; a resumed obligation is abstract
//! until the search re-concretizes it. The format is versioned JSON and a
//! version mismatch is fatal rather than silently reinterpreted.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use vigil_fol::Formula;

use crate::frames::Obligation;
use crate::{UpdrError, UpdrResult};

pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    /// The predicate pool; frames refer into it by index.
    pub predicates: Vec<Formula>,
    pub frames: Vec<Vec<usize>>,
    pub state_count: u64,
    pub iterations: u64,
    pub pending: Vec<Obligation>,
}

impl Checkpoint {
    pub fn save(&self, path: &Path) -> UpdrResult<()> {
        let file = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    pub fn load(path: &Path) -> UpdrResult<Checkpoint> {
        let file = BufReader::new(File::open(path)?);
        let checkpoint: Checkpoint = serde_json::from_reader(file)?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(UpdrError::CheckpointVersion {
                found: checkpoint.version,
                expected: CHECKPOINT_VERSION,
            });
        }
        Ok(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagram::Diagram;
    use vigil_fol::{Formula, SortedVar, Term};

    fn scratch_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("vigil-{}-{name}.json", std::process::id()))
    }

    fn sample() -> Checkpoint {
        let clause = Formula::forall(
            vec![SortedVar::new("n", "node")],
            Formula::rel("holds", vec![Term::var("n")]).negate(),
        );
        Checkpoint {
            version: CHECKPOINT_VERSION,
            predicates: vec![clause.clone()],
            frames: vec![vec![0], vec![]],
            state_count: 3,
            iterations: 2,
            pending: vec![Obligation {
                frame: 1,
                diagram: Diagram {
                    binders: vec![SortedVar::new("node_0", "node")],
                    literals: vec![Formula::rel("holds", vec![Term::var("node_0")])],
                },
                via: Some("acquire".to_string()),
                state: None,
            }],
        }
    }

    #[test]
    fn round_trip_preserves_everything() {
        let path = scratch_path("roundtrip");
        let original = sample();
        original.save(&path).unwrap();
        let loaded = Checkpoint::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded.predicates, original.predicates);
        assert_eq!(loaded.frames, original.frames);
        assert_eq!(loaded.state_count, original.state_count);
        assert_eq!(loaded.iterations, original.iterations);
        assert_eq!(loaded.pending.len(), 1);
        assert_eq!(loaded.pending[0].diagram, original.pending[0].diagram);
        assert!(loaded.pending[0].state.is_none());
    }

    #[test]
    fn version_mismatch_is_fatal() {
        let path = scratch_path("version");
        let mut stale = sample();
        stale.version = CHECKPOINT_VERSION + 1;
        stale.save(&path).unwrap();
        let err = Checkpoint::load(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(
            err,
            UpdrError::CheckpointVersion { found, expected }
                if found == CHECKPOINT_VERSION + 1 && expected == CHECKPOINT_VERSION
        ));
    }
}
