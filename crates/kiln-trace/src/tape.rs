//! Recorded sequence of traced operator calls.

use std::fmt;

use kiln_core::{KilnError, Result, RuntimeConfig};
use parking_lot::Mutex;
use serde::Serialize;
use smallvec::SmallVec;

/// Ids assigned to the outputs of one traced call.
pub type TraceIds = SmallVec<[u64; 4]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceMode {
    /// Append every traced call.
    Record,
    /// Check every traced call against the recording, in order.
    Replay,
}

impl fmt::Display for TraceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceMode::Record => f.write_str("record"),
            TraceMode::Replay => f.write_str("replay"),
        }
    }
}

/// One traced call. Inputs that were never traced have no id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEntry {
    pub op: String,
    pub inputs: Vec<Option<u64>>,
    pub outputs: Vec<u64>,
    pub backward: bool,
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids = |v: &mut dyn Iterator<Item = String>| v.collect::<Vec<_>>().join(", ");
        write!(
            f,
            "{}{}({}) -> ({})",
            self.op,
            if self.backward { "'" } else { "" },
            ids(&mut self
                .inputs
                .iter()
                .map(|i| i.map_or_else(|| "_".to_string(), |i| format!("%{i}")))),
            ids(&mut self.outputs.iter().map(|o| format!("%{o}"))),
        )
    }
}

/// Serializable view of a tape.
#[derive(Debug, Clone, Serialize)]
pub struct TapeSnapshot {
    pub mode: TraceMode,
    pub cursor: usize,
    pub entries: Vec<TraceEntry>,
}

struct TapeState {
    mode: TraceMode,
    entries: Vec<TraceEntry>,
    cursor: usize,
    next_id: u64,
}

/// The trace tape shared by a [`TraceHandler`](crate::TraceHandler) and the
/// code driving trace and replay regions.
pub struct TraceTape {
    state: Mutex<TapeState>,
    capacity: Option<usize>,
}

impl TraceTape {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            state: Mutex::new(TapeState {
                mode: TraceMode::Record,
                entries: Vec::new(),
                cursor: 0,
                next_id: 1,
            }),
            capacity,
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.max_trace_entries)
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn mode(&self) -> TraceMode {
        self.state.lock().mode
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Position of the next expected entry while replaying.
    pub fn cursor(&self) -> usize {
        self.state.lock().cursor
    }

    pub fn entries(&self) -> Vec<TraceEntry> {
        self.state.lock().entries.clone()
    }

    pub fn snapshot(&self) -> TapeSnapshot {
        let state = self.state.lock();
        TapeSnapshot {
            mode: state.mode,
            cursor: state.cursor,
            entries: state.entries.clone(),
        }
    }

    /// Clears the recording and returns to record mode.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.mode = TraceMode::Record;
        state.entries.clear();
        state.cursor = 0;
        state.next_id = 1;
    }

    /// Switches to replay mode with the cursor at the first entry.
    pub fn start_replay(&self) {
        let mut state = self.state.lock();
        state.mode = TraceMode::Replay;
        state.cursor = 0;
        tracing::debug!(entries = state.entries.len(), "trace replay started");
    }

    /// Ends a replay run. Fails if fewer calls were made than recorded.
    pub fn finish_replay(&self) -> Result<()> {
        let mut state = self.state.lock();
        let (cursor, len) = (state.cursor, state.entries.len());
        state.cursor = 0;
        if cursor != len {
            return Err(KilnError::TraceMismatch {
                step: cursor,
                expected: state.entries[cursor].to_string(),
                got: "end of trace".into(),
            });
        }
        Ok(())
    }

    /// Records or verifies one call according to the current mode, returning
    /// the mode used and the ids for the call's outputs.
    pub fn step(
        &self,
        op: &str,
        inputs: &[Option<u64>],
        num_outputs: usize,
        backward: bool,
    ) -> Result<(TraceMode, TraceIds)> {
        let mut state = self.state.lock();
        let mode = state.mode;
        let ids = match mode {
            TraceMode::Record => self.record(&mut state, op, inputs, num_outputs, backward)?,
            TraceMode::Replay => Self::replay(&mut state, op, inputs, num_outputs, backward)?,
        };
        Ok((mode, ids))
    }

    fn record(
        &self,
        state: &mut TapeState,
        op: &str,
        inputs: &[Option<u64>],
        num_outputs: usize,
        backward: bool,
    ) -> Result<TraceIds> {
        if let Some(cap) = self.capacity {
            if state.entries.len() >= cap {
                return Err(KilnError::Backend(format!(
                    "trace tape is full ({cap} entries)"
                )));
            }
        }
        let first = state.next_id;
        state.next_id += num_outputs as u64;
        let ids: TraceIds = (first..state.next_id).collect();
        state.entries.push(TraceEntry {
            op: op.to_string(),
            inputs: inputs.to_vec(),
            outputs: ids.to_vec(),
            backward,
        });
        Ok(ids)
    }

    fn replay(
        state: &mut TapeState,
        op: &str,
        inputs: &[Option<u64>],
        num_outputs: usize,
        backward: bool,
    ) -> Result<TraceIds> {
        let step = state.cursor;
        let got = TraceEntry {
            op: op.to_string(),
            inputs: inputs.to_vec(),
            outputs: Vec::new(),
            backward,
        };
        let Some(expected) = state.entries.get(step) else {
            return Err(KilnError::TraceMismatch {
                step,
                expected: "end of trace".into(),
                got: got.to_string(),
            });
        };
        let matches = expected.op == got.op
            && expected.inputs == got.inputs
            && expected.backward == got.backward
            && expected.outputs.len() == num_outputs;
        if !matches {
            return Err(KilnError::TraceMismatch {
                step,
                expected: expected.to_string(),
                got: got.to_string(),
            });
        }
        let ids = expected.outputs.iter().copied().collect();
        state.cursor += 1;
        Ok(ids)
    }
}

impl Default for TraceTape {
    fn default() -> Self {
        Self::new(None)
    }
}

impl fmt::Debug for TraceTape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TraceTape")
            .field("mode", &state.mode)
            .field("entries", &state.entries.len())
            .field("cursor", &state.cursor)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_assigns_fresh_ids() {
        let tape = TraceTape::default();
        let (mode, a) = tape.step("MUL", &[None, None], 1, false).unwrap();
        assert_eq!(mode, TraceMode::Record);
        let (_, b) = tape.step("RELU", &[Some(a[0])], 1, false).unwrap();
        assert_eq!(a.as_slice(), &[1]);
        assert_eq!(b.as_slice(), &[2]);
        assert_eq!(tape.len(), 2);
        assert_eq!(tape.entries()[1].to_string(), "RELU(%1) -> (%2)");
    }

    #[test]
    fn test_replay_returns_recorded_ids() {
        let tape = TraceTape::default();
        tape.step("NEGATE", &[None], 1, false).unwrap();
        tape.step("ADD", &[Some(1), None], 1, true).unwrap();

        tape.start_replay();
        let (mode, ids) = tape.step("NEGATE", &[None], 1, false).unwrap();
        assert_eq!(mode, TraceMode::Replay);
        assert_eq!(ids.as_slice(), &[1]);
        assert_eq!(tape.cursor(), 1);
        tape.step("ADD", &[Some(1), None], 1, true).unwrap();
        tape.finish_replay().unwrap();
        assert_eq!(tape.cursor(), 0);
    }

    #[test]
    fn test_replay_divergence() {
        let tape = TraceTape::default();
        tape.step("NEGATE", &[None], 1, false).unwrap();
        tape.start_replay();

        let err = tape.step("RELU", &[None], 1, false).unwrap_err();
        match err {
            KilnError::TraceMismatch { step, expected, got } => {
                assert_eq!(step, 0);
                assert_eq!(expected, "NEGATE(_) -> (%1)");
                assert_eq!(got, "RELU(_) -> ()");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_replay_too_many_and_too_few() {
        let tape = TraceTape::default();
        tape.step("NEGATE", &[None], 1, false).unwrap();
        tape.step("NEGATE", &[Some(1)], 1, false).unwrap();

        tape.start_replay();
        tape.step("NEGATE", &[None], 1, false).unwrap();
        assert!(matches!(
            tape.finish_replay(),
            Err(KilnError::TraceMismatch { step: 1, .. })
        ));

        tape.start_replay();
        tape.step("NEGATE", &[None], 1, false).unwrap();
        tape.step("NEGATE", &[Some(1)], 1, false).unwrap();
        assert!(tape.step("NEGATE", &[Some(2)], 1, false).is_err());
    }

    #[test]
    fn test_capacity() {
        let tape = TraceTape::from_config(&RuntimeConfig {
            max_trace_entries: Some(1),
            ..RuntimeConfig::default()
        });
        tape.step("ADD", &[], 1, false).unwrap();
        assert!(matches!(
            tape.step("ADD", &[], 1, false),
            Err(KilnError::Backend(_))
        ));
        tape.reset();
        assert!(tape.is_empty());
        assert!(tape.step("ADD", &[], 1, false).is_ok());
    }
}
