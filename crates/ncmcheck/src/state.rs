//! Lifecycle states for batches and records.
//!
//! Both enums are persisted as upper-case strings. Unknown strings do not
//! parse; callers surface them as row decoding errors.

use serde::{Deserialize, Serialize};

/// State of a batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchState {
    Pending,
    Processing,
    Concluded,
    FailedPartial,
    Failed,
}

impl BatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Pending => "PENDING",
            BatchState::Processing => "PROCESSING",
            BatchState::Concluded => "CONCLUDED",
            BatchState::FailedPartial => "FAILED_PARTIAL",
            BatchState::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(BatchState::Pending),
            "PROCESSING" => Some(BatchState::Processing),
            "CONCLUDED" => Some(BatchState::Concluded),
            "FAILED_PARTIAL" => Some(BatchState::FailedPartial),
            "FAILED" => Some(BatchState::Failed),
            _ => None,
        }
    }

    /// Polling clients stop on any terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchState::Concluded | BatchState::FailedPartial | BatchState::Failed
        )
    }

    /// Returns true if moving from `self` to `next` is a legal transition.
    ///
    /// `PENDING -> FAILED` covers a run that cannot load the batch's records,
    /// `PENDING -> CONCLUDED` covers an empty batch. Re-entering PROCESSING
    /// from PROCESSING is allowed so that a recovered run can resume.
    pub fn can_transition_to(&self, next: BatchState) -> bool {
        use BatchState::*;
        match (self, next) {
            (Pending, Processing) | (Pending, Failed) | (Pending, Concluded) => true,
            (Processing, Processing)
            | (Processing, Concluded)
            | (Processing, FailedPartial)
            | (Processing, Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for BatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation state of a single record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordState {
    Pending,
    Valid,
    Divergent,
    Failed,
}

impl RecordState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordState::Pending => "PENDING",
            RecordState::Valid => "VALID",
            RecordState::Divergent => "DIVERGENT",
            RecordState::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(RecordState::Pending),
            "VALID" => Some(RecordState::Valid),
            "DIVERGENT" => Some(RecordState::Divergent),
            "FAILED" => Some(RecordState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RecordState::Pending)
    }

    /// Records are validated once; every terminal state is final.
    pub fn can_transition_to(&self, next: RecordState) -> bool {
        matches!(self, RecordState::Pending) && next.is_terminal()
    }
}

impl std::fmt::Display for RecordState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_BATCH: [BatchState; 5] = [
        BatchState::Pending,
        BatchState::Processing,
        BatchState::Concluded,
        BatchState::FailedPartial,
        BatchState::Failed,
    ];

    const ALL_RECORD: [RecordState; 4] = [
        RecordState::Pending,
        RecordState::Valid,
        RecordState::Divergent,
        RecordState::Failed,
    ];

    #[test]
    fn test_batch_state_string_form() {
        for state in ALL_BATCH {
            assert_eq!(BatchState::parse(state.as_str()), Some(state));
        }
        assert_eq!(BatchState::parse("processing"), None);
        assert_eq!(BatchState::parse("ERRO"), None);
    }

    #[test]
    fn test_record_state_string_form() {
        for state in ALL_RECORD {
            assert_eq!(RecordState::parse(state.as_str()), Some(state));
        }
        assert_eq!(RecordState::parse("DIVERGENTE"), None);
    }

    #[test]
    fn test_batch_terminal_states_are_final() {
        for from in ALL_BATCH.iter().filter(|s| s.is_terminal()) {
            for to in ALL_BATCH {
                assert!(
                    !from.can_transition_to(to),
                    "{} -> {} must be rejected",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_batch_happy_path_transitions() {
        assert!(BatchState::Pending.can_transition_to(BatchState::Processing));
        assert!(BatchState::Processing.can_transition_to(BatchState::Processing));
        assert!(BatchState::Processing.can_transition_to(BatchState::Concluded));
        assert!(BatchState::Processing.can_transition_to(BatchState::FailedPartial));
        assert!(BatchState::Processing.can_transition_to(BatchState::Failed));
        assert!(!BatchState::Processing.can_transition_to(BatchState::Pending));
        assert!(!BatchState::Pending.can_transition_to(BatchState::FailedPartial));
    }

    #[test]
    fn test_record_transitions() {
        assert!(RecordState::Pending.can_transition_to(RecordState::Valid));
        assert!(RecordState::Pending.can_transition_to(RecordState::Divergent));
        assert!(RecordState::Pending.can_transition_to(RecordState::Failed));
        assert!(!RecordState::Pending.can_transition_to(RecordState::Pending));
        for from in ALL_RECORD.iter().filter(|s| s.is_terminal()) {
            for to in ALL_RECORD {
                assert!(!from.can_transition_to(to));
            }
        }
    }

    #[test]
    fn test_serde_uses_persisted_names() {
        let json = serde_json::to_string(&BatchState::FailedPartial).unwrap();
        assert_eq!(json, "\"FAILED_PARTIAL\"");
        let state: RecordState = serde_json::from_str("\"DIVERGENT\"").unwrap();
        assert_eq!(state, RecordState::Divergent);
    }
}
