use librarian_core::Record;
use serde::Serialize;

use crate::similarity::Suspect;

/// Which layer of the pipeline identified the duplicate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "layer", rename_all = "snake_case")]
pub enum MatchReason {
    UniqueId,
    NormalizedTitle,
    Semantic { score: f64 },
    Arbitrated { explanation: String },
}

/// Outcome of evaluating one candidate against the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// Novel; safe to persist.
    Accept,
    /// Duplicate of `existing`.
    Reject { existing: Record, reason: MatchReason },
    /// Lexically close to `suspect` and the oracle could not settle it.
    Escalate { suspect: Suspect, explanation: String },
}

impl Decision {
    pub fn is_escalation(&self) -> bool {
        matches!(self, Self::Escalate { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Accept => "ACCEPT",
            Self::Reject { .. } => "REJECT",
            Self::Escalate { .. } => "ESCALATE",
        }
    }
}
