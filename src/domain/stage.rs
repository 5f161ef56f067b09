//! Approval stages and the legal moves between them.
//!
//! ```text
//! llm_extracted ──► llm_approved ──► user_approved
//!       │                │                 │
//!       └────────────────┴─────────────────┴──► user_rejected
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AnnotationError;

/// Review stage of an annotation version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStage {
    /// Proposed by the reasoner, nobody has looked at it yet
    LlmExtracted,
    /// Confirmed by the automated secondary review
    LlmApproved,
    /// Confirmed by a human reviewer (terminal)
    UserApproved,
    /// Rejected by a human reviewer (terminal)
    UserRejected,
}

impl ApprovalStage {
    pub const ALL: [ApprovalStage; 4] = [
        ApprovalStage::LlmExtracted,
        ApprovalStage::LlmApproved,
        ApprovalStage::UserApproved,
        ApprovalStage::UserRejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStage::LlmExtracted => "llm_extracted",
            ApprovalStage::LlmApproved => "llm_approved",
            ApprovalStage::UserApproved => "user_approved",
            ApprovalStage::UserRejected => "user_rejected",
        }
    }

    /// Stages reachable from this one in a single step
    pub fn allowed_transitions(&self) -> &'static [ApprovalStage] {
        match self {
            ApprovalStage::LlmExtracted => &[ApprovalStage::LlmApproved, ApprovalStage::UserRejected],
            ApprovalStage::LlmApproved => &[ApprovalStage::UserApproved, ApprovalStage::UserRejected],
            ApprovalStage::UserApproved => &[ApprovalStage::UserRejected],
            ApprovalStage::UserRejected => &[],
        }
    }

    pub fn can_transition_to(&self, next: ApprovalStage) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ApprovalStage::UserApproved | ApprovalStage::UserRejected)
    }
}

impl fmt::Display for ApprovalStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "llm_extracted" => Ok(ApprovalStage::LlmExtracted),
            "llm_approved" => Ok(ApprovalStage::LlmApproved),
            "user_approved" => Ok(ApprovalStage::UserApproved),
            "user_rejected" => Ok(ApprovalStage::UserRejected),
            other => Err(format!("unknown approval stage: {}", other)),
        }
    }
}

/// Check a stage change, returning the typed error on an illegal move
pub fn validate_transition(from: ApprovalStage, to: ApprovalStage) -> Result<(), AnnotationError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(AnnotationError::InvalidTransition { from, to })
    }
}

/// Human validation outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl ValidationStatus {
    pub const ALL: [ValidationStatus; 3] = [
        ValidationStatus::Pending,
        ValidationStatus::Approved,
        ValidationStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Pending => "pending",
            ValidationStatus::Approved => "approved",
            ValidationStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ValidationStatus::Pending),
            "approved" => Ok(ValidationStatus::Approved),
            "rejected" => Ok(ValidationStatus::Rejected),
            other => Err(format!("unknown validation status: {}", other)),
        }
    }
}
