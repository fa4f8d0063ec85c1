use serde::{Deserialize, Serialize};

use procura_auth::ApproverRole;
use procura_core::DomainError;

/// Purchase order priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Purchase order lifecycle.
///
/// ```text
/// DRAFT → PENDING_CATEGORY_HEAD → PENDING_ADMIN → PENDING_CREATOR_REVIEW → APPROVED
///                  └──────────────────┴───────────────┴──→ REJECTED | CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseOrderStatus {
    Draft,
    PendingCategoryHead,
    PendingAdmin,
    PendingCreatorReview,
    Approved,
    Rejected,
    Cancelled,
}

impl PurchaseOrderStatus {
    /// Transition table. Anything not listed here is illegal.
    pub const fn allowed_transitions(self) -> &'static [PurchaseOrderStatus] {
        use PurchaseOrderStatus::*;
        match self {
            Draft => &[PendingCategoryHead],
            PendingCategoryHead => &[PendingAdmin, Rejected, Cancelled],
            PendingAdmin => &[PendingCreatorReview, Rejected, Cancelled],
            PendingCreatorReview => &[Approved, Rejected, Cancelled],
            Approved | Rejected | Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, next: PurchaseOrderStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    /// Checked transition.
    pub fn transition_to(
        self,
        next: PurchaseOrderStatus,
    ) -> Result<PurchaseOrderStatus, DomainError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(DomainError::invalid_state(format!(
                "illegal transition {self} -> {next}"
            )))
        }
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }

    pub fn is_pending(self) -> bool {
        self.awaiting_role().is_some()
    }

    /// Role whose decision this state waits for.
    pub fn awaiting_role(self) -> Option<ApproverRole> {
        match self {
            PurchaseOrderStatus::PendingCategoryHead => Some(ApproverRole::CategoryHead),
            PurchaseOrderStatus::PendingAdmin => Some(ApproverRole::Admin),
            PurchaseOrderStatus::PendingCreatorReview => Some(ApproverRole::Creator),
            _ => None,
        }
    }

    /// Pending state in which `role` is expected to decide.
    pub fn pending_for(role: ApproverRole) -> PurchaseOrderStatus {
        match role {
            ApproverRole::CategoryHead => PurchaseOrderStatus::PendingCategoryHead,
            ApproverRole::Admin => PurchaseOrderStatus::PendingAdmin,
            ApproverRole::Creator => PurchaseOrderStatus::PendingCreatorReview,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PurchaseOrderStatus::Draft => "DRAFT",
            PurchaseOrderStatus::PendingCategoryHead => "PENDING_CATEGORY_HEAD",
            PurchaseOrderStatus::PendingAdmin => "PENDING_ADMIN",
            PurchaseOrderStatus::PendingCreatorReview => "PENDING_CREATOR_REVIEW",
            PurchaseOrderStatus::Approved => "APPROVED",
            PurchaseOrderStatus::Rejected => "REJECTED",
            PurchaseOrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl core::fmt::Display for PurchaseOrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PurchaseOrderStatus::*;

    const ALL: [PurchaseOrderStatus; 7] = [
        Draft,
        PendingCategoryHead,
        PendingAdmin,
        PendingCreatorReview,
        Approved,
        Rejected,
        Cancelled,
    ];

    #[test]
    fn terminal_states_have_no_exits() {
        for s in [Approved, Rejected, Cancelled] {
            assert!(s.is_terminal());
            for next in ALL {
                assert!(s.transition_to(next).is_err());
            }
        }
    }

    #[test]
    fn every_pending_state_can_reject_or_cancel() {
        for s in ALL.into_iter().filter(|s| s.is_pending()) {
            assert!(s.can_transition_to(Rejected));
            assert!(s.can_transition_to(Cancelled));
        }
        assert!(!Draft.can_transition_to(Rejected));
    }

    #[test]
    fn pending_state_round_trips_through_role() {
        for s in ALL.into_iter().filter(|s| s.is_pending()) {
            let role = s.awaiting_role().unwrap();
            assert_eq!(PurchaseOrderStatus::pending_for(role), s);
        }
    }

    #[test]
    fn skipping_a_stage_is_illegal() {
        let err = PendingCategoryHead.transition_to(Approved).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn serializes_screaming_snake_case() {
        let json = serde_json::to_string(&PendingCreatorReview).unwrap();
        assert_eq!(json, "\"PENDING_CREATOR_REVIEW\"");
    }
}
