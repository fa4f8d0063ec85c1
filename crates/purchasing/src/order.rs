use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use procura_auth::{ApprovalChain, ApproverRole};
use procura_core::{
    Aggregate, AggregateId, AggregateRoot, CatalogItemId, DomainError, FacilityId, UserId,
    VendorId,
};
use procura_events::Event;

use crate::line::{NewPoLine, PoLine, build_lines};
use crate::sequence::PoCode;
use crate::status::{Priority, PurchaseOrderStatus};

/// Purchase order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseOrderId(pub AggregateId);

impl PurchaseOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl From<PurchaseOrderId> for AggregateId {
    fn from(value: PurchaseOrderId) -> Self {
        value.0
    }
}

impl core::fmt::Display for PurchaseOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// State of one role's approval record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalAction {
    Pending,
    Approved,
    Rejected,
}

/// Decision an approver can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approved,
    Rejected,
}

impl From<Decision> for ApprovalAction {
    fn from(value: Decision) -> Self {
        match value {
            Decision::Approved => ApprovalAction::Approved,
            Decision::Rejected => ApprovalAction::Rejected,
        }
    }
}

/// One record per (purchase order, role), created pending with the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub role: ApproverRole,
    pub action: ApprovalAction,
    pub comments: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<UserId>,
}

impl ApprovalRecord {
    fn pending(role: ApproverRole) -> Self {
        Self {
            role,
            action: ApprovalAction::Pending,
            comments: None,
            decided_at: None,
            decided_by: None,
        }
    }
}

/// The single post-submission edit of a purchase order, kept beside the original.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditProposal {
    pub proposal_id: Uuid,
    pub lines: Vec<PoLine>,
    pub total_amount: i64,
    pub proposed_by: UserId,
    pub proposed_at: DateTime<Utc>,
}

/// Aggregate root: PurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOrder {
    id: PurchaseOrderId,
    code: Option<PoCode>,
    vendor_id: Option<VendorId>,
    facility_id: Option<FacilityId>,
    priority: Priority,
    status: PurchaseOrderStatus,
    lines: Vec<PoLine>,
    total_amount: i64,
    approvals: Vec<ApprovalRecord>,
    edited: bool,
    edit_proposal: Option<EditProposal>,
    created_by: Option<UserId>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
    deleted: bool,
}

impl PurchaseOrder {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PurchaseOrderId) -> Self {
        Self {
            id,
            code: None,
            vendor_id: None,
            facility_id: None,
            priority: Priority::Normal,
            status: PurchaseOrderStatus::Draft,
            lines: Vec::new(),
            total_amount: 0,
            approvals: Vec::new(),
            edited: false,
            edit_proposal: None,
            created_by: None,
            created_at: None,
            updated_at: None,
            version: 0,
            created: false,
            deleted: false,
        }
    }

    pub fn id_typed(&self) -> PurchaseOrderId {
        self.id
    }

    /// Created and not deleted.
    pub fn exists(&self) -> bool {
        self.created && !self.deleted
    }

    pub fn code(&self) -> Option<&PoCode> {
        self.code.as_ref()
    }

    pub fn vendor_id(&self) -> Option<VendorId> {
        self.vendor_id
    }

    pub fn facility_id(&self) -> Option<FacilityId> {
        self.facility_id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn status(&self) -> PurchaseOrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[PoLine] {
        &self.lines
    }

    pub fn total_amount(&self) -> i64 {
        self.total_amount
    }

    pub fn approvals(&self) -> &[ApprovalRecord] {
        &self.approvals
    }

    pub fn approval(&self, role: ApproverRole) -> Option<&ApprovalRecord> {
        self.approvals.iter().find(|r| r.role == role)
    }

    pub fn is_edited(&self) -> bool {
        self.edited
    }

    pub fn edit_proposal(&self) -> Option<&EditProposal> {
        self.edit_proposal.as_ref()
    }

    pub fn created_by(&self) -> Option<UserId> {
        self.created_by
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Ordered quantity of a catalog item, summed over every matrix row carrying it.
    pub fn ordered_quantity(&self, catalog_item: CatalogItemId) -> i64 {
        self.lines
            .iter()
            .filter(|l| l.catalog_item == catalog_item)
            .map(|l| l.quantity)
            .sum()
    }

    /// Ordered quantity per catalog item, in first-appearance order.
    pub fn quantities_by_item(&self) -> Vec<(CatalogItemId, i64)> {
        let mut out: Vec<(CatalogItemId, i64)> = Vec::new();
        for line in &self.lines {
            match out.iter_mut().find(|(item, _)| *item == line.catalog_item) {
                Some((_, qty)) => *qty += line.quantity,
                None => out.push((line.catalog_item, line.quantity)),
            }
        }
        out
    }
}

impl AggregateRoot for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreatePurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePurchaseOrder {
    pub order_id: PurchaseOrderId,
    pub code: PoCode,
    pub vendor_id: VendorId,
    pub facility_id: FacilityId,
    pub priority: Priority,
    pub lines: Vec<NewPoLine>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateDraft (replace lines and priority; DRAFT only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDraft {
    pub order_id: PurchaseOrderId,
    pub priority: Priority,
    pub lines: Vec<NewPoLine>,
    pub updated_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteDraft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteDraft {
    pub order_id: PurchaseOrderId,
    pub deleted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SubmitForApproval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitForApproval {
    pub order_id: PurchaseOrderId,
    pub submitted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordDecision (issued after the role's token was validated).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDecision {
    pub order_id: PurchaseOrderId,
    pub role: ApproverRole,
    pub decision: Decision,
    pub comments: Option<String>,
    pub decided_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ProposeEdit (the once-only edit of a submitted order).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposeEdit {
    pub order_id: PurchaseOrderId,
    pub proposal_id: Uuid,
    pub lines: Vec<NewPoLine>,
    pub proposed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Cancel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancel {
    pub order_id: PurchaseOrderId,
    pub reason: Option<String>,
    pub cancelled_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderCommand {
    CreatePurchaseOrder(CreatePurchaseOrder),
    UpdateDraft(UpdateDraft),
    DeleteDraft(DeleteDraft),
    SubmitForApproval(SubmitForApproval),
    RecordDecision(RecordDecision),
    ProposeEdit(ProposeEdit),
    Cancel(Cancel),
}

/// Event: PurchaseOrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCreated {
    pub order_id: PurchaseOrderId,
    pub code: PoCode,
    pub vendor_id: VendorId,
    pub facility_id: FacilityId,
    pub priority: Priority,
    pub lines: Vec<PoLine>,
    pub total_amount: i64,
    pub approval_roles: Vec<ApproverRole>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DraftUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftUpdated {
    pub order_id: PurchaseOrderId,
    pub priority: Priority,
    pub lines: Vec<PoLine>,
    pub total_amount: i64,
    pub updated_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DraftDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftDeleted {
    pub order_id: PurchaseOrderId,
    pub deleted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SubmittedForApproval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedForApproval {
    pub order_id: PurchaseOrderId,
    pub status: PurchaseOrderStatus,
    pub awaiting: ApproverRole,
    pub submitted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ApprovalDecided. `status` is the order status after the decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecided {
    pub order_id: PurchaseOrderId,
    pub role: ApproverRole,
    pub decision: Decision,
    pub comments: Option<String>,
    pub decided_by: Option<UserId>,
    pub previous_status: PurchaseOrderStatus,
    pub status: PurchaseOrderStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: EditProposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditProposed {
    pub order_id: PurchaseOrderId,
    pub proposal: EditProposal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCancelled {
    pub order_id: PurchaseOrderId,
    pub previous_status: PurchaseOrderStatus,
    pub reason: Option<String>,
    pub cancelled_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderEvent {
    PurchaseOrderCreated(PurchaseOrderCreated),
    DraftUpdated(DraftUpdated),
    DraftDeleted(DraftDeleted),
    SubmittedForApproval(SubmittedForApproval),
    ApprovalDecided(ApprovalDecided),
    EditProposed(EditProposed),
    PurchaseOrderCancelled(PurchaseOrderCancelled),
}

impl Event for PurchaseOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(_) => "purchasing.order.created",
            PurchaseOrderEvent::DraftUpdated(_) => "purchasing.order.draft_updated",
            PurchaseOrderEvent::DraftDeleted(_) => "purchasing.order.draft_deleted",
            PurchaseOrderEvent::SubmittedForApproval(_) => "purchasing.order.submitted",
            PurchaseOrderEvent::ApprovalDecided(_) => "purchasing.order.approval_decided",
            PurchaseOrderEvent::EditProposed(_) => "purchasing.order.edit_proposed",
            PurchaseOrderEvent::PurchaseOrderCancelled(_) => "purchasing.order.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => e.occurred_at,
            PurchaseOrderEvent::DraftUpdated(e) => e.occurred_at,
            PurchaseOrderEvent::DraftDeleted(e) => e.occurred_at,
            PurchaseOrderEvent::SubmittedForApproval(e) => e.occurred_at,
            PurchaseOrderEvent::ApprovalDecided(e) => e.occurred_at,
            PurchaseOrderEvent::EditProposed(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PurchaseOrder {
    type Command = PurchaseOrderCommand;
    type Event = PurchaseOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => {
                self.id = e.order_id;
                self.code = Some(e.code.clone());
                self.vendor_id = Some(e.vendor_id);
                self.facility_id = Some(e.facility_id);
                self.priority = e.priority;
                self.status = PurchaseOrderStatus::Draft;
                self.lines = e.lines.clone();
                self.total_amount = e.total_amount;
                self.approvals = e
                    .approval_roles
                    .iter()
                    .copied()
                    .map(ApprovalRecord::pending)
                    .collect();
                self.created_by = Some(e.created_by);
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            PurchaseOrderEvent::DraftUpdated(e) => {
                self.priority = e.priority;
                self.lines = e.lines.clone();
                self.total_amount = e.total_amount;
            }
            PurchaseOrderEvent::DraftDeleted(_) => {
                self.deleted = true;
            }
            PurchaseOrderEvent::SubmittedForApproval(e) => {
                self.status = e.status;
            }
            PurchaseOrderEvent::ApprovalDecided(e) => {
                if let Some(record) = self.approvals.iter_mut().find(|r| r.role == e.role) {
                    record.action = e.decision.into();
                    record.comments = e.comments.clone();
                    record.decided_at = Some(e.occurred_at);
                    record.decided_by = e.decided_by;
                }
                self.status = e.status;
            }
            PurchaseOrderEvent::EditProposed(e) => {
                self.edited = true;
                self.edit_proposal = Some(e.proposal.clone());
            }
            PurchaseOrderEvent::PurchaseOrderCancelled(_) => {
                self.status = PurchaseOrderStatus::Cancelled;
            }
        }

        self.updated_at = Some(event.occurred_at());
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PurchaseOrderCommand::CreatePurchaseOrder(cmd) => self.handle_create(cmd),
            PurchaseOrderCommand::UpdateDraft(cmd) => self.handle_update_draft(cmd),
            PurchaseOrderCommand::DeleteDraft(cmd) => self.handle_delete_draft(cmd),
            PurchaseOrderCommand::SubmitForApproval(cmd) => self.handle_submit(cmd),
            PurchaseOrderCommand::RecordDecision(cmd) => self.handle_decision(cmd),
            PurchaseOrderCommand::ProposeEdit(cmd) => self.handle_propose_edit(cmd),
            PurchaseOrderCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl PurchaseOrder {
    fn ensure_exists(&self, order_id: PurchaseOrderId) -> Result<(), DomainError> {
        if !self.exists() {
            return Err(DomainError::not_found());
        }
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_draft(&self, what: &str) -> Result<(), DomainError> {
        if self.status != PurchaseOrderStatus::Draft {
            return Err(DomainError::invalid_state(format!(
                "only draft purchase orders can be {what} (status: {})",
                self.status
            )));
        }
        Ok(())
    }

    fn handle_create(
        &self,
        cmd: &CreatePurchaseOrder,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("purchase order already exists"));
        }
        let (lines, total_amount) = build_lines(&cmd.lines)?;

        Ok(vec![PurchaseOrderEvent::PurchaseOrderCreated(
            PurchaseOrderCreated {
                order_id: cmd.order_id,
                code: cmd.code.clone(),
                vendor_id: cmd.vendor_id,
                facility_id: cmd.facility_id,
                priority: cmd.priority,
                lines,
                total_amount,
                approval_roles: ApproverRole::ALL.to_vec(),
                created_by: cmd.created_by,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_update_draft(
        &self,
        cmd: &UpdateDraft,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        self.ensure_draft("updated")?;
        let (lines, total_amount) = build_lines(&cmd.lines)?;

        Ok(vec![PurchaseOrderEvent::DraftUpdated(DraftUpdated {
            order_id: cmd.order_id,
            priority: cmd.priority,
            lines,
            total_amount,
            updated_by: cmd.updated_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete_draft(
        &self,
        cmd: &DeleteDraft,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        self.ensure_draft("deleted")?;

        Ok(vec![PurchaseOrderEvent::DraftDeleted(DraftDeleted {
            order_id: cmd.order_id,
            deleted_by: cmd.deleted_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_submit(
        &self,
        cmd: &SubmitForApproval,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        self.ensure_draft("submitted for approval")?;
        if self.lines.is_empty() {
            return Err(DomainError::validation(
                "cannot submit purchase order without lines",
            ));
        }

        let awaiting = ApprovalChain::STANDARD.first();
        let status = self
            .status
            .transition_to(PurchaseOrderStatus::pending_for(awaiting))?;

        Ok(vec![PurchaseOrderEvent::SubmittedForApproval(
            SubmittedForApproval {
                order_id: cmd.order_id,
                status,
                awaiting,
                submitted_by: cmd.submitted_by,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_decision(
        &self,
        cmd: &RecordDecision,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;

        let record = self.approval(cmd.role).ok_or_else(|| {
            DomainError::invariant(format!("no approval record for role {}", cmd.role))
        })?;
        // Replays are detected before the state check so a reused token always
        // reports the same failure.
        if record.action != ApprovalAction::Pending {
            return Err(DomainError::already_decided(format!(
                "{} already recorded {:?} on this purchase order",
                cmd.role, record.action
            )));
        }

        if self.status.awaiting_role() != Some(cmd.role) {
            return Err(DomainError::invalid_state(format!(
                "purchase order is {} and not awaiting {}",
                self.status, cmd.role
            )));
        }

        let target = match cmd.decision {
            Decision::Rejected => PurchaseOrderStatus::Rejected,
            Decision::Approved => match ApprovalChain::STANDARD.next_after(cmd.role) {
                Some(next) => PurchaseOrderStatus::pending_for(next),
                None => PurchaseOrderStatus::Approved,
            },
        };
        let status = self.status.transition_to(target)?;

        Ok(vec![PurchaseOrderEvent::ApprovalDecided(ApprovalDecided {
            order_id: cmd.order_id,
            role: cmd.role,
            decision: cmd.decision,
            comments: cmd.comments.clone(),
            decided_by: cmd.decided_by,
            previous_status: self.status,
            status,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_propose_edit(
        &self,
        cmd: &ProposeEdit,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        if self.edited {
            return Err(DomainError::AlreadyEdited);
        }
        match self.status {
            PurchaseOrderStatus::Draft => {
                return Err(DomainError::invalid_state(
                    "draft purchase orders are updated directly",
                ));
            }
            PurchaseOrderStatus::Rejected | PurchaseOrderStatus::Cancelled => {
                return Err(DomainError::invalid_state(format!(
                    "cannot edit a {} purchase order",
                    self.status
                )));
            }
            _ => {}
        }

        let (lines, total_amount) = build_lines(&cmd.lines)?;
        Ok(vec![PurchaseOrderEvent::EditProposed(EditProposed {
            order_id: cmd.order_id,
            proposal: EditProposal {
                proposal_id: cmd.proposal_id,
                lines,
                total_amount,
                proposed_by: cmd.proposed_by,
                proposed_at: cmd.occurred_at,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &Cancel) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        self.status.transition_to(PurchaseOrderStatus::Cancelled)?;

        Ok(vec![PurchaseOrderEvent::PurchaseOrderCancelled(
            PurchaseOrderCancelled {
                order_id: cmd.order_id,
                previous_status: self.status,
                reason: cmd.reason.clone(),
                cancelled_by: cmd.cancelled_by,
                occurred_at: cmd.occurred_at,
            },
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line::{CatalogSnapshot, Dimensions};
    use procura_events::execute;

    fn test_order_id() -> PurchaseOrderId {
        PurchaseOrderId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn line(item: u64, quantity: i64) -> NewPoLine {
        NewPoLine {
            catalog_item: CatalogItemId(item),
            quantity,
            unit_price: None,
            snapshot: CatalogSnapshot {
                unit_price: 250,
                tax_code: "GST5".to_string(),
                weight_grams: 500,
                dimensions: Dimensions::default(),
                mrp: 400,
            },
        }
    }

    fn created(lines: Vec<NewPoLine>) -> PurchaseOrder {
        let order_id = test_order_id();
        let mut order = PurchaseOrder::empty(order_id);
        execute(
            &mut order,
            &PurchaseOrderCommand::CreatePurchaseOrder(CreatePurchaseOrder {
                order_id,
                code: PoCode::new("PO", 1),
                vendor_id: VendorId::new(),
                facility_id: FacilityId::new(),
                priority: Priority::High,
                lines,
                created_by: UserId::new(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        order
    }

    fn submitted() -> PurchaseOrder {
        let mut order = created(vec![line(7, 100)]);
        let order_id = order.id_typed();
        execute(
            &mut order,
            &PurchaseOrderCommand::SubmitForApproval(SubmitForApproval {
                order_id,
                submitted_by: UserId::new(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        order
    }

    fn decide(
        order: &mut PurchaseOrder,
        role: ApproverRole,
        decision: Decision,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        let order_id = order.id_typed();
        execute(
            order,
            &PurchaseOrderCommand::RecordDecision(RecordDecision {
                order_id,
                role,
                decision,
                comments: Some("ok".to_string()),
                decided_by: None,
                occurred_at: test_time(),
            }),
        )
    }

    #[test]
    fn create_snapshots_lines_and_initializes_approvals() {
        let order = created(vec![line(7, 4), line(7, 6), line(9, 1)]);

        assert_eq!(order.status(), PurchaseOrderStatus::Draft);
        assert_eq!(order.total_amount(), 11 * 250);
        assert_eq!(order.ordered_quantity(CatalogItemId(7)), 10);
        assert_eq!(
            order.quantities_by_item(),
            vec![(CatalogItemId(7), 10), (CatalogItemId(9), 1)]
        );
        assert_eq!(order.approvals().len(), 3);
        assert!(order
            .approvals()
            .iter()
            .all(|r| r.action == ApprovalAction::Pending));
        assert_eq!(order.version(), 1);
    }

    #[test]
    fn create_twice_conflicts() {
        let order = created(vec![line(1, 1)]);
        let err = order
            .handle(&PurchaseOrderCommand::CreatePurchaseOrder(CreatePurchaseOrder {
                order_id: order.id_typed(),
                code: PoCode::new("PO", 2),
                vendor_id: VendorId::new(),
                facility_id: FacilityId::new(),
                priority: Priority::Normal,
                lines: vec![line(1, 1)],
                created_by: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn full_chain_reaches_approved() {
        let mut order = submitted();
        assert_eq!(order.status(), PurchaseOrderStatus::PendingCategoryHead);

        decide(&mut order, ApproverRole::CategoryHead, Decision::Approved).unwrap();
        assert_eq!(order.status(), PurchaseOrderStatus::PendingAdmin);

        decide(&mut order, ApproverRole::Admin, Decision::Approved).unwrap();
        assert_eq!(order.status(), PurchaseOrderStatus::PendingCreatorReview);

        decide(&mut order, ApproverRole::Creator, Decision::Approved).unwrap();
        assert_eq!(order.status(), PurchaseOrderStatus::Approved);
        assert!(order
            .approvals()
            .iter()
            .all(|r| r.action == ApprovalAction::Approved));
    }

    #[test]
    fn rejection_short_circuits_the_chain() {
        let mut order = submitted();
        decide(&mut order, ApproverRole::CategoryHead, Decision::Approved).unwrap();
        decide(&mut order, ApproverRole::Admin, Decision::Rejected).unwrap();
        assert_eq!(order.status(), PurchaseOrderStatus::Rejected);

        let err = decide(&mut order, ApproverRole::Creator, Decision::Approved).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn replayed_decision_is_already_decided() {
        let mut order = submitted();
        decide(&mut order, ApproverRole::CategoryHead, Decision::Approved).unwrap();
        let version = order.version();

        let err = decide(&mut order, ApproverRole::CategoryHead, Decision::Approved).unwrap_err();
        assert!(matches!(err, DomainError::AlreadyDecided(_)));
        assert_eq!(order.version(), version);
        assert_eq!(order.status(), PurchaseOrderStatus::PendingAdmin);
    }

    #[test]
    fn out_of_turn_role_is_invalid_state() {
        let mut order = submitted();
        let err = decide(&mut order, ApproverRole::Admin, Decision::Approved).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn submit_only_from_draft() {
        let mut order = submitted();
        let order_id = order.id_typed();
        let err = execute(
            &mut order,
            &PurchaseOrderCommand::SubmitForApproval(SubmitForApproval {
                order_id,
                submitted_by: UserId::new(),
                occurred_at: test_time(),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn draft_can_be_updated_and_deleted() {
        let mut order = created(vec![line(1, 1)]);
        let order_id = order.id_typed();

        execute(
            &mut order,
            &PurchaseOrderCommand::UpdateDraft(UpdateDraft {
                order_id,
                priority: Priority::Urgent,
                lines: vec![line(1, 5), line(2, 5)],
                updated_by: UserId::new(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(order.lines().len(), 2);
        assert_eq!(order.priority(), Priority::Urgent);

        execute(
            &mut order,
            &PurchaseOrderCommand::DeleteDraft(DeleteDraft {
                order_id,
                deleted_by: UserId::new(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert!(!order.exists());

        let err = order
            .handle(&PurchaseOrderCommand::SubmitForApproval(SubmitForApproval {
                order_id,
                submitted_by: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn submitted_order_cannot_be_updated_or_deleted() {
        let order = submitted();
        let order_id = order.id_typed();
        let err = order
            .handle(&PurchaseOrderCommand::DeleteDraft(DeleteDraft {
                order_id,
                deleted_by: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn edit_is_allowed_once() {
        let mut order = submitted();
        let order_id = order.id_typed();
        let propose = |lines| {
            PurchaseOrderCommand::ProposeEdit(ProposeEdit {
                order_id,
                proposal_id: Uuid::now_v7(),
                lines,
                proposed_by: UserId::new(),
                occurred_at: test_time(),
            })
        };

        execute(&mut order, &propose(vec![line(7, 80)])).unwrap();
        assert!(order.is_edited());
        // The original stays untouched; the proposal lives beside it.
        assert_eq!(order.ordered_quantity(CatalogItemId(7)), 100);
        assert_eq!(order.edit_proposal().unwrap().lines[0].quantity, 80);

        let err = execute(&mut order, &propose(vec![line(7, 60)])).unwrap_err();
        assert_eq!(err, DomainError::AlreadyEdited);
    }

    #[test]
    fn draft_edit_must_use_update() {
        let order = created(vec![line(1, 1)]);
        let err = order
            .handle(&PurchaseOrderCommand::ProposeEdit(ProposeEdit {
                order_id: order.id_typed(),
                proposal_id: Uuid::now_v7(),
                lines: vec![line(1, 2)],
                proposed_by: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn cancel_from_pending_only() {
        let mut order = submitted();
        let order_id = order.id_typed();
        let cancel = PurchaseOrderCommand::Cancel(Cancel {
            order_id,
            reason: Some("vendor unavailable".to_string()),
            cancelled_by: UserId::new(),
            occurred_at: test_time(),
        });

        execute(&mut order, &cancel).unwrap();
        assert_eq!(order.status(), PurchaseOrderStatus::Cancelled);
        assert!(matches!(
            order.handle(&cancel).unwrap_err(),
            DomainError::InvalidState(_)
        ));

        let draft = created(vec![line(1, 1)]);
        let err = draft
            .handle(&PurchaseOrderCommand::Cancel(Cancel {
                order_id: draft.id_typed(),
                reason: None,
                cancelled_by: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn any_step() -> impl Strategy<Value = (u8, bool)> {
            (0u8..4, any::<bool>())
        }

        proptest! {
            #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

            /// Whatever decisions arrive in whatever order, every status change follows the
            /// transition table and no record is ever decided twice.
            #[test]
            fn decisions_follow_transition_table(steps in prop::collection::vec(any_step(), 1..12)) {
                let mut order = submitted();
                for (role_idx, approve) in steps {
                    let before = order.status();
                    let role = match role_idx {
                        0 => ApproverRole::CategoryHead,
                        1 => ApproverRole::Admin,
                        2 => ApproverRole::Creator,
                        _ => ApproverRole::CategoryHead,
                    };
                    let decided_before = order.approval(role).unwrap().action;
                    let decision = if approve { Decision::Approved } else { Decision::Rejected };

                    match decide(&mut order, role, decision) {
                        Ok(_) => {
                            prop_assert!(before.can_transition_to(order.status()));
                            prop_assert_eq!(decided_before, ApprovalAction::Pending);
                        }
                        Err(_) => prop_assert_eq!(order.status(), before),
                    }
                }
            }
        }
    }
}
