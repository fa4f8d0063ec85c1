//! Procurement façade.
//!
//! Each mutating operation runs as one unit of work: every stream it reads is
//! re-checked at commit and every stream it writes commits together, so
//! concurrent callers observe all-or-nothing outcomes. Notifications go out only
//! after a successful commit.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rand::Rng;
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use procura_allocation::{
    Allocate, ClaimUnitCode, RecordReceipt, SplitAllocation, SplitAllocationCommand,
    SplitStatus, UnitCode, UnitCodeClaim,
};
use procura_auth::{ApprovalTokenService, IssuedToken, OverridePassword};
use procura_core::{AggregateId, CatalogItemId, DomainError, FacilityId, UserId, VendorId};
use procura_events::{EventBus, EventEnvelope};
use procura_inventory::{
    InventoryLedgerEntry, LedgerCommand, LedgerKey, RecordGrnDone, RecordPoApproved,
    RecordPoRaised, ReversePoRaise,
};
use procura_purchasing::{
    AllocateCode, Cancel, CreatePurchaseOrder, Decision, DeleteDraft, NewPoLine, PoCode,
    PoCodeSequence, Priority, ProposeEdit, PurchaseOrder, PurchaseOrderCommand,
    PurchaseOrderId, PurchaseOrderStatus, RecordDecision, SubmitForApproval, UpdateDraft,
};
use procura_receiving::{
    Batch, GrnEvent, GrnRecord, LineDelta, PostReceipt, ReceiptLine, Sku, default_batch_code,
};

use crate::clock::{Clock, SystemClock};
use crate::command_dispatcher::CommandDispatcher;
use crate::config::{Settings, SettingsError};
use crate::directory::{CatalogLookup, PartyDirectory, RecipientDirectory};
use crate::error::ServiceResult;
use crate::event_store::EventStore;
use crate::notify::{NotificationDispatcher, Notifier, ProcurementEvent};
use crate::unit_of_work::UnitOfWork;

const SUGGEST_ATTEMPTS: usize = 32;

/// Result of a mutating call plus what it changed.
#[derive(Debug, Clone)]
pub struct Completed<T> {
    pub value: T,
    pub events: Vec<ProcurementEvent>,
}

/// A requested PO line; the catalog snapshot is resolved by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedLine {
    pub catalog_item: CatalogItemId,
    pub quantity: i64,
    /// Negotiated price in minor units; `None` takes the catalog price.
    pub unit_price: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewPurchaseOrder {
    pub vendor_id: VendorId,
    pub facility_id: FacilityId,
    pub priority: Priority,
    pub lines: Vec<RequestedLine>,
    pub created_by: UserId,
}

/// An approver's decision, authorised by a capability token.
#[derive(Debug, Clone)]
pub struct DecisionRequest {
    pub token: String,
    pub decision: Decision,
    pub comments: Option<String>,
    pub override_password: Option<String>,
    pub decided_by: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchInput {
    pub code: Option<String>,
    pub expiry: Option<NaiveDate>,
    pub quantity: i64,
}

/// One SKU of a receipt posting as entered at the dock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrnLineInput {
    pub sku: Sku,
    /// Informational; the ordered quantity on record always wins.
    pub ordered: i64,
    pub received: i64,
    pub rejected: i64,
    pub qc_pass: i64,
    pub qc_fail: i64,
    pub held: i64,
    pub return_to_vendor: i64,
    pub batches: Vec<BatchInput>,
    pub photos: Vec<String>,
}

impl GrnLineInput {
    /// Line with only the core quantities set.
    pub fn new(sku: Sku, received: i64, rejected: i64, qc_pass: i64) -> Self {
        Self {
            sku,
            ordered: 0,
            received,
            rejected,
            qc_pass,
            qc_fail: 0,
            held: 0,
            return_to_vendor: 0,
            batches: Vec::new(),
            photos: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrnPosted {
    pub grn_id: AggregateId,
    pub posting_no: u32,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedgerSnapshot {
    pub po_raise: i64,
    pub po_approve: i64,
    pub grn_done: i64,
    pub available: i64,
}

/// External systems the service talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn CatalogLookup>,
    pub parties: Arc<dyn PartyDirectory>,
    pub recipients: Arc<dyn RecipientDirectory>,
    pub notifier: Arc<dyn Notifier>,
}

pub struct ProcurementService<S, B> {
    dispatcher: CommandDispatcher<S, B>,
    tokens: ApprovalTokenService,
    override_password: OverridePassword,
    catalog: Arc<dyn CatalogLookup>,
    parties: Arc<dyn PartyDirectory>,
    notifications: NotificationDispatcher,
    clock: Arc<dyn Clock>,
    po_code_prefix: String,
    batch_shelf_life: Duration,
}

impl<S, B> ProcurementService<S, B> {
    pub fn new(
        dispatcher: CommandDispatcher<S, B>,
        tokens: ApprovalTokenService,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            dispatcher,
            tokens,
            override_password: OverridePassword::disabled(),
            catalog: collaborators.catalog,
            parties: collaborators.parties,
            notifications: NotificationDispatcher::new(
                collaborators.notifier,
                collaborators.recipients,
            ),
            clock: Arc::new(SystemClock),
            po_code_prefix: "PO".to_string(),
            batch_shelf_life: Duration::days(365),
        }
    }

    /// Wire a service from loaded settings.
    pub fn from_settings(
        settings: &Settings,
        store: S,
        bus: B,
        collaborators: Collaborators,
    ) -> Result<Self, SettingsError> {
        let dispatcher = CommandDispatcher::new(store, bus)
            .with_max_conflict_retries(settings.store.max_conflict_retries);
        Ok(Self::new(dispatcher, settings.token_service()?, collaborators)
            .with_override_password(settings.override_password())
            .with_po_code_prefix(settings.purchasing.po_code_prefix.clone())
            .with_batch_shelf_life(settings.batch_shelf_life()))
    }

    pub fn with_override_password(mut self, password: OverridePassword) -> Self {
        self.override_password = password;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_po_code_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.po_code_prefix = prefix.into();
        self
    }

    pub fn with_batch_shelf_life(mut self, shelf_life: Duration) -> Self {
        self.batch_shelf_life = shelf_life;
        self
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<S, B> {
        &self.dispatcher
    }

    pub fn token_service(&self) -> &ApprovalTokenService {
        &self.tokens
    }
}

impl<S, B> ProcurementService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    // ---------------------------------------------------------------------
    // Purchase order lifecycle
    // ---------------------------------------------------------------------

    #[instrument(
        skip_all,
        fields(vendor_id = %request.vendor_id, facility_id = %request.facility_id)
    )]
    pub fn create_po(&self, request: NewPurchaseOrder) -> ServiceResult<Completed<PurchaseOrder>> {
        if !self.parties.vendor_exists(request.vendor_id) {
            return Err(DomainError::invalid_reference(format!(
                "unknown vendor {}",
                request.vendor_id
            ))
            .into());
        }
        if !self.parties.facility_exists(request.facility_id) {
            return Err(DomainError::invalid_reference(format!(
                "unknown facility {}",
                request.facility_id
            ))
            .into());
        }
        let lines = self.resolve_lines(&request.lines)?;
        let order_id = PurchaseOrderId::new(AggregateId::new());
        let now = self.clock.now();

        let order = self.dispatcher.run(|uow| {
            let mut sequence: PoCodeSequence = uow.load(PoCodeSequence::stream_id())?;
            uow.decide(&mut sequence, &AllocateCode { occurred_at: now })?;
            let code = PoCode::new(self.po_code_prefix.clone(), sequence.last());

            let mut order: PurchaseOrder = uow.load(order_id.into())?;
            uow.decide(
                &mut order,
                &PurchaseOrderCommand::CreatePurchaseOrder(CreatePurchaseOrder {
                    order_id,
                    code,
                    vendor_id: request.vendor_id,
                    facility_id: request.facility_id,
                    priority: request.priority,
                    lines: lines.clone(),
                    created_by: request.created_by,
                    occurred_at: now,
                }),
            )?;
            Ok(order)
        })?;

        let code = code_of(&order);
        info!(
            po_id = %order_id,
            code = %code,
            total = order.total_amount(),
            "purchase order created"
        );
        Ok(Completed {
            events: vec![ProcurementEvent::PoCreated { po_id: order_id, code }],
            value: order,
        })
    }

    #[instrument(skip_all, fields(po_id = %po_id))]
    pub fn update_draft(
        &self,
        po_id: PurchaseOrderId,
        priority: Priority,
        lines: Vec<RequestedLine>,
        updated_by: UserId,
    ) -> ServiceResult<Completed<PurchaseOrder>> {
        let lines = self.resolve_lines(&lines)?;
        let now = self.clock.now();

        let order = self.dispatcher.run(|uow| {
            let mut order: PurchaseOrder = uow.load(po_id.into())?;
            uow.decide(
                &mut order,
                &PurchaseOrderCommand::UpdateDraft(UpdateDraft {
                    order_id: po_id,
                    priority,
                    lines: lines.clone(),
                    updated_by,
                    occurred_at: now,
                }),
            )?;
            Ok(order)
        })?;

        debug!(total = order.total_amount(), "draft updated");
        Ok(Completed {
            events: vec![ProcurementEvent::DraftUpdated { po_id }],
            value: order,
        })
    }

    #[instrument(skip_all, fields(po_id = %po_id))]
    pub fn delete_draft(
        &self,
        po_id: PurchaseOrderId,
        deleted_by: UserId,
    ) -> ServiceResult<Completed<()>> {
        let now = self.clock.now();
        self.dispatcher.run(|uow| {
            let mut order: PurchaseOrder = uow.load(po_id.into())?;
            uow.decide(
                &mut order,
                &PurchaseOrderCommand::DeleteDraft(DeleteDraft {
                    order_id: po_id,
                    deleted_by,
                    occurred_at: now,
                }),
            )?;
            Ok(())
        })?;

        info!("draft deleted");
        Ok(Completed {
            value: (),
            events: vec![ProcurementEvent::DraftDeleted { po_id }],
        })
    }

    /// DRAFT → PENDING_CATEGORY_HEAD. Raises ledger demand and hands the first
    /// approver a token.
    #[instrument(skip_all, fields(po_id = %po_id))]
    pub fn submit_for_approval(
        &self,
        po_id: PurchaseOrderId,
        submitted_by: UserId,
    ) -> ServiceResult<Completed<PurchaseOrder>> {
        let now = self.clock.now();

        let (order, issued) = self.dispatcher.run(|uow| {
            let mut order: PurchaseOrder = uow.load(po_id.into())?;
            uow.decide(
                &mut order,
                &PurchaseOrderCommand::SubmitForApproval(SubmitForApproval {
                    order_id: po_id,
                    submitted_by,
                    occurred_at: now,
                }),
            )?;

            record_for_each_item(uow, &order, |key, quantity| {
                LedgerCommand::RecordPoRaised(RecordPoRaised {
                    key,
                    po_id: po_id.into(),
                    quantity,
                    occurred_at: now,
                })
            })?;

            let issued = self.issue_for_awaiting(&order, now)?;
            Ok((order, issued))
        })?;

        info!(status = %order.status(), "purchase order submitted");
        let events = issued
            .map(|t| approval_requested(&order, t))
            .into_iter()
            .collect::<Vec<_>>();
        self.notifications.dispatch(&order, &events);
        Ok(Completed { value: order, events })
    }

    /// Record a decision authorised by `request.token`.
    ///
    /// Approval advances the chain and issues the next role's token; the final
    /// approval books approved quantities on the ledger. Rejection ends the chain
    /// and reverses the raised demand.
    #[instrument(skip_all, fields(decision = ?request.decision))]
    pub fn decide(&self, request: DecisionRequest) -> ServiceResult<Completed<PurchaseOrder>> {
        self.override_password
            .verify(request.override_password.as_deref())?;
        let now = self.clock.now();
        let claims = self.tokens.validate(&request.token, now)?;
        let po_id = PurchaseOrderId::new(claims.po_id);
        debug!(po_id = %po_id, role = %claims.role, "approval token accepted");

        let (order, issued) = self.dispatcher.run(|uow| {
            let mut order: PurchaseOrder = uow.load(po_id.into())?;
            uow.decide(
                &mut order,
                &PurchaseOrderCommand::RecordDecision(RecordDecision {
                    order_id: po_id,
                    role: claims.role,
                    decision: request.decision,
                    comments: request.comments.clone(),
                    decided_by: request.decided_by,
                    occurred_at: now,
                }),
            )?;

            let issued = match order.status() {
                PurchaseOrderStatus::Approved => {
                    record_for_each_item(uow, &order, |key, quantity| {
                        LedgerCommand::RecordPoApproved(RecordPoApproved {
                            key,
                            po_id: po_id.into(),
                            quantity,
                            occurred_at: now,
                        })
                    })?;
                    None
                }
                PurchaseOrderStatus::Rejected => {
                    record_for_each_item(uow, &order, |key, quantity| {
                        LedgerCommand::ReversePoRaise(ReversePoRaise {
                            key,
                            po_id: po_id.into(),
                            quantity,
                            occurred_at: now,
                        })
                    })?;
                    None
                }
                _ => self.issue_for_awaiting(&order, now)?,
            };
            Ok((order, issued))
        })?;

        info!(
            po_id = %po_id,
            role = %claims.role,
            status = %order.status(),
            "approval decision recorded"
        );

        let code = code_of(&order);
        let mut events = vec![ProcurementEvent::ApprovalRecorded {
            po_id,
            role: claims.role,
            status: order.status(),
        }];
        match order.status() {
            PurchaseOrderStatus::Approved => events.push(ProcurementEvent::PoApproved {
                po_id,
                code,
                total_amount: order.total_amount(),
            }),
            PurchaseOrderStatus::Rejected => events.push(ProcurementEvent::PoRejected {
                po_id,
                code,
                role: claims.role,
                comments: request.comments.clone(),
            }),
            _ => {}
        }
        if let Some(issued) = issued {
            events.push(approval_requested(&order, issued));
        }

        self.notifications.dispatch(&order, &events);
        Ok(Completed { value: order, events })
    }

    /// Attach the single allowed edit proposal; the order itself is unchanged.
    #[instrument(skip_all, fields(po_id = %po_id))]
    pub fn edit_once(
        &self,
        po_id: PurchaseOrderId,
        lines: Vec<RequestedLine>,
        proposed_by: UserId,
    ) -> ServiceResult<Completed<PurchaseOrder>> {
        let lines = self.resolve_lines(&lines)?;
        let proposal_id = Uuid::now_v7();
        let now = self.clock.now();

        let order = self.dispatcher.run(|uow| {
            let mut order: PurchaseOrder = uow.load(po_id.into())?;
            uow.decide(
                &mut order,
                &PurchaseOrderCommand::ProposeEdit(ProposeEdit {
                    order_id: po_id,
                    proposal_id,
                    lines: lines.clone(),
                    proposed_by,
                    occurred_at: now,
                }),
            )?;
            Ok(order)
        })?;

        info!(proposal_id = %proposal_id, "edit proposed");
        Ok(Completed {
            events: vec![ProcurementEvent::EditProposed { po_id, proposal_id }],
            value: order,
        })
    }

    /// Cancel a pending order and release its raised demand.
    #[instrument(skip_all, fields(po_id = %po_id))]
    pub fn cancel(
        &self,
        po_id: PurchaseOrderId,
        reason: Option<String>,
        cancelled_by: UserId,
    ) -> ServiceResult<Completed<PurchaseOrder>> {
        let now = self.clock.now();

        let (order, previous_status) = self.dispatcher.run(|uow| {
            let mut order: PurchaseOrder = uow.load(po_id.into())?;
            let previous_status = order.status();
            uow.decide(
                &mut order,
                &PurchaseOrderCommand::Cancel(Cancel {
                    order_id: po_id,
                    reason: reason.clone(),
                    cancelled_by,
                    occurred_at: now,
                }),
            )?;

            if previous_status.is_pending() {
                record_for_each_item(uow, &order, |key, quantity| {
                    LedgerCommand::ReversePoRaise(ReversePoRaise {
                        key,
                        po_id: po_id.into(),
                        quantity,
                        occurred_at: now,
                    })
                })?;
            }
            Ok((order, previous_status))
        })?;

        info!(%previous_status, "purchase order cancelled");
        Ok(Completed {
            events: vec![ProcurementEvent::PoCancelled {
                po_id,
                previous_status,
            }],
            value: order,
        })
    }

    // ---------------------------------------------------------------------
    // Split allocation
    // ---------------------------------------------------------------------

    /// Allocate `quantity` of an approved line to `unit_code`, or top up the
    /// existing split with that code.
    #[instrument(
        skip_all,
        fields(po_id = %po_id, catalog_item = %catalog_item, unit_code = %unit_code)
    )]
    pub fn create_or_update_split(
        &self,
        po_id: PurchaseOrderId,
        catalog_item: CatalogItemId,
        unit_code: &str,
        quantity: i64,
        actor: UserId,
    ) -> ServiceResult<Completed<SplitStatus>> {
        let unit_code = UnitCode::parse_for(unit_code, catalog_item)?;
        let now = self.clock.now();

        let status = self.dispatcher.run(|uow| {
            let order: PurchaseOrder = uow.load(po_id.into())?;
            ensure_approved(&order)?;
            let ordered_quantity = order.ordered_quantity(catalog_item);
            if ordered_quantity == 0 {
                return Err(DomainError::invalid_reference(format!(
                    "purchase order has no line for catalog item {catalog_item}"
                ))
                .into());
            }

            let mut allocation: SplitAllocation =
                uow.load(SplitAllocation::stream_id(po_id.into(), catalog_item))?;

            if !allocation.has_split(&unit_code) {
                let mut claim: UnitCodeClaim = uow.load(UnitCodeClaim::stream_id(&unit_code))?;
                uow.decide(
                    &mut claim,
                    &ClaimUnitCode {
                        unit_code: unit_code.clone(),
                        po_id: po_id.into(),
                        catalog_item,
                        claimed_by: actor,
                        occurred_at: now,
                    },
                )?;
            }

            uow.decide(
                &mut allocation,
                &SplitAllocationCommand::Allocate(Allocate {
                    po_id: po_id.into(),
                    catalog_item,
                    unit_code: unit_code.clone(),
                    quantity,
                    ordered_quantity,
                    actor,
                    occurred_at: now,
                }),
            )?;
            Ok(allocation.status()?)
        })?;

        info!(quantity, status = ?status, "split allocated");
        Ok(Completed {
            value: status,
            events: vec![ProcurementEvent::SplitAllocated {
                po_id,
                catalog_item,
                unit_code,
                quantity,
                status,
            }],
        })
    }

    /// A unit code for `catalog_item` that is not claimed right now. Not
    /// reserved: allocation still fails if someone claims it first.
    #[instrument(skip(self))]
    pub fn suggest_unit_code(&self, catalog_item: CatalogItemId) -> ServiceResult<UnitCode> {
        let mut rng = rand::thread_rng();
        for _ in 0..SUGGEST_ATTEMPTS {
            let candidate = UnitCode::compose(catalog_item, rng.gen_range(0..10_000))?;
            let claim: UnitCodeClaim = self.read(UnitCodeClaim::stream_id(&candidate))?;
            if claim.owner().is_none() {
                return Ok(candidate);
            }
        }
        Err(DomainError::conflict(format!(
            "no free unit code found for catalog item {catalog_item}"
        ))
        .into())
    }

    // ---------------------------------------------------------------------
    // Goods receipt
    // ---------------------------------------------------------------------

    /// Post one receipt against an approved order.
    ///
    /// The GRN, the split receipt counters and the ledger all commit together.
    /// Only QC-passed quantity reaches the ledger.
    #[instrument(skip_all, fields(po_id = %po_id, lines = lines.len()))]
    pub fn post_grn(
        &self,
        po_id: PurchaseOrderId,
        lines: Vec<GrnLineInput>,
        posted_by: UserId,
    ) -> ServiceResult<Completed<GrnPosted>> {
        let now = self.clock.now();
        let grn_id = GrnRecord::stream_id(po_id.into());

        let (posted, deltas, ledger_updates) = self.dispatcher.run(|uow| {
            let order: PurchaseOrder = uow.load(po_id.into())?;
            ensure_approved(&order)?;
            let facility = facility_of(&order)?;

            let mut grn: GrnRecord = uow.load(grn_id)?;
            let opening = !grn.exists();
            let grn_code = if opening {
                order
                    .code()
                    .map(|c| format!("GRN-{:06}", c.number()))
                    .unwrap_or_else(|| format!("GRN-{grn_id}"))
            } else {
                grn.code().to_string()
            };

            let mut receipt_lines = Vec::with_capacity(lines.len());
            let mut next_line_no = grn.next_line_no();
            for input in &lines {
                let ordered = self.ordered_on_record(uow, &order, &grn, &input.sku)?;
                if input.ordered != 0 && input.ordered != ordered {
                    debug!(
                        sku = %input.sku,
                        supplied = input.ordered,
                        ordered,
                        "ordered quantity overridden"
                    );
                }
                let (line_no, prior_batches) = match grn.line(&input.sku) {
                    Some(existing) => (existing.line_no, existing.batches.len()),
                    None => {
                        next_line_no += 1;
                        (next_line_no - 1, 0)
                    }
                };
                receipt_lines.push(ReceiptLine {
                    sku: input.sku.clone(),
                    ordered,
                    received: input.received,
                    rejected: input.rejected,
                    qc_pass: input.qc_pass,
                    qc_fail: input.qc_fail,
                    held: input.held,
                    return_to_vendor: input.return_to_vendor,
                    batches: self.default_batches(
                        &grn_code,
                        line_no,
                        prior_batches,
                        &input.batches,
                        now,
                    ),
                    photos: input.photos.clone(),
                });
            }

            let events = uow.decide(
                &mut grn,
                &PostReceipt {
                    grn_id,
                    po_id: po_id.into(),
                    code: grn_code.clone(),
                    lines: receipt_lines,
                    posted_by,
                    occurred_at: now,
                },
            )?;
            let deltas: Vec<LineDelta> = events
                .into_iter()
                .filter_map(|e| match e {
                    GrnEvent::ReceiptPosted(posted) => Some(posted.lines),
                    GrnEvent::GrnOpened(_) => None,
                })
                .flatten()
                .collect();

            let mut ledger_updates = Vec::new();
            for delta in &deltas {
                if let Some(code) = delta.sku.unit_code() {
                    if delta.received > 0 {
                        let mut allocation: SplitAllocation = uow.load(SplitAllocation::stream_id(
                            po_id.into(),
                            code.catalog_item(),
                        ))?;
                        uow.decide(
                            &mut allocation,
                            &SplitAllocationCommand::RecordReceipt(RecordReceipt {
                                unit_code: code.clone(),
                                received: delta.received,
                                occurred_at: now,
                            }),
                        )?;
                    }
                }

                if delta.qc_pass > 0 {
                    let key = LedgerKey::new(delta.sku.catalog_item(), facility);
                    let mut entry: InventoryLedgerEntry = uow.load(key.stream_id())?;
                    uow.decide(
                        &mut entry,
                        &LedgerCommand::RecordGrnDone(RecordGrnDone {
                            key,
                            po_id: po_id.into(),
                            grn_id,
                            quantity: delta.qc_pass,
                            occurred_at: now,
                        }),
                    )?;
                    ledger_updates.push((key, delta.qc_pass));
                }
            }

            let posted = GrnPosted {
                grn_id,
                posting_no: grn.postings(),
                message: (if opening { "GRN created" } else { "GRN updated" }).to_string(),
            };
            Ok((posted, deltas, ledger_updates))
        })?;

        for delta in &deltas {
            debug!(
                sku = %delta.sku,
                received = delta.received,
                qc_pass = delta.qc_pass,
                status = ?delta.status,
                "grn line posted"
            );
        }
        info!(
            grn_id = %posted.grn_id,
            posting_no = posted.posting_no,
            message = %posted.message,
            "goods receipt posted"
        );

        let mut events = vec![ProcurementEvent::GoodsReceived {
            po_id,
            grn_id: posted.grn_id,
            posting_no: posted.posting_no,
        }];
        events.extend(
            ledger_updates
                .into_iter()
                .map(|(key, grn_done_delta)| ProcurementEvent::LedgerUpdated {
                    key,
                    grn_done_delta,
                }),
        );
        Ok(Completed { value: posted, events })
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    pub fn get_po(&self, po_id: PurchaseOrderId) -> ServiceResult<PurchaseOrder> {
        let order: PurchaseOrder = self.read(po_id.into())?;
        if !order.exists() {
            return Err(DomainError::not_found().into());
        }
        Ok(order)
    }

    pub fn get_split_allocation(
        &self,
        po_id: PurchaseOrderId,
        catalog_item: CatalogItemId,
    ) -> ServiceResult<SplitAllocation> {
        self.read(SplitAllocation::stream_id(po_id.into(), catalog_item))
    }

    /// Split progress for an order line; `Pending` until the first allocation.
    pub fn get_split_status(
        &self,
        po_id: PurchaseOrderId,
        catalog_item: CatalogItemId,
    ) -> ServiceResult<SplitStatus> {
        Ok(self.get_split_allocation(po_id, catalog_item)?.status()?)
    }

    pub fn get_grn(&self, po_id: PurchaseOrderId) -> ServiceResult<GrnRecord> {
        let grn: GrnRecord = self.read(GrnRecord::stream_id(po_id.into()))?;
        if !grn.exists() {
            return Err(DomainError::not_found().into());
        }
        Ok(grn)
    }

    /// Ledger row for (SKU, facility); all zeros before its first movement.
    pub fn get_ledger_entry(
        &self,
        sku: CatalogItemId,
        facility: FacilityId,
    ) -> ServiceResult<LedgerSnapshot> {
        let entry: InventoryLedgerEntry = self.read(LedgerKey::new(sku, facility).stream_id())?;
        Ok(LedgerSnapshot {
            po_raise: entry.po_raise_quantity(),
            po_approve: entry.po_approve_quantity(),
            grn_done: entry.grn_done_quantity(),
            available: entry.total_available_quantity(),
        })
    }

    // ---------------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------------

    fn read<A>(&self, id: AggregateId) -> ServiceResult<A>
    where
        A: crate::unit_of_work::StoredAggregate,
        A::Event: procura_events::Event + serde::Serialize + serde::de::DeserializeOwned,
    {
        UnitOfWork::new(self.dispatcher.store()).load(id)
    }

    fn resolve_lines(&self, requested: &[RequestedLine]) -> ServiceResult<Vec<NewPoLine>> {
        requested
            .iter()
            .map(|line| {
                let snapshot = self.catalog.snapshot(line.catalog_item).ok_or_else(|| {
                    DomainError::invalid_reference(format!(
                        "unknown catalog item {}",
                        line.catalog_item
                    ))
                })?;
                Ok(NewPoLine {
                    catalog_item: line.catalog_item,
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                    snapshot,
                })
            })
            .collect()
    }

    fn issue_for_awaiting(
        &self,
        order: &PurchaseOrder,
        now: DateTime<Utc>,
    ) -> ServiceResult<Option<IssuedToken>> {
        match order.status().awaiting_role() {
            Some(role) => Ok(Some(self.tokens.issue(order.id_typed().into(), role, now)?)),
            None => Ok(None),
        }
    }

    /// Ordered quantity on record for a posted SKU: the split quantity for a unit
    /// code, the summed PO lines for a catalog item.
    ///
    /// A catalog item is received either as a whole or through its unit codes,
    /// never both, so the receipts of one item stay within its ordered quantity.
    fn ordered_on_record(
        &self,
        uow: &mut UnitOfWork<'_, S>,
        order: &PurchaseOrder,
        grn: &GrnRecord,
        sku: &Sku,
    ) -> ServiceResult<i64> {
        let allocation: SplitAllocation = uow.load(SplitAllocation::stream_id(
            order.id_typed().into(),
            sku.catalog_item(),
        ))?;
        match sku {
            Sku::Unit(code) => {
                if grn.line(&Sku::Catalog(code.catalog_item())).is_some() {
                    return Err(DomainError::invalid_state(format!(
                        "catalog item {} is already received without unit codes",
                        code.catalog_item()
                    ))
                    .into());
                }
                allocation
                    .split(code)
                    .map(|s| s.quantity)
                    .ok_or_else(|| {
                        DomainError::invalid_reference(format!("no split for unit code {code}"))
                            .into()
                    })
            }
            Sku::Catalog(item) => {
                let ordered = order.ordered_quantity(*item);
                if ordered == 0 {
                    return Err(DomainError::invalid_reference(format!(
                        "purchase order has no line for catalog item {item}"
                    ))
                    .into());
                }
                if !allocation.splits().is_empty() {
                    return Err(DomainError::invalid_state(format!(
                        "catalog item {item} is split into unit codes and received by unit code"
                    ))
                    .into());
                }
                Ok(ordered)
            }
        }
    }

    fn default_batches(
        &self,
        grn_code: &str,
        line_no: u32,
        prior: usize,
        batches: &[BatchInput],
        now: DateTime<Utc>,
    ) -> Vec<Batch> {
        let default_expiry = (now + self.batch_shelf_life).date_naive();
        batches
            .iter()
            .enumerate()
            .map(|(idx, b)| Batch {
                code: b
                    .code
                    .clone()
                    .filter(|c| !c.trim().is_empty())
                    .unwrap_or_else(|| default_batch_code(grn_code, line_no, prior + idx + 1)),
                expiry: b.expiry.unwrap_or(default_expiry),
                quantity: b.quantity,
            })
            .collect()
    }
}

fn ensure_approved(order: &PurchaseOrder) -> ServiceResult<()> {
    if !order.exists() {
        return Err(DomainError::not_found().into());
    }
    if order.status() != PurchaseOrderStatus::Approved {
        return Err(DomainError::invalid_state(format!(
            "purchase order is {}, not APPROVED",
            order.status()
        ))
        .into());
    }
    Ok(())
}

fn facility_of(order: &PurchaseOrder) -> ServiceResult<FacilityId> {
    order
        .facility_id()
        .ok_or_else(|| DomainError::invariant("purchase order has no facility").into())
}

fn code_of(order: &PurchaseOrder) -> String {
    order.code().map(ToString::to_string).unwrap_or_default()
}

fn approval_requested(order: &PurchaseOrder, issued: IssuedToken) -> ProcurementEvent {
    ProcurementEvent::ApprovalRequested {
        po_id: order.id_typed(),
        code: code_of(order),
        role: issued.role,
        token: issued.token,
        expires_at: issued.expires_at,
    }
}

/// Apply one ledger command per ordered catalog item at the order's facility.
fn record_for_each_item<S>(
    uow: &mut UnitOfWork<'_, S>,
    order: &PurchaseOrder,
    command: impl Fn(LedgerKey, i64) -> LedgerCommand,
) -> ServiceResult<()>
where
    S: EventStore,
{
    let facility = facility_of(order)?;
    for (item, quantity) in order.quantities_by_item() {
        let key = LedgerKey::new(item, facility);
        let mut entry: InventoryLedgerEntry = uow.load(key.stream_id())?;
        uow.decide(&mut entry, &command(key, quantity))?;
    }
    Ok(())
}
