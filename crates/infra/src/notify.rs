//! Outcome events and the notifications derived from them.
//!
//! Every mutating façade call returns the [`ProcurementEvent`]s it caused.
//! [`NotificationDispatcher`] turns the ones people care about into mail; a
//! delivery failure is logged and dropped, never propagated.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use procura_allocation::{SplitStatus, UnitCode};
use procura_auth::ApproverRole;
use procura_core::{AggregateId, CatalogItemId};
use procura_inventory::LedgerKey;
use procura_purchasing::{PurchaseOrder, PurchaseOrderId, PurchaseOrderStatus};

use crate::directory::RecipientDirectory;

/// What a façade call changed, in business terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcurementEvent {
    PoCreated {
        po_id: PurchaseOrderId,
        code: String,
    },
    DraftUpdated {
        po_id: PurchaseOrderId,
    },
    DraftDeleted {
        po_id: PurchaseOrderId,
    },
    /// A role was handed a capability token to decide on the order.
    ApprovalRequested {
        po_id: PurchaseOrderId,
        code: String,
        role: ApproverRole,
        token: String,
        expires_at: DateTime<Utc>,
    },
    ApprovalRecorded {
        po_id: PurchaseOrderId,
        role: ApproverRole,
        status: PurchaseOrderStatus,
    },
    PoApproved {
        po_id: PurchaseOrderId,
        code: String,
        total_amount: i64,
    },
    PoRejected {
        po_id: PurchaseOrderId,
        code: String,
        role: ApproverRole,
        comments: Option<String>,
    },
    EditProposed {
        po_id: PurchaseOrderId,
        proposal_id: Uuid,
    },
    PoCancelled {
        po_id: PurchaseOrderId,
        previous_status: PurchaseOrderStatus,
    },
    SplitAllocated {
        po_id: PurchaseOrderId,
        catalog_item: CatalogItemId,
        unit_code: UnitCode,
        quantity: i64,
        status: SplitStatus,
    },
    GoodsReceived {
        po_id: PurchaseOrderId,
        grn_id: AggregateId,
        posting_no: u32,
    },
    LedgerUpdated {
        key: LedgerKey,
        grn_done_delta: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Delivery channel (mail, chat, ...).
pub trait Notifier: Send + Sync {
    fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            recipients = ?notification.recipients,
            subject = %notification.subject,
            "notification"
        );
        Ok(())
    }
}

/// Keeps every notification in memory; can be switched to fail every send.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        if self.failing {
            return Err(NotifyError::Delivery("mail relay unreachable".to_string()));
        }
        self.sent
            .lock()
            .map_err(|_| NotifyError::Delivery("recorder poisoned".to_string()))?
            .push(notification.clone());
        Ok(())
    }
}

pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    recipients: Arc<dyn RecipientDirectory>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, recipients: Arc<dyn RecipientDirectory>) -> Self {
        Self {
            notifier,
            recipients,
        }
    }

    /// Notify about `events` concerning `order`. Returns how many notifications
    /// were delivered.
    pub fn dispatch(&self, order: &PurchaseOrder, events: &[ProcurementEvent]) -> usize {
        let mut delivered = 0;
        for event in events {
            let Some(notification) = self.compose(order, event) else {
                continue;
            };
            if notification.recipients.is_empty() {
                warn!(subject = %notification.subject, "no recipients configured, notification dropped");
                continue;
            }
            match self.notifier.send(&notification) {
                Ok(()) => delivered += 1,
                Err(err) => warn!(
                    po_id = %order.id_typed(),
                    subject = %notification.subject,
                    error = %err,
                    "notification failed"
                ),
            }
        }
        delivered
    }

    fn compose(&self, order: &PurchaseOrder, event: &ProcurementEvent) -> Option<Notification> {
        match event {
            ProcurementEvent::ApprovalRequested {
                code,
                role,
                token,
                expires_at,
                ..
            } => Some(Notification {
                recipients: self.recipients.recipients(*role, order),
                subject: format!("Approval needed: purchase order {code}"),
                body: format!(
                    "Purchase order {code} (total {}) is waiting for your decision as {role}.\n\
                     Approval token: {token}\n\
                     The token expires at {}.",
                    order.total_amount(),
                    expires_at.to_rfc3339()
                ),
            }),
            ProcurementEvent::PoApproved {
                code, total_amount, ..
            } => Some(Notification {
                recipients: self.recipients.recipients(ApproverRole::Creator, order),
                subject: format!("Purchase order {code} approved"),
                body: summary(order, &format!("approved, total {total_amount}")),
            }),
            ProcurementEvent::PoRejected {
                code,
                role,
                comments,
                ..
            } => Some(Notification {
                recipients: self.recipients.recipients(ApproverRole::Creator, order),
                subject: format!("Purchase order {code} rejected"),
                body: summary(
                    order,
                    &format!(
                        "rejected by {role}: {}",
                        comments.as_deref().unwrap_or("no comments")
                    ),
                ),
            }),
            _ => None,
        }
    }
}

fn summary(order: &PurchaseOrder, outcome: &str) -> String {
    let mut body = format!(
        "Purchase order {} was {outcome}.\n",
        order
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| order.id_typed().to_string())
    );
    for line in order.lines() {
        body.push_str(&format!(
            "  #{} item {} x{} @ {} = {}\n",
            line.line_no, line.catalog_item, line.quantity, line.unit_price, line.line_total
        ));
    }
    for record in order.approvals() {
        body.push_str(&format!(
            "  {}: {:?}{}\n",
            record.role,
            record.action,
            record
                .comments
                .as_deref()
                .map(|c| format!(" ({c})"))
                .unwrap_or_default()
        ));
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticRecipients;

    fn order() -> PurchaseOrder {
        PurchaseOrder::empty(PurchaseOrderId::new(AggregateId::new()))
    }

    fn requested(po: &PurchaseOrder) -> ProcurementEvent {
        ProcurementEvent::ApprovalRequested {
            po_id: po.id_typed(),
            code: "PO-000001".to_string(),
            role: ApproverRole::CategoryHead,
            token: "tok".to_string(),
            expires_at: Utc::now(),
        }
    }

    fn recipients() -> Arc<StaticRecipients> {
        Arc::new(
            StaticRecipients::new()
                .with(ApproverRole::CategoryHead, "head@example.com")
                .with(ApproverRole::Creator, "buyer@example.com"),
        )
    }

    #[test]
    fn approval_request_carries_token() {
        let notifier = Arc::new(RecordingNotifier::new());
        let dispatcher = NotificationDispatcher::new(notifier.clone(), recipients());
        let po = order();

        assert_eq!(dispatcher.dispatch(&po, &[requested(&po)]), 1);
        let sent = notifier.sent();
        assert_eq!(sent[0].recipients, vec!["head@example.com".to_string()]);
        assert!(sent[0].body.contains("tok"));
    }

    #[test]
    fn outcome_summaries_go_to_creator() {
        let notifier = Arc::new(RecordingNotifier::new());
        let dispatcher = NotificationDispatcher::new(notifier.clone(), recipients());
        let po = order();

        let delivered = dispatcher.dispatch(
            &po,
            &[
                ProcurementEvent::PoRejected {
                    po_id: po.id_typed(),
                    code: "PO-000001".to_string(),
                    role: ApproverRole::Admin,
                    comments: Some("too expensive".to_string()),
                },
                ProcurementEvent::DraftUpdated { po_id: po.id_typed() },
            ],
        );
        assert_eq!(delivered, 1);
        let sent = notifier.sent();
        assert_eq!(sent[0].recipients, vec!["buyer@example.com".to_string()]);
        assert!(sent[0].body.contains("too expensive"));
    }

    #[test]
    fn failures_are_swallowed() {
        let dispatcher =
            NotificationDispatcher::new(Arc::new(RecordingNotifier::failing()), recipients());
        let po = order();
        assert_eq!(dispatcher.dispatch(&po, &[requested(&po)]), 0);
    }
}
