use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use procura_core::{Aggregate, AggregateId, AggregateRoot, DomainError, UserId};
use procura_events::Event;

use crate::sku::Sku;
use crate::status::{GrnLineStatus, line_status};

/// Batch subline of a receipt. Immutable once posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub code: String,
    pub expiry: NaiveDate,
    pub quantity: i64,
}

/// Code given to a batch posted without one: `B<grn code>-<line>-<n>`.
pub fn default_batch_code(grn_code: &str, line_no: u32, n: usize) -> String {
    format!("B{grn_code}-{line_no}-{n}")
}

/// Accumulated receipt state of one SKU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrnLine {
    pub line_no: u32,
    pub sku: Sku,
    pub ordered: i64,
    pub received: i64,
    pub pending: i64,
    pub rejected: i64,
    pub qc_pass: i64,
    pub qc_fail: i64,
    pub held: i64,
    pub return_to_vendor: i64,
    pub status: GrnLineStatus,
    pub batches: Vec<Batch>,
    pub photos: Vec<String>,
}

impl GrnLine {
    fn open(line_no: u32, sku: Sku, ordered: i64) -> Self {
        Self {
            line_no,
            sku,
            ordered,
            received: 0,
            pending: ordered,
            rejected: 0,
            qc_pass: 0,
            qc_fail: 0,
            held: 0,
            return_to_vendor: 0,
            status: GrnLineStatus::Pending,
            batches: Vec::new(),
            photos: Vec::new(),
        }
    }

    fn accumulate(&mut self, delta: &LineDelta) {
        self.ordered = delta.ordered;
        self.received += delta.received;
        self.rejected += delta.rejected;
        self.qc_pass += delta.qc_pass;
        self.qc_fail += delta.qc_fail;
        self.held += delta.held;
        self.return_to_vendor += delta.return_to_vendor;
        self.batches.extend(delta.batches.iter().cloned());
        self.photos.extend(delta.photos.iter().cloned());
        self.pending = self.ordered - self.received;
        self.status = line_status(self.ordered, self.rejected, self.qc_pass);
    }
}

/// Aggregate root: the GRN of one purchase order, created lazily on first receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrnRecord {
    id: AggregateId,
    po_id: Option<AggregateId>,
    code: String,
    lines: Vec<GrnLine>,
    postings: u32,
    opened_by: Option<UserId>,
    opened_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl GrnRecord {
    /// GRN stream of a purchase order.
    pub fn stream_id(po_id: AggregateId) -> AggregateId {
        AggregateId::derived("grn", &po_id.to_string())
    }

    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            po_id: None,
            code: String::new(),
            lines: Vec::new(),
            postings: 0,
            opened_by: None,
            opened_at: None,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn po_id(&self) -> Option<AggregateId> {
        self.po_id
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn lines(&self) -> &[GrnLine] {
        &self.lines
    }

    pub fn line(&self, sku: &Sku) -> Option<&GrnLine> {
        self.lines.iter().find(|l| &l.sku == sku)
    }

    pub fn postings(&self) -> u32 {
        self.postings
    }

    pub fn opened_by(&self) -> Option<UserId> {
        self.opened_by
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Line number the next unseen SKU would get.
    pub fn next_line_no(&self) -> u32 {
        self.lines.len() as u32 + 1
    }
}

impl AggregateRoot for GrnRecord {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// One SKU in a receipt posting. `ordered` is the authoritative ordered quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub sku: Sku,
    pub ordered: i64,
    pub received: i64,
    pub rejected: i64,
    pub qc_pass: i64,
    pub qc_fail: i64,
    pub held: i64,
    pub return_to_vendor: i64,
    pub batches: Vec<Batch>,
    pub photos: Vec<String>,
}

/// Command: PostReceipt. All lines apply or none do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostReceipt {
    pub grn_id: AggregateId,
    pub po_id: AggregateId,
    pub code: String,
    pub lines: Vec<ReceiptLine>,
    pub posted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrnOpened {
    pub grn_id: AggregateId,
    pub po_id: AggregateId,
    pub code: String,
    pub opened_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Quantities added to one line by a posting, plus the line status afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDelta {
    pub line_no: u32,
    pub sku: Sku,
    pub ordered: i64,
    pub received: i64,
    pub rejected: i64,
    pub qc_pass: i64,
    pub qc_fail: i64,
    pub held: i64,
    pub return_to_vendor: i64,
    pub batches: Vec<Batch>,
    pub photos: Vec<String>,
    pub status: GrnLineStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptPosted {
    pub grn_id: AggregateId,
    pub posting_no: u32,
    pub lines: Vec<LineDelta>,
    pub posted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrnEvent {
    GrnOpened(GrnOpened),
    ReceiptPosted(ReceiptPosted),
}

impl Event for GrnEvent {
    fn event_type(&self) -> &'static str {
        match self {
            GrnEvent::GrnOpened(_) => "receiving.grn.opened",
            GrnEvent::ReceiptPosted(_) => "receiving.grn.receipt_posted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            GrnEvent::GrnOpened(e) => e.occurred_at,
            GrnEvent::ReceiptPosted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for GrnRecord {
    type Command = PostReceipt;
    type Event = GrnEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            GrnEvent::GrnOpened(e) => {
                self.id = e.grn_id;
                self.po_id = Some(e.po_id);
                self.code = e.code.clone();
                self.opened_by = Some(e.opened_by);
                self.opened_at = Some(e.occurred_at);
                self.created = true;
            }
            GrnEvent::ReceiptPosted(e) => {
                for delta in &e.lines {
                    let idx = match self.lines.iter().position(|l| l.sku == delta.sku) {
                        Some(idx) => idx,
                        None => {
                            self.lines
                                .push(GrnLine::open(
                                    delta.line_no,
                                    delta.sku.clone(),
                                    delta.ordered,
                                ));
                            self.lines.len() - 1
                        }
                    };
                    self.lines[idx].accumulate(delta);
                }
                self.postings = e.posting_no;
            }
        }
        self.updated_at = Some(event.occurred_at());
        self.version += 1;
    }

    fn handle(&self, cmd: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("receipt posting has no lines"));
        }
        if self.po_id.is_some_and(|p| p != cmd.po_id) {
            return Err(DomainError::invariant("GRN belongs to another purchase order"));
        }

        let mut deltas: Vec<LineDelta> = Vec::with_capacity(cmd.lines.len());
        let mut next_line_no = self.next_line_no();
        for line in &cmd.lines {
            if deltas.iter().any(|d| d.sku == line.sku) {
                return Err(DomainError::validation(format!(
                    "{} appears twice in one posting",
                    line.sku
                )));
            }
            let line_no = match self.line(&line.sku) {
                Some(existing) => existing.line_no,
                None => {
                    next_line_no += 1;
                    next_line_no - 1
                }
            };
            deltas.push(self.check_line(line, line_no)?);
        }

        let mut events = Vec::with_capacity(2);
        if !self.created {
            events.push(GrnEvent::GrnOpened(GrnOpened {
                grn_id: cmd.grn_id,
                po_id: cmd.po_id,
                code: cmd.code.clone(),
                opened_by: cmd.posted_by,
                occurred_at: cmd.occurred_at,
            }));
        }
        events.push(GrnEvent::ReceiptPosted(ReceiptPosted {
            grn_id: cmd.grn_id,
            posting_no: self.postings + 1,
            lines: deltas,
            posted_by: cmd.posted_by,
            occurred_at: cmd.occurred_at,
        }));
        Ok(events)
    }
}

impl GrnRecord {
    /// Validate one posted line against the accumulated line and build its delta.
    fn check_line(&self, line: &ReceiptLine, line_no: u32) -> Result<LineDelta, DomainError> {
        let sku = &line.sku;
        let quantities = [
            line.received,
            line.rejected,
            line.qc_pass,
            line.qc_fail,
            line.held,
            line.return_to_vendor,
        ];
        if quantities.iter().any(|q| *q < 0) {
            return Err(DomainError::validation(format!(
                "{sku}: quantities cannot be negative"
            )));
        }
        if line.ordered <= 0 {
            return Err(DomainError::validation(format!("{sku}: nothing was ordered")));
        }

        let prior = self.line(sku);
        match prior {
            Some(prior) if prior.status.is_closed() => {
                return Err(DomainError::line_closed(format!(
                    "{sku} is already {:?}",
                    prior.status
                )));
            }
            _ => {}
        }

        let base = |f: fn(&GrnLine) -> i64| prior.map(f).unwrap_or(0);
        let received = base(|l| l.received) + line.received;
        let rejected = base(|l| l.rejected) + line.rejected;
        let qc_pass = base(|l| l.qc_pass) + line.qc_pass;
        let qc_fail = base(|l| l.qc_fail) + line.qc_fail;
        let held = base(|l| l.held) + line.held;
        let return_to_vendor = base(|l| l.return_to_vendor) + line.return_to_vendor;

        if received > line.ordered {
            return Err(DomainError::quantity_exceeded(format!(
                "{sku}: received {received} exceeds ordered {}",
                line.ordered
            )));
        }
        if rejected + qc_pass > received {
            return Err(DomainError::validation(format!(
                "{sku}: rejected {rejected} + qc passed {qc_pass} exceed received {received}"
            )));
        }
        if qc_fail > received - qc_pass {
            return Err(DomainError::validation(format!(
                "{sku}: qc failed {qc_fail} exceeds received minus qc passed"
            )));
        }
        if held > received {
            return Err(DomainError::validation(format!(
                "{sku}: held {held} exceeds received {received}"
            )));
        }
        if return_to_vendor > rejected + qc_fail {
            return Err(DomainError::validation(format!(
                "{sku}: return to vendor {return_to_vendor} exceeds rejected and qc failed stock"
            )));
        }

        if line.batches.iter().any(|b| b.quantity <= 0) {
            return Err(DomainError::validation(format!(
                "{sku}: batch quantity must be positive"
            )));
        }
        let batch_total: i64 = line.batches.iter().map(|b| b.quantity).sum();
        if batch_total > line.received {
            return Err(DomainError::validation(format!(
                "{sku}: batches hold {batch_total} but only {} was received",
                line.received
            )));
        }

        Ok(LineDelta {
            line_no,
            sku: sku.clone(),
            ordered: line.ordered,
            received: line.received,
            rejected: line.rejected,
            qc_pass: line.qc_pass,
            qc_fail: line.qc_fail,
            held: line.held,
            return_to_vendor: line.return_to_vendor,
            batches: line.batches.clone(),
            photos: line.photos.clone(),
            status: line_status(line.ordered, rejected, qc_pass),
        })
    }
}
