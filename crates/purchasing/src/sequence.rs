use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procura_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use procura_events::Event;

/// Human-readable purchase order code, e.g. `PO-000042`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoCode {
    prefix: String,
    number: u64,
}

impl PoCode {
    pub fn new(prefix: impl Into<String>, number: u64) -> Self {
        Self {
            prefix: prefix.into(),
            number,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn number(&self) -> u64 {
        self.number
    }
}

impl core::fmt::Display for PoCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}-{:06}", self.prefix, self.number)
    }
}

/// Monotonic counter handing out purchase order numbers.
///
/// A single stream; concurrent allocations serialize on its revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoCodeSequence {
    id: AggregateId,
    last: u64,
    version: u64,
}

impl PoCodeSequence {
    /// Stream id of the process-wide sequence.
    pub fn stream_id() -> AggregateId {
        AggregateId::derived("po-code-sequence", "global")
    }

    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            last: 0,
            version: 0,
        }
    }

    pub fn last(&self) -> u64 {
        self.last
    }
}

impl AggregateRoot for PoCodeSequence {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateCode {
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeAllocated {
    pub number: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoCodeSequenceEvent {
    CodeAllocated(CodeAllocated),
}

impl Event for PoCodeSequenceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PoCodeSequenceEvent::CodeAllocated(_) => "purchasing.code_sequence.allocated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PoCodeSequenceEvent::CodeAllocated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PoCodeSequence {
    type Command = AllocateCode;
    type Event = PoCodeSequenceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PoCodeSequenceEvent::CodeAllocated(e) => self.last = e.number,
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        let number = self
            .last
            .checked_add(1)
            .ok_or_else(|| DomainError::invariant("purchase order code sequence exhausted"))?;
        Ok(vec![PoCodeSequenceEvent::CodeAllocated(CodeAllocated {
            number,
            occurred_at: command.occurred_at,
        })])
    }
}
