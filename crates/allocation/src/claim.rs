use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procura_core::{Aggregate, AggregateId, AggregateRoot, CatalogItemId, DomainError, UserId};
use procura_events::Event;

use crate::unit_code::UnitCode;

/// Ownership of one unit code, across every purchase order.
///
/// One stream per code; the first claim wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitCodeClaim {
    id: AggregateId,
    owner: Option<(AggregateId, CatalogItemId)>,
    version: u64,
}

impl UnitCodeClaim {
    pub fn stream_id(unit_code: &UnitCode) -> AggregateId {
        AggregateId::derived("unit-code", unit_code.as_str())
    }

    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            owner: None,
            version: 0,
        }
    }

    /// (purchase order, catalog item) holding the code.
    pub fn owner(&self) -> Option<(AggregateId, CatalogItemId)> {
        self.owner
    }
}

impl AggregateRoot for UnitCodeClaim {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimUnitCode {
    pub unit_code: UnitCode,
    pub po_id: AggregateId,
    pub catalog_item: CatalogItemId,
    pub claimed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitCodeClaimed {
    pub unit_code: UnitCode,
    pub po_id: AggregateId,
    pub catalog_item: CatalogItemId,
    pub claimed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitCodeClaimEvent {
    UnitCodeClaimed(UnitCodeClaimed),
}

impl Event for UnitCodeClaimEvent {
    fn event_type(&self) -> &'static str {
        "allocation.unit_code.claimed"
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            UnitCodeClaimEvent::UnitCodeClaimed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for UnitCodeClaim {
    type Command = ClaimUnitCode;
    type Event = UnitCodeClaimEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            UnitCodeClaimEvent::UnitCodeClaimed(e) => {
                self.owner = Some((e.po_id, e.catalog_item));
            }
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if self.owner.is_some() {
            return Err(DomainError::invalid_unit_code(format!(
                "{} is already in use",
                command.unit_code
            )));
        }
        Ok(vec![UnitCodeClaimEvent::UnitCodeClaimed(UnitCodeClaimed {
            unit_code: command.unit_code.clone(),
            po_id: command.po_id,
            catalog_item: command.catalog_item,
            claimed_by: command.claimed_by,
            occurred_at: command.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procura_events::execute;

    #[test]
    fn second_claim_fails_even_from_another_po() {
        let code = UnitCode::compose(CatalogItemId(9), 1).unwrap();
        let mut claim = UnitCodeClaim::empty(UnitCodeClaim::stream_id(&code));
        let first_po = AggregateId::new();
        let claim_for = |po_id| ClaimUnitCode {
            unit_code: code.clone(),
            po_id,
            catalog_item: CatalogItemId(9),
            claimed_by: UserId::new(),
            occurred_at: Utc::now(),
        };

        execute(&mut claim, &claim_for(first_po)).unwrap();
        assert_eq!(claim.owner(), Some((first_po, CatalogItemId(9))));

        let err = execute(&mut claim, &claim_for(AggregateId::new())).unwrap_err();
        assert!(matches!(err, DomainError::InvalidUnitCode(_)));
        assert_eq!(claim.version(), 1);
    }

    #[test]
    fn stream_id_follows_code() {
        let a = UnitCode::compose(CatalogItemId(9), 1).unwrap();
        let b = UnitCode::compose(CatalogItemId(9), 2).unwrap();
        assert_ne!(UnitCodeClaim::stream_id(&a), UnitCodeClaim::stream_id(&b));
        assert_eq!(UnitCodeClaim::stream_id(&a), UnitCodeClaim::stream_id(&a.clone()));
    }
}
