//! Collaborators owned by other systems: catalog, vendor/facility master data,
//! and who receives approval mail.
//!
//! In-memory implementations back tests and local runs.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use procura_auth::ApproverRole;
use procura_core::{CatalogItemId, FacilityId, VendorId};
use procura_purchasing::{CatalogSnapshot, PurchaseOrder};

/// Catalog attributes by item, as of now.
pub trait CatalogLookup: Send + Sync {
    fn snapshot(&self, item: CatalogItemId) -> Option<CatalogSnapshot>;
}

/// Existence checks against vendor and facility master data.
pub trait PartyDirectory: Send + Sync {
    fn vendor_exists(&self, vendor: VendorId) -> bool;
    fn facility_exists(&self, facility: FacilityId) -> bool;
}

/// Mail addresses that act for `role` on a given order.
pub trait RecipientDirectory: Send + Sync {
    fn recipients(&self, role: ApproverRole, order: &PurchaseOrder) -> Vec<String>;
}

#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    items: RwLock<HashMap<CatalogItemId, CatalogSnapshot>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, item: CatalogItemId, snapshot: CatalogSnapshot) {
        if let Ok(mut items) = self.items.write() {
            items.insert(item, snapshot);
        }
    }

    pub fn with_item(self, item: CatalogItemId, snapshot: CatalogSnapshot) -> Self {
        self.insert(item, snapshot);
        self
    }
}

impl CatalogLookup for InMemoryCatalog {
    fn snapshot(&self, item: CatalogItemId) -> Option<CatalogSnapshot> {
        self.items.read().ok()?.get(&item).cloned()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPartyDirectory {
    vendors: RwLock<HashSet<VendorId>>,
    facilities: RwLock<HashSet<FacilityId>>,
}

impl InMemoryPartyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vendor(&self, vendor: VendorId) {
        if let Ok(mut vendors) = self.vendors.write() {
            vendors.insert(vendor);
        }
    }

    pub fn add_facility(&self, facility: FacilityId) {
        if let Ok(mut facilities) = self.facilities.write() {
            facilities.insert(facility);
        }
    }
}

impl PartyDirectory for InMemoryPartyDirectory {
    fn vendor_exists(&self, vendor: VendorId) -> bool {
        self.vendors.read().map(|v| v.contains(&vendor)).unwrap_or(false)
    }

    fn facility_exists(&self, facility: FacilityId) -> bool {
        self.facilities
            .read()
            .map(|f| f.contains(&facility))
            .unwrap_or(false)
    }
}

/// Fixed role → addresses table; the order is not consulted.
#[derive(Debug, Clone, Default)]
pub struct StaticRecipients {
    by_role: HashMap<ApproverRole, Vec<String>>,
}

impl StaticRecipients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, role: ApproverRole, address: impl Into<String>) -> Self {
        self.by_role.entry(role).or_default().push(address.into());
        self
    }
}

impl RecipientDirectory for StaticRecipients {
    fn recipients(&self, role: ApproverRole, _order: &PurchaseOrder) -> Vec<String> {
        self.by_role.get(&role).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procura_core::AggregateId;
    use procura_purchasing::{Dimensions, PurchaseOrderId};

    #[test]
    fn catalog_returns_inserted_snapshot() {
        let catalog = InMemoryCatalog::new().with_item(
            CatalogItemId(12),
            CatalogSnapshot {
                unit_price: 500,
                tax_code: "GST5".to_string(),
                weight_grams: 10,
                dimensions: Dimensions::default(),
                mrp: 650,
            },
        );
        assert_eq!(catalog.snapshot(CatalogItemId(12)).unwrap().unit_price, 500);
        assert!(catalog.snapshot(CatalogItemId(13)).is_none());
    }

    #[test]
    fn party_directory_checks_membership() {
        let parties = InMemoryPartyDirectory::new();
        let vendor = VendorId::new();
        parties.add_vendor(vendor);
        assert!(parties.vendor_exists(vendor));
        assert!(!parties.vendor_exists(VendorId::new()));
        assert!(!parties.facility_exists(FacilityId::new()));
    }

    #[test]
    fn static_recipients_by_role() {
        let recipients = StaticRecipients::new()
            .with(ApproverRole::Admin, "ops@example.com")
            .with(ApproverRole::Admin, "cfo@example.com");
        let po = PurchaseOrder::empty(PurchaseOrderId::new(AggregateId::new()));
        assert_eq!(recipients.recipients(ApproverRole::Admin, &po).len(), 2);
        assert!(recipients.recipients(ApproverRole::Creator, &po).is_empty());
    }
}
