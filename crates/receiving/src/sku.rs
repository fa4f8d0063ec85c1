use serde::{Deserialize, Serialize};

use procura_allocation::UnitCode;
use procura_core::CatalogItemId;

/// What a GRN line counts: a whole catalog line, or one split unit code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Sku {
    Catalog(CatalogItemId),
    Unit(UnitCode),
}

impl Sku {
    pub fn catalog_item(&self) -> CatalogItemId {
        match self {
            Sku::Catalog(item) => *item,
            Sku::Unit(code) => code.catalog_item(),
        }
    }

    pub fn unit_code(&self) -> Option<&UnitCode> {
        match self {
            Sku::Unit(code) => Some(code),
            Sku::Catalog(_) => None,
        }
    }
}

impl core::fmt::Display for Sku {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Sku::Catalog(item) => write!(f, "item:{item}"),
            Sku::Unit(code) => write!(f, "unit:{code}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_sku_resolves_catalog_item_from_code() {
        let code = UnitCode::compose(CatalogItemId(55), 3).unwrap();
        let sku = Sku::Unit(code.clone());
        assert_eq!(sku.catalog_item(), CatalogItemId(55));
        assert_eq!(sku.unit_code(), Some(&code));
        assert_eq!(Sku::Catalog(CatalogItemId(55)).unit_code(), None);
    }

    #[test]
    fn serializes_tagged() {
        let json = serde_json::to_string(&Sku::Catalog(CatalogItemId(5))).unwrap();
        assert_eq!(json, r#"{"kind":"catalog","id":5}"#);
    }
}
