use serde::{Deserialize, Serialize};

use procura_core::{CatalogItemId, DomainError};

/// Package dimensions in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Dimensions {
    pub length_mm: u32,
    pub width_mm: u32,
    pub height_mm: u32,
}

/// Catalog attributes frozen onto a PO line when the line is written.
///
/// Money is in minor units (e.g. paise/cents).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub unit_price: i64,
    pub tax_code: String,
    pub weight_grams: u32,
    pub dimensions: Dimensions,
    pub mrp: i64,
}

/// Requested line, with the catalog snapshot already resolved by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPoLine {
    pub catalog_item: CatalogItemId,
    pub quantity: i64,
    /// Negotiated price; `None` uses the snapshot price.
    pub unit_price: Option<i64>,
    pub snapshot: CatalogSnapshot,
}

/// Purchase order line (one matrix row).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoLine {
    pub line_no: u32,
    pub catalog_item: CatalogItemId,
    pub quantity: i64,
    pub unit_price: i64,
    pub line_total: i64,
    pub snapshot: CatalogSnapshot,
}

/// Validate requested lines and price them. Returns the lines and the order total.
pub(crate) fn build_lines(requested: &[NewPoLine]) -> Result<(Vec<PoLine>, i64), DomainError> {
    if requested.is_empty() {
        return Err(DomainError::validation("purchase order needs at least one line"));
    }

    let mut lines = Vec::with_capacity(requested.len());
    let mut total: i64 = 0;
    for (idx, req) in requested.iter().enumerate() {
        if req.quantity <= 0 {
            return Err(DomainError::validation(format!(
                "line {}: quantity must be positive",
                idx + 1
            )));
        }
        let unit_price = req.unit_price.unwrap_or(req.snapshot.unit_price);
        if unit_price < 0 {
            return Err(DomainError::validation(format!(
                "line {}: unit price cannot be negative",
                idx + 1
            )));
        }
        let line_total = req
            .quantity
            .checked_mul(unit_price)
            .ok_or_else(|| DomainError::validation(format!("line {}: amount overflow", idx + 1)))?;
        total = total
            .checked_add(line_total)
            .ok_or_else(|| DomainError::validation("order total overflow"))?;

        lines.push(PoLine {
            line_no: (idx as u32) + 1,
            catalog_item: req.catalog_item,
            quantity: req.quantity,
            unit_price,
            line_total,
            snapshot: req.snapshot.clone(),
        });
    }
    Ok((lines, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(price: i64) -> CatalogSnapshot {
        CatalogSnapshot {
            unit_price: price,
            tax_code: "GST18".to_string(),
            weight_grams: 250,
            dimensions: Dimensions::default(),
            mrp: price * 2,
        }
    }

    #[test]
    fn prices_lines_from_snapshot_or_override() {
        let (lines, total) = build_lines(&[
            NewPoLine {
                catalog_item: CatalogItemId(1),
                quantity: 3,
                unit_price: None,
                snapshot: snapshot(100),
            },
            NewPoLine {
                catalog_item: CatalogItemId(2),
                quantity: 2,
                unit_price: Some(40),
                snapshot: snapshot(100),
            },
        ])
        .unwrap();

        assert_eq!(lines[0].line_total, 300);
        assert_eq!(lines[1].unit_price, 40);
        assert_eq!(lines[1].line_no, 2);
        assert_eq!(total, 380);
    }

    #[test]
    fn rejects_empty_and_non_positive() {
        assert!(build_lines(&[]).is_err());
        let err = build_lines(&[NewPoLine {
            catalog_item: CatalogItemId(1),
            quantity: 0,
            unit_price: None,
            snapshot: snapshot(1),
        }])
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
