use serde::{Deserialize, Serialize};

use procura_core::{CatalogItemId, DomainError};

/// Width of the catalog item prefix.
pub const CATALOG_DIGITS: usize = 8;
/// Width of the per-unit suffix.
pub const SUFFIX_DIGITS: usize = 4;

const MAX_CATALOG_ID: u64 = 99_999_999;
const MAX_SUFFIX: u16 = 9_999;

/// Warehouse-unique unit code: catalog item id (8 digits, zero padded) followed by
/// 4 suffix digits, e.g. `000012340042` for item 1234.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UnitCode(String);

impl UnitCode {
    /// Parse a caller-supplied code and check it belongs to `catalog_item`.
    pub fn parse_for(raw: &str, catalog_item: CatalogItemId) -> Result<Self, DomainError> {
        let code = Self::parse(raw)?;
        if code.catalog_item() != catalog_item {
            return Err(DomainError::invalid_unit_code(format!(
                "{raw} does not encode catalog item {catalog_item}"
            )));
        }
        Ok(code)
    }

    /// Parse a code without checking which item it belongs to.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let raw = raw.trim();
        if raw.len() != CATALOG_DIGITS + SUFFIX_DIGITS {
            return Err(DomainError::invalid_unit_code(format!(
                "{raw}: expected {} digits",
                CATALOG_DIGITS + SUFFIX_DIGITS
            )));
        }
        if !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::invalid_unit_code(format!(
                "{raw}: only digits are allowed"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    /// Build the code for `catalog_item` with the given suffix.
    pub fn compose(catalog_item: CatalogItemId, suffix: u16) -> Result<Self, DomainError> {
        if catalog_item.value() > MAX_CATALOG_ID {
            return Err(DomainError::invalid_unit_code(format!(
                "catalog item {catalog_item} does not fit in {CATALOG_DIGITS} digits"
            )));
        }
        if suffix > MAX_SUFFIX {
            return Err(DomainError::invalid_unit_code(format!(
                "suffix {suffix} does not fit in {SUFFIX_DIGITS} digits"
            )));
        }
        Ok(Self(format!(
            "{:0cw$}{:0sw$}",
            catalog_item.value(),
            suffix,
            cw = CATALOG_DIGITS,
            sw = SUFFIX_DIGITS
        )))
    }

    pub fn catalog_item(&self) -> CatalogItemId {
        // Every constructor, deserialization included, goes through `parse` or `compose`.
        CatalogItemId(self.0[..CATALOG_DIGITS].parse().unwrap_or_default())
    }

    pub fn suffix(&self) -> &str {
        &self.0[CATALOG_DIGITS..]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for UnitCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UnitCode {
    type Error = DomainError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<UnitCode> for String {
    fn from(code: UnitCode) -> Self {
        code.0
    }
}
