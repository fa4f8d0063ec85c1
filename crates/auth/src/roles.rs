use serde::{Deserialize, Serialize};

/// Role taking part in the purchase order approval chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproverRole {
    Creator,
    CategoryHead,
    Admin,
}

impl ApproverRole {
    pub const ALL: [ApproverRole; 3] = [
        ApproverRole::Creator,
        ApproverRole::CategoryHead,
        ApproverRole::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApproverRole::Creator => "creator",
            ApproverRole::CategoryHead => "category_head",
            ApproverRole::Admin => "admin",
        }
    }
}

impl core::fmt::Display for ApproverRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order in which roles decide on a submitted purchase order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalChain {
    order: &'static [ApproverRole],
}

impl ApprovalChain {
    /// category head → admin → creator review.
    pub const STANDARD: ApprovalChain = ApprovalChain {
        order: &[
            ApproverRole::CategoryHead,
            ApproverRole::Admin,
            ApproverRole::Creator,
        ],
    };

    pub fn first(&self) -> ApproverRole {
        self.order[0]
    }

    /// The role deciding after `role`, or `None` when `role` is the final review.
    pub fn next_after(&self, role: ApproverRole) -> Option<ApproverRole> {
        let idx = self.order.iter().position(|r| *r == role)?;
        self.order.get(idx + 1).copied()
    }

    pub fn is_final(&self, role: ApproverRole) -> bool {
        self.order.last() == Some(&role)
    }

    pub fn roles(&self) -> &'static [ApproverRole] {
        self.order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_chain_order() {
        let chain = ApprovalChain::STANDARD;
        assert_eq!(chain.first(), ApproverRole::CategoryHead);
        assert_eq!(chain.next_after(ApproverRole::CategoryHead), Some(ApproverRole::Admin));
        assert_eq!(chain.next_after(ApproverRole::Admin), Some(ApproverRole::Creator));
        assert_eq!(chain.next_after(ApproverRole::Creator), None);
        assert!(chain.is_final(ApproverRole::Creator));
    }

    #[test]
    fn roles_serialize_snake_case() {
        let json = serde_json::to_string(&ApproverRole::CategoryHead).unwrap();
        assert_eq!(json, "\"category_head\"");
    }
}
