use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrnLineStatus {
    Pending,
    Partial,
    Completed,
    Rejected,
}

impl GrnLineStatus {
    /// Closed lines accept no further postings.
    pub fn is_closed(self) -> bool {
        matches!(self, GrnLineStatus::Completed | GrnLineStatus::Rejected)
    }
}

/// Classify a GRN line from its accumulated quantities.
///
/// Rules are checked in order; the first match wins:
/// 1. everything ordered was rejected → `Rejected`
/// 2. everything ordered passed QC → `Completed`
/// 3. rejected + passed cover the order → `Partial`
/// 4. some but not all rejected, or some but not all passed → `Partial`
/// 5. otherwise → `Pending`
pub fn line_status(ordered: i64, rejected: i64, qc_pass: i64) -> GrnLineStatus {
    if rejected == ordered {
        GrnLineStatus::Rejected
    } else if qc_pass == ordered {
        GrnLineStatus::Completed
    } else if rejected + qc_pass == ordered {
        GrnLineStatus::Partial
    } else if (rejected > 0 && rejected < ordered) || (qc_pass > 0 && qc_pass < ordered) {
        GrnLineStatus::Partial
    } else {
        GrnLineStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documented_examples() {
        assert_eq!(line_status(10, 10, 0), GrnLineStatus::Rejected);
        assert_eq!(line_status(10, 0, 10), GrnLineStatus::Completed);
        assert_eq!(line_status(10, 3, 7), GrnLineStatus::Partial);
        assert_eq!(line_status(10, 0, 0), GrnLineStatus::Pending);
    }

    #[test]
    fn ninety_passed_ten_rejected_is_partial() {
        assert_eq!(line_status(100, 10, 90), GrnLineStatus::Partial);
    }

    #[test]
    fn partial_pass_without_rejection_is_partial() {
        assert_eq!(line_status(10, 0, 4), GrnLineStatus::Partial);
        assert_eq!(line_status(10, 2, 0), GrnLineStatus::Partial);
    }

    #[test]
    fn closed_states() {
        assert!(GrnLineStatus::Completed.is_closed());
        assert!(GrnLineStatus::Rejected.is_closed());
        assert!(!GrnLineStatus::Partial.is_closed());
        assert!(!GrnLineStatus::Pending.is_closed());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn quantities() -> impl Strategy<Value = (i64, i64, i64)> {
            (1i64..1_000).prop_flat_map(|ordered| {
                (0..=ordered).prop_flat_map(move |rejected| {
                    (Just(ordered), Just(rejected), 0..=(ordered - rejected))
                })
            })
        }

        proptest! {
            #![proptest_config(ProptestConfig { cases: 512, ..ProptestConfig::default() })]

            #[test]
            fn classification_is_total_and_consistent((ordered, rejected, qc_pass) in quantities()) {
                let status = line_status(ordered, rejected, qc_pass);
                prop_assert_eq!(status, line_status(ordered, rejected, qc_pass));

                match status {
                    GrnLineStatus::Rejected => prop_assert_eq!(rejected, ordered),
                    GrnLineStatus::Completed => prop_assert_eq!(qc_pass, ordered),
                    GrnLineStatus::Pending => {
                        prop_assert_eq!(rejected, 0);
                        prop_assert_eq!(qc_pass, 0);
                    }
                    GrnLineStatus::Partial => {
                        prop_assert!(rejected < ordered && qc_pass < ordered);
                        prop_assert!(rejected + qc_pass > 0);
                    }
                }
            }
        }
    }
}
