// Visit Validator - resolve every visit against the member index
//
// Single pass, input order preserved on both sides. Invalid visits are
// logged and returned for diagnostics only; they never reach an aggregate.

use crate::records::{Member, MemberIndex, Visit};
use serde::Serialize;
use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    /// No barcode at all: a walk-in
    MissingBarcode,
    /// Barcode present but no member holds it
    UnknownBarcode,
}

impl InvalidReason {
    pub fn code(&self) -> &'static str {
        match self {
            InvalidReason::MissingBarcode => "missing_barcode",
            InvalidReason::UnknownBarcode => "unknown_barcode",
        }
    }

    pub fn is_walk_in(&self) -> bool {
        *self == InvalidReason::MissingBarcode
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A visit whose barcode resolved to a member
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedVisit {
    pub visit: Visit,
    pub member: Member,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidVisit {
    pub visit: Visit,
    pub reason: InvalidReason,
}

#[derive(Debug, Clone, Default)]
pub struct Validation {
    pub valid: Vec<ValidatedVisit>,
    pub invalid: Vec<InvalidVisit>,
}

impl Validation {
    pub fn count(&self, reason: InvalidReason) -> usize {
        self.invalid.iter().filter(|v| v.reason == reason).count()
    }
}

/// Classify a single visit.
pub fn classify(index: &MemberIndex, visit: &Visit) -> Result<Member, InvalidReason> {
    if visit.barcode.is_empty() {
        return Err(InvalidReason::MissingBarcode);
    }
    index
        .get(&visit.barcode)
        .cloned()
        .ok_or(InvalidReason::UnknownBarcode)
}

pub fn validate_visits(index: &MemberIndex, visits: Vec<Visit>) -> Validation {
    let mut validation = Validation::default();

    for visit in visits {
        match classify(index, &visit) {
            Ok(member) => validation.valid.push(ValidatedVisit { visit, member }),
            Err(reason) => {
                warn!(
                    visit_id = %visit.visit_id,
                    barcode = %visit.barcode,
                    reason = reason.code(),
                    "invalid visit excluded"
                );
                validation.invalid.push(InvalidVisit { visit, reason });
            }
        }
    }

    validation
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str, barcode: &str) -> Member {
        Member {
            member_id: id.to_string(),
            barcode: barcode.to_string(),
        }
    }

    fn visit(id: &str, barcode: &str) -> Visit {
        Visit {
            visit_id: id.to_string(),
            barcode: barcode.to_string(),
            reservation_id: None,
        }
    }

    #[test]
    fn test_classify_reasons() {
        let index: MemberIndex = vec![member("m1", "b1")].into_iter().collect();

        assert_eq!(classify(&index, &visit("v1", "b1")), Ok(member("m1", "b1")));
        assert_eq!(
            classify(&index, &visit("v2", "")),
            Err(InvalidReason::MissingBarcode)
        );
        assert_eq!(
            classify(&index, &visit("v3", "b2")),
            Err(InvalidReason::UnknownBarcode)
        );
    }

    #[test]
    fn test_validate_preserves_order_and_partitions_everything() {
        let index: MemberIndex = vec![member("M1", "B1"), member("M2", "B2")]
            .into_iter()
            .collect();
        let visits = vec![
            visit("V1", "B1"),
            visit("V2", "B2"),
            visit("V3", "B1"),
            visit("V4", ""),
            visit("V5", "B9"),
        ];

        let result = validate_visits(&index, visits);

        let valid: Vec<_> = result.valid.iter().map(|v| v.visit.visit_id.as_str()).collect();
        assert_eq!(valid, vec!["V1", "V2", "V3"]);
        assert!(result.valid.iter().all(|v| index.contains(&v.member)));

        let invalid: Vec<_> = result
            .invalid
            .iter()
            .map(|v| (v.visit.visit_id.as_str(), v.reason))
            .collect();
        assert_eq!(
            invalid,
            vec![
                ("V4", InvalidReason::MissingBarcode),
                ("V5", InvalidReason::UnknownBarcode)
            ]
        );
        assert_eq!(result.valid.len() + result.invalid.len(), 5);
        assert_eq!(result.count(InvalidReason::MissingBarcode), 1);
    }

    #[test]
    fn test_reason_codes() {
        assert_eq!(InvalidReason::MissingBarcode.to_string(), "missing_barcode");
        assert_eq!(InvalidReason::UnknownBarcode.code(), "unknown_barcode");
        assert!(InvalidReason::MissingBarcode.is_walk_in());
        assert!(!InvalidReason::UnknownBarcode.is_walk_in());
    }
}
