// Aggregator - group valid visits per member, rank, count
//
// Groups are keyed by barcode (unique in the member index). Ranking sums
// counts per member_id so a member holding two cards is ranked once.

use crate::records::Member;
use crate::validation::{InvalidVisit, ValidatedVisit};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_TOP_N: usize = 5;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberVisitGroup {
    pub member: Member,
    /// Input order
    pub visits: Vec<ValidatedVisit>,
}

impl MemberVisitGroup {
    pub fn visit_count(&self) -> usize {
        self.visits.len()
    }

    pub fn visit_ids(&self) -> impl Iterator<Item = &str> {
        self.visits.iter().map(|v| v.visit.visit_id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopMember {
    pub member_id: String,
    pub visit_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    /// Sorted by (member_id, barcode) ascending
    pub groups: Vec<MemberVisitGroup>,
    pub top_members: Vec<TopMember>,
    pub total_valid_visits: usize,
    pub total_walk_ins: usize,
    pub total_unknown_barcodes: usize,
    pub valid_visits_without_reservation: usize,
}

// ============================================================================
// AGGREGATION
// ============================================================================

pub fn aggregate(
    valid: Vec<ValidatedVisit>,
    invalid: &[InvalidVisit],
    top_n: usize,
) -> Aggregation {
    let total_valid_visits = valid.len();
    let valid_visits_without_reservation = valid
        .iter()
        .filter(|v| v.visit.reservation_id.is_none())
        .count();

    let (total_walk_ins, total_unknown_barcodes) =
        invalid.iter().fold((0, 0), |(walk_ins, unknown), v| {
            if v.reason.is_walk_in() {
                (walk_ins + 1, unknown)
            } else {
                (walk_ins, unknown + 1)
            }
        });

    let groups = group_visits(valid);
    let top_members = rank_members(&groups, top_n);

    Aggregation {
        groups,
        top_members,
        total_valid_visits,
        total_walk_ins,
        total_unknown_barcodes,
        valid_visits_without_reservation,
    }
}

/// One group per barcode, returned in (member_id, barcode) order.
pub fn group_visits(valid: Vec<ValidatedVisit>) -> Vec<MemberVisitGroup> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<MemberVisitGroup> = Vec::new();

    for visit in valid {
        let slot = *slots.entry(visit.member.barcode.clone()).or_insert_with(|| {
            groups.push(MemberVisitGroup {
                member: visit.member.clone(),
                visits: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].visits.push(visit);
    }

    groups.sort_by(|a, b| {
        (&a.member.member_id, &a.member.barcode).cmp(&(&b.member.member_id, &b.member.barcode))
    });
    groups
}

/// Visit count descending, member_id ascending on ties, first `top_n`.
pub fn rank_members(groups: &[MemberVisitGroup], top_n: usize) -> Vec<TopMember> {
    let mut per_member: HashMap<&str, usize> = HashMap::new();
    for group in groups {
        *per_member.entry(group.member.member_id.as_str()).or_insert(0) += group.visit_count();
    }

    let mut ranking: Vec<TopMember> = per_member
        .into_iter()
        .map(|(member_id, visit_count)| TopMember {
            member_id: member_id.to_string(),
            visit_count,
        })
        .collect();

    ranking.sort_by(|a, b| {
        b.visit_count
            .cmp(&a.visit_count)
            .then_with(|| a.member_id.cmp(&b.member_id))
    });
    ranking.truncate(top_n);
    ranking
}

// ============================================================================
// TESTS
// ============================================================================
