use std::collections::BTreeMap;

use crate::panel::{HouseholdGroup, collect_households, partition_groups};
use crate::record::InterviewRecord;
use crate::record::identity::person_id;
use crate::wave::PANEL_WINDOW_LEN;

pub const LINKABLE_CLASS_MAX: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MatchClass {
    Consistent,
    Reordered,
    Recomposed,
    MissingOne,
    Fragmentary,
}

impl MatchClass {
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Consistent => 1,
            Self::Reordered => 2,
            Self::Recomposed => 3,
            Self::MissingOne => 4,
            Self::Fragmentary => 5,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Consistent),
            2 => Some(Self::Reordered),
            3 => Some(Self::Recomposed),
            4 => Some(Self::MissingOne),
            5 => Some(Self::Fragmentary),
            _ => None,
        }
    }

    pub fn is_linkable(self) -> bool {
        self.as_u8() <= LINKABLE_CLASS_MAX
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkedPerson {
    pub person_id: String,
    pub group_id: String,
    pub match_class: MatchClass,
    pub sex: String,
    pub birth_date: String,
    pub records: Vec<InterviewRecord>,
    pub group_slot_count: usize,
}

impl LinkedPerson {
    pub fn presence(&self) -> usize {
        self.records.len()
    }

    pub fn complete_panel(&self) -> bool {
        self.match_class.is_linkable() && self.presence() == PANEL_WINDOW_LEN as usize
    }
}

#[derive(Debug, Default)]
pub struct LinkOutcome {
    pub persons: Vec<LinkedPerson>,
    pub household_count: usize,
    pub group_count: usize,
}

pub fn link_window(waves: Vec<Vec<InterviewRecord>>) -> LinkOutcome {
    let households = collect_households(waves);
    let mut outcome = LinkOutcome {
        household_count: households.len(),
        ..LinkOutcome::default()
    };
    for window in &households {
        for group in partition_groups(window) {
            outcome.group_count += 1;
            outcome.persons.extend(classify_group(&group));
        }
    }
    outcome
}

struct Candidate {
    sex: String,
    birth_date: String,
    records: Vec<InterviewRecord>,
    ambiguous: bool,
    disambiguator: u32,
}

pub fn classify_group(group: &HouseholdGroup) -> Vec<LinkedPerson> {
    let candidates = link_candidates(group);
    let size_constant = constant_roster_size(group);
    let singleton_group = group.slot_count() < 2;

    let group_consistent = size_constant
        && candidates.iter().all(|candidate| {
            !candidate.ambiguous
                && full_presence(candidate, group)
                && admin_fields_invariant(candidate)
        });

    candidates
        .into_iter()
        .map(|candidate| {
            let missing = group.slot_count() - presence_slots(&candidate);
            let match_class = if singleton_group || candidate.ambiguous {
                MatchClass::Fragmentary
            } else if missing >= 2 {
                MatchClass::Fragmentary
            } else if missing == 1 {
                MatchClass::MissingOne
            } else if group_consistent {
                MatchClass::Consistent
            } else if size_constant {
                MatchClass::Reordered
            } else {
                MatchClass::Recomposed
            };

            LinkedPerson {
                person_id: person_id(
                    &group.group_id,
                    &candidate.sex,
                    &candidate.birth_date,
                    candidate.disambiguator,
                ),
                group_id: group.group_id.clone(),
                match_class,
                sex: candidate.sex,
                birth_date: candidate.birth_date,
                records: candidate.records,
                group_slot_count: group.slot_count(),
            }
        })
        .collect()
}

fn link_candidates(group: &HouseholdGroup) -> Vec<Candidate> {
    let mut by_evidence: BTreeMap<(String, String), Vec<InterviewRecord>> = BTreeMap::new();
    for records in group.records.values() {
        for record in records {
            by_evidence
                .entry((record.sex.clone(), record.birth_date.clone()))
                .or_default()
                .push(record.clone());
        }
    }

    let mut out = Vec::new();
    for ((sex, birth_date), mut records) in by_evidence {
        records.sort_by_key(|record| (record.interview, record.order));
        let ambiguous = has_slot_duplicates(&records);
        if !ambiguous {
            out.push(Candidate {
                sex,
                birth_date,
                records,
                ambiguous: false,
                disambiguator: 0,
            });
            continue;
        }

        let mut by_order: BTreeMap<u8, Vec<InterviewRecord>> = BTreeMap::new();
        for record in records {
            by_order.entry(record.order).or_default().push(record);
        }
        for (disambiguator, (_, sub_records)) in by_order.into_iter().enumerate() {
            // A clean split (twins holding distinct, stable orders) resolves
            // the duplication; only leftover slot collisions stay ambiguous.
            let ambiguous = has_slot_duplicates(&sub_records);
            out.push(Candidate {
                sex: sex.clone(),
                birth_date: birth_date.clone(),
                records: sub_records,
                ambiguous,
                disambiguator: disambiguator as u32,
            });
        }
    }
    out
}

fn has_slot_duplicates(records: &[InterviewRecord]) -> bool {
    let mut counts: BTreeMap<u8, usize> = BTreeMap::new();
    for record in records {
        *counts.entry(record.interview).or_default() += 1;
    }
    counts.values().any(|count| *count > 1)
}

fn presence_slots(candidate: &Candidate) -> usize {
    let mut slots = candidate
        .records
        .iter()
        .map(|record| record.interview)
        .collect::<Vec<_>>();
    slots.sort_unstable();
    slots.dedup();
    slots.len()
}

fn full_presence(candidate: &Candidate, group: &HouseholdGroup) -> bool {
    presence_slots(candidate) == group.slot_count()
}

fn admin_fields_invariant(candidate: &Candidate) -> bool {
    let Some(first) = candidate.records.first() else {
        return true;
    };
    candidate
        .records
        .iter()
        .all(|record| record.relationship == first.relationship && record.order == first.order)
}

fn constant_roster_size(group: &HouseholdGroup) -> bool {
    let mut sizes = group.records.values().map(Vec::len);
    let Some(first) = sizes.next() else {
        return true;
    };
    sizes.all(|size| size == first)
}

pub fn class_shares(persons: &[LinkedPerson]) -> BTreeMap<u8, f64> {
    let mut counts: BTreeMap<u8, usize> = BTreeMap::new();
    for person in persons {
        *counts.entry(person.match_class.as_u8()).or_default() += 1;
    }
    let total = persons.len().max(1) as f64;
    counts
        .into_iter()
        .map(|(class, count)| (class, count as f64 / total))
        .collect()
}
