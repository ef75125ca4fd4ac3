pub mod classify;

use std::collections::{BTreeMap, BTreeSet};

use crate::record::InterviewRecord;
use crate::record::identity::household_key;

#[derive(Debug, Clone)]
pub struct HouseholdWindow {
    pub household_key: String,
    pub slots: BTreeMap<u8, Vec<InterviewRecord>>,
}

#[derive(Debug, Clone)]
pub struct HouseholdGroup {
    pub group_id: String,
    pub household_key: String,
    pub slots: Vec<u8>,
    pub records: BTreeMap<u8, Vec<InterviewRecord>>,
}

impl HouseholdGroup {
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

pub fn collect_households(waves: Vec<Vec<InterviewRecord>>) -> Vec<HouseholdWindow> {
    let mut by_household: BTreeMap<String, BTreeMap<u8, Vec<InterviewRecord>>> = BTreeMap::new();
    for records in waves {
        for record in records {
            by_household
                .entry(household_key(&record))
                .or_default()
                .entry(record.interview)
                .or_default()
                .push(record);
        }
    }

    by_household
        .into_iter()
        .map(|(household_key, slots)| HouseholdWindow {
            household_key,
            slots,
        })
        .collect()
}

pub fn partition_groups(window: &HouseholdWindow) -> Vec<HouseholdGroup> {
    let occupied = window.slots.keys().copied().collect::<Vec<_>>();
    let mut runs: Vec<Vec<u8>> = Vec::new();

    for slot in occupied {
        let split = match runs.last().and_then(|run| run.last()) {
            Some(&prev) => slot != prev + 1 || !rosters_overlap(window, prev, slot),
            None => true,
        };
        if split {
            runs.push(vec![slot]);
        } else {
            runs.last_mut().expect("run exists").push(slot);
        }
    }

    runs.into_iter()
        .map(|slots| {
            let first = slots[0];
            let records = slots
                .iter()
                .map(|slot| (*slot, window.slots[slot].clone()))
                .collect::<BTreeMap<_, _>>();
            HouseholdGroup {
                group_id: format!("{}#{first}", window.household_key),
                household_key: window.household_key.clone(),
                slots,
                records,
            }
        })
        .collect()
}

fn rosters_overlap(window: &HouseholdWindow, left: u8, right: u8) -> bool {
    let left_roster = roster(&window.slots[&left]);
    let right_roster = roster(&window.slots[&right]);
    left_roster.intersection(&right_roster).next().is_some()
}

fn roster(records: &[InterviewRecord]) -> BTreeSet<(String, String)> {
    records
        .iter()
        .map(|record| (record.sex.clone(), record.birth_date.clone()))
        .collect()
}
