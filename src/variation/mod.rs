use std::collections::BTreeMap;

use serde::Serialize;

use crate::aggregate::{OVERALL_LABEL, median};
use crate::panel::classify::LinkedPerson;
use crate::record::{IncomeField, InterviewRecord};
use crate::rules::{CategoryRule, FallbackMode, RuleError};
use crate::wave::Wave;

#[derive(Debug)]
pub struct VariationSpec<'a> {
    pub field: IncomeField,
    pub rule: Option<&'a CategoryRule>,
    pub fallback: FallbackMode,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Exclusions {
    pub not_linkable: u64,
    pub insufficient_presence: u64,
    pub missing_first: u64,
    pub missing_last: u64,
    pub zero_first: u64,
    pub unlabeled: u64,
}

impl Exclusions {
    pub fn total(&self) -> u64 {
        self.not_linkable
            + self.insufficient_presence
            + self.missing_first
            + self.missing_last
            + self.zero_first
            + self.unlabeled
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariationCell {
    pub n: u64,
    pub median_change: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariationResult {
    pub period: String,
    pub cells: BTreeMap<String, VariationCell>,
    pub excluded: Exclusions,
}

pub fn compute_variation(
    start: Wave,
    persons: &[LinkedPerson],
    spec: &VariationSpec<'_>,
) -> Result<VariationResult, RuleError> {
    let mut samples: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    let mut excluded = Exclusions::default();

    for person in persons {
        if !person.match_class.is_linkable() {
            excluded.not_linkable += 1;
            continue;
        }
        if !person.complete_panel() {
            excluded.insufficient_presence += 1;
            continue;
        }
        let (first, last) = endpoints(person);
        let Some(v_first) = first.income(spec.field) else {
            excluded.missing_first += 1;
            continue;
        };
        if v_first == 0.0 {
            excluded.zero_first += 1;
            continue;
        }
        let Some(v_last) = last.income(spec.field) else {
            excluded.missing_last += 1;
            continue;
        };

        let label = match spec.rule {
            Some(rule) => match rule.apply(first, spec.fallback)? {
                Some(label) => label,
                None => {
                    excluded.unlabeled += 1;
                    continue;
                }
            },
            None => OVERALL_LABEL.to_string(),
        };
        samples
            .entry(label)
            .or_default()
            .push((v_last - v_first) / v_first);
    }

    let cells = samples
        .into_iter()
        .map(|(label, changes)| {
            let cell = VariationCell {
                n: changes.len() as u64,
                median_change: median(&changes),
            };
            (label, cell)
        })
        .collect();

    Ok(VariationResult {
        period: start.label(),
        cells,
        excluded,
    })
}

fn endpoints(person: &LinkedPerson) -> (&InterviewRecord, &InterviewRecord) {
    let first = person
        .records
        .iter()
        .min_by_key(|record| record.wave())
        .expect("linked person has records");
    let last = person
        .records
        .iter()
        .max_by_key(|record| record.wave())
        .expect("linked person has records");
    (first, last)
}
