use std::collections::HashMap;

use serde::Deserialize;

use crate::record::{IncomeField, InterviewRecord};
use crate::wave::Wave;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Factors {
    pub habitual: f64,
    pub effective: f64,
}

#[derive(Debug, Default)]
pub struct DeflatorTable {
    periods: HashMap<Wave, HashMap<String, Factors>>,
}

#[derive(Debug, Deserialize)]
struct DeflatorRow {
    year: u16,
    quarter: u8,
    state: String,
    habitual: f64,
    effective: f64,
}

#[derive(Debug)]
pub enum DeflateError {
    Json { line: usize, err: serde_json::Error },
    InvalidRow { line: usize, reason: String },
    MissingPeriod(Wave),
}

impl std::fmt::Display for DeflateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json { line, err } => write!(f, "deflator line {line}: {err}"),
            Self::InvalidRow { line, reason } => write!(f, "deflator line {line}: {reason}"),
            Self::MissingPeriod(wave) => {
                write!(f, "deflator table has no rows for period {}", wave.label())
            }
        }
    }
}

impl std::error::Error for DeflateError {}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeflationOutcome {
    pub adjusted: usize,
    pub unmatched_states: usize,
}

impl DeflatorTable {
    pub fn parse_jsonl(input: &str) -> Result<Self, DeflateError> {
        let mut table = Self::default();
        for (idx, raw) in input.lines().enumerate() {
            let line = idx + 1;
            if raw.trim().is_empty() {
                continue;
            }
            let row: DeflatorRow =
                serde_json::from_str(raw).map_err(|err| DeflateError::Json { line, err })?;
            let wave = Wave::new(row.year, row.quarter).map_err(|err| DeflateError::InvalidRow {
                line,
                reason: err.to_string(),
            })?;
            if !row.habitual.is_finite() || !row.effective.is_finite() {
                return Err(DeflateError::InvalidRow {
                    line,
                    reason: "deflation factors must be finite".to_string(),
                });
            }
            table.periods.entry(wave).or_default().insert(
                row.state.trim().to_string(),
                Factors {
                    habitual: row.habitual,
                    effective: row.effective,
                },
            );
        }
        Ok(table)
    }

    pub fn factors(&self, wave: Wave, state: &str) -> Option<Factors> {
        self.periods.get(&wave)?.get(state.trim()).copied()
    }

    pub fn has_period(&self, wave: Wave) -> bool {
        self.periods.contains_key(&wave)
    }
}

pub fn deflate_period(
    records: &mut [InterviewRecord],
    table: &DeflatorTable,
    wave: Wave,
) -> Result<DeflationOutcome, DeflateError> {
    if !table.has_period(wave) {
        return Err(DeflateError::MissingPeriod(wave));
    }

    let mut outcome = DeflationOutcome::default();
    for record in records {
        match table.factors(wave, &record.state) {
            Some(factors) => {
                apply_factors(record, factors);
                outcome.adjusted += 1;
            }
            None => {
                for field in IncomeField::ALL {
                    record.set_income(field, None);
                }
                outcome.unmatched_states += 1;
            }
        }
    }
    Ok(outcome)
}

/// Deflates records that span several quarters, such as the interview
/// trail of one linked person. Every quarter present must be covered by
/// the table.
pub fn deflate_mixed(
    records: &mut [InterviewRecord],
    table: &DeflatorTable,
) -> Result<DeflationOutcome, DeflateError> {
    let mut outcome = DeflationOutcome::default();
    for record in records {
        let wave = record.wave();
        if !table.has_period(wave) {
            return Err(DeflateError::MissingPeriod(wave));
        }
        match table.factors(wave, &record.state) {
            Some(factors) => {
                apply_factors(record, factors);
                outcome.adjusted += 1;
            }
            None => {
                for field in IncomeField::ALL {
                    record.set_income(field, None);
                }
                outcome.unmatched_states += 1;
            }
        }
    }
    Ok(outcome)
}

fn apply_factors(record: &mut InterviewRecord, factors: Factors) {
    record.habitual_main = record.habitual_main.map(|value| value * factors.habitual);
    record.habitual_total = record.habitual_total.map(|value| value * factors.habitual);
    record.effective_main = record.effective_main.map(|value| value * factors.effective);
    record.effective_total = record.effective_total.map(|value| value * factors.effective);
}

#[cfg(test)]
mod tests {
    use super::{DeflateError, DeflatorTable, deflate_period};
    use crate::record::{IncomeField, sample_record};
    use crate::wave::Wave;

    fn table() -> DeflatorTable {
        let rows = concat!(
            r#"{"year":2023,"quarter":1,"state":"35","habitual":1.1,"effective":1.2}"#,
            "\n",
            r#"{"year":2023,"quarter":1,"state":"33","habitual":1.0,"effective":1.0}"#,
            "\n",
        );
        DeflatorTable::parse_jsonl(rows).expect("parse deflators")
    }

    #[test]
    fn habitual_and_effective_factors_apply_to_their_fields() {
        let mut records = vec![sample_record(1, 1)];
        let wave = Wave::new(2023, 1).expect("wave");
        let outcome = deflate_period(&mut records, &table(), wave).expect("deflate");
        assert_eq!(outcome.adjusted, 1);
        assert_eq!(outcome.unmatched_states, 0);
        assert_eq!(records[0].habitual_main, Some(2000.0 * 1.1));
        assert_eq!(records[0].habitual_total, Some(2500.0 * 1.1));
        assert_eq!(records[0].effective_main, Some(2000.0 * 1.2));
        assert_eq!(records[0].effective_total, Some(2500.0 * 1.2));
    }

    #[test]
    fn unmatched_state_makes_income_missing_not_zero() {
        let mut record = sample_record(1, 1);
        record.state = "99".to_string();
        let mut records = vec![record];
        let wave = Wave::new(2023, 1).expect("wave");
        let outcome = deflate_period(&mut records, &table(), wave).expect("deflate");
        assert_eq!(outcome.unmatched_states, 1);
        for field in IncomeField::ALL {
            assert_eq!(records[0].income(field), None);
        }
    }

    #[test]
    fn missing_income_stays_missing_after_adjustment() {
        let mut record = sample_record(1, 1);
        record.effective_total = None;
        let mut records = vec![record];
        let wave = Wave::new(2023, 1).expect("wave");
        deflate_period(&mut records, &table(), wave).expect("deflate");
        assert_eq!(records[0].effective_total, None);
        assert_eq!(records[0].habitual_total, Some(2500.0 * 1.1));
    }

    #[test]
    fn missing_period_is_fatal_for_that_wave_only() {
        let mut records = vec![sample_record(1, 1)];
        let wave = Wave::new(2019, 3).expect("wave");
        let err = deflate_period(&mut records, &table(), wave).expect_err("missing period");
        assert!(matches!(err, DeflateError::MissingPeriod(_)));
        assert_eq!(records[0].habitual_main, Some(2000.0));
    }
}
