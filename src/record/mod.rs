pub mod identity;

use serde::{Deserialize, Serialize};

use crate::wave::Wave;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewRecord {
    pub year: u16,
    pub quarter: u8,
    pub state: String,
    pub household: String,
    pub visit: u8,
    pub interview: u8,
    pub order: u8,
    pub sex: String,
    pub birth_date: String,
    pub relationship: String,
    #[serde(default)]
    pub occupation: Option<String>,
    #[serde(default)]
    pub race: Option<String>,
    #[serde(default)]
    pub education: Option<String>,
    #[serde(default)]
    pub age: Option<u16>,
    pub weight: f64,
    #[serde(default)]
    pub habitual_main: Option<f64>,
    #[serde(default)]
    pub effective_main: Option<f64>,
    #[serde(default)]
    pub habitual_total: Option<f64>,
    #[serde(default)]
    pub effective_total: Option<f64>,
}

impl InterviewRecord {
    pub fn wave(&self) -> Wave {
        Wave {
            year: self.year,
            quarter: self.quarter,
        }
    }

    pub fn income(&self, field: IncomeField) -> Option<f64> {
        match field {
            IncomeField::HabitualMain => self.habitual_main,
            IncomeField::EffectiveMain => self.effective_main,
            IncomeField::HabitualTotal => self.habitual_total,
            IncomeField::EffectiveTotal => self.effective_total,
        }
    }

    pub fn set_income(&mut self, field: IncomeField, value: Option<f64>) {
        match field {
            IncomeField::HabitualMain => self.habitual_main = value,
            IncomeField::EffectiveMain => self.effective_main = value,
            IncomeField::HabitualTotal => self.habitual_total = value,
            IncomeField::EffectiveTotal => self.effective_total = value,
        }
    }

    fn validate(&self, line: usize) -> Result<(), RecordError> {
        if !(1..=4).contains(&self.quarter) {
            return Err(RecordError::invalid(
                line,
                format!("quarter `{}` is not in 1..=4", self.quarter),
            ));
        }
        if !(1..=5).contains(&self.interview) {
            return Err(RecordError::invalid(
                line,
                format!("interview slot `{}` is not in 1..=5", self.interview),
            ));
        }
        if !self.weight.is_finite() || self.weight < 0.0 {
            return Err(RecordError::invalid(
                line,
                format!("calibration weight `{}` is negative or not finite", self.weight),
            ));
        }
        for field in IncomeField::ALL {
            if let Some(value) = self.income(field) {
                if !value.is_finite() || value < 0.0 {
                    return Err(RecordError::invalid(
                        line,
                        format!("{} `{value}` is negative or not finite", field.as_str()),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IncomeField {
    HabitualMain,
    EffectiveMain,
    HabitualTotal,
    EffectiveTotal,
}

impl IncomeField {
    pub const ALL: [Self; 4] = [
        Self::HabitualMain,
        Self::EffectiveMain,
        Self::HabitualTotal,
        Self::EffectiveTotal,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HabitualMain => "habitual_main",
            Self::EffectiveMain => "effective_main",
            Self::HabitualTotal => "habitual_total",
            Self::EffectiveTotal => "effective_total",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "habitual_main" => Some(Self::HabitualMain),
            "effective_main" => Some(Self::EffectiveMain),
            "habitual_total" => Some(Self::HabitualTotal),
            "effective_total" => Some(Self::EffectiveTotal),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum RecordError {
    Json { line: usize, err: serde_json::Error },
    Invalid { line: usize, reason: String },
}

impl RecordError {
    fn invalid(line: usize, reason: String) -> Self {
        Self::Invalid { line, reason }
    }
}

impl std::fmt::Display for RecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json { line, err } => write!(f, "line {line}: {err}"),
            Self::Invalid { line, reason } => write!(f, "line {line}: {reason}"),
        }
    }
}

impl std::error::Error for RecordError {}

pub fn parse_jsonl_records(input: &str) -> Result<Vec<InterviewRecord>, RecordError> {
    let mut out = Vec::new();
    for (idx, raw) in input.lines().enumerate() {
        let line = idx + 1;
        if raw.trim().is_empty() {
            continue;
        }
        let record: InterviewRecord =
            serde_json::from_str(raw).map_err(|err| RecordError::Json { line, err })?;
        record.validate(line)?;
        out.push(record);
    }
    Ok(out)
}

pub fn serialize_jsonl_records(records: &[InterviewRecord]) -> Result<String, serde_json::Error> {
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
pub(crate) fn sample_record(interview: u8, order: u8) -> InterviewRecord {
    InterviewRecord {
        year: 2023,
        quarter: 1,
        state: "35".to_string(),
        household: "350001001".to_string(),
        visit: 1,
        interview,
        order,
        sex: "1".to_string(),
        birth_date: "01011990".to_string(),
        relationship: "01".to_string(),
        occupation: Some("5112".to_string()),
        race: Some("1".to_string()),
        education: Some("12".to_string()),
        age: Some(33),
        weight: 1.0,
        habitual_main: Some(2000.0),
        effective_main: Some(2000.0),
        habitual_total: Some(2500.0),
        effective_total: Some(2500.0),
    }
}
