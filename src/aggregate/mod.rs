use std::collections::BTreeMap;

use serde::Serialize;

use crate::record::{IncomeField, InterviewRecord};
use crate::rules::{CategoryRule, FallbackMode, RuleError, composite_label};
use crate::wave::Wave;

pub const OVERALL_LABEL: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightMode {
    Unweighted,
    Calibrated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statistic {
    Count,
    Sum,
    Mean,
    Median,
}

impl Statistic {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "count" => Some(Self::Count),
            "sum" => Some(Self::Sum),
            "mean" => Some(Self::Mean),
            "median" => Some(Self::Median),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Median => "median",
        }
    }
}

#[derive(Debug)]
pub struct AggregationSpec<'a> {
    pub rules: Vec<&'a CategoryRule>,
    pub weight_mode: WeightMode,
    pub statistic: Statistic,
    pub fields: Vec<IncomeField>,
    pub fallback: FallbackMode,
}

#[derive(Debug, Default)]
struct FieldAccumulator {
    n: u64,
    basis: f64,
    sum: f64,
    samples: Vec<f64>,
}

#[derive(Debug, Default)]
struct CellAccumulator {
    n: u64,
    weighted_n: f64,
    fields: BTreeMap<IncomeField, FieldAccumulator>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldOut {
    pub n: u64,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellOut {
    pub n: u64,
    pub weighted_n: f64,
    pub fields: BTreeMap<String, FieldOut>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodAggregation {
    pub period: String,
    pub cells: BTreeMap<String, CellOut>,
}

pub fn aggregate_period(
    wave: Wave,
    records: &[InterviewRecord],
    spec: &AggregationSpec<'_>,
) -> Result<PeriodAggregation, RuleError> {
    let mut cells: BTreeMap<String, CellAccumulator> = BTreeMap::new();

    for record in records {
        let label = if spec.rules.is_empty() {
            OVERALL_LABEL.to_string()
        } else {
            match composite_label(&spec.rules, record, spec.fallback)? {
                Some(label) => label,
                None => continue,
            }
        };
        let weight = record.weight;
        let cell = cells.entry(label).or_default();
        cell.n += 1;
        cell.weighted_n += weight;

        for field in &spec.fields {
            let Some(value) = record.income(*field) else {
                continue;
            };
            let acc = cell.fields.entry(*field).or_default();
            acc.n += 1;
            match spec.weight_mode {
                WeightMode::Unweighted => {
                    acc.basis += 1.0;
                    acc.sum += value;
                    if spec.statistic == Statistic::Median {
                        acc.samples.push(value);
                    }
                }
                WeightMode::Calibrated => {
                    acc.basis += weight;
                    acc.sum += value * weight;
                    if spec.statistic == Statistic::Median {
                        acc.samples.push(value * weight);
                    }
                }
            }
        }
    }

    let cells = cells
        .into_iter()
        .map(|(label, acc)| (label, finalize_cell(acc, spec)))
        .collect();

    Ok(PeriodAggregation {
        period: wave.label(),
        cells,
    })
}

fn finalize_cell(acc: CellAccumulator, spec: &AggregationSpec<'_>) -> CellOut {
    let mut fields = BTreeMap::new();
    if spec.statistic == Statistic::Count {
        let value = match spec.weight_mode {
            WeightMode::Unweighted => acc.n as f64,
            WeightMode::Calibrated => acc.weighted_n,
        };
        fields.insert(
            "records".to_string(),
            FieldOut {
                n: acc.n,
                value: Some(value),
            },
        );
    }
    for field in &spec.fields {
        let out = match acc.fields.get(field) {
            Some(field_acc) => FieldOut {
                n: field_acc.n,
                value: finalize_field(field_acc, spec),
            },
            None => FieldOut { n: 0, value: None },
        };
        fields.insert(field.as_str().to_string(), out);
    }
    CellOut {
        n: acc.n,
        weighted_n: acc.weighted_n,
        fields,
    }
}

fn finalize_field(acc: &FieldAccumulator, spec: &AggregationSpec<'_>) -> Option<f64> {
    if acc.n == 0 {
        return None;
    }
    match spec.statistic {
        Statistic::Count => Some(acc.basis),
        Statistic::Sum => Some(acc.sum),
        Statistic::Mean => {
            if acc.basis == 0.0 {
                None
            } else {
                Some(acc.sum / acc.basis)
            }
        }
        Statistic::Median => median(&acc.samples),
    }
}

pub fn median(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|left, right| left.partial_cmp(right).expect("finite sample"));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}

pub fn merge_periods(results: Vec<PeriodAggregation>) -> BTreeMap<String, BTreeMap<String, CellOut>> {
    results
        .into_iter()
        .map(|result| (result.period, result.cells))
        .collect()
}
