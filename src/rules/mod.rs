pub mod defaults;

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::record::{IncomeField, InterviewRecord};

pub const DEFAULT_FALLBACK_LABEL: &str = "other";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackMode {
    Strict,
    Bucket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleColumn {
    State,
    Sex,
    Race,
    Education,
    Occupation,
    Age,
    Income(IncomeField),
}

impl RuleColumn {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "state" => Some(Self::State),
            "sex" => Some(Self::Sex),
            "race" => Some(Self::Race),
            "education" => Some(Self::Education),
            "occupation" => Some(Self::Occupation),
            "age" => Some(Self::Age),
            other => IncomeField::parse(other).map(Self::Income),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::State => "state",
            Self::Sex => "sex",
            Self::Race => "race",
            Self::Education => "education",
            Self::Occupation => "occupation",
            Self::Age => "age",
            Self::Income(field) => field.as_str(),
        }
    }

    fn text_value(self, record: &InterviewRecord) -> Option<String> {
        match self {
            Self::State => Some(record.state.clone()),
            Self::Sex => Some(record.sex.clone()),
            Self::Race => record.race.clone(),
            Self::Education => record.education.clone(),
            Self::Occupation => record.occupation.clone(),
            Self::Age => record.age.map(|age| age.to_string()),
            Self::Income(field) => record.income(field).map(|value| value.to_string()),
        }
    }

    fn numeric_value(self, record: &InterviewRecord) -> Option<f64> {
        match self {
            Self::Age => record.age.map(f64::from),
            Self::Income(field) => record.income(field),
            _ => self.text_value(record)?.trim().parse::<f64>().ok(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangeBin {
    pub min: f64,
    pub max: Option<f64>,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuleKind {
    Map { table: BTreeMap<String, String> },
    Prefix { width: usize, table: BTreeMap<String, String> },
    Range { bins: Vec<RangeBin> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryRule {
    pub name: String,
    pub column: RuleColumn,
    pub kind: RuleKind,
    pub fallback: Option<String>,
}

#[derive(Debug)]
pub enum RuleError {
    UnmappedCategory { rule: String, value: String },
    InvalidSpec { rule: String, reason: String },
    UnknownRule(String),
}

impl std::fmt::Display for RuleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnmappedCategory { rule, value } => {
                write!(f, "rule `{rule}` has no mapping for value `{value}`")
            }
            Self::InvalidSpec { rule, reason } => write!(f, "rule `{rule}`: {reason}"),
            Self::UnknownRule(name) => write!(f, "unknown category rule `{name}`"),
        }
    }
}

impl std::error::Error for RuleError {}

impl CategoryRule {
    /// Maps a record to its bucket label. `Ok(None)` means the record has no
    /// value in the rule's column and is excluded from the grouped call.
    pub fn apply(
        &self,
        record: &InterviewRecord,
        mode: FallbackMode,
    ) -> Result<Option<String>, RuleError> {
        match &self.kind {
            RuleKind::Map { table } => {
                let Some(raw) = self.column.text_value(record) else {
                    return Ok(None);
                };
                self.lookup(table, raw.trim(), mode)
            }
            RuleKind::Prefix { width, table } => {
                let Some(raw) = self.column.text_value(record) else {
                    return Ok(None);
                };
                let trimmed = raw.trim();
                let prefix: String = trimmed.chars().take(*width).collect();
                self.lookup(table, &prefix, mode)
            }
            RuleKind::Range { bins } => {
                let Some(value) = self.column.numeric_value(record) else {
                    return Ok(None);
                };
                for bin in bins {
                    let below_max = bin.max.is_none_or(|max| value < max);
                    if value >= bin.min && below_max {
                        return Ok(Some(bin.label.clone()));
                    }
                }
                self.unmapped(&format!("{value}"), mode)
            }
        }
    }

    fn lookup(
        &self,
        table: &BTreeMap<String, String>,
        key: &str,
        mode: FallbackMode,
    ) -> Result<Option<String>, RuleError> {
        match table.get(key) {
            Some(label) => Ok(Some(label.clone())),
            None => self.unmapped(key, mode),
        }
    }

    fn unmapped(&self, value: &str, mode: FallbackMode) -> Result<Option<String>, RuleError> {
        match mode {
            FallbackMode::Strict => Err(RuleError::UnmappedCategory {
                rule: self.name.clone(),
                value: value.to_string(),
            }),
            FallbackMode::Bucket => Ok(Some(
                self.fallback
                    .clone()
                    .unwrap_or_else(|| DEFAULT_FALLBACK_LABEL.to_string()),
            )),
        }
    }
}

pub fn composite_label(
    rules: &[&CategoryRule],
    record: &InterviewRecord,
    mode: FallbackMode,
) -> Result<Option<String>, RuleError> {
    let mut parts = Vec::with_capacity(rules.len());
    for rule in rules {
        match rule.apply(record, mode)? {
            Some(label) => parts.push(label),
            None => return Ok(None),
        }
    }
    Ok(Some(parts.join(" / ")))
}

#[derive(Debug, Deserialize)]
pub struct RuleSpec {
    pub kind: String,
    pub column: String,
    #[serde(default)]
    pub width: Option<usize>,
    #[serde(default)]
    pub table: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub bins: Option<Vec<BinSpec>>,
    #[serde(default)]
    pub fallback: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BinSpec {
    pub min: f64,
    #[serde(default)]
    pub max: Option<f64>,
    pub label: String,
}

impl RuleSpec {
    pub fn into_rule(self, name: &str) -> Result<CategoryRule, RuleError> {
        let column = RuleColumn::parse(&self.column).ok_or_else(|| RuleError::InvalidSpec {
            rule: name.to_string(),
            reason: format!("unknown column `{}`", self.column),
        })?;
        let kind = match self.kind.trim() {
            "map" => RuleKind::Map {
                table: self.table.ok_or_else(|| RuleError::InvalidSpec {
                    rule: name.to_string(),
                    reason: "map rules require a `table`".to_string(),
                })?,
            },
            "prefix" => RuleKind::Prefix {
                width: self.width.unwrap_or(1),
                table: self.table.ok_or_else(|| RuleError::InvalidSpec {
                    rule: name.to_string(),
                    reason: "prefix rules require a `table`".to_string(),
                })?,
            },
            "range" => {
                let bins = self
                    .bins
                    .ok_or_else(|| RuleError::InvalidSpec {
                        rule: name.to_string(),
                        reason: "range rules require `bins`".to_string(),
                    })?
                    .into_iter()
                    .map(|bin| RangeBin {
                        min: bin.min,
                        max: bin.max,
                        label: bin.label,
                    })
                    .collect::<Vec<_>>();
                if bins.is_empty() {
                    return Err(RuleError::InvalidSpec {
                        rule: name.to_string(),
                        reason: "range rules require at least one bin".to_string(),
                    });
                }
                RuleKind::Range { bins }
            }
            other => {
                return Err(RuleError::InvalidSpec {
                    rule: name.to_string(),
                    reason: format!("unknown rule kind `{other}`"),
                });
            }
        };
        Ok(CategoryRule {
            name: name.to_string(),
            column,
            kind,
            fallback: self.fallback,
        })
    }
}

#[derive(Debug, Default)]
pub struct RuleSet {
    rules: BTreeMap<String, CategoryRule>,
}

impl RuleSet {
    pub fn with_defaults() -> Self {
        Self {
            rules: defaults::default_rules(),
        }
    }

    pub fn insert(&mut self, rule: CategoryRule) {
        self.rules.insert(rule.name.clone(), rule);
    }

    pub fn get(&self, name: &str) -> Result<&CategoryRule, RuleError> {
        self.rules
            .get(name)
            .ok_or_else(|| RuleError::UnknownRule(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.rules.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CategoryRule, FallbackMode, RangeBin, RuleColumn, RuleError, RuleKind, RuleSet, RuleSpec,
        composite_label,
    };
    use crate::record::sample_record;
    use std::collections::BTreeMap;

    fn map_rule(name: &str, column: RuleColumn, pairs: &[(&str, &str)]) -> CategoryRule {
        let table = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<BTreeMap<_, _>>();
        CategoryRule {
            name: name.to_string(),
            column,
            kind: RuleKind::Map { table },
            fallback: None,
        }
    }

    #[test]
    fn map_rule_labels_known_values() {
        let rule = map_rule("region", RuleColumn::State, &[("35", "Sudeste")]);
        let record = sample_record(1, 1);
        let label = rule.apply(&record, FallbackMode::Strict).expect("apply");
        assert_eq!(label.as_deref(), Some("Sudeste"));
    }

    #[test]
    fn strict_mode_raises_a_named_error_for_unmapped_values() {
        let rule = map_rule("region", RuleColumn::State, &[("33", "Sudeste")]);
        let record = sample_record(1, 1);
        let err = rule.apply(&record, FallbackMode::Strict).expect_err("unmapped");
        match err {
            RuleError::UnmappedCategory { rule, value } => {
                assert_eq!(rule, "region");
                assert_eq!(value, "35");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn bucket_mode_uses_the_configured_fallback_label() {
        let mut rule = map_rule("region", RuleColumn::State, &[("33", "Sudeste")]);
        rule.fallback = Some("unclassified".to_string());
        let record = sample_record(1, 1);
        let label = rule.apply(&record, FallbackMode::Bucket).expect("apply");
        assert_eq!(label.as_deref(), Some("unclassified"));
    }

    #[test]
    fn missing_column_value_excludes_the_record() {
        let rule = map_rule("occupation", RuleColumn::Occupation, &[("5112", "drivers")]);
        let mut record = sample_record(1, 1);
        record.occupation = None;
        let label = rule.apply(&record, FallbackMode::Strict).expect("apply");
        assert_eq!(label, None);
    }

    #[test]
    fn prefix_rule_takes_the_leading_digits() {
        let table = [("5", "services")]
            .into_iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<BTreeMap<_, _>>();
        let rule = CategoryRule {
            name: "occupation_group".to_string(),
            column: RuleColumn::Occupation,
            kind: RuleKind::Prefix { width: 1, table },
            fallback: None,
        };
        let record = sample_record(1, 1);
        let label = rule.apply(&record, FallbackMode::Strict).expect("apply");
        assert_eq!(label.as_deref(), Some("services"));
    }

    #[test]
    fn prefix_rule_handles_non_ascii_codes() {
        let table = [("é", "special")]
            .into_iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<BTreeMap<_, _>>();
        let rule = CategoryRule {
            name: "occupation_group".to_string(),
            column: RuleColumn::Occupation,
            kind: RuleKind::Prefix { width: 1, table },
            fallback: None,
        };
        let mut record = sample_record(1, 1);
        record.occupation = Some("é112".to_string());
        let label = rule.apply(&record, FallbackMode::Strict).expect("apply");
        assert_eq!(label.as_deref(), Some("special"));
    }

    #[test]
    fn range_rule_bins_are_half_open() {
        let rule = CategoryRule {
            name: "age_bin".to_string(),
            column: RuleColumn::Age,
            kind: RuleKind::Range {
                bins: vec![
                    RangeBin {
                        min: 0.0,
                        max: Some(30.0),
                        label: "under 30".to_string(),
                    },
                    RangeBin {
                        min: 30.0,
                        max: None,
                        label: "30+".to_string(),
                    },
                ],
            },
            fallback: None,
        };
        let mut record = sample_record(1, 1);
        record.age = Some(29);
        assert_eq!(
            rule.apply(&record, FallbackMode::Strict).expect("apply").as_deref(),
            Some("under 30")
        );
        record.age = Some(30);
        assert_eq!(
            rule.apply(&record, FallbackMode::Strict).expect("apply").as_deref(),
            Some("30+")
        );
    }

    #[test]
    fn composite_labels_join_rules_in_order() {
        let region = map_rule("region", RuleColumn::State, &[("35", "Sudeste")]);
        let sex = map_rule("sex", RuleColumn::Sex, &[("1", "Homem")]);
        let record = sample_record(1, 1);
        let label = composite_label(&[&region, &sex], &record, FallbackMode::Strict)
            .expect("compose");
        assert_eq!(label.as_deref(), Some("Sudeste / Homem"));
    }

    #[test]
    fn rule_specs_validate_their_shape() {
        let spec = RuleSpec {
            kind: "map".to_string(),
            column: "state".to_string(),
            width: None,
            table: None,
            bins: None,
            fallback: None,
        };
        assert!(spec.into_rule("broken").is_err());
    }

    #[test]
    fn default_rule_set_resolves_known_names() {
        let rules = RuleSet::with_defaults();
        assert!(rules.get("region").is_ok());
        assert!(rules.get("occupation_group").is_ok());
        assert!(rules.get("nope").is_err());
    }
}
