use painel::aggregate::{AggregationSpec, Statistic, WeightMode, aggregate_period};
use painel::deflate::{DeflatorTable, deflate_mixed, deflate_period};
use painel::panel::classify::{MatchClass, link_window};
use painel::record::{IncomeField, InterviewRecord};
use painel::rules::{FallbackMode, RuleSet};
use painel::variation::{VariationSpec, compute_variation};
use painel::wave::Wave;

fn record(
    wave: Wave,
    household: &str,
    interview: u8,
    order: u8,
    sex: &str,
    birth_date: &str,
    habitual_total: f64,
) -> InterviewRecord {
    InterviewRecord {
        year: wave.year,
        quarter: wave.quarter,
        state: "35".to_string(),
        household: household.to_string(),
        visit: 1,
        interview,
        order,
        sex: sex.to_string(),
        birth_date: birth_date.to_string(),
        relationship: if order == 1 { "01" } else { "02" }.to_string(),
        occupation: Some("2112".to_string()),
        race: Some("1".to_string()),
        education: Some("12".to_string()),
        age: Some(40),
        weight: 1.5,
        habitual_main: Some(habitual_total),
        effective_main: Some(habitual_total),
        habitual_total: Some(habitual_total),
        effective_total: Some(habitual_total),
    }
}

fn window_waves(start: Wave) -> Vec<Wave> {
    Wave::window(start)
}

// Two households tracked across a window that wraps a year boundary.
fn build_waves(start: Wave) -> Vec<Vec<InterviewRecord>> {
    window_waves(start)
        .into_iter()
        .enumerate()
        .map(|(idx, wave)| {
            let interview = idx as u8 + 1;
            let growth = 100.0 * idx as f64;
            vec![
                record(wave, "350001001", interview, 1, "1", "01011980", 2000.0 + growth),
                record(wave, "350001001", interview, 2, "2", "02021985", 1000.0),
                record(wave, "350002002", interview, 1, "2", "03031970", 3000.0 - growth),
            ]
        })
        .collect()
}

#[test]
fn stable_households_link_cleanly_across_a_year_boundary() {
    let start = Wave::new(2023, 3).expect("wave");
    let outcome = link_window(build_waves(start));

    assert_eq!(outcome.household_count, 2);
    assert_eq!(outcome.group_count, 2);
    assert_eq!(outcome.persons.len(), 3);
    for person in &outcome.persons {
        assert_eq!(person.match_class, MatchClass::Consistent);
        assert!(person.complete_panel());
        let last = person.records.last().expect("records");
        assert_eq!(Wave::new(last.year, last.quarter).expect("wave"), Wave::new(2024, 3).expect("wave"));
    }
}

#[test]
fn variation_tracks_each_panel_member_from_first_to_last_interview() {
    let start = Wave::new(2023, 1).expect("wave");
    let outcome = link_window(build_waves(start));

    let spec = VariationSpec {
        field: IncomeField::HabitualTotal,
        rule: None,
        fallback: FallbackMode::Strict,
    };
    let result = compute_variation(start, &outcome.persons, &spec).expect("variation");
    let cell = &result.cells["all"];
    assert_eq!(cell.n, 3);
    assert_eq!(result.excluded.total(), 0);

    // changes: +400/2000 = 0.2, 0.0, -400/3000; the median is 0.0
    let change = cell.median_change.expect("median");
    assert!(change.abs() < 1e-12, "median change was {change}");
}

#[test]
fn variation_by_sex_separates_the_strata() {
    let start = Wave::new(2023, 1).expect("wave");
    let outcome = link_window(build_waves(start));
    let rules = RuleSet::with_defaults();

    let spec = VariationSpec {
        field: IncomeField::HabitualTotal,
        rule: Some(rules.get("sex").expect("sex rule")),
        fallback: FallbackMode::Strict,
    };
    let result = compute_variation(start, &outcome.persons, &spec).expect("variation");
    assert_eq!(result.cells["Homem"].n, 1);
    assert_eq!(result.cells["Mulher"].n, 2);
    let men = result.cells["Homem"].median_change.expect("median");
    assert!((men - 0.2).abs() < 1e-12);
}

#[test]
fn deflation_commutes_with_categorical_grouping() {
    let start = Wave::new(2023, 1).expect("wave");
    let waves = build_waves(start);
    let rules = RuleSet::with_defaults();
    let region = rules.get("region").expect("region rule");

    let table = DeflatorTable::parse_jsonl(
        r#"{"year":2023,"quarter":1,"state":"35","habitual":1.25,"effective":1.5}"#,
    )
    .expect("deflator");

    let spec = AggregationSpec {
        rules: vec![region],
        weight_mode: WeightMode::Calibrated,
        statistic: Statistic::Mean,
        fields: vec![IncomeField::HabitualTotal],
        fallback: FallbackMode::Strict,
    };

    let plain = aggregate_period(start, &waves[0], &spec).expect("plain aggregate");
    let mut adjusted_records = waves[0].clone();
    let outcome = deflate_period(&mut adjusted_records, &table, start).expect("deflate");
    assert_eq!(outcome.adjusted, 3);
    let adjusted = aggregate_period(start, &adjusted_records, &spec).expect("adjusted aggregate");

    // the same records land in the same cells, only income values move
    assert_eq!(
        plain.cells.keys().collect::<Vec<_>>(),
        adjusted.cells.keys().collect::<Vec<_>>()
    );
    for (label, cell) in &plain.cells {
        let adjusted_cell = &adjusted.cells[label];
        assert_eq!(cell.n, adjusted_cell.n);
        let before = cell.fields["habitual_total"].value.expect("plain mean");
        let after = adjusted_cell.fields["habitual_total"].value.expect("adjusted mean");
        assert!((after - before * 1.25).abs() < 1e-9);
    }
}

#[test]
fn mixed_deflation_requires_every_quarter_of_the_trail() {
    let start = Wave::new(2023, 1).expect("wave");
    let outcome = link_window(build_waves(start));
    let mut person = outcome.persons.into_iter().next().expect("person");

    // covers only the first quarter of a five-quarter trail
    let table = DeflatorTable::parse_jsonl(
        r#"{"year":2023,"quarter":1,"state":"35","habitual":1.1,"effective":1.1}"#,
    )
    .expect("deflator");
    assert!(deflate_mixed(&mut person.records, &table).is_err());

    let rows = window_waves(start)
        .into_iter()
        .map(|wave| {
            format!(
                r#"{{"year":{},"quarter":{},"state":"35","habitual":1.1,"effective":1.1}}"#,
                wave.year, wave.quarter
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    let full_table = DeflatorTable::parse_jsonl(&rows).expect("deflator");
    let outcome = deflate_mixed(&mut person.records, &full_table).expect("deflate");
    assert_eq!(outcome.adjusted, 5);
    assert_eq!(outcome.unmatched_states, 0);
}
