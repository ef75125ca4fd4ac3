use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::{Value, json};

fn run_cli(repo: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_painel"))
        .current_dir(repo)
        .args(args)
        .output()
        .expect("command runs")
}

fn run_json(repo: &Path, args: &[&str]) -> Value {
    let output = run_cli(repo, args);
    assert!(
        output.status.success(),
        "command failed: args={args:?}\nstdout={}\nstderr={}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("json stdout")
}

fn run_error(repo: &Path, args: &[&str]) -> Value {
    let output = run_cli(repo, args);
    assert!(
        !output.status.success(),
        "command should fail: args={args:?}\nstdout={}",
        String::from_utf8_lossy(&output.stdout)
    );
    serde_json::from_slice(&output.stderr).expect("json stderr")
}

fn record_line(
    year: u16,
    quarter: u8,
    interview: u8,
    order: u8,
    sex: &str,
    birth_date: &str,
    weight: f64,
    habitual_total: f64,
) -> String {
    json!({
        "year": year,
        "quarter": quarter,
        "state": "35",
        "household": "350001001",
        "visit": 1,
        "interview": interview,
        "order": order,
        "sex": sex,
        "birth_date": birth_date,
        "relationship": if order == 1 { "01" } else { "02" },
        "occupation": "2112",
        "race": "1",
        "education": "12",
        "age": 34,
        "weight": weight,
        "habitual_main": habitual_total,
        "effective_main": habitual_total,
        "habitual_total": habitual_total,
        "effective_total": habitual_total,
    })
    .to_string()
}

// A two-person household interviewed in all five quarters of the window
// starting at 2023T1. The second member's total income grows from 1000
// to 1200 across the window.
fn seed_microdata(repo: &Path) {
    let window = [(2023u16, 1u8), (2023, 2), (2023, 3), (2023, 4), (2024, 1)];
    let mut lines = Vec::new();
    for (idx, (year, quarter)) in window.into_iter().enumerate() {
        let interview = idx as u8 + 1;
        let second_income = 1000.0 + 50.0 * idx as f64;
        lines.push(record_line(year, quarter, interview, 1, "1", "01011980", 2.0, 2000.0));
        lines.push(record_line(
            year,
            quarter,
            interview,
            2,
            "2",
            "02021985",
            3.0,
            second_income,
        ));
    }
    fs::create_dir_all(repo.join("microdata")).expect("microdata dir");
    fs::write(repo.join("microdata/survey.jsonl"), lines.join("\n") + "\n")
        .expect("write microdata");
}

fn seed_deflator(repo: &Path) {
    let window = [(2023u16, 1u8), (2023, 2), (2023, 3), (2023, 4), (2024, 1)];
    let rows = window
        .into_iter()
        .map(|(year, quarter)| {
            json!({
                "year": year,
                "quarter": quarter,
                "state": "35",
                "habitual": 1.1,
                "effective": 1.2,
            })
            .to_string()
        })
        .collect::<Vec<_>>();
    fs::write(repo.join("microdata/deflator.jsonl"), rows.join("\n") + "\n")
        .expect("write deflator");
}

#[test]
fn init_ingest_link_stats_and_variation_roundtrip() {
    let temp = tempfile::tempdir().expect("tempdir");
    let repo = temp.path();
    seed_microdata(repo);
    seed_deflator(repo);

    let init = run_json(repo, &["init"]);
    assert_eq!(init["status"], "ok");

    let ingest = run_json(repo, &["ingest"]);
    assert_eq!(ingest["status"], "ok");
    // the configured deflator table sits under microdata/ but is not a source
    assert_eq!(ingest["scanned_inputs"], 1);
    assert_eq!(ingest["ingested_records"], 10);
    assert_eq!(
        ingest["periods_written"].as_array().expect("periods").len(),
        5
    );

    let waves = run_json(repo, &["waves"]);
    let wave_list = waves["waves"].as_array().expect("waves array");
    assert_eq!(wave_list.len(), 5);
    assert_eq!(wave_list[0]["period"], "2023T1");
    assert_eq!(wave_list[0]["records"], 2);
    assert_eq!(wave_list[4]["period"], "2024T1");

    let link = run_json(repo, &["link", "--year", "2023", "--quarter", "1"]);
    assert_eq!(link["status"], "ok");
    assert_eq!(link["household_count"], 1);
    assert_eq!(link["person_count"], 2);
    assert_eq!(link["class_counts"]["1"], 2);
    // only the first member clears one minimum wage in each quarter
    assert_eq!(link["income_class_counts"]["E"], 5);

    let relink = run_json(repo, &["link", "--year", "2023", "--quarter", "1"]);
    assert_eq!(relink["status"], "exists");

    let classes = run_json(repo, &["classes", "--from", "2023T1", "--to", "2024T1"]);
    let windows = classes["windows"].as_array().expect("windows");
    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0]["window_start"], "2023T1");
    assert_eq!(windows[0]["class_shares"]["1"], 1.0);

    let counts = run_json(
        repo,
        &[
            "stats", "--from", "2023T1", "--to", "2023T1", "--by", "region", "--stat", "count",
            "--weighted",
        ],
    );
    let cell = &counts["periods"]["2023T1"]["Sudeste"];
    assert_eq!(cell["n"], 2);
    assert_eq!(cell["fields"]["records"]["value"], 5.0);

    let means = run_json(
        repo,
        &[
            "stats", "--from", "2023T1", "--by", "sex", "--stat", "mean", "--field",
            "habitual_total",
        ],
    );
    let women = &means["periods"]["2023T1"]["Mulher"];
    assert_eq!(women["fields"]["habitual_total"]["value"], 1000.0);

    let linked = run_json(
        repo,
        &["stats", "--linked", "--from", "2023T1", "--stat", "median"],
    );
    assert_eq!(linked["linked"], true);
    assert_eq!(
        linked["periods"]
            .as_object()
            .expect("linked periods")
            .len(),
        5
    );
    let first = &linked["periods"]["2023T1"];
    let labels = first.as_object().expect("cells").keys().collect::<Vec<_>>();
    assert_eq!(labels.len(), 1);

    let variation = run_json(repo, &["variation", "--from", "2023T1"]);
    assert_eq!(variation["status"], "ok");
    let all = &variation["cells"]["all"];
    assert_eq!(all["n"], 2);
    // member 1: 2000 -> 2000 (0.0); member 2: 1000 -> 1200 (0.2)
    let change = all["median_change"].as_f64().expect("median change");
    assert!((change - 0.1).abs() < 1e-9, "median change was {change}");

    let show = run_json(repo, &["show", "2023T1"]);
    assert_eq!(show["record_count"], 2);
    assert_eq!(show["household_count"], 1);
    assert_eq!(show["interview_counts"]["1"], 2);

    let raw = run_cli(repo, &["show", "2023T1", "--raw"]);
    assert!(raw.status.success());
    let raw_text = String::from_utf8_lossy(&raw.stdout);
    assert_eq!(raw_text.lines().count(), 2);

    let gc = run_json(repo, &["gc"]);
    assert_eq!(gc["status"], "ok");
}

#[test]
fn deflate_materializes_copies_and_adjusts_stats() {
    let temp = tempfile::tempdir().expect("tempdir");
    let repo = temp.path();
    seed_microdata(repo);
    seed_deflator(repo);

    run_json(repo, &["init"]);
    run_json(repo, &["ingest"]);

    let deflate = run_json(repo, &["deflate", "--from", "2023T1", "--to", "2024T1"]);
    let periods = deflate["periods"].as_array().expect("periods");
    assert_eq!(periods.len(), 5);
    assert_eq!(periods[0]["adjusted"], 2);
    assert_eq!(periods[0]["unmatched_states"], 0);

    let waves = run_json(repo, &["waves"]);
    assert_eq!(waves["waves"][0]["deflated_copy"], true);

    let plain = run_json(
        repo,
        &["stats", "--from", "2023T1", "--by", "sex", "--stat", "mean"],
    );
    let adjusted = run_json(
        repo,
        &[
            "stats", "--from", "2023T1", "--by", "sex", "--stat", "mean", "--deflate",
        ],
    );
    let plain_mean = plain["periods"]["2023T1"]["Mulher"]["fields"]["habitual_total"]["value"]
        .as_f64()
        .expect("plain mean");
    let adjusted_mean = adjusted["periods"]["2023T1"]["Mulher"]["fields"]["habitual_total"]
        ["value"]
        .as_f64()
        .expect("adjusted mean");
    assert!((adjusted_mean - plain_mean * 1.1).abs() < 1e-9);
}

#[test]
fn reingest_skips_unchanged_inputs() {
    let temp = tempfile::tempdir().expect("tempdir");
    let repo = temp.path();
    seed_microdata(repo);
    seed_deflator(repo);

    run_json(repo, &["init"]);
    let first = run_json(repo, &["ingest"]);
    assert_eq!(first["skipped_unchanged"], 0);

    let second = run_json(repo, &["ingest"]);
    assert_eq!(second["skipped_unchanged"], 1);
    assert_eq!(second["ingested_records"], 0);
}

#[test]
fn malformed_inputs_are_reported_not_fatal() {
    let temp = tempfile::tempdir().expect("tempdir");
    let repo = temp.path();
    seed_microdata(repo);
    seed_deflator(repo);
    fs::write(repo.join("microdata/broken.jsonl"), "{not json\n").expect("write broken");

    run_json(repo, &["init"]);
    let ingest = run_json(repo, &["ingest"]);
    assert_eq!(ingest["status"], "partial");
    assert_eq!(ingest["failure_count"], 1);
    assert_eq!(ingest["ingested_records"], 10);
}

#[test]
fn commands_fail_cleanly_before_init_and_on_missing_data() {
    let temp = tempfile::tempdir().expect("tempdir");
    let repo = temp.path();

    let err = run_error(repo, &["waves"]);
    assert_eq!(err["error"]["code"], "not_initialized");

    seed_microdata(repo);
    seed_deflator(repo);
    run_json(repo, &["init"]);
    run_json(repo, &["ingest"]);

    let err = run_error(repo, &["link", "--year", "2024", "--quarter", "1"]);
    assert_eq!(err["error"]["code"], "missing_input");

    let err = run_error(repo, &["stats", "--from", "2022T1", "--to", "2024T1"]);
    assert_eq!(err["error"]["code"], "missing_input");

    let lenient = run_json(
        repo,
        &["stats", "--from", "2022T1", "--to", "2024T1", "--lenient"],
    );
    assert_eq!(
        lenient["skipped_periods"].as_array().expect("skipped").len(),
        4
    );

    let err = run_error(repo, &["variation", "--from", "2023T2"]);
    assert_eq!(err["error"]["code"], "window_not_linked");

    let err = run_error(
        repo,
        &["stats", "--linked", "--from", "2023T1", "--to", "2023T2"],
    );
    assert_eq!(err["error"]["code"], "invalid_range");

    let err = run_error(repo, &["stats", "--from", "2023T1", "--by", "no-such-rule"]);
    assert_eq!(err["error"]["code"], "unknown_rule");

    let err = run_error(repo, &["show", "2025T1"]);
    assert_eq!(err["error"]["code"], "period_not_found");
}
