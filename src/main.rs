use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use glob::glob;
use painel::aggregate::{
    AggregationSpec, Statistic, WeightMode, aggregate_period, merge_periods,
};
use painel::config::{
    EffectiveConfig, default_global_config_yaml, default_repo_config_yaml, expand_tilde,
    load_effective_config,
};
use painel::deflate::{DeflateError, DeflatorTable, deflate_mixed, deflate_period};
use painel::panel::classify::{class_shares, link_window};
use painel::period::{
    PeriodError, decompress_jsonl, deflated_period_path, list_periods, period_path, read_period,
    wave_from_path, write_period,
};
use painel::record::identity::{household_key, sha256_hex, slot_key};
use painel::record::{IncomeField, InterviewRecord, RecordError, parse_jsonl_records};
use painel::rules::{CategoryRule, FallbackMode, RuleError, RuleSet};
use painel::store::atomic::TEMP_PREFIX;
use painel::store::{PanelStore, StoreError};
use painel::variation::{VariationSpec, compute_variation};
use painel::wave::{Wave, WaveError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use walkdir::WalkDir;

const CURSOR_STATE_FILE: &str = "ingest-state.json";

#[derive(Debug)]
struct CliError {
    code: &'static str,
    message: String,
}

impl CliError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn io(code: &'static str, err: io::Error) -> Self {
        Self::new(code, err.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(value: serde_json::Error) -> Self {
        Self::new("json_error", value.to_string())
    }
}

impl From<StoreError> for CliError {
    fn from(value: StoreError) -> Self {
        Self::new("store_error", value.to_string())
    }
}

impl From<PeriodError> for CliError {
    fn from(value: PeriodError) -> Self {
        Self::new("period_error", value.to_string())
    }
}

impl From<RecordError> for CliError {
    fn from(value: RecordError) -> Self {
        Self::new("record_error", value.to_string())
    }
}

impl From<DeflateError> for CliError {
    fn from(value: DeflateError) -> Self {
        Self::new("deflator_error", value.to_string())
    }
}

impl From<RuleError> for CliError {
    fn from(value: RuleError) -> Self {
        let code = match value {
            RuleError::UnmappedCategory { .. } => "unmapped_category",
            RuleError::UnknownRule(_) => "unknown_rule",
            RuleError::InvalidSpec { .. } => "invalid_rule",
        };
        Self::new(code, value.to_string())
    }
}

impl From<WaveError> for CliError {
    fn from(value: WaveError) -> Self {
        Self::new("invalid_period", value.to_string())
    }
}

#[derive(Parser, Debug)]
#[command(name = "painel")]
#[command(about = "Longitudinal linkage and aggregation over rotating-panel survey microdata")]
struct Cli {
    #[arg(long, global = true)]
    global: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Init,
    Ingest,
    Waves,
    Link(LinkArgs),
    Classes(RangeArgs),
    Stats(StatsArgs),
    Variation(VariationArgs),
    Deflate(RangeArgs),
    Show(ShowArgs),
    Gc,
}

#[derive(Args, Debug)]
struct LinkArgs {
    #[arg(long)]
    year: u16,
    #[arg(long)]
    quarter: u8,
    #[arg(long)]
    force: bool,
}

#[derive(Args, Debug)]
struct RangeArgs {
    #[arg(long)]
    from: String,
    #[arg(long)]
    to: Option<String>,
}

#[derive(Args, Debug)]
struct StatsArgs {
    #[arg(long)]
    from: String,
    #[arg(long)]
    to: Option<String>,
    #[arg(long = "by")]
    by: Vec<String>,
    #[arg(long = "field")]
    field: Vec<String>,
    #[arg(long, default_value = "mean")]
    stat: String,
    #[arg(long)]
    weighted: bool,
    #[arg(long)]
    deflate: bool,
    #[arg(long)]
    linked: bool,
    #[arg(long)]
    lenient: bool,
    #[arg(long)]
    bucket_unmapped: bool,
}

#[derive(Args, Debug)]
struct VariationArgs {
    #[arg(long)]
    from: String,
    #[arg(long, default_value = "habitual_total")]
    field: String,
    #[arg(long)]
    by: Option<String>,
    #[arg(long)]
    deflate: bool,
    #[arg(long)]
    bucket_unmapped: bool,
}

#[derive(Args, Debug)]
struct ShowArgs {
    period: String,
    #[arg(long)]
    raw: bool,
}

#[derive(Debug, Clone)]
struct RepoPaths {
    root: PathBuf,
    store: PathBuf,
    periods: PathBuf,
    cache_root: PathBuf,
    cursors: PathBuf,
    repo_config: PathBuf,
    user_config: PathBuf,
    mode: StorageMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StorageMode {
    RepoLocal,
    Global,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct IngestState {
    files: HashMap<String, IngestFileState>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IngestFileState {
    input_hash: String,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let payload = json!({
                "error": {
                    "code": err.code,
                    "message": err.message,
                }
            });
            eprintln!("{payload}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir().map_err(|err| CliError::io("cwd_error", err))?;
    let paths = repo_paths(&cwd, cli.global)?;
    match cli.command {
        Command::Init => cmd_init(&paths),
        Command::Ingest => cmd_ingest(&cwd, &paths),
        Command::Waves => cmd_waves(&paths),
        Command::Link(args) => cmd_link(&paths, args),
        Command::Classes(args) => cmd_classes(&paths, args),
        Command::Stats(args) => cmd_stats(&cwd, &paths, args),
        Command::Variation(args) => cmd_variation(&cwd, &paths, args),
        Command::Deflate(args) => cmd_deflate(&cwd, &paths, args),
        Command::Show(args) => cmd_show(&paths, args),
        Command::Gc => cmd_gc(&paths),
    }
}

fn cmd_init(paths: &RepoPaths) -> Result<(), CliError> {
    fs::create_dir_all(&paths.periods).map_err(|err| CliError::io("mkdir_error", err))?;
    fs::create_dir_all(&paths.cursors).map_err(|err| CliError::io("mkdir_error", err))?;
    let _ = PanelStore::open(&paths.store)?;
    write_default_config(paths)?;

    print_json(&json!({
        "status": "ok",
        "painel_dir": paths.root,
        "cache_dir": paths.cache_root,
        "store": paths.store,
        "mode": match paths.mode {
            StorageMode::RepoLocal => "repo",
            StorageMode::Global => "global",
        },
    }))
}

fn cmd_ingest(cwd: &Path, paths: &RepoPaths) -> Result<(), CliError> {
    require_initialized_paths(paths)?;
    let home = home_dir()?;
    let config = load_config(cwd, paths)?;
    if config.sources.is_empty() {
        return Err(CliError::new(
            "missing_sources",
            "no ingest sources configured; add sources in .painel/config.yml or ~/.painel/config.yml",
        ));
    }

    let candidates = resolve_source_files(cwd, &home, &config)?;
    let mut state = load_ingest_state(paths)?;

    let mut scanned = 0usize;
    let mut ingested_records = 0usize;
    let mut skipped_unchanged = 0usize;
    let mut failures = Vec::new();
    let mut pending: BTreeMap<Wave, Vec<InterviewRecord>> = BTreeMap::new();

    for path in candidates {
        scanned += 1;
        let input = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                failures.push(json!({
                    "path": path,
                    "error": err.to_string(),
                }));
                continue;
            }
        };
        let input_hash = sha256_hex(&input);
        let state_key = path.to_string_lossy().into_owned();
        if let Some(prev) = state.files.get(&state_key) {
            if prev.input_hash == input_hash {
                skipped_unchanged += 1;
                continue;
            }
        }

        let records = match parse_jsonl_records(&input) {
            Ok(records) => records,
            Err(err) => {
                failures.push(json!({
                    "path": path,
                    "error": err.to_string(),
                }));
                continue;
            }
        };

        ingested_records += records.len();
        for record in records {
            pending.entry(record.wave()).or_default().push(record);
        }
        state.files.insert(state_key, IngestFileState { input_hash });
    }

    let mut periods_written = Vec::new();
    for (wave, records) in pending {
        let path = period_path(&paths.periods, wave);
        let mut merged: BTreeMap<String, InterviewRecord> = BTreeMap::new();
        if path.exists() {
            for existing in read_period(&path)? {
                merged.insert(slot_key(&existing), existing);
            }
        }
        for record in records {
            merged.insert(slot_key(&record), record);
        }
        let rows = merged.into_values().collect::<Vec<_>>();
        write_period(&path, wave, &rows)?;
        periods_written.push(wave.label());
    }

    save_ingest_state(paths, &state)?;

    print_json(&json!({
        "status": if failures.is_empty() { "ok" } else { "partial" },
        "scanned_inputs": scanned,
        "ingested_records": ingested_records,
        "periods_written": periods_written,
        "skipped_unchanged": skipped_unchanged,
        "failure_count": failures.len(),
        "failures": failures,
    }))
}

fn cmd_waves(paths: &RepoPaths) -> Result<(), CliError> {
    require_initialized_paths(paths)?;
    let mut waves = Vec::new();
    for (wave, path) in list_periods(&paths.periods).map_err(|err| CliError::io("read_dir_error", err))? {
        let records = read_period(&path)?;
        let compressed_bytes = fs::metadata(&path)
            .map_err(|err| CliError::io("metadata_error", err))?
            .len();
        waves.push(json!({
            "period": wave.label(),
            "path": path,
            "records": records.len(),
            "compressed_bytes": compressed_bytes,
            "deflated_copy": deflated_period_path(&paths.periods, wave).exists(),
        }));
    }
    print_json(&json!({ "waves": waves }))
}

fn cmd_link(paths: &RepoPaths, args: LinkArgs) -> Result<(), CliError> {
    require_initialized_paths(paths)?;
    let start = Wave::new(args.year, args.quarter)?;

    let mut store = PanelStore::open(&paths.store)?;
    if store.has_window(start)? && !args.force {
        let counts = store.class_counts(start)?;
        return print_json(&json!({
            "status": "exists",
            "window_start": start.label(),
            "class_counts": counts,
            "income_class_counts": store.income_class_counts(start)?,
        }));
    }

    let window = Wave::window(start);
    let mut missing = Vec::new();
    let mut waves = Vec::new();
    for wave in &window {
        let path = period_path(&paths.periods, *wave);
        if !path.exists() {
            missing.push(wave.label());
            continue;
        }
        waves.push(read_period(&path)?);
    }
    if !missing.is_empty() {
        return Err(CliError::new(
            "missing_input",
            format!("window {} lacks period files: {}", start.label(), missing.join(", ")),
        ));
    }

    let outcome = link_window(waves);
    let shares = class_shares(&outcome.persons);
    let counts = outcome
        .persons
        .iter()
        .fold(BTreeMap::<u8, u64>::new(), |mut acc, person| {
            *acc.entry(person.match_class.as_u8()).or_default() += 1;
            acc
        });
    let person_count = outcome.persons.len();
    store.replace_window(start, &now_iso8601(), &outcome)?;

    print_json(&json!({
        "status": "ok",
        "window_start": start.label(),
        "household_count": outcome.household_count,
        "group_count": outcome.group_count,
        "person_count": person_count,
        "class_counts": counts,
        "class_shares": shares,
        "income_class_counts": store.income_class_counts(start)?,
    }))
}

fn cmd_classes(paths: &RepoPaths, args: RangeArgs) -> Result<(), CliError> {
    require_initialized_paths(paths)?;
    let (from, to) = parse_range(&args.from, args.to.as_deref())?;
    let store = PanelStore::open(&paths.store)?;

    let mut windows = Vec::new();
    for run in store.link_runs()? {
        let start = Wave::parse_label(&run.window_start)?;
        if start < from || start > to {
            continue;
        }
        let counts = store.class_counts(start)?;
        let total: u64 = counts.values().sum();
        let shares: BTreeMap<u8, f64> = counts
            .iter()
            .map(|(class, count)| (*class, *count as f64 / total as f64))
            .collect();
        windows.push(json!({
            "window_start": run.window_start,
            "linked_at": run.linked_at,
            "household_count": run.household_count,
            "group_count": run.group_count,
            "person_count": run.person_count,
            "class_counts": counts,
            "class_shares": shares,
            "income_class_counts": store.income_class_counts(start)?,
        }));
    }

    print_json(&json!({ "windows": windows }))
}

fn cmd_stats(cwd: &Path, paths: &RepoPaths, args: StatsArgs) -> Result<(), CliError> {
    require_initialized_paths(paths)?;
    let from = Wave::parse_label(&args.from)?;
    let config = load_config(cwd, paths)?;
    let deflator_path = config.deflator.clone();
    let rule_set = config
        .rule_set()
        .map_err(|err| CliError::new("config_error", err.to_string()))?;

    let statistic = Statistic::parse(&args.stat)
        .ok_or_else(|| CliError::new("invalid_statistic", format!("unknown statistic `{}`", args.stat)))?;
    let mut fields = Vec::new();
    for raw in &args.field {
        let field = IncomeField::parse(raw)
            .ok_or_else(|| CliError::new("invalid_field", format!("unknown income field `{raw}`")))?;
        fields.push(field);
    }
    if fields.is_empty() && statistic != Statistic::Count {
        fields.push(IncomeField::HabitualTotal);
    }
    let spec = AggregationSpec {
        rules: resolve_rules(&rule_set, &args.by)?,
        weight_mode: if args.weighted {
            WeightMode::Calibrated
        } else {
            WeightMode::Unweighted
        },
        statistic,
        fields,
        fallback: fallback_mode(args.bucket_unmapped),
    };

    let deflator = if args.deflate {
        Some(load_deflator(cwd, deflator_path.as_deref())?)
    } else {
        None
    };

    let (periods, store) = if args.linked {
        if args.to.is_some() {
            return Err(CliError::new(
                "invalid_range",
                "--to cannot be combined with --linked; the window is derived from --from",
            ));
        }
        let store = PanelStore::open(&paths.store)?;
        if !store.has_window(from)? {
            return Err(CliError::new(
                "window_not_linked",
                format!("window {} has not been linked; run `painel link` first", from.label()),
            ));
        }
        (Wave::window(from), Some(store))
    } else {
        let to = match args.to.as_deref() {
            Some(label) => Wave::parse_label(label)?,
            None => from,
        };
        let periods = Wave::range(from, to);
        if periods.is_empty() {
            return Err(CliError::new(
                "invalid_range",
                format!("`{}` is after `{}`", args.from, to.label()),
            ));
        }
        (periods, None)
    };

    let mut results = Vec::new();
    let mut skipped = Vec::new();
    for wave in periods {
        let mut records = match &store {
            Some(store) => store.panel_records(from, wave)?,
            None => {
                let path = period_path(&paths.periods, wave);
                if !path.exists() {
                    if args.lenient {
                        skipped.push(wave.label());
                        continue;
                    }
                    return Err(CliError::new(
                        "missing_input",
                        format!("no period file for {}; run `painel ingest`", wave.label()),
                    ));
                }
                read_period(&path)?
            }
        };
        if let Some(table) = &deflator {
            if !table.has_period(wave) {
                skipped.push(wave.label());
                continue;
            }
            deflate_period(&mut records, table, wave)?;
        }
        results.push(aggregate_period(wave, &records, &spec)?);
    }

    print_json(&json!({
        "status": if skipped.is_empty() { "ok" } else { "partial" },
        "statistic": statistic.as_str(),
        "weighted": args.weighted,
        "deflated": args.deflate,
        "linked": args.linked,
        "skipped_periods": skipped,
        "periods": merge_periods(results),
    }))
}

fn cmd_variation(cwd: &Path, paths: &RepoPaths, args: VariationArgs) -> Result<(), CliError> {
    require_initialized_paths(paths)?;
    let from = Wave::parse_label(&args.from)?;
    let config = load_config(cwd, paths)?;
    let deflator_path = config.deflator.clone();
    let rule_set = config
        .rule_set()
        .map_err(|err| CliError::new("config_error", err.to_string()))?;

    let field = IncomeField::parse(&args.field).ok_or_else(|| {
        CliError::new("invalid_field", format!("unknown income field `{}`", args.field))
    })?;
    let rule = match args.by.as_deref() {
        Some(name) => Some(rule_set.get(name)?),
        None => None,
    };

    let store = PanelStore::open(&paths.store)?;
    if !store.has_window(from)? {
        return Err(CliError::new(
            "window_not_linked",
            format!("window {} has not been linked; run `painel link` first", from.label()),
        ));
    }
    let mut persons = store.linked_persons(from)?;

    if args.deflate {
        let table = load_deflator(cwd, deflator_path.as_deref())?;
        for person in &mut persons {
            deflate_mixed(&mut person.records, &table)?;
        }
    }

    let spec = VariationSpec {
        field,
        rule,
        fallback: fallback_mode(args.bucket_unmapped),
    };
    let result = compute_variation(from, &persons, &spec)?;

    print_json(&json!({
        "status": "ok",
        "field": field.as_str(),
        "deflated": args.deflate,
        "window_start": result.period,
        "cells": result.cells,
        "excluded": result.excluded,
        "excluded_total": result.excluded.total(),
    }))
}

fn cmd_deflate(cwd: &Path, paths: &RepoPaths, args: RangeArgs) -> Result<(), CliError> {
    require_initialized_paths(paths)?;
    let (from, to) = parse_range(&args.from, args.to.as_deref())?;
    let config = load_config(cwd, paths)?;
    let table = load_deflator(cwd, config.deflator.as_deref())?;

    let mut periods = Vec::new();
    let mut skipped = Vec::new();
    for wave in Wave::range(from, to) {
        let source = period_path(&paths.periods, wave);
        if !source.exists() {
            return Err(CliError::new(
                "missing_input",
                format!("no period file for {}; run `painel ingest`", wave.label()),
            ));
        }
        if !table.has_period(wave) {
            skipped.push(wave.label());
            continue;
        }
        let mut records = read_period(&source)?;
        let outcome = deflate_period(&mut records, &table, wave)?;
        let target = deflated_period_path(&paths.periods, wave);
        write_period(&target, wave, &records)?;
        periods.push(json!({
            "period": wave.label(),
            "path": target,
            "adjusted": outcome.adjusted,
            "unmatched_states": outcome.unmatched_states,
        }));
    }

    print_json(&json!({
        "status": if skipped.is_empty() { "ok" } else { "partial" },
        "skipped_periods": skipped,
        "periods": periods,
    }))
}

fn cmd_show(paths: &RepoPaths, args: ShowArgs) -> Result<(), CliError> {
    require_initialized_paths(paths)?;
    let wave = Wave::parse_label(&args.period)?;
    let path = period_path(&paths.periods, wave);
    if !path.exists() {
        return Err(CliError::new(
            "period_not_found",
            format!("period `{}` not found", args.period),
        ));
    }

    if args.raw {
        let bytes = fs::read(&path).map_err(|err| CliError::io("read_error", err))?;
        let content = decompress_jsonl(&bytes).map_err(|err| CliError::io("decompress_error", err))?;
        print!("{content}");
        return Ok(());
    }

    let records = read_period(&path)?;
    let mut households = BTreeMap::<String, u64>::new();
    let mut interviews = BTreeMap::<u8, u64>::new();
    for record in &records {
        *households.entry(household_key(record)).or_default() += 1;
        *interviews.entry(record.interview).or_default() += 1;
    }

    print_json(&json!({
        "period": wave.label(),
        "path": path,
        "record_count": records.len(),
        "household_count": households.len(),
        "interview_counts": interviews,
        "deflated_copy": deflated_period_path(&paths.periods, wave).exists(),
    }))
}

fn cmd_gc(paths: &RepoPaths) -> Result<(), CliError> {
    require_initialized_paths(paths)?;
    let mut removed_temp = Vec::new();
    let mut removed_orphans = Vec::new();
    let mut kept = 0usize;

    let entries = fs::read_dir(&paths.periods).map_err(|err| CliError::io("read_dir_error", err))?;
    for entry in entries {
        let entry = entry.map_err(|err| CliError::io("read_dir_error", err))?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };

        if name.starts_with(TEMP_PREFIX) {
            fs::remove_file(&path).map_err(|err| CliError::io("remove_file_error", err))?;
            removed_temp.push(name.to_string());
            continue;
        }

        // A deflated copy without its base period is stale output.
        if name.ends_with(painel::period::DEFLATED_SUFFIX) {
            let Some(wave) = wave_from_path(&path) else {
                continue;
            };
            if !period_path(&paths.periods, wave).exists() {
                fs::remove_file(&path).map_err(|err| CliError::io("remove_file_error", err))?;
                removed_orphans.push(wave.label());
                continue;
            }
        }
        kept += 1;
    }

    removed_temp.sort();
    removed_orphans.sort();
    print_json(&json!({
        "status": "ok",
        "removed_temp_files": removed_temp,
        "removed_orphan_deflated": removed_orphans,
        "kept_count": kept,
    }))
}

fn resolve_rules<'a>(set: &'a RuleSet, names: &[String]) -> Result<Vec<&'a CategoryRule>, CliError> {
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        out.push(set.get(name)?);
    }
    Ok(out)
}

fn fallback_mode(bucket_unmapped: bool) -> FallbackMode {
    if bucket_unmapped {
        FallbackMode::Bucket
    } else {
        FallbackMode::Strict
    }
}

fn parse_range(from: &str, to: Option<&str>) -> Result<(Wave, Wave), CliError> {
    let from = Wave::parse_label(from)?;
    let to = match to {
        Some(label) => Wave::parse_label(label)?,
        None => from,
    };
    if from > to {
        return Err(CliError::new(
            "invalid_range",
            format!("`{}` is after `{}`", from.label(), to.label()),
        ));
    }
    Ok((from, to))
}

fn load_config(cwd: &Path, paths: &RepoPaths) -> Result<EffectiveConfig, CliError> {
    load_effective_config(cwd, Some(&paths.repo_config), Some(&paths.user_config))
        .map_err(|err| CliError::new("config_error", err.to_string()))
}

fn load_deflator(cwd: &Path, configured: Option<&str>) -> Result<DeflatorTable, CliError> {
    let raw_path = configured.ok_or_else(|| {
        CliError::new(
            "missing_deflator",
            "no deflator table configured; set `deflator` in .painel/config.yml",
        )
    })?;
    let home = home_dir()?;
    let resolved = resolve_input_path(cwd, &home, raw_path);
    let content = fs::read_to_string(&resolved).map_err(|err| {
        CliError::new(
            "missing_deflator",
            format!("cannot read deflator table `{}`: {err}", resolved.display()),
        )
    })?;
    Ok(DeflatorTable::parse_jsonl(&content)?)
}

fn resolve_input_path(cwd: &Path, home: &Path, raw: &str) -> PathBuf {
    let expanded = expand_tilde(raw, home);
    if expanded.is_absolute() {
        expanded
    } else {
        cwd.join(expanded)
    }
}

fn resolve_source_files(
    cwd: &Path,
    home: &Path,
    config: &EffectiveConfig,
) -> Result<Vec<PathBuf>, CliError> {
    let mut out = Vec::new();
    let excludes = compile_excludes(cwd, home, &config.exclude)?;
    // The deflator table is an auxiliary input, not survey microdata; a
    // broad source glob must not sweep it up.
    let deflator = config
        .deflator
        .as_deref()
        .map(|raw| resolve_input_path(cwd, home, raw.trim()))
        .and_then(|path| fs::canonicalize(&path).ok());

    for source in &config.sources {
        let raw_path = source.path.trim();
        if raw_path.is_empty() {
            continue;
        }
        let expanded = resolve_input_path(cwd, home, raw_path);
        let source_files = if looks_like_glob(raw_path) {
            glob_paths(&expanded)?
        } else if expanded.is_dir() {
            WalkDir::new(&expanded)
                .into_iter()
                .filter_map(Result::ok)
                .map(|entry| entry.path().to_path_buf())
                .filter(|path| path.is_file())
                .collect::<Vec<_>>()
        } else if expanded.is_file() {
            vec![expanded]
        } else {
            Vec::new()
        };

        for path in source_files {
            if is_excluded(&path, &excludes) {
                continue;
            }
            if deflator.is_some() && fs::canonicalize(&path).ok() == deflator {
                continue;
            }
            out.push(path);
        }
    }

    out.sort();
    out.dedup();
    Ok(out)
}

fn looks_like_glob(path: &str) -> bool {
    ['*', '?', '[', ']', '{', '}']
        .iter()
        .any(|ch| path.contains(*ch))
}

fn glob_paths(pattern: &Path) -> Result<Vec<PathBuf>, CliError> {
    let pattern_str = pattern.to_string_lossy();
    let mut out = Vec::new();
    let entries = glob(&pattern_str)
        .map_err(|err| CliError::new("glob_error", format!("{} ({pattern_str})", err.msg)))?;
    for entry in entries {
        match entry {
            Ok(path) if path.is_file() => out.push(path),
            Ok(_) => {}
            Err(err) => {
                return Err(CliError::new("glob_error", err.to_string()));
            }
        }
    }
    Ok(out)
}

fn compile_excludes(
    cwd: &Path,
    home: &Path,
    patterns: &[String],
) -> Result<Vec<glob::Pattern>, CliError> {
    let mut compiled = Vec::new();
    for pattern in patterns {
        let raw = pattern.trim();
        if raw.is_empty() {
            continue;
        }
        let expanded = expand_tilde(raw, home);
        let normalized = if expanded.is_absolute() {
            expanded.to_string_lossy().to_string()
        } else {
            cwd.join(expanded).to_string_lossy().to_string()
        };
        let compiled_pattern = glob::Pattern::new(&normalized)
            .map_err(|err| CliError::new("exclude_glob_error", err.to_string()))?;
        compiled.push(compiled_pattern);
    }
    Ok(compiled)
}

fn is_excluded(path: &Path, excludes: &[glob::Pattern]) -> bool {
    excludes.iter().any(|pattern| pattern.matches_path(path))
}

fn load_ingest_state(paths: &RepoPaths) -> Result<IngestState, CliError> {
    fs::create_dir_all(&paths.cursors).map_err(|err| CliError::io("mkdir_error", err))?;
    let state_path = paths.cursors.join(CURSOR_STATE_FILE);
    if !state_path.exists() {
        return Ok(IngestState::default());
    }
    let content = fs::read_to_string(&state_path).map_err(|err| CliError::io("read_error", err))?;
    serde_json::from_str::<IngestState>(&content)
        .map_err(|err| CliError::new("cursor_state_error", err.to_string()))
}

fn save_ingest_state(paths: &RepoPaths, state: &IngestState) -> Result<(), CliError> {
    fs::create_dir_all(&paths.cursors).map_err(|err| CliError::io("mkdir_error", err))?;
    let state_path = paths.cursors.join(CURSOR_STATE_FILE);
    let content = serde_json::to_string_pretty(state)
        .map_err(|err| CliError::new("cursor_state_error", err.to_string()))?;
    fs::write(state_path, content).map_err(|err| CliError::io("write_error", err))
}

fn repo_paths(cwd: &Path, global: bool) -> Result<RepoPaths, CliError> {
    let home = home_dir()?;
    let (root, cache_root, mode) = if global {
        (
            home.join(".painel"),
            home.join(".painel-cache"),
            StorageMode::Global,
        )
    } else {
        (
            cwd.join(".painel"),
            cwd.join(".painel-cache"),
            StorageMode::RepoLocal,
        )
    };

    Ok(RepoPaths {
        store: root.join("panel.sqlite"),
        periods: root.join("periods"),
        cursors: cache_root.join("cursors"),
        repo_config: cwd.join(".painel").join("config.yml"),
        user_config: home.join(".painel").join("config.yml"),
        root,
        cache_root,
        mode,
    })
}

fn require_initialized_paths(paths: &RepoPaths) -> Result<(), CliError> {
    if !paths.root.exists() || !paths.store.exists() || !paths.periods.exists() {
        return Err(CliError::new(
            "not_initialized",
            "repository is not initialized; run `painel init`",
        ));
    }
    Ok(())
}

fn write_default_config(paths: &RepoPaths) -> Result<(), CliError> {
    let config_path = match paths.mode {
        StorageMode::RepoLocal => &paths.repo_config,
        StorageMode::Global => &paths.user_config,
    };
    if config_path.exists() {
        return Ok(());
    }
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|err| CliError::io("mkdir_error", err))?;
    }
    let default = match paths.mode {
        StorageMode::RepoLocal => default_repo_config_yaml(),
        StorageMode::Global => default_global_config_yaml(),
    };
    fs::write(config_path, default).map_err(|err| CliError::io("write_error", err))
}

fn home_dir() -> Result<PathBuf, CliError> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| CliError::new("home_error", "HOME environment variable is not set"))
}

fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string(value)?;
    println!("{rendered}");
    Ok(())
}
