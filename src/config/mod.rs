use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::rules::{RuleError, RuleSet, RuleSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub path: String,
}

#[derive(Debug)]
pub struct EffectiveConfig {
    pub sources: Vec<SourceSpec>,
    pub exclude: Vec<String>,
    pub deflator: Option<String>,
    rules: BTreeMap<String, RuleSpec>,
}

impl EffectiveConfig {
    /// Default rules overlaid with the configured custom rules.
    pub fn rule_set(self) -> Result<RuleSet, RuleError> {
        let mut set = RuleSet::with_defaults();
        for (name, spec) in self.rules {
            set.insert(spec.into_rule(&name)?);
        }
        Ok(set)
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    sources: Option<Vec<RawSourceSpec>>,
    #[serde(default)]
    exclude: Option<Vec<String>>,
    #[serde(default)]
    deflator: Option<String>,
    #[serde(default)]
    rules: Option<BTreeMap<String, RuleSpec>>,
}

#[derive(Debug, Deserialize)]
struct RawSourceSpec {
    path: String,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    Rule(RuleError),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "{err}"),
            Self::Yaml(err) => write!(f, "{err}"),
            Self::Rule(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Yaml(value)
    }
}

impl From<RuleError> for ConfigError {
    fn from(value: RuleError) -> Self {
        Self::Rule(value)
    }
}

#[derive(Debug)]
struct ConfigLayer {
    sources: Vec<SourceSpec>,
    exclude: Option<Vec<String>>,
    deflator: Option<String>,
    rules: BTreeMap<String, RuleSpec>,
}

pub fn load_effective_config(
    cwd: &Path,
    repo_config: Option<&Path>,
    user_config: Option<&Path>,
) -> Result<EffectiveConfig, ConfigError> {
    let mut merged = EffectiveConfig {
        sources: Vec::new(),
        exclude: Vec::new(),
        deflator: None,
        rules: BTreeMap::new(),
    };

    if let Some(path) = user_config.filter(|path| path.exists()) {
        let cfg = load_config_layer(path)?;
        merge_layer(&mut merged, cfg);
    }

    if let Some(path) = find_nearest_project_config(cwd) {
        let cfg = load_config_layer(&path)?;
        merge_layer(&mut merged, cfg);
    }

    if let Some(path) = repo_config.filter(|path| path.exists()) {
        let cfg = load_config_layer(path)?;
        merge_layer(&mut merged, cfg);
    }

    Ok(merged)
}

pub fn find_nearest_project_config(start: &Path) -> Option<PathBuf> {
    for dir in start.ancestors() {
        let candidate = dir.join(".painel.project.yml");
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

fn merge_layer(merged: &mut EffectiveConfig, layer: ConfigLayer) {
    merge_sources_dedup(&mut merged.sources, layer.sources);
    if let Some(exclude) = layer.exclude {
        merged.exclude = exclude;
    }
    if layer.deflator.is_some() {
        merged.deflator = layer.deflator;
    }
    merged.rules.extend(layer.rules);
}

fn merge_sources_dedup(existing: &mut Vec<SourceSpec>, incoming: Vec<SourceSpec>) {
    let mut indices = HashMap::new();
    for (idx, source) in existing.iter().enumerate() {
        indices.insert(source.path.clone(), idx);
    }

    for source in incoming {
        if let Some(idx) = indices.get(&source.path).copied() {
            existing[idx] = source;
        } else {
            let idx = existing.len();
            indices.insert(source.path.clone(), idx);
            existing.push(source);
        }
    }
}

fn load_config_layer(path: &Path) -> Result<ConfigLayer, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config_layer(&content)
}

fn parse_config_layer(content: &str) -> Result<ConfigLayer, ConfigError> {
    let raw: RawConfig = serde_yaml::from_str(content)?;
    let sources = raw
        .sources
        .unwrap_or_default()
        .into_iter()
        .map(|source| SourceSpec { path: source.path })
        .collect();
    Ok(ConfigLayer {
        sources,
        exclude: raw.exclude,
        deflator: raw.deflator,
        rules: raw.rules.unwrap_or_default(),
    })
}

pub fn load_config_file(path: &Path) -> Result<EffectiveConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let layer = parse_config_layer(&content)?;
    Ok(EffectiveConfig {
        sources: layer.sources,
        exclude: layer.exclude.unwrap_or_default(),
        deflator: layer.deflator,
        rules: layer.rules,
    })
}

pub fn default_repo_config_yaml() -> String {
    r#"sources:
  - path: ./microdata/**/*.jsonl
exclude: []
deflator: ./microdata/deflator.jsonl
rules: {}
"#
    .to_string()
}

pub fn default_global_config_yaml() -> String {
    r#"sources:
  - path: ~/painel/microdata/**/*.jsonl
exclude: []
rules: {}
"#
    .to_string()
}

pub fn expand_tilde(path: &str, home: &Path) -> PathBuf {
    if path == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = path.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(path)
}
