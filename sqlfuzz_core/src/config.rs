use crate::campaign::{CampaignOptions, MeasureSchedule};
use crate::corpus::DEFAULT_SEED_EXTENSION;
use crate::coverage::{
    DEFAULT_REPORT_FILE, DEFAULT_TARGET_FILE, GcovrSettings, default_gcovr_command,
};
use crate::executor::{CommandExecutorConfig, InputDelivery};
use crate::generator::{
    DEFAULT_MAX_EXPANSIONS, DEFAULT_MAX_NONTERMINALS, DEFAULT_MIN_NONTERMINALS,
    GrammarFuzzerSettings,
};
use crate::mutator::{DEFAULT_MAX_MUTATIONS, DEFAULT_MIN_MUTATIONS};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file at {path:?}: {reason}")]
    Read { path: PathBuf, reason: String },
    #[error("Failed to parse TOML from config file {path:?}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FuzzerKind {
    #[default]
    Grammar,
    Mutation,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigInputDelivery {
    #[default]
    StdIn,
    File {
        template: String,
    },
}

impl From<ConfigInputDelivery> for InputDelivery {
    fn from(delivery: ConfigInputDelivery) -> Self {
        match delivery {
            ConfigInputDelivery::StdIn => InputDelivery::StdIn,
            ConfigInputDelivery::File { template } => InputDelivery::File(template),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FuzzerSettings {
    #[serde(default)]
    pub kind: FuzzerKind,
    #[serde(default = "default_runs")]
    pub runs: usize,
    /// Measure coverage after every `n`th cycle; absent means only at the end.
    #[serde(default)]
    pub measure_every: Option<usize>,
    #[serde(default)]
    pub feedback_enabled: bool,
    /// Absent means seed from OS entropy.
    #[serde(default)]
    pub rng_seed: Option<u64>,
    #[serde(default = "default_min_mutations")]
    pub min_mutations: usize,
    #[serde(default = "default_max_mutations")]
    pub max_mutations: usize,
    #[serde(default = "default_min_nonterminals")]
    pub min_nonterminals: usize,
    #[serde(default = "default_max_nonterminals")]
    pub max_nonterminals: usize,
    #[serde(default = "default_max_expansions")]
    pub max_expansions: usize,
    /// TOML or JSON grammar; the built-in CREATE TABLE grammar when absent.
    #[serde(default)]
    pub grammar_file: Option<PathBuf>,
}

pub fn default_runs() -> usize {
    1000
}
fn default_min_mutations() -> usize {
    DEFAULT_MIN_MUTATIONS
}
fn default_max_mutations() -> usize {
    DEFAULT_MAX_MUTATIONS
}
fn default_min_nonterminals() -> usize {
    DEFAULT_MIN_NONTERMINALS
}
fn default_max_nonterminals() -> usize {
    DEFAULT_MAX_NONTERMINALS
}
fn default_max_expansions() -> usize {
    DEFAULT_MAX_EXPANSIONS
}

impl Default for FuzzerSettings {
    fn default() -> Self {
        Self {
            kind: FuzzerKind::default(),
            runs: default_runs(),
            measure_every: None,
            feedback_enabled: false,
            rng_seed: None,
            min_mutations: DEFAULT_MIN_MUTATIONS,
            max_mutations: DEFAULT_MAX_MUTATIONS,
            min_nonterminals: DEFAULT_MIN_NONTERMINALS,
            max_nonterminals: DEFAULT_MAX_NONTERMINALS,
            max_expansions: DEFAULT_MAX_EXPANSIONS,
            grammar_file: None,
        }
    }
}

impl FuzzerSettings {
    pub fn grammar_settings(&self) -> GrammarFuzzerSettings {
        GrammarFuzzerSettings {
            min_nonterminals: self.min_nonterminals,
            max_nonterminals: self.max_nonterminals,
            max_expansions: self.max_expansions,
        }
    }

    pub fn campaign_options(&self) -> CampaignOptions {
        CampaignOptions {
            schedule: MeasureSchedule::from_interval(self.measure_every),
            feedback_enabled: self.feedback_enabled,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ExecutorSettings {
    #[serde(default = "default_command")]
    pub command: Vec<String>,
    #[serde(default)]
    pub input_delivery: ConfigInputDelivery,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    pub working_dir: Option<PathBuf>,
    /// Database file the target opens; appended to `command` when set.
    pub db_file: Option<PathBuf>,
    /// Delete `db-file` before every execution.
    #[serde(default)]
    pub clean_database: bool,
}

fn default_command() -> Vec<String> {
    vec!["sqlite3".to_string()]
}

fn default_timeout_ms() -> u64 {
    2000
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            command: default_command(),
            input_delivery: ConfigInputDelivery::default(),
            timeout_ms: default_timeout_ms(),
            working_dir: None,
            db_file: None,
            clean_database: false,
        }
    }
}

impl ExecutorSettings {
    pub fn to_executor_config(&self) -> CommandExecutorConfig {
        let mut command = self.command.clone();
        if let Some(db_file) = &self.db_file {
            command.push(db_file.to_string_lossy().into_owned());
        }
        let reset_file = match (&self.db_file, self.clean_database) {
            (Some(db_file), true) => Some(match &self.working_dir {
                Some(dir) if db_file.is_relative() => dir.join(db_file),
                _ => db_file.clone(),
            }),
            _ => None,
        };
        CommandExecutorConfig {
            command,
            input_delivery: self.input_delivery.clone().into(),
            timeout: Duration::from_millis(self.timeout_ms),
            working_dir: self.working_dir.clone(),
            reset_file,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CoverageSettings {
    /// Defaults to the gcovr invocation that writes `report-file`.
    pub command: Option<Vec<String>>,
    #[serde(default = "default_report_file")]
    pub report_file: PathBuf,
    #[serde(default = "default_target_file")]
    pub target_file: String,
    pub working_dir: Option<PathBuf>,
}

fn default_report_file() -> PathBuf {
    PathBuf::from(DEFAULT_REPORT_FILE)
}

fn default_target_file() -> String {
    DEFAULT_TARGET_FILE.to_string()
}

impl Default for CoverageSettings {
    fn default() -> Self {
        Self {
            command: None,
            report_file: default_report_file(),
            target_file: default_target_file(),
            working_dir: None,
        }
    }
}

impl CoverageSettings {
    pub fn to_gcovr_settings(&self) -> GcovrSettings {
        let command = self
            .command
            .clone()
            .unwrap_or_else(|| default_gcovr_command(&self.report_file.to_string_lossy()));
        GcovrSettings {
            command,
            report_file: self.report_file.clone(),
            target_file: self.target_file.clone(),
            working_dir: self.working_dir.clone(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CorpusSettings {
    /// Directory of seed files; required by the mutation fuzzer.
    pub seed_dir: Option<PathBuf>,
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Where to write the final population, if anywhere.
    pub save_dir: Option<PathBuf>,
}

fn default_extension() -> String {
    DEFAULT_SEED_EXTENSION.to_string()
}

impl Default for CorpusSettings {
    fn default() -> Self {
        Self {
            seed_dir: None,
            extension: default_extension(),
            save_dir: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SqlfuzzConfig {
    #[serde(default)]
    pub fuzzer: FuzzerSettings,
    #[serde(default)]
    pub executor: ExecutorSettings,
    #[serde(default)]
    pub coverage: CoverageSettings,
    #[serde(default)]
    pub corpus: CorpusSettings,
}

impl SqlfuzzConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::from_toml_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}
