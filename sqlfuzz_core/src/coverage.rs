use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::debug;

/// Source file whose branch coverage is reported by default (the SQLite amalgamation).
pub const DEFAULT_TARGET_FILE: &str = "sqlite3.c";
/// Where the default gcovr command writes its CSV report.
pub const DEFAULT_REPORT_FILE: &str = "coverage_report.csv";

const FILENAME_COLUMN: &str = "filename";
const BRANCH_PERCENT_COLUMN: &str = "branch_percent";

/// Errors raised while collecting or interpreting a coverage measurement.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoverageError {
    /// The coverage command could not be spawned or exited unsuccessfully.
    #[error("Coverage command failed: {0}")]
    Command(String),

    /// The report file could not be read.
    #[error("Coverage report I/O error: {0}")]
    Io(String),

    /// The report header lacks a required column.
    #[error("Coverage report has no '{0}' column")]
    MissingColumn(&'static str),

    /// No row in the report names the target file.
    #[error("Coverage report has no row for '{0}'")]
    MissingTarget(String),

    /// The coverage cell could not be parsed as a number.
    #[error("Invalid coverage value '{0}'")]
    InvalidValue(String),

    /// A coverage signal must be a percentage.
    #[error("Coverage value {0} is outside [0, 100]")]
    OutOfRange(f64),
}

/// Something that can report how much of the target has been exercised so far.
///
/// Measurements are cumulative over the whole campaign, so a source is
/// expected to return non-decreasing values, though callers must not rely on it.
pub trait CoverageSource {
    fn name(&self) -> &'static str;

    /// Takes a fresh measurement as a percentage in `[0, 100]`.
    fn measure(&mut self) -> Result<f64, CoverageError>;
}

#[derive(Debug, Clone)]
pub struct GcovrSettings {
    /// Command and arguments that (re)generate the CSV report.
    pub command: Vec<String>,
    /// Report path, resolved against `working_dir` when relative.
    pub report_file: PathBuf,
    /// Value of the `filename` column to read coverage from.
    pub target_file: String,
    pub working_dir: Option<PathBuf>,
}

impl Default for GcovrSettings {
    fn default() -> Self {
        Self {
            command: default_gcovr_command(DEFAULT_REPORT_FILE),
            report_file: PathBuf::from(DEFAULT_REPORT_FILE),
            target_file: DEFAULT_TARGET_FILE.to_string(),
            working_dir: None,
        }
    }
}

/// `gcovr --csv --txt-metric branch --exclude-unreachable-branches -o <report>`.
pub fn default_gcovr_command(report_file: &str) -> Vec<String> {
    [
        "gcovr",
        "--csv",
        "--txt-metric",
        "branch",
        "--exclude-unreachable-branches",
        "-o",
        report_file,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Branch coverage of one source file, read from a gcovr CSV report.
#[derive(Debug, Clone)]
pub struct GcovrCoverage {
    settings: GcovrSettings,
}

impl GcovrCoverage {
    pub fn new(settings: GcovrSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &GcovrSettings {
        &self.settings
    }

    fn report_path(&self) -> PathBuf {
        match &self.settings.working_dir {
            Some(dir) if self.settings.report_file.is_relative() => {
                dir.join(&self.settings.report_file)
            }
            _ => self.settings.report_file.clone(),
        }
    }

    fn regenerate_report(&self) -> Result<(), CoverageError> {
        let Some((program, args)) = self.settings.command.split_first() else {
            return Err(CoverageError::Command("coverage command is empty".to_string()));
        };
        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::null()).stdout(Stdio::null());
        if let Some(cwd) = &self.settings.working_dir {
            cmd.current_dir(cwd);
        }

        let output = cmd.output().map_err(|e| {
            CoverageError::Command(format!("Failed to spawn {:?}: {e}", self.settings.command))
        })?;
        if !output.status.success() {
            return Err(CoverageError::Command(format!(
                "{:?} exited with {}: {}",
                self.settings.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

impl CoverageSource for GcovrCoverage {
    fn name(&self) -> &'static str {
        "GcovrCoverage"
    }

    fn measure(&mut self) -> Result<f64, CoverageError> {
        self.regenerate_report()?;
        let path = self.report_path();
        let report = fs::read_to_string(&path)
            .map_err(|e| CoverageError::Io(format!("Failed to read {path:?}: {e}")))?;
        let coverage = parse_branch_percent(&report, &self.settings.target_file)?;
        debug!(coverage, target = %self.settings.target_file, "measured branch coverage");
        Ok(coverage)
    }
}

/// Extracts the `branch_percent` cell for `target_file` from a gcovr CSV report.
///
/// The first row is the header. Cells may be double-quoted; the report never
/// embeds commas inside a cell, so rows are split on `,` directly.
pub fn parse_branch_percent(csv: &str, target_file: &str) -> Result<f64, CoverageError> {
    let mut lines = csv.lines().filter(|line| !line.trim().is_empty());
    let header: Vec<&str> = lines
        .next()
        .map(split_row)
        .unwrap_or_default();

    let column = |name: &'static str| {
        header
            .iter()
            .position(|cell| *cell == name)
            .ok_or(CoverageError::MissingColumn(name))
    };
    let filename_idx = column(FILENAME_COLUMN)?;
    let percent_idx = column(BRANCH_PERCENT_COLUMN)?;

    let cell = lines
        .map(split_row)
        .find(|row| row.get(filename_idx) == Some(&target_file))
        .ok_or_else(|| CoverageError::MissingTarget(target_file.to_string()))?
        .get(percent_idx)
        .copied()
        .unwrap_or_default();

    let value: f64 = cell
        .parse()
        .map_err(|_| CoverageError::InvalidValue(cell.to_string()))?;
    if !(0.0..=100.0).contains(&value) {
        return Err(CoverageError::OutOfRange(value));
    }
    Ok(value)
}

fn split_row(line: &str) -> Vec<&str> {
    line.split(',')
        .map(|cell| cell.trim().trim_matches('"'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "\
filename,line_total,line_covered,line_percent,branch_total,branch_covered,branch_percent
shell.c,100,10,10.0,40,4,10.0
sqlite3.c,90000,9000,10.0,60000,7350,12.25
";

    #[test]
    fn parses_branch_percent_for_target_row() {
        assert_eq!(parse_branch_percent(REPORT, "sqlite3.c"), Ok(12.25));
        assert_eq!(parse_branch_percent(REPORT, "shell.c"), Ok(10.0));
    }

    #[test]
    fn quoted_cells_are_accepted() {
        let report = "\"filename\",\"branch_percent\"\n\"sqlite3.c\",\"42.5\"\n";
        assert_eq!(parse_branch_percent(report, DEFAULT_TARGET_FILE), Ok(42.5));
    }

    #[test]
    fn missing_target_row_is_an_error() {
        assert_eq!(
            parse_branch_percent(REPORT, "parse.c"),
            Err(CoverageError::MissingTarget("parse.c".to_string()))
        );
    }

    #[test]
    fn missing_columns_are_reported() {
        assert_eq!(
            parse_branch_percent("filename,line_percent\nsqlite3.c,1.0\n", "sqlite3.c"),
            Err(CoverageError::MissingColumn(BRANCH_PERCENT_COLUMN))
        );
        assert_eq!(
            parse_branch_percent("", "sqlite3.c"),
            Err(CoverageError::MissingColumn(FILENAME_COLUMN))
        );
    }

    #[test]
    fn non_numeric_and_out_of_range_values_are_rejected() {
        assert_eq!(
            parse_branch_percent("filename,branch_percent\nsqlite3.c,n/a\n", "sqlite3.c"),
            Err(CoverageError::InvalidValue("n/a".to_string()))
        );
        assert_eq!(
            parse_branch_percent("filename,branch_percent\nsqlite3.c,101\n", "sqlite3.c"),
            Err(CoverageError::OutOfRange(101.0))
        );
    }

    #[test]
    fn default_settings_match_gcovr_invocation() {
        let settings = GcovrSettings::default();
        assert_eq!(settings.command[0], "gcovr");
        assert_eq!(settings.command.last().map(String::as_str), Some(DEFAULT_REPORT_FILE));
        assert_eq!(settings.target_file, DEFAULT_TARGET_FILE);
    }

    #[cfg(unix)]
    #[test]
    fn gcovr_coverage_runs_command_then_reads_report() {
        let dir = tempfile::tempdir().unwrap();
        let script = "printf 'filename,branch_percent\\nsqlite3.c,33.5\\n' > report.csv";
        let mut source = GcovrCoverage::new(GcovrSettings {
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            report_file: PathBuf::from("report.csv"),
            target_file: DEFAULT_TARGET_FILE.to_string(),
            working_dir: Some(dir.path().to_path_buf()),
        });
        assert_eq!(source.measure(), Ok(33.5));
        assert!(dir.path().join("report.csv").exists());
    }

    #[cfg(unix)]
    #[test]
    fn failing_coverage_command_is_an_error() {
        let mut source = GcovrCoverage::new(GcovrSettings {
            command: vec!["sh".to_string(), "-c".to_string(), "exit 2".to_string()],
            ..GcovrSettings::default()
        });
        assert!(matches!(source.measure(), Err(CoverageError::Command(_))));
    }

    #[test]
    fn empty_coverage_command_is_an_error() {
        let mut source = GcovrCoverage::new(GcovrSettings {
            command: Vec::new(),
            ..GcovrSettings::default()
        });
        assert!(matches!(source.measure(), Err(CoverageError::Command(_))));
    }
}
