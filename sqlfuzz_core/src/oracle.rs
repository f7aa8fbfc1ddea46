use crate::executor::ExecutionStatus;
use crate::input::Input;
use serde::Serialize;

/// Severity assigned to a target killed by a signal.
const CRASH_SEVERITY: u8 = 10;
/// Severity assigned to a target that never finished.
const HANG_SEVERITY: u8 = 5;

/// An input that made the target misbehave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BugReport<I: Input> {
    /// The input that triggered this report.
    pub input: I,
    pub description: String,
    /// MD5 hex digest of the input bytes, used to deduplicate reports.
    pub input_hash: String,
    /// Higher is worse. Crashes rank above hangs.
    pub severity: u8,
}

impl<I: Input> BugReport<I> {
    fn new(input: &I, description: String, severity: u8) -> Self {
        Self {
            input: input.clone(),
            description,
            input_hash: input_hash(input),
            severity,
        }
    }
}

/// MD5 hex digest of an input's byte view.
pub fn input_hash<I: Input>(input: &I) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// An `Oracle` looks at the outcome of one execution and decides whether it is a bug.
///
/// A target that rejects an input with a non-zero exit code is behaving
/// correctly, so oracles for SQL targets should not flag
/// [`ExecutionStatus::Exited`].
pub trait Oracle<I: Input> {
    fn examine(&self, input: &I, status: &ExecutionStatus) -> Option<BugReport<I>>;
}

/// Reports crashes, and optionally timeouts.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrashOracle {
    report_timeouts: bool,
}

impl CrashOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also treats [`ExecutionStatus::Timeout`] as a (lower severity) finding.
    pub fn with_timeouts(mut self, report_timeouts: bool) -> Self {
        self.report_timeouts = report_timeouts;
        self
    }
}

impl<I: Input> Oracle<I> for CrashOracle {
    fn examine(&self, input: &I, status: &ExecutionStatus) -> Option<BugReport<I>> {
        match status {
            ExecutionStatus::Crash(description) => {
                Some(BugReport::new(input, description.clone(), CRASH_SEVERITY))
            }
            ExecutionStatus::Timeout if self.report_timeouts => Some(BugReport::new(
                input,
                "Target timed out".to_string(),
                HANG_SEVERITY,
            )),
            ExecutionStatus::Ok
            | ExecutionStatus::Exited(_)
            | ExecutionStatus::Timeout
            | ExecutionStatus::Other(_) => None,
        }
    }
}
