use crate::coverage::{CoverageError, CoverageSource};
use crate::executor::{ExecutionStatus, Executor};
use crate::feedback::{CoverageFeedback, Feedback};
use crate::fuzzer::{Fuzzer, FuzzerError};
use crate::oracle::{BugReport, CrashOracle, Oracle};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum CampaignError {
    #[error(transparent)]
    Fuzzer(#[from] FuzzerError),

    #[error("Coverage measurement failed: {0}")]
    Coverage(#[from] CoverageError),

    /// Coverage feedback was requested for a fuzzer that cannot take new seeds.
    #[error("Coverage feedback needs a fuzzer that accepts seeds, but {0} does not")]
    RetentionUnsupported(&'static str),

    /// `Every(0)` would never measure.
    #[error("Measurement interval must be at least 1")]
    InvalidSchedule,

    /// The target could not be started, e.g. a missing binary or an unwritable temp dir.
    #[error("Target could not be executed: {0}")]
    Execution(String),
}

/// Back-to-back [`ExecutionStatus::Other`] results after which the target is given up on.
const MAX_CONSECUTIVE_EXECUTION_FAILURES: usize = 3;

/// When the campaign asks the coverage source for a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MeasureSchedule {
    /// After cycles `0, k, 2k, ...`, plus once at the end.
    Every(usize),
    /// Only once, after the last cycle.
    #[default]
    AtEnd,
}

impl MeasureSchedule {
    /// `None` means "only at the end".
    pub fn from_interval(interval: Option<usize>) -> Self {
        interval.map_or(Self::AtEnd, Self::Every)
    }

    fn is_due(self, cycle: usize) -> bool {
        match self {
            Self::Every(k) => k > 0 && cycle % k == 0,
            Self::AtEnd => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CampaignOptions {
    pub schedule: MeasureSchedule,
    /// Retain inputs that increased coverage. Forces [`MeasureSchedule::Every`]`(1)`.
    pub feedback_enabled: bool,
}

/// Summary of one [`Campaign::run_campaign`] call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CampaignReport {
    pub fuzzer: &'static str,
    pub runs_requested: usize,
    pub executions: usize,
    pub measurements: usize,
    pub retained: usize,
    /// Set when the cancellation flag stopped the loop early.
    pub cancelled: bool,
    pub crashes: Vec<BugReport<String>>,
    /// Baseline after every executed cycle, followed by the final measurement.
    pub coverage_trace: Vec<f64>,
    pub final_coverage: f64,
    pub population_size: Option<usize>,
}

/// Drives a fuzzer against a target for a fixed number of cycles.
///
/// Each cycle generates one input, executes it, lets the oracle judge the
/// outcome and, when the schedule says so, measures coverage. With feedback on,
/// an input whose measurement beats the previous one is handed back to the
/// fuzzer as a seed.
pub struct Campaign<R: Rng + ?Sized> {
    fuzzer: Box<dyn Fuzzer<R>>,
    executor: Box<dyn Executor<String>>,
    coverage: Box<dyn CoverageSource>,
    oracle: Box<dyn Oracle<String>>,
    feedback: CoverageFeedback,
    options: CampaignOptions,
    cancel: Arc<AtomicBool>,
}

impl<R: Rng + ?Sized> Campaign<R> {
    pub fn new(
        fuzzer: Box<dyn Fuzzer<R>>,
        executor: Box<dyn Executor<String>>,
        coverage: Box<dyn CoverageSource>,
        mut options: CampaignOptions,
    ) -> Result<Self, CampaignError> {
        if options.schedule == MeasureSchedule::Every(0) {
            return Err(CampaignError::InvalidSchedule);
        }
        if options.feedback_enabled {
            if !fuzzer.accepts_seeds() {
                return Err(CampaignError::RetentionUnsupported(fuzzer.name()));
            }
            if options.schedule != MeasureSchedule::Every(1) {
                debug!(
                    requested = ?options.schedule,
                    "feedback enabled, measuring after every cycle"
                );
                options.schedule = MeasureSchedule::Every(1);
            }
        }
        Ok(Self {
            fuzzer,
            executor,
            coverage,
            oracle: Box::new(CrashOracle::new()),
            feedback: CoverageFeedback::new(),
            options,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_oracle(mut self, oracle: Box<dyn Oracle<String>>) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn options(&self) -> CampaignOptions {
        self.options
    }

    pub fn fuzzer(&self) -> &dyn Fuzzer<R> {
        self.fuzzer.as_ref()
    }

    pub fn feedback(&self) -> &CoverageFeedback {
        &self.feedback
    }

    /// Setting the returned flag stops the campaign before its next cycle.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Runs `runs` generate/execute cycles and one final coverage measurement.
    pub fn run_campaign(
        &mut self,
        runs: usize,
        rng: &mut R,
    ) -> Result<CampaignReport, CampaignError> {
        let mut report = CampaignReport {
            fuzzer: self.fuzzer.name(),
            runs_requested: runs,
            executions: 0,
            measurements: 0,
            retained: 0,
            cancelled: false,
            crashes: Vec::new(),
            coverage_trace: Vec::with_capacity(runs + 1),
            final_coverage: 0.0,
            population_size: None,
        };
        info!(
            fuzzer = report.fuzzer,
            runs,
            schedule = ?self.options.schedule,
            feedback = self.options.feedback_enabled,
            "starting campaign"
        );

        let mut consecutive_failures = 0;
        for cycle in 0..runs {
            if self.cancel.load(Ordering::Relaxed) {
                info!(cycle, "campaign cancelled");
                report.cancelled = true;
                break;
            }

            let input = self.fuzzer.fuzz(rng)?;
            let status = self.executor.execute_sync(&input);
            report.executions += 1;
            debug!(cycle, ?status, len = input.len(), "executed input");

            match &status {
                ExecutionStatus::Other(reason) => {
                    consecutive_failures += 1;
                    warn!(cycle, %reason, "target did not run");
                    // A first run that fails means the target is missing or misconfigured.
                    if cycle == 0 || consecutive_failures >= MAX_CONSECUTIVE_EXECUTION_FAILURES {
                        return Err(CampaignError::Execution(reason.clone()));
                    }
                }
                ExecutionStatus::Timeout => {
                    consecutive_failures = 0;
                    warn!(cycle, "target timed out");
                }
                ExecutionStatus::Ok | ExecutionStatus::Exited(_) | ExecutionStatus::Crash(_) => {
                    consecutive_failures = 0;
                }
            }
            if let Some(bug) = self.oracle.examine(&input, &status) {
                warn!(
                    cycle,
                    hash = %bug.input_hash,
                    description = %bug.description,
                    "target crashed"
                );
                report.crashes.push(bug);
            }

            if self.options.schedule.is_due(cycle) {
                let previous = self.feedback.baseline();
                let coverage = self.coverage.measure()?;
                report.measurements += 1;
                let increased = self.feedback.observe(coverage);
                if increased && self.options.feedback_enabled {
                    self.fuzzer.add_seed(input)?;
                    report.retained += 1;
                    info!(cycle, previous, coverage, "coverage increased");
                }
            }
            report.coverage_trace.push(self.feedback.baseline());
        }

        let final_coverage = self.coverage.measure()?;
        report.measurements += 1;
        report.coverage_trace.push(final_coverage);
        report.final_coverage = final_coverage;
        report.population_size = self.fuzzer.population().map(|p| p.len());

        info!(
            executions = report.executions,
            retained = report.retained,
            crashes = report.crashes.len(),
            final_coverage,
            "campaign finished"
        );
        Ok(report)
    }
}
