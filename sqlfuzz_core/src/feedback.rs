/// Decides whether the most recent input earned a place in the corpus.
///
/// Retention happens only on a strict increase; equal coverage is not progress.
pub fn should_retain(previous_coverage: f64, new_coverage: f64) -> bool {
    new_coverage > previous_coverage
}

/// A `Feedback` turns a stream of external measurements into keep/discard decisions.
pub trait Feedback {
    fn name(&self) -> &'static str;

    /// Records a new measurement and reports whether the input that produced it
    /// should be retained.
    fn observe(&mut self, measurement: f64) -> bool;
}

/// Coverage-trend feedback.
///
/// The baseline is replaced by every measurement, including ones that went
/// down, so climbing back after a dip counts as an increase again.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CoverageFeedback {
    baseline: f64,
}

impl CoverageFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_baseline(baseline: f64) -> Self {
        Self { baseline }
    }

    /// The last coverage value observed (0.0 before any measurement).
    pub fn baseline(&self) -> f64 {
        self.baseline
    }
}

impl Feedback for CoverageFeedback {
    fn name(&self) -> &'static str {
        "CoverageFeedback"
    }

    fn observe(&mut self, measurement: f64) -> bool {
        let retain = should_retain(self.baseline, measurement);
        self.baseline = measurement;
        retain
    }
}
