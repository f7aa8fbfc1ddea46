use crate::corpus::Population;
use crate::grammar::GrammarError;
use rand::Rng;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FuzzerError {
    #[error("Grammar expansion failed: {0}")]
    Grammar(#[from] GrammarError),
    /// The fuzzer has no population to grow, e.g. a pure grammar fuzzer.
    #[error("{0} does not accept new seeds")]
    RetentionUnsupported(&'static str),
}

/// A source of test inputs for the target.
///
/// Implementations receive the random source on every call instead of owning
/// one, so the caller decides how generation is seeded and can replay a run.
///
/// # Type Parameters
/// * `R`: The type of random number generator the fuzzer draws from.
pub trait Fuzzer<R: Rng + ?Sized> {
    /// Short identifier used in logs and error messages.
    fn name(&self) -> &'static str;

    /// Produces the next input.
    fn fuzz(&mut self, rng: &mut R) -> Result<String, FuzzerError>;

    /// Whether [`Fuzzer::add_seed`] can grow this fuzzer's population.
    fn accepts_seeds(&self) -> bool {
        false
    }

    /// Offers an input that showed new behaviour back to the fuzzer as a future seed.
    fn add_seed(&mut self, _input: String) -> Result<(), FuzzerError> {
        Err(FuzzerError::RetentionUnsupported(self.name()))
    }

    /// The strings this fuzzer mutates, if it keeps any.
    fn population(&self) -> Option<&Population> {
        None
    }
}
