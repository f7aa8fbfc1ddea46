use crate::corpus::{Population, SeedOrigin};
use crate::fuzzer::{Fuzzer, FuzzerError};
use crate::mutator::{
    DEFAULT_MAX_MUTATIONS, DEFAULT_MIN_MUTATIONS, HavocMutator, MutationError, Mutator,
};
use rand::Rng;
use tracing::{debug, info};

/// Whether the fuzzer is still replaying its initial seeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuzzerState {
    Seeding,
    Mutating,
}

/// Replays a seed corpus, then evolves it with random string edits.
///
/// The first `seeds.len()` calls to [`MutationFuzzer::next_input`] return the
/// seeds verbatim and in order, without touching the random source. Every call
/// after that picks a population member uniformly at random and runs it through
/// a [`HavocMutator`]. The switch from seeding to mutating happens once and is
/// never undone.
///
/// The population starts as a copy of the seeds and grows only through
/// [`MutationFuzzer::add_seed`]; the seed list itself is never modified.
#[derive(Debug, Clone)]
pub struct MutationFuzzer {
    seeds: Vec<String>,
    seed_cursor: usize,
    population: Population,
    mutator: HavocMutator,
    last_input: Option<String>,
}

impl MutationFuzzer {
    pub fn new(
        seeds: Vec<String>,
        min_mutations: usize,
        max_mutations: usize,
    ) -> Result<Self, MutationError> {
        if seeds.is_empty() {
            return Err(MutationError::EmptyCorpus);
        }
        let mutator = HavocMutator::new(min_mutations, max_mutations)?;
        Ok(Self {
            population: Population::from_seeds(seeds.iter().cloned()),
            seeds,
            seed_cursor: 0,
            mutator,
            last_input: None,
        })
    }

    /// Same as [`MutationFuzzer::new`] with 2..=10 mutations per candidate.
    pub fn with_seeds(seeds: Vec<String>) -> Result<Self, MutationError> {
        Self::new(seeds, DEFAULT_MIN_MUTATIONS, DEFAULT_MAX_MUTATIONS)
    }

    pub fn state(&self) -> FuzzerState {
        if self.seed_cursor < self.seeds.len() {
            FuzzerState::Seeding
        } else {
            FuzzerState::Mutating
        }
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    pub fn seeds(&self) -> &[String] {
        &self.seeds
    }

    /// The input most recently returned by [`MutationFuzzer::next_input`].
    pub fn last_input(&self) -> Option<&str> {
        self.last_input.as_deref()
    }

    /// Produces the next input. Never fails.
    pub fn next_input<R: Rng + ?Sized>(&mut self, rng: &mut R) -> String {
        let input = match self.state() {
            FuzzerState::Seeding => {
                let seed = self.seeds[self.seed_cursor].clone();
                self.seed_cursor += 1;
                if self.state() == FuzzerState::Mutating {
                    debug!(seeds = self.seeds.len(), "all seeds replayed, switching to mutation");
                }
                seed
            }
            FuzzerState::Mutating => self.create_candidate(rng),
        };
        self.last_input = Some(input.clone());
        input
    }

    /// Mutates a uniformly chosen population member.
    fn create_candidate<R: Rng + ?Sized>(&mut self, rng: &mut R) -> String {
        // The population holds at least the seeds, and construction rejects an empty seed list.
        let base = self
            .population
            .random_select(rng)
            .map(|(_, input)| input.to_string())
            .unwrap_or_default();
        self.mutator.mutate(&base, rng)
    }

    /// Appends `input` to the mutation population. Duplicates are accepted.
    pub fn add_seed(&mut self, input: String) {
        let id = self.population.add(input, SeedOrigin::Retained);
        info!(
            population = self.population.len(),
            id, "new seed has been added to the corpus"
        );
    }
}

impl<R: Rng + ?Sized> Fuzzer<R> for MutationFuzzer {
    fn name(&self) -> &'static str {
        "MutationFuzzer"
    }

    fn fuzz(&mut self, rng: &mut R) -> Result<String, FuzzerError> {
        Ok(self.next_input(rng))
    }

    fn accepts_seeds(&self) -> bool {
        true
    }

    fn add_seed(&mut self, input: String) -> Result<(), FuzzerError> {
        MutationFuzzer::add_seed(self, input);
        Ok(())
    }

    fn population(&self) -> Option<&Population> {
        Some(&self.population)
    }
}
