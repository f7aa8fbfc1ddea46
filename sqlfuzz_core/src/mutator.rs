use crate::input::Input;
use rand::Rng;
use std::ops::RangeInclusive;
use thiserror::Error;

/// Default lower bound on the number of operators applied per mutant.
pub const DEFAULT_MIN_MUTATIONS: usize = 2;
/// Default upper bound on the number of operators applied per mutant.
pub const DEFAULT_MAX_MUTATIONS: usize = 10;
/// Characters `insert_random_character` draws from: printable ASCII.
const PRINTABLE_ASCII: RangeInclusive<u8> = 32..=126;
/// `flip_random_character` only touches the low seven bits of a code point.
const FLIPPABLE_BITS: u32 = 7;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    /// A mutation fuzzer needs at least one seed to replay and mutate.
    #[error("Seed corpus is empty, mutation fuzzing needs at least one seed")]
    EmptyCorpus,
    #[error("min_mutations ({min}) must not exceed max_mutations ({max})")]
    InvalidMutationRange { min: usize, max: usize },
}

/// Returns `s` with one character removed at a uniformly random position.
/// The empty string is returned unchanged.
pub fn delete_random_character<R: Rng + ?Sized>(s: &str, rng: &mut R) -> String {
    let len = s.chars().count();
    if len == 0 {
        return String::new();
    }
    let position = rng.random_range(0..len);
    s.chars()
        .enumerate()
        .filter_map(|(index, ch)| (index != position).then_some(ch))
        .collect()
}

/// Returns `s` with one printable ASCII character inserted at a uniformly random
/// position, including either end.
pub fn insert_random_character<R: Rng + ?Sized>(s: &str, rng: &mut R) -> String {
    let len = s.chars().count();
    let position = rng.random_range(0..=len);
    let inserted = char::from(rng.random_range(PRINTABLE_ASCII));

    let mut mutated = String::with_capacity(s.len() + 1);
    for (index, ch) in s.chars().enumerate() {
        if index == position {
            mutated.push(inserted);
        }
        mutated.push(ch);
    }
    if position == len {
        mutated.push(inserted);
    }
    mutated
}

/// Returns `s` with one bit among the low seven flipped in a random character.
/// The empty string is returned unchanged.
///
/// The result may contain control characters; that is intended.
pub fn flip_random_character<R: Rng + ?Sized>(s: &str, rng: &mut R) -> String {
    let len = s.chars().count();
    if len == 0 {
        return String::new();
    }
    let position = rng.random_range(0..len);
    let bit = 1u32 << rng.random_range(0..FLIPPABLE_BITS);
    s.chars()
        .enumerate()
        .map(|(index, ch)| if index == position { flip_bit(ch, bit) } else { ch })
        .collect()
}

/// Flipping a low-7 bit keeps the value inside its 128-aligned block, and surrogates
/// fill whole blocks, so the result is always a valid scalar value.
fn flip_bit(ch: char, bit: u32) -> char {
    char::from_u32(u32::from(ch) ^ bit).unwrap_or(ch)
}

/// The closed set of string edits the mutation fuzzer chooses from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationOperator {
    Delete,
    Insert,
    FlipBit,
}

impl MutationOperator {
    pub const ALL: [MutationOperator; 3] = [
        MutationOperator::Delete,
        MutationOperator::Insert,
        MutationOperator::FlipBit,
    ];

    /// Picks one operator uniformly at random.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::ALL[rng.random_range(0..Self::ALL.len())]
    }

    pub fn apply<R: Rng + ?Sized>(self, s: &str, rng: &mut R) -> String {
        match self {
            MutationOperator::Delete => delete_random_character(s, rng),
            MutationOperator::Insert => insert_random_character(s, rng),
            MutationOperator::FlipBit => flip_random_character(s, rng),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MutationOperator::Delete => "delete",
            MutationOperator::Insert => "insert",
            MutationOperator::FlipBit => "flip-bit",
        }
    }
}

/// A `Mutator` turns one input into a new, potentially modified input.
///
/// # Type Parameters
/// * `I`: The type of `Input` this mutator operates on.
/// * `R`: The type of random number generator used for mutation decisions.
pub trait Mutator<I: Input, R: Rng + ?Sized> {
    fn mutate(&mut self, input: &I, rng: &mut R) -> I;
}

/// Applies a random number of randomly chosen [`MutationOperator`]s in sequence,
/// each one fed the previous result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HavocMutator {
    min_mutations: usize,
    max_mutations: usize,
}

impl HavocMutator {
    pub fn new(min_mutations: usize, max_mutations: usize) -> Result<Self, MutationError> {
        if min_mutations > max_mutations {
            return Err(MutationError::InvalidMutationRange {
                min: min_mutations,
                max: max_mutations,
            });
        }
        Ok(Self {
            min_mutations,
            max_mutations,
        })
    }

    pub fn mutation_range(&self) -> RangeInclusive<usize> {
        self.min_mutations..=self.max_mutations
    }
}

impl Default for HavocMutator {
    fn default() -> Self {
        Self {
            min_mutations: DEFAULT_MIN_MUTATIONS,
            max_mutations: DEFAULT_MAX_MUTATIONS,
        }
    }
}

impl<R: Rng + ?Sized> Mutator<String, R> for HavocMutator {
    fn mutate(&mut self, input: &String, rng: &mut R) -> String {
        let trials = rng.random_range(self.mutation_range());
        let mut candidate = input.clone();
        for _ in 0..trials {
            candidate = MutationOperator::random(rng).apply(&candidate, rng);
        }
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;
    use std::collections::HashSet;

    fn is_subsequence(needle: &str, haystack: &str) -> bool {
        let mut haystack = haystack.chars();
        needle.chars().all(|c| haystack.any(|h| h == c))
    }

    #[test]
    fn delete_on_empty_and_single_character() {
        let mut rng = ChaCha8Rng::from_seed([0u8; 32]);
        assert_eq!(delete_random_character("", &mut rng), "");
        assert_eq!(delete_random_character("a", &mut rng), "");
    }

    #[test]
    fn delete_removes_exactly_one_character() {
        let mut rng = ChaCha8Rng::from_seed([1u8; 32]);
        let input = "CREATE TABLE t (a TEXT);";
        for _ in 0..100 {
            let mutated = delete_random_character(input, &mut rng);
            assert_eq!(mutated.chars().count(), input.chars().count() - 1);
            assert!(is_subsequence(&mutated, input));
        }
    }

    #[test]
    fn delete_counts_characters_not_bytes() {
        let mut rng = ChaCha8Rng::from_seed([2u8; 32]);
        let mutated = delete_random_character("ñé", &mut rng);
        assert!(mutated == "ñ" || mutated == "é", "{mutated:?}");
    }

    #[test]
    fn insert_adds_one_printable_character() {
        let mut rng = ChaCha8Rng::from_seed([3u8; 32]);
        let input = "SELECT 1;";
        let mut positions = HashSet::new();
        for _ in 0..300 {
            let mutated = insert_random_character(input, &mut rng);
            assert_eq!(mutated.chars().count(), input.chars().count() + 1);
            assert!(is_subsequence(input, &mutated));
            let position = input
                .chars()
                .zip(mutated.chars())
                .position(|(a, b)| a != b)
                .unwrap_or(input.chars().count());
            positions.insert(position);
        }
        // Both ends are reachable.
        assert!(positions.contains(&0));
        assert!(positions.contains(&input.chars().count()));
    }

    #[test]
    fn insert_into_empty_string() {
        let mut rng = ChaCha8Rng::from_seed([4u8; 32]);
        let mutated = insert_random_character("", &mut rng);
        assert_eq!(mutated.len(), 1);
        let ch = mutated.as_bytes()[0];
        assert!(PRINTABLE_ASCII.contains(&ch));
    }

    #[test]
    fn flip_changes_one_low_bit_of_one_character() {
        let mut rng = ChaCha8Rng::from_seed([5u8; 32]);
        let input = "INSERT INTO t VALUES ('ü');";
        for _ in 0..200 {
            let mutated = flip_random_character(input, &mut rng);
            let diffs: Vec<(char, char)> = input
                .chars()
                .zip(mutated.chars())
                .filter(|(a, b)| a != b)
                .collect();
            assert_eq!(mutated.chars().count(), input.chars().count());
            assert_eq!(diffs.len(), 1, "{mutated:?}");
            let xor = u32::from(diffs[0].0) ^ u32::from(diffs[0].1);
            assert!(xor.is_power_of_two() && xor < 128, "xor {xor:#x}");
        }
    }

    #[test]
    fn flip_on_empty_string_is_noop() {
        let mut rng = ChaCha8Rng::from_seed([6u8; 32]);
        assert_eq!(flip_random_character("", &mut rng), "");
    }

    #[test]
    fn random_operator_covers_all_variants() {
        let mut rng = ChaCha8Rng::from_seed([7u8; 32]);
        let seen: HashSet<MutationOperator> =
            (0..100).map(|_| MutationOperator::random(&mut rng)).collect();
        assert_eq!(seen.len(), MutationOperator::ALL.len());
    }

    #[test]
    fn operator_apply_dispatches_to_operator() {
        let mut rng = ChaCha8Rng::from_seed([8u8; 32]);
        let mutated = MutationOperator::Insert.apply("ab", &mut rng);
        assert_eq!(mutated.chars().count(), 3);
        assert_eq!(MutationOperator::FlipBit.name(), "flip-bit");
    }

    #[test]
    fn havoc_mutator_rejects_inverted_range() {
        assert_eq!(
            HavocMutator::new(5, 4),
            Err(MutationError::InvalidMutationRange { min: 5, max: 4 })
        );
        assert!(HavocMutator::new(3, 3).is_ok());
    }

    #[test]
    fn havoc_mutator_length_stays_within_trial_bounds() {
        let mut rng = ChaCha8Rng::from_seed([9u8; 32]);
        let mut mutator = HavocMutator::default();
        let input = "CREATE TABLE abc (d TEXT);".to_string();
        let len = input.chars().count();
        for _ in 0..200 {
            let mutated = mutator.mutate(&input, &mut rng);
            let mutated_len = mutated.chars().count();
            assert!(mutated_len + DEFAULT_MAX_MUTATIONS >= len);
            assert!(mutated_len <= len + DEFAULT_MAX_MUTATIONS);
        }
    }

    #[test]
    fn havoc_mutator_with_zero_trials_returns_input() {
        let mut rng = ChaCha8Rng::from_seed([10u8; 32]);
        let mut mutator = HavocMutator::new(0, 0).unwrap();
        let input = "VACUUM;".to_string();
        assert_eq!(mutator.mutate(&input, &mut rng), input);
    }
}
