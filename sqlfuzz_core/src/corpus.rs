use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// File extension seed files are expected to carry.
pub const DEFAULT_SEED_EXTENSION: &str = "dat";

/// Defines errors that can arise during corpus operations.
///
/// These cover I/O problems when reading or writing seed directories as well as
/// logical errors like a seed directory that contains nothing usable.
#[derive(Error, Debug)]
pub enum CorpusError {
    /// A seed directory was read successfully but held no matching files.
    #[error("No seed files with extension '.{extension}' found in {dir:?}")]
    NoSeeds { dir: PathBuf, extension: String },

    /// An I/O error occurred while reading or writing seed files.
    /// Contains a string describing the underlying I/O error.
    #[error("Corpus I/O error: {0}")]
    Io(String),
}

/// Where a population entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOrigin {
    /// Part of the corpus the fuzzer was constructed with.
    Initial,
    /// Added later because it increased coverage.
    Retained,
}

/// The in-memory set of strings eligible for mutation.
///
/// Entries are only ever appended; ids are insertion indices and stay valid for
/// the lifetime of the population.
#[derive(Debug, Clone, Default)]
pub struct Population {
    entries: Vec<(String, SeedOrigin)>,
}

impl Population {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a population whose entries are all marked [`SeedOrigin::Initial`].
    pub fn from_seeds<I>(seeds: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            entries: seeds
                .into_iter()
                .map(|seed| (seed, SeedOrigin::Initial))
                .collect(),
        }
    }

    /// Appends an entry and returns its id. Duplicates are kept.
    pub fn add(&mut self, input: String, origin: SeedOrigin) -> usize {
        let id = self.entries.len();
        self.entries.push((input, origin));
        id
    }

    pub fn get(&self, id: usize) -> Option<&str> {
        self.entries.get(id).map(|(input, _)| input.as_str())
    }

    pub fn origin(&self, id: usize) -> Option<SeedOrigin> {
        self.entries.get(id).map(|(_, origin)| *origin)
    }

    /// Uniformly picks one entry, returning its id and contents.
    pub fn random_select<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<(usize, &str)> {
        if self.entries.is_empty() {
            return None;
        }
        let index = rng.random_range(0..self.entries.len());
        self.get(index).map(|input| (index, input))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries added after construction.
    pub fn retained_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|(_, origin)| *origin == SeedOrigin::Retained)
            .count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(input, _)| input.as_str())
    }
}

/// Reads every `*.{extension}` file directly inside `dir` as one seed.
///
/// Files are returned sorted by path so that replay order does not depend on
/// the file system. Subdirectories are not traversed. Content that is not
/// valid UTF-8 is decoded lossily.
pub fn load_seed_dir(dir: &Path, extension: &str) -> Result<Vec<String>, CorpusError> {
    let entries = fs::read_dir(dir)
        .map_err(|e| CorpusError::Io(format!("Failed to read seed directory {dir:?}: {e}")))?;

    let mut seed_paths = Vec::new();
    for entry_result in entries {
        let entry = entry_result
            .map_err(|e| CorpusError::Io(format!("Error reading entry in {dir:?}: {e}")))?;
        let path = entry.path();
        let matches_extension = path
            .extension()
            .is_some_and(|ext| ext.to_string_lossy() == extension);
        if path.is_file() && matches_extension {
            seed_paths.push(path);
        }
    }
    seed_paths.sort();

    if seed_paths.is_empty() {
        return Err(CorpusError::NoSeeds {
            dir: dir.to_path_buf(),
            extension: extension.to_string(),
        });
    }

    let mut seeds = Vec::with_capacity(seed_paths.len());
    for path in &seed_paths {
        let bytes = fs::read(path)
            .map_err(|e| CorpusError::Io(format!("Failed to read seed file {path:?}: {e}")))?;
        let seed = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(err) => {
                warn!(?path, "seed file is not valid UTF-8, decoding lossily");
                String::from_utf8_lossy(err.as_bytes()).into_owned()
            }
        };
        seeds.push(seed);
    }
    debug!(count = seeds.len(), ?dir, "loaded seed corpus");
    Ok(seeds)
}

/// Writes each population entry to `dir` as `<md5-hex>.{extension}`.
///
/// Names are content hashes, so duplicate entries and files already present
/// from an earlier run are skipped. Returns the number of files written.
pub fn save_population(
    dir: &Path,
    population: &Population,
    extension: &str,
) -> Result<usize, CorpusError> {
    fs::create_dir_all(dir)
        .map_err(|e| CorpusError::Io(format!("Failed to create corpus directory {dir:?}: {e}")))?;

    let mut written = 0;
    for input in population.iter() {
        let digest = md5::compute(input.as_bytes());
        let path = dir.join(format!("{digest:x}")).with_extension(extension);
        if path.exists() {
            continue;
        }
        fs::write(&path, input)
            .map_err(|e| CorpusError::Io(format!("Failed to write seed file {path:?}: {e}")))?;
        written += 1;
    }
    debug!(written, ?dir, "saved population");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn population_add_and_get() {
        let mut population = Population::from_seeds(vec!["a".to_string()]);
        let id = population.add("b".to_string(), SeedOrigin::Retained);
        assert_eq!(id, 1);
        assert_eq!(population.get(0), Some("a"));
        assert_eq!(population.get(1), Some("b"));
        assert_eq!(population.get(2), None);
        assert_eq!(population.origin(0), Some(SeedOrigin::Initial));
        assert_eq!(population.origin(1), Some(SeedOrigin::Retained));
        assert_eq!(population.retained_count(), 1);
    }

    #[test]
    fn population_keeps_duplicates() {
        let mut population = Population::new();
        population.add("x".to_string(), SeedOrigin::Retained);
        population.add("x".to_string(), SeedOrigin::Retained);
        assert_eq!(population.len(), 2);
    }

    #[test]
    fn random_select_from_empty_population_returns_none() {
        let population = Population::new();
        let mut rng = ChaCha8Rng::from_seed([0; 32]);
        assert!(population.is_empty());
        assert!(population.random_select(&mut rng).is_none());
    }

    #[test]
    fn random_select_reaches_every_entry() {
        let population =
            Population::from_seeds(["a", "b", "c"].iter().map(|s| s.to_string()));
        let mut rng = ChaCha8Rng::from_seed([1; 32]);
        let selected: HashSet<usize> = (0..100)
            .filter_map(|_| population.random_select(&mut rng).map(|(id, _)| id))
            .collect();
        assert_eq!(selected.len(), population.len());
    }

    #[test]
    fn load_seed_dir_reads_matching_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.dat"), "SELECT 2;").unwrap();
        fs::write(dir.path().join("a.dat"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        fs::create_dir(dir.path().join("nested.dat")).unwrap();

        let seeds = load_seed_dir(dir.path(), DEFAULT_SEED_EXTENSION).unwrap();
        assert_eq!(seeds, vec!["SELECT 1;".to_string(), "SELECT 2;".to_string()]);
    }

    #[test]
    fn load_seed_dir_decodes_invalid_utf8_lossily() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x.dat"), [b'a', 0xFF, b'b']).unwrap();
        let seeds = load_seed_dir(dir.path(), DEFAULT_SEED_EXTENSION).unwrap();
        assert_eq!(seeds, vec!["a\u{FFFD}b".to_string()]);
    }

    #[test]
    fn load_seed_dir_without_seeds_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("readme.md"), "no seeds here").unwrap();
        match load_seed_dir(dir.path(), DEFAULT_SEED_EXTENSION) {
            Err(CorpusError::NoSeeds { extension, .. }) => assert_eq!(extension, "dat"),
            other => panic!("Expected NoSeeds, got {other:?}"),
        }
    }

    #[test]
    fn load_seed_dir_missing_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does_not_exist");
        assert!(matches!(
            load_seed_dir(&missing, DEFAULT_SEED_EXTENSION),
            Err(CorpusError::Io(_))
        ));
    }

    #[test]
    fn save_population_deduplicates_by_content() {
        let dir = tempfile::tempdir().unwrap();
        let mut population =
            Population::from_seeds(["CREATE TABLE a (b TEXT);", "VACUUM;"].map(String::from));
        population.add("VACUUM;".to_string(), SeedOrigin::Retained);

        let written = save_population(dir.path(), &population, DEFAULT_SEED_EXTENSION).unwrap();
        assert_eq!(written, 2);
        let again = save_population(dir.path(), &population, DEFAULT_SEED_EXTENSION).unwrap();
        assert_eq!(again, 0);

        let mut reloaded = load_seed_dir(dir.path(), DEFAULT_SEED_EXTENSION).unwrap();
        reloaded.sort();
        assert_eq!(
            reloaded,
            vec!["CREATE TABLE a (b TEXT);".to_string(), "VACUUM;".to_string()]
        );
    }
}
