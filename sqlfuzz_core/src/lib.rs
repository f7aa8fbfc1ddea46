pub mod campaign;
pub mod config;
pub mod corpus;
pub mod coverage;
pub mod executor;
pub mod feedback;
pub mod fuzzer;
pub mod generator;
pub mod grammar;
pub mod input;
pub mod mutation_fuzzer;
pub mod mutator;
pub mod oracle;

pub use campaign::{Campaign, CampaignError, CampaignOptions, CampaignReport, MeasureSchedule};
pub use config::{ConfigError, FuzzerKind, SqlfuzzConfig};
pub use corpus::{CorpusError, Population, SeedOrigin, load_seed_dir, save_population};
pub use coverage::{CoverageError, CoverageSource, GcovrCoverage, GcovrSettings};
pub use executor::{CommandExecutor, ExecutionStatus, Executor, InProcessExecutor};
pub use feedback::{CoverageFeedback, Feedback, should_retain};
pub use fuzzer::{Fuzzer, FuzzerError};
pub use generator::{GrammarFuzzer, GrammarFuzzerSettings};
pub use grammar::{Grammar, GrammarError};
pub use input::Input;
pub use mutation_fuzzer::{FuzzerState, MutationFuzzer};
pub use mutator::{HavocMutator, MutationError, MutationOperator, Mutator};
pub use oracle::{BugReport, CrashOracle, Oracle};
