use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use thiserror::Error;

/// Entry point used when a grammar does not name one explicitly.
pub const DEFAULT_START_SYMBOL: &str = "<start>";

/// Errors raised while building, validating, or expanding a grammar.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GrammarError {
    /// A production references a symbol that has no rule.
    #[error("Symbol {0} is referenced but not defined in the grammar")]
    UndefinedSymbol(String),

    /// A symbol has no derivation that ends in terminal text, so expanding it
    /// would never finish.
    #[error("Symbol {0} has no terminating derivation")]
    UnproductiveSymbol(String),

    /// A rule was declared with zero alternatives.
    #[error("Symbol {0} has no alternatives")]
    EmptyAlternatives(String),

    /// Rule keys must themselves be symbol references such as `<name>`.
    #[error("Rule key '{0}' is not a symbol reference of the form <name>")]
    MalformedSymbol(String),

    /// Expansion limits where the lower bound exceeds the upper bound.
    #[error("min_nonterminals ({min}) must not exceed max_nonterminals ({max})")]
    InvalidLimits { min: usize, max: usize },

    /// The grammar file could not be read or decoded.
    #[error("Failed to load grammar: {0}")]
    Load(String),
}

/// One piece of a production: either text copied verbatim into the output,
/// or a reference to another symbol that still has to be expanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Literal(String),
    Symbol(String),
}

/// A single right-hand side of a rule, kept both as written and pre-split into tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alternative {
    text: String,
    tokens: Vec<Token>,
}

impl Alternative {
    pub fn parse(text: &str) -> Self {
        Self {
            text: text.to_string(),
            tokens: tokenize(text),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Names of every symbol this alternative references, in order of appearance.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().filter_map(|token| match token {
            Token::Symbol(name) => Some(name.as_str()),
            Token::Literal(_) => None,
        })
    }

    /// `true` if the alternative is pure literal text.
    pub fn is_terminal(&self) -> bool {
        self.symbols().next().is_none()
    }
}

/// Length in bytes of the symbol reference at the start of `rest`, if there is one.
///
/// A reference is `<`, at least one character other than `<`, `>` or space, then `>`.
fn symbol_len(rest: &str) -> Option<usize> {
    for (index, ch) in rest.char_indices().skip(1) {
        match ch {
            '>' => return (index > 1).then_some(index + 1),
            '<' | ' ' => return None,
            _ => {}
        }
    }
    None
}

/// Splits production text into literal runs and symbol references.
pub fn tokenize(text: &str) -> Vec<Token> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut literal_start = 0;
    let mut cursor = 0;

    while cursor < bytes.len() {
        if bytes[cursor] == b'<' {
            if let Some(len) = symbol_len(&text[cursor..]) {
                if literal_start < cursor {
                    tokens.push(Token::Literal(text[literal_start..cursor].to_string()));
                }
                tokens.push(Token::Symbol(text[cursor..cursor + len].to_string()));
                cursor += len;
                literal_start = cursor;
                continue;
            }
        }
        cursor += 1;
    }
    if literal_start < bytes.len() {
        tokens.push(Token::Literal(text[literal_start..].to_string()));
    }
    tokens
}

/// `true` if `text` still contains anything that looks like `<name>`.
pub fn has_symbol_references(text: &str) -> bool {
    tokenize(text)
        .iter()
        .any(|token| matches!(token, Token::Symbol(_)))
}

/// On-disk shape of a grammar, as read from TOML or JSON.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
struct GrammarFile {
    #[serde(default = "default_start_symbol")]
    start: String,
    rules: BTreeMap<String, Vec<String>>,
}

fn default_start_symbol() -> String {
    DEFAULT_START_SYMBOL.to_string()
}

/// A context-free grammar: symbol names mapped to their ordered alternatives.
///
/// References to undefined symbols are allowed at construction time and only
/// surface when a fuzzer tries to expand them (or when [`Grammar::validate`] is
/// called). Once built, a grammar is never modified; share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "GrammarFile")]
pub struct Grammar {
    start: String,
    rules: BTreeMap<String, Vec<Alternative>>,
}

impl TryFrom<GrammarFile> for Grammar {
    type Error = GrammarError;

    fn try_from(file: GrammarFile) -> Result<Self, Self::Error> {
        Grammar::new(file.start, file.rules)
    }
}

impl Grammar {
    pub fn new<S, A, P>(start: impl Into<String>, rules: S) -> Result<Self, GrammarError>
    where
        S: IntoIterator<Item = (P, A)>,
        A: IntoIterator,
        A::Item: AsRef<str>,
        P: Into<String>,
    {
        let start = start.into();
        if symbol_len(&start) != Some(start.len()) {
            return Err(GrammarError::MalformedSymbol(start));
        }

        let mut parsed = BTreeMap::new();
        for (symbol, alternatives) in rules {
            let symbol = symbol.into();
            if symbol_len(&symbol) != Some(symbol.len()) {
                return Err(GrammarError::MalformedSymbol(symbol));
            }
            let alternatives: Vec<Alternative> = alternatives
                .into_iter()
                .map(|text| Alternative::parse(text.as_ref()))
                .collect();
            if alternatives.is_empty() {
                return Err(GrammarError::EmptyAlternatives(symbol));
            }
            parsed.insert(symbol, alternatives);
        }

        Ok(Self {
            start,
            rules: parsed,
        })
    }

    /// The built-in `CREATE TABLE` grammar used to exercise the SQL engine.
    pub fn create_table() -> Self {
        let letters: Vec<String> = ('a'..='z').map(String::from).collect();
        let rules: Vec<(&str, Vec<String>)> = vec![
            ("<start>", vec!["<create_table>".into()]),
            (
                "<create_table>",
                vec!["CREATE TABLE <table_name> (<table_columns_def>);".into()],
            ),
            ("<table_name>", vec!["<string>".into()]),
            (
                "<table_columns_def>",
                vec![
                    "<table_column_def>".into(),
                    "<table_columns_def>,<table_column_def>".into(),
                ],
            ),
            ("<table_column_def>", vec!["<string> TEXT".into()]),
            ("<string>", vec!["<letter>".into(), "<letter><string>".into()]),
            ("<letter>", letters),
        ];
        // Every key above is a well-formed symbol with at least one alternative.
        Self {
            start: DEFAULT_START_SYMBOL.to_string(),
            rules: rules
                .into_iter()
                .map(|(symbol, alternatives)| {
                    (
                        symbol.to_string(),
                        alternatives.iter().map(|a| Alternative::parse(a)).collect(),
                    )
                })
                .collect(),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, GrammarError> {
        toml::from_str(content).map_err(|e| GrammarError::Load(e.to_string()))
    }

    pub fn from_json_str(content: &str) -> Result<Self, GrammarError> {
        serde_json::from_str(content).map_err(|e| GrammarError::Load(e.to_string()))
    }

    /// Reads a grammar file; `.json` files are parsed as JSON, anything else as TOML.
    pub fn load_from_file(path: &Path) -> Result<Self, GrammarError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GrammarError::Load(format!("Failed to read grammar file {path:?}: {e}"))
        })?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
    }

    pub fn start_symbol(&self) -> &str {
        &self.start
    }

    pub fn alternatives(&self, symbol: &str) -> Option<&[Alternative]> {
        self.rules.get(symbol).map(Vec::as_slice)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Checks every symbol reachable from the start symbol: it must be defined
    /// and must have at least one terminating derivation.
    ///
    /// Fuzzers do not call this; they report the same problems lazily when they
    /// hit them. Loading code uses it to fail before a campaign starts.
    pub fn validate(&self) -> Result<(), GrammarError> {
        let costs = CostTable::compute(self);
        let mut visited = HashSet::new();
        let mut worklist = vec![self.start.as_str()];

        while let Some(symbol) = worklist.pop() {
            if !visited.insert(symbol) {
                continue;
            }
            let alternatives = self
                .alternatives(symbol)
                .ok_or_else(|| GrammarError::UndefinedSymbol(symbol.to_string()))?;
            if costs.symbol_cost(symbol).is_none() {
                return Err(GrammarError::UnproductiveSymbol(symbol.to_string()));
            }
            for alternative in alternatives {
                worklist.extend(alternative.symbols());
            }
        }
        Ok(())
    }
}

/// Minimum number of expansions needed to fully derive each symbol.
///
/// Symbols that are undefined, or only reachable through themselves, have no
/// entry and are treated as infinitely expensive.
#[derive(Debug, Clone, Default)]
pub struct CostTable {
    costs: HashMap<String, usize>,
}

impl CostTable {
    /// Fixed point over all rules. Costs only ever decrease from "infinite", so
    /// the loop settles after at most one pass per symbol.
    pub fn compute(grammar: &Grammar) -> Self {
        let mut table = CostTable::default();
        loop {
            let mut changed = false;
            for (symbol, alternatives) in &grammar.rules {
                let best = alternatives
                    .iter()
                    .filter_map(|alternative| table.alternative_cost(alternative))
                    .min();
                if let Some(best) = best {
                    let current = table.costs.get(symbol).copied();
                    if current.is_none_or(|cost| best < cost) {
                        table.costs.insert(symbol.clone(), best);
                        changed = true;
                    }
                }
            }
            if !changed {
                return table;
            }
        }
    }

    pub fn symbol_cost(&self, symbol: &str) -> Option<usize> {
        self.costs.get(symbol).copied()
    }

    /// One expansion for the alternative itself plus the cost of every symbol it references.
    pub fn alternative_cost(&self, alternative: &Alternative) -> Option<usize> {
        alternative.symbols().try_fold(1usize, |total, symbol| {
            self.symbol_cost(symbol)
                .and_then(|cost| total.checked_add(cost))
        })
    }
}
