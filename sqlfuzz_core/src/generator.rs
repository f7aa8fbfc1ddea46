use crate::fuzzer::{Fuzzer, FuzzerError};
use crate::grammar::{Alternative, CostTable, Grammar, GrammarError, Token};
use rand::Rng;
use rand::seq::IndexedRandom;
use std::sync::Arc;

/// Below this many pending symbols the fuzzer deliberately picks expensive alternatives.
pub const DEFAULT_MIN_NONTERMINALS: usize = 0;
/// Once this many symbols are pending the fuzzer switches to cheapest-first expansion.
pub const DEFAULT_MAX_NONTERMINALS: usize = 10;
/// Hard cap on random expansions per input before cheapest-first expansion kicks in.
pub const DEFAULT_MAX_EXPANSIONS: usize = 1000;

/// Bounds that steer how large a derivation may grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrammarFuzzerSettings {
    pub min_nonterminals: usize,
    pub max_nonterminals: usize,
    pub max_expansions: usize,
}

impl Default for GrammarFuzzerSettings {
    fn default() -> Self {
        Self {
            min_nonterminals: DEFAULT_MIN_NONTERMINALS,
            max_nonterminals: DEFAULT_MAX_NONTERMINALS,
            max_expansions: DEFAULT_MAX_EXPANSIONS,
        }
    }
}

/// Derives terminal strings from a [`Grammar`] starting at its start symbol.
///
/// Expansion runs over an explicit stack of pending tokens rather than native
/// recursion. Each call goes through two phases:
///
/// 1. *Growing*: alternatives are picked uniformly at random (or, while fewer than
///    `min_nonterminals` symbols are pending, the most expensive terminating one).
/// 2. *Closing*: once `max_nonterminals` symbols are pending or `max_expansions`
///    expansions have been made, every remaining symbol takes one of its cheapest
///    alternatives. Each such step lowers the total remaining cost by one, so the
///    derivation always finishes.
///
/// The closing phase is one-way for the rest of the call, which is what keeps
/// left-recursive rules like `<list> ::= <item> | <list>,<item>` bounded.
#[derive(Debug, Clone)]
pub struct GrammarFuzzer {
    grammar: Arc<Grammar>,
    costs: CostTable,
    start: Token,
    settings: GrammarFuzzerSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Growing,
    Closing,
}

impl GrammarFuzzer {
    pub fn new(grammar: Arc<Grammar>) -> Self {
        let costs = CostTable::compute(&grammar);
        let start = Token::Symbol(grammar.start_symbol().to_string());
        Self {
            grammar,
            costs,
            start,
            settings: GrammarFuzzerSettings::default(),
        }
    }

    pub fn with_settings(
        grammar: Arc<Grammar>,
        settings: GrammarFuzzerSettings,
    ) -> Result<Self, GrammarError> {
        if settings.min_nonterminals > settings.max_nonterminals {
            return Err(GrammarError::InvalidLimits {
                min: settings.min_nonterminals,
                max: settings.max_nonterminals,
            });
        }
        Ok(Self {
            settings,
            ..Self::new(grammar)
        })
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    pub fn settings(&self) -> GrammarFuzzerSettings {
        self.settings
    }

    /// Expands the start symbol into a string with no symbol references left.
    ///
    /// Fails with [`GrammarError::UndefinedSymbol`] the first time a referenced
    /// symbol without a rule is reached, and with
    /// [`GrammarError::UnproductiveSymbol`] if the closing phase meets a symbol
    /// that cannot terminate.
    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<String, GrammarError> {
        let mut output = String::new();
        let mut pending: Vec<&Token> = vec![&self.start];
        let mut open_symbols = 1usize;
        let mut expansions = 0usize;
        let mut phase = Phase::Growing;

        while let Some(token) = pending.pop() {
            let symbol = match token {
                Token::Literal(text) => {
                    output.push_str(text);
                    continue;
                }
                Token::Symbol(symbol) => symbol,
            };

            let alternatives = self
                .grammar
                .alternatives(symbol)
                .ok_or_else(|| GrammarError::UndefinedSymbol(symbol.clone()))?;

            if phase == Phase::Growing
                && (open_symbols >= self.settings.max_nonterminals
                    || expansions >= self.settings.max_expansions)
            {
                phase = Phase::Closing;
            }

            let chosen = match phase {
                Phase::Closing => self.cheapest(symbol, alternatives, rng)?,
                Phase::Growing if alternatives.len() == 1 => &alternatives[0],
                Phase::Growing if open_symbols < self.settings.min_nonterminals => {
                    self.costliest(symbol, alternatives, rng)?
                }
                Phase::Growing => alternatives
                    .choose(rng)
                    .ok_or_else(|| GrammarError::EmptyAlternatives(symbol.clone()))?,
            };

            open_symbols -= 1;
            expansions += 1;
            for token in chosen.tokens().iter().rev() {
                if matches!(token, Token::Symbol(_)) {
                    open_symbols += 1;
                }
                pending.push(token);
            }
        }

        Ok(output)
    }

    /// Uniform pick among the alternatives of minimal finite cost.
    fn cheapest<'g, R: Rng + ?Sized>(
        &self,
        symbol: &str,
        alternatives: &'g [Alternative],
        rng: &mut R,
    ) -> Result<&'g Alternative, GrammarError> {
        let best = self
            .costs
            .symbol_cost(symbol)
            .ok_or_else(|| GrammarError::UnproductiveSymbol(symbol.to_string()))?;
        let candidates: Vec<&Alternative> = alternatives
            .iter()
            .filter(|alternative| self.costs.alternative_cost(alternative) == Some(best))
            .collect();
        candidates
            .choose(rng)
            .copied()
            .ok_or_else(|| GrammarError::UnproductiveSymbol(symbol.to_string()))
    }

    /// Uniform pick among the alternatives of maximal finite cost, falling back to
    /// any alternative when none terminates.
    fn costliest<'g, R: Rng + ?Sized>(
        &self,
        symbol: &str,
        alternatives: &'g [Alternative],
        rng: &mut R,
    ) -> Result<&'g Alternative, GrammarError> {
        let worst = alternatives
            .iter()
            .filter_map(|alternative| self.costs.alternative_cost(alternative))
            .max();
        let candidates: Vec<&Alternative> = match worst {
            Some(worst) => alternatives
                .iter()
                .filter(|alternative| self.costs.alternative_cost(alternative) == Some(worst))
                .collect(),
            None => alternatives.iter().collect(),
        };
        candidates
            .choose(rng)
            .copied()
            .ok_or_else(|| GrammarError::EmptyAlternatives(symbol.to_string()))
    }
}

impl<R: Rng + ?Sized> Fuzzer<R> for GrammarFuzzer {
    fn name(&self) -> &'static str {
        "GrammarFuzzer"
    }

    fn fuzz(&mut self, rng: &mut R) -> Result<String, FuzzerError> {
        Ok(self.generate(rng)?)
    }
}
