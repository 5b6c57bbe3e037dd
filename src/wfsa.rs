//! Weighted finite-state automata.
//!
//! An automaton has `num_states` states and an alphabet of `alphabet_size` symbols.
//! Every state owns a weight for each (symbol, target) pair and a final (halting) weight.
//! All weights are kept as log2 probabilities, see [`crate::logspace`].
//! State 0 is the initial state.
use crate::error::{PfsaError, Result};
use crate::logspace::{self, LOGZERO};
use rand::distributions::OpenClosed01;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A weighted finite-state automaton.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wfsa {
    num_states: usize,
    alphabet_size: usize,
    // log2 Pr{source -symbol-> target}.
    // By accessing (source * alphabet_size + symbol) * num_states + target.
    transitions: Vec<f64>,
    // log2 Pr{halt | state}.
    finals: Vec<f64>,
}

/// Shape of the transition graph drawn by [`Wfsa::randomize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Topology {
    /// Every (symbol, target) pair is allowed.
    Ergodic,
    /// Left-to-right: only targets with index at least the source.
    Bakis,
    /// Exactly one target per (source, symbol).
    Deterministic,
}

impl std::str::FromStr for Topology {
    type Err = PfsaError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "n" | "ergodic" => Ok(Topology::Ergodic),
            "b" | "bakis" => Ok(Topology::Bakis),
            "d" | "deterministic" => Ok(Topology::Deterministic),
            _ => Err(PfsaError::UnknownTopology(s.to_string())),
        }
    }
}

/// How raw weights are drawn before normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitialWeights {
    Uniform,
    /// Exponentially distributed, i.e., a flat Dirichlet draw after normalization.
    Random,
}

/// External encodings of a weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeightFormat {
    Real,
    Log2,
    Ln,
    Log10,
    NegLog2,
    NegLn,
    NegLog10,
}

impl std::str::FromStr for WeightFormat {
    type Err = PfsaError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "real" => Ok(WeightFormat::Real),
            "log2" => Ok(WeightFormat::Log2),
            "ln" => Ok(WeightFormat::Ln),
            "log10" => Ok(WeightFormat::Log10),
            "nlog2" => Ok(WeightFormat::NegLog2),
            "nln" => Ok(WeightFormat::NegLn),
            "nlog10" => Ok(WeightFormat::NegLog10),
            _ => Err(PfsaError::UnknownFormat(s.to_string())),
        }
    }
}

impl std::fmt::Display for WeightFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            WeightFormat::Real => "real",
            WeightFormat::Log2 => "log2",
            WeightFormat::Ln => "ln",
            WeightFormat::Log10 => "log10",
            WeightFormat::NegLog2 => "nlog2",
            WeightFormat::NegLn => "nln",
            WeightFormat::NegLog10 => "nlog10",
        };
        write!(f, "{}", name)
    }
}

impl WeightFormat {
    /// Convert an externally encoded weight into log2.
    pub fn to_log2(self, x: f64) -> f64 {
        use std::f64::consts::{LOG2_10, LOG2_E};
        match self {
            WeightFormat::Real => logspace::from_real(x),
            WeightFormat::Log2 => x,
            WeightFormat::Ln => x * LOG2_E,
            WeightFormat::Log10 => x * LOG2_10,
            WeightFormat::NegLog2 => -x,
            WeightFormat::NegLn => -x * LOG2_E,
            WeightFormat::NegLog10 => -x * LOG2_10,
        }
    }
    /// Convert a log2 weight into this encoding.
    pub fn from_log2(self, x: f64) -> f64 {
        use std::f64::consts::{LN_2, LOG10_2};
        // Negated encodings never emit -0.
        let negate = |y: f64| if y == 0f64 { 0f64 } else { -y };
        match self {
            WeightFormat::Real => logspace::to_real(x),
            WeightFormat::Log2 => x,
            WeightFormat::Ln => x * LN_2,
            WeightFormat::Log10 => x * LOG10_2,
            WeightFormat::NegLog2 => negate(x),
            WeightFormat::NegLn => negate(x * LN_2),
            WeightFormat::NegLog10 => negate(x * LOG10_2),
        }
    }
}

/// One draw of [`Wfsa::random_transition`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    pub target: usize,
    /// `None` means the automaton halted in the current state.
    pub symbol: Option<usize>,
    /// log2 weight of the transition taken (or of the final weight).
    pub weight: f64,
}

impl Wfsa {
    /// An automaton where every weight is zero probability.
    pub fn new(num_states: usize, alphabet_size: usize) -> Self {
        Self {
            num_states,
            alphabet_size,
            transitions: vec![LOGZERO; num_states * alphabet_size * num_states],
            finals: vec![LOGZERO; num_states],
        }
    }
    /// Create an automaton from log2 weights.
    /// `transitions` should be laid out as `[source][symbol][target]`.
    pub fn from_raw_elements(
        num_states: usize,
        alphabet_size: usize,
        transitions: Vec<f64>,
        finals: Vec<f64>,
    ) -> Self {
        assert_eq!(transitions.len(), num_states * alphabet_size * num_states);
        assert_eq!(finals.len(), num_states);
        Self {
            num_states,
            alphabet_size,
            transitions,
            finals,
        }
    }
    /// Shorthand of `Wfsa::new` followed by `randomize`.
    pub fn random<R: Rng>(
        num_states: usize,
        alphabet_size: usize,
        topology: Topology,
        weights: InitialWeights,
        rng: &mut R,
    ) -> Self {
        let mut wfsa = Self::new(num_states, alphabet_size);
        wfsa.randomize(topology, weights, rng);
        wfsa
    }
    pub fn num_states(&self) -> usize {
        self.num_states
    }
    pub fn alphabet_size(&self) -> usize {
        self.alphabet_size
    }
    #[inline]
    fn index(&self, source: usize, symbol: usize, target: usize) -> usize {
        (source * self.alphabet_size + symbol) * self.num_states + target
    }
    #[inline]
    pub fn transition(&self, source: usize, symbol: usize, target: usize) -> f64 {
        self.transitions[self.index(source, symbol, target)]
    }
    pub fn set_transition(&mut self, source: usize, symbol: usize, target: usize, weight: f64) {
        let idx = self.index(source, symbol, target);
        self.transitions[idx] = weight;
    }
    /// Weights of `source -symbol-> *`, indexed by target.
    #[inline]
    pub fn targets(&self, source: usize, symbol: usize) -> &[f64] {
        let start = self.index(source, symbol, 0);
        &self.transitions[start..start + self.num_states]
    }
    /// All weights leaving `source`, laid out as `[symbol][target]`.
    pub fn row(&self, source: usize) -> &[f64] {
        let width = self.alphabet_size * self.num_states;
        &self.transitions[source * width..(source + 1) * width]
    }
    pub fn row_mut(&mut self, source: usize) -> &mut [f64] {
        let width = self.alphabet_size * self.num_states;
        &mut self.transitions[source * width..(source + 1) * width]
    }
    #[inline]
    pub fn final_weight(&self, state: usize) -> f64 {
        self.finals[state]
    }
    pub fn set_final(&mut self, state: usize, weight: f64) {
        self.finals[state] = weight;
    }
    pub fn finals(&self) -> &[f64] {
        &self.finals
    }
    /// Overwrite every weight with a random one and normalize each state.
    pub fn randomize<R: Rng>(&mut self, topology: Topology, weights: InitialWeights, rng: &mut R) {
        let draw = |rng: &mut R| match weights {
            InitialWeights::Uniform => 1f64,
            InitialWeights::Random => -rng.sample::<f64, _>(OpenClosed01).ln(),
        };
        let (states, symbols) = (self.num_states, self.alphabet_size);
        // Work in the real domain, convert at the end of normalize.
        let mut real = vec![0f64; self.transitions.len()];
        let mut finals = vec![0f64; states];
        for source in 0..states {
            for symbol in 0..symbols {
                let start = self.index(source, symbol, 0);
                let row = &mut real[start..start + states];
                match topology {
                    Topology::Ergodic => row.iter_mut().for_each(|w| *w = draw(rng)),
                    Topology::Bakis => row[source..].iter_mut().for_each(|w| *w = draw(rng)),
                    Topology::Deterministic => row[rng.gen_range(0..states)] = draw(rng),
                }
            }
            finals[source] = draw(rng);
        }
        self.transitions = real.into_iter().map(logspace::from_real).collect();
        self.finals = finals.into_iter().map(logspace::from_real).collect();
        self.normalize();
    }
    /// Rescale every state so that its outgoing and final mass sums to one.
    /// States without any mass are left untouched.
    pub fn normalize(&mut self) {
        for state in 0..self.num_states {
            let mass = self.sum_prob(state);
            if mass <= 0f64 {
                continue;
            }
            let log_mass = mass.log2();
            self.row_mut(state)
                .iter_mut()
                .filter(|w| !logspace::is_zero(**w))
                .for_each(|w| *w -= log_mass);
            if !logspace::is_zero(self.finals[state]) {
                self.finals[state] -= log_mass;
            }
        }
    }
    /// Real-domain sum of every weight leaving `state`, including the final weight.
    pub fn sum_prob(&self, state: usize) -> f64 {
        let outgoing: f64 = self.row(state).iter().map(|&w| logspace::to_real(w)).sum();
        outgoing + logspace::to_real(self.finals[state])
    }
    /// Draw a successor of `state` by inverse-CDF sampling over its outgoing mass.
    /// The final weight comes first, then targets in order, each over its symbols.
    pub fn random_transition<R: Rng>(&self, state: usize, rng: &mut R) -> Result<Step> {
        let mass = self.sum_prob(state);
        let point = rng.gen::<f64>() * mass;
        let mut acc = 0f64;
        let halt = self.finals[state];
        if !logspace::is_zero(halt) {
            acc += logspace::to_real(halt);
            if point <= acc {
                let (target, symbol, weight) = (state, None, halt);
                return Ok(Step {
                    target,
                    symbol,
                    weight,
                });
            }
        }
        let mut last = None;
        for target in 0..self.num_states {
            for symbol in 0..self.alphabet_size {
                let weight = self.transition(state, symbol, target);
                if logspace::is_zero(weight) {
                    continue;
                }
                acc += logspace::to_real(weight);
                let step = Step {
                    target,
                    symbol: Some(symbol),
                    weight,
                };
                if point <= acc {
                    return Ok(step);
                }
                last = Some(step);
            }
        }
        // Summation order differs from `sum_prob`, so allow a few ulps of slack.
        match last {
            Some(step) if point - acc <= 16f64 * f64::EPSILON * mass => Ok(step),
            _ => Err(PfsaError::NormalizationInconsistency { state, mass }),
        }
    }
    /// Squared distance between two automata in the real domain.
    /// Return None if the shapes differ.
    pub fn dist(&self, other: &Self) -> Option<f64> {
        let same_shape =
            self.num_states == other.num_states && self.alphabet_size == other.alphabet_size;
        same_shape.then(|| {
            let sq = |(x, y): (&f64, &f64)| (logspace::to_real(*x) - logspace::to_real(*y)).powi(2);
            let trans: f64 = self
                .transitions
                .iter()
                .zip(other.transitions.iter())
                .map(sq)
                .sum();
            let finals: f64 = self.finals.iter().zip(other.finals.iter()).map(sq).sum();
            trans + finals
        })
    }
}

impl std::fmt::Display for Wfsa {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "States:{}", self.num_states)?;
        writeln!(f, "Symbols:{}", self.alphabet_size)?;
        for source in 0..self.num_states {
            for symbol in 0..self.alphabet_size {
                let probs: Vec<_> = self
                    .targets(source, symbol)
                    .iter()
                    .map(|&w| format!("{:.3}", logspace::to_real(w)))
                    .collect();
                writeln!(f, "{}\t{}\t{}", source, symbol, probs.join("\t"))?;
            }
        }
        let finals: Vec<_> = self
            .finals
            .iter()
            .map(|&w| format!("{:.3}", logspace::to_real(w)))
            .collect();
        write!(f, "Final:{}", finals.join("\t"))
    }
}
