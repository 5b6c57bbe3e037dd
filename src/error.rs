//! Error type shared by every module of this crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PfsaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A line of an automaton file had a field count other than 1 to 4.
    #[error("malformed automaton at line {line}: {fields} fields")]
    MalformedAutomaton { line: usize, fields: usize },

    #[error("invalid number {token:?} at line {line}")]
    InvalidNumber { line: usize, token: String },

    /// A corpus symbol does not fit into the automaton's alphabet.
    #[error("alphabet mismatch: corpus uses {corpus} symbols, automaton has {automaton}")]
    AlphabetMismatch { corpus: usize, automaton: usize },

    /// Inverse-CDF sampling ran past the outgoing mass of a state.
    /// The automaton is not stochastic.
    #[error("state {state} is not normalized (outgoing mass {mass})")]
    NormalizationInconsistency { state: usize, mass: f64 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown weight format: {0}")]
    UnknownFormat(String),

    #[error("unknown training algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("unknown topology: {0}")]
    UnknownTopology(String),

    #[error("could not build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, PfsaError>;
