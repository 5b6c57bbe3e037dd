//! Training and scoring of probabilistic finite-state automata.
//!
//! An automaton ([`wfsa::Wfsa`]) is trained on a corpus of symbol sequences
//! ([`observation::Corpus`]) by Viterbi training, Baum-Welch (optionally annealed or
//! with a variational Bayes update), or collapsed Gibbs sampling. See [`train::train`].
//! All weights are held as log2 probabilities.
#[macro_use]
extern crate log;
pub mod config;
pub mod decode;
pub mod error;
pub mod gen_seq;
pub mod io;
pub mod logspace;
pub mod observation;
pub mod train;
pub mod trellis;
pub mod wfsa;

pub use config::{Algorithm, TrainConfig};
pub use error::{PfsaError, Result};
pub use observation::Corpus;
pub use train::{train, Checkpoint, Termination, TrainOutcome};
pub use wfsa::Wfsa;
