//! Parameter estimation.
//!
//! Every algorithm takes an initial automaton and a corpus, and returns a
//! [`TrainOutcome`]. Training can be stopped from another thread through a
//! [`Checkpoint`]: the flag is read only between iterations, and the checkpoint
//! always holds the automaton produced by the last completed M-step.
use crate::config::{Algorithm, TrainConfig};
use crate::error::{PfsaError, Result};
use crate::observation::Corpus;
use crate::trellis::Trellis;
use crate::wfsa::{InitialWeights, Wfsa};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub mod baum_welch;
pub mod gibbs;
pub mod viterbi;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The log-likelihood changed less than `max_delta`.
    Converged,
    IterationCap,
    /// Stopped by [`Checkpoint::interrupt`].
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub wfsa: Wfsa,
    /// log2-likelihood of the corpus from the last E-step.
    pub log_likelihood: f64,
    pub iterations: usize,
    pub termination: Termination,
}

/// Cancellation flag and last-known-good snapshot, shared with whoever wants to stop training.
#[derive(Debug, Default)]
pub struct Checkpoint {
    interrupted: AtomicBool,
    last_good: Mutex<Option<Wfsa>>,
}

impl Checkpoint {
    pub fn new() -> Self {
        Self::default()
    }
    /// Ask the running training to stop at the next iteration boundary.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
    /// Store a fully updated automaton.
    pub fn publish(&self, wfsa: &Wfsa) {
        let mut slot = self.last_good.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(wfsa.clone());
    }
    /// The automaton after the most recent M-step, if any.
    pub fn last_good(&self) -> Option<Wfsa> {
        let slot = self.last_good.lock().unwrap_or_else(|e| e.into_inner());
        slot.clone()
    }
}

/// Return an error if a symbol of the corpus is out of the alphabet of the automaton.
pub fn check_alphabet(wfsa: &Wfsa, corpus: &Corpus) -> Result<()> {
    let corpus_size = corpus.alphabet_size();
    if wfsa.alphabet_size() < corpus_size {
        Err(PfsaError::AlphabetMismatch {
            corpus: corpus_size,
            automaton: wfsa.alphabet_size(),
        })
    } else {
        Ok(())
    }
}

#[inline]
pub(crate) fn converged(prev: f64, current: f64, max_delta: f64) -> bool {
    (prev - current).abs() < max_delta
}

/// Train `wfsa` on `corpus` with the algorithm in `config`.
/// Identical sequences should be merged beforehand (see [`Corpus::sort_and_dedup`]);
/// the result does not change, but each distinct sequence is scored once.
pub fn train(
    wfsa: Wfsa,
    corpus: &Corpus,
    config: &TrainConfig,
    checkpoint: &Checkpoint,
) -> Result<TrainOutcome> {
    config.validate()?;
    check_alphabet(&wfsa, corpus)?;
    debug!(
        "Train {:?} with {} states on {} sequences",
        config.algorithm,
        wfsa.num_states(),
        corpus.len()
    );
    match config.algorithm {
        Algorithm::Viterbi => viterbi::train(wfsa, corpus, config, checkpoint),
        Algorithm::BaumWelch | Algorithm::AnnealedBaumWelch | Algorithm::VariationalBayes => {
            train_with_restarts(wfsa, corpus, config, checkpoint)
        }
        Algorithm::ViterbiBaumWelch => {
            let first = viterbi::train(wfsa, corpus, config, checkpoint)?;
            if first.termination == Termination::Interrupted {
                return Ok(first);
            }
            let second = train_with_restarts(first.wfsa, corpus, config, checkpoint)?;
            Ok(TrainOutcome {
                iterations: first.iterations + second.iterations,
                ..second
            })
        }
        Algorithm::Gibbs => {
            let (states, symbols) = (wfsa.num_states(), wfsa.alphabet_size());
            Ok(gibbs::train(states, symbols, corpus, config, checkpoint))
        }
    }
}

/// Sum of log2 Pr{x} * occurrences over the sequences the automaton accepts.
pub fn log_likelihood(wfsa: &Wfsa, corpus: &Corpus) -> f64 {
    let mut trellis = Trellis::new(wfsa.num_states(), corpus.max_len());
    corpus
        .iter()
        .map(|obs| (trellis.forward(wfsa, &obs.symbols), obs.occurrences))
        .filter(|(lk, _)| !crate::logspace::is_zero(*lk))
        .map(|(lk, occ)| lk * occ as f64)
        .sum()
}

// Run a few short Baum-Welch runs from different initial automata,
// then train the best one until convergence.
fn train_with_restarts(
    wfsa: Wfsa,
    corpus: &Corpus,
    config: &TrainConfig,
    checkpoint: &Checkpoint,
) -> Result<TrainOutcome> {
    let restarts = config.restarts;
    if restarts.count == 0 {
        return baum_welch::train(wfsa, corpus, config, checkpoint);
    }
    let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(config.seed);
    let short_config = TrainConfig {
        max_iterations: restarts.iterations,
        ..config.clone()
    };
    let (states, symbols) = (wfsa.num_states(), wfsa.alphabet_size());
    let mut best = baum_welch::train(wfsa, corpus, &short_config, checkpoint)?;
    debug!("Restart 0\t{:.4}", best.log_likelihood);
    for i in 1..restarts.count {
        if best.termination == Termination::Interrupted {
            return Ok(best);
        }
        let topology = restarts.topology;
        let start = Wfsa::random(states, symbols, topology, InitialWeights::Random, &mut rng);
        let outcome = baum_welch::train(start, corpus, &short_config, checkpoint)?;
        debug!("Restart {}\t{:.4}", i, outcome.log_likelihood);
        if outcome.termination == Termination::Interrupted {
            return Ok(outcome);
        }
        if best.log_likelihood < outcome.log_likelihood {
            best = outcome;
        }
    }
    if best.termination == Termination::Interrupted {
        return Ok(best);
    }
    info!("Best restart\t{:.4}", best.log_likelihood);
    baum_welch::train(best.wfsa, corpus, config, checkpoint)
}
