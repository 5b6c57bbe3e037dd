//! Viterbi training: hard EM along the single best path of each sequence.
use super::{converged, Checkpoint, Termination, TrainOutcome};
use crate::config::TrainConfig;
use crate::error::Result;
use crate::logspace::{self, LOGZERO};
use crate::observation::Corpus;
use crate::trellis::Trellis;
use crate::wfsa::Wfsa;

/// Transition and final counts along the best paths, scaled by occurrences.
#[derive(Debug, Clone)]
pub struct PathCounts {
    num_states: usize,
    alphabet_size: usize,
    // [source][symbol][target], same layout as the automaton.
    transitions: Vec<f64>,
    finals: Vec<f64>,
    pub log_likelihood: f64,
}

impl PathCounts {
    fn zeros(num_states: usize, alphabet_size: usize) -> Self {
        Self {
            num_states,
            alphabet_size,
            transitions: vec![0f64; num_states * alphabet_size * num_states],
            finals: vec![0f64; num_states],
            log_likelihood: 0f64,
        }
    }
    /// Run Viterbi on each sequence and count the transitions of its best path.
    /// Sequences without an accepting path are skipped.
    pub fn collect(wfsa: &Wfsa, corpus: &Corpus, trellis: &mut Trellis) -> Self {
        let (states, symbols) = (wfsa.num_states(), wfsa.alphabet_size());
        let mut counts = Self::zeros(states, symbols);
        for obs in corpus.iter() {
            let score = trellis.viterbi(wfsa, &obs.symbols);
            let path = match trellis.viterbi_path() {
                Some(path) if !logspace::is_zero(score) => path,
                _ => {
                    debug!("Unreachable sequence:{:?}", obs.symbols);
                    continue;
                }
            };
            let occ = obs.occurrences as f64;
            counts.log_likelihood += score * occ;
            for (t, &symbol) in obs.symbols.iter().enumerate() {
                let idx = (path[t] * symbols + symbol) * states + path[t + 1];
                counts.transitions[idx] += occ;
            }
            counts.finals[path[obs.len()]] += occ;
        }
        counts
    }
    /// Replace the weights of `wfsa` by the smoothed relative frequencies.
    pub fn maximize(&self, wfsa: &mut Wfsa, pseudocount: f64) {
        let width = self.alphabet_size * self.num_states;
        let smoothing = pseudocount * width as f64 + pseudocount;
        let weight = |count: f64, total: f64| {
            if 0f64 < count + pseudocount {
                (count + pseudocount).log2() - total.log2()
            } else {
                LOGZERO
            }
        };
        for source in 0..self.num_states {
            let counts = &self.transitions[source * width..(source + 1) * width];
            let total = counts.iter().sum::<f64>() + self.finals[source] + smoothing;
            wfsa.row_mut(source)
                .iter_mut()
                .zip(counts)
                .for_each(|(w, &c)| *w = weight(c, total));
            wfsa.set_final(source, weight(self.finals[source], total));
        }
    }
}

pub fn train(
    mut wfsa: Wfsa,
    corpus: &Corpus,
    config: &TrainConfig,
    checkpoint: &Checkpoint,
) -> Result<TrainOutcome> {
    let mut trellis = Trellis::new(wfsa.num_states(), corpus.max_len());
    let mut prev = 0f64;
    let mut log_likelihood = 0f64;
    for iteration in 0..config.max_iterations {
        if checkpoint.is_interrupted() {
            info!("Interrupted at iteration {}", iteration);
            return Ok(TrainOutcome {
                wfsa,
                log_likelihood,
                iterations: iteration,
                termination: Termination::Interrupted,
            });
        }
        let counts = PathCounts::collect(&wfsa, corpus, &mut trellis);
        log_likelihood = counts.log_likelihood;
        info!(
            "VIT\t{}\t{:.6}\t{:.6}",
            iteration + 1,
            log_likelihood,
            (prev - log_likelihood).abs()
        );
        if converged(prev, log_likelihood, config.max_delta) {
            return Ok(TrainOutcome {
                wfsa,
                log_likelihood,
                iterations: iteration + 1,
                termination: Termination::Converged,
            });
        }
        counts.maximize(&mut wfsa, config.viterbi_pseudocount);
        checkpoint.publish(&wfsa);
        prev = log_likelihood;
    }
    Ok(TrainOutcome {
        wfsa,
        log_likelihood,
        iterations: config.max_iterations,
        termination: Termination::IterationCap,
    })
}
