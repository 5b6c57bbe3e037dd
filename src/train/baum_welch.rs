//! Baum-Welch training, optionally with deterministic annealing or a variational Bayes M-step.
//!
//! The E-step runs on a rayon pool. The corpus is cut into contiguous shards,
//! one per worker, and each worker keeps its own trellis for the whole run.
//! Expected counts are gathered either in a private table per worker, merged
//! at the join, or in one table shared by all workers with a lock per source state.
use super::{converged, Checkpoint, Termination, TrainOutcome};
use crate::config::{Accumulation, Algorithm, Annealing, TrainConfig};
use crate::error::Result;
use crate::logspace::{self, log_add, LOGZERO};
use crate::observation::{Corpus, Observation};
use crate::trellis::Trellis;
use crate::wfsa::Wfsa;
use rayon::prelude::*;
use std::sync::Mutex;

/// Destination of expected counts, all in log2.
pub trait Accumulator {
    /// Add `xis[target]` to the count of `source -symbol-> target` and to the total of `source`.
    fn add_transitions(&mut self, source: usize, symbol: usize, xis: &[f64]);
    fn add_final(&mut self, source: usize, xi: f64);
    /// Add a real-valued log-likelihood (not log-added).
    fn add_log_likelihood(&mut self, lk: f64);
}

/// Expected counts of a whole corpus, in log2.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectedCounts {
    num_states: usize,
    alphabet_size: usize,
    // [source][symbol][target]
    transitions: Vec<f64>,
    // Sum of the outgoing and final counts of each state.
    totals: Vec<f64>,
    finals: Vec<f64>,
    pub log_likelihood: f64,
}

impl ExpectedCounts {
    pub fn zeros(num_states: usize, alphabet_size: usize) -> Self {
        Self {
            num_states,
            alphabet_size,
            transitions: vec![LOGZERO; num_states * alphabet_size * num_states],
            totals: vec![LOGZERO; num_states],
            finals: vec![LOGZERO; num_states],
            log_likelihood: 0f64,
        }
    }
    pub fn transition(&self, source: usize, symbol: usize, target: usize) -> f64 {
        self.transitions[(source * self.alphabet_size + symbol) * self.num_states + target]
    }
    pub fn total(&self, state: usize) -> f64 {
        self.totals[state]
    }
    pub fn final_count(&self, state: usize) -> f64 {
        self.finals[state]
    }
    fn merge(mut self, other: Self) -> Self {
        let add = |(x, y): (&mut f64, &f64)| *x = log_add(*x, *y);
        self.transitions
            .iter_mut()
            .zip(other.transitions.iter())
            .for_each(add);
        self.totals.iter_mut().zip(other.totals.iter()).for_each(add);
        self.finals.iter_mut().zip(other.finals.iter()).for_each(add);
        self.log_likelihood += other.log_likelihood;
        self
    }
    /// Plain EM update: each weight becomes its count over the state total.
    pub fn maximize(&self, wfsa: &mut Wfsa) {
        let width = self.alphabet_size * self.num_states;
        let update = |count: f64, total: f64| {
            if logspace::is_zero(count) {
                LOGZERO
            } else {
                count - total
            }
        };
        for source in 0..self.num_states {
            let total = self.totals[source];
            let counts = &self.transitions[source * width..(source + 1) * width];
            wfsa.row_mut(source)
                .iter_mut()
                .zip(counts)
                .for_each(|(w, &c)| *w = update(c, total));
            wfsa.set_final(source, update(self.finals[source], total));
        }
    }
    /// Mean-field update under a symmetric Dirichlet prior with concentration `alpha`.
    /// The weights of a state no longer sum to one.
    pub fn maximize_variational(&self, wfsa: &mut Wfsa, alpha: f64) {
        use statrs::function::gamma::digamma;
        use std::f64::consts::LN_2;
        let width = self.alphabet_size * self.num_states;
        let pseudo_observations = (width + 1) as f64 * alpha;
        for source in 0..self.num_states {
            let norm = digamma(logspace::to_real(self.totals[source]) + pseudo_observations);
            let update = |count: f64| (digamma(logspace::to_real(count) + alpha) - norm) / LN_2;
            let counts = &self.transitions[source * width..(source + 1) * width];
            wfsa.row_mut(source)
                .iter_mut()
                .zip(counts)
                .for_each(|(w, &c)| *w = update(c));
            wfsa.set_final(source, update(self.finals[source]));
        }
    }
}

impl Accumulator for ExpectedCounts {
    fn add_transitions(&mut self, source: usize, symbol: usize, xis: &[f64]) {
        let start = (source * self.alphabet_size + symbol) * self.num_states;
        let counts = &mut self.transitions[start..start + self.num_states];
        let mut total = self.totals[source];
        for (c, &xi) in counts.iter_mut().zip(xis) {
            if !logspace::is_zero(xi) {
                *c = log_add(*c, xi);
                total = log_add(total, xi);
            }
        }
        self.totals[source] = total;
    }
    fn add_final(&mut self, source: usize, xi: f64) {
        self.finals[source] = log_add(self.finals[source], xi);
        self.totals[source] = log_add(self.totals[source], xi);
    }
    fn add_log_likelihood(&mut self, lk: f64) {
        self.log_likelihood += lk;
    }
}

#[derive(Debug, Clone)]
struct StateCounts {
    // [symbol][target]
    transitions: Vec<f64>,
    total: f64,
    final_count: f64,
}

/// Expected counts shared by all workers. Each source state has its own lock.
#[derive(Debug)]
pub struct SharedCounts {
    num_states: usize,
    alphabet_size: usize,
    rows: Vec<Mutex<StateCounts>>,
    log_likelihood: Mutex<f64>,
}

impl SharedCounts {
    pub fn zeros(num_states: usize, alphabet_size: usize) -> Self {
        let rows = (0..num_states)
            .map(|_| {
                Mutex::new(StateCounts {
                    transitions: vec![LOGZERO; alphabet_size * num_states],
                    total: LOGZERO,
                    final_count: LOGZERO,
                })
            })
            .collect();
        Self {
            num_states,
            alphabet_size,
            rows,
            log_likelihood: Mutex::new(0f64),
        }
    }
    pub fn into_counts(self) -> ExpectedCounts {
        let mut counts = ExpectedCounts::zeros(self.num_states, self.alphabet_size);
        counts.transitions.clear();
        for (source, row) in self.rows.into_iter().enumerate() {
            let row = row.into_inner().unwrap_or_else(|e| e.into_inner());
            counts.transitions.extend(row.transitions);
            counts.totals[source] = row.total;
            counts.finals[source] = row.final_count;
        }
        counts.log_likelihood = self
            .log_likelihood
            .into_inner()
            .unwrap_or_else(|e| e.into_inner());
        counts
    }
}

impl Accumulator for &SharedCounts {
    fn add_transitions(&mut self, source: usize, symbol: usize, xis: &[f64]) {
        let start = symbol * self.num_states;
        let mut row = self.rows[source].lock().unwrap_or_else(|e| e.into_inner());
        let row = &mut *row;
        let counts = &mut row.transitions[start..start + self.num_states];
        for (c, &xi) in counts.iter_mut().zip(xis) {
            if !logspace::is_zero(xi) {
                *c = log_add(*c, xi);
                row.total = log_add(row.total, xi);
            }
        }
    }
    fn add_final(&mut self, source: usize, xi: f64) {
        let mut row = self.rows[source].lock().unwrap_or_else(|e| e.into_inner());
        row.final_count = log_add(row.final_count, xi);
        row.total = log_add(row.total, xi);
    }
    fn add_log_likelihood(&mut self, lk: f64) {
        let mut ll = self.log_likelihood.lock().unwrap_or_else(|e| e.into_inner());
        *ll += lk;
    }
}

/// Add the expected counts of one observation to `acc`.
/// `beta` is the inverse temperature, `None` for plain EM.
/// `buffer` should have one slot per state.
/// Return false if the automaton can not generate the observation.
pub fn expect<A: Accumulator>(
    trellis: &mut Trellis,
    wfsa: &Wfsa,
    obs: &Observation,
    beta: Option<f64>,
    buffer: &mut [f64],
    acc: &mut A,
) -> bool {
    let xs = &obs.symbols;
    let total = trellis.backward(wfsa, xs);
    if logspace::is_zero(total) {
        return false;
    }
    trellis.forward(wfsa, xs);
    acc.add_log_likelihood(total * obs.occurrences as f64);
    let occurrences = (obs.occurrences as f64).log2();
    let scale = |xi: f64| match beta {
        Some(beta) => xi * beta + occurrences,
        None => xi + occurrences,
    };
    for (t, &symbol) in xs.iter().enumerate() {
        for source in 0..wfsa.num_states() {
            let fw = trellis.forward_at(source, t);
            if logspace::is_zero(fw) {
                continue;
            }
            let mut reached = false;
            let weights = wfsa.targets(source, symbol);
            for (target, (xi, &weight)) in buffer.iter_mut().zip(weights).enumerate() {
                let bw = trellis.backward_at(target, t + 1);
                *xi = if logspace::is_zero(weight) || logspace::is_zero(bw) {
                    LOGZERO
                } else {
                    reached = true;
                    scale(fw + weight + bw - total)
                };
            }
            if reached {
                acc.add_transitions(source, symbol, buffer);
            }
        }
    }
    let len = xs.len();
    for source in 0..wfsa.num_states() {
        let fw = trellis.forward_at(source, len);
        let halt = wfsa.final_weight(source);
        if !logspace::is_zero(fw) && !logspace::is_zero(halt) {
            acc.add_final(source, scale(fw + halt - total));
        }
    }
    true
}

// Expected counts of a shard into `acc`.
fn expect_shard<A: Accumulator>(
    trellis: &mut Trellis,
    wfsa: &Wfsa,
    shard: &[Observation],
    beta: Option<f64>,
    acc: &mut A,
) {
    let mut buffer = vec![LOGZERO; wfsa.num_states()];
    for obs in shard {
        if !expect(trellis, wfsa, obs, beta, &mut buffer, acc) {
            debug!("Unreachable sequence:{:?}", obs.symbols);
        }
    }
}

/// The E-step over a corpus split into shards, one trellis per shard.
pub struct EStep {
    pool: rayon::ThreadPool,
    shards: Vec<std::ops::Range<usize>>,
    trellises: Vec<Trellis>,
    accumulation: Accumulation,
}

impl EStep {
    pub fn new(
        wfsa: &Wfsa,
        corpus: &Corpus,
        threads: usize,
        accumulation: Accumulation,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
        let shards = corpus.partition(threads);
        let max_len = corpus.max_len();
        let trellises = shards
            .iter()
            .map(|_| Trellis::new(wfsa.num_states(), max_len))
            .collect();
        Ok(Self {
            pool,
            shards,
            trellises,
            accumulation,
        })
    }
    pub fn run(&mut self, wfsa: &Wfsa, corpus: &Corpus, beta: Option<f64>) -> ExpectedCounts {
        let (states, symbols) = (wfsa.num_states(), wfsa.alphabet_size());
        let observations = corpus.as_slice();
        if self.shards.len() == 1 {
            let mut counts = ExpectedCounts::zeros(states, symbols);
            expect_shard(&mut self.trellises[0], wfsa, observations, beta, &mut counts);
            return counts;
        }
        let (shards, trellises) = (&self.shards, &mut self.trellises);
        match self.accumulation {
            Accumulation::PerWorker => self.pool.install(|| {
                shards
                    .par_iter()
                    .zip(trellises.par_iter_mut())
                    .map(|(range, trellis)| {
                        let mut counts = ExpectedCounts::zeros(states, symbols);
                        let shard = &observations[range.clone()];
                        expect_shard(trellis, wfsa, shard, beta, &mut counts);
                        counts
                    })
                    .reduce(|| ExpectedCounts::zeros(states, symbols), ExpectedCounts::merge)
            }),
            Accumulation::SharedLocked => {
                let shared = SharedCounts::zeros(states, symbols);
                self.pool.install(|| {
                    shards
                        .par_iter()
                        .zip(trellises.par_iter_mut())
                        .for_each(|(range, trellis)| {
                            let mut acc = &shared;
                            let shard = &observations[range.clone()];
                            expect_shard(trellis, wfsa, shard, beta, &mut acc);
                        })
                });
                shared.into_counts()
            }
        }
    }
}

// Inverse temperature of deterministic annealing. `None` for plain EM.
#[derive(Debug, Clone, Copy)]
struct Schedule {
    beta: Option<f64>,
    annealing: Annealing,
}

impl Schedule {
    fn new(config: &TrainConfig) -> Self {
        let annealing = config.annealing;
        let beta = match config.algorithm {
            Algorithm::AnnealedBaumWelch => Some(annealing.beta_min),
            _ => None,
        };
        Self { beta, annealing }
    }
    // Called on convergence. Return false if training should stop,
    // otherwise raise beta, clamped at `beta_max`.
    fn raise(&mut self) -> bool {
        match self.beta {
            Some(beta) if beta < self.annealing.beta_max => {
                let next = (beta * self.annealing.growth).min(self.annealing.beta_max);
                debug!("BW\tBeta {:.4} -> {:.4}", beta, next);
                self.beta = Some(next);
                true
            }
            _ => false,
        }
    }
}

pub fn train(
    mut wfsa: Wfsa,
    corpus: &Corpus,
    config: &TrainConfig,
    checkpoint: &Checkpoint,
) -> Result<TrainOutcome> {
    let mut estep = EStep::new(&wfsa, corpus, config.threads, config.accumulation)?;
    let mut schedule = Schedule::new(config);
    let variational = config.algorithm == Algorithm::VariationalBayes;
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
        let counts = estep.run(&wfsa, corpus, schedule.beta);
        log_likelihood = counts.log_likelihood;
        let (i, delta) = (iteration + 1, (prev - log_likelihood).abs());
        match schedule.beta {
            Some(b) => info!("BW\t{}\t{:.6}\t{:.6}\t{:.4}", i, log_likelihood, delta, b),
            None => info!("BW\t{}\t{:.6}\t{:.6}", i, log_likelihood, delta),
        }
        if converged(prev, log_likelihood, config.max_delta) && !schedule.raise() {
            return Ok(TrainOutcome {
                wfsa,
                log_likelihood,
                iterations: iteration + 1,
                termination: Termination::Converged,
            });
        }
        if variational {
            counts.maximize_variational(&mut wfsa, config.vb_alpha);
        } else {
            counts.maximize(&mut wfsa);
        }
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
