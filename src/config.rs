//! Parameters of a training run.
use crate::error::{PfsaError, Result};
use crate::wfsa::Topology;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    /// Hard EM along the best paths.
    Viterbi,
    /// Soft EM with the forward-backward algorithm.
    BaumWelch,
    /// Baum-Welch with deterministic annealing.
    AnnealedBaumWelch,
    /// Baum-Welch with the variational Bayes M-step.
    VariationalBayes,
    /// Viterbi training, then Baum-Welch from its result.
    ViterbiBaumWelch,
    /// Collapsed Gibbs sampling.
    Gibbs,
}

impl std::str::FromStr for Algorithm {
    type Err = PfsaError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "vit" => Ok(Algorithm::Viterbi),
            "bw" => Ok(Algorithm::BaumWelch),
            "dabw" => Ok(Algorithm::AnnealedBaumWelch),
            "vb" => Ok(Algorithm::VariationalBayes),
            "vitbw" => Ok(Algorithm::ViterbiBaumWelch),
            "gs" => Ok(Algorithm::Gibbs),
            _ => Err(PfsaError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// How workers of the Baum-Welch E-step share the expected counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Accumulation {
    /// Each worker fills a private table; tables are merged at the join.
    PerWorker,
    /// One table for all workers, with a lock per source state.
    SharedLocked,
}

/// Inverse temperature schedule of deterministic annealing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Annealing {
    pub beta_min: f64,
    pub beta_max: f64,
    /// Multiplier applied to beta each time a run converges below `beta_max`.
    pub growth: f64,
}

impl Default for Annealing {
    fn default() -> Self {
        Self {
            beta_min: 0.02,
            beta_max: 1f64,
            growth: 1.01,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GibbsConfig {
    /// Dirichlet concentration.
    pub beta: f64,
    /// Sweeps discarded before samples are collected.
    pub burnin: usize,
    /// Sweeps between two collected samples.
    pub lag: usize,
}

impl Default for GibbsConfig {
    fn default() -> Self {
        Self {
            beta: 0.02,
            burnin: 10_000,
            lag: 1,
        }
    }
}

/// Random restarts before the main run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restarts {
    pub count: usize,
    pub iterations: usize,
    /// Topology of the randomized automata.
    pub topology: Topology,
}

impl Default for Restarts {
    fn default() -> Self {
        Self {
            count: 0,
            iterations: 3,
            topology: Topology::Ergodic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    pub algorithm: Algorithm,
    pub max_iterations: usize,
    /// Training stops when the log-likelihood changes less than this.
    pub max_delta: f64,
    /// Added to every count of Viterbi training.
    pub viterbi_pseudocount: f64,
    /// Dirichlet concentration of the variational Bayes M-step.
    pub vb_alpha: f64,
    pub annealing: Annealing,
    pub gibbs: GibbsConfig,
    pub restarts: Restarts,
    pub threads: usize,
    pub accumulation: Accumulation,
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::BaumWelch,
            max_iterations: 100_000,
            max_delta: 0.1,
            viterbi_pseudocount: 1f64,
            vb_alpha: 0.02,
            annealing: Annealing::default(),
            gibbs: GibbsConfig::default(),
            restarts: Restarts::default(),
            threads: 1,
            accumulation: Accumulation::PerWorker,
            seed: 32389,
        }
    }
}

impl TrainConfig {
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            ..Default::default()
        }
    }
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(PfsaError::InvalidConfig(msg.to_string()));
        if self.threads == 0 {
            return invalid("threads should be positive");
        }
        if !(self.max_delta >= 0f64) {
            return invalid("max_delta should be non-negative");
        }
        if !(self.viterbi_pseudocount >= 0f64) {
            return invalid("pseudocount should be non-negative");
        }
        if !(self.vb_alpha > 0f64) {
            return invalid("vb_alpha should be positive");
        }
        let Annealing {
            beta_min,
            beta_max,
            growth,
        } = self.annealing;
        if !(0f64 < beta_min && beta_min <= beta_max && 1f64 < growth) {
            return invalid("annealing needs 0 < beta_min <= beta_max and growth > 1");
        }
        if !(self.gibbs.beta > 0f64) {
            return invalid("gibbs beta should be positive");
        }
        if self.gibbs.lag == 0 {
            return invalid("lag should be positive");
        }
        Ok(())
    }
}

/// Number of worker threads. Either a literal count, `c` for every CPU,
/// `c/N` for a share of the CPUs, or `c-N` for all but N of them.
/// Never less than one.
pub fn parse_threads(value: &str) -> Result<usize> {
    let value = value.trim();
    if value.starts_with('c') {
        let cpus = std::thread::available_parallelism()?.get();
        threads_of(value, cpus)
    } else {
        threads_of(value, 1)
    }
}

fn threads_of(value: &str, cpus: usize) -> Result<usize> {
    let invalid = || PfsaError::InvalidConfig(format!("--threads {}", value));
    let operand = |x: &str| x.trim().parse::<usize>().map_err(|_| invalid());
    let threads = match value.strip_prefix('c').map(str::trim) {
        None => operand(value)?,
        Some("") => cpus,
        Some(rest) => match (rest.strip_prefix('/'), rest.strip_prefix('-')) {
            (Some(n), _) => match operand(n)? {
                0 => return Err(invalid()),
                n => cpus / n,
            },
            (_, Some(n)) => cpus.saturating_sub(operand(n)?),
            _ => return Err(invalid()),
        },
    };
    Ok(threads.max(1))
}
