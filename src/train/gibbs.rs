//! Collapsed Gibbs sampling of state assignments.
//!
//! All sequences are concatenated into one chain of (state, symbol) links. Every
//! sequence ends with an extra end symbol, whose id is `alphabet_size`, and the
//! link after it always has state 0. The transition parameters are integrated out,
//! so the sampler only keeps counts of (source, symbol, target) triples.
//!
//! The average of the counts over the collected samples is needed at the end.
//! Adding every cell at every sample would cost O(cells) per sample, so each cell
//! keeps the sample index at which it was last reconciled and folds the elapsed
//! samples into its running sum only when it is touched.
use super::{Checkpoint, Termination, TrainOutcome};
use crate::config::TrainConfig;
use crate::logspace;
use crate::observation::Corpus;
use crate::wfsa::Wfsa;
use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;

/// Live counts of triples, plus their sum over collected samples.
pub trait CountStore {
    fn with_cells(cells: usize) -> Self;
    fn get(&self, cell: usize) -> u64;
    fn increment(&mut self, cell: usize);
    fn decrement(&mut self, cell: usize);
    /// Record the live counts as one sample.
    fn collect_sample(&mut self);
    /// Sum of every recorded sample and the live counts.
    fn into_sampled(self) -> Vec<u64>;
}

/// Count store with deferred reconciliation of the sample sums.
#[derive(Debug, Clone)]
pub struct LazyCounts {
    current: Vec<u64>,
    sampled: Vec<u64>,
    // Sample index at which `sampled` was last brought up to date.
    stamps: Vec<u64>,
    samples: u64,
}

impl LazyCounts {
    #[inline]
    fn settle(&mut self, cell: usize) {
        let elapsed = self.samples - self.stamps[cell];
        if elapsed > 0 {
            self.sampled[cell] += elapsed * self.current[cell];
            self.stamps[cell] = self.samples;
        }
    }
}

impl CountStore for LazyCounts {
    fn with_cells(cells: usize) -> Self {
        Self {
            current: vec![0; cells],
            sampled: vec![0; cells],
            stamps: vec![0; cells],
            // The live counts are the last sample.
            samples: 1,
        }
    }
    #[inline]
    fn get(&self, cell: usize) -> u64 {
        self.current[cell]
    }
    fn increment(&mut self, cell: usize) {
        self.settle(cell);
        self.current[cell] += 1;
        self.sampled[cell] += 1;
    }
    fn decrement(&mut self, cell: usize) {
        self.settle(cell);
        self.current[cell] -= 1;
        self.sampled[cell] -= 1;
    }
    fn collect_sample(&mut self) {
        self.samples += 1;
    }
    fn into_sampled(mut self) -> Vec<u64> {
        for cell in 0..self.current.len() {
            self.settle(cell);
        }
        self.sampled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Link {
    state: usize,
    symbol: usize,
}

/// A Gibbs sampler over the state assignments of a corpus.
#[derive(Debug, Clone)]
pub struct GibbsSampler<S: CountStore> {
    num_states: usize,
    // Including the end symbol.
    symbols: usize,
    beta: f64,
    chain: Vec<Link>,
    counts: S,
    // Live number of links leaving each state.
    state_totals: Vec<u64>,
    weights: Vec<f64>,
}

impl<S: CountStore> GibbsSampler<S> {
    /// Build the chain with uniformly random states, except that every
    /// sequence starts from state 0.
    pub fn new<R: Rng>(
        num_states: usize,
        alphabet_size: usize,
        corpus: &Corpus,
        beta: f64,
        rng: &mut R,
    ) -> Self {
        let end = alphabet_size;
        let symbols = alphabet_size + 1;
        let mut chain = vec![];
        for xs in corpus.expanded() {
            let links = xs.iter().copied().chain(std::iter::once(end));
            for (i, symbol) in links.enumerate() {
                let state = if i == 0 { 0 } else { rng.gen_range(0..num_states) };
                chain.push(Link { state, symbol });
            }
        }
        // Sentinel. Only its state is ever read.
        chain.push(Link { state: 0, symbol: end });
        let mut counts = S::with_cells(num_states * symbols * num_states);
        let mut state_totals = vec![0; num_states];
        for pair in chain.windows(2) {
            let cell = (pair[0].state * symbols + pair[0].symbol) * num_states + pair[1].state;
            counts.increment(cell);
            state_totals[pair[0].state] += 1;
        }
        Self {
            num_states,
            symbols,
            beta,
            chain,
            counts,
            state_totals,
            weights: vec![0f64; num_states],
        }
    }
    #[inline]
    fn cell(&self, source: usize, symbol: usize, target: usize) -> usize {
        (source * self.symbols + symbol) * self.num_states + target
    }
    /// Resample every free position once.
    pub fn sweep<R: Rng>(&mut self, rng: &mut R) {
        let end = self.symbols - 1;
        for j in 1..self.chain.len() - 1 {
            if self.chain[j - 1].symbol != end {
                self.resample(j, rng);
            }
        }
    }
    fn resample<R: Rng>(&mut self, j: usize, rng: &mut R) {
        let Link {
            state: zprev,
            symbol: aprev,
        } = self.chain[j - 1];
        let Link { state, symbol } = self.chain[j];
        let znext = self.chain[j + 1].state;
        let incoming = self.cell(zprev, aprev, state);
        let outgoing = self.cell(state, symbol, znext);
        self.counts.decrement(incoming);
        self.counts.decrement(outgoing);
        self.state_totals[state] -= 1;
        let pseudo = (self.symbols * self.num_states) as f64 * self.beta;
        let mut sum = 0f64;
        for k in 0..self.num_states {
            // When both triples are the same cell, the first one adds to the second.
            let coincide = (k == zprev && aprev == symbol && znext == k) as u64 as f64;
            let out = self.counts.get(self.cell(k, symbol, znext)) as f64 + self.beta + coincide;
            let inc = self.counts.get(self.cell(zprev, aprev, k)) as f64 + self.beta;
            // The incoming link still counts toward `state_totals[zprev]`.
            let norm = self.state_totals[k] as f64 + pseudo;
            self.weights[k] = out * inc / norm;
            sum += self.weights[k];
        }
        let mut point = rng.gen::<f64>() * sum;
        let mut new_state = self.num_states - 1;
        for (k, &w) in self.weights.iter().enumerate() {
            if point < w {
                new_state = k;
                break;
            }
            point -= w;
        }
        let incoming = self.cell(zprev, aprev, new_state);
        let outgoing = self.cell(new_state, symbol, znext);
        self.counts.increment(incoming);
        self.counts.increment(outgoing);
        self.state_totals[new_state] += 1;
        self.chain[j].state = new_state;
    }
    pub fn collect_sample(&mut self) {
        self.counts.collect_sample();
    }
    /// Smooth the sampled counts into an automaton.
    /// The mass of the end symbol becomes the final weight.
    pub fn into_wfsa(self) -> Wfsa {
        let (states, symbols, beta) = (self.num_states, self.symbols, self.beta);
        let end = symbols - 1;
        let sampled = self.counts.into_sampled();
        let pseudo = (symbols * states) as f64 * beta;
        let mut wfsa = Wfsa::new(states, end);
        let width = symbols * states;
        for source in 0..states {
            let row = &sampled[source * width..(source + 1) * width];
            let norm = row.iter().sum::<u64>() as f64 + pseudo;
            let prob = |count: u64| (count as f64 + beta) / norm;
            for symbol in 0..end {
                for target in 0..states {
                    let p = prob(row[symbol * states + target]);
                    wfsa.set_transition(source, symbol, target, logspace::from_real(p));
                }
            }
            let halt: f64 = row[end * states..].iter().map(|&c| prob(c)).sum();
            wfsa.set_final(source, logspace::from_real(halt));
        }
        wfsa
    }
}

/// Run the sampler for `config.max_iterations` sweeps and return the smoothed automaton.
/// An interrupt stops the sampler between two sweeps, and the samples taken so far are smoothed.
pub fn train(
    num_states: usize,
    alphabet_size: usize,
    corpus: &Corpus,
    config: &TrainConfig,
    checkpoint: &Checkpoint,
) -> TrainOutcome {
    let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(config.seed);
    let gibbs = config.gibbs;
    let mut sampler: GibbsSampler<LazyCounts> =
        GibbsSampler::new(num_states, alphabet_size, corpus, gibbs.beta, &mut rng);
    debug!("GS\tChain length {}", sampler.chain.len());
    let (mut sweeps, mut termination) = (config.max_iterations, Termination::IterationCap);
    for sweep in 0..config.max_iterations {
        if checkpoint.is_interrupted() {
            info!("Interrupted at sweep {}", sweep);
            sweeps = sweep;
            termination = Termination::Interrupted;
            break;
        }
        sampler.sweep(&mut rng);
        if gibbs.burnin <= sweep && (sweep - gibbs.burnin) % gibbs.lag == 0 {
            sampler.collect_sample();
        }
        if (sweep + 1) % 100 == 0 {
            info!("GS\t{}", sweep + 1);
        }
    }
    let wfsa = sampler.into_wfsa();
    checkpoint.publish(&wfsa);
    let log_likelihood = super::log_likelihood(&wfsa, corpus);
    TrainOutcome {
        wfsa,
        log_likelihood,
        iterations: sweeps,
        termination,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Algorithm;
    // Adds the live counts of every cell at every sample.
    #[derive(Debug, Clone)]
    struct EagerCounts {
        current: Vec<u64>,
        sampled: Vec<u64>,
    }
    impl CountStore for EagerCounts {
        fn with_cells(cells: usize) -> Self {
            Self {
                current: vec![0; cells],
                sampled: vec![0; cells],
            }
        }
        fn get(&self, cell: usize) -> u64 {
            self.current[cell]
        }
        fn increment(&mut self, cell: usize) {
            self.current[cell] += 1;
        }
        fn decrement(&mut self, cell: usize) {
            self.current[cell] -= 1;
        }
        fn collect_sample(&mut self) {
            self.sampled
                .iter_mut()
                .zip(self.current.iter())
                .for_each(|(s, c)| *s += c);
        }
        fn into_sampled(mut self) -> Vec<u64> {
            self.collect_sample();
            self.sampled
        }
    }
    fn corpus() -> Corpus {
        let seqs = vec![
            vec![0, 1, 0, 1],
            vec![0, 1],
            vec![],
            vec![2, 2, 1],
            vec![0, 1, 0],
            vec![1],
            vec![0, 1, 0, 1, 0, 1],
        ];
        let mut corpus = Corpus::from_sequences(seqs);
        corpus.sort_and_dedup();
        corpus
    }
    #[test]
    fn lazy_store_matches_eager() {
        let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(8);
        let mut lazy = LazyCounts::with_cells(10);
        let mut eager = EagerCounts::with_cells(10);
        for step in 0..5_000 {
            let cell = rng.gen_range(0..10);
            if 0 < lazy.get(cell) && rng.gen_bool(0.4) {
                lazy.decrement(cell);
                eager.decrement(cell);
            } else {
                lazy.increment(cell);
                eager.increment(cell);
            }
            if step % 7 == 0 {
                lazy.collect_sample();
                eager.collect_sample();
            }
        }
        assert_eq!(lazy.into_sampled(), eager.into_sampled());
    }
    #[test]
    fn lazy_sampler_matches_eager() {
        let corpus = corpus();
        let (burnin, lag) = (5, 3);
        for states in 1..5 {
            let mut rng1: Xoshiro256StarStar = SeedableRng::seed_from_u64(states as u64);
            let mut rng2: Xoshiro256StarStar = SeedableRng::seed_from_u64(states as u64);
            let mut lazy: GibbsSampler<LazyCounts> =
                GibbsSampler::new(states, 3, &corpus, 0.1, &mut rng1);
            let mut eager: GibbsSampler<EagerCounts> =
                GibbsSampler::new(states, 3, &corpus, 0.1, &mut rng2);
            for sweep in 0..40 {
                lazy.sweep(&mut rng1);
                eager.sweep(&mut rng2);
                assert_eq!(lazy.chain, eager.chain);
                if burnin <= sweep && (sweep - burnin) % lag == 0 {
                    lazy.collect_sample();
                    eager.collect_sample();
                }
            }
            assert_eq!(lazy.into_wfsa(), eager.into_wfsa());
        }
    }
    #[test]
    fn chain_layout() {
        let corpus = Corpus::from_sequences(vec![vec![1, 0], vec![]]);
        let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(9);
        let sampler: GibbsSampler<LazyCounts> = GibbsSampler::new(3, 2, &corpus, 0.1, &mut rng);
        let symbols: Vec<_> = sampler.chain.iter().map(|l| l.symbol).collect();
        assert_eq!(symbols, vec![1, 0, 2, 2, 2]);
        assert_eq!(sampler.chain[0].state, 0);
        assert_eq!(sampler.chain[3].state, 0);
        assert_eq!(sampler.chain[4].state, 0);
        assert_eq!(sampler.state_totals.iter().sum::<u64>(), 4);
    }
    // Natural log of the collapsed joint probability of a chain, up to a constant.
    fn log_joint(chain: &[Link], states: usize, symbols: usize, beta: f64) -> f64 {
        use statrs::function::gamma::ln_gamma;
        let width = symbols * states;
        let mut counts = vec![0usize; states * width];
        for pair in chain.windows(2) {
            counts[(pair[0].state * symbols + pair[0].symbol) * states + pair[1].state] += 1;
        }
        counts
            .chunks(width)
            .map(|row| {
                let total = row.iter().sum::<usize>() as f64;
                let cells: f64 = row.iter().map(|&c| ln_gamma(c as f64 + beta)).sum();
                cells - ln_gamma(total + width as f64 * beta)
            })
            .sum()
    }
    #[test]
    fn conditional_matches_exact_joint() {
        let corpus = Corpus::from_sequences(vec![vec![0, 0, 0], vec![0, 0], vec![1, 0, 1, 1]]);
        let (states, alphabet, beta) = (3, 2, 0.5);
        for seed in 0..10 {
            let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(seed);
            let mut sampler: GibbsSampler<LazyCounts> =
                GibbsSampler::new(states, alphabet, &corpus, beta, &mut rng);
            sampler.sweep(&mut rng);
            for j in 1..sampler.chain.len() - 1 {
                if sampler.chain[j - 1].symbol == alphabet {
                    continue;
                }
                let mut chain = sampler.chain.clone();
                let joints: Vec<f64> = (0..states)
                    .map(|k| {
                        chain[j].state = k;
                        log_joint(&chain, states, alphabet + 1, beta)
                    })
                    .collect();
                let max = joints.iter().fold(f64::NEG_INFINITY, |x, &y| x.max(y));
                let exact: Vec<f64> = joints.iter().map(|x| (x - max).exp()).collect();
                let exact_sum: f64 = exact.iter().sum();
                let mut trial = sampler.clone();
                trial.resample(j, &mut rng);
                let sum: f64 = trial.weights.iter().sum();
                for k in 0..states {
                    let (x, y) = (exact[k] / exact_sum, trial.weights[k] / sum);
                    assert!((x - y).abs() < 1e-9, "{},{},{},{},{}", seed, j, k, x, y);
                }
            }
        }
    }
    #[test]
    fn interrupted_sampler() {
        let corpus = corpus();
        let mut config = TrainConfig::new(Algorithm::Gibbs);
        config.max_iterations = 1_000;
        let checkpoint = Checkpoint::new();
        checkpoint.interrupt();
        let outcome = train(3, 3, &corpus, &config, &checkpoint);
        assert_eq!(outcome.termination, Termination::Interrupted);
        assert_eq!(outcome.iterations, 0);
        assert_eq!(checkpoint.last_good(), Some(outcome.wfsa.clone()));
        for state in 0..3 {
            let mass = outcome.wfsa.sum_prob(state);
            assert!((mass - 1f64).abs() < 1e-9, "{}", mass);
        }
        config.max_iterations = 20;
        config.gibbs.burnin = 5;
        let outcome = train(3, 3, &corpus, &config, &Checkpoint::new());
        assert_eq!(outcome.termination, Termination::IterationCap);
        assert_eq!(outcome.iterations, 20);
    }
    #[test]
    fn sampled_automaton_is_normalized() {
        let corpus = corpus();
        let mut config = TrainConfig::new(Algorithm::Gibbs);
        config.max_iterations = 300;
        config.gibbs.burnin = 100;
        config.gibbs.lag = 2;
        let wfsa = train(3, 3, &corpus, &config, &Checkpoint::new()).wfsa;
        for state in 0..3 {
            let mass = wfsa.sum_prob(state);
            assert!((mass - 1f64).abs() < 1e-9, "{}", mass);
        }
    }
    #[test]
    fn sampler_fits_data() {
        let seqs: Vec<_> = (0..200).map(|i| [0, 1].repeat(1 + i % 4)).collect();
        let corpus = Corpus::from_sequences(seqs);
        let mut config = TrainConfig::new(Algorithm::Gibbs);
        config.max_iterations = 200;
        config.gibbs.burnin = 50;
        let wfsa = train(2, 2, &corpus, &config, &Checkpoint::new()).wfsa;
        let uniform = {
            let mut w = Wfsa::new(2, 2);
            for source in 0..2 {
                w.row_mut(source).iter_mut().for_each(|x| *x = -(5f64.log2()));
                w.set_final(source, -(5f64.log2()));
            }
            w
        };
        let fitted = crate::train::log_likelihood(&wfsa, &corpus);
        let baseline = crate::train::log_likelihood(&uniform, &corpus);
        assert!(baseline < fitted, "{},{}", baseline, fitted);
    }
}
